//! Descriptor accumulation and deduplication.
//!
//! During `setup()`, every pass asks the [`ResourceGraphBuilder`] for the
//! resources it reads and writes. The builder hashes each descriptor into a
//! [`ResourceHandle`]; identical requests from different passes collapse onto
//! the same handle, which is how two passes end up sharing a depth buffer
//! without knowing about each other.
//!
//! ```ignore
//! builder.set_current_pass(Some(shadow_id));
//! let depth = builder.create_texture(shadow_map_desc(), ResourceAccess::Write);
//!
//! builder.set_current_pass(Some(lighting_id));
//! let same = builder.create_texture(shadow_map_desc(), ResourceAccess::Read);
//! assert_eq!(depth, same);
//! ```

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::PassId;
use super::descriptor::{
    BufferDesc, FramebufferDesc, GraphicsPipelineDesc, RenderPassDesc, ResourceDescriptor,
    TextureDesc,
};
use super::handle::ResourceHandle;

/// Opaque data a pass attaches to a resource at creation time.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// How a pass uses a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAccess {
    /// The pass consumes the resource.
    Read,
    /// The pass produces the resource.
    Write,
}

/// One declared use of a resource by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceUse {
    /// The resource.
    pub handle: ResourceHandle,
    /// Read or write.
    pub access: ResourceAccess,
}

/// Ordered list of the resources a pass declared during its last `setup()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassInfo {
    uses: Vec<ResourceUse>,
}

impl PassInfo {
    /// All declared uses, in declaration order.
    pub fn uses(&self) -> &[ResourceUse] {
        &self.uses
    }

    /// Handles the pass reads.
    pub fn reads(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.uses
            .iter()
            .filter(|u| u.access == ResourceAccess::Read)
            .map(|u| u.handle)
    }

    /// Handles the pass writes.
    pub fn writes(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.uses
            .iter()
            .filter(|u| u.access == ResourceAccess::Write)
            .map(|u| u.handle)
    }

    /// Returns true if the pass reads `handle`.
    pub fn reads_handle(&self, handle: ResourceHandle) -> bool {
        self.reads().any(|h| h == handle)
    }

    /// Returns true if the pass writes `handle`.
    pub fn writes_handle(&self, handle: ResourceHandle) -> bool {
        self.writes().any(|h| h == handle)
    }

    /// Returns true if nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.uses.is_empty()
    }

    fn record(&mut self, handle: ResourceHandle, access: ResourceAccess) {
        let entry = ResourceUse { handle, access };
        if !self.uses.contains(&entry) {
            self.uses.push(entry);
        }
    }
}

struct DescriptorEntry {
    /// Descriptor as the passes asked for it. Dedup compares against this.
    requested: ResourceDescriptor,
    /// Descriptor the compiler builds from. Differs from `requested` after
    /// [`ResourceGraphBuilder::force_cache`].
    effective: ResourceDescriptor,
    user_data: Option<UserData>,
}

/// Accumulates descriptors and per-pass read/write lists.
#[derive(Default)]
pub struct ResourceGraphBuilder {
    entries: HashMap<ResourceHandle, DescriptorEntry>,
    /// Insertion order, for deterministic compilation.
    order: Vec<ResourceHandle>,
    passes: BTreeMap<PassId, PassInfo>,
    current_pass: Option<PassId>,
    collisions: usize,
}

impl fmt::Debug for ResourceGraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGraphBuilder")
            .field("resources", &self.order.len())
            .field("passes", &self.passes.len())
            .field("current_pass", &self.current_pass)
            .field("collisions", &self.collisions)
            .finish()
    }
}

impl ResourceGraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Pass bookkeeping
    // ------------------------------------------------------------------

    /// Select the pass subsequent create/read/write calls are recorded against.
    pub fn set_current_pass(&mut self, pass: Option<PassId>) {
        if let Some(id) = pass {
            self.passes.entry(id).or_default();
        }
        self.current_pass = pass;
    }

    /// The pass currently being set up.
    pub fn current_pass(&self) -> Option<PassId> {
        self.current_pass
    }

    /// Drop everything a pass declared so it can run `setup()` again.
    pub fn reset_pass(&mut self, pass: PassId) {
        self.passes.insert(pass, PassInfo::default());
    }

    /// The declared uses of a pass.
    pub fn pass_info(&self, pass: PassId) -> Option<&PassInfo> {
        self.passes.get(&pass)
    }

    /// All passes with their declared uses, ordered by id.
    pub fn pass_infos(&self) -> impl Iterator<Item = (PassId, &PassInfo)> + '_ {
        self.passes.iter().map(|(id, info)| (*id, info))
    }

    /// Passes that write `handle`, ordered by id.
    pub fn writers_of(&self, handle: ResourceHandle) -> Vec<PassId> {
        self.passes
            .iter()
            .filter(|(_, info)| info.writes_handle(handle))
            .map(|(id, _)| *id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Resource creation
    // ------------------------------------------------------------------

    /// Request a texture.
    pub fn create_texture(&mut self, desc: TextureDesc, access: ResourceAccess) -> ResourceHandle {
        self.create(desc.into(), access, None)
    }

    /// Request a buffer.
    pub fn create_buffer(&mut self, desc: BufferDesc, access: ResourceAccess) -> ResourceHandle {
        self.create(desc.into(), access, None)
    }

    /// Request a framebuffer.
    pub fn create_framebuffer(
        &mut self,
        desc: FramebufferDesc,
        access: ResourceAccess,
    ) -> ResourceHandle {
        self.create(desc.into(), access, None)
    }

    /// Request a render pass object.
    pub fn create_render_pass(
        &mut self,
        desc: RenderPassDesc,
        access: ResourceAccess,
    ) -> ResourceHandle {
        self.create(desc.into(), access, None)
    }

    /// Request a graphics pipeline.
    pub fn create_pipeline(
        &mut self,
        desc: GraphicsPipelineDesc,
        access: ResourceAccess,
    ) -> ResourceHandle {
        self.create(desc.into(), access, None)
    }

    /// Request any resource, optionally attaching user data.
    ///
    /// Identical descriptors return the same handle. User data is only stored
    /// the first time a handle is created; later requests keep the original.
    pub fn create(
        &mut self,
        descriptor: ResourceDescriptor,
        access: ResourceAccess,
        user_data: Option<UserData>,
    ) -> ResourceHandle {
        let mut salt = 0u64;
        let handle = loop {
            let candidate = ResourceHandle::salted(&descriptor, salt);
            match self.entries.get(&candidate) {
                None => {
                    self.entries.insert(
                        candidate,
                        DescriptorEntry {
                            requested: descriptor.clone(),
                            effective: descriptor,
                            user_data,
                        },
                    );
                    self.order.push(candidate);
                    break candidate;
                }
                Some(entry) if entry.requested == descriptor => break candidate,
                Some(entry) => {
                    log::warn!(
                        "Resource handle collision between '{}' and '{}', rehashing with salt {}",
                        entry.requested.name(),
                        descriptor.name(),
                        salt + 1
                    );
                    self.collisions += 1;
                    salt += 1;
                }
            }
        };

        self.record(handle, access);
        handle
    }

    /// Declare a read of an existing handle.
    pub fn read(&mut self, handle: ResourceHandle) -> ResourceHandle {
        self.declare(handle, ResourceAccess::Read)
    }

    /// Declare a write of an existing handle.
    pub fn write(&mut self, handle: ResourceHandle) -> ResourceHandle {
        self.declare(handle, ResourceAccess::Write)
    }

    fn declare(&mut self, handle: ResourceHandle, access: ResourceAccess) -> ResourceHandle {
        if !self.entries.contains_key(&handle) {
            log::warn!(
                "Pass {:?} declared {:?} of unknown resource {}",
                self.current_pass,
                access,
                handle
            );
        }
        self.record(handle, access);
        handle
    }

    fn record(&mut self, handle: ResourceHandle, access: ResourceAccess) {
        match self.current_pass {
            Some(pass) => self.passes.entry(pass).or_default().record(handle, access),
            None => log::trace!("Resource {} requested outside of a pass setup", handle),
        }
    }

    /// Overwrite the descriptor behind `handle` without changing the handle.
    ///
    /// Used after swapchain recreation, when dimensions or format change but
    /// every pass must keep referring to the same slot. Requests for the
    /// original descriptor keep resolving to `handle`. Returns the previous
    /// effective descriptor.
    pub fn force_cache(
        &mut self,
        handle: ResourceHandle,
        descriptor: ResourceDescriptor,
    ) -> Option<ResourceDescriptor> {
        match self.entries.get_mut(&handle) {
            Some(entry) => Some(std::mem::replace(&mut entry.effective, descriptor)),
            None => {
                self.entries.insert(
                    handle,
                    DescriptorEntry {
                        requested: descriptor.clone(),
                        effective: descriptor,
                        user_data: None,
                    },
                );
                self.order.push(handle);
                None
            }
        }
    }

    /// Attach or replace user data on an existing handle.
    pub fn set_user_data(&mut self, handle: ResourceHandle, data: UserData) -> bool {
        match self.entries.get_mut(&handle) {
            Some(entry) => {
                entry.user_data = Some(data);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The effective descriptor behind a handle.
    pub fn descriptor(&self, handle: ResourceHandle) -> Option<&ResourceDescriptor> {
        self.entries.get(&handle).map(|e| &e.effective)
    }

    /// The descriptor exactly as passes requested it.
    pub fn requested_descriptor(&self, handle: ResourceHandle) -> Option<&ResourceDescriptor> {
        self.entries.get(&handle).map(|e| &e.requested)
    }

    /// The effective texture descriptor behind a handle.
    pub fn texture(&self, handle: ResourceHandle) -> Option<&TextureDesc> {
        self.descriptor(handle).and_then(ResourceDescriptor::as_texture)
    }

    /// User data attached to a handle.
    pub fn user_data(&self, handle: ResourceHandle) -> Option<&UserData> {
        self.entries.get(&handle).and_then(|e| e.user_data.as_ref())
    }

    /// Returns true if the handle is known.
    pub fn contains(&self, handle: ResourceHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// All handles in insertion order.
    pub fn handles(&self) -> &[ResourceHandle] {
        &self.order
    }

    /// Number of distinct resources.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no resources were requested.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of hash collisions resolved by rehashing.
    pub fn collision_count(&self) -> usize {
        self.collisions
    }

    /// Remove descriptors that no pass references any more.
    ///
    /// A resource is kept if some pass declares it, or if a kept framebuffer
    /// or pipeline is built from it. Returns the removed handles.
    pub fn prune_unreferenced(&mut self) -> Vec<ResourceHandle> {
        let mut live: HashSet<ResourceHandle> = self
            .passes
            .values()
            .flat_map(|info| info.uses().iter().map(|u| u.handle))
            .collect();

        let mut stack: Vec<ResourceHandle> = live.iter().copied().collect();
        while let Some(handle) = stack.pop() {
            if let Some(entry) = self.entries.get(&handle) {
                for dep in entry.effective.dependencies() {
                    if live.insert(dep) {
                        stack.push(dep);
                    }
                }
            }
        }

        let removed: Vec<ResourceHandle> = self
            .order
            .iter()
            .copied()
            .filter(|h| !live.contains(h))
            .collect();
        for handle in &removed {
            self.entries.remove(handle);
        }
        self.order.retain(|h| live.contains(h));

        if !removed.is_empty() {
            log::debug!("Pruned {} unreferenced resources", removed.len());
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::descriptor::SizeSpec;
    use crate::types::{BufferUsage, TextureFormat};

    fn shadow_map() -> TextureDesc {
        TextureDesc::depth_target(
            "shadow_map",
            TextureFormat::Depth32Float,
            SizeSpec::Absolute {
                width: 1024,
                height: 1024,
            },
        )
    }

    #[test]
    fn test_create_dedups_identical_descriptors() {
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(0)));
        let a = builder.create_texture(shadow_map(), ResourceAccess::Write);
        builder.set_current_pass(Some(PassId(1)));
        let b = builder.create_texture(shadow_map(), ResourceAccess::Read);

        assert_eq!(a, b);
        assert_eq!(builder.len(), 1);
        assert!(builder.pass_info(PassId(0)).is_some_and(|i| i.writes_handle(a)));
        assert!(builder.pass_info(PassId(1)).is_some_and(|i| i.reads_handle(a)));
    }

    #[test]
    fn test_different_descriptors_get_different_handles() {
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(0)));
        let a = builder.create_texture(shadow_map(), ResourceAccess::Write);
        let b = builder.create_buffer(
            BufferDesc::new("lights", 256, BufferUsage::STORAGE),
            ResourceAccess::Write,
        );
        assert_ne!(a, b);
        assert_eq!(builder.handles(), &[a, b]);
    }

    #[test]
    fn test_repeated_use_recorded_once() {
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(0)));
        let a = builder.create_texture(shadow_map(), ResourceAccess::Write);
        builder.write(a);
        builder.read(a);

        let info = builder.pass_info(PassId(0)).cloned().unwrap_or_default();
        assert_eq!(info.uses().len(), 2);
        assert_eq!(info.writes().count(), 1);
        assert_eq!(info.reads().count(), 1);
    }

    #[test]
    fn test_force_cache_keeps_handle_and_dedup() {
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(0)));
        let handle = builder.create_texture(shadow_map(), ResourceAccess::Write);

        let mut resized = shadow_map();
        resized.format = TextureFormat::Depth16Unorm;
        let previous = builder.force_cache(handle, resized.clone().into());
        assert_eq!(previous, Some(shadow_map().into()));
        assert_eq!(builder.texture(handle), Some(&resized));

        // The original request still maps to the same slot.
        let again = builder.create_texture(shadow_map(), ResourceAccess::Read);
        assert_eq!(again, handle);
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.collision_count(), 0);
    }

    #[test]
    fn test_reset_pass_clears_uses() {
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(3)));
        builder.create_texture(shadow_map(), ResourceAccess::Write);
        builder.reset_pass(PassId(3));
        assert!(builder.pass_info(PassId(3)).is_some_and(PassInfo::is_empty));
    }

    #[test]
    fn test_prune_keeps_dependencies() {
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(0)));
        let color = builder.create_texture(
            TextureDesc::color_target("color", TextureFormat::Rgba8Unorm, SizeSpec::SwapchainRelative),
            ResourceAccess::Write,
        );
        let stale = builder.create_texture(shadow_map(), ResourceAccess::Write);

        // The render pass is only reachable through the framebuffer.
        builder.set_current_pass(None);
        let render_pass = builder.create_render_pass(RenderPassDesc::new("main"), ResourceAccess::Write);
        builder.set_current_pass(Some(PassId(0)));
        builder.create_framebuffer(
            FramebufferDesc::new("main", render_pass, vec![color], SizeSpec::SwapchainRelative),
            ResourceAccess::Write,
        );

        builder.reset_pass(PassId(0));
        builder.set_current_pass(Some(PassId(0)));
        builder.write(color);
        builder.create_framebuffer(
            FramebufferDesc::new("main", render_pass, vec![color], SizeSpec::SwapchainRelative),
            ResourceAccess::Write,
        );

        let removed = builder.prune_unreferenced();
        assert_eq!(removed, vec![stale]);
        assert!(builder.contains(render_pass));
        assert!(builder.contains(color));
    }

    #[test]
    fn test_user_data_first_wins() {
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(0)));
        let handle = builder.create(shadow_map().into(), ResourceAccess::Write, Some(Arc::new(7u32)));
        builder.create(shadow_map().into(), ResourceAccess::Read, Some(Arc::new(9u32)));

        let data = builder
            .user_data(handle)
            .and_then(|d| d.downcast_ref::<u32>())
            .copied();
        assert_eq!(data, Some(7));
    }

    #[test]
    fn test_set_user_data_replaces() {
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(0)));
        let handle = builder.create(shadow_map().into(), ResourceAccess::Write, Some(Arc::new(7u32)));

        assert!(builder.set_user_data(handle, Arc::new(11u32)));
        let data = builder
            .user_data(handle)
            .and_then(|d| d.downcast_ref::<u32>())
            .copied();
        assert_eq!(data, Some(11));

        let unknown = ResourceHandle::of(&ResourceDescriptor::from(TextureDesc::color_target(
            "unused",
            TextureFormat::Rgba8Unorm,
            SizeSpec::SwapchainRelative,
        )));
        assert!(!builder.set_user_data(unknown, Arc::new(0u32)));
        assert!(builder.user_data(unknown).is_none());
    }

    #[test]
    fn test_writers_of() {
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(0)));
        let handle = builder.create_texture(shadow_map(), ResourceAccess::Write);
        builder.set_current_pass(Some(PassId(1)));
        builder.read(handle);
        builder.set_current_pass(Some(PassId(2)));
        builder.write(handle);

        assert_eq!(builder.writers_of(handle), vec![PassId(0), PassId(2)]);
    }
}
