//! Resource compilation.
//!
//! The [`ResourceCompiler`] turns the descriptors collected by the
//! [`ResourceGraphBuilder`] into GPU objects in the [`ResourceStore`].
//!
//! # Order
//!
//! Handles are compiled by kind (textures, buffers, render passes,
//! framebuffers, pipelines) and within a kind in the order passes first asked
//! for them, so a framebuffer always finds its attachments and render pass
//! already compiled.
//!
//! # Failures
//!
//! A resource that cannot be built (missing attachment, missing render pass,
//! unknown shader, backend error) is logged and skipped. Everything else is
//! still compiled, and the pass that relies on the missing resource finds
//! nothing in the store when it compiles.
//!
//! # Layouts
//!
//! Compilation only creates objects. Newly created images start in
//! `Undefined`; the returned [`ImageBarrier`]s move them into their resting
//! layout and must be recorded and submitted before first use.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::{GpuImage, GpuShaderModule, Swapchain};
use crate::context::GraphContext;
use crate::error::GraphicsError;
use crate::graph::barrier::ImageBarrier;
use crate::graph::builder::ResourceGraphBuilder;
use crate::graph::descriptor::{
    BufferDesc, FramebufferDesc, GraphicsPipelineDesc, PipelineTarget, RenderPassDesc,
    ResourceDescriptor, ShaderStageDesc, TextureDesc, TextureSource,
};
use crate::graph::handle::ResourceHandle;
use crate::graph::store::{
    CompiledBuffer, CompiledFramebuffer, CompiledPipeline, CompiledRenderPass, CompiledResource,
    CompiledTexture, ResourceStore,
};

/// Builds GPU objects from descriptors.
#[derive(Debug, Clone)]
pub struct ResourceCompiler {
    context: Arc<GraphContext>,
}

impl ResourceCompiler {
    /// Create a compiler that allocates through `context`'s backend.
    pub fn new(context: Arc<GraphContext>) -> Self {
        Self { context }
    }

    /// The graph context.
    pub fn context(&self) -> &Arc<GraphContext> {
        &self.context
    }

    /// Compile every handle the store does not hold yet.
    ///
    /// Returns the bring-up barriers of the new images.
    pub fn compile(
        &self,
        builder: &ResourceGraphBuilder,
        store: &mut ResourceStore,
        swapchain: &dyn Swapchain,
    ) -> Vec<ImageBarrier> {
        let missing: Vec<ResourceHandle> = builder
            .handles()
            .iter()
            .copied()
            .filter(|handle| !store.contains(*handle))
            .collect();
        self.compile_handles(&missing, builder, store, swapchain)
    }

    /// Recompile `handles`, replacing their store entries.
    ///
    /// Framebuffers and pipelines built on a recompiled handle are rebuilt
    /// too, since they reference the objects being replaced. Handles the
    /// builder does not know are ignored.
    pub fn compile_subset(
        &self,
        handles: &[ResourceHandle],
        builder: &ResourceGraphBuilder,
        store: &mut ResourceStore,
        swapchain: &dyn Swapchain,
    ) -> Vec<ImageBarrier> {
        let affected = dependents(handles, builder);
        for handle in &affected {
            store.remove_run(*handle);
        }
        log::debug!(
            "Recompiling {} resources ({} requested)",
            affected.len(),
            handles.len()
        );
        self.compile_handles(&affected, builder, store, swapchain)
    }

    /// Release every store entry that wraps a swapchain image.
    ///
    /// Must run before the swapchain is recreated: the old images go away
    /// with it. Framebuffers over those images are released as well. Returns
    /// the released handles.
    pub fn release_swapchain_images(
        &self,
        builder: &ResourceGraphBuilder,
        store: &mut ResourceStore,
    ) -> Vec<ResourceHandle> {
        let wrapped: Vec<ResourceHandle> = builder
            .handles()
            .iter()
            .copied()
            .filter(|handle| {
                builder
                    .texture(*handle)
                    .is_some_and(|t| t.source == TextureSource::Swapchain)
            })
            .collect();

        let released = dependents(&wrapped, builder);
        let removed: usize = released.iter().map(|h| store.remove_run(*h)).sum();
        log::debug!(
            "Released {} swapchain-backed store entries ({} handles)",
            removed,
            released.len()
        );
        released
    }

    /// Rebuild everything whose size or format follows the swapchain.
    ///
    /// Swapchain texture descriptors are force-cached to the swapchain's
    /// current format so their handles stay valid. Calling this twice with
    /// the same swapchain leaves descriptors and handles unchanged.
    pub fn on_swapchain_resize(
        &self,
        builder: &mut ResourceGraphBuilder,
        store: &mut ResourceStore,
        swapchain: &dyn Swapchain,
    ) -> Vec<ImageBarrier> {
        let format = swapchain.format();
        let handles: Vec<ResourceHandle> = builder.handles().to_vec();
        let mut affected = Vec::new();

        for handle in handles {
            let Some(descriptor) = builder.descriptor(handle) else {
                continue;
            };
            if !follows_swapchain(descriptor) {
                continue;
            }
            if let ResourceDescriptor::Texture(texture) = descriptor
                && texture.source == TextureSource::Swapchain
                && texture.format != format
            {
                let mut updated = texture.clone();
                log::info!(
                    "Swapchain texture '{}' format {:?} -> {:?}",
                    updated.name,
                    updated.format,
                    format
                );
                updated.format = format;
                builder.force_cache(handle, updated.into());
            }
            affected.push(handle);
        }

        let extent = swapchain.extent();
        log::info!(
            "Swapchain resized to {}x{}, {} resources follow it",
            extent.width,
            extent.height,
            affected.len()
        );
        self.compile_subset(&affected, builder, store, swapchain)
    }

    fn compile_handles(
        &self,
        handles: &[ResourceHandle],
        builder: &ResourceGraphBuilder,
        store: &mut ResourceStore,
        swapchain: &dyn Swapchain,
    ) -> Vec<ImageBarrier> {
        let position: HashMap<ResourceHandle, usize> = builder
            .handles()
            .iter()
            .enumerate()
            .map(|(i, h)| (*h, i))
            .collect();

        let mut ordered: Vec<(&ResourceDescriptor, ResourceHandle)> = handles
            .iter()
            .filter_map(|h| builder.descriptor(*h).map(|d| (d, *h)))
            .collect();
        ordered.sort_by_key(|(d, h)| (d.kind(), position.get(h).copied().unwrap_or(usize::MAX)));

        let total = ordered.len();
        let mut barriers = Vec::new();
        let mut skipped = 0usize;
        for (descriptor, handle) in ordered {
            let result = match descriptor {
                ResourceDescriptor::Texture(desc) => {
                    self.compile_texture(handle, desc, store, swapchain, &mut barriers)
                }
                ResourceDescriptor::Buffer(desc) => self.compile_buffer(handle, desc, store),
                ResourceDescriptor::RenderPass(desc) => self.compile_render_pass(handle, desc, store),
                ResourceDescriptor::Framebuffer(desc) => {
                    self.compile_framebuffer(handle, desc, store, swapchain)
                }
                ResourceDescriptor::GraphicsPipeline(desc) => {
                    self.compile_pipeline(handle, desc, store)
                }
            };
            if let Err(e) = result {
                log::error!(
                    "Skipping {:?} '{}' ({}): {}",
                    descriptor.kind(),
                    descriptor.name(),
                    handle,
                    e
                );
                skipped += 1;
            }
        }

        log::debug!(
            "Compiled {} resources, {} skipped, {} bring-up barriers",
            total - skipped,
            skipped,
            barriers.len()
        );
        barriers
    }

    fn compile_texture(
        &self,
        handle: ResourceHandle,
        desc: &TextureDesc,
        store: &mut ResourceStore,
        swapchain: &dyn Swapchain,
        barriers: &mut Vec<ImageBarrier>,
    ) -> Result<(), GraphicsError> {
        match desc.source {
            TextureSource::Swapchain => {
                // One entry per swapchain image, at consecutive handles.
                let extent = swapchain.extent();
                for index in 0..swapchain.image_count() {
                    let key = handle.offset(index);
                    let image = swapchain.wrap_image(index)?;
                    store.insert(
                        key,
                        CompiledResource::Texture(Arc::new(CompiledTexture {
                            handle: key,
                            desc: desc.clone(),
                            extent,
                            image,
                            swapchain_index: Some(index),
                        })),
                    );
                    barriers.extend(ImageBarrier::bring_up(key, desc));
                }
            }
            TextureSource::Allocated => {
                let extent = desc.size.resolve(swapchain.extent());
                let image = self.context.backend().create_texture(desc, extent)?;
                store.insert(
                    handle,
                    CompiledResource::Texture(Arc::new(CompiledTexture {
                        handle,
                        desc: desc.clone(),
                        extent,
                        image,
                        swapchain_index: None,
                    })),
                );
                barriers.extend(ImageBarrier::bring_up(handle, desc));
            }
        }
        Ok(())
    }

    fn compile_buffer(
        &self,
        handle: ResourceHandle,
        desc: &BufferDesc,
        store: &mut ResourceStore,
    ) -> Result<(), GraphicsError> {
        let buffer = self.context.backend().create_buffer(desc)?;
        store.insert(
            handle,
            CompiledResource::Buffer(Arc::new(CompiledBuffer {
                handle,
                desc: desc.clone(),
                buffer,
            })),
        );
        Ok(())
    }

    fn compile_render_pass(
        &self,
        handle: ResourceHandle,
        desc: &RenderPassDesc,
        store: &mut ResourceStore,
    ) -> Result<(), GraphicsError> {
        let render_pass = self.context.backend().create_render_pass(desc)?;
        store.insert(
            handle,
            CompiledResource::RenderPass(Arc::new(CompiledRenderPass {
                handle,
                desc: desc.clone(),
                render_pass,
            })),
        );
        Ok(())
    }

    fn compile_framebuffer(
        &self,
        handle: ResourceHandle,
        desc: &FramebufferDesc,
        store: &mut ResourceStore,
        swapchain: &dyn Swapchain,
    ) -> Result<(), GraphicsError> {
        let render_pass = store
            .render_pass(desc.render_pass)
            .cloned()
            .ok_or_else(|| missing("render pass", desc.render_pass))?;

        let mut per_image = false;
        for attachment in &desc.attachments {
            let texture = store
                .texture(*attachment)
                .ok_or_else(|| missing("attachment", *attachment))?;
            per_image |= texture.swapchain_index.is_some();
        }

        // Over swapchain images, one framebuffer per image.
        let extent = desc.size.resolve(swapchain.extent());
        let (count, indices): (u32, Vec<Option<u32>>) = if per_image {
            let count = swapchain.image_count();
            (count, (0..count).map(Some).collect())
        } else {
            (1, vec![None])
        };

        let mut compiled = Vec::with_capacity(count as usize);
        for index in indices {
            let attachments: Vec<ResourceHandle> = desc
                .attachments
                .iter()
                .map(|h| match index {
                    Some(i) => store.resolve_texture_handle(*h, i),
                    None => *h,
                })
                .collect();
            let images = attachments
                .iter()
                .map(|h| {
                    store
                        .texture(*h)
                        .map(|t| &t.image)
                        .ok_or_else(|| missing("swapchain attachment", *h))
                })
                .collect::<Result<Vec<&GpuImage>, GraphicsError>>()?;

            let framebuffer = self.context.backend().create_framebuffer(
                &render_pass.render_pass,
                &images,
                extent,
                desc.layers,
            )?;
            let key = index.map_or(handle, |i| handle.offset(i));
            compiled.push(CompiledFramebuffer {
                handle: key,
                desc: desc.clone(),
                extent,
                attachments,
                framebuffer,
                swapchain_index: index,
            });
        }

        for framebuffer in compiled {
            store.insert(
                framebuffer.handle,
                CompiledResource::Framebuffer(Arc::new(framebuffer)),
            );
        }
        Ok(())
    }

    fn compile_pipeline(
        &self,
        handle: ResourceHandle,
        desc: &GraphicsPipelineDesc,
        store: &mut ResourceStore,
    ) -> Result<(), GraphicsError> {
        let target = match &desc.target {
            PipelineTarget::Explicit(render_pass) => render_pass.clone(),
            PipelineTarget::RenderPass(render_pass) => store
                .render_pass(*render_pass)
                .map(|r| r.desc.clone())
                .ok_or_else(|| missing("render pass", *render_pass))?,
        };

        let modules = desc
            .stages
            .iter()
            .map(|stage| {
                self.context.shader(&stage.shader).ok_or_else(|| {
                    GraphicsError::ResourceCreationFailed(format!(
                        "shader '{}' is not registered",
                        stage.shader
                    ))
                })
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;
        let stages: Vec<(&ShaderStageDesc, &GpuShaderModule)> = desc
            .stages
            .iter()
            .zip(&modules)
            .map(|(stage, module)| (stage, &module.module))
            .collect();

        let pipeline = self
            .context
            .backend()
            .create_graphics_pipeline(desc, &stages, &target)?;
        store.insert(
            handle,
            CompiledResource::Pipeline(Arc::new(CompiledPipeline {
                handle,
                desc: desc.clone(),
                target,
                pipeline,
            })),
        );
        Ok(())
    }
}

fn missing(what: &str, handle: ResourceHandle) -> GraphicsError {
    GraphicsError::ResourceCreationFailed(format!("missing {} {}", what, handle))
}

/// Returns true if a resize can change the descriptor's resolved size.
fn follows_swapchain(descriptor: &ResourceDescriptor) -> bool {
    match descriptor {
        ResourceDescriptor::Texture(t) => {
            t.source == TextureSource::Swapchain || t.size.depends_on_swapchain()
        }
        ResourceDescriptor::Framebuffer(f) => f.size.depends_on_swapchain(),
        _ => false,
    }
}

/// `handles` plus every resource built on one of them, transitively.
pub(crate) fn dependents(
    handles: &[ResourceHandle],
    builder: &ResourceGraphBuilder,
) -> Vec<ResourceHandle> {
    let mut set: HashSet<ResourceHandle> = handles
        .iter()
        .copied()
        .filter(|h| builder.contains(*h))
        .collect();

    loop {
        let before = set.len();
        for handle in builder.handles() {
            if set.contains(handle) {
                continue;
            }
            let built_on_set = builder
                .descriptor(*handle)
                .is_some_and(|d| d.dependencies().iter().any(|dep| set.contains(dep)));
            if built_on_set {
                set.insert(*handle);
            }
        }
        if set.len() == before {
            break;
        }
    }

    builder
        .handles()
        .iter()
        .copied()
        .filter(|h| set.contains(h))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DescriptorPoolSizes, DummyBackend, DummySwapchain};
    use crate::graph::PassId;
    use crate::graph::builder::ResourceAccess;
    use crate::graph::descriptor::{AttachmentDesc, ResourceKind, SizeSpec};
    use crate::types::{Extent2d, ImageLayout, LoadOp, ShaderStage, StoreOp, TextureFormat};

    struct Fixture {
        backend: Arc<DummyBackend>,
        compiler: ResourceCompiler,
        builder: ResourceGraphBuilder,
        store: ResourceStore,
        swapchain: DummySwapchain,
    }

    fn fixture(image_count: u32) -> Fixture {
        let backend = Arc::new(DummyBackend::new());
        let context = GraphContext::new(backend.clone(), DescriptorPoolSizes::default()).unwrap();
        let mut builder = ResourceGraphBuilder::new();
        builder.set_current_pass(Some(PassId(0)));
        Fixture {
            backend,
            compiler: ResourceCompiler::new(Arc::new(context)),
            builder,
            store: ResourceStore::new(),
            swapchain: DummySwapchain::new(Extent2d::new(800, 600), image_count),
        }
    }

    impl Fixture {
        fn compile(&mut self) -> Vec<ImageBarrier> {
            self.compiler
                .compile(&self.builder, &mut self.store, &self.swapchain)
        }

        fn resize(&mut self) -> Vec<ImageBarrier> {
            self.compiler
                .on_swapchain_resize(&mut self.builder, &mut self.store, &self.swapchain)
        }
    }

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

    fn hdr() -> TextureDesc {
        TextureDesc::color_target("hdr", TextureFormat::Rgba16Float, SizeSpec::SwapchainRelative)
    }

    fn backbuffer() -> TextureDesc {
        TextureDesc::swapchain_target("backbuffer", TextureFormat::Bgra8UnormSrgb)
    }

    fn main_pass(color: &TextureDesc) -> RenderPassDesc {
        RenderPassDesc::new("main").with_color(AttachmentDesc::for_texture(
            color,
            LoadOp::Clear,
            StoreOp::Store,
        ))
    }

    #[test]
    fn test_swapchain_texture_wraps_every_image() {
        let mut f = fixture(3);
        let handle = f.builder.create_texture(backbuffer(), ResourceAccess::Write);
        let barriers = f.compile();

        assert_eq!(f.store.count(ResourceKind::Texture), 3);
        for i in 0..3 {
            let texture = f.store.texture(handle.offset(i)).unwrap();
            assert_eq!(texture.swapchain_index, Some(i));
            assert_eq!(texture.extent, Extent2d::new(800, 600));
        }
        // Swapchain images rest in Undefined; nothing to bring up.
        assert!(barriers.is_empty());
        assert_eq!(f.backend.creation_counts().textures, 0);
    }

    #[test]
    fn test_allocated_texture_brought_up() {
        let mut f = fixture(2);
        let handle = f.builder.create_texture(shadow_map(), ResourceAccess::Write);
        let barriers = f.compile();

        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].handle, handle);
        assert_eq!(barriers[0].old_layout, ImageLayout::Undefined);
        assert_eq!(barriers[0].new_layout, ImageLayout::DepthStencilReadOnly);
        assert_eq!(
            f.store.texture(handle).map(|t| t.extent),
            Some(Extent2d::new(1024, 1024))
        );
    }

    #[test]
    fn test_compile_only_creates_missing() {
        let mut f = fixture(2);
        f.builder.create_texture(shadow_map(), ResourceAccess::Write);
        f.compile();
        f.builder.create_texture(hdr(), ResourceAccess::Write);
        f.compile();

        assert_eq!(f.backend.creation_counts().textures, 2);
        assert_eq!(f.store.len(), 2);
    }

    #[test]
    fn test_framebuffer_per_swapchain_image() {
        let mut f = fixture(3);
        let color = f.builder.create_texture(backbuffer(), ResourceAccess::Write);
        let pass = f
            .builder
            .create_render_pass(main_pass(&backbuffer()), ResourceAccess::Read);
        let fb = f.builder.create_framebuffer(
            FramebufferDesc::new("main", pass, vec![color], SizeSpec::SwapchainRelative),
            ResourceAccess::Write,
        );
        f.compile();

        assert_eq!(f.store.count(ResourceKind::Framebuffer), 3);
        let second = f.store.resolve_framebuffer(fb, 1).unwrap();
        assert_eq!(second.attachments, vec![color.offset(1)]);
        assert_eq!(second.swapchain_index, Some(1));
    }

    #[test]
    fn test_missing_attachment_is_skipped() {
        let mut f = fixture(2);
        let pass = f.builder.create_render_pass(main_pass(&hdr()), ResourceAccess::Read);
        let fb = f.builder.create_framebuffer(
            FramebufferDesc::new(
                "orphan",
                pass,
                vec![ResourceHandle(0xdead)],
                SizeSpec::SwapchainRelative,
            ),
            ResourceAccess::Write,
        );
        let depth = f.builder.create_texture(shadow_map(), ResourceAccess::Write);
        f.compile();

        assert!(!f.store.contains(fb));
        assert!(f.store.contains(pass));
        assert!(f.store.contains(depth));
    }

    #[test]
    fn test_pipeline_resolution() {
        let mut f = fixture(2);
        f.compiler
            .context()
            .register_shader("lit.vert", &[0x0723_0203])
            .unwrap();
        let pass = f.builder.create_render_pass(main_pass(&hdr()), ResourceAccess::Read);
        let ok = f.builder.create_pipeline(
            GraphicsPipelineDesc::new("lit", PipelineTarget::RenderPass(pass))
                .with_stage(ShaderStageDesc::new(ShaderStage::Vertex, "lit.vert")),
            ResourceAccess::Read,
        );
        let unknown_shader = f.builder.create_pipeline(
            GraphicsPipelineDesc::new("broken", PipelineTarget::Explicit(main_pass(&hdr())))
                .with_stage(ShaderStageDesc::new(ShaderStage::Vertex, "missing.vert")),
            ResourceAccess::Read,
        );
        f.compile();

        assert_eq!(
            f.store.pipeline(ok).map(|p| p.target.color_formats()),
            Some(vec![TextureFormat::Rgba16Float])
        );
        assert!(!f.store.contains(unknown_shader));
    }

    #[test]
    fn test_compile_subset_rebuilds_dependents() {
        let mut f = fixture(2);
        let color = f.builder.create_texture(hdr(), ResourceAccess::Write);
        let pass = f.builder.create_render_pass(main_pass(&hdr()), ResourceAccess::Read);
        let fb = f.builder.create_framebuffer(
            FramebufferDesc::new("hdr", pass, vec![color], SizeSpec::SwapchainRelative),
            ResourceAccess::Write,
        );
        f.compile();
        let old_fb = f.store.framebuffer(fb).cloned().unwrap();

        let barriers = f
            .compiler
            .compile_subset(&[color], &f.builder, &mut f.store, &f.swapchain);

        assert_eq!(barriers.len(), 1);
        let new_fb = f.store.framebuffer(fb).unwrap();
        assert!(!Arc::ptr_eq(&old_fb, new_fb));
        assert_eq!(f.backend.creation_counts().render_passes, 1);
        assert_eq!(f.backend.creation_counts().framebuffers, 2);
    }

    #[test]
    fn test_resize_follows_swapchain() {
        let mut f = fixture(2);
        let fixed = f.builder.create_texture(shadow_map(), ResourceAccess::Write);
        let relative = f.builder.create_texture(hdr(), ResourceAccess::Write);
        let back = f.builder.create_texture(backbuffer(), ResourceAccess::Write);
        f.compile();

        f.compiler.release_swapchain_images(&f.builder, &mut f.store);
        assert!(!f.store.contains(back));
        f.swapchain.resize(Extent2d::new(400, 300));
        f.swapchain.recreate().unwrap();
        f.resize();

        assert_eq!(
            f.store.texture(fixed).map(|t| t.extent),
            Some(Extent2d::new(1024, 1024))
        );
        assert_eq!(
            f.store.texture(relative).map(|t| t.extent),
            Some(Extent2d::new(400, 300))
        );
        assert_eq!(
            f.store.texture(back.offset(1)).map(|t| t.extent),
            Some(Extent2d::new(400, 300))
        );
        assert_eq!(f.backend.creation_counts().textures, 3);
    }

    #[test]
    fn test_resize_idempotent() {
        let mut f = fixture(2);
        f.builder.create_texture(hdr(), ResourceAccess::Write);
        f.builder.create_texture(backbuffer(), ResourceAccess::Write);
        f.swapchain = f.swapchain.clone().with_format(TextureFormat::Rgba8UnormSrgb);
        f.compile();

        f.resize();
        let handles = f.builder.handles().to_vec();
        let descriptors: Vec<_> = handles
            .iter()
            .map(|h| f.builder.descriptor(*h).cloned())
            .collect();
        let mut keys: Vec<_> = f.store.handles().collect();
        keys.sort();

        f.resize();
        let mut keys_again: Vec<_> = f.store.handles().collect();
        keys_again.sort();
        assert_eq!(f.builder.handles(), handles.as_slice());
        assert_eq!(
            handles
                .iter()
                .map(|h| f.builder.descriptor(*h).cloned())
                .collect::<Vec<_>>(),
            descriptors
        );
        assert_eq!(keys, keys_again);
    }

    #[test]
    fn test_resize_force_caches_swapchain_format() {
        let mut f = fixture(2);
        let back = f.builder.create_texture(backbuffer(), ResourceAccess::Write);
        f.swapchain = f.swapchain.clone().with_format(TextureFormat::Rgba8UnormSrgb);
        f.compile();
        f.resize();

        assert_eq!(
            f.builder.texture(back).map(|t| t.format),
            Some(TextureFormat::Rgba8UnormSrgb)
        );
        // The original request still maps to the same slot.
        let again = f.builder.create_texture(backbuffer(), ResourceAccess::Read);
        assert_eq!(again, back);
    }
}
