//! Render graph infrastructure.
//!
//! The render graph turns the resources passes declare into GPU objects and
//! an execution order:
//!
//! - every pass runs `setup()` against the [`ResourceGraphBuilder`], which
//!   deduplicates identical descriptors into shared [`ResourceHandle`]s,
//! - the [`ResourceCompiler`](crate::compiler::ResourceCompiler) creates the
//!   GPU objects in the [`ResourceStore`],
//! - the [`PassGraph`] orders passes by their producer/consumer relationships,
//! - passes run `compile()` to pick up the objects they need.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Executor | [`FrameExecutor`](crate::executor::FrameExecutor) | Multiple frames in flight |
//! | **Graph** | [`RenderGraph`] | Resources and pass order (this module) |
//! | Pass | [`RenderGraphPass`] | Declares resources, records commands |
//!
//! # Example
//!
//! ```ignore
//! let mut graph = RenderGraph::new(context);
//! let shadow = graph.add_pass(ShadowPass::new());
//! let lighting = graph.add_pass(LightingPass::new());
//!
//! let barriers = graph.build(&swapchain);
//! assert_eq!(graph.execution_order(), &[shadow, lighting]);
//! ```

pub mod barrier;
pub mod builder;
pub mod descriptor;
pub mod handle;
pub mod pass;
pub mod store;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

pub use barrier::ImageBarrier;
pub use builder::{PassInfo, ResourceAccess, ResourceGraphBuilder, ResourceUse, UserData};
pub use descriptor::{
    AttachmentDesc, BufferDesc, FramebufferDesc, GraphicsPipelineDesc, PipelineTarget,
    RenderPassDesc, ResourceDescriptor, ResourceKind, ShaderStageDesc, SizeSpec, TextureDesc,
    TextureSource,
};
pub use handle::ResourceHandle;
pub use pass::{
    AttachmentTarget, FrameContext, PassId, PassState, RenderGraphPass, RenderPassExecution,
};
pub use store::{
    CompiledBuffer, CompiledFramebuffer, CompiledPipeline, CompiledRenderPass, CompiledResource,
    CompiledTexture, ResourceStore,
};

use crate::backend::Swapchain;
use crate::compiler::{self, ResourceCompiler};
use crate::context::GraphContext;
use crate::error::{GraphError, GraphicsError};
use crate::profiling::profile_scope;
use crate::scheduler::PassGraph;

pub(crate) struct PassEntry {
    pub(crate) id: PassId,
    pub(crate) pass: Box<dyn RenderGraphPass>,
}

/// Passes, their resources and their execution order.
pub struct RenderGraph {
    context: Arc<GraphContext>,
    compiler: ResourceCompiler,
    builder: ResourceGraphBuilder,
    store: ResourceStore,
    /// Indexed by `PassId`.
    passes: Vec<PassEntry>,
    pass_graph: PassGraph,
    order: Vec<PassId>,
    built: bool,
}

impl fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderGraph")
            .field(
                "passes",
                &self.passes.iter().map(|e| e.pass.name()).collect::<Vec<_>>(),
            )
            .field("order", &self.order)
            .field("resources", &self.builder.len())
            .field("compiled", &self.store.len())
            .field("built", &self.built)
            .finish()
    }
}

impl RenderGraph {
    /// Create an empty graph.
    pub fn new(context: Arc<GraphContext>) -> Self {
        Self {
            compiler: ResourceCompiler::new(Arc::clone(&context)),
            context,
            builder: ResourceGraphBuilder::new(),
            store: ResourceStore::new(),
            passes: Vec::new(),
            pass_graph: PassGraph::default(),
            order: Vec::new(),
            built: false,
        }
    }

    /// Add a pass. Ids follow authoring order.
    ///
    /// A pass added after [`build`](Self::build) is set up and compiled with
    /// the next dirty-pass recompilation.
    pub fn add_pass(&mut self, pass: impl RenderGraphPass + 'static) -> PassId {
        self.add_boxed_pass(Box::new(pass))
    }

    /// Add a boxed pass.
    pub fn add_boxed_pass(&mut self, mut pass: Box<dyn RenderGraphPass>) -> PassId {
        let id = PassId(self.passes.len() as u32);
        if self.built {
            pass.request_recompilation();
        }
        log::debug!("Added pass '{}' as {}", pass.name(), id);
        self.passes.push(PassEntry { id, pass });
        id
    }

    /// Look up a pass.
    pub fn pass(&self, id: PassId) -> Option<&dyn RenderGraphPass> {
        self.passes.get(id.index()).map(|e| e.pass.as_ref())
    }

    /// Look up a pass mutably, e.g. to request recompilation.
    pub fn pass_mut(&mut self, id: PassId) -> Option<&mut dyn RenderGraphPass> {
        self.passes.get_mut(id.index()).map(|e| e.pass.as_mut() as &mut dyn RenderGraphPass)
    }

    /// Number of passes.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Run setup, scheduling and compilation for every pass.
    ///
    /// Returns the bring-up barriers of the created images, to be submitted
    /// before the first frame. A cycle is logged and leaves the order empty.
    pub fn build(&mut self, swapchain: &dyn Swapchain) -> Vec<ImageBarrier> {
        profile_scope!("render_graph_build");

        let ids: Vec<PassId> = self.passes.iter().map(|e| e.id).collect();
        for id in &ids {
            self.setup_pass(*id);
        }
        if let Err(e) = self.sort() {
            log::error!("Render graph build could not order passes: {}", e);
        }

        let barriers = self.compiler.compile(&self.builder, &mut self.store, swapchain);
        self.compile_passes(&ids);
        self.built = true;

        log::info!(
            "Render graph built: {} passes, {} resources, {} store entries",
            self.passes.len(),
            self.builder.len(),
            self.store.len()
        );
        barriers
    }

    /// Returns true once [`build`](Self::build) has run.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Re-derive edges and the execution order.
    ///
    /// On a cycle the previous order stays in use and the error is returned.
    pub fn sort(&mut self) -> Result<&[PassId], GraphError> {
        let ids: Vec<PassId> = self.passes.iter().map(|e| e.id).collect();
        self.pass_graph = PassGraph::build(&ids, &self.builder);
        match self.pass_graph.sort() {
            Ok(order) => {
                log::debug!("Pass order: {:?}", order);
                self.order = order;
                Ok(&self.order)
            }
            Err(e) => {
                log::error!(
                    "Keeping previous pass order of {} passes: {}",
                    self.order.len(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Returns true if any pass requested recompilation.
    pub fn has_dirty_passes(&self) -> bool {
        self.passes.iter().any(|e| e.pass.is_dirty())
    }

    /// Recompile dirty passes and everything downstream of them.
    ///
    /// Returns `Ok(None)` if no pass is dirty. Otherwise waits for the device
    /// to go idle, then:
    ///
    /// 1. takes the dirty passes, plus the writers of every handle a dirty
    ///    pass reads, and closes that set over outgoing edges,
    /// 2. re-runs `setup()` on the closure and re-derives the order,
    /// 3. prunes resources no pass references any more,
    /// 4. compiles new handles and recompiles every handle the closure writes,
    ///    together with the framebuffers and pipelines built on them,
    /// 5. runs `compile()` on the closure, widened by every other pass that
    ///    uses a replaced resource, in execution order.
    ///
    /// The returned barriers must be submitted before the next frame.
    pub fn recompile_dirty(
        &mut self,
        swapchain: &dyn Swapchain,
    ) -> Result<Option<Vec<ImageBarrier>>, GraphicsError> {
        let dirty: Vec<PassId> = self
            .passes
            .iter()
            .filter(|e| e.pass.is_dirty())
            .map(|e| e.id)
            .collect();
        if dirty.is_empty() {
            return Ok(None);
        }
        profile_scope!("recompile_dirty");

        // Resources may be in use by frames in flight.
        self.context.backend().wait_idle()?;

        let mut seeds: BTreeSet<PassId> = dirty.iter().copied().collect();
        for id in &dirty {
            if let Some(info) = self.builder.pass_info(*id) {
                for handle in info.reads() {
                    seeds.extend(self.builder.writers_of(handle));
                }
            }
        }
        let mut closure = self.pass_graph.dependents_closure(seeds.iter().copied());
        // Passes added after the build are not in the graph yet.
        closure.extend(dirty.iter().copied());
        log::debug!(
            "Recompiling {} dirty passes, closure of {}",
            dirty.len(),
            closure.len()
        );

        for id in &closure {
            self.setup_pass(*id);
        }
        if let Err(e) = self.sort() {
            log::debug!("Keeping the previous order after setup: {}", e);
        }

        // New edges can pull in consumers of what the closure now writes.
        let extended = self.pass_graph.dependents_closure(closure.iter().copied());
        let added: Vec<PassId> = extended.difference(&closure).copied().collect();
        if !added.is_empty() {
            for id in &added {
                self.setup_pass(*id);
            }
            if let Err(e) = self.sort() {
                log::debug!("Keeping the previous order after extending the closure: {}", e);
            }
        }
        closure = extended;

        for handle in self.builder.prune_unreferenced() {
            self.store.remove_run(handle);
        }

        let fresh: HashSet<ResourceHandle> = self
            .builder
            .handles()
            .iter()
            .copied()
            .filter(|h| !self.store.contains(*h))
            .collect();
        let mut written: Vec<ResourceHandle> = Vec::new();
        for id in &closure {
            if let Some(info) = self.builder.pass_info(*id) {
                for handle in info.writes() {
                    if !fresh.contains(&handle) && !written.contains(&handle) {
                        written.push(handle);
                    }
                }
            }
        }

        // Every pass using a replaced resource must drop its old view,
        // including co-writers and users of rebuilt framebuffers or pipelines.
        let replaced: HashSet<ResourceHandle> =
            compiler::dependents(&written, &self.builder).into_iter().collect();
        let users: Vec<PassId> = self
            .builder
            .pass_infos()
            .filter(|(id, info)| {
                !closure.contains(id) && info.uses().iter().any(|u| replaced.contains(&u.handle))
            })
            .map(|(id, _)| id)
            .collect();
        if !users.is_empty() {
            log::debug!(
                "{} passes outside the closure use replaced resources",
                users.len()
            );
            closure.extend(users);
        }

        let mut barriers = self.compiler.compile(&self.builder, &mut self.store, swapchain);
        barriers.extend(self.compiler.compile_subset(
            &written,
            &self.builder,
            &mut self.store,
            swapchain,
        ));

        let ordered: Vec<PassId> = self
            .order
            .iter()
            .copied()
            .filter(|id| closure.contains(id))
            .collect();
        // Passes left out of the order by a cycle still get compiled.
        let unordered: Vec<PassId> = closure
            .iter()
            .copied()
            .filter(|id| !ordered.contains(id))
            .collect();
        self.compile_passes(&ordered);
        self.compile_passes(&unordered);

        Ok(Some(barriers))
    }

    /// Release the store entries that wrap swapchain images.
    ///
    /// Call before recreating the swapchain.
    pub fn release_swapchain_resources(&mut self) -> Vec<ResourceHandle> {
        self.compiler
            .release_swapchain_images(&self.builder, &mut self.store)
    }

    /// Rebuild swapchain-dependent resources and recompile every pass.
    ///
    /// Returns the bring-up barriers of the recreated images. A swapchain
    /// without area (a minimized window) compiles nothing; call again once
    /// it has a size.
    pub fn on_swapchain_resize(&mut self, swapchain: &dyn Swapchain) -> Vec<ImageBarrier> {
        profile_scope!("render_graph_resize");
        let extent = swapchain.extent();
        if extent.is_empty() {
            log::warn!(
                "Swapchain is {}x{}, swapchain-sized resources stay uncompiled",
                extent.width,
                extent.height
            );
            return Vec::new();
        }
        let barriers = self
            .compiler
            .on_swapchain_resize(&mut self.builder, &mut self.store, swapchain);
        let ids: Vec<PassId> = if self.order.len() == self.passes.len() {
            self.order.clone()
        } else {
            self.passes.iter().map(|e| e.id).collect()
        };
        self.compile_passes(&ids);
        barriers
    }

    /// Current execution order.
    pub fn execution_order(&self) -> &[PassId] {
        &self.order
    }

    /// The derived pass graph.
    pub fn pass_graph(&self) -> &PassGraph {
        &self.pass_graph
    }

    /// The descriptor builder.
    pub fn builder(&self) -> &ResourceGraphBuilder {
        &self.builder
    }

    /// The compiled resources.
    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<GraphContext> {
        &self.context
    }

    /// Order, store and passes borrowed apart for recording.
    pub(crate) fn recording_view(&mut self) -> (&[PassId], &ResourceStore, &mut [PassEntry]) {
        (&self.order, &self.store, &mut self.passes)
    }

    fn setup_pass(&mut self, id: PassId) {
        let Some(entry) = self.passes.get_mut(id.index()) else {
            log::error!("Cannot set up unknown pass {}", id);
            return;
        };
        self.builder.reset_pass(id);
        self.builder.set_current_pass(Some(id));
        entry.pass.setup(&mut self.builder);
        self.builder.set_current_pass(None);
        log::trace!(
            "Pass '{}' declared {} resource uses",
            entry.pass.name(),
            self.builder.pass_info(id).map_or(0, |i| i.uses().len())
        );
    }

    fn compile_passes(&mut self, ids: &[PassId]) {
        for id in ids {
            let Some(entry) = self.passes.get_mut(id.index()) else {
                log::error!("Cannot compile unknown pass {}", id);
                continue;
            };
            if let Err(e) = entry.pass.compile(&self.store, &self.context) {
                log::error!("Pass '{}' failed to compile: {}", entry.pass.name(), e);
            }
            entry.pass.clear_dirty();
        }
    }
}

static_assertions::assert_impl_all!(RenderGraph: Send);
