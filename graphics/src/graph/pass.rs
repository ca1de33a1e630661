//! Render pass interface.
//!
//! Concrete passes (shadow maps, lighting, post-processing, editor overlays)
//! live outside the graph and implement [`RenderGraphPass`]. The graph only
//! talks to them through four calls:
//!
//! - `setup()` declares the resources the pass reads and writes,
//! - `compile()` looks up the compiled objects it needs from the store,
//! - `render_pass_executions()` lists the rendering scopes for this frame,
//! - `record()` fills one secondary command buffer per scope.

use std::fmt;
use std::sync::Arc;

use super::builder::ResourceGraphBuilder;
use super::handle::ResourceHandle;
use super::store::{CompiledFramebuffer, CompiledPipeline, CompiledTexture, ResourceStore};
use crate::backend::CommandBuffer;
use crate::context::GraphContext;
use crate::error::GraphicsError;
use crate::frame_data::{FrameBuffers, PerFrameData};
use crate::types::{ClearValue, Extent2d, LoadOp, Rect2d, StoreOp};

/// Identifier of a pass in the graph, assigned in the order passes are added.
///
/// Ids order the scheduler's tie-break: among passes with no remaining
/// dependency, the lowest id runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    /// Position of the pass in authoring order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Graph bookkeeping every pass carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassState {
    dirty: bool,
    extent: Option<Extent2d>,
}

impl PassState {
    /// Create a clean state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the pass must be recompiled before its next use.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The viewport extent last set on the pass.
    pub fn extent(&self) -> Option<Extent2d> {
        self.extent
    }
}

/// One target of a rendering scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentTarget {
    /// Texture rendered into.
    pub handle: ResourceHandle,
    /// Load behavior at the start of the scope.
    pub load_op: LoadOp,
    /// Store behavior at the end of the scope.
    pub store_op: StoreOp,
    /// Clear value used with [`LoadOp::Clear`].
    pub clear: ClearValue,
}

impl AttachmentTarget {
    /// Clear the target to `clear` and store the result.
    pub fn clear(handle: ResourceHandle, clear: ClearValue) -> Self {
        Self {
            handle,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear,
        }
    }

    /// Keep the existing contents and store the result.
    pub fn load(handle: ResourceHandle) -> Self {
        Self {
            handle,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear: ClearValue::default(),
        }
    }

    /// Discard the contents after the scope.
    pub fn discard(mut self) -> Self {
        self.store_op = StoreOp::DontCare;
        self
    }
}

/// A rendering scope a pass wants this frame.
///
/// Each execution gets its own secondary command buffer. Attachment formats
/// come from the targets' texture descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassExecution {
    /// Area rendered.
    pub render_area: Rect2d,
    /// Number of layers rendered.
    pub layers: u32,
    /// Color targets, in attachment order.
    pub color_targets: Vec<AttachmentTarget>,
    /// Depth target.
    pub depth_target: Option<AttachmentTarget>,
}

impl RenderPassExecution {
    /// Create an execution without targets.
    pub fn new(render_area: Rect2d) -> Self {
        Self {
            render_area,
            layers: 1,
            color_targets: Vec::new(),
            depth_target: None,
        }
    }

    /// Add a color target.
    pub fn with_color(mut self, target: AttachmentTarget) -> Self {
        self.color_targets.push(target);
        self
    }

    /// Set the depth target.
    pub fn with_depth(mut self, target: AttachmentTarget) -> Self {
        self.depth_target = Some(target);
        self
    }

    /// Set the number of layers rendered.
    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers.max(1);
        self
    }

    /// Every target, colors first.
    pub fn targets(&self) -> impl Iterator<Item = &AttachmentTarget> + '_ {
        self.color_targets.iter().chain(self.depth_target.iter())
    }
}

/// What a pass sees of the frame being recorded.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    /// Monotonic frame counter.
    pub frame_index: u64,
    /// Frame-in-flight slot being recorded.
    pub slot: usize,
    /// Acquired swapchain image.
    pub image_index: u32,
    /// Current swapchain size.
    pub swapchain_extent: Extent2d,
    /// Compiled resources.
    pub store: &'a ResourceStore,
    /// Shared graph context.
    pub context: &'a GraphContext,
    /// The slot's per-frame buffers.
    pub frame_buffers: &'a FrameBuffers,
    /// Index of the execution being recorded, within the pass.
    pub execution_index: usize,
}

impl<'a> FrameContext<'a> {
    /// Texture for the acquired swapchain image.
    pub fn texture(&self, handle: ResourceHandle) -> Option<&'a Arc<CompiledTexture>> {
        self.store.resolve_texture(handle, self.image_index)
    }

    /// Framebuffer for the acquired swapchain image.
    pub fn framebuffer(&self, handle: ResourceHandle) -> Option<&'a Arc<CompiledFramebuffer>> {
        self.store.resolve_framebuffer(handle, self.image_index)
    }

    /// Compiled pipeline.
    pub fn pipeline(&self, handle: ResourceHandle) -> Option<&'a Arc<CompiledPipeline>> {
        self.store.pipeline(handle)
    }
}

/// A unit of rendering work in the graph.
///
/// Implementors own a [`PassState`] and expose it through
/// [`state`](Self::state) / [`state_mut`](Self::state_mut); the provided
/// methods build dirty tracking on top of it.
pub trait RenderGraphPass: Send {
    /// Debug name.
    fn name(&self) -> &str;

    /// Declare every resource the pass reads or writes.
    ///
    /// Called at build time and again whenever the pass is recompiled; the
    /// declarations replace the previous ones wholesale.
    fn setup(&mut self, builder: &mut ResourceGraphBuilder);

    /// Fetch the compiled objects the pass uses.
    ///
    /// Resources can be missing if their compilation failed; passes should
    /// check and report instead of assuming.
    fn compile(&mut self, store: &ResourceStore, context: &GraphContext)
    -> Result<(), GraphicsError>;

    /// Rendering scopes to record this frame.
    fn render_pass_executions(&self, frame: &FrameContext<'_>) -> Vec<RenderPassExecution>;

    /// Record the commands of execution `frame.execution_index`.
    fn record(&mut self, cmd: &mut CommandBuffer, data: &PerFrameData, frame: &FrameContext<'_>);

    /// Graph bookkeeping.
    fn state(&self) -> &PassState;

    /// Mutable graph bookkeeping.
    fn state_mut(&mut self) -> &mut PassState;

    /// Ask the graph to run `setup()` and `compile()` again before the next frame.
    fn request_recompilation(&mut self) {
        self.state_mut().dirty = true;
    }

    /// Returns true if a recompilation is pending.
    fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    /// Update the pass's viewport size, requesting recompilation if it changed.
    fn set_extent(&mut self, extent: Extent2d) {
        let state = self.state_mut();
        if state.extent != Some(extent) {
            state.extent = Some(extent);
            state.dirty = true;
        }
    }

    /// Mark the pass as compiled.
    fn clear_dirty(&mut self) {
        self.state_mut().dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyPass {
        state: PassState,
    }

    impl RenderGraphPass for EmptyPass {
        fn name(&self) -> &str {
            "empty"
        }

        fn setup(&mut self, _builder: &mut ResourceGraphBuilder) {}

        fn compile(&mut self, _store: &ResourceStore, _context: &GraphContext) -> Result<(), GraphicsError> {
            Ok(())
        }

        fn render_pass_executions(&self, _frame: &FrameContext<'_>) -> Vec<RenderPassExecution> {
            Vec::new()
        }

        fn record(&mut self, _cmd: &mut CommandBuffer, _data: &PerFrameData, _frame: &FrameContext<'_>) {}

        fn state(&self) -> &PassState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut PassState {
            &mut self.state
        }
    }

    #[test]
    fn test_set_extent_marks_dirty_only_on_change() {
        let mut pass = EmptyPass {
            state: PassState::new(),
        };
        assert!(!pass.is_dirty());

        pass.set_extent(Extent2d::new(800, 600));
        assert!(pass.is_dirty());
        pass.clear_dirty();

        pass.set_extent(Extent2d::new(800, 600));
        assert!(!pass.is_dirty());
        assert_eq!(pass.state().extent(), Some(Extent2d::new(800, 600)));

        pass.request_recompilation();
        assert!(pass.is_dirty());
    }

    #[test]
    fn test_execution_targets_order() {
        let color = ResourceHandle(1);
        let depth = ResourceHandle(2);
        let execution = RenderPassExecution::new(Rect2d::new(0, 0, 4, 4))
            .with_depth(AttachmentTarget::clear(depth, ClearValue::DEPTH_ONE))
            .with_color(AttachmentTarget::load(color));

        let handles: Vec<_> = execution.targets().map(|t| t.handle).collect();
        assert_eq!(handles, vec![color, depth]);
        assert_eq!(execution.layers, 1);
    }

    #[test]
    fn test_pass_id_order() {
        assert!(PassId(0) < PassId(1));
        assert_eq!(PassId(7).to_string(), "#7");
        assert_eq!(PassId(3).index(), 3);
    }
}
