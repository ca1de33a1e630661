//! Common utilities for render graph integration tests.
//!
//! Every test runs against the dummy backend, so the fixtures here build a
//! backend, a context and a swapchain, plus a few passes shaped like real
//! ones: a shadow pass rendering a depth map and a lighting pass sampling it
//! into the swapchain.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{Mat4, Vec3};
use parking_lot::Mutex;

use lumen_graphics::graph::{PassState, SizeSpec, TextureDesc};
use lumen_graphics::{
    AttachmentTarget, ClearValue, CommandBuffer, DescriptorPoolSizes, DummyBackend,
    DummySwapchain, Extent2d, FrameContext, GpuBackend, GraphContext, GraphicsError,
    PerFrameData, Rect2d, RenderGraph, RenderGraphPass, RenderPassExecution, ResourceAccess,
    ResourceGraphBuilder, ResourceHandle, ResourceStore, TextureFormat,
};

pub const SWAPCHAIN_EXTENT: Extent2d = Extent2d::new(640, 480);
pub const SWAPCHAIN_IMAGES: u32 = 3;
pub const SHADOW_MAP_SIZE: u32 = 1024;

/// Initialize logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Fixture
// ============================================================================

/// A dummy backend, its context and a swapchain.
///
/// `backend` keeps the concrete type for inspection; the context sees it as
/// a `dyn GpuBackend`.
pub struct Fixture {
    pub backend: Arc<DummyBackend>,
    pub context: Arc<GraphContext>,
    pub swapchain: DummySwapchain,
}

impl Fixture {
    /// Submissions complete immediately.
    pub fn new() -> Self {
        Self::with_backend(DummyBackend::new())
    }

    /// Submissions stay in flight until the test completes them.
    pub fn with_manual_fences() -> Self {
        Self::with_backend(DummyBackend::new().with_manual_fences())
    }

    pub fn with_backend(backend: DummyBackend) -> Self {
        init_logging();
        let backend = Arc::new(backend);
        let dyn_backend: Arc<dyn GpuBackend> = backend.clone();
        let context = Arc::new(
            GraphContext::new(dyn_backend, DescriptorPoolSizes::default())
                .expect("dummy descriptor pool"),
        );
        Self {
            backend,
            context,
            swapchain: DummySwapchain::new(SWAPCHAIN_EXTENT, SWAPCHAIN_IMAGES),
        }
    }

    pub fn graph(&self) -> RenderGraph {
        RenderGraph::new(Arc::clone(&self.context))
    }

    /// A clone sharing state with `self.swapchain`, for handing to an executor.
    pub fn boxed_swapchain(&self) -> Box<dyn lumen_graphics::Swapchain> {
        Box::new(self.swapchain.clone())
    }
}

pub fn frame_data() -> PerFrameData {
    PerFrameData::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO)
}

// ============================================================================
// Descriptors
// ============================================================================

pub fn shadow_map_desc() -> TextureDesc {
    TextureDesc::depth_target(
        "shadow_map",
        TextureFormat::Depth32Float,
        SizeSpec::Absolute {
            width: SHADOW_MAP_SIZE,
            height: SHADOW_MAP_SIZE,
        },
    )
}

pub fn backbuffer_desc() -> TextureDesc {
    TextureDesc::swapchain_target("backbuffer", TextureFormat::Bgra8UnormSrgb)
}

pub fn color_desc(name: &str) -> TextureDesc {
    TextureDesc::color_target(
        name,
        TextureFormat::Rgba8Unorm,
        SizeSpec::Absolute {
            width: 64,
            height: 64,
        },
    )
}

// ============================================================================
// Call counters
// ============================================================================

/// Counts how often the graph called into a pass.
#[derive(Debug, Default)]
pub struct Calls {
    pub setup: AtomicUsize,
    pub compile: AtomicUsize,
    pub record: AtomicUsize,
}

impl Calls {
    pub fn setup(&self) -> usize {
        self.setup.load(Ordering::SeqCst)
    }

    pub fn compile(&self) -> usize {
        self.compile.load(Ordering::SeqCst)
    }

    pub fn record(&self) -> usize {
        self.record.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Shadow pass
// ============================================================================

/// Renders a depth map, once per shadow-casting light.
pub struct ShadowPass {
    state: PassState,
    shadow_map: Option<ResourceHandle>,
    pub cascades: u32,
    pub calls: Arc<Calls>,
}

impl ShadowPass {
    pub fn new() -> Self {
        Self {
            state: PassState::new(),
            shadow_map: None,
            cascades: 1,
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn with_cascades(mut self, cascades: u32) -> Self {
        self.cascades = cascades;
        self
    }
}

impl RenderGraphPass for ShadowPass {
    fn name(&self) -> &str {
        "shadow"
    }

    fn setup(&mut self, builder: &mut ResourceGraphBuilder) {
        self.calls.setup.fetch_add(1, Ordering::SeqCst);
        self.shadow_map = Some(builder.create_texture(shadow_map_desc(), ResourceAccess::Write));
    }

    fn compile(&mut self, store: &ResourceStore, _context: &GraphContext) -> Result<(), GraphicsError> {
        self.calls.compile.fetch_add(1, Ordering::SeqCst);
        match self.shadow_map.and_then(|h| store.texture(h)) {
            Some(_) => Ok(()),
            None => Err(GraphicsError::Internal("shadow map not compiled".into())),
        }
    }

    fn render_pass_executions(&self, _frame: &FrameContext<'_>) -> Vec<RenderPassExecution> {
        let Some(shadow_map) = self.shadow_map else {
            return Vec::new();
        };
        let area = Rect2d::new(0, 0, SHADOW_MAP_SIZE, SHADOW_MAP_SIZE);
        (0..self.cascades)
            .map(|_| {
                RenderPassExecution::new(area)
                    .with_depth(AttachmentTarget::clear(shadow_map, ClearValue::DEPTH_ONE))
            })
            .collect()
    }

    fn record(&mut self, cmd: &mut CommandBuffer, data: &PerFrameData, _frame: &FrameContext<'_>) {
        self.calls.record.fetch_add(1, Ordering::SeqCst);
        for _ in &data.draw_items {
            cmd.draw(3, 1, 0, 0);
        }
        cmd.draw(36, 1, 0, 0);
    }

    fn state(&self) -> &PassState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PassState {
        &mut self.state
    }
}

// ============================================================================
// Lighting pass
// ============================================================================

/// Samples the shadow map and renders into the swapchain image.
pub struct LightingPass {
    state: PassState,
    shadow_map: Option<ResourceHandle>,
    backbuffer: Option<ResourceHandle>,
    pub calls: Arc<Calls>,
}

impl LightingPass {
    pub fn new() -> Self {
        Self {
            state: PassState::new(),
            shadow_map: None,
            backbuffer: None,
            calls: Arc::new(Calls::default()),
        }
    }
}

impl RenderGraphPass for LightingPass {
    fn name(&self) -> &str {
        "lighting"
    }

    fn setup(&mut self, builder: &mut ResourceGraphBuilder) {
        self.calls.setup.fetch_add(1, Ordering::SeqCst);
        self.shadow_map = Some(builder.create_texture(shadow_map_desc(), ResourceAccess::Read));
        self.backbuffer = Some(builder.create_texture(backbuffer_desc(), ResourceAccess::Write));
    }

    fn compile(&mut self, store: &ResourceStore, _context: &GraphContext) -> Result<(), GraphicsError> {
        self.calls.compile.fetch_add(1, Ordering::SeqCst);
        let backbuffer = self
            .backbuffer
            .and_then(|h| store.resolve_texture(h, 0))
            .is_some();
        let shadow_map = self.shadow_map.and_then(|h| store.texture(h)).is_some();
        if backbuffer && shadow_map {
            Ok(())
        } else {
            Err(GraphicsError::Internal("lighting inputs not compiled".into()))
        }
    }

    fn render_pass_executions(&self, frame: &FrameContext<'_>) -> Vec<RenderPassExecution> {
        let Some(backbuffer) = self.backbuffer else {
            return Vec::new();
        };
        vec![
            RenderPassExecution::new(Rect2d::from_extent(frame.swapchain_extent))
                .with_color(AttachmentTarget::clear(backbuffer, ClearValue::BLACK)),
        ]
    }

    fn record(&mut self, cmd: &mut CommandBuffer, _data: &PerFrameData, _frame: &FrameContext<'_>) {
        self.calls.record.fetch_add(1, Ordering::SeqCst);
        // Fullscreen triangle.
        cmd.draw(3, 1, 0, 0);
    }

    fn state(&self) -> &PassState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PassState {
        &mut self.state
    }
}

// ============================================================================
// Chain pass
// ============================================================================

/// Declarations of a [`ChainPass`], shared with the test so they can change
/// between recompilations.
#[derive(Debug, Clone, Default)]
pub struct ChainDecl {
    pub reads: Vec<TextureDesc>,
    pub writes: Vec<TextureDesc>,
}

/// A pass whose reads and writes are configured by the test.
pub struct ChainPass {
    name: String,
    state: PassState,
    pub decl: Arc<Mutex<ChainDecl>>,
    written: Vec<ResourceHandle>,
    pub calls: Arc<Calls>,
}

impl ChainPass {
    pub fn new(name: &str, reads: &[&str], writes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            state: PassState::new(),
            decl: Arc::new(Mutex::new(ChainDecl {
                reads: reads.iter().map(|n| color_desc(n)).collect(),
                writes: writes.iter().map(|n| color_desc(n)).collect(),
            })),
            written: Vec::new(),
            calls: Arc::new(Calls::default()),
        }
    }
}

impl RenderGraphPass for ChainPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, builder: &mut ResourceGraphBuilder) {
        self.calls.setup.fetch_add(1, Ordering::SeqCst);
        let decl = self.decl.lock().clone();
        for desc in decl.reads {
            builder.create_texture(desc, ResourceAccess::Read);
        }
        self.written = decl
            .writes
            .into_iter()
            .map(|desc| builder.create_texture(desc, ResourceAccess::Write))
            .collect();
    }

    fn compile(&mut self, store: &ResourceStore, _context: &GraphContext) -> Result<(), GraphicsError> {
        self.calls.compile.fetch_add(1, Ordering::SeqCst);
        if self.written.iter().all(|h| store.texture(*h).is_some()) {
            Ok(())
        } else {
            Err(GraphicsError::Internal(format!("{} outputs not compiled", self.name)))
        }
    }

    fn render_pass_executions(&self, _frame: &FrameContext<'_>) -> Vec<RenderPassExecution> {
        self.written
            .iter()
            .map(|h| {
                RenderPassExecution::new(Rect2d::new(0, 0, 64, 64))
                    .with_color(AttachmentTarget::clear(*h, ClearValue::BLACK))
            })
            .collect()
    }

    fn record(&mut self, cmd: &mut CommandBuffer, _data: &PerFrameData, _frame: &FrameContext<'_>) {
        self.calls.record.fetch_add(1, Ordering::SeqCst);
        cmd.draw(3, 1, 0, 0);
    }

    fn state(&self) -> &PassState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PassState {
        &mut self.state
    }
}
