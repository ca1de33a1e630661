//! Frame executor for rendering with multiple frames in flight.
//!
//! [`FrameExecutor`] drives a built [`RenderGraph`] once per frame. It owns N
//! frame slots, each with its own fence, semaphores, command pool, secondary
//! command buffers, timestamp queries and per-frame buffers, so the CPU can
//! record frame N+1 while the GPU renders frame N.
//!
//! # Per-frame sequence
//!
//! ```text
//! Idle ─► FenceWait ─► Reset ─► Acquire ─► (Recompile) ─► Record ─► Submit ─► Present ─► Idle
//!             │                    │                                            │
//!             │                    └── OUT_OF_DATE: recreate swapchain, retry   │
//!             │                                                                 │
//!             └── slot's previous submission has finished   OUT_OF_DATE/SUBOPTIMAL:
//!                                                           recreate before next frame
//! ```
//!
//! # Frame Overlap (Pipelining)
//!
//! With 2 frames in flight:
//!
//! ```text
//! Slot 0: [record F0] [submit] ───────────── [wait F0] [record F2] [submit] ──►
//!                              [GPU F0] ───►
//! Slot 1:             [record F1] [submit] ───────────── [wait F1] [record F3] ►
//!                                          [GPU F1] ───►
//! ```
//!
//! The CPU only blocks when it comes back to a slot whose previous frame the
//! GPU has not finished. Recompilation and swapchain recreation are the
//! exceptions: both wait for the whole device to go idle before replacing
//! resources an in-flight frame may read.
//!
//! # Recording
//!
//! For every pass in execution order and every [`RenderPassExecution`] it
//! yields, the executor records into the slot's primary buffer:
//!
//! 1. barriers moving each target from its resting layout into the scope layout,
//! 2. a rendering scope over the targets,
//! 3. one secondary buffer filled by [`RenderGraphPass::record`],
//! 4. barriers moving each target into its final layout.
//!
//! Barriers come from the texture descriptors; passes never write them.
//!
//! [`RenderPassExecution`]: crate::graph::RenderPassExecution
//! [`RenderGraphPass::record`]: crate::graph::RenderGraphPass::record

mod slot;

use std::sync::Arc;
use std::time::Instant;

pub use slot::SlotState;

use slot::{FrameSlot, PendingPass, PendingProfile};

use crate::backend::{
    AcquiredImage, CommandBuffer, CommandBufferLevel, GpuBackend, GpuCommandPool, GpuQueryPool,
    GpuSemaphore, PresentStatus, RenderingAttachment, RenderingFormats, RenderingInfo,
    ResolvedBarrier, Submission, Swapchain,
};
use crate::error::GraphicsError;
use crate::frame_data::{FrameLimits, PerFrameData};
use crate::graph::{
    CompiledTexture, FrameContext, ImageBarrier, RenderGraph, RenderPassExecution,
    ResourceStore,
};
use crate::profiling::{
    RenderGraphFrameProfilingData, frame_mark, profile_function, profile_plot, profile_scope,
    profile_scope_dynamic,
};
use crate::types::PipelineStages;

/// Default number of frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Frame executor configuration.
///
/// # Example
///
/// ```
/// use lumen_graphics::executor::ExecutorConfig;
///
/// let config = ExecutorConfig::new()
///     .with_frames_in_flight(3)
///     .with_max_lights(64);
/// assert_eq!(config.frames_in_flight, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Frames the CPU may record ahead of the GPU. At least 1.
    pub frames_in_flight: usize,
    /// Secondary command buffers preallocated per slot. Each rendering scope
    /// of a frame uses one; running out fails the frame.
    pub secondary_buffers_per_frame: u32,
    /// Record GPU timestamps, if the device supports them.
    pub timestamps: bool,
    /// Capacity of each slot's light buffer.
    pub max_lights: u32,
    /// Capacity of each slot's bone buffer.
    pub max_bones: u32,
    /// Capacity of each slot's shadow matrix buffer.
    pub max_shadow_matrices: u32,
    /// Consecutive out-of-date acquires tolerated within one frame.
    pub max_swapchain_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            secondary_buffers_per_frame: 64,
            timestamps: true,
            max_lights: 256,
            max_bones: 4096,
            max_shadow_matrices: 16,
            max_swapchain_retries: 3,
        }
    }
}

impl ExecutorConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    /// Set the number of secondary buffers per slot.
    pub fn with_secondary_buffers_per_frame(mut self, count: u32) -> Self {
        self.secondary_buffers_per_frame = count;
        self
    }

    /// Enable or disable GPU timestamps.
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Set the light buffer capacity.
    pub fn with_max_lights(mut self, max_lights: u32) -> Self {
        self.max_lights = max_lights;
        self
    }

    /// Set the bone buffer capacity.
    pub fn with_max_bones(mut self, max_bones: u32) -> Self {
        self.max_bones = max_bones;
        self
    }

    /// Set the shadow matrix buffer capacity.
    pub fn with_max_shadow_matrices(mut self, max_shadow_matrices: u32) -> Self {
        self.max_shadow_matrices = max_shadow_matrices;
        self
    }

    /// Set how many out-of-date acquires a frame tolerates.
    pub fn with_max_swapchain_retries(mut self, retries: u32) -> Self {
        self.max_swapchain_retries = retries;
        self
    }

    /// Capacities of the per-slot buffers.
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_lights: self.max_lights,
            max_bones: self.max_bones,
            max_shadow_matrices: self.max_shadow_matrices,
        }
    }

    fn queries_per_slot(&self) -> u32 {
        // Frame begin/end plus a pair per rendering scope.
        2 + 2 * self.secondary_buffers_per_frame
    }
}

/// Drives a render graph with multiple frames in flight.
///
/// # Thread Safety
///
/// `FrameExecutor` is owned by the render thread. It is `Send`, so it can be
/// moved there, but every method takes `&mut self`.
pub struct FrameExecutor {
    graph: RenderGraph,
    swapchain: Box<dyn Swapchain>,
    backend: Arc<dyn GpuBackend>,
    config: ExecutorConfig,
    slots: Vec<FrameSlot>,
    current_slot: usize,
    frame_index: u64,
    query_pool: Option<GpuQueryPool>,
    timestamp_period_ns: f32,
    /// Pool and buffer for one-time barrier submissions.
    setup_pool: GpuCommandPool,
    setup_cmd: CommandBuffer,
    /// Upload semaphores the next submission waits on.
    pending_uploads: Vec<(Arc<GpuSemaphore>, PipelineStages)>,
    needs_recreation: bool,
    recreations: u32,
    profiling: Option<RenderGraphFrameProfilingData>,
}

impl std::fmt::Debug for FrameExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameExecutor")
            .field("graph", &self.graph)
            .field("frames_in_flight", &self.slots.len())
            .field("current_slot", &self.current_slot)
            .field("frame_index", &self.frame_index)
            .field("timestamps", &self.query_pool.is_some())
            .field("needs_recreation", &self.needs_recreation)
            .finish_non_exhaustive()
    }
}

impl FrameExecutor {
    /// Create an executor for `graph`, building the graph if it is not built.
    ///
    /// Fails if any slot's fence, semaphores, command pool, command buffers
    /// or per-frame buffers, or the timestamp query pool, cannot be created.
    pub fn new(
        mut graph: RenderGraph,
        swapchain: Box<dyn Swapchain>,
        config: ExecutorConfig,
    ) -> Result<Self, GraphicsError> {
        if config.frames_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frames_in_flight must be at least 1".into(),
            ));
        }

        let backend = Arc::clone(graph.context().backend());
        let capabilities = backend.capabilities();
        let queries_per_slot = config.queries_per_slot();

        let query_pool = if config.timestamps && capabilities.timestamps {
            Some(backend.create_query_pool(queries_per_slot * config.frames_in_flight as u32)?)
        } else {
            log::debug!("GPU timestamps disabled");
            None
        };

        let slots = (0..config.frames_in_flight)
            .map(|i| FrameSlot::new(backend.as_ref(), i, &config, queries_per_slot))
            .collect::<Result<Vec<_>, _>>()?;

        let setup_pool = backend.create_command_pool()?;
        let setup_cmd = backend
            .allocate_command_buffers(&setup_pool, CommandBufferLevel::Primary, 1)?
            .pop()
            .map(|raw| CommandBuffer::new(raw, CommandBufferLevel::Primary))
            .ok_or_else(|| {
                GraphicsError::ResourceCreationFailed("no setup command buffer allocated".into())
            })?;

        let barriers = if graph.is_built() {
            Vec::new()
        } else {
            graph.build(swapchain.as_ref())
        };

        let mut executor = Self {
            graph,
            swapchain,
            backend,
            config,
            slots,
            current_slot: 0,
            frame_index: 0,
            query_pool,
            timestamp_period_ns: capabilities.timestamp_period_ns,
            setup_pool,
            setup_cmd,
            pending_uploads: Vec::new(),
            needs_recreation: false,
            recreations: 0,
            profiling: None,
        };
        executor.submit_barriers(&barriers)?;

        log::info!(
            "Frame executor ready: {} frames in flight, {} passes",
            executor.slots.len(),
            executor.graph.pass_count()
        );
        Ok(executor)
    }

    /// Render one frame.
    ///
    /// Out-of-date and suboptimal swapchains are handled internally. Errors
    /// are device failures, a lost surface, a swapchain that stays out of
    /// date, or per-frame data exceeding the preallocated capacities.
    pub fn draw(&mut self, data: &PerFrameData) -> Result<(), GraphicsError> {
        profile_function!();
        let cpu_start = Instant::now();
        let slot_index = self.current_slot;

        self.wait_for_slot(slot_index)?;

        {
            let slot = &mut self.slots[slot_index];
            slot.state = SlotState::Reset;
            self.backend.reset_command_pool(&slot.command_pool)?;
        }

        if self.needs_recreation && !self.recreate_swapchain()? {
            self.skip_frame(slot_index);
            return Ok(());
        }

        if self.slots[slot_index].acquire_abandoned {
            // The old semaphore may still carry a signal nobody waited on.
            let slot = &mut self.slots[slot_index];
            slot.image_available = self.backend.create_semaphore()?;
            slot.acquire_abandoned = false;
            log::debug!("Replaced acquire semaphore of frame slot {}", slot_index);
        }

        self.slots[slot_index].state = SlotState::Acquire;
        let Some(image) = self.acquire(slot_index)? else {
            self.skip_frame(slot_index);
            return Ok(());
        };

        let mut profile = match self.record_acquired(slot_index, data, image.index) {
            Ok(profile) => profile,
            Err(e) => {
                self.abandon_image(slot_index, image.index, &e);
                return Err(e);
            }
        };

        self.submit(slot_index)?;
        self.present(slot_index, image.index)?;

        profile.cpu_frame_ms = cpu_start.elapsed().as_secs_f64() * 1000.0;
        profile_plot!("cpu_frame_ms", profile.cpu_frame_ms);
        let slot = &mut self.slots[slot_index];
        slot.pending_profile = Some(profile);
        slot.state = SlotState::Idle;

        log::trace!(
            "Frame {} done (slot {}, image {})",
            self.frame_index,
            slot_index,
            image.index
        );
        self.frame_index += 1;
        self.current_slot = (slot_index + 1) % self.slots.len();
        frame_mark!();
        Ok(())
    }

    /// Make the next submission wait on an asynchronous upload.
    ///
    /// The executor keeps the semaphore alive until the frame that waited on
    /// it has finished on the GPU.
    pub fn add_upload_semaphore(&mut self, semaphore: Arc<GpuSemaphore>, stage: PipelineStages) {
        self.pending_uploads.push((semaphore, stage));
    }

    /// Recreate the swapchain before the next frame.
    pub fn request_swapchain_recreation(&mut self) {
        self.needs_recreation = true;
    }

    /// Latest telemetry snapshot.
    ///
    /// Describes the frame submitted one frames-in-flight cycle ago, since
    /// GPU times are only read after that frame's fence signaled.
    pub fn profiling_data(&self) -> Option<&RenderGraphFrameProfilingData> {
        self.profiling.as_ref()
    }

    /// Block until every submitted frame has finished.
    ///
    /// Call before destroying resources the GPU may still use.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        log::trace!("Waiting for GPU idle ({} slots)", self.slots.len());
        self.backend.wait_idle()
    }

    /// The driven graph.
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    /// The driven graph, e.g. to request recompilation of a pass.
    pub fn graph_mut(&mut self) -> &mut RenderGraph {
        &mut self.graph
    }

    /// The presentation target.
    pub fn swapchain(&self) -> &dyn Swapchain {
        self.swapchain.as_ref()
    }

    /// The configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next frame records into.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Frames drawn so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// State of a slot.
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    /// Swapchain recreations so far.
    pub fn recreation_count(&self) -> u32 {
        self.recreations
    }

    /// Returns true if GPU timestamps are recorded.
    pub fn timestamps_enabled(&self) -> bool {
        self.query_pool.is_some()
    }

    fn wait_for_slot(&mut self, slot_index: usize) -> Result<(), GraphicsError> {
        profile_scope!("fence_wait");
        let slot = &mut self.slots[slot_index];
        slot.state = SlotState::FenceWait;

        if !self.backend.wait_fence(&slot.fence, None)? {
            return Err(GraphicsError::Internal(format!(
                "fence of frame slot {} did not signal",
                slot_index
            )));
        }

        if !slot.uploads_in_flight.is_empty() {
            log::trace!(
                "Releasing {} upload semaphores of slot {}",
                slot.uploads_in_flight.len(),
                slot_index
            );
            slot.uploads_in_flight.clear();
        }

        if let Some(profile) = slot.take_profile(
            self.backend.as_ref(),
            self.query_pool.as_ref(),
            self.timestamp_period_ns,
        ) {
            self.profiling = Some(profile);
        }
        Ok(())
    }

    /// Acquire the next image, recreating an out-of-date swapchain.
    ///
    /// Returns `None` if recreation had to wait for the surface to regain
    /// a non-zero size.
    fn acquire(&mut self, slot_index: usize) -> Result<Option<AcquiredImage>, GraphicsError> {
        let mut attempts = 0;
        loop {
            match self
                .swapchain
                .acquire_next_image(&self.slots[slot_index].image_available)
            {
                Ok(image) => {
                    if image.suboptimal {
                        log::warn!("Acquired image {} from a suboptimal swapchain", image.index);
                    }
                    return Ok(Some(image));
                }
                Err(GraphicsError::SurfaceOutdated) => {
                    if attempts >= self.config.max_swapchain_retries {
                        log::error!(
                            "Swapchain still out of date after {} recreations",
                            attempts
                        );
                        return Err(GraphicsError::SwapchainRecreationExhausted(attempts));
                    }
                    attempts += 1;
                    log::info!("Swapchain out of date on acquire, recreating");
                    if !self.recreate_swapchain()? {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Recompile, upload and record the frame for an acquired image.
    fn record_acquired(
        &mut self,
        slot_index: usize,
        data: &PerFrameData,
        image_index: u32,
    ) -> Result<PendingProfile, GraphicsError> {
        self.slots[slot_index].state = SlotState::Recompile;
        if let Some(barriers) = self.graph.recompile_dirty(self.swapchain.as_ref())? {
            self.submit_barriers(&barriers)?;
        }

        {
            let slot = &mut self.slots[slot_index];
            slot.state = SlotState::Record;
            slot.frame_buffers.upload(self.backend.as_ref(), data)?;
        }

        record_frame(
            &mut self.graph,
            &mut self.slots[slot_index],
            self.query_pool.as_ref(),
            data,
            self.frame_index,
            image_index,
            self.swapchain.extent(),
        )
    }

    /// Give up on an acquired image that will never be presented.
    ///
    /// The image stays acquired and the slot's acquire semaphore stays
    /// signaled, so the swapchain is recreated and the semaphore replaced
    /// before the slot acquires again.
    fn abandon_image(&mut self, slot_index: usize, image_index: u32, error: &GraphicsError) {
        log::error!(
            "Frame {} failed after acquiring image {}: {}; recreating the swapchain",
            self.frame_index,
            image_index,
            error
        );
        let slot = &mut self.slots[slot_index];
        slot.acquire_abandoned = true;
        slot.state = SlotState::Idle;
        self.needs_recreation = true;
    }

    /// Leave the frame without rendering. The slot is reused next time.
    fn skip_frame(&mut self, slot_index: usize) {
        log::trace!("Skipping frame {}: surface has no area", self.frame_index);
        self.slots[slot_index].state = SlotState::Idle;
    }

    fn submit(&mut self, slot_index: usize) -> Result<(), GraphicsError> {
        profile_scope!("submit");
        let slot = &mut self.slots[slot_index];
        slot.state = SlotState::Submit;

        let mut wait_semaphores = vec![(
            &slot.image_available,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        )];
        wait_semaphores.extend(self.pending_uploads.iter().map(|(s, stage)| (s.as_ref(), *stage)));

        self.backend.reset_fence(&slot.fence)?;
        self.backend.submit(&Submission {
            command_buffers: vec![slot.primary.raw()],
            wait_semaphores,
            signal_semaphores: vec![&slot.render_finished],
            fence: Some(&slot.fence),
        })?;

        slot.uploads_in_flight
            .extend(self.pending_uploads.drain(..).map(|(s, _)| s));
        Ok(())
    }

    fn present(&mut self, slot_index: usize, image_index: u32) -> Result<(), GraphicsError> {
        profile_scope!("present");
        let slot = &mut self.slots[slot_index];
        slot.state = SlotState::Present;

        match self.swapchain.present(image_index, &slot.render_finished) {
            Ok(PresentStatus::Optimal) => Ok(()),
            Ok(PresentStatus::Suboptimal) => {
                log::warn!("Swapchain suboptimal on present, recreating before next frame");
                self.needs_recreation = true;
                Ok(())
            }
            Err(GraphicsError::SurfaceOutdated) => {
                log::info!("Swapchain out of date on present, recreating before next frame");
                self.needs_recreation = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Recreate the swapchain and everything that follows it.
    ///
    /// Returns false, with recreation still pending, while the surface has
    /// no area (a minimized window).
    fn recreate_swapchain(&mut self) -> Result<bool, GraphicsError> {
        profile_scope!("recreate_swapchain");
        let surface = self.swapchain.surface_extent()?;
        if surface.is_empty() {
            log::debug!(
                "Surface is {}x{}, deferring swapchain recreation",
                surface.width,
                surface.height
            );
            self.needs_recreation = true;
            return Ok(false);
        }
        self.backend.wait_idle()?;

        // Wrapped images must be gone before their swapchain is.
        let released = self.graph.release_swapchain_resources();
        self.swapchain.recreate()?;

        let extent = self.swapchain.extent();
        log::info!(
            "Swapchain recreated at {}x{} with {} images ({} wrapped images released)",
            extent.width,
            extent.height,
            self.swapchain.image_count(),
            released.len()
        );

        let barriers = self.graph.on_swapchain_resize(self.swapchain.as_ref());
        self.submit_barriers(&barriers)?;

        self.needs_recreation = false;
        self.recreations += 1;
        Ok(true)
    }

    /// Submit layout transitions on the setup buffer and wait for the device.
    fn submit_barriers(&mut self, barriers: &[ImageBarrier]) -> Result<(), GraphicsError> {
        if barriers.is_empty() {
            return Ok(());
        }
        profile_scope!("submit_barriers");

        let store = self.graph.store();
        let resolved: Vec<ResolvedBarrier<'_>> = barriers
            .iter()
            .filter_map(|barrier| match store.texture(barrier.handle) {
                Some(texture) => Some(ResolvedBarrier {
                    image: &texture.image,
                    barrier: *barrier,
                }),
                None => {
                    log::error!("Barrier for texture {} that is not compiled", barrier.handle);
                    None
                }
            })
            .collect();

        self.backend.reset_command_pool(&self.setup_pool)?;
        self.setup_cmd.begin()?;
        self.setup_cmd.pipeline_barrier(&resolved);
        self.setup_cmd.end()?;
        self.backend.submit(&Submission {
            command_buffers: vec![self.setup_cmd.raw()],
            ..Default::default()
        })?;
        self.backend.wait_idle()?;

        log::debug!("Submitted {} layout transitions", resolved.len());
        Ok(())
    }
}

impl Drop for FrameExecutor {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("Failed to wait for GPU idle on shutdown: {}", e);
        }
    }
}

/// A target of a rendering scope, resolved for the acquired image.
struct ResolvedTarget<'a> {
    texture: &'a CompiledTexture,
    load_op: crate::types::LoadOp,
    store_op: crate::types::StoreOp,
    clear: crate::types::ClearValue,
}

/// Resolve every target of an execution, or `None` if one is not compiled.
fn resolve_targets<'a>(
    store: &'a ResourceStore,
    execution: &RenderPassExecution,
    image_index: u32,
    pass_name: &str,
) -> Option<(Vec<ResolvedTarget<'a>>, Option<ResolvedTarget<'a>>)> {
    let resolve = |target: &crate::graph::AttachmentTarget| {
        match store.resolve_texture(target.handle, image_index) {
            Some(texture) => Some(ResolvedTarget {
                texture: texture.as_ref(),
                load_op: target.load_op,
                store_op: target.store_op,
                clear: target.clear,
            }),
            None => {
                log::error!(
                    "Pass '{}' renders into texture {} that is not compiled",
                    pass_name,
                    target.handle
                );
                None
            }
        }
    };

    let colors = execution
        .color_targets
        .iter()
        .map(resolve)
        .collect::<Option<Vec<_>>>()?;
    let depth = match &execution.depth_target {
        Some(target) => Some(resolve(target)?),
        None => None,
    };
    Some((colors, depth))
}

fn attachment<'a>(target: &ResolvedTarget<'a>) -> RenderingAttachment<'a> {
    RenderingAttachment {
        image: &target.texture.image,
        layout: target.texture.desc.initial_layout,
        load_op: target.load_op,
        store_op: target.store_op,
        clear: target.clear,
    }
}

/// Record one frame into the slot's primary buffer.
fn record_frame(
    graph: &mut RenderGraph,
    slot: &mut FrameSlot,
    query_pool: Option<&GpuQueryPool>,
    data: &PerFrameData,
    frame_index: u64,
    image_index: u32,
    swapchain_extent: crate::types::Extent2d,
) -> Result<PendingProfile, GraphicsError> {
    profile_scope!("record_frame");
    let context = Arc::clone(graph.context());
    let (order, store, passes) = graph.recording_view();

    let mut profile = PendingProfile {
        frame_index,
        ..Default::default()
    };
    let capacity = slot.secondaries.len();
    let mut next_secondary = 0usize;
    // Relative to the slot's first query; 0 and 1 bracket the frame.
    let mut next_query = 2u32;

    let primary = &mut slot.primary;
    primary.begin()?;
    if let Some(pool) = query_pool {
        primary.reset_queries(pool, slot.first_query, 2 + 2 * capacity as u32);
        primary.write_timestamp(pool, slot.first_query, PipelineStages::TOP_OF_PIPE);
    }

    for id in order {
        let Some(entry) = passes.get_mut(id.index()) else {
            log::error!("Execution order names unknown pass {}", id);
            continue;
        };
        let pass = entry.pass.as_mut();
        profile_scope_dynamic!(pass.name());
        let pass_start = Instant::now();

        let mut frame = FrameContext {
            frame_index,
            slot: slot.index,
            image_index,
            swapchain_extent,
            store,
            context: context.as_ref(),
            frame_buffers: &slot.frame_buffers,
            execution_index: 0,
        };
        let executions = pass.render_pass_executions(&frame);

        let mut pending = PendingPass {
            name: pass.name().to_string(),
            cpu_ms: 0.0,
            draw_calls: 0,
            first_query: next_query,
            executions: 0,
        };

        for (execution_index, execution) in executions.iter().enumerate() {
            if next_secondary >= capacity {
                log::error!(
                    "Pass '{}' needs more than the {} secondary command buffers of a frame",
                    pass.name(),
                    capacity
                );
                return Err(GraphicsError::ResourceExhausted {
                    resource: "secondary command buffers",
                    requested: next_secondary + executions.len() - execution_index,
                    capacity,
                });
            }

            let Some((colors, depth)) =
                resolve_targets(store, execution, image_index, pass.name())
            else {
                continue;
            };
            let targets = || colors.iter().chain(depth.iter());

            let before: Vec<ResolvedBarrier<'_>> = targets()
                .filter_map(|t| {
                    ImageBarrier::before_scope(t.texture.handle, &t.texture.desc).map(|barrier| {
                        ResolvedBarrier {
                            image: &t.texture.image,
                            barrier,
                        }
                    })
                })
                .collect();
            primary.pipeline_barrier(&before);

            if let Some(pool) = query_pool {
                primary.write_timestamp(
                    pool,
                    slot.first_query + next_query,
                    PipelineStages::TOP_OF_PIPE,
                );
            }

            primary.begin_rendering(&RenderingInfo {
                area: execution.render_area,
                layers: execution.layers,
                colors: colors.iter().map(attachment).collect(),
                depth: depth.as_ref().map(attachment),
            });

            let formats = RenderingFormats {
                colors: colors.iter().map(|t| t.texture.desc.format).collect(),
                depth: depth.as_ref().map(|t| t.texture.desc.format),
                samples: targets().map(|t| t.texture.desc.samples).max().unwrap_or(1),
            };
            let secondary = &mut slot.secondaries[next_secondary];
            next_secondary += 1;
            secondary.begin_secondary(&formats)?;
            frame.execution_index = execution_index;
            pass.record(secondary, data, &frame);
            secondary.end()?;
            pending.draw_calls += secondary.draw_call_count();
            primary.execute_commands(secondary);
            primary.end_rendering();

            if let Some(pool) = query_pool {
                primary.write_timestamp(
                    pool,
                    slot.first_query + next_query + 1,
                    PipelineStages::BOTTOM_OF_PIPE,
                );
            }
            next_query += 2;
            pending.executions += 1;

            let after: Vec<ResolvedBarrier<'_>> = targets()
                .filter_map(|t| {
                    ImageBarrier::after_scope(t.texture.handle, &t.texture.desc).map(|barrier| {
                        ResolvedBarrier {
                            image: &t.texture.image,
                            barrier,
                        }
                    })
                })
                .collect();
            primary.pipeline_barrier(&after);
        }

        pending.cpu_ms = pass_start.elapsed().as_secs_f64() * 1000.0;
        log::trace!(
            "Recorded pass '{}': {} executions, {} draws",
            pending.name,
            pending.executions,
            pending.draw_calls
        );
        profile.passes.push(pending);
    }

    if let Some(pool) = query_pool {
        primary.write_timestamp(pool, slot.first_query + 1, PipelineStages::BOTTOM_OF_PIPE);
        profile.queries_used = next_query;
    }
    primary.end()?;

    Ok(profile)
}

static_assertions::assert_impl_all!(FrameExecutor: Send);
