//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations but provides a valid
//! implementation for testing the render graph without requiring GPU
//! hardware. Command buffers record a [`RecordedCommand`] stream, submissions
//! are kept for inspection and buffers are backed by host memory.
//!
//! By default every submission completes immediately. With
//! [`DummyBackend::with_manual_fences`] submissions stay in flight until a
//! test completes them, which makes frame pacing observable.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    AcquiredImage, CommandBufferLevel, DescriptorPoolSizes, DeviceCapabilities, GpuBackend,
    GpuBuffer, GpuCommandBuffer, GpuCommandPool, GpuDescriptorPool, GpuDescriptorSet, GpuFence,
    GpuFramebuffer, GpuImage, GpuPipeline, GpuQueryPool, GpuRenderPass, GpuSemaphore,
    GpuShaderModule, PresentStatus, Submission, Swapchain,
};
use crate::error::GraphicsError;
use crate::graph::descriptor::{
    BufferDesc, GraphicsPipelineDesc, RenderPassDesc, ShaderStageDesc, TextureDesc,
};
use crate::types::{
    DescriptorType, Extent2d, ImageLayout, IndexFormat, Rect2d, TextureFormat, Viewport,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identity of a dummy GPU object, `0` for objects of other backends.
pub trait DummyId {
    /// The object's unique id.
    fn dummy_id(&self) -> u64;
}

macro_rules! impl_dummy_id {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DummyId for $ty {
                fn dummy_id(&self) -> u64 {
                    match self {
                        Self::Dummy { id, .. } => *id,
                        #[cfg(feature = "vulkan-backend")]
                        _ => 0,
                    }
                }
            }
        )*
    };
}

impl_dummy_id!(
    GpuImage,
    GpuBuffer,
    GpuRenderPass,
    GpuFramebuffer,
    GpuShaderModule,
    GpuPipeline,
    GpuFence,
    GpuSemaphore,
    GpuCommandPool,
    GpuCommandBuffer,
    GpuQueryPool,
    GpuDescriptorPool,
    GpuDescriptorSet,
);

/// A command recorded by a dummy command buffer.
///
/// Secondary buffers are inlined into the primary stream after an
/// [`ExecuteCommands`](Self::ExecuteCommands) marker.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// Recording started.
    Begin {
        /// Buffer level.
        level: CommandBufferLevel,
    },
    /// Recording finished.
    End,
    /// One image layout transition.
    Barrier {
        /// Image id.
        image: u64,
        /// Layout before.
        old_layout: ImageLayout,
        /// Layout after.
        new_layout: ImageLayout,
    },
    /// Rendering scope opened.
    BeginRendering {
        /// Render area.
        area: Rect2d,
        /// Color attachment image ids.
        color_images: Vec<u64>,
        /// Depth attachment image id.
        depth_image: Option<u64>,
    },
    /// Rendering scope closed.
    EndRendering,
    /// Secondary buffer executed; its commands follow.
    ExecuteCommands {
        /// Secondary buffer id.
        secondary: u64,
    },
    /// Timestamp queries reset.
    ResetQueries {
        /// Query pool id.
        pool: u64,
        /// First query.
        first: u32,
        /// Query count.
        count: u32,
    },
    /// Timestamp written.
    WriteTimestamp {
        /// Query pool id.
        pool: u64,
        /// Query index.
        query: u32,
    },
    /// Pipeline bound.
    BindPipeline {
        /// Pipeline id.
        pipeline: u64,
    },
    /// Viewport set.
    SetViewport(Viewport),
    /// Scissor set.
    SetScissor(Rect2d),
    /// Vertex buffers bound.
    BindVertexBuffers {
        /// First binding slot.
        first_binding: u32,
        /// Buffer ids.
        buffers: Vec<u64>,
    },
    /// Index buffer bound.
    BindIndexBuffer {
        /// Buffer id.
        buffer: u64,
        /// Index format.
        format: IndexFormat,
    },
    /// Descriptor set bound.
    BindDescriptorSet {
        /// Set number.
        set_index: u32,
        /// Set id.
        set: u64,
    },
    /// Push constants updated.
    PushConstants {
        /// Byte offset.
        offset: u32,
        /// Byte size.
        size: u32,
    },
    /// Non-indexed draw.
    Draw {
        /// Vertex count.
        vertex_count: u32,
        /// Instance count.
        instance_count: u32,
    },
    /// Indexed draw.
    DrawIndexed {
        /// Index count.
        index_count: u32,
        /// Instance count.
        instance_count: u32,
    },
}

/// One queue submission as seen by the dummy backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    /// Commands of every submitted buffer, in order.
    pub commands: Vec<RecordedCommand>,
    /// Waited semaphore ids.
    pub wait_semaphores: Vec<u64>,
    /// Signaled semaphore ids.
    pub signal_semaphores: Vec<u64>,
    /// Signaled fence id.
    pub fence: Option<u64>,
}

impl SubmissionRecord {
    /// Number of draw commands in the submission.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
                )
            })
            .count()
    }
}

/// A CPU wait on a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceWaitRecord {
    /// Fence id.
    pub fence: u64,
    /// The fence was unsignaled when the wait began.
    pub blocked: bool,
    /// The fence was signaled when the wait returned.
    pub signaled: bool,
}

/// Number of objects created, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreationCounts {
    /// Images.
    pub textures: usize,
    /// Buffers.
    pub buffers: usize,
    /// Render pass objects.
    pub render_passes: usize,
    /// Framebuffers.
    pub framebuffers: usize,
    /// Shader modules.
    pub shader_modules: usize,
    /// Graphics pipelines.
    pub pipelines: usize,
}

#[derive(Default)]
struct DummyState {
    submissions: Vec<SubmissionRecord>,
    /// Fences of in-flight submissions, oldest first (manual mode only).
    pending: VecDeque<Arc<AtomicBool>>,
    fence_waits: Vec<FenceWaitRecord>,
    query_results: HashMap<u64, Vec<Option<u64>>>,
    timestamp_clock: u64,
    created: CreationCounts,
    pool_resets: usize,
    wait_idle_calls: usize,
    descriptor_writes: usize,
}

/// Dummy GPU backend.
pub struct DummyBackend {
    manual_fences: bool,
    timestamps: bool,
    fail_descriptor_pool: bool,
    state: Mutex<DummyState>,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("manual_fences", &self.manual_fences)
            .field("timestamps", &self.timestamps)
            .finish_non_exhaustive()
    }
}

impl DummyBackend {
    /// Create a backend whose submissions complete immediately.
    pub fn new() -> Self {
        Self {
            manual_fences: false,
            timestamps: true,
            fail_descriptor_pool: false,
            state: Mutex::new(DummyState::default()),
        }
    }

    /// Keep submissions in flight until [`complete_oldest_submission`](Self::complete_oldest_submission).
    pub fn with_manual_fences(mut self) -> Self {
        self.manual_fences = true;
        self
    }

    /// Report no timestamp support.
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Make descriptor pool creation fail.
    pub fn with_descriptor_pool_failure(mut self) -> Self {
        self.fail_descriptor_pool = true;
        self
    }

    // ------------------------------------------------------------------
    // Test controls and inspection
    // ------------------------------------------------------------------

    /// Signal the fence of the oldest in-flight submission.
    ///
    /// Returns false if nothing was in flight.
    pub fn complete_oldest_submission(&self) -> bool {
        match self.state.lock().pending.pop_front() {
            Some(fence) => {
                fence.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Number of submissions whose fence has not been signaled.
    pub fn in_flight(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// All submissions so far.
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().submissions.clone()
    }

    /// The most recent submission.
    pub fn last_submission(&self) -> Option<SubmissionRecord> {
        self.state.lock().submissions.last().cloned()
    }

    /// Forget recorded submissions and fence waits.
    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.submissions.clear();
        state.fence_waits.clear();
    }

    /// All CPU fence waits so far.
    pub fn fence_waits(&self) -> Vec<FenceWaitRecord> {
        self.state.lock().fence_waits.clone()
    }

    /// Objects created so far.
    pub fn creation_counts(&self) -> CreationCounts {
        self.state.lock().created
    }

    /// Number of command pool resets.
    pub fn pool_reset_count(&self) -> usize {
        self.state.lock().pool_resets
    }

    /// Number of `wait_idle` calls.
    pub fn wait_idle_count(&self) -> usize {
        self.state.lock().wait_idle_calls
    }

    /// Number of descriptor buffer writes.
    pub fn descriptor_write_count(&self) -> usize {
        self.state.lock().descriptor_writes
    }

    /// Host copy of a dummy buffer's contents.
    pub fn read_buffer(&self, buffer: &GpuBuffer) -> Vec<u8> {
        match buffer {
            GpuBuffer::Dummy { contents, .. } => contents.lock().clone(),
            #[cfg(feature = "vulkan-backend")]
            _ => Vec::new(),
        }
    }

    fn apply_queries(state: &mut DummyState, commands: &[RecordedCommand]) {
        for command in commands {
            match command {
                RecordedCommand::ResetQueries { pool, first, count } => {
                    if let Some(results) = state.query_results.get_mut(pool) {
                        let start = (*first as usize).min(results.len());
                        let end = (*first as usize + *count as usize).min(results.len());
                        results[start..end].iter_mut().for_each(|r| *r = None);
                    }
                }
                RecordedCommand::WriteTimestamp { pool, query } => {
                    state.timestamp_clock += 1_000;
                    let now = state.timestamp_clock;
                    if let Some(slot) = state
                        .query_results
                        .get_mut(pool)
                        .and_then(|results| results.get_mut(*query as usize))
                    {
                        *slot = Some(now);
                    }
                }
                _ => {}
            }
        }
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            timestamps: self.timestamps,
            timestamp_period_ns: 1.0,
        }
    }

    fn create_texture(
        &self,
        desc: &TextureDesc,
        extent: Extent2d,
    ) -> Result<GpuImage, GraphicsError> {
        if extent.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture '{}' has an empty extent",
                desc.name
            )));
        }
        log::trace!(
            "DummyBackend: creating texture '{}' ({}x{}, {:?})",
            desc.name,
            extent.width,
            extent.height,
            desc.format
        );
        self.state.lock().created.textures += 1;
        Ok(GpuImage::Dummy {
            id: next_id(),
            extent,
            format: desc.format,
            swapchain_index: None,
        })
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<GpuBuffer, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer '{}' (size: {})",
            desc.name,
            desc.size
        );
        self.state.lock().created.buffers += 1;
        Ok(GpuBuffer::Dummy {
            id: next_id(),
            size: desc.size,
            contents: Mutex::new(vec![0; desc.size as usize]),
        })
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        match buffer {
            GpuBuffer::Dummy { contents, size, .. } => {
                let end = offset + data.len() as u64;
                if end > *size {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "write of {} bytes at offset {} overflows buffer of {} bytes",
                        data.len(),
                        offset,
                        size
                    )));
                }
                contents.lock()[offset as usize..end as usize].copy_from_slice(data);
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            _ => Err(GraphicsError::InvalidParameter(
                "buffer belongs to another backend".into(),
            )),
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<GpuRenderPass, GraphicsError> {
        log::trace!("DummyBackend: creating render pass '{}'", desc.name);
        self.state.lock().created.render_passes += 1;
        Ok(GpuRenderPass::Dummy { id: next_id() })
    }

    fn create_framebuffer(
        &self,
        _render_pass: &GpuRenderPass,
        attachments: &[&GpuImage],
        extent: Extent2d,
        _layers: u32,
    ) -> Result<GpuFramebuffer, GraphicsError> {
        if let Some(small) = attachments.iter().find(|image| {
            let size = image.extent();
            size.width < extent.width || size.height < extent.height
        }) {
            return Err(GraphicsError::InvalidParameter(format!(
                "framebuffer of {:?} has a smaller attachment {:?}",
                extent,
                small.extent()
            )));
        }
        self.state.lock().created.framebuffers += 1;
        Ok(GpuFramebuffer::Dummy { id: next_id() })
    }

    fn create_shader_module(
        &self,
        name: &str,
        code: &[u32],
    ) -> Result<GpuShaderModule, GraphicsError> {
        log::trace!(
            "DummyBackend: creating shader module '{}' ({} words)",
            name,
            code.len()
        );
        self.state.lock().created.shader_modules += 1;
        Ok(GpuShaderModule::Dummy { id: next_id() })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
        stages: &[(&ShaderStageDesc, &GpuShaderModule)],
        target: &RenderPassDesc,
    ) -> Result<GpuPipeline, GraphicsError> {
        if stages.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "pipeline '{}' has no shader stages",
                desc.name
            )));
        }
        log::trace!(
            "DummyBackend: creating pipeline '{}' for {} color attachments",
            desc.name,
            target.color_attachments.len()
        );
        self.state.lock().created.pipelines += 1;
        Ok(GpuPipeline::Dummy { id: next_id() })
    }

    fn create_descriptor_pool(
        &self,
        sizes: &DescriptorPoolSizes,
    ) -> Result<GpuDescriptorPool, GraphicsError> {
        if self.fail_descriptor_pool {
            return Err(GraphicsError::OutOfMemory);
        }
        log::trace!("DummyBackend: creating descriptor pool ({} sets)", sizes.max_sets);
        Ok(GpuDescriptorPool::Dummy { id: next_id() })
    }

    fn allocate_descriptor_set(
        &self,
        _pool: &GpuDescriptorPool,
        _pipeline: &GpuPipeline,
        _set: u32,
    ) -> Result<GpuDescriptorSet, GraphicsError> {
        Ok(GpuDescriptorSet::Dummy { id: next_id() })
    }

    fn write_descriptor_buffer(
        &self,
        _set: &GpuDescriptorSet,
        _binding: u32,
        _ty: DescriptorType,
        buffer: &GpuBuffer,
        offset: u64,
        range: u64,
    ) -> Result<(), GraphicsError> {
        if offset + range > buffer.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "descriptor range {}..{} exceeds buffer of {} bytes",
                offset,
                offset + range,
                buffer.size()
            )));
        }
        self.state.lock().descriptor_writes += 1;
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Dummy {
            id: next_id(),
            signaled: Arc::new(AtomicBool::new(signaled)),
        })
    }

    fn wait_fence(
        &self,
        fence: &GpuFence,
        timeout: Option<Duration>,
    ) -> Result<bool, GraphicsError> {
        let (id, signaled) = match fence {
            GpuFence::Dummy { id, signaled } => (id, signaled),
            #[cfg(feature = "vulkan-backend")]
            _ => {
                return Err(GraphicsError::InvalidParameter(
                    "fence belongs to another backend".into(),
                ));
            }
        };

        let blocked = !signaled.load(Ordering::Acquire);
        let start = Instant::now();
        while !signaled.load(Ordering::Acquire) {
            if timeout.is_some_and(|t| start.elapsed() >= t) {
                break;
            }
            std::thread::yield_now();
        }
        let done = signaled.load(Ordering::Acquire);

        self.state.lock().fence_waits.push(FenceWaitRecord {
            fence: *id,
            blocked,
            signaled: done,
        });
        Ok(done)
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, GraphicsError> {
        match fence {
            GpuFence::Dummy { signaled, .. } => Ok(signaled.load(Ordering::Acquire)),
            #[cfg(feature = "vulkan-backend")]
            _ => Ok(false),
        }
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        if let GpuFence::Dummy { signaled, .. } = fence {
            signaled.store(false, Ordering::Release);
        }
        Ok(())
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        Ok(GpuSemaphore::Dummy { id: next_id() })
    }

    fn create_command_pool(&self) -> Result<GpuCommandPool, GraphicsError> {
        Ok(GpuCommandPool::Dummy { id: next_id() })
    }

    fn reset_command_pool(&self, _pool: &GpuCommandPool) -> Result<(), GraphicsError> {
        self.state.lock().pool_resets += 1;
        Ok(())
    }

    fn allocate_command_buffers(
        &self,
        _pool: &GpuCommandPool,
        _level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<GpuCommandBuffer>, GraphicsError> {
        Ok((0..count)
            .map(|_| GpuCommandBuffer::Dummy {
                id: next_id(),
                commands: Vec::new(),
            })
            .collect())
    }

    fn create_query_pool(&self, count: u32) -> Result<GpuQueryPool, GraphicsError> {
        let id = next_id();
        self.state
            .lock()
            .query_results
            .insert(id, vec![None; count as usize]);
        Ok(GpuQueryPool::Dummy { id, count })
    }

    fn read_timestamps(
        &self,
        pool: &GpuQueryPool,
        first: u32,
        count: u32,
    ) -> Result<Option<Vec<u64>>, GraphicsError> {
        let id = pool.dummy_id();
        let state = self.state.lock();
        let Some(results) = state.query_results.get(&id) else {
            return Err(GraphicsError::InvalidParameter(format!(
                "unknown query pool {}",
                id
            )));
        };
        let end = first as usize + count as usize;
        if end > results.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "query range {}..{} exceeds pool of {}",
                first,
                end,
                results.len()
            )));
        }
        Ok(results[first as usize..end].iter().copied().collect())
    }

    fn submit(&self, submission: &Submission<'_>) -> Result<(), GraphicsError> {
        let mut commands = Vec::new();
        for buffer in &submission.command_buffers {
            let (id, recorded) = match buffer {
                GpuCommandBuffer::Dummy { id, commands } => (id, commands),
                #[cfg(feature = "vulkan-backend")]
                _ => {
                    return Err(GraphicsError::InvalidParameter(
                        "command buffer belongs to another backend".into(),
                    ));
                }
            };
            if recorded.last() != Some(&RecordedCommand::End) {
                return Err(GraphicsError::Internal(format!(
                    "command buffer {} submitted while still recording",
                    id
                )));
            }
            commands.extend(recorded.iter().cloned());
        }

        let mut state = self.state.lock();
        Self::apply_queries(&mut state, &commands);

        let fence = match submission.fence {
            Some(GpuFence::Dummy { id, signaled }) => {
                if self.manual_fences {
                    state.pending.push_back(Arc::clone(signaled));
                } else {
                    signaled.store(true, Ordering::Release);
                }
                Some(*id)
            }
            #[cfg(feature = "vulkan-backend")]
            Some(_) => None,
            None => None,
        };

        state.submissions.push(SubmissionRecord {
            commands,
            wait_semaphores: submission
                .wait_semaphores
                .iter()
                .map(|(s, _)| s.dummy_id())
                .collect(),
            signal_semaphores: submission
                .signal_semaphores
                .iter()
                .map(|s| s.dummy_id())
                .collect(),
            fence,
        });
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        state.wait_idle_calls += 1;
        for fence in state.pending.drain(..) {
            fence.store(true, Ordering::Release);
        }
        Ok(())
    }
}

// ============================================================================
// Swapchain
// ============================================================================

/// Outcome injected into the next acquire or present of a [`DummySwapchain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Report an out-of-date swapchain.
    OutOfDate,
    /// Succeed but report suboptimal.
    Suboptimal,
    /// Report a lost surface.
    Lost,
}

struct DummySwapchainState {
    extent: Extent2d,
    format: TextureFormat,
    image_count: u32,
    next_image: u32,
    pending_extent: Option<Extent2d>,
    acquire_script: VecDeque<ScriptedOutcome>,
    present_script: VecDeque<ScriptedOutcome>,
    presented: Vec<u32>,
    recreations: u32,
}

/// In-memory swapchain for the dummy backend.
///
/// Clones share state, so a test can keep a clone to script failures and
/// inspect presents after handing the swapchain to a frame executor.
#[derive(Clone)]
pub struct DummySwapchain {
    state: Arc<Mutex<DummySwapchainState>>,
}

impl std::fmt::Debug for DummySwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DummySwapchain")
            .field("extent", &state.extent)
            .field("format", &state.format)
            .field("image_count", &state.image_count)
            .finish_non_exhaustive()
    }
}

impl DummySwapchain {
    /// Create a swapchain of `image_count` images.
    pub fn new(extent: Extent2d, image_count: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(DummySwapchainState {
                extent,
                format: TextureFormat::Bgra8UnormSrgb,
                image_count: image_count.max(1),
                next_image: 0,
                pending_extent: None,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                presented: Vec::new(),
                recreations: 0,
            })),
        }
    }

    /// Set the image format.
    pub fn with_format(self, format: TextureFormat) -> Self {
        self.state.lock().format = format;
        self
    }

    /// Simulate a window resize: the next acquire reports out-of-date and
    /// recreation picks up `extent`.
    pub fn resize(&self, extent: Extent2d) {
        let mut state = self.state.lock();
        state.pending_extent = Some(extent);
        state.acquire_script.push_front(ScriptedOutcome::OutOfDate);
    }

    /// Queue an outcome for a future acquire.
    pub fn script_acquire(&self, outcome: ScriptedOutcome) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    /// Queue an outcome for a future present.
    pub fn script_present(&self, outcome: ScriptedOutcome) {
        self.state.lock().present_script.push_back(outcome);
    }

    /// Image indices presented so far.
    pub fn presented(&self) -> Vec<u32> {
        self.state.lock().presented.clone()
    }

    /// Number of recreations so far.
    pub fn recreation_count(&self) -> u32 {
        self.state.lock().recreations
    }
}

impl Swapchain for DummySwapchain {
    fn extent(&self) -> Extent2d {
        self.state.lock().extent
    }

    fn format(&self) -> TextureFormat {
        self.state.lock().format
    }

    fn image_count(&self) -> u32 {
        self.state.lock().image_count
    }

    fn wrap_image(&self, index: u32) -> Result<GpuImage, GraphicsError> {
        let state = self.state.lock();
        if index >= state.image_count {
            return Err(GraphicsError::InvalidParameter(format!(
                "swapchain image {} out of range ({} images)",
                index, state.image_count
            )));
        }
        Ok(GpuImage::Dummy {
            id: next_id(),
            extent: state.extent,
            format: state.format,
            swapchain_index: Some(index),
        })
    }

    fn acquire_next_image(
        &mut self,
        _signal: &GpuSemaphore,
    ) -> Result<AcquiredImage, GraphicsError> {
        let mut state = self.state.lock();
        let suboptimal = match state.acquire_script.pop_front() {
            Some(ScriptedOutcome::OutOfDate) => return Err(GraphicsError::SurfaceOutdated),
            Some(ScriptedOutcome::Lost) => return Err(GraphicsError::SurfaceLost),
            Some(ScriptedOutcome::Suboptimal) => true,
            None => false,
        };
        let index = state.next_image;
        state.next_image = (index + 1) % state.image_count;
        Ok(AcquiredImage { index, suboptimal })
    }

    fn present(&mut self, index: u32, _wait: &GpuSemaphore) -> Result<PresentStatus, GraphicsError> {
        let mut state = self.state.lock();
        state.presented.push(index);
        match state.present_script.pop_front() {
            Some(ScriptedOutcome::OutOfDate) => Err(GraphicsError::SurfaceOutdated),
            Some(ScriptedOutcome::Lost) => Err(GraphicsError::SurfaceLost),
            Some(ScriptedOutcome::Suboptimal) => Ok(PresentStatus::Suboptimal),
            None => Ok(PresentStatus::Optimal),
        }
    }

    fn surface_extent(&self) -> Result<Extent2d, GraphicsError> {
        let state = self.state.lock();
        Ok(state.pending_extent.unwrap_or(state.extent))
    }

    fn recreate(&mut self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.pending_extent.is_some_and(|e| e.is_empty()) {
            return Err(GraphicsError::InvalidParameter(
                "surface dimensions cannot be zero".to_string(),
            ));
        }
        if let Some(extent) = state.pending_extent.take() {
            state.extent = extent;
        }
        state.next_image = 0;
        state.recreations += 1;
        log::debug!(
            "DummySwapchain: recreated at {}x{}",
            state.extent.width,
            state.extent.height
        );
        Ok(())
    }
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);
static_assertions::assert_impl_all!(DummySwapchain: Send, Sync);
