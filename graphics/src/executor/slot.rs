//! Resources owned by one frame-in-flight slot.

use std::sync::Arc;

use crate::backend::{
    CommandBuffer, CommandBufferLevel, GpuBackend, GpuCommandPool, GpuFence, GpuQueryPool,
    GpuSemaphore,
};
use crate::error::GraphicsError;
use crate::frame_data::FrameBuffers;
use crate::profiling::{PassProfilingData, RenderGraphFrameProfilingData, ticks_to_ms};

use super::ExecutorConfig;

/// Where a slot is in its per-frame sequence.
///
/// A slot moves through every state once per frame, in declaration order,
/// and rests in [`Idle`](Self::Idle) while the GPU works on its submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SlotState {
    /// Not being recorded.
    #[default]
    Idle,
    /// Waiting for the slot's previous submission.
    FenceWait,
    /// Resetting the command pool.
    Reset,
    /// Acquiring a swapchain image.
    Acquire,
    /// Recompiling dirty passes.
    Recompile,
    /// Recording the primary and secondary buffers.
    Record,
    /// Submitting to the queue.
    Submit,
    /// Queueing the image for presentation.
    Present,
}

/// Telemetry of one pass, waiting for its timestamps.
#[derive(Debug, Clone)]
pub(crate) struct PendingPass {
    pub(crate) name: String,
    pub(crate) cpu_ms: f64,
    pub(crate) draw_calls: u32,
    /// First query of the pass, relative to the slot's slice.
    pub(crate) first_query: u32,
    pub(crate) executions: u32,
}

/// Telemetry of one submitted frame, waiting for its fence.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingProfile {
    pub(crate) frame_index: u64,
    pub(crate) cpu_frame_ms: f64,
    pub(crate) passes: Vec<PendingPass>,
    /// Queries written, relative to the slot's slice. Zero without timestamps.
    pub(crate) queries_used: u32,
}

impl PendingProfile {
    /// Combine CPU measurements with the slot's timestamps.
    ///
    /// `stamps` holds `queries_used` values starting at the slot's first
    /// query: frame begin, frame end, then a begin/end pair per execution.
    pub(crate) fn resolve(
        self,
        stamps: Option<&[u64]>,
        period_ns: f32,
    ) -> RenderGraphFrameProfilingData {
        let pair = |first: u32| {
            stamps.and_then(|s| {
                let begin = *s.get(first as usize)?;
                let end = *s.get(first as usize + 1)?;
                Some(ticks_to_ms(begin, end, period_ns))
            })
        };

        let passes: Vec<PassProfilingData> = self
            .passes
            .into_iter()
            .map(|pass| {
                let gpu_ms = if pass.executions == 0 {
                    stamps.map(|_| 0.0)
                } else {
                    (0..pass.executions)
                        .map(|i| pair(pass.first_query + 2 * i))
                        .sum::<Option<f64>>()
                };
                PassProfilingData {
                    name: pass.name,
                    cpu_ms: pass.cpu_ms,
                    gpu_ms,
                    draw_calls: pass.draw_calls,
                    executions: pass.executions,
                }
            })
            .collect();

        RenderGraphFrameProfilingData {
            frame_index: self.frame_index,
            cpu_frame_ms: self.cpu_frame_ms,
            gpu_frame_ms: pair(0),
            total_draw_calls: passes.iter().map(|p| p.draw_calls).sum(),
            passes,
        }
    }
}

/// Synchronization, command and buffer resources of one frame in flight.
#[derive(Debug)]
pub(crate) struct FrameSlot {
    pub(crate) index: usize,
    pub(crate) state: SlotState,
    pub(crate) fence: GpuFence,
    pub(crate) image_available: GpuSemaphore,
    pub(crate) render_finished: GpuSemaphore,
    pub(crate) command_pool: GpuCommandPool,
    pub(crate) primary: CommandBuffer,
    pub(crate) secondaries: Vec<CommandBuffer>,
    pub(crate) frame_buffers: FrameBuffers,
    /// First query of the slot's slice of the shared timestamp pool.
    pub(crate) first_query: u32,
    /// Upload semaphores the last submission waited on, held until its fence signals.
    pub(crate) uploads_in_flight: Vec<Arc<GpuSemaphore>>,
    pub(crate) pending_profile: Option<PendingProfile>,
    /// An image was acquired with `image_available` but never submitted.
    pub(crate) acquire_abandoned: bool,
}

impl FrameSlot {
    /// Create the slot's resources. Any failure is fatal for the executor.
    pub(crate) fn new(
        backend: &dyn GpuBackend,
        index: usize,
        config: &ExecutorConfig,
        queries_per_slot: u32,
    ) -> Result<Self, GraphicsError> {
        // Signaled so the first wait on the slot returns immediately.
        let fence = backend.create_fence(true)?;
        let image_available = backend.create_semaphore()?;
        let render_finished = backend.create_semaphore()?;
        let command_pool = backend.create_command_pool()?;

        let primary = backend
            .allocate_command_buffers(&command_pool, CommandBufferLevel::Primary, 1)?
            .pop()
            .map(|raw| CommandBuffer::new(raw, CommandBufferLevel::Primary))
            .ok_or_else(|| {
                GraphicsError::ResourceCreationFailed(format!(
                    "no primary command buffer allocated for frame slot {}",
                    index
                ))
            })?;
        let secondaries = backend
            .allocate_command_buffers(
                &command_pool,
                CommandBufferLevel::Secondary,
                config.secondary_buffers_per_frame,
            )?
            .into_iter()
            .map(|raw| CommandBuffer::new(raw, CommandBufferLevel::Secondary))
            .collect();

        let frame_buffers = FrameBuffers::new(backend, index, config.frame_limits())?;

        log::debug!(
            "Created frame slot {} ({} secondary buffers)",
            index,
            config.secondary_buffers_per_frame
        );

        Ok(Self {
            index,
            state: SlotState::Idle,
            fence,
            image_available,
            render_finished,
            command_pool,
            primary,
            secondaries,
            frame_buffers,
            first_query: index as u32 * queries_per_slot,
            uploads_in_flight: Vec::new(),
            pending_profile: None,
            acquire_abandoned: false,
        })
    }

    /// Turn the previous submission's telemetry into a snapshot.
    ///
    /// Must only run after the slot's fence has signaled.
    pub(crate) fn take_profile(
        &mut self,
        backend: &dyn GpuBackend,
        queries: Option<&GpuQueryPool>,
        period_ns: f32,
    ) -> Option<RenderGraphFrameProfilingData> {
        let pending = self.pending_profile.take()?;
        let stamps = match queries {
            Some(pool) if pending.queries_used > 0 => {
                match backend.read_timestamps(pool, self.first_query, pending.queries_used) {
                    Ok(stamps) => stamps,
                    Err(e) => {
                        log::warn!("Failed to read timestamps of slot {}: {}", self.index, e);
                        None
                    }
                }
            }
            _ => None,
        };
        Some(pending.resolve(stamps.as_deref(), period_ns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingProfile {
        PendingProfile {
            frame_index: 4,
            cpu_frame_ms: 1.5,
            passes: vec![
                PendingPass {
                    name: "shadow".into(),
                    cpu_ms: 0.25,
                    draw_calls: 3,
                    first_query: 2,
                    executions: 2,
                },
                PendingPass {
                    name: "lighting".into(),
                    cpu_ms: 0.5,
                    draw_calls: 1,
                    first_query: 6,
                    executions: 1,
                },
            ],
            queries_used: 8,
        }
    }

    #[test]
    fn test_resolve_with_timestamps() {
        let stamps = [0, 9_000_000, 1_000_000, 2_000_000, 3_000_000, 5_000_000, 6_000_000, 8_000_000];
        let data = pending().resolve(Some(&stamps), 1.0);

        assert_eq!(data.frame_index, 4);
        assert_eq!(data.gpu_frame_ms, Some(9.0));
        assert_eq!(data.total_draw_calls, 4);
        assert_eq!(data.pass("shadow").and_then(|p| p.gpu_ms), Some(3.0));
        assert_eq!(data.pass("lighting").and_then(|p| p.gpu_ms), Some(2.0));
        assert_eq!(data.pass("shadow").map(|p| p.executions), Some(2));
    }

    #[test]
    fn test_resolve_without_timestamps() {
        let data = pending().resolve(None, 1.0);
        assert_eq!(data.gpu_frame_ms, None);
        assert!(data.passes.iter().all(|p| p.gpu_ms.is_none()));
        assert_eq!(data.pass("lighting").map(|p| p.cpu_ms), Some(0.5));
    }

    #[test]
    fn test_slot_queries_are_disjoint() {
        let backend = crate::backend::DummyBackend::new();
        let config = ExecutorConfig::default();
        let a = FrameSlot::new(&backend, 0, &config, 10).unwrap();
        let b = FrameSlot::new(&backend, 1, &config, 10).unwrap();

        assert_eq!(a.first_query, 0);
        assert_eq!(b.first_query, 10);
        assert_eq!(a.secondaries.len(), config.secondary_buffers_per_frame as usize);
        assert!(backend.is_fence_signaled(&a.fence).unwrap());
    }
}
