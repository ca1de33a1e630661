//! Command buffer recording.
//!
//! [`CommandBuffer`] is the only recording surface passes see. Methods that
//! shape the frame (begin/end, rendering scopes, barriers, timestamps) are
//! crate-private and driven by the frame executor; passes only bind state and
//! draw inside the secondary buffer they are handed.

use std::fmt;

use super::dummy::{DummyId, RecordedCommand};
use super::{GpuBuffer, GpuDescriptorSet, GpuImage, GpuPipeline, GpuQueryPool};
use crate::error::GraphicsError;
use crate::graph::barrier::ImageBarrier;
use crate::types::{
    ClearValue, ImageLayout, IndexFormat, LoadOp, PipelineStages, Rect2d, ShaderStages, StoreOp,
    TextureFormat, Viewport,
};

#[cfg(feature = "vulkan-backend")]
use super::vulkan::command as vk_cmd;
#[cfg(feature = "vulkan-backend")]
use ash::vk;

/// Primary or secondary command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    /// Submitted to a queue.
    Primary,
    /// Executed from a primary buffer inside a rendering scope.
    Secondary,
}

/// Backend command buffer handle.
pub enum GpuCommandBuffer {
    /// Dummy backend buffer; commands are recorded into a list.
    Dummy {
        /// Unique id.
        id: u64,
        /// Commands recorded since the last begin.
        commands: Vec<RecordedCommand>,
    },
    /// Vulkan backend buffer. Freed together with its pool.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        dynamic_rendering: ash::khr::dynamic_rendering::Device,
        buffer: vk::CommandBuffer,
    },
}

impl fmt::Debug for GpuCommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { id, commands } => f
                .debug_struct("GpuCommandBuffer::Dummy")
                .field("id", id)
                .field("commands", &commands.len())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, .. } => f
                .debug_struct("GpuCommandBuffer::Vulkan")
                .field("buffer", buffer)
                .finish_non_exhaustive(),
        }
    }
}

/// An image attachment of a rendering scope.
#[derive(Debug, Clone, Copy)]
pub struct RenderingAttachment<'a> {
    /// Attachment image.
    pub image: &'a GpuImage,
    /// Layout the image is in during the scope.
    pub layout: ImageLayout,
    /// Load behavior.
    pub load_op: LoadOp,
    /// Store behavior.
    pub store_op: StoreOp,
    /// Clear value used with [`LoadOp::Clear`].
    pub clear: ClearValue,
}

/// Parameters of a rendering scope.
#[derive(Debug, Clone)]
pub struct RenderingInfo<'a> {
    /// Render area.
    pub area: Rect2d,
    /// Number of layers rendered.
    pub layers: u32,
    /// Color attachments.
    pub colors: Vec<RenderingAttachment<'a>>,
    /// Depth attachment.
    pub depth: Option<RenderingAttachment<'a>>,
}

/// Attachment formats a secondary buffer inherits from its rendering scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderingFormats {
    /// Color attachment formats.
    pub colors: Vec<TextureFormat>,
    /// Depth attachment format.
    pub depth: Option<TextureFormat>,
    /// Sample count.
    pub samples: u32,
}

/// An [`ImageBarrier`] with its handle resolved to an image.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedBarrier<'a> {
    /// Image to transition.
    pub image: &'a GpuImage,
    /// Transition.
    pub barrier: ImageBarrier,
}

/// A command buffer being recorded.
#[derive(Debug)]
pub struct CommandBuffer {
    raw: GpuCommandBuffer,
    level: CommandBufferLevel,
    draw_calls: u32,
}

impl CommandBuffer {
    pub(crate) fn new(raw: GpuCommandBuffer, level: CommandBufferLevel) -> Self {
        Self {
            raw,
            level,
            draw_calls: 0,
        }
    }

    /// Primary or secondary.
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// Draw calls recorded since the last begin.
    pub fn draw_call_count(&self) -> u32 {
        self.draw_calls
    }

    /// The backend handle.
    pub fn raw(&self) -> &GpuCommandBuffer {
        &self.raw
    }

    // ------------------------------------------------------------------
    // Frame structure (executor only)
    // ------------------------------------------------------------------

    /// Begin a one-time-submit primary buffer.
    pub(crate) fn begin(&mut self) -> Result<(), GraphicsError> {
        self.draw_calls = 0;
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                commands.clear();
                commands.push(RecordedCommand::Begin {
                    level: CommandBufferLevel::Primary,
                });
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => vk_cmd::begin_primary(device, *buffer),
        }
    }

    /// Begin a secondary buffer that continues a rendering scope.
    pub(crate) fn begin_secondary(&mut self, formats: &RenderingFormats) -> Result<(), GraphicsError> {
        self.draw_calls = 0;
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                commands.clear();
                commands.push(RecordedCommand::Begin {
                    level: CommandBufferLevel::Secondary,
                });
                let _ = formats;
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => {
                vk_cmd::begin_secondary(device, *buffer, formats)
            }
        }
    }

    /// Finish recording.
    pub(crate) fn end(&mut self) -> Result<(), GraphicsError> {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                commands.push(RecordedCommand::End);
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => unsafe {
                device.end_command_buffer(*buffer).map_err(|e| {
                    GraphicsError::Internal(format!("Failed to end command buffer: {:?}", e))
                })
            },
        }
    }

    /// Record a batch of image layout transitions.
    pub(crate) fn pipeline_barrier(&mut self, barriers: &[ResolvedBarrier<'_>]) {
        if barriers.is_empty() {
            return;
        }
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                commands.extend(barriers.iter().map(|b| RecordedCommand::Barrier {
                    image: b.image.dummy_id(),
                    old_layout: b.barrier.old_layout,
                    new_layout: b.barrier.new_layout,
                }));
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => {
                vk_cmd::pipeline_barrier(device, *buffer, barriers)
            }
        }
    }

    /// Open a rendering scope whose contents come from secondary buffers.
    pub(crate) fn begin_rendering(&mut self, info: &RenderingInfo<'_>) {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                commands.push(RecordedCommand::BeginRendering {
                    area: info.area,
                    color_images: info.colors.iter().map(|c| c.image.dummy_id()).collect(),
                    depth_image: info.depth.as_ref().map(|d| d.image.dummy_id()),
                });
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan {
                dynamic_rendering,
                buffer,
                ..
            } => vk_cmd::begin_rendering(dynamic_rendering, *buffer, info),
        }
    }

    /// Close the current rendering scope.
    pub(crate) fn end_rendering(&mut self) {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => commands.push(RecordedCommand::EndRendering),
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan {
                dynamic_rendering,
                buffer,
                ..
            } => unsafe { dynamic_rendering.cmd_end_rendering(*buffer) },
        }
    }

    /// Execute a recorded secondary buffer.
    pub(crate) fn execute_commands(&mut self, secondary: &CommandBuffer) {
        self.draw_calls += secondary.draw_calls;
        match (&mut self.raw, &secondary.raw) {
            (
                GpuCommandBuffer::Dummy { commands, .. },
                GpuCommandBuffer::Dummy {
                    id,
                    commands: recorded,
                },
            ) => {
                // Inline the secondary so tests can inspect one flat stream.
                commands.push(RecordedCommand::ExecuteCommands { secondary: *id });
                commands.extend(
                    recorded
                        .iter()
                        .filter(|c| !matches!(c, RecordedCommand::Begin { .. } | RecordedCommand::End))
                        .cloned(),
                );
            }
            #[cfg(feature = "vulkan-backend")]
            (
                GpuCommandBuffer::Vulkan { device, buffer, .. },
                GpuCommandBuffer::Vulkan {
                    buffer: secondary, ..
                },
            ) => unsafe { device.cmd_execute_commands(*buffer, &[*secondary]) },
            #[allow(unreachable_patterns)]
            _ => log::error!("Cannot execute a secondary buffer from another backend"),
        }
    }

    /// Reset a range of timestamp queries.
    pub(crate) fn reset_queries(&mut self, pool: &GpuQueryPool, first: u32, count: u32) {
        match (&mut self.raw, pool) {
            (GpuCommandBuffer::Dummy { commands, .. }, GpuQueryPool::Dummy { id, .. }) => {
                commands.push(RecordedCommand::ResetQueries {
                    pool: *id,
                    first,
                    count,
                });
            }
            #[cfg(feature = "vulkan-backend")]
            (GpuCommandBuffer::Vulkan { device, buffer, .. }, GpuQueryPool::Vulkan { pool, .. }) => unsafe {
                device.cmd_reset_query_pool(*buffer, *pool, first, count)
            },
            #[allow(unreachable_patterns)]
            _ => log::error!("Query pool belongs to another backend"),
        }
    }

    /// Write a timestamp once `stage` completes.
    pub(crate) fn write_timestamp(&mut self, pool: &GpuQueryPool, query: u32, stage: PipelineStages) {
        match (&mut self.raw, pool) {
            (GpuCommandBuffer::Dummy { commands, .. }, GpuQueryPool::Dummy { id, .. }) => {
                commands.push(RecordedCommand::WriteTimestamp { pool: *id, query });
            }
            #[cfg(feature = "vulkan-backend")]
            (GpuCommandBuffer::Vulkan { device, buffer, .. }, GpuQueryPool::Vulkan { pool, .. }) => unsafe {
                device.cmd_write_timestamp(
                    *buffer,
                    vk::PipelineStageFlags::from_raw(stage.bits()),
                    *pool,
                    query,
                )
            },
            #[allow(unreachable_patterns)]
            _ => {
                let _ = stage;
                log::error!("Query pool belongs to another backend");
            }
        }
    }

    // ------------------------------------------------------------------
    // Pass recording
    // ------------------------------------------------------------------

    /// Bind a graphics pipeline.
    pub fn bind_pipeline(&mut self, pipeline: &GpuPipeline) {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => commands.push(RecordedCommand::BindPipeline {
                pipeline: pipeline.dummy_id(),
            }),
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => {
                if let GpuPipeline::Vulkan { pipeline, .. } = pipeline {
                    unsafe {
                        device.cmd_bind_pipeline(*buffer, vk::PipelineBindPoint::GRAPHICS, *pipeline)
                    }
                }
            }
        }
    }

    /// Set the viewport.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                commands.push(RecordedCommand::SetViewport(viewport))
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => unsafe {
                device.cmd_set_viewport(
                    *buffer,
                    0,
                    &[vk::Viewport {
                        x: viewport.x,
                        y: viewport.y,
                        width: viewport.width,
                        height: viewport.height,
                        min_depth: viewport.min_depth,
                        max_depth: viewport.max_depth,
                    }],
                )
            },
        }
    }

    /// Set the scissor rectangle.
    pub fn set_scissor(&mut self, scissor: Rect2d) {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                commands.push(RecordedCommand::SetScissor(scissor))
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => unsafe {
                device.cmd_set_scissor(*buffer, 0, &[vk_cmd::rect(scissor)])
            },
        }
    }

    /// Bind vertex buffers starting at `first_binding`.
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(&GpuBuffer, u64)]) {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                commands.push(RecordedCommand::BindVertexBuffers {
                    first_binding,
                    buffers: buffers.iter().map(|(b, _)| b.dummy_id()).collect(),
                })
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => {
                let (handles, offsets): (Vec<vk::Buffer>, Vec<u64>) = buffers
                    .iter()
                    .filter_map(|(b, offset)| match b {
                        GpuBuffer::Vulkan { buffer, .. } => Some((*buffer, *offset)),
                        _ => None,
                    })
                    .unzip();
                unsafe { device.cmd_bind_vertex_buffers(*buffer, first_binding, &handles, &offsets) }
            }
        }
    }

    /// Bind an index buffer.
    pub fn bind_index_buffer(&mut self, index_buffer: &GpuBuffer, offset: u64, format: IndexFormat) {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                commands.push(RecordedCommand::BindIndexBuffer {
                    buffer: index_buffer.dummy_id(),
                    format,
                })
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => {
                if let GpuBuffer::Vulkan { buffer: handle, .. } = index_buffer {
                    let index_type = match format {
                        IndexFormat::Uint16 => vk::IndexType::UINT16,
                        IndexFormat::Uint32 => vk::IndexType::UINT32,
                    };
                    unsafe { device.cmd_bind_index_buffer(*buffer, *handle, offset, index_type) }
                }
            }
        }
        #[cfg(not(feature = "vulkan-backend"))]
        let _ = offset;
    }

    /// Bind a descriptor set at `set_index` of `pipeline`'s layout.
    pub fn bind_descriptor_set(
        &mut self,
        pipeline: &GpuPipeline,
        set_index: u32,
        set: &GpuDescriptorSet,
    ) {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                let _ = pipeline;
                commands.push(RecordedCommand::BindDescriptorSet {
                    set_index,
                    set: set.dummy_id(),
                })
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => {
                if let (GpuPipeline::Vulkan { layout, .. }, GpuDescriptorSet::Vulkan { set, .. }) =
                    (pipeline, set)
                {
                    unsafe {
                        device.cmd_bind_descriptor_sets(
                            *buffer,
                            vk::PipelineBindPoint::GRAPHICS,
                            *layout,
                            set_index,
                            &[*set],
                            &[],
                        )
                    }
                }
            }
        }
    }

    /// Update push constants.
    pub fn push_constants(
        &mut self,
        pipeline: &GpuPipeline,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                let _ = (pipeline, stages);
                commands.push(RecordedCommand::PushConstants {
                    offset,
                    size: data.len() as u32,
                })
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => {
                if let GpuPipeline::Vulkan { layout, .. } = pipeline {
                    unsafe {
                        device.cmd_push_constants(
                            *buffer,
                            *layout,
                            vk::ShaderStageFlags::from_raw(stages.bits()),
                            offset,
                            data,
                        )
                    }
                }
            }
        }
    }

    /// Draw non-indexed primitives.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.draw_calls += 1;
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                let _ = (first_vertex, first_instance);
                commands.push(RecordedCommand::Draw {
                    vertex_count,
                    instance_count,
                })
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => unsafe {
                device.cmd_draw(*buffer, vertex_count, instance_count, first_vertex, first_instance)
            },
        }
    }

    /// Draw indexed primitives.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.draw_calls += 1;
        match &mut self.raw {
            GpuCommandBuffer::Dummy { commands, .. } => {
                let _ = (first_index, vertex_offset, first_instance);
                commands.push(RecordedCommand::DrawIndexed {
                    index_count,
                    instance_count,
                })
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { device, buffer, .. } => unsafe {
                device.cmd_draw_indexed(
                    *buffer,
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                )
            },
        }
    }
}
