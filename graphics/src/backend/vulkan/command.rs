//! Vulkan command pool and buffer recording helpers.

use ash::vk;

use super::conversion::{
    convert_access, convert_aspect, convert_clear_value, convert_layout, convert_load_op,
    convert_samples, convert_stages, convert_store_op, convert_texture_format,
};
use crate::backend::{GpuImage, RenderingAttachment, RenderingFormats, RenderingInfo, ResolvedBarrier};
use crate::error::GraphicsError;
use crate::types::Rect2d;

/// Create a command pool for graphics operations.
///
/// Buffers are reset together through the pool once per frame.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::TRANSIENT);

    let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })?;

    Ok(pool)
}

/// Begin a one-time-submit primary buffer.
pub fn begin_primary(device: &ash::Device, buffer: vk::CommandBuffer) -> Result<(), GraphicsError> {
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(buffer, &begin_info) }
        .map_err(|e| GraphicsError::Internal(format!("Failed to begin command buffer: {:?}", e)))
}

/// Begin a secondary buffer continuing a dynamic rendering scope.
pub fn begin_secondary(
    device: &ash::Device,
    buffer: vk::CommandBuffer,
    formats: &RenderingFormats,
) -> Result<(), GraphicsError> {
    let color_formats: Vec<vk::Format> = formats
        .colors
        .iter()
        .map(|f| convert_texture_format(*f))
        .collect();
    let depth_format = formats
        .depth
        .map(convert_texture_format)
        .unwrap_or(vk::Format::UNDEFINED);
    let stencil_format = match formats.depth {
        Some(format) if format.has_stencil() => depth_format,
        _ => vk::Format::UNDEFINED,
    };

    let mut rendering = vk::CommandBufferInheritanceRenderingInfo::default()
        .flags(vk::RenderingFlags::empty())
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(depth_format)
        .stencil_attachment_format(stencil_format)
        .rasterization_samples(convert_samples(formats.samples));
    let inheritance = vk::CommandBufferInheritanceInfo::default().push_next(&mut rendering);

    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
                | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE,
        )
        .inheritance_info(&inheritance);

    unsafe { device.begin_command_buffer(buffer, &begin_info) }.map_err(|e| {
        GraphicsError::Internal(format!("Failed to begin secondary command buffer: {:?}", e))
    })
}

/// Record one pipeline barrier carrying every transition in `barriers`.
pub fn pipeline_barrier(
    device: &ash::Device,
    buffer: vk::CommandBuffer,
    barriers: &[ResolvedBarrier<'_>],
) {
    let mut src_stages = vk::PipelineStageFlags::empty();
    let mut dst_stages = vk::PipelineStageFlags::empty();
    let image_barriers: Vec<vk::ImageMemoryBarrier> = barriers
        .iter()
        .filter_map(|resolved| {
            let GpuImage::Vulkan { image, .. } = resolved.image else {
                return None;
            };
            let b = &resolved.barrier;
            src_stages |= convert_stages(b.src_stages);
            dst_stages |= convert_stages(b.dst_stages);
            Some(
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(convert_access(b.src_access))
                    .dst_access_mask(convert_access(b.dst_access))
                    .old_layout(convert_layout(b.old_layout))
                    .new_layout(convert_layout(b.new_layout))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(*image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: convert_aspect(b.aspect),
                        base_mip_level: 0,
                        level_count: b.level_count,
                        base_array_layer: 0,
                        layer_count: b.layer_count,
                    }),
            )
        })
        .collect();

    if image_barriers.is_empty() {
        return;
    }
    // An empty mask is invalid in either position.
    if src_stages.is_empty() {
        src_stages = vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    if dst_stages.is_empty() {
        dst_stages = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }

    unsafe {
        device.cmd_pipeline_barrier(
            buffer,
            src_stages,
            dst_stages,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &image_barriers,
        );
    }
}

fn attachment_info(attachment: &RenderingAttachment<'_>) -> Option<vk::RenderingAttachmentInfo<'static>> {
    let GpuImage::Vulkan { view, .. } = attachment.image else {
        return None;
    };
    Some(
        vk::RenderingAttachmentInfo::default()
            .image_view(*view)
            .image_layout(convert_layout(attachment.layout))
            .load_op(convert_load_op(attachment.load_op))
            .store_op(convert_store_op(attachment.store_op))
            .clear_value(convert_clear_value(attachment.clear)),
    )
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Open a dynamic rendering scope whose contents come from secondary buffers.
pub fn begin_rendering(
    dynamic_rendering: &ash::khr::dynamic_rendering::Device,
    buffer: vk::CommandBuffer,
    info: &RenderingInfo<'_>,
) {
    let colors: Vec<vk::RenderingAttachmentInfo> =
        info.colors.iter().filter_map(attachment_info).collect();
    let depth = info.depth.as_ref().and_then(attachment_info);
    let stencil = match info.depth.as_ref().map(|d| d.image) {
        Some(GpuImage::Vulkan { format, .. }) if has_stencil(*format) => depth,
        _ => None,
    };

    let mut rendering_info = vk::RenderingInfo::default()
        .flags(vk::RenderingFlags::CONTENTS_SECONDARY_COMMAND_BUFFERS)
        .render_area(rect(info.area))
        .layer_count(info.layers.max(1))
        .color_attachments(&colors);
    if let Some(depth) = depth.as_ref() {
        rendering_info = rendering_info.depth_attachment(depth);
    }
    if let Some(stencil) = stencil.as_ref() {
        rendering_info = rendering_info.stencil_attachment(stencil);
    }

    unsafe { dynamic_rendering.cmd_begin_rendering(buffer, &rendering_info) };
}

/// Convert a rectangle.
pub fn rect(rect: Rect2d) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: rect.x,
            y: rect.y,
        },
        extent: vk::Extent2D {
            width: rect.width,
            height: rect.height,
        },
    }
}
