//! Native Vulkan backend implementation using ash.
//!
//! The backend drives a device created by the application: instance, device
//! and queue bootstrap are not its concern. It requires
//! `VK_KHR_dynamic_rendering` (or Vulkan 1.3) to be enabled on the device,
//! because every rendering scope is recorded as dynamic rendering with its
//! contents in secondary command buffers.
//!
//! Memory comes from gpu-allocator. Every object handed out releases itself on
//! drop, so the caller must keep the device alive until the backend and all
//! objects it created are gone.

mod allocator;
pub(crate) mod command;
pub(crate) mod conversion;
pub mod swapchain;

use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::graph::descriptor::{
    AttachmentDesc, BufferDesc, GraphicsPipelineDesc, RenderPassDesc, ShaderStageDesc, TextureDesc,
};
use crate::profiling::profile_scope;
use crate::types::{DescriptorType, Extent2d, ImageAspect, ImageLayout};

use super::{
    CommandBufferLevel, DescriptorPoolSizes, DeviceCapabilities, GpuBackend, GpuBuffer,
    GpuCommandBuffer, GpuCommandPool, GpuDescriptorPool, GpuDescriptorSet, GpuFence,
    GpuFramebuffer, GpuImage, GpuPipeline, GpuQueryPool, GpuRenderPass, GpuSemaphore,
    GpuShaderModule, Submission,
};

use self::conversion::{
    convert_aspect, convert_blend_mode, convert_buffer_usage, convert_compare_op,
    convert_cull_mode, convert_descriptor_type, convert_layout, convert_load_op,
    convert_memory_location, convert_samples, convert_shader_stage, convert_shader_stages,
    convert_stages, convert_store_op, convert_texture_format, convert_texture_usage,
    convert_topology, convert_vertex_format,
};

pub use swapchain::{SwapchainConfig, VulkanSwapchain};

/// An application-created device the backend renders with.
#[derive(Clone)]
pub struct VulkanDeviceDesc {
    /// Instance the device was created from.
    pub instance: ash::Instance,
    /// Physical device behind `device`.
    pub physical_device: vk::PhysicalDevice,
    /// Logical device with dynamic rendering enabled.
    pub device: ash::Device,
    /// Graphics queue, also used for presentation.
    pub queue: vk::Queue,
    /// Family of `queue`.
    pub queue_family_index: u32,
}

/// Vulkan-based GPU backend using ash.
pub struct VulkanBackend {
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    /// Queue access must be externally synchronized.
    queue: Mutex<vk::Queue>,
    queue_family_index: u32,
    allocator: Arc<Mutex<Allocator>>,
    dynamic_rendering: ash::khr::dynamic_rendering::Device,
    capabilities: DeviceCapabilities,
}

static_assertions::assert_impl_all!(VulkanBackend: Send, Sync);

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("queue_family_index", &self.queue_family_index)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Error mapper for object creation calls.
fn creation_failed(what: &'static str) -> impl Fn(vk::Result) -> GraphicsError {
    move |e| match e {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        e => GraphicsError::ResourceCreationFailed(format!("Failed to create {}: {:?}", what, e)),
    }
}

/// Error mapper for calls made while running frames.
fn call_failed(what: &'static str) -> impl Fn(vk::Result) -> GraphicsError {
    move |e| match e {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        e => GraphicsError::Internal(format!("{} failed: {:?}", what, e)),
    }
}

fn foreign(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{} was not created by the Vulkan backend", what))
}

fn vk_fence(fence: &GpuFence) -> Result<vk::Fence, GraphicsError> {
    match fence {
        GpuFence::Vulkan { fence, .. } => Ok(*fence),
        _ => Err(foreign("fence")),
    }
}

fn vk_semaphore(semaphore: &GpuSemaphore) -> Result<vk::Semaphore, GraphicsError> {
    match semaphore {
        GpuSemaphore::Vulkan { semaphore, .. } => Ok(*semaphore),
        _ => Err(foreign("semaphore")),
    }
}

fn vk_command_pool(pool: &GpuCommandPool) -> Result<vk::CommandPool, GraphicsError> {
    match pool {
        GpuCommandPool::Vulkan { pool, .. } => Ok(*pool),
        _ => Err(foreign("command pool")),
    }
}

fn vk_view(image: &GpuImage) -> Result<vk::ImageView, GraphicsError> {
    match image {
        GpuImage::Vulkan { view, .. } => Ok(*view),
        _ => Err(foreign("image")),
    }
}

/// Layout an attachment is left in when the caller does not care.
fn resting_layout(attachment: &AttachmentDesc) -> ImageLayout {
    match attachment.final_layout {
        ImageLayout::Undefined if attachment.format.is_depth_stencil() => {
            ImageLayout::DepthStencilAttachment
        }
        ImageLayout::Undefined => ImageLayout::ColorAttachment,
        layout => layout,
    }
}

fn attachment_description(attachment: &AttachmentDesc) -> vk::AttachmentDescription {
    let (stencil_load, stencil_store) = if attachment.format.has_stencil() {
        (
            convert_load_op(attachment.load_op),
            convert_store_op(attachment.store_op),
        )
    } else {
        (
            vk::AttachmentLoadOp::DONT_CARE,
            vk::AttachmentStoreOp::DONT_CARE,
        )
    };
    vk::AttachmentDescription::default()
        .format(convert_texture_format(attachment.format))
        .samples(convert_samples(attachment.samples))
        .load_op(convert_load_op(attachment.load_op))
        .store_op(convert_store_op(attachment.store_op))
        .stencil_load_op(stencil_load)
        .stencil_store_op(stencil_store)
        .initial_layout(convert_layout(attachment.initial_layout))
        .final_layout(convert_layout(resting_layout(attachment)))
}

impl VulkanBackend {
    /// Wrap an application-created device.
    pub fn new(desc: VulkanDeviceDesc) -> Result<Self, GraphicsError> {
        let allocator = Arc::new(Mutex::new(allocator::create_allocator(
            &desc.instance,
            desc.physical_device,
            desc.device.clone(),
        )?));

        let dynamic_rendering = ash::khr::dynamic_rendering::Device::new(&desc.instance, &desc.device);

        let properties = unsafe {
            desc.instance
                .get_physical_device_properties(desc.physical_device)
        };
        let families = unsafe {
            desc.instance
                .get_physical_device_queue_family_properties(desc.physical_device)
        };
        let timestamp_bits = families
            .get(desc.queue_family_index as usize)
            .map_or(0, |family| family.timestamp_valid_bits);
        let capabilities = DeviceCapabilities {
            timestamps: timestamp_bits > 0 && properties.limits.timestamp_period > 0.0,
            timestamp_period_ns: properties.limits.timestamp_period,
        };

        log::info!(
            "Vulkan backend initialized (queue family {}, timestamps: {})",
            desc.queue_family_index,
            capabilities.timestamps
        );

        Ok(Self {
            physical_device: desc.physical_device,
            device: desc.device,
            queue: Mutex::new(desc.queue),
            queue_family_index: desc.queue_family_index,
            allocator,
            dynamic_rendering,
            capabilities,
        })
    }

    /// Get the Vulkan device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the graphics queue family index.
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Run `f` with exclusive access to the graphics queue.
    pub fn with_queue<R>(&self, f: impl FnOnce(vk::Queue) -> R) -> R {
        let queue = self.queue.lock();
        f(*queue)
    }

    /// Create a 2D view of `image`.
    pub(crate) fn create_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: ImageAspect,
        layers: u32,
        levels: u32,
    ) -> Result<vk::ImageView, GraphicsError> {
        let view_type = if layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: convert_aspect(aspect),
                base_mip_level: 0,
                level_count: levels.max(1),
                base_array_layer: 0,
                layer_count: layers.max(1),
            });

        unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(creation_failed("image view"))
    }

    fn destroy_set_layouts(&self, layouts: &[vk::DescriptorSetLayout]) {
        for layout in layouts {
            unsafe { self.device.destroy_descriptor_set_layout(*layout, None) };
        }
    }

    fn create_set_layouts(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Vec<vk::DescriptorSetLayout>, GraphicsError> {
        let mut layouts = Vec::with_capacity(desc.set_layouts.len());
        for set in &desc.set_layouts {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = set
                .bindings
                .iter()
                .map(|b| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(b.binding)
                        .descriptor_type(convert_descriptor_type(b.ty))
                        .descriptor_count(b.count)
                        .stage_flags(convert_shader_stages(b.stages))
                })
                .collect();
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            match unsafe { self.device.create_descriptor_set_layout(&info, None) } {
                Ok(layout) => layouts.push(layout),
                Err(e) => {
                    self.destroy_set_layouts(&layouts);
                    return Err(creation_failed("descriptor set layout")(e));
                }
            }
        }
        Ok(layouts)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        // The device belongs to the application; only wait for our work.
        let _queue = self.queue.lock();
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("Failed to wait for device idle on shutdown: {:?}", e);
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
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
        let format = convert_texture_format(desc.format);

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(desc.array_layers.max(1))
            .samples(convert_samples(desc.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image =
            unsafe { self.device.create_image(&image_info, None) }.map_err(creation_failed("image"))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match allocator::allocate(
            &self.allocator,
            &desc.name,
            requirements,
            gpu_allocator::MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on the returned enum owns image and memory.
        let mut gpu_image = GpuImage::Vulkan {
            device: self.device.clone(),
            image,
            view: vk::ImageView::null(),
            memory: Some((Arc::clone(&self.allocator), Some(allocation))),
            format,
            extent,
        };
        if let GpuImage::Vulkan {
            view,
            memory: Some((_, Some(allocation))),
            ..
        } = &mut gpu_image
        {
            unsafe {
                self.device
                    .bind_image_memory(image, allocation.memory(), allocation.offset())
            }
            .map_err(creation_failed("image memory binding"))?;
            *view = self.create_view(image, format, desc.aspect, desc.array_layers, desc.mip_levels)?;
        }

        log::trace!(
            "VulkanBackend: created texture '{}' ({}x{}, {:?})",
            desc.name,
            extent.width,
            extent.height,
            desc.format
        );
        Ok(gpu_image)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<GpuBuffer, GraphicsError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(convert_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(creation_failed("buffer"))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = match allocator::allocate(
            &self.allocator,
            &desc.name,
            requirements,
            convert_memory_location(desc.location),
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        let gpu_buffer = GpuBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
            allocator: Arc::clone(&self.allocator),
            allocation: Some(allocation),
            size: desc.size,
        };
        bound.map_err(creation_failed("buffer memory binding"))?;
        Ok(gpu_buffer)
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let GpuBuffer::Vulkan {
            allocation, size, ..
        } = buffer
        else {
            return Err(foreign("buffer"));
        };
        if offset + data.len() as u64 > *size {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {} overflows a {} byte buffer",
                data.len(),
                offset,
                size
            )));
        }
        let Some(mapped_ptr) = allocation.as_ref().and_then(|a| a.mapped_ptr()) else {
            return Err(GraphicsError::Internal(
                "Buffer is not mapped for CPU access".to_string(),
            ));
        };

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<GpuRenderPass, GraphicsError> {
        let mut attachments: Vec<vk::AttachmentDescription> = desc
            .color_attachments
            .iter()
            .map(attachment_description)
            .collect();
        let color_refs: Vec<vk::AttachmentReference> = (0..attachments.len() as u32)
            .map(|attachment| vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();
        let depth_ref = desc.depth_attachment.as_ref().map(|depth| {
            attachments.push(attachment_description(depth));
            vk::AttachmentReference {
                attachment: attachments.len() as u32 - 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let render_pass = unsafe { self.device.create_render_pass(&info, None) }
            .map_err(creation_failed("render pass"))?;

        log::debug!("VulkanBackend: created render pass '{}'", desc.name);
        Ok(GpuRenderPass::Vulkan {
            device: self.device.clone(),
            render_pass,
        })
    }

    fn create_framebuffer(
        &self,
        render_pass: &GpuRenderPass,
        attachments: &[&GpuImage],
        extent: Extent2d,
        layers: u32,
    ) -> Result<GpuFramebuffer, GraphicsError> {
        let GpuRenderPass::Vulkan { render_pass, .. } = render_pass else {
            return Err(foreign("render pass"));
        };
        let views = attachments
            .iter()
            .map(|image| vk_view(image))
            .collect::<Result<Vec<_>, _>>()?;

        let info = vk::FramebufferCreateInfo::default()
            .render_pass(*render_pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(layers.max(1));
        let framebuffer = unsafe { self.device.create_framebuffer(&info, None) }
            .map_err(creation_failed("framebuffer"))?;

        Ok(GpuFramebuffer::Vulkan {
            device: self.device.clone(),
            framebuffer,
        })
    }

    fn create_shader_module(
        &self,
        name: &str,
        code: &[u32],
    ) -> Result<GpuShaderModule, GraphicsError> {
        if code.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "shader '{}' has no SPIR-V words",
                name
            )));
        }
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { self.device.create_shader_module(&info, None) }
            .map_err(creation_failed("shader module"))?;

        log::debug!("VulkanBackend: created shader module '{}'", name);
        Ok(GpuShaderModule::Vulkan {
            device: self.device.clone(),
            module,
        })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
        stages: &[(&ShaderStageDesc, &GpuShaderModule)],
        target: &RenderPassDesc,
    ) -> Result<GpuPipeline, GraphicsError> {
        profile_scope!("create_graphics_pipeline");

        let entry_points = stages
            .iter()
            .map(|(stage, _)| {
                CString::new(stage.entry_point.as_str()).map_err(|e| {
                    GraphicsError::InvalidParameter(format!(
                        "Invalid entry point name (contains null byte): {}",
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let shader_stages = stages
            .iter()
            .zip(&entry_points)
            .map(|((stage, module), entry)| match module {
                GpuShaderModule::Vulkan { module, .. } => Ok(
                    vk::PipelineShaderStageCreateInfo::default()
                        .stage(convert_shader_stage(stage.stage))
                        .module(*module)
                        .name(entry),
                ),
                _ => Err(foreign("shader module")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let set_layouts = self.create_set_layouts(desc)?;
        let push_constants = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::ALL_GRAPHICS,
            offset: 0,
            size: desc.push_constant_size,
        }];
        let push_constants: &[vk::PushConstantRange] = if desc.push_constant_size > 0 {
            &push_constants
        } else {
            &[]
        };
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(push_constants);
        let layout = match unsafe { self.device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                self.destroy_set_layouts(&set_layouts);
                return Err(creation_failed("pipeline layout")(e));
            }
        };

        let binding_descriptions: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| {
                vk::VertexInputBindingDescription::default()
                    .binding(i as u32)
                    .stride(buffer.stride)
                    .input_rate(if buffer.per_instance {
                        vk::VertexInputRate::INSTANCE
                    } else {
                        vk::VertexInputRate::VERTEX
                    })
            })
            .collect();
        let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_buffers
            .iter()
            .flat_map(|buffer| buffer.attributes.iter())
            .map(|attr| {
                vk::VertexInputAttributeDescription::default()
                    .location(attr.location)
                    .binding(attr.binding)
                    .format(convert_vertex_format(attr.format))
                    .offset(attr.offset)
            })
            .collect();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert_topology(desc.topology))
            .primitive_restart_enable(false);

        // Dynamic viewport and scissor
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(convert_cull_mode(desc.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let samples = target
            .color_attachments
            .first()
            .or(target.depth_attachment.as_ref())
            .map_or(1, |a| a.samples);
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(convert_samples(samples));

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_compare.is_some())
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(
                desc.depth_compare
                    .map_or(vk::CompareOp::ALWAYS, convert_compare_op),
            )
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = target
            .color_attachments
            .iter()
            .map(|_| convert_blend_mode(desc.blend))
            .collect();
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats: Vec<vk::Format> = target
            .color_formats()
            .into_iter()
            .map(convert_texture_format)
            .collect();
        let depth_format = target
            .depth_format()
            .map_or(vk::Format::UNDEFINED, convert_texture_format);
        let stencil_format = match target.depth_format() {
            Some(format) if format.has_stencil() => depth_format,
            _ => vk::Format::UNDEFINED,
        };
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let created = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let pipeline = match created {
            Ok(pipelines) if !pipelines.is_empty() => pipelines[0],
            Ok(_) => vk::Pipeline::null(),
            Err((_, e)) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                self.destroy_set_layouts(&set_layouts);
                return Err(creation_failed("graphics pipeline")(e));
            }
        };

        log::debug!("VulkanBackend: created pipeline '{}'", desc.name);
        Ok(GpuPipeline::Vulkan {
            device: self.device.clone(),
            pipeline,
            layout,
            set_layouts,
        })
    }

    fn create_descriptor_pool(
        &self,
        sizes: &DescriptorPoolSizes,
    ) -> Result<GpuDescriptorPool, GraphicsError> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = [
            (vk::DescriptorType::UNIFORM_BUFFER, sizes.uniform_buffers),
            (vk::DescriptorType::STORAGE_BUFFER, sizes.storage_buffers),
            (
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                sizes.combined_image_samplers,
            ),
            (vk::DescriptorType::STORAGE_IMAGE, sizes.storage_images),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        })
        .collect();

        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(sizes.max_sets)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { self.device.create_descriptor_pool(&info, None) }
            .map_err(creation_failed("descriptor pool"))?;

        Ok(GpuDescriptorPool::Vulkan {
            device: self.device.clone(),
            pool,
        })
    }

    fn allocate_descriptor_set(
        &self,
        pool: &GpuDescriptorPool,
        pipeline: &GpuPipeline,
        set: u32,
    ) -> Result<GpuDescriptorSet, GraphicsError> {
        let (GpuDescriptorPool::Vulkan { pool, .. }, GpuPipeline::Vulkan { set_layouts, .. }) =
            (pool, pipeline)
        else {
            return Err(foreign("descriptor pool or pipeline"));
        };
        let Some(layout) = set_layouts.get(set as usize) else {
            return Err(GraphicsError::InvalidParameter(format!(
                "pipeline has {} descriptor sets, requested set {}",
                set_layouts.len(),
                set
            )));
        };

        let layouts = [*layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }
            .map_err(creation_failed("descriptor set"))?;
        let set = sets.into_iter().next().ok_or_else(|| {
            GraphicsError::ResourceCreationFailed("no descriptor set allocated".to_string())
        })?;

        Ok(GpuDescriptorSet::Vulkan {
            device: self.device.clone(),
            pool: *pool,
            set,
        })
    }

    fn write_descriptor_buffer(
        &self,
        set: &GpuDescriptorSet,
        binding: u32,
        ty: DescriptorType,
        buffer: &GpuBuffer,
        offset: u64,
        range: u64,
    ) -> Result<(), GraphicsError> {
        let (GpuDescriptorSet::Vulkan { set, .. }, GpuBuffer::Vulkan { buffer, .. }) = (set, buffer)
        else {
            return Err(foreign("descriptor set or buffer"));
        };
        if !matches!(ty, DescriptorType::UniformBuffer | DescriptorType::StorageBuffer) {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} is not a buffer descriptor",
                ty
            )));
        }

        let buffer_infos = [vk::DescriptorBufferInfo {
            buffer: *buffer,
            offset,
            range,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(*set)
            .dst_binding(binding)
            .descriptor_type(convert_descriptor_type(ty))
            .buffer_info(&buffer_infos);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&info, None) }
            .map_err(|e| GraphicsError::InitializationFailed(format!("Failed to create fence: {:?}", e)))?;

        Ok(GpuFence::Vulkan {
            device: self.device.clone(),
            fence,
        })
    }

    fn wait_fence(
        &self,
        fence: &GpuFence,
        timeout: Option<Duration>,
    ) -> Result<bool, GraphicsError> {
        let fence = vk_fence(fence)?;
        let timeout_ns = timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX));
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(call_failed("Fence wait")(e)),
        }
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, GraphicsError> {
        let fence = vk_fence(fence)?;
        unsafe { self.device.get_fence_status(fence) }.map_err(call_failed("Fence status query"))
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        let fence = vk_fence(fence)?;
        unsafe { self.device.reset_fences(&[fence]) }.map_err(call_failed("Fence reset"))
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create semaphore: {:?}", e))
        })?;

        Ok(GpuSemaphore::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn create_command_pool(&self) -> Result<GpuCommandPool, GraphicsError> {
        let pool = command::create_command_pool(&self.device, self.queue_family_index)?;
        Ok(GpuCommandPool::Vulkan {
            device: self.device.clone(),
            pool,
        })
    }

    fn reset_command_pool(&self, pool: &GpuCommandPool) -> Result<(), GraphicsError> {
        let pool = vk_command_pool(pool)?;
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(call_failed("Command pool reset"))
    }

    fn allocate_command_buffers(
        &self,
        pool: &GpuCommandPool,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<GpuCommandBuffer>, GraphicsError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let pool = vk_command_pool(pool)?;
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(match level {
                CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
                CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
            })
            .command_buffer_count(count);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(creation_failed("command buffers"))?;

        Ok(buffers
            .into_iter()
            .map(|buffer| GpuCommandBuffer::Vulkan {
                device: self.device.clone(),
                dynamic_rendering: self.dynamic_rendering.clone(),
                buffer,
            })
            .collect())
    }

    fn create_query_pool(&self, count: u32) -> Result<GpuQueryPool, GraphicsError> {
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);
        let pool = unsafe { self.device.create_query_pool(&info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create query pool: {:?}", e))
        })?;

        Ok(GpuQueryPool::Vulkan {
            device: self.device.clone(),
            pool,
            count,
        })
    }

    fn read_timestamps(
        &self,
        pool: &GpuQueryPool,
        first: u32,
        count: u32,
    ) -> Result<Option<Vec<u64>>, GraphicsError> {
        let GpuQueryPool::Vulkan {
            pool,
            count: capacity,
            ..
        } = pool
        else {
            return Err(foreign("query pool"));
        };
        if first + count > *capacity {
            return Err(GraphicsError::InvalidParameter(format!(
                "queries {}..{} outside a pool of {}",
                first,
                first + count,
                capacity
            )));
        }

        let mut stamps = vec![0u64; count as usize];
        match unsafe {
            self.device
                .get_query_pool_results(*pool, first, &mut stamps, vk::QueryResultFlags::TYPE_64)
        } {
            Ok(()) => Ok(Some(stamps)),
            Err(vk::Result::NOT_READY) => Ok(None),
            Err(e) => Err(call_failed("Query readback")(e)),
        }
    }

    fn submit(&self, submission: &Submission<'_>) -> Result<(), GraphicsError> {
        profile_scope!("vk_queue_submit");

        let command_buffers = submission
            .command_buffers
            .iter()
            .map(|cb| match cb {
                GpuCommandBuffer::Vulkan { buffer, .. } => Ok(*buffer),
                _ => Err(foreign("command buffer")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let wait_semaphores = submission
            .wait_semaphores
            .iter()
            .map(|(s, _)| vk_semaphore(s))
            .collect::<Result<Vec<_>, _>>()?;
        let wait_stages: Vec<vk::PipelineStageFlags> = submission
            .wait_semaphores
            .iter()
            .map(|(_, stages)| convert_stages(*stages))
            .collect();
        let signal_semaphores = submission
            .signal_semaphores
            .iter()
            .map(|s| vk_semaphore(s))
            .collect::<Result<Vec<_>, _>>()?;
        let fence = submission
            .fence
            .map(vk_fence)
            .transpose()?
            .unwrap_or(vk::Fence::null());

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        self.with_queue(|queue| unsafe { self.device.queue_submit(queue, &[submit_info], fence) })
            .map_err(call_failed("Queue submit"))
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        profile_scope!("vk_device_wait_idle");
        // Holding the queue lock keeps submissions out while waiting.
        self.with_queue(|_| unsafe { self.device.device_wait_idle() })
            .map_err(call_failed("Device wait idle"))
    }
}
