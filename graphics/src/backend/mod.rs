//! GPU backend abstraction layer.
//!
//! The render graph never talks to a graphics API directly. Everything it
//! needs from the device goes through the object-safe [`GpuBackend`] trait and
//! the [`Swapchain`] trait, and every GPU object it holds is one of the
//! `Gpu*` enums below, with one variant per backend.
//!
//! # Available Backends
//!
//! - `dummy` (always built): records commands instead of executing them, for
//!   tests and headless tooling
//! - `vulkan-backend`: native Vulkan backend using ash, driving an externally
//!   created device
//!
//! # Ownership
//!
//! GPU objects release themselves on drop. The resource store relies on this:
//! replacing an entry is enough to destroy the previous object.

pub mod dummy;
#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

mod command;
mod swapchain;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

pub use command::{
    CommandBuffer, CommandBufferLevel, GpuCommandBuffer, RenderingAttachment, RenderingFormats,
    RenderingInfo, ResolvedBarrier,
};
pub use dummy::{DummyBackend, DummyId, DummySwapchain, RecordedCommand, ScriptedOutcome};
pub use swapchain::{AcquiredImage, PresentStatus, Swapchain};
#[cfg(feature = "vulkan-backend")]
pub use vulkan::{SwapchainConfig, VulkanBackend, VulkanDeviceDesc, VulkanSwapchain};

use crate::error::GraphicsError;
use crate::graph::descriptor::{BufferDesc, GraphicsPipelineDesc, RenderPassDesc, ShaderStageDesc, TextureDesc};
use crate::types::{DescriptorType, Extent2d, PipelineStages, TextureFormat};

/// Features of the device the graph adapts to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceCapabilities {
    /// Graphics queue supports timestamp queries.
    pub timestamps: bool,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period_ns: f32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            timestamps: false,
            timestamp_period_ns: 1.0,
        }
    }
}

/// Capacity of the shared descriptor pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSizes {
    /// Maximum number of sets.
    pub max_sets: u32,
    /// Uniform buffer descriptors.
    pub uniform_buffers: u32,
    /// Storage buffer descriptors.
    pub storage_buffers: u32,
    /// Combined image/sampler descriptors.
    pub combined_image_samplers: u32,
    /// Storage image descriptors.
    pub storage_images: u32,
}

impl Default for DescriptorPoolSizes {
    fn default() -> Self {
        Self {
            max_sets: 1000,
            uniform_buffers: 1000,
            storage_buffers: 100,
            combined_image_samplers: 1000,
            storage_images: 100,
        }
    }
}

/// One queue submission.
#[derive(Debug, Default)]
pub struct Submission<'a> {
    /// Primary command buffers, executed in order.
    pub command_buffers: Vec<&'a GpuCommandBuffer>,
    /// Semaphores waited on, with the stage that waits.
    pub wait_semaphores: Vec<(&'a GpuSemaphore, PipelineStages)>,
    /// Semaphores signaled when the work completes.
    pub signal_semaphores: Vec<&'a GpuSemaphore>,
    /// Fence signaled when the work completes.
    pub fence: Option<&'a GpuFence>,
}

// ============================================================================
// GPU object handles
// ============================================================================

/// Handle to a GPU image together with its default view.
#[allow(clippy::large_enum_variant)]
pub enum GpuImage {
    /// Dummy backend image.
    Dummy {
        /// Unique id.
        id: u64,
        /// Pixel size.
        extent: Extent2d,
        /// Pixel format.
        format: TextureFormat,
        /// Swapchain image index, if this wraps a swapchain image.
        swapchain_index: Option<u32>,
    },
    /// Vulkan backend image.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        image: vk::Image,
        view: vk::ImageView,
        /// `None` for swapchain-owned images.
        memory: Option<(Arc<Mutex<Allocator>>, Option<Allocation>)>,
        format: vk::Format,
        extent: Extent2d,
    },
}

impl GpuImage {
    /// Pixel size of the image.
    pub fn extent(&self) -> Extent2d {
        match self {
            Self::Dummy { extent, .. } => *extent,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { extent, .. } => *extent,
        }
    }
}

impl fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy {
                id,
                extent,
                format,
                swapchain_index,
            } => f
                .debug_struct("GpuImage::Dummy")
                .field("id", id)
                .field("extent", extent)
                .field("format", format)
                .field("swapchain_index", swapchain_index)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                image,
                view,
                format,
                extent,
                ..
            } => f
                .debug_struct("GpuImage::Vulkan")
                .field("image", image)
                .field("view", view)
                .field("format", format)
                .field("extent", extent)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU buffer.
#[allow(clippy::large_enum_variant)]
pub enum GpuBuffer {
    /// Dummy backend buffer, backed by host memory so writes can be inspected.
    Dummy {
        /// Unique id.
        id: u64,
        /// Size in bytes.
        size: u64,
        /// Host copy of the contents.
        contents: Mutex<Vec<u8>>,
    },
    /// Vulkan backend buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        allocator: Arc<Mutex<Allocator>>,
        allocation: Option<Allocation>,
        size: u64,
    },
}

impl GpuBuffer {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy { size, .. } => *size,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }
}

impl fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { id, size, .. } => f
                .debug_struct("GpuBuffer::Dummy")
                .field("id", id)
                .field("size", size)
                .finish_non_exhaustive(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

/// Declares a handle enum whose Vulkan variant wraps a single `vk` object.
macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident, $field:ident: $vk_ty:ty, $destroy:ident) => {
        $(#[$meta])*
        pub enum $name {
            /// Dummy backend object.
            Dummy {
                /// Unique id.
                id: u64,
            },
            /// Vulkan backend object.
            #[cfg(feature = "vulkan-backend")]
            Vulkan {
                device: ash::Device,
                $field: $vk_ty,
            },
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    Self::Dummy { id } => f
                        .debug_struct(concat!(stringify!($name), "::Dummy"))
                        .field("id", id)
                        .finish(),
                    #[cfg(feature = "vulkan-backend")]
                    Self::Vulkan { $field, .. } => f
                        .debug_struct(concat!(stringify!($name), "::Vulkan"))
                        .field(stringify!($field), $field)
                        .finish_non_exhaustive(),
                }
            }
        }

        #[cfg(feature = "vulkan-backend")]
        impl Drop for $name {
            fn drop(&mut self) {
                if let Self::Vulkan { device, $field } = self {
                    unsafe {
                        device.$destroy(*$field, None);
                    }
                }
            }
        }
    };
}

gpu_handle!(
    /// Handle to a render pass object.
    GpuRenderPass,
    render_pass: vk::RenderPass,
    destroy_render_pass
);
gpu_handle!(
    /// Handle to a framebuffer.
    GpuFramebuffer,
    framebuffer: vk::Framebuffer,
    destroy_framebuffer
);
gpu_handle!(
    /// Handle to a compiled shader module.
    GpuShaderModule,
    module: vk::ShaderModule,
    destroy_shader_module
);
gpu_handle!(
    /// Handle to a GPU semaphore for GPU-GPU synchronization.
    GpuSemaphore,
    semaphore: vk::Semaphore,
    destroy_semaphore
);
gpu_handle!(
    /// Handle to a command pool.
    GpuCommandPool,
    pool: vk::CommandPool,
    destroy_command_pool
);
gpu_handle!(
    /// Handle to a descriptor pool.
    GpuDescriptorPool,
    pool: vk::DescriptorPool,
    destroy_descriptor_pool
);

/// Handle to a graphics pipeline and its layout objects.
pub enum GpuPipeline {
    /// Dummy backend pipeline.
    Dummy {
        /// Unique id.
        id: u64,
    },
    /// Vulkan backend pipeline.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        set_layouts: Vec<vk::DescriptorSetLayout>,
    },
}

impl fmt::Debug for GpuPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { id } => f.debug_struct("GpuPipeline::Dummy").field("id", id).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                pipeline, layout, ..
            } => f
                .debug_struct("GpuPipeline::Vulkan")
                .field("pipeline", pipeline)
                .field("layout", layout)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU fence for CPU-GPU synchronization.
pub enum GpuFence {
    /// Dummy backend fence.
    Dummy {
        /// Unique id.
        id: u64,
        /// Shared with the backend's pending-submission queue.
        signaled: Arc<AtomicBool>,
    },
    /// Vulkan backend fence.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        fence: vk::Fence,
    },
}

impl fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { id, signaled } => f
                .debug_struct("GpuFence::Dummy")
                .field("id", id)
                .field("signaled", signaled)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("fence", fence)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a timestamp query pool.
pub enum GpuQueryPool {
    /// Dummy backend pool.
    Dummy {
        /// Unique id.
        id: u64,
        /// Number of queries.
        count: u32,
    },
    /// Vulkan backend pool.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::QueryPool,
        count: u32,
    },
}

impl GpuQueryPool {
    /// Number of queries in the pool.
    pub fn count(&self) -> u32 {
        match self {
            Self::Dummy { count, .. } => *count,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { count, .. } => *count,
        }
    }
}

impl fmt::Debug for GpuQueryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { id, count } => f
                .debug_struct("GpuQueryPool::Dummy")
                .field("id", id)
                .field("count", count)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { pool, count, .. } => f
                .debug_struct("GpuQueryPool::Vulkan")
                .field("pool", pool)
                .field("count", count)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a descriptor set allocated from the shared pool.
pub enum GpuDescriptorSet {
    /// Dummy backend set.
    Dummy {
        /// Unique id.
        id: u64,
    },
    /// Vulkan backend set.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    },
}

impl fmt::Debug for GpuDescriptorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { id } => f
                .debug_struct("GpuDescriptorSet::Dummy")
                .field("id", id)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { set, .. } => f
                .debug_struct("GpuDescriptorSet::Vulkan")
                .field("set", set)
                .finish_non_exhaustive(),
        }
    }
}

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuImage {
    fn drop(&mut self) {
        if let GpuImage::Vulkan {
            device,
            image,
            view,
            memory,
            ..
        } = self
        {
            unsafe {
                device.destroy_image_view(*view, None);
            }
            // Swapchain images belong to the swapchain; only the view is ours.
            if let Some((allocator, allocation)) = memory {
                unsafe {
                    device.destroy_image(*image, None);
                }
                if let Some(allocation) = allocation.take()
                    && let Err(e) = allocator.lock().free(allocation)
                {
                    log::error!("Failed to free image memory: {}", e);
                }
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            buffer,
            allocator,
            allocation,
            ..
        } = self
        {
            unsafe {
                device.destroy_buffer(*buffer, None);
            }
            if let Some(allocation) = allocation.take()
                && let Err(e) = allocator.lock().free(allocation)
            {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuPipeline {
    fn drop(&mut self) {
        if let GpuPipeline::Vulkan {
            device,
            pipeline,
            layout,
            set_layouts,
        } = self
        {
            unsafe {
                device.destroy_pipeline(*pipeline, None);
                device.destroy_pipeline_layout(*layout, None);
                for set_layout in set_layouts.drain(..) {
                    device.destroy_descriptor_set_layout(set_layout, None);
                }
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let GpuFence::Vulkan { device, fence } = self {
            unsafe {
                device.destroy_fence(*fence, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuQueryPool {
    fn drop(&mut self) {
        if let GpuQueryPool::Vulkan { device, pool, .. } = self {
            unsafe {
                device.destroy_query_pool(*pool, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuDescriptorSet {
    fn drop(&mut self) {
        if let GpuDescriptorSet::Vulkan { device, pool, set } = self {
            // The pool is created with FREE_DESCRIPTOR_SET.
            if let Err(e) = unsafe { device.free_descriptor_sets(*pool, &[*set]) } {
                log::error!("Failed to free descriptor set: {:?}", e);
            }
        }
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// GPU backend trait for abstracting different GPU APIs.
///
/// All methods take `&self`; backends use interior mutability where they
/// need it, so a single `Arc<dyn GpuBackend>` can be shared by the compiler,
/// the passes and the frame executor.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Features of the underlying device.
    fn capabilities(&self) -> DeviceCapabilities;

    // ---------------------------------------------------------------- resources

    /// Allocate an image of the given resolved extent.
    fn create_texture(&self, desc: &TextureDesc, extent: Extent2d)
    -> Result<GpuImage, GraphicsError>;

    /// Allocate a buffer.
    fn create_buffer(&self, desc: &BufferDesc) -> Result<GpuBuffer, GraphicsError>;

    /// Write host data into a host-visible buffer.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Create a render pass object.
    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<GpuRenderPass, GraphicsError>;

    /// Create a framebuffer over already-created images.
    fn create_framebuffer(
        &self,
        render_pass: &GpuRenderPass,
        attachments: &[&GpuImage],
        extent: Extent2d,
        layers: u32,
    ) -> Result<GpuFramebuffer, GraphicsError>;

    /// Create a shader module from SPIR-V words.
    fn create_shader_module(&self, name: &str, code: &[u32])
    -> Result<GpuShaderModule, GraphicsError>;

    /// Create a graphics pipeline rendering into attachments shaped like `target`.
    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
        stages: &[(&ShaderStageDesc, &GpuShaderModule)],
        target: &RenderPassDesc,
    ) -> Result<GpuPipeline, GraphicsError>;

    // -------------------------------------------------------------- descriptors

    /// Create a descriptor pool.
    fn create_descriptor_pool(
        &self,
        sizes: &DescriptorPoolSizes,
    ) -> Result<GpuDescriptorPool, GraphicsError>;

    /// Allocate a set matching layout `set` of `pipeline`.
    fn allocate_descriptor_set(
        &self,
        pool: &GpuDescriptorPool,
        pipeline: &GpuPipeline,
        set: u32,
    ) -> Result<GpuDescriptorSet, GraphicsError>;

    /// Point a buffer binding of a set at a buffer range.
    fn write_descriptor_buffer(
        &self,
        set: &GpuDescriptorSet,
        binding: u32,
        ty: DescriptorType,
        buffer: &GpuBuffer,
        offset: u64,
        range: u64,
    ) -> Result<(), GraphicsError>;

    // -------------------------------------------------------------- sync

    /// Create a fence.
    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError>;

    /// Block until the fence is signaled or the timeout elapses.
    ///
    /// Returns `true` if the fence is signaled. `None` waits forever.
    fn wait_fence(&self, fence: &GpuFence, timeout: Option<Duration>)
    -> Result<bool, GraphicsError>;

    /// Check if a fence is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, GraphicsError>;

    /// Return a fence to the unsignaled state.
    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError>;

    /// Create a binary semaphore.
    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError>;

    // -------------------------------------------------------------- commands

    /// Create a command pool on the graphics queue family.
    fn create_command_pool(&self) -> Result<GpuCommandPool, GraphicsError>;

    /// Reset every command buffer allocated from a pool.
    fn reset_command_pool(&self, pool: &GpuCommandPool) -> Result<(), GraphicsError>;

    /// Allocate command buffers from a pool.
    fn allocate_command_buffers(
        &self,
        pool: &GpuCommandPool,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<GpuCommandBuffer>, GraphicsError>;

    /// Create a timestamp query pool.
    fn create_query_pool(&self, count: u32) -> Result<GpuQueryPool, GraphicsError>;

    /// Read back timestamps. Returns `None` if any result is not available yet.
    fn read_timestamps(
        &self,
        pool: &GpuQueryPool,
        first: u32,
        count: u32,
    ) -> Result<Option<Vec<u64>>, GraphicsError>;

    /// Submit work to the graphics queue.
    fn submit(&self, submission: &Submission<'_>) -> Result<(), GraphicsError>;

    /// Block until the device has finished all submitted work.
    fn wait_idle(&self) -> Result<(), GraphicsError>;
}

impl fmt::Debug for dyn GpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuBackend({})", self.name())
    }
}
