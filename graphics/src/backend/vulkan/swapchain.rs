//! Vulkan swapchain over an application-provided surface.

use std::sync::Arc;

use ash::vk;

use super::VulkanBackend;
use super::conversion::{convert_texture_format, texture_format_from_vk};
use crate::backend::{AcquiredImage, GpuBackend, GpuImage, GpuSemaphore, PresentStatus, Swapchain};
use crate::error::GraphicsError;
use crate::types::{Extent2d, ImageAspect, TextureFormat};

/// Swapchain configuration requested by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    /// Preferred image format; falls back to the surface's first format.
    pub format: TextureFormat,
    /// Size used when the surface leaves the choice to the swapchain.
    pub extent: Extent2d,
    /// Present with vsync (FIFO) instead of mailbox when available.
    pub vsync: bool,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            format: TextureFormat::Bgra8UnormSrgb,
            extent: Extent2d::new(1280, 720),
            vsync: true,
        }
    }
}

/// A `VkSwapchainKHR` the frame executor renders into.
pub struct VulkanSwapchain {
    backend: Arc<VulkanBackend>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::Format,
    extent: Extent2d,
    config: SwapchainConfig,
}

impl std::fmt::Debug for VulkanSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSwapchain")
            .field("swapchain", &self.swapchain)
            .field("images", &self.images.len())
            .field("format", &self.format)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

impl VulkanSwapchain {
    /// Create a swapchain for `surface`.
    ///
    /// The surface stays owned by the application and must outlive the swapchain.
    pub fn new(
        backend: Arc<VulkanBackend>,
        entry: &ash::Entry,
        instance: &ash::Instance,
        surface: vk::SurfaceKHR,
        config: SwapchainConfig,
    ) -> Result<Self, GraphicsError> {
        let surface_loader = ash::khr::surface::Instance::new(entry, instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, backend.device());

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                backend.physical_device(),
                backend.queue_family_index(),
                surface,
            )
        }
        .unwrap_or(false);
        if !supported {
            return Err(GraphicsError::FeatureNotSupported(
                "graphics queue cannot present to this surface".to_string(),
            ));
        }

        let mut swapchain = Self {
            backend,
            surface_loader,
            swapchain_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: config.extent,
            config,
        };
        swapchain.create()?;
        Ok(swapchain)
    }

    /// Size to use on the next recreation if the surface does not dictate one.
    pub fn set_desired_extent(&mut self, extent: Extent2d) {
        self.config.extent = extent;
    }

    fn surface_error(e: vk::Result) -> GraphicsError {
        match e {
            vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => GraphicsError::SurfaceOutdated,
            vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
            e => GraphicsError::Internal(format!("Surface query failed: {:?}", e)),
        }
    }

    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR, GraphicsError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.backend.physical_device(), self.surface)
        }
        .map_err(Self::surface_error)
    }

    /// The surface's current extent, or the configured one clamped to the
    /// surface limits when the surface leaves the choice to the swapchain.
    fn choose_extent(&self, capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
        if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: self.config.extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: self.config.extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        }
    }

    /// Create the swapchain, retiring the current one if any.
    fn create(&mut self) -> Result<(), GraphicsError> {
        let physical_device = self.backend.physical_device();
        let capabilities = self.surface_capabilities()?;
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .map_err(Self::surface_error)?;
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .map_err(Self::surface_error)?;

        let wanted = convert_texture_format(self.config.format);
        let surface_format = formats
            .iter()
            .find(|f| f.format == wanted)
            .or_else(|| {
                formats
                    .iter()
                    .find(|f| texture_format_from_vk(f.format).is_some())
            })
            .copied()
            .ok_or_else(|| {
                GraphicsError::FeatureNotSupported(
                    "surface offers no supported color format".to_string(),
                )
            })?;

        let present_mode = if !self.config.vsync && present_modes.contains(&vk::PresentModeKHR::MAILBOX)
        {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO // Always available
        };

        let extent = self.choose_extent(&capabilities);
        if extent.width == 0 || extent.height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "surface dimensions cannot be zero".to_string(),
            ));
        }

        // Prefer triple buffering
        let image_count = (capabilities.min_image_count + 1).min(if capabilities.max_image_count > 0 {
            capabilities.max_image_count
        } else {
            u32::MAX
        });

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| match e {
                vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
                e => GraphicsError::ResourceCreationFailed(format!(
                    "Failed to create swapchain: {:?}",
                    e
                )),
            })?;
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to get swapchain images: {:?}",
                e
            ))
        })?;
        self.format = surface_format.format;
        self.extent = Extent2d::new(extent.width, extent.height);

        log::info!(
            "Created Vulkan swapchain: {}x{} with {} images ({:?})",
            extent.width,
            extent.height,
            self.images.len(),
            present_mode
        );
        Ok(())
    }
}

impl Swapchain for VulkanSwapchain {
    fn extent(&self) -> Extent2d {
        self.extent
    }

    fn format(&self) -> TextureFormat {
        texture_format_from_vk(self.format).unwrap_or(self.config.format)
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn wrap_image(&self, index: u32) -> Result<GpuImage, GraphicsError> {
        let Some(&image) = self.images.get(index as usize) else {
            return Err(GraphicsError::InvalidParameter(format!(
                "swapchain has {} images, requested {}",
                self.images.len(),
                index
            )));
        };
        let view = self
            .backend
            .create_view(image, self.format, ImageAspect::COLOR, 1, 1)?;

        Ok(GpuImage::Vulkan {
            device: self.backend.device().clone(),
            image,
            view,
            memory: None,
            format: self.format,
            extent: self.extent,
        })
    }

    fn acquire_next_image(
        &mut self,
        signal: &GpuSemaphore,
    ) -> Result<AcquiredImage, GraphicsError> {
        let GpuSemaphore::Vulkan { semaphore, .. } = signal else {
            return Err(GraphicsError::InvalidParameter(
                "semaphore was not created by the Vulkan backend".to_string(),
            ));
        };
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                *semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(Self::surface_error)?;
        Ok(AcquiredImage { index, suboptimal })
    }

    fn present(&mut self, index: u32, wait: &GpuSemaphore) -> Result<PresentStatus, GraphicsError> {
        let GpuSemaphore::Vulkan { semaphore, .. } = wait else {
            return Err(GraphicsError::InvalidParameter(
                "semaphore was not created by the Vulkan backend".to_string(),
            ));
        };
        let wait_semaphores = [*semaphore];
        let swapchains = [self.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let loader = &self.swapchain_loader;
        match self
            .backend
            .with_queue(|queue| unsafe { loader.queue_present(queue, &present_info) })
        {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(e) => Err(Self::surface_error(e)),
        }
    }

    fn surface_extent(&self) -> Result<Extent2d, GraphicsError> {
        let extent = self.choose_extent(&self.surface_capabilities()?);
        Ok(Extent2d::new(extent.width, extent.height))
    }

    fn recreate(&mut self) -> Result<(), GraphicsError> {
        self.create()
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        if self.swapchain == vk::SwapchainKHR::null() {
            return;
        }
        if let Err(e) = self.backend.wait_idle() {
            log::error!("Failed to wait for device idle before destroying swapchain: {}", e);
        }
        unsafe { self.swapchain_loader.destroy_swapchain(self.swapchain, None) };
        self.swapchain = vk::SwapchainKHR::null();
    }
}
