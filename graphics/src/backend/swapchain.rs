//! Presentation surface abstraction.

use super::{GpuImage, GpuSemaphore};
use crate::error::GraphicsError;
use crate::types::{Extent2d, TextureFormat};

/// Result of a successful image acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index of the acquired swapchain image.
    pub index: u32,
    /// The swapchain still works but no longer matches the surface exactly.
    pub suboptimal: bool,
}

/// Outcome of a successful present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    /// Presented and the swapchain matches the surface.
    Optimal,
    /// Presented, but the swapchain should be recreated.
    Suboptimal,
}

/// A swapchain the frame executor renders into.
///
/// An out-of-date swapchain is reported as [`GraphicsError::SurfaceOutdated`]
/// from [`acquire_next_image`](Self::acquire_next_image) or
/// [`present`](Self::present). The executor reacts by calling
/// [`recreate`](Self::recreate) and recompiling every resource whose size or
/// format follows the swapchain.
pub trait Swapchain: Send {
    /// Current image size.
    fn extent(&self) -> Extent2d;

    /// Format of the swapchain images.
    fn format(&self) -> TextureFormat;

    /// Number of images.
    fn image_count(&self) -> u32;

    /// Create a graph-owned image handle for swapchain image `index`.
    ///
    /// The returned handle never owns the image memory.
    fn wrap_image(&self, index: u32) -> Result<GpuImage, GraphicsError>;

    /// Acquire the next image, signaling `signal` when it is ready.
    fn acquire_next_image(&mut self, signal: &GpuSemaphore)
    -> Result<AcquiredImage, GraphicsError>;

    /// Queue image `index` for presentation after `wait` is signaled.
    fn present(&mut self, index: u32, wait: &GpuSemaphore)
    -> Result<PresentStatus, GraphicsError>;

    /// Size the next [`recreate`](Self::recreate) would use.
    ///
    /// Zero while the window is minimized; the executor then skips frames
    /// instead of recreating.
    fn surface_extent(&self) -> Result<Extent2d, GraphicsError> {
        Ok(self.extent())
    }

    /// Recreate the swapchain for the surface's current size.
    ///
    /// The caller guarantees the device is idle and no wrapped image is alive.
    fn recreate(&mut self) -> Result<(), GraphicsError>;
}
