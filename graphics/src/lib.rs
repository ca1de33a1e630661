//! # Lumen Graphics
//!
//! A render graph core for a Vulkan-class renderer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`ResourceGraphBuilder`] - Deduplicating registry of resource descriptors
//! - [`ResourceCompiler`] - Turns descriptors into GPU objects in a [`ResourceStore`]
//! - [`RenderGraph`] - Passes, their producer/consumer order and recompilation
//! - [`FrameExecutor`] - Per-frame loop with multiple frames in flight
//! - [`GpuBackend`] - Trait for graphics backend implementations, with a
//!   Dummy backend for testing and a Vulkan backend behind `vulkan-backend`
//!
//! ## Example
//!
//! ```ignore
//! use lumen_graphics::{ExecutorConfig, FrameExecutor, GraphContext, RenderGraph};
//!
//! let context = Arc::new(GraphContext::new(backend, DescriptorPoolSizes::default())?);
//! let mut graph = RenderGraph::new(context);
//! graph.add_pass(ShadowPass::new());
//! graph.add_pass(LightingPass::new());
//!
//! let mut executor = FrameExecutor::new(graph, swapchain, ExecutorConfig::default())?;
//! loop {
//!     executor.draw(&frame_data)?;
//! }
//! ```

pub mod backend;
pub mod compiler;
pub mod context;
pub mod error;
pub mod executor;
pub mod frame_data;
pub mod graph;
pub mod profiling;
pub mod scheduler;
pub mod types;

// Re-export main types for convenience
pub use backend::{
    CommandBuffer, DescriptorPoolSizes, DeviceCapabilities, DummyBackend, DummySwapchain,
    GpuBackend, Swapchain,
};
#[cfg(feature = "vulkan-backend")]
pub use backend::{SwapchainConfig, VulkanBackend, VulkanDeviceDesc, VulkanSwapchain};
pub use compiler::ResourceCompiler;
pub use context::{GraphContext, ShaderModule};
pub use error::{GraphError, GraphicsError};
pub use executor::{ExecutorConfig, FrameExecutor, MAX_FRAMES_IN_FLIGHT, SlotState};
pub use frame_data::{DrawItem, FrameBuffers, Light, LightKind, PerFrameData, ShadowParams};
pub use graph::{
    AttachmentTarget, FrameContext, PassId, RenderGraph, RenderGraphPass, RenderPassExecution,
    ResourceAccess, ResourceGraphBuilder, ResourceHandle, ResourceStore,
};
pub use profiling::{PassProfilingData, RenderGraphFrameProfilingData};
pub use scheduler::PassGraph;
pub use types::{
    BufferUsage, ClearValue, Extent2d, ImageLayout, Rect2d, TextureFormat, TextureUsage,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
