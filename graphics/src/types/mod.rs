//! Value types shared by descriptors, the compiler and the backends.
//!
//! This module contains format enums, usage flags, layouts and the small
//! geometric types used throughout the render graph.

mod buffer;
mod common;
mod pipeline;
mod sync;
mod texture;

pub use buffer::BufferUsage;
pub use common::{
    ClearValue, Extent2d, IndexFormat, LoadOp, MemoryLocation, Rect2d, StoreOp, Viewport,
};
pub use pipeline::{
    BlendMode, CompareOp, CullMode, DescriptorBinding, DescriptorSetLayoutDesc, DescriptorType,
    PrimitiveTopology, ShaderStage, ShaderStages, VertexAttribute, VertexBufferLayout,
    VertexFormat,
};
pub use sync::{AccessFlags, ImageLayout, PipelineStages};
pub use texture::{ImageAspect, TextureFormat, TextureUsage};
