//! Fixed-function pipeline state and shader binding types.

use bitflags::bitflags;

/// A single programmable stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Fragment shader.
    Fragment,
    /// Compute shader.
    Compute,
}

impl ShaderStage {
    /// The single-bit mask for this stage.
    pub fn mask(self) -> ShaderStages {
        match self {
            Self::Vertex => ShaderStages::VERTEX,
            Self::Fragment => ShaderStages::FRAGMENT,
            Self::Compute => ShaderStages::COMPUTE,
        }
    }
}

bitflags! {
    /// Set of shader stages, used for binding and push-constant visibility.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage.
        const VERTEX = 0x01;
        /// Fragment stage.
        const FRAGMENT = 0x10;
        /// Compute stage.
        const COMPUTE = 0x20;
        /// Every graphics stage.
        const ALL_GRAPHICS = 0x1F;
    }
}

/// Primitive assembly mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Independent triangles.
    #[default]
    TriangleList,
    /// Triangle strip.
    TriangleStrip,
    /// Independent lines.
    LineList,
    /// Points.
    PointList,
}

/// Face culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// Draw both faces.
    #[default]
    None,
    /// Cull front faces.
    Front,
    /// Cull back faces.
    Back,
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
    /// Never passes.
    Never,
    /// Passes if less.
    Less,
    /// Passes if equal.
    Equal,
    /// Passes if less or equal.
    #[default]
    LessEqual,
    /// Passes if greater.
    Greater,
    /// Passes if greater or equal.
    GreaterEqual,
    /// Always passes.
    Always,
}

/// Color blending preset applied to every color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Overwrite the destination.
    #[default]
    Replace,
    /// Standard alpha blending.
    Alpha,
    /// Additive blending, used for light accumulation.
    Additive,
}

/// Vertex attribute element format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// One 32-bit float.
    Float32,
    /// Two 32-bit floats.
    Float32x2,
    /// Three 32-bit floats.
    Float32x3,
    /// Four 32-bit floats.
    Float32x4,
    /// Four 8-bit unsigned integers.
    Uint8x4,
    /// Four 8-bit normalized unsigned integers.
    Unorm8x4,
    /// Four 32-bit unsigned integers.
    Uint32x4,
}

/// A single vertex attribute inside a vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Buffer binding this attribute reads from.
    pub binding: u32,
    /// Element format.
    pub format: VertexFormat,
    /// Byte offset inside one vertex.
    pub offset: u32,
}

/// Layout of one vertex buffer binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    /// Byte stride between consecutive vertices.
    pub stride: u32,
    /// Advance per instance instead of per vertex.
    pub per_instance: bool,
    /// Attributes sourced from this binding.
    pub attributes: Vec<VertexAttribute>,
}

/// Kind of resource bound at a descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// Uniform buffer.
    UniformBuffer,
    /// Storage buffer.
    StorageBuffer,
    /// Sampled image combined with a sampler.
    CombinedImageSampler,
    /// Storage image.
    StorageImage,
}

/// One binding slot inside a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    /// Binding index.
    pub binding: u32,
    /// Resource type.
    pub ty: DescriptorType,
    /// Array length.
    pub count: u32,
    /// Stages that can see the binding.
    pub stages: ShaderStages,
}

impl DescriptorBinding {
    /// Create a single (non-array) binding.
    pub fn new(binding: u32, ty: DescriptorType, stages: ShaderStages) -> Self {
        Self {
            binding,
            ty,
            count: 1,
            stages,
        }
    }
}

/// Layout of one descriptor set used by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DescriptorSetLayoutDesc {
    /// Bindings in the set.
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutDesc {
    /// Create a layout from a list of bindings.
    pub fn new(bindings: Vec<DescriptorBinding>) -> Self {
        Self { bindings }
    }
}
