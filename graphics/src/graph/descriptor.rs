//! Resource descriptors.
//!
//! Descriptors are plain data: they describe a GPU resource a pass wants
//! without owning or referencing any live GPU object. The builder hashes them
//! into [`ResourceHandle`]s, the compiler turns them into compiled resources.
//!
//! Every descriptor type implements `Hash` and `Eq` over *all* of its fields,
//! which is what makes structurally identical requests collapse onto a single
//! handle.

use std::hash::{Hash, Hasher};

use super::handle::ResourceHandle;
use crate::types::{
    AccessFlags, BlendMode, BufferUsage, CompareOp, CullMode, DescriptorSetLayoutDesc, Extent2d,
    ImageAspect, ImageLayout, LoadOp, MemoryLocation, PipelineStages, PrimitiveTopology,
    ShaderStage, StoreOp, TextureFormat, TextureUsage, VertexBufferLayout,
};

// ============================================================================
// Size classes
// ============================================================================

/// How a texture or framebuffer derives its pixel size.
#[derive(Debug, Clone, Copy)]
pub enum SizeSpec {
    /// Fixed size, independent of the swapchain.
    Absolute {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// Same size as the swapchain.
    SwapchainRelative,
    /// Swapchain size multiplied by `factor`.
    Scaled {
        /// Scale applied to both dimensions.
        factor: f32,
    },
    /// Size computed from the swapchain extent by a user function.
    ///
    /// `name` identifies the function for hashing and equality, so two
    /// `Custom` specs with the same name must resolve identically.
    Custom {
        /// Stable identifier of `resolve`.
        name: &'static str,
        /// Resolver invoked with the current swapchain extent.
        resolve: fn(Extent2d) -> Extent2d,
    },
}

impl SizeSpec {
    /// Resolve to a concrete extent given the current swapchain extent.
    ///
    /// Sizes derived from the swapchain never drop below one pixel.
    pub fn resolve(&self, swapchain: Extent2d) -> Extent2d {
        let min = Extent2d::new(1, 1);
        match *self {
            Self::Absolute { width, height } => Extent2d::new(width, height),
            Self::SwapchainRelative => swapchain.at_least(min),
            Self::Scaled { factor } => swapchain.scaled(factor),
            Self::Custom { resolve, .. } => resolve(swapchain).at_least(min),
        }
    }

    /// Returns true if a swapchain resize can change the resolved extent.
    pub fn depends_on_swapchain(&self) -> bool {
        !matches!(self, Self::Absolute { .. })
    }
}

impl PartialEq for SizeSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Absolute { width, height },
                Self::Absolute {
                    width: w,
                    height: h,
                },
            ) => width == w && height == h,
            (Self::SwapchainRelative, Self::SwapchainRelative) => true,
            (Self::Scaled { factor }, Self::Scaled { factor: f }) => {
                factor.to_bits() == f.to_bits()
            }
            (Self::Custom { name, .. }, Self::Custom { name: n, .. }) => name == n,
            _ => false,
        }
    }
}

impl Eq for SizeSpec {}

impl Hash for SizeSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Absolute { width, height } => {
                width.hash(state);
                height.hash(state);
            }
            Self::SwapchainRelative => {}
            Self::Scaled { factor } => factor.to_bits().hash(state),
            Self::Custom { name, .. } => name.hash(state),
        }
    }
}

// ============================================================================
// Textures
// ============================================================================

/// Where a texture's image memory comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureSource {
    /// The compiler allocates a fresh image.
    #[default]
    Allocated,
    /// The compiler wraps the swapchain's own images, one store entry per image.
    Swapchain,
}

/// Describes a texture and how passes transition it.
///
/// Three layouts are involved:
///
/// - `layout`: the resting layout. The compiler moves freshly created images
///   from `Undefined` into it, and the executor assumes the image is in it
///   whenever a rendering scope begins.
/// - `initial_layout`: the layout inside a rendering scope.
/// - `final_layout`: the layout the image is left in when the scope ends.
///
/// The executor emits `layout -> initial_layout` right before a scope and
/// `initial_layout -> final_layout` right after it. The `src_*` masks
/// describe work outside the scope (previous and next users), the `dst_*`
/// masks describe the scope's own accesses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Debug name, also part of the identity.
    pub name: String,
    /// Pixel format.
    pub format: TextureFormat,
    /// Size class.
    pub size: SizeSpec,
    /// Usage flags.
    pub usage: TextureUsage,
    /// Aspects covered by views and barriers.
    pub aspect: ImageAspect,
    /// Number of array layers.
    pub array_layers: u32,
    /// Number of mip levels.
    pub mip_levels: u32,
    /// MSAA sample count.
    pub samples: u32,
    /// Allocation source.
    pub source: TextureSource,
    /// Resting layout.
    pub layout: ImageLayout,
    /// Layout inside a rendering scope.
    pub initial_layout: ImageLayout,
    /// Layout after a rendering scope.
    pub final_layout: ImageLayout,
    /// Stages of the users outside the rendering scope.
    pub src_stages: PipelineStages,
    /// Stages of the rendering scope.
    pub dst_stages: PipelineStages,
    /// Accesses of the users outside the rendering scope.
    pub src_access: AccessFlags,
    /// Accesses of the rendering scope.
    pub dst_access: AccessFlags,
}

impl TextureDesc {
    /// Create a sampled 2D texture that rests in `ShaderReadOnly`.
    ///
    /// Stage and access masks are derived from the layouts; use the
    /// `with_*` methods to adjust.
    pub fn new(name: impl Into<String>, format: TextureFormat, size: SizeSpec) -> Self {
        Self {
            name: name.into(),
            format,
            size,
            usage: TextureUsage::SAMPLED,
            aspect: format.aspect(),
            array_layers: 1,
            mip_levels: 1,
            samples: 1,
            source: TextureSource::Allocated,
            layout: ImageLayout::ShaderReadOnly,
            initial_layout: ImageLayout::ShaderReadOnly,
            final_layout: ImageLayout::ShaderReadOnly,
            src_stages: PipelineStages::empty(),
            dst_stages: PipelineStages::empty(),
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::empty(),
        }
        .with_derived_masks()
    }

    /// Color render target that is sampled by later passes.
    pub fn color_target(name: impl Into<String>, format: TextureFormat, size: SizeSpec) -> Self {
        Self::new(name, format, size)
            .with_usage(TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLED)
            .with_layouts(
                ImageLayout::ShaderReadOnly,
                ImageLayout::ColorAttachment,
                ImageLayout::ShaderReadOnly,
            )
    }

    /// Depth render target that is sampled by later passes (e.g. a shadow map).
    pub fn depth_target(name: impl Into<String>, format: TextureFormat, size: SizeSpec) -> Self {
        Self::new(name, format, size)
            .with_usage(TextureUsage::DEPTH_STENCIL_ATTACHMENT | TextureUsage::SAMPLED)
            .with_layouts(
                ImageLayout::DepthStencilReadOnly,
                ImageLayout::DepthStencilAttachment,
                ImageLayout::DepthStencilReadOnly,
            )
    }

    /// The swapchain's own images, rendered to and then presented.
    ///
    /// `format` is a hint; the compiler replaces it with the swapchain's real
    /// format.
    pub fn swapchain_target(name: impl Into<String>, format: TextureFormat) -> Self {
        let mut desc = Self::new(name, format, SizeSpec::SwapchainRelative)
            .with_usage(TextureUsage::COLOR_ATTACHMENT)
            .with_layouts(
                ImageLayout::Undefined,
                ImageLayout::ColorAttachment,
                ImageLayout::PresentSrc,
            );
        desc.source = TextureSource::Swapchain;
        // Chain with the acquire semaphore, which is waited at color output.
        desc.src_stages = PipelineStages::COLOR_ATTACHMENT_OUTPUT;
        desc.src_access = AccessFlags::empty();
        desc
    }

    /// Set the usage flags.
    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Set resting, in-scope and post-scope layouts and re-derive the masks.
    pub fn with_layouts(
        mut self,
        layout: ImageLayout,
        initial_layout: ImageLayout,
        final_layout: ImageLayout,
    ) -> Self {
        self.layout = layout;
        self.initial_layout = initial_layout;
        self.final_layout = final_layout;
        self.with_derived_masks()
    }

    /// Override the barrier masks.
    pub fn with_masks(
        mut self,
        src_stages: PipelineStages,
        src_access: AccessFlags,
        dst_stages: PipelineStages,
        dst_access: AccessFlags,
    ) -> Self {
        self.src_stages = src_stages;
        self.src_access = src_access;
        self.dst_stages = dst_stages;
        self.dst_access = dst_access;
        self
    }

    /// Set the number of array layers.
    pub fn with_array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers.max(1);
        self
    }

    /// Set the number of mip levels.
    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels.max(1);
        self
    }

    /// Set the MSAA sample count.
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    /// Returns true if the layouts require a transition around a rendering scope.
    pub fn needs_scope_transitions(&self) -> bool {
        self.layout != self.initial_layout || self.initial_layout != self.final_layout
    }

    fn with_derived_masks(mut self) -> Self {
        self.src_stages = self.layout.consumer_stages() | self.final_layout.consumer_stages();
        self.src_access = self.layout.producer_access() | self.final_layout.producer_access();
        self.dst_stages = self.initial_layout.consumer_stages();
        self.dst_access = self.initial_layout.consumer_access();
        self
    }
}

// ============================================================================
// Buffers
// ============================================================================

/// Describes a graph-owned buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    /// Debug name, also part of the identity.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Memory placement.
    pub location: MemoryLocation,
}

impl BufferDesc {
    /// Create a device-local buffer.
    pub fn new(name: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            name: name.into(),
            size,
            usage,
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Set the memory placement.
    pub fn with_location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }
}

// ============================================================================
// Render passes and framebuffers
// ============================================================================

/// One attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    /// Attachment format.
    pub format: TextureFormat,
    /// Sample count.
    pub samples: u32,
    /// Load behavior.
    pub load_op: LoadOp,
    /// Store behavior.
    pub store_op: StoreOp,
    /// Layout the attachment is in when the pass begins.
    pub initial_layout: ImageLayout,
    /// Layout the attachment is left in when the pass ends.
    pub final_layout: ImageLayout,
}

impl AttachmentDesc {
    /// Attachment matching a texture descriptor's in-scope layouts.
    pub fn for_texture(texture: &TextureDesc, load_op: LoadOp, store_op: StoreOp) -> Self {
        Self {
            format: texture.format,
            samples: texture.samples,
            load_op,
            store_op,
            initial_layout: texture.initial_layout,
            final_layout: texture.initial_layout,
        }
    }
}

/// Describes the attachment interface of a render pass object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassDesc {
    /// Debug name, also part of the identity.
    pub name: String,
    /// Color attachments in binding order.
    pub color_attachments: Vec<AttachmentDesc>,
    /// Optional depth/stencil attachment.
    pub depth_attachment: Option<AttachmentDesc>,
}

impl RenderPassDesc {
    /// Create an empty render pass description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color_attachments: Vec::new(),
            depth_attachment: None,
        }
    }

    /// Append a color attachment.
    pub fn with_color(mut self, attachment: AttachmentDesc) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    /// Set the depth attachment.
    pub fn with_depth(mut self, attachment: AttachmentDesc) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    /// Formats of the color attachments.
    pub fn color_formats(&self) -> Vec<TextureFormat> {
        self.color_attachments.iter().map(|a| a.format).collect()
    }

    /// Format of the depth attachment, if any.
    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.depth_attachment.map(|a| a.format)
    }
}

/// Describes a framebuffer binding textures to a render pass.
///
/// If any attachment is a swapchain-backed texture, the compiler creates one
/// framebuffer per swapchain image at consecutive handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferDesc {
    /// Debug name, also part of the identity.
    pub name: String,
    /// Render pass the framebuffer is compatible with.
    pub render_pass: ResourceHandle,
    /// Attachment textures, colors first, depth last.
    pub attachments: Vec<ResourceHandle>,
    /// Size class.
    pub size: SizeSpec,
    /// Number of layers.
    pub layers: u32,
}

impl FramebufferDesc {
    /// Create a framebuffer description.
    pub fn new(
        name: impl Into<String>,
        render_pass: ResourceHandle,
        attachments: Vec<ResourceHandle>,
        size: SizeSpec,
    ) -> Self {
        Self {
            name: name.into(),
            render_pass,
            attachments,
            size,
            layers: 1,
        }
    }
}

// ============================================================================
// Pipelines
// ============================================================================

/// A shader stage of a pipeline, named by its key in the shader library.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderStageDesc {
    /// Stage.
    pub stage: ShaderStage,
    /// Shader library key.
    pub shader: String,
    /// Entry point name.
    pub entry_point: String,
}

impl ShaderStageDesc {
    /// Stage with the conventional `main` entry point.
    pub fn new(stage: ShaderStage, shader: impl Into<String>) -> Self {
        Self {
            stage,
            shader: shader.into(),
            entry_point: "main".to_string(),
        }
    }
}

/// Which render pass interface a pipeline is built against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineTarget {
    /// A render pass resource registered in the graph.
    RenderPass(ResourceHandle),
    /// An inline render pass description private to this pipeline.
    Explicit(RenderPassDesc),
}

/// Describes a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineDesc {
    /// Debug name, also part of the identity.
    pub name: String,
    /// Shader stages.
    pub stages: Vec<ShaderStageDesc>,
    /// Render pass interface.
    pub target: PipelineTarget,
    /// Vertex buffer bindings.
    pub vertex_buffers: Vec<VertexBufferLayout>,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Face culling.
    pub cull_mode: CullMode,
    /// Depth test function, `None` disables depth testing.
    pub depth_compare: Option<CompareOp>,
    /// Whether depth writes are enabled.
    pub depth_write: bool,
    /// Color blending.
    pub blend: BlendMode,
    /// Descriptor set layouts, indexed by set number.
    pub set_layouts: Vec<DescriptorSetLayoutDesc>,
    /// Push-constant block size in bytes, visible to all graphics stages.
    pub push_constant_size: u32,
}

impl GraphicsPipelineDesc {
    /// Create a pipeline description with default fixed-function state.
    pub fn new(name: impl Into<String>, target: PipelineTarget) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            target,
            vertex_buffers: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::Back,
            depth_compare: None,
            depth_write: false,
            blend: BlendMode::Replace,
            set_layouts: Vec::new(),
            push_constant_size: 0,
        }
    }

    /// Add a shader stage.
    pub fn with_stage(mut self, stage: ShaderStageDesc) -> Self {
        self.stages.push(stage);
        self
    }

    /// Add a vertex buffer binding.
    pub fn with_vertex_buffer(mut self, layout: VertexBufferLayout) -> Self {
        self.vertex_buffers.push(layout);
        self
    }

    /// Enable depth testing, optionally with writes.
    pub fn with_depth(mut self, compare: CompareOp, write: bool) -> Self {
        self.depth_compare = Some(compare);
        self.depth_write = write;
        self
    }

    /// Set the culling mode.
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Set the blend mode.
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    /// Append a descriptor set layout.
    pub fn with_set_layout(mut self, layout: DescriptorSetLayoutDesc) -> Self {
        self.set_layouts.push(layout);
        self
    }

    /// Set the push-constant block size.
    pub fn with_push_constants(mut self, size: u32) -> Self {
        self.push_constant_size = size;
        self
    }
}

// ============================================================================
// Tagged union
// ============================================================================

/// Kind of a resource, in compilation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Image resources.
    Texture,
    /// Buffer resources.
    Buffer,
    /// Render pass objects.
    RenderPass,
    /// Framebuffers, which need textures and render passes.
    Framebuffer,
    /// Pipelines, which need render passes and shaders.
    GraphicsPipeline,
}

/// Any resource the graph can own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceDescriptor {
    /// A texture.
    Texture(TextureDesc),
    /// A buffer.
    Buffer(BufferDesc),
    /// A framebuffer.
    Framebuffer(FramebufferDesc),
    /// A render pass object.
    RenderPass(RenderPassDesc),
    /// A graphics pipeline.
    GraphicsPipeline(GraphicsPipelineDesc),
}

impl ResourceDescriptor {
    /// Debug name of the resource.
    pub fn name(&self) -> &str {
        match self {
            Self::Texture(desc) => &desc.name,
            Self::Buffer(desc) => &desc.name,
            Self::Framebuffer(desc) => &desc.name,
            Self::RenderPass(desc) => &desc.name,
            Self::GraphicsPipeline(desc) => &desc.name,
        }
    }

    /// Kind of the resource.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Texture(_) => ResourceKind::Texture,
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::Framebuffer(_) => ResourceKind::Framebuffer,
            Self::RenderPass(_) => ResourceKind::RenderPass,
            Self::GraphicsPipeline(_) => ResourceKind::GraphicsPipeline,
        }
    }

    /// Handles of other graph resources this one is built from.
    pub fn dependencies(&self) -> Vec<ResourceHandle> {
        match self {
            Self::Framebuffer(desc) => std::iter::once(desc.render_pass)
                .chain(desc.attachments.iter().copied())
                .collect(),
            Self::GraphicsPipeline(GraphicsPipelineDesc {
                target: PipelineTarget::RenderPass(handle),
                ..
            }) => vec![*handle],
            _ => Vec::new(),
        }
    }

    /// The texture description, if this is a texture.
    pub fn as_texture(&self) -> Option<&TextureDesc> {
        match self {
            Self::Texture(desc) => Some(desc),
            _ => None,
        }
    }
}

impl From<TextureDesc> for ResourceDescriptor {
    fn from(desc: TextureDesc) -> Self {
        Self::Texture(desc)
    }
}

impl From<BufferDesc> for ResourceDescriptor {
    fn from(desc: BufferDesc) -> Self {
        Self::Buffer(desc)
    }
}

impl From<FramebufferDesc> for ResourceDescriptor {
    fn from(desc: FramebufferDesc) -> Self {
        Self::Framebuffer(desc)
    }
}

impl From<RenderPassDesc> for ResourceDescriptor {
    fn from(desc: RenderPassDesc) -> Self {
        Self::RenderPass(desc)
    }
}

impl From<GraphicsPipelineDesc> for ResourceDescriptor {
    fn from(desc: GraphicsPipelineDesc) -> Self {
        Self::GraphicsPipeline(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half(extent: Extent2d) -> Extent2d {
        Extent2d::new(extent.width / 2, extent.height / 2)
    }

    #[test]
    fn test_size_spec_resolve() {
        let swapchain = Extent2d::new(1280, 720);
        assert_eq!(
            SizeSpec::Absolute {
                width: 64,
                height: 32
            }
            .resolve(swapchain),
            Extent2d::new(64, 32)
        );
        assert_eq!(SizeSpec::SwapchainRelative.resolve(swapchain), swapchain);
        assert_eq!(
            SizeSpec::Scaled { factor: 0.5 }.resolve(swapchain),
            Extent2d::new(640, 360)
        );
        assert_eq!(
            SizeSpec::Custom {
                name: "half",
                resolve: half
            }
            .resolve(swapchain),
            Extent2d::new(640, 360)
        );
    }

    #[test]
    fn test_size_spec_resolve_zero_swapchain() {
        let minimized = Extent2d::new(0, 0);
        let one = Extent2d::new(1, 1);
        assert_eq!(SizeSpec::SwapchainRelative.resolve(minimized), one);
        assert_eq!(SizeSpec::Scaled { factor: 0.5 }.resolve(minimized), one);
        assert_eq!(
            SizeSpec::Custom {
                name: "half",
                resolve: half
            }
            .resolve(minimized),
            one
        );
    }

    #[test]
    fn test_size_spec_equality() {
        assert_eq!(SizeSpec::Scaled { factor: 0.5 }, SizeSpec::Scaled { factor: 0.5 });
        assert_ne!(SizeSpec::Scaled { factor: 0.5 }, SizeSpec::Scaled { factor: 0.25 });
        assert_ne!(SizeSpec::SwapchainRelative, SizeSpec::Scaled { factor: 1.0 });
        assert!(!SizeSpec::Absolute { width: 1, height: 1 }.depends_on_swapchain());
        assert!(SizeSpec::Scaled { factor: 2.0 }.depends_on_swapchain());
    }

    #[test]
    fn test_color_target_layouts() {
        let desc = TextureDesc::color_target(
            "hdr",
            TextureFormat::Rgba16Float,
            SizeSpec::SwapchainRelative,
        );
        assert_eq!(desc.layout, ImageLayout::ShaderReadOnly);
        assert_eq!(desc.initial_layout, ImageLayout::ColorAttachment);
        assert!(desc.dst_access.contains(AccessFlags::COLOR_ATTACHMENT_WRITE));
        assert!(desc.src_stages.contains(PipelineStages::FRAGMENT_SHADER));
        assert!(desc.needs_scope_transitions());
    }

    #[test]
    fn test_swapchain_target() {
        let desc = TextureDesc::swapchain_target("backbuffer", TextureFormat::Bgra8UnormSrgb);
        assert_eq!(desc.source, TextureSource::Swapchain);
        assert_eq!(desc.final_layout, ImageLayout::PresentSrc);
        assert_eq!(desc.src_stages, PipelineStages::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn test_framebuffer_dependencies() {
        let pass = ResourceHandle(1);
        let color = ResourceHandle(2);
        let depth = ResourceHandle(3);
        let desc: ResourceDescriptor = FramebufferDesc::new(
            "fb",
            pass,
            vec![color, depth],
            SizeSpec::SwapchainRelative,
        )
        .into();
        assert_eq!(desc.dependencies(), vec![pass, color, depth]);
        assert_eq!(desc.kind(), ResourceKind::Framebuffer);
    }

    #[test]
    fn test_kind_order() {
        assert!(ResourceKind::Texture < ResourceKind::RenderPass);
        assert!(ResourceKind::RenderPass < ResourceKind::Framebuffer);
        assert!(ResourceKind::Framebuffer < ResourceKind::GraphicsPipeline);
    }
}
