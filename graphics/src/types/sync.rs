//! Image layouts, pipeline stages and access masks.
//!
//! Bit values mirror their Vulkan counterparts so the Vulkan backend can
//! convert with a raw cast.

use bitflags::bitflags;

bitflags! {
    /// Pipeline stages used as barrier scopes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 0x0000_0001;
        const DRAW_INDIRECT = 0x0000_0002;
        const VERTEX_INPUT = 0x0000_0004;
        const VERTEX_SHADER = 0x0000_0008;
        const FRAGMENT_SHADER = 0x0000_0080;
        const EARLY_FRAGMENT_TESTS = 0x0000_0100;
        const LATE_FRAGMENT_TESTS = 0x0000_0200;
        const COLOR_ATTACHMENT_OUTPUT = 0x0000_0400;
        const COMPUTE_SHADER = 0x0000_0800;
        const TRANSFER = 0x0000_1000;
        const BOTTOM_OF_PIPE = 0x0000_2000;
        const HOST = 0x0000_4000;
        const ALL_GRAPHICS = 0x0000_8000;
        const ALL_COMMANDS = 0x0001_0000;
    }
}

bitflags! {
    /// Memory access types used as barrier scopes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 0x0000_0001;
        const INDEX_READ = 0x0000_0002;
        const VERTEX_ATTRIBUTE_READ = 0x0000_0004;
        const UNIFORM_READ = 0x0000_0008;
        const INPUT_ATTACHMENT_READ = 0x0000_0010;
        const SHADER_READ = 0x0000_0020;
        const SHADER_WRITE = 0x0000_0040;
        const COLOR_ATTACHMENT_READ = 0x0000_0080;
        const COLOR_ATTACHMENT_WRITE = 0x0000_0100;
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x0000_0200;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x0000_0400;
        const TRANSFER_READ = 0x0000_0800;
        const TRANSFER_WRITE = 0x0000_1000;
        const HOST_READ = 0x0000_2000;
        const HOST_WRITE = 0x0000_4000;
        const MEMORY_READ = 0x0000_8000;
        const MEMORY_WRITE = 0x0001_0000;
    }
}

/// Image layout states a texture can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents undefined. Only valid as a source layout.
    #[default]
    Undefined,
    /// Usable for everything, optimal for nothing.
    General,
    /// Color attachment writes.
    ColorAttachment,
    /// Depth/stencil attachment writes.
    DepthStencilAttachment,
    /// Depth testing plus sampling.
    DepthStencilReadOnly,
    /// Shader sampling.
    ShaderReadOnly,
    /// Transfer source.
    TransferSrc,
    /// Transfer destination.
    TransferDst,
    /// Presentation to the swapchain.
    PresentSrc,
}

impl ImageLayout {
    /// Stages that last touched an image left in this layout.
    pub fn producer_stages(self) -> PipelineStages {
        match self {
            Self::Undefined => PipelineStages::TOP_OF_PIPE,
            Self::General => PipelineStages::ALL_COMMANDS,
            Self::ColorAttachment => PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthStencilAttachment => PipelineStages::LATE_FRAGMENT_TESTS,
            Self::DepthStencilReadOnly => {
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::FRAGMENT_SHADER
            }
            Self::ShaderReadOnly => PipelineStages::FRAGMENT_SHADER,
            Self::TransferSrc | Self::TransferDst => PipelineStages::TRANSFER,
            Self::PresentSrc => PipelineStages::BOTTOM_OF_PIPE,
        }
    }

    /// Stages that will consume an image transitioned into this layout.
    pub fn consumer_stages(self) -> PipelineStages {
        match self {
            Self::Undefined => PipelineStages::TOP_OF_PIPE,
            Self::General => PipelineStages::ALL_COMMANDS,
            Self::ColorAttachment => PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthStencilAttachment | Self::DepthStencilReadOnly => {
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS
            }
            Self::ShaderReadOnly => PipelineStages::FRAGMENT_SHADER,
            Self::TransferSrc | Self::TransferDst => PipelineStages::TRANSFER,
            Self::PresentSrc => PipelineStages::BOTTOM_OF_PIPE,
        }
    }

    /// Writes that must be made available before leaving this layout.
    pub fn producer_access(self) -> AccessFlags {
        match self {
            Self::Undefined | Self::PresentSrc => AccessFlags::empty(),
            Self::General => AccessFlags::MEMORY_WRITE,
            Self::ColorAttachment => AccessFlags::COLOR_ATTACHMENT_WRITE,
            Self::DepthStencilAttachment => AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            Self::DepthStencilReadOnly | Self::ShaderReadOnly | Self::TransferSrc => {
                AccessFlags::empty()
            }
            Self::TransferDst => AccessFlags::TRANSFER_WRITE,
        }
    }

    /// Accesses performed once an image is in this layout.
    pub fn consumer_access(self) -> AccessFlags {
        match self {
            Self::Undefined | Self::PresentSrc => AccessFlags::empty(),
            Self::General => AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE,
            Self::ColorAttachment => {
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthStencilAttachment => {
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::DepthStencilReadOnly => {
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | AccessFlags::SHADER_READ
            }
            Self::ShaderReadOnly => AccessFlags::SHADER_READ,
            Self::TransferSrc => AccessFlags::TRANSFER_READ,
            Self::TransferDst => AccessFlags::TRANSFER_WRITE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_has_no_access() {
        assert!(ImageLayout::Undefined.producer_access().is_empty());
        assert_eq!(
            ImageLayout::Undefined.producer_stages(),
            PipelineStages::TOP_OF_PIPE
        );
    }

    #[test]
    fn test_attachment_layouts_write() {
        assert!(
            ImageLayout::ColorAttachment
                .consumer_access()
                .contains(AccessFlags::COLOR_ATTACHMENT_WRITE)
        );
        assert!(
            ImageLayout::DepthStencilAttachment
                .producer_access()
                .contains(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }
}
