//! Image layout transitions derived from texture descriptors.

use super::descriptor::TextureDesc;
use super::handle::ResourceHandle;
use crate::types::{AccessFlags, ImageAspect, ImageLayout, PipelineStages};

/// A layout transition of one graph texture, keyed by handle.
///
/// Barriers are plain data until the executor resolves the handle to an image
/// in the resource store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Texture being transitioned.
    pub handle: ResourceHandle,
    /// Layout before the barrier.
    pub old_layout: ImageLayout,
    /// Layout after the barrier.
    pub new_layout: ImageLayout,
    /// Stages that must finish before the transition.
    pub src_stages: PipelineStages,
    /// Stages that wait for the transition.
    pub dst_stages: PipelineStages,
    /// Writes made available.
    pub src_access: AccessFlags,
    /// Accesses made visible.
    pub dst_access: AccessFlags,
    /// Aspects covered.
    pub aspect: ImageAspect,
    /// Array layers covered, starting at 0.
    pub layer_count: u32,
    /// Mip levels covered, starting at 0.
    pub level_count: u32,
}

impl ImageBarrier {
    fn new(
        handle: ResourceHandle,
        desc: &TextureDesc,
        (old_layout, new_layout): (ImageLayout, ImageLayout),
        (src_stages, src_access): (PipelineStages, AccessFlags),
        (dst_stages, dst_access): (PipelineStages, AccessFlags),
    ) -> Self {
        Self {
            handle,
            old_layout,
            new_layout,
            // An empty stage mask is invalid on the source side of a barrier.
            src_stages: if src_stages.is_empty() {
                PipelineStages::TOP_OF_PIPE
            } else {
                src_stages
            },
            dst_stages: if dst_stages.is_empty() {
                PipelineStages::BOTTOM_OF_PIPE
            } else {
                dst_stages
            },
            src_access,
            dst_access,
            aspect: desc.aspect,
            layer_count: desc.array_layers,
            level_count: desc.mip_levels,
        }
    }

    /// Move a freshly created image from `Undefined` into its resting layout.
    ///
    /// Returns `None` if the resting layout is `Undefined`.
    pub fn bring_up(handle: ResourceHandle, desc: &TextureDesc) -> Option<Self> {
        (desc.layout != ImageLayout::Undefined).then(|| {
            Self::new(
                handle,
                desc,
                (ImageLayout::Undefined, desc.layout),
                (PipelineStages::TOP_OF_PIPE, AccessFlags::empty()),
                (desc.layout.consumer_stages(), desc.layout.consumer_access()),
            )
        })
    }

    /// Resting layout into the in-scope layout, recorded before a rendering scope.
    pub fn before_scope(handle: ResourceHandle, desc: &TextureDesc) -> Option<Self> {
        (desc.layout != desc.initial_layout).then(|| {
            Self::new(
                handle,
                desc,
                (desc.layout, desc.initial_layout),
                (desc.src_stages, desc.src_access),
                (desc.dst_stages, desc.dst_access),
            )
        })
    }

    /// In-scope layout into the final layout, recorded after a rendering scope.
    pub fn after_scope(handle: ResourceHandle, desc: &TextureDesc) -> Option<Self> {
        (desc.initial_layout != desc.final_layout).then(|| {
            Self::new(
                handle,
                desc,
                (desc.initial_layout, desc.final_layout),
                (desc.dst_stages, desc.initial_layout.producer_access()),
                (desc.src_stages, desc.final_layout.consumer_access()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::descriptor::SizeSpec;
    use crate::types::TextureFormat;

    #[test]
    fn test_color_target_scope_barriers() {
        let desc = TextureDesc::color_target("hdr", TextureFormat::Rgba16Float, SizeSpec::SwapchainRelative);
        let handle = ResourceHandle(1);

        let before = ImageBarrier::before_scope(handle, &desc);
        assert_eq!(
            before.map(|b| (b.old_layout, b.new_layout)),
            Some((ImageLayout::ShaderReadOnly, ImageLayout::ColorAttachment))
        );

        let after = ImageBarrier::after_scope(handle, &desc);
        assert!(after.is_some_and(|b| b.src_access.contains(AccessFlags::COLOR_ATTACHMENT_WRITE)
            && b.dst_access.contains(AccessFlags::SHADER_READ)));
    }

    #[test]
    fn test_swapchain_barriers() {
        let desc = TextureDesc::swapchain_target("backbuffer", TextureFormat::Bgra8Unorm);
        let handle = ResourceHandle(7);

        assert_eq!(ImageBarrier::bring_up(handle, &desc), None);
        let before = ImageBarrier::before_scope(handle, &desc);
        assert!(before.is_some_and(|b| b.old_layout == ImageLayout::Undefined
            && b.src_stages == PipelineStages::COLOR_ATTACHMENT_OUTPUT));
        let after = ImageBarrier::after_scope(handle, &desc);
        assert_eq!(after.map(|b| b.new_layout), Some(ImageLayout::PresentSrc));
    }

    #[test]
    fn test_no_barrier_when_layouts_match() {
        let desc = TextureDesc::new(
            "lut",
            TextureFormat::Rgba8Unorm,
            SizeSpec::Absolute {
                width: 16,
                height: 16,
            },
        );
        assert_eq!(ImageBarrier::before_scope(ResourceHandle(1), &desc), None);
        assert_eq!(ImageBarrier::after_scope(ResourceHandle(1), &desc), None);
        assert!(ImageBarrier::bring_up(ResourceHandle(1), &desc).is_some());
    }
}
