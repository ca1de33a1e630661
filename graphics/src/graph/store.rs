//! Compiled GPU resources keyed by handle.
//!
//! The store owns every GPU object the graph created. Entries are shared
//! through `Arc` so passes can hold on to what they looked up during
//! `compile()`; the GPU object is released once the store and every pass have
//! dropped it.
//!
//! Swapchain-backed textures and the framebuffers built on them occupy a run
//! of consecutive handles: image `i` lives at `handle.offset(i)`. Use the
//! `resolve_*` lookups during recording to pick the entry for the acquired
//! image.

use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::{
    BufferDesc, FramebufferDesc, GraphicsPipelineDesc, RenderPassDesc, ResourceKind, TextureDesc,
};
use super::handle::ResourceHandle;
use crate::backend::{GpuBuffer, GpuFramebuffer, GpuImage, GpuPipeline, GpuRenderPass};
use crate::types::Extent2d;

/// A created image.
#[derive(Debug)]
pub struct CompiledTexture {
    /// Store key.
    pub handle: ResourceHandle,
    /// Descriptor the image was built from.
    pub desc: TextureDesc,
    /// Resolved size.
    pub extent: Extent2d,
    /// GPU image.
    pub image: GpuImage,
    /// Swapchain image index, for swapchain-backed textures.
    pub swapchain_index: Option<u32>,
}

/// A created buffer.
#[derive(Debug)]
pub struct CompiledBuffer {
    /// Store key.
    pub handle: ResourceHandle,
    /// Descriptor the buffer was built from.
    pub desc: BufferDesc,
    /// GPU buffer.
    pub buffer: GpuBuffer,
}

/// A created render pass object.
#[derive(Debug)]
pub struct CompiledRenderPass {
    /// Store key.
    pub handle: ResourceHandle,
    /// Descriptor the render pass was built from.
    pub desc: RenderPassDesc,
    /// GPU render pass.
    pub render_pass: GpuRenderPass,
}

/// A created framebuffer.
#[derive(Debug)]
pub struct CompiledFramebuffer {
    /// Store key.
    pub handle: ResourceHandle,
    /// Descriptor the framebuffer was built from.
    pub desc: FramebufferDesc,
    /// Resolved size.
    pub extent: Extent2d,
    /// Store keys of the attachment textures actually bound, per-image
    /// handles substituted for swapchain textures.
    pub attachments: Vec<ResourceHandle>,
    /// GPU framebuffer.
    pub framebuffer: GpuFramebuffer,
    /// Swapchain image index, for framebuffers over swapchain textures.
    pub swapchain_index: Option<u32>,
}

/// A created graphics pipeline.
#[derive(Debug)]
pub struct CompiledPipeline {
    /// Store key.
    pub handle: ResourceHandle,
    /// Descriptor the pipeline was built from.
    pub desc: GraphicsPipelineDesc,
    /// Attachment interface the pipeline renders into.
    pub target: RenderPassDesc,
    /// GPU pipeline.
    pub pipeline: GpuPipeline,
}

/// Any compiled resource.
#[derive(Debug, Clone)]
pub enum CompiledResource {
    /// Image.
    Texture(Arc<CompiledTexture>),
    /// Buffer.
    Buffer(Arc<CompiledBuffer>),
    /// Render pass object.
    RenderPass(Arc<CompiledRenderPass>),
    /// Framebuffer.
    Framebuffer(Arc<CompiledFramebuffer>),
    /// Graphics pipeline.
    Pipeline(Arc<CompiledPipeline>),
}

impl CompiledResource {
    /// Kind of the resource.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Texture(_) => ResourceKind::Texture,
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::RenderPass(_) => ResourceKind::RenderPass,
            Self::Framebuffer(_) => ResourceKind::Framebuffer,
            Self::Pipeline(_) => ResourceKind::GraphicsPipeline,
        }
    }

    /// Swapchain image index of per-image entries.
    pub fn swapchain_index(&self) -> Option<u32> {
        match self {
            Self::Texture(t) => t.swapchain_index,
            Self::Framebuffer(f) => f.swapchain_index,
            _ => None,
        }
    }
}

/// Map from handle to compiled resource.
#[derive(Debug, Default)]
pub struct ResourceStore {
    entries: HashMap<ResourceHandle, CompiledResource>,
}

impl ResourceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, returning the previous one.
    pub fn insert(
        &mut self,
        handle: ResourceHandle,
        resource: CompiledResource,
    ) -> Option<CompiledResource> {
        self.entries.insert(handle, resource)
    }

    /// Remove an entry.
    pub fn remove(&mut self, handle: ResourceHandle) -> Option<CompiledResource> {
        self.entries.remove(&handle)
    }

    /// Remove an entry together with its per-swapchain-image run.
    ///
    /// Returns the number of entries removed.
    pub fn remove_run(&mut self, handle: ResourceHandle) -> usize {
        let Some(first) = self.entries.remove(&handle) else {
            return 0;
        };
        let mut removed = 1;
        if first.swapchain_index().is_some() {
            let mut index = 1;
            while self
                .entries
                .get(&handle.offset(index))
                .is_some_and(|e| e.swapchain_index() == Some(index))
            {
                self.entries.remove(&handle.offset(index));
                removed += 1;
                index += 1;
            }
        }
        removed
    }

    /// Look up any entry.
    pub fn get(&self, handle: ResourceHandle) -> Option<&CompiledResource> {
        self.entries.get(&handle)
    }

    /// Returns true if an entry exists.
    pub fn contains(&self, handle: ResourceHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Look up a texture.
    pub fn texture(&self, handle: ResourceHandle) -> Option<&Arc<CompiledTexture>> {
        match self.entries.get(&handle) {
            Some(CompiledResource::Texture(t)) => Some(t),
            _ => None,
        }
    }

    /// Look up a buffer.
    pub fn buffer(&self, handle: ResourceHandle) -> Option<&Arc<CompiledBuffer>> {
        match self.entries.get(&handle) {
            Some(CompiledResource::Buffer(b)) => Some(b),
            _ => None,
        }
    }

    /// Look up a render pass object.
    pub fn render_pass(&self, handle: ResourceHandle) -> Option<&Arc<CompiledRenderPass>> {
        match self.entries.get(&handle) {
            Some(CompiledResource::RenderPass(r)) => Some(r),
            _ => None,
        }
    }

    /// Look up a framebuffer.
    pub fn framebuffer(&self, handle: ResourceHandle) -> Option<&Arc<CompiledFramebuffer>> {
        match self.entries.get(&handle) {
            Some(CompiledResource::Framebuffer(f)) => Some(f),
            _ => None,
        }
    }

    /// Look up a pipeline.
    pub fn pipeline(&self, handle: ResourceHandle) -> Option<&Arc<CompiledPipeline>> {
        match self.entries.get(&handle) {
            Some(CompiledResource::Pipeline(p)) => Some(p),
            _ => None,
        }
    }

    /// The store key of a texture for swapchain image `image_index`.
    ///
    /// Ordinary textures resolve to themselves.
    pub fn resolve_texture_handle(
        &self,
        handle: ResourceHandle,
        image_index: u32,
    ) -> ResourceHandle {
        match self.texture(handle) {
            Some(t) if t.swapchain_index.is_some() => handle.offset(image_index),
            _ => handle,
        }
    }

    /// Look up a texture for swapchain image `image_index`.
    pub fn resolve_texture(
        &self,
        handle: ResourceHandle,
        image_index: u32,
    ) -> Option<&Arc<CompiledTexture>> {
        self.texture(self.resolve_texture_handle(handle, image_index))
    }

    /// Look up a framebuffer for swapchain image `image_index`.
    pub fn resolve_framebuffer(
        &self,
        handle: ResourceHandle,
        image_index: u32,
    ) -> Option<&Arc<CompiledFramebuffer>> {
        match self.framebuffer(handle) {
            Some(f) if f.swapchain_index.is_some() => self.framebuffer(handle.offset(image_index)),
            other => other,
        }
    }

    /// All keys, in no particular order.
    pub fn handles(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.entries.keys().copied()
    }

    /// Number of entries of one kind.
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.entries.values().filter(|e| e.kind() == kind).count()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

static_assertions::assert_impl_all!(ResourceStore: Send, Sync);
