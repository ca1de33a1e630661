//! Per-frame scene data handed to every pass.
//!
//! The scene producer fills a [`PerFrameData`] each frame. The executor
//! uploads its camera, lights, bones and shadow matrices into the current
//! frame slot's [`FrameBuffers`] and passes the record itself, untouched, to
//! every pass's `record()`.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::backend::{CommandBuffer, GpuBackend, GpuBuffer, GpuDescriptorSet};
use crate::error::GraphicsError;
use crate::graph::descriptor::BufferDesc;
use crate::types::{BufferUsage, IndexFormat, MemoryLocation};

/// Scene entity identifier.
pub type EntityId = u64;

/// GPU geometry of a mesh.
#[derive(Debug, Clone)]
pub struct MeshBinding {
    /// Vertex buffers bound from slot 0.
    pub vertex_buffers: Vec<Arc<GpuBuffer>>,
    /// Index buffer and its element type.
    pub index_buffer: Option<(Arc<GpuBuffer>, IndexFormat)>,
    /// Number of indices, or vertices when not indexed.
    pub element_count: u32,
}

impl MeshBinding {
    /// Bind the geometry and draw `instance_count` instances.
    pub fn record(&self, cmd: &mut CommandBuffer, instance_count: u32) {
        let buffers: Vec<(&GpuBuffer, u64)> =
            self.vertex_buffers.iter().map(|b| (b.as_ref(), 0)).collect();
        if !buffers.is_empty() {
            cmd.bind_vertex_buffers(0, &buffers);
        }
        match &self.index_buffer {
            Some((buffer, format)) => {
                cmd.bind_index_buffer(buffer, 0, *format);
                cmd.draw_indexed(self.element_count, instance_count, 0, 0, 0);
            }
            None => cmd.draw(self.element_count, instance_count, 0, 0),
        }
    }
}

/// One drawable entity.
#[derive(Debug, Clone)]
pub struct DrawItem {
    /// Geometry.
    pub mesh: Arc<MeshBinding>,
    /// Model-to-world transform.
    pub transform: Mat4,
    /// Resolved material descriptor set.
    pub material: Option<Arc<GpuDescriptorSet>>,
}

/// Shadow casting parameters of a light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowParams {
    /// Index into [`PerFrameData::shadow_matrices`].
    pub matrix_index: u32,
    /// Constant depth bias.
    pub bias: f32,
}

/// Kind-specific light parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Infinitely distant light.
    Directional {
        /// Direction the light travels.
        direction: Vec3,
    },
    /// Omnidirectional light.
    Point {
        /// World position.
        position: Vec3,
        /// Influence radius.
        range: f32,
    },
    /// Cone light.
    Spot {
        /// World position.
        position: Vec3,
        /// Cone axis.
        direction: Vec3,
        /// Influence radius.
        range: f32,
        /// Full-intensity half angle, radians.
        inner_angle: f32,
        /// Falloff half angle, radians.
        outer_angle: f32,
    },
}

/// A light in the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    /// Kind and geometry.
    pub kind: LightKind,
    /// Linear RGB color.
    pub color: Vec3,
    /// Intensity multiplier.
    pub strength: f32,
    /// Shadow parameters for shadow casters.
    pub shadow: Option<ShadowParams>,
}

impl Light {
    /// Create a light without shadows.
    pub fn new(kind: LightKind, color: Vec3, strength: f32) -> Self {
        Self {
            kind,
            color,
            strength,
            shadow: None,
        }
    }

    /// Make the light cast shadows.
    pub fn with_shadow(mut self, shadow: ShadowParams) -> Self {
        self.shadow = Some(shadow);
        self
    }

    /// Pack into the shader-side layout.
    pub fn to_gpu(&self) -> GpuLight {
        let (position, direction_type, cones) = match self.kind {
            LightKind::Point { position, range } => (position.extend(range), Vec4::ZERO, [0.0; 2]),
            LightKind::Spot {
                position,
                direction,
                range,
                inner_angle,
                outer_angle,
            } => (
                position.extend(range),
                direction.normalize_or_zero().extend(1.0),
                [inner_angle.cos(), outer_angle.cos()],
            ),
            LightKind::Directional { direction } => (
                Vec4::new(0.0, 0.0, 0.0, f32::INFINITY),
                direction.normalize_or_zero().extend(2.0),
                [0.0; 2],
            ),
        };
        let (shadow_index, bias) = match self.shadow {
            Some(shadow) => (shadow.matrix_index as f32, shadow.bias),
            None => (-1.0, 0.0),
        };

        GpuLight {
            position,
            color_strength: self.color.extend(self.strength),
            direction_type,
            params: Vec4::new(cones[0], cones[1], shadow_index, bias),
        }
    }
}

/// Shader-side light record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    /// xyz = position, w = range
    pub position: Vec4,
    /// xyz = color, w = strength
    pub color_strength: Vec4,
    /// xyz = direction, w = light type (0=point, 1=spot, 2=directional)
    pub direction_type: Vec4,
    /// x = cos(inner), y = cos(outer), z = shadow matrix index or -1, w = bias
    pub params: Vec4,
}

/// Shader-side camera block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuCamera {
    /// World-to-view.
    pub view: Mat4,
    /// View-to-clip.
    pub projection: Mat4,
    /// World-to-clip.
    pub view_projection: Mat4,
    /// xyz = camera position
    pub position: Vec4,
    /// x = light count, y = bone count, z = shadow matrix count
    pub counts: [u32; 4],
}

/// Everything the scene producer delivers for one frame.
#[derive(Debug, Clone)]
pub struct PerFrameData {
    /// World-to-view matrix.
    pub view: Mat4,
    /// View-to-clip matrix.
    pub projection: Mat4,
    /// Camera world position.
    pub camera_position: Vec3,
    /// Drawables keyed by entity, iterated in entity order.
    pub draw_items: BTreeMap<EntityId, DrawItem>,
    /// Lights.
    pub lights: Vec<Light>,
    /// Packed skinning matrices.
    pub bones: Vec<Mat4>,
    /// Light-space matrices of shadow maps.
    pub shadow_matrices: Vec<Mat4>,
}

impl Default for PerFrameData {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO)
    }
}

impl PerFrameData {
    /// Create frame data with a camera and no content.
    pub fn new(view: Mat4, projection: Mat4, camera_position: Vec3) -> Self {
        Self {
            view,
            projection,
            camera_position,
            draw_items: BTreeMap::new(),
            lights: Vec::new(),
            bones: Vec::new(),
            shadow_matrices: Vec::new(),
        }
    }

    /// Pack the camera block.
    pub fn gpu_camera(&self) -> GpuCamera {
        GpuCamera {
            view: self.view,
            projection: self.projection,
            view_projection: self.projection * self.view,
            position: self.camera_position.extend(1.0),
            counts: [
                self.lights.len() as u32,
                self.bones.len() as u32,
                self.shadow_matrices.len() as u32,
                0,
            ],
        }
    }

    /// Pack every light.
    pub fn gpu_lights(&self) -> Vec<GpuLight> {
        self.lights.iter().map(Light::to_gpu).collect()
    }
}

/// Capacities of the per-slot buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Lights per frame.
    pub max_lights: u32,
    /// Bone matrices per frame.
    pub max_bones: u32,
    /// Shadow matrices per frame.
    pub max_shadow_matrices: u32,
}

/// GPU copies of one frame slot's [`PerFrameData`].
///
/// One instance per frame in flight, so the CPU never writes a buffer the GPU
/// may still be reading.
#[derive(Debug)]
pub struct FrameBuffers {
    /// Camera uniform block.
    pub camera: GpuBuffer,
    /// Light storage buffer.
    pub lights: GpuBuffer,
    /// Bone storage buffer.
    pub bones: GpuBuffer,
    /// Shadow matrix storage buffer.
    pub shadow_matrices: GpuBuffer,
    limits: FrameLimits,
    light_count: u32,
    bone_count: u32,
}

impl FrameBuffers {
    pub(crate) fn new(
        backend: &dyn GpuBackend,
        slot: usize,
        limits: FrameLimits,
    ) -> Result<Self, GraphicsError> {
        let create = |name: &str, size: usize, usage: BufferUsage| {
            backend.create_buffer(
                &BufferDesc::new(format!("frame{}_{}", slot, name), size.max(16) as u64, usage)
                    .with_location(MemoryLocation::CpuToGpu),
            )
        };
        let mat_size = std::mem::size_of::<Mat4>();

        Ok(Self {
            camera: create("camera", std::mem::size_of::<GpuCamera>(), BufferUsage::UNIFORM)?,
            lights: create(
                "lights",
                limits.max_lights as usize * std::mem::size_of::<GpuLight>(),
                BufferUsage::STORAGE,
            )?,
            bones: create(
                "bones",
                limits.max_bones as usize * mat_size,
                BufferUsage::STORAGE,
            )?,
            shadow_matrices: create(
                "shadows",
                limits.max_shadow_matrices as usize * mat_size,
                BufferUsage::STORAGE,
            )?,
            limits,
            light_count: 0,
            bone_count: 0,
        })
    }

    /// Copy a frame's data into the buffers.
    ///
    /// Fails with [`GraphicsError::ResourceExhausted`] if the frame has more
    /// lights, bones or shadow matrices than the buffers hold.
    pub(crate) fn upload(
        &mut self,
        backend: &dyn GpuBackend,
        data: &PerFrameData,
    ) -> Result<(), GraphicsError> {
        check_capacity("lights", data.lights.len(), self.limits.max_lights)?;
        check_capacity("bones", data.bones.len(), self.limits.max_bones)?;
        check_capacity(
            "shadow matrices",
            data.shadow_matrices.len(),
            self.limits.max_shadow_matrices,
        )?;

        backend.write_buffer(&self.camera, 0, bytemuck::bytes_of(&data.gpu_camera()))?;
        if !data.lights.is_empty() {
            backend.write_buffer(&self.lights, 0, bytemuck::cast_slice(&data.gpu_lights()))?;
        }
        if !data.bones.is_empty() {
            backend.write_buffer(&self.bones, 0, bytemuck::cast_slice(&data.bones))?;
        }
        if !data.shadow_matrices.is_empty() {
            backend.write_buffer(
                &self.shadow_matrices,
                0,
                bytemuck::cast_slice(&data.shadow_matrices),
            )?;
        }

        self.light_count = data.lights.len() as u32;
        self.bone_count = data.bones.len() as u32;
        Ok(())
    }

    /// Lights uploaded for the current frame.
    pub fn light_count(&self) -> u32 {
        self.light_count
    }

    /// Bones uploaded for the current frame.
    pub fn bone_count(&self) -> u32 {
        self.bone_count
    }

    /// Buffer capacities.
    pub fn limits(&self) -> FrameLimits {
        self.limits
    }
}

fn check_capacity(resource: &'static str, requested: usize, capacity: u32) -> Result<(), GraphicsError> {
    if requested > capacity as usize {
        log::error!(
            "Per-frame {} buffer too small: {} requested, capacity {}",
            resource,
            requested,
            capacity
        );
        return Err(GraphicsError::ResourceExhausted {
            resource,
            requested,
            capacity: capacity as usize,
        });
    }
    Ok(())
}
