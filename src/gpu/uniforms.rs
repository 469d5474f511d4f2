//! Per-frame scene uniforms and the ring of buffers they are written to.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

use super::camera::Camera;

/// Camera and drawing parameters shared by both render modes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneUniforms {
    pub camera_position: Vec3,
    /// Point sprite size in pixels.
    pub point_size: f32,
    pub world: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    /// Render target size in pixels.
    pub viewport: Vec2,
    /// Sphere radius per unit of cube-root mass in mesh mode.
    pub mesh_scale: f32,
    _pad: f32,
}

impl SceneUniforms {
    pub fn new(camera: &Camera, viewport: Vec2, point_size: f32, mesh_scale: f32) -> Self {
        let view = camera.view_matrix();
        let projection = camera.projection_matrix(viewport.x / viewport.y.max(1.0));
        Self {
            camera_position: camera.position(),
            point_size,
            world: Mat4::IDENTITY,
            view,
            projection,
            view_projection: projection * view,
            viewport,
            mesh_scale,
            _pad: 0.0,
        }
    }
}

/// WGSL declaration matching [`SceneUniforms`].
pub const SCENE_UNIFORMS_WGSL: &str = r#"
struct SceneUniforms {
    camera_position: vec3<f32>,
    point_size: f32,
    world: mat4x4<f32>,
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    viewport: vec2<f32>,
    mesh_scale: f32,
    _pad: f32,
};
"#;

pub(crate) fn scene_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Scene Uniform Bind Group Layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<SceneUniforms>() as u64),
            },
            count: None,
        }],
    })
}

/// Rotating set of uniform buffers, one per frame the CPU may run ahead, so
/// a frame never rewrites uniforms a queued frame still reads.
pub struct UniformRing {
    slots: Vec<(wgpu::Buffer, wgpu::BindGroup)>,
    current: usize,
}

impl UniformRing {
    pub fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, len: usize) -> Self {
        let slots = (0..len.max(1))
            .map(|i| {
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("Scene Uniform Buffer {i}")),
                    size: std::mem::size_of::<SceneUniforms>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("Scene Uniform Bind Group {i}")),
                    layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                });
                (buffer, bind_group)
            })
            .collect();
        Self { slots, current: 0 }
    }

    /// Move to the next slot and write this frame's uniforms into it.
    pub fn advance(&mut self, queue: &wgpu::Queue, uniforms: &SceneUniforms) -> &wgpu::BindGroup {
        self.current = (self.current + 1) % self.slots.len();
        let (buffer, bind_group) = &self.slots[self.current];
        queue.write_buffer(buffer, 0, bytemuck::bytes_of(uniforms));
        bind_group
    }

    pub fn current(&self) -> &wgpu::BindGroup {
        &self.slots[self.current].1
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
