//! Meshes instanced once per particle in mesh render mode.

use std::f32::consts::{PI, TAU};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
}

impl MeshVertex {
    pub(crate) const ATTRIBUTES: [wgpu::VertexAttribute; 2] = [
        wgpu::VertexAttribute {
            offset: 0,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: 12,
            shader_location: 1,
            format: wgpu::VertexFormat::Float32x3,
        },
    ];

    pub(crate) fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Everything needed to issue one indexed draw of a mesh.
#[derive(Debug)]
pub struct MeshDraw {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
    pub index_format: wgpu::IndexFormat,
}

impl MeshDraw {
    pub fn from_geometry(device: &wgpu::Device, label: &str, vertices: &[MeshVertex], indices: &[u16]) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Vertex Buffer")),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Index Buffer")),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            index_format: wgpu::IndexFormat::Uint16,
        }
    }

    /// A unit UV sphere.
    pub fn sphere(device: &wgpu::Device, stacks: u32, slices: u32) -> Self {
        let (vertices, indices) = uv_sphere(stacks, slices);
        Self::from_geometry(device, "Sphere", &vertices, &indices)
    }
}

/// Unit sphere tessellated into `stacks` latitude bands and `slices`
/// longitude segments. Triangles wind counter-clockwise seen from outside.
pub fn uv_sphere(stacks: u32, slices: u32) -> (Vec<MeshVertex>, Vec<u16>) {
    let stacks = stacks.max(2);
    let slices = slices.max(3);

    let mut vertices = Vec::with_capacity(((stacks + 1) * (slices + 1)) as usize);
    for i in 0..=stacks {
        let phi = PI * i as f32 / stacks as f32;
        for j in 0..=slices {
            let theta = TAU * j as f32 / slices as f32;
            let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
            vertices.push(MeshVertex {
                position: normal,
                normal,
            });
        }
    }

    let row = slices + 1;
    let mut indices = Vec::with_capacity((stacks * slices * 6) as usize);
    for i in 0..stacks {
        for j in 0..slices {
            let a = (i * row + j) as u16;
            let b = ((i + 1) * row + j) as u16;
            let c = ((i + 1) * row + j + 1) as u16;
            let d = (i * row + j + 1) as u16;
            if i != 0 {
                indices.extend_from_slice(&[a, d, b]);
            }
            if i != stacks - 1 {
                indices.extend_from_slice(&[d, c, b]);
            }
        }
    }
    (vertices, indices)
}
