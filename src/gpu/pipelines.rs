//! Pipeline construction. Every variant is built at startup; a shader that
//! fails validation aborts initialization.

use crate::error::GpuError;
use crate::kernel::{compute_shader, KernelLayout};
use crate::orchestrator::{RenderMode, VariantTable};

use super::mesh::MeshVertex;
use super::render::{mesh_instance_layout, meshes_shader, point_instance_layout, points_shader};
use super::uniforms::scene_bind_group_layout;
use super::DEPTH_FORMAT;

/// Run `build` inside a validation error scope.
fn validated<T>(device: &wgpu::Device, label: &str, build: impl FnOnce() -> T) -> Result<T, GpuError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(GpuError::PipelineCreation {
            label: label.to_string(),
            message: error.to_string(),
        }),
        None => Ok(value),
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layouts and the full pipeline table.
pub struct Pipelines {
    /// reference (read-only), refreshed (read-write), physics params.
    pub compute_layout: wgpu::BindGroupLayout,
    pub scene_layout: wgpu::BindGroupLayout,
    pub table: VariantTable<wgpu::ComputePipeline, wgpu::RenderPipeline>,
    pub workgroup_size: u32,
}

impl Pipelines {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        workgroup_size: u32,
        kernel_layout: KernelLayout,
    ) -> Result<Self, GpuError> {
        let compute_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Physics Bind Group Layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let scene_layout = scene_bind_group_layout(device);

        let compute_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Physics Pipeline Layout"),
            bind_group_layouts: &[&compute_layout],
            push_constant_ranges: &[],
        });
        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&scene_layout],
            push_constant_ranges: &[],
        });

        let table = VariantTable::try_build(
            |variant| {
                validated(device, variant.label(), || {
                    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(variant.label()),
                        source: wgpu::ShaderSource::Wgsl(
                            compute_shader(variant, kernel_layout, workgroup_size).into(),
                        ),
                    });
                    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(variant.label()),
                        layout: Some(&compute_pipeline_layout),
                        module: &module,
                        entry_point: Some("main"),
                        compilation_options: Default::default(),
                        cache: None,
                    })
                })
            },
            |mode| {
                let label = match mode {
                    RenderMode::Points => "Points Render Pipeline",
                    RenderMode::Meshes => "Meshes Render Pipeline",
                };
                validated(device, label, || {
                    create_render_pipeline(device, &render_pipeline_layout, surface_format, mode, label)
                })
            },
        )?;

        tracing::info!(workgroup_size, ?kernel_layout, "built 4 physics and 2 render pipelines");
        Ok(Self {
            compute_layout,
            scene_layout,
            table,
            workgroup_size,
        })
    }
}

fn create_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    format: wgpu::TextureFormat,
    mode: RenderMode,
    label: &str,
) -> wgpu::RenderPipeline {
    let (source, buffers, blend, cull_mode) = match mode {
        RenderMode::Points => (
            points_shader(),
            vec![point_instance_layout()],
            wgpu::BlendState::ALPHA_BLENDING,
            None,
        ),
        RenderMode::Meshes => (
            meshes_shader(),
            vec![MeshVertex::layout(), mesh_instance_layout()],
            wgpu::BlendState::REPLACE,
            Some(wgpu::Face::Back),
        ),
    };
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}
