//! Render shaders for both particle render modes.
//!
//! The particle buffer is bound directly as an instance vertex buffer, so the
//! draw reads exactly the records the physics step just wrote.

use crate::particle::{Particle, CHARGE_OFFSET, MASS_OFFSET, POSITION_OFFSET};

use super::uniforms::SCENE_UNIFORMS_WGSL;

const fn particle_attributes<const BASE: u32>() -> [wgpu::VertexAttribute; 3] {
    [
        wgpu::VertexAttribute {
            offset: POSITION_OFFSET,
            shader_location: BASE,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: MASS_OFFSET,
            shader_location: BASE + 1,
            format: wgpu::VertexFormat::Float32,
        },
        wgpu::VertexAttribute {
            offset: CHARGE_OFFSET,
            shader_location: BASE + 2,
            format: wgpu::VertexFormat::Float32,
        },
    ]
}

const POINT_INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 3] = particle_attributes::<0>();
const MESH_INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 3] = particle_attributes::<2>();

fn instance_layout(attributes: &'static [wgpu::VertexAttribute]) -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Particle>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes,
    }
}

/// Particle records as instances, starting at shader location 0.
pub(crate) fn point_instance_layout() -> wgpu::VertexBufferLayout<'static> {
    instance_layout(&POINT_INSTANCE_ATTRIBUTES)
}

/// Particle records as instances, after the two mesh vertex attributes.
pub(crate) fn mesh_instance_layout() -> wgpu::VertexBufferLayout<'static> {
    instance_layout(&MESH_INSTANCE_ATTRIBUTES)
}

const CHARGE_COLOR_WGSL: &str = r#"
fn charge_color(charge: f32) -> vec3<f32> {
    let neutral = vec3<f32>(0.9, 0.9, 0.85);
    let t = clamp(abs(charge), 0.0, 1.0);
    if charge > 0.0 {
        return mix(neutral, vec3<f32>(1.0, 0.35, 0.2), t);
    }
    return mix(neutral, vec3<f32>(0.25, 0.5, 1.0), t);
}
"#;

/// Camera-facing quads with a constant pixel size.
pub fn points_shader() -> String {
    format!(
        r#"{SCENE_UNIFORMS_WGSL}
@group(0) @binding(0) var<uniform> scene: SceneUniforms;
{CHARGE_COLOR_WGSL}
struct VertexOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec3<f32>,
    @location(1) uv: vec2<f32>,
}};

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @location(0) particle_pos: vec3<f32>,
    @location(1) mass: f32,
    @location(2) charge: f32,
) -> VertexOutput {{
    var quad_vertices = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    let corner = quad_vertices[vertex_index];

    var clip = scene.view_projection * scene.world * vec4<f32>(particle_pos, 1.0);
    let size = scene.point_size * (0.75 + 0.25 * sqrt(mass));
    clip = vec4<f32>(clip.xy + corner * size / scene.viewport * clip.w, clip.zw);

    var out: VertexOutput;
    out.clip_position = clip;
    out.color = charge_color(charge);
    out.uv = corner;
    return out;
}}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {{
    let d = length(in.uv);
    if d > 1.0 {{
        discard;
    }}
    let alpha = 1.0 - smoothstep(0.6, 1.0, d);
    return vec4<f32>(in.color, alpha);
}}
"#
    )
}

/// Instanced meshes scaled by the cube root of the particle mass.
pub fn meshes_shader() -> String {
    format!(
        r#"{SCENE_UNIFORMS_WGSL}
@group(0) @binding(0) var<uniform> scene: SceneUniforms;
{CHARGE_COLOR_WGSL}
struct VertexOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) world_position: vec3<f32>,
}};

@vertex
fn vs_main(
    @location(0) vertex_pos: vec3<f32>,
    @location(1) vertex_normal: vec3<f32>,
    @location(2) particle_pos: vec3<f32>,
    @location(3) mass: f32,
    @location(4) charge: f32,
) -> VertexOutput {{
    let radius = scene.mesh_scale * pow(max(mass, 0.0), 1.0 / 3.0);
    let world = scene.world * vec4<f32>(particle_pos + vertex_pos * radius, 1.0);

    var out: VertexOutput;
    out.clip_position = scene.view_projection * world;
    out.color = charge_color(charge);
    out.normal = vertex_normal;
    out.world_position = world.xyz;
    return out;
}}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {{
    let to_camera = normalize(scene.camera_position - in.world_position);
    let diffuse = max(dot(normalize(in.normal), to_camera), 0.0);
    return vec4<f32>(in.color * (0.25 + 0.75 * diffuse), 1.0);
}}
"#
    )
}
