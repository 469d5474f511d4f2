//! All-pairs force and integration kernel.
//!
//! For every particle `i` the kernel sums, over every other particle `j`:
//!
//! - gravity: `-G * m_j * (p_i - p_j) / |p_i - p_j|^3`
//! - the electric field `k * q_j * (p_i - p_j) / |p_i - p_j|^3`, scaled once by
//!   `q_i / m_i` after the loop so the division happens per particle, not per
//!   pair.
//!
//! Pairs closer than `sqrt(epsilon)` contribute nothing, which also removes
//! the self-interaction. The step is symplectic Euler: the acceleration is
//! evaluated at the reference positions, then `v += a * dt` and
//! `p += v * dt`.
//!
//! Each flag combination compiles to its own shader ([`KernelVariant`]) with
//! the flags baked in as WGSL constants, so a pipeline never branches on them
//! at run time. [`cpu`] mirrors the shader arithmetic for tests and headless
//! runs.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::particle::{PARTICLE_WGSL, THREADGROUP_PARTICLE_WGSL};

/// Which forces a compute pipeline evaluates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelVariant {
    /// No forces; particles coast.
    Ballistic,
    Gravity,
    Electrostatic,
    GravityElectrostatic,
}

impl KernelVariant {
    pub const ALL: [KernelVariant; 4] = [
        KernelVariant::Ballistic,
        KernelVariant::Gravity,
        KernelVariant::Electrostatic,
        KernelVariant::GravityElectrostatic,
    ];

    pub fn from_flags(gravity: bool, electrostatics: bool) -> Self {
        match (gravity, electrostatics) {
            (false, false) => KernelVariant::Ballistic,
            (true, false) => KernelVariant::Gravity,
            (false, true) => KernelVariant::Electrostatic,
            (true, true) => KernelVariant::GravityElectrostatic,
        }
    }

    pub fn gravity(self) -> bool {
        matches!(self, KernelVariant::Gravity | KernelVariant::GravityElectrostatic)
    }

    pub fn electrostatics(self) -> bool {
        matches!(
            self,
            KernelVariant::Electrostatic | KernelVariant::GravityElectrostatic
        )
    }

    /// Whether any pair interaction is evaluated.
    pub fn has_forces(self) -> bool {
        self != KernelVariant::Ballistic
    }

    /// Position in [`KernelVariant::ALL`].
    pub fn index(self) -> usize {
        match self {
            KernelVariant::Ballistic => 0,
            KernelVariant::Gravity => 1,
            KernelVariant::Electrostatic => 2,
            KernelVariant::GravityElectrostatic => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            KernelVariant::Ballistic => "Ballistic Kernel",
            KernelVariant::Gravity => "Gravity Kernel",
            KernelVariant::Electrostatic => "Electrostatic Kernel",
            KernelVariant::GravityElectrostatic => "Gravity+Electrostatic Kernel",
        }
    }
}

/// How the pair loop reads the other particles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelLayout {
    /// One invocation per particle, every pair read from global memory.
    Naive,
    /// Tiles of the reference buffer staged through workgroup memory.
    #[default]
    Tiled,
}

/// Physical constants in scene units (not SI).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConstants {
    pub gravitational_constant: f32,
    pub coulomb_constant: f32,
    /// Squared distance below which a pair contributes nothing.
    pub close_approach_epsilon: f32,
    pub time_step: f32,
}

impl Default for PhysicsConstants {
    fn default() -> Self {
        Self {
            gravitational_constant: 1.0,
            coulomb_constant: 1.0,
            close_approach_epsilon: 1e-3,
            time_step: 1.0 / 60.0,
        }
    }
}

/// Uniform block consumed by the compute shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PhysicsParams {
    pub particle_count: u32,
    pub gravitational_constant: f32,
    pub coulomb_constant: f32,
    pub delta_time: f32,
    pub epsilon: f32,
    _pad: [f32; 3],
}

impl PhysicsParams {
    pub fn new(particle_count: u32, constants: &PhysicsConstants) -> Self {
        Self {
            particle_count,
            gravitational_constant: constants.gravitational_constant,
            coulomb_constant: constants.coulomb_constant,
            delta_time: constants.time_step,
            epsilon: constants.close_approach_epsilon,
            _pad: [0.0; 3],
        }
    }
}

const PHYSICS_PARAMS_WGSL: &str = r#"
struct PhysicsParams {
    particle_count: u32,
    gravitational_constant: f32,
    coulomb_constant: f32,
    delta_time: f32,
    epsilon: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};
"#;

const INTERACTION_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> reference: array<Particle>;
@group(0) @binding(1) var<storage, read_write> refreshed: array<Particle>;
@group(0) @binding(2) var<uniform> params: PhysicsParams;

struct Accumulator {
    gravity: vec3<f32>,
    field: vec3<f32>,
};

fn interact(acc: Accumulator, position: vec3<f32>, other: ThreadgroupParticle) -> Accumulator {
    var out = acc;
    let r = position - other.position;
    let d2 = dot(r, r);
    // Nearly coincident pairs are skipped.
    if d2 < params.epsilon {
        return out;
    }
    let inv_r = inverseSqrt(d2);
    let inv_r3 = inv_r * inv_r * inv_r;
    if GRAVITY_ENABLED {
        out.gravity -= r * (other.mass * inv_r3);
    }
    if ELECTROSTATICS_ENABLED {
        out.field += r * (other.charge * inv_r3);
    }
    return out;
}

fn integrate(index: u32, me: Particle, acc: Accumulator) {
    var p = me;
    var a = acc.gravity * params.gravitational_constant;
    if ELECTROSTATICS_ENABLED {
        a += acc.field * (params.coulomb_constant * (me.charge / me.mass));
    }
    p.acceleration = a;
    p.velocity = me.velocity + a * params.delta_time;
    p.position = me.position + p.velocity * params.delta_time;
    p.angular_velocity = me.angular_velocity + me.angular_acceleration * params.delta_time;
    refreshed[index] = p;
}
"#;

/// Generate the compute shader for one variant.
pub fn compute_shader(variant: KernelVariant, layout: KernelLayout, workgroup_size: u32) -> String {
    let main = match layout {
        KernelLayout::Naive => naive_main(workgroup_size),
        KernelLayout::Tiled => tiled_main(workgroup_size),
    };
    format!(
        r#"// {label}
{PARTICLE_WGSL}
{THREADGROUP_PARTICLE_WGSL}
{PHYSICS_PARAMS_WGSL}
const GRAVITY_ENABLED: bool = {gravity};
const ELECTROSTATICS_ENABLED: bool = {electrostatics};
{INTERACTION_WGSL}
{main}"#,
        label = variant.label(),
        gravity = variant.gravity(),
        electrostatics = variant.electrostatics(),
    )
}

fn naive_main(workgroup_size: u32) -> String {
    format!(
        r#"
@compute @workgroup_size({workgroup_size})
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {{
    let index = global_id.x;
    let count = params.particle_count;
    if index >= count {{
        return;
    }}

    let me = reference[index];
    var acc = Accumulator(vec3<f32>(0.0), vec3<f32>(0.0));
    if GRAVITY_ENABLED || ELECTROSTATICS_ENABLED {{
        for (var j = 0u; j < count; j += 1u) {{
            if j == index {{
                continue;
            }}
            let other = reference[j];
            acc = interact(acc, me.position, ThreadgroupParticle(other.mass, other.charge, other.position));
        }}
    }}
    integrate(index, me, acc);
}}
"#
    )
}

fn tiled_main(workgroup_size: u32) -> String {
    format!(
        r#"
var<workgroup> tile: array<ThreadgroupParticle, {workgroup_size}>;

@compute @workgroup_size({workgroup_size})
fn main(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(local_invocation_id) local_id: vec3<u32>,
) {{
    let index = global_id.x;
    let count = params.particle_count;
    // Out-of-range invocations still reach every barrier below.
    let is_active = index < count;

    var me: Particle;
    if is_active {{
        me = reference[index];
    }}
    var acc = Accumulator(vec3<f32>(0.0), vec3<f32>(0.0));

    if GRAVITY_ENABLED || ELECTROSTATICS_ENABLED {{
        let tiles = (count + {workgroup_size}u - 1u) / {workgroup_size}u;
        for (var t = 0u; t < tiles; t += 1u) {{
            let base = t * {workgroup_size}u;
            let j = base + local_id.x;
            if j < count {{
                let other = reference[j];
                tile[local_id.x] = ThreadgroupParticle(other.mass, other.charge, other.position);
            }} else {{
                tile[local_id.x] = ThreadgroupParticle(0.0, 0.0, vec3<f32>(0.0));
            }}
            workgroupBarrier();

            if is_active {{
                let span = min({workgroup_size}u, count - base);
                for (var k = 0u; k < span; k += 1u) {{
                    if base + k != index {{
                        acc = interact(acc, me.position, tile[k]);
                    }}
                }}
            }}
            workgroupBarrier();
        }}
    }}

    if !is_active {{
        return;
    }}
    integrate(index, me, acc);
}}
"#
    )
}

/// Workgroup memory used by one tile of the tiled layout, in bytes.
pub fn tile_bytes(workgroup_size: u32) -> u32 {
    // vec3 in a struct is 16-byte aligned: mass, charge, pad, position.
    workgroup_size * 32
}

/// CPU mirror of the compute shader.
pub mod cpu {
    use glam::Vec3;

    use super::{KernelLayout, KernelVariant, PhysicsParams};
    use crate::particle::{Particle, ThreadgroupParticle};

    /// Bit-level inverse square root with one Newton-Raphson refinement.
    ///
    /// Relative error stays below 0.2%; plenty for a visual simulation.
    #[inline]
    pub fn fast_inverse_sqrt(x: f32) -> f32 {
        let y = f32::from_bits(0x5f37_59df - (x.to_bits() >> 1));
        y * (1.5 - 0.5 * x * y * y)
    }

    #[derive(Clone, Copy, Default)]
    struct Accumulator {
        gravity: Vec3,
        field: Vec3,
    }

    #[inline]
    fn interact(
        acc: &mut Accumulator,
        position: Vec3,
        other: &ThreadgroupParticle,
        variant: KernelVariant,
        epsilon: f32,
    ) {
        let r = position - other.position;
        let d2 = r.dot(r);
        if d2 < epsilon {
            return;
        }
        let inv_r = fast_inverse_sqrt(d2);
        let inv_r3 = inv_r * inv_r * inv_r;
        if variant.gravity() {
            acc.gravity -= r * (other.mass * inv_r3);
        }
        if variant.electrostatics() {
            acc.field += r * (other.charge * inv_r3);
        }
    }

    fn integrate(me: &Particle, acc: Accumulator, variant: KernelVariant, params: &PhysicsParams) -> Particle {
        let mut p = *me;
        let mut a = acc.gravity * params.gravitational_constant;
        if variant.electrostatics() {
            a += acc.field * (params.coulomb_constant * (me.charge / me.mass));
        }
        p.acceleration = a;
        p.velocity = me.velocity + a * params.delta_time;
        p.position = me.position + p.velocity * params.delta_time;
        p.angular_velocity = me.angular_velocity + me.angular_acceleration * params.delta_time;
        p
    }

    /// Run one step: read `reference[..params.particle_count]`, write the
    /// integrated records into `refreshed`.
    ///
    /// The tiled layout stages `workgroup_size` particles at a time like the
    /// shader does; both layouts visit `j` in ascending order, so they produce
    /// identical results.
    pub fn step(
        reference: &[Particle],
        refreshed: &mut [Particle],
        variant: KernelVariant,
        layout: KernelLayout,
        workgroup_size: u32,
        params: &PhysicsParams,
    ) {
        let count = (params.particle_count as usize)
            .min(reference.len())
            .min(refreshed.len());
        let mut accs = vec![Accumulator::default(); count];

        if variant.has_forces() {
            match layout {
                KernelLayout::Naive => {
                    for (i, acc) in accs.iter_mut().enumerate() {
                        let position = reference[i].position;
                        for (j, other) in reference[..count].iter().enumerate() {
                            if j != i {
                                interact(acc, position, &other.into(), variant, params.epsilon);
                            }
                        }
                    }
                }
                KernelLayout::Tiled => {
                    let width = workgroup_size.max(1) as usize;
                    let mut tile: Vec<ThreadgroupParticle> = Vec::with_capacity(width);
                    for base in (0..count).step_by(width) {
                        tile.clear();
                        tile.extend(reference[base..count.min(base + width)].iter().map(ThreadgroupParticle::from));
                        for (i, acc) in accs.iter_mut().enumerate() {
                            let position = reference[i].position;
                            for (k, other) in tile.iter().enumerate() {
                                if base + k != i {
                                    interact(acc, position, other, variant, params.epsilon);
                                }
                            }
                        }
                    }
                }
            }
        }

        for (i, acc) in accs.into_iter().enumerate() {
            refreshed[i] = integrate(&reference[i], acc, variant, params);
        }
    }

    /// Step a set in place (allocates the refreshed copy).
    pub fn step_in_place(
        particles: &mut Vec<Particle>,
        variant: KernelVariant,
        layout: KernelLayout,
        workgroup_size: u32,
        params: &PhysicsParams,
    ) {
        let mut refreshed = particles.clone();
        step(particles, &mut refreshed, variant, layout, workgroup_size, params);
        *particles = refreshed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Validates WGSL code using naga.
    fn validate_wgsl(code: &str) -> Result<(), String> {
        let module = naga::front::wgsl::parse_str(code)
            .map_err(|e| format!("WGSL parse error: {:?}", e))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| format!("WGSL validation error: {:?}", e))?;

        Ok(())
    }

    #[test]
    fn test_every_variant_validates() {
        for layout in [KernelLayout::Naive, KernelLayout::Tiled] {
            for variant in KernelVariant::ALL {
                let wgsl = compute_shader(variant, layout, 64);
                validate_wgsl(&wgsl)
                    .unwrap_or_else(|e| panic!("{variant:?}/{layout:?} invalid: {e}"));
            }
        }
    }

    #[test]
    fn test_flags_are_baked_as_constants() {
        let wgsl = compute_shader(KernelVariant::Electrostatic, KernelLayout::Tiled, 128);
        assert!(wgsl.contains("const GRAVITY_ENABLED: bool = false;"));
        assert!(wgsl.contains("const ELECTROSTATICS_ENABLED: bool = true;"));
        assert!(wgsl.contains("@workgroup_size(128)"));
        assert!(wgsl.contains("array<ThreadgroupParticle, 128>"));
    }

    #[test]
    fn test_tiled_kernel_has_two_barriers_per_tile() {
        let wgsl = compute_shader(KernelVariant::Gravity, KernelLayout::Tiled, 64);
        assert_eq!(wgsl.matches("workgroupBarrier()").count(), 2);
        let naive = compute_shader(KernelVariant::Gravity, KernelLayout::Naive, 64);
        assert!(!naive.contains("workgroupBarrier"));
    }

    #[test]
    fn test_kernels_skip_their_own_index() {
        let naive = compute_shader(KernelVariant::Gravity, KernelLayout::Naive, 64);
        assert!(naive.contains("if j == index"));
        let tiled = compute_shader(KernelVariant::Gravity, KernelLayout::Tiled, 64);
        assert!(tiled.contains("if base + k != index"));
    }

    #[test]
    fn test_variant_from_flags() {
        assert_eq!(KernelVariant::from_flags(false, false), KernelVariant::Ballistic);
        assert_eq!(KernelVariant::from_flags(true, true), KernelVariant::GravityElectrostatic);
        for v in KernelVariant::ALL {
            assert_eq!(KernelVariant::from_flags(v.gravity(), v.electrostatics()), v);
            assert_eq!(KernelVariant::ALL[v.index()], v);
        }
    }

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<PhysicsParams>(), 32);
    }

    #[test]
    fn test_fast_inverse_sqrt_accuracy() {
        for x in [1e-3f32, 0.25, 1.0, 2.0, 123.0, 1e6] {
            let exact = 1.0 / x.sqrt();
            let approx = cpu::fast_inverse_sqrt(x);
            assert!(((approx - exact) / exact).abs() < 2e-3, "x = {x}");
        }
    }

    #[test]
    fn test_tiled_matches_naive() {
        let mut rng = StdRng::seed_from_u64(11);
        // 100 is not a multiple of the tile width; the tail tile is partial.
        let particles: Vec<Particle> = (0..100)
            .map(|_| {
                Particle::new(
                    rng.gen_range(0.5..5.0),
                    rng.gen_range(-1.0..1.0),
                    Vec3::new(rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0)),
                )
                .unwrap()
            })
            .collect();
        let params = PhysicsParams::new(100, &PhysicsConstants::default());

        let mut naive = particles.clone();
        let mut tiled = particles.clone();
        cpu::step(&particles, &mut naive, KernelVariant::GravityElectrostatic, KernelLayout::Naive, 32, &params);
        cpu::step(&particles, &mut tiled, KernelVariant::GravityElectrostatic, KernelLayout::Tiled, 32, &params);
        assert_eq!(naive, tiled);
    }

    #[test]
    fn test_like_charges_repel() {
        let a = Particle::new(1.0, 1.0, Vec3::new(-1.0, 0.0, 0.0)).unwrap();
        let b = Particle::new(1.0, 1.0, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let params = PhysicsParams::new(2, &PhysicsConstants::default());
        let mut out = vec![a, b];
        cpu::step(&[a, b], &mut out, KernelVariant::Electrostatic, KernelLayout::Tiled, 64, &params);
        assert!(out[0].acceleration.x < 0.0);
        assert!(out[1].acceleration.x > 0.0);
    }

    #[test]
    fn test_count_limits_the_dispatch() {
        let a = Particle::new(1.0, 0.0, Vec3::ZERO).unwrap().with_velocity(Vec3::X);
        let b = Particle::new(1.0, 0.0, Vec3::Y).unwrap().with_velocity(Vec3::X);
        let params = PhysicsParams::new(1, &PhysicsConstants::default());
        let mut out = vec![a, b];
        cpu::step(&[a, b], &mut out, KernelVariant::Gravity, KernelLayout::Tiled, 64, &params);
        // Only particle 0 is simulated, and it does not see particle 1.
        assert_eq!(out[0].acceleration, Vec3::ZERO);
        assert_eq!(out[1], b);
    }
}
