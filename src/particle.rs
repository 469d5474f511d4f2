//! The particle record shared byte-for-byte between the CPU and the GPU.
//!
//! Every `vec3<f32>` in WGSL storage is 16-byte aligned, so the Rust struct
//! carries explicit padding after each vector. The layout test at the bottom
//! of this file pins the offsets the shaders rely on.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::error::ParticleError;

/// Default GPU buffer capacity in particles.
pub const MAX_PARTICLES: u32 = 100_000;

/// Upper bound used by the demo spawner when drawing random masses.
pub const MAX_PARTICLE_MASS: f32 = 5.0;

/// A simulated point mass/charge with its kinematic state.
///
/// `mass` must stay positive: the electrostatic term divides by it.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub mass: f32,
    pub charge: f32,
    _pad0: [f32; 2],

    pub position: Vec3,
    _pad1: f32,
    pub velocity: Vec3,
    _pad2: f32,
    pub acceleration: Vec3,
    _pad3: f32,

    pub angular_velocity: Vec3,
    _pad4: f32,
    pub angular_acceleration: Vec3,
    _pad5: f32,
}

impl Particle {
    /// Create a particle at rest.
    pub fn new(mass: f32, charge: f32, position: Vec3) -> Result<Self, ParticleError> {
        let particle = Self {
            mass,
            charge,
            position,
            ..Self::zeroed()
        };
        particle.validate()?;
        Ok(particle)
    }

    /// Mass must be finite and positive; the kernel divides by it.
    pub fn validate(&self) -> Result<(), ParticleError> {
        if self.mass.is_finite() && self.mass > 0.0 {
            Ok(())
        } else {
            Err(ParticleError::InvalidMass(self.mass))
        }
    }

    /// Set the initial velocity.
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set the angular velocity and (constant) angular acceleration.
    pub fn with_spin(mut self, angular_velocity: Vec3, angular_acceleration: Vec3) -> Self {
        self.angular_velocity = angular_velocity;
        self.angular_acceleration = angular_acceleration;
        self
    }

    /// Charge-to-mass ratio applied to the accumulated electric field.
    #[inline]
    pub fn charge_to_mass(&self) -> f32 {
        self.charge / self.mass
    }

    /// Linear momentum `m * v`.
    #[inline]
    pub fn momentum(&self) -> Vec3 {
        self.velocity * self.mass
    }
}

/// Reduced copy staged in workgroup memory by the tiled kernel.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ThreadgroupParticle {
    pub mass: f32,
    pub charge: f32,
    pub position: Vec3,
}

impl From<&Particle> for ThreadgroupParticle {
    fn from(p: &Particle) -> Self {
        Self {
            mass: p.mass,
            charge: p.charge,
            position: p.position,
        }
    }
}

/// Center of mass of a group of particles.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CenterOfMass {
    /// The location of the center of mass.
    pub position: Vec3,
    /// The total mass of the system under consideration.
    pub total_mass: f32,
}

impl CenterOfMass {
    /// Compute the center of mass, or `None` for an empty set.
    pub fn of<'a>(particles: impl IntoIterator<Item = &'a Particle>) -> Option<Self> {
        let (weighted, total_mass) = particles
            .into_iter()
            .fold((Vec3::ZERO, 0.0f32), |(sum, mass), p| {
                (sum + p.position * p.mass, mass + p.mass)
            });
        (total_mass > 0.0).then(|| Self {
            position: weighted / total_mass,
            total_mass,
        })
    }

    /// Pack into a `vec4` (xyz = position, w = total mass).
    pub fn encode(&self) -> Vec4 {
        self.position.extend(self.total_mass)
    }

    pub fn decode(encoded: Vec4) -> Self {
        Self {
            position: encoded.truncate(),
            total_mass: encoded.w,
        }
    }
}

/// Stable identity of a particle across merges.
///
/// The index is recycled only after the particle's removal has been merged;
/// the generation tells a recycled index apart from the old owner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleHandle {
    index: u32,
    generation: u32,
}

impl ParticleHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// WGSL declaration matching [`Particle`].
pub const PARTICLE_WGSL: &str = r#"
struct Particle {
    mass: f32,
    charge: f32,
    position: vec3<f32>,
    velocity: vec3<f32>,
    acceleration: vec3<f32>,
    angular_velocity: vec3<f32>,
    angular_acceleration: vec3<f32>,
};
"#;

/// WGSL declaration of the workgroup-staged particle stub.
pub const THREADGROUP_PARTICLE_WGSL: &str = r#"
struct ThreadgroupParticle {
    mass: f32,
    charge: f32,
    position: vec3<f32>,
};
"#;

/// Byte offset of `position`, used for instanced vertex attributes.
pub const POSITION_OFFSET: u64 = std::mem::offset_of!(Particle, position) as u64;
/// Byte offset of `mass`.
pub const MASS_OFFSET: u64 = std::mem::offset_of!(Particle, mass) as u64;
/// Byte offset of `charge`.
pub const CHARGE_OFFSET: u64 = std::mem::offset_of!(Particle, charge) as u64;

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_layout_matches_wgsl() {
        assert_eq!(size_of::<Particle>(), 96);
        assert_eq!(offset_of!(Particle, mass), 0);
        assert_eq!(offset_of!(Particle, charge), 4);
        assert_eq!(offset_of!(Particle, position), 16);
        assert_eq!(offset_of!(Particle, velocity), 32);
        assert_eq!(offset_of!(Particle, acceleration), 48);
        assert_eq!(offset_of!(Particle, angular_velocity), 64);
        assert_eq!(offset_of!(Particle, angular_acceleration), 80);
    }

    #[test]
    fn test_layout_matches_naga() {
        let module = naga::front::wgsl::parse_str(PARTICLE_WGSL).expect("particle WGSL parses");
        let mut layouter = naga::proc::Layouter::default();
        layouter.update(module.to_ctx()).expect("layout");

        let (handle, ty) = module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some("Particle"))
            .expect("Particle type");
        assert_eq!(layouter[handle].size as usize, size_of::<Particle>());

        let naga::TypeInner::Struct { members, .. } = &ty.inner else {
            panic!("Particle is not a struct");
        };
        let offsets: Vec<(String, u32)> = members
            .iter()
            .map(|m| (m.name.clone().unwrap_or_default(), m.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("mass".to_string(), offset_of!(Particle, mass) as u32),
                ("charge".to_string(), offset_of!(Particle, charge) as u32),
                ("position".to_string(), offset_of!(Particle, position) as u32),
                ("velocity".to_string(), offset_of!(Particle, velocity) as u32),
                ("acceleration".to_string(), offset_of!(Particle, acceleration) as u32),
                ("angular_velocity".to_string(), offset_of!(Particle, angular_velocity) as u32),
                (
                    "angular_acceleration".to_string(),
                    offset_of!(Particle, angular_acceleration) as u32
                ),
            ]
        );
    }

    #[test]
    fn test_rejects_non_positive_mass() {
        assert_eq!(
            Particle::new(0.0, 1.0, Vec3::ZERO),
            Err(ParticleError::InvalidMass(0.0))
        );
        assert!(Particle::new(-2.0, 0.0, Vec3::ZERO).is_err());
        assert!(Particle::new(f32::NAN, 0.0, Vec3::ZERO).is_err());
        assert!(Particle::new(1.0, -3.0, Vec3::X).is_ok());
    }

    #[test]
    fn test_center_of_mass() {
        let a = Particle::new(1.0, 0.0, Vec3::new(-1.0, 0.0, 0.0)).unwrap();
        let b = Particle::new(3.0, 0.0, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let com = CenterOfMass::of([&a, &b]).unwrap();
        assert!((com.position - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-6);
        assert_eq!(com.total_mass, 4.0);
        assert_eq!(CenterOfMass::decode(com.encode()), com);
        assert!(CenterOfMass::of(std::iter::empty()).is_none());
    }
}
