//! Particle cloud generation for the demo and for tests.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

use crate::config::{SpawnConfig, SpawnShape};
use crate::error::ParticleError;
use crate::particle::Particle;

/// Seeded random source with helpers for common spawn patterns.
pub struct Spawner {
    config: SpawnConfig,
    rng: StdRng,
}

impl Spawner {
    pub fn new(config: SpawnConfig) -> Self {
        // Reproducible when seeded, different each run otherwise.
        let seed = config.seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(42)
        });
        tracing::debug!(seed, "spawner seeded");
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The full initial cloud described by the config.
    pub fn cloud(&mut self) -> Result<Vec<Particle>, ParticleError> {
        (0..self.config.count).map(|_| self.particle()).collect()
    }

    /// One particle drawn from the configured distribution.
    pub fn particle(&mut self) -> Result<Particle, ParticleError> {
        let radius = self.config.radius;
        let position = match self.config.shape {
            SpawnShape::Sphere => self.random_in_sphere(radius),
            SpawnShape::Disk => self.random_in_disk(radius),
            SpawnShape::Shell => self.random_on_sphere(radius),
        };
        let (min_mass, max_mass) = (self.config.min_mass, self.config.max_mass);
        let mass = if min_mass < max_mass {
            self.rng.gen_range(min_mass..max_mass)
        } else {
            min_mass
        };
        let max_charge = self.config.max_charge;
        let charge = if max_charge > 0.0 {
            self.rng.gen_range(-max_charge..max_charge)
        } else {
            0.0
        };
        let velocity = tangent_velocity(position, self.config.orbital_speed);
        let spin = self.random_direction() * self.rng.gen_range(0.0f32..1.0);

        Ok(Particle::new(mass, charge, position)?
            .with_velocity(velocity)
            .with_spin(spin, Vec3::ZERO))
    }

    /// Random point inside a sphere, uniform over the volume.
    pub fn random_in_sphere(&mut self, radius: f32) -> Vec3 {
        // Cube root for uniform volume distribution
        let r = radius * self.rng.gen::<f32>().cbrt();
        self.random_on_sphere(r)
    }

    /// Random point on the surface of a sphere, uniform over the area.
    pub fn random_on_sphere(&mut self, radius: f32) -> Vec3 {
        let theta = self.rng.gen_range(0.0..TAU);
        // Equal-area: cos(phi) is uniform, phi is not.
        let cos_phi: f32 = self.rng.gen_range(-1.0..=1.0);
        let sin_phi = (1.0 - cos_phi * cos_phi).max(0.0).sqrt();

        Vec3::new(
            radius * sin_phi * theta.cos(),
            radius * sin_phi * theta.sin(),
            radius * cos_phi,
        )
    }

    /// Random point inside a disk in the XZ plane at y=0.
    pub fn random_in_disk(&mut self, radius: f32) -> Vec3 {
        let theta = self.rng.gen_range(0.0..TAU);
        let r = radius * self.rng.gen::<f32>().sqrt();

        Vec3::new(r * theta.cos(), 0.0, r * theta.sin())
    }

    pub fn random_direction(&mut self) -> Vec3 {
        self.random_on_sphere(1.0).normalize_or_zero()
    }
}

/// Velocity perpendicular to `position` in the XZ plane, for a swirl around
/// the Y axis.
pub fn tangent_velocity(position: Vec3, speed: f32) -> Vec3 {
    let tangent = Vec3::new(-position.z, 0.0, position.x);
    if tangent.length_squared() > 0.0001 {
        tangent.normalize() * speed
    } else {
        Vec3::new(speed, 0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(shape: SpawnShape) -> SpawnConfig {
        SpawnConfig {
            count: 200,
            shape,
            seed: Some(3),
            ..SpawnConfig::default()
        }
    }

    #[test]
    fn test_cloud_respects_config() {
        let cfg = config(SpawnShape::Sphere);
        let cloud = Spawner::new(cfg.clone()).cloud().unwrap();
        assert_eq!(cloud.len(), 200);
        for p in &cloud {
            assert!(p.position.length() <= cfg.radius + 0.001);
            assert!(p.mass >= cfg.min_mass && p.mass <= cfg.max_mass);
            assert!(p.charge.abs() <= cfg.max_charge);
        }
    }

    #[test]
    fn test_seeded_clouds_repeat() {
        let a = Spawner::new(config(SpawnShape::Shell)).cloud().unwrap();
        let b = Spawner::new(config(SpawnShape::Shell)).cloud().unwrap();
        assert_eq!(a, b);
    }

    /// Mean of z^2 for `samples` points: 1/3 on the unit sphere and 1/5 in
    /// the unit ball when uniform.
    fn mean_z2(samples: impl Iterator<Item = Vec3>) -> f32 {
        let (sum, n) = samples.fold((0.0, 0), |(sum, n), p| (sum + p.z * p.z, n + 1));
        sum / n as f32
    }

    #[test]
    fn test_sphere_sampling_is_uniform() {
        let mut spawner = Spawner::new(config(SpawnShape::Sphere));
        let surface = mean_z2((0..20_000).map(|_| spawner.random_on_sphere(1.0)));
        assert!((surface - 1.0 / 3.0).abs() < 0.02, "surface mean z^2 {surface}");
        let volume = mean_z2((0..20_000).map(|_| spawner.random_in_sphere(1.0)));
        assert!((volume - 0.2).abs() < 0.02, "volume mean z^2 {volume}");
    }

    #[test]
    fn test_disk_is_flat() {
        let cloud = Spawner::new(config(SpawnShape::Disk)).cloud().unwrap();
        assert!(cloud.iter().all(|p| p.position.y == 0.0));
    }

    #[test]
    fn test_tangent_velocity_is_perpendicular() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        let v = tangent_velocity(p, 2.0);
        assert!((v.length() - 2.0).abs() < 1e-5);
        assert!(v.dot(Vec3::new(p.x, 0.0, p.z)).abs() < 1e-5);
    }
}
