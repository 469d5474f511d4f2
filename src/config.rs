//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! {
//!     "max_particles": 20000,
//!     "physics": { "gravitational_constant": 0.5 },
//!     "spawn": { "count": 4096, "shape": "disk" }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchPolicy;
use crate::error::ConfigError;
use crate::kernel::{KernelLayout, PhysicsConstants};
use crate::particle::{MAX_PARTICLES, MAX_PARTICLE_MASS};

/// Window and drawing options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    /// Start with point sprites instead of instanced meshes.
    pub points: bool,
    /// Point sprite size in pixels.
    pub point_size: f32,
    /// Radius of a unit-mass sphere in mesh mode.
    pub mesh_scale: f32,
    pub background: [f64; 3],
    /// Uniform buffers in the ring; one per frame the CPU may run ahead.
    pub uniform_buffers: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            title: "Orrery".into(),
            width: 1280,
            height: 720,
            vsync: true,
            points: true,
            point_size: 3.0,
            mesh_scale: 0.05,
            background: [0.01, 0.01, 0.02],
            uniform_buffers: 3,
        }
    }
}

/// Shape of the initial particle cloud.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnShape {
    #[default]
    Sphere,
    Disk,
    Shell,
}

/// Initial particle cloud.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    pub count: u32,
    pub shape: SpawnShape,
    pub radius: f32,
    pub min_mass: f32,
    pub max_mass: f32,
    /// Charges are drawn from `-max_charge..max_charge`.
    pub max_charge: f32,
    /// Speed of the initial swirl around the Y axis.
    pub orbital_speed: f32,
    /// Fixed seed for reproducible clouds; time-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            count: 2048,
            shape: SpawnShape::Sphere,
            radius: 4.0,
            min_mass: 0.5,
            max_mass: MAX_PARTICLE_MASS,
            max_charge: 1.0,
            orbital_speed: 0.5,
            seed: None,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub physics: PhysicsConstants,
    /// GPU buffer capacity in particles.
    pub max_particles: u32,
    /// Frames the CPU may queue ahead of the GPU.
    pub frames_in_flight: usize,
    /// Requested compute workgroup width; clamped to device limits.
    pub workgroup_size: u32,
    pub kernel_layout: KernelLayout,
    pub dispatch_policy: DispatchPolicy,
    pub gravity: bool,
    pub electrostatics: bool,
    pub start_paused: bool,
    pub render: RenderConfig,
    pub spawn: SpawnConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            physics: PhysicsConstants::default(),
            max_particles: MAX_PARTICLES,
            frames_in_flight: 2,
            workgroup_size: 256,
            kernel_layout: KernelLayout::Tiled,
            dispatch_policy: DispatchPolicy::Masked,
            gravity: true,
            electrostatics: true,
            start_paused: false,
            render: RenderConfig::default(),
            spawn: SpawnConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let physics = &self.physics;

        if self.max_particles == 0 {
            return invalid("max_particles must be at least 1".into());
        }
        if self.frames_in_flight == 0 {
            return invalid("frames_in_flight must be at least 1".into());
        }
        if self.workgroup_size == 0 {
            return invalid("workgroup_size must be at least 1".into());
        }
        if self.render.uniform_buffers == 0 {
            return invalid("render.uniform_buffers must be at least 1".into());
        }
        if !(physics.time_step.is_finite() && physics.time_step > 0.0) {
            return invalid(format!("time_step must be positive, got {}", physics.time_step));
        }
        if !(physics.close_approach_epsilon.is_finite() && physics.close_approach_epsilon > 0.0) {
            return invalid(format!(
                "close_approach_epsilon must be positive, got {}",
                physics.close_approach_epsilon
            ));
        }
        let spawn = &self.spawn;
        if spawn.count > self.max_particles {
            return invalid(format!(
                "spawn.count {} exceeds max_particles {}",
                spawn.count, self.max_particles
            ));
        }
        if !(spawn.min_mass > 0.0 && spawn.min_mass <= spawn.max_mass) {
            return invalid(format!(
                "spawn masses must satisfy 0 < min_mass <= max_mass, got {}..{}",
                spawn.min_mass, spawn.max_mass
            ));
        }
        if spawn.max_charge < 0.0 || spawn.radius <= 0.0 {
            return invalid("spawn.max_charge must be non-negative and spawn.radius positive".into());
        }
        Ok(())
    }
}
