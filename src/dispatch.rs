//! Compute dispatch sizing.
//!
//! The workgroup width is fixed when the pipelines are built (it is baked into
//! the shader) and clamped to what the device supports. The particle count
//! changes every merge, so the workgroup count is recomputed per frame.

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::kernel::tile_bytes;

/// What to do when the particle count is not a multiple of the workgroup
/// width.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Round the dispatch up; the kernel masks out-of-range invocations.
    #[default]
    Masked,
    /// Refuse counts that do not fill whole workgroups.
    Exact,
}

/// The subset of device limits that shape a dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_workgroup_size_x: u32,
    pub max_invocations_per_workgroup: u32,
    pub max_workgroup_storage_size: u32,
    pub max_workgroups_per_dimension: u32,
}

impl From<&wgpu::Limits> for DeviceLimits {
    fn from(limits: &wgpu::Limits) -> Self {
        Self {
            max_workgroup_size_x: limits.max_compute_workgroup_size_x,
            max_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
            max_workgroup_storage_size: limits.max_compute_workgroup_storage_size,
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        }
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self::from(&wgpu::Limits::default())
    }
}

impl DeviceLimits {
    /// Largest usable width not above `requested`: within the per-dimension
    /// and per-workgroup invocation limits, and small enough that one tile
    /// fits in workgroup memory.
    pub fn workgroup_size(&self, requested: u32) -> u32 {
        let storage_cap = self.max_workgroup_storage_size / tile_bytes(1);
        let width = requested
            .min(self.max_workgroup_size_x)
            .min(self.max_invocations_per_workgroup)
            .min(storage_cap)
            .max(1);
        if width != requested {
            tracing::info!(requested, width, "workgroup size clamped to device limits");
        }
        width
    }
}

/// How one physics step is launched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchGeometry {
    pub particle_count: u32,
    pub workgroup_size: u32,
    pub workgroup_count: u32,
}

impl DispatchGeometry {
    pub fn new(
        particle_count: u32,
        workgroup_size: u32,
        policy: DispatchPolicy,
        limits: &DeviceLimits,
    ) -> Result<Self, DispatchError> {
        let workgroup_size = workgroup_size.max(1);
        if policy == DispatchPolicy::Exact && particle_count % workgroup_size != 0 {
            return Err(DispatchError::IndivisibleParticleCount {
                count: particle_count,
                width: workgroup_size,
            });
        }
        let workgroup_count = particle_count.div_ceil(workgroup_size);
        if workgroup_count > limits.max_workgroups_per_dimension {
            return Err(DispatchError::TooManyWorkgroups {
                requested: workgroup_count,
                limit: limits.max_workgroups_per_dimension,
            });
        }
        Ok(Self {
            particle_count,
            workgroup_size,
            workgroup_count,
        })
    }

    /// Invocations launched past the end of the particle array.
    pub fn masked_invocations(&self) -> u32 {
        self.workgroup_count * self.workgroup_size - self.particle_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            max_workgroup_size_x: 256,
            max_invocations_per_workgroup: 256,
            max_workgroup_storage_size: 16384,
            max_workgroups_per_dimension: 65535,
        }
    }

    #[test]
    fn test_masked_rounds_up() {
        let g = DispatchGeometry::new(1000, 256, DispatchPolicy::Masked, &limits()).unwrap();
        assert_eq!(g.workgroup_count, 4);
        assert_eq!(g.masked_invocations(), 24);
    }

    #[test]
    fn test_exact_rejects_partial_workgroups() {
        assert_eq!(
            DispatchGeometry::new(1000, 256, DispatchPolicy::Exact, &limits()),
            Err(DispatchError::IndivisibleParticleCount { count: 1000, width: 256 })
        );
        let g = DispatchGeometry::new(1024, 256, DispatchPolicy::Exact, &limits()).unwrap();
        assert_eq!(g.workgroup_count, 4);
        assert_eq!(g.masked_invocations(), 0);
    }

    #[test]
    fn test_zero_particles_dispatch_nothing() {
        let g = DispatchGeometry::new(0, 64, DispatchPolicy::Exact, &limits()).unwrap();
        assert_eq!(g.workgroup_count, 0);
    }

    #[test]
    fn test_too_many_workgroups() {
        let small = DeviceLimits {
            max_workgroups_per_dimension: 2,
            ..limits()
        };
        assert_eq!(
            DispatchGeometry::new(1000, 256, DispatchPolicy::Masked, &small),
            Err(DispatchError::TooManyWorkgroups { requested: 4, limit: 2 })
        );
    }

    #[test]
    fn test_workgroup_size_clamps_to_limits() {
        assert_eq!(limits().workgroup_size(1024), 256);
        assert_eq!(limits().workgroup_size(64), 64);

        let tight_storage = DeviceLimits {
            max_workgroup_storage_size: 4096,
            ..limits()
        };
        // 4096 bytes / 32 bytes per staged particle.
        assert_eq!(tight_storage.workgroup_size(256), 128);
    }
}
