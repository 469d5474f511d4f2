//! # Orrery
//!
//! GPU all-pairs N-body simulation of charged, massive particles.
//!
//! Every particle attracts every other through gravity and attracts or repels
//! through Coulomb forces. The force kernel runs on the GPU each frame, ping-ponging
//! between two particle buffers, and the result is drawn straight from the
//! buffer the kernel just wrote.
//!
//! ## Quick Start
//!
//! ```ignore
//! use orrery::prelude::*;
//!
//! fn main() -> orrery::Result<()> {
//!     Simulation::new()
//!         .with_particle_count(4096)
//!         .with_spawn_shape(SpawnShape::Disk)
//!         .with_electrostatics(false)
//!         .run()
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Particles and handles
//!
//! A [`Particle`] is a 96-byte GPU record (mass, charge, position, velocity,
//! acceleration and spin). Adding one through the [`Orchestrator`] returns a
//! [`ParticleHandle`] immediately; the particle reaches the GPU after the
//! next merge.
//!
//! ### Change channels
//!
//! Scene mutations never touch the GPU buffers directly. They accumulate in
//! the pending channel of the [`ChangeCache`]. Once per frame the pending
//! channel is dispatched: its changes move into a token that only the merge
//! job can read, and the channel is recycled when the merge is done.
//!
//! ### Frame protocol
//!
//! ```text
//! begin_frame        wait for a frame slot and the previous merge
//! run_physics_step   dispatch the kernel, exchange buffer roles
//! render             draw from the buffer the kernel wrote
//! submit             on completion: read back, merge, upload
//! ```
//!
//! The merge runs on a completion thread and signals a [`Timeline`] when it
//! is done; the next frame waits for that value before encoding.
//!
//! ## Kernel variants
//!
//! | Variant | Gravity | Electrostatics |
//! |---------|---------|----------------|
//! | [`KernelVariant::Ballistic`] | off | off |
//! | [`KernelVariant::Gravity`] | on | off |
//! | [`KernelVariant::Electrostatic`] | off | on |
//! | [`KernelVariant::GravityElectrostatic`] | on | on |
//!
//! Each variant exists in a naive and a workgroup-tiled layout
//! ([`KernelLayout`]). [`kernel::cpu`] runs the same math on the CPU.

pub mod cache;
pub mod config;
pub mod dispatch;
mod error;
pub mod gpu;
pub mod input;
pub mod kernel;
pub mod orchestrator;
pub mod particle;
pub mod particle_set;
mod simulation;
pub mod spawn;
pub mod store;
pub mod sync;
pub mod time;

pub use bytemuck;
pub use cache::{ChangeCache, ChangeSet, ChannelState};
pub use config::{RenderConfig, SimulationConfig, SpawnConfig, SpawnShape};
pub use dispatch::{DispatchGeometry, DispatchPolicy};
pub use error::{
    CacheError, ConfigError, DispatchError, GpuError, ParticleError, Result, SimulationError,
};
pub use glam::{Vec3, Vec4};
pub use kernel::{KernelLayout, KernelVariant, PhysicsConstants};
pub use orchestrator::{Orchestrator, RenderMode, SimulationFlags};
pub use particle::{CenterOfMass, Particle, ParticleHandle, MAX_PARTICLES};
pub use particle_set::ParticleSet;
pub use simulation::Simulation;
pub use sync::Timeline;

/// Prelude for the common case of configuring and running a simulation.
pub mod prelude {
    pub use crate::config::{SimulationConfig, SpawnShape};
    pub use crate::dispatch::DispatchPolicy;
    pub use crate::kernel::{KernelLayout, PhysicsConstants};
    pub use crate::particle::{Particle, ParticleHandle};
    pub use crate::simulation::Simulation;
    pub use crate::{Vec3, Vec4};
}
