//! Demo binary: `orrery [config.json]`.
//!
//! Keys: Space pause, P points/meshes, G gravity, E electrostatics, C follow
//! the center of mass, N add a particle, Backspace remove the oldest one,
//! Escape quit. Drag to orbit, scroll to zoom.

use anyhow::Context;
use orrery::Simulation;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let simulation = match std::env::args().nth(1) {
        Some(path) => Simulation::from_config_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => Simulation::new(),
    };

    simulation.run().context("simulation failed")
}
