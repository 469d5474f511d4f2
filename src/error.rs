//! Error types for orrery.
//!
//! GPU initialization failures are fatal and surface from
//! [`Simulation::run`](crate::Simulation::run). Scene mutations and dispatch
//! sizing return recoverable errors that the caller decides how to handle.

use thiserror::Error;

/// Errors that can occur during GPU initialization.
#[derive(Debug, Error)]
pub enum GpuError {
    /// Failed to create a surface for rendering.
    #[error("failed to create GPU surface: {0}")]
    SurfaceCreation(#[from] wgpu::CreateSurfaceError),
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found; a GPU with Vulkan/Metal/DX12/WebGPU support is required")]
    NoAdapter,
    /// Failed to create GPU device.
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
    /// A shader module or pipeline failed validation.
    #[error("failed to create pipeline '{label}': {message}")]
    PipelineCreation { label: String, message: String },
    /// Failed to map buffer for reading.
    #[error("failed to map GPU buffer: {0}")]
    BufferMapping(String),
}

/// Invalid particle records.
#[derive(Debug, Error, PartialEq)]
pub enum ParticleError {
    #[error("particle mass must be finite and positive, got {0}")]
    InvalidMass(f32),
}

/// Errors from the particle change cache.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Every channel is waiting on the GPU; no channel can accept changes.
    #[error("all {channels} change channels are in flight")]
    Exhausted { channels: usize },
}

/// Errors from sizing a compute dispatch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Exact dispatch requires the particle count to be a multiple of the
    /// execution width.
    #[error("particle count {count} is not a multiple of the execution width {width}")]
    IndivisibleParticleCount { count: u32, width: u32 },
    #[error("dispatch needs {requested} workgroups but the device allows {limit}")]
    TooManyWorkgroups { requested: u32, limit: u32 },
}

/// Errors loading or validating a [`SimulationConfig`](crate::SimulationConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that can occur when running a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Failed to create event loop.
    #[error("failed to create event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    /// Failed to create window.
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    /// GPU initialization failed.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Particle(#[from] ParticleError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The completion sink thread could not be started.
    #[error("failed to start completion sink thread: {0}")]
    CompletionSink(std::io::Error),
    /// The merge job finished without handing the particle set back.
    #[error("merge job ended without returning the particle set")]
    MergeLost,
    /// Adding particles would overflow the GPU buffers.
    #[error("cannot hold {requested} particles, capacity is {capacity}")]
    CapacityExceeded { requested: usize, capacity: u32 },
}

pub type Result<T, E = SimulationError> = std::result::Result<T, E>;
