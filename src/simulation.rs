//! Simulation builder and the winit frame driver.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use glam::Vec2;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use crate::config::{SimulationConfig, SpawnShape};
use crate::error::{Result, SimulationError};
use crate::gpu::uniforms::SceneUniforms;
use crate::gpu::{Camera, Engine, GpuContext};
use crate::input::{Command, Input};
use crate::particle::ParticleHandle;
use crate::spawn::Spawner;
use crate::time::FrameClock;

/// Radians of orbit per pixel of drag.
const ORBIT_SPEED: f32 = 0.005;
/// Frames between readbacks while the camera follows the center of mass.
const FOLLOW_SYNC_INTERVAL: u64 = 30;

/// A particle simulation builder.
///
/// Use method chaining to configure, then call `.run()` to start.
///
/// ```ignore
/// orrery::Simulation::new()
///     .with_particle_count(4096)
///     .with_spawn_shape(orrery::SpawnShape::Disk)
///     .run()?;
/// ```
pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    /// Create a new simulation with default settings.
    pub fn new() -> Self {
        Self::from_config(SimulationConfig::default())
    }

    pub fn from_config(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Load settings from a JSON file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_config(SimulationConfig::from_json_file(path)?))
    }

    /// Set the number of particles in the initial cloud.
    pub fn with_particle_count(mut self, count: u32) -> Self {
        self.config.spawn.count = count;
        self
    }

    pub fn with_spawn_shape(mut self, shape: SpawnShape) -> Self {
        self.config.spawn.shape = shape;
        self
    }

    /// Seed the initial cloud for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.spawn.seed = Some(seed);
        self
    }

    pub fn with_gravity(mut self, enabled: bool) -> Self {
        self.config.gravity = enabled;
        self
    }

    pub fn with_electrostatics(mut self, enabled: bool) -> Self {
        self.config.electrostatics = enabled;
        self
    }

    /// Start with the physics step paused.
    pub fn paused(mut self) -> Self {
        self.config.start_paused = true;
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run the simulation. This blocks until the window is closed.
    ///
    /// Initialization failures and fatal frame errors are returned once the
    /// event loop has exited.
    pub fn run(self) -> Result<()> {
        self.config.validate()?;
        tracing::info!(
            particles = self.config.spawn.count,
            capacity = self.config.max_particles,
            frames_in_flight = self.config.frames_in_flight,
            "starting simulation"
        );

        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let mut app = App::new(self.config);
        event_loop.run_app(&mut app)?;
        app.shutdown()
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

/// Window plus the GPU state created once it exists.
struct Session {
    window: Arc<Window>,
    gpu: GpuContext,
    engine: Engine,
}

struct App {
    config: SimulationConfig,
    spawner: Spawner,
    input: Input,
    clock: FrameClock,
    camera: Camera,
    /// Handles in spawn order; the front is the oldest particle.
    live: VecDeque<ParticleHandle>,
    session: Option<Session>,
    fatal: Option<SimulationError>,
}

impl App {
    fn new(config: SimulationConfig) -> Self {
        let spawner = Spawner::new(config.spawn.clone());
        Self {
            config,
            spawner,
            input: Input::new(),
            clock: FrameClock::new(),
            camera: Camera::new(),
            live: VecDeque::new(),
            session: None,
            fatal: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<Session> {
        let render = &self.config.render;
        let attributes = Window::default_attributes()
            .with_title(render.title.clone())
            .with_inner_size(winit::dpi::LogicalSize::new(render.width, render.height));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let gpu = pollster::block_on(GpuContext::new(Arc::clone(&window), render.vsync))?;
        let mut engine = Engine::new(&gpu, &self.config)?;

        let cloud = self.spawner.cloud()?;
        let handles = engine.orchestrator_mut().add_particles(cloud)?;
        self.live.extend(handles);
        tracing::info!(
            particles = self.live.len(),
            workgroup_size = engine.workgroup_size(),
            "spawned initial cloud"
        );

        Ok(Session { window, gpu, engine })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: SimulationError) {
        tracing::error!(%error, "stopping simulation");
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }

    fn apply_input(&mut self, event_loop: &ActiveEventLoop) {
        let commands: Vec<Command> = self.input.commands().collect();
        for command in commands {
            self.apply(command, event_loop);
        }

        let drag = self.input.drag_delta();
        if drag != Vec2::ZERO {
            self.camera.orbit(drag.x * ORBIT_SPEED, drag.y * ORBIT_SPEED);
        }
        let scroll = self.input.scroll_delta();
        if scroll != 0.0 {
            self.camera.zoom(scroll);
        }
        self.input.begin_frame();
    }

    fn apply(&mut self, command: Command, event_loop: &ActiveEventLoop) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let orchestrator = session.engine.orchestrator_mut();
        match command {
            Command::TogglePause => {
                if orchestrator.is_paused() {
                    orchestrator.resume();
                } else {
                    orchestrator.pause_simulation();
                }
                tracing::info!(paused = orchestrator.is_paused(), "toggled pause");
            }
            Command::ToggleRenderMode => {
                orchestrator.toggle_point_rendering();
                tracing::info!(mode = ?orchestrator.render_mode(), "toggled render mode");
            }
            Command::ToggleGravity => {
                let enabled = !orchestrator.flags().gravity;
                orchestrator.set_gravity(enabled);
                tracing::info!(variant = ?orchestrator.kernel_variant(), "toggled gravity");
            }
            Command::ToggleElectrostatics => {
                let enabled = !orchestrator.flags().electrostatics;
                orchestrator.set_electrostatics(enabled);
                tracing::info!(variant = ?orchestrator.kernel_variant(), "toggled electrostatics");
            }
            Command::ToggleFollow => {
                self.camera.follow_center_of_mass = !self.camera.follow_center_of_mass;
                if let Err(error) = orchestrator.request_sync() {
                    tracing::warn!(%error, "could not schedule readback");
                }
                tracing::info!(follow = self.camera.follow_center_of_mass, "toggled camera follow");
            }
            Command::AddParticle => {
                let added = self
                    .spawner
                    .particle()
                    .map_err(SimulationError::from)
                    .and_then(|particle| orchestrator.particle_added(particle));
                match added {
                    Ok(handle) => {
                        self.live.push_back(handle);
                        tracing::debug!(?handle, "added particle");
                    }
                    Err(error) => tracing::warn!(%error, "could not add particle"),
                }
            }
            Command::RemoveOldest => {
                let Some(handle) = self.live.pop_front() else {
                    tracing::debug!("no particles to remove");
                    return;
                };
                match orchestrator.particle_removed(handle) {
                    Ok(()) => tracing::debug!(?handle, "removed particle"),
                    Err(error) => {
                        tracing::warn!(%error, "could not remove particle");
                        self.live.push_front(handle);
                    }
                }
            }
            Command::Quit => event_loop.exit(),
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        if self.clock.tick() {
            let orchestrator = session.engine.orchestrator();
            tracing::debug!(
                fps = self.clock.fps(),
                frame_ms = self.clock.delta() * 1000.0,
                frame = self.clock.frame(),
                particles = orchestrator.particles_in_simulation(),
                "frame rate"
            );
        }

        if self.camera.follow_center_of_mass {
            let orchestrator = session.engine.orchestrator_mut();
            self.camera.follow(orchestrator.center_of_mass().map(|c| c.position));
            if self.clock.frame() % FOLLOW_SYNC_INTERVAL == 0 {
                // Exhaustion only delays the refresh.
                let _ = orchestrator.request_sync();
            }
        }

        // Acquire the surface before planning so a skipped frame holds no
        // permit or merge ticket.
        let frame = match session.gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("surface lost, reconfiguring");
                session.gpu.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                tracing::error!("surface out of memory");
                event_loop.exit();
                return Ok(());
            }
            Err(error) => {
                tracing::warn!(%error, "skipping frame");
                return Ok(());
            }
        };

        let uniforms = SceneUniforms::new(
            &self.camera,
            session.gpu.viewport(),
            self.config.render.point_size,
            self.config.render.mesh_scale,
        );
        session.engine.begin_frame(&uniforms)?;

        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = session
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        session.engine.run_physics_step(&mut encoder)?;

        {
            let [r, g, b] = self.config.render.background;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Particle Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a: 1.0 }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &session.gpu.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            session.engine.encode_render_commands(&mut pass);
        }

        session.engine.submit(encoder.finish());
        session.window.pre_present_notify();
        frame.present();
        Ok(())
    }

    fn shutdown(mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            if let Err(error) = session.engine.finish() {
                tracing::warn!(%error, "failed to drain engine");
            }
        }
        match self.fatal.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(session) => {
                session.window.request_redraw();
                self.session = Some(session);
            }
            Err(error) => self.fail(event_loop, error),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        self.input.handle_event(&event);
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(session) = &mut self.session {
                    session.gpu.resize(size);
                }
            }
            WindowEvent::RedrawRequested => {
                self.apply_input(event_loop);
                if let Err(error) = self.redraw(event_loop) {
                    self.fail(event_loop, error);
                    return;
                }
                if let Some(session) = &self.session {
                    session.window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        tracing::info!(frames = self.clock.frame(), "event loop exiting");
    }
}
