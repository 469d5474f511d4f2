//! Encodes the orchestrator's frame plans with wgpu.
//!
//! Per frame the driver calls, in order:
//!
//! 1. [`Engine::begin_frame`]: acquire a frame permit, settle the previous
//!    merge, write the scene uniforms.
//! 2. [`Engine::run_physics_step`]: encode the compute dispatch, exchange
//!    buffer roles, and copy the next-read buffer to staging if a merge is
//!    due.
//! 3. [`Engine::encode_render_commands`]: draw from the buffer the step just
//!    wrote.
//! 4. [`Engine::submit`]: submit, release the permit on completion, and hand
//!    the merge to the completion sink once the readback is mapped.

use std::sync::Arc;

use crate::config::SimulationConfig;
use crate::dispatch::{DeviceLimits, DispatchGeometry, DispatchPolicy};
use crate::error::{DispatchError, GpuError, Result, SimulationError};
use crate::kernel::{PhysicsConstants, PhysicsParams};
use crate::orchestrator::{FramePlan, MergeTicket, Orchestrator, RenderMode, SimulationFlags};
use crate::particle::Particle;
use crate::sync::{CompletionSink, FramePermit, FrameSemaphore};

use super::mesh::MeshDraw;
use super::particle_store::ParticleBuffers;
use super::pipelines::Pipelines;
use super::uniforms::{SceneUniforms, UniformRing};
use super::GpuContext;

struct ActiveFrame {
    plan: FramePlan,
    permit: FramePermit,
    readback_bytes: u64,
}

/// GPU resources plus the orchestrator driving them.
pub struct Engine {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: Pipelines,
    buffers: ParticleBuffers,
    staging: Arc<wgpu::Buffer>,
    uniforms: UniformRing,
    meshes: Vec<MeshDraw>,
    limits: DeviceLimits,
    policy: DispatchPolicy,
    constants: PhysicsConstants,
    semaphore: FrameSemaphore,
    sink: CompletionSink,
    orchestrator: Orchestrator,
    current: Option<ActiveFrame>,
}

impl Engine {
    pub fn new(gpu: &GpuContext, config: &SimulationConfig) -> Result<Self> {
        let device = Arc::clone(&gpu.device);
        let queue = Arc::clone(&gpu.queue);

        let workgroup_size = gpu.limits.workgroup_size(config.workgroup_size);
        let pipelines = Pipelines::new(&device, gpu.config.format, workgroup_size, config.kernel_layout)?;
        let buffers = ParticleBuffers::new(&device, &pipelines.compute_layout, config.max_particles);
        let staging = Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Readback Buffer"),
            size: ParticleBuffers::byte_len(config.max_particles.max(1) as usize),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        let uniforms = UniformRing::new(&device, &pipelines.scene_layout, config.render.uniform_buffers);
        let meshes = vec![MeshDraw::sphere(&device, 12, 16)];

        let sink = CompletionSink::spawn().map_err(SimulationError::CompletionSink)?;

        let flags = SimulationFlags {
            paused: config.start_paused,
            gravity: config.gravity,
            electrostatics: config.electrostatics,
            render_points: config.render.points,
        };

        Ok(Self {
            device,
            queue,
            pipelines,
            buffers,
            staging,
            uniforms,
            meshes,
            limits: gpu.limits,
            policy: config.dispatch_policy,
            constants: config.physics,
            semaphore: FrameSemaphore::new(config.frames_in_flight),
            sink,
            orchestrator: Orchestrator::new(config.max_particles, config.frames_in_flight, flags),
            current: None,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }

    /// Replace the meshes drawn in mesh mode.
    pub fn set_meshes(&mut self, meshes: Vec<MeshDraw>) {
        self.meshes = meshes;
    }

    pub fn workgroup_size(&self) -> u32 {
        self.pipelines.workgroup_size
    }

    fn pump(device: &wgpu::Device) -> impl FnMut() + '_ {
        move || {
            let _ = device.poll(wgpu::Maintain::Poll);
        }
    }

    /// Wait for a frame slot and the previous merge, then plan this frame.
    pub fn begin_frame(&mut self, scene: &SceneUniforms) -> Result<()> {
        if self.current.is_some() {
            tracing::warn!("begin_frame called twice without submit");
            return Ok(());
        }
        let permit = self.semaphore.acquire(Self::pump(&self.device));
        let plan = self.orchestrator.begin_frame(Self::pump(&self.device))?;
        self.uniforms.advance(&self.queue, scene);

        let readback_bytes = plan
            .merge
            .as_ref()
            .map_or(0, |ticket| ParticleBuffers::byte_len(ticket.readback_len()));
        tracing::trace!(
            frame = plan.frame,
            compute = ?plan.compute,
            render = ?plan.render,
            merge = plan.merge.is_some(),
            "frame planned"
        );
        self.current = Some(ActiveFrame {
            plan,
            permit,
            readback_bytes,
        });
        Ok(())
    }

    /// Encode this frame's physics step and, if a merge is due, the
    /// readback of the buffer the next step will read.
    pub fn run_physics_step(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<(), DispatchError> {
        let Some(frame) = &self.current else {
            return Ok(());
        };

        if let Some(compute) = frame.plan.compute {
            let geometry = DispatchGeometry::new(
                compute.particle_count,
                self.pipelines.workgroup_size,
                self.policy,
                &self.limits,
            )?;
            self.buffers
                .write_params(&self.queue, &PhysicsParams::new(compute.particle_count, &self.constants));

            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Physics Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(self.pipelines.table.compute(compute.variant));
                pass.set_bind_group(0, self.buffers.bind_group(), &[]);
                pass.dispatch_workgroups(geometry.workgroup_count, 1, 1);
            }
            self.buffers.exchange_roles();
        }

        if frame.readback_bytes > 0 {
            encoder.copy_buffer_to_buffer(self.buffers.read(), 0, &self.staging, 0, frame.readback_bytes);
        }
        Ok(())
    }

    /// Record the particle draw into an open render pass.
    pub fn encode_render_commands(&self, pass: &mut wgpu::RenderPass<'_>) {
        let Some(render) = self.current.as_ref().and_then(|f| f.plan.render) else {
            tracing::trace!("nothing to draw");
            return;
        };
        let count = render.particle_count;
        let particles = self.buffers.read().slice(..ParticleBuffers::byte_len(count as usize));

        pass.set_pipeline(self.pipelines.table.render(render.mode));
        pass.set_bind_group(0, self.uniforms.current(), &[]);
        match render.mode {
            RenderMode::Points => {
                pass.set_vertex_buffer(0, particles);
                pass.draw(0..6, 0..count);
            }
            RenderMode::Meshes => {
                if self.meshes.is_empty() {
                    tracing::trace!("mesh mode without meshes");
                    return;
                }
                pass.set_vertex_buffer(1, particles);
                for mesh in &self.meshes {
                    pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    pass.set_index_buffer(mesh.index_buffer.slice(..), mesh.index_format);
                    pass.draw_indexed(0..mesh.index_count, 0, 0..count);
                }
            }
        }
    }

    /// Submit the frame's commands and schedule its completion work.
    pub fn submit(&mut self, commands: wgpu::CommandBuffer) {
        let Some(ActiveFrame {
            plan,
            permit,
            readback_bytes,
        }) = self.current.take()
        else {
            self.queue.submit(std::iter::once(commands));
            return;
        };

        self.queue.submit(std::iter::once(commands));
        self.queue.on_submitted_work_done(move || drop(permit));

        if let Some(ticket) = plan.merge {
            self.schedule_merge(ticket, readback_bytes);
        }
    }

    fn schedule_merge(&self, ticket: MergeTicket, readback_bytes: u64) {
        let queue = Arc::clone(&self.queue);
        let target = Arc::clone(self.buffers.read());
        let upload = move |dense: &[Particle]| {
            if !dense.is_empty() {
                queue.write_buffer(&target, 0, bytemuck::cast_slice(dense));
            }
            queue.submit(std::iter::empty());
        };

        if readback_bytes == 0 {
            self.sink.send(move || ticket.run(Some(&[][..]), upload));
            return;
        }

        let sender = self.sink.sender();
        let staging = Arc::clone(&self.staging);
        self.staging.slice(..readback_bytes).map_async(wgpu::MapMode::Read, move |result| {
            sender.send(move || {
                let state = match result {
                    Ok(()) => {
                        let view = staging.slice(..readback_bytes).get_mapped_range();
                        let state = bytemuck::cast_slice::<u8, Particle>(&view).to_vec();
                        drop(view);
                        staging.unmap();
                        Some(state)
                    }
                    Err(e) => {
                        let error = GpuError::BufferMapping(e.to_string());
                        tracing::warn!(%error, "particle readback failed");
                        None
                    }
                };
                ticket.run(state.as_deref(), upload);
            });
        });
    }

    /// Drain outstanding GPU work and merges.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(frame) = self.current.take() {
            // The frame was planned but never submitted.
            drop(frame.permit);
            if let Some(ticket) = frame.plan.merge {
                ticket.abandon();
            }
        }
        self.orchestrator.finish_merge(Self::pump(&self.device))?;
        let _ = self.device.poll(wgpu::Maintain::Wait);
        tracing::debug!(epoch = self.buffers.epoch(), "engine drained");
        Ok(())
    }
}
