//! GPU side of the double-buffered particle store.

use std::sync::Arc;

use crate::kernel::PhysicsParams;
use crate::particle::Particle;
use crate::store::{DoubleBuffer, Slot};

/// Two particle buffers plus the physics parameter uniform.
///
/// One bind group exists per role assignment (read A/write B and read B/write
/// A), so exchanging roles never touches bind groups.
pub struct ParticleBuffers {
    store: DoubleBuffer<Arc<wgpu::Buffer>>,
    bind_groups: [wgpu::BindGroup; 2],
    params: wgpu::Buffer,
    capacity: u32,
}

impl ParticleBuffers {
    pub fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, capacity: u32) -> Self {
        let size = Self::byte_len(capacity.max(1) as usize);
        let create = |label: &str| {
            Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }))
        };
        let store = DoubleBuffer::new(create("Particle Buffer A"), create("Particle Buffer B"));

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Physics Params Buffer"),
            size: std::mem::size_of::<PhysicsParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = |read: Slot, write: Slot, label: &str| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: store.get(read).as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: store.get(write).as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params.as_entire_binding(),
                    },
                ],
            })
        };
        // Indexed by the slot currently playing the reference role.
        let bind_groups = [
            bind_group(Slot::A, Slot::B, "Physics Bind Group (A to B)"),
            bind_group(Slot::B, Slot::A, "Physics Bind Group (B to A)"),
        ];

        tracing::debug!(capacity, bytes_per_buffer = size, "allocated particle buffers");
        Self {
            store,
            bind_groups,
            params,
            capacity,
        }
    }

    pub fn byte_len(particles: usize) -> u64 {
        (particles * std::mem::size_of::<Particle>()) as u64
    }

    /// The reference buffer: read by the next dispatch and by the draw.
    pub fn read(&self) -> &Arc<wgpu::Buffer> {
        self.store.read()
    }

    /// The refreshed buffer the next dispatch writes.
    pub fn write(&self) -> &Arc<wgpu::Buffer> {
        self.store.write()
    }

    /// Bind group for the current role assignment.
    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_groups[self.store.read_slot().index()]
    }

    pub fn exchange_roles(&mut self) {
        self.store.exchange_roles();
    }

    pub fn epoch(&self) -> u64 {
        self.store.epoch()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn write_params(&self, queue: &wgpu::Queue, params: &PhysicsParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
    }
}
