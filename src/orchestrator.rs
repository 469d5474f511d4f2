//! Co-scheduling of physics, rendering and scene mutations.
//!
//! The [`Orchestrator`] owns the protocol and none of the GPU objects, so it
//! can be driven by the wgpu engine or by a simulated GPU in tests. One frame
//! looks like this:
//!
//! 1. [`Orchestrator::begin_frame`] waits for the previous merge (if any) to
//!    signal `merge_done`, takes the particle set back and recycles its
//!    channel.
//! 2. It plans the compute dispatch and the draw for the current count.
//! 3. If the cache has a pending channel, the channel is dispatched and moved,
//!    together with the particle set, into a [`MergeTicket`]. Timeline values
//!    `gpu_done = N` and `merge_done = N + 1` are reserved for it.
//! 4. The engine encodes the plan, schedules a readback of the buffer the next
//!    dispatch will read, and hands the ticket to the completion sink. Once
//!    the readback lands, [`MergeTicket::run`] syncs, merges, uploads, and
//!    signals `N + 1`.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::cache::{ChangeCache, ClearedChannel, DispatchedChannel};
use crate::error::{Result, SimulationError};
use crate::kernel::KernelVariant;
use crate::particle::{CenterOfMass, Particle, ParticleHandle};
use crate::particle_set::ParticleSet;
use crate::sync::Timeline;

/// How particles are drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// Camera-facing point sprites.
    Points,
    /// One instanced mesh per particle.
    Meshes,
}

impl RenderMode {
    pub const ALL: [RenderMode; 2] = [RenderMode::Points, RenderMode::Meshes];

    pub fn index(self) -> usize {
        match self {
            RenderMode::Points => 0,
            RenderMode::Meshes => 1,
        }
    }
}

/// One prebuilt object per kernel variant and per render mode.
#[derive(Debug)]
pub struct VariantTable<C, R> {
    compute: [C; 4],
    render: [R; 2],
}

impl<C, R> VariantTable<C, R> {
    /// Build every entry up front; the first failure aborts.
    pub fn try_build<E>(
        mut compute: impl FnMut(KernelVariant) -> std::result::Result<C, E>,
        mut render: impl FnMut(RenderMode) -> std::result::Result<R, E>,
    ) -> std::result::Result<Self, E> {
        let [a, b, c, d] = KernelVariant::ALL;
        let [points, meshes] = RenderMode::ALL;
        Ok(Self {
            compute: [compute(a)?, compute(b)?, compute(c)?, compute(d)?],
            render: [render(points)?, render(meshes)?],
        })
    }

    pub fn compute(&self, variant: KernelVariant) -> &C {
        &self.compute[variant.index()]
    }

    pub fn render(&self, mode: RenderMode) -> &R {
        &self.render[mode.index()]
    }
}

/// User-facing switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimulationFlags {
    pub paused: bool,
    pub gravity: bool,
    pub electrostatics: bool,
    pub render_points: bool,
}

impl Default for SimulationFlags {
    fn default() -> Self {
        Self {
            paused: false,
            gravity: true,
            electrostatics: true,
            render_points: true,
        }
    }
}

/// A physics step to encode this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputePlan {
    pub variant: KernelVariant,
    pub particle_count: u32,
}

/// A draw to encode this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderPlan {
    pub mode: RenderMode,
    pub particle_count: u32,
}

/// Everything the engine needs to encode one frame.
#[derive(Debug)]
pub struct FramePlan {
    pub frame: u64,
    pub compute: Option<ComputePlan>,
    pub render: Option<RenderPlan>,
    pub merge: Option<MergeTicket>,
}

#[derive(Debug)]
struct MergeReturn {
    particles: ParticleSet,
    cleared: ClearedChannel,
}

/// Signals `merge_done` when dropped, whether or not the ticket ran.
#[derive(Debug)]
struct MergeDoneGuard {
    timeline: Timeline,
    merge_done: u64,
}

impl Drop for MergeDoneGuard {
    fn drop(&mut self) {
        self.timeline.signal(self.merge_done);
    }
}

/// A dispatched channel and the particle set, on loan to the merge job.
///
/// Dropping a ticket without running it releases the waiter, which then sees
/// [`SimulationError::MergeLost`].
#[derive(Debug)]
#[must_use = "a dropped ticket loses the particle set"]
pub struct MergeTicket {
    channel: DispatchedChannel,
    particles: ParticleSet,
    capacity: u32,
    gpu_done: u64,
    timeline: Timeline,
    returns: Sender<MergeReturn>,
    done: MergeDoneGuard,
}

impl MergeTicket {
    pub fn gpu_done(&self) -> u64 {
        self.gpu_done
    }

    pub fn merge_done(&self) -> u64 {
        self.done.merge_done
    }

    /// Records the readback must provide: the pre-merge particle count.
    pub fn readback_len(&self) -> usize {
        self.particles.len()
    }

    /// Complete the merge.
    ///
    /// `gpu_state` is the read-back content of the buffer the next dispatch
    /// reads, or `None` if the readback failed (the last merged CPU copy is
    /// used instead). `upload` receives the merged dense array and must
    /// write it to that same buffer and flush it before returning.
    pub fn run(mut self, gpu_state: Option<&[Particle]>, upload: impl FnOnce(&[Particle])) {
        // The readback only completes once the frame's submission has.
        self.timeline.signal(self.gpu_done);

        match gpu_state {
            Some(state) => self.particles.sync_from_gpu(state),
            None => tracing::warn!(frame_value = self.gpu_done, "merging without GPU readback"),
        }

        let before = self.particles.len();
        let channel_id = self.channel.id();
        let cleared = self.particles.merge(self.channel);
        let dense = self.particles.dense();
        let upload_len = dense.len().min(self.capacity as usize);
        upload(&dense[..upload_len]);

        tracing::debug!(
            channel = channel_id,
            before,
            after = self.particles.len(),
            released = cleared.released().len(),
            "merged change channel"
        );

        let returned = MergeReturn {
            particles: self.particles,
            cleared,
        };
        if self.returns.send(returned).is_err() {
            tracing::trace!("orchestrator dropped before merge finished");
        }
        drop(self.done);
    }

    /// Give up on the readback: merge into the last CPU copy and skip the
    /// upload. Used when the frame that carried the ticket never ran.
    pub fn abandon(self) {
        tracing::warn!(frame_value = self.gpu_done, "abandoning merge without GPU work");
        self.run(None, |_| {});
    }
}

/// The CPU side of the simulation: flags, the change cache, the particle set
/// and the fence bookkeeping that keeps them consistent with the GPU.
#[derive(Debug)]
pub struct Orchestrator {
    flags: SimulationFlags,
    cache: ChangeCache,
    particles: Option<ParticleSet>,
    particles_in_simulation: u32,
    in_flight_change: i64,
    capacity: u32,
    timeline: Timeline,
    returns_tx: Sender<MergeReturn>,
    returns_rx: Receiver<MergeReturn>,
    awaiting_merge: Option<u64>,
    frame: u64,
}

impl Orchestrator {
    pub fn new(capacity: u32, frames_in_flight: usize, flags: SimulationFlags) -> Self {
        let (returns_tx, returns_rx) = mpsc::channel();
        Self {
            flags,
            cache: ChangeCache::new(frames_in_flight),
            particles: Some(ParticleSet::new()),
            particles_in_simulation: 0,
            in_flight_change: 0,
            capacity,
            timeline: Timeline::new(),
            returns_tx,
            returns_rx,
            awaiting_merge: None,
            frame: 0,
        }
    }

    // ---- scene notifications ----

    /// Queue a particle for addition. It reaches the GPU after the next merge.
    pub fn particle_added(&mut self, particle: Particle) -> Result<ParticleHandle> {
        particle.validate()?;
        self.check_capacity(1)?;
        Ok(self.cache.add(particle)?)
    }

    /// Queue several particles; all or nothing with respect to capacity and
    /// validity.
    pub fn add_particles(
        &mut self,
        particles: impl IntoIterator<Item = Particle>,
    ) -> Result<Vec<ParticleHandle>> {
        let particles: Vec<Particle> = particles.into_iter().collect();
        for particle in &particles {
            particle.validate()?;
        }
        self.check_capacity(particles.len())?;
        particles
            .into_iter()
            .map(|p| self.cache.add(p).map_err(SimulationError::from))
            .collect()
    }

    /// Queue a particle for removal. Unknown handles are ignored.
    pub fn particle_removed(&mut self, handle: ParticleHandle) -> Result<()> {
        if let Some(set) = &self.particles {
            let known = set.contains(handle)
                || self
                    .cache
                    .pending_channel()
                    .is_some_and(|changes| changes.is_adding(handle));
            if !known {
                tracing::warn!(?handle, "ignoring removal of unknown particle");
                return Ok(());
            }
        }
        Ok(self.cache.remove(handle)?)
    }

    /// Schedule a merge on the next frame even without changes, so the CPU
    /// copy picks up the GPU's latest state.
    pub fn request_sync(&mut self) -> Result<()> {
        self.cache.current_channel()?;
        Ok(())
    }

    fn projected_count(&self) -> i64 {
        self.particles_in_simulation as i64 + self.in_flight_change + self.cache.pending_particle_change()
    }

    fn check_capacity(&self, additional: usize) -> Result<()> {
        let requested = self.projected_count().max(0) as usize + additional;
        if requested > self.capacity as usize {
            tracing::warn!(requested, capacity = self.capacity, "particle capacity exceeded");
            return Err(SimulationError::CapacityExceeded {
                requested,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    // ---- frame protocol ----

    /// Wait for the previous merge, then plan this frame.
    pub fn begin_frame(&mut self, pump: impl FnMut()) -> Result<FramePlan> {
        self.frame += 1;
        self.finish_merge(pump)?;

        let count = self.particles_in_simulation;
        let compute = if count == 0 {
            tracing::trace!(frame = self.frame, "no particles, skipping physics");
            None
        } else if self.flags.paused {
            tracing::trace!(frame = self.frame, "paused, skipping physics");
            None
        } else {
            Some(ComputePlan {
                variant: self.kernel_variant(),
                particle_count: count,
            })
        };
        let render = (count > 0).then(|| RenderPlan {
            mode: self.render_mode(),
            particle_count: count,
        });
        let merge = self.schedule_merge();

        Ok(FramePlan {
            frame: self.frame,
            compute,
            render,
            merge,
        })
    }

    /// Block until any outstanding merge has been folded back in.
    pub fn finish_merge(&mut self, pump: impl FnMut()) -> Result<()> {
        let Some(merge_done) = self.awaiting_merge.take() else {
            return Ok(());
        };
        self.timeline.wait(merge_done, pump);

        let MergeReturn { particles, cleared } = self
            .returns_rx
            .try_recv()
            .map_err(|_| SimulationError::MergeLost)?;
        self.cache.recycle(cleared);

        let len = particles.len();
        if len > self.capacity as usize {
            tracing::error!(len, capacity = self.capacity, "particle set exceeds buffer capacity");
        }
        self.particles_in_simulation = len.min(self.capacity as usize) as u32;
        self.in_flight_change = 0;
        self.particles = Some(particles);
        Ok(())
    }

    fn schedule_merge(&mut self) -> Option<MergeTicket> {
        self.cache.pending_channel()?;
        let particles = self.particles.take()?;
        let Some(channel) = self.cache.dispatch_pending_channel() else {
            self.particles = Some(particles);
            return None;
        };

        let gpu_done = self.timeline.allocate(2);
        let merge_done = gpu_done + 1;
        self.in_flight_change = channel.particle_change();
        self.awaiting_merge = Some(merge_done);
        tracing::trace!(channel = channel.id(), gpu_done, merge_done, "dispatched change channel");

        Some(MergeTicket {
            channel,
            particles,
            capacity: self.capacity,
            gpu_done,
            timeline: self.timeline.clone(),
            returns: self.returns_tx.clone(),
            done: MergeDoneGuard {
                timeline: self.timeline.clone(),
                merge_done,
            },
        })
    }

    // ---- flags ----

    pub fn pause_simulation(&mut self) {
        self.flags.paused = true;
    }

    pub fn resume(&mut self) {
        self.flags.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused
    }

    pub fn toggle_point_rendering(&mut self) {
        self.flags.render_points = !self.flags.render_points;
    }

    pub fn is_rendering_as_points(&self) -> bool {
        self.flags.render_points
    }

    pub fn set_gravity(&mut self, enabled: bool) {
        self.flags.gravity = enabled;
    }

    pub fn set_electrostatics(&mut self, enabled: bool) {
        self.flags.electrostatics = enabled;
    }

    pub fn flags(&self) -> SimulationFlags {
        self.flags
    }

    pub fn kernel_variant(&self) -> KernelVariant {
        KernelVariant::from_flags(self.flags.gravity, self.flags.electrostatics)
    }

    pub fn render_mode(&self) -> RenderMode {
        if self.flags.render_points {
            RenderMode::Points
        } else {
            RenderMode::Meshes
        }
    }

    // ---- queries ----

    /// Particles the GPU currently simulates.
    pub fn particles_in_simulation(&self) -> u32 {
        self.particles_in_simulation
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The particle set, unless a merge has it on loan.
    pub fn particles(&self) -> Option<&ParticleSet> {
        self.particles.as_ref()
    }

    /// Last merged CPU copy of a particle.
    pub fn particle(&self, handle: ParticleHandle) -> Option<&Particle> {
        self.particles.as_ref()?.get(handle)
    }

    pub fn center_of_mass(&self) -> Option<CenterOfMass> {
        self.particles.as_ref()?.center_of_mass()
    }

    pub fn cache(&self) -> &ChangeCache {
        &self.cache
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn merge_in_flight(&self) -> bool {
        self.awaiting_merge.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParticleError;
    use bytemuck::Zeroable;
    use glam::Vec3;

    fn particle(x: f32) -> Particle {
        Particle::new(1.0, 0.0, Vec3::new(x, 0.0, 0.0)).unwrap()
    }

    /// Run a ticket immediately with a GPU that returns the CPU copy.
    fn run_inline(ticket: MergeTicket, gpu: &mut Vec<Particle>) {
        let state = gpu[..ticket.readback_len()].to_vec();
        ticket.run(Some(&state), |dense| *gpu = dense.to_vec());
    }

    #[test]
    fn test_additions_appear_after_merge() {
        let mut orch = Orchestrator::new(100, 2, SimulationFlags::default());
        let mut gpu = Vec::new();
        let a = orch.particle_added(particle(0.0)).unwrap();
        assert_eq!(orch.particles_in_simulation(), 0);

        let plan = orch.begin_frame(|| {}).unwrap();
        assert!(plan.compute.is_none());
        run_inline(plan.merge.unwrap(), &mut gpu);

        let plan = orch.begin_frame(|| {}).unwrap();
        assert_eq!(orch.particles_in_simulation(), 1);
        assert_eq!(plan.compute.unwrap().particle_count, 1);
        assert!(plan.merge.is_none());
        assert_eq!(orch.particle(a).unwrap().position.x, 0.0);
        assert_eq!(gpu.len(), 1);
    }

    #[test]
    fn test_set_is_on_loan_during_merge() {
        let mut orch = Orchestrator::new(100, 2, SimulationFlags::default());
        orch.particle_added(particle(0.0)).unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();
        assert!(orch.particles().is_none());
        assert!(orch.merge_in_flight());

        let ticket = plan.merge.unwrap();
        assert_eq!(ticket.merge_done(), ticket.gpu_done() + 1);
        let mut gpu = Vec::new();
        run_inline(ticket, &mut gpu);
        orch.finish_merge(|| {}).unwrap();
        assert!(orch.particles().is_some());
        assert!(!orch.merge_in_flight());
    }

    #[test]
    fn test_capacity_counts_pending_changes() {
        let mut orch = Orchestrator::new(2, 1, SimulationFlags::default());
        let a = orch.particle_added(particle(0.0)).unwrap();
        orch.particle_added(particle(1.0)).unwrap();
        assert!(matches!(
            orch.particle_added(particle(2.0)),
            Err(SimulationError::CapacityExceeded { requested: 3, capacity: 2 })
        ));
        orch.particle_removed(a).unwrap();
        orch.particle_added(particle(3.0)).unwrap();
    }

    #[test]
    fn test_bulk_add_is_all_or_nothing() {
        let mut orch = Orchestrator::new(3, 1, SimulationFlags::default());
        assert!(orch.add_particles((0..4).map(|i| particle(i as f32))).is_err());
        assert_eq!(orch.cache().pending_particle_change(), 0);
        assert_eq!(orch.add_particles((0..3).map(|i| particle(i as f32))).unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_removal_is_ignored() {
        let mut orch = Orchestrator::new(10, 1, SimulationFlags::default());
        let mut gpu = Vec::new();
        let a = orch.particle_added(particle(0.0)).unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();
        run_inline(plan.merge.unwrap(), &mut gpu);
        orch.finish_merge(|| {}).unwrap();

        orch.particle_removed(a).unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();
        run_inline(plan.merge.unwrap(), &mut gpu);
        orch.finish_merge(|| {}).unwrap();

        orch.particle_removed(a).unwrap();
        assert!(orch.cache().pending_channel().is_none());
    }

    #[test]
    fn test_request_sync_refreshes_cpu_copy() {
        let mut orch = Orchestrator::new(10, 1, SimulationFlags::default());
        let mut gpu = Vec::new();
        let a = orch.particle_added(particle(0.0)).unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();
        run_inline(plan.merge.unwrap(), &mut gpu);
        orch.finish_merge(|| {}).unwrap();

        gpu[0].position.x = 7.0;
        orch.request_sync().unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();
        let ticket = plan.merge.unwrap();
        assert_eq!(ticket.readback_len(), 1);
        run_inline(ticket, &mut gpu);
        orch.finish_merge(|| {}).unwrap();
        assert_eq!(orch.particle(a).unwrap().position.x, 7.0);
        assert_eq!(orch.particles_in_simulation(), 1);
    }

    #[test]
    fn test_flags_select_variant_and_mode() {
        let mut orch = Orchestrator::new(10, 1, SimulationFlags::default());
        assert_eq!(orch.kernel_variant(), KernelVariant::GravityElectrostatic);
        orch.set_gravity(false);
        orch.set_electrostatics(false);
        assert_eq!(orch.kernel_variant(), KernelVariant::Ballistic);
        orch.toggle_point_rendering();
        assert_eq!(orch.render_mode(), RenderMode::Meshes);
        assert!(!orch.is_rendering_as_points());
    }

    #[test]
    fn test_paused_frames_still_merge() {
        let mut orch = Orchestrator::new(10, 1, SimulationFlags::default());
        let mut gpu = Vec::new();
        orch.pause_simulation();
        orch.particle_added(particle(0.0)).unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();
        run_inline(plan.merge.unwrap(), &mut gpu);

        let plan = orch.begin_frame(|| {}).unwrap();
        assert!(orch.is_paused());
        assert!(plan.compute.is_none());
        assert_eq!(plan.render.unwrap().particle_count, 1);

        orch.resume();
        let plan = orch.begin_frame(|| {}).unwrap();
        assert!(plan.compute.is_some());
    }

    #[test]
    fn test_failed_readback_merges_cpu_copy() {
        let mut orch = Orchestrator::new(10, 1, SimulationFlags::default());
        let a = orch.particle_added(particle(4.0)).unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();
        plan.merge.unwrap().run(None, |_| {});
        orch.finish_merge(|| {}).unwrap();
        assert_eq!(orch.particle(a).unwrap().position.x, 4.0);
    }

    #[test]
    fn test_dropped_ticket_is_reported() {
        let mut orch = Orchestrator::new(10, 1, SimulationFlags::default());
        orch.particle_added(particle(0.0)).unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();
        let merge_done = plan.merge.as_ref().unwrap().merge_done();
        drop(plan);

        assert!(orch.timeline().reached(merge_done));
        assert!(matches!(orch.finish_merge(|| {}), Err(SimulationError::MergeLost)));
    }

    #[test]
    fn test_dropped_ticket_unblocks_a_waiting_thread() {
        let mut orch = Orchestrator::new(10, 1, SimulationFlags::default());
        orch.particle_added(particle(0.0)).unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = std::thread::spawn(move || {
            let result = orch.finish_merge(|| {});
            tx.send(matches!(result, Err(SimulationError::MergeLost))).unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        drop(plan);

        let lost = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("finish_merge returned after the ticket was dropped");
        assert!(lost);
        waiter.join().unwrap();
    }

    #[test]
    fn test_abandoned_ticket_returns_the_set() {
        let mut orch = Orchestrator::new(10, 1, SimulationFlags::default());
        let a = orch.particle_added(particle(2.0)).unwrap();
        let plan = orch.begin_frame(|| {}).unwrap();
        plan.merge.unwrap().abandon();

        orch.finish_merge(|| {}).unwrap();
        assert_eq!(orch.particles_in_simulation(), 1);
        assert_eq!(orch.particle(a).unwrap().position.x, 2.0);
    }

    #[test]
    fn test_rejects_non_positive_mass() {
        let mut orch = Orchestrator::new(10, 1, SimulationFlags::default());
        let mut massless = particle(0.0);
        massless.mass = 0.0;
        assert!(matches!(
            orch.particle_added(massless),
            Err(SimulationError::Particle(ParticleError::InvalidMass(_)))
        ));
        assert!(matches!(
            orch.particle_added(Particle::zeroed()),
            Err(SimulationError::Particle(_))
        ));

        let mut poisoned = particle(1.0);
        poisoned.mass = f32::NAN;
        assert!(orch.add_particles([particle(0.5), poisoned]).is_err());
        assert!(orch.cache().pending_channel().is_none());
        assert_eq!(orch.particles_in_simulation(), 0);
    }

    #[test]
    fn test_variant_table_lookup() {
        let table: VariantTable<String, String> = VariantTable::try_build(
            |v| Ok::<_, ()>(v.label().to_string()),
            |m| Ok(format!("{m:?}")),
        )
        .unwrap();
        assert_eq!(table.compute(KernelVariant::Gravity), "Gravity Kernel");
        assert_eq!(table.render(RenderMode::Meshes), "Meshes");

        let failed: std::result::Result<VariantTable<(), ()>, &str> = VariantTable::try_build(
            |v| if v == KernelVariant::Electrostatic { Err("bad shader") } else { Ok(()) },
            |_| Ok(()),
        );
        assert_eq!(failed.unwrap_err(), "bad shader");
    }
}
