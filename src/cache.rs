//! Deferred add/remove cache for particles.
//!
//! Scene mutations cannot touch the GPU particle buffers while a compute
//! dispatch may be reading them. Instead they accumulate in a *channel*; once
//! per frame the orchestrator dispatches the pending channel, and after the
//! GPU is done with the frame the merge job folds it into the particle set.
//!
//! Each channel cycles `Free -> Pending -> Unsafe -> Free`:
//!
//! - `Free`: idle, owned by the pool, accepts its first change on demand.
//! - `Pending`: the single channel currently collecting changes.
//! - `Unsafe`: dispatched. The change set has been moved into a
//!   [`DispatchedChannel`] token; the pool keeps only the tag, so nothing on
//!   the frame thread can read it until the merge hands back a
//!   [`ClearedChannel`].
//!
//! The pool is sized `frames_in_flight + 1` so a channel being drained never
//! blocks new changes.

use std::collections::HashSet;

use crate::error::CacheError;
use crate::particle::{Particle, ParticleHandle};

/// Accumulated mutations of one channel.
#[derive(Debug, Default)]
pub struct ChangeSet {
    adding: Vec<(ParticleHandle, Particle)>,
    removing: HashSet<ParticleHandle>,
}

impl ChangeSet {
    /// Particles to add, in insertion order.
    pub fn adding(&self) -> impl Iterator<Item = (ParticleHandle, &Particle)> + '_ {
        self.adding.iter().map(|(h, p)| (*h, p))
    }

    /// Handles to remove.
    pub fn removing(&self) -> impl Iterator<Item = ParticleHandle> + '_ {
        self.removing.iter().copied()
    }

    pub fn is_removing(&self, handle: ParticleHandle) -> bool {
        self.removing.contains(&handle)
    }

    pub fn is_adding(&self, handle: ParticleHandle) -> bool {
        self.adding.iter().any(|(h, _)| *h == handle)
    }

    pub fn adding_len(&self) -> usize {
        self.adding.len()
    }

    pub fn removing_len(&self) -> usize {
        self.removing.len()
    }

    /// `|adding| - |removing|`, used to project the particle count without
    /// walking the set.
    pub fn particle_change(&self) -> i64 {
        self.adding.len() as i64 - self.removing.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.adding.is_empty() && self.removing.is_empty()
    }

    fn clear(&mut self) {
        self.adding.clear();
        self.removing.clear();
    }
}

/// Lifecycle tag of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Free,
    Pending,
    Unsafe,
}

#[derive(Debug)]
enum Channel {
    Free(ChangeSet),
    Pending(ChangeSet),
    Unsafe,
}

impl Channel {
    fn state(&self) -> ChannelState {
        match self {
            Channel::Free(_) => ChannelState::Free,
            Channel::Pending(_) => ChannelState::Pending,
            Channel::Unsafe => ChannelState::Unsafe,
        }
    }
}

/// A channel that left the pool for merging. Owning this token is the only
/// way to read the dispatched changes.
#[derive(Debug)]
pub struct DispatchedChannel {
    id: usize,
    changes: ChangeSet,
}

impl DispatchedChannel {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn particle_change(&self) -> i64 {
        self.changes.particle_change()
    }

    /// Finish with the changes. `released` lists the handles whose removal
    /// actually took effect; their indices become reusable on recycle.
    pub(crate) fn into_cleared(mut self, released: Vec<ParticleHandle>) -> ClearedChannel {
        self.changes.clear();
        ClearedChannel {
            id: self.id,
            changes: self.changes,
            released,
        }
    }
}

/// A merged channel on its way back to the pool.
#[derive(Debug)]
pub struct ClearedChannel {
    id: usize,
    changes: ChangeSet,
    released: Vec<ParticleHandle>,
}

impl ClearedChannel {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn released(&self) -> &[ParticleHandle] {
        &self.released
    }
}

/// Generational index allocator with a free-list.
#[derive(Debug, Default)]
struct HandleAllocator {
    generations: Vec<u32>,
    free: Vec<u32>,
}

impl HandleAllocator {
    fn allocate(&mut self) -> ParticleHandle {
        match self.free.pop() {
            Some(index) => ParticleHandle::new(index, self.generations[index as usize]),
            None => {
                let index = self.generations.len() as u32;
                self.generations.push(0);
                ParticleHandle::new(index, 0)
            }
        }
    }

    fn release(&mut self, handle: ParticleHandle) {
        let Some(generation) = self.generations.get_mut(handle.index() as usize) else {
            return;
        };
        if *generation == handle.generation() {
            *generation = generation.wrapping_add(1);
            self.free.push(handle.index());
        }
    }
}

/// Pool of change channels.
#[derive(Debug)]
pub struct ChangeCache {
    channels: Vec<Channel>,
    pending: Option<usize>,
    handles: HandleAllocator,
}

impl ChangeCache {
    /// Create a pool with `frames_in_flight + 1` channels.
    pub fn new(frames_in_flight: usize) -> Self {
        let channels = (0..frames_in_flight + 1)
            .map(|_| Channel::Free(ChangeSet::default()))
            .collect();
        Self {
            channels,
            pending: None,
            handles: HandleAllocator::default(),
        }
    }

    /// Number of channels in the pool.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// The channel accepting mutations, promoting a free one if needed.
    pub fn current_channel(&mut self) -> Result<&mut ChangeSet, CacheError> {
        let index = match self.pending {
            Some(index) => index,
            None => {
                let index = self
                    .channels
                    .iter()
                    .position(|c| matches!(c, Channel::Free(_)))
                    .ok_or(CacheError::Exhausted {
                        channels: self.channels.len(),
                    })?;
                let Channel::Free(set) = std::mem::replace(&mut self.channels[index], Channel::Unsafe)
                else {
                    unreachable!("position() matched a free channel");
                };
                self.channels[index] = Channel::Pending(set);
                self.pending = Some(index);
                index
            }
        };
        match &mut self.channels[index] {
            Channel::Pending(set) => Ok(set),
            _ => unreachable!("pending index always points at a pending channel"),
        }
    }

    /// Record a new particle and return its handle.
    pub fn add(&mut self, particle: Particle) -> Result<ParticleHandle, CacheError> {
        // Resolve the channel first so a full pool does not leak a handle.
        self.current_channel()?;
        let handle = self.handles.allocate();
        self.current_channel()?.adding.push((handle, particle));
        Ok(handle)
    }

    /// Record the removal of a particle.
    pub fn remove(&mut self, handle: ParticleHandle) -> Result<(), CacheError> {
        self.current_channel()?.removing.insert(handle);
        Ok(())
    }

    /// The unique pending channel, if any.
    pub fn pending_channel(&self) -> Option<&ChangeSet> {
        self.pending.map(|index| match &self.channels[index] {
            Channel::Pending(set) => set,
            _ => unreachable!("pending index always points at a pending channel"),
        })
    }

    /// Move the pending channel to `Unsafe` and hand its changes to the caller.
    pub fn dispatch_pending_channel(&mut self) -> Option<DispatchedChannel> {
        let index = self.pending.take()?;
        match std::mem::replace(&mut self.channels[index], Channel::Unsafe) {
            Channel::Pending(changes) => Some(DispatchedChannel { id: index, changes }),
            _ => unreachable!("pending index always points at a pending channel"),
        }
    }

    /// Return a merged channel to the pool (`Unsafe -> Free`).
    pub fn recycle(&mut self, cleared: ClearedChannel) {
        let ClearedChannel {
            id,
            changes,
            released,
        } = cleared;
        debug_assert_eq!(self.channels[id].state(), ChannelState::Unsafe);
        for handle in released {
            self.handles.release(handle);
        }
        self.channels[id] = Channel::Free(changes);
    }

    /// Snapshot of every channel's lifecycle tag.
    pub fn channel_states(&self) -> Vec<ChannelState> {
        self.channels.iter().map(Channel::state).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| matches!(c, Channel::Pending(_)))
            .count()
    }

    /// Channels currently owned by a merge job.
    pub fn in_flight_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| matches!(c, Channel::Unsafe))
            .count()
    }

    /// Net particle change of the pending channel.
    pub fn pending_particle_change(&self) -> i64 {
        self.pending_channel().map_or(0, ChangeSet::particle_change)
    }
}
