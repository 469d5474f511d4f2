//! The authoritative CPU-side particle set.
//!
//! Records live in an arena indexed by [`ParticleHandle::index`]. A dense
//! `order` vector maps buffer slots back to handles: slot `i` of the GPU
//! buffer holds the particle `order[i]`. Merging a change channel compacts the
//! order (survivors keep their relative order, additions are appended in
//! insertion order).

use glam::Vec3;

use crate::cache::{ClearedChannel, DispatchedChannel};
use crate::particle::{CenterOfMass, Particle, ParticleHandle};

#[derive(Clone, Debug)]
struct Entry {
    generation: u32,
    slot: u32,
    particle: Particle,
}

/// Mapping of particle identity to buffer slot, plus the last known state.
#[derive(Clone, Debug, Default)]
pub struct ParticleSet {
    entries: Vec<Option<Entry>>,
    order: Vec<ParticleHandle>,
}

impl ParticleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live particles, equal to the GPU dispatch size.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn entry(&self, handle: ParticleHandle) -> Option<&Entry> {
        self.entries
            .get(handle.index() as usize)?
            .as_ref()
            .filter(|e| e.generation == handle.generation())
    }

    pub fn contains(&self, handle: ParticleHandle) -> bool {
        self.entry(handle).is_some()
    }

    /// Last merged state of a particle.
    pub fn get(&self, handle: ParticleHandle) -> Option<&Particle> {
        self.entry(handle).map(|e| &e.particle)
    }

    /// Buffer slot currently holding a particle.
    pub fn slot_of(&self, handle: ParticleHandle) -> Option<u32> {
        self.entry(handle).map(|e| e.slot)
    }

    /// Handles in buffer order.
    pub fn handles(&self) -> &[ParticleHandle] {
        &self.order
    }

    /// `(handle, particle)` pairs in buffer order.
    pub fn iter(&self) -> impl Iterator<Item = (ParticleHandle, &Particle)> + '_ {
        self.order.iter().filter_map(move |h| self.get(*h).map(|p| (*h, p)))
    }

    /// The dense array uploaded to the GPU.
    pub fn dense(&self) -> Vec<Particle> {
        self.iter().map(|(_, p)| *p).collect()
    }

    pub fn center_of_mass(&self) -> Option<CenterOfMass> {
        CenterOfMass::of(self.iter().map(|(_, p)| p))
    }

    /// Total linear momentum.
    pub fn momentum(&self) -> Vec3 {
        self.iter().map(|(_, p)| p.momentum()).sum()
    }

    /// Route GPU write-back to owners: slot `i` of `state` belongs to
    /// `order[i]`. Extra trailing records are ignored.
    pub fn sync_from_gpu(&mut self, state: &[Particle]) {
        for (handle, particle) in self.order.iter().zip(state) {
            if let Some(Some(entry)) = self.entries.get_mut(handle.index() as usize) {
                entry.particle = *particle;
            }
        }
    }

    /// Fold a dispatched channel in: result is `(self ∪ added) \ removed`.
    pub fn merge(&mut self, channel: DispatchedChannel) -> ClearedChannel {
        let changes = channel.changes();
        let mut released = Vec::with_capacity(changes.removing_len());

        for handle in changes.removing() {
            if self.contains(handle) {
                self.entries[handle.index() as usize] = None;
                released.push(handle);
            } else if !changes.adding().any(|(added, _)| added == handle) {
                tracing::debug!(?handle, "ignoring removal of unknown particle");
            }
        }

        let entries = &self.entries;
        self.order.retain(|h| {
            entries
                .get(h.index() as usize)
                .and_then(Option::as_ref)
                .is_some_and(|e| e.generation == h.generation())
        });

        for (handle, particle) in changes.adding() {
            if changes.is_removing(handle) {
                released.push(handle);
                continue;
            }
            let index = handle.index() as usize;
            if index >= self.entries.len() {
                self.entries.resize_with(index + 1, || None);
            }
            if self.entries[index].is_some() {
                tracing::warn!(?handle, "handle index reused while still live");
                self.order.retain(|h| h.index() != handle.index());
            }
            self.entries[index] = Some(Entry {
                generation: handle.generation(),
                slot: 0,
                particle: *particle,
            });
            self.order.push(handle);
        }

        for (slot, handle) in self.order.iter().enumerate() {
            if let Some(Some(entry)) = self.entries.get_mut(handle.index() as usize) {
                entry.slot = slot as u32;
            }
        }

        channel.into_cleared(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChangeCache;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn particle(x: f32) -> Particle {
        Particle::new(1.0, 0.0, Vec3::new(x, 0.0, 0.0)).unwrap()
    }

    fn merge_pending(cache: &mut ChangeCache, set: &mut ParticleSet) {
        if let Some(d) = cache.dispatch_pending_channel() {
            let cleared = set.merge(d);
            cache.recycle(cleared);
        }
    }

    #[test]
    fn test_insertion_order_is_buffer_order() {
        let mut cache = ChangeCache::new(2);
        let mut set = ParticleSet::new();
        let a = cache.add(particle(0.0)).unwrap();
        let b = cache.add(particle(1.0)).unwrap();
        let c = cache.add(particle(2.0)).unwrap();
        merge_pending(&mut cache, &mut set);

        assert_eq!(set.handles(), &[a, b, c]);
        assert_eq!(set.slot_of(c), Some(2));
        assert_eq!(set.dense()[1].position.x, 1.0);
    }

    #[test]
    fn test_removal_compacts_slots() {
        let mut cache = ChangeCache::new(2);
        let mut set = ParticleSet::new();
        let a = cache.add(particle(0.0)).unwrap();
        let b = cache.add(particle(1.0)).unwrap();
        let c = cache.add(particle(2.0)).unwrap();
        merge_pending(&mut cache, &mut set);

        cache.remove(a).unwrap();
        let d = cache.add(particle(3.0)).unwrap();
        merge_pending(&mut cache, &mut set);

        assert_eq!(set.handles(), &[b, c, d]);
        assert_eq!(set.slot_of(b), Some(0));
        assert_eq!(set.slot_of(d), Some(2));
        assert!(!set.contains(a));
    }

    #[test]
    fn test_add_and_remove_in_same_channel() {
        let mut cache = ChangeCache::new(1);
        let mut set = ParticleSet::new();
        let a = cache.add(particle(0.0)).unwrap();
        cache.remove(a).unwrap();
        let d = cache.dispatch_pending_channel().unwrap();
        let cleared = set.merge(d);

        assert!(set.is_empty());
        assert_eq!(cleared.released(), &[a]);
    }

    #[test]
    fn test_stale_handle_does_not_remove_new_owner() {
        let mut cache = ChangeCache::new(1);
        let mut set = ParticleSet::new();
        let old = cache.add(particle(0.0)).unwrap();
        merge_pending(&mut cache, &mut set);
        cache.remove(old).unwrap();
        merge_pending(&mut cache, &mut set);

        let new = cache.add(particle(5.0)).unwrap();
        assert_eq!(new.index(), old.index());
        merge_pending(&mut cache, &mut set);

        cache.remove(old).unwrap();
        merge_pending(&mut cache, &mut set);
        assert!(set.contains(new));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_sync_from_gpu_routes_by_slot() {
        let mut cache = ChangeCache::new(1);
        let mut set = ParticleSet::new();
        let a = cache.add(particle(0.0)).unwrap();
        let b = cache.add(particle(1.0)).unwrap();
        merge_pending(&mut cache, &mut set);

        let mut state = set.dense();
        state[0].position = Vec3::new(10.0, 0.0, 0.0);
        state[1].velocity = Vec3::Y;
        set.sync_from_gpu(&state);

        assert_eq!(set.get(a).unwrap().position.x, 10.0);
        assert_eq!(set.get(b).unwrap().velocity, Vec3::Y);
    }

    #[test]
    fn test_merge_conserves_set_algebra() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut cache = ChangeCache::new(3);
        let mut set = ParticleSet::new();
        let mut expected: BTreeSet<ParticleHandle> = BTreeSet::new();

        for _round in 0..50 {
            let mut added = Vec::new();
            let mut removed = Vec::new();
            for _ in 0..rng.gen_range(0..20) {
                if rng.gen_bool(0.6) || expected.is_empty() {
                    let h = cache.add(particle(rng.gen_range(-1.0..1.0))).unwrap();
                    added.push(h);
                } else {
                    let pool: Vec<_> = expected.iter().chain(added.iter()).copied().collect();
                    let h = pool[rng.gen_range(0..pool.len())];
                    cache.remove(h).unwrap();
                    removed.push(h);
                }
            }
            merge_pending(&mut cache, &mut set);

            expected.extend(added);
            for h in removed {
                expected.remove(&h);
            }
            let actual: BTreeSet<_> = set.handles().iter().copied().collect();
            assert_eq!(actual, expected);
            assert_eq!(set.len(), expected.len());
        }
    }

    #[test]
    fn test_center_of_mass_of_set() {
        let mut cache = ChangeCache::new(1);
        let mut set = ParticleSet::new();
        assert!(set.center_of_mass().is_none());
        cache.add(particle(-1.0)).unwrap();
        cache.add(particle(3.0)).unwrap();
        merge_pending(&mut cache, &mut set);
        let com = set.center_of_mass().unwrap();
        assert!((com.position.x - 1.0).abs() < 1e-6);
    }
}
