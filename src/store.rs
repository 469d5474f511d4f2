//! Reference/refreshed role bookkeeping for the double-buffered particle store.
//!
//! The physics step reads the *reference* buffer and writes the *refreshed*
//! one. After the dispatch is encoded the roles are exchanged, so the render
//! pass and the next step both see the freshly integrated state.

/// Which of the two slots currently plays a role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    fn other(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    /// Index into a two-element array.
    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

/// Two equally sized resources with swappable read/write roles.
///
/// There is exactly one writer role at any time. Swapping is only legal
/// between dispatches; the orchestrator is the only caller.
#[derive(Debug)]
pub struct DoubleBuffer<T> {
    slots: [T; 2],
    read: Slot,
    epoch: u64,
}

impl<T> DoubleBuffer<T> {
    /// `a` starts as the reference (read) buffer, `b` as the refreshed one.
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            read: Slot::A,
            epoch: 0,
        }
    }

    /// The reference buffer the next dispatch reads.
    #[inline]
    pub fn read(&self) -> &T {
        &self.slots[self.read.index()]
    }

    /// The refreshed buffer the next dispatch writes.
    #[inline]
    pub fn write(&self) -> &T {
        &self.slots[self.read.other().index()]
    }

    #[inline]
    pub fn read_slot(&self) -> Slot {
        self.read
    }

    #[inline]
    pub fn write_slot(&self) -> Slot {
        self.read.other()
    }

    /// Swap the read and write roles.
    pub fn exchange_roles(&mut self) {
        self.read = self.read.other();
        self.epoch += 1;
    }

    /// Number of role exchanges since construction.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, slot: Slot) -> &T {
        &self.slots[slot.index()]
    }

    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_roles() {
        let store = DoubleBuffer::new("a", "b");
        assert_eq!(*store.read(), "a");
        assert_eq!(*store.write(), "b");
        assert_eq!(store.epoch(), 0);
    }

    #[test]
    fn test_exchange_roles_swaps_and_counts() {
        let mut store = DoubleBuffer::new(1, 2);
        store.exchange_roles();
        assert_eq!(*store.read(), 2);
        assert_eq!(*store.write(), 1);
        assert_eq!(store.read_slot(), Slot::B);

        store.exchange_roles();
        assert_eq!(*store.read(), 1);
        assert_eq!(store.epoch(), 2);
    }

    #[test]
    fn test_read_and_write_never_alias() {
        let mut store = DoubleBuffer::new(10, 20);
        for _ in 0..5 {
            assert_ne!(store.read_slot(), store.write_slot());
            assert_ne!(store.read(), store.write());
            store.exchange_roles();
        }
    }
}
