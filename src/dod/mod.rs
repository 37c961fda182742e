//! Data-oriented storage: generation-stamped handles and fixed-capacity pools.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

pub mod components;
pub mod resources;

pub use components::{Component, ComponentManager, EntityManager, EntityRef};
pub use resources::{Resource, ResourceFlags, ResourceManager, Storage};

/// Largest slot id a pool can hand out.
pub const MAX_ID: u32 = 0x00FF_FFFE;
/// Largest generation before the counter wraps back to zero.
pub const MAX_GENERATION: u8 = 254;

const ID_BITS: u32 = 24;
const ID_MASK: u32 = (1 << ID_BITS) - 1;
const INVALID_BITS: u32 = u32::MAX;

/// Raw handle: a 24-bit slot id and an 8-bit generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ref(u32);

impl Ref {
    pub const INVALID: Ref = Ref(INVALID_BITS);

    pub const fn new(id: u32, generation: u8) -> Self {
        Self((id & ID_MASK) | ((generation as u32) << ID_BITS))
    }

    pub const fn id(self) -> u32 {
        self.0 & ID_MASK
    }

    pub const fn generation(self) -> u8 {
        (self.0 >> ID_BITS) as u8
    }

    /// Slot index in the backing arrays.
    pub const fn index(self) -> usize {
        self.id() as usize
    }

    /// False for the default-constructed handle. Says nothing about liveness.
    pub const fn is_valid(self) -> bool {
        self.id() <= MAX_ID && self.generation() <= MAX_GENERATION
    }
}

impl Default for Ref {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Ref({}v{})", self.id(), self.generation())
        } else {
            f.write_str("Ref(invalid)")
        }
    }
}

/// Handle issued by the pool of kind `T`.
pub struct Handle<T> {
    raw: Ref,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const INVALID: Handle<T> = Handle::from_raw(Ref::INVALID);

    pub const fn from_raw(raw: Ref) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    pub const fn raw(self) -> Ref {
        self.raw
    }

    pub const fn is_valid(self) -> bool {
        self.raw.is_valid()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(f)
    }
}

impl<T> From<Handle<T>> for Ref {
    fn from(handle: Handle<T>) -> Self {
        handle.raw
    }
}

const NOT_ACTIVE: u32 = u32::MAX;

/// Slot allocator shared by every resource and component manager.
///
/// Free ids are handed out lowest first. Each slot carries a generation that
/// is bumped on release, so handles to a released slot stop being alive.
#[derive(Debug, Clone)]
pub struct Pool {
    capacity: u32,
    free_ids: BTreeSet<u32>,
    generations: Box<[u8]>,
    active_positions: Box<[u32]>,
    active: Vec<Ref>,
}

impl Pool {
    pub fn new(capacity: u32) -> Self {
        assert!(
            capacity > 0 && capacity <= MAX_ID + 1,
            "pool capacity {capacity} out of range"
        );
        Self {
            capacity,
            free_ids: (0..capacity).collect(),
            generations: vec![0; capacity as usize].into_boxed_slice(),
            active_positions: vec![NOT_ACTIVE; capacity as usize].into_boxed_slice(),
            active: Vec::with_capacity(capacity as usize),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reserves the lowest free slot. Running out of slots is fatal.
    pub fn allocate(&mut self) -> Ref {
        let id = self
            .free_ids
            .pop_first()
            .unwrap_or_else(|| panic!("pool exhausted (capacity {})", self.capacity));
        let slot = id as usize;
        let handle = Ref::new(id, self.generations[slot]);
        self.active_positions[slot] = self.active.len() as u32;
        self.active.push(handle);
        handle
    }

    /// Returns the slot to the free set. `false` if `handle` was not alive.
    pub fn release(&mut self, handle: Ref) -> bool {
        if !self.is_alive(handle) {
            return false;
        }
        let slot = handle.index();
        let position = self.active_positions[slot] as usize;
        self.active.swap_remove(position);
        if let Some(moved) = self.active.get(position) {
            self.active_positions[moved.index()] = position as u32;
        }
        self.active_positions[slot] = NOT_ACTIVE;
        let generation = &mut self.generations[slot];
        *generation = if *generation >= MAX_GENERATION {
            0
        } else {
            *generation + 1
        };
        self.free_ids.insert(handle.id());
        true
    }

    pub fn is_alive(&self, handle: Ref) -> bool {
        handle.is_valid()
            && handle.id() < self.capacity
            && self.generations[handle.index()] == handle.generation()
            && self.active_positions[handle.index()] != NOT_ACTIVE
    }

    pub fn active_count(&self) -> u32 {
        self.active.len() as u32
    }

    pub fn active_at(&self, index: u32) -> Ref {
        self.active[index as usize]
    }

    pub fn active(&self) -> &[Ref] {
        &self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ref_is_invalid() {
        assert!(!Ref::default().is_valid());
        assert!(!Handle::<u32>::default().is_valid());
        assert!(Ref::new(0, 0).is_valid());
        assert!(Ref::new(MAX_ID, MAX_GENERATION).is_valid());
    }

    #[test]
    fn ref_packs_id_and_generation() {
        let handle = Ref::new(0x12_3456, 7);
        assert_eq!(handle.id(), 0x12_3456);
        assert_eq!(handle.generation(), 7);
    }

    #[test]
    fn allocates_lowest_free_slot() {
        let mut pool = Pool::new(8);
        let a = pool.allocate();
        let b = pool.allocate();
        let c = pool.allocate();
        assert_eq!((a.id(), b.id(), c.id()), (0, 1, 2));
        assert!(pool.release(b));
        assert!(pool.release(a));
        assert_eq!(pool.allocate().id(), 0);
        assert_eq!(pool.allocate().id(), 1);
    }

    #[test]
    fn create_then_destroy_restores_count_and_frees_slot() {
        let mut pool = Pool::new(4);
        pool.allocate();
        let before = pool.active_count();
        let handle = pool.allocate();
        assert!(pool.release(handle));
        assert_eq!(pool.active_count(), before);
        let reused = pool.allocate();
        assert_eq!(reused.id(), handle.id());
        assert_ne!(reused.generation(), handle.generation());
        assert!(!pool.is_alive(handle));
        assert!(pool.is_alive(reused));
    }

    #[test]
    fn double_release_is_rejected() {
        let mut pool = Pool::new(2);
        let handle = pool.allocate();
        assert!(pool.release(handle));
        assert!(!pool.release(handle));
        assert!(!pool.release(Ref::INVALID));
    }

    #[test]
    fn active_list_tracks_live_slots() {
        let mut pool = Pool::new(8);
        let handles: Vec<_> = (0..5).map(|_| pool.allocate()).collect();
        pool.release(handles[1]);
        pool.release(handles[3]);
        let mut ids: Vec<_> = pool.active().iter().map(|r| r.id()).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 2, 4]);
        for index in 0..pool.active_count() {
            assert!(pool.is_alive(pool.active_at(index)));
        }
    }

    #[test]
    fn generation_wraps_after_max() {
        let mut pool = Pool::new(1);
        let mut handle = pool.allocate();
        for _ in 0..=MAX_GENERATION {
            pool.release(handle);
            handle = pool.allocate();
        }
        assert_eq!(handle.generation(), 0);
    }

    #[test]
    #[should_panic(expected = "pool exhausted")]
    fn exhausting_capacity_panics() {
        let mut pool = Pool::new(2);
        pool.allocate();
        pool.allocate();
        pool.allocate();
    }
}
