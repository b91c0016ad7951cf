//! Per-key idle storage and accounting

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::SelectionPolicy;
use crate::factory::PoolKey;

#[derive(Debug)]
struct SlotState<T> {
    idle: VecDeque<T>,
    active: usize,
    /// Borrows that hold a reservation but have not yet produced an object.
    in_flight: usize,
    /// Set once the slot has been unlinked from the map; callers holding it must look up again.
    retired: bool,
}

impl<T> SlotState<T> {
    fn is_vacant(&self) -> bool {
        self.idle.is_empty() && self.active == 0 && self.in_flight == 0
    }
}

/// Idle objects and counters for a single key.
#[derive(Debug)]
pub(crate) struct KeySlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> KeySlot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                idle: VecDeque::new(),
                active: 0,
                in_flight: 0,
                retired: false,
            }),
        }
    }

    /// Turn a reservation into an active object.
    pub fn commit_reservation(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.active += 1;
    }

    pub fn cancel_reservation(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Forget one active object (invalidated, or dropped on a failed return).
    pub fn release_active(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
    }

    pub fn num_idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn num_active(&self) -> usize {
        self.state.lock().active
    }

    /// Mark the slot retired if it holds nothing and nobody is borrowing from it.
    fn retire_if_vacant(&self) -> bool {
        let mut state = self.state.lock();
        if state.is_vacant() {
            state.retired = true;
        }
        state.retired
    }
}

/// Admission outcome for an object offered to the idle set.
#[derive(Debug)]
pub(crate) enum Rejected<T> {
    /// The store is sealed; the pool was closed.
    Sealed(T),
    /// The key already holds its maximum number of idle objects.
    Full(T),
    /// Nothing is on loan under this key, so the object cannot be coming back to it.
    Unborrowed(T),
}

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        match self {
            Rejected::Sealed(object)
            | Rejected::Full(object)
            | Rejected::Unborrowed(object) => object,
        }
    }
}

/// Key to slot map plus the selection policy and the sealed (closed) flag.
///
/// Per-key state sits behind its own mutex so unrelated keys never contend.
/// Callers take an `Arc` to the slot and release the map shard before locking it.
/// A slot is unlinked as soon as it is vacant, so the map only holds keys with
/// idle objects or outstanding borrows. Lock order is map shard, then slot.
pub(crate) struct KeyedSlotStore<K: PoolKey, T> {
    slots: DashMap<K, Arc<KeySlot<T>>>,
    selection: SelectionPolicy,
    max_idle_per_key: Option<usize>,
    sealed: AtomicBool,
}

impl<K: PoolKey, T> KeyedSlotStore<K, T> {
    pub fn new(selection: SelectionPolicy, max_idle_per_key: Option<usize>) -> Self {
        Self {
            slots: DashMap::new(),
            selection,
            max_idle_per_key,
            sealed: AtomicBool::new(false),
        }
    }

    /// Slot for `key`, created on first use.
    fn slot(&self, key: &K) -> Arc<KeySlot<T>> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(KeySlot::new()))
                .value(),
        )
    }

    /// Slot for `key` only if one was ever created.
    pub fn existing(&self, key: &K) -> Option<Arc<KeySlot<T>>> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    /// Claim room for one borrow under `key`.
    ///
    /// Returns `None` when `active + in_flight` has reached `limit`. The returned
    /// slot stays linked until the reservation is committed or cancelled.
    pub fn reserve(&self, key: &K, limit: Option<usize>) -> Option<Arc<KeySlot<T>>> {
        loop {
            let slot = self.slot(key);
            let mut state = slot.state.lock();
            if state.retired {
                continue;
            }
            if let Some(max) = limit
                && state.active + state.in_flight >= max
            {
                return None;
            }
            state.in_flight += 1;
            drop(state);
            return Some(slot);
        }
    }

    /// Take the next idle object per the selection policy.
    pub fn pop_idle(&self, slot: &KeySlot<T>) -> Option<T> {
        let mut state = slot.state.lock();
        match self.selection {
            SelectionPolicy::Lifo => state.idle.pop_back(),
            SelectionPolicy::Fifo => state.idle.pop_front(),
        }
    }

    /// Move a returned object from active to idle.
    ///
    /// Rejected as [`Rejected::Unborrowed`] when the slot has nothing on loan.
    /// Otherwise the active count drops whether or not the object is admitted.
    pub fn check_in(&self, slot: &KeySlot<T>, object: T) -> Result<(), Rejected<T>> {
        let mut state = slot.state.lock();
        if state.active == 0 {
            return Err(Rejected::Unborrowed(object));
        }
        state.active -= 1;
        self.push_locked(&mut state, object)
    }

    /// Admit a freshly created object straight to idle.
    pub fn admit(&self, key: &K, object: T) -> Result<(), Rejected<T>> {
        loop {
            let slot = self.slot(key);
            let mut state = slot.state.lock();
            if state.retired {
                continue;
            }
            return self.push_locked(&mut state, object);
        }
    }

    fn push_locked(&self, state: &mut SlotState<T>, object: T) -> Result<(), Rejected<T>> {
        // Checked under the key lock so a concurrent seal-and-drain cannot miss this object.
        if self.sealed.load(Ordering::Acquire) {
            return Err(Rejected::Sealed(object));
        }
        if let Some(max) = self.max_idle_per_key
            && state.idle.len() >= max
        {
            return Err(Rejected::Full(object));
        }
        state.idle.push_back(object);
        Ok(())
    }

    /// Unlink the slot for `key` if it is vacant. Returns `true` if it was removed.
    pub fn prune(&self, key: &K) -> bool {
        self.slots
            .remove_if(key, |_, slot| slot.retire_if_vacant())
            .is_some()
    }

    /// Remove every idle object for `key`.
    pub fn drain(&self, key: &K) -> Vec<T> {
        let Some(slot) = self.existing(key) else {
            return Vec::new();
        };
        let drained: Vec<T> = slot.state.lock().idle.drain(..).collect();
        self.prune(key);
        drained
    }

    /// Remove every idle object for every key.
    pub fn drain_all(&self) -> Vec<(K, T)> {
        let slots: Vec<(K, Arc<KeySlot<T>>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut drained = Vec::new();
        for (key, slot) in slots {
            let objects: Vec<T> = slot.state.lock().idle.drain(..).collect();
            drained.extend(objects.into_iter().map(|object| (key.clone(), object)));
            self.prune(&key);
        }
        drained
    }

    /// Seal the store. Returns `true` only for the call that sealed it.
    pub fn seal(&self) -> bool {
        !self.sealed.swap(true, Ordering::AcqRel)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn num_idle(&self, key: &K) -> usize {
        self.existing(key).map_or(0, |slot| slot.num_idle())
    }

    pub fn num_active(&self, key: &K) -> usize {
        self.existing(key).map_or(0, |slot| slot.num_active())
    }

    pub fn total_idle(&self) -> usize {
        self.slots.iter().map(|entry| entry.value().num_idle()).sum()
    }

    pub fn total_active(&self) -> usize {
        self.slots.iter().map(|entry| entry.value().num_active()).sum()
    }

    pub fn key_count(&self) -> usize {
        self.slots.len()
    }
}
