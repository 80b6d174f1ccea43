use std::sync::{Condvar, Mutex};

use crate::senblk::Senblk;

/// Default queue depth when an interface doesn't request its own. Matches
/// the original `DEFQSIZE`.
pub const DEFAULT_QUEUE_SIZE: usize = 16;

struct QueueState {
    ring: Vec<Senblk>,
    head: usize,
    len: usize,
    active: bool,
    drops: u64,
}

/// A bounded, multi-producer multi-consumer queue of senblks.
///
/// The original kept a pool of preallocated nodes split between a free list
/// and an intrusive linked data list, so `push` could "steal" the oldest node
/// off the data list when the free list ran dry. Since [`Senblk`] is a small
/// `Copy` value here, the same drop-oldest behavior falls out of a plain
/// ring buffer: there is no separate free list to manage, the ring's unused
/// slots serve as the pool.
pub struct BoundedQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl BoundedQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                ring: vec![Senblk::empty(); capacity],
                head: 0,
                len: 0,
                active: true,
                drops: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().ring.len()
    }

    #[must_use]
    pub fn drops(&self) -> u64 {
        self.state.lock().unwrap().drops
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().active
    }

    /// Appends a senblk, dropping the oldest queued entry if the queue is
    /// already full.
    pub fn push(&self, senblk: Senblk) {
        let mut state = self.state.lock().unwrap();
        if !state.active {
            return;
        }
        let cap = state.ring.len();
        if state.len == cap {
            state.head = (state.head + 1) % cap;
            state.len -= 1;
            state.drops = state.drops.saturating_add(1);
        }
        let idx = (state.head + state.len) % cap;
        state.ring[idx] = senblk;
        state.len += 1;
        senmux_utils::safe_assert!(state.len <= cap, "queue held {} entries over its capacity of {cap}", state.len);
        drop(state);
        self.not_empty.notify_all();
    }

    /// Marks the queue inactive and wakes every blocked reader. Stands in
    /// for the original's convention of pushing a null senblk as a shutdown
    /// token: once shut down, [`next`](Self::next) and [`last`](Self::last)
    /// drain whatever remains and then return `None` forever after.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.active = false;
        drop(state);
        self.not_empty.notify_all();
    }

    /// Blocks until a senblk is available, returning `None` once the queue
    /// has been shut down and drained.
    pub fn next(&self) -> Option<Senblk> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.len > 0 {
                let cap = state.ring.len();
                let senblk = state.ring[state.head];
                state.head = (state.head + 1) % cap;
                state.len -= 1;
                return Some(senblk);
            }
            if !state.active {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Like [`next`](Self::next), but discards every queued entry except the
    /// most recently pushed one before returning it. Used by consumers that
    /// only care about the freshest value (e.g. a position display) and
    /// would rather skip a backlog than fall behind.
    pub fn last(&self) -> Option<Senblk> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.len > 0 {
                let cap = state.ring.len();
                if state.len > 1 {
                    state.head = (state.head + state.len - 1) % cap;
                    state.len = 1;
                }
                let senblk = state.ring[state.head];
                state.len = 0;
                return Some(senblk);
            }
            if !state.active {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Discards every queued entry without affecting `active`.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        state.len = 0;
        state.head = 0;
    }
}
