use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use senmux_utils::InterfaceId;

use crate::queue::BoundedQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

impl Direction {
    #[must_use]
    pub const fn reads(self) -> bool {
        matches!(self, Self::In | Self::Both)
    }

    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Out | Self::Both)
    }
}

/// Whether a senblk arriving on a `Both`-direction interface is allowed to
/// be written back out the same interface it came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loopback(pub bool);

/// Lifecycle of one configured interface, from config parsing through to
/// its thread(s) being joined. A configured interface that spawns
/// sub-connections (a TCP server accept, a discovery-announced peer) tracks
/// its own state independently of those children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    Parsed,
    Initialized,
    Active,
    Dead,
    Reaped,
}

/// Shared bookkeeping for one live interface: identity, direction, the
/// queue engines fan sentences out to (for `Out`/`Both` interfaces), and the
/// cooperative cancellation token its thread(s) watch at blocking-call
/// boundaries.
///
/// The original signaled a thread to unwind early with `pthread_kill(SIGUSR1)`
/// plus `pthread_exit`. Rust doesn't give safe access to arbitrary
/// thread-targeted signals, so interfaces instead poll `cancel` at their own
/// suspension points (after a blocking read returns, before the next
/// `queue.next()` call) and unwind by returning early.
pub struct InterfaceHandle {
    pub id: InterfaceId,
    pub name: String,
    pub direction: Direction,
    pub loopback: Loopback,
    pub queue: Option<Arc<BoundedQueue>>,
    pub cancel: Arc<AtomicBool>,
    state: Mutex<InterfaceState>,
}

impl InterfaceHandle {
    #[must_use]
    pub fn new(id: InterfaceId, name: impl Into<String>, direction: Direction, loopback: Loopback) -> Self {
        Self {
            id,
            name: name.into(),
            direction,
            loopback,
            queue: None,
            cancel: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(InterfaceState::Parsed),
        }
    }

    #[must_use]
    pub fn with_queue(mut self, queue: Arc<BoundedQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn state(&self) -> InterfaceState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: InterfaceState) {
        *self.state.lock().unwrap() = state;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
    }
}

/// A transport's read/write loop, run on its own thread by the supervisor.
/// `run` should return once its transport is exhausted (EOF on a
/// non-persistent file) or `handle.is_cancelled()` becomes true.
pub trait Interface: Send {
    fn run(&mut self, handle: &InterfaceHandle) -> Result<(), crate::error::CoreError>;
}

/// The shared registry of currently live output interfaces that the engine
/// fans sentences out to. Guarded by a single mutex, matching the original's
/// `io_mutex`-protected `iolists` — output registration/deregistration must
/// never race with a fan-out pass that's iterating the list.
#[derive(Default)]
pub struct IoLists {
    outputs: Mutex<Vec<Arc<InterfaceHandle>>>,
}

impl IoLists {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_output(&self, handle: Arc<InterfaceHandle>) {
        self.outputs.lock().unwrap().push(handle);
    }

    pub fn remove_output(&self, id: InterfaceId) {
        self.outputs.lock().unwrap().retain(|h| h.id != id);
    }

    /// A point-in-time snapshot, safe to iterate without holding the lock
    /// (pushing to each output's queue may itself briefly block).
    #[must_use]
    pub fn snapshot_outputs(&self) -> Vec<Arc<InterfaceHandle>> {
        self.outputs.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_shuts_down_queue() {
        let queue = Arc::new(BoundedQueue::new(4));
        let handle = InterfaceHandle::new(InterfaceId::major(1), "test", Direction::Out, Loopback(false))
            .with_queue(Arc::clone(&queue));
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(!queue.is_active());
    }

    #[test]
    fn io_lists_add_remove() {
        let lists = IoLists::new();
        let handle = Arc::new(InterfaceHandle::new(InterfaceId::major(1), "a", Direction::Out, Loopback(false)));
        lists.add_output(Arc::clone(&handle));
        assert_eq!(lists.snapshot_outputs().len(), 1);
        lists.remove_output(handle.id);
        assert!(lists.snapshot_outputs().is_empty());
    }
}
