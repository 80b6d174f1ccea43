use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use senmux_utils::InterfaceId;

use crate::queue::BoundedQueue;
use crate::senblk::Senblk;

/// The literal heartbeat sentence, copied into a senblk and pushed to its
/// owning interface's queue every time the heartbeat event fires.
pub const HEARTBEAT_SENTENCE: &[u8] = b"$PKPXI,HB*7C\r\n";

struct ScheduledEvent {
    when: Instant,
    period: Option<Duration>,
    queue: Arc<BoundedQueue>,
    src: InterfaceId,
}

impl ScheduledEvent {
    fn fire(&self) {
        self.queue.push(Senblk::from_bytes(HEARTBEAT_SENTENCE, self.src));
    }
}

/// Heap entries are ordered earliest-`when`-first via [`Reverse`], so
/// `BinaryHeap` (a max-heap) behaves like a min-heap over `when`.
struct HeapEntry(Instant, usize);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

struct EventManagerState {
    events: Vec<Option<ScheduledEvent>>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

/// A single background thread that fires scheduled, periodic events —
/// presently only interface heartbeats — in `when` order.
pub struct EventManager {
    state: Mutex<EventManagerState>,
    wakeup: Condvar,
    active: AtomicBool,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EventManagerState {
                events: Vec::new(),
                heap: BinaryHeap::new(),
            }),
            wakeup: Condvar::new(),
            active: AtomicBool::new(true),
        }
    }

    /// Registers a recurring heartbeat, first firing after `period` and
    /// repeating every `period` thereafter.
    pub fn schedule_heartbeat(&self, queue: Arc<BoundedQueue>, src: InterfaceId, period: Duration) {
        let mut state = self.state.lock().unwrap();
        let idx = state.events.len();
        let when = Instant::now() + period;
        state.events.push(Some(ScheduledEvent {
            when,
            period: Some(period),
            queue,
            src,
        }));
        state.heap.push(Reverse(HeapEntry(when, idx)));
        drop(state);
        self.wakeup.notify_all();
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.wakeup.notify_all();
    }

    /// Runs the dispatch loop until [`stop`](Self::stop) is called. Intended
    /// to be the body of the event manager's dedicated thread.
    pub fn run(&self) {
        let mut state = self.state.lock().unwrap();
        loop {
            if !self.active.load(Ordering::SeqCst) {
                return;
            }
            let Some(&Reverse(HeapEntry(when, idx))) = state.heap.peek() else {
                state = self.wakeup.wait(state).unwrap();
                continue;
            };
            let now = Instant::now();
            if when > now {
                let (guard, _timeout) = self.wakeup.wait_timeout(state, when - now).unwrap();
                state = guard;
                continue;
            }
            state.heap.pop();
            let period = {
                let event = state.events[idx].as_ref().unwrap();
                event.fire();
                event.period
            };
            if let Some(period) = period {
                let next_when = when + period;
                state.events[idx].as_mut().unwrap().when = next_when;
                state.heap.push(Reverse(HeapEntry(next_when, idx)));
            } else {
                state.events[idx] = None;
            }
        }
    }
}
