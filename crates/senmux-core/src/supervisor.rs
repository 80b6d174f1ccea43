use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::CoreError;
use crate::interface::{Interface, InterfaceHandle, IoLists};

struct Running {
    handle: Arc<InterfaceHandle>,
    join: JoinHandle<()>,
}

/// Owns every live interface thread and drives graceful shutdown.
///
/// Shutdown is two-phase, matching the reference daemon's own supervisor
/// loop: inputs and queueless outputs are cancelled immediately (their
/// cancellation token set, queue shut down so a blocked reader wakes), while
/// outputs that still own a queue are left running so their writer can drain
/// whatever backlog the engine already handed it. Only once the grace period
/// elapses — or every other interface has already exited — are those
/// draining outputs cancelled too, so a slow consumer gets its full grace
/// window to flush rather than being cut off the instant shutdown begins.
pub struct Supervisor {
    lists: Arc<IoLists>,
    running: Mutex<Vec<Running>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(lists: Arc<IoLists>) -> Self {
        Self {
            lists,
            running: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn io_lists(&self) -> Arc<IoLists> {
        Arc::clone(&self.lists)
    }

    /// Spawns `iface`'s run loop on its own thread, tracked under `handle`'s
    /// identity.
    pub fn spawn(&self, handle: Arc<InterfaceHandle>, mut iface: impl Interface + 'static) {
        use crate::interface::InterfaceState;

        handle.set_state(InterfaceState::Active);
        let thread_handle = Arc::clone(&handle);
        let join = thread::Builder::new()
            .name(format!("iface-{}", handle.name))
            .spawn(move || {
                if let Err(err) = iface.run(&thread_handle) {
                    warn!(interface = %thread_handle.name, error = %err, "interface thread exited with error");
                }
                thread_handle.set_state(InterfaceState::Dead);
            })
            .expect("failed to spawn interface thread");

        self.running.lock().unwrap().push(Running { handle, join });
    }

    /// Drives graceful shutdown across every tracked interface and waits up
    /// to `grace` for their threads to finish. Interfaces still alive after
    /// the grace period are reported but not forcibly killed — Rust gives no
    /// safe mechanism for that, so a straggler is a sign its transport is
    /// wedged and worth logging loudly rather than silently abandoning.
    pub fn shutdown(&self, grace: Duration) -> Result<(), CoreError> {
        use crate::interface::InterfaceState;

        let running = std::mem::take(&mut *self.running.lock().unwrap());

        // Phase one: cancel inputs and queueless outputs right away. Leave
        // outputs with a live queue alone so their writer keeps draining the
        // backlog the engine already handed it.
        let mut cancel_now = Vec::new();
        let mut drain_later = Vec::new();
        for r in running {
            if r.handle.queue.is_some() {
                drain_later.push(r);
            } else {
                cancel_now.push(r);
            }
        }
        for r in &cancel_now {
            r.handle.cancel();
        }

        let deadline = Instant::now() + grace;
        let (tx, rx) = mpsc::channel();
        let mut reapers = Vec::with_capacity(cancel_now.len() + drain_later.len());
        let mut draining_handles = Vec::with_capacity(drain_later.len());

        for Running { handle, join } in cancel_now {
            let tx = tx.clone();
            reapers.push(thread::spawn(move || {
                let _ = join.join();
                let _ = tx.send(handle.name.clone());
            }));
        }
        for Running { handle, join } in drain_later {
            draining_handles.push(Arc::clone(&handle));
            let tx = tx.clone();
            reapers.push(thread::spawn(move || {
                let _ = join.join();
                let _ = tx.send(handle.name.clone());
            }));
        }
        drop(tx);

        let mut joined = 0usize;
        let total = reapers.len();
        while joined < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(name) => {
                    info!(interface = %name, "interface shut down cleanly");
                    joined += 1;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        // Phase two: the grace period is up (or everything already exited).
        // Any output still draining its backlog now gets cut off.
        for handle in &draining_handles {
            if handle.state() != InterfaceState::Dead {
                handle.cancel();
            }
        }

        for reaper in reapers {
            let _ = reaper.join();
        }

        let stragglers = total - joined;
        if stragglers > 0 {
            Err(CoreError::ShutdownTimedOut(stragglers))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Direction, Loopback};
    use senmux_utils::InterfaceId;
    use std::sync::atomic::Ordering;

    struct Obedient;
    impl Interface for Obedient {
        fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
            while !handle.is_cancelled() {
                thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        }
    }

    struct Stubborn;
    impl Interface for Stubborn {
        fn run(&mut self, _handle: &InterfaceHandle) -> Result<(), CoreError> {
            thread::sleep(Duration::from_secs(10));
            Ok(())
        }
    }

    #[test]
    fn shuts_down_obedient_interfaces_within_grace() {
        let sup = Supervisor::new(Arc::new(IoLists::new()));
        let handle = Arc::new(InterfaceHandle::new(InterfaceId::major(1), "obedient", Direction::In, Loopback(false)));
        sup.spawn(handle, Obedient);
        assert!(sup.shutdown(Duration::from_millis(500)).is_ok());
    }

    #[test]
    fn reports_stragglers_after_grace_expires() {
        let sup = Supervisor::new(Arc::new(IoLists::new()));
        let handle = Arc::new(InterfaceHandle::new(InterfaceId::major(1), "stubborn", Direction::In, Loopback(false)));
        sup.spawn(handle, Stubborn);
        let err = sup.shutdown(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, CoreError::ShutdownTimedOut(1)));
    }

    #[test]
    fn cancel_stores_true_before_shutdown_returns() {
        let sup = Supervisor::new(Arc::new(IoLists::new()));
        let handle = Arc::new(InterfaceHandle::new(InterfaceId::major(1), "obedient", Direction::In, Loopback(false)));
        let cancel_flag = Arc::clone(&handle.cancel);
        sup.spawn(handle, Obedient);
        sup.shutdown(Duration::from_millis(500)).unwrap();
        assert!(cancel_flag.load(Ordering::SeqCst));
    }

    struct Draining;
    impl Interface for Draining {
        fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
            let queue = handle.queue.as_ref().unwrap();
            while let Some(_senblk) = queue.next() {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    #[test]
    fn queued_output_drains_backlog_before_grace_cancels_it() {
        use crate::queue::BoundedQueue;
        use crate::senblk::Senblk;

        let sup = Supervisor::new(Arc::new(IoLists::new()));
        let queue = Arc::new(BoundedQueue::new(8));
        for _ in 0..3 {
            queue.push(Senblk::from_bytes(b"$GPGGA,1*2F\r\n", InterfaceId(0)));
        }
        // Mirrors what the engine does on input shutdown: the queue is
        // told no more sentences are coming, but the interface itself is
        // never cancelled directly.
        queue.shutdown();

        let handle = Arc::new(
            InterfaceHandle::new(InterfaceId::major(1), "draining", Direction::Out, Loopback(false))
                .with_queue(Arc::clone(&queue)),
        );
        let cancel_flag = Arc::clone(&handle.cancel);
        sup.spawn(handle, Draining);

        assert!(sup.shutdown(Duration::from_millis(200)).is_ok());
        // It drained its whole backlog on its own well inside the grace
        // window, so the supervisor's phase-two forced cancel never fired.
        assert!(!cancel_flag.load(Ordering::SeqCst));
    }

    #[test]
    fn stuck_queued_output_is_cancelled_once_grace_expires() {
        let sup = Supervisor::new(Arc::new(IoLists::new()));
        let queue = Arc::new(crate::queue::BoundedQueue::new(8));
        let handle = Arc::new(
            InterfaceHandle::new(InterfaceId::major(1), "idle-output", Direction::Out, Loopback(false))
                .with_queue(Arc::clone(&queue)),
        );
        let cancel_flag = Arc::clone(&handle.cancel);
        sup.spawn(handle, Draining);

        // Never pushes anything and never shuts the queue down itself, so
        // the writer just sits blocked on `next()` until the grace window
        // forces it closed.
        sup.shutdown(Duration::from_millis(50)).unwrap_err();
        assert!(cancel_flag.load(Ordering::SeqCst));
    }
}
