use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use senmux_core::BoundedQueue;

/// Errno values the original treats as transient connect failures worth
/// retrying forever; anything else aborts the connection attempt.
fn is_retryable(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ECONNREFUSED | libc::EHOSTUNREACH | libc::ENETDOWN | libc::ENETUNREACH | libc::ETIMEDOUT)
    )
}

/// Blocking connect loop that retries transient failures until it succeeds
/// or `cancel` is set.
pub fn connect_with_retry(addr: SocketAddr, retry_interval: Duration, cancel: &AtomicBool) -> Option<TcpStream> {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return None;
        }
        match TcpStream::connect(addr) {
            Ok(stream) => return Some(stream),
            Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => continue,
            Err(err) if is_retryable(&err) => {
                std::thread::sleep(retry_interval);
            }
            Err(_) => return None,
        }
    }
}

struct Shared {
    stream: Option<TcpStream>,
    /// Count of threads (reader, writer) currently past a failed read/write
    /// and waiting at the reconnect rendezvous.
    critical: u8,
    /// Set while one thread is actively tearing down and re-establishing
    /// the connection; everyone else just waits for it to clear.
    fixing: bool,
}

/// The read/write coordination state for one persistent TCP connection.
///
/// A `Both`-direction persistent TCP interface runs a reader thread and a
/// writer thread against the same socket. When either side's I/O call
/// fails, it can't simply reconnect on its own — the other thread is still
/// holding (and probably about to fail on) the same file descriptor. This
/// mirrors the original's `critical`/`fixing` protocol: the first side to
/// notice trouble marks itself critical and waits; once *both* sides have
/// noticed (critical reaches 2), one of them shuts the socket down and
/// reconnects for both, then wakes the other.
pub struct ReconnectCoordinator {
    addr: SocketAddr,
    retry_interval: Duration,
    /// Re-emitted on every successful reconnect, not just the first connect
    /// — the other party has no way to know its session state was lost.
    preamble: Vec<u8>,
    /// Flushed on every successful reconnect so a backlog built up while the
    /// peer was unreachable isn't dumped on it all at once, stale.
    output_queue: Option<Arc<BoundedQueue>>,
    shared: Mutex<Shared>,
    cv: Condvar,
}

impl ReconnectCoordinator {
    #[must_use]
    pub fn new(addr: SocketAddr, retry_interval: Duration, stream: TcpStream) -> Self {
        Self {
            addr,
            retry_interval,
            preamble: Vec::new(),
            output_queue: None,
            shared: Mutex::new(Shared {
                stream: Some(stream),
                critical: 0,
                fixing: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Attaches the preamble and output queue a successful reconnect should
    /// re-emit/flush. Left unset, reconnection is silent — the behavior a
    /// TCP server's accepted connections want, since they have no preamble
    /// of their own and never persist across a drop.
    #[must_use]
    pub fn with_reconnect_hooks(mut self, preamble: Vec<u8>, output_queue: Option<Arc<BoundedQueue>>) -> Self {
        self.preamble = preamble;
        self.output_queue = output_queue;
        self
    }

    /// Connects (retrying transient failures), then re-emits the preamble
    /// and flushes the output queue on success, signaling the other party
    /// that this is a fresh session rather than silently resuming.
    fn reconnect(&self, cancel: &AtomicBool) -> Option<TcpStream> {
        let mut stream = connect_with_retry(self.addr, self.retry_interval, cancel)?;
        if !self.preamble.is_empty() {
            let _ = stream.write_all(&self.preamble);
        }
        if let Some(queue) = &self.output_queue {
            queue.flush();
        }
        Some(stream)
    }

    /// A clone of the currently live stream, or `None` if the connection is
    /// mid-repair.
    #[must_use]
    pub fn current(&self) -> Option<TcpStream> {
        self.shared.lock().unwrap().stream.as_ref().and_then(|s| s.try_clone().ok())
    }

    /// Called by a reader or writer thread after its I/O call on the shared
    /// socket fails. Blocks until the connection has been repaired (or
    /// abandoned). Returns `true` if the caller should fetch a fresh stream
    /// via [`current`](Self::current) and retry; `false` if reconnection was
    /// abandoned and the caller should exit.
    pub fn on_io_error(&self, cancel: &AtomicBool) -> bool {
        let mut shared = self.shared.lock().unwrap();
        shared.critical += 1;

        loop {
            if cancel.load(Ordering::SeqCst) {
                shared.critical = shared.critical.saturating_sub(1);
                return false;
            }
            if shared.fixing {
                shared = self.cv.wait(shared).unwrap();
                continue;
            }
            if shared.critical >= 2 {
                shared.fixing = true;
                if let Some(stream) = shared.stream.take() {
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                }
                drop(shared);

                let new_stream = self.reconnect(cancel);

                shared = self.shared.lock().unwrap();
                let ok = new_stream.is_some();
                shared.stream = new_stream;
                shared.fixing = false;
                shared.critical = shared.critical.saturating_sub(1);
                self.cv.notify_all();
                return ok;
            }
            // Only one side has noticed so far; give the other a chance to
            // hit the same failure and join us before acting.
            let (guard, timeout) = self.cv.wait_timeout(shared, Duration::from_millis(200)).unwrap();
            shared = guard;
            if timeout.timed_out() && shared.critical == 1 && !shared.fixing {
                // The other side may be idle (no traffic to trip its own
                // read/write), not dead. Fix it alone rather than wait
                // forever.
                shared.fixing = true;
                if let Some(stream) = shared.stream.take() {
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                }
                drop(shared);

                let new_stream = self.reconnect(cancel);

                shared = self.shared.lock().unwrap();
                let ok = new_stream.is_some();
                shared.stream = new_stream;
                shared.fixing = false;
                shared.critical = shared.critical.saturating_sub(1);
                self.cv.notify_all();
                return ok;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn reconnect_re_emits_preamble_and_flushes_stale_queue() {
        use senmux_core::Senblk;
        use senmux_utils::InterfaceId;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let (_first_peer, _) = listener.accept().unwrap();

        let queue = Arc::new(BoundedQueue::new(4));
        queue.push(Senblk::from_bytes(b"$GPGGA,stale*00\r\n", InterfaceId(0)));

        let coord = Arc::new(
            ReconnectCoordinator::new(addr, Duration::from_millis(5), stream)
                .with_reconnect_hooks(b"preamble\r\n".to_vec(), Some(Arc::clone(&queue))),
        );

        let accept_and_read = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            let mut buf = [0u8; 32];
            let n = peer.read(&mut buf).unwrap();
            buf[..n].to_vec()
        });

        let cancel = AtomicBool::new(false);
        assert!(coord.on_io_error(&cancel));
        assert_eq!(accept_and_read.join().unwrap(), b"preamble\r\n");

        // The stale backlog queued before the drop is gone; only what's
        // pushed after reconnecting remains.
        queue.push(Senblk::from_bytes(b"$GPGGA,fresh*00\r\n", InterfaceId(0)));
        let got = queue.next().unwrap();
        assert!(got.as_str().unwrap().contains("fresh"));
    }

    #[test]
    fn current_returns_clone_of_live_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let coord = ReconnectCoordinator::new(addr, Duration::from_millis(10), stream);
        assert!(coord.current().is_some());
    }

    #[test]
    fn on_io_error_reconnects_once_both_sides_notice() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let (_server_side, _) = listener.accept().unwrap();
        let coord = std::sync::Arc::new(ReconnectCoordinator::new(addr, Duration::from_millis(5), stream));

        let cancel = AtomicBool::new(false);
        let c1 = std::sync::Arc::clone(&coord);
        let c2 = std::sync::Arc::clone(&coord);
        let cancel = std::sync::Arc::new(cancel);
        let cancel1 = std::sync::Arc::clone(&cancel);
        let cancel2 = std::sync::Arc::clone(&cancel);

        // Keep a listener alive to accept the reconnect.
        let accepted = std::thread::spawn(move || listener.accept());

        let t1 = std::thread::spawn(move || c1.on_io_error(&cancel1));
        let t2 = std::thread::spawn(move || c2.on_io_error(&cancel2));

        let r1 = t1.join().unwrap();
        let r2 = t2.join().unwrap();
        assert!(r1 && r2);
        accepted.join().unwrap().unwrap();
    }
}
