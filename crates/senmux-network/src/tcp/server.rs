use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use senmux_core::{
    ChecksumPolicy, CoreError, Direction, Filter, FramingReader, Interface, InterfaceHandle, IoLists, Loopback,
};
use senmux_utils::InterfaceId;

use super::reconnect::ReconnectCoordinator;
use super::client::FramingSettings;

const READ_BUF_SIZE: usize = 1024;

/// A TCP listener: accepts connections and spawns a read-only (or
/// bidirectional) sub-interface per accepted peer, each carrying the
/// listener's configured identity but a distinct minor id derived from the
/// accepted socket's file descriptor, so filters keyed on the parent name
/// still match every child connection.
pub struct TcpServer {
    pub bind_addr: SocketAddr,
    pub direction: Direction,
    pub framing: FramingSettings,
    pub ifilter: Option<Filter>,
    pub engine_input: Arc<senmux_core::BoundedQueue>,
    pub io_lists: Arc<IoLists>,
    pub queue_capacity: usize,
}

impl Interface for TcpServer {
    fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
        let listener = TcpListener::bind(self.bind_addr)
            .map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;

        let mut children = Vec::new();
        while !handle.is_cancelled() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(interface = %handle.name, %peer, "accepted connection");
                    children.push(self.spawn_child(handle, stream));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(200));
                }
                Err(err) => {
                    tracing::warn!(interface = %handle.name, error = %err, "accept failed");
                    std::thread::sleep(Duration::from_millis(200));
                }
            }
        }

        for child in children {
            let _ = child.join();
        }
        Ok(())
    }
}

impl TcpServer {
    fn spawn_child(&self, handle: &InterfaceHandle, stream: TcpStream) -> std::thread::JoinHandle<()> {
        let minor = stream.as_raw_fd() as u32 & senmux_utils::MINOR_MASK;
        let child_id = InterfaceId(handle.id.major_bits() | (minor & senmux_utils::MINOR_MASK));
        let direction = self.direction;
        let loopback = Loopback(false);
        let engine_input = Arc::clone(&self.engine_input);
        let io_lists = Arc::clone(&self.io_lists);
        let parent_cancel = Arc::clone(&handle.cancel);
        let framing = FramingSettings {
            strict: self.framing.strict,
            nocr: self.framing.nocr,
            checksum: self.framing.checksum,
        };
        let ifilter = self.ifilter.clone();
        let queue_capacity = self.queue_capacity;
        let name = format!("{}-{minor:04x}", handle.name);

        std::thread::spawn(move || {
            let mut child_handle = InterfaceHandle::new(child_id, name, direction, loopback);
            if direction.writes() {
                child_handle = child_handle.with_queue(Arc::new(senmux_core::BoundedQueue::new(queue_capacity)));
            }
            let child_handle = Arc::new(child_handle);
            if direction.writes() {
                io_lists.add_output(Arc::clone(&child_handle));
            }
            run_accepted_connection(&child_handle, stream, engine_input, direction, framing, ifilter, &parent_cancel);
            io_lists.remove_output(child_id);
        })
    }
}

fn run_accepted_connection(
    handle: &InterfaceHandle,
    stream: TcpStream,
    engine_input: Arc<senmux_core::BoundedQueue>,
    direction: Direction,
    framing: FramingSettings,
    ifilter: Option<Filter>,
    parent_cancel: &std::sync::atomic::AtomicBool,
) {
    let addr = match stream.peer_addr() {
        Ok(a) => a,
        Err(_) => return,
    };
    let coordinator = match stream.try_clone() {
        Ok(s) => Arc::new(ReconnectCoordinator::new(addr, Duration::from_secs(1), s)),
        Err(_) => return,
    };
    let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));

    let writer_thread = if direction.writes() {
        let queue = handle.queue.clone();
        let coordinator = Arc::clone(&coordinator);
        let cancel = Arc::clone(&handle.cancel);
        queue.map(|q| {
            std::thread::spawn(move || {
                while let Some(senblk) = q.next() {
                    if cancel.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(mut s) = coordinator.current() {
                        let _ = std::io::Write::write_all(&mut s, senblk.as_bytes());
                    }
                }
            })
        })
    } else {
        None
    };

    if direction.reads() {
        let mut framer = FramingReader::new(framing.strict, framing.nocr, framing.checksum, ifilter);
        let mut buf = [0u8; READ_BUF_SIZE];
        let mut s = stream;
        loop {
            if handle.is_cancelled() || parent_cancel.load(Ordering::SeqCst) {
                break;
            }
            match std::io::Read::read(&mut s, &mut buf) {
                Ok(0) => break,
                Ok(n) => framer.feed(&buf[..n], handle.id, |senblk| engine_input.push(senblk)),
                Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
                Err(_) => break,
            }
        }
    }

    handle.cancel.store(true, Ordering::SeqCst);
    if let Some(s) = coordinator.current() {
        let _ = s.shutdown(std::net::Shutdown::Both);
    }
    if let Some(t) = writer_thread {
        let _ = t.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpStream as StdTcpStream;

    #[test]
    fn accepts_and_frames_a_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine_input = Arc::new(senmux_core::BoundedQueue::new(8));
        let io_lists = Arc::new(IoLists::new());
        let mut server = TcpServer {
            bind_addr: addr,
            direction: Direction::In,
            framing: FramingSettings {
                strict: true,
                nocr: false,
                checksum: ChecksumPolicy::No,
            },
            ifilter: None,
            engine_input: Arc::clone(&engine_input),
            io_lists,
            queue_capacity: 8,
        };

        let handle = Arc::new(InterfaceHandle::new(InterfaceId::major(1), "tcpsrv", Direction::In, Loopback(false)));
        let run_handle = Arc::clone(&handle);
        let server_thread = std::thread::spawn(move || server.run(&run_handle));

        std::thread::sleep(Duration::from_millis(50));
        let mut client = StdTcpStream::connect(addr).unwrap();
        client.write_all(b"$GPGGA,1*2F\r\n").unwrap();
        std::thread::sleep(Duration::from_millis(100));

        handle.cancel.store(true, Ordering::SeqCst);
        let _ = server_thread.join();

        let got = engine_input.next().unwrap();
        assert_eq!(got.as_bytes(), b"$GPGGA,1*2F\r\n");
    }
}
