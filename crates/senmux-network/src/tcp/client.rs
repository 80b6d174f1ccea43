use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use senmux_core::{ChecksumPolicy, CoreError, Direction, Filter, FramingReader, Interface, InterfaceHandle};

use super::reconnect::{connect_with_retry, ReconnectCoordinator};
use crate::preamble;

const READ_BUF_SIZE: usize = 1024;

pub struct FramingSettings {
    pub strict: bool,
    pub nocr: bool,
    pub checksum: ChecksumPolicy,
}

/// A TCP client interface: dials out to `addr`, optionally persisting across
/// disconnects (reconnecting forever) rather than letting the interface die
/// when the peer drops the connection.
pub struct TcpClient {
    pub addr: SocketAddr,
    pub persist: bool,
    pub retry_interval: Duration,
    pub preamble: Vec<u8>,
    pub direction: Direction,
    pub framing: FramingSettings,
    pub ifilter: Option<Filter>,
    /// Shared input queue that framed sentences are pushed to for the
    /// engine to fan out; distinct from `InterfaceHandle::queue`, which
    /// carries sentences the engine has already fanned out *to* this
    /// interface for writing.
    pub engine_input: Arc<senmux_core::BoundedQueue>,
}

impl TcpClient {
    fn initial_connect(&self, cancel: &std::sync::atomic::AtomicBool) -> Option<TcpStream> {
        if self.persist {
            connect_with_retry(self.addr, self.retry_interval, cancel)
        } else {
            TcpStream::connect(self.addr).ok()
        }
    }
}

impl Interface for TcpClient {
    fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
        let Some(mut stream) = self.initial_connect(&handle.cancel) else {
            return Err(CoreError::InitFailed(handle.id, format!("could not connect to {}", self.addr)));
        };
        if !self.preamble.is_empty() {
            let _ = stream.write_all(&self.preamble);
        }

        let coordinator = Arc::new(
            ReconnectCoordinator::new(
                self.addr,
                self.retry_interval,
                stream.try_clone().map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?,
            )
            .with_reconnect_hooks(self.preamble.clone(), handle.queue.clone()),
        );

        let writer_thread = if self.direction.writes() {
            match handle.queue.clone() {
                Some(queue) => {
                    let coordinator = Arc::clone(&coordinator);
                    let cancel = Arc::clone(&handle.cancel);
                    let persist = self.persist;
                    Some(std::thread::spawn(move || {
                        write_loop(&coordinator, queue, &cancel, persist);
                    }))
                }
                None => {
                    senmux_utils::safe_panic!("writable interface {} has no queue", handle.name);
                    None
                }
            }
        } else {
            None
        };

        if self.direction.reads() {
            read_loop(
                &coordinator,
                Arc::clone(&self.engine_input),
                &handle.cancel,
                self.persist,
                handle.id,
                &self.framing,
                self.ifilter.clone(),
            );
        }

        handle.cancel.store(true, Ordering::SeqCst);
        if let Some(current) = coordinator.current() {
            let _ = current.shutdown(Shutdown::Both);
        }
        if let Some(t) = writer_thread {
            let _ = t.join();
        }
        Ok(())
    }
}

fn write_loop(
    coordinator: &ReconnectCoordinator,
    queue: Arc<senmux_core::BoundedQueue>,
    cancel: &std::sync::atomic::AtomicBool,
    persist: bool,
) {
    let Some(mut stream) = coordinator.current() else {
        return;
    };
    while let Some(senblk) = queue.next() {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        if let Err(_err) = stream.write_all(senblk.as_bytes()) {
            if !persist || !coordinator.on_io_error(cancel) {
                return;
            }
            match coordinator.current() {
                Some(fresh) => stream = fresh,
                None => return,
            }
        }
    }
}

fn read_loop(
    coordinator: &ReconnectCoordinator,
    engine_input: Arc<senmux_core::BoundedQueue>,
    cancel: &std::sync::atomic::AtomicBool,
    persist: bool,
    id: senmux_utils::InterfaceId,
    framing: &FramingSettings,
    ifilter: Option<Filter>,
) {
    let Some(mut stream) = coordinator.current() else {
        return;
    };
    let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
    let mut framer = FramingReader::new(framing.strict, framing.nocr, framing.checksum, ifilter);
    let mut buf = [0u8; READ_BUF_SIZE];

    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        match stream.read(&mut buf) {
            Ok(0) => {
                if !persist || !coordinator.on_io_error(cancel) {
                    return;
                }
                match coordinator.current() {
                    Some(fresh) => {
                        stream = fresh;
                        let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
                    }
                    None => return,
                }
            }
            Ok(n) => framer.feed(&buf[..n], id, |senblk| engine_input.push(senblk)),
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(_err) => {
                if !persist || !coordinator.on_io_error(cancel) {
                    return;
                }
                match coordinator.current() {
                    Some(fresh) => {
                        stream = fresh;
                        let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
                    }
                    None => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn reads_framed_sentences_from_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"$GPGGA,1*2F\r\n").unwrap();
        });

        let handle = InterfaceHandle::new(senmux_utils::InterfaceId::major(1), "tcptest", Direction::In, senmux_core::Loopback(false));
        let engine_input = Arc::new(senmux_core::BoundedQueue::new(8));
        let mut client = TcpClient {
            addr,
            persist: false,
            retry_interval: Duration::from_millis(10),
            preamble: Vec::new(),
            direction: Direction::In,
            framing: FramingSettings {
                strict: true,
                nocr: false,
                checksum: ChecksumPolicy::No,
            },
            ifilter: None,
            engine_input: Arc::clone(&engine_input),
        };

        client.run(&handle).unwrap();
        server.join().unwrap();

        let got = engine_input.next().unwrap();
        assert_eq!(got.as_bytes(), b"$GPGGA,1*2F\r\n");
    }

    #[test]
    fn preamble_is_sent_on_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).unwrap();
            buf[..n].to_vec()
        });

        let handle = InterfaceHandle::new(senmux_utils::InterfaceId::major(1), "tcptest", Direction::In, senmux_core::Loopback(false));
        let engine_input = Arc::new(senmux_core::BoundedQueue::new(8));
        let mut client = TcpClient {
            addr,
            persist: false,
            retry_interval: Duration::from_millis(10),
            preamble: b"hello".to_vec(),
            direction: Direction::In,
            framing: FramingSettings {
                strict: true,
                nocr: false,
                checksum: ChecksumPolicy::No,
            },
            ifilter: None,
            engine_input,
        };
        handle.cancel.store(true, Ordering::SeqCst);
        let _ = client.run(&handle);
        assert_eq!(server.join().unwrap(), b"hello");
    }
}
