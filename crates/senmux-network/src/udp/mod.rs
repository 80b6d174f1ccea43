use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use senmux_core::{ChecksumPolicy, CoreError, Direction, Filter, FramingReader, Interface, InterfaceHandle};

use crate::ais::AisCoalescer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpKind {
    Unicast,
    Broadcast,
    Multicast(Ipv4Addr),
}

pub struct UdpTransport {
    pub bind_addr: SocketAddrV4,
    pub send_addr: SocketAddr,
    pub kind: UdpKind,
    pub direction: Direction,
    pub strict: bool,
    pub nocr: bool,
    pub checksum: ChecksumPolicy,
    pub ifilter: Option<Filter>,
    pub engine_input: Arc<senmux_core::BoundedQueue>,
}

const RECV_BUF_SIZE: usize = 1472; // one Ethernet MTU's worth, matching the AIS announce socket sizing

impl Interface for UdpTransport {
    fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
        let socket = UdpSocket::bind(self.bind_addr).map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;

        match self.kind {
            UdpKind::Broadcast => {
                socket.set_broadcast(true).map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
            }
            UdpKind::Multicast(group) => {
                socket
                    .join_multicast_v4(&group, self.bind_addr.ip())
                    .map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
            }
            UdpKind::Unicast => {}
        }

        let writer_thread = if self.direction.writes() {
            let queue = handle.queue.clone();
            let socket = socket.try_clone().map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
            let send_addr = self.send_addr;
            let cancel = Arc::clone(&handle.cancel);
            queue.map(|q| {
                std::thread::spawn(move || {
                    let mut coalescer = AisCoalescer::new();
                    while let Some(senblk) = q.next() {
                        if cancel.load(Ordering::SeqCst) {
                            return;
                        }
                        if let Some(group) = coalescer.push(senblk) {
                            let mut packet = Vec::new();
                            for part in group {
                                packet.extend_from_slice(part.as_bytes());
                            }
                            let _ = socket.send_to(&packet, send_addr);
                        }
                    }
                })
            })
        } else {
            None
        };

        if self.direction.reads() {
            let mut framer = FramingReader::new(self.strict, self.nocr, self.checksum, self.ifilter.clone());
            let mut buf = [0u8; RECV_BUF_SIZE];
            while !handle.is_cancelled() {
                match socket.recv_from(&mut buf) {
                    Ok((n, _peer)) => framer.feed(&buf[..n], handle.id, |senblk| self.engine_input.push(senblk)),
                    Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
                    Err(_) => break,
                }
            }
        }

        handle.cancel.store(true, Ordering::SeqCst);
        if let Some(q) = &handle.queue {
            q.shutdown();
        }
        if let Some(t) = writer_thread {
            let _ = t.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use senmux_utils::InterfaceId;

    #[test]
    fn receives_and_frames_a_datagram() {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        let engine_input = Arc::new(senmux_core::BoundedQueue::new(8));
        let mut transport = UdpTransport {
            bind_addr,
            send_addr: "127.0.0.1:0".parse().unwrap(),
            kind: UdpKind::Unicast,
            direction: Direction::In,
            strict: true,
            nocr: false,
            checksum: ChecksumPolicy::No,
            ifilter: None,
            engine_input: Arc::clone(&engine_input),
        };

        let sender_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let listener = UdpSocket::bind(bind_addr).unwrap();
        let actual_addr = listener.local_addr().unwrap();
        drop(listener);
        transport.bind_addr = match actual_addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => unreachable!(),
        };

        let handle = Arc::new(InterfaceHandle::new(InterfaceId::major(1), "udptest", Direction::In, senmux_core::Loopback(false)));
        let run_handle = Arc::clone(&handle);
        let t = std::thread::spawn(move || transport.run(&run_handle));

        std::thread::sleep(Duration::from_millis(50));
        sender_socket.send_to(b"$GPGGA,1*2F\r\n", actual_addr).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        handle.cancel.store(true, Ordering::SeqCst);
        let _ = t.join();

        let got = engine_input.next().unwrap();
        assert_eq!(got.as_bytes(), b"$GPGGA,1*2F\r\n");
    }
}
