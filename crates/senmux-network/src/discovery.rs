use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use senmux_core::{ChecksumPolicy, CoreError, Direction, Filter, Interface, InterfaceHandle, IoLists, Loopback};
use senmux_utils::InterfaceId;
use serde_json::Value;

use crate::tcp::{FramingSettings, TcpClient};

pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(239, 2, 1, 1);
pub const DISCOVERY_PORT: u16 = 2052;
const RECV_BUF_SIZE: usize = 1472;

/// How long a newly-announced endpoint must keep announcing the same
/// address before we actually redial to it. Avoids tearing a connection
/// down and rebuilding it for a single flaky announcement.
const ENDPOINT_CHANGE_HYSTERESIS: Duration = Duration::from_secs(2);

/// How long a peer can go unannounced before its sub-interface is torn
/// down.
const STALE_TIMEOUT: Duration = Duration::from_secs(15);

struct PendingChange {
    addr: SocketAddr,
    first_seen: Instant,
}

struct Peer {
    addr: SocketAddr,
    last_seen: Instant,
    cancel: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
    pending: Option<PendingChange>,
}

/// Listens on the well-known discovery multicast group for JSON
/// announcements of the form `{"IP": "...", "Services": [{"Service": "...",
/// "Port": ...}, ...]}` and maintains a TCP sub-interface per
/// currently-announced peer advertising an `nmea-0183` service.
pub struct DiscoveryListener {
    pub direction: Direction,
    pub ifilter: Option<Filter>,
    pub engine_input: Arc<senmux_core::BoundedQueue>,
    pub io_lists: Arc<IoLists>,
    pub queue_capacity: usize,
}

/// Extracts the `nmea-0183` service's address out of an announcement. The
/// wire protocol carries no peer name, so the announced IP string doubles as
/// the key peers are tracked and redialed under.
fn parse_announcement(bytes: &[u8]) -> Option<(String, SocketAddr)> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    let ip_str = value.get("IP")?.as_str()?;
    let services = value.get("Services")?.as_array()?;

    let mut port = None;
    for svc in services {
        if svc.get("Service").and_then(Value::as_str) == Some("nmea-0183") {
            port = svc.get("Port").and_then(Value::as_u64);
            break;
        }
    }
    let port = u16::try_from(port?).ok()?;
    let ip: std::net::IpAddr = ip_str.parse().ok()?;
    Some((ip_str.to_string(), SocketAddr::new(ip, port)))
}

impl Interface for DiscoveryListener {
    fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT);
        let socket = UdpSocket::bind(bind_addr).map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
        socket
            .join_multicast_v4(&DISCOVERY_GROUP, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;

        let mut peers: HashMap<String, Peer> = HashMap::new();
        let mut buf = [0u8; RECV_BUF_SIZE];

        while !handle.is_cancelled() {
            match socket.recv_from(&mut buf) {
                Ok((n, _from)) => {
                    if let Some((name, addr)) = parse_announcement(&buf[..n]) {
                        self.on_announcement(handle, &mut peers, name, addr);
                    }
                }
                Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
                Err(_) => break,
            }
            self.reap_stale(&mut peers);
        }

        for (_, peer) in peers.drain() {
            peer.cancel.store(true, Ordering::SeqCst);
            let _ = peer.thread.join();
        }
        Ok(())
    }
}

impl DiscoveryListener {
    fn on_announcement(&self, handle: &InterfaceHandle, peers: &mut HashMap<String, Peer>, name: String, addr: SocketAddr) {
        let now = Instant::now();
        match peers.get_mut(&name) {
            Some(peer) if peer.addr == addr => {
                peer.last_seen = now;
                peer.pending = None;
            }
            Some(peer) => {
                peer.last_seen = now;
                match &peer.pending {
                    Some(pending) if pending.addr == addr => {
                        if now.duration_since(pending.first_seen) >= ENDPOINT_CHANGE_HYSTERESIS {
                            self.redial(handle, peers, name, addr);
                        }
                    }
                    _ => {
                        peer.pending = Some(PendingChange { addr, first_seen: now });
                    }
                }
            }
            None => {
                let peer = self.spawn_peer(handle, &name, addr);
                peers.insert(name, peer);
            }
        }
    }

    fn redial(&self, handle: &InterfaceHandle, peers: &mut HashMap<String, Peer>, name: String, addr: SocketAddr) {
        if let Some(old) = peers.remove(&name) {
            old.cancel.store(true, Ordering::SeqCst);
            let _ = old.thread.join();
        }
        let peer = self.spawn_peer(handle, &name, addr);
        peers.insert(name, peer);
    }

    fn spawn_peer(&self, handle: &InterfaceHandle, name: &str, addr: SocketAddr) -> Peer {
        let minor = u32::from(addr.port());
        let child_id = InterfaceId(handle.id.major_bits() | (minor & senmux_utils::MINOR_MASK));
        let mut child_handle = InterfaceHandle::new(child_id, format!("{}-{name}", handle.name), self.direction, Loopback(false));
        if self.direction.writes() {
            child_handle = child_handle.with_queue(Arc::new(senmux_core::BoundedQueue::new(self.queue_capacity)));
        }
        let child_handle = Arc::new(child_handle);
        if self.direction.writes() {
            self.io_lists.add_output(Arc::clone(&child_handle));
        }
        let cancel = Arc::clone(&child_handle.cancel);
        let engine_input = Arc::clone(&self.engine_input);
        let ifilter = self.ifilter.clone();
        let direction = self.direction;
        let io_lists = Arc::clone(&self.io_lists);

        let thread = std::thread::spawn(move || {
            let mut client = TcpClient {
                addr,
                persist: false,
                retry_interval: Duration::from_secs(1),
                preamble: Vec::new(),
                direction,
                framing: FramingSettings {
                    strict: true,
                    nocr: false,
                    checksum: ChecksumPolicy::Loose,
                },
                ifilter,
                engine_input,
            };
            let _ = client.run(&child_handle);
            io_lists.remove_output(child_id);
        });

        Peer {
            addr,
            last_seen: Instant::now(),
            cancel,
            thread,
            pending: None,
        }
    }

    fn reap_stale(&self, peers: &mut HashMap<String, Peer>) {
        let now = Instant::now();
        let stale: Vec<String> = peers
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_seen) > STALE_TIMEOUT)
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            if let Some(peer) = peers.remove(&name) {
                peer.cancel.store(true, Ordering::SeqCst);
                let _ = peer.thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_announcement() {
        let json = br#"{"IP":"192.168.1.50","Services":[
            {"Service":"other-service","Port":80},
            {"Service":"nmea-0183","Port":10110}
        ]}"#;
        let (name, addr) = parse_announcement(json).unwrap();
        assert_eq!(name, "192.168.1.50");
        assert_eq!(addr.ip().to_string(), "192.168.1.50");
        assert_eq!(addr.port(), 10110);
    }

    #[test]
    fn rejects_announcement_missing_nmea_service() {
        let json = br#"{"IP":"192.168.1.50","Services":[{"Service":"other-service","Port":80}]}"#;
        assert!(parse_announcement(json).is_none());
    }

    #[test]
    fn rejects_malformed_announcement() {
        assert!(parse_announcement(br#"{"IP":"192.168.1.50"}"#).is_none());
        assert!(parse_announcement(b"not json").is_none());
    }
}
