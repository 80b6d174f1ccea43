mod ais;
mod discovery;
mod error;
mod preamble;
mod tcp;
mod udp;

pub use ais::AisCoalescer;
pub use discovery::{DiscoveryListener, DISCOVERY_GROUP, DISCOVERY_PORT};
pub use error::NetworkError;
pub use preamble::decode as decode_preamble;
pub use tcp::{FramingSettings, ReconnectCoordinator, TcpClient, TcpServer};
pub use udp::{UdpKind, UdpTransport};
