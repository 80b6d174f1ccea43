mod client;
mod reconnect;
mod server;

pub use client::{FramingSettings, TcpClient};
pub use reconnect::ReconnectCoordinator;
pub use server::TcpServer;
