#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection to {0} could not be established")]
    ConnectFailed(std::net::SocketAddr),

    #[error("invalid discovery announcement: {0}")]
    BadAnnouncement(String),

    #[error("interface was cancelled")]
    Cancelled,
}
