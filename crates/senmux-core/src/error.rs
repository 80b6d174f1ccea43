use senmux_utils::InterfaceId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),

    #[error("interface {0} has no queue to read from")]
    NoQueue(InterfaceId),

    #[error("interface {0} failed to initialize: {1}")]
    InitFailed(InterfaceId, String),

    #[error("shutdown grace period elapsed with {0} interface(s) still running")]
    ShutdownTimedOut(usize),
}
