mod assert;
mod ids;

pub use ids::{InterfaceId, MAX_INTERFACES, MINOR_BITS, MINOR_MASK};
