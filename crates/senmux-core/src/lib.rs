mod checksum;
mod engine;
mod error;
mod events;
mod filter;
mod framing;
mod interface;
mod queue;
mod registry;
mod senblk;
mod supervisor;

pub use checksum::{validate as validate_checksum, calcsum, ChecksumError, ChecksumPolicy};
pub use engine::{run_engine, VERSION};
pub use error::CoreError;
pub use events::{EventManager, HEARTBEAT_SENTENCE};
pub use filter::{tag_from_str, FailoverRuleSpec, FailoverSourceSpec, Filter, FilterRuleSpec, RuleAction, Tag, TAG_LEN};
pub use framing::FramingReader;
pub use interface::{Direction, Interface, InterfaceHandle, InterfaceState, IoLists, Loopback};
pub use queue::{BoundedQueue, DEFAULT_QUEUE_SIZE};
pub use registry::{Registry, RegistryError};
pub use senblk::{Senblk, SENBUFSZ, SENMAX, TAGMAX};
pub use supervisor::Supervisor;
