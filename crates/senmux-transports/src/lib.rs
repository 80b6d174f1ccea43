mod file;
mod pty;
mod seatalk;
mod serial;

pub use file::FileTransport;
pub use pty::PtyTransport;
pub use seatalk::SeatalkTransport;
pub use serial::SerialTransport;
