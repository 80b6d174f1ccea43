use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use senmux_core::{calcsum, CoreError, Interface, InterfaceHandle, Senblk};

use crate::serial::open_serial;

/// SeaTalk frames datagrams as `command, attribute, data...`, where the low
/// nibble of the attribute byte gives the count of data bytes that follow
/// (beyond the two already read). Only datagram framing is implemented here
/// — decoding specific SeaTalk commands into their NMEA-0183 equivalents is
/// a large, device-specific table left to a higher layer; this transport's
/// job is purely to hand complete, correctly-bounded datagrams upstream.
struct SeatalkFramer {
    buf: Vec<u8>,
}

impl SeatalkFramer {
    fn new() -> Self {
        Self { buf: Vec::with_capacity(18) }
    }

    fn feed(&mut self, bytes: &[u8], mut on_datagram: impl FnMut(&[u8])) {
        for &b in bytes {
            self.buf.push(b);
            if self.buf.len() == 2 {
                // Nothing to do yet; need the attribute byte to know length.
            }
            if self.buf.len() >= 2 {
                let declared_len = 3 + (self.buf[1] & 0x0F) as usize;
                if self.buf.len() >= declared_len {
                    on_datagram(&self.buf[..declared_len]);
                    self.buf.clear();
                }
            }
        }
    }
}

/// Wraps a raw SeaTalk datagram as a proprietary pseudo-sentence (hex
/// payload) so it can travel through the same senblk queues as every other
/// sentence without the multiplexer needing to understand SeaTalk itself.
fn wrap_datagram(datagram: &[u8], src: senmux_utils::InterfaceId) -> Senblk {
    let mut hex = String::with_capacity(datagram.len() * 2);
    for b in datagram {
        hex.push_str(&format!("{b:02X}"));
    }
    let body = format!("$PSEAT,{hex}");
    let sum = calcsum(body.as_bytes().split_at(1).1);
    let full = format!("{body}*{sum:02X}\r\n");
    Senblk::from_bytes(full.as_bytes(), src)
}

pub struct SeatalkTransport {
    pub path: PathBuf,
    pub engine_input: Arc<senmux_core::BoundedQueue>,
}

impl Interface for SeatalkTransport {
    fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
        let mut file = open_serial(&self.path, 4_800).map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
        let mut framer = SeatalkFramer::new();
        let mut buf = [0u8; 256];
        loop {
            if handle.is_cancelled() {
                return Ok(());
            }
            match file.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    let id = handle.id;
                    let queue = &self.engine_input;
                    framer.feed(&buf[..n], |datagram| queue.push(wrap_datagram(datagram, id)));
                }
                Err(_) => return Ok(()),
            }
        }
    }
}
