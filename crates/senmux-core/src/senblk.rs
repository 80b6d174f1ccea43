use senmux_utils::InterfaceId;

/// Longest sentence body this multiplexer will frame, not counting the
/// trailing `\r\n`. Matches the original `SENMAX`.
pub const SENMAX: usize = 80;

/// Storage for one framed sentence: body plus checksum plus line ending.
/// Matches the original `SENBUFSZ`.
pub const SENBUFSZ: usize = SENMAX + 4;

/// Longest accumulated NMEA tag block, opening and closing backslashes
/// included.
pub const TAGMAX: usize = 80;

/// A single framed sentence together with the interface it arrived on.
///
/// `data`/`len` stand in for the original's heap-pooled, intrusively linked
/// buffer: here a sentence is just a fixed-size, `Copy` value, so queues can
/// hand them out by value instead of juggling a free list.
#[derive(Clone, Copy)]
pub struct Senblk {
    pub data: [u8; SENBUFSZ],
    pub len: usize,
    pub src: InterfaceId,
}

impl Senblk {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            data: [0; SENBUFSZ],
            len: 0,
            src: InterfaceId(0),
        }
    }

    /// Builds a senblk from a body that already includes its line ending.
    /// Truncates silently if `body` would overflow `SENBUFSZ`; callers feeding
    /// pre-framed control sentences (the heartbeat, `$PKPXR` replies) know
    /// their bodies fit.
    #[must_use]
    pub fn from_bytes(body: &[u8], src: InterfaceId) -> Self {
        let mut senblk = Self::empty();
        let len = body.len().min(SENBUFSZ);
        senblk.data[..len].copy_from_slice(&body[..len]);
        senblk.len = len;
        senblk.src = src;
        senblk
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }

    #[must_use]
    pub fn is_proprietary(&self) -> bool {
        self.as_bytes().starts_with(b"$PKPX")
    }
}

impl std::fmt::Debug for Senblk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Senblk")
            .field("src", &self.src)
            .field("body", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}
