use senmux_utils::InterfaceId;

use crate::checksum::{self, ChecksumPolicy};
use crate::filter::Filter;
use crate::senblk::{Senblk, SENBUFSZ, SENMAX, TAGMAX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NoData,
    SenProc,
    TagProc,
    TagSeen,
    Cr,
}

/// Byte-at-a-time NMEA-0183 sentence framer.
///
/// Turns a raw byte stream from a transport into complete, checksum-checked
/// [`Senblk`]s, applying an optional input filter along the way. One framer
/// is owned per interface; interfaces that read whole lines already (files,
/// some serial drivers) still route through it so checksum and filter
/// handling stay in one place.
pub struct FramingReader {
    strict: bool,
    nocr: bool,
    checksum: ChecksumPolicy,
    ifilter: Option<Filter>,
    state: State,
    buf: [u8; SENBUFSZ],
    count: usize,
    countmax: usize,
    tagbuf: [u8; TAGMAX],
    tagcount: usize,
}

impl FramingReader {
    #[must_use]
    pub fn new(strict: bool, nocr: bool, checksum: ChecksumPolicy, ifilter: Option<Filter>) -> Self {
        let loose = !strict;
        Self {
            strict,
            nocr,
            checksum,
            ifilter,
            state: State::NoData,
            buf: [0; SENBUFSZ],
            count: 0,
            countmax: SENMAX - usize::from(nocr || loose),
            tagbuf: [0; TAGMAX],
            tagcount: 0,
        }
    }

    /// Feeds a chunk of raw bytes through the framer, invoking `on_sentence`
    /// for each complete, checksum-valid, filter-accepted sentence.
    pub fn feed(&mut self, bytes: &[u8], src: InterfaceId, mut on_sentence: impl FnMut(Senblk)) {
        for &b in bytes {
            match b {
                b'$' | b'!' => {
                    self.buf[0] = b;
                    self.count = 1;
                    self.state = State::SenProc;
                }
                b'\\' => self.handle_backslash(),
                b'\r' | b'\n' | 0 => self.handle_terminator(b, src, &mut on_sentence),
                _ => self.handle_other(b),
            }
        }
    }

    fn handle_backslash(&mut self) {
        match self.state {
            State::TagProc => {
                if self.tagcount < TAGMAX {
                    self.tagbuf[self.tagcount] = b'\\';
                    self.tagcount += 1;
                }
                self.state = State::TagSeen;
            }
            _ => {
                self.tagbuf[0] = b'\\';
                self.tagcount = 1;
                self.state = State::TagProc;
            }
        }
    }

    fn handle_other(&mut self, b: u8) {
        match self.state {
            State::SenProc => {
                if self.count > self.countmax {
                    self.state = State::NoData;
                    return;
                }
                self.buf[self.count] = b;
                self.count += 1;
            }
            State::TagProc => {
                if self.tagcount > TAGMAX - 1 {
                    self.state = State::NoData;
                    return;
                }
                self.tagbuf[self.tagcount] = b;
                self.tagcount += 1;
            }
            State::TagSeen | State::Cr => self.state = State::NoData,
            State::NoData => {}
        }
    }

    fn handle_terminator(&mut self, b: u8, src: InterfaceId, on_sentence: &mut impl FnMut(Senblk)) {
        match self.state {
            State::SenProc | State::TagSeen => {
                if !self.strict || (self.nocr && b == b'\n') {
                    self.buf[self.count] = b'\r';
                    self.buf[self.count + 1] = b'\n';
                    let len = self.count + 2;
                    self.complete(len, src, on_sentence);
                } else if !self.nocr && b == b'\r' {
                    self.buf[self.count] = b;
                    self.count += 1;
                    self.state = State::Cr;
                } else {
                    self.state = State::NoData;
                }
            }
            State::Cr => {
                if b == b'\n' {
                    self.buf[self.count] = b;
                    self.count += 1;
                    let len = self.count;
                    self.complete(len, src, on_sentence);
                } else {
                    self.state = State::NoData;
                }
            }
            State::NoData | State::TagProc => self.state = State::NoData,
        }
    }

    fn complete(&mut self, len: usize, src: InterfaceId, on_sentence: &mut impl FnMut(Senblk)) {
        self.state = State::NoData;
        self.count = 0;
        let mut senblk = Senblk::empty();
        senblk.data[..len].copy_from_slice(&self.buf[..len]);
        senblk.len = len;
        senblk.src = src;

        if checksum::validate(&mut senblk, self.checksum).is_err() {
            return;
        }
        if let Some(filter) = &self.ifilter {
            if !filter.passes(&senblk) {
                return;
            }
        }
        on_sentence(senblk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_all(reader: &mut FramingReader, input: &[u8]) -> Vec<Senblk> {
        let mut out = Vec::new();
        reader.feed(input, InterfaceId(1), |s| out.push(s));
        out
    }

    #[test]
    fn frames_a_single_sentence() {
        let mut reader = FramingReader::new(true, false, ChecksumPolicy::Strict, None);
        let out = frame_all(&mut reader, b"$GPGGA,1*2F\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_bytes(), b"$GPGGA,1*2F\r\n");
    }

    #[test]
    fn frames_across_multiple_feeds() {
        let mut reader = FramingReader::new(true, false, ChecksumPolicy::Strict, None);
        let mut out = Vec::new();
        reader.feed(b"$GPGGA,1*2", InterfaceId(1), |s| out.push(s));
        reader.feed(b"F\r\n", InterfaceId(1), |s| out.push(s));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_bytes(), b"$GPGGA,1*2F\r\n");
    }

    #[test]
    fn loose_mode_accepts_bare_lf() {
        let mut reader = FramingReader::new(false, false, ChecksumPolicy::No, None);
        let out = frame_all(&mut reader, b"$GPGGA,1*2F\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_bytes(), b"$GPGGA,1*2F\r\n");
    }

    #[test]
    fn garbage_before_leader_is_ignored() {
        let mut reader = FramingReader::new(true, false, ChecksumPolicy::Strict, None);
        let out = frame_all(&mut reader, b"garbage$GPGGA,1*2F\r\n");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn strict_bad_checksum_drops_sentence() {
        let mut reader = FramingReader::new(true, false, ChecksumPolicy::Strict, None);
        let out = frame_all(&mut reader, b"$GPGGA,1*00\r\n");
        assert!(out.is_empty());
    }

    #[test]
    fn tag_block_is_consumed_without_affecting_sentence() {
        let mut reader = FramingReader::new(true, false, ChecksumPolicy::No, None);
        let out = frame_all(&mut reader, b"\\s:gps*1A\\$GPGGA,1*2F\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_bytes(), b"$GPGGA,1*2F\r\n");
    }

    #[test]
    fn overlong_sentence_is_dropped() {
        let mut reader = FramingReader::new(true, false, ChecksumPolicy::No, None);
        let mut input = vec![b'$'];
        input.extend(std::iter::repeat(b'A').take(200));
        input.extend_from_slice(b"\r\n");
        let out = frame_all(&mut reader, &input);
        assert!(out.is_empty());
    }
}
