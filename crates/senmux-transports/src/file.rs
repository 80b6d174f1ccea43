use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use senmux_core::{ChecksumPolicy, CoreError, Direction, Filter, FramingReader, Interface, InterfaceHandle};

const READ_BUF_SIZE: usize = 1024;

/// A plain file or named-pipe (FIFO) transport.
///
/// FIFOs are special: a reader sees EOF whenever the last writer closes,
/// even though the pipe itself is still there waiting for a new writer.
/// With `persist` set, EOF (on read) and a broken-pipe error (on write)
/// reopen the path instead of ending the interface — matching how the
/// original keeps a FIFO-backed interface alive across writer churn.
pub struct FileTransport {
    pub path: PathBuf,
    pub direction: Direction,
    pub persist: bool,
    pub nocr: bool,
    pub strict: bool,
    pub checksum: ChecksumPolicy,
    pub ifilter: Option<Filter>,
    pub engine_input: Arc<senmux_core::BoundedQueue>,
}

impl FileTransport {
    fn open_read(&self) -> std::io::Result<File> {
        File::open(&self.path)
    }

    fn open_write(&self) -> std::io::Result<File> {
        OpenOptions::new().write(true).open(&self.path)
    }
}

impl Interface for FileTransport {
    fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
        let writer_thread = if self.direction.writes() {
            let queue = handle.queue.clone();
            let path = self.path.clone();
            let persist = self.persist;
            let nocr = self.nocr;
            let cancel = Arc::clone(&handle.cancel);
            queue.map(|q| {
                std::thread::spawn(move || write_loop(&path, &q, persist, nocr, &cancel))
            })
        } else {
            None
        };

        if self.direction.reads() {
            self.read_loop(handle)?;
        }

        handle.cancel.store(true, Ordering::SeqCst);
        if let Some(q) = &handle.queue {
            q.shutdown();
        }
        if let Some(t) = writer_thread {
            let _ = t.join();
        }
        Ok(())
    }
}

impl FileTransport {
    fn read_loop(&self, handle: &InterfaceHandle) -> Result<(), CoreError> {
        let mut framer = FramingReader::new(self.strict, self.nocr, self.checksum, self.ifilter.clone());
        let mut buf = [0u8; READ_BUF_SIZE];
        let mut file = self
            .open_read()
            .map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;

        loop {
            if handle.is_cancelled() {
                return Ok(());
            }
            match file.read(&mut buf) {
                Ok(0) => {
                    if !self.persist {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                    file = match self.open_read() {
                        Ok(f) => f,
                        Err(_) => continue,
                    };
                }
                Ok(n) => framer.feed(&buf[..n], handle.id, |senblk| self.engine_input.push(senblk)),
                Err(_) if self.persist => {
                    std::thread::sleep(Duration::from_millis(100));
                    file = match self.open_read() {
                        Ok(f) => f,
                        Err(_) => continue,
                    };
                }
                Err(_) => return Ok(()),
            }
        }
    }
}

fn write_loop(
    path: &std::path::Path,
    queue: &senmux_core::BoundedQueue,
    persist: bool,
    nocr: bool,
    cancel: &std::sync::atomic::AtomicBool,
) {
    let mut file = match OpenOptions::new().write(true).open(path) {
        Ok(f) => f,
        Err(_) => return,
    };

    while let Some(senblk) = queue.next() {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        let body = senblk.as_bytes();
        let out: &[u8] = if nocr && body.ends_with(b"\r\n") {
            &body[..body.len() - 2]
        } else {
            body
        };
        match file.write_all(out) {
            Ok(()) => {}
            Err(err) if persist && err.raw_os_error() == Some(libc::EPIPE) => {
                std::thread::sleep(Duration::from_millis(100));
                file = match OpenOptions::new().write(true).open(path) {
                    Ok(f) => f,
                    Err(_) => continue,
                };
            }
            Err(_) if !persist => return,
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use senmux_utils::InterfaceId;

    #[test]
    fn reads_and_frames_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.nmea");
        std::fs::write(&path, b"$GPGGA,1*2F\r\n").unwrap();

        let engine_input = Arc::new(senmux_core::BoundedQueue::new(8));
        let mut transport = FileTransport {
            path,
            direction: Direction::In,
            persist: false,
            nocr: false,
            strict: true,
            checksum: ChecksumPolicy::No,
            ifilter: None,
            engine_input: Arc::clone(&engine_input),
        };
        let handle = InterfaceHandle::new(InterfaceId::major(1), "filetest", Direction::In, senmux_core::Loopback(false));
        transport.run(&handle).unwrap();

        let got = engine_input.next().unwrap();
        assert_eq!(got.as_bytes(), b"$GPGGA,1*2F\r\n");
    }

    #[test]
    fn nocr_strips_trailing_crlf_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.nmea");
        std::fs::write(&path, b"").unwrap();

        let queue = Arc::new(senmux_core::BoundedQueue::new(8));
        queue.push(senmux_core::Senblk::from_bytes(b"$GPGGA,1*2F\r\n", InterfaceId(1)));
        queue.shutdown();

        write_loop(&path, &queue, false, true, &std::sync::atomic::AtomicBool::new(false));

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"$GPGGA,1*2F");
    }
}
