use std::ffi::CStr;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use senmux_core::{ChecksumPolicy, CoreError, Direction, Filter, FramingReader, Interface, InterfaceHandle};

const READ_BUF_SIZE: usize = 1024;

/// Allocates a PTY master and returns it along with the path of its slave
/// device, so some other program can open the slave side as if it were a
/// real serial port.
fn open_pty_master() -> std::io::Result<(File, PathBuf)> {
    // SAFETY: `posix_openpt` takes only flags; the returned fd is checked
    // before further use.
    let fd: RawFd = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `fd` is a just-opened, valid PTY master descriptor.
    unsafe {
        if libc::grantpt(fd) != 0 || libc::unlockpt(fd) != 0 {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
    }
    let mut buf = [0i8; 256];
    // SAFETY: `buf` is large enough for any `/dev/pts/N` path; `ptsname_r`
    // nul-terminates on success.
    let rc = unsafe { libc::ptsname_r(fd, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // SAFETY: `fd` was opened above and hasn't been closed yet.
        unsafe { libc::close(fd) };
        return Err(err);
    }
    // SAFETY: `ptsname_r` nul-terminated `buf` on success above.
    let slave_path = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned();
    // SAFETY: `fd` is a valid, open file descriptor we're handing ownership
    // of to `File`.
    let file = unsafe { File::from_raw_fd(fd) };
    Ok((file, PathBuf::from(slave_path)))
}

/// A pseudo-terminal master, exposed to the rest of the system at a stable
/// path via an optional symlink (since `/dev/pts/N` slave names are
/// allocated dynamically and not predictable ahead of time).
pub struct PtyTransport {
    pub symlink: Option<PathBuf>,
    pub direction: Direction,
    pub strict: bool,
    pub nocr: bool,
    pub checksum: ChecksumPolicy,
    pub ifilter: Option<Filter>,
    pub engine_input: Arc<senmux_core::BoundedQueue>,
}

impl Interface for PtyTransport {
    fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
        let (file, slave_path) = open_pty_master().map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
        tracing::info!(interface = %handle.name, slave = %slave_path.display(), "pty slave allocated");

        if let Some(link) = &self.symlink {
            let _ = std::fs::remove_file(link);
            if let Err(err) = symlink(&slave_path, link) {
                tracing::warn!(interface = %handle.name, error = %err, "could not create pty symlink");
            }
        }

        let writer_thread = if self.direction.writes() {
            let mut write_file = file.try_clone().map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;
            let queue = handle.queue.clone();
            let cancel = Arc::clone(&handle.cancel);
            queue.map(|q| {
                std::thread::spawn(move || {
                    while let Some(senblk) = q.next() {
                        if cancel.load(Ordering::SeqCst) {
                            return;
                        }
                        let _ = write_file.write_all(senblk.as_bytes());
                    }
                })
            })
        } else {
            None
        };

        if self.direction.reads() {
            let mut read_file = file;
            let mut framer = FramingReader::new(self.strict, self.nocr, self.checksum, self.ifilter.clone());
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                if handle.is_cancelled() {
                    break;
                }
                match read_file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => framer.feed(&buf[..n], handle.id, |senblk| self.engine_input.push(senblk)),
                    Err(_) => break,
                }
            }
        }

        handle.cancel.store(true, Ordering::SeqCst);
        if let Some(q) = &handle.queue {
            q.shutdown();
        }
        if let Some(t) = writer_thread {
            let _ = t.join();
        }
        if let Some(link) = &self.symlink {
            let _ = std::fs::remove_file(link);
        }
        Ok(())
    }
}

fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_a_master_with_a_slave_path() {
        let (_, path) = open_pty_master().unwrap();
        assert!(path.to_string_lossy().starts_with("/dev/pts/"));
    }
}
