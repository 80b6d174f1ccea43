use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use senmux_core::{ChecksumPolicy, CoreError, Direction, Filter, FramingReader, Interface, InterfaceHandle};

const READ_BUF_SIZE: usize = 1024;

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    Some(match baud {
        4_800 => libc::B4800,
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        _ => return None,
    })
}

/// Opens `path` as a raw (non-canonical, no-echo) serial line at `baud`,
/// matching the 8N1-no-flow-control framing every NMEA-0183 device expects.
pub(crate) fn open_serial(path: &std::path::Path, baud: u32) -> std::io::Result<File> {
    let cpath = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // SAFETY: `cpath` is a valid, nul-terminated C string for the duration
    // of this call; `open` is the standard libc syscall wrapper.
    let fd: RawFd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_NOCTTY) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let speed = baud_constant(baud).ok_or_else(|| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // SAFETY: `termios` is zero-initialized then fully populated by
    // `tcgetattr` before use; `fd` was just opened successfully above.
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            libc::close(fd);
            return Err(std::io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut termios);
        libc::cfsetispeed(&mut termios, speed);
        libc::cfsetospeed(&mut termios, speed);
        termios.c_cflag |= libc::CLOCAL | libc::CREAD;
        termios.c_cflag &= !libc::CRTSCTS;
        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            libc::close(fd);
            return Err(std::io::Error::last_os_error());
        }
        Ok(File::from_raw_fd(fd))
    }
}

pub struct SerialTransport {
    pub path: PathBuf,
    pub baud: u32,
    pub direction: Direction,
    pub strict: bool,
    pub nocr: bool,
    pub checksum: ChecksumPolicy,
    pub ifilter: Option<Filter>,
    pub engine_input: Arc<senmux_core::BoundedQueue>,
}

impl Interface for SerialTransport {
    fn run(&mut self, handle: &InterfaceHandle) -> Result<(), CoreError> {
        let file = open_serial(&self.path, self.baud).map_err(|e| CoreError::InitFailed(handle.id, e.to_string()))?;

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
        Ok(())
    }
}
