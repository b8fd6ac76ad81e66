use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Event file descriptor.
///
/// Wake-fd protocol: the writer posts an 8-byte `u64 = 1`, the reader
/// consumes with an 8-byte read. Counter semantics beyond "non-zero means
/// ready" are unused.
#[derive(Debug)]
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    /// Construct a new event fd.
    pub fn new(init: u32) -> io::Result<Self> {
        // SAFETY: We're just using c-apis as intended.
        unsafe {
            let fd = libc::eventfd(init, 0);

            if fd == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(Self {
                fd: OwnedFd::from_raw_fd(fd),
            })
        }
    }

    /// Construct a new non-blocking event fd.
    pub fn new_nonblocking(init: u32) -> io::Result<Self> {
        // SAFETY: We're just using c-apis as intended.
        unsafe {
            let fd = libc::eventfd(init, libc::EFD_NONBLOCK);

            if fd == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(Self {
                fd: OwnedFd::from_raw_fd(fd),
            })
        }
    }

    /// Duplicate the descriptor, referring to the same kernel counter.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            fd: self.fd.try_clone()?,
        })
    }

    /// Duplicate the descriptor as a bare fd, for sending to a peer.
    pub fn dup(&self) -> io::Result<OwnedFd> {
        self.fd.try_clone()
    }

    /// Write a value to the event.
    pub fn write(&self, n: u64) -> io::Result<bool> {
        // SAFETY: We're just using c-apis as intended.
        unsafe {
            let n = libc::write(self.fd.as_raw_fd(), &n as *const _ as *const _, 8);

            if n == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(n == 8)
        }
    }

    /// Receive a single event.
    ///
    /// Returns `None` if the descriptor is non-blocking and no event is
    /// pending. A blocking descriptor waits for one.
    pub fn read(&self) -> io::Result<Option<u64>> {
        unsafe {
            let mut value = mem::MaybeUninit::<u64>::uninit();
            let n = libc::read(self.fd.as_raw_fd(), value.as_mut_ptr() as *mut _, 8);

            if n == -1 {
                match io::Error::last_os_error() {
                    e if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                    e => return Err(e),
                }
            }

            if n != 8 {
                return Err(io::Error::other("expected 8 bytes"));
            }

            Ok(Some(value.assume_init()))
        }
    }
}

impl AsRawFd for EventFd {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Coerce an `OwnedFd` into an `EventFd`.
impl From<OwnedFd> for EventFd {
    #[inline]
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}
