use core::mem::{self, MaybeUninit};
use core::ptr;

use std::collections::VecDeque;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use pod::Value;
use tracing::Level;

use crate::Error;
use crate::buf::{RecvBuf, SendBuf};
use crate::error::ErrorKind;
use crate::poll::{ChangeInterest, Interest};
use crate::types::Header;

const MAX_SEND_SIZE: usize = 4096;
const MAX_FDS: usize = 16;

/// The listening end of the control channel.
#[derive(Debug)]
pub struct Listener {
    socket: UnixListener,
}

impl Listener {
    /// Bind the control socket at the given path.
    pub fn bind(path: &Path) -> Result<Self, Error> {
        let socket = UnixListener::bind(path).map_err(ErrorKind::BindFailed)?;

        socket
            .set_nonblocking(true)
            .map_err(ErrorKind::SetNonBlockingFailed)?;

        Ok(Self { socket })
    }

    /// Accept the next pending connection.
    ///
    /// Returns `None` if no connection is pending.
    pub fn accept(&self) -> Result<Option<Connection>, Error> {
        match self.socket.accept() {
            Ok((socket, ..)) => Ok(Some(Connection::new(socket))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::new(ErrorKind::AcceptFailed(e))),
        }
    }
}

impl AsRawFd for Listener {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// One end of a control channel.
#[derive(Debug)]
pub struct Connection {
    socket: UnixStream,
    message_sequence: u32,
    outgoing: SendBuf,
    outgoing_fds: VecDeque<OwnedFd>,
    interest: Interest,
    modified: ChangeInterest,
}

impl Connection {
    fn new(socket: UnixStream) -> Self {
        Self {
            socket,
            message_sequence: 0,
            outgoing: SendBuf::new(),
            outgoing_fds: VecDeque::new(),
            interest: Interest::READ | Interest::HUP | Interest::ERROR,
            modified: ChangeInterest::Unchanged,
        }
    }

    /// Open a connection to the control socket at the given path.
    #[tracing::instrument]
    pub fn open(path: &Path) -> Result<Self, Error> {
        let socket = UnixStream::connect(path).map_err(ErrorKind::ConnectFailed)?;
        Ok(Self::new(socket))
    }

    /// Construct a connected pair of endpoints.
    pub fn pair() -> Result<(Self, Self), Error> {
        let (a, b) = UnixStream::pair().map_err(ErrorKind::ConnectFailed)?;
        Ok((Self::new(a), Self::new(b)))
    }

    /// Set the connection to non-blocking mode.
    #[inline]
    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), Error> {
        self.socket
            .set_nonblocking(nonblocking)
            .map_err(ErrorKind::SetNonBlockingFailed)?;
        Ok(())
    }

    /// Get the current interest for the connection.
    #[inline]
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Return modified interest, if any.
    #[inline]
    pub fn modified(&mut self) -> ChangeInterest {
        self.modified.take()
    }

    /// Queue an outgoing message.
    ///
    /// Returns the sequence number assigned to the message, used to match
    /// asynchronous results.
    #[tracing::instrument(skip(self, value, fds), fields(remaining = self.outgoing.remaining()), ret(level = Level::TRACE))]
    pub fn request(
        &mut self,
        id: u32,
        op: u8,
        value: &Value,
        fds: Vec<OwnedFd>,
    ) -> Result<u32, Error> {
        if fds.len() > MAX_FDS {
            return Err(Error::new(ErrorKind::TooManyFds));
        }

        let payload = value.encode()?;

        let Ok(size) = u32::try_from(payload.len()) else {
            return Err(Error::new(ErrorKind::SizeOverflow));
        };

        let seq = self.message_sequence;
        self.message_sequence = self.message_sequence.wrapping_add(1);

        let Some(header) = Header::new(id, op, size, seq, fds.len() as u32) else {
            return Err(Error::new(ErrorKind::HeaderSizeOverflow { size }));
        };

        self.outgoing.push_bytes(&header.to_bytes());
        self.outgoing.push_bytes(&payload);
        self.outgoing_fds.extend(fds);
        self.modified |= self.interest.set(Interest::WRITE);
        Ok(seq)
    }

    /// Flush queued bytes to the socket.
    ///
    /// Pending file descriptors travel with the first batch of bytes.
    pub fn send(&mut self) -> Result<(), Error> {
        let mut budget = MAX_SEND_SIZE;

        loop {
            if self.outgoing.is_empty() {
                self.modified |= self.interest.unset(Interest::WRITE);
                return Ok(());
            }

            let bytes = self.outgoing.as_bytes();
            let bytes = bytes.get(..bytes.len().min(budget)).unwrap_or_default();

            let result = if self.outgoing_fds.is_empty() {
                self.socket.write(bytes)
            } else {
                // The ancillary buffer carries at most MAX_FDS descriptors
                // per message; any excess rides the next batch, which is
                // ordered no later than the bytes referencing it.
                let take = self.outgoing_fds.len().min(MAX_FDS);

                let fds: Vec<RawFd> = self
                    .outgoing_fds
                    .iter()
                    .take(take)
                    .map(|fd| fd.as_raw_fd())
                    .collect();

                let result = send_with_fds(&self.socket, bytes, &fds);

                if result.is_ok() {
                    self.outgoing_fds.drain(..take);
                }

                result
            };

            match result {
                Ok(0) => {
                    return Err(Error::new(ErrorKind::RemoteClosed));
                }
                Ok(n) => {
                    debug_assert!(n <= bytes.len());
                    self.outgoing.advance(n);
                    budget -= n;

                    if budget == 0 {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(());
                }
                Err(e) => {
                    return Err(Error::new(ErrorKind::SendFailed(e)));
                }
            }
        }
    }

    /// Receive bytes and file descriptors from the socket.
    ///
    /// Returns the number of bytes received; zero means the operation would
    /// block.
    pub fn recv(&mut self, recv: &mut RecvBuf, fds: &mut Vec<OwnedFd>) -> Result<usize, Error> {
        let mut scratch = [0u8; MAX_SEND_SIZE];
        let mut raw_fds = [-1 as RawFd; MAX_FDS];

        let (n, n_fds) = match recv_with_fds(&self.socket, &mut scratch, &mut raw_fds) {
            Ok(result) => result,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(e) => return Err(Error::new(ErrorKind::ReceiveFailed(e))),
        };

        for &fd in raw_fds.iter().take(n_fds) {
            // SAFETY: The descriptor was just transferred to us by the
            // kernel and is owned by nobody else.
            fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
        }

        if n == 0 && n_fds == 0 {
            return Err(Error::new(ErrorKind::RemoteClosed));
        }

        recv.extend(&scratch[..n]);
        tracing::trace!(bytes = n, fds = n_fds, remaining = recv.remaining(), "received");
        Ok(n)
    }
}

impl AsRawFd for Connection {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

fn send_with_fds(socket: &UnixStream, bytes: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    const {
        assert!(mem::align_of::<MaybeUninit<[u64; 16]>>() >= mem::align_of::<libc::cmsghdr>());
    }

    // SAFETY: We're assembling the msghdr exactly as the c-api expects.
    unsafe {
        let fd_len = mem::size_of::<RawFd>() * fds.len();
        let space = libc::CMSG_SPACE(fd_len as u32) as usize;

        let mut cmsg_buf = MaybeUninit::<[u64; 16]>::zeroed();
        assert!(mem::size_of_val(&cmsg_buf) >= space);

        let mut iov = libc::iovec {
            iov_base: bytes.as_ptr() as *mut _,
            iov_len: bytes.len(),
        };

        let mut msghdr = mem::zeroed::<libc::msghdr>();
        msghdr.msg_iov = &mut iov;
        msghdr.msg_iovlen = 1;
        msghdr.msg_control = cmsg_buf.as_mut_ptr().cast();
        msghdr.msg_controllen = space;

        let cmsg = libc::CMSG_FIRSTHDR(&msghdr);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(fd_len as u32) as _;

        ptr::copy_nonoverlapping(
            fds.as_ptr().cast::<u8>(),
            libc::CMSG_DATA(cmsg),
            fd_len,
        );

        let n = libc::sendmsg(socket.as_raw_fd(), &msghdr, 0);

        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(n as usize)
    }
}

fn recv_with_fds(
    socket: &UnixStream,
    bytes: &mut [u8],
    fds: &mut [RawFd],
) -> io::Result<(usize, usize)> {
    // SAFETY: We're assembling the msghdr exactly as the c-api expects.
    unsafe {
        let fd_len = mem::size_of::<RawFd>() * fds.len();
        let space = libc::CMSG_SPACE(fd_len as u32) as usize;

        let mut cmsg_buf = MaybeUninit::<[u64; 16]>::zeroed();
        assert!(mem::size_of_val(&cmsg_buf) >= space);

        let mut iov = libc::iovec {
            iov_base: bytes.as_mut_ptr().cast(),
            iov_len: bytes.len(),
        };

        let mut msghdr = mem::zeroed::<libc::msghdr>();
        msghdr.msg_iov = &mut iov;
        msghdr.msg_iovlen = 1;
        msghdr.msg_control = cmsg_buf.as_mut_ptr().cast();
        msghdr.msg_controllen = space;

        let n = libc::recvmsg(socket.as_raw_fd(), &mut msghdr, 0);

        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        // Walk the ancillary data and copy the transferred descriptors out.
        let mut n_fds = 0usize;
        let mut cur = libc::CMSG_FIRSTHDR(&msghdr);

        while let Some(c) = cur.as_ref() {
            if c.cmsg_level == libc::SOL_SOCKET && c.cmsg_type == libc::SCM_RIGHTS {
                let data_ptr = libc::CMSG_DATA(c);
                let data_offset = data_ptr.offset_from((c as *const libc::cmsghdr).cast());

                debug_assert!(data_offset >= 0);

                let data_byte_count = c.cmsg_len as usize - data_offset as usize;

                debug_assert!(data_byte_count % mem::size_of::<RawFd>() == 0);

                let count = data_byte_count / mem::size_of::<RawFd>();
                let fd_ptr = data_ptr.cast::<RawFd>();

                for i in 0..count {
                    if n_fds < fds.len() {
                        fds[n_fds] = ptr::read_unaligned(fd_ptr.add(i));
                        n_fds += 1;
                    }
                }
            }

            cur = libc::CMSG_NXTHDR(&msghdr, cur);
        }

        Ok((n as usize, n_fds))
    }
}
