use core::error;
use core::fmt;

use std::io;

/// An error raised by the protocol layer.
#[non_exhaustive]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<pod::Error> for Error {
    #[inline]
    fn from(e: pod::Error) -> Self {
        Error::new(ErrorKind::PodError(e))
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    PodError(pod::Error),
    BindFailed(io::Error),
    AcceptFailed(io::Error),
    ConnectFailed(io::Error),
    SetNonBlockingFailed(io::Error),
    SendFailed(io::Error),
    ReceiveFailed(io::Error),
    RemoteClosed,
    SizeOverflow,
    HeaderSizeOverflow { size: u32 },
    TooManyFds,
}

impl error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::PodError(e) => Some(e),
            ErrorKind::BindFailed(e) => Some(e),
            ErrorKind::AcceptFailed(e) => Some(e),
            ErrorKind::ConnectFailed(e) => Some(e),
            ErrorKind::SetNonBlockingFailed(e) => Some(e),
            ErrorKind::SendFailed(e) => Some(e),
            ErrorKind::ReceiveFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::PodError(..) => write!(f, "Value encoding error"),
            ErrorKind::BindFailed(..) => write!(f, "Failed to bind control socket"),
            ErrorKind::AcceptFailed(..) => write!(f, "Failed to accept connection"),
            ErrorKind::ConnectFailed(..) => write!(f, "Failed to connect to control socket"),
            ErrorKind::SetNonBlockingFailed(..) => write!(f, "Failed to set non-blocking"),
            ErrorKind::SendFailed(..) => write!(f, "Send error"),
            ErrorKind::ReceiveFailed(..) => write!(f, "Receive error"),
            ErrorKind::RemoteClosed => write!(f, "Remote closed the connection"),
            ErrorKind::SizeOverflow => write!(f, "Size overflow"),
            ErrorKind::HeaderSizeOverflow { size } => {
                write!(f, "Message size {size} does not fit the header")
            }
            ErrorKind::TooManyFds => write!(f, "Too many file descriptors in one message"),
        }
    }
}
