use core::error;
use core::fmt;

use crate::Type;

/// An error raised while encoding or decoding values.
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

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    BufferUnderflow,
    SizeOverflow,
    UnsupportedType(u32),
    Expected { expected: Type, actual: Type },
    BadStringData,
    UnsizedChild(Type),
    MixedArray,
    BadChildSize { expected: usize, actual: usize },
}

impl error::Error for Error {}

impl fmt::Debug for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::BufferUnderflow => write!(f, "Buffer underflow"),
            ErrorKind::SizeOverflow => write!(f, "Size overflow"),
            ErrorKind::UnsupportedType(ty) => write!(f, "Unsupported value type {ty}"),
            ErrorKind::Expected { expected, actual } => {
                write!(f, "Expected type {expected:?} but found {actual:?}")
            }
            ErrorKind::BadStringData => write!(f, "String data is not valid utf-8"),
            ErrorKind::UnsizedChild(ty) => {
                write!(f, "Type {ty:?} has no fixed size and cannot be a child")
            }
            ErrorKind::MixedArray => write!(f, "Array children must share one type"),
            ErrorKind::BadChildSize { expected, actual } => {
                write!(f, "Child size {actual} does not match declared size {expected}")
            }
        }
    }
}
