//! Byte queues backing the control channel.

/// Outgoing bytes waiting to be written to the socket.
#[derive(Debug, Default)]
pub struct SendBuf {
    data: Vec<u8>,
    read: usize,
}

impl SendBuf {
    /// Construct a new empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Test if all queued bytes have been sent.
    pub fn is_empty(&self) -> bool {
        self.read == self.data.len()
    }

    /// The number of unsent bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read
    }

    /// Queue bytes for sending.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Access the unsent bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.read..]
    }

    /// Mark `n` bytes as sent.
    pub fn advance(&mut self, n: usize) {
        self.read += n;
        debug_assert!(self.read <= self.data.len());

        if self.read == self.data.len() {
            self.data.clear();
            self.read = 0;
        }
    }
}

/// Incoming bytes waiting to be framed.
#[derive(Debug, Default)]
pub struct RecvBuf {
    data: Vec<u8>,
    read: usize,
}

impl RecvBuf {
    /// Construct a new empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of unconsumed bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read
    }

    /// Append received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Peek at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.data.get(self.read..self.read + n)
    }

    /// Consume `n` bytes.
    ///
    /// Consumed space is reclaimed once the buffer drains.
    pub fn advance(&mut self, n: usize) {
        self.read += n;
        debug_assert!(self.read <= self.data.len());

        if self.read == self.data.len() {
            self.data.clear();
            self.read = 0;
        } else if self.read > 4096 {
            self.data.drain(..self.read);
            self.read = 0;
        }
    }

    /// Read and consume `n` bytes if they are available.
    pub fn read_bytes(&mut self, n: usize) -> Option<Vec<u8>> {
        let bytes = self.peek(n)?.to_vec();
        self.advance(n);
        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::{RecvBuf, SendBuf};

    #[test]
    fn send_buf_drains() {
        let mut buf = SendBuf::new();
        buf.push_bytes(b"abcdef");
        assert_eq!(buf.remaining(), 6);

        buf.advance(4);
        assert_eq!(buf.as_bytes(), b"ef");

        buf.advance(2);
        assert!(buf.is_empty());
    }

    #[test]
    fn recv_buf_frames() {
        let mut buf = RecvBuf::new();
        buf.extend(b"abc");
        assert!(buf.peek(4).is_none());

        buf.extend(b"def");
        assert_eq!(buf.read_bytes(4).as_deref(), Some(&b"abcd"[..]));
        assert_eq!(buf.remaining(), 2);
    }
}
