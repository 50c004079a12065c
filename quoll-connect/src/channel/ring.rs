/// A fixed-capacity circular byte buffer bridging wire traffic to a
/// local stream with bounded memory.
///
/// Capacity equals the window granted to the peer, so a compliant peer
/// can never overrun it.
pub(crate) struct Ring {
    data: Vec<u8>,
    head: usize,
    len: usize,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.data.len() - self.len
    }

    /// Append `bytes` in full, or not at all.
    pub fn push_all(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free() {
            return false;
        }

        let tail = (self.head + self.len) % self.data.len();
        let straight = bytes.len().min(self.data.len() - tail);

        self.data[tail..tail + straight].copy_from_slice(&bytes[..straight]);
        self.data[..bytes.len() - straight].copy_from_slice(&bytes[straight..]);
        self.len += bytes.len();

        true
    }

    /// The contiguous run of bytes at the front; shorter than [`len`]
    /// when the content wraps around.
    ///
    /// [`len`]: Self::len
    pub fn peek(&self) -> &[u8] {
        let straight = self.len.min(self.data.len() - self.head);

        &self.data[self.head..self.head + straight]
    }

    /// Drop `count` consumed bytes from the front.
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.len);

        self.head = (self.head + count) % self.data.len();
        self.len -= count;
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ring({}/{} bytes)", self.len, self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_peek_consume() {
        let mut ring = Ring::new(8);

        assert!(ring.push_all(b"abcde"));
        assert_eq!(ring.peek(), b"abcde");

        ring.consume(3);
        assert_eq!(ring.peek(), b"de");
        assert_eq!(ring.free(), 6);
    }

    #[test]
    fn wraps_around() {
        let mut ring = Ring::new(8);

        assert!(ring.push_all(b"abcdef"));
        ring.consume(5);

        // Crosses the physical end of the storage.
        assert!(ring.push_all(b"ghijk"));
        assert_eq!(ring.len(), 6);

        let mut drained = Vec::new();
        while !ring.is_empty() {
            let chunk = ring.peek().to_vec();
            ring.consume(chunk.len());
            drained.extend(chunk);
        }
        assert_eq!(drained, b"fghijk");
    }

    #[test]
    fn rejects_overflow_whole() {
        let mut ring = Ring::new(4);

        assert!(ring.push_all(b"abc"));
        assert!(!ring.push_all(b"de"));
        // A refused push leaves the content untouched.
        assert_eq!(ring.peek(), b"abc");
    }
}
