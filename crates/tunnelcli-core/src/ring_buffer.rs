//! Fixed-capacity circular byte buffer.
//!
//! Keeps the last `capacity` bytes written to it, overwriting the oldest
//! bytes once full.

/// Circular buffer holding the most recent bytes written to it.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Box<[u8]>,
    /// Index where the next byte goes.
    pos: usize,
    /// Whether `pos` has wrapped at least once.
    filled: bool,
}

impl RingBuffer {
    /// Creates an empty buffer retaining at most `capacity` bytes.
    ///
    /// A zero capacity is bumped to one byte.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)].into_boxed_slice(),
            pos: 0,
            filled: false,
        }
    }

    /// Returns the maximum number of bytes retained.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Returns the number of bytes currently retained.
    pub fn len(&self) -> usize {
        if self.filled {
            self.data.len()
        } else {
            self.pos
        }
    }

    /// Returns true if nothing has been recorded since creation or the last clear.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a single byte.
    pub fn push(&mut self, byte: u8) {
        self.data[self.pos] = byte;
        self.pos += 1;
        if self.pos == self.data.len() {
            self.pos = 0;
            self.filled = true;
        }
    }

    /// Appends a slice, keeping only the trailing `capacity` bytes of it when it is larger.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let cap = self.data.len();
        let bytes = if bytes.len() > cap {
            &bytes[bytes.len() - cap..]
        } else {
            bytes
        };

        let mut rest = bytes;
        while !rest.is_empty() {
            let chunk = rest.len().min(cap - self.pos);
            self.data[self.pos..self.pos + chunk].copy_from_slice(&rest[..chunk]);
            self.pos += chunk;
            if self.pos == cap {
                self.pos = 0;
                self.filled = true;
            }
            rest = &rest[chunk..];
        }
    }

    /// Forgets all recorded bytes.
    pub fn clear(&mut self) {
        self.pos = 0;
        self.filled = false;
    }

    /// Returns the retained bytes in the order they were written.
    pub fn to_vec(&self) -> Vec<u8> {
        if self.filled {
            let mut out = Vec::with_capacity(self.data.len());
            out.extend_from_slice(&self.data[self.pos..]);
            out.extend_from_slice(&self.data[..self.pos]);
            out
        } else {
            self.data[..self.pos].to_vec()
        }
    }
}
