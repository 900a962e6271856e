//! Bounded write buffer reused across pushes.

use bytes::{Bytes, BytesMut};

/// Fixed-capacity staging buffer owned by one serializer.
///
/// Each [`take`](Self::take) hands out the filled bytes without copying;
/// once the receiver drops them, the next fill reuses the allocation.
#[derive(Debug)]
pub struct ScratchBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl ScratchBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Copy as much of `src` as still fits. Returns the bytes copied.
    pub fn fill(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.capacity - self.buf.len());
        if n > 0 {
            self.buf.reserve(self.capacity - self.buf.len());
            self.buf.extend_from_slice(&src[..n]);
        }
        n
    }

    /// Hand out everything filled so far.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

/// Incrementally copies a rendered head into a [`ScratchBuffer`].
#[derive(Debug)]
pub(crate) struct HeadWriter {
    head: Bytes,
    offset: usize,
}

impl HeadWriter {
    pub(crate) fn new(head: Bytes) -> Self {
        Self { head, offset: 0 }
    }

    /// Write the next piece. Returns zero once the whole head was written.
    pub(crate) fn write_into(&mut self, scratch: &mut ScratchBuffer) -> usize {
        let n = scratch.fill(&self.head[self.offset..]);
        self.offset += n;
        n
    }
}
