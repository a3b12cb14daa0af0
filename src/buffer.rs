//! Reference counted payload storage.
//!
//! A tag payload is allocated once by the demuxer, filled incrementally while
//! the tag body arrives, then sealed into a [`RefBuffer`] that the cache and
//! every subscriber batch share without copying. Ownership is explicit:
//! [`RefBuffer::acquire`] hands out a new co-owner and [`RefBuffer::release`]
//! gives one up. The storage is freed when the last owner releases it.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::{Arc, Weak};

struct Storage {
    data: Bytes,
}

impl Drop for Storage {
    fn drop(&mut self) {
        log::trace!("payload buffer of {} bytes freed", self.data.len());
    }
}

/// A payload buffer that is still being written.
///
/// The capacity is fixed at allocation time; the buffer can only be sealed
/// once it has been filled completely.
pub struct PendingBuffer {
    data: BytesMut,
    capacity: usize,
}

impl PendingBuffer {
    /// Copies as much of `src` as still fits and returns how many bytes were taken.
    pub fn fill(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        self.data.extend_from_slice(&src[..n]);
        n
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The bytes written so far.
    pub fn filled(&self) -> &[u8] {
        &self.data
    }

    /// Freezes the buffer into a shared payload with a reference count of one.
    ///
    /// A partially filled buffer is zero padded up to its capacity.
    pub fn seal(mut self) -> RefBuffer {
        if !self.is_full() {
            self.data.resize(self.capacity, 0);
        }
        RefBuffer {
            inner: Arc::new(Storage {
                data: self.data.freeze(),
            }),
        }
    }
}

/// Shared, immutable payload bytes with an explicit owner count.
///
/// `RefBuffer` is deliberately not `Clone`: a new owner is created with
/// [`acquire`](RefBuffer::acquire) and an owner is given up with
/// [`release`](RefBuffer::release) (or by dropping it). Since `release`
/// consumes the handle, reading after one's own release does not compile.
pub struct RefBuffer {
    inner: Arc<Storage>,
}

impl RefBuffer {
    /// Allocates storage for exactly `size` bytes.
    pub fn allocate(size: usize) -> PendingBuffer {
        PendingBuffer {
            data: BytesMut::with_capacity(size),
            capacity: size,
        }
    }

    pub fn copy_from_slice(src: &[u8]) -> RefBuffer {
        let mut pending = RefBuffer::allocate(src.len());
        pending.fill(src);
        pending.seal()
    }

    /// Registers one more owner of the same storage.
    pub fn acquire(&self) -> RefBuffer {
        RefBuffer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Gives up this owner. The storage is freed if it was the last one.
    pub fn release(self) {
        drop(self)
    }

    /// Number of owners currently holding the storage.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// A non-owning observer, used to check when the storage is gone.
    pub fn downgrade(&self) -> WeakBuffer {
        WeakBuffer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl AsRef<[u8]> for RefBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.inner.data
    }
}

impl fmt::Debug for RefBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefBuffer")
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Observes a [`RefBuffer`] without keeping it alive.
#[derive(Clone)]
pub struct WeakBuffer {
    inner: Weak<Storage>,
}

impl WeakBuffer {
    pub fn is_freed(&self) -> bool {
        self.inner.strong_count() == 0
    }

    pub fn ref_count(&self) -> usize {
        self.inner.strong_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_buffer_fills_incrementally() {
        let mut pending = RefBuffer::allocate(5);
        assert_eq!(pending.fill(&[1, 2]), 2);
        assert_eq!(pending.remaining(), 3);
        assert_eq!(pending.capacity(), 5);
        assert_eq!(pending.filled(), &[1, 2]);
        assert_eq!(pending.fill(&[3, 4, 5, 6, 7]), 3);
        assert!(pending.is_full());
        assert_eq!(pending.fill(&[8]), 0);

        let buf = pending.seal();
        assert_eq!(buf.as_ref(), &[1, 2, 3, 4, 5]);
        assert_eq!(buf.ref_count(), 1);
    }

    #[test]
    fn test_zero_sized_buffer() {
        let pending = RefBuffer::allocate(0);
        assert!(pending.is_full());
        let buf = pending.seal();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_freed_only_after_last_release() {
        let first = RefBuffer::copy_from_slice(b"payload");
        let watch = first.downgrade();

        let second = first.acquire();
        let third = second.acquire();
        assert_eq!(watch.ref_count(), 3);

        first.release();
        assert!(!watch.is_freed());
        assert_eq!(third.as_ref(), b"payload");

        third.release();
        assert!(!watch.is_freed());
        assert_eq!(second.ref_count(), 1);

        second.release();
        assert!(watch.is_freed());
        assert_eq!(watch.ref_count(), 0);
    }

    #[test]
    fn test_acquire_release_sequences() {
        // Any interleaving of acquires and releases frees exactly once, at the end.
        for acquires in 0..8usize {
            let root = RefBuffer::copy_from_slice(&[0xAB; 16]);
            let watch = root.downgrade();
            let mut owners = vec![root];
            for _ in 0..acquires {
                let extra = owners[owners.len() / 2].acquire();
                owners.push(extra);
            }
            assert_eq!(watch.ref_count(), acquires + 1);

            while owners.len() > 1 {
                owners.swap_remove(0).release();
                assert!(!watch.is_freed());
            }
            owners.pop().unwrap().release();
            assert!(watch.is_freed());
        }
    }

    #[test]
    fn test_partial_buffer_is_padded_on_seal() {
        let mut pending = RefBuffer::allocate(4);
        pending.fill(&[9]);
        let buf = pending.seal();
        assert_eq!(buf.as_ref(), &[9, 0, 0, 0]);
    }
}
