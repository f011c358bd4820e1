//! Component A: a refcounted byte region.
//!
//! A `Region` is a single contiguous, immutable byte buffer with an
//! *explicit*, externally-driven reference count: `retain`/`release`
//! increment/decrement it directly rather than riding on Rust's own
//! `Arc` strong count, because the count is load-bearing for returning
//! pooled memory to a recycler. Merely dropping the last `Region` handle
//! is not enough to trigger recycling on its own -- `release` is.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Something that can take back the bytes of a region once its refcount
/// drops to zero. A no-op recycler (the default) just lets the bytes drop.
pub trait Recycler: Send + Sync {
    fn recycle(&self, bytes: Box<[u8]>);
}

/// A recycler that drops bytes on the floor; the default for [`Region::new`].
pub struct NullRecycler;
impl Recycler for NullRecycler {
    fn recycle(&self, _bytes: Box<[u8]>) {}
}

struct Inner {
    bytes: Box<[u8]>,
    count: AtomicUsize,
    recycler: Arc<dyn Recycler>,
}

/// A refcounted, immutable byte region.
///
/// `Region` is cheap to clone (an `Arc` bump); cloning does **not** by
/// itself `retain` the region -- call `retain` explicitly when a new
/// logical owner needs to keep the bytes alive past the current scope.
#[derive(Clone)]
pub struct Region {
    inner: Arc<Inner>,
}

impl Region {
    /// Wrap `bytes` in a new region with refcount 1 and no recycler.
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Region {
        Region::with_recycler(bytes, Arc::new(NullRecycler))
    }

    /// Wrap `bytes` in a new region with refcount 1, returning them to
    /// `recycler` when the count is driven back to zero.
    pub fn with_recycler(bytes: impl Into<Box<[u8]>>, recycler: Arc<dyn Recycler>) -> Region {
        Region {
            inner: Arc::new(Inner {
                bytes: bytes.into(),
                count: AtomicUsize::new(1),
                recycler,
            }),
        }
    }

    /// The region's bytes. Reading after the refcount has reached zero
    /// is a logic error in the caller (the region should no longer be
    /// reachable at that point), but this type does not itself enforce
    /// that -- it only guarantees the recycle hook fires exactly once.
    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    /// Current external refcount.
    pub fn refcount(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Increment the refcount by `k`.
    pub fn retain(&self, k: usize) {
        if k == 0 {
            return;
        }
        self.inner.count.fetch_add(k, Ordering::AcqRel);
    }

    /// Decrement the refcount by `k`, saturating at zero. Driving the
    /// count from a positive value down to (or through) zero fires the
    /// recycle hook exactly once.
    pub fn release(&self, k: usize) {
        if k == 0 {
            return;
        }
        let mut current = self.inner.count.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(k);
            match self.inner.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if current > 0 && next == 0 {
                        self.inner.recycler.recycle(self.inner.bytes.clone());
                    }
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingRecycler(Mutex<Vec<Box<[u8]>>>);
    impl Recycler for RecordingRecycler {
        fn recycle(&self, bytes: Box<[u8]>) {
            self.0.lock().unwrap().push(bytes);
        }
    }

    #[test]
    fn retain_release_round_trip_leaves_count_unchanged() {
        let region = Region::new(vec![1, 2, 3]);
        assert_eq!(region.refcount(), 1);
        region.retain(4);
        assert_eq!(region.refcount(), 5);
        region.release(4);
        assert_eq!(region.refcount(), 1);
    }

    #[test]
    fn release_to_zero_fires_recycler_once() {
        let recorder = Arc::new(RecordingRecycler(Mutex::new(Vec::new())));
        let region = Region::with_recycler(vec![9, 9, 9], recorder.clone());
        region.retain(1); // refcount 2
        region.release(1); // back to 1, no recycle yet
        assert!(recorder.0.lock().unwrap().is_empty());
        region.release(5); // clamps at 0, recycles exactly once
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
        assert_eq!(region.refcount(), 0);
        region.release(3); // already at zero: no further recycle
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn negative_counts_are_impossible() {
        let region = Region::new(vec![0u8; 4]);
        region.release(100);
        assert_eq!(region.refcount(), 0);
    }
}
