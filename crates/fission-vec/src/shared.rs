//! Shared buffers supporting concurrent writes to disjoint ranges.

use std::fmt;
use std::ops::Range;
use std::ptr;
use std::slice;
use std::sync::Arc;

/// Fixed-length `f64` buffer whose disjoint ranges may be written
/// concurrently by worker threads.
///
/// The runtime partitions index space into non-overlapping ranges, one per
/// worker, so the views handed to kernels never alias. That disjointness is
/// what makes the interior mutability here sound.
#[derive(Clone)]
pub struct SharedVec {
    inner: Arc<Inner>,
}

struct Inner {
    data: *mut f64,
    len: usize,
}

// Raw-pointer storage written only through disjoint-range views.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Drop for Inner {
    fn drop(&mut self) {
        // Reclaims the boxed slice leaked at construction.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.data, self.len,
            )));
        }
    }
}

impl SharedVec {
    pub fn from_vec(data: Vec<f64>) -> Self {
        let boxed = data.into_boxed_slice();
        let len = boxed.len();
        let data = Box::into_raw(boxed) as *mut f64;
        SharedVec {
            inner: Arc::new(Inner { data, len }),
        }
    }

    /// A buffer of `len` copies of `fill`.
    pub fn filled(fill: f64, len: usize) -> Self {
        Self::from_vec(vec![fill; len])
    }

    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// A view over `range`, clamped to the buffer length.
    pub fn view(&self, range: Range<usize>) -> SharedSlice {
        let start = range.start.min(self.inner.len);
        let end = range.end.min(self.inner.len).max(start);
        SharedSlice {
            buffer: self.clone(),
            range: start..end,
        }
    }

    /// Reads one element. Callers must not race this with worker writes; the
    /// runtime only writes during an evaluation call.
    pub fn get(&self, index: usize) -> f64 {
        assert!(index < self.inner.len, "index {index} out of bounds");
        unsafe { *self.inner.data.add(index) }
    }

    /// Copies the whole buffer out.
    pub fn snapshot(&self) -> Vec<f64> {
        unsafe { slice::from_raw_parts(self.inner.data, self.inner.len) }.to_vec()
    }
}

impl fmt::Debug for SharedVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedVec").field("len", &self.inner.len).finish()
    }
}

/// Mutable view of one disjoint range of a [`SharedVec`].
#[derive(Clone)]
pub struct SharedSlice {
    buffer: SharedVec,
    range: Range<usize>,
}

impl SharedSlice {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Runs `f` with mutable access to the viewed range.
    ///
    /// Soundness: ranges from different workers never overlap, and within a
    /// worker views are used one batch at a time, so no two live mutable
    /// slices alias.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [f64]) -> R) -> R {
        let slice = unsafe {
            slice::from_raw_parts_mut(
                self.buffer.inner.data.add(self.range.start),
                self.range.len(),
            )
        };
        f(slice)
    }

    /// Copies the viewed range out.
    pub fn to_vec(&self) -> Vec<f64> {
        unsafe {
            slice::from_raw_parts(
                self.buffer.inner.data.add(self.range.start),
                self.range.len(),
            )
        }
        .to_vec()
    }
}

impl fmt::Debug for SharedSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSlice")
            .field("range", &self.range)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_write_through_to_the_buffer() {
        let buffer = SharedVec::filled(1.0, 8);
        buffer.view(2..5).with_mut(|slice| {
            for x in slice {
                *x = 7.0;
            }
        });
        assert_eq!(buffer.snapshot(), vec![1.0, 1.0, 7.0, 7.0, 7.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn views_clamp_to_the_buffer_length() {
        let buffer = SharedVec::filled(0.0, 4);
        let view = buffer.view(3..10);
        assert_eq!(view.range(), 3..4);
        let empty = buffer.view(6..9);
        assert!(empty.is_empty());
    }

    #[test]
    fn disjoint_views_write_concurrently() {
        let buffer = SharedVec::filled(0.0, 100);
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let view = buffer.view(worker * 25..(worker + 1) * 25);
                scope.spawn(move || {
                    view.with_mut(|slice| {
                        for x in slice {
                            *x = worker as f64;
                        }
                    });
                });
            }
        });
        assert_eq!(buffer.get(0), 0.0);
        assert_eq!(buffer.get(30), 1.0);
        assert_eq!(buffer.get(99), 3.0);
    }
}
