//! Frame bytes in and out of the wrapping ring.
//!
//! Both directions share the same shape: one copy when the segment fits
//! before the wrap point, otherwise a split pair with the cursor landing on
//! the remainder. An exact fit takes the split path with an empty second
//! copy, parking the cursor at zero, so cursors always stay inside
//! `[0, capacity)`.

use std::ptr;

use super::{FramedQueue, LockGuard};

impl FramedQueue {
    /// Append `data` at the current tail. The caller preflights with
    /// `can_fit`; this only asserts the invariants in debug builds.
    pub(crate) fn ring_write(&self, lock: &LockGuard<'_>, data: &[u8]) {
        let capacity = lock.capacity();
        let tail = lock.tail();
        let ring = self.ring_ptr();

        debug_assert!(
            lock.size() + data.len() <= capacity,
            "ring write past capacity"
        );

        // SAFETY: tail < capacity and the preflight guarantees data.len()
        // bytes of free ring space; the caller's slice cannot overlap the
        // ring it is being copied into.
        unsafe {
            if tail + data.len() < capacity {
                ptr::copy_nonoverlapping(data.as_ptr(), ring.add(tail), data.len());
                lock.set_tail(tail + data.len());
            } else {
                let before_wrap = capacity - tail;
                let after_wrap = data.len() - before_wrap;
                ptr::copy_nonoverlapping(data.as_ptr(), ring.add(tail), before_wrap);
                ptr::copy_nonoverlapping(data.as_ptr().add(before_wrap), ring, after_wrap);
                lock.set_tail(after_wrap);
            }
        }

        lock.set_size(lock.size() + data.len());

        debug_assert!(lock.tail() < capacity, "tail cursor past the ring boundary");
    }

    /// Copy `dst.len()` bytes from the current head into `dst`. With
    /// `pop == false` this is a peek and the cursors stay put; with
    /// `pop == true` the head advances and `size` shrinks.
    pub(crate) fn ring_read(&self, lock: &LockGuard<'_>, dst: &mut [u8], pop: bool) {
        let capacity = lock.capacity();
        let head = lock.head();
        let ring = self.ring_ptr();

        debug_assert!(lock.size() >= dst.len(), "ring read past the queued bytes");

        // SAFETY: head < capacity, size >= dst.len() guarantees the bytes
        // exist, and dst is a caller buffer disjoint from the ring.
        let new_head = unsafe {
            if head + dst.len() < capacity {
                ptr::copy_nonoverlapping(ring.add(head), dst.as_mut_ptr(), dst.len());
                head + dst.len()
            } else {
                let before_wrap = capacity - head;
                let after_wrap = dst.len() - before_wrap;
                ptr::copy_nonoverlapping(ring.add(head), dst.as_mut_ptr(), before_wrap);
                ptr::copy_nonoverlapping(ring, dst.as_mut_ptr().add(before_wrap), after_wrap);
                after_wrap
            }
        };

        debug_assert!(new_head < capacity, "head cursor past the ring boundary");

        if pop {
            lock.set_head(new_head);
            lock.set_size(lock.size() - dst.len());
        }
    }
}
