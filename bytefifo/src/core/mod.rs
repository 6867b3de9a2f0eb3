//! Queue header layout, placement construction, and the timed-wait protocol.
//!
//! The header is a `#[repr(C)]` block the caller allocates (heap, shared
//! memory, anything mapped and aligned) and hands to
//! [`FramedQueue::construct`] exactly once. All bookkeeping lives in it:
//! the ring cursors, the occupied-byte and message counters, and the
//! process-shared pthread mutex and condition variables together with their
//! waiter counts.

use std::alloc::{self, Layout};
use std::cell::UnsafeCell;
use std::io;
use std::mem;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::QueueError;

mod ring;

/// Byte cost of the length prefix in front of every frame.
pub const LEN_PREFIX_SIZE: usize = mem::size_of::<u64>();

/// Smallest byte cost of a complete frame: the prefix plus one payload byte.
pub const MIN_FRAME: usize = LEN_PREFIX_SIZE + 1;

const NANOS_PER_SEC: libc::c_long = 1_000_000_000;

/// Ring bookkeeping and synchronization state, placement-constructed into
/// caller-supplied memory and shared by every participant.
///
/// `head`, `tail` and the waiter counts are only ever touched with the mutex
/// held, hence the plain `UnsafeCell`s. `size` and `count` are also mutated
/// under the mutex, but [`FramedQueue::len`], [`FramedQueue::data_size`] and
/// [`FramedQueue::is_full`] read them without locking, so they are atomics.
#[repr(C)]
pub(crate) struct QueueHeader {
    capacity: usize,
    head: UnsafeCell<usize>,
    tail: UnsafeCell<usize>,
    size: AtomicUsize,
    count: AtomicUsize,
    not_empty_waiters: UnsafeCell<i32>,
    not_full_waiters: UnsafeCell<i32>,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    not_empty: UnsafeCell<libc::pthread_cond_t>,
    not_full: UnsafeCell<libc::pthread_cond_t>,
}

/// View over a queue living in caller-supplied memory.
///
/// The view binds the header and ring pointers once; both regions must stay
/// mapped and unmoved for as long as the view (or any copy of the memory in
/// another process) is in use. All operations take `&self` and are safe to
/// call from any number of threads.
pub struct FramedQueue {
    header: NonNull<QueueHeader>,
    ring: NonNull<u8>,
}

// SAFETY: the raw pointers target memory explicitly meant to be shared;
// every mutation happens under the process-shared mutex or through atomics.
unsafe impl Send for FramedQueue {}
unsafe impl Sync for FramedQueue {}

fn check(rc: libc::c_int) -> Result<(), QueueError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(QueueError::Sys(io::Error::from_raw_os_error(rc)))
    }
}

impl FramedQueue {
    /// Number of bytes the caller must allocate for the header. The ring is a
    /// separate region of exactly `capacity` bytes.
    pub fn header_size() -> usize {
        mem::size_of::<QueueHeader>()
    }

    /// Placement-construct a fresh queue into `header_mem` and bind it to the
    /// ring at `ring_mem`.
    ///
    /// Must be called exactly once per queue, before any other operation, by
    /// exactly one process. Other participants use [`FramedQueue::attach`].
    ///
    /// # Errors
    ///
    /// `Config` if `capacity` cannot hold even one minimal frame, `Sys` if
    /// initializing the process-shared primitives fails.
    ///
    /// # Safety
    ///
    /// `header_mem` must be valid for writes of [`FramedQueue::header_size`]
    /// bytes and aligned for the header; `ring_mem` must be valid for reads
    /// and writes of `capacity` bytes. Both must stay mapped for the lifetime
    /// of every view and every process sharing them.
    pub unsafe fn construct(
        header_mem: *mut u8,
        ring_mem: *mut u8,
        capacity: usize,
    ) -> Result<FramedQueue, QueueError> {
        if capacity < MIN_FRAME {
            return Err(QueueError::Config(format!(
                "capacity ({capacity} bytes) cannot hold a minimal {MIN_FRAME}-byte frame"
            )));
        }

        let hdr = header_mem as *mut QueueHeader;
        ptr::write(
            hdr,
            QueueHeader {
                capacity,
                head: UnsafeCell::new(0),
                tail: UnsafeCell::new(0),
                size: AtomicUsize::new(0),
                count: AtomicUsize::new(0),
                not_empty_waiters: UnsafeCell::new(0),
                not_full_waiters: UnsafeCell::new(0),
                mutex: UnsafeCell::new(mem::zeroed()),
                not_empty: UnsafeCell::new(mem::zeroed()),
                not_full: UnsafeCell::new(mem::zeroed()),
            },
        );

        // Not every platform hands out process-shared primitives by default;
        // both the mutex and the condvars must opt in explicitly.
        let mut mutex_attr: libc::pthread_mutexattr_t = mem::zeroed();
        check(libc::pthread_mutexattr_init(&mut mutex_attr))?;
        check(libc::pthread_mutexattr_setpshared(
            &mut mutex_attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        check(libc::pthread_mutex_init((*hdr).mutex.get(), &mutex_attr))?;
        libc::pthread_mutexattr_destroy(&mut mutex_attr);

        let mut cond_attr: libc::pthread_condattr_t = mem::zeroed();
        check(libc::pthread_condattr_init(&mut cond_attr))?;
        check(libc::pthread_condattr_setpshared(
            &mut cond_attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        check(libc::pthread_cond_init((*hdr).not_empty.get(), &cond_attr))?;
        check(libc::pthread_cond_init((*hdr).not_full.get(), &cond_attr))?;
        libc::pthread_condattr_destroy(&mut cond_attr);

        Ok(FramedQueue::attach(header_mem, ring_mem))
    }

    /// View an already-constructed queue.
    ///
    /// # Safety
    ///
    /// `header_mem` must point to a header some process has constructed with
    /// [`FramedQueue::construct`], and `ring_mem` to that queue's ring. Both
    /// must stay mapped for the lifetime of the view.
    pub unsafe fn attach(header_mem: *mut u8, ring_mem: *mut u8) -> FramedQueue {
        FramedQueue {
            header: NonNull::new_unchecked(header_mem as *mut QueueHeader),
            ring: NonNull::new_unchecked(ring_mem),
        }
    }

    fn header(&self) -> &QueueHeader {
        // SAFETY: the attach/construct contract keeps the header mapped for
        // the lifetime of the view.
        unsafe { self.header.as_ref() }
    }

    pub(crate) fn ring_ptr(&self) -> *mut u8 {
        self.ring.as_ptr()
    }

    /// Ring capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.header().capacity
    }

    /// Number of whole messages currently queued. Lock-free best-effort read;
    /// callers wanting a consistent snapshot must serialize externally.
    pub fn len(&self) -> usize {
        self.header().count.load(Ordering::Relaxed)
    }

    /// Whether the queue currently holds no messages. Best-effort, like
    /// [`FramedQueue::len`].
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ring bytes currently occupied by frames. Best-effort, like
    /// [`FramedQueue::len`].
    pub fn data_size(&self) -> usize {
        self.header().size.load(Ordering::Relaxed)
    }

    /// Whether a minimal frame (a 1-byte payload behind its prefix) could not
    /// be enqueued right now. Best-effort, like [`FramedQueue::len`].
    pub fn is_full(&self) -> bool {
        self.data_size() + MIN_FRAME > self.capacity()
    }

    pub(crate) fn lock(&self) -> LockGuard<'_> {
        let hdr = self.header();
        let rc = unsafe { libc::pthread_mutex_lock(hdr.mutex.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_lock failed");
        LockGuard { hdr }
    }
}

/// Exclusive access to the header bookkeeping and the ring, held for a whole
/// `put` or `get`. Unlocks on drop.
pub(crate) struct LockGuard<'a> {
    hdr: &'a QueueHeader,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.hdr.mutex.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed");
    }
}

impl LockGuard<'_> {
    pub(crate) fn head(&self) -> usize {
        unsafe { *self.hdr.head.get() }
    }

    pub(crate) fn set_head(&self, head: usize) {
        unsafe { *self.hdr.head.get() = head }
    }

    pub(crate) fn tail(&self) -> usize {
        unsafe { *self.hdr.tail.get() }
    }

    pub(crate) fn set_tail(&self, tail: usize) {
        unsafe { *self.hdr.tail.get() = tail }
    }

    pub(crate) fn size(&self) -> usize {
        self.hdr.size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_size(&self, size: usize) {
        self.hdr.size.store(size, Ordering::Relaxed)
    }

    pub(crate) fn count(&self) -> usize {
        self.hdr.count.load(Ordering::Relaxed)
    }

    pub(crate) fn set_count(&self, count: usize) {
        self.hdr.count.store(count, Ordering::Relaxed)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.hdr.capacity
    }

    /// Whether `data_size` more frame bytes fit into the ring right now.
    pub(crate) fn can_fit(&self, data_size: usize) -> bool {
        self.size() + data_size <= self.hdr.capacity
    }

    pub(crate) fn not_empty_waiters(&self) -> i32 {
        unsafe { *self.hdr.not_empty_waiters.get() }
    }

    pub(crate) fn not_full_waiters(&self) -> i32 {
        unsafe { *self.hdr.not_full_waiters.get() }
    }

    pub(crate) fn signal_not_empty(&self) {
        unsafe {
            libc::pthread_cond_signal(self.hdr.not_empty.get());
        }
    }

    pub(crate) fn signal_not_full(&self) {
        unsafe {
            libc::pthread_cond_signal(self.hdr.not_full.get());
        }
    }

    /// Wait on `not_full` for at most `remaining`; returns the budget left
    /// after the wake-up (zero when the deadline has passed).
    pub(crate) fn wait_not_full(&self, remaining: Duration) -> Duration {
        unsafe {
            self.timed_wait(
                self.hdr.not_full.get(),
                self.hdr.not_full_waiters.get(),
                remaining,
            )
        }
    }

    /// Like [`LockGuard::wait_not_full`], on `not_empty`.
    pub(crate) fn wait_not_empty(&self, remaining: Duration) -> Duration {
        unsafe {
            self.timed_wait(
                self.hdr.not_empty.get(),
                self.hdr.not_empty_waiters.get(),
                remaining,
            )
        }
    }

    /// The timed-wait primitive: absolute deadline on the real-time clock,
    /// waiter count maintained while the mutex is held on both sides of the
    /// wait. Spurious wake-ups are handled by the callers' `while` loops.
    unsafe fn timed_wait(
        &self,
        cond: *mut libc::pthread_cond_t,
        waiters: *mut i32,
        remaining: Duration,
    ) -> Duration {
        let deadline = deadline_after(remaining);
        *waiters += 1;
        libc::pthread_cond_timedwait(cond, self.hdr.mutex.get(), &deadline);
        *waiters -= 1;
        remaining_until(&deadline)
    }
}

fn now_realtime() -> libc::timespec {
    let mut now: libc::timespec = unsafe { mem::zeroed() };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };
    debug_assert_eq!(rc, 0, "clock_gettime(CLOCK_REALTIME) failed");
    now
}

fn deadline_after(remaining: Duration) -> libc::timespec {
    let mut deadline = now_realtime();
    deadline.tv_sec = deadline
        .tv_sec
        .saturating_add(remaining.as_secs() as libc::time_t);
    deadline.tv_nsec += remaining.subsec_nanos() as libc::c_long;
    if deadline.tv_nsec >= NANOS_PER_SEC {
        deadline.tv_sec = deadline.tv_sec.saturating_add(1);
        deadline.tv_nsec -= NANOS_PER_SEC;
    }
    deadline
}

fn remaining_until(deadline: &libc::timespec) -> Duration {
    let now = now_realtime();
    let mut sec = deadline.tv_sec - now.tv_sec;
    let mut nsec = deadline.tv_nsec - now.tv_nsec;
    if nsec < 0 {
        sec -= 1;
        nsec += NANOS_PER_SEC;
    }
    if sec < 0 {
        Duration::ZERO
    } else {
        Duration::new(sec as u64, nsec as u32)
    }
}

/// A queue backed by process-local memory: one allocation carrying the header
/// and the ring, constructed on creation and torn down on drop.
///
/// This is the in-process flavor of the caller-provides-the-memory contract;
/// use [`SharedQueue`](crate::shm::SharedQueue) to span processes. Derefs to
/// [`FramedQueue`], so the whole queue API is available on it.
pub struct OwnedQueue {
    queue: FramedQueue,
    base: NonNull<u8>,
    layout: Layout,
}

// SAFETY: same reasoning as FramedQueue; the allocation is freed only when
// the sole owner drops.
unsafe impl Send for OwnedQueue {}
unsafe impl Sync for OwnedQueue {}

impl OwnedQueue {
    /// Allocate and construct a queue with a ring of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<OwnedQueue, QueueError> {
        let layout = Layout::from_size_align(
            FramedQueue::header_size() + capacity,
            mem::align_of::<QueueHeader>(),
        )
        .map_err(|err| QueueError::Config(format!("queue layout: {err}")))?;

        // SAFETY: the layout is non-empty (the header alone has a size).
        let base = unsafe { alloc::alloc_zeroed(layout) };
        let base = match NonNull::new(base) {
            Some(base) => base,
            None => {
                return Err(QueueError::Config(format!(
                    "allocation of {} bytes failed",
                    layout.size()
                )))
            }
        };

        // SAFETY: base covers header_size + capacity bytes, properly aligned.
        let queue = unsafe {
            match FramedQueue::construct(
                base.as_ptr(),
                base.as_ptr().add(FramedQueue::header_size()),
                capacity,
            ) {
                Ok(queue) => queue,
                Err(err) => {
                    alloc::dealloc(base.as_ptr(), layout);
                    return Err(err);
                }
            }
        };

        Ok(OwnedQueue {
            queue,
            base,
            layout,
        })
    }
}

impl Deref for OwnedQueue {
    type Target = FramedQueue;

    fn deref(&self) -> &FramedQueue {
        &self.queue
    }
}

impl Drop for OwnedQueue {
    fn drop(&mut self) {
        // Sole owner: tear down the pthread objects before freeing the memory.
        unsafe {
            let hdr = self.queue.header.as_ptr();
            libc::pthread_cond_destroy((*hdr).not_empty.get());
            libc::pthread_cond_destroy((*hdr).not_full.get());
            libc::pthread_mutex_destroy((*hdr).mutex.get());
            alloc::dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn header_size_is_stable_and_covers_the_bookkeeping() {
        let size = FramedQueue::header_size();
        assert!(size >= 7 * mem::size_of::<usize>());
        assert_eq!(size, FramedQueue::header_size());
    }

    #[test]
    fn construct_rejects_capacity_below_min_frame() {
        match OwnedQueue::new(MIN_FRAME - 1) {
            Err(QueueError::Config(_)) => {}
            other => panic!("expected a Config error, got {:?}", other.map(|_| ())),
        }
        assert!(OwnedQueue::new(MIN_FRAME).is_ok());
    }

    #[test]
    fn fresh_queue_is_empty_and_not_full() -> Result<(), QueueError> {
        let queue = OwnedQueue::new(128)?;
        assert_eq!(queue.capacity(), 128);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.data_size(), 0);
        assert!(queue.is_empty());
        assert!(!queue.is_full());
        Ok(())
    }

    #[test]
    fn min_frame_queue_holds_exactly_one_minimal_message() -> Result<(), QueueError> {
        let queue = OwnedQueue::new(MIN_FRAME)?;
        queue.put(&[&[42u8][..]], false, Duration::ZERO)?;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.data_size(), MIN_FRAME);
        assert!(queue.is_full());
        assert!(matches!(
            queue.put(&[&[43u8][..]], false, Duration::ZERO),
            Err(QueueError::Full)
        ));
        Ok(())
    }

    #[test]
    fn expired_deadline_reports_no_remaining_budget() {
        let deadline = deadline_after(Duration::ZERO);
        assert_eq!(remaining_until(&deadline), Duration::ZERO);

        let deadline = deadline_after(Duration::from_secs(60));
        let remaining = remaining_until(&deadline);
        assert!(remaining > Duration::from_secs(59));
        assert!(remaining <= Duration::from_secs(60));
    }
}
