//! Enqueue path: batched, atomic, with the producer-side wake-up discipline.

use std::time::Duration;

use crate::core::{FramedQueue, LEN_PREFIX_SIZE, MIN_FRAME};
use crate::errors::QueueError;

impl FramedQueue {
    /// Enqueue a batch of messages as one atomic operation.
    ///
    /// The byte cost of the whole batch (one length prefix per message plus
    /// the payloads) is computed up front; either every message is enqueued,
    /// in order, or none is. While the batch does not fit, a blocking call
    /// waits on `not_full` with an absolute deadline derived from `timeout`.
    ///
    /// `block = false` ignores `timeout`; `block = true` with a zero timeout
    /// behaves like a non-blocking call. A batch whose cost exceeds the ring
    /// capacity can never succeed and runs the timeout down to
    /// [`QueueError::Full`].
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] when the batch did not fit within the allowed
    /// wait; the queue is left exactly as it was.
    pub fn put(&self, messages: &[&[u8]], block: bool, timeout: Duration) -> Result<(), QueueError> {
        let lock = self.lock();

        let mut total = messages.len() * LEN_PREFIX_SIZE;
        for msg in messages {
            total += msg.len();
        }

        let mut remaining = timeout;
        while !lock.can_fit(total) {
            if !block || remaining.is_zero() {
                return Err(QueueError::Full);
            }

            // A consumer may be parked from before the ring filled up; wake
            // it so it can drain and free space.
            if lock.not_empty_waiters() > 0 {
                lock.signal_not_empty();
            }

            remaining = lock.wait_not_full(remaining);
        }

        for msg in messages {
            self.ring_write(&lock, &(msg.len() as u64).to_le_bytes());
            self.ring_write(&lock, msg);
            lock.set_count(lock.count() + 1);
        }

        if lock.not_empty_waiters() > 0 {
            lock.signal_not_empty();
        } else if lock.not_full_waiters() > 0 && lock.can_fit(MIN_FRAME) {
            // A batched consumer that freed a large region wakes only one
            // producer; that producer must chain-signal the next waiter, or
            // many-producer throughput collapses to a single producer.
            lock.signal_not_full();
        }

        Ok(())
    }

    /// Enqueue a single message. Equivalent to a one-element batch.
    pub fn put_one(&self, message: &[u8], block: bool, timeout: Duration) -> Result<(), QueueError> {
        self.put(&[message], block, timeout)
    }
}
