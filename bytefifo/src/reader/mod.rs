//! Dequeue path: batched drain with the output-buffer preflight protocol.

use std::time::Duration;

use crate::core::{FramedQueue, LEN_PREFIX_SIZE};
use crate::errors::QueueError;

/// Counters reported by [`FramedQueue::get`].
///
/// On success `messages_size == bytes_read`. On a
/// [`QueueError::MsgBufferTooSmall`] return, `messages_size` additionally
/// includes the frame that did not fit, telling the caller exactly how many
/// bytes a retry buffer needs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Frames fully delivered to the output buffer.
    pub messages_read: usize,
    /// Bytes written to the output buffer (prefix plus payload per frame).
    pub bytes_read: usize,
    /// Cumulative byte cost probed from the ring.
    pub messages_size: usize,
}

impl FramedQueue {
    /// Dequeue up to `max_messages` frames, stopping once `bytes_read`
    /// reaches `max_bytes`, and pack them into `out` as
    /// `[len: u64 LE][payload]` pairs ([`frames`] iterates them back).
    ///
    /// Each frame's length prefix is peeked first; a frame is only consumed
    /// once it is known to fit in `out`. When the next frame does not fit,
    /// the call stops with [`QueueError::MsgBufferTooSmall`] carrying the
    /// counters: frames delivered earlier in the same call stay consumed,
    /// the offending frame stays queued, and `messages_size` is the buffer
    /// size that would admit it on retry. A call that fails this way with
    /// `messages_read == 0` leaves the queue completely untouched.
    ///
    /// While the queue is empty, a blocking call waits on `not_empty` with an
    /// absolute deadline derived from `timeout`; `block = false` ignores the
    /// timeout and a zero timeout with `block = true` behaves non-blocking.
    ///
    /// # Errors
    ///
    /// [`QueueError::Empty`] when no data arrived within the allowed wait;
    /// [`QueueError::MsgBufferTooSmall`] as described above.
    pub fn get(
        &self,
        out: &mut [u8],
        max_messages: usize,
        max_bytes: usize,
        block: bool,
        timeout: Duration,
    ) -> Result<Drained, QueueError> {
        let mut drained = Drained::default();
        let lock = self.lock();

        let mut remaining = timeout;
        while lock.size() == 0 {
            if !block || remaining.is_zero() {
                return Err(QueueError::Empty);
            }
            remaining = lock.wait_not_empty(remaining);
        }

        let mut too_small = false;
        while drained.messages_read < max_messages && drained.bytes_read < max_bytes {
            let mut prefix = [0u8; LEN_PREFIX_SIZE];
            self.ring_read(&lock, &mut prefix, false);
            let payload_len = u64::from_le_bytes(prefix) as usize;

            // How many output bytes the drain needs including this frame.
            let frame_cost = LEN_PREFIX_SIZE + payload_len;
            drained.messages_size += frame_cost;

            if out.len() < drained.messages_size {
                too_small = true;
                break;
            }

            debug_assert!(
                lock.size() >= frame_cost,
                "queue holds fewer bytes than its next frame claims"
            );

            self.ring_read(
                &lock,
                &mut out[drained.bytes_read..drained.bytes_read + frame_cost],
                true,
            );
            drained.bytes_read += frame_cost;
            drained.messages_read += 1;
            lock.set_count(lock.count() - 1);

            if lock.size() == 0 {
                break;
            }
        }

        if drained.messages_read > 0 && lock.not_full_waiters() > 0 {
            lock.signal_not_full();
        } else if lock.size() > 0 && lock.not_empty_waiters() > 0 {
            // A batched producer wakes only one consumer; that consumer must
            // chain-signal its peers. Skipped when not_full was signalled so
            // the two sides do not pile onto the mutex at once.
            lock.signal_not_empty();
        }

        if too_small {
            return Err(QueueError::MsgBufferTooSmall(drained));
        }
        Ok(drained)
    }
}

/// Iterate the payloads of the `[len][payload]` frames a
/// [`FramedQueue::get`] packed into a buffer. Pass `&out[..bytes_read]`.
pub fn frames(buf: &[u8]) -> Frames<'_> {
    Frames { buf }
}

pub struct Frames<'a> {
    buf: &'a [u8],
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.buf.len() < LEN_PREFIX_SIZE {
            return None;
        }
        let (prefix, rest) = self.buf.split_at(LEN_PREFIX_SIZE);
        let prefix: [u8; LEN_PREFIX_SIZE] = prefix.try_into().ok()?;
        let payload_len = u64::from_le_bytes(prefix) as usize;
        if rest.len() < payload_len {
            return None;
        }
        let (payload, tail) = rest.split_at(payload_len);
        self.buf = tail;
        Some(payload)
    }
}
