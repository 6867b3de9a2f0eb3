//! A bounded multi-producer/multi-consumer byte-framed FIFO queue designed to
//! live in a region of memory shared between processes.
//!
//! # Overview
//! Producers enqueue discrete messages (opaque byte strings); consumers
//! dequeue one or more messages per call. Both paths are batched: a single
//! `put` enqueues a whole batch atomically under one lock acquisition, and a
//! single `get` drains as many frames as the caller's budgets allow.
//!
//! Key components:
//! - [`FramedQueue`](crate::core::FramedQueue): the core view over a queue
//!   header and its byte ring. The header is placement-constructed into
//!   caller-supplied memory;
//!   [`FramedQueue::header_size`](crate::core::FramedQueue::header_size)
//!   tells the caller how many bytes to provide.
//! - [`OwnedQueue`](crate::core::OwnedQueue): a queue backed by process-local
//!   memory, for intra-process messaging and tests.
//! - [`SharedQueue`](crate::shm::SharedQueue): a queue backed by a
//!   shared-memory mapping, for inter-process messaging. Configured via
//!   [`QueueConfig`](crate::shm::QueueConfig), built with
//!   [`QueueConfig::builder()`](crate::shm::QueueConfig::builder).
//! - [`QueueError`](crate::errors::QueueError): error type for the crate,
//!   including the recoverable queue states `Empty`, `Full` and
//!   `MsgBufferTooSmall`.
//!
//! # On-ring frame format
//! Each message occupies one frame: an 8-byte little-endian `u64` payload
//! length followed by the payload bytes, packed with no padding. A frame may
//! wrap across the ring boundary; both prefix and payload are split at the
//! wrap point and rejoined on read. The smallest complete frame costs
//! [`MIN_FRAME`](crate::core::MIN_FRAME) bytes (prefix plus one payload byte).
//!
//! # Concurrency Model and Safety
//!
//! - **One mutex for everything.** A single process-shared mutex in the
//!   header protects all bookkeeping fields and all ring byte modifications.
//!   Every `put` and `get` holds it for the whole operation, including the
//!   copies. The only suspension points are the timed condition-variable
//!   waits inside a blocking `put` (on `not_full`) and `get` (on
//!   `not_empty`).
//!
//! - **Batched wake-up discipline.** A completing producer wakes a waiting
//!   consumer when there is data, and otherwise chain-signals the next
//!   waiting producer while a minimal frame still fits; a completing consumer
//!   does the symmetric thing. Without the chain-signal, a batched consumer
//!   facing many producers (or a batched producer facing many consumers)
//!   silently serializes the other side down to one active participant.
//!
//! - **Timeouts, not cancellation.** Blocking calls take an upper bound on
//!   wall-clock wait time, computed as an absolute deadline on the system
//!   real-time clock. `block = false` ignores the timeout entirely, and a
//!   zero timeout with `block = true` behaves like a non-blocking call. There
//!   is no way to abort a call from outside.
//!
//! - **Cross-process requirements.** Every participating process must map the
//!   header and ring so both stay addressable and word-aligned for the
//!   queue's lifetime, and the header must be constructed exactly once, by
//!   exactly one process, before any other use. The mutex is not robust: if a
//!   process dies while holding it, the queue is unusable. The
//!   [`shm`] layer takes care of the mapping side of this contract.

pub mod errors;
pub mod core;
pub mod reader;
pub mod writer;
pub mod shm;

#[cfg(test)]
mod tests;

pub use crate::core::{FramedQueue, OwnedQueue, LEN_PREFIX_SIZE, MIN_FRAME};
pub use errors::{
    QueueError, STATUS_EMPTY, STATUS_FULL, STATUS_MSG_BUFFER_TOO_SMALL, STATUS_SUCCESS,
};
pub use reader::{frames, Drained, Frames};
pub use shm::{QueueConfig, SharedQueue};
