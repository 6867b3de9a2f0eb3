use std::{fmt, io};

use crate::reader::Drained;

/// Stable integer status codes, shared with other-language ports of the wire
/// format. Successful calls map to [`STATUS_SUCCESS`]; the recoverable
/// [`QueueError`] states map to the negative codes via
/// [`QueueError::status_code`].
pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_EMPTY: i32 = -1;
pub const STATUS_FULL: i32 = -2;
pub const STATUS_MSG_BUFFER_TOO_SMALL: i32 = -3;

#[derive(Debug)]
pub enum QueueError {
    /// `get` found no data within its timeout. Nothing was consumed.
    Empty,
    /// `put` could not fit the whole batch within its timeout. Nothing was
    /// written; a partial batch is never enqueued.
    Full,
    /// The caller's output buffer cannot hold the next frame. Frames already
    /// copied by the same call stay consumed from the ring; the carried
    /// [`Drained`] reports them, and its `messages_size` is the byte cost
    /// required to also admit the frame that did not fit.
    MsgBufferTooSmall(Drained),
    /// Creating or opening the shared-memory mapping failed.
    SharedMemory(shared_memory::ShmemError),
    /// A pthread or clock call failed; carries the errno.
    Sys(io::Error),
    /// Invalid configuration or a violated construction contract.
    Config(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Empty => write!(f, "queue is empty"),
            QueueError::Full => write!(f, "queue is full"),
            QueueError::MsgBufferTooSmall(drained) => write!(
                f,
                "output buffer too small: {} bytes required, {} delivered",
                drained.messages_size, drained.bytes_read
            ),
            QueueError::SharedMemory(e) => write!(f, "shared memory error: {}", e),
            QueueError::Sys(e) => write!(f, "system error: {}", e),
            QueueError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::SharedMemory(e) => Some(e),
            QueueError::Sys(e) => Some(e),
            _ => None,
        }
    }
}

impl From<shared_memory::ShmemError> for QueueError {
    fn from(err: shared_memory::ShmemError) -> Self {
        QueueError::SharedMemory(err)
    }
}

impl From<io::Error> for QueueError {
    fn from(err: io::Error) -> Self {
        QueueError::Sys(err)
    }
}

impl QueueError {
    /// The stable status code for the queue-state outcomes, or `None` for
    /// setup and system failures, which have no wire-level code.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            QueueError::Empty => Some(STATUS_EMPTY),
            QueueError::Full => Some(STATUS_FULL),
            QueueError::MsgBufferTooSmall(_) => Some(STATUS_MSG_BUFFER_TOO_SMALL),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_state_errors_map_to_stable_codes() {
        assert_eq!(QueueError::Empty.status_code(), Some(STATUS_EMPTY));
        assert_eq!(QueueError::Full.status_code(), Some(STATUS_FULL));
        assert_eq!(
            QueueError::MsgBufferTooSmall(Drained::default()).status_code(),
            Some(STATUS_MSG_BUFFER_TOO_SMALL)
        );
        assert_eq!(QueueError::Config(String::from("bad")).status_code(), None);
    }
}
