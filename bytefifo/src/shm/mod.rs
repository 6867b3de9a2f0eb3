//! Shared-memory rendezvous: configuration plus mapped-queue handles.
//!
//! One process calls [`SharedQueue::create`], which allocates a mapping of
//! `header_size + capacity` bytes behind a file link and constructs the queue
//! into it; every other participant calls [`SharedQueue::open`] on the same
//! config. Both handles deref to [`FramedQueue`], so the whole queue API is
//! available on them.

use std::ops::Deref;

use log::{debug, info};
use serde_derive::{Deserialize, Serialize};
use shared_memory::{Shmem, ShmemConf, ShmemError};

use crate::core::{FramedQueue, MIN_FRAME};
use crate::errors::QueueError;

/// Default file-link name for the shared mapping.
pub static QUEUE_FILE_NAME: &str = "bytefifo-queue";

const DEFAULT_CAPACITY_BYTES: usize = 1 << 20;

/// Where the queue lives and how big its ring is. Serializable so binaries
/// can load it from their TOML config; use [`QueueConfig::builder`] to
/// construct a validated instance in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Directory holding the file link.
    pub data_dir: String,
    /// File-link name within `data_dir`.
    pub flink_name: String,
    /// Ring capacity in bytes (the mapping adds the header on top).
    pub capacity_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            data_dir: String::from("."),
            flink_name: String::from(QUEUE_FILE_NAME),
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
        }
    }
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    fn flink(&self) -> String {
        format!("{}/{}", &self.data_dir, &self.flink_name)
    }

    fn map_size(&self) -> usize {
        FramedQueue::header_size() + self.capacity_bytes
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.flink_name.is_empty() {
            return Err(QueueError::Config(String::from(
                "flink_name must not be empty",
            )));
        }
        if self.capacity_bytes < MIN_FRAME {
            return Err(QueueError::Config(format!(
                "capacity_bytes ({}) cannot hold a minimal {MIN_FRAME}-byte frame",
                self.capacity_bytes
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct QueueConfigBuilder {
    data_dir: Option<String>,
    flink_name: Option<String>,
    capacity_bytes: Option<usize>,
}

impl QueueConfigBuilder {
    pub fn data_dir(mut self, data_dir: impl Into<String>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn flink_name(mut self, flink_name: impl Into<String>) -> Self {
        self.flink_name = Some(flink_name.into());
        self
    }

    pub fn capacity_bytes(mut self, capacity_bytes: usize) -> Self {
        self.capacity_bytes = Some(capacity_bytes);
        self
    }

    pub fn build(self) -> Result<QueueConfig, QueueError> {
        let defaults = QueueConfig::default();
        let cfg = QueueConfig {
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            flink_name: self.flink_name.unwrap_or(defaults.flink_name),
            capacity_bytes: self.capacity_bytes.unwrap_or(defaults.capacity_bytes),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// A queue living in a shared-memory mapping. The handle keeps the mapping
/// alive; drop every handle only when no participant still needs the queue.
pub struct SharedQueue {
    queue: FramedQueue,
    _shmem: Box<Shmem>,
}

// SAFETY: the queue view is already Send + Sync; the mapping handle is only
// touched again on drop.
unsafe impl Send for SharedQueue {}
unsafe impl Sync for SharedQueue {}

impl SharedQueue {
    /// Create the mapping and construct a fresh queue into it.
    ///
    /// When another process already created the link this falls back to
    /// [`SharedQueue::open`] and does NOT construct again; the race where an
    /// opener maps the region before the creator finished constructing is
    /// the caller's to avoid (start the creator first).
    pub fn create(cfg: &QueueConfig) -> Result<SharedQueue, QueueError> {
        cfg.validate()?;
        match ShmemConf::new()
            .size(cfg.map_size())
            .flink(cfg.flink())
            .create()
        {
            Ok(shmem) => {
                debug!(
                    "created queue mapping {} ({} ring bytes, {} total)",
                    cfg.flink(),
                    cfg.capacity_bytes,
                    cfg.map_size()
                );
                let shmem = Box::new(shmem);
                let base = shmem.as_ptr();
                // SAFETY: the mapping spans header_size + capacity bytes and
                // is page-aligned; we are the constructing process.
                let queue = unsafe {
                    FramedQueue::construct(
                        base,
                        base.add(FramedQueue::header_size()),
                        cfg.capacity_bytes,
                    )?
                };
                Ok(SharedQueue {
                    queue,
                    _shmem: shmem,
                })
            }
            Err(ShmemError::LinkExists) => {
                info!("queue mapping {} already exists, attaching", cfg.flink());
                SharedQueue::open(cfg)
            }
            Err(err) => Err(QueueError::SharedMemory(err)),
        }
    }

    /// Open a mapping some other process created and constructed.
    pub fn open(cfg: &QueueConfig) -> Result<SharedQueue, QueueError> {
        let shmem = Box::new(ShmemConf::new().flink(cfg.flink()).open()?);
        if shmem.len() < FramedQueue::header_size() {
            return Err(QueueError::Config(format!(
                "mapping {} is smaller than a queue header",
                cfg.flink()
            )));
        }
        debug!("opened queue mapping {} ({} bytes)", cfg.flink(), shmem.len());
        let base = shmem.as_ptr();
        // SAFETY: the creator constructed the header at the base of the
        // mapping, with the ring right behind it.
        let queue = unsafe { FramedQueue::attach(base, base.add(FramedQueue::header_size())) };
        Ok(SharedQueue {
            queue,
            _shmem: shmem,
        })
    }
}

impl Deref for SharedQueue {
    type Target = FramedQueue;

    fn deref(&self) -> &FramedQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    static TEST_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn test_config(dir: &TempDir, capacity: usize) -> QueueConfig {
        let id = TEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        QueueConfig::builder()
            .data_dir(dir.path().to_str().expect("tempdir path is not UTF-8"))
            .flink_name(format!("bytefifo-test-{}-{}", std::process::id(), id))
            .capacity_bytes(capacity)
            .build()
            .expect("test config must validate")
    }

    #[test]
    fn create_then_open_shares_one_queue() -> Result<(), QueueError> {
        let dir = tempdir().expect("failed to create tempdir");
        let cfg = test_config(&dir, 256);

        let owner = SharedQueue::create(&cfg)?;
        let peer = SharedQueue::open(&cfg)?;

        owner.put(&[&b"ping"[..]], false, Duration::ZERO)?;
        assert_eq!(peer.len(), 1);

        let mut out = [0u8; 64];
        let drained = peer.get(&mut out, 1, 64, false, Duration::ZERO)?;
        assert_eq!(drained.messages_read, 1);
        assert_eq!(&out[8..drained.bytes_read], b"ping");
        assert!(owner.is_empty());
        Ok(())
    }

    #[test]
    fn create_falls_back_to_open_when_link_exists() -> Result<(), QueueError> {
        let dir = tempdir().expect("failed to create tempdir");
        let cfg = test_config(&dir, 256);

        let owner = SharedQueue::create(&cfg)?;
        owner.put(&[&b"kept"[..]], false, Duration::ZERO)?;

        // A second create must attach instead of re-constructing; the queued
        // frame proves the header survived.
        let second = SharedQueue::create(&cfg)?;
        assert_eq!(second.len(), 1);
        Ok(())
    }

    #[test]
    fn builder_rejects_tiny_capacity() {
        let result = QueueConfig::builder().capacity_bytes(8).build();
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn builder_rejects_empty_flink_name() {
        let result = QueueConfig::builder().flink_name("").build();
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn builder_fills_in_defaults() -> Result<(), QueueError> {
        let cfg = QueueConfig::builder().build()?;
        assert_eq!(cfg.data_dir, ".");
        assert_eq!(cfg.flink_name, QUEUE_FILE_NAME);
        assert_eq!(cfg.capacity_bytes, DEFAULT_CAPACITY_BYTES);
        Ok(())
    }
}
