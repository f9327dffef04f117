//! Latest-value frame cache for one mode.
//!
//! A single pipeline writes, any number of readers take snapshots. Values are
//! published whole through a `watch` channel: a reader sees either the previous
//! or the new value, never a mix, and never waits for a pending write beyond
//! the channel's short internal lock. Frame bytes are immutable `Bytes`, so a
//! snapshot handed out can never change under its reader.

use crate::config::ModeKind;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;

/// Error value stored in a slot when a tick fails
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("processing failed: {0}")]
    Processing(String),
    #[error("camera stopped")]
    Stopped,
}

/// Why a read produced no bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("no frame yet")]
    NotReady,
    #[error("mode {0} is not configured")]
    UnknownMode(ModeKind),
    #[error(transparent)]
    Failed(#[from] FrameError),
}

/// Content of a slot at one point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Snapshot {
    /// Nothing produced yet
    #[default]
    NotReady,
    Frame(Bytes),
    Failed(FrameError),
}

impl Snapshot {
    pub fn is_ready(&self) -> bool {
        !matches!(self, Snapshot::NotReady)
    }

    pub fn into_result(self) -> Result<Bytes, ReadError> {
        match self {
            Snapshot::NotReady => Err(ReadError::NotReady),
            Snapshot::Frame(bytes) => Ok(bytes),
            Snapshot::Failed(err) => Err(ReadError::Failed(err)),
        }
    }

    fn is_sealed(&self) -> bool {
        matches!(self, Snapshot::Failed(FrameError::Stopped))
    }
}

#[derive(Debug)]
pub struct CacheSlot {
    tx: watch::Sender<Snapshot>,
}

impl Default for CacheSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::NotReady);
        Self { tx }
    }

    /// Replace the slot content. Returns false when the slot is sealed.
    pub fn write(&self, value: Result<Bytes, FrameError>) -> bool {
        let next = match value {
            Ok(bytes) => Snapshot::Frame(bytes),
            Err(err) => Snapshot::Failed(err),
        };
        self.tx.send_if_modified(|current| {
            if current.is_sealed() {
                return false;
            }
            *current = next;
            true
        })
    }

    /// Most recently completed value
    pub fn read(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Receiver notified after every write, for consumers that follow the slot
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Store [`FrameError::Stopped`] permanently; later writes are ignored.
    pub fn seal(&self) {
        self.tx.send_if_modified(|current| {
            if current.is_sealed() {
                return false;
            }
            *current = Snapshot::Failed(FrameError::Stopped);
            true
        });
    }

    pub fn is_sealed(&self) -> bool {
        self.tx.borrow().is_sealed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_not_ready_before_first_write() {
        let slot = CacheSlot::new();
        assert_eq!(slot.read(), Snapshot::NotReady);
        assert_eq!(slot.read().into_result(), Err(ReadError::NotReady));
    }

    #[test]
    fn test_error_then_success_clears_error() {
        let slot = CacheSlot::new();
        slot.write(Err(FrameError::Processing("encode".into())));
        assert!(matches!(slot.read(), Snapshot::Failed(FrameError::Processing(_))));

        slot.write(Ok(Bytes::from_static(b"frame")));
        assert_eq!(slot.read().into_result().unwrap(), Bytes::from_static(b"frame"));
    }

    #[test]
    fn test_seal_ignores_later_writes() {
        let slot = CacheSlot::new();
        slot.write(Ok(Bytes::from_static(b"frame")));
        slot.seal();
        assert!(slot.is_sealed());
        assert!(!slot.write(Ok(Bytes::from_static(b"late"))));
        assert_eq!(
            slot.read().into_result(),
            Err(ReadError::Failed(FrameError::Stopped))
        );
    }

    #[test]
    fn test_snapshot_survives_later_write() {
        let slot = CacheSlot::new();
        slot.write(Ok(Bytes::from(vec![1u8; 4])));
        let held = slot.read();
        slot.write(Ok(Bytes::from(vec![2u8; 8])));
        assert_eq!(held, Snapshot::Frame(Bytes::from(vec![1u8; 4])));
    }

    #[test]
    fn test_concurrent_reads_never_tear() {
        let slot = Arc::new(CacheSlot::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let slot = slot.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for i in 0..5_000 {
                    let marker = if i % 2 == 0 { vec![0xAA; 16] } else { vec![0x55; 4096] };
                    slot.write(Ok(Bytes::from(marker)));
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let slot = slot.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    let mut observed = 0usize;
                    while !done.load(Ordering::SeqCst) {
                        if let Snapshot::Frame(bytes) = slot.read() {
                            let valid = (bytes.len() == 16 && bytes.iter().all(|&b| b == 0xAA))
                                || (bytes.len() == 4096 && bytes.iter().all(|&b| b == 0x55));
                            assert!(valid, "torn read of length {}", bytes.len());
                            observed += 1;
                        }
                    }
                    observed
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[tokio::test]
    async fn test_subscribe_notified_on_write() {
        let slot = CacheSlot::new();
        let mut rx = slot.subscribe();
        slot.write(Ok(Bytes::from_static(b"a")));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Snapshot::Frame(Bytes::from_static(b"a")));
    }
}
