//! Checkpoint manager: the durable "last fully ingested block" pointer.
//!
//! There is exactly one checkpoint per store. It starts at 0, only moves
//! forward, and is advanced in the same transaction as the records of the
//! blocks it accounts for (see [`crate::store::FeedStore::commit_batch`]).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// The persisted checkpoint row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last block whose records are fully committed.
    pub last_block: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn at(last_block: u64) -> Self {
        Self {
            last_block,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Trait for loading and saving the checkpoint row.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint, `None` if the row was never created.
    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, FeedError>;

    /// Upsert the checkpoint.
    ///
    /// Must fail with [`FeedError::CheckpointRegression`] if the stored
    /// `last_block` is greater than `checkpoint.last_block`.
    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), FeedError>;
}

/// Caches the current checkpoint and guards monotonicity before a commit.
pub struct CheckpointManager<S: CheckpointStore + ?Sized> {
    store: Arc<S>,
    current: Option<u64>,
}

impl<S: CheckpointStore + ?Sized> CheckpointManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Read the checkpoint from the store, creating it at 0 on first use.
    pub async fn read(&mut self) -> Result<u64, FeedError> {
        let last = match self.store.load_checkpoint().await? {
            Some(cp) => cp.last_block,
            None => {
                tracing::info!("no checkpoint found, initializing at block 0");
                self.store.save_checkpoint(Checkpoint::at(0)).await?;
                0
            }
        };
        self.current = Some(last);
        Ok(last)
    }

    /// Last value read or committed through this manager.
    pub fn last_block(&self) -> Option<u64> {
        self.current
    }

    /// Build the checkpoint a batch commit should carry.
    ///
    /// Rejects a move backwards before anything reaches the store.
    pub fn prepare(&self, new_last_block: u64) -> Result<Checkpoint, FeedError> {
        match self.current {
            Some(current) if new_last_block < current => Err(FeedError::CheckpointRegression {
                current,
                attempted: new_last_block,
            }),
            _ => Ok(Checkpoint::at(new_last_block)),
        }
    }

    /// Record that `checkpoint` was committed alongside its batch.
    pub fn mark_committed(&mut self, checkpoint: Checkpoint) {
        self.current = Some(checkpoint.last_block);
    }

    /// Advance the checkpoint on its own (no records in the range).
    pub async fn advance(&mut self, new_last_block: u64) -> Result<(), FeedError> {
        let cp = self.prepare(new_last_block)?;
        self.store.save_checkpoint(cp).await?;
        self.mark_committed(cp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryCheckpointStore {
        row: Mutex<Option<Checkpoint>>,
    }

    #[async_trait]
    impl CheckpointStore for MemoryCheckpointStore {
        async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, FeedError> {
            Ok(*self.row.lock().unwrap())
        }

        async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), FeedError> {
            let mut row = self.row.lock().unwrap();
            if let Some(current) = *row {
                if checkpoint.last_block < current.last_block {
                    return Err(FeedError::CheckpointRegression {
                        current: current.last_block,
                        attempted: checkpoint.last_block,
                    });
                }
            }
            *row = Some(checkpoint);
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_read_initializes_at_zero() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mut mgr = CheckpointManager::new(store.clone());

        assert!(store.load_checkpoint().await.unwrap().is_none());
        assert_eq!(mgr.read().await.unwrap(), 0);
        // persisted, not just cached
        assert_eq!(store.load_checkpoint().await.unwrap().unwrap().last_block, 0);
    }

    #[tokio::test]
    async fn advance_is_monotonic() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mut mgr = CheckpointManager::new(store.clone());
        mgr.read().await.unwrap();

        mgr.advance(100).await.unwrap();
        mgr.advance(100).await.unwrap(); // equal is fine
        let err = mgr.advance(99).await.unwrap_err();
        assert!(matches!(
            err,
            FeedError::CheckpointRegression {
                current: 100,
                attempted: 99
            }
        ));
        assert_eq!(mgr.read().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn stale_manager_is_rejected_by_store() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let mut stale = CheckpointManager::new(store.clone());
        stale.read().await.unwrap();

        let mut fresh = CheckpointManager::new(store.clone());
        fresh.read().await.unwrap();
        fresh.advance(500).await.unwrap();

        // The stale manager still believes we are at 0.
        assert!(stale.advance(10).await.is_err());
        assert_eq!(store.load_checkpoint().await.unwrap().unwrap().last_block, 500);
    }
}
