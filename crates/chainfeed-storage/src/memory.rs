//! In-memory storage backend.
//!
//! Holds records and the checkpoint in RAM. Useful for tests and short-lived
//! watchers that don't need persistence. Commits are atomic under a single
//! mutex, matching the transactional contract of the SQLite backend.

use async_trait::async_trait;
use std::sync::Mutex;

use chainfeed_core::checkpoint::{Checkpoint, CheckpointStore};
use chainfeed_core::error::FeedError;
use chainfeed_core::store::{CommitOutcome, FeedStore, UpgradeOutcome};
use chainfeed_core::types::{BlockRange, FeedStatus, Record};

#[derive(Default)]
struct Inner {
    checkpoint: Option<Checkpoint>,
    /// Insertion order doubles as the row id.
    records: Vec<Record>,
}

impl Inner {
    fn position(&self, identifier: &str) -> Option<usize> {
        self.records.iter().position(|r| r.identifier == identifier)
    }

    fn check_advance(&self, checkpoint: &Checkpoint) -> Result<(), FeedError> {
        match self.checkpoint {
            Some(current) if checkpoint.last_block < current.last_block => {
                Err(FeedError::CheckpointRegression {
                    current: current.last_block,
                    attempted: checkpoint.last_block,
                })
            }
            _ => Ok(()),
        }
    }
}

/// In-memory feed storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, in insertion order.
    pub fn all_records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned lock only means a test panicked mid-commit
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, FeedError> {
        Ok(self.lock().checkpoint)
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), FeedError> {
        let mut inner = self.lock();
        inner.check_advance(&checkpoint)?;
        inner.checkpoint = Some(checkpoint);
        Ok(())
    }
}

#[async_trait]
impl FeedStore for InMemoryStorage {
    async fn contains(&self, identifier: &str) -> Result<bool, FeedError> {
        Ok(self.lock().position(identifier).is_some())
    }

    async fn commit_batch(
        &self,
        records: &[Record],
        checkpoint: Checkpoint,
    ) -> Result<CommitOutcome, FeedError> {
        let mut inner = self.lock();
        inner.check_advance(&checkpoint)?;

        let mut outcome = CommitOutcome::default();
        for record in records {
            if inner.position(&record.identifier).is_some() {
                outcome.duplicates += 1;
            } else {
                inner.records.push(record.clone());
                outcome.inserted += 1;
            }
        }
        inner.checkpoint = Some(checkpoint);
        Ok(outcome)
    }

    async fn record(&self, identifier: &str) -> Result<Option<Record>, FeedError> {
        let inner = self.lock();
        Ok(inner.position(identifier).map(|i| inner.records[i].clone()))
    }

    async fn records_in_block(&self, block_number: u64) -> Result<Vec<Record>, FeedError> {
        Ok(self
            .lock()
            .records
            .iter()
            .filter(|r| r.block_number == block_number)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Record>, FeedError> {
        let mut records = self.lock().records.clone();
        // stable sort keeps later inserts ahead of earlier ones at equal timestamps
        records.reverse();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    async fn provisional_records(
        &self,
        range: BlockRange,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, FeedError> {
        let mut rows: Vec<Record> = self
            .lock()
            .records
            .iter()
            .filter(|r| range.contains(r.block_number) && r.is_provisional())
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.block_number);
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn upgrade_identifier(&self, old: &str, new: &str) -> Result<UpgradeOutcome, FeedError> {
        let mut inner = self.lock();
        if inner.position(new).is_some() {
            return Ok(UpgradeOutcome::Collision);
        }
        let Some(idx) = inner.position(old) else {
            return Ok(UpgradeOutcome::Missing);
        };
        inner.records[idx].identifier = new.to_string();

        let mut cascaded = 0;
        for r in inner.records.iter_mut() {
            if r.reply_target.as_deref() == Some(old) {
                r.reply_target = Some(new.to_string());
                cascaded += 1;
            }
        }
        Ok(UpgradeOutcome::Upgraded { cascaded })
    }

    async fn status(&self) -> Result<FeedStatus, FeedError> {
        let inner = self.lock();
        Ok(FeedStatus {
            record_count: inner.records.len() as u64,
            last_block: inner.checkpoint.map_or(0, |c| c.last_block),
        })
    }
}
