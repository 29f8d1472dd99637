//! Ingestion writer — stages resolved records and commits them together
//! with the checkpoint.
//!
//! Three layers keep ingestion idempotent:
//! - a per-batch seen set catches ids produced twice within the batch,
//! - a lookup against the store catches records committed by earlier runs,
//! - the store's unique key catches anything that races past both.

use std::collections::HashSet;

use crate::checkpoint::Checkpoint;
use crate::error::FeedError;
use crate::store::{CommitOutcome, FeedStore};
use crate::types::Record;

/// Stages records for a single batch. Create one per batch.
pub struct IngestionWriter<'a, S: FeedStore + ?Sized> {
    store: &'a S,
    seen: HashSet<String>,
    pending: Vec<Record>,
}

impl<'a, S: FeedStore + ?Sized> IngestionWriter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            seen: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Stage `record` for insertion.
    ///
    /// Returns `false` if it is a duplicate of something already staged or
    /// already stored. The row becomes durable on [`commit`](Self::commit).
    pub async fn write(&mut self, record: Record) -> Result<bool, FeedError> {
        if self.seen.contains(&record.identifier) {
            tracing::debug!(id = %record.identifier, "duplicate within batch, skipped");
            return Ok(false);
        }
        if self.store.contains(&record.identifier).await? {
            tracing::debug!(id = %record.identifier, "already stored, skipped");
            self.seen.insert(record.identifier);
            return Ok(false);
        }
        self.seen.insert(record.identifier.clone());
        self.pending.push(record);
        Ok(true)
    }

    /// Number of records staged so far.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Commit staged records and `checkpoint` in one transaction.
    pub async fn commit(self, checkpoint: Checkpoint) -> Result<CommitOutcome, FeedError> {
        let outcome = self.store.commit_batch(&self.pending, checkpoint).await?;
        if outcome.duplicates > 0 {
            tracing::debug!(
                duplicates = outcome.duplicates,
                "unique key absorbed concurrent inserts"
            );
        }
        Ok(outcome)
    }
}
