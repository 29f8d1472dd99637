//! The durable record store consumed by the writer, loop and reconciler.

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::FeedError;
use crate::types::{BlockRange, FeedStatus, Record};

/// Result of a batch commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Rows actually created.
    pub inserted: usize,
    /// Rows skipped because the identifier already existed.
    pub duplicates: usize,
}

/// Result of an identifier upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Identifier rewritten; `cascaded` replies now point at the new value.
    Upgraded { cascaded: u64 },
    /// Another row already owns the new identifier; nothing changed.
    Collision,
    /// No row has the old identifier (already upgraded concurrently).
    Missing,
}

/// Storage backend for ingested records and the checkpoint.
///
/// Implemented by `InMemoryStorage` and `SqliteStorage` in `chainfeed-storage`.
#[async_trait]
pub trait FeedStore: CheckpointStore {
    /// Returns `true` if a record with `identifier` exists.
    async fn contains(&self, identifier: &str) -> Result<bool, FeedError>;

    /// Insert `records` and advance the checkpoint in one transaction.
    ///
    /// Records whose identifier already exists are skipped. A regressing
    /// checkpoint aborts the whole batch.
    async fn commit_batch(
        &self,
        records: &[Record],
        checkpoint: Checkpoint,
    ) -> Result<CommitOutcome, FeedError>;

    /// Fetch a record by identifier.
    async fn record(&self, identifier: &str) -> Result<Option<Record>, FeedError>;

    /// All records of one block, in insertion order.
    async fn records_in_block(&self, block_number: u64) -> Result<Vec<Record>, FeedError>;

    /// Most recent records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Record>, FeedError>;

    /// Records with a provisional identifier inside `range`, ordered by
    /// block then insertion.
    async fn provisional_records(
        &self,
        range: BlockRange,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, FeedError>;

    /// Rewrite `old` to `new` and every `reply_target == old`, atomically.
    async fn upgrade_identifier(&self, old: &str, new: &str) -> Result<UpgradeOutcome, FeedError>;

    /// `{record_count, last_block}` for health checks.
    async fn status(&self) -> Result<FeedStatus, FeedError>;
}
