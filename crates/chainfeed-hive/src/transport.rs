//! The ledger access seam used by the watch loop and reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chainfeed_core::error::FeedError;

use crate::operation::RawOperation;

/// One transaction of a fully fetched block.
#[derive(Debug, Clone)]
pub struct FullTransaction {
    /// Transaction hash. Nodes occasionally omit it.
    pub identifier: Option<String>,
    pub operations: Vec<RawOperation>,
}

/// A block fetched on its own, with transaction hashes.
#[derive(Debug, Clone)]
pub struct FullBlock {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<FullTransaction>,
}

/// An operation inside a bulk window, with its position but no hash.
#[derive(Debug, Clone)]
pub struct PositionedOperation {
    pub tx_index: u32,
    pub op_index: u32,
    pub operation: RawOperation,
}

/// A block from a bulk window.
#[derive(Debug, Clone)]
pub struct BulkBlock {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    pub operations: Vec<PositionedOperation>,
}

/// An operation from the ops-in-block lookup.
#[derive(Debug, Clone)]
pub struct IdentifiedOperation {
    pub operation: RawOperation,
    pub transaction_identifier: Option<String>,
}

/// Read access to the ledger.
///
/// Implementations must be cancellation-safe: the loop may drop a pending
/// call when asked to stop.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Current head block number.
    async fn head_block_number(&self) -> Result<u64, FeedError>;

    /// A single block with transaction hashes; `None` if not produced yet.
    async fn get_block(&self, number: u64) -> Result<Option<FullBlock>, FeedError>;

    /// Up to `count` consecutive blocks starting at `start`, without hashes.
    /// May return fewer blocks than requested.
    async fn get_bulk_window(&self, start: u64, count: u64) -> Result<Vec<BulkBlock>, FeedError>;

    /// Operations of one block, each tagged with its transaction hash.
    async fn get_ops_with_identifiers(
        &self,
        number: u64,
    ) -> Result<Vec<IdentifiedOperation>, FeedError>;
}

#[async_trait]
impl<T: LedgerTransport + ?Sized> LedgerTransport for Arc<T> {
    async fn head_block_number(&self) -> Result<u64, FeedError> {
        (**self).head_block_number().await
    }

    async fn get_block(&self, number: u64) -> Result<Option<FullBlock>, FeedError> {
        (**self).get_block(number).await
    }

    async fn get_bulk_window(&self, start: u64, count: u64) -> Result<Vec<BulkBlock>, FeedError> {
        (**self).get_bulk_window(start, count).await
    }

    async fn get_ops_with_identifiers(
        &self,
        number: u64,
    ) -> Result<Vec<IdentifiedOperation>, FeedError> {
        (**self).get_ops_with_identifiers(number).await
    }
}
