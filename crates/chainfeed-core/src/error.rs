//! Error types for the chainfeed pipeline.

use thiserror::Error;

/// Errors that can occur while watching, ingesting or reconciling.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Malformed ledger response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The store is unusable (schema missing, database unreadable, ...).
    #[error("Fatal storage error: {0}")]
    Fatal(String),

    #[error("Checkpoint regression: current last_block is {current}, refused to move to {attempted}")]
    CheckpointRegression { current: u64, attempted: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl FeedError {
    /// Returns `true` if the watcher should back off and retry.
    ///
    /// Nothing has been committed when a transient error surfaces, so the
    /// same range is simply fetched again after the delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::Timeout { .. } | Self::Decode(_) | Self::Storage(_)
        )
    }

    /// Returns `true` if the error must be surfaced to process supervision.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Fatal(_) | Self::CheckpointRegression { .. } | Self::Config(_)
        )
    }
}
