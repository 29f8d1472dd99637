//! chainfeed-core — foundation for the crash-safe ledger post ingester.
//!
//! # Architecture
//!
//! ```text
//! WatchLoop (chainfeed-hive)
//!     ├── FetchStrategy       (full vs bulk, from the backlog)
//!     ├── Extractor           (raw op → CandidateRecord, chainfeed-hive)
//!     ├── IdentifierResolver  (tx id / content match / positional / provisional)
//!     ├── IngestionWriter     (dedup + batch commit)
//!     ├── CheckpointManager   (monotonic last_block)
//!     └── FeedStore backend   (memory / SQLite)
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod resolver;
pub mod store;
pub mod strategy;
pub mod types;
pub mod writer;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore};
pub use config::{WatcherConfig, WatcherState};
pub use error::FeedError;
pub use resolver::{AmbiguityPolicy, BlockCandidates, IdentifierResolver, Resolution};
pub use store::{CommitOutcome, FeedStore, UpgradeOutcome};
pub use strategy::{FetchPlan, FetchStrategy};
pub use types::{BlockRange, CandidateRecord, ContentKey, FeedStatus, OperationPosition, ProvisionalId, Record};
pub use writer::IngestionWriter;
