//! chainfeed-hive — Hive ledger ingestion for ChainFeed.
//!
//! Turns `custom_json` posts into records with durable identifiers:
//!
//! - [`HiveRpcClient`]: JSON-RPC transport with retry and node failover
//! - [`Extractor`]: validates and decodes post operations
//! - [`BlockWatcher`]: the head-following loop (step and bulk modes)
//! - [`WatcherController`]: owns the running loop and its stop signal
//! - [`Reconciler`]: upgrades provisional identifiers offline

pub mod builder;
pub mod candidates;
pub mod controller;
pub mod extractor;
pub mod inspect;
pub mod operation;
pub mod pipeline;
pub mod reconcile;
pub mod rpc;
pub mod transport;
pub mod watch_loop;

pub use builder::WatcherBuilder;
pub use controller::WatcherController;
pub use extractor::{Extraction, Extractor, OperationContext, Rejection};
pub use inspect::{inspect_block, BlockInspection};
pub use operation::RawOperation;
pub use reconcile::{PlannedUpgrade, ReconcileOptions, ReconcileReport, Reconciler};
pub use rpc::{HiveRpcClient, HiveRpcConfig};
pub use transport::{
    BulkBlock, FullBlock, FullTransaction, IdentifiedOperation, LedgerTransport, PositionedOperation,
};
pub use watch_loop::{BlockWatcher, TickReport, WatcherStats};
