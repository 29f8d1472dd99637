//! chainfeed-storage — durable store backends for ChainFeed.
//!
//! # Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | `InMemoryStorage` | `memory` (default) | Testing, ephemeral watchers |
//! | `SqliteStorage` | `sqlite` | Single-node production deployments |
//!
//! Both implement [`chainfeed_core::FeedStore`]: records and the checkpoint
//! are committed together, or not at all.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
