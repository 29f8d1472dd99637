//! Fluent builder for watchers.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainfeed_hive::WatcherBuilder;
//!
//! let config = WatcherBuilder::new()
//!     .app_id("hive.micro")
//!     .bulk_threshold(100)
//!     .poll_interval_ms(3000)
//!     .build_config();
//! ```

use std::sync::Arc;

use chainfeed_core::config::WatcherConfig;
use chainfeed_core::error::FeedError;
use chainfeed_core::resolver::AmbiguityPolicy;
use chainfeed_core::store::FeedStore;

use crate::transport::LedgerTransport;
use crate::watch_loop::BlockWatcher;

/// Fluent builder for `WatcherConfig` and `BlockWatcher`.
#[derive(Default)]
pub struct WatcherBuilder {
    config: WatcherConfig,
    app_ids_set: bool,
}

impl WatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration (e.g. loaded from a file).
    pub fn from_config(config: WatcherConfig) -> Self {
        Self {
            config,
            app_ids_set: false,
        }
    }

    /// Add an application id. The first call replaces the default list.
    pub fn app_id(mut self, id: impl Into<String>) -> Self {
        if !self.app_ids_set {
            self.config.app_ids.clear();
            self.app_ids_set = true;
        }
        self.config.app_ids.push(id.into());
        self
    }

    pub fn bulk_threshold(mut self, blocks: u64) -> Self {
        self.config.bulk_threshold = blocks;
        self
    }

    pub fn max_bulk_window(mut self, blocks: u64) -> Self {
        self.config.max_bulk_window = blocks;
        self
    }

    pub fn step_batch(mut self, blocks: u64) -> Self {
        self.config.step_batch = blocks;
        self
    }

    /// Blocks per commit while catching up.
    pub fn bulk_commit_blocks(mut self, blocks: u64) -> Self {
        self.config.bulk_commit_blocks = blocks;
        self
    }

    pub fn initial_lookback(mut self, blocks: u64) -> Self {
        self.config.initial_lookback = blocks;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn backoff_ms(mut self, ms: u64) -> Self {
        self.config.backoff_ms = ms;
        self
    }

    pub fn ambiguity(mut self, policy: AmbiguityPolicy) -> Self {
        self.config.ambiguity = policy;
        self
    }

    pub fn build_config(self) -> WatcherConfig {
        self.config
    }

    /// Validate the configuration and create the watcher.
    pub fn build<T: LedgerTransport>(
        self,
        transport: T,
        store: Arc<dyn FeedStore>,
    ) -> Result<BlockWatcher<T>, FeedError> {
        BlockWatcher::new(self.config, transport, store)
    }
}
