//! Watcher configuration and state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::resolver::AmbiguityPolicy;

/// Configuration for a watcher instance.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// `custom_json` ids this deployment ingests.
    pub app_ids: Vec<String>,
    /// Backlog (in blocks) at or above which bulk mode is used.
    pub bulk_threshold: u64,
    /// Largest bulk window requested in one call.
    pub max_bulk_window: u64,
    /// Extra blocks processed per step iteration (`next..=next + step_batch`).
    pub step_batch: u64,
    /// Blocks per transaction inside a bulk window.
    pub bulk_commit_blocks: u64,
    /// On first run, how far behind head to start.
    pub initial_lookback: u64,
    /// Sleep between iterations when caught up (milliseconds).
    pub poll_interval_ms: u64,
    /// Sleep after a transient error (milliseconds).
    pub backoff_ms: u64,
    /// Duplicate `(author, content)` handling during resolution.
    pub ambiguity: AmbiguityPolicy,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            app_ids: vec!["hive.micro".into()],
            bulk_threshold: 50,
            max_bulk_window: 1000,
            step_batch: 50,
            bulk_commit_blocks: 25,
            initial_lookback: 20,
            poll_interval_ms: 2500,
            backoff_ms: 2000,
            ambiguity: AmbiguityPolicy::InOrder,
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Reject configurations the loop can not run with.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.app_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(FeedError::Config("at least one app id is required".into()));
        }
        if self.max_bulk_window == 0 {
            return Err(FeedError::Config("max_bulk_window must be > 0".into()));
        }
        if self.bulk_commit_blocks == 0 {
            return Err(FeedError::Config("bulk_commit_blocks must be > 0".into()));
        }
        Ok(())
    }
}

/// Runtime state of the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatcherState {
    /// Caught up with head; sleeping.
    Idle,
    /// Small backlog; full fetch one block at a time.
    Stepping,
    /// Large backlog; bulk windows.
    CatchingUp,
    /// Waiting out a transient error.
    Backoff,
}

impl std::fmt::Display for WatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Stepping => write!(f, "stepping"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Backoff => write!(f, "backoff"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: WatcherConfig =
            serde_json::from_str(r#"{"app_ids": ["my.app"], "ambiguity": "provisional"}"#).unwrap();
        assert_eq!(cfg.app_ids, vec!["my.app".to_string()]);
        assert_eq!(cfg.ambiguity, AmbiguityPolicy::Provisional);
        assert_eq!(cfg.bulk_threshold, 50);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(2500));
    }

    #[test]
    fn validate_rejects_empty_app_ids() {
        let cfg = WatcherConfig {
            app_ids: vec![" ".into()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        assert!(WatcherConfig::default().validate().is_ok());
    }
}
