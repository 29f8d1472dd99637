//! Settings file for the `chainfeed` binary.
//!
//! ```json
//! {
//!   "database": "./chainfeed.db",
//!   "nodes": ["https://api.hive.blog"],
//!   "watcher": { "app_ids": ["hive.micro"], "bulk_threshold": 50 },
//!   "log": { "level": "info", "json": false }
//! }
//! ```
//!
//! Every key is optional. Command-line flags and `CHAINFEED_*` environment
//! variables override the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use chainfeed_core::config::WatcherConfig;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub database: Option<String>,
    pub nodes: Vec<String>,
    pub watcher: WatcherConfig,
    pub log: LogConfig,
}

impl FileConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}
