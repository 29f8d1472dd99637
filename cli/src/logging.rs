//! Log output for the `chainfeed` binary.
//!
//! Logs always go to stderr; stdout is reserved for command output
//! (`status` and `recent` print JSON there).

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base filter: a level, or any `EnvFilter` directive list.
    pub level: String,
    /// Per-crate overrides, e.g. `{"chainfeed-hive": "debug"}`.
    pub components: BTreeMap<String, String>,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.components
                    .iter()
                    .map(|(krate, level)| format!("{}={level}", krate.replace('-', "_"))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Unparsable directives are dropped; an empty filter means `info`.
    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(self.directives())
    }
}

/// Install the global subscriber.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let (text, json) = if config.json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(text)
        .with(json)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}
