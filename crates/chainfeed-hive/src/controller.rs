//! Owns a running watcher task and its stop signal.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use chainfeed_core::error::FeedError;

use crate::transport::LedgerTransport;
use crate::watch_loop::BlockWatcher;

/// Starts and stops a [`BlockWatcher`] on the Tokio runtime.
#[derive(Default)]
pub struct WatcherController {
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<Result<(), FeedError>>>,
}

impl WatcherController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `watcher`. Returns `false` if one is already running.
    pub fn start<T>(&mut self, mut watcher: BlockWatcher<T>) -> bool
    where
        T: LedgerTransport + 'static,
    {
        if self.is_running() {
            return false;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { watcher.run(stop_rx).await });
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        info!("watcher task started");
        true
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signal stop and wait up to `timeout` for the task to exit.
    ///
    /// Returns the task's own result. If it does not exit in time it is
    /// aborted; anything it had not committed is fetched again on the next
    /// start.
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), FeedError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => {
                info!("watcher task stopped");
                result
            }
            Ok(Err(join_err)) => Err(FeedError::Other(format!("watcher task failed: {join_err}"))),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "watcher did not stop in time, aborting");
                handle.abort();
                Err(FeedError::Timeout {
                    ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Wait for the task to finish on its own (fatal error or stop signal).
    ///
    /// Cancellation-safe: dropping the future leaves the task running.
    pub async fn join(&mut self) -> Result<(), FeedError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        let joined = handle.await;
        self.handle = None;
        self.stop_tx = None;
        match joined {
            Ok(result) => result,
            Err(join_err) => Err(FeedError::Other(format!("watcher task failed: {join_err}"))),
        }
    }
}
