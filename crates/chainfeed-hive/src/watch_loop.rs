//! The watch loop: follows the ledger head and ingests posts.
//!
//! # Modes
//!
//! - **Stepping**: backlog below `bulk_threshold`. Each block is fetched in
//!   full and committed on its own, records and checkpoint together.
//! - **Catching up**: a bulk window of up to `max_bulk_window` blocks,
//!   committed every `bulk_commit_blocks` blocks. Transaction ids are
//!   recovered per block; misses are stored under provisional ids.
//!
//! Any bulk error falls back to stepping the same range. A transient error
//! that survives the fallback sends the loop into backoff with the
//! checkpoint unmoved; the range is fetched again afterwards. Fatal errors
//! end the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use chainfeed_core::checkpoint::CheckpointManager;
use chainfeed_core::config::{WatcherConfig, WatcherState};
use chainfeed_core::error::FeedError;
use chainfeed_core::resolver::IdentifierResolver;
use chainfeed_core::store::FeedStore;
use chainfeed_core::strategy::{FetchPlan, FetchStrategy};
use chainfeed_core::writer::IngestionWriter;

use crate::extractor::Extractor;
use crate::pipeline::{resolve_bulk_block, resolve_full_block, BlockOutcome};
use crate::transport::LedgerTransport;

/// Running totals since the watcher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub blocks: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub provisional: u64,
    pub rejected: u64,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub head: u64,
    /// The plan actually executed (the fallback, if bulk failed).
    pub plan: FetchPlan,
    /// Checkpoint after the iteration.
    pub last_block: u64,
}

impl TickReport {
    pub fn caught_up(&self) -> bool {
        self.last_block >= self.head
    }
}

/// Follows the ledger and writes posts into a [`FeedStore`].
pub struct BlockWatcher<T> {
    config: WatcherConfig,
    transport: T,
    store: Arc<dyn FeedStore>,
    checkpoint: CheckpointManager<dyn FeedStore>,
    extractor: Extractor,
    resolver: IdentifierResolver,
    strategy: FetchStrategy,
    state: WatcherState,
    stats: WatcherStats,
    stop: Option<watch::Receiver<bool>>,
}

impl<T: LedgerTransport> BlockWatcher<T> {
    pub fn new(
        config: WatcherConfig,
        transport: T,
        store: Arc<dyn FeedStore>,
    ) -> Result<Self, FeedError> {
        config.validate()?;
        Ok(Self {
            extractor: Extractor::from_config(&config),
            resolver: IdentifierResolver::new(config.ambiguity),
            strategy: FetchStrategy::new(&config),
            checkpoint: CheckpointManager::new(Arc::clone(&store)),
            state: WatcherState::Idle,
            stats: WatcherStats::default(),
            stop: None,
            config,
            transport,
            store,
        })
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn stats(&self) -> WatcherStats {
        self.stats
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Run until `stop` turns `true` (or its sender is dropped).
    ///
    /// Returns `Err` only for fatal errors.
    pub async fn run(&mut self, stop: watch::Receiver<bool>) -> Result<(), FeedError> {
        self.stop = Some(stop.clone());
        let result = self.run_inner(stop).await;
        self.stop = None;
        result
    }

    async fn run_inner(&mut self, mut stop: watch::Receiver<bool>) -> Result<(), FeedError> {
        let last = self.checkpoint.read().await?;
        info!(
            last_block = last,
            app_ids = ?self.config.app_ids,
            "watcher starting"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            let delay = match self.tick().await {
                Ok(report) => match report.plan {
                    // keep draining the backlog without pausing
                    FetchPlan::Bulk { .. } if !report.caught_up() => None,
                    _ => Some(self.config.poll_interval()),
                },
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "watcher stopping on fatal error");
                    return Err(e);
                }
                Err(e) => {
                    self.state = WatcherState::Backoff;
                    warn!(
                        error = %e,
                        backoff_ms = self.config.backoff_ms,
                        "transient error, backing off"
                    );
                    Some(self.config.backoff())
                }
            };

            if let Some(delay) = delay {
                if sleep_or_stop(&mut stop, delay).await {
                    break;
                }
                if self.state == WatcherState::Backoff {
                    self.state = WatcherState::Idle;
                }
            }
        }

        info!(stats = ?self.stats, "watcher stopped");
        Ok(())
    }

    /// One iteration: read head, pick a plan, ingest.
    pub async fn tick(&mut self) -> Result<TickReport, FeedError> {
        let last = match self.checkpoint.last_block() {
            Some(last) => last,
            None => self.checkpoint.read().await?,
        };
        let head = self.transport.head_block_number().await?;
        let plan = self.strategy.plan(last, head);

        let executed = match plan {
            FetchPlan::Idle => {
                self.state = WatcherState::Idle;
                plan
            }
            FetchPlan::Step { from, to } => {
                self.state = WatcherState::Stepping;
                self.ingest_step(from, to).await?;
                plan
            }
            FetchPlan::Bulk { start, count } => {
                self.state = WatcherState::CatchingUp;
                info!(
                    backlog = self.strategy.backlog(last, head),
                    start,
                    count,
                    "bulk mode"
                );
                match self.ingest_bulk(start, count).await {
                    Ok(()) => plan,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        let Some(fallback) = self.strategy.fallback(plan, head) else {
                            return Err(e);
                        };
                        warn!(error = %e, "bulk fetch failed, stepping instead");
                        self.state = WatcherState::Stepping;
                        if let FetchPlan::Step { from, to } = fallback {
                            // resume after whatever the bulk path committed
                            let resume = self.checkpoint.last_block().map_or(from, |l| from.max(l + 1));
                            if resume <= to {
                                self.ingest_step(resume, to).await?;
                            }
                        }
                        fallback
                    }
                }
            }
        };

        let last_block = self.checkpoint.last_block().unwrap_or(last);
        if last_block >= head {
            self.state = WatcherState::Idle;
        }
        Ok(TickReport {
            head,
            plan: executed,
            last_block,
        })
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().map_or(false, |s| *s.borrow())
    }

    /// Full fetch of `from..=to`, one transaction per block.
    async fn ingest_step(&mut self, from: u64, to: u64) -> Result<(), FeedError> {
        for number in from..=to {
            if self.stop_requested() {
                break;
            }
            let Some(block) = self.transport.get_block(number).await? else {
                debug!(block = number, "block not available yet");
                break;
            };
            let outcome = resolve_full_block(&self.extractor, &self.resolver, &block);
            self.commit(vec![outcome], number).await?;
        }
        Ok(())
    }

    /// Bulk window starting at `start`, committed in sub-batches.
    async fn ingest_bulk(&mut self, start: u64, count: u64) -> Result<(), FeedError> {
        let blocks = self.transport.get_bulk_window(start, count).await?;
        if blocks.is_empty() {
            return Err(FeedError::Rpc(format!("empty bulk window at {start}")));
        }
        if blocks[0].number != start {
            return Err(FeedError::Decode(format!(
                "bulk window starts at {} instead of {start}",
                blocks[0].number
            )));
        }

        let chunk_size = self.config.bulk_commit_blocks.max(1) as usize;
        for chunk in blocks.chunks(chunk_size) {
            if self.stop_requested() {
                break;
            }
            let mut outcomes = Vec::with_capacity(chunk.len());
            for block in chunk {
                outcomes.push(
                    resolve_bulk_block(&self.transport, &self.extractor, &self.resolver, block).await,
                );
            }
            let last = chunk.last().map_or(start, |b| b.number);
            self.commit(outcomes, last).await?;
        }
        Ok(())
    }

    /// Stage every resolved record and commit them with `last_block`.
    async fn commit(&mut self, outcomes: Vec<BlockOutcome>, last_block: u64) -> Result<(), FeedError> {
        let checkpoint = self.checkpoint.prepare(last_block)?;
        let store = Arc::clone(&self.store);
        let mut writer = IngestionWriter::new(store.as_ref());

        let mut provisional = 0u64;
        let mut rejected = 0u64;
        let mut skipped = 0u64;
        let blocks = outcomes.len() as u64;
        for outcome in outcomes {
            provisional += outcome.provisional() as u64;
            rejected += outcome.rejected as u64;
            for resolved in outcome.resolved {
                if !writer.write(resolved.into_record()).await? {
                    skipped += 1;
                }
            }
        }

        let result = writer.commit(checkpoint).await?;
        self.checkpoint.mark_committed(checkpoint);

        self.stats.blocks += blocks;
        self.stats.inserted += result.inserted as u64;
        self.stats.duplicates += skipped + result.duplicates as u64;
        self.stats.provisional += provisional;
        self.stats.rejected += rejected;

        if result.inserted > 0 {
            info!(
                block = last_block,
                inserted = result.inserted,
                provisional,
                "committed"
            );
        } else {
            debug!(block = last_block, "checkpoint advanced");
        }
        Ok(())
    }
}

/// Sleep for `delay` unless stopped first. Returns `true` if stop was requested.
async fn sleep_or_stop(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => *stop.borrow(),
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}
