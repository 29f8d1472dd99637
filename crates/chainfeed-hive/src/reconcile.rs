//! Offline reconciliation of provisional identifiers.
//!
//! Records stored under a provisional `block-tx-op` id are revisited using
//! the full block, which carries real transaction hashes. A match is found
//! by `(author, content)` first, then by the record's own coordinates. Each
//! upgrade rewrites the identifier and every reply pointing at the old value
//! in one store transaction.
//!
//! Only provisional rows are ever selected, so running it twice is harmless.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use chainfeed_core::error::FeedError;
use chainfeed_core::resolver::{AmbiguityPolicy, BlockCandidates};
use chainfeed_core::store::{FeedStore, UpgradeOutcome};
use chainfeed_core::types::{BlockRange, ContentKey, ProvisionalId, Record};

use crate::candidates::from_full_block;
use crate::extractor::Extractor;
use crate::transport::{FullBlock, LedgerTransport};

/// What to reconcile.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub range: BlockRange,
    /// Stop after examining this many rows.
    pub limit: Option<usize>,
    /// Compute and log upgrades without writing them.
    pub dry_run: bool,
    /// Reconcile just this identifier.
    pub only_identifier: Option<String>,
}

/// A matched upgrade, applied or (in dry-run) only planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpgrade {
    pub block_number: u64,
    pub old: String,
    pub new: String,
    /// `"content"` or `"position"`.
    pub matched_by: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: u64,
    pub updated: u64,
    pub skipped: u64,
    /// Replies whose `reply_target` was rewritten.
    pub cascaded: u64,
    pub planned: Vec<PlannedUpgrade>,
}

/// Upgrades provisional identifiers against the ledger.
pub struct Reconciler<T> {
    transport: T,
    store: Arc<dyn FeedStore>,
    extractor: Extractor,
}

impl<T: LedgerTransport> Reconciler<T> {
    pub fn new(transport: T, store: Arc<dyn FeedStore>, extractor: Extractor) -> Self {
        Self {
            transport,
            store,
            extractor,
        }
    }

    pub async fn run(&self, options: &ReconcileOptions) -> Result<ReconcileReport, FeedError> {
        let rows = self.select(options).await?;
        let mut report = ReconcileReport::default();

        let mut by_block: BTreeMap<u64, Vec<Record>> = BTreeMap::new();
        for row in rows {
            by_block.entry(row.block_number).or_default().push(row);
        }

        for (block_number, mut rows) in by_block {
            report.examined += rows.len() as u64;
            rows.sort_by_key(|r| position_of(r).map(|p| (p.tx_index, p.op_index)));

            let block = match self.transport.get_block(block_number).await {
                Ok(Some(block)) => block,
                Ok(None) => {
                    warn!(block = block_number, "block not found, skipping");
                    report.skipped += rows.len() as u64;
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(block = block_number, error = %e, "block fetch failed, skipping");
                    report.skipped += rows.len() as u64;
                    continue;
                }
            };

            let mut candidates = from_full_block(&self.extractor, &block);
            // ids already owned by stored rows are off the table
            for stored in self.store.records_in_block(block_number).await? {
                if !stored.is_provisional() {
                    candidates.claim(&stored.identifier);
                }
            }

            for row in rows {
                let Some((new, matched_by)) = self.match_row(&row, &block, &mut candidates) else {
                    debug!(id = %row.identifier, "no match on chain");
                    report.skipped += 1;
                    continue;
                };
                let planned = PlannedUpgrade {
                    block_number,
                    old: row.identifier.clone(),
                    new,
                    matched_by,
                };

                if options.dry_run {
                    info!(old = %planned.old, new = %planned.new, matched_by, "would upgrade");
                    report.planned.push(planned);
                    continue;
                }

                let outcome = match self.store.upgrade_identifier(&planned.old, &planned.new).await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(old = %planned.old, error = %e, "upgrade failed, skipped");
                        report.skipped += 1;
                        continue;
                    }
                };
                match outcome {
                    UpgradeOutcome::Upgraded { cascaded } => {
                        info!(old = %planned.old, new = %planned.new, cascaded, "identifier upgraded");
                        report.updated += 1;
                        report.cascaded += cascaded;
                        report.planned.push(planned);
                    }
                    UpgradeOutcome::Collision => {
                        warn!(old = %planned.old, new = %planned.new, "identifier already in use, skipped");
                        report.skipped += 1;
                    }
                    UpgradeOutcome::Missing => {
                        debug!(old = %planned.old, "row already upgraded elsewhere");
                        report.skipped += 1;
                    }
                }
            }
        }

        info!(
            examined = report.examined,
            updated = report.updated,
            skipped = report.skipped,
            cascaded = report.cascaded,
            dry_run = options.dry_run,
            "reconcile finished"
        );
        Ok(report)
    }

    async fn select(&self, options: &ReconcileOptions) -> Result<Vec<Record>, FeedError> {
        match &options.only_identifier {
            Some(id) => Ok(self
                .store
                .record(id)
                .await?
                .filter(Record::is_provisional)
                .into_iter()
                .collect()),
            None => self.store.provisional_records(options.range, options.limit).await,
        }
    }

    fn match_row(
        &self,
        row: &Record,
        block: &FullBlock,
        candidates: &mut BlockCandidates,
    ) -> Option<(String, &'static str)> {
        // the full block gives ledger order, so duplicates pair up in order
        let key = ContentKey::new(&row.author, &row.content);
        if let Some(id) = candidates.take_by_content(&key, AmbiguityPolicy::InOrder) {
            return Some((id, "content"));
        }

        let pos = position_of(row)?;
        let tx = block.transactions.get(pos.tx_index as usize)?;
        let id = tx.identifier.as_deref()?;
        let op = tx.operations.get(pos.op_index as usize)?;
        let op_key = self.extractor.content_key(op)?;
        if op_key.author != key.author || candidates.is_claimed(id) {
            return None;
        }
        candidates.claim(id);
        Some((id.to_string(), "position"))
    }
}

fn position_of(row: &Record) -> Option<ProvisionalId> {
    row.identifier.parse().ok()
}
