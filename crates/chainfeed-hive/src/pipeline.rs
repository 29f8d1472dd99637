//! Per-block extract → resolve, shared by the watch loop and diagnostics.

use tracing::{debug, trace};

use chainfeed_core::resolver::{BlockCandidates, IdentifierResolver, Resolution};
use chainfeed_core::types::{CandidateRecord, OperationPosition, Record};

use crate::candidates::collect_candidates;
use crate::extractor::{Extraction, Extractor, OperationContext};
use crate::transport::{BulkBlock, FullBlock, LedgerTransport};

/// A candidate together with the identifier it resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedCandidate {
    pub candidate: CandidateRecord,
    pub resolution: Resolution,
}

impl ResolvedCandidate {
    pub fn into_record(self) -> Record {
        self.candidate.into_record(self.resolution.into_identifier())
    }
}

/// Everything one block produced.
#[derive(Debug, Clone, Default)]
pub struct BlockOutcome {
    pub block_number: u64,
    pub resolved: Vec<ResolvedCandidate>,
    /// Operations that were not posts for our applications.
    pub rejected: usize,
}

impl BlockOutcome {
    pub fn provisional(&self) -> usize {
        self.resolved
            .iter()
            .filter(|r| r.resolution.is_provisional())
            .count()
    }

    fn push(&mut self, candidate: CandidateRecord, resolution: Resolution) {
        if resolution.is_provisional() {
            debug!(
                block = candidate.block_number,
                author = %candidate.author,
                id = resolution.identifier(),
                "no transaction id recovered, using provisional id"
            );
        }
        self.resolved.push(ResolvedCandidate {
            candidate,
            resolution,
        });
    }
}

/// Full fetch path: every operation carries its transaction hash.
pub fn resolve_full_block(
    extractor: &Extractor,
    resolver: &IdentifierResolver,
    block: &FullBlock,
) -> BlockOutcome {
    let mut outcome = BlockOutcome {
        block_number: block.number,
        ..Default::default()
    };
    for (tx_index, tx) in block.transactions.iter().enumerate() {
        for (op_index, op) in tx.operations.iter().enumerate() {
            let ctx = OperationContext {
                block_number: block.number,
                timestamp: block.timestamp,
                position: OperationPosition {
                    tx_index: tx_index as u32,
                    op_index: op_index as u32,
                },
                transaction_id: tx.identifier.clone(),
            };
            match extractor.extract(op, ctx) {
                Extraction::Accepted(candidate) => {
                    let resolution = resolver.resolve(&candidate, None);
                    outcome.push(candidate, resolution);
                }
                Extraction::Rejected(rejection) => {
                    trace!(block = block.number, tx_index, op_index, reason = rejection.reason(), "operation skipped");
                    outcome.rejected += 1;
                }
            }
        }
    }
    outcome
}

/// Bulk fetch path: identifiers are recovered from a per-block lookup.
///
/// The lookup is only issued when the block holds at least one post.
pub async fn resolve_bulk_block<T>(
    transport: &T,
    extractor: &Extractor,
    resolver: &IdentifierResolver,
    block: &BulkBlock,
) -> BlockOutcome
where
    T: LedgerTransport + ?Sized,
{
    let mut outcome = BlockOutcome {
        block_number: block.number,
        ..Default::default()
    };

    let mut accepted = Vec::new();
    for positioned in &block.operations {
        let ctx = OperationContext {
            block_number: block.number,
            timestamp: block.timestamp,
            position: OperationPosition {
                tx_index: positioned.tx_index,
                op_index: positioned.op_index,
            },
            transaction_id: None,
        };
        match extractor.extract(&positioned.operation, ctx) {
            Extraction::Accepted(candidate) => accepted.push(candidate),
            Extraction::Rejected(rejection) => {
                trace!(block = block.number, reason = rejection.reason(), "operation skipped");
                outcome.rejected += 1;
            }
        }
    }
    if accepted.is_empty() {
        return outcome;
    }

    let mut candidates: BlockCandidates = collect_candidates(transport, extractor, block.number).await;
    for candidate in accepted {
        let resolution = resolver.resolve(&candidate, Some(&mut candidates));
        outcome.push(candidate, resolution);
    }
    outcome
}
