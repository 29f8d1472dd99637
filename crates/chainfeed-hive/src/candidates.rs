//! Per-block identifier candidates for bulk-path resolution.

use tracing::{debug, warn};

use chainfeed_core::resolver::BlockCandidates;

use crate::extractor::Extractor;
use crate::operation::RawOperation;
use crate::transport::{FullBlock, IdentifiedOperation, LedgerTransport};

/// Build the candidate set for `block_number`.
///
/// Prefers the ops-in-block lookup; when that fails or yields nothing, the
/// full block is fetched instead. If both fail the result is empty and every
/// bulk record in the block ends up provisional.
pub async fn collect_candidates<T>(
    transport: &T,
    extractor: &Extractor,
    block_number: u64,
) -> BlockCandidates
where
    T: LedgerTransport + ?Sized,
{
    match transport.get_ops_with_identifiers(block_number).await {
        Ok(ops) => {
            let candidates = from_identified_ops(extractor, block_number, &ops);
            if !candidates.is_empty() {
                return candidates;
            }
            debug!(block = block_number, "ops lookup empty, falling back to full block");
        }
        Err(e) => {
            debug!(block = block_number, error = %e, "ops lookup failed, falling back to full block");
        }
    }

    match transport.get_block(block_number).await {
        Ok(Some(block)) => from_full_block(extractor, &block),
        Ok(None) => BlockCandidates::new(block_number),
        Err(e) => {
            warn!(block = block_number, error = %e, "candidate lookup failed");
            BlockCandidates::new(block_number)
        }
    }
}

/// Candidates from an ops-in-block response.
pub fn from_identified_ops(
    extractor: &Extractor,
    block_number: u64,
    ops: &[IdentifiedOperation],
) -> BlockCandidates {
    let mut candidates = BlockCandidates::new(block_number);
    for op in ops {
        if let Some(id) = &op.transaction_identifier {
            register(extractor, &mut candidates, &op.operation, id);
        }
    }
    candidates
}

/// Candidates from a fully fetched block.
pub fn from_full_block(extractor: &Extractor, block: &FullBlock) -> BlockCandidates {
    let mut candidates = BlockCandidates::new(block.number);
    for tx in &block.transactions {
        let Some(id) = &tx.identifier else { continue };
        for op in &tx.operations {
            register(extractor, &mut candidates, op, id);
        }
    }
    candidates
}

fn register(extractor: &Extractor, candidates: &mut BlockCandidates, op: &RawOperation, id: &str) {
    let relevant = op.is_custom_json()
        && op
            .app_id()
            .map_or(false, |app| extractor.app_ids().iter().any(|a| a == app));
    if !relevant {
        return;
    }
    candidates.push_positional(id);
    if let Some(key) = extractor.content_key(op) {
        candidates.push_post(&key.author, &key.content, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainfeed_core::types::ContentKey;
    use chrono::Utc;
    use serde_json::json;

    use crate::transport::FullTransaction;

    fn post(author: &str, content: &str) -> RawOperation {
        RawOperation::custom_json(
            "hive.micro",
            &[author],
            &json!({"type": "post", "content": content}),
        )
    }

    #[test]
    fn ops_lookup_registers_posts_and_positions() {
        let ex = Extractor::new(["hive.micro"]);
        let ops = vec![
            IdentifiedOperation {
                operation: post("alice", "hello @bob #intro"),
                transaction_identifier: Some("abc123".into()),
            },
            IdentifiedOperation {
                operation: RawOperation::new("vote", json!({})),
                transaction_identifier: Some("vote1".into()),
            },
            IdentifiedOperation {
                operation: post("carol", "no hash"),
                transaction_identifier: None,
            },
        ];
        let c = from_identified_ops(&ex, 100, &ops);
        assert_eq!(c.remaining_for(&ContentKey::new("alice", "hello @bob #intro")), 1);
        assert_eq!(c.remaining_for(&ContentKey::new("carol", "no hash")), 0);
        assert!(c.has_content_matches());
    }

    #[test]
    fn non_post_app_ops_are_positional_only() {
        let ex = Extractor::new(["hive.micro"]);
        let mut follow = post("alice", "x");
        follow.payload["json"] = json!("{\"type\":\"follow\"}");
        let block = FullBlock {
            number: 7,
            timestamp: Utc::now(),
            transactions: vec![FullTransaction {
                identifier: Some("tx7".into()),
                operations: vec![follow],
            }],
        };
        let c = from_full_block(&ex, &block);
        assert!(!c.is_empty());
        assert!(!c.has_content_matches());
    }
}
