//! Side-by-side view of how one block extracts and resolves under both
//! fetch paths. Backs `chainfeed inspect`.

use chainfeed_core::error::FeedError;
use chainfeed_core::resolver::IdentifierResolver;

use crate::extractor::Extractor;
use crate::pipeline::{resolve_bulk_block, resolve_full_block, BlockOutcome};
use crate::transport::LedgerTransport;

#[derive(Debug, Clone)]
pub struct BlockInspection {
    pub block_number: u64,
    /// `None` if the node does not have the block.
    pub full: Option<BlockOutcome>,
    pub bulk: Option<BlockOutcome>,
}

impl BlockInspection {
    /// Full-path identifiers the bulk path failed to recover.
    pub fn bulk_misses(&self) -> Vec<String> {
        let (Some(full), Some(bulk)) = (&self.full, &self.bulk) else {
            return Vec::new();
        };
        full.resolved
            .iter()
            .map(|r| r.resolution.identifier())
            .filter(|id| !bulk.resolved.iter().any(|b| b.resolution.identifier() == *id))
            .map(str::to_string)
            .collect()
    }
}

/// Run `block_number` through both paths without writing anything.
pub async fn inspect_block<T>(
    transport: &T,
    extractor: &Extractor,
    resolver: &IdentifierResolver,
    block_number: u64,
) -> Result<BlockInspection, FeedError>
where
    T: LedgerTransport + ?Sized,
{
    let full = transport
        .get_block(block_number)
        .await?
        .map(|block| resolve_full_block(extractor, resolver, &block));

    let window = transport.get_bulk_window(block_number, 1).await?;
    let bulk = match window.into_iter().next() {
        Some(block) if block.number == block_number => {
            Some(resolve_bulk_block(transport, extractor, resolver, &block).await)
        }
        _ => None,
    };

    Ok(BlockInspection {
        block_number,
        full,
        bulk,
    })
}
