//! Identifier resolution.
//!
//! A candidate from the full fetch path already carries its transaction id.
//! A candidate from the bulk path does not, and is matched against a
//! per-block [`BlockCandidates`] built from a lookup that does carry ids:
//!
//! 1. content-addressed: `(author, content)` → queue of ids, in block order
//! 2. positional: only if the content map is empty, next unused id in block order
//! 3. provisional: `"<block>-<tx_index>-<op_index>"`
//!
//! Every id handed out is consumed, so posts from different transactions can
//! never be assigned the same identifier. Posts of one transaction share its
//! id, exactly as on the full fetch path; the writer keeps the first.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{CandidateRecord, ContentKey};

/// What to do when one block holds several posts with the same
/// `(author, content)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Match duplicates in order of appearance.
    #[default]
    InOrder,
    /// Never guess: duplicates get provisional ids for the reconciler.
    Provisional,
}

/// How an identifier was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Supplied directly by the full fetch path.
    Authoritative(String),
    /// Recovered by `(author, content)` match.
    ContentMatched(String),
    /// Recovered by position in the block.
    Positional(String),
    /// Synthesized; pending reconciliation.
    Provisional(String),
}

impl Resolution {
    pub fn identifier(&self) -> &str {
        match self {
            Self::Authoritative(id)
            | Self::ContentMatched(id)
            | Self::Positional(id)
            | Self::Provisional(id) => id,
        }
    }

    pub fn into_identifier(self) -> String {
        match self {
            Self::Authoritative(id)
            | Self::ContentMatched(id)
            | Self::Positional(id)
            | Self::Provisional(id) => id,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }

    /// Short label for logs.
    pub fn source(&self) -> &'static str {
        match self {
            Self::Authoritative(_) => "authoritative",
            Self::ContentMatched(_) => "content",
            Self::Positional(_) => "positional",
            Self::Provisional(_) => "provisional",
        }
    }
}

/// Identifier candidates for a single block, consumed as they are used.
///
/// Build one per block and drop it when the block is done.
#[derive(Debug, Default)]
pub struct BlockCandidates {
    block_number: u64,
    by_content: HashMap<ContentKey, VecDeque<String>>,
    positional: VecDeque<String>,
    consumed: HashSet<String>,
    /// Resolution already given to a post of each transaction (by tx index).
    by_transaction: HashMap<u32, Resolution>,
}

impl BlockCandidates {
    pub fn new(block_number: u64) -> Self {
        Self {
            block_number,
            ..Default::default()
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Register a qualifying post observed in the lookup, in block order.
    pub fn push_post(&mut self, author: &str, content: &str, identifier: impl Into<String>) {
        self.by_content
            .entry(ContentKey::new(author, content))
            .or_default()
            .push_back(identifier.into());
    }

    /// Register an application-relevant transaction id, in block order.
    pub fn push_positional(&mut self, identifier: impl Into<String>) {
        let identifier = identifier.into();
        if !self.positional.contains(&identifier) {
            self.positional.push_back(identifier);
        }
    }

    /// Returns `true` if the lookup produced nothing usable at all.
    pub fn is_empty(&self) -> bool {
        self.by_content.is_empty() && self.positional.is_empty()
    }

    pub fn has_content_matches(&self) -> bool {
        !self.by_content.is_empty()
    }

    /// Number of ids registered for `key` that are still unused.
    pub fn remaining_for(&self, key: &ContentKey) -> usize {
        self.by_content.get(key).map_or(0, |q| {
            q.iter().filter(|id| !self.consumed.contains(*id)).count()
        })
    }

    /// Mark `identifier` as taken, e.g. because a stored record already owns
    /// it. Returns `false` if it was already consumed.
    pub fn claim(&mut self, identifier: &str) -> bool {
        self.consumed.insert(identifier.to_string())
    }

    pub fn is_claimed(&self, identifier: &str) -> bool {
        self.consumed.contains(identifier)
    }

    /// Pop the next unused id registered for `key`.
    ///
    /// Under [`AmbiguityPolicy::Provisional`] a key registered under more
    /// than one distinct id yields nothing.
    pub fn take_by_content(&mut self, key: &ContentKey, policy: AmbiguityPolicy) -> Option<String> {
        let queue = self.by_content.get_mut(key)?;
        if policy == AmbiguityPolicy::Provisional
            && queue.iter().collect::<HashSet<_>>().len() > 1
        {
            return None;
        }
        while let Some(id) = queue.pop_front() {
            if self.consumed.insert(id.clone()) {
                return Some(id);
            }
        }
        None
    }

    fn take_positional(&mut self) -> Option<String> {
        while let Some(id) = self.positional.pop_front() {
            if self.consumed.insert(id.clone()) {
                return Some(id);
            }
        }
        None
    }
}

/// Assigns a durable identifier to each candidate record.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifierResolver {
    policy: AmbiguityPolicy,
}

impl IdentifierResolver {
    pub fn new(policy: AmbiguityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AmbiguityPolicy {
        self.policy
    }

    /// Resolve `candidate`.
    ///
    /// `candidates` is the per-block lookup for bulk-path records; pass
    /// `None` when no lookup is available.
    pub fn resolve(
        &self,
        candidate: &CandidateRecord,
        candidates: Option<&mut BlockCandidates>,
    ) -> Resolution {
        if let Some(id) = &candidate.transaction_id {
            if let Some(c) = candidates {
                // keep the lookup consistent if a caller mixes both paths
                c.consumed.insert(id.clone());
            }
            return Resolution::Authoritative(id.clone());
        }

        if let Some(c) = candidates {
            debug_assert_eq!(c.block_number, candidate.block_number);
            let tx_index = candidate.position.tx_index;
            if let Some(shared) = c.by_transaction.get(&tx_index) {
                return shared.clone();
            }

            let recovered = match c.take_by_content(&candidate.content_key(), self.policy) {
                Some(id) => Some(Resolution::ContentMatched(id)),
                None if !c.has_content_matches() => c.take_positional().map(Resolution::Positional),
                None => None,
            };
            if let Some(resolution) = recovered {
                c.by_transaction.insert(tx_index, resolution.clone());
                return resolution;
            }
        }

        Resolution::Provisional(candidate.provisional_id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationPosition;
    use chrono::TimeZone;

    fn candidate(author: &str, content: &str, tx: u32, op: u32) -> CandidateRecord {
        CandidateRecord {
            block_number: 100,
            timestamp: chrono::Utc.with_ymd_and_hms(2025, 9, 7, 12, 0, 0).unwrap(),
            position: OperationPosition {
                tx_index: tx,
                op_index: op,
            },
            author: author.into(),
            content: content.into(),
            mentions: vec![],
            tags: vec![],
            reply_target: None,
            raw_payload: "{}".into(),
            transaction_id: None,
        }
    }

    #[test]
    fn full_fetch_id_is_used_directly() {
        let mut c = candidate("alice", "hello", 0, 0);
        c.transaction_id = Some("abc123".into());
        let r = IdentifierResolver::default().resolve(&c, None);
        assert_eq!(r, Resolution::Authoritative("abc123".into()));
    }

    #[test]
    fn content_match_beats_positional() {
        let mut block = BlockCandidates::new(100);
        block.push_positional("pos-first");
        block.push_post("alice", "hello @bob #intro", "abc123");

        let r = IdentifierResolver::default()
            .resolve(&candidate("alice", "hello @bob #intro", 0, 0), Some(&mut block));
        assert_eq!(r, Resolution::ContentMatched("abc123".into()));
    }

    #[test]
    fn candidates_are_consumed_once() {
        let mut block = BlockCandidates::new(100);
        block.push_post("alice", "gm", "tx1");
        block.push_post("alice", "gm", "tx2");
        let resolver = IdentifierResolver::default();

        let a = resolver.resolve(&candidate("alice", "gm", 0, 0), Some(&mut block));
        let b = resolver.resolve(&candidate("alice", "gm", 1, 0), Some(&mut block));
        let c = resolver.resolve(&candidate("alice", "gm", 2, 0), Some(&mut block));
        assert_eq!(a, Resolution::ContentMatched("tx1".into()));
        assert_eq!(b, Resolution::ContentMatched("tx2".into()));
        // ran out: provisional, never positional reuse
        assert_eq!(c, Resolution::Provisional("100-2-0".into()));
    }

    #[test]
    fn positional_only_when_content_map_empty() {
        let mut block = BlockCandidates::new(100);
        block.push_positional("tx-a");
        block.push_positional("tx-b");
        let resolver = IdentifierResolver::default();

        let a = resolver.resolve(&candidate("alice", "one", 0, 0), Some(&mut block));
        let b = resolver.resolve(&candidate("bob", "two", 1, 0), Some(&mut block));
        let c = resolver.resolve(&candidate("carol", "three", 2, 0), Some(&mut block));
        assert_eq!(a, Resolution::Positional("tx-a".into()));
        assert_eq!(b, Resolution::Positional("tx-b".into()));
        assert!(c.is_provisional());
    }

    #[test]
    fn unmatched_key_with_content_map_goes_provisional() {
        let mut block = BlockCandidates::new(100);
        block.push_post("alice", "hello", "tx1");
        block.push_positional("tx1");
        block.push_positional("tx9");

        let r = IdentifierResolver::default()
            .resolve(&candidate("mallory", "other", 3, 1), Some(&mut block));
        assert_eq!(r, Resolution::Provisional("100-3-1".into()));
    }

    #[test]
    fn positional_skips_ids_consumed_by_content() {
        let mut block = BlockCandidates::new(100);
        block.push_positional("tx1");
        block.push_positional("tx2");
        block.consumed.insert("tx1".into());

        let r = IdentifierResolver::default()
            .resolve(&candidate("bob", "x", 1, 0), Some(&mut block));
        assert_eq!(r, Resolution::Positional("tx2".into()));
    }

    #[test]
    fn provisional_policy_refuses_duplicates() {
        let mut block = BlockCandidates::new(100);
        block.push_post("alice", "gm", "tx1");
        block.push_post("alice", "gm", "tx2");
        block.push_post("bob", "unique", "tx3");
        let resolver = IdentifierResolver::new(AmbiguityPolicy::Provisional);

        let dup = resolver.resolve(&candidate("alice", "gm", 0, 0), Some(&mut block));
        let uniq = resolver.resolve(&candidate("bob", "unique", 2, 0), Some(&mut block));
        assert_eq!(dup, Resolution::Provisional("100-0-0".into()));
        assert_eq!(uniq, Resolution::ContentMatched("tx3".into()));
        assert_eq!(block.remaining_for(&ContentKey::new("alice", "gm")), 2);
    }

    #[test]
    fn claimed_ids_are_skipped() {
        let mut block = BlockCandidates::new(100);
        block.push_post("alice", "gm", "tx1");
        block.push_post("alice", "gm", "tx2");
        assert!(block.claim("tx1"));
        assert!(!block.claim("tx1"));

        let r = IdentifierResolver::default()
            .resolve(&candidate("alice", "gm", 1, 0), Some(&mut block));
        assert_eq!(r, Resolution::ContentMatched("tx2".into()));
        assert!(block.is_claimed("tx2"));
    }

    #[test]
    fn posts_in_one_transaction_share_its_id() {
        let mut block = BlockCandidates::new(100);
        block.push_post("alice", "one", "tx1");
        block.push_post("alice", "two", "tx1");
        block.push_post("bob", "three", "tx2");
        let resolver = IdentifierResolver::default();

        let a = resolver.resolve(&candidate("alice", "one", 0, 0), Some(&mut block));
        let b = resolver.resolve(&candidate("alice", "two", 0, 1), Some(&mut block));
        let c = resolver.resolve(&candidate("bob", "three", 1, 0), Some(&mut block));
        assert_eq!(a, Resolution::ContentMatched("tx1".into()));
        assert_eq!(b, Resolution::ContentMatched("tx1".into()));
        assert_eq!(c, Resolution::ContentMatched("tx2".into()));
    }

    #[test]
    fn repeated_post_in_one_transaction_is_not_ambiguous() {
        let mut block = BlockCandidates::new(100);
        block.push_post("alice", "gm", "tx1");
        block.push_post("alice", "gm", "tx1");
        let resolver = IdentifierResolver::new(AmbiguityPolicy::Provisional);

        let a = resolver.resolve(&candidate("alice", "gm", 0, 0), Some(&mut block));
        let b = resolver.resolve(&candidate("alice", "gm", 0, 1), Some(&mut block));
        assert_eq!(a, Resolution::ContentMatched("tx1".into()));
        assert_eq!(b, Resolution::ContentMatched("tx1".into()));
    }

    #[test]
    fn no_lookup_means_provisional() {
        let r = IdentifierResolver::default().resolve(&candidate("alice", "hi", 4, 2), None);
        assert_eq!(r.identifier(), "100-4-2");
        assert_eq!(r.source(), "provisional");
    }
}
