//! Shared types for the ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Record ──────────────────────────────────────────────────────────────────

/// An ingested post, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Transaction hash, or a provisional `block-tx-op` id.
    pub identifier: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    /// Lowercase account handle.
    pub author: String,
    pub content: String,
    pub mentions: Vec<String>,
    pub tags: Vec<String>,
    /// Identifier of the record this one replies to. Not enforced.
    pub reply_target: Option<String>,
    /// The decoded post body, re-serialized verbatim for audit.
    pub raw_payload: String,
}

impl Record {
    /// Returns `true` if the identifier has not yet been upgraded.
    pub fn is_provisional(&self) -> bool {
        ProvisionalId::is_provisional(&self.identifier)
    }
}

// ─── CandidateRecord ─────────────────────────────────────────────────────────

/// Where an operation sits inside its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationPosition {
    pub tx_index: u32,
    pub op_index: u32,
}

/// A validated post that still needs its final identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub position: OperationPosition,
    pub author: String,
    pub content: String,
    pub mentions: Vec<String>,
    pub tags: Vec<String>,
    pub reply_target: Option<String>,
    pub raw_payload: String,
    /// Real transaction id, when the fetch path supplied one.
    pub transaction_id: Option<String>,
}

impl CandidateRecord {
    /// The key used for content-addressed identifier matching.
    pub fn content_key(&self) -> ContentKey {
        ContentKey::new(&self.author, &self.content)
    }

    /// The provisional identifier this candidate would receive.
    pub fn provisional_id(&self) -> ProvisionalId {
        ProvisionalId {
            block_number: self.block_number,
            tx_index: self.position.tx_index,
            op_index: self.position.op_index,
        }
    }

    /// Finalize into a storable record.
    pub fn into_record(self, identifier: String) -> Record {
        Record {
            identifier,
            block_number: self.block_number,
            timestamp: self.timestamp,
            author: self.author,
            content: self.content,
            mentions: self.mentions,
            tags: self.tags,
            reply_target: self.reply_target,
            raw_payload: self.raw_payload,
        }
    }
}

/// `(author, trimmed content)`: identifies a post within one block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub author: String,
    pub content: String,
}

impl ContentKey {
    pub fn new(author: &str, content: &str) -> Self {
        Self {
            author: author.to_ascii_lowercase(),
            content: content.trim().to_string(),
        }
    }
}

// ─── ProvisionalId ───────────────────────────────────────────────────────────

/// A locally synthesized identifier: `"<block>-<tx_index>-<op_index>"`.
///
/// Real transaction ids are 40 hex characters and never contain dashes, so
/// the two formats can not be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvisionalId {
    pub block_number: u64,
    pub tx_index: u32,
    pub op_index: u32,
}

impl ProvisionalId {
    /// Returns `true` if `identifier` has the provisional shape.
    pub fn is_provisional(identifier: &str) -> bool {
        identifier.parse::<ProvisionalId>().is_ok()
    }
}

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.block_number, self.tx_index, self.op_index)
    }
}

impl FromStr for ProvisionalId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        let (Some(b), Some(t), Some(o), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("not a provisional identifier: {s}"));
        };
        let digits = |p: &str| !p.is_empty() && p.bytes().all(|c| c.is_ascii_digit());
        if !(digits(b) && digits(t) && digits(o)) {
            return Err(format!("not a provisional identifier: {s}"));
        }
        Ok(Self {
            block_number: b.parse().map_err(|e| format!("{s}: {e}"))?,
            tx_index: t.parse().map_err(|e| format!("{s}: {e}"))?,
            op_index: o.parse().map_err(|e| format!("{s}: {e}"))?,
        })
    }
}

// ─── BlockRange / FeedStatus ─────────────────────────────────────────────────

/// An optionally bounded, inclusive block range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl BlockRange {
    pub fn new(start: Option<u64>, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, block_number: u64) -> bool {
        self.start.map_or(true, |s| block_number >= s) && self.end.map_or(true, |e| block_number <= e)
    }
}

/// Health snapshot exposed to the serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatus {
    pub record_count: u64,
    pub last_block: u64,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_roundtrip_format() {
        let id = ProvisionalId {
            block_number: 99_684_855,
            tx_index: 12,
            op_index: 0,
        };
        assert_eq!(id.to_string(), "99684855-12-0");
        assert_eq!("99684855-12-0".parse::<ProvisionalId>().unwrap(), id);
    }

    #[test]
    fn authoritative_ids_are_not_provisional() {
        assert!(!ProvisionalId::is_provisional("abc123"));
        assert!(!ProvisionalId::is_provisional(
            "7d3c2f0a9b1e4c5d6e7f8091a2b3c4d5e6f70819"
        ));
        assert!(!ProvisionalId::is_provisional("1-2"));
        assert!(!ProvisionalId::is_provisional("1-2-3-4"));
        assert!(!ProvisionalId::is_provisional("1--3"));
        assert!(!ProvisionalId::is_provisional("-1-2-3"));
        assert!(ProvisionalId::is_provisional("100-0-3"));
    }

    #[test]
    fn content_key_normalizes() {
        assert_eq!(
            ContentKey::new("Alice", "  hello  "),
            ContentKey::new("alice", "hello")
        );
    }

    #[test]
    fn block_range_bounds() {
        let r = BlockRange::new(Some(100), Some(102));
        assert!(r.contains(100));
        assert!(r.contains(102));
        assert!(!r.contains(103));
        assert!(BlockRange::default().contains(0));
    }
}
