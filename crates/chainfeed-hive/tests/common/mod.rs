//! Scripted in-memory ledger shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use chainfeed_core::error::FeedError;
use chainfeed_core::store::FeedStore;
use chainfeed_core::types::Record;
use chainfeed_hive::operation::RawOperation;
use chainfeed_hive::transport::{
    BulkBlock, FullBlock, FullTransaction, IdentifiedOperation, LedgerTransport, PositionedOperation,
};
use chainfeed_storage::InMemoryStorage;

pub fn ts(block: u64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 7, 12, 0, 0).unwrap() + chrono::Duration::seconds(block as i64 * 3)
}

pub fn post(author: &str, content: &str) -> RawOperation {
    RawOperation::custom_json("hive.micro", &[author], &json!({"type": "post", "content": content}))
}

pub fn reply(author: &str, content: &str, parent: &str) -> RawOperation {
    RawOperation::custom_json(
        "hive.micro",
        &[author],
        &json!({"type": "post", "content": content, "reply_to": parent}),
    )
}

pub fn vote() -> RawOperation {
    RawOperation::new("vote", json!({"voter": "x", "author": "y", "permlink": "z", "weight": 100}))
}

pub fn record(id: &str, block: u64, author: &str, content: &str, reply_to: Option<&str>) -> Record {
    Record {
        identifier: id.into(),
        block_number: block,
        timestamp: ts(block),
        author: author.into(),
        content: content.into(),
        mentions: vec![],
        tags: vec![],
        reply_target: reply_to.map(Into::into),
        raw_payload: "{}".into(),
    }
}

pub fn stores() -> (Arc<InMemoryStorage>, Arc<dyn FeedStore>) {
    let store = Arc::new(InMemoryStorage::new());
    let dyn_store: Arc<dyn FeedStore> = store.clone();
    (store, dyn_store)
}

#[derive(Default)]
struct LedgerState {
    head: u64,
    blocks: BTreeMap<u64, Vec<FullTransaction>>,
    fail_head: bool,
    fail_bulk: bool,
    ops_lookup: bool,
    bulk_calls: usize,
    lookup_calls: usize,
}

/// A ledger whose blocks, head and failures are set by the test.
///
/// Blocks that were never added exist and are empty, up to `head`.
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new(head: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LedgerState {
                head,
                ops_lookup: true,
                ..Default::default()
            }),
        })
    }

    pub fn add_block(&self, number: u64, txs: Vec<(Option<&str>, Vec<RawOperation>)>) {
        let txs = txs
            .into_iter()
            .map(|(id, operations)| FullTransaction {
                identifier: id.map(Into::into),
                operations,
            })
            .collect();
        self.state.lock().unwrap().blocks.insert(number, txs);
    }

    /// Give a transaction the hash the node previously withheld.
    pub fn set_transaction_id(&self, number: u64, tx_index: usize, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(tx) = state.blocks.get_mut(&number).and_then(|txs| txs.get_mut(tx_index)) {
            tx.identifier = Some(id.into());
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn fail_head(&self, fail: bool) {
        self.state.lock().unwrap().fail_head = fail;
    }

    pub fn fail_bulk(&self, fail: bool) {
        self.state.lock().unwrap().fail_bulk = fail;
    }

    pub fn ops_lookup(&self, available: bool) {
        self.state.lock().unwrap().ops_lookup = available;
    }

    pub fn bulk_calls(&self) -> usize {
        self.state.lock().unwrap().bulk_calls
    }

    pub fn lookup_calls(&self) -> usize {
        self.state.lock().unwrap().lookup_calls
    }

    fn block(&self, number: u64) -> Option<FullBlock> {
        let state = self.state.lock().unwrap();
        if number == 0 || number > state.head {
            return None;
        }
        Some(FullBlock {
            number,
            timestamp: ts(number),
            transactions: state.blocks.get(&number).cloned().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LedgerTransport for MockLedger {
    async fn head_block_number(&self) -> Result<u64, FeedError> {
        let state = self.state.lock().unwrap();
        if state.fail_head {
            return Err(FeedError::Rpc("node unreachable".into()));
        }
        Ok(state.head)
    }

    async fn get_block(&self, number: u64) -> Result<Option<FullBlock>, FeedError> {
        Ok(self.block(number))
    }

    async fn get_bulk_window(&self, start: u64, count: u64) -> Result<Vec<BulkBlock>, FeedError> {
        {
            let mut state = self.state.lock().unwrap();
            state.bulk_calls += 1;
            if state.fail_bulk {
                return Err(FeedError::Rpc("block_api unavailable".into()));
            }
        }
        Ok((start..start + count)
            .map_while(|n| self.block(n))
            .map(|block| BulkBlock {
                number: block.number,
                timestamp: block.timestamp,
                operations: block
                    .transactions
                    .iter()
                    .enumerate()
                    .flat_map(|(tx_index, tx)| {
                        tx.operations.iter().enumerate().map(move |(op_index, op)| PositionedOperation {
                            tx_index: tx_index as u32,
                            op_index: op_index as u32,
                            operation: op.clone(),
                        })
                    })
                    .collect(),
            })
            .collect())
    }

    async fn get_ops_with_identifiers(
        &self,
        number: u64,
    ) -> Result<Vec<IdentifiedOperation>, FeedError> {
        {
            let mut state = self.state.lock().unwrap();
            state.lookup_calls += 1;
            if !state.ops_lookup {
                return Err(FeedError::Rpc("get_ops_in_block failed".into()));
            }
        }
        let block = self.block(number).unwrap_or(FullBlock {
            number,
            timestamp: ts(number),
            transactions: vec![],
        });
        Ok(block
            .transactions
            .into_iter()
            .flat_map(|tx| {
                let id = tx.identifier;
                tx.operations.into_iter().map(move |operation| IdentifiedOperation {
                    operation,
                    transaction_identifier: id.clone(),
                })
            })
            .collect())
    }
}
