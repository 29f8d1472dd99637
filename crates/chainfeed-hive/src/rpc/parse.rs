//! Decoding of Hive API results into transport types.

use serde_json::Value;

use chainfeed_core::error::FeedError;

use crate::operation::{parse_timestamp, transaction_identifier, RawOperation};
use crate::transport::{BulkBlock, FullBlock, FullTransaction, IdentifiedOperation, PositionedOperation};

fn decode_err(what: &str) -> FeedError {
    FeedError::Decode(format!("malformed {what} response"))
}

fn operations(tx: &Value) -> Vec<RawOperation> {
    tx.get("operations")
        .and_then(Value::as_array)
        .map(|ops| ops.iter().filter_map(RawOperation::from_json).collect())
        .unwrap_or_default()
}

/// `condenser_api.get_dynamic_global_properties`.
pub fn head_block(result: &Value) -> Result<u64, FeedError> {
    result
        .get("head_block_number")
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .or_else(|| result.get("last_irreversible_block_num").and_then(Value::as_u64))
        .ok_or_else(|| decode_err("dynamic global properties"))
}

/// `condenser_api.get_block`. A `null` result means the block does not exist yet.
pub fn full_block(number: u64, result: &Value) -> Result<Option<FullBlock>, FeedError> {
    if result.is_null() {
        return Ok(None);
    }
    let txs = result
        .get("transactions")
        .and_then(Value::as_array)
        .ok_or_else(|| decode_err("get_block"))?;
    // condenser blocks also carry a parallel `transaction_ids` list
    let ids = result.get("transaction_ids").and_then(Value::as_array);

    let transactions = txs
        .iter()
        .enumerate()
        .map(|(i, tx)| FullTransaction {
            identifier: transaction_identifier(tx).or_else(|| {
                ids.and_then(|ids| ids.get(i))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }),
            operations: operations(tx),
        })
        .collect();

    Ok(Some(FullBlock {
        number,
        timestamp: parse_timestamp(result.get("timestamp").and_then(Value::as_str)),
        transactions,
    }))
}

/// `block_api.get_block_range`. Block numbers are positional from `start`.
pub fn bulk_window(start: u64, result: &Value) -> Result<Vec<BulkBlock>, FeedError> {
    let blocks = result
        .get("blocks")
        .and_then(Value::as_array)
        .ok_or_else(|| decode_err("get_block_range"))?;

    Ok(blocks
        .iter()
        .enumerate()
        .map(|(i, block)| {
            let mut ops = Vec::new();
            if let Some(txs) = block.get("transactions").and_then(Value::as_array) {
                for (tx_index, tx) in txs.iter().enumerate() {
                    for (op_index, operation) in operations(tx).into_iter().enumerate() {
                        ops.push(PositionedOperation {
                            tx_index: tx_index as u32,
                            op_index: op_index as u32,
                            operation,
                        });
                    }
                }
            }
            BulkBlock {
                number: start + i as u64,
                timestamp: parse_timestamp(block.get("timestamp").and_then(Value::as_str)),
                operations: ops,
            }
        })
        .collect())
}

/// `condenser_api.get_ops_in_block`.
pub fn ops_in_block(result: &Value) -> Result<Vec<IdentifiedOperation>, FeedError> {
    let entries = result
        .as_array()
        .ok_or_else(|| decode_err("get_ops_in_block"))?;
    Ok(entries
        .iter()
        .filter_map(|entry| {
            let operation = RawOperation::from_json(entry.get("op")?)?;
            Some(IdentifiedOperation {
                operation,
                transaction_identifier: transaction_identifier(entry),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn head_prefers_head_block_number() {
        assert_eq!(
            head_block(&json!({"head_block_number": 10, "last_irreversible_block_num": 5})).unwrap(),
            10
        );
        assert_eq!(head_block(&json!({"last_irreversible_block_num": 5})).unwrap(), 5);
        assert!(head_block(&json!({})).is_err());
    }

    #[test]
    fn full_block_uses_parallel_ids() {
        let result = json!({
            "timestamp": "2025-09-07T12:00:00",
            "transaction_ids": ["aa", "bb"],
            "transactions": [
                {"operations": [["vote", {}]]},
                {"transaction_id": "cc", "operations": [["custom_json", {"id": "hive.micro"}]]}
            ]
        });
        let block = full_block(100, &result).unwrap().unwrap();
        assert_eq!(block.number, 100);
        assert_eq!(block.transactions[0].identifier.as_deref(), Some("aa"));
        assert_eq!(block.transactions[1].identifier.as_deref(), Some("cc"));
        assert!(block.transactions[1].operations[0].is_custom_json());
        assert!(full_block(101, &Value::Null).unwrap().is_none());
    }

    #[test]
    fn bulk_window_numbers_and_positions() {
        let result = json!({"blocks": [
            {"timestamp": "2025-09-07T12:00:00", "transactions": []},
            {"timestamp": "2025-09-07T12:00:03", "transactions": [
                {"operations": [
                    {"type": "vote_operation", "value": {}},
                    {"type": "custom_json_operation", "value": {"id": "hive.micro"}}
                ]}
            ]}
        ]});
        let blocks = bulk_window(500, &result).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].number, 501);
        let op = &blocks[1].operations[1];
        assert_eq!((op.tx_index, op.op_index), (0, 1));
        assert!(op.operation.is_custom_json());
    }

    #[test]
    fn ops_in_block_reads_trx_id() {
        let result = json!([
            {"trx_id": "abc123", "op": ["custom_json", {"id": "hive.micro"}]},
            {"trx_id": "def456", "op": "garbage"}
        ]);
        let ops = ops_in_block(&result).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].transaction_identifier.as_deref(), Some("abc123"));
    }
}
