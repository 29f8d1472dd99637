//! Hive operation wire shapes.
//!
//! Nodes encode operations two ways depending on the API:
//!
//! - condenser API: `["custom_json", {...}]`
//! - block API:     `{"type": "custom_json_operation", "value": {...}}`
//!
//! Both normalize to [`RawOperation`] with the `_operation` suffix dropped.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Value};

/// Operation kind carrying application-defined JSON.
pub const CUSTOM_JSON: &str = "custom_json";

/// Keys under which nodes report a transaction hash.
const TRANSACTION_ID_KEYS: [&str; 3] = ["transaction_id", "trx_id", "trxId"];

/// A single ledger operation, shape-normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOperation {
    /// Operation kind, e.g. `custom_json`, `vote`, `transfer`.
    pub op_type: String,
    pub payload: Value,
}

impl RawOperation {
    pub fn new(op_type: impl Into<String>, payload: Value) -> Self {
        let op_type = op_type.into();
        let op_type = match op_type.strip_suffix("_operation") {
            Some(stripped) => stripped.to_string(),
            None => op_type,
        };
        Self { op_type, payload }
    }

    /// Build a `custom_json` operation. `body` is stored as a JSON string,
    /// the way wallets broadcast it.
    pub fn custom_json(app_id: &str, posting_auths: &[&str], body: &Value) -> Self {
        Self::new(
            CUSTOM_JSON,
            json!({
                "id": app_id,
                "required_auths": [],
                "required_posting_auths": posting_auths,
                "json": body.to_string(),
            }),
        )
    }

    /// Parse either wire shape. Returns `None` for anything else.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(pair) if pair.len() == 2 => {
                let op_type = pair[0].as_str()?;
                Some(Self::new(op_type, pair[1].clone()))
            }
            Value::Object(map) => {
                let op_type = map.get("type")?.as_str()?;
                let payload = map.get("value")?.clone();
                Some(Self::new(op_type, payload))
            }
            _ => None,
        }
    }

    pub fn is_custom_json(&self) -> bool {
        self.op_type == CUSTOM_JSON
    }

    /// The `id` field of a `custom_json` payload.
    pub fn app_id(&self) -> Option<&str> {
        self.payload.get("id")?.as_str()
    }
}

/// First non-empty transaction hash on an envelope, under any known key.
pub fn transaction_identifier(envelope: &Value) -> Option<String> {
    TRANSACTION_ID_KEYS.iter().find_map(|key| {
        match envelope.get(*key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    })
}

/// Parse a block timestamp (`2025-08-18T15:30:00`, optional trailing `Z`).
///
/// Falls back to the current time when the value is missing or malformed.
pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| {
        let s = s.strip_suffix('Z').unwrap_or(s);
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
    })
    .map(|naive| naive.and_utc())
    .unwrap_or_else(Utc::now)
}
