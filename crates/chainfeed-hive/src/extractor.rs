//! Operation extraction: raw `custom_json` operation → [`CandidateRecord`].
//!
//! Extraction never fails. Anything that is not a well-formed post for one
//! of the configured applications comes back as [`Extraction::Rejected`]
//! with the reason, and the caller moves on to the next operation.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use chainfeed_core::config::WatcherConfig;
use chainfeed_core::types::{CandidateRecord, ContentKey, OperationPosition};

use crate::operation::RawOperation;

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([a-z0-9][a-z0-9\-\.]{1,31})").expect("valid mention regex"));
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([a-z0-9_\-]{1,32})").expect("valid tag regex"));

/// Where an operation was found.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub position: OperationPosition,
    /// Real transaction hash, when the fetch path has one.
    pub transaction_id: Option<String>,
}

/// Why an operation did not produce a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotCustomJson,
    /// `custom_json` for an application we don't ingest.
    ForeignApp(String),
    /// Neither posting nor active authorities name an account.
    NoAuthor,
    /// `json` is neither an object nor a string decoding to one.
    UndecodableBody,
    /// Body `type` is not `"post"`.
    UnsupportedType(String),
    EmptyContent,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotCustomJson => "not custom_json",
            Self::ForeignApp(_) => "foreign app id",
            Self::NoAuthor => "no author",
            Self::UndecodableBody => "undecodable body",
            Self::UnsupportedType(_) => "unsupported type",
            Self::EmptyContent => "empty content",
        }
    }
}

/// Outcome of extracting one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Accepted(CandidateRecord),
    Rejected(Rejection),
}

/// A decoded post body, before positional context is attached.
struct DecodedPost {
    author: String,
    content: String,
    body: Map<String, Value>,
}

/// Turns raw ledger operations into candidate records.
#[derive(Debug, Clone)]
pub struct Extractor {
    app_ids: Vec<String>,
}

impl Extractor {
    pub fn new<I, S>(app_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            app_ids: app_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(config.app_ids.iter().cloned())
    }

    pub fn app_ids(&self) -> &[String] {
        &self.app_ids
    }

    /// Validate and decode `op` into a candidate record.
    pub fn extract(&self, op: &RawOperation, ctx: OperationContext) -> Extraction {
        let post = match self.decode(op) {
            Ok(post) => post,
            Err(rejection) => return Extraction::Rejected(rejection),
        };

        let mentions = explicit_list(&post.body, "mentions")
            .unwrap_or_else(|| scan_mentions(&post.content));
        let tags = explicit_list(&post.body, "tags").unwrap_or_else(|| scan_tags(&post.content));
        let reply_target = match post.body.get("reply_to") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        };
        let raw_payload = Value::Object(post.body).to_string();

        Extraction::Accepted(CandidateRecord {
            block_number: ctx.block_number,
            timestamp: ctx.timestamp,
            position: ctx.position,
            author: post.author,
            content: post.content,
            mentions,
            tags,
            reply_target,
            raw_payload,
            transaction_id: ctx.transaction_id,
        })
    }

    /// The `(author, content)` key of `op` if it is a qualifying post.
    pub fn content_key(&self, op: &RawOperation) -> Option<ContentKey> {
        self.decode(op)
            .ok()
            .map(|post| ContentKey::new(&post.author, &post.content))
    }

    fn decode(&self, op: &RawOperation) -> Result<DecodedPost, Rejection> {
        if !op.is_custom_json() {
            return Err(Rejection::NotCustomJson);
        }
        let app_id = op.app_id().unwrap_or_default();
        if !self.app_ids.iter().any(|id| id == app_id) {
            return Err(Rejection::ForeignApp(app_id.to_string()));
        }

        let author = first_account(&op.payload, "required_posting_auths")
            .or_else(|| first_account(&op.payload, "required_auths"))
            .ok_or(Rejection::NoAuthor)?;

        let body = match op.payload.get("json") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => map,
                _ => return Err(Rejection::UndecodableBody),
            },
            _ => return Err(Rejection::UndecodableBody),
        };

        match body.get("type").and_then(Value::as_str) {
            Some("post") => {}
            other => return Err(Rejection::UnsupportedType(other.unwrap_or_default().to_string())),
        }

        let content = body
            .get("content")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if content.is_empty() {
            return Err(Rejection::EmptyContent);
        }

        Ok(DecodedPost {
            author,
            content: content.to_string(),
            body,
        })
    }
}

fn first_account(payload: &Value, field: &str) -> Option<String> {
    payload
        .get(field)?
        .as_array()?
        .first()?
        .as_str()
        .map(|a| a.trim().to_ascii_lowercase())
        .filter(|a| !a.is_empty())
}

/// An explicitly supplied string list; `None` when absent or empty.
fn explicit_list(body: &Map<String, Value>, field: &str) -> Option<Vec<String>> {
    let items: Vec<String> = body
        .get(field)?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

/// `@handle` tokens in `content`: sorted, de-duplicated, 2–32 chars.
pub fn scan_mentions(content: &str) -> Vec<String> {
    scan(&MENTION_RE, content, &['-', '.'], 2)
}

/// `#tag` tokens in `content`: sorted, de-duplicated, 1–32 chars.
pub fn scan_tags(content: &str) -> Vec<String> {
    scan(&TAG_RE, content, &['-', '_'], 1)
}

fn scan(re: &Regex, content: &str, strip: &[char], min_len: usize) -> Vec<String> {
    let lowered = content.to_lowercase();
    let mut found: Vec<String> = re
        .captures_iter(&lowered)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_matches(strip).to_string())
        .filter(|s| (min_len..=32).contains(&s.len()))
        .collect();
    found.sort();
    found.dedup();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> OperationContext {
        OperationContext {
            block_number: 100,
            timestamp: Utc::now(),
            position: OperationPosition {
                tx_index: 2,
                op_index: 0,
            },
            transaction_id: Some("abc123".into()),
        }
    }

    fn extractor() -> Extractor {
        Extractor::new(["hive.micro"])
    }

    fn accepted(e: Extraction) -> CandidateRecord {
        match e {
            Extraction::Accepted(c) => c,
            Extraction::Rejected(r) => panic!("unexpected rejection: {r:?}"),
        }
    }

    #[test]
    fn extracts_post_with_scanned_mentions_and_tags() {
        let op = RawOperation::custom_json(
            "hive.micro",
            &["alice"],
            &json!({"type": "post", "content": "hello @bob #intro"}),
        );
        let c = accepted(extractor().extract(&op, ctx()));
        assert_eq!(c.author, "alice");
        assert_eq!(c.content, "hello @bob #intro");
        assert_eq!(c.mentions, vec!["bob"]);
        assert_eq!(c.tags, vec!["intro"]);
        assert_eq!(c.transaction_id.as_deref(), Some("abc123"));
        assert_eq!(c.block_number, 100);
    }

    #[test]
    fn inline_object_body_and_active_authority() {
        let op = RawOperation::new(
            "custom_json_operation",
            json!({
                "id": "hive.micro",
                "required_auths": ["Carol"],
                "required_posting_auths": [],
                "json": {"type": "post", "content": "  hi  ", "reply_to": "parent1"},
            }),
        );
        let c = accepted(extractor().extract(&op, ctx()));
        assert_eq!(c.author, "carol");
        assert_eq!(c.content, "hi");
        assert_eq!(c.reply_target.as_deref(), Some("parent1"));
    }

    #[test]
    fn explicit_fields_win_independently() {
        let op = RawOperation::custom_json(
            "hive.micro",
            &["alice"],
            &json!({"type": "post", "content": "hey @bob #rust", "mentions": ["dave"]}),
        );
        let c = accepted(extractor().extract(&op, ctx()));
        assert_eq!(c.mentions, vec!["dave"]);
        assert_eq!(c.tags, vec!["rust"]);
    }

    #[test]
    fn rejection_reasons() {
        let ex = extractor();
        let vote = RawOperation::new("vote", json!({}));
        assert_eq!(
            ex.extract(&vote, ctx()),
            Extraction::Rejected(Rejection::NotCustomJson)
        );

        let foreign = RawOperation::custom_json("sm_market", &["alice"], &json!({"type": "post"}));
        assert_eq!(
            ex.extract(&foreign, ctx()),
            Extraction::Rejected(Rejection::ForeignApp("sm_market".into()))
        );

        let no_author = RawOperation::custom_json("hive.micro", &[], &json!({"type": "post", "content": "x"}));
        assert_eq!(ex.extract(&no_author, ctx()), Extraction::Rejected(Rejection::NoAuthor));

        let mut bad = RawOperation::custom_json("hive.micro", &["alice"], &json!({}));
        bad.payload["json"] = json!("{not json");
        assert_eq!(ex.extract(&bad, ctx()), Extraction::Rejected(Rejection::UndecodableBody));

        let follow = RawOperation::custom_json("hive.micro", &["alice"], &json!({"type": "follow"}));
        assert_eq!(
            ex.extract(&follow, ctx()),
            Extraction::Rejected(Rejection::UnsupportedType("follow".into()))
        );

        let blank = RawOperation::custom_json("hive.micro", &["alice"], &json!({"type": "post", "content": "   "}));
        assert_eq!(ex.extract(&blank, ctx()), Extraction::Rejected(Rejection::EmptyContent));
    }

    #[test]
    fn multiple_app_ids() {
        let ex = Extractor::new(["hive.micro", "hive.micro.beta"]);
        let op = RawOperation::custom_json("hive.micro.beta", &["alice"], &json!({"type": "post", "content": "x"}));
        assert!(matches!(ex.extract(&op, ctx()), Extraction::Accepted(_)));
    }

    #[test]
    fn mention_scan_normalizes() {
        assert_eq!(
            scan_mentions("Hi @Bob. and @bob, also @x and @carol-"),
            vec!["bob", "carol"]
        );
        assert_eq!(scan_mentions("mail me at a@b"), Vec::<String>::new());
    }

    #[test]
    fn tag_scan_normalizes() {
        assert_eq!(scan_tags("#Rust #rust_ #_go- #a"), vec!["a", "go", "rust"]);
        assert!(scan_tags("# nothing").is_empty());
    }

    #[test]
    fn content_key_matches_candidate() {
        let op = RawOperation::custom_json("hive.micro", &["Alice"], &json!({"type": "post", "content": " hi "}));
        assert_eq!(extractor().content_key(&op), Some(ContentKey::new("alice", "hi")));
    }
}
