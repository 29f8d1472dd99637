//! SQLite storage backend for ChainFeed.
//!
//! Persists the checkpoint and records to a single SQLite file using `sqlx`
//! in WAL mode, so the serving layer and an offline reconciler can read while
//! the watcher writes.
//!
//! # Usage
//! ```rust,no_run
//! use chainfeed_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./chainfeed.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainfeed_core::checkpoint::{Checkpoint, CheckpointStore};
use chainfeed_core::error::FeedError;
use chainfeed_core::store::{CommitOutcome, FeedStore, UpgradeOutcome};
use chainfeed_core::types::{BlockRange, FeedStatus, ProvisionalId, Record};

const CHECKPOINT_ROW: i64 = 1;

/// SQLite-backed storage for the checkpoint and records.
pub struct SqliteStorage {
    pool: SqlitePool,
}

/// Map a sqlx error into the feed taxonomy.
///
/// A missing table means the database is not ours (or was wiped); nothing
/// good comes from retrying that.
fn storage_err(e: sqlx::Error) -> FeedError {
    if let Some(db) = e.as_database_error() {
        if db.message().contains("no such table") {
            return FeedError::Fatal(db.message().to_string());
        }
    }
    FeedError::Storage(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map_or(false, |db| db.is_unique_violation())
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainfeed.db"`) or a full
    /// SQLite URL (`"sqlite:./chainfeed.db"`).
    pub async fn open(path: &str) -> Result<Self, FeedError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(storage_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection: every `:memory:` connection is its own
    /// database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, FeedError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and indexes.
    async fn init_schema(&self) -> Result<(), FeedError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id         INTEGER PRIMARY KEY,
                last_block INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS records (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                identifier   TEXT    NOT NULL UNIQUE,
                block_number INTEGER NOT NULL,
                timestamp    TEXT    NOT NULL,
                author       TEXT    NOT NULL,
                content      TEXT    NOT NULL,
                mentions     TEXT    NOT NULL,
                tags         TEXT    NOT NULL,
                reply_target TEXT,
                raw_payload  TEXT    NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_records_block ON records (block_number);",
            "CREATE INDEX IF NOT EXISTS idx_records_author ON records (author);",
            "CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records (timestamp);",
            "CREATE INDEX IF NOT EXISTS idx_records_reply ON records (reply_target);",
        ];
        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    fn record_from_row(row: &SqliteRow) -> Result<Record, FeedError> {
        let decode = |e: sqlx::Error| FeedError::Storage(format!("corrupt record row: {e}"));
        let decode_list = |column: &str, raw: &str| -> Result<Vec<String>, FeedError> {
            serde_json::from_str(raw)
                .map_err(|e| FeedError::Storage(format!("corrupt {column} column: {e}")))
        };
        let mentions: String = row.try_get("mentions").map_err(decode)?;
        let tags: String = row.try_get("tags").map_err(decode)?;
        Ok(Record {
            identifier: row.try_get("identifier").map_err(decode)?,
            block_number: row.try_get::<i64, _>("block_number").map_err(decode)? as u64,
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp").map_err(decode)?,
            author: row.try_get("author").map_err(decode)?,
            content: row.try_get("content").map_err(decode)?,
            mentions: decode_list("mentions", &mentions)?,
            tags: decode_list("tags", &tags)?,
            reply_target: row.try_get("reply_target").map_err(decode)?,
            raw_payload: row.try_get("raw_payload").map_err(decode)?,
        })
    }

    async fn fetch_records(
        &self,
        sql: &str,
        binds: &[i64],
    ) -> Result<Vec<Record>, FeedError> {
        let mut query = sqlx::query(sql);
        for b in binds {
            query = query.bind(*b);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
        rows.iter().map(Self::record_from_row).collect()
    }
}

const RECORD_COLUMNS: &str =
    "identifier, block_number, timestamp, author, content, mentions, tags, reply_target, raw_payload";

// ─── CheckpointStore impl ────────────────────────────────────────────────────

async fn current_checkpoint(
    conn: &mut sqlx::SqliteConnection,
) -> Result<Option<Checkpoint>, FeedError> {
    let row = sqlx::query("SELECT last_block, updated_at FROM checkpoints WHERE id = ?")
        .bind(CHECKPOINT_ROW)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(row.map(|r| Checkpoint {
        last_block: r.get::<i64, _>("last_block") as u64,
        updated_at: r.get("updated_at"),
    }))
}

async fn write_checkpoint(
    conn: &mut sqlx::SqliteConnection,
    checkpoint: Checkpoint,
) -> Result<(), FeedError> {
    // conditional upsert: a regressing value leaves the row untouched
    let written = sqlx::query(
        "INSERT INTO checkpoints (id, last_block, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             last_block = excluded.last_block,
             updated_at = excluded.updated_at
         WHERE excluded.last_block >= checkpoints.last_block",
    )
    .bind(CHECKPOINT_ROW)
    .bind(checkpoint.last_block as i64)
    .bind(checkpoint.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?
    .rows_affected();

    if written == 0 {
        let current = current_checkpoint(conn).await?.map_or(0, |c| c.last_block);
        return Err(FeedError::CheckpointRegression {
            current,
            attempted: checkpoint.last_block,
        });
    }
    Ok(())
}

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, FeedError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        current_checkpoint(&mut *conn).await
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), FeedError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        write_checkpoint(&mut *tx, checkpoint).await?;
        tx.commit().await.map_err(storage_err)?;
        debug!(block = checkpoint.last_block, "checkpoint saved");
        Ok(())
    }
}

// ─── FeedStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl FeedStore for SqliteStorage {
    async fn contains(&self, identifier: &str) -> Result<bool, FeedError> {
        let row = sqlx::query("SELECT 1 FROM records WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.is_some())
    }

    async fn commit_batch(
        &self,
        records: &[Record],
        checkpoint: Checkpoint,
    ) -> Result<CommitOutcome, FeedError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut outcome = CommitOutcome::default();

        for record in records {
            let mentions = serde_json::to_string(&record.mentions)
                .map_err(|e| FeedError::Storage(e.to_string()))?;
            let tags = serde_json::to_string(&record.tags)
                .map_err(|e| FeedError::Storage(e.to_string()))?;

            let result = sqlx::query(
                "INSERT OR IGNORE INTO records
                 (identifier, block_number, timestamp, author, content, mentions, tags, reply_target, raw_payload)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.identifier)
            .bind(record.block_number as i64)
            .bind(record.timestamp)
            .bind(&record.author)
            .bind(&record.content)
            .bind(&mentions)
            .bind(&tags)
            .bind(&record.reply_target)
            .bind(&record.raw_payload)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

            if result.rows_affected() == 0 {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        // dropping `tx` on error rolls back the inserts
        write_checkpoint(&mut *tx, checkpoint).await?;
        tx.commit().await.map_err(storage_err)?;

        debug!(
            block = checkpoint.last_block,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "batch committed"
        );
        Ok(outcome)
    }

    async fn record(&self, identifier: &str) -> Result<Option<Record>, FeedError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE identifier = ?"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn records_in_block(&self, block_number: u64) -> Result<Vec<Record>, FeedError> {
        self.fetch_records(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE block_number = ? ORDER BY id"),
            &[block_number as i64],
        )
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Record>, FeedError> {
        self.fetch_records(
            &format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY timestamp DESC, id DESC LIMIT ?"),
            &[limit as i64],
        )
        .await
    }

    async fn provisional_records(
        &self,
        range: BlockRange,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, FeedError> {
        // GLOB narrows the scan; the exact shape is checked client-side.
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE identifier GLOB '[0-9]*-[0-9]*-[0-9]*'
               AND (? IS NULL OR block_number >= ?)
               AND (? IS NULL OR block_number <= ?)
             ORDER BY block_number, id"
        ))
        .bind(range.start.map(|b| b as i64))
        .bind(range.start.map(|b| b as i64))
        .bind(range.end.map(|b| b as i64))
        .bind(range.end.map(|b| b as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut records = Vec::new();
        for row in &rows {
            let record = Self::record_from_row(row)?;
            if ProvisionalId::is_provisional(&record.identifier) {
                records.push(record);
                if limit.map_or(false, |l| records.len() >= l) {
                    break;
                }
            }
        }
        Ok(records)
    }

    async fn upgrade_identifier(&self, old: &str, new: &str) -> Result<UpgradeOutcome, FeedError> {
        // The first statement must write: under WAL a read snapshot taken
        // before a concurrent commit can not be upgraded (SQLITE_BUSY_SNAPSHOT).
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let renamed = match sqlx::query("UPDATE records SET identifier = ? WHERE identifier = ?")
            .bind(new)
            .bind(old)
            .execute(&mut *tx)
            .await
        {
            Ok(r) => r.rows_affected(),
            Err(e) if is_unique_violation(&e) => return Ok(UpgradeOutcome::Collision),
            Err(e) => return Err(storage_err(e)),
        };
        if renamed == 0 {
            return Ok(UpgradeOutcome::Missing);
        }

        let cascaded = sqlx::query("UPDATE records SET reply_target = ? WHERE reply_target = ?")
            .bind(new)
            .bind(old)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();

        tx.commit().await.map_err(storage_err)?;
        debug!(old, new, cascaded, "identifier upgraded");
        Ok(UpgradeOutcome::Upgraded { cascaded })
    }

    async fn status(&self) -> Result<FeedStatus, FeedError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM records")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        let last_block = self.load_checkpoint().await?.map_or(0, |c| c.last_block);
        Ok(FeedStatus {
            record_count: cnt as u64,
            last_block,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
