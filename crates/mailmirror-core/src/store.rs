use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;

use crate::model::{
    CandidateQuery, MailboxItem, SyncCursor, format_timestamp, parse_timestamp,
};

const IN_CLAUSE_CHUNK: usize = 500;

const INSERT_ITEM_SQL: &str = "INSERT OR IGNORE INTO messages
     (uid, message_id, sender_raw, sender_address, sender_name, recipient_raw, subject,
      raw_date, date_utc, size_bytes, fetched_at)
     SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
     WHERE NOT EXISTS (SELECT 1 FROM tombstones WHERE uid = ?)";

const ITEM_COLUMNS: &str = "uid, message_id, sender_raw, sender_address, sender_name, recipient_raw,
     subject, raw_date, date_utc, size_bytes, fetched_at";

type ItemRow = (
    i64,
    Option<String>,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
    String,
);

/// Persistent side of the mirror: items keyed by uid, the singleton sync
/// cursor and the tombstone set.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Returns true only when the row was newly written. Tombstoned uids are
    /// never written.
    async fn insert_if_absent(&self, item: &MailboxItem) -> Result<bool>;
    /// Writes all items in one transaction and returns how many were new.
    async fn insert_batch(&self, items: &[MailboxItem]) -> Result<usize>;
    async fn cursor(&self) -> Result<SyncCursor>;
    /// No-op returning false when `max_uid` is below the stored cursor.
    async fn advance_cursor(&self, max_uid: u32, total_estimate: u32) -> Result<bool>;
    /// Records tombstones and drops the matching items in one transaction.
    /// Returns the number of uids that were not already tombstoned.
    async fn tombstone(&self, uids: &[u32]) -> Result<usize>;
    async fn excluded_uids(&self) -> Result<HashSet<u32>>;
}

#[derive(Clone)]
pub struct SqliteMirrorStore {
    pool: SqlitePool,
}

impl SqliteMirrorStore {
    pub async fn connect(path: &str) -> Result<Self> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{}", path)
        };
        let options = SqliteConnectOptions::new()
            .filename(url.trim_start_matches("sqlite:"))
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Connects and applies migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let store = Self::connect(path).await?;
        store.init().await?;
        debug!(path, "mirror store ready");
        Ok(store)
    }

    pub async fn count_items(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn count_tombstones(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tombstones")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn get_item(&self, uid: u32) -> Result<Option<MailboxItem>> {
        let query = format!("SELECT {} FROM messages WHERE uid = ?", ITEM_COLUMNS);
        let row = sqlx::query_as::<_, ItemRow>(&query)
            .bind(i64::from(uid))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(item_from_row))
    }

    /// Items present locally for the given uids, ordered by uid. Unknown uids
    /// are silently absent from the result.
    pub async fn items_for_uids(&self, uids: &[u32]) -> Result<Vec<MailboxItem>> {
        let mut items = Vec::new();
        for chunk in uids.chunks(IN_CLAUSE_CHUNK) {
            let query = format!(
                "SELECT {} FROM messages WHERE uid IN ({}) ORDER BY uid",
                ITEM_COLUMNS,
                placeholders(chunk.len())
            );
            let mut q = sqlx::query_as::<_, ItemRow>(&query);
            for uid in chunk {
                q = q.bind(i64::from(*uid));
            }
            items.extend(q.fetch_all(&self.pool).await?.into_iter().map(item_from_row));
        }
        items.sort_by_key(|item| item.uid);
        Ok(items)
    }

    pub async fn find_uids(&self, query: &CandidateQuery) -> Result<Vec<u32>> {
        let patterns: Vec<String> = query
            .sender_patterns
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| contains_pattern(&p.to_lowercase()))
            .collect();
        let subject = query
            .subject_contains
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(contains_pattern);

        let mut sql = String::from("SELECT uid FROM messages WHERE 1 = 1");
        if !patterns.is_empty() {
            let clauses = patterns
                .iter()
                .map(|_| "sender_address LIKE ? ESCAPE '\\'")
                .collect::<Vec<_>>()
                .join(" OR ");
            sql.push_str(&format!(" AND ({})", clauses));
        }
        if query.before.is_some() {
            sql.push_str(" AND date_utc IS NOT NULL AND date_utc < ?");
        }
        if query.min_size.is_some() {
            sql.push_str(" AND size_bytes >= ?");
        }
        if subject.is_some() {
            sql.push_str(" AND subject LIKE ? ESCAPE '\\'");
        }
        sql.push_str(" ORDER BY uid");

        let mut q = sqlx::query_as::<_, (i64,)>(&sql);
        for pattern in &patterns {
            q = q.bind(pattern);
        }
        if let Some(before) = query.before.as_ref() {
            q = q.bind(format_timestamp(before));
        }
        if let Some(min_size) = query.min_size {
            q = q.bind(i64::from(min_size));
        }
        if let Some(subject) = subject.as_ref() {
            q = q.bind(subject);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.0 as u32).collect())
    }
}

/// `LIKE` pattern matching `needle` literally anywhere in the column.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl MirrorStore for SqliteMirrorStore {
    async fn insert_if_absent(&self, item: &MailboxItem) -> Result<bool> {
        let result = bind_item(sqlx::query(INSERT_ITEM_SQL), item)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_batch(&self, items: &[MailboxItem]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for item in items {
            let result = bind_item(sqlx::query(INSERT_ITEM_SQL), item)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }
        tx.commit().await?;
        debug!(batch = items.len(), inserted, "insert_batch committed");
        Ok(inserted)
    }

    async fn cursor(&self) -> Result<SyncCursor> {
        let row = sqlx::query_as::<_, (i64, Option<String>, i64)>(
            "SELECT last_seen_uid, last_sync_at, remote_total_estimate FROM sync_cursor WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(|r| SyncCursor {
                last_seen_uid: r.0 as u32,
                last_sync_time: r.1.as_deref().and_then(parse_timestamp),
                remote_total_estimate: r.2 as u32,
            })
            .unwrap_or_default())
    }

    async fn advance_cursor(&self, max_uid: u32, total_estimate: u32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sync_cursor
             SET last_seen_uid = ?, last_sync_at = ?, remote_total_estimate = ?
             WHERE id = 1 AND last_seen_uid <= ?",
        )
        .bind(i64::from(max_uid))
        .bind(format_timestamp(&Utc::now()))
        .bind(i64::from(total_estimate))
        .bind(i64::from(max_uid))
        .execute(&self.pool)
        .await?;
        let advanced = result.rows_affected() > 0;
        if !advanced {
            debug!(max_uid, "advance_cursor rejected, below stored cursor");
        }
        Ok(advanced)
    }

    async fn tombstone(&self, uids: &[u32]) -> Result<usize> {
        if uids.is_empty() {
            return Ok(0);
        }
        let removed_at = format_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut added = 0usize;
        for uid in uids {
            let result = sqlx::query("INSERT OR IGNORE INTO tombstones (uid, removed_at) VALUES (?, ?)")
                .bind(i64::from(*uid))
                .bind(&removed_at)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                added += 1;
            }
            sqlx::query("DELETE FROM messages WHERE uid = ?")
                .bind(i64::from(*uid))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(requested = uids.len(), added, "tombstones committed");
        Ok(added)
    }

    async fn excluded_uids(&self) -> Result<HashSet<u32>> {
        let rows = sqlx::query_as::<_, (i64,)>("SELECT uid FROM tombstones")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.0 as u32).collect())
    }
}

fn bind_item<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    item: &'q MailboxItem,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(i64::from(item.uid))
        .bind(item.message_id.as_deref())
        .bind(item.sender_raw.as_str())
        .bind(item.sender_address.as_str())
        .bind(item.sender_display_name.as_str())
        .bind(item.recipient_raw.as_str())
        .bind(item.subject.as_str())
        .bind(item.raw_date.as_str())
        .bind(item.normalized_timestamp.as_ref().map(format_timestamp))
        .bind(i64::from(item.size_bytes))
        .bind(format_timestamp(&item.fetched_at))
        .bind(i64::from(item.uid))
}

fn item_from_row(row: ItemRow) -> MailboxItem {
    MailboxItem {
        uid: row.0 as u32,
        message_id: row.1,
        sender_raw: row.2,
        sender_address: row.3,
        sender_display_name: row.4,
        recipient_raw: row.5,
        subject: row.6,
        raw_date: row.7,
        normalized_timestamp: row.8.as_deref().and_then(parse_timestamp),
        size_bytes: row.9 as u32,
        fetched_at: parse_timestamp(&row.10).unwrap_or_default(),
    }
}

fn placeholders(count: usize) -> String {
    std::iter::repeat("?")
        .take(count)
        .collect::<Vec<_>>()
        .join(", ")
}
