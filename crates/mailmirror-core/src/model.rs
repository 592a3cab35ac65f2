use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Metadata snapshot of one remote message, keyed by its folder UID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxItem {
    pub uid: u32,
    pub message_id: Option<String>,
    pub sender_raw: String,
    pub sender_address: String,
    pub sender_display_name: String,
    pub recipient_raw: String,
    pub subject: String,
    pub raw_date: String,
    /// `None` when the `Date` header could not be interpreted.
    pub normalized_timestamp: Option<DateTime<Utc>>,
    pub size_bytes: u32,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub last_seen_uid: u32,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub remote_total_estimate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub uid: u32,
    pub removed_at: DateTime<Utc>,
}

/// Local selection of deletion candidates. Sender patterns are OR-ed,
/// every other field narrows the result further.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub sender_patterns: Vec<String>,
    pub before: Option<DateTime<Utc>>,
    pub min_size: Option<u32>,
    pub subject_contains: Option<String>,
}

impl CandidateQuery {
    pub fn is_empty(&self) -> bool {
        self.sender_patterns.iter().all(|p| p.trim().is_empty())
            && self.before.is_none()
            && self.min_size.is_none()
            && self
                .subject_contains
                .as_deref()
                .map(|s| s.trim().is_empty())
                .unwrap_or(true)
    }
}

/// Stored timestamp form. Fixed width UTC so lexical order is chronological.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
