use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout SQLite's `datetime()` produces, so stored values compare
/// correctly against `datetime('now')`.
pub const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

pub fn to_sqlite(ts: DateTime<Utc>) -> String {
    ts.format(SQLITE_DATETIME).to_string()
}

pub fn from_sqlite(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, SQLITE_DATETIME)
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub token: String,
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: String,
    pub expires_at: String,
    pub created_at: String,
}

impl SessionRecord {
    pub fn access_expired(&self, now: DateTime<Utc>) -> bool {
        from_sqlite(&self.access_expires_at).map_or(true, |ts| ts <= now)
    }
}
