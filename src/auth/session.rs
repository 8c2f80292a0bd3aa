use chrono::Utc;
use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::backend::{AuthSession, Backend};
use crate::db::models::{to_sqlite, SessionRecord};
use crate::error::AppResult;
use crate::state::DbPool;

/// Store a provider session and return the cookie token that refers to it.
pub fn create_session(pool: &DbPool, auth: &AuthSession, hours: u64) -> AppResult<String> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, token, user_id, email, access_token, refresh_token, access_expires_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now', ?8))",
        params![
            id,
            token,
            auth.user.id,
            auth.user.email,
            auth.access_token,
            auth.refresh_token,
            to_sqlite(auth.expires_at),
            format!("+{} hours", hours)
        ],
    )?;

    tracing::info!(user_id = %auth.user.id, "Session created");
    Ok(token)
}

/// Look up a session that has not outlived its cookie.
pub fn find_session(pool: &DbPool, token: &str) -> AppResult<Option<SessionRecord>> {
    let conn = pool.get()?;
    let record = conn
        .query_row(
            "SELECT id, token, user_id, email, access_token, refresh_token, access_expires_at, expires_at, created_at
             FROM sessions WHERE token = ?1 AND expires_at > datetime('now')",
            params![token],
            |row| {
                Ok(SessionRecord {
                    id: row.get(0)?,
                    token: row.get(1)?,
                    user_id: row.get(2)?,
                    email: row.get(3)?,
                    access_token: row.get(4)?,
                    refresh_token: row.get(5)?,
                    access_expires_at: row.get(6)?,
                    expires_at: row.get(7)?,
                    created_at: row.get(8)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Swap in freshly refreshed provider tokens.
pub fn update_tokens(pool: &DbPool, token: &str, auth: &AuthSession) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE sessions SET access_token = ?1, refresh_token = ?2, access_expires_at = ?3 WHERE token = ?4",
        params![
            auth.access_token,
            auth.refresh_token,
            to_sqlite(auth.expires_at),
            token
        ],
    )?;
    Ok(())
}

/// Delete a session by token, returning the provider access token it held.
pub fn delete_session(pool: &DbPool, token: &str) -> AppResult<Option<String>> {
    let conn = pool.get()?;
    let access_token: Option<String> = conn
        .query_row(
            "SELECT access_token FROM sessions WHERE token = ?1",
            params![token],
            |row| row.get(0),
        )
        .optional()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(access_token)
}

/// Resolve a cookie token to a live session, refreshing the provider access
/// token when it has expired. A session whose refresh fails is dropped.
pub async fn load_active(
    pool: &DbPool,
    backend: &dyn Backend,
    token: &str,
) -> AppResult<Option<SessionRecord>> {
    let Some(mut record) = find_session(pool, token)? else {
        return Ok(None);
    };

    if !record.access_expired(Utc::now()) {
        return Ok(Some(record));
    }

    match backend.refresh(&record.refresh_token).await {
        Ok(auth) => {
            update_tokens(pool, token, &auth)?;
            tracing::debug!(user_id = %record.user_id, "Refreshed access token");
            record.access_token = auth.access_token;
            record.refresh_token = auth.refresh_token;
            record.access_expires_at = to_sqlite(auth.expires_at);
            Ok(Some(record))
        }
        Err(e) => {
            tracing::warn!(user_id = %record.user_id, "Token refresh failed, dropping session: {}", e);
            delete_session(pool, token)?;
            Ok(None)
        }
    }
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
