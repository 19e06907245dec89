//! Session revocation list.
//!
//! Tokens are self-contained (signature plus embedded expiry), so the only
//! server-side session state is the set of revoked token ids. Rows become
//! dead weight once the token would have expired anyway; `prune_expired`
//! clears them and can run on any cadence shorter than the session
//! lifetime.

use sqlx::SqlitePool;
use tracing::Instrument;

/// Revoke a token id. Idempotent so logout can be retried safely.
pub(crate) async fn revoke_token(
    pool: &SqlitePool,
    token_id: &str,
    expires_at: i64,
) -> Result<(), sqlx::Error> {
    let query = "INSERT OR IGNORE INTO revoked_sessions (token_id, expires_at) VALUES (?1, ?2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_id)
        .bind(expires_at)
        .execute(pool)
        .instrument(span)
        .await?;

    Ok(())
}

pub(crate) async fn is_revoked(pool: &SqlitePool, token_id: &str) -> Result<bool, sqlx::Error> {
    let query = "SELECT 1 FROM revoked_sessions WHERE token_id = ?1 LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;

    Ok(row.is_some())
}

/// Delete revocation rows whose token has expired. Returns rows deleted.
pub(crate) async fn prune_expired(pool: &SqlitePool, now: i64) -> Result<u64, sqlx::Error> {
    let query = "DELETE FROM revoked_sessions WHERE expires_at <= ?1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await?;

    Ok(result.rows_affected())
}
