//! Permission entries: `(identity, app_name)` rows.
//!
//! An identity is a username or a role name; admin never reaches this
//! table because resolution short-circuits on the role.

use sqlx::{Row, SqlitePool};
use tracing::Instrument;

/// Apps granted to either the username or its role, sorted and deduplicated
/// by the primary key plus `DISTINCT`.
pub(crate) async fn list_for_user(
    pool: &SqlitePool,
    username: &str,
    role: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let query = r"
        SELECT DISTINCT app_name FROM user_permissions
        WHERE identity IN (?1, ?2)
        ORDER BY app_name
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(username)
        .bind(role)
        .fetch_all(pool)
        .instrument(span)
        .await?;

    Ok(rows.iter().map(|row| row.get("app_name")).collect())
}

/// Idempotent grant; granting twice is a no-op.
pub(crate) async fn grant(
    pool: &SqlitePool,
    identity: &str,
    app_name: &str,
) -> Result<(), sqlx::Error> {
    let query = "INSERT OR IGNORE INTO user_permissions (identity, app_name) VALUES (?1, ?2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity)
        .bind(app_name)
        .execute(pool)
        .instrument(span)
        .await?;

    Ok(())
}

/// Idempotent revoke; it's fine if no rows are deleted.
pub(crate) async fn revoke(
    pool: &SqlitePool,
    identity: &str,
    app_name: &str,
) -> Result<(), sqlx::Error> {
    let query = "DELETE FROM user_permissions WHERE identity = ?1 AND app_name = ?2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity)
        .bind(app_name)
        .execute(pool)
        .instrument(span)
        .await?;

    Ok(())
}
