//! SQLite-backed credential store.
//!
//! All durable state lives here: user records, permission entries, and the
//! session revocation list. Single-row writes rely on SQLite's
//! single-writer serialization plus guarded `UPDATE ... WHERE` statements,
//! so concurrent logins for the same username cannot interleave into an
//! inconsistent record.

pub mod perms;
pub mod sessions;
pub mod users;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

/// Open a pool against `database_url` and apply the schema.
///
/// In-memory databases get a single connection: every SQLite `:memory:`
/// connection is its own database, so a larger pool would scatter state.
///
/// # Errors
/// Returns an error if the URL is invalid, the database cannot be opened,
/// or the schema fails to apply.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .context("invalid database url")?
        .create_if_missing(true);

    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .context("failed to connect to credential store")?;

    migrate(&pool).await?;

    Ok(pool)
}

/// Apply `sql/schema.sql`. Idempotent; every statement is `IF NOT EXISTS`.
///
/// # Errors
/// Returns an error if any schema statement fails to execute.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await
        .context("failed to apply schema")?;

    debug!("schema applied");

    Ok(())
}

/// SQLite reports unique violations as constraint errors 1555 (primary
/// key) or 2067 (unique index).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| code.as_ref() == "1555" || code.as_ref() == "2067"),
        _ => false,
    }
}
