//! User records: lookups and guarded single-row writes.

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{warn, Instrument};

/// Closed set of roles. `Admin` short-circuits permission resolution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// One row of the `users` table. Never physically deleted; deactivation
/// flips `is_active`.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub password_salt: String,
    pub role: Role,
    pub is_active: bool,
    pub twofa_secret: Option<String>,
    pub twofa_enabled: bool,
    pub twofa_last_step: i64,
    pub created_at: i64,
}

/// Outcome when attempting to create a user.
#[derive(Debug)]
pub(crate) enum CreateUserOutcome {
    Created,
    Duplicate,
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> UserRecord {
    let role_text: String = row.get("role");
    let role = Role::from_str(&role_text).unwrap_or_else(|| {
        warn!(role = %role_text, "unknown role in store, treating as user");
        Role::User
    });
    UserRecord {
        username: row.get("username"),
        display_name: row.get("display_name"),
        password_hash: row.get("password_hash"),
        password_salt: row.get("password_salt"),
        role,
        is_active: row.get("is_active"),
        twofa_secret: row.get("twofa_secret"),
        twofa_enabled: row.get("twofa_enabled"),
        twofa_last_step: row.get("twofa_last_step"),
        created_at: row.get("created_at"),
    }
}

pub(crate) async fn get_user(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<UserRecord>, sqlx::Error> {
    let query = "SELECT * FROM users WHERE username = ?1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(username)
        .fetch_optional(pool)
        .instrument(span)
        .await?;

    Ok(row.as_ref().map(record_from_row))
}

pub(crate) async fn create_user(
    pool: &SqlitePool,
    record: &UserRecord,
) -> Result<CreateUserOutcome, sqlx::Error> {
    let query = r"
        INSERT INTO users
            (username, display_name, password_hash, password_salt, role,
             is_active, twofa_secret, twofa_enabled, twofa_last_step, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(&record.username)
        .bind(&record.display_name)
        .bind(&record.password_hash)
        .bind(&record.password_salt)
        .bind(record.role.as_str())
        .bind(record.is_active)
        .bind(&record.twofa_secret)
        .bind(record.twofa_enabled)
        .bind(record.twofa_last_step)
        .bind(record.created_at)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(CreateUserOutcome::Created),
        Err(err) if super::is_unique_violation(&err) => Ok(CreateUserOutcome::Duplicate),
        Err(err) => Err(err),
    }
}

/// Replace the password hash and salt in one statement.
pub(crate) async fn update_password(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
    password_salt: &str,
) -> Result<bool, sqlx::Error> {
    let query = r"
        UPDATE users
        SET password_hash = ?2, password_salt = ?3
        WHERE username = ?1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(username)
        .bind(password_hash)
        .bind(password_salt)
        .execute(pool)
        .instrument(span)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Store a freshly generated secret for a pending enrollment.
///
/// Guarded so a confirmed secret is never clobbered by a concurrent
/// re-enrollment attempt; re-enrolling a confirmed user requires the
/// caller to disable 2FA first.
pub(crate) async fn set_pending_twofa_secret(
    pool: &SqlitePool,
    username: &str,
    secret: &str,
) -> Result<bool, sqlx::Error> {
    let query = r"
        UPDATE users
        SET twofa_secret = ?2, twofa_last_step = 0
        WHERE username = ?1 AND twofa_enabled = 0
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(username)
        .bind(secret)
        .execute(pool)
        .instrument(span)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Confirm a pending enrollment and record the accepted time-step.
///
/// The `twofa_last_step < ?2` guard makes the confirm atomic with the
/// anti-replay bookkeeping: two racing confirms cannot both succeed.
pub(crate) async fn confirm_twofa(
    pool: &SqlitePool,
    username: &str,
    step: i64,
) -> Result<bool, sqlx::Error> {
    let query = r"
        UPDATE users
        SET twofa_enabled = 1, twofa_last_step = ?2
        WHERE username = ?1 AND twofa_secret IS NOT NULL AND twofa_last_step < ?2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(username)
        .bind(step)
        .execute(pool)
        .instrument(span)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Record an accepted code's time-step, compare-and-update style.
///
/// Returns `false` when `step` is not strictly newer than the stored one,
/// which is exactly the replay case.
pub(crate) async fn record_twofa_step(
    pool: &SqlitePool,
    username: &str,
    step: i64,
) -> Result<bool, sqlx::Error> {
    let query = r"
        UPDATE users
        SET twofa_last_step = ?2
        WHERE username = ?1 AND twofa_enabled = 1 AND twofa_last_step < ?2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(username)
        .bind(step)
        .execute(pool)
        .instrument(span)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn set_active(
    pool: &SqlitePool,
    username: &str,
    active: bool,
) -> Result<bool, sqlx::Error> {
    let query = "UPDATE users SET is_active = ?2 WHERE username = ?1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(username)
        .bind(active)
        .execute(pool)
        .instrument(span)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_users(pool: &SqlitePool) -> Result<Vec<UserRecord>, sqlx::Error> {
    let query = "SELECT * FROM users ORDER BY username";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query).fetch_all(pool).instrument(span).await?;

    Ok(rows.iter().map(record_from_row).collect())
}

pub(crate) async fn admin_exists(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    let query = "SELECT 1 FROM users WHERE role = 'admin' LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query).fetch_optional(pool).instrument(span).await?;

    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_text() {
        assert_eq!(Role::from_str("admin"), Some(Role::Admin));
        assert_eq!(Role::from_str(" user "), Some(Role::User));
        assert_eq!(Role::from_str("root"), None);
        assert_eq!(Role::Admin.as_str(), "admin");
    }
}
