//! Error taxonomy for the authentication engine.

use serde::Serialize;

/// Everything that can go wrong inside the engine.
///
/// Credential and token problems are recoverable: the [`Authenticator`]
/// folds them into the returned [`AuthResult`] so a host page can render a
/// status message instead of crashing. Store and internal failures are
/// fatal for the request and propagate as `Err` — continuing without a
/// trustworthy store would risk fail-open authentication.
///
/// [`Authenticator`]: crate::authenticator::Authenticator
/// [`AuthResult`]: crate::authenticator::AuthResult
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// Wrong password or unknown username, deliberately indistinguishable
    /// so callers cannot enumerate usernames.
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("account is not active")]
    AccountInactive,

    #[error("session token has expired")]
    SessionExpired,

    /// Signature mismatch, malformed token, or a revoked token id.
    #[error("invalid session token")]
    InvalidSessionToken,

    #[error("invalid two-factor code")]
    InvalidTwoFactorCode,

    /// Not a failure: the password checked out but a second factor is
    /// still pending. Surfaced so middleware-style callers can branch.
    #[error("two-factor verification required")]
    TwoFactorRequired,

    #[error("username already exists")]
    DuplicateUsername,

    /// Registration only: the username is empty, too long, or contains
    /// characters outside `[A-Za-z0-9._-]`.
    #[error("username has an invalid shape")]
    InvalidUsername,

    #[error("password does not meet the minimum requirements")]
    WeakPassword,

    /// The credential store cannot be reached. Fatal, never fail open.
    #[error("credential store unavailable: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The recoverable subset of [`AuthError`], carried inside an
/// `AuthResult` once the facade has absorbed the failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    InvalidCredentials,
    AccountInactive,
    SessionExpired,
    InvalidSessionToken,
    InvalidTwoFactorCode,
}

impl AuthError {
    /// Map a recoverable error to its [`AuthFailure`]; `None` means the
    /// error is fatal and must propagate.
    #[must_use]
    pub fn as_failure(&self) -> Option<AuthFailure> {
        match self {
            Self::InvalidCredentials => Some(AuthFailure::InvalidCredentials),
            Self::AccountInactive => Some(AuthFailure::AccountInactive),
            Self::SessionExpired => Some(AuthFailure::SessionExpired),
            Self::InvalidSessionToken => Some(AuthFailure::InvalidSessionToken),
            Self::InvalidTwoFactorCode => Some(AuthFailure::InvalidTwoFactorCode),
            Self::TwoFactorRequired
            | Self::DuplicateUsername
            | Self::InvalidUsername
            | Self::WeakPassword
            | Self::Store(_)
            | Self::Internal(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_not_recoverable() {
        let err = AuthError::Store(sqlx::Error::PoolClosed);
        assert!(err.as_failure().is_none());
    }

    #[test]
    fn credential_errors_recover_to_failures() {
        assert_eq!(
            AuthError::InvalidCredentials.as_failure(),
            Some(AuthFailure::InvalidCredentials)
        );
        assert_eq!(
            AuthError::SessionExpired.as_failure(),
            Some(AuthFailure::SessionExpired)
        );
    }
}
