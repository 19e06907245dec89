//! Signed, self-contained session tokens.
//!
//! A token is `base64url(payload).base64url(hmac_sha256(payload))`, keyed
//! by the installation-wide secret, so validation needs no session table.
//! The payload embeds `authenticated_2fa`; promoting a session after a
//! successful code re-signs the same payload with the flag flipped.
//!
//! Each login attempt walks one path through:
//!
//! - anonymous, then a valid username and password
//! - straight to fully authenticated when no second factor is required
//! - otherwise awaiting the second factor, promoted on a valid code
//! - back to anonymous on logout or expiry
//!
//! Logout is server-enforced: the token id lands in a revocation list that
//! `validate` consults, and expired entries are cleared by `prune`. The
//! alternative (client-only logout with purely stateless tokens) was
//! rejected because a leaked token would stay usable until expiry.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::sessions;
use crate::unix_now;

type HmacSha256 = Hmac<Sha256>;

/// Authentication stage a presented token proves. The anonymous stage has
/// no token at all, so invalid flag combinations cannot be represented.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionStage {
    AwaitingTwoFactor,
    FullyAuthenticated,
}

/// The signed token payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token_id: String,
    pub username: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub authenticated_2fa: bool,
}

impl SessionRecord {
    #[must_use]
    pub fn stage(&self) -> SessionStage {
        if self.authenticated_2fa {
            SessionStage::FullyAuthenticated
        } else {
            SessionStage::AwaitingTwoFactor
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    pool: SqlitePool,
    secret_key: SecretString,
    expiry_seconds: i64,
}

impl SessionManager {
    pub(crate) fn new(pool: SqlitePool, secret_key: SecretString, expiry_seconds: i64) -> Self {
        Self {
            pool,
            secret_key,
            expiry_seconds,
        }
    }

    /// Issue a fresh signed token for `username`.
    pub(crate) fn issue(
        &self,
        username: &str,
        authenticated_2fa: bool,
    ) -> Result<(SessionRecord, String), AuthError> {
        let issued_at = unix_now();
        let record = SessionRecord {
            token_id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            issued_at,
            expires_at: issued_at + self.expiry_seconds,
            authenticated_2fa,
        };
        let token = self.encode(&record)?;
        Ok((record, token))
    }

    /// Re-sign `record` with `authenticated_2fa = true`, keeping its id,
    /// issue time, and expiry. The previous token still carries the
    /// unpromoted flag, so it grants nothing new if replayed.
    pub(crate) fn promote(&self, record: &SessionRecord) -> Result<(SessionRecord, String), AuthError> {
        let promoted = SessionRecord {
            authenticated_2fa: true,
            ..record.clone()
        };
        let token = self.encode(&promoted)?;
        Ok((promoted, token))
    }

    /// Validate a presented token at the current time.
    pub(crate) async fn validate(&self, token: &str) -> Result<SessionRecord, AuthError> {
        self.validate_at(token, unix_now()).await
    }

    /// Clock-injected variant of [`validate`](Self::validate).
    ///
    /// Signature first, then expiry (a token presented at exactly
    /// `expires_at` is expired), then the revocation list.
    pub(crate) async fn validate_at(
        &self,
        token: &str,
        now: i64,
    ) -> Result<SessionRecord, AuthError> {
        let record = self.decode(token)?;

        if now >= record.expires_at {
            return Err(AuthError::SessionExpired);
        }

        if sessions::is_revoked(&self.pool, &record.token_id).await? {
            debug!(token_id = %record.token_id, "rejected revoked session token");
            return Err(AuthError::InvalidSessionToken);
        }

        Ok(record)
    }

    /// Revoke the session a token names, effective immediately.
    ///
    /// Tokens that fail the signature check have nothing to revoke and are
    /// ignored, so logout never errors on garbage input.
    pub(crate) async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let Ok(record) = self.decode(token) else {
            debug!("logout with undecodable token, nothing to revoke");
            return Ok(());
        };
        sessions::revoke_token(&self.pool, &record.token_id, record.expires_at).await?;
        Ok(())
    }

    /// Drop revocation entries for tokens that have expired on their own.
    pub(crate) async fn prune(&self) -> Result<u64, AuthError> {
        Ok(sessions::prune_expired(&self.pool, unix_now()).await?)
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length, so new_from_slice cannot fail.
        HmacSha256::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .expect("HMAC accepts any key length")
    }

    fn encode(&self, record: &SessionRecord) -> Result<String, AuthError> {
        let payload =
            serde_json::to_vec(record).map_err(|err| anyhow::anyhow!("encode payload: {err}"))?;
        let mut mac = self.mac();
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    fn decode(&self, token: &str) -> Result<SessionRecord, AuthError> {
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or(AuthError::InvalidSessionToken)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AuthError::InvalidSessionToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AuthError::InvalidSessionToken)?;

        let mut mac = self.mac();
        mac.update(&payload);
        // Constant-time comparison; a forged signature and a truncated one
        // are indistinguishable to the caller.
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidSessionToken)?;

        serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidSessionToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_manager() -> SessionManager {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        store::migrate(&pool).await.unwrap();
        SessionManager::new(pool, SecretString::from("unit-test-key".to_string()), 3600)
    }

    #[tokio::test]
    async fn issue_then_validate() {
        let manager = test_manager().await;
        let (record, token) = manager.issue("alice", false).unwrap();
        let validated = manager.validate(&token).await.unwrap();
        assert_eq!(validated.username, "alice");
        assert_eq!(validated.token_id, record.token_id);
        assert_eq!(validated.stage(), SessionStage::AwaitingTwoFactor);
    }

    #[tokio::test]
    async fn tampered_tokens_are_rejected() {
        let manager = test_manager().await;
        let (_, token) = manager.issue("alice", true).unwrap();

        let mut forged = token.clone();
        forged.pop();
        assert!(matches!(
            manager.validate(&forged).await,
            Err(AuthError::InvalidSessionToken)
        ));

        // Swap the payload for another user while keeping the signature.
        let signature = token.split_once('.').unwrap().1;
        let other = SessionRecord {
            token_id: Uuid::new_v4().to_string(),
            username: "mallory".to_string(),
            issued_at: 0,
            expires_at: i64::MAX,
            authenticated_2fa: true,
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&other).unwrap());
        assert!(matches!(
            manager.validate(&format!("{payload}.{signature}")).await,
            Err(AuthError::InvalidSessionToken)
        ));

        assert!(matches!(
            manager.validate("not-a-token").await,
            Err(AuthError::InvalidSessionToken)
        ));
    }

    #[tokio::test]
    async fn expiry_boundary_is_exclusive() {
        let manager = test_manager().await;
        let (record, token) = manager.issue("alice", true).unwrap();

        assert!(manager
            .validate_at(&token, record.expires_at - 1)
            .await
            .is_ok());
        assert!(matches!(
            manager.validate_at(&token, record.expires_at).await,
            Err(AuthError::SessionExpired)
        ));
        assert!(matches!(
            manager.validate_at(&token, record.expires_at + 1).await,
            Err(AuthError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn promotion_resigns_without_extending_expiry() {
        let manager = test_manager().await;
        let (record, token) = manager.issue("alice", false).unwrap();
        let (promoted, promoted_token) = manager.promote(&record).unwrap();

        assert_eq!(promoted.token_id, record.token_id);
        assert_eq!(promoted.expires_at, record.expires_at);
        assert!(promoted.authenticated_2fa);
        assert_ne!(token, promoted_token);

        let validated = manager.validate(&promoted_token).await.unwrap();
        assert_eq!(validated.stage(), SessionStage::FullyAuthenticated);

        // The unpromoted token still validates but proves less.
        let old = manager.validate(&token).await.unwrap();
        assert_eq!(old.stage(), SessionStage::AwaitingTwoFactor);
    }

    #[tokio::test]
    async fn revoked_tokens_stop_validating() {
        let manager = test_manager().await;
        let (_, token) = manager.issue("alice", true).unwrap();

        manager.revoke(&token).await.unwrap();
        assert!(matches!(
            manager.validate(&token).await,
            Err(AuthError::InvalidSessionToken)
        ));

        // Revoking again or revoking garbage is a no-op.
        manager.revoke(&token).await.unwrap();
        manager.revoke("garbage").await.unwrap();
    }

    #[tokio::test]
    async fn prune_only_drops_expired_entries() {
        let manager = test_manager().await;
        let (_, token) = manager.issue("alice", true).unwrap();
        manager.revoke(&token).await.unwrap();

        // Entry outlives its token only until the token itself expires.
        assert_eq!(manager.prune().await.unwrap(), 0);
        sessions::revoke_token(&manager.pool, "stale", unix_now() - 1)
            .await
            .unwrap();
        assert_eq!(manager.prune().await.unwrap(), 1);
    }
}
