//! Second factor: time-based one-time codes.
//!
//! Codes are SHA1/6 digits/30 second steps, with exactly one adjacent
//! window of clock skew tolerated on either side. The highest accepted
//! time-step is persisted per user so a code can never be replayed within
//! its window.

use anyhow::anyhow;
use sqlx::SqlitePool;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::debug;

use crate::error::AuthError;
use crate::store::users;
use crate::unix_now;

const STEP_SECONDS: i64 = 30;

/// Returned exactly once at enrollment; the secret is never surfaced again
/// except by re-enrollment.
#[derive(Clone, Debug)]
pub struct Enrollment {
    /// Base32 shared secret, for manual entry.
    pub secret: String,
    /// otpauth:// provisioning URI for QR display by the host.
    pub otpauth_url: String,
}

#[derive(Clone)]
pub struct TwoFactorVerifier {
    pool: SqlitePool,
    issuer: String,
}

impl TwoFactorVerifier {
    pub(crate) fn new(pool: SqlitePool, site_name: &str) -> Self {
        Self {
            pool,
            issuer: issuer_label(site_name),
        }
    }

    /// Generate and persist a fresh secret for `username`.
    ///
    /// Only valid while the user has no confirmed second factor; enrolling
    /// again before confirmation overwrites the pending secret.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown user, `Store` on I/O failure,
    /// `Internal` when the user already has a confirmed factor.
    pub(crate) async fn enroll(&self, username: &str) -> Result<Enrollment, AuthError> {
        let user = users::get_user(&self.pool, username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if user.twofa_enabled {
            return Err(anyhow!("second factor already confirmed for this user").into());
        }

        let secret = Secret::generate_secret();
        let secret_base32 = secret.to_encoded().to_string();
        let totp = self.build_totp(&secret_base32, username)?;

        if !users::set_pending_twofa_secret(&self.pool, username, &secret_base32).await? {
            return Err(anyhow!("lost enrollment race for {username}").into());
        }

        debug!(username, "two-factor enrollment started");

        Ok(Enrollment {
            otpauth_url: totp.get_url(),
            secret: secret_base32,
        })
    }

    /// Check `code` against the user's secret at the current time.
    pub(crate) async fn verify(&self, username: &str, code: &str) -> Result<bool, AuthError> {
        self.verify_at(username, code, unix_now()).await
    }

    /// Clock-injected variant of [`verify`](Self::verify).
    ///
    /// A valid code for a pending enrollment confirms it; a valid code for
    /// a confirmed factor advances the replay watermark. Both paths go
    /// through guarded updates, so a code from an already-consumed window
    /// fails even under concurrent submissions.
    pub(crate) async fn verify_at(
        &self,
        username: &str,
        code: &str,
        now: i64,
    ) -> Result<bool, AuthError> {
        let Some(user) = users::get_user(&self.pool, username).await? else {
            return Ok(false);
        };
        let Some(secret) = user.twofa_secret.as_deref() else {
            return Ok(false);
        };

        let totp = self.build_totp(secret, username)?;
        let Some(step) = matching_step(&totp, code, now) else {
            debug!(username, "two-factor code did not match any window");
            return Ok(false);
        };

        let accepted = if user.twofa_enabled {
            users::record_twofa_step(&self.pool, username, step).await?
        } else {
            users::confirm_twofa(&self.pool, username, step).await?
        };

        if !accepted {
            debug!(username, step, "two-factor code replayed, rejecting");
        }

        Ok(accepted)
    }

    fn build_totp(&self, secret_base32: &str, account: &str) -> Result<TOTP, AuthError> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|err| anyhow!("stored secret is not valid base32: {err:?}"))?;

        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            STEP_SECONDS as u64,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|err| anyhow!("TOTP init error: {err}").into())
    }
}

/// Find which time-step (current, previous, or next) produces `code`.
fn matching_step(totp: &TOTP, code: &str, now: i64) -> Option<i64> {
    if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    for offset in [0, -1, 1] {
        let at = now + offset * STEP_SECONDS;
        if at < 0 {
            continue;
        }
        #[allow(clippy::cast_sign_loss)]
        if totp.generate(at as u64) == code {
            return Some(at / STEP_SECONDS);
        }
    }
    None
}

/// otpauth URIs reject colons in the issuer, so a site name given as a URL
/// is reduced to its label.
fn issuer_label(site_name: &str) -> String {
    let label = site_name
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_matches('/')
        .replace(':', "");
    if label.is_empty() {
        "ingreso".to_string()
    } else {
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_totp() -> TOTP {
        let secret = Secret::Encoded("JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".to_string())
            .to_bytes()
            .unwrap();
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some("example".to_string()),
            "alice".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn current_window_matches() {
        let totp = test_totp();
        let now = 1_700_000_000;
        let code = totp.generate(now as u64);
        assert_eq!(matching_step(&totp, &code, now), Some(now / 30));
    }

    #[test]
    fn adjacent_windows_match_but_not_two_steps_away() {
        let totp = test_totp();
        let now = 1_700_000_000;
        let previous = totp.generate((now - 30) as u64);
        let next = totp.generate((now + 30) as u64);
        let stale = totp.generate((now - 60) as u64);
        assert_eq!(matching_step(&totp, &previous, now), Some((now - 30) / 30));
        assert_eq!(matching_step(&totp, &next, now), Some((now + 30) / 30));
        assert_eq!(matching_step(&totp, &stale, now), None);
    }

    #[test]
    fn malformed_codes_never_match() {
        let totp = test_totp();
        assert_eq!(matching_step(&totp, "12345", 1_700_000_000), None);
        assert_eq!(matching_step(&totp, "12345a", 1_700_000_000), None);
        assert_eq!(matching_step(&totp, "", 1_700_000_000), None);
    }

    #[test]
    fn issuer_label_strips_scheme_and_colons() {
        assert_eq!(issuer_label("https://auth.example.test/"), "auth.example.test");
        assert_eq!(issuer_label("intranet:8080"), "intranet8080");
        assert_eq!(issuer_label(""), "ingreso");
    }
}
