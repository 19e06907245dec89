//! Password hashing: Argon2id with a per-user salt.
//!
//! The KDF cost is deliberate; `login` latency is dominated by it and
//! callers must not wrap the check in aggressive timeouts.

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::sync::OnceLock;

use crate::error::AuthError;

/// Fresh random salt, generated once per user at creation and on every
/// password change. Never reused across users.
pub(crate) fn generate_salt() -> SaltString {
    SaltString::generate(&mut OsRng)
}

/// Hash `password` with `salt` into a PHC-format digest.
pub(crate) fn hash_password(password: &str, salt: &SaltString) -> Result<String, AuthError> {
    let digest = Argon2::default()
        .hash_password(password.as_bytes(), salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;

    Ok(digest.to_string())
}

/// Verify `password` against a stored PHC digest.
///
/// A malformed stored digest verifies as false rather than erroring; a
/// corrupt row must deny access, not fail open.
pub(crate) fn verify_password(password: &str, digest: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(digest) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Burn the same KDF work as a real check so a login for a nonexistent
/// username is not distinguishable from a wrong password by timing.
pub(crate) fn verify_dummy(password: &str) {
    static DUMMY_DIGEST: OnceLock<String> = OnceLock::new();
    let digest = DUMMY_DIGEST.get_or_init(|| {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(b"ingreso-dummy-password", &salt)
            .map(|hash| hash.to_string())
            .unwrap_or_default()
    });
    let _ = verify_password(password, digest);
}

/// Reject empty and too-short passwords before any hashing happens.
pub(crate) fn validate_strength(password: &str, min_length: usize) -> Result<(), AuthError> {
    if password.is_empty() || password.chars().count() < min_length {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trip() {
        let salt = generate_salt();
        let digest = hash_password("correct horse battery", &salt).unwrap();
        assert!(verify_password("correct horse battery", &digest));
        assert!(!verify_password("wrong password", &digest));
    }

    #[test]
    fn salts_are_unique_per_call() {
        assert_ne!(generate_salt().as_str(), generate_salt().as_str());
    }

    #[test]
    fn malformed_digest_denies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn strength_rejects_empty_and_short() {
        assert!(matches!(
            validate_strength("", 8),
            Err(AuthError::WeakPassword)
        ));
        assert!(matches!(
            validate_strength("short", 8),
            Err(AuthError::WeakPassword)
        ));
        assert!(validate_strength("long enough", 8).is_ok());
    }
}
