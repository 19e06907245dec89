//! # Ingreso (pluggable authentication/session engine)
//!
//! `ingreso` manages user credentials, signed sessions, time-based
//! two-factor verification, and role/permission-based authorization for a
//! hosting UI. The host renders every form and menu; this crate only
//! produces and consumes data through the [`Authenticator`] facade.
//!
//! ## Flow
//!
//! - [`Authenticator::login`] checks a username/password pair (Argon2id,
//!   per-user salt) and issues an HMAC-signed, self-contained session
//!   token. With `require_2fa` enabled the session awaits a one-time code.
//! - [`Authenticator::submit_2fa`] verifies the code (30 second windows,
//!   one step of skew, replay-proof) and re-signs the session as fully
//!   authenticated.
//! - [`Authenticator::logout`] revokes the token server-side.
//! - [`Authenticator::get_user_apps_perms`] resolves the named
//!   applications an identity may open; an admin role holds the whole
//!   configured catalog.
//!
//! ## Enumeration resistance
//!
//! An unknown username and a wrong password return the identical failure
//! and burn the same KDF work, so callers cannot probe for accounts.

pub mod authenticator;
pub mod config;
pub mod error;
pub mod password;
pub mod perms;
pub mod session;
pub mod store;
pub mod twofactor;

pub use authenticator::{AuthResult, Authenticator, NewUser};
pub use config::AuthConfig;
pub use error::{AuthError, AuthFailure};
pub use perms::PermissionResolver;
pub use session::{SessionManager, SessionRecord, SessionStage};
pub use store::users::{Role, UserRecord};
pub use twofactor::{Enrollment, TwoFactorVerifier};

/// Seconds since the Unix epoch; the single clock the engine reads.
pub(crate) fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
