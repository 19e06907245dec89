//! The `Authenticator` facade: the only surface a hosting UI calls.
//!
//! The facade orchestrates the credential store, password hasher,
//! second-factor verifier, session manager, and permission resolver. It
//! produces and consumes data only; every form, menu, and QR code is the
//! host's problem.

use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, instrument, warn};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthFailure};
use crate::password;
use crate::perms::PermissionResolver;
use crate::session::{SessionManager, SessionRecord};
use crate::store;
use crate::store::users::{self, CreateUserOutcome, Role, UserRecord};
use crate::twofactor::{Enrollment, TwoFactorVerifier};
use crate::unix_now;

/// Value object returned by every login-path call.
///
/// `authentication_status` distinguishes "no attempt yet" (`None`, initial
/// render) from a failed attempt (`Some(false)`). Credential and token
/// problems land in `failure` instead of an `Err`; only store and internal
/// faults propagate.
#[derive(Clone, Debug, Serialize)]
pub struct AuthResult {
    pub authentication_status: Option<bool>,
    pub username: String,
    pub display_name: String,
    pub authenticated_2fa: bool,
    pub role: Role,
    /// Present exactly once, immediately after enrollment.
    pub twofa_secret: Option<String>,
    /// otpauth:// URI matching `twofa_secret`, for QR display.
    pub twofa_otpauth_url: Option<String>,
    /// Signed session token for the host to hold and present back.
    pub token: Option<String>,
    pub failure: Option<AuthFailure>,
}

impl AuthResult {
    /// The state before any attempt was made, for an initial page render.
    #[must_use]
    pub fn unattempted() -> Self {
        Self {
            authentication_status: None,
            username: String::new(),
            display_name: String::new(),
            authenticated_2fa: false,
            role: Role::User,
            twofa_secret: None,
            twofa_otpauth_url: None,
            token: None,
            failure: None,
        }
    }

    fn denied(failure: AuthFailure) -> Self {
        Self {
            authentication_status: Some(false),
            failure: Some(failure),
            ..Self::unattempted()
        }
    }

    fn authenticated(user: &UserRecord, session: &SessionRecord, token: String) -> Self {
        Self {
            authentication_status: Some(true),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            authenticated_2fa: session.authenticated_2fa,
            role: user.role,
            twofa_secret: None,
            twofa_otpauth_url: None,
            token: Some(token),
            failure: None,
        }
    }
}

/// New-user data accepted by [`Authenticator::register`].
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub password: String,
}

pub struct Authenticator {
    pool: SqlitePool,
    config: AuthConfig,
    sessions: SessionManager,
    twofactor: TwoFactorVerifier,
    resolver: PermissionResolver,
}

impl Authenticator {
    /// Wire the engine onto an already-opened pool.
    #[must_use]
    pub fn new(pool: SqlitePool, config: AuthConfig) -> Self {
        let sessions = SessionManager::new(
            pool.clone(),
            config.secret_key().clone(),
            config.session_expiry_seconds(),
        );
        let twofactor = TwoFactorVerifier::new(pool.clone(), config.site_name());
        let resolver = PermissionResolver::new(pool.clone(), config.app_names());
        Self {
            pool,
            config,
            sessions,
            twofactor,
            resolver,
        }
    }

    /// Open `database_url`, apply the schema, and wire the engine.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or migrated.
    pub async fn connect(database_url: &str, config: AuthConfig) -> anyhow::Result<Self> {
        let pool = store::connect(database_url).await?;
        Ok(Self::new(pool, config))
    }

    /// Check a username/password pair and open a session.
    ///
    /// Unknown usernames and wrong passwords are indistinguishable in the
    /// result, and both cost one KDF verification. When a second factor is
    /// required the issued session awaits it, and a user without a
    /// confirmed secret gets a fresh enrollment surfaced once.
    ///
    /// # Errors
    /// Only store and internal faults; credential problems are folded into
    /// the returned [`AuthResult`].
    #[instrument(skip_all, fields(username = %username.trim()))]
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResult, AuthError> {
        match self.try_login(username.trim(), password).await {
            Ok(result) => Ok(result),
            Err(err) => match err.as_failure() {
                Some(failure) => {
                    debug!(?failure, "login denied");
                    Ok(AuthResult::denied(failure))
                }
                None => Err(err),
            },
        }
    }

    async fn try_login(&self, username: &str, password: &str) -> Result<AuthResult, AuthError> {
        let Some(user) = users::get_user(&self.pool, username).await? else {
            // Same KDF cost as the wrong-password path.
            password::verify_dummy(password);
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        if !self.config.require_2fa() {
            let (session, token) = self.sessions.issue(&user.username, true)?;
            return Ok(AuthResult::authenticated(&user, &session, token));
        }

        // Password checked out but the second factor is still pending.
        let (session, token) = self.sessions.issue(&user.username, false)?;
        let mut result = AuthResult::authenticated(&user, &session, token);

        if !user.twofa_enabled {
            let enrollment = self.twofactor.enroll(&user.username).await?;
            result.twofa_secret = Some(enrollment.secret);
            result.twofa_otpauth_url = Some(enrollment.otpauth_url);
        }

        Ok(result)
    }

    /// Verify a one-time code and promote the session it belongs to.
    ///
    /// A failed code leaves the session awaiting its second factor and
    /// reports [`AuthFailure::InvalidTwoFactorCode`] without revealing
    /// whether the account or the code was at fault.
    ///
    /// # Errors
    /// Only store and internal faults.
    #[instrument(skip_all)]
    pub async fn submit_2fa(&self, token: &str, code: &str) -> Result<AuthResult, AuthError> {
        let session = match self.sessions.validate(token).await {
            Ok(session) => session,
            Err(err) => match err.as_failure() {
                Some(failure) => return Ok(AuthResult::denied(failure)),
                None => return Err(err),
            },
        };

        // An already-promoted session has nothing to prove.
        if session.authenticated_2fa {
            return self.result_for_session(&session, token.to_string()).await;
        }

        let verified = self.twofactor.verify(&session.username, code).await?;
        if !verified {
            let mut result = self.result_for_session(&session, token.to_string()).await?;
            result.failure = Some(AuthFailure::InvalidTwoFactorCode);
            return Ok(result);
        }

        let (promoted, new_token) = self.sessions.promote(&session)?;
        self.result_for_session(&promoted, new_token).await
    }

    async fn result_for_session(
        &self,
        session: &SessionRecord,
        token: String,
    ) -> Result<AuthResult, AuthError> {
        let Some(user) = users::get_user(&self.pool, &session.username).await? else {
            // The account vanished between issue and presentation.
            return Ok(AuthResult::denied(AuthFailure::InvalidSessionToken));
        };
        Ok(AuthResult::authenticated(&user, session, token))
    }

    /// Resolve a presented token into the state it proves, for the host to
    /// call once per page render. Expired, forged, and revoked tokens come
    /// back as recovered failures, never as faults.
    ///
    /// # Errors
    /// Only store faults.
    #[instrument(skip_all)]
    pub async fn validate_session(&self, token: &str) -> Result<AuthResult, AuthError> {
        let session = match self.sessions.validate(token).await {
            Ok(session) => session,
            Err(err) => match err.as_failure() {
                Some(failure) => return Ok(AuthResult::denied(failure)),
                None => return Err(err),
            },
        };
        self.result_for_session(&session, token.to_string()).await
    }

    /// Like [`validate_session`](Self::validate_session), but a session
    /// still awaiting its second factor is refused. Hosts gate everything
    /// beyond the login and code-entry views on this call.
    ///
    /// # Errors
    /// [`AuthError::TwoFactorRequired`] for an unpromoted session, or a
    /// store fault.
    pub async fn require_full_auth(&self, token: &str) -> Result<AuthResult, AuthError> {
        let result = self.validate_session(token).await?;
        if result.failure.is_none() && !result.authenticated_2fa {
            return Err(AuthError::TwoFactorRequired);
        }
        Ok(result)
    }

    /// Revoke the session a token names. Idempotent, quiet on garbage.
    ///
    /// # Errors
    /// Only store faults.
    #[instrument(skip_all)]
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.revoke(token).await
    }

    /// Create a user with the configured default role. New accounts start
    /// inactive when activation requests are enabled.
    ///
    /// # Errors
    /// `InvalidUsername`, `WeakPassword`, `DuplicateUsername`, or a store
    /// fault.
    #[instrument(skip_all, fields(username = %new_user.username.trim()))]
    pub async fn register(&self, new_user: &NewUser) -> Result<(), AuthError> {
        let username = new_user.username.trim();
        if !valid_username(username) {
            return Err(AuthError::InvalidUsername);
        }
        password::validate_strength(&new_user.password, self.config.min_password_length())?;

        let salt = password::generate_salt();
        let password_hash = password::hash_password(&new_user.password, &salt)?;

        let record = UserRecord {
            username: username.to_string(),
            display_name: new_user.display_name.trim().to_string(),
            password_hash,
            password_salt: salt.as_str().to_string(),
            role: self.config.role_to_create(),
            is_active: !self.config.user_activation_request(),
            twofa_secret: None,
            twofa_enabled: false,
            twofa_last_step: 0,
            created_at: unix_now(),
        };

        match users::create_user(&self.pool, &record).await? {
            CreateUserOutcome::Created => Ok(()),
            CreateUserOutcome::Duplicate => Err(AuthError::DuplicateUsername),
        }
    }

    /// Idempotent admin bootstrap.
    ///
    /// Creates the configured admin account only when no admin-role record
    /// exists. Returns the generated initial password exactly once, and
    /// `None` when an admin already exists or the password came from
    /// configuration. Rotating that password before production use is an
    /// operational requirement, not something the engine enforces.
    ///
    /// # Errors
    /// Only store and internal faults.
    #[instrument(skip_all)]
    pub async fn create_admin_if_not_exists(&self) -> Result<Option<SecretString>, AuthError> {
        if users::admin_exists(&self.pool).await? {
            return Ok(None);
        }

        let (initial_password, generated) = match self.config.admin_initial_password() {
            Some(configured) => (configured.clone(), false),
            None => (generate_password()?, true),
        };

        let salt = password::generate_salt();
        let password_hash = password::hash_password(initial_password.expose_secret(), &salt)?;
        let record = UserRecord {
            username: self.config.admin_username().to_string(),
            display_name: self.config.admin_username().to_string(),
            password_hash,
            password_salt: salt.as_str().to_string(),
            role: Role::Admin,
            is_active: true,
            twofa_secret: None,
            twofa_enabled: false,
            twofa_last_step: 0,
            created_at: unix_now(),
        };

        match users::create_user(&self.pool, &record).await? {
            CreateUserOutcome::Created => {
                warn!(
                    username = %self.config.admin_username(),
                    "bootstrap admin created; rotate its password before production use"
                );
                Ok(generated.then_some(initial_password))
            }
            CreateUserOutcome::Duplicate => {
                // Lost a bootstrap race, or the username is taken by a
                // non-admin account. Either way the store decides.
                warn!("admin bootstrap found an existing record, leaving it alone");
                Ok(None)
            }
        }
    }

    /// Applications `username` may open, for the host's menu construction.
    ///
    /// # Errors
    /// Only store faults. An unknown username resolves to an empty set.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn get_user_apps_perms(&self, username: &str) -> Result<Vec<String>, AuthError> {
        let Some(user) = users::get_user(&self.pool, username).await? else {
            return Ok(Vec::new());
        };
        self.resolver.resolve(&user.username, user.role).await
    }

    /// Change a password after re-checking the current one. Only exposed
    /// when the installation enables reset views.
    ///
    /// # Errors
    /// `InvalidCredentials` for a wrong current password, `WeakPassword`
    /// for a bad new one, or a store fault.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn change_password(
        &self,
        username: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if !self.config.auth_reset_views() {
            return Err(anyhow::anyhow!("password reset views are disabled").into());
        }

        let Some(user) = users::get_user(&self.pool, username).await? else {
            password::verify_dummy(current_password);
            return Err(AuthError::InvalidCredentials);
        };
        if !password::verify_password(current_password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        password::validate_strength(new_password, self.config.min_password_length())?;

        let salt = password::generate_salt();
        let password_hash = password::hash_password(new_password, &salt)?;
        users::update_password(&self.pool, username, &password_hash, salt.as_str()).await?;
        Ok(())
    }

    /// Start (or restart) a pending second-factor enrollment.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown user, `Internal` when a factor
    /// is already confirmed, or a store fault.
    pub async fn enroll_2fa(&self, username: &str) -> Result<Enrollment, AuthError> {
        self.twofactor.enroll(username).await
    }

    /// Flip a user active. Returns whether a record changed.
    ///
    /// # Errors
    /// Only store faults.
    pub async fn activate_user(&self, username: &str) -> Result<bool, AuthError> {
        Ok(users::set_active(&self.pool, username, true).await?)
    }

    /// Soft-deactivate; the record is never physically deleted.
    ///
    /// # Errors
    /// Only store faults.
    pub async fn deactivate_user(&self, username: &str) -> Result<bool, AuthError> {
        Ok(users::set_active(&self.pool, username, false).await?)
    }

    /// Grant `app_name` to a username or role name. Idempotent.
    ///
    /// # Errors
    /// Only store faults.
    pub async fn grant_permission(&self, identity: &str, app_name: &str) -> Result<(), AuthError> {
        Ok(store::perms::grant(&self.pool, identity, app_name).await?)
    }

    /// Revoke `app_name` from a username or role name. Idempotent.
    ///
    /// # Errors
    /// Only store faults.
    pub async fn revoke_permission(&self, identity: &str, app_name: &str) -> Result<(), AuthError> {
        Ok(store::perms::revoke(&self.pool, identity, app_name).await?)
    }

    /// All user records, for the host's management pages.
    ///
    /// # Errors
    /// Only store faults.
    pub async fn list_users(&self) -> Result<Vec<UserRecord>, AuthError> {
        Ok(users::list_users(&self.pool).await?)
    }

    /// Clear revocation-list entries whose token has expired. Run on any
    /// cadence shorter than the configured session lifetime.
    ///
    /// # Errors
    /// Only store faults.
    pub async fn prune_revocations(&self) -> Result<u64, AuthError> {
        self.sessions.prune().await
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

fn valid_username(username: &str) -> bool {
    regex::Regex::new(r"^[A-Za-z0-9._-]{3,32}$").is_ok_and(|re| re.is_match(username))
}

/// Random initial password for the bootstrap admin, base64url over fresh
/// OS entropy.
fn generate_password() -> Result<SecretString, AuthError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let mut bytes = [0u8; 18];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| anyhow::anyhow!("failed to generate initial password: {err}"))?;
    Ok(SecretString::from(URL_SAFE_NO_PAD.encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_shape_rules() {
        assert!(valid_username("alice"));
        assert!(valid_username("a.b-c_9"));
        assert!(!valid_username("al"));
        assert!(!valid_username("alice bob"));
        assert!(!valid_username(""));
        assert!(!valid_username(&"x".repeat(33)));
    }

    #[test]
    fn unattempted_result_is_neutral() {
        let result = AuthResult::unattempted();
        assert_eq!(result.authentication_status, None);
        assert!(!result.authenticated_2fa);
        assert!(result.token.is_none());
        assert!(result.failure.is_none());
    }

    #[test]
    fn generated_passwords_differ() {
        let one = generate_password().unwrap();
        let two = generate_password().unwrap();
        assert_ne!(one.expose_secret(), two.expose_secret());
        assert!(one.expose_secret().len() >= 20);
    }
}
