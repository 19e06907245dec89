//! Engine configuration.
//!
//! One [`AuthConfig`] per installation, passed into the
//! [`Authenticator`](crate::authenticator::Authenticator) constructor so
//! multiple tenants can coexist in one process without ambient globals.

use secrecy::SecretString;

use crate::store::users::Role;

const DEFAULT_SESSION_EXPIRY_DAYS: i64 = 7;
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
const DEFAULT_ADMIN_USERNAME: &str = "admin";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    secret_key: SecretString,
    session_expiry_days: i64,
    require_2fa: bool,
    auth_reset_views: bool,
    site_name: String,
    user_activation_request: bool,
    role_to_create: Role,
    app_names: Vec<String>,
    min_password_length: usize,
    admin_username: String,
    admin_initial_password: Option<SecretString>,
}

impl AuthConfig {
    /// The signing key is the only mandatory field; everything else has a
    /// working default.
    #[must_use]
    pub fn new(secret_key: SecretString, site_name: impl Into<String>) -> Self {
        Self {
            secret_key,
            session_expiry_days: DEFAULT_SESSION_EXPIRY_DAYS,
            require_2fa: false,
            auth_reset_views: false,
            site_name: site_name.into(),
            user_activation_request: false,
            role_to_create: Role::User,
            app_names: Vec::new(),
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            admin_username: DEFAULT_ADMIN_USERNAME.to_string(),
            admin_initial_password: None,
        }
    }

    /// # Panics
    /// Panics when `days` is not positive; a zero or negative session
    /// lifetime would issue tokens that are already expired.
    #[must_use]
    pub fn with_session_expiry_days(mut self, days: i64) -> Self {
        assert!(days > 0, "session_expiry_days must be positive");
        self.session_expiry_days = days;
        self
    }

    #[must_use]
    pub fn with_require_2fa(mut self, required: bool) -> Self {
        self.require_2fa = required;
        self
    }

    #[must_use]
    pub fn with_auth_reset_views(mut self, enabled: bool) -> Self {
        self.auth_reset_views = enabled;
        self
    }

    #[must_use]
    pub fn with_user_activation_request(mut self, required: bool) -> Self {
        self.user_activation_request = required;
        self
    }

    #[must_use]
    pub fn with_role_to_create(mut self, role: Role) -> Self {
        self.role_to_create = role;
        self
    }

    /// Application catalog used for admin permission resolution.
    #[must_use]
    pub fn with_app_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.app_names = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    #[must_use]
    pub fn with_admin_username(mut self, username: impl Into<String>) -> Self {
        self.admin_username = username.into();
        self
    }

    /// Initial password for the bootstrap admin. When unset, a random one
    /// is generated and returned once by `create_admin_if_not_exists`.
    #[must_use]
    pub fn with_admin_initial_password(mut self, password: SecretString) -> Self {
        self.admin_initial_password = Some(password);
        self
    }

    pub(crate) fn secret_key(&self) -> &SecretString {
        &self.secret_key
    }

    #[must_use]
    pub fn session_expiry_days(&self) -> i64 {
        self.session_expiry_days
    }

    #[must_use]
    pub fn require_2fa(&self) -> bool {
        self.require_2fa
    }

    #[must_use]
    pub fn auth_reset_views(&self) -> bool {
        self.auth_reset_views
    }

    #[must_use]
    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    #[must_use]
    pub fn user_activation_request(&self) -> bool {
        self.user_activation_request
    }

    #[must_use]
    pub fn role_to_create(&self) -> Role {
        self.role_to_create
    }

    #[must_use]
    pub fn app_names(&self) -> &[String] {
        &self.app_names
    }

    #[must_use]
    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    #[must_use]
    pub fn admin_username(&self) -> &str {
        &self.admin_username
    }

    pub(crate) fn admin_initial_password(&self) -> Option<&SecretString> {
        self.admin_initial_password.as_ref()
    }

    pub(crate) fn session_expiry_seconds(&self) -> i64 {
        self.session_expiry_days * 24 * 60 * 60
    }
}
