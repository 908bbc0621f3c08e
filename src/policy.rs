//! Process-wide security policy, fixed at construction.

use serde::{Deserialize, Serialize};

const DEFAULT_PASSWORD_MIN_LENGTH: usize = 12;
const DEFAULT_PASSWORD_HISTORY_COUNT: usize = 5;
const DEFAULT_MAX_LOGIN_ATTEMPTS: usize = 5;
const DEFAULT_LOCKOUT_DURATION_MINUTES: i64 = 30;
const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 24 * 60;

/// MFA methods a deployment may accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaProvider {
    Totp,
    Sms,
    Email,
    BackupCodes,
}

/// What to do when a session is validated from a different address than the
/// one it was created from. Legitimate users roam between networks, so the
/// default only warns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpMismatchPolicy {
    /// Audit the mismatch, keep the session intact.
    #[default]
    Warn,
    /// Keep the session but strip its MFA-verified standing so middleware
    /// can demand re-authentication.
    StepUp,
    /// Drop the session outright.
    Revoke,
}

/// Immutable security configuration, built once at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityPolicy {
    password_min_length: usize,
    password_require_uppercase: bool,
    password_require_lowercase: bool,
    password_require_numbers: bool,
    password_require_special_chars: bool,
    password_history_count: usize,
    max_login_attempts: usize,
    lockout_duration_minutes: i64,
    session_timeout_minutes: i64,
    require_mfa: bool,
    allowed_mfa_providers: Vec<MfaProvider>,
    ip_mismatch_policy: IpMismatchPolicy,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            password_min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            password_require_uppercase: true,
            password_require_lowercase: true,
            password_require_numbers: true,
            password_require_special_chars: true,
            password_history_count: DEFAULT_PASSWORD_HISTORY_COUNT,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            lockout_duration_minutes: DEFAULT_LOCKOUT_DURATION_MINUTES,
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
            require_mfa: true,
            allowed_mfa_providers: vec![MfaProvider::Totp, MfaProvider::BackupCodes],
            ip_mismatch_policy: IpMismatchPolicy::Warn,
        }
    }
}

impl SecurityPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_password_min_length(mut self, length: usize) -> Self {
        self.password_min_length = length;
        self
    }

    #[must_use]
    pub fn with_password_require_uppercase(mut self, required: bool) -> Self {
        self.password_require_uppercase = required;
        self
    }

    #[must_use]
    pub fn with_password_require_lowercase(mut self, required: bool) -> Self {
        self.password_require_lowercase = required;
        self
    }

    #[must_use]
    pub fn with_password_require_numbers(mut self, required: bool) -> Self {
        self.password_require_numbers = required;
        self
    }

    #[must_use]
    pub fn with_password_require_special_chars(mut self, required: bool) -> Self {
        self.password_require_special_chars = required;
        self
    }

    #[must_use]
    pub fn with_password_history_count(mut self, count: usize) -> Self {
        self.password_history_count = count;
        self
    }

    #[must_use]
    pub fn with_max_login_attempts(mut self, attempts: usize) -> Self {
        self.max_login_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_duration_minutes(mut self, minutes: i64) -> Self {
        self.lockout_duration_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_session_timeout_minutes(mut self, minutes: i64) -> Self {
        self.session_timeout_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_require_mfa(mut self, required: bool) -> Self {
        self.require_mfa = required;
        self
    }

    #[must_use]
    pub fn with_allowed_mfa_providers(mut self, providers: Vec<MfaProvider>) -> Self {
        self.allowed_mfa_providers = providers;
        self
    }

    #[must_use]
    pub fn with_ip_mismatch_policy(mut self, policy: IpMismatchPolicy) -> Self {
        self.ip_mismatch_policy = policy;
        self
    }

    #[must_use]
    pub fn password_min_length(&self) -> usize {
        self.password_min_length
    }

    #[must_use]
    pub fn password_require_uppercase(&self) -> bool {
        self.password_require_uppercase
    }

    #[must_use]
    pub fn password_require_lowercase(&self) -> bool {
        self.password_require_lowercase
    }

    #[must_use]
    pub fn password_require_numbers(&self) -> bool {
        self.password_require_numbers
    }

    #[must_use]
    pub fn password_require_special_chars(&self) -> bool {
        self.password_require_special_chars
    }

    #[must_use]
    pub fn password_history_count(&self) -> usize {
        self.password_history_count
    }

    #[must_use]
    pub fn max_login_attempts(&self) -> usize {
        self.max_login_attempts
    }

    #[must_use]
    pub fn lockout_duration_minutes(&self) -> i64 {
        self.lockout_duration_minutes
    }

    #[must_use]
    pub fn session_timeout_minutes(&self) -> i64 {
        self.session_timeout_minutes
    }

    #[must_use]
    pub fn require_mfa(&self) -> bool {
        self.require_mfa
    }

    #[must_use]
    pub fn allowed_mfa_providers(&self) -> &[MfaProvider] {
        &self.allowed_mfa_providers
    }

    #[must_use]
    pub fn allows_provider(&self, provider: MfaProvider) -> bool {
        self.allowed_mfa_providers.contains(&provider)
    }

    #[must_use]
    pub fn ip_mismatch_policy(&self) -> IpMismatchPolicy {
        self.ip_mismatch_policy
    }
}
