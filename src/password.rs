//! Password strength validation against the configured policy.
//!
//! Validation is a pure function: every violated rule is reported, in rule
//! order, so a caller can show a user the full list at once. A weak password
//! is data, not an error.

use crate::policy::SecurityPolicy;

/// Passwords rejected outright regardless of character-class compliance.
/// Matching is case-insensitive and exact.
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "123456",
    "12345678",
    "123456789",
    "qwerty",
    "qwerty123",
    "abc123",
    "letmein",
    "welcome",
    "welcome1",
    "admin",
    "admin123",
    "iloveyou",
    "monkey",
    "dragon",
    "sunshine",
    "trustno1",
    "changeme",
];

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:'\",.<>?/`~\\";

/// Account details a candidate password must not contain.
#[derive(Clone, Debug, Default)]
pub struct PasswordContext {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Outcome of a policy check. `ok` holds iff `violations` is empty.
#[derive(Clone, Debug)]
pub struct PasswordCheck {
    pub ok: bool,
    pub violations: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PasswordPolicyEngine {
    policy: SecurityPolicy,
}

impl PasswordPolicyEngine {
    #[must_use]
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    /// Evaluate `candidate` against every policy rule.
    ///
    /// Rules run in a fixed order: length, character classes, common-password
    /// blocklist, contextual containment. All failures are collected.
    #[must_use]
    pub fn validate(&self, candidate: &str, context: Option<&PasswordContext>) -> PasswordCheck {
        let mut violations = Vec::new();

        if candidate.chars().count() < self.policy.password_min_length() {
            violations.push(format!(
                "password must be at least {} characters long",
                self.policy.password_min_length()
            ));
        }

        if self.policy.password_require_uppercase()
            && !candidate.chars().any(|ch| ch.is_ascii_uppercase())
        {
            violations.push("password must contain an uppercase letter".to_string());
        }

        if self.policy.password_require_lowercase()
            && !candidate.chars().any(|ch| ch.is_ascii_lowercase())
        {
            violations.push("password must contain a lowercase letter".to_string());
        }

        if self.policy.password_require_numbers()
            && !candidate.chars().any(|ch| ch.is_ascii_digit())
        {
            violations.push("password must contain a number".to_string());
        }

        if self.policy.password_require_special_chars()
            && !candidate.chars().any(|ch| SPECIAL_CHARS.contains(ch))
        {
            violations.push("password must contain a special character".to_string());
        }

        let lowered = candidate.to_lowercase();
        if COMMON_PASSWORDS.contains(&lowered.as_str()) {
            violations.push("password is too common".to_string());
        }

        if let Some(context) = context {
            if context_fields(context).any(|field| lowered.contains(&field)) {
                violations.push("password must not contain personal information".to_string());
            }
        }

        PasswordCheck {
            ok: violations.is_empty(),
            violations,
        }
    }
}

/// Lowercased context fragments worth checking. Email is reduced to its
/// local part; very short fragments are skipped to avoid false positives
/// on one- or two-letter names.
fn context_fields(context: &PasswordContext) -> impl Iterator<Item = String> + '_ {
    let email_local = context
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .map(str::to_string);
    [
        email_local,
        context.username.clone(),
        context.first_name.clone(),
        context.last_name.clone(),
    ]
    .into_iter()
    .flatten()
    .map(|field| field.trim().to_lowercase())
    .filter(|field| field.len() >= 3)
}
