//! Identity-store port: the external system of record for credentials.
//!
//! This subsystem never stores passwords or MFA secrets itself; it asks the
//! identity store. Timing-safe password comparison is the store's
//! responsibility. A lookup failure is surfaced as an error so callers can
//! fail closed.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Account attributes used for contextual password checks.
#[derive(Clone, Debug, Default)]
pub struct UserAttributes {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Check a secret against the stored credential. Unknown identities
    /// return `false`, indistinguishable from a wrong password.
    async fn verify_password(&self, identity: &str, secret: &str) -> Result<bool>;

    /// Attributes for contextual password validation, if the identity exists.
    async fn user_attributes(&self, identity: &str) -> Result<Option<UserAttributes>>;

    /// The identity's enrolled TOTP secret (base32), if any.
    async fn totp_secret(&self, identity: &str) -> Result<Option<String>>;
}

struct StaticUser {
    password_digest: [u8; 32],
    attributes: UserAttributes,
    totp_secret: Option<String>,
}

/// Fixed in-memory identity store for tests and single-binary embeddings.
/// Passwords are compared by digest so equality does not short-circuit on
/// the first differing byte.
#[derive(Default)]
pub struct StaticIdentityStore {
    users: HashMap<String, StaticUser>,
}

impl StaticIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(
        mut self,
        identity: &str,
        password: &str,
        attributes: UserAttributes,
        totp_secret: Option<String>,
    ) -> Self {
        self.users.insert(
            identity.to_string(),
            StaticUser {
                password_digest: digest(password),
                attributes,
                totp_secret,
            },
        );
        self
    }
}

fn digest(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

#[async_trait]
impl IdentityStore for StaticIdentityStore {
    async fn verify_password(&self, identity: &str, secret: &str) -> Result<bool> {
        Ok(self
            .users
            .get(identity)
            .is_some_and(|user| user.password_digest == digest(secret)))
    }

    async fn user_attributes(&self, identity: &str) -> Result<Option<UserAttributes>> {
        Ok(self
            .users
            .get(identity)
            .map(|user| user.attributes.clone()))
    }

    async fn totp_secret(&self, identity: &str) -> Result<Option<String>> {
        Ok(self
            .users
            .get(identity)
            .and_then(|user| user.totp_secret.clone()))
    }
}
