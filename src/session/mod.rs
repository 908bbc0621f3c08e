//! Session lifecycle: creation with a computed security score, token-backed
//! validation, and revocation.
//!
//! The signed token is a capability referencing the server-side record by
//! session id; the record is the authoritative state. Revocation deletes the
//! record, so a token whose signature is still cryptographically valid stops
//! authenticating the moment the session is gone. Expiry is checked lazily
//! during validation; there is no background sweep.

pub mod token;

pub use token::{SessionClaims, SessionTokenKey};

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::error;

use crate::audit::{AuditEvent, AuditRiskEngine, SecurityLevel};
use crate::policy::{IpMismatchPolicy, SecurityPolicy};
use crate::store::SessionStore;

const SESSION_ID_BYTES: usize = 32;

const BASE_SCORE: u8 = 50;
const MFA_BONUS: u8 = 30;
const PRIVATE_ORIGIN_BONUS: u8 = 10;
const NON_MOBILE_BONUS: u8 = 10;

/// Authoritative server-side session state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub subject_id: String,
    pub origin: String,
    pub client_signature: String,
    pub device_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub mfa_verified: bool,
    pub security_score: u8,
}

/// What the caller receives on session creation.
#[derive(Clone, Debug)]
pub struct CreatedSession {
    pub token: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub security_score: u8,
}

/// The view middleware gets back for a live session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedSession {
    pub subject_id: String,
    pub session_id: String,
    pub mfa_verified: bool,
    pub security_score: u8,
}

pub struct SessionManager {
    policy: SecurityPolicy,
    key: SessionTokenKey,
    store: Arc<dyn SessionStore>,
    audit: Arc<AuditRiskEngine>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        policy: SecurityPolicy,
        key: SessionTokenKey,
        store: Arc<dyn SessionStore>,
        audit: Arc<AuditRiskEngine>,
    ) -> Self {
        Self {
            policy,
            key,
            store,
            audit,
        }
    }

    /// Create a session and issue its signed token.
    ///
    /// # Errors
    /// Returns an error when the session cannot be persisted or the token
    /// cannot be signed; callers treat that as "cannot authenticate".
    pub async fn create_session(
        &self,
        subject_id: &str,
        origin: &str,
        client_signature: &str,
        mfa_verified: bool,
        device_fingerprint: Option<String>,
    ) -> Result<CreatedSession> {
        self.create_session_at(
            subject_id,
            origin,
            client_signature,
            mfa_verified,
            device_fingerprint,
            Utc::now(),
        )
        .await
    }

    /// Like [`create_session`](Self::create_session) at an explicit time.
    pub async fn create_session_at(
        &self,
        subject_id: &str,
        origin: &str,
        client_signature: &str,
        mfa_verified: bool,
        device_fingerprint: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CreatedSession> {
        let session_id = generate_session_id();
        let security_score = security_score(mfa_verified, origin, client_signature);
        let expires_at = now + Duration::minutes(self.policy.session_timeout_minutes());

        let record = SessionRecord {
            session_id: session_id.clone(),
            subject_id: subject_id.to_string(),
            origin: origin.to_string(),
            client_signature: client_signature.to_string(),
            device_fingerprint,
            created_at: now,
            last_activity: now,
            mfa_verified,
            security_score,
        };
        self.store
            .insert_session(record)
            .await
            .context("failed to persist session")?;

        let claims = SessionClaims {
            sub: subject_id.to_string(),
            sid: session_id.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            mfa: mfa_verified,
        };
        let token = token::sign(&self.key, &claims).context("failed to sign session token")?;

        self.audit
            .log(
                AuditEvent::new("session_created", SecurityLevel::Info)
                    .subject(subject_id)
                    .origin(origin)
                    .client_signature(client_signature)
                    .detail(json!({
                        "session_id": session_id,
                        "security_score": security_score,
                    })),
            )
            .await;

        Ok(CreatedSession {
            token,
            session_id,
            expires_at,
            security_score,
        })
    }

    /// Validate a presented token against signature, expiry, and the
    /// server-side session record.
    ///
    /// Invalid tokens are an expected condition, not an error: every failure
    /// path returns `None` after auditing. An origin mismatch is audited and
    /// then handled per the configured [`IpMismatchPolicy`].
    pub async fn validate(&self, token: &str, origin: Option<&str>) -> Option<ValidatedSession> {
        self.validate_at(token, origin, Utc::now()).await
    }

    /// Like [`validate`](Self::validate) at an explicit time.
    pub async fn validate_at(
        &self,
        presented: &str,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<ValidatedSession> {
        let claims = match token::verify(&self.key, presented, now.timestamp()) {
            Ok(claims) => claims,
            Err(err) => {
                self.audit
                    .log(
                        AuditEvent::new("invalid_session_token", SecurityLevel::High)
                            .detail(json!({"reason": err.to_string()})),
                    )
                    .await;
                return None;
            }
        };

        let record = match self.store.find_session(&claims.sid).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                // Valid signature but no record: revoked, or the store was
                // reset since issuance.
                self.audit
                    .log(
                        AuditEvent::new("invalid_session_access", SecurityLevel::High)
                            .subject(&claims.sub)
                            .detail(json!({"session_id": claims.sid})),
                    )
                    .await;
                return None;
            }
            Err(err) => {
                // Cannot confirm the session exists: fail closed.
                error!("session lookup failed: {err}");
                return None;
            }
        };

        let mut mfa_verified = record.mfa_verified;
        if let Some(origin) = origin {
            if origin != record.origin {
                self.audit
                    .log(
                        AuditEvent::new("session_ip_mismatch", SecurityLevel::High)
                            .subject(&record.subject_id)
                            .origin(origin)
                            .detail(json!({
                                "session_id": record.session_id,
                                "recorded_origin": record.origin,
                            })),
                    )
                    .await;
                match self.policy.ip_mismatch_policy() {
                    // Users roam between networks; warning is the default.
                    IpMismatchPolicy::Warn => {}
                    IpMismatchPolicy::StepUp => mfa_verified = false,
                    IpMismatchPolicy::Revoke => {
                        // The caller is rejected either way, but a session
                        // that survived the delete is still live from its
                        // recorded origin; that must not go unnoticed.
                        if let Err(err) = self.store.delete_session(&record.session_id).await {
                            error!("failed to revoke mismatched session: {err}");
                        }
                        return None;
                    }
                }
            }
        }

        if let Err(err) = self.store.touch_session(&record.session_id, now).await {
            error!("failed to update session activity: {err}");
        }

        Some(ValidatedSession {
            subject_id: record.subject_id,
            session_id: record.session_id,
            mfa_verified,
            security_score: record.security_score,
        })
    }

    /// Remove one session. Its token stops authenticating immediately even
    /// though the signature stays valid until natural expiry.
    ///
    /// # Errors
    /// Returns an error when the session store is unavailable.
    pub async fn revoke(&self, session_id: &str) -> Result<()> {
        self.store
            .delete_session(session_id)
            .await
            .context("failed to revoke session")?;
        self.audit
            .log(
                AuditEvent::new("session_revoked", SecurityLevel::Info)
                    .detail(json!({"session_id": session_id})),
            )
            .await;
        Ok(())
    }

    /// Remove every session for a subject ("log out everywhere").
    ///
    /// # Errors
    /// Returns an error when the session store is unavailable.
    pub async fn revoke_all(&self, subject_id: &str) -> Result<usize> {
        let removed = self
            .store
            .delete_subject_sessions(subject_id)
            .await
            .context("failed to revoke subject sessions")?;
        self.audit
            .log(
                AuditEvent::new("all_sessions_revoked", SecurityLevel::Medium)
                    .subject(subject_id)
                    .detail(json!({"revoked": removed})),
            )
            .await;
        Ok(removed)
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Session security score: 50 base, +30 for MFA, +10 for a private or
/// loopback origin, +10 for a non-mobile client, clamped to [0, 100].
#[must_use]
pub fn security_score(mfa_verified: bool, origin: &str, client_signature: &str) -> u8 {
    let mut score = BASE_SCORE;
    if mfa_verified {
        score += MFA_BONUS;
    }
    if is_private_origin(origin) {
        score += PRIVATE_ORIGIN_BONUS;
    }
    if !is_mobile_signature(client_signature) {
        score += NON_MOBILE_BONUS;
    }
    score.min(100)
}

fn is_private_origin(origin: &str) -> bool {
    match origin.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => addr.is_private() || addr.is_loopback(),
        Ok(IpAddr::V6(addr)) => addr.is_loopback(),
        Err(_) => false,
    }
}

fn is_mobile_signature(client_signature: &str) -> bool {
    let lowered = client_signature.to_lowercase();
    ["mobile", "android", "iphone", "ipad"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audit::NoopAlerter;
    use crate::store::{MemoryAuditStore, MemorySessionStore, StoreError};

    const DESKTOP_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/133.0";
    const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Mobile/15E148";

    fn manager_with_policy(policy: SecurityPolicy) -> SessionManager {
        let audit = Arc::new(AuditRiskEngine::new(
            Arc::new(MemoryAuditStore::new()),
            Arc::new(NoopAlerter),
        ));
        SessionManager::new(
            policy,
            SessionTokenKey::generate(),
            Arc::new(MemorySessionStore::new()),
            audit,
        )
    }

    fn manager() -> SessionManager {
        manager_with_policy(SecurityPolicy::default())
    }

    #[test]
    fn score_rewards_mfa_private_origin_and_desktop() {
        assert_eq!(security_score(true, "192.168.1.5", DESKTOP_UA), 100);
        assert_eq!(security_score(false, "192.168.1.5", DESKTOP_UA), 70);
        assert_eq!(security_score(false, "203.0.113.9", MOBILE_UA), 50);
        assert_eq!(security_score(true, "203.0.113.9", MOBILE_UA), 80);
    }

    #[test]
    fn mfa_strictly_raises_the_score() {
        for (origin, ua) in [
            ("192.168.1.5", DESKTOP_UA),
            ("203.0.113.9", MOBILE_UA),
            ("not-an-ip", DESKTOP_UA),
        ] {
            assert!(security_score(true, origin, ua) > security_score(false, origin, ua));
        }
    }

    #[tokio::test]
    async fn created_session_validates_round_trip() {
        let manager = manager();
        let created = manager
            .create_session("alice", "203.0.113.9", DESKTOP_UA, true, None)
            .await
            .unwrap();
        let validated = manager
            .validate(&created.token, Some("203.0.113.9"))
            .await
            .unwrap();
        assert_eq!(validated.subject_id, "alice");
        assert_eq!(validated.session_id, created.session_id);
        assert!(validated.mfa_verified);
        assert_eq!(validated.security_score, created.security_score);
    }

    #[tokio::test]
    async fn revocation_beats_a_valid_signature() {
        let manager = manager();
        let created = manager
            .create_session("alice", "203.0.113.9", DESKTOP_UA, true, None)
            .await
            .unwrap();
        manager.revoke(&created.session_id).await.unwrap();
        assert!(manager.validate(&created.token, None).await.is_none());
    }

    #[tokio::test]
    async fn revoke_all_clears_every_subject_session() {
        let manager = manager();
        let first = manager
            .create_session("alice", "203.0.113.9", DESKTOP_UA, true, None)
            .await
            .unwrap();
        let second = manager
            .create_session("alice", "198.51.100.7", MOBILE_UA, false, None)
            .await
            .unwrap();
        let other = manager
            .create_session("bob", "203.0.113.9", DESKTOP_UA, true, None)
            .await
            .unwrap();

        let removed = manager.revoke_all("alice").await.unwrap();
        assert_eq!(removed, 2);
        assert!(manager.validate(&first.token, None).await.is_none());
        assert!(manager.validate(&second.token, None).await.is_none());
        assert!(manager.validate(&other.token, None).await.is_some());
    }

    #[tokio::test]
    async fn expired_token_rejected_lazily() {
        let manager = manager();
        let issued_at = Utc::now() - Duration::days(2);
        let created = manager
            .create_session_at("alice", "203.0.113.9", DESKTOP_UA, true, None, issued_at)
            .await
            .unwrap();
        // Default timeout is 24h, so two days later the token is dead even
        // though the record still exists.
        assert!(manager.validate(&created.token, None).await.is_none());
    }

    #[tokio::test]
    async fn ip_mismatch_warn_keeps_the_session() {
        let manager = manager();
        let created = manager
            .create_session("alice", "203.0.113.9", DESKTOP_UA, true, None)
            .await
            .unwrap();
        let validated = manager
            .validate(&created.token, Some("198.51.100.7"))
            .await
            .unwrap();
        assert!(validated.mfa_verified);
    }

    #[tokio::test]
    async fn ip_mismatch_step_up_strips_mfa_standing() {
        let manager = manager_with_policy(
            SecurityPolicy::new().with_ip_mismatch_policy(IpMismatchPolicy::StepUp),
        );
        let created = manager
            .create_session("alice", "203.0.113.9", DESKTOP_UA, true, None)
            .await
            .unwrap();
        let validated = manager
            .validate(&created.token, Some("198.51.100.7"))
            .await
            .unwrap();
        assert!(!validated.mfa_verified);
        // Back on the recorded address the full standing returns.
        let validated = manager
            .validate(&created.token, Some("203.0.113.9"))
            .await
            .unwrap();
        assert!(validated.mfa_verified);
    }

    #[tokio::test]
    async fn ip_mismatch_revoke_drops_the_session() {
        let manager = manager_with_policy(
            SecurityPolicy::new().with_ip_mismatch_policy(IpMismatchPolicy::Revoke),
        );
        let created = manager
            .create_session("alice", "203.0.113.9", DESKTOP_UA, true, None)
            .await
            .unwrap();
        assert!(manager
            .validate(&created.token, Some("198.51.100.7"))
            .await
            .is_none());
        // Gone for good, even from the original address.
        assert!(manager
            .validate(&created.token, Some("203.0.113.9"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn garbage_token_returns_none() {
        let manager = manager();
        assert!(manager.validate("garbage", None).await.is_none());
    }

    /// Session store that refuses deletions, for exercising the degraded
    /// revoke-on-mismatch path.
    struct DeleteRefusingStore {
        inner: MemorySessionStore,
    }

    #[async_trait::async_trait]
    impl SessionStore for DeleteRefusingStore {
        async fn insert_session(&self, record: SessionRecord) -> Result<(), StoreError> {
            self.inner.insert_session(record).await
        }

        async fn find_session(
            &self,
            session_id: &str,
        ) -> Result<Option<SessionRecord>, StoreError> {
            self.inner.find_session(session_id).await
        }

        async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.touch_session(session_id, at).await
        }

        async fn delete_session(&self, _session_id: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("delete refused".to_string()))
        }

        async fn delete_subject_sessions(&self, subject_id: &str) -> Result<usize, StoreError> {
            self.inner.delete_subject_sessions(subject_id).await
        }
    }

    #[tokio::test]
    async fn ip_mismatch_revoke_rejects_even_when_delete_fails() {
        let audit = Arc::new(AuditRiskEngine::new(
            Arc::new(MemoryAuditStore::new()),
            Arc::new(NoopAlerter),
        ));
        let manager = SessionManager::new(
            SecurityPolicy::new().with_ip_mismatch_policy(IpMismatchPolicy::Revoke),
            SessionTokenKey::generate(),
            Arc::new(DeleteRefusingStore {
                inner: MemorySessionStore::new(),
            }),
            audit,
        );
        let created = manager
            .create_session("alice", "203.0.113.9", DESKTOP_UA, true, None)
            .await
            .unwrap();

        // The mismatched caller is rejected regardless of the store failure.
        assert!(manager
            .validate(&created.token, Some("198.51.100.7"))
            .await
            .is_none());
        // The record survived the failed delete, so the session is still
        // live from its recorded origin.
        assert!(manager
            .validate(&created.token, Some("203.0.113.9"))
            .await
            .is_some());
    }
}
