//! The composed authentication flow and the subsystem's public contract.
//!
//! Ordering matters and is fixed: lockout pre-check (a locked account never
//! reaches password comparison), password verification against the identity
//! store, the MFA gate, session issuance, attempt bookkeeping, audit. A
//! caller can only distinguish the outcomes below; password and MFA failures
//! collapse into one generic rejection so neither accounts nor factors can
//! be enumerated.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::audit::{AuditEvent, AuditRiskEngine, SecurityLevel};
use crate::identity::IdentityStore;
use crate::lockout::BruteForceGuard;
use crate::mfa::MfaManager;
use crate::password::{PasswordCheck, PasswordContext, PasswordPolicyEngine};
use crate::policy::SecurityPolicy;
use crate::session::{CreatedSession, SessionManager, SessionTokenKey, ValidatedSession};
use crate::store::SessionStore;

/// Everything a caller may observe from `authenticate`.
#[derive(Clone, Debug)]
pub enum AuthOutcome {
    /// Full success; the token is the session capability.
    Success(CreatedSession),
    /// The account+origin pair is locked out; retry after the given time.
    Locked {
        lockout_expires_at: Option<DateTime<Utc>>,
    },
    /// Credentials were fine but policy demands an MFA code. Not a failure;
    /// no attempt is recorded.
    MfaRequired,
    /// Wrong password, wrong MFA code, or unknown account. Deliberately
    /// indistinguishable.
    InvalidCredentials,
    /// Something inside the flow broke. Detail goes to the audit trail,
    /// never to the caller.
    Failed,
}

pub struct SecurityOrchestrator {
    policy: SecurityPolicy,
    identity: Arc<dyn IdentityStore>,
    audit: Arc<AuditRiskEngine>,
    guard: BruteForceGuard,
    mfa: MfaManager,
    sessions: SessionManager,
    passwords: PasswordPolicyEngine,
}

impl SecurityOrchestrator {
    #[must_use]
    pub fn new(
        policy: SecurityPolicy,
        identity: Arc<dyn IdentityStore>,
        session_store: Arc<dyn SessionStore>,
        audit: Arc<AuditRiskEngine>,
        token_key: SessionTokenKey,
        issuer: impl Into<String>,
    ) -> Self {
        let guard = BruteForceGuard::new(policy.clone(), audit.clone());
        let mfa = MfaManager::new(issuer, audit.clone());
        let sessions = SessionManager::new(
            policy.clone(),
            token_key,
            session_store,
            audit.clone(),
        );
        let passwords = PasswordPolicyEngine::new(policy.clone());
        Self {
            policy,
            identity,
            audit,
            guard,
            mfa,
            sessions,
            passwords,
        }
    }

    /// Authenticate an identity. See the module docs for the fixed ordering.
    ///
    /// Never returns an error: internal failures are audited and collapse
    /// into [`AuthOutcome::Failed`].
    pub async fn authenticate(
        &self,
        identity: &str,
        secret: &str,
        origin: &str,
        client_signature: &str,
        mfa_code: Option<&str>,
    ) -> AuthOutcome {
        self.authenticate_at(identity, secret, origin, client_signature, mfa_code, Utc::now())
            .await
    }

    /// Like [`authenticate`](Self::authenticate) at an explicit time, so
    /// tests can move through lockout windows.
    pub async fn authenticate_at(
        &self,
        identity: &str,
        secret: &str,
        origin: &str,
        client_signature: &str,
        mfa_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> AuthOutcome {
        match self
            .try_authenticate(identity, secret, origin, client_signature, mfa_code, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("authentication flow error: {err:#}");
                self.audit
                    .log(
                        AuditEvent::new("authentication_error", SecurityLevel::High)
                            .subject(identity)
                            .origin(origin)
                            .detail(json!({"error": err.to_string()})),
                    )
                    .await;
                AuthOutcome::Failed
            }
        }
    }

    async fn try_authenticate(
        &self,
        identity: &str,
        secret: &str,
        origin: &str,
        client_signature: &str,
        mfa_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthOutcome> {
        // Locked accounts never reach password comparison.
        let state = self.guard.lockout_state_at(identity, origin, now).await;
        if state.locked {
            return Ok(AuthOutcome::Locked {
                lockout_expires_at: state.lockout_expires_at,
            });
        }

        let password_ok = self
            .identity
            .verify_password(identity, secret)
            .await
            .context("password verification unavailable")?;
        if !password_ok {
            return Ok(self.record_failure(identity, origin, "password", now).await);
        }

        if self.policy.require_mfa() {
            let Some(code) = mfa_code else {
                // A legitimate intermediate state, not a failure.
                return Ok(AuthOutcome::MfaRequired);
            };
            let secret_base32 = self
                .identity
                .totp_secret(identity)
                .await
                .context("MFA secret lookup unavailable")?;
            let verified = match secret_base32 {
                Some(secret_base32) => {
                    let timestamp = u64::try_from(now.timestamp()).unwrap_or(0);
                    self.mfa
                        .verify_totp_at(identity, &secret_base32, code, timestamp)
                        .await
                }
                // Policy demands MFA but nothing is enrolled; the generic
                // rejection hides which factor was missing.
                None => false,
            };
            if !verified {
                return Ok(self.record_failure(identity, origin, "mfa", now).await);
            }
        }

        let mfa_verified = self.policy.require_mfa() && mfa_code.is_some();
        let created = self
            .sessions
            .create_session_at(identity, origin, client_signature, mfa_verified, None, now)
            .await?;

        self.guard
            .record_attempt_at(identity, origin, true, now)
            .await;
        self.audit
            .log_at(
                AuditEvent::new("successful_login", SecurityLevel::Info)
                    .subject(identity)
                    .origin(origin)
                    .client_signature(client_signature)
                    .detail(json!({"session_id": created.session_id})),
                now,
            )
            .await;

        Ok(AuthOutcome::Success(created))
    }

    async fn record_failure(
        &self,
        identity: &str,
        origin: &str,
        factor: &str,
        now: DateTime<Utc>,
    ) -> AuthOutcome {
        let decision = self
            .guard
            .record_attempt_at(identity, origin, false, now)
            .await;
        self.audit
            .log_at(
                AuditEvent::new("failed_login", SecurityLevel::Medium)
                    .subject(identity)
                    .origin(origin)
                    .detail(json!({
                        "factor": factor,
                        "failed_attempts": decision.failed_count,
                    })),
                now,
            )
            .await;
        if decision.locked {
            AuthOutcome::Locked {
                lockout_expires_at: decision.lockout_expires_at,
            }
        } else {
            AuthOutcome::InvalidCredentials
        }
    }

    /// Begin TOTP enrollment for a subject. See [`MfaManager::setup_totp`].
    ///
    /// # Errors
    /// Returns an error if secret generation or QR rendering fails.
    pub async fn setup_mfa(
        &self,
        subject_id: &str,
        subject_email: &str,
    ) -> Result<crate::mfa::TotpEnrollment> {
        self.mfa.setup_totp(subject_id, subject_email).await
    }

    /// Validate a presented session token. `None` means "send them to
    /// login"; the reason is in the audit trail, not the return value.
    pub async fn validate_session_token(
        &self,
        token: &str,
        origin: Option<&str>,
    ) -> Option<ValidatedSession> {
        self.sessions.validate(token, origin).await
    }

    /// Check a candidate password, using the identity's stored attributes
    /// for the contextual rules when the identity is known.
    pub async fn validate_password_strength(
        &self,
        candidate: &str,
        identity: Option<&str>,
    ) -> PasswordCheck {
        let context = match identity {
            Some(identity) => match self.identity.user_attributes(identity).await {
                Ok(attributes) => attributes.map(|attributes| PasswordContext {
                    email: attributes.email,
                    username: attributes.username,
                    first_name: attributes.first_name,
                    last_name: attributes.last_name,
                }),
                Err(err) => {
                    // Weaker check beats no answer here; this path is not
                    // authentication-critical.
                    warn!("attribute lookup failed, skipping contextual rules: {err}");
                    None
                }
            },
            None => None,
        };
        self.passwords.validate(candidate, context.as_ref())
    }

    /// The session manager, for middleware that needs revocation.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The brute-force guard, for operator dashboards showing lockout state.
    #[must_use]
    pub fn brute_force_guard(&self) -> &BruteForceGuard {
        &self.guard
    }
}
