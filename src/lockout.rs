//! Sliding-window brute-force protection.
//!
//! Attempts are tracked per `(identifier, origin)` composite key: the same
//! account from a different address has an independent counter, and the same
//! address against different accounts does too. This bounds both
//! credential-stuffing from one source and targeted attacks on one account.
//!
//! An account is locked while the window holds at least `max_login_attempts`
//! failures. There is no explicit unlock: the oldest failure ages out of the
//! window and the lock dissolves on its own. The table mutex is held across
//! each read-modify-write so two racing attempts cannot both miss a
//! threshold they jointly crossed.
//!
//! The table only holds keys with at least one failure still inside the
//! window: a success removes its key, and pruning removes a key whose last
//! failure aged out. Attackers control both halves of the composite key, so
//! anything weaker grows without bound under credential stuffing.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::audit::{AuditEvent, AuditRiskEngine, SecurityLevel};
use crate::policy::SecurityPolicy;

/// Decision returned after recording an attempt.
#[derive(Clone, Debug)]
pub struct AttemptDecision {
    pub locked: bool,
    pub failed_count: usize,
    pub max_attempts: usize,
    pub lockout_expires_at: Option<DateTime<Utc>>,
}

pub struct BruteForceGuard {
    policy: SecurityPolicy,
    audit: Arc<AuditRiskEngine>,
    attempts: Mutex<HashMap<(String, String), Vec<DateTime<Utc>>>>,
}

impl BruteForceGuard {
    #[must_use]
    pub fn new(policy: SecurityPolicy, audit: Arc<AuditRiskEngine>) -> Self {
        Self {
            policy,
            audit,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt and report the resulting lockout state.
    pub async fn record_attempt(
        &self,
        identifier: &str,
        origin: &str,
        success: bool,
    ) -> AttemptDecision {
        self.record_attempt_at(identifier, origin, success, Utc::now())
            .await
    }

    /// Like [`record_attempt`](Self::record_attempt) at an explicit time.
    pub async fn record_attempt_at(
        &self,
        identifier: &str,
        origin: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> AttemptDecision {
        let window = Duration::minutes(self.policy.lockout_duration_minutes());
        let key = (identifier.to_string(), origin.to_string());

        let decision = {
            let mut attempts = self.attempts.lock().await;
            if success {
                // A successful login ends the failure streak and frees the
                // key; only live failures are worth remembering.
                attempts.remove(&key);
                AttemptDecision {
                    locked: false,
                    failed_count: 0,
                    max_attempts: self.policy.max_login_attempts(),
                    lockout_expires_at: None,
                }
            } else {
                let entries = attempts.entry(key).or_default();
                entries.retain(|failed_at| now - *failed_at < window);
                entries.push(now);
                self.decide(entries)
            }
        };

        if decision.locked && !success {
            self.audit
                .log(
                    AuditEvent::new("account_locked_brute_force", SecurityLevel::Critical)
                        .subject(identifier)
                        .origin(origin)
                        .detail(json!({
                            "failed_attempts": decision.failed_count,
                            "max_attempts": decision.max_attempts,
                        })),
                )
                .await;
        }

        decision
    }

    /// Check lockout without recording anything. Used before password
    /// verification so a locked account never reaches the comparison step.
    pub async fn is_locked(&self, identifier: &str, origin: &str) -> bool {
        self.is_locked_at(identifier, origin, Utc::now()).await
    }

    /// Like [`is_locked`](Self::is_locked) at an explicit time.
    pub async fn is_locked_at(&self, identifier: &str, origin: &str, now: DateTime<Utc>) -> bool {
        self.lockout_state_at(identifier, origin, now).await.locked
    }

    /// Full lockout state without recording, including the expiry timestamp
    /// a client can count down against.
    pub async fn lockout_state_at(
        &self,
        identifier: &str,
        origin: &str,
        now: DateTime<Utc>,
    ) -> AttemptDecision {
        let window = Duration::minutes(self.policy.lockout_duration_minutes());
        let key = (identifier.to_string(), origin.to_string());
        let mut attempts = self.attempts.lock().await;
        let Some(entries) = attempts.get_mut(&key) else {
            return AttemptDecision {
                locked: false,
                failed_count: 0,
                max_attempts: self.policy.max_login_attempts(),
                lockout_expires_at: None,
            };
        };
        entries.retain(|failed_at| now - *failed_at < window);
        if entries.is_empty() {
            // Every failure aged out; drop the key so the table stays
            // bounded by the set of pairs with live failures.
            attempts.remove(&key);
            return AttemptDecision {
                locked: false,
                failed_count: 0,
                max_attempts: self.policy.max_login_attempts(),
                lockout_expires_at: None,
            };
        }
        self.decide(entries)
    }

    fn decide(&self, entries: &[DateTime<Utc>]) -> AttemptDecision {
        let window = Duration::minutes(self.policy.lockout_duration_minutes());
        let locked = entries.len() >= self.policy.max_login_attempts();
        // The lock dissolves when the oldest failure still in the window
        // ages out of it.
        let lockout_expires_at = if locked {
            entries.first().map(|failed_at| *failed_at + window)
        } else {
            None
        };
        AttemptDecision {
            locked,
            failed_count: entries.len(),
            max_attempts: self.policy.max_login_attempts(),
            lockout_expires_at,
        }
    }
}
