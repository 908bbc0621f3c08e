//! TOTP enrollment and verification, plus backup recovery codes.

pub mod backup;

pub use backup::{generate_backup_codes, verify_backup_code, BACKUP_CODE_COUNT};

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::audit::{AuditEvent, AuditRiskEngine, SecurityLevel};

/// Everything a client needs to finish TOTP enrollment: the secret for
/// manual entry, the provisioning URI, a scannable QR rendering of it, and
/// the backup codes to store out of band.
#[derive(Clone, Debug)]
pub struct TotpEnrollment {
    pub secret_base32: String,
    pub provisioning_uri: String,
    pub qr_png_base64: String,
    pub backup_codes: Vec<String>,
}

pub struct MfaManager {
    issuer: String,
    audit: Arc<AuditRiskEngine>,
}

impl MfaManager {
    #[must_use]
    pub fn new(issuer: impl Into<String>, audit: Arc<AuditRiskEngine>) -> Self {
        Self {
            issuer: issuer.into(),
            audit,
        }
    }

    /// Begin TOTP enrollment for a subject.
    ///
    /// Generates a fresh random secret and renders the provisioning QR.
    /// Persisting the secret as the subject's active factor is the caller's
    /// responsibility; nothing is activated here.
    ///
    /// # Errors
    /// Returns an error if secret generation or QR rendering fails.
    pub async fn setup_totp(&self, subject_id: &str, subject_email: &str) -> Result<TotpEnrollment> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("secret generation error: {e:?}"))?;

        let totp = self.build_totp(secret_bytes, subject_email.to_string())?;
        let qr_png_base64 = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("QR generation error: {e}"))?;

        let enrollment = TotpEnrollment {
            secret_base32: totp.get_secret_base32(),
            provisioning_uri: totp.get_url(),
            qr_png_base64,
            backup_codes: backup::generate_backup_codes(),
        };

        self.audit
            .log(
                AuditEvent::new("mfa_setup_initiated", SecurityLevel::Medium)
                    .subject(subject_id)
                    .detail(json!({"method": "totp"})),
            )
            .await;

        Ok(enrollment)
    }

    /// Verify a submitted code against a base32 secret at the current time,
    /// tolerating one step of clock skew in either direction.
    ///
    /// Malformed input is a failed verification, never an error.
    pub async fn verify_totp(&self, subject_id: &str, secret_base32: &str, code: &str) -> bool {
        let now = Utc::now().timestamp();
        let timestamp = u64::try_from(now).unwrap_or(0);
        self.verify_totp_at(subject_id, secret_base32, code, timestamp)
            .await
    }

    /// Verify against an explicit unix time; lets tests pin the step window.
    pub async fn verify_totp_at(
        &self,
        subject_id: &str,
        secret_base32: &str,
        code: &str,
        timestamp: u64,
    ) -> bool {
        let valid = check_code(secret_base32, code, timestamp).unwrap_or(false);
        if valid {
            self.audit
                .log(
                    AuditEvent::new("mfa_verified", SecurityLevel::Info)
                        .subject(subject_id)
                        .detail(json!({"method": "totp"})),
                )
                .await;
        } else {
            self.audit
                .log(
                    AuditEvent::new("mfa_verification_failed", SecurityLevel::High)
                        .subject(subject_id)
                        .detail(json!({"method": "totp"})),
                )
                .await;
        }
        valid
    }

    /// Check a backup code against the subject's stored set. On success the
    /// matched code is removed from the returned set and can never
    /// authenticate again; the caller persists the reduced set.
    pub async fn verify_backup_code(
        &self,
        subject_id: &str,
        submitted: &str,
        stored: Vec<String>,
    ) -> (bool, Vec<String>) {
        let (ok, remaining) = backup::verify_backup_code(submitted, stored);
        let (event, severity) = if ok {
            ("mfa_backup_code_used", SecurityLevel::Medium)
        } else {
            ("mfa_backup_code_rejected", SecurityLevel::High)
        };
        self.audit
            .log(
                AuditEvent::new(event, severity)
                    .subject(subject_id)
                    .detail(json!({"remaining_codes": remaining.len()})),
            )
            .await;
        (ok, remaining)
    }

    fn build_totp(&self, secret_bytes: Vec<u8>, account: String) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account,
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}

/// Decode the secret and check the code at `timestamp`. `None` on malformed
/// input, which callers treat as a failed check.
fn check_code(secret_base32: &str, code: &str, timestamp: u64) -> Option<bool> {
    let secret_bytes = Secret::Encoded(secret_base32.to_string()).to_bytes().ok()?;
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        None,
        "check".to_string(),
    )
    .ok()?;
    Some(totp.check(code, timestamp))
}

/// Generate the code a genuine authenticator would show at `timestamp`.
/// Exposed for tests and enrollment-confirmation flows.
#[must_use]
pub fn generate_code_at(secret_base32: &str, timestamp: u64) -> Option<String> {
    let secret_bytes = Secret::Encoded(secret_base32.to_string()).to_bytes().ok()?;
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        None,
        "check".to_string(),
    )
    .ok()?;
    Some(totp.generate(timestamp))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audit::NoopAlerter;
    use crate::store::MemoryAuditStore;

    fn manager() -> MfaManager {
        let audit = Arc::new(AuditRiskEngine::new(
            Arc::new(MemoryAuditStore::new()),
            Arc::new(NoopAlerter),
        ));
        MfaManager::new("custodia-test", audit)
    }

    #[tokio::test]
    async fn enrollment_produces_complete_artifacts() {
        let manager = manager();
        let enrollment = manager.setup_totp("alice", "alice@example.com").await.unwrap();
        assert!(!enrollment.secret_base32.is_empty());
        assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(enrollment.provisioning_uri.contains("custodia-test"));
        assert!(!enrollment.qr_png_base64.is_empty());
        assert_eq!(enrollment.backup_codes.len(), BACKUP_CODE_COUNT);
    }

    #[tokio::test]
    async fn code_round_trip_with_skew_tolerance() {
        let manager = manager();
        let enrollment = manager.setup_totp("alice", "alice@example.com").await.unwrap();
        let secret = &enrollment.secret_base32;

        let at = 1_900_000_000u64;
        let code = generate_code_at(secret, at).unwrap();
        assert!(manager.verify_totp_at("alice", secret, &code, at).await);
        assert!(manager.verify_totp_at("alice", secret, &code, at + 29).await);
        assert!(manager.verify_totp_at("alice", secret, &code, at - 29).await);
    }

    #[tokio::test]
    async fn code_from_other_secret_rejected() {
        let manager = manager();
        let first = manager.setup_totp("alice", "alice@example.com").await.unwrap();
        let second = manager.setup_totp("bob", "bob@example.com").await.unwrap();

        let at = 1_900_000_000u64;
        let code = generate_code_at(&second.secret_base32, at).unwrap();
        assert!(
            !manager
                .verify_totp_at("alice", &first.secret_base32, &code, at)
                .await
        );
    }

    #[tokio::test]
    async fn malformed_secret_is_a_failed_check() {
        let manager = manager();
        assert!(
            !manager
                .verify_totp_at("alice", "not base32!!", "123456", 1_900_000_000)
                .await
        );
    }
}
