//! Device registration and trust tracking.
//!
//! A device is recognized across sessions by a fingerprint derived from its
//! client signature and declared display/locale attributes; the same browser
//! configuration always hashes to the same fingerprint, no cookie required.
//! Devices start neutral (`Pending`, trust 5) and only gain trust through
//! explicit out-of-band verification, never through mere repeated use.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditRiskEngine, SecurityLevel};
use crate::store::DeviceStore;

/// Trust score assigned at first sight: the midpoint of the 0-10 range.
const INITIAL_TRUST_SCORE: u8 = 5;
const MAX_TRUST_SCORE: u8 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Pending,
    Trusted,
    Suspicious,
    Blocked,
}

/// Attributes a client declares about itself at registration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceAttributes {
    pub client_signature: String,
    pub screen_resolution: String,
    pub timezone: String,
    pub language: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub subject_id: String,
    pub fingerprint: String,
    pub attributes: DeviceAttributes,
    pub status: DeviceStatus,
    pub trust_score: u8,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub use_count: u64,
    pub verified: bool,
}

/// Outcome handed back to the registration caller.
#[derive(Clone, Debug)]
pub struct Registration {
    pub device_id: String,
    pub fingerprint: String,
    pub status: DeviceStatus,
    pub trust_score: u8,
    pub requires_verification: bool,
    /// False when an already-known fingerprint was refreshed instead.
    pub newly_registered: bool,
}

/// Deterministic fingerprint over the attributes that identify a device
/// configuration. Declared metadata (name, type) is deliberately excluded:
/// it is user-editable and must not change the identity.
#[must_use]
pub fn fingerprint(attributes: &DeviceAttributes) -> String {
    let mut hasher = Sha256::new();
    hasher.update(attributes.client_signature.as_bytes());
    hasher.update(b"|");
    hasher.update(attributes.screen_resolution.as_bytes());
    hasher.update(b"|");
    hasher.update(attributes.timezone.as_bytes());
    hasher.update(b"|");
    hasher.update(attributes.language.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub struct DeviceRegistry {
    store: Arc<dyn DeviceStore>,
    audit: Arc<AuditRiskEngine>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn DeviceStore>, audit: Arc<AuditRiskEngine>) -> Self {
        Self { store, audit }
    }

    /// Register a device for a subject, or refresh it when the fingerprint
    /// is already known (same subject, same configuration). A refresh only
    /// advances `last_used` and `use_count`; it never raises trust. Both
    /// paths leave an audit record, first sight at a higher severity.
    ///
    /// # Errors
    /// Returns an error when device storage is unavailable.
    pub async fn register(
        &self,
        subject_id: &str,
        attributes: DeviceAttributes,
    ) -> Result<Registration> {
        let fingerprint = fingerprint(&attributes);
        let now = Utc::now();

        if let Some(mut existing) = self
            .store
            .find_by_fingerprint(subject_id, &fingerprint)
            .await
            .context("device lookup failed")?
        {
            existing.last_used = now;
            existing.use_count += 1;
            let registration = Registration {
                device_id: existing.device_id.clone(),
                fingerprint,
                status: existing.status,
                trust_score: existing.trust_score,
                requires_verification: !existing.verified,
                newly_registered: false,
            };
            self.store
                .update_device(existing)
                .await
                .context("device refresh failed")?;
            self.audit
                .log(
                    AuditEvent::new("known_device_used", SecurityLevel::Low)
                        .subject(subject_id)
                        .detail(json!({"device_id": registration.device_id})),
                )
                .await;
            return Ok(registration);
        }

        let record = DeviceRecord {
            device_id: Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            fingerprint: fingerprint.clone(),
            attributes,
            status: DeviceStatus::Pending,
            trust_score: INITIAL_TRUST_SCORE,
            first_seen: now,
            last_used: now,
            use_count: 1,
            verified: false,
        };
        let registration = Registration {
            device_id: record.device_id.clone(),
            fingerprint,
            status: record.status,
            trust_score: record.trust_score,
            requires_verification: true,
            newly_registered: true,
        };

        self.store
            .insert_device(record)
            .await
            .context("device insert failed")?;

        self.audit
            .log(
                AuditEvent::new("device_registered", SecurityLevel::Medium)
                    .subject(subject_id)
                    .detail(json!({"device_id": registration.device_id})),
            )
            .await;

        Ok(registration)
    }

    /// Mark a device verified after out-of-band confirmation. This is the
    /// only path that raises trust.
    ///
    /// # Errors
    /// Returns an error when the device does not exist or storage fails.
    pub async fn mark_verified(&self, device_id: &str) -> Result<DeviceRecord> {
        let mut record = self.load(device_id).await?;
        record.verified = true;
        record.status = DeviceStatus::Trusted;
        record.trust_score = MAX_TRUST_SCORE.min(record.trust_score + 3);
        self.store
            .update_device(record.clone())
            .await
            .context("device update failed")?;
        self.audit
            .log(
                AuditEvent::new("device_verified", SecurityLevel::Info)
                    .subject(&record.subject_id)
                    .detail(json!({"device_id": device_id})),
            )
            .await;
        Ok(record)
    }

    /// Flag a device as suspicious; trust drops but the device stays usable
    /// for step-up flows.
    ///
    /// # Errors
    /// Returns an error when the device does not exist or storage fails.
    pub async fn mark_suspicious(&self, device_id: &str) -> Result<DeviceRecord> {
        let mut record = self.load(device_id).await?;
        record.status = DeviceStatus::Suspicious;
        record.trust_score = record.trust_score.saturating_sub(3);
        self.store
            .update_device(record.clone())
            .await
            .context("device update failed")?;
        self.audit
            .log(
                AuditEvent::new("device_flagged_suspicious", SecurityLevel::High)
                    .subject(&record.subject_id)
                    .detail(json!({"device_id": device_id})),
            )
            .await;
        Ok(record)
    }

    /// Block a device outright.
    ///
    /// # Errors
    /// Returns an error when the device does not exist or storage fails.
    pub async fn block(&self, device_id: &str) -> Result<DeviceRecord> {
        let mut record = self.load(device_id).await?;
        record.status = DeviceStatus::Blocked;
        record.trust_score = 0;
        self.store
            .update_device(record.clone())
            .await
            .context("device update failed")?;
        self.audit
            .log(
                AuditEvent::new("device_blocked", SecurityLevel::High)
                    .subject(&record.subject_id)
                    .detail(json!({"device_id": device_id})),
            )
            .await;
        Ok(record)
    }

    async fn load(&self, device_id: &str) -> Result<DeviceRecord> {
        self.store
            .find_device(device_id)
            .await
            .context("device lookup failed")?
            .with_context(|| format!("unknown device {device_id}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audit::NoopAlerter;
    use crate::store::{AuditStore, MemoryAuditStore, MemoryDeviceStore};

    fn registry() -> DeviceRegistry {
        registry_with_audit().0
    }

    fn registry_with_audit() -> (DeviceRegistry, Arc<MemoryAuditStore>) {
        let audit_store = Arc::new(MemoryAuditStore::new());
        let audit = Arc::new(AuditRiskEngine::new(
            audit_store.clone(),
            Arc::new(NoopAlerter),
        ));
        (
            DeviceRegistry::new(Arc::new(MemoryDeviceStore::new()), audit),
            audit_store,
        )
    }

    fn attributes() -> DeviceAttributes {
        DeviceAttributes {
            client_signature: "Mozilla/5.0 (X11; Linux x86_64)".to_string(),
            screen_resolution: "2560x1440".to_string(),
            timezone: "Europe/Berlin".to_string(),
            language: "de-DE".to_string(),
            device_name: Some("work laptop".to_string()),
            ..DeviceAttributes::default()
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint(&attributes()), fingerprint(&attributes()));
    }

    #[test]
    fn fingerprint_ignores_declared_metadata() {
        let mut renamed = attributes();
        renamed.device_name = Some("renamed".to_string());
        assert_eq!(fingerprint(&attributes()), fingerprint(&renamed));
    }

    #[test]
    fn fingerprint_changes_with_configuration() {
        let mut moved = attributes();
        moved.timezone = "America/New_York".to_string();
        assert_ne!(fingerprint(&attributes()), fingerprint(&moved));
    }

    #[tokio::test]
    async fn first_sight_is_pending_and_neutral() {
        let registry = registry();
        let registration = registry.register("alice", attributes()).await.unwrap();
        assert!(registration.newly_registered);
        assert_eq!(registration.status, DeviceStatus::Pending);
        assert_eq!(registration.trust_score, 5);
        assert!(registration.requires_verification);
    }

    #[tokio::test]
    async fn re_registration_refreshes_without_duplicating() {
        let registry = registry();
        let first = registry.register("alice", attributes()).await.unwrap();
        let second = registry.register("alice", attributes()).await.unwrap();
        assert_eq!(first.device_id, second.device_id);
        assert!(!second.newly_registered);
        // Trust does not move through repeated use.
        assert_eq!(second.trust_score, 5);
    }

    #[tokio::test]
    async fn refresh_leaves_an_audit_trail() {
        let (registry, audit_store) = registry_with_audit();
        registry.register("alice", attributes()).await.unwrap();
        registry.register("alice", attributes()).await.unwrap();

        let events: Vec<String> = audit_store
            .audits_for_subject("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.event_type)
            .collect();
        assert!(events.contains(&"device_registered".to_string()));
        assert!(events.contains(&"known_device_used".to_string()));
    }

    #[tokio::test]
    async fn same_configuration_other_subject_is_a_new_device() {
        let registry = registry();
        let alice = registry.register("alice", attributes()).await.unwrap();
        let bob = registry.register("bob", attributes()).await.unwrap();
        assert_ne!(alice.device_id, bob.device_id);
    }

    #[tokio::test]
    async fn verification_is_the_only_trust_escalation() {
        let registry = registry();
        let registration = registry.register("alice", attributes()).await.unwrap();
        for _ in 0..20 {
            let refreshed = registry.register("alice", attributes()).await.unwrap();
            assert_eq!(refreshed.trust_score, 5);
        }
        let verified = registry.mark_verified(&registration.device_id).await.unwrap();
        assert_eq!(verified.status, DeviceStatus::Trusted);
        assert_eq!(verified.trust_score, 8);
        assert!(verified.verified);
    }

    #[tokio::test]
    async fn suspicious_and_blocked_lower_trust() {
        let registry = registry();
        let registration = registry.register("alice", attributes()).await.unwrap();
        let suspicious = registry
            .mark_suspicious(&registration.device_id)
            .await
            .unwrap();
        assert_eq!(suspicious.status, DeviceStatus::Suspicious);
        assert_eq!(suspicious.trust_score, 2);
        let blocked = registry.block(&registration.device_id).await.unwrap();
        assert_eq!(blocked.status, DeviceStatus::Blocked);
        assert_eq!(blocked.trust_score, 0);
    }
}
