//! Risk-scored, tamper-evident audit trail.
//!
//! Every security-relevant event passes through [`AuditRiskEngine::log`],
//! which scores it, flags anomalies and compliance concerns, classifies the
//! payload's sensitivity, assigns a retention period, and seals the record
//! with a digest over its immutable fields. Audit logging observes the
//! primary flow and must never break it: internal failures are logged and a
//! sentinel id is returned.

pub mod dlp;

pub use dlp::{DlpFinding, DlpScanReport};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

use crate::store::AuditStore;

/// Risk score above which the real-time alert path fires.
const ALERT_RISK_THRESHOLD: u8 = 7;

/// Hour bounds of "normal" login activity; logins outside are anomalous.
const BUSINESS_HOURS: (u32, u32) = (6, 22);

/// Severity attached to an audit event by its emitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl SecurityLevel {
    /// Retention period in days for records of this severity.
    #[must_use]
    pub fn retention_days(self) -> u32 {
        match self {
            Self::Info | Self::Low => 90,
            Self::Medium => 365,
            Self::High => 1095,
            Self::Critical => 3650,
        }
    }
}

/// Coarse event class driving the base risk score.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EventCategory {
    Login,
    DataAccess,
    DataModification,
    AdminAction,
    SecurityEvent,
}

impl EventCategory {
    fn classify(event_type: &str) -> Self {
        let has = |markers: &[&str]| markers.iter().any(|marker| event_type.contains(marker));
        // Failure-ish markers outrank the rest so "mfa_verification_failed"
        // never lands in the benign class "verified" would suggest.
        if has(&["login", "logout", "session"]) {
            Self::Login
        } else if has(&["admin"]) {
            Self::AdminAction
        } else if has(&[
            "failed", "invalid", "denied", "rejected", "locked", "blocked", "suspicious", "breach",
            "error",
        ]) {
            Self::SecurityEvent
        } else if has(&[
            "modif", "update", "delete", "setup", "registered", "enroll", "verified", "used",
        ]) {
            Self::DataModification
        } else if has(&["access", "read", "export"]) {
            Self::DataAccess
        } else {
            Self::SecurityEvent
        }
    }

    fn base_risk(self) -> u8 {
        match self {
            Self::Login => 2,
            Self::DataAccess => 3,
            Self::DataModification => 5,
            Self::AdminAction => 7,
            Self::SecurityEvent => 8,
        }
    }
}

/// Payload sensitivity classification derived from field names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    HighlySensitive,
    Sensitive,
    Public,
}

/// A security-relevant event as reported by an emitter.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub subject_id: Option<String>,
    pub event_type: String,
    pub severity: SecurityLevel,
    pub detail: Value,
    pub origin: Option<String>,
    pub client_signature: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, severity: SecurityLevel) -> Self {
        Self {
            subject_id: None,
            event_type: event_type.into(),
            severity,
            detail: Value::Null,
            origin: None,
            client_signature: None,
        }
    }

    #[must_use]
    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    #[must_use]
    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn client_signature(mut self, signature: impl Into<String>) -> Self {
        self.client_signature = Some(signature.into());
        self
    }
}

/// Immutable audit record as persisted. The `record_hash` covers the fields
/// fixed at creation, so any post-hoc edit is detectable by recomputation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: SecurityLevel,
    pub subject_id: Option<String>,
    pub origin: Option<String>,
    pub client_signature: Option<String>,
    pub detail: Value,
    pub risk_score: u8,
    pub anomaly_flags: Vec<String>,
    pub compliance_flags: Vec<String>,
    pub data_classification: DataClassification,
    pub retention_days: u32,
    pub record_hash: String,
}

impl AuditRecord {
    /// Recompute the tamper-evident digest from the record's sealed fields.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        seal_record(
            &self.audit_id,
            &self.event_type,
            self.subject_id.as_deref(),
            &self.detail,
            self.timestamp,
        )
    }
}

fn seal_record(
    audit_id: &str,
    event_type: &str,
    subject_id: Option<&str>,
    detail: &Value,
    timestamp: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(audit_id.as_bytes());
    hasher.update(event_type.as_bytes());
    hasher.update(subject_id.unwrap_or("").as_bytes());
    hasher.update(detail.to_string().as_bytes());
    hasher.update(timestamp.timestamp_millis().to_be_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Real-time alert sink invoked when a record's risk exceeds the threshold.
/// Fire-and-forget: implementations must not fail the audit path.
pub trait Alerter: Send + Sync {
    fn alert(&self, record: &AuditRecord);
}

/// Default alerter: emits the alert on the error log channel. A production
/// deployment fans out to paging/webhook sinks instead.
#[derive(Clone, Debug)]
pub struct TracingAlerter;

impl Alerter for TracingAlerter {
    fn alert(&self, record: &AuditRecord) {
        error!(
            audit_id = %record.audit_id,
            event_type = %record.event_type,
            risk_score = record.risk_score,
            "high-risk security event"
        );
    }
}

/// Alerter that drops everything; used in tests.
#[derive(Clone, Debug)]
pub struct NoopAlerter;

impl Alerter for NoopAlerter {
    fn alert(&self, _record: &AuditRecord) {}
}

pub struct AuditRiskEngine {
    store: Arc<dyn AuditStore>,
    alerter: Arc<dyn Alerter>,
    known_bad_origins: HashSet<String>,
    seen_origins: Mutex<HashMap<String, HashSet<String>>>,
}

impl AuditRiskEngine {
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>, alerter: Arc<dyn Alerter>) -> Self {
        Self {
            store,
            alerter,
            known_bad_origins: HashSet::new(),
            seen_origins: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_known_bad_origins<I>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.known_bad_origins = origins.into_iter().collect();
        self
    }

    /// Score, enrich, seal, and persist one event. Returns the audit id, or
    /// an empty sentinel when persistence fails; the caller's flow continues
    /// either way.
    pub async fn log(&self, event: AuditEvent) -> String {
        self.log_at(event, Utc::now()).await
    }

    /// Like [`log`](Self::log) with an explicit event time, so tests can pin
    /// the anomaly window.
    pub async fn log_at(&self, event: AuditEvent, now: DateTime<Utc>) -> String {
        let audit_id = Uuid::new_v4().to_string();
        let category = EventCategory::classify(&event.event_type);
        let risk_score = self.risk_score(category, &event);
        let anomaly_flags = self.anomaly_flags(category, &event, now).await;
        let compliance_flags = compliance_flags(category, &event.detail);
        let data_classification = classify_detail(&event.detail);
        let record_hash = seal_record(
            &audit_id,
            &event.event_type,
            event.subject_id.as_deref(),
            &event.detail,
            now,
        );

        let record = AuditRecord {
            audit_id: audit_id.clone(),
            timestamp: now,
            event_type: event.event_type,
            severity: event.severity,
            subject_id: event.subject_id,
            origin: event.origin,
            client_signature: event.client_signature,
            detail: event.detail,
            risk_score,
            anomaly_flags,
            compliance_flags,
            data_classification,
            retention_days: event.severity.retention_days(),
            record_hash,
        };

        if record.risk_score > ALERT_RISK_THRESHOLD {
            self.alerter.alert(&record);
        }

        match self.store.insert_audit(record).await {
            Ok(()) => audit_id,
            Err(err) => {
                // Audit failure must not break the flow being observed.
                error!("failed to persist audit record: {err}");
                String::new()
            }
        }
    }

    fn risk_score(&self, category: EventCategory, event: &AuditEvent) -> u8 {
        let mut score = category.base_risk();
        if let Some(origin) = &event.origin {
            if self.known_bad_origins.contains(origin) {
                score = score.saturating_add(3);
            }
        }
        let failed_attempts = event
            .detail
            .get("failed_attempts")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if failed_attempts > 3 {
            score = score.saturating_add(2);
        }
        if event
            .detail
            .get("suspicious_activity")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            score = score.saturating_add(4);
        }
        score.min(10)
    }

    async fn anomaly_flags(
        &self,
        category: EventCategory,
        event: &AuditEvent,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut flags = Vec::new();

        if category == EventCategory::Login {
            let hour = now.hour();
            if hour < BUSINESS_HOURS.0 || hour >= BUSINESS_HOURS.1 {
                flags.push("unusual_login_time".to_string());
            }
        }

        if let (Some(subject), Some(origin)) = (&event.subject_id, &event.origin) {
            let mut seen = self.seen_origins.lock().await;
            let origins = seen.entry(subject.clone()).or_default();
            if !origins.insert(origin.clone()) {
                // known address, nothing to flag
            } else if origins.len() > 1 {
                flags.push("new_ip_address".to_string());
            }
        }

        flags
    }
}

fn compliance_flags(category: EventCategory, detail: &Value) -> Vec<String> {
    let mut flags = Vec::new();
    let has_personal = detail_mentions(detail, &["personal", "email", "phone", "address", "name"]);
    let has_financial = detail_mentions(
        detail,
        &["financial", "invoice", "payment", "account_balance"],
    );

    if category == EventCategory::DataAccess && has_personal {
        flags.push("gdpr_personal_data_access".to_string());
    }
    if matches!(
        category,
        EventCategory::AdminAction | EventCategory::DataModification
    ) && has_financial
    {
        flags.push("sox_financial_data_modification".to_string());
    }
    flags
}

fn classify_detail(detail: &Value) -> DataClassification {
    if detail_mentions(detail, &["ssn", "credit_card", "card_number", "financial"]) {
        DataClassification::HighlySensitive
    } else if detail_mentions(detail, &["personal", "email", "phone"]) {
        DataClassification::Sensitive
    } else {
        DataClassification::Public
    }
}

/// True when any object key in the payload (at any depth) contains one of
/// the given markers.
fn detail_mentions(detail: &Value, markers: &[&str]) -> bool {
    match detail {
        Value::Object(map) => map.iter().any(|(key, value)| {
            let key = key.to_lowercase();
            markers.iter().any(|marker| key.contains(marker)) || detail_mentions(value, markers)
        }),
        Value::Array(items) => items.iter().any(|item| detail_mentions(item, markers)),
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryAuditStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn engine() -> (AuditRiskEngine, Arc<MemoryAuditStore>) {
        let store = Arc::new(MemoryAuditStore::new());
        let engine = AuditRiskEngine::new(store.clone(), Arc::new(NoopAlerter));
        (engine, store)
    }

    #[tokio::test]
    async fn login_event_gets_base_risk() {
        let (engine, store) = engine();
        let id = engine
            .log(AuditEvent::new("successful_login", SecurityLevel::Info).subject("alice"))
            .await;
        let record = store.find_audit(&id).await.unwrap().unwrap();
        assert_eq!(record.risk_score, 2);
        assert_eq!(record.retention_days, 90);
    }

    #[tokio::test]
    async fn risk_modifiers_accumulate_and_clamp() {
        let store = Arc::new(MemoryAuditStore::new());
        let engine = AuditRiskEngine::new(store.clone(), Arc::new(NoopAlerter))
            .with_known_bad_origins(["203.0.113.9".to_string()]);
        let id = engine
            .log(
                AuditEvent::new("security_breach", SecurityLevel::Critical)
                    .origin("203.0.113.9")
                    .detail(json!({"failed_attempts": 5, "suspicious_activity": true})),
            )
            .await;
        let record = store.find_audit(&id).await.unwrap().unwrap();
        // 8 base + 3 + 2 + 4 clamps to 10.
        assert_eq!(record.risk_score, 10);
    }

    #[tokio::test]
    async fn off_hours_login_flagged() {
        let (engine, store) = engine();
        let night = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();
        let id = engine
            .log_at(
                AuditEvent::new("successful_login", SecurityLevel::Info).subject("alice"),
                night,
            )
            .await;
        let record = store.find_audit(&id).await.unwrap().unwrap();
        assert!(record
            .anomaly_flags
            .contains(&"unusual_login_time".to_string()));
    }

    #[tokio::test]
    async fn new_address_flagged_after_first() {
        let (engine, store) = engine();
        let noon = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let first = AuditEvent::new("successful_login", SecurityLevel::Info)
            .subject("alice")
            .origin("10.0.0.1");
        engine.log_at(first, noon).await;

        let second = AuditEvent::new("successful_login", SecurityLevel::Info)
            .subject("alice")
            .origin("198.51.100.7");
        let id = engine.log_at(second, noon).await;
        let record = store.find_audit(&id).await.unwrap().unwrap();
        assert!(record.anomaly_flags.contains(&"new_ip_address".to_string()));
    }

    #[tokio::test]
    async fn tamper_hash_detects_mutation() {
        let (engine, store) = engine();
        let id = engine
            .log(
                AuditEvent::new("data_access", SecurityLevel::Medium)
                    .subject("alice")
                    .detail(json!({"record": "r1"})),
            )
            .await;
        let mut record = store.find_audit(&id).await.unwrap().unwrap();
        assert_eq!(record.compute_hash(), record.record_hash);

        record.subject_id = Some("mallory".to_string());
        assert_ne!(record.compute_hash(), record.record_hash);
    }

    #[tokio::test]
    async fn compliance_flags_for_sensitive_payloads() {
        let (engine, store) = engine();
        let id = engine
            .log(
                AuditEvent::new("data_access", SecurityLevel::Medium)
                    .subject("alice")
                    .detail(json!({"personal_email": "a@example.com"})),
            )
            .await;
        let record = store.find_audit(&id).await.unwrap().unwrap();
        assert!(record
            .compliance_flags
            .contains(&"gdpr_personal_data_access".to_string()));
        assert_eq!(record.data_classification, DataClassification::Sensitive);
    }

    #[tokio::test]
    async fn credit_card_fields_highly_sensitive() {
        let (engine, store) = engine();
        let id = engine
            .log(
                AuditEvent::new("data_access", SecurityLevel::High)
                    .detail(json!({"credit_card": "tok_xyz"})),
            )
            .await;
        let record = store.find_audit(&id).await.unwrap().unwrap();
        assert_eq!(
            record.data_classification,
            DataClassification::HighlySensitive
        );
    }

    struct CountingAlerter(std::sync::atomic::AtomicUsize);

    impl Alerter for CountingAlerter {
        fn alert(&self, _record: &AuditRecord) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn alert_fires_above_threshold() {
        let store = Arc::new(MemoryAuditStore::new());
        let alerter = Arc::new(CountingAlerter(std::sync::atomic::AtomicUsize::new(0)));
        let engine = AuditRiskEngine::new(store, alerter.clone());

        engine
            .log(AuditEvent::new("security_breach", SecurityLevel::Critical)
                .detail(json!({"suspicious_activity": true})))
            .await;
        // 8 base + 4 suspicious = 10 > 7.
        assert_eq!(alerter.0.load(std::sync::atomic::Ordering::SeqCst), 1);

        engine
            .log(AuditEvent::new("successful_login", SecurityLevel::Info))
            .await;
        assert_eq!(alerter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
