//! Storage ports and their in-memory implementations.
//!
//! Each component owns its state through one of these traits, injected at
//! construction. The in-memory implementations are the single-process
//! deployment; a multi-instance deployment implements the same traits over a
//! shared store with equivalent atomicity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::audit::AuditRecord;
use crate::device::DeviceRecord;
use crate::session::SessionRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out")]
    Timeout,
}

/// Authoritative server-side session state. The signed token a client holds
/// is only a reference into this store, which is why deletion here revokes a
/// token whose signature is still valid.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, record: SessionRecord) -> Result<(), StoreError>;
    async fn find_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;
    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;
    /// Delete every session belonging to `subject_id`; returns how many.
    async fn delete_subject_sessions(&self, subject_id: &str) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn insert_device(&self, record: DeviceRecord) -> Result<(), StoreError>;
    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StoreError>;
    async fn find_by_fingerprint(
        &self,
        subject_id: &str,
        fingerprint: &str,
    ) -> Result<Option<DeviceRecord>, StoreError>;
    async fn update_device(&self, record: DeviceRecord) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_audit(&self, record: AuditRecord) -> Result<(), StoreError>;
    async fn find_audit(&self, audit_id: &str) -> Result<Option<AuditRecord>, StoreError>;
    async fn audits_for_subject(&self, subject_id: &str) -> Result<Vec<AuditRecord>, StoreError>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .await
            .insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(record) = self.sessions.lock().await.get_mut(session_id) {
            record.last_activity = at;
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.lock().await.remove(session_id);
        Ok(())
    }

    async fn delete_subject_sessions(&self, subject_id: &str) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.subject_id != subject_id);
        Ok(before - sessions.len())
    }
}

#[derive(Default)]
pub struct MemoryDeviceStore {
    devices: Mutex<HashMap<String, DeviceRecord>>,
}

impl MemoryDeviceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn insert_device(&self, record: DeviceRecord) -> Result<(), StoreError> {
        self.devices
            .lock()
            .await
            .insert(record.device_id.clone(), record);
        Ok(())
    }

    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StoreError> {
        Ok(self.devices.lock().await.get(device_id).cloned())
    }

    async fn find_by_fingerprint(
        &self,
        subject_id: &str,
        fingerprint: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        Ok(self
            .devices
            .lock()
            .await
            .values()
            .find(|record| record.subject_id == subject_id && record.fingerprint == fingerprint)
            .cloned())
    }

    async fn update_device(&self, record: DeviceRecord) -> Result<(), StoreError> {
        self.devices
            .lock()
            .await
            .insert(record.device_id.clone(), record);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAuditStore {
    records: Mutex<HashMap<String, AuditRecord>>,
}

impl MemoryAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert_audit(&self, record: AuditRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(record.audit_id.clone(), record);
        Ok(())
    }

    async fn find_audit(&self, audit_id: &str) -> Result<Option<AuditRecord>, StoreError> {
        Ok(self.records.lock().await.get(audit_id).cloned())
    }

    async fn audits_for_subject(&self, subject_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|record| record.subject_id.as_deref() == Some(subject_id))
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.timestamp);
        Ok(matching)
    }
}
