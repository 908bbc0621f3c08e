//! Tiered IP allow-listing: per-subject exact and CIDR entries, then global
//! exact and CIDR entries, first match wins.
//!
//! The check is advisory by default: a denial is audited but enforcement
//! (rejecting the request) is left to the caller, since some deployments run
//! alert-only. Malformed configuration entries are skipped at load time so
//! one bad line never poisons the rest of the list.

use ipnetwork::IpNetwork;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;

use crate::audit::{AuditEvent, AuditRiskEngine, SecurityLevel};

#[derive(Clone, Debug, Default)]
struct AllowList {
    exact: HashSet<IpAddr>,
    ranges: Vec<IpNetwork>,
}

impl AllowList {
    fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut list = Self::default();
        for entry in entries {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Ok(addr) = entry.parse::<IpAddr>() {
                list.exact.insert(addr);
            } else if let Ok(network) = entry.parse::<IpNetwork>() {
                list.ranges.push(network);
            } else {
                // One bad config line must not take down the whole list.
                warn!(entry, "skipping malformed allow-list entry");
            }
        }
        list
    }

    fn matches(&self, addr: IpAddr) -> bool {
        self.exact.contains(&addr) || self.ranges.iter().any(|network| network.contains(addr))
    }
}

pub struct IpAccessController {
    audit: Arc<AuditRiskEngine>,
    subject_lists: HashMap<String, AllowList>,
    global_list: AllowList,
}

impl IpAccessController {
    #[must_use]
    pub fn new(audit: Arc<AuditRiskEngine>) -> Self {
        Self {
            audit,
            subject_lists: HashMap::new(),
            global_list: AllowList::default(),
        }
    }

    /// Replace the allow-list for one subject. Entries may be exact
    /// addresses or CIDR ranges; malformed entries are skipped.
    #[must_use]
    pub fn with_subject_entries<'a, I>(mut self, subject_id: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.subject_lists
            .insert(subject_id.to_string(), AllowList::from_entries(entries));
        self
    }

    /// Replace the global allow-list applied to every subject.
    #[must_use]
    pub fn with_global_entries<'a, I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.global_list = AllowList::from_entries(entries);
        self
    }

    /// Evaluate whether `origin` is permitted for `subject_id`.
    ///
    /// Tiers are checked in order: subject exact, subject CIDR, global exact,
    /// global CIDR. An empty or unparseable origin is denied outright. A
    /// subject with no configured list and no global match is denied. Denials
    /// emit a `non_whitelisted_ip_access` audit event; acting on the denial
    /// is the caller's decision.
    pub async fn is_allowed(&self, subject_id: &str, origin: &str) -> bool {
        let Ok(addr) = origin.trim().parse::<IpAddr>() else {
            self.audit_denial(subject_id, origin, "unparseable_origin")
                .await;
            return false;
        };

        if let Some(list) = self.subject_lists.get(subject_id) {
            if list.matches(addr) {
                return true;
            }
        }
        if self.global_list.matches(addr) {
            return true;
        }

        self.audit_denial(subject_id, origin, "not_on_allow_list")
            .await;
        false
    }

    async fn audit_denial(&self, subject_id: &str, origin: &str, reason: &str) {
        self.audit
            .log(
                AuditEvent::new("non_whitelisted_ip_access", SecurityLevel::High)
                    .subject(subject_id)
                    .origin(origin)
                    .detail(json!({"reason": reason})),
            )
            .await;
    }
}
