//! Data-loss-prevention content scanning.
//!
//! A pure scan: matches are reported with an aggregate risk score, nothing is
//! blocked or redacted here.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

/// Line count above which a payload is treated as a bulk export.
const BULK_EXPORT_LINE_THRESHOLD: usize = 1000;

/// Aggregate risk above which the caller should act on the findings.
const ACTION_RISK_THRESHOLD: u8 = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DlpFinding {
    pub category: String,
    pub matches: usize,
    pub risk_weight: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DlpScanReport {
    pub scan_id: String,
    pub subject_id: String,
    pub content_type: String,
    pub findings: Vec<DlpFinding>,
    pub risk_score: u8,
    pub action_required: bool,
    pub recommendations: Vec<String>,
}

struct Pattern {
    category: &'static str,
    regex: &'static str,
    risk_weight: u8,
    recommendation: &'static str,
}

const PATTERNS: &[Pattern] = &[
    Pattern {
        category: "ssn",
        regex: r"\b\d{3}-\d{2}-\d{4}\b",
        risk_weight: 4,
        recommendation: "remove or mask social security numbers",
    },
    Pattern {
        category: "credit_card",
        regex: r"\b(?:\d[ -]?){13,16}\b",
        risk_weight: 4,
        recommendation: "remove or tokenize card numbers",
    },
    Pattern {
        category: "email_address",
        regex: r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        risk_weight: 1,
        recommendation: "check whether email addresses need to leave the system",
    },
    Pattern {
        category: "phone_number",
        regex: r"\b(?:\+?\d{1,2}[ .-]?)?\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b",
        risk_weight: 1,
        recommendation: "check whether phone numbers need to leave the system",
    },
    Pattern {
        category: "api_key",
        regex: r"\b[A-Za-z0-9_-]{32,}\b",
        risk_weight: 3,
        recommendation: "rotate any exposed API keys",
    },
    Pattern {
        category: "password_assignment",
        regex: r#"(?i)password\s*[:=]\s*\S+"#,
        risk_weight: 3,
        recommendation: "never embed passwords in content",
    },
];

fn compiled_patterns() -> &'static Vec<(usize, Regex)> {
    static COMPILED: OnceLock<Vec<(usize, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .enumerate()
            .filter_map(|(idx, pattern)| Regex::new(pattern.regex).ok().map(|re| (idx, re)))
            .collect()
    })
}

/// Scan `content` for data-loss indicators.
#[must_use]
pub fn dlp_scan(content: &str, content_type: &str, subject_id: &str) -> DlpScanReport {
    let mut findings = Vec::new();
    let mut recommendations = Vec::new();
    let mut risk: u8 = 0;

    for (idx, regex) in compiled_patterns() {
        let matches = regex.find_iter(content).count();
        if matches == 0 {
            continue;
        }
        let pattern = &PATTERNS[*idx];
        risk = risk.saturating_add(pattern.risk_weight);
        findings.push(DlpFinding {
            category: pattern.category.to_string(),
            matches,
            risk_weight: pattern.risk_weight,
        });
        recommendations.push(pattern.recommendation.to_string());
    }

    let line_count = content.lines().count();
    if line_count > BULK_EXPORT_LINE_THRESHOLD {
        risk = risk.saturating_add(2);
        findings.push(DlpFinding {
            category: "bulk_export".to_string(),
            matches: line_count,
            risk_weight: 2,
        });
        recommendations.push("review why this much data is leaving at once".to_string());
    }

    let risk_score = risk.min(10);
    DlpScanReport {
        scan_id: Uuid::new_v4().to_string(),
        subject_id: subject_id.to_string(),
        content_type: content_type.to_string(),
        findings,
        risk_score,
        action_required: risk_score > ACTION_RISK_THRESHOLD,
        recommendations,
    }
}
