//! # Custodia (Account Security Core)
//!
//! `custodia` is an embeddable account-security subsystem: the pieces of an
//! identity platform that sit between "the user typed a password" and "the
//! request carries a valid session".
//!
//! ## Components
//!
//! - **Password policy** ([`password`]): ordered rule evaluation that reports
//!   every violation at once, so a UI can show the full list.
//! - **MFA** ([`mfa`]): TOTP enrollment and verification (RFC 6238, 30 s
//!   step, one step of clock-skew tolerance) plus single-use backup codes.
//! - **Brute-force lockout** ([`lockout`]): sliding-window attempt tracking
//!   keyed by account and origin address; unlocking is purely a function of
//!   time, there is no manual unlock.
//! - **IP allow-listing** ([`netacl`]): per-subject and global exact/CIDR
//!   tiers. Denials are audited; enforcement is the caller's decision.
//! - **Device trust** ([`device`]): fingerprint-keyed registration with an
//!   explicit-verification-only trust model.
//! - **Sessions** ([`session`]): HS256-signed tokens referencing an
//!   authoritative server-side record, so revocation always wins over a
//!   still-valid signature.
//! - **Audit** ([`audit`]): risk-scored, tamper-evident event records with
//!   anomaly/compliance flagging, retention assignment, and a DLP scanner.
//! - **Orchestrator** ([`orchestrator`]): composes the above into a single
//!   `authenticate` flow with enumeration-safe failure reporting.
//!
//! ## Failure discipline
//!
//! Authentication-path failures are generic and non-distinguishing (a caller
//! cannot tell "unknown user" from "wrong password" from "wrong MFA code").
//! Auth-critical storage failures fail closed; audit-path failures fail open
//! and never abort the flow they observe.

pub mod audit;
pub mod device;
pub mod identity;
pub mod lockout;
pub mod mfa;
pub mod netacl;
pub mod orchestrator;
pub mod password;
pub mod policy;
pub mod session;
pub mod store;

pub use orchestrator::{AuthOutcome, SecurityOrchestrator};
pub use policy::SecurityPolicy;
