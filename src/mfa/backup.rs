//! Single-use backup recovery codes.
//!
//! Codes cover the "phone is gone" path when TOTP is unavailable. Each code
//! is two independent 4-byte random values, hex-encoded, upper-cased, and
//! joined with a dash into a human-typeable token. A code authenticates at
//! most once: on a successful match the caller persists the reduced set.

use rand::{rngs::OsRng, RngCore};

pub const BACKUP_CODE_COUNT: usize = 10;

/// Generate a fresh batch of backup codes.
#[must_use]
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = OsRng;
    (0..BACKUP_CODE_COUNT)
        .map(|_| generate_code(&mut rng))
        .collect()
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut left = [0u8; 4];
    let mut right = [0u8; 4];
    rng.fill_bytes(&mut left);
    rng.fill_bytes(&mut right);
    format!("{}-{}", hex_upper(&left), hex_upper(&right))
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

/// Check `submitted` against the stored set, case-insensitively.
///
/// On a match the matched code is removed from the returned set; the caller
/// must persist that reduced set to enforce single use. On no match the set
/// comes back unchanged.
#[must_use]
pub fn verify_backup_code(submitted: &str, stored: Vec<String>) -> (bool, Vec<String>) {
    let normalized = submitted.trim().to_uppercase();
    let Some(position) = stored
        .iter()
        .position(|code| code.to_uppercase() == normalized)
    else {
        return (false, stored);
    };
    let mut remaining = stored;
    remaining.remove(position);
    (true, remaining)
}
