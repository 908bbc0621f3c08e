//! HS256 session-token codec.
//!
//! A token is `header.claims.signature` with base64url-unpadded segments.
//! The claims carry only the reference into server-side session state (plus
//! issue/expiry times and the MFA flag); the mutable session record never
//! travels in the token. Signature validity alone is therefore not enough to
//! authenticate: the session must also still exist server-side.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const KEY_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid key")]
    InvalidKey,
}

/// HMAC key for session tokens. Wrapped so the raw bytes never show up in
/// debug output and are zeroized on drop.
pub struct SessionTokenKey {
    key: SecretSlice<u8>,
}

impl SessionTokenKey {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            key: SecretSlice::from(bytes),
        }
    }

    /// Generate a fresh random key. Sessions signed under it do not survive
    /// a process restart, which suits deployments where the session store is
    /// in-process anyway.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self::new(bytes)
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(self.key.expose_secret()).map_err(|_| Error::InvalidKey)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct SessionTokenHeader {
    alg: String,
    typ: String,
}

impl SessionTokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims carried inside a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// Subject identifier.
    pub sub: String,
    /// Session identifier referencing the server-side record.
    pub sid: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// Whether MFA was verified when the session was created.
    pub mfa: bool,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Create a signed session token.
///
/// # Errors
/// Returns an error if claim serialization or MAC setup fails.
pub fn sign(key: &SessionTokenKey, claims: &SessionClaims) -> Result<String, Error> {
    let header_b64 = b64e_json(&SessionTokenHeader::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = key.mac()?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify signature and expiry, returning the claims.
///
/// # Errors
/// Returns an error for malformed tokens, wrong algorithm, bad signatures,
/// or expiry at or before `now_unix`.
pub fn verify(key: &SessionTokenKey, token: &str, now_unix: i64) -> Result<SessionClaims, Error> {
    let mut segments = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::TokenFormat);
    };

    let header: SessionTokenHeader = b64d_json(header_b64)?;
    if header.alg != "HS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let signature = Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| Error::Base64)?;
    let mut mac = key.mac()?;
    mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: SessionClaims = b64d_json(claims_b64)?;
    if claims.exp <= now_unix {
        return Err(Error::Expired);
    }
    Ok(claims)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn claims() -> SessionClaims {
        SessionClaims {
            sub: "alice".to_string(),
            sid: "session-1".to_string(),
            iat: 1_000,
            exp: 2_000,
            mfa: true,
        }
    }

    #[test]
    fn round_trip_preserves_claims() {
        let key = SessionTokenKey::generate();
        let token = sign(&key, &claims()).unwrap();
        let verified = verify(&key, &token, 1_500).unwrap();
        assert_eq!(verified, claims());
    }

    #[test]
    fn wrong_key_rejected() {
        let token = sign(&SessionTokenKey::generate(), &claims()).unwrap();
        let err = verify(&SessionTokenKey::generate(), &token, 1_500).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature));
    }

    #[test]
    fn tampered_claims_rejected() {
        let key = SessionTokenKey::generate();
        let token = sign(&key, &claims()).unwrap();

        let mut forged = claims();
        forged.sub = "mallory".to_string();
        let forged_b64 = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&forged).unwrap());
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_b64;
        let forged_token = parts.join(".");

        let err = verify(&key, &forged_token, 1_500).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature));
    }

    #[test]
    fn expired_token_rejected() {
        let key = SessionTokenKey::generate();
        let token = sign(&key, &claims()).unwrap();
        let err = verify(&key, &token, 2_000).unwrap_err();
        assert!(matches!(err, Error::Expired));
    }

    #[test]
    fn garbage_rejected_as_format_error() {
        let key = SessionTokenKey::generate();
        assert!(matches!(
            verify(&key, "not-a-token", 0).unwrap_err(),
            Error::TokenFormat
        ));
        assert!(matches!(
            verify(&key, "a.b.c.d", 0).unwrap_err(),
            Error::TokenFormat
        ));
    }

    #[test]
    fn non_hs256_header_rejected() {
        let key = SessionTokenKey::generate();
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"none","typ":"JWT"}"#);
        let body = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&claims()).unwrap());
        let token = format!("{header}.{body}.AAAA");
        let err = verify(&key, &token, 1_500).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlg(_)));
    }
}
