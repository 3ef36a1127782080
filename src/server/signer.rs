//! Activation tokens and license key derivation.
//!
//! A token is `"{payload}.{timestamp}.{signature}"`:
//! - `payload` is `"{license_key}|{machine_id}"`
//! - `timestamp` is base64url (no padding) of the big-endian issuance time in
//!   unix seconds, leading zero bytes stripped
//! - `signature` is base64url (no padding) of HMAC-SHA256 over
//!   `"{payload}.{timestamp}"`, keyed with a key derived from the server
//!   secret and [`TOKEN_SALT`]
//!
//! Tokens verify without a database lookup. They are rejected when malformed,
//! when the signature does not match, when older than the configured maximum
//! age, or when issued in the future.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use ring::hmac;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Separates a token's payload, timestamp and signature.
const SEP: char = '.';

/// Domain separation for the signing key.
pub const TOKEN_SALT: &[u8] = b"gocbt-activation-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token has expired")]
    Expired,
}

/// Signs and verifies activation tokens.
#[derive(Clone)]
pub struct TokenSigner {
    key: hmac::Key,
    max_age_secs: u64,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("max_age_secs", &self.max_age_secs)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &str, max_age_secs: u64) -> Self {
        let root = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        let derived = hmac::sign(&root, TOKEN_SALT);
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, derived.as_ref()),
            max_age_secs,
        }
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }

    /// Sign `payload` with the current time.
    pub fn sign(&self, payload: &str) -> String {
        self.sign_at(payload, now_secs())
    }

    /// Sign `payload` as if issued at `issued_at` (unix seconds).
    pub fn sign_at(&self, payload: &str, issued_at: u64) -> String {
        let bytes = issued_at.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        let ts = URL_SAFE_NO_PAD.encode(&bytes[first..]);

        let signed = format!("{payload}{SEP}{ts}");
        let tag = hmac::sign(&self.key, signed.as_bytes());
        format!("{signed}{SEP}{}", URL_SAFE_NO_PAD.encode(tag.as_ref()))
    }

    /// Verify `token` now and return its payload.
    pub fn unsign(&self, token: &str) -> Result<String, TokenError> {
        self.unsign_at(token, now_secs())
    }

    /// Verify `token` against the clock value `now` (unix seconds).
    pub fn unsign_at(&self, token: &str, now: u64) -> Result<String, TokenError> {
        let (signed, sig) = token.rsplit_once(SEP).ok_or(TokenError::Malformed)?;
        let (payload, ts) = signed.rsplit_once(SEP).ok_or(TokenError::Malformed)?;
        if payload.is_empty() || ts.is_empty() || sig.is_empty() {
            return Err(TokenError::Malformed);
        }

        let sig = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| TokenError::Malformed)?;
        hmac::verify(&self.key, signed.as_bytes(), &sig).map_err(|_| TokenError::BadSignature)?;

        let ts = URL_SAFE_NO_PAD.decode(ts).map_err(|_| TokenError::Malformed)?;
        if ts.is_empty() || ts.len() > 8 {
            return Err(TokenError::Malformed);
        }
        let issued_at = ts.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        if issued_at > now {
            return Err(TokenError::BadSignature);
        }
        if now - issued_at > self.max_age_secs {
            return Err(TokenError::Expired);
        }
        Ok(payload.to_string())
    }
}

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

/// Token payload for a license bound to a machine.
pub fn token_payload(license_key: &str, machine_id: &str) -> String {
    format!("{license_key}|{machine_id}")
}

/// Deterministic 40-hex-char license key for a payment.
pub fn derive_license_key(email: &str, reference: &str, product_code: &str, secret: &str) -> String {
    let digest = Sha256::digest(format!("{email}|{reference}|{product_code}|{secret}").as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(40);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = 24 * 60 * 60;
    const T0: u64 = 1_767_225_600;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret", 365 * DAY)
    }

    #[test]
    fn sign_then_unsign() {
        let s = signer();
        let payload = token_payload("abc123", "m1");
        let token = s.sign_at(&payload, T0);
        assert!(token.starts_with("abc123|m1."));
        assert_eq!(s.unsign_at(&token, T0 + 10).unwrap(), payload);
    }

    #[test]
    fn current_clock_round_trip() {
        let s = signer();
        let token = s.sign("k|m");
        assert_eq!(s.unsign(&token).unwrap(), "k|m");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let s = signer();
        let token = s.sign_at("abc123|m1", T0);
        let forged = token.replacen("m1", "m2", 1);
        assert_eq!(s.unsign_at(&forged, T0), Err(TokenError::BadSignature));
    }

    #[test]
    fn other_secret_is_rejected() {
        let token = signer().sign_at("abc123|m1", T0);
        let other = TokenSigner::new("another-secret", 365 * DAY);
        assert_eq!(other.unsign_at(&token, T0), Err(TokenError::BadSignature));
    }

    #[test]
    fn expiry_is_enforced() {
        let s = signer();
        let token = s.sign_at("abc123|m1", T0);
        assert!(s.unsign_at(&token, T0 + 365 * DAY).is_ok());
        assert_eq!(
            s.unsign_at(&token, T0 + 365 * DAY + 1),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn future_timestamp_is_rejected() {
        let s = signer();
        let token = s.sign_at("abc123|m1", T0 + 100);
        assert!(s.unsign_at(&token, T0).is_err());
    }

    #[test]
    fn malformed_tokens() {
        let s = signer();
        for bad in ["", "no-dots", "one.dot", "..", "p.t.!!!", "p..sig"] {
            assert_eq!(s.unsign_at(bad, T0), Err(TokenError::Malformed), "{bad}");
        }
    }

    #[test]
    fn payload_may_contain_dots() {
        let s = signer();
        let token = s.sign_at("key|host.local", T0);
        assert_eq!(s.unsign_at(&token, T0).unwrap(), "key|host.local");
    }

    #[test]
    fn license_key_is_deterministic_40_hex() {
        let a = derive_license_key("a@b.com", "ref_123", "gocbt-desktop", "s");
        let b = derive_license_key("a@b.com", "ref_123", "gocbt-desktop", "s");
        let c = derive_license_key("a@b.com", "ref_124", "gocbt-desktop", "s");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
