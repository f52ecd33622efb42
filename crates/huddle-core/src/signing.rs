//! Shared-secret signing.
//!
//! The room PIN doubles as an HMAC key. Objects are signed over their
//! canonical JSON form with the signature field blanked, so the signature
//! covers everything except itself. Certificate fingerprints use the same
//! `sha256:` prefix convention; object signatures use `hs256:`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::api::ApiObject;

type HmacSha256 = Hmac<Sha256>;

// ── Key ───────────────────────────────────────────────────────────────────────

/// An opaque shared secret (the PIN).
///
/// The key itself never goes on the wire; its published signature is the
/// value safe to gossip for matchmaking.
#[derive(Clone, PartialEq, Eq)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Signature safe to publish: `sha256:hex(SHA-256("published/" ‖ key))`.
    pub fn published_signature(&self) -> String {
        self.prefixed_signature(b"published/")
    }

    /// Signature that never leaves the node: prefix `"secret/"`.
    pub fn private_signature(&self) -> String {
        self.prefixed_signature(b"secret/")
    }

    /// Check a signature against the published or private form.
    pub fn verify(&self, signature: &str, published: bool) -> bool {
        let expected = if published {
            self.published_signature()
        } else {
            self.private_signature()
        };
        signature == expected
    }

    fn prefixed_signature(&self, prefix: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prefix);
        hasher.update(&self.0);
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

// The secret must not leak through debug output.
impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key({} bytes)", self.0.len())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SignError {
    #[error("NoSignature")]
    NoSignature,

    #[error("SignatureExpired: sign time {sign_time} (expected after {allow_since})")]
    SignatureExpired {
        sign_time: DateTime<Utc>,
        allow_since: DateTime<Utc>,
    },

    #[error("InvalidSignTime: sign time {sign_time} (expected before {allow_until})")]
    InvalidSignTime {
        sign_time: DateTime<Utc>,
        allow_until: DateTime<Utc>,
    },

    #[error("SignatureMismatch: {actual:?} (expected {expected:?})")]
    SignatureMismatch { actual: String, expected: String },

    #[error("encode object to json error: {0}")]
    Encode(#[from] serde_json::Error),
}

// ── Object signing ────────────────────────────────────────────────────────────

/// HMAC-SHA256 over raw bytes, `hs256:`-prefixed hex.
pub fn sign_data(key: &Key, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_ref()).expect("HMAC accepts any key length");
    mac.update(data);
    format!("hs256:{}", hex::encode(mac.finalize().into_bytes()))
}

/// Sign any JSON-serializable object over its canonical encoding.
pub fn sign_object<T: serde::Serialize>(key: &Key, obj: &T) -> Result<String, SignError> {
    let raw = serde_json::to_vec(obj)?;
    Ok(sign_data(key, &raw))
}

/// Sign an API object in place: blank the signature, stamp the sign time,
/// then store the signature over the resulting form.
pub fn sign_api_object<T: ApiObject>(key: &Key, obj: &mut T) -> Result<(), SignError> {
    let meta = obj.meta_mut();
    meta.signature = String::new();
    meta.sign_time = Some(Utc::now());

    let signature = sign_object(key, obj)?;
    obj.meta_mut().signature = signature;
    Ok(())
}

/// Verify an API object's signature and sign-time window.
///
/// `allow_until` defaults to now — future-dated signatures are rejected.
/// The object is not mutated; verification recomputes over a copy.
pub fn verify_api_object<T: ApiObject + Clone>(
    key: &Key,
    obj: &T,
    allow_since: Option<DateTime<Utc>>,
    allow_until: Option<DateTime<Utc>>,
) -> Result<(), SignError> {
    let meta = obj.meta();
    if meta.signature.is_empty() {
        return Err(SignError::NoSignature);
    }

    let sign_time = meta.sign_time.unwrap_or(DateTime::<Utc>::MIN_UTC);
    if let Some(allow_since) = allow_since {
        if sign_time < allow_since {
            return Err(SignError::SignatureExpired {
                sign_time,
                allow_since,
            });
        }
    }
    let allow_until = allow_until.unwrap_or_else(Utc::now);
    if sign_time > allow_until {
        return Err(SignError::InvalidSignTime {
            sign_time,
            allow_until,
        });
    }

    let mut unsigned = obj.clone();
    unsigned.meta_mut().signature = String::new();
    let actual = sign_object(key, &unsigned)?;

    if actual != meta.signature {
        return Err(SignError::SignatureMismatch {
            actual,
            expected: meta.signature.clone(),
        });
    }

    Ok(())
}

// ── Certificates ──────────────────────────────────────────────────────────────

/// Fingerprint of a DER-encoded certificate: `sha256:` + lowercase hex.
pub fn fingerprint_cert(der: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(der)))
}
