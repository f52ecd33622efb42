//! Object identifiers.
//!
//! Every wire object is identified by a 128-bit UID (UUIDv4). The canonical
//! form is the usual hyphenated string; `short()` derives an 8-character
//! label for human-facing output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use uuid::Uuid;

/// A 128-bit object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(Uuid);

impl Uid {
    /// Mint a fresh random UID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The raw 16 bytes of the identifier.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short human-readable form: base32 of the first 5 bytes of the
    /// SHA-1 digest of the canonical string.
    pub fn short(&self) -> String {
        let digest = Sha1::digest(self.to_string().as_bytes());
        base32_encode(&digest[..5])
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Uid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// RFC 4648 base32, no padding.
fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 8 / 5 + 1);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &byte in data {
        acc = (acc << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[(acc >> bits) as usize & 0x1f] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[(acc << (5 - bits)) as usize & 0x1f] as char);
    }
    out
}
