//! Credential handling and identity derivation.
//!
//! The raw credential only ever leaves this module towards the upstream
//! provider it authenticates. Everything else sees the derived [`UserId`].

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a user id (hex-encoded => 32 chars).
const USER_ID_BYTES: usize = 16;

/// Opaque, fixed-length identifier derived from a credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One-way, deterministic: SHA-256, truncated, hex-encoded.
pub fn derive_user_id(credential: &str) -> UserId {
    let digest = Sha256::digest(credential.as_bytes());
    UserId(hex::encode(&digest[..USER_ID_BYTES]))
}

/// Raw provider credential, redacted in `Debug`.
pub struct Credential(SecretString);

impl Credential {
    pub fn new(raw: &str) -> Self {
        Self(SecretString::new(raw.to_string()))
    }

    /// Accepts `Bearer <token>` or a bare token.
    pub fn from_bearer(header: &str) -> Option<Self> {
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .unwrap_or(header)
            .trim();
        if token.is_empty() {
            None
        } else {
            Some(Self::new(token))
        }
    }

    pub fn user_id(&self) -> UserId {
        derive_user_id(self.0.expose_secret())
    }

    /// Only for building the upstream request.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"<REDACTED>").finish()
    }
}
