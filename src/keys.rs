//! Process-wide key material.
//!
//! Three independent 32-byte secrets are loaded once at start-up from base64
//! configuration values: the email lookup key, the email encryption key, and
//! the access token signing key. They are never mutated afterwards, so
//! request handlers share them without locking.

use crate::{Error, Result};
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretSlice, SecretString};

pub const KEY_LENGTH: usize = 32;

/// Raw (still encoded) key configuration as read from CLI flags or env.
#[derive(Debug, Clone, Default)]
pub struct KeySecrets {
    pub lookup: SecretString,
    pub encryption: SecretString,
    pub signing: SecretString,
}

#[derive(Debug)]
pub struct KeyRing {
    lookup: SecretSlice<u8>,
    encryption: SecretSlice<u8>,
    signing: SecretSlice<u8>,
}

impl KeyRing {
    /// Decode all three keys.
    ///
    /// # Errors
    /// Returns `Configuration` naming the first key that is missing, not
    /// base64, or not exactly [`KEY_LENGTH`] bytes.
    pub fn from_secrets(secrets: &KeySecrets) -> Result<Self> {
        Ok(Self {
            lookup: decode_key("pii-lookup-key", &secrets.lookup)?,
            encryption: decode_key("pii-encryption-key", &secrets.encryption)?,
            signing: decode_key("token-signing-key", &secrets.signing)?,
        })
    }

    /// Fresh random keys. Data protected with them is unreadable after a restart.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            lookup: random_key(),
            encryption: random_key(),
            signing: random_key(),
        }
    }

    #[must_use]
    pub fn lookup(&self) -> &[u8] {
        self.lookup.expose_secret()
    }

    #[must_use]
    pub fn encryption(&self) -> &[u8] {
        self.encryption.expose_secret()
    }

    #[must_use]
    pub fn signing(&self) -> &[u8] {
        self.signing.expose_secret()
    }
}

/// Decode one base64 key of exactly [`KEY_LENGTH`] bytes.
///
/// # Errors
/// Returns `Configuration` if the value is blank, not base64, or the wrong length.
pub fn decode_key(name: &str, encoded: &SecretString) -> Result<SecretSlice<u8>> {
    let trimmed = encoded.expose_secret().trim();
    if trimmed.is_empty() {
        return Err(Error::Configuration(format!("missing required key: --{name}")));
    }

    let bytes = Base64::decode_vec(trimmed)
        .map_err(|_| Error::Configuration(format!("--{name} must be standard base64")))?;
    if bytes.len() != KEY_LENGTH {
        return Err(Error::Configuration(format!(
            "--{name} must decode to {KEY_LENGTH} bytes, got {}",
            bytes.len()
        )));
    }

    Ok(SecretSlice::from(bytes))
}

/// Encode a new random key, used by operators to provision secrets.
#[must_use]
pub fn generate_encoded_key() -> SecretString {
    let mut bytes = [0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    SecretString::from(Base64::encode_string(&bytes))
}

fn random_key() -> SecretSlice<u8> {
    let mut bytes = vec![0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    SecretSlice::from(bytes)
}
