//! Email protection: a keyed lookup digest for equality search plus
//! authenticated encryption for recovery.
//!
//! Flow Overview:
//! 1) Normalize (trim + lowercase) and apply a plausibility check.
//! 2) `lookup_hash` = hex(HMAC-SHA256(lookup key, normalized)), deterministic
//!    so it can back a unique index.
//! 3) `ciphertext` = base64(nonce || ChaCha20-Poly1305(normalized)), with a
//!    fresh nonce per call and a fixed AAD binding it to this purpose.

use crate::{Error, Result};
use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng, Payload},
    AeadCore, ChaCha20Poly1305, Nonce,
};
use hmac::{Hmac, Mac};
use regex::Regex;
use secrecy::{ExposeSecret, SecretSlice};
use sha2::Sha256;
use std::{fmt, sync::OnceLock};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LENGTH: usize = 12;
const EMAIL_AAD: &[u8] = b"storefront:email:v1";

/// Output of [`PiiCodec::protect`].
#[derive(Clone, PartialEq, Eq)]
pub struct ProtectedEmail {
    pub ciphertext: String,
    pub lookup_hash: String,
}

impl fmt::Debug for ProtectedEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedEmail").finish_non_exhaustive()
    }
}

pub struct PiiCodec {
    lookup_key: SecretSlice<u8>,
    cipher: ChaCha20Poly1305,
}

impl fmt::Debug for PiiCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiiCodec").finish_non_exhaustive()
    }
}

impl PiiCodec {
    /// # Errors
    /// Returns `Configuration` if either key is empty or the encryption key is
    /// not 32 bytes.
    pub fn new(lookup_key: &[u8], encryption_key: &[u8]) -> Result<Self> {
        if lookup_key.is_empty() {
            return Err(Error::Configuration("email lookup key is empty".to_string()));
        }
        let cipher = ChaCha20Poly1305::new_from_slice(encryption_key).map_err(|_| {
            Error::Configuration("email encryption key must be 32 bytes".to_string())
        })?;

        Ok(Self {
            lookup_key: SecretSlice::from(lookup_key.to_vec()),
            cipher,
        })
    }

    /// Normalize, validate, and protect an email address.
    ///
    /// # Errors
    /// Returns `InvalidInput` for empty or implausible addresses.
    pub fn protect(&self, raw_email: &str) -> Result<ProtectedEmail> {
        let email = normalize_email(raw_email);
        validate_email(&email)?;

        Ok(ProtectedEmail {
            lookup_hash: self.digest(&email)?,
            ciphertext: self.encrypt(&email)?,
        })
    }

    /// Only the lookup digest, for equality searches at login.
    ///
    /// # Errors
    /// Returns `InvalidInput` for empty or implausible addresses.
    pub fn lookup_hash(&self, raw_email: &str) -> Result<String> {
        let email = normalize_email(raw_email);
        validate_email(&email)?;
        self.digest(&email)
    }

    /// Recover the normalized email from its ciphertext.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the ciphertext is malformed, was tampered
    /// with, or was produced under another key.
    pub fn reveal(&self, ciphertext: &str) -> Result<String> {
        let data = Base64::decode_vec(ciphertext.trim())
            .map_err(|_| Error::InvalidInput("email ciphertext is not base64".to_string()))?;
        if data.len() <= NONCE_LENGTH {
            return Err(Error::InvalidInput(
                "email ciphertext is too short".to_string(),
            ));
        }

        let (nonce_bytes, sealed) = data.split_at(NONCE_LENGTH);
        let mut nonce = Nonce::default();
        nonce.copy_from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: sealed,
                    aad: EMAIL_AAD,
                },
            )
            .map_err(|_| Error::InvalidInput("email ciphertext failed authentication".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::InvalidInput("email plaintext is not UTF-8".to_string()))
    }

    fn digest(&self, email: &str) -> Result<String> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.lookup_key.expose_secret())
            .map_err(|_| Error::Configuration("invalid email lookup key".to_string()))?;
        mac.update(email.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn encrypt(&self, email: &str) -> Result<String> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: email.as_bytes(),
                    aad: EMAIL_AAD,
                },
            )
            .map_err(|_| Error::InvalidInput("email could not be encrypted".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(Base64::encode_string(&out))
    }
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic plausibility check on an already-normalized address; not RFC 5322.
///
/// # Errors
/// Returns `InvalidInput` when the address is empty or has no `local@domain.tld` shape.
pub fn validate_email(email_normalized: &str) -> Result<()> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();

    if email_normalized.is_empty() {
        return Err(Error::InvalidInput("email is required".to_string()));
    }

    let plausible = EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized));
    if plausible {
        Ok(())
    } else {
        Err(Error::InvalidInput("email address is not valid".to_string()))
    }
}
