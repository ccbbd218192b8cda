//! One-way credential hashing with Argon2id.
//!
//! Hashes are PHC strings, so the salt and parameters travel with the hash and
//! verification needs no side storage.

use crate::{Error, Result};
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::{rngs::OsRng, RngCore};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 1024;

const SALT_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialVerifier;

impl CredentialVerifier {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hash a password with a fresh random salt.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the password cannot be hashed.
    pub fn hash(&self, password: &str) -> Result<String> {
        let mut salt_bytes = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|err| Error::InvalidInput(format!("failed to encode salt: {err}")))?;

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| Error::InvalidInput(format!("password could not be hashed: {err}")))
    }

    /// Check a password against a stored hash in constant time.
    ///
    /// A wrong password is `Ok(false)`, never an error.
    ///
    /// # Errors
    /// Returns `MalformedHash` if the stored hash cannot be parsed or uses
    /// unsupported parameters.
    pub fn verify(&self, password: &str, password_hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(password_hash).map_err(|_| Error::MalformedHash)?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(_) => Err(Error::MalformedHash),
        }
    }
}

/// Boundary policy for operator and user supplied passwords.
///
/// # Errors
/// Returns `InvalidInput` if the password is shorter than
/// [`MIN_PASSWORD_LENGTH`] or longer than [`MAX_PASSWORD_LENGTH`] characters.
pub fn validate_password(password: &str) -> Result<()> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(Error::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(Error::InvalidInput(format!(
            "password must be at most {MAX_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}
