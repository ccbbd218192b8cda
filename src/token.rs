//! Short-lived HS256 access tokens.
//!
//! A token is `base64url(header).base64url(claims).base64url(signature)`
//! where the signature is HMAC-SHA256 over the first two segments with the
//! process-wide signing key. Verification needs no store lookup.

use crate::{identity::Role, Error, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 900;
pub const MAX_ACCESS_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: String,
    pub roles: Vec<Role>,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    /// # Errors
    /// Returns `AuthRejected` if `sub` is not a UUID.
    pub fn subject_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| Error::AuthRejected)
    }

    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct TokenIssuer {
    mac: HmacSha256,
    ttl_seconds: i64,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| Error::AuthRejected)?;
    serde_json::from_slice(&bytes).map_err(|_| Error::AuthRejected)
}

impl TokenIssuer {
    /// # Errors
    /// Returns `Configuration` if the key is empty or the TTL is outside
    /// `1..=MAX_ACCESS_TOKEN_TTL_SECONDS`.
    pub fn new(signing_key: &[u8], ttl_seconds: i64) -> Result<Self> {
        if signing_key.is_empty() {
            return Err(Error::Configuration("token signing key is empty".to_string()));
        }
        if !(1..=MAX_ACCESS_TOKEN_TTL_SECONDS).contains(&ttl_seconds) {
            return Err(Error::Configuration(format!(
                "access token TTL must be between 1 and {MAX_ACCESS_TOKEN_TTL_SECONDS} seconds"
            )));
        }
        let mac = HmacSha256::new_from_slice(signing_key)
            .map_err(|_| Error::Configuration("invalid token signing key".to_string()))?;
        Ok(Self { mac, ttl_seconds })
    }

    #[must_use]
    pub const fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Issue a token for `subject` valid for the configured TTL.
    ///
    /// # Errors
    /// Returns `TokenEncoding` if the claims cannot be serialized.
    pub fn issue(&self, subject: Uuid, roles: &[Role]) -> Result<IssuedToken> {
        self.issue_at(subject, roles, OffsetDateTime::now_utc())
    }

    /// Issue a token as if the current time were `now`.
    ///
    /// # Errors
    /// Returns `TokenEncoding` if the claims cannot be serialized.
    pub fn issue_at(&self, subject: Uuid, roles: &[Role], now: OffsetDateTime) -> Result<IssuedToken> {
        let iat = now.unix_timestamp();
        let exp = iat.saturating_add(self.ttl_seconds);
        let claims = AccessClaims {
            sub: subject.to_string(),
            roles: roles.to_vec(),
            iat,
            exp,
        };

        let signing_input = format!(
            "{}.{}",
            b64e_json(&TokenHeader::hs256())?,
            b64e_json(&claims)?
        );
        let signature = self.sign(signing_input.as_bytes());
        let expires_at = OffsetDateTime::from_unix_timestamp(exp)
            .map_err(|_| Error::Configuration("access token TTL overflows".to_string()))?;

        Ok(IssuedToken {
            token: format!("{signing_input}.{signature}"),
            expires_at,
        })
    }

    /// Verify signature and expiry and return the claims.
    ///
    /// # Errors
    /// Returns `AuthRejected` for malformed or mis-signed tokens and
    /// `AuthExpired` once `exp` is reached.
    pub fn verify(&self, token: &str) -> Result<AccessClaims> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    /// # Errors
    /// See [`TokenIssuer::verify`].
    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<AccessClaims> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::AuthRejected)?;
        let claims_b64 = parts.next().ok_or(Error::AuthRejected)?;
        let sig_b64 = parts.next().ok_or(Error::AuthRejected)?;
        if parts.next().is_some() {
            return Err(Error::AuthRejected);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(Error::AuthRejected);
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::AuthRejected)?;
        let mut mac = self.mac.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::AuthRejected)?;

        let claims: AccessClaims = b64d_json(claims_b64)?;
        if claims.exp <= now.unix_timestamp() {
            return Err(Error::AuthExpired);
        }

        Ok(claims)
    }

    fn sign(&self, signing_input: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(signing_input);
        Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes())
    }
}
