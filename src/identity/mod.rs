//! Identity records and the components that protect them.
//!
//! An account is four records created together: the [`Identity`] itself, its
//! [`Role`] grants, a [`SecurityRecord`] with verification timestamps, and a
//! non-sensitive [`ProfileRecord`]. The email is never stored in plaintext;
//! see [`pii`].

pub mod bootstrap;
pub mod password;
pub mod pg;
pub mod pii;
pub mod store;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use self::{
    pg::PgStore,
    pii::PiiCodec,
    store::{IdentityStore, MemoryStore},
};

pub const DEFAULT_ADMIN_DISPLAY_NAME: &str = "Administrator";
pub const DEFAULT_CUSTOMER_DISPLAY_NAME: &str = "Customer";
pub const DEFAULT_COUNTRY_CODE: &str = "US";

/// DSN that selects the in-process store, for local development.
pub const MEMORY_DSN: &str = "memory://";

/// Closed set of authorization capabilities.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::User => "USER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "ADMIN" => Ok(Self::Admin),
            "USER" => Ok(Self::User),
            other => Err(Error::InvalidInput(format!("unknown role: {other}"))),
        }
    }
}

/// The durable account record.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email_ciphertext: String,
    pub email_lookup_hash: String,
    pub password_hash: String,
    pub is_active: bool,
}

// Keep ciphertext and hashes out of logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// Verification timestamps; a present timestamp means verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityRecord {
    pub email_verified_at: Option<OffsetDateTime>,
    pub manual_verified_at: Option<OffsetDateTime>,
}

impl SecurityRecord {
    /// Both verification signals set, as the operator vouches for the account.
    #[must_use]
    pub const fn verified_at(now: OffsetDateTime) -> Self {
        Self {
            email_verified_at: Some(now),
            manual_verified_at: Some(now),
        }
    }

    #[must_use]
    pub const fn unverified() -> Self {
        Self {
            email_verified_at: None,
            manual_verified_at: None,
        }
    }

    #[must_use]
    pub const fn is_email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub display_name: String,
    pub country_code: String,
}

impl ProfileRecord {
    #[must_use]
    pub fn admin_default() -> Self {
        Self {
            display_name: DEFAULT_ADMIN_DISPLAY_NAME.to_string(),
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }

    /// Build a profile from optional user input, applying defaults.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the display name is too long or the country
    /// code is not two ASCII letters.
    pub fn from_input(display_name: Option<&str>, country_code: Option<&str>) -> Result<Self> {
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_CUSTOMER_DISPLAY_NAME);
        if display_name.chars().count() > 100 {
            return Err(Error::InvalidInput(
                "display name must be at most 100 characters".to_string(),
            ));
        }

        let country_code = country_code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(DEFAULT_COUNTRY_CODE)
            .to_ascii_uppercase();
        if country_code.len() != 2 || !country_code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::InvalidInput(
                "country code must be two letters".to_string(),
            ));
        }

        Ok(Self {
            display_name: display_name.to_string(),
            country_code,
        })
    }
}

/// Server-side state behind the opaque refresh cookie. Only the SHA-256 of
/// the cookie value is stored.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub token_hash: Vec<u8>,
    pub identity_id: Uuid,
    pub expires_at: OffsetDateTime,
}

impl fmt::Debug for RefreshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshSession")
            .field("identity_id", &self.identity_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl RefreshSession {
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// Open the persistence collaborator named by `dsn`.
///
/// `memory://` selects the in-process store; anything else is handed to
/// Postgres and the schema is applied.
///
/// # Errors
/// Returns `Persistence` if the database cannot be reached or the schema fails.
pub async fn open_store(dsn: &str) -> Result<Arc<dyn IdentityStore>> {
    if dsn.trim() == MEMORY_DSN {
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PgStore::connect(dsn).await?;
    store.ensure_schema().await?;
    Ok(Arc::new(store))
}

/// Enable or disable login for the account registered under `email`.
///
/// A disabled account is refused at login and at refresh with the same
/// rejection as a wrong password.
///
/// # Errors
/// Returns `InvalidInput` for an implausible or unregistered email and
/// `Persistence` if the store fails.
pub async fn set_account_active(
    store: &dyn IdentityStore,
    codec: &PiiCodec,
    email: &str,
    active: bool,
) -> Result<Uuid> {
    let lookup_hash = codec.lookup_hash(email)?;
    let identity = store
        .find_by_lookup_hash(&lookup_hash)
        .await?
        .ok_or_else(|| Error::InvalidInput("no account is registered with that email".to_string()))?;

    store.set_active(identity.id, active).await?;
    info!(identity_id = %identity.id, active, "account status changed");
    Ok(identity.id)
}
