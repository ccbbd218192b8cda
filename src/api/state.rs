//! Shared state for the auth endpoints.

use crate::{
    identity::{
        password::{validate_password, CredentialVerifier},
        pii::PiiCodec,
        store::{IdentityStore, StoreError, WriteSet},
        Identity, ProfileRecord, RefreshSession, Role, SecurityRecord,
    },
    keys::KeyRing,
    token::{IssuedToken, TokenIssuer, DEFAULT_ACCESS_TOKEN_TTL_SECONDS},
    Error, Result,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc};
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument};
use uuid::Uuid;

pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const MAX_REFRESH_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

const REFRESH_TOKEN_BYTES: usize = 32;

// Verified when the email is unknown so both failure paths cost one Argon2 run.
const DUMMY_PASSWORD: &str = "storefront-dummy-password";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    base_path: String,
    access_token_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            base_path: String::new(),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    /// Mount the API under a path prefix such as `/v1`. Empty or `/` means
    /// the root.
    #[must_use]
    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = normalize_base_path(base_path);
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// Normalized prefix: empty, or `/segment[/segment...]` without a
    /// trailing slash.
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    pub(crate) fn refresh_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    /// The refresh cookie is only sent to the auth routes under the mount point.
    pub(crate) fn refresh_cookie_path(&self) -> String {
        format!("{}/auth", self.base_path)
    }
}

fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// A freshly opened or rotated session: the access token for the body and
/// the raw refresh token for the cookie.
pub struct SessionGrant {
    pub access: IssuedToken,
    pub refresh_token: String,
}

impl fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGrant")
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn IdentityStore>,
    codec: PiiCodec,
    verifier: CredentialVerifier,
    issuer: TokenIssuer,
    dummy_hash: String,
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    /// # Errors
    /// Returns `Configuration` if the keys or TTLs are unusable.
    pub fn new(config: AuthConfig, store: Arc<dyn IdentityStore>, keys: &KeyRing) -> Result<Self> {
        if !(1..=MAX_REFRESH_TTL_SECONDS).contains(&config.refresh_ttl_seconds) {
            return Err(Error::Configuration(format!(
                "refresh TTL must be between 1 and {MAX_REFRESH_TTL_SECONDS} seconds"
            )));
        }
        let codec = PiiCodec::new(keys.lookup(), keys.encryption())?;
        let issuer = TokenIssuer::new(keys.signing(), config.access_token_ttl_seconds)?;
        let verifier = CredentialVerifier::new();
        let dummy_hash = verifier.hash(DUMMY_PASSWORD)?;

        Ok(Self {
            config,
            store,
            codec,
            verifier,
            issuer,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn IdentityStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Create a `USER` account.
    ///
    /// # Errors
    /// Returns `InvalidInput` for bad email, password, or profile fields and
    /// `Persistence(Conflict)` when the email is already registered.
    #[instrument(skip_all)]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
        country_code: Option<&str>,
    ) -> Result<Uuid> {
        validate_password(password)?;
        let protected = self.codec.protect(email)?;
        let profile = ProfileRecord::from_input(display_name, country_code)?;

        if self
            .store
            .find_by_lookup_hash(&protected.lookup_hash)
            .await?
            .is_some()
        {
            return Err(StoreError::Conflict("identities_email_lookup_hash_key".to_string()).into());
        }

        let identity = Identity {
            id: Uuid::now_v7(),
            email_ciphertext: protected.ciphertext,
            email_lookup_hash: protected.lookup_hash,
            password_hash: self.verifier.hash(password)?,
            is_active: true,
        };
        let id = identity.id;

        self.store
            .commit(WriteSet::NewAccount {
                identity,
                roles: vec![Role::User],
                security: SecurityRecord::unverified(),
                profile,
            })
            .await?;

        debug!(identity_id = %id, "account registered");
        Ok(id)
    }

    /// Check an email/password pair.
    ///
    /// Unknown email, wrong password and inactive account all yield the same
    /// `AuthRejected`.
    ///
    /// # Errors
    /// Returns `AuthRejected` on any credential failure, `MalformedHash` if
    /// the stored hash is unreadable, and `Persistence` if the store fails.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Identity> {
        let found = match self.codec.lookup_hash(email) {
            Ok(lookup_hash) => self.store.find_by_lookup_hash(&lookup_hash).await?,
            Err(_) => None,
        };

        let Some(identity) = found else {
            let _ = self.verifier.verify(password, &self.dummy_hash);
            return Err(Error::AuthRejected);
        };

        if !self.verifier.verify(password, &identity.password_hash)? || !identity.is_active {
            return Err(Error::AuthRejected);
        }

        Ok(identity)
    }

    /// Issue an access token and persist a new refresh session.
    ///
    /// # Errors
    /// Returns `Persistence` if the session cannot be stored and
    /// `Configuration` if the refresh TTL overflows the clock.
    pub async fn open_session(&self, identity_id: Uuid) -> Result<SessionGrant> {
        let roles = self.store.roles_for(identity_id).await?;
        let access = self.issuer.issue(identity_id, &roles)?;

        let refresh_token = generate_refresh_token();
        let expires_at = OffsetDateTime::now_utc()
            .checked_add(Duration::seconds(self.config.refresh_ttl_seconds))
            .ok_or_else(|| {
                Error::Configuration("refresh TTL overflows the clock".to_string())
            })?;
        self.store
            .insert_refresh_session(RefreshSession {
                token_hash: hash_refresh_token(&refresh_token),
                identity_id,
                expires_at,
            })
            .await?;

        Ok(SessionGrant {
            access,
            refresh_token,
        })
    }

    /// Exchange a refresh token for a new grant. The presented token is
    /// consumed; the grant carries its replacement.
    ///
    /// # Errors
    /// Returns `AuthRejected` if the token is unknown or the account is
    /// inactive, `AuthExpired` if the session lapsed.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionGrant> {
        // One store call removes and returns the session, so a token is
        // consumed at most once however many requests present it.
        let session = self
            .store
            .take_refresh_session(&hash_refresh_token(refresh_token))
            .await?
            .ok_or(Error::AuthRejected)?;

        if session.is_expired(OffsetDateTime::now_utc()) {
            return Err(Error::AuthExpired);
        }

        match self.store.find_identity(session.identity_id).await? {
            Some(identity) if identity.is_active => self.open_session(identity.id).await,
            _ => Err(Error::AuthRejected),
        }
    }

    /// Forget a refresh session. Unknown tokens are ignored.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub async fn close_session(&self, refresh_token: &str) -> Result<()> {
        self.store
            .delete_refresh_session(&hash_refresh_token(refresh_token))
            .await?;
        Ok(())
    }
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

fn hash_refresh_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}
