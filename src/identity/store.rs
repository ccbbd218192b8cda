//! Persistence collaborator for identity records.
//!
//! Multi-record changes are expressed as a [`WriteSet`] that the store commits
//! atomically: either every record in it lands or none does. Stores enforce
//! uniqueness of `email_lookup_hash`, of `(identity, role)` pairs, and of the
//! single `ADMIN` grant.

use super::{Identity, ProfileRecord, RefreshSession, Role, SecurityRecord};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an administrator is already provisioned")]
    AdminExists,
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("identity {0} not found")]
    NotFound(Uuid),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A set of record changes committed in one transaction.
#[derive(Debug, Clone)]
pub enum WriteSet {
    /// Identity plus grants, security record, and profile.
    NewAccount {
        identity: Identity,
        roles: Vec<Role>,
        security: SecurityRecord,
        profile: ProfileRecord,
    },
    /// Upgrade an existing identity to `ADMIN`: replace the password hash,
    /// upsert the grant, refresh `email_verified_at` (creating the security
    /// record with both timestamps if absent), and create `default_profile`
    /// only if the identity has none.
    Promotion {
        identity_id: Uuid,
        password_hash: String,
        verified_at: OffsetDateTime,
        default_profile: ProfileRecord,
    },
}

impl WriteSet {
    #[must_use]
    pub fn grants_admin(&self) -> bool {
        match self {
            Self::NewAccount { roles, .. } => roles.contains(&Role::Admin),
            Self::Promotion { .. } => true,
        }
    }

    #[must_use]
    pub fn identity_id(&self) -> Uuid {
        match self {
            Self::NewAccount { identity, .. } => identity.id,
            Self::Promotion { identity_id, .. } => *identity_id,
        }
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// The identity currently holding `ADMIN`, if any.
    async fn find_admin(&self) -> Result<Option<Uuid>, StoreError>;

    async fn find_by_lookup_hash(&self, lookup_hash: &str)
        -> Result<Option<Identity>, StoreError>;

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    /// Role grants for an identity, sorted.
    async fn roles_for(&self, id: Uuid) -> Result<Vec<Role>, StoreError>;

    async fn security_record(&self, id: Uuid) -> Result<Option<SecurityRecord>, StoreError>;

    async fn profile(&self, id: Uuid) -> Result<Option<ProfileRecord>, StoreError>;

    /// Commit a write set atomically.
    ///
    /// When the set grants `ADMIN` the store re-checks, inside the same
    /// transaction, that no administrator exists and fails with
    /// [`StoreError::AdminExists`] otherwise.
    async fn commit(&self, write: WriteSet) -> Result<(), StoreError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError>;

    /// Store a refresh session, first dropping every session that has
    /// already expired.
    async fn insert_refresh_session(&self, session: RefreshSession) -> Result<(), StoreError>;

    /// Remove and return the session in one step.
    async fn take_refresh_session(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<RefreshSession>, StoreError>;

    async fn delete_refresh_session(&self, token_hash: &[u8]) -> Result<(), StoreError>;

    /// Delete sessions whose expiry is at or before `now`; returns how many.
    async fn purge_expired_refresh_sessions(&self, now: OffsetDateTime)
        -> Result<u64, StoreError>;

    /// Liveness check used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
struct Tables {
    identities: HashMap<Uuid, Identity>,
    grants: BTreeSet<(Uuid, Role)>,
    security: HashMap<Uuid, SecurityRecord>,
    profiles: HashMap<Uuid, ProfileRecord>,
    refresh_sessions: HashMap<Vec<u8>, RefreshSession>,
}

impl Tables {
    fn purge_expired(&mut self, now: OffsetDateTime) -> u64 {
        let before = self.refresh_sessions.len();
        self.refresh_sessions
            .retain(|_, session| !session.is_expired(now));
        u64::try_from(before - self.refresh_sessions.len()).unwrap_or(u64::MAX)
    }

    fn admin(&self) -> Option<Uuid> {
        self.grants
            .iter()
            .find(|(_, role)| *role == Role::Admin)
            .map(|(id, _)| *id)
    }

    fn apply(&mut self, write: WriteSet) -> Result<(), StoreError> {
        if write.grants_admin() && self.admin().is_some() {
            return Err(StoreError::AdminExists);
        }

        match write {
            WriteSet::NewAccount {
                identity,
                roles,
                security,
                profile,
            } => {
                if self.identities.contains_key(&identity.id) {
                    return Err(StoreError::Conflict("identities_pkey".to_string()));
                }
                if self
                    .identities
                    .values()
                    .any(|existing| existing.email_lookup_hash == identity.email_lookup_hash)
                {
                    return Err(StoreError::Conflict(
                        "identities_email_lookup_hash_key".to_string(),
                    ));
                }

                let id = identity.id;
                self.identities.insert(id, identity);
                for role in roles {
                    self.grants.insert((id, role));
                }
                self.security.insert(id, security);
                self.profiles.insert(id, profile);
            }
            WriteSet::Promotion {
                identity_id,
                password_hash,
                verified_at,
                default_profile,
            } => {
                let identity = self
                    .identities
                    .get_mut(&identity_id)
                    .ok_or(StoreError::NotFound(identity_id))?;
                identity.password_hash = password_hash;

                self.grants.insert((identity_id, Role::Admin));
                self.security
                    .entry(identity_id)
                    .and_modify(|record| record.email_verified_at = Some(verified_at))
                    .or_insert_with(|| SecurityRecord::verified_at(verified_at));
                self.profiles.entry(identity_id).or_insert(default_profile);
            }
        }

        Ok(())
    }
}

/// In-process store. Each commit is applied to a copy of the tables that is
/// swapped in only when every change succeeded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn identity_count(&self) -> usize {
        self.tables.lock().await.identities.len()
    }

    pub async fn admin_grant_count(&self) -> usize {
        self.tables
            .lock()
            .await
            .grants
            .iter()
            .filter(|(_, role)| *role == Role::Admin)
            .count()
    }

    pub async fn refresh_session_count(&self) -> usize {
        self.tables.lock().await.refresh_sessions.len()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_admin(&self) -> Result<Option<Uuid>, StoreError> {
        Ok(self.tables.lock().await.admin())
    }

    async fn find_by_lookup_hash(
        &self,
        lookup_hash: &str,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .identities
            .values()
            .find(|identity| identity.email_lookup_hash == lookup_hash)
            .cloned())
    }

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.tables.lock().await.identities.get(&id).cloned())
    }

    async fn roles_for(&self, id: Uuid) -> Result<Vec<Role>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .grants
            .iter()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, role)| *role)
            .collect())
    }

    async fn security_record(&self, id: Uuid) -> Result<Option<SecurityRecord>, StoreError> {
        Ok(self.tables.lock().await.security.get(&id).copied())
    }

    async fn profile(&self, id: Uuid) -> Result<Option<ProfileRecord>, StoreError> {
        Ok(self.tables.lock().await.profiles.get(&id).cloned())
    }

    async fn commit(&self, write: WriteSet) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let mut next = tables.clone();
        next.apply(write)?;
        *tables = next;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let identity = tables
            .identities
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        identity.is_active = active;
        Ok(())
    }

    async fn insert_refresh_session(&self, session: RefreshSession) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.identities.contains_key(&session.identity_id) {
            return Err(StoreError::NotFound(session.identity_id));
        }
        tables.purge_expired(OffsetDateTime::now_utc());
        if tables.refresh_sessions.contains_key(&session.token_hash) {
            return Err(StoreError::Conflict("refresh_sessions_pkey".to_string()));
        }
        tables
            .refresh_sessions
            .insert(session.token_hash.clone(), session);
        Ok(())
    }

    async fn take_refresh_session(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<RefreshSession>, StoreError> {
        Ok(self.tables.lock().await.refresh_sessions.remove(token_hash))
    }

    async fn delete_refresh_session(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        self.tables.lock().await.refresh_sessions.remove(token_hash);
        Ok(())
    }

    async fn purge_expired_refresh_sessions(
        &self,
        now: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        Ok(self.tables.lock().await.purge_expired(now))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
