//! Idempotent provisioning of the single administrator account.
//!
//! Flow Overview:
//! 1) If any identity holds `ADMIN`, stop: nothing is mutated.
//! 2) Protect the operator email and look it up by its lookup hash.
//! 3) Found: promote it (new password hash, `ADMIN` grant, verified email,
//!    default profile only if missing) in one write set.
//! 4) Not found: create identity, grant, security record and default profile
//!    in one write set.
//! 5) Report the branch taken. The raw email and password are never logged.
//!
//! [`decide`] is pure, so the branching can be tested without a store. The
//! store re-checks for an administrator inside the commit, so a run that
//! loses a race against a concurrent bootstrap reports `AlreadyAdmin`.

use super::{
    password::{validate_password, CredentialVerifier},
    pii::{PiiCodec, ProtectedEmail},
    store::{IdentityStore, StoreError, WriteSet},
    Identity, ProfileRecord, Role, SecurityRecord,
};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Operator supplied credentials, read out of band.
#[derive(Debug, Clone, Default)]
pub struct BootstrapInput {
    pub email: Option<String>,
    pub password: Option<SecretString>,
}

impl BootstrapInput {
    #[must_use]
    pub fn new(email: impl Into<String>, password: SecretString) -> Self {
        Self {
            email: Some(email.into()),
            password: Some(password),
        }
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        let email = self
            .email
            .as_deref()
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| Error::Configuration("admin email is required".to_string()))?;
        let password = self
            .password
            .as_ref()
            .map(|password| password.expose_secret())
            .filter(|password| !password.trim().is_empty())
            .ok_or_else(|| Error::Configuration("admin password is required".to_string()))?;
        Ok((email, password))
    }
}

/// Terminal state of a bootstrap run, carrying the administrator's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    AlreadyAdmin(Uuid),
    Promoted(Uuid),
    Created(Uuid),
}

impl BootstrapOutcome {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::AlreadyAdmin(id) | Self::Promoted(id) | Self::Created(id) => *id,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AlreadyAdmin(_) => "already-admin",
            Self::Promoted(_) => "promoted-existing",
            Self::Created(_) => "created-new",
        }
    }
}

impl fmt::Display for BootstrapOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.id())
    }
}

/// Email and password already run through the codec and the verifier.
#[derive(Debug, Clone)]
pub struct PreparedAdmin {
    pub email: ProtectedEmail,
    pub password_hash: String,
}

/// What a run will do, with the complete write set for the mutating branches.
#[derive(Debug, Clone)]
pub enum BootstrapPlan {
    AlreadyAdmin(Uuid),
    Promote(WriteSet),
    Create(WriteSet),
}

/// Choose the branch from the current state.
#[must_use]
pub fn decide(
    admin: Option<Uuid>,
    existing: Option<&Identity>,
    prepared: PreparedAdmin,
    now: OffsetDateTime,
) -> BootstrapPlan {
    if let Some(admin_id) = admin {
        return BootstrapPlan::AlreadyAdmin(admin_id);
    }

    match existing {
        Some(identity) => BootstrapPlan::Promote(WriteSet::Promotion {
            identity_id: identity.id,
            password_hash: prepared.password_hash,
            verified_at: now,
            default_profile: ProfileRecord::admin_default(),
        }),
        None => BootstrapPlan::Create(WriteSet::NewAccount {
            identity: Identity {
                id: Uuid::now_v7(),
                email_ciphertext: prepared.email.ciphertext,
                email_lookup_hash: prepared.email.lookup_hash,
                password_hash: prepared.password_hash,
                is_active: true,
            },
            roles: vec![Role::Admin],
            security: SecurityRecord::verified_at(now),
            profile: ProfileRecord::admin_default(),
        }),
    }
}

/// Read the current state and build a plan.
///
/// Once an administrator exists the email and password are not validated,
/// so a re-run with stale operator inputs still reports `AlreadyAdmin`.
///
/// # Errors
/// Returns `Configuration` for missing credentials, `InvalidInput` for an
/// implausible email or weak password on the mutating branches, and
/// `Persistence` if the store fails.
pub async fn plan(
    store: &dyn IdentityStore,
    codec: &PiiCodec,
    verifier: &CredentialVerifier,
    input: &BootstrapInput,
) -> Result<BootstrapPlan> {
    let (email, password) = input.credentials()?;

    if let Some(admin_id) = store.find_admin().await? {
        return Ok(BootstrapPlan::AlreadyAdmin(admin_id));
    }

    validate_password(password)?;
    let protected = codec.protect(email)?;
    let existing = store.find_by_lookup_hash(&protected.lookup_hash).await?;
    let prepared = PreparedAdmin {
        email: protected,
        password_hash: verifier.hash(password)?,
    };

    Ok(decide(
        None,
        existing.as_ref(),
        prepared,
        OffsetDateTime::now_utc(),
    ))
}

/// Commit a plan atomically.
///
/// # Errors
/// Returns `Persistence` if the commit fails for any reason other than a
/// concurrently provisioned administrator. No partial records remain.
pub async fn execute(store: &dyn IdentityStore, plan: BootstrapPlan) -> Result<BootstrapOutcome> {
    let (write, outcome) = match plan {
        BootstrapPlan::AlreadyAdmin(id) => return Ok(BootstrapOutcome::AlreadyAdmin(id)),
        BootstrapPlan::Promote(write) => {
            let id = write.identity_id();
            (write, BootstrapOutcome::Promoted(id))
        }
        BootstrapPlan::Create(write) => {
            let id = write.identity_id();
            (write, BootstrapOutcome::Created(id))
        }
    };

    match store.commit(write).await {
        Ok(()) => Ok(outcome),
        Err(StoreError::AdminExists) => {
            debug!("administrator provisioned concurrently");
            match store.find_admin().await? {
                Some(admin_id) => Ok(BootstrapOutcome::AlreadyAdmin(admin_id)),
                None => Err(Error::Persistence(StoreError::AdminExists)),
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Plan, execute and report a bootstrap run.
///
/// # Errors
/// See [`plan`] and [`execute`].
#[instrument(skip_all)]
pub async fn run(
    store: &dyn IdentityStore,
    codec: &PiiCodec,
    verifier: &CredentialVerifier,
    input: &BootstrapInput,
) -> Result<BootstrapOutcome> {
    let plan = plan(store, codec, verifier, input).await?;
    let outcome = execute(store, plan).await?;

    info!(
        outcome = outcome.label(),
        identity_id = %outcome.id(),
        "admin bootstrap finished"
    );

    Ok(outcome)
}
