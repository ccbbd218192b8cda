//! In-memory session client.
//!
//! The access token lives only inside a [`SessionContext`]; nothing is ever
//! written to durable storage, so a restart starts logged out until the
//! startup refresh succeeds. Durability comes from the opaque refresh state
//! the transport carries.
//!
//! Each operation replaces the whole snapshot at once, so concurrent calls
//! resolve last-write-wins.

pub mod claims;
pub mod transport;

pub use self::{
    claims::{decode_claims, SessionUser},
    transport::{AuthTransport, ClientError, Credentials, HttpTransport},
};

use std::{fmt, future::Future, time::Duration};
use tokio::sync::watch;
use tracing::{debug, instrument};

/// Default bound on every transport call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user: Option<SessionUser>,
    pub access_token: Option<String>,
    /// Set once the startup refresh has finished, whatever its outcome.
    pub ready: bool,
}

impl SessionSnapshot {
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    fn hold(&mut self, token: String) {
        self.user = decode_claims(&token);
        self.access_token = Some(token);
    }

    fn clear(&mut self) {
        self.user = None;
        self.access_token = None;
    }
}

impl fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("user", &self.user)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("ready", &self.ready)
            .finish()
    }
}

/// Owns the session state and drives the transport.
pub struct SessionContext<T> {
    transport: T,
    timeout: Duration,
    state: watch::Sender<SessionSnapshot>,
}

impl<T: AuthTransport> SessionContext<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            transport,
            timeout: DEFAULT_TIMEOUT,
            state,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Observe every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn user(&self) -> Option<SessionUser> {
        self.state.borrow().user.clone()
    }

    /// `Bearer <token>` while a token is held.
    #[must_use]
    pub fn authorization_header(&self) -> Option<String> {
        self.state
            .borrow()
            .access_token
            .as_ref()
            .map(|token| format!("Bearer {token}"))
    }

    /// One refresh attempt, then `ready`.
    #[instrument(skip_all)]
    pub async fn start(&self) {
        if let Err(err) = self.refresh().await {
            debug!("startup refresh did not restore a session: {err}");
        }
        self.state.send_modify(|state| state.ready = true);
    }

    /// Log in. On failure the previous state is left untouched.
    ///
    /// # Errors
    /// Returns the transport error, or `Timeout` if the call exceeds the bound.
    #[instrument(skip_all)]
    pub async fn login(&self, credentials: &Credentials) -> Result<Option<SessionUser>, ClientError> {
        let token = self.bounded(self.transport.login(credentials)).await?;
        self.state.send_modify(|state| state.hold(token));
        Ok(self.user())
    }

    /// Refresh the access token. Any failure clears the session.
    ///
    /// # Errors
    /// Returns the cause of the failure after the session has been cleared.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<Option<SessionUser>, ClientError> {
        match self.bounded(self.transport.refresh()).await {
            Ok(token) => {
                self.state.send_modify(|state| state.hold(token));
                Ok(self.user())
            }
            Err(err) => {
                self.state.send_modify(SessionSnapshot::clear);
                Err(err)
            }
        }
    }

    /// Best-effort server logout, then clear local state unconditionally.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        if let Err(err) = self.bounded(self.transport.logout()).await {
            debug!("logout call failed, clearing local session anyway: {err}");
        }
        self.state.send_modify(SessionSnapshot::clear);
    }

    async fn bounded<F, R>(&self, call: F) -> Result<R, ClientError>
    where
        F: Future<Output = Result<R, ClientError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ClientError::Timeout(format!("no response within {:?}", self.timeout)))?
    }
}
