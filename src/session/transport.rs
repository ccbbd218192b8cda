//! Auth endpoint transport for the session client.
//!
//! [`HttpTransport`] keeps a cookie store so the server-managed refresh
//! cookie travels with every call without the client ever reading it.

use crate::{api::types::AccessTokenResponse, APP_USER_AGENT};
use async_trait::async_trait;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::instrument;
use url::Url;

/// Maximum number of error body characters surfaced to callers.
const MAX_ERROR_CHARS: usize = 200;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("config error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("response error: {0}")]
    Parse(String),
}

/// Login input; the password stays wrapped until it is serialized.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

/// The three auth endpoints the session client drives.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Exchange credentials for an access token.
    async fn login(&self, credentials: &Credentials) -> Result<String, ClientError>;

    /// Exchange the opaque refresh state for a new access token.
    async fn refresh(&self) -> Result<String, ClientError>;

    async fn logout(&self) -> Result<(), ClientError>;
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// # Errors
    /// Returns `Config` if the base URL is invalid or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|err| ClientError::Config(format!("invalid API base URL: {err}")))?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        build_url(&self.base_url, path)
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    #[instrument(skip_all)]
    async fn login(&self, credentials: &Credentials) -> Result<String, ClientError> {
        let body = LoginBody {
            email: &credentials.email,
            password: credentials.password.expose_secret(),
        };
        let response = self
            .client
            .post(self.url("/auth/login")?)
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;
        handle_token_response(response).await
    }

    #[instrument(skip_all)]
    async fn refresh(&self) -> Result<String, ClientError> {
        let response = self
            .client
            .post(self.url("/auth/refresh")?)
            .send()
            .await
            .map_err(map_request_error)?;
        handle_token_response(response).await
    }

    #[instrument(skip_all)]
    async fn logout(&self) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("/auth/logout")?)
            .send()
            .await
            .map_err(map_request_error)?;
        handle_empty_response(response).await
    }
}

/// Join a path onto the base URL, keeping any path prefix on the base.
fn build_url(base_url: &Url, path: &str) -> Result<Url, ClientError> {
    let base = base_url.as_str().trim_end_matches('/');
    let path = path.trim().trim_start_matches('/');
    Url::parse(&format!("{base}/{path}"))
        .map_err(|err| ClientError::Config(format!("invalid request URL: {err}")))
}

fn map_request_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout("request timed out".to_string())
    } else {
        ClientError::Network(format!("unable to reach the server: {err}"))
    }
}

async fn handle_token_response(response: Response) -> Result<String, ClientError> {
    if response.status().is_success() {
        response
            .json::<AccessTokenResponse>()
            .await
            .map(|body| body.access_token)
            .map_err(|err| ClientError::Parse(format!("failed to decode response: {err}")))
    } else {
        Err(http_error(response).await)
    }
}

async fn handle_empty_response(response: Response) -> Result<(), ClientError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(http_error(response).await)
    }
}

async fn http_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ClientError::Http {
        status,
        message: sanitize_body(&body),
    }
}

/// Trim and truncate an error body before surfacing it.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "request failed".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}
