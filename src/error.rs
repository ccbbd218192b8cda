//! Error taxonomy shared by the identity core.
//!
//! Boundary problems (`InvalidInput`, `Configuration`) carry a message the
//! caller can act on. Credential failures never say which half of an
//! email/password pair was wrong.

use crate::identity::store::StoreError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
    #[error("stored credential hash is malformed")]
    MalformedHash,
    #[error("token expired")]
    AuthExpired,
    #[error("token rejected")]
    AuthRejected,
    #[error("failed to encode token: {0}")]
    TokenEncoding(#[from] serde_json::Error),
}
