//! # Storefront identity core
//!
//! `storefront` protects customer identities and runs the session lifecycle
//! for the catalog.
//!
//! ## Identity protection
//!
//! Emails are never stored in plaintext. Each address is normalized, then
//! stored twice: as a keyed HMAC-SHA256 lookup hash for equality search and
//! as ChaCha20-Poly1305 ciphertext for display. Passwords are hashed with
//! Argon2id.
//!
//! ## Administrator bootstrap
//!
//! `storefront bootstrap` provisions exactly one `ADMIN`. Re-running it is a
//! no-op, an existing account with the admin email is promoted in place, and
//! concurrent runs converge on a single administrator.
//!
//! ## Sessions
//!
//! Login returns a short-lived HS256 access token in the body and sets an
//! `HttpOnly` refresh cookie. The [`session`] client keeps the access token
//! in memory only and restores it on start with one refresh.

pub mod api;
pub mod cli;
pub mod error;
pub mod identity;
pub mod keys;
pub mod session;
pub mod token;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
