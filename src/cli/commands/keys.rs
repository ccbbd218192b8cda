//! Key material arguments, shared by every subcommand.

use crate::keys::KeySecrets;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_PII_LOOKUP_KEY: &str = "pii-lookup-key";
pub const ARG_PII_ENCRYPTION_KEY: &str = "pii-encryption-key";
pub const ARG_TOKEN_SIGNING_KEY: &str = "token-signing-key";

/// Subcommand printing a fresh set of keys.
pub const GENERATE_KEYS: &str = "generate-keys";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PII_LOOKUP_KEY)
                .long(ARG_PII_LOOKUP_KEY)
                .help("Base64 32-byte key for the email lookup hash")
                .env("STOREFRONT_PII_LOOKUP_KEY")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new(ARG_PII_ENCRYPTION_KEY)
                .long(ARG_PII_ENCRYPTION_KEY)
                .help("Base64 32-byte key for email encryption")
                .env("STOREFRONT_PII_ENCRYPTION_KEY")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_SIGNING_KEY)
                .long(ARG_TOKEN_SIGNING_KEY)
                .help("Base64 32-byte key for signing access tokens")
                .env("STOREFRONT_TOKEN_SIGNING_KEY")
                .hide_env_values(true)
                .global(true),
        )
}

#[must_use]
pub fn generate_command() -> Command {
    Command::new(GENERATE_KEYS).about("Print a fresh set of base64 keys as environment lines")
}

/// Collect the raw key values; decoding and validation happen in
/// [`crate::keys::KeyRing::from_secrets`].
#[must_use]
pub fn secrets(matches: &ArgMatches) -> KeySecrets {
    let secret = |id: &str| {
        matches
            .get_one::<String>(id)
            .map(|value| SecretString::from(value.clone()))
            .unwrap_or_default()
    };

    KeySecrets {
        lookup: secret(ARG_PII_LOOKUP_KEY),
        encryption: secret(ARG_PII_ENCRYPTION_KEY),
        signing: secret(ARG_TOKEN_SIGNING_KEY),
    }
}
