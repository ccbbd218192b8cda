use crate::{
    cli::commands::{keys, ARG_DSN},
    keys::KeySecrets,
};
use anyhow::{Context, Result};
use url::Url;

/// Arguments shared by every subcommand that touches the identity store.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub dsn: String,
    pub keys: KeySecrets,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(dsn: String, keys: KeySecrets) -> Self {
        Self { dsn, keys }
    }

    /// # Errors
    /// Returns an error if `--dsn` is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let dsn = matches
            .get_one::<String>(ARG_DSN)
            .cloned()
            .context("missing required argument: --dsn")?;
        Ok(Self::new(dsn, keys::secrets(matches)))
    }

    /// The DSN with any password replaced, for logs.
    #[must_use]
    pub fn redacted_dsn(&self) -> String {
        match Url::parse(&self.dsn) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("REDACTED"));
                }
                parsed.to_string()
            }
            Err(_) => "invalid-dsn".to_string(),
        }
    }
}
