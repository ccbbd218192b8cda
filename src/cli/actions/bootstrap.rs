use crate::{
    cli::globals::GlobalArgs,
    identity::{
        self,
        bootstrap::{self as admin, BootstrapInput},
        password::CredentialVerifier,
        pii::PiiCodec,
    },
    keys::KeyRing,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub email: Option<String>,
    pub password: Option<SecretString>,
}

/// Execute the bootstrap action and print the outcome.
/// # Errors
/// Returns an error if configuration is incomplete or the store rejects the write.
pub async fn execute(args: Args) -> Result<()> {
    debug!(dsn = %args.globals.redacted_dsn(), "bootstrapping administrator");

    let keys = KeyRing::from_secrets(&args.globals.keys).context("Invalid key configuration")?;
    let codec = PiiCodec::new(keys.lookup(), keys.encryption())?;
    let verifier = CredentialVerifier::new();

    let store = identity::open_store(&args.globals.dsn)
        .await
        .context("Failed to open identity store")?;

    let input = BootstrapInput {
        email: args.email,
        password: args.password,
    };
    let outcome = admin::run(store.as_ref(), &codec, &verifier, &input)
        .await
        .context("Admin bootstrap failed")?;

    println!("{outcome}");
    Ok(())
}
