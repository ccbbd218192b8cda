use crate::{
    api::{
        self,
        state::{AuthConfig, AuthState},
    },
    cli::globals::GlobalArgs,
    identity::{self, MEMORY_DSN},
    keys::KeyRing,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub port: u16,
    pub frontend_base_url: String,
    pub base_path: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the keys are invalid, the store cannot be opened, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let keys = KeyRing::from_secrets(&args.globals.keys).context("Invalid key configuration")?;

    if args.globals.dsn.trim() == MEMORY_DSN {
        warn!("Using the in-memory identity store; accounts are lost on restart");
    }
    let store = identity::open_store(&args.globals.dsn)
        .await
        .context("Failed to open identity store")?;

    let config = AuthConfig::new(args.frontend_base_url)
        .with_base_path(&args.base_path)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_ttl_seconds(args.refresh_ttl_seconds);
    let auth_state = Arc::new(AuthState::new(config, store, &keys)?);

    api::new(args.port, auth_state).await
}

fn log_startup_args(args: &Args) {
    info!(
        port = args.port,
        dsn = %args.globals.redacted_dsn(),
        frontend_base_url = %args.frontend_base_url,
        base_path = %args.base_path,
        access_token_ttl_seconds = args.access_token_ttl_seconds,
        refresh_ttl_seconds = args.refresh_ttl_seconds,
        "Startup configuration"
    );
}
