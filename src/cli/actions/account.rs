use crate::{
    cli::globals::GlobalArgs,
    identity::{self, pii::PiiCodec},
    keys::KeyRing,
};
use anyhow::{Context, Result};

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub email: String,
    pub active: bool,
}

/// Flip the account's login switch and print its id.
/// # Errors
/// Returns an error if the keys are invalid, the email is unknown, or the store fails.
pub async fn execute(args: Args) -> Result<()> {
    let keys = KeyRing::from_secrets(&args.globals.keys).context("Invalid key configuration")?;
    let codec = PiiCodec::new(keys.lookup(), keys.encryption())?;

    let store = identity::open_store(&args.globals.dsn)
        .await
        .context("Failed to open identity store")?;

    let id = identity::set_account_active(store.as_ref(), &codec, &args.email, args.active)
        .await
        .context("Failed to update account")?;

    println!("{id} active={}", args.active);
    Ok(())
}
