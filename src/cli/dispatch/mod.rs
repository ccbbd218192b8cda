//! Map parsed arguments to an [`Action`].

use crate::cli::{
    actions::{account, bootstrap, server, Action},
    commands::{self, keys},
    globals::GlobalArgs,
};
use anyhow::{anyhow, Result};

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((commands::server::NAME, sub)) => {
            let options = commands::server::Options::parse(sub)?;
            Ok(Action::Server(server::Args {
                globals: GlobalArgs::parse(sub)?,
                port: options.port,
                frontend_base_url: options.frontend_base_url,
                base_path: options.base_path,
                access_token_ttl_seconds: options.access_token_ttl_seconds,
                refresh_ttl_seconds: options.refresh_ttl_seconds,
            }))
        }
        Some((commands::bootstrap::NAME, sub)) => {
            let options = commands::bootstrap::Options::parse(sub);
            Ok(Action::Bootstrap(bootstrap::Args {
                globals: GlobalArgs::parse(sub)?,
                email: options.email,
                password: options.password,
            }))
        }
        Some((commands::account::NAME, sub)) => {
            let options = commands::account::Options::parse(sub)?;
            Ok(Action::Account(account::Args {
                globals: GlobalArgs::parse(sub)?,
                email: options.email,
                active: options.active,
            }))
        }
        Some((keys::GENERATE_KEYS, _)) => Ok(Action::GenerateKeys),
        Some((other, _)) => Err(anyhow!("unknown subcommand: {other}")),
        None => Err(anyhow!("missing subcommand")),
    }
}
