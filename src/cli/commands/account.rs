use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const NAME: &str = "account";

pub const ARG_EMAIL: &str = "email";
pub const ARG_ACTIVE: &str = "active";

#[must_use]
pub fn command() -> Command {
    Command::new(NAME)
        .about("Enable or disable login for an account")
        .arg(
            Arg::new(ARG_EMAIL)
                .long(ARG_EMAIL)
                .help("Email the account was registered with")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACTIVE)
                .long(ARG_ACTIVE)
                .help("Whether the account may log in")
                .required(true)
                .value_parser(clap::value_parser!(bool)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub email: String,
    pub active: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            email: matches
                .get_one::<String>(ARG_EMAIL)
                .cloned()
                .context("missing required argument: --email")?,
            active: matches
                .get_one::<bool>(ARG_ACTIVE)
                .copied()
                .context("missing required argument: --active")?,
        })
    }
}
