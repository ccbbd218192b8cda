use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const NAME: &str = "bootstrap";

pub const ARG_ADMIN_EMAIL: &str = "admin-email";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";

#[must_use]
pub fn command() -> Command {
    Command::new(NAME)
        .about("Provision the single administrator account (idempotent)")
        .arg(
            Arg::new(ARG_ADMIN_EMAIL)
                .long(ARG_ADMIN_EMAIL)
                .help("Administrator email")
                .env("STOREFRONT_ADMIN_EMAIL"),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long(ARG_ADMIN_PASSWORD)
                .help("Administrator password")
                .env("STOREFRONT_ADMIN_PASSWORD")
                .hide_env_values(true),
        )
}

/// Admin credentials as given; missing values are reported by the bootstrap
/// itself so the error names the variable to set.
#[derive(Debug)]
pub struct Options {
    pub email: Option<String>,
    pub password: Option<SecretString>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            email: matches.get_one::<String>(ARG_ADMIN_EMAIL).cloned(),
            password: matches
                .get_one::<String>(ARG_ADMIN_PASSWORD)
                .map(|password| SecretString::from(password.clone())),
        }
    }
}
