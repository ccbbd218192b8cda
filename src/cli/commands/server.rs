use crate::{
    api::state::{DEFAULT_REFRESH_TTL_SECONDS, MAX_REFRESH_TTL_SECONDS},
    token::{DEFAULT_ACCESS_TOKEN_TTL_SECONDS, MAX_ACCESS_TOKEN_TTL_SECONDS},
};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const NAME: &str = "server";

pub const ARG_PORT: &str = "port";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_BASE_PATH: &str = "base-path";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TTL_SECONDS: &str = "refresh-ttl-seconds";

#[must_use]
pub fn command() -> Command {
    Command::new(NAME)
        .about("Serve the auth API")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("STOREFRONT_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used as the CORS origin and to decide Secure cookies")
                .env("STOREFRONT_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_BASE_PATH)
                .long(ARG_BASE_PATH)
                .help("Path prefix the API is mounted under, e.g. /v1")
                .env("STOREFRONT_BASE_PATH"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("STOREFRONT_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_ACCESS_TOKEN_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_SECONDS)
                .long(ARG_REFRESH_TTL_SECONDS)
                .help("Refresh cookie TTL in seconds")
                .env("STOREFRONT_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_REFRESH_TTL_SECONDS)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub port: u16,
    pub frontend_base_url: String,
    pub base_path: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is unexpectedly missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            base_path: matches
                .get_one::<String>(ARG_BASE_PATH)
                .cloned()
                .unwrap_or_default(),
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_REFRESH_TTL_SECONDS),
        })
    }
}
