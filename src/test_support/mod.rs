//! Shared Postgres for store tests.
//!
//! `STOREFRONT_TEST_DSN` points the tests at an existing throwaway database.
//! Otherwise one container is started for the whole test binary. Callers skip
//! when neither is available.

pub mod postgres;
pub mod runtime;

use anyhow::Result;
use std::env;
use tokio::sync::{Mutex, OnceCell};

use postgres::PostgresContainer;

pub const TEST_DSN_ENV: &str = "STOREFRONT_TEST_DSN";

static CONTAINER: OnceCell<PostgresContainer> = OnceCell::const_new();

/// Held for the whole test; every test truncates the shared tables.
pub static PG_LOCK: Mutex<()> = Mutex::const_new(());

/// # Errors
/// Returns an error if no database is configured and no container can be started.
pub async fn postgres_dsn() -> Result<String> {
    if let Ok(dsn) = env::var(TEST_DSN_ENV) {
        return Ok(dsn);
    }

    let container = CONTAINER
        .get_or_try_init(|| async {
            let container = PostgresContainer::start().await?;
            container.wait_until_ready().await?;
            Ok::<_, anyhow::Error>(container)
        })
        .await?;
    Ok(container.dsn())
}
