use crate::cli::actions::{account, bootstrap, keys, server, Action};
use anyhow::Result;

/// Execute the provided action.
// This is the single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
        Action::Bootstrap(args) => bootstrap::execute(args).await,
        Action::Account(args) => account::execute(args).await,
        Action::GenerateKeys => {
            keys::execute();
            Ok(())
        }
    }
}
