use super::{Action, server};
use anyhow::Result;

/// Internal "interpreter" for `Action`.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
    }
}
