pub mod server;

mod run;

/// Actions the CLI can be asked to perform.
#[derive(Debug)]
pub enum Action {
    Server(server::Args),
}

impl Action {
    /// Convenience wrapper so call sites can do `action.execute().await`.
    ///
    /// # Errors
    /// Propagates errors from the underlying action handler.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
