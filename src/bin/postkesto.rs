use anyhow::Result;
use postkesto::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let action = cli::start()?;

    let result = action.execute().await;

    // Flush pending spans before the process exits
    cli::telemetry::shutdown_tracer();

    result
}
