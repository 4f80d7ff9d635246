use clap::Parser;
use kvbench::cli::Command;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr: a worker's stdout carries its report
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    // Parse CLI arguments
    let cmd = Command::parse();

    // Execute command
    kvbench::cli::execute_command(cmd).await?;

    Ok(())
}
