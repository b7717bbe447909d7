//! Optistream binary.
//!
//! Runs the event server for an external optimization process, or plays the
//! role of that process to exercise a running server.

use clap::Parser;
use optistream_core::cli::{commands::Commands, handle_emit, handle_listen, Cli};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Get logging config from command
    let logging = cli.command.logging();
    let level = logging.get_effective_level();

    // Initialize logging (stdout carries event lines, logs go to stderr)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.parse().unwrap_or(Level::INFO).into())
                .parse_lossy(logging.log_filter.as_deref().unwrap_or("")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .init();

    info!("Optistream starting up");

    match cli.command {
        Commands::Listen(cmd) => handle_listen(cmd).await?,
        Commands::Emit(cmd) => tokio::task::spawn_blocking(move || handle_emit(cmd)).await??,
    }

    Ok(())
}
