use super::LoggingConfig;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ListenCommand {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Interface to bind the subscribe and reply endpoints on
    #[arg(long, value_name = "HOST")]
    pub bind_host: Option<String>,

    #[command(flatten)]
    pub logging: LoggingConfig,
}
