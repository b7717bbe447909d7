use super::LoggingConfig;
use clap::Args;

#[derive(Args)]
pub struct EmitCommand {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Subscribe port printed by `listen`
    #[arg(long)]
    pub subscribe_port: u16,

    /// Reply port printed by `listen`
    #[arg(long)]
    pub reply_port: u16,

    /// Client id sent in every frame
    #[arg(long, default_value = "optistream-emit")]
    pub client_id: String,

    /// Parameter names, comma separated
    #[arg(long, value_delimiter = ',', default_value = "x")]
    pub parameters: Vec<String>,

    /// KPI names, comma separated
    #[arg(long, value_delimiter = ',', default_value = "y")]
    pub kpis: Vec<String>,

    /// Number of progress events to publish
    #[arg(long, default_value_t = 10)]
    pub points: u64,

    /// Delay between progress events in milliseconds
    #[arg(long, default_value_t = 100)]
    pub interval_ms: u64,

    /// Handshake timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    #[command(flatten)]
    pub logging: LoggingConfig,
}
