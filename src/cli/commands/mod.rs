pub mod config;
pub mod emit;
pub mod listen;

pub use config::LoggingConfig;
pub use emit::EmitCommand;
pub use listen::ListenCommand;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Start the event server and print received events
    Listen(ListenCommand),
    /// Act as an optimization process and publish synthetic progress
    Emit(EmitCommand),
}

impl Commands {
    pub fn logging(&self) -> &LoggingConfig {
        match self {
            Commands::Listen(cmd) => &cmd.logging,
            Commands::Emit(cmd) => &cmd.logging,
        }
    }
}
