//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Running the event server (`listen`)
//! - Publishing synthetic progress as a client (`emit`)

pub mod commands;
pub mod handlers;

pub use handlers::{handle_emit, handle_listen};

use crate::cli::commands::Commands;
use clap::Parser;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}
