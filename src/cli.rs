use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "icapguard")]
#[command(about = "ICAP adaptation server - malware gating between an HTTP proxy and scanner backends")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "icapguard.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the ICAP server
    Start,
    /// Validate the configuration and list the resolved scanner vendors
    Check,
    /// View the transaction audit log
    Logs {
        /// Show last N entries
        #[arg(long, default_value = "50")]
        tail: usize,
        /// Export logs
        #[arg(long)]
        export: bool,
        /// Export format (json or csv)
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Write a default configuration file
    Init,
}
