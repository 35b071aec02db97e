use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `scorerelay` - batched upload of content score updates.
#[derive(Parser, Debug)]
#[command(name = "scorerelay")]
#[command(author = "theonlyhennygod")]
#[command(version = "0.1.0")]
#[command(about = "Relays content score updates to a scoring API in size-bounded batches.", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.scorerelay/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the upload worker and submit JSON-lines score updates
    Run {
        /// Read updates from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Keep running this many seconds after end of input so open batches flush
        #[arg(long, default_value = "0")]
        linger_secs: u64,
    },

    /// Load and validate the configuration, then print the effective settings
    CheckConfig,
}
