use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ingot-stratum",
    version,
    about = "Bitcoin Stratum V1 mining pool server",
    long_about = "Stratum V1 pool server: consumes mining templates from Kafka, \
                 dispatches jobs to miners, validates shares and emits accepted \
                 and block-solving shares downstream."
)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the pool server
    Start {
        /// Server bind address (overrides config file)
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Server id, the high byte of every session id (overrides config file)
        #[arg(long)]
        server_id: Option<u8>,

        /// Kafka broker list (overrides config file)
        #[arg(long)]
        brokers: Option<String>,
    },

    /// Validate a configuration file
    Config {
        /// Configuration file to validate
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },

    /// Database management
    Database {
        #[command(subcommand)]
        command: DatabaseCommands,

        /// Database URL
        #[arg(long)]
        url: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum DatabaseCommands {
    /// Run pending migrations
    Migrate,
    /// Check database connectivity
    Status,
}

impl Args {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
