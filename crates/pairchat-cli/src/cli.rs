//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Advertised device name
    #[arg(short, long)]
    pub name: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Host a chat and wait for one peer to connect
    Listen {
        /// Address to listen on (overrides the configuration)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Connect to a hosting peer and chat
    Connect {
        /// Peer address (host:port)
        address: String,
    },
    /// List paired peers
    Peers {
        /// Seconds to scan the radio adapter for nearby peers
        #[arg(short, long, default_value_t = 0)]
        scan: u64,
    },
    /// Run two in-process devices against each other
    Demo {
        /// Number of messages to exchange
        #[arg(short, long, default_value_t = 3)]
        messages: usize,
    },
}
