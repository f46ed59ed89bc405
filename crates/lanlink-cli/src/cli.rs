//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Device name advertised to peers
    #[arg(short, long, global = true)]
    pub name: Option<String>,

    /// Directory received files are written to
    #[arg(short, long, global = true)]
    pub download_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node until Ctrl+C, logging everything it receives
    Run {
        /// JSON file answering today-summary requests
        #[arg(short, long)]
        summary: Option<PathBuf>,
    },
    /// List peers found on the network
    Peers {
        /// Keep printing the list whenever it changes
        #[arg(short, long)]
        watch: bool,
    },
    /// Measure the round trip to a peer
    Ping { host: String, port: u32 },
    /// Fetch a peer's today summary
    Summary { host: String, port: u32 },
    /// Send one chat message and wait for its acknowledgement
    Chat {
        host: String,
        port: u32,
        text: String,
    },
    /// Send a file and wait for its acknowledgement
    Send {
        host: String,
        port: u32,
        path: PathBuf,
    },
    /// Print an example configuration file
    Config,
}
