//! LanLink CLI library
//!
//! Command-line front end for a LanLink node: run a node, list peers, and send
//! one-shot pings, summary requests, chat messages and files to a known address.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, ConfigError, Overrides};
pub use error::{CliError, Result};
