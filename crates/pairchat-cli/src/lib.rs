//! PairChat CLI library
//!
//! Command-line front end over `pairchat-core`: host or join a chat over TCP,
//! list peers, or run an in-process demo between two devices.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::ChatApp;
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
