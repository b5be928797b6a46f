//! Command handlers for the PairChat CLI

use tracing::info;

use pairchat_core::PeerDevice;

use crate::app::{run_demo, ChatApp, ChatRole};
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, mut config: AppConfig) -> Result<()> {
        if let Some(name) = cli.name {
            config.device.name = Some(name);
        }

        match cli.command {
            Commands::Listen { bind } => {
                if let Some(bind) = bind {
                    config.device.bind_addr = bind
                        .parse()
                        .map_err(|e| CliError::Config(format!("Invalid bind address {}: {}", bind, e)))?;
                }
                Self::handle_chat_command(&config, ChatRole::Host).await
            }
            Commands::Connect { address } => {
                let peer = config
                    .device
                    .bonded
                    .iter()
                    .find(|peer| peer.address() == address)
                    .cloned()
                    .unwrap_or_else(|| PeerDevice::new(address));
                Self::handle_chat_command(&config, ChatRole::Join(peer)).await
            }
            Commands::Peers { scan } => {
                let app = ChatApp::new(&config)?;
                let result = app.list_peers(scan).await;
                app.release();
                result
            }
            Commands::Demo { messages } => {
                info!("Running demo with {} messages", messages);
                run_demo(&config, messages).await
            }
        }
    }

    async fn handle_chat_command(config: &AppConfig, role: ChatRole) -> Result<()> {
        let app = ChatApp::new(config)?;
        let result = app.run_chat(role).await;
        app.release();
        result
    }
}
