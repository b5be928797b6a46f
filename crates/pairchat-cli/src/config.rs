//! PairChat CLI configuration
//!
//! Loaded from a TOML file with three sections, each optional:
//!
//! ```toml
//! [chat]
//! wire_format = "length_prefixed"
//! connection_timeout_secs = 5
//!
//! [device]
//! name = "Workstation"
//! bind_addr = "0.0.0.0:7878"
//! bonded = [{ name = "Laptop", address = "192.168.1.20:7878" }]
//!
//! [logging]
//! verbose = true
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use pairchat_core::{Capability, ChatConfig, LocalPlatformConfig, PeerDevice};

use crate::error::{CliError, Result};

/// Default TCP port for hosting
pub const DEFAULT_PORT: u16 = 7878;

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the PairChat CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Core chat settings
    pub chat: ChatConfig,
    /// This device
    pub device: DeviceConfig,
    pub logging: LoggingConfig,
}

/// Identity and platform settings of this device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised name, used as the sender label
    pub name: Option<String>,
    /// Address `listen` binds to
    pub bind_addr: SocketAddr,
    /// Peers treated as bonded
    pub bonded: Vec<PeerDevice>,
    /// Capabilities granted to the app
    pub granted: Vec<Capability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            bonded: Vec::new(),
            granted: LocalPlatformConfig::default().granted,
        }
    }
}

impl DeviceConfig {
    /// Initial state for the local platform
    pub fn platform_config(&self) -> LocalPlatformConfig {
        LocalPlatformConfig {
            device_name: self.name.clone(),
            granted: self.granted.clone(),
            bonded: self.bonded.clone(),
            ..Default::default()
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: AppConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chat.validate()?;
        if self.device.name.as_deref() == Some("") {
            return Err(CliError::Config("device name must not be empty".to_string()));
        }
        Ok(())
    }
}
