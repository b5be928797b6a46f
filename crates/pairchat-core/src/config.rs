//! PairChat connection configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ChatError, ChatResult};
use crate::wire::WireFormat;

// ----------------------------------------------------------------------------
// Service Identity
// ----------------------------------------------------------------------------

/// Well-known service identifier shared by every PairChat instance
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x8d7d98ff_96a8_415a_b107_d6d2ad2a531c);

/// Service record name announced by listeners
pub const SERVICE_NAME: &str = "chat_service";

/// Service a listener binds and a connector addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub uuid: Uuid,
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the Connection Manager and its sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Name of the listening service record
    pub service_name: String,
    /// Rendezvous identifier for listeners and connectors
    pub service_uuid: Uuid,
    /// Message framing on the wire
    pub wire_format: WireFormat,
    /// Bytes requested per read; one read is one message in read-boundary mode
    pub read_buffer_size: usize,
    /// Largest accepted length-prefixed frame
    pub max_frame_len: usize,
    /// Maximum time to wait for an outbound connect
    pub connection_timeout_secs: u64,
    /// How long to stay discoverable when hosting
    pub discoverable_duration_secs: u32,
    /// Sender label when the adapter has no name
    pub fallback_sender_name: String,
    /// Capacity of each lifecycle event channel
    pub event_buffer_size: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
            service_uuid: SERVICE_UUID,
            wire_format: WireFormat::ReadBoundary,
            read_buffer_size: 1024,
            max_frame_len: 64 * 1024,
            connection_timeout_secs: 10,
            discoverable_duration_secs: 300,
            fallback_sender_name: "Unknown".to_string(),
            event_buffer_size: 64,
        }
    }
}

impl ChatConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wire format
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    /// Set the rendezvous identifier
    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = uuid;
        self
    }

    /// Set the per-read buffer size
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the connect timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the fallback sender label
    pub fn with_fallback_sender_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_sender_name = name.into();
        self
    }

    /// Connect timeout as a duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Service record built from the configured name and UUID
    pub fn service_record(&self) -> ServiceRecord {
        ServiceRecord {
            name: self.service_name.clone(),
            uuid: self.service_uuid,
        }
    }

    /// Reject settings the session cannot work with
    pub fn validate(&self) -> ChatResult<()> {
        if self.read_buffer_size == 0 {
            return Err(ChatError::Config("read_buffer_size must be positive".into()));
        }
        if self.max_frame_len == 0 || self.max_frame_len > u32::MAX as usize {
            return Err(ChatError::Config(format!(
                "max_frame_len must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.connection_timeout_secs == 0 {
            return Err(ChatError::Config(
                "connection_timeout_secs must be positive".into(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(ChatError::Config("event_buffer_size must be positive".into()));
        }
        Ok(())
    }
}
