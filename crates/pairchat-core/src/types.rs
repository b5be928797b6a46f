//! Core types for PairChat
//!
//! `PeerDevice` identifies a remote radio by its transport address and
//! `ChatMessage` is one entry of the conversation log.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Peer Device
// ----------------------------------------------------------------------------

/// Identity of a remote device
///
/// Equality and hashing only look at `address`, so two sightings of the same
/// radio with different display names are the same peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDevice {
    name: Option<String>,
    address: String,
}

impl PeerDevice {
    /// Create a peer with no display name
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    /// Create a peer with a display name
    pub fn named(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Display name, if the transport supplied one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Stable transport-layer address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Name for display, falling back to the address
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.address)
    }
}

impl PartialEq for PeerDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeerDevice {}

impl Hash for PeerDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for PeerDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{} ({})", name, self.address),
            _ => write!(f, "{}", self.address),
        }
    }
}

// ----------------------------------------------------------------------------
// Chat Message
// ----------------------------------------------------------------------------

/// One unit of conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message
    pub sender_label: String,
    /// Message text
    pub body: String,
    /// True if composed on this device
    pub originated_locally: bool,
}

impl ChatMessage {
    /// A message composed on this device
    pub fn local(sender_label: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender_label: sender_label.into(),
            body: body.into(),
            originated_locally: true,
        }
    }

    /// A message decoded from the peer
    pub fn remote(sender_label: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender_label: sender_label.into(),
            body: body.into(),
            originated_locally: false,
        }
    }
}
