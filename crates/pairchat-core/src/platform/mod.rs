//! Platform collaborators
//!
//! The core never talks to a radio stack directly. Capability checks, radio
//! control, the bond store, asynchronous platform notifications and the
//! stream transport are all reached through the traits in this module, and
//! bundled together in [`Platform`].
//!
//! Notifications are delivered through explicit observer registration:
//! components `subscribe` at construction and `unsubscribe` on release.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::transport::StreamTransport;
use crate::types::PeerDevice;

#[cfg(feature = "ble")]
pub mod ble;
pub mod local;

pub use local::{LocalPlatform, LocalPlatformConfig};

// ----------------------------------------------------------------------------
// Capabilities
// ----------------------------------------------------------------------------

/// A runtime grant the host must hold before using the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Peer discovery
    Scan,
    /// Opening, accepting and writing to peer sockets
    Connect,
    /// Becoming discoverable
    Advertise,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Scan => "scan",
            Capability::Connect => "connect",
            Capability::Advertise => "advertise",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers whether a capability is currently granted
pub trait CapabilityGate: Send + Sync {
    fn has_permission(&self, capability: Capability) -> bool;
}

impl<F> CapabilityGate for F
where
    F: Fn(Capability) -> bool + Send + Sync,
{
    fn has_permission(&self, capability: Capability) -> bool {
        self(capability)
    }
}

// ----------------------------------------------------------------------------
// Radio and Bond Store
// ----------------------------------------------------------------------------

/// Control over the local radio adapter
pub trait RadioControl: Send + Sync {
    /// Whether the adapter is powered on
    fn is_enabled(&self) -> bool;

    /// Ask the host to enable the adapter; the outcome is observed via `is_enabled`
    fn request_enable(&self);

    /// Ask the host to make this device discoverable
    fn request_discoverable(&self, duration_secs: u32);

    /// Begin peer discovery; `false` if the platform refused
    fn start_discovery(&self) -> bool;

    /// Cancel peer discovery
    fn cancel_discovery(&self);

    /// Name this adapter advertises
    fn local_name(&self) -> Option<String>;
}

/// The platform's store of bonded (paired) peers
pub trait BondStore: Send + Sync {
    fn bonded_peers(&self) -> Vec<PeerDevice>;
}

// ----------------------------------------------------------------------------
// Platform Notifications
// ----------------------------------------------------------------------------

/// Asynchronous notification from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Discovery saw a peer
    PeerFound(PeerDevice),
    /// A peer's link came up or went down
    LinkStateChanged { peer: PeerDevice, connected: bool },
    /// The platform ended a discovery run on its own
    DiscoveryFinished,
}

/// Notification categories an observer can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `PeerFound` and `DiscoveryFinished`
    Discovery,
    /// `LinkStateChanged`
    LinkState,
}

impl PlatformEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlatformEvent::PeerFound(_) | PlatformEvent::DiscoveryFinished => EventKind::Discovery,
            PlatformEvent::LinkStateChanged { .. } => EventKind::LinkState,
        }
    }
}

/// Registration token returned by [`PlatformEventSource::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Receives platform notifications
///
/// Called on whatever thread the platform delivers on; implementations must
/// not block.
pub trait PlatformObserver: Send + Sync {
    fn on_event(&self, event: &PlatformEvent);
}

/// Source of platform notifications
pub trait PlatformEventSource: Send + Sync {
    fn subscribe(&self, kind: EventKind, observer: Arc<dyn PlatformObserver>) -> ObserverId;

    fn unsubscribe(&self, id: ObserverId);
}

// ----------------------------------------------------------------------------
// Platform Bundle
// ----------------------------------------------------------------------------

/// All external collaborators the core depends on
#[derive(Clone)]
pub struct Platform {
    pub capabilities: Arc<dyn CapabilityGate>,
    pub radio: Arc<dyn RadioControl>,
    pub bonds: Arc<dyn BondStore>,
    pub events: Arc<dyn PlatformEventSource>,
    pub transport: Arc<dyn StreamTransport>,
}

impl Platform {
    pub fn has_permission(&self, capability: Capability) -> bool {
        self.capabilities.has_permission(capability)
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
