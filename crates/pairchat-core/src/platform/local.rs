//! Configuration-backed platform for hosts without a managed radio stack
//!
//! `LocalPlatform` answers capability checks from a grant list, serves the
//! bond store from configuration, tracks radio and discovery state in memory,
//! and fans notifications out to registered observers. Desktop front ends use
//! it directly; hosts with a real adapter feed it through [`LocalPlatform::emit`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::platform::{
    BondStore, Capability, CapabilityGate, EventKind, ObserverId, Platform, PlatformEvent,
    PlatformEventSource, PlatformObserver, RadioControl,
};
use crate::sync::{lock, read, write};
use crate::transport::StreamTransport;
use crate::types::PeerDevice;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Initial state of a [`LocalPlatform`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalPlatformConfig {
    /// Name this device advertises
    pub device_name: Option<String>,
    /// Capabilities granted to the app
    pub granted: Vec<Capability>,
    /// Peers already bonded with this device
    pub bonded: Vec<PeerDevice>,
    /// Whether the radio starts powered on
    pub radio_enabled: bool,
    /// Whether `start_discovery` succeeds
    pub discovery_supported: bool,
}

impl Default for LocalPlatformConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            granted: vec![Capability::Scan, Capability::Connect, Capability::Advertise],
            bonded: Vec::new(),
            radio_enabled: true,
            discovery_supported: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Local Platform
// ----------------------------------------------------------------------------

type Registration = (ObserverId, EventKind, Arc<dyn PlatformObserver>);

/// In-process implementation of the platform collaborators
pub struct LocalPlatform {
    device_name: RwLock<Option<String>>,
    granted: RwLock<HashSet<Capability>>,
    bonded: RwLock<Vec<PeerDevice>>,
    radio_enabled: AtomicBool,
    discovery_supported: AtomicBool,
    discovering: AtomicBool,
    discoverable_secs: AtomicU32,
    bond_queries: AtomicUsize,
    observers: Mutex<Vec<Registration>>,
    next_observer: AtomicU64,
}

impl Default for LocalPlatform {
    fn default() -> Self {
        Self::new(LocalPlatformConfig::default())
    }
}

impl LocalPlatform {
    pub fn new(config: LocalPlatformConfig) -> Self {
        Self {
            device_name: RwLock::new(config.device_name),
            granted: RwLock::new(config.granted.into_iter().collect()),
            bonded: RwLock::new(config.bonded),
            radio_enabled: AtomicBool::new(config.radio_enabled),
            discovery_supported: AtomicBool::new(config.discovery_supported),
            discovering: AtomicBool::new(false),
            discoverable_secs: AtomicU32::new(0),
            bond_queries: AtomicUsize::new(0),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(1),
        }
    }

    /// Bundle this platform with a transport
    pub fn platform(self: &Arc<Self>, transport: Arc<dyn StreamTransport>) -> Platform {
        Platform {
            capabilities: self.clone(),
            radio: self.clone(),
            bonds: self.clone(),
            events: self.clone(),
            transport,
        }
    }

    pub fn grant(&self, capability: Capability) {
        write(&self.granted).insert(capability);
    }

    pub fn revoke(&self, capability: Capability) {
        write(&self.granted).remove(&capability);
    }

    pub fn add_bond(&self, peer: PeerDevice) {
        let mut bonded = write(&self.bonded);
        if !bonded.contains(&peer) {
            bonded.push(peer);
        }
    }

    pub fn remove_bond(&self, address: &str) {
        write(&self.bonded).retain(|peer| peer.address() != address);
    }

    pub fn set_device_name(&self, name: Option<String>) {
        *write(&self.device_name) = name;
    }

    pub fn set_discovery_supported(&self, supported: bool) {
        self.discovery_supported.store(supported, Ordering::SeqCst);
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    /// Last requested discoverable duration, if any
    pub fn discoverable_for(&self) -> Option<u32> {
        match self.discoverable_secs.load(Ordering::SeqCst) {
            0 => None,
            secs => Some(secs),
        }
    }

    /// How many times the bond store has been read
    pub fn bond_queries(&self) -> usize {
        self.bond_queries.load(Ordering::SeqCst)
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    /// Deliver a notification to matching observers; returns how many saw it
    pub fn emit(&self, event: PlatformEvent) -> usize {
        if event == PlatformEvent::DiscoveryFinished {
            self.discovering.store(false, Ordering::SeqCst);
        }

        let kind = event.kind();
        let targets: Vec<Arc<dyn PlatformObserver>> = lock(&self.observers)
            .iter()
            .filter(|(_, registered, _)| *registered == kind)
            .map(|(_, _, observer)| observer.clone())
            .collect();

        for observer in &targets {
            observer.on_event(&event);
        }
        targets.len()
    }
}

impl CapabilityGate for LocalPlatform {
    fn has_permission(&self, capability: Capability) -> bool {
        read(&self.granted).contains(&capability)
    }
}

impl RadioControl for LocalPlatform {
    fn is_enabled(&self) -> bool {
        self.radio_enabled.load(Ordering::SeqCst)
    }

    fn request_enable(&self) {
        debug!("Radio enable requested");
        self.radio_enabled.store(true, Ordering::SeqCst);
    }

    fn request_discoverable(&self, duration_secs: u32) {
        debug!("Discoverable requested for {}s", duration_secs);
        self.discoverable_secs.store(duration_secs, Ordering::SeqCst);
    }

    fn start_discovery(&self) -> bool {
        if !self.is_enabled() || !self.discovery_supported.load(Ordering::SeqCst) {
            return false;
        }
        self.discovering.store(true, Ordering::SeqCst);
        true
    }

    fn cancel_discovery(&self) {
        self.discovering.store(false, Ordering::SeqCst);
    }

    fn local_name(&self) -> Option<String> {
        read(&self.device_name).clone()
    }
}

impl BondStore for LocalPlatform {
    fn bonded_peers(&self) -> Vec<PeerDevice> {
        self.bond_queries.fetch_add(1, Ordering::SeqCst);
        read(&self.bonded).clone()
    }
}

impl PlatformEventSource for LocalPlatform {
    fn subscribe(&self, kind: EventKind, observer: Arc<dyn PlatformObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::SeqCst));
        lock(&self.observers).push((id, kind, observer));
        id
    }

    fn unsubscribe(&self, id: ObserverId) {
        lock(&self.observers).retain(|(registered, _, _)| *registered != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<PlatformEvent>>);

    impl PlatformObserver for Recorder {
        fn on_event(&self, event: &PlatformEvent) {
            lock(&self.0).push(event.clone());
        }
    }

    #[test]
    fn test_observers_only_see_their_kind() {
        let platform = LocalPlatform::default();
        let discovery = Arc::new(Recorder(Mutex::new(Vec::new())));
        let links = Arc::new(Recorder(Mutex::new(Vec::new())));
        platform.subscribe(EventKind::Discovery, discovery.clone());
        let link_id = platform.subscribe(EventKind::LinkState, links.clone());

        let peer = PeerDevice::new("AA");
        assert_eq!(platform.emit(PlatformEvent::PeerFound(peer.clone())), 1);
        platform.emit(PlatformEvent::LinkStateChanged { peer, connected: true });
        assert_eq!(lock(&discovery.0).len(), 1);
        assert_eq!(lock(&links.0).len(), 1);

        platform.unsubscribe(link_id);
        assert_eq!(platform.observer_count(), 1);
        assert_eq!(platform.emit(PlatformEvent::LinkStateChanged {
            peer: PeerDevice::new("AA"),
            connected: false,
        }), 0);
    }

    #[test]
    fn test_grants_and_discovery_refusal() {
        let platform = LocalPlatform::new(LocalPlatformConfig {
            granted: vec![Capability::Scan],
            discovery_supported: false,
            ..Default::default()
        });
        assert!(platform.has_permission(Capability::Scan));
        assert!(!platform.has_permission(Capability::Connect));
        assert!(!platform.start_discovery());

        platform.set_discovery_supported(true);
        assert!(platform.start_discovery());
        assert!(platform.is_discovering());
        platform.emit(PlatformEvent::DiscoveryFinished);
        assert!(!platform.is_discovering());
    }

    #[test]
    fn test_bond_store_counts_queries() {
        let platform = LocalPlatform::default();
        platform.add_bond(PeerDevice::named("A", "01"));
        platform.add_bond(PeerDevice::new("01"));
        assert_eq!(platform.bonded_peers().len(), 1);
        assert_eq!(platform.bond_queries(), 1);
    }
}
