//! Peer discovery
//!
//! Keeps two snapshots of nearby peers:
//! - scanned: filled by every `PeerFound` notification, keyed by address,
//!   first sighting wins, insertion order preserved; cleared only when a
//!   scan starts
//! - paired: read from the bond store on construction, on every scan start,
//!   and whenever a connection tears down
//!
//! Each snapshot has a single writer. Scanned peers are only written by the
//! registered discovery observer (and cleared by `start_scan`); paired peers
//! are only written by `refresh_paired`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::errors::ChatError;
use crate::platform::{Capability, EventKind, ObserverId, Platform, PlatformEvent, PlatformObserver};
use crate::sync::lock;
use crate::types::PeerDevice;

const ERROR_CHANNEL_CAPACITY: usize = 16;

// ----------------------------------------------------------------------------
// Found-device Observer
// ----------------------------------------------------------------------------

struct FoundDeviceObserver {
    scanned: Arc<watch::Sender<Vec<PeerDevice>>>,
    scanning: Arc<AtomicBool>,
}

impl PlatformObserver for FoundDeviceObserver {
    fn on_event(&self, event: &PlatformEvent) {
        match event {
            PlatformEvent::PeerFound(peer) => {
                let added = self.scanned.send_if_modified(|devices| {
                    if devices.contains(peer) {
                        false
                    } else {
                        devices.push(peer.clone());
                        true
                    }
                });
                if added {
                    debug!("Discovered peer {}", peer);
                }
            }
            PlatformEvent::DiscoveryFinished => {
                self.scanning.store(false, Ordering::SeqCst);
                debug!("Discovery finished");
            }
            PlatformEvent::LinkStateChanged { .. } => {}
        }
    }
}

// ----------------------------------------------------------------------------
// Discovery Source
// ----------------------------------------------------------------------------

/// Produces the scanned and paired peer snapshots
pub struct DiscoverySource {
    platform: Platform,
    scanned: Arc<watch::Sender<Vec<PeerDevice>>>,
    paired: watch::Sender<Vec<PeerDevice>>,
    scanning: Arc<AtomicBool>,
    errors: broadcast::Sender<String>,
    observer: Mutex<Option<ObserverId>>,
}

impl DiscoverySource {
    /// Register for discovery notifications and load the paired snapshot
    pub fn new(platform: Platform) -> Self {
        let (scanned, _) = watch::channel(Vec::new());
        let (paired, _) = watch::channel(Vec::new());
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let scanned = Arc::new(scanned);
        let scanning = Arc::new(AtomicBool::new(false));

        let observer = platform.events.subscribe(
            EventKind::Discovery,
            Arc::new(FoundDeviceObserver {
                scanned: scanned.clone(),
                scanning: scanning.clone(),
            }),
        );

        let source = Self {
            platform,
            scanned,
            paired,
            scanning,
            errors,
            observer: Mutex::new(Some(observer)),
        };
        source.refresh_paired();
        source
    }

    /// Begin a scan; a no-op without the scan capability
    pub fn start_scan(&self) {
        if !self.platform.has_permission(Capability::Scan) {
            debug!("Scan capability missing, not scanning");
            return;
        }

        self.scanned.send_replace(Vec::new());
        self.scanning.store(true, Ordering::SeqCst);
        self.refresh_paired();

        if self.platform.radio.start_discovery() {
            info!("Started peer discovery");
        } else {
            self.scanning.store(false, Ordering::SeqCst);
            warn!("Platform refused to start discovery");
            self.notify_error(ChatError::DiscoveryStartFailed);
        }
    }

    /// Cancel a running scan; a no-op when idle or without the scan capability
    pub fn stop_scan(&self) {
        if !self.platform.has_permission(Capability::Scan) {
            return;
        }
        if !self.scanning.swap(false, Ordering::SeqCst) {
            return;
        }
        self.platform.radio.cancel_discovery();
        info!("Stopped peer discovery");
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Re-read the bond store and publish the paired snapshot
    ///
    /// Without the connect capability the snapshot is empty.
    pub fn refresh_paired(&self) -> Vec<PeerDevice> {
        let devices = if self.platform.has_permission(Capability::Connect) {
            self.platform.bonds.bonded_peers()
        } else {
            Vec::new()
        };
        debug!("Paired devices: {}", devices.len());
        self.paired.send_replace(devices.clone());
        devices
    }

    /// Current bonded peers, recomputed from the bond store
    pub fn paired_devices(&self) -> Vec<PeerDevice> {
        self.refresh_paired()
    }

    /// Current scanned peers
    pub fn scanned_devices(&self) -> Vec<PeerDevice> {
        self.scanned.borrow().clone()
    }

    /// Watch the scanned snapshot
    pub fn watch_scanned(&self) -> watch::Receiver<Vec<PeerDevice>> {
        self.scanned.subscribe()
    }

    /// Watch the paired snapshot
    pub fn watch_paired(&self) -> watch::Receiver<Vec<PeerDevice>> {
        self.paired.subscribe()
    }

    /// One-shot advisory error notifications
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    pub(crate) fn error_sender(&self) -> broadcast::Sender<String> {
        self.errors.clone()
    }

    pub(crate) fn platform(&self) -> &Platform {
        &self.platform
    }

    fn notify_error(&self, error: ChatError) {
        // No subscribers is fine; the notification is advisory
        let _ = self.errors.send(error.to_string());
    }

    /// Unregister the discovery observer
    pub fn release(&self) {
        if let Some(id) = lock(&self.observer).take() {
            self.platform.events.unsubscribe(id);
        }
    }
}

impl std::fmt::Debug for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoverySource")
            .field("scanning", &self.is_scanning())
            .field("scanned", &self.scanned.borrow().len())
            .field("paired", &self.paired.borrow().len())
            .finish()
    }
}
