//! Adapter scanning through btleplug
//!
//! Feeds a [`LocalPlatform`] from a real radio adapter: discovered
//! peripherals become `PeerFound` notifications and connect/disconnect events
//! become `LinkStateChanged`. The stream transport is unaffected.

use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt;
use tracing::{debug, info};

use crate::errors::{ChatError, ChatResult};
use crate::platform::{LocalPlatform, PlatformEvent};
use crate::types::PeerDevice;

fn radio_error(context: &str, error: btleplug::Error) -> ChatError {
    ChatError::Radio(format!("{}: {}", context, error))
}

/// Scans the first available adapter on behalf of a [`LocalPlatform`]
pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    /// Open the first adapter the host reports
    pub async fn initialize() -> ChatResult<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| radio_error("Failed to create adapter manager", e))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| radio_error("Failed to list adapters", e))?
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Radio("No adapters available".to_string()))?;

        info!("Radio adapter initialized");
        Ok(Self { adapter })
    }

    /// Scan for `duration` or until discovery is cancelled on `platform`
    ///
    /// Returns the number of peer sightings forwarded.
    pub async fn scan(&self, platform: &LocalPlatform, duration: Duration) -> ChatResult<usize> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| radio_error("Failed to subscribe to adapter events", e))?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| radio_error("Failed to start scan", e))?;
        debug!("Adapter scan started for {:?}", duration);

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let mut sightings = 0;

        while platform.is_discovering() {
            let event = tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if self.forward(platform, event).await {
                sightings += 1;
            }
        }

        self.adapter
            .stop_scan()
            .await
            .map_err(|e| radio_error("Failed to stop scan", e))?;
        platform.emit(PlatformEvent::DiscoveryFinished);
        Ok(sightings)
    }

    async fn forward(&self, platform: &LocalPlatform, event: CentralEvent) -> bool {
        match event {
            CentralEvent::DeviceDiscovered(id) => match self.peer_device(&id).await {
                Some(peer) => {
                    platform.emit(PlatformEvent::PeerFound(peer));
                    true
                }
                None => false,
            },
            CentralEvent::DeviceConnected(id) => {
                self.forward_link(platform, &id, true).await;
                false
            }
            CentralEvent::DeviceDisconnected(id) => {
                self.forward_link(platform, &id, false).await;
                false
            }
            _ => false,
        }
    }

    async fn forward_link(&self, platform: &LocalPlatform, id: &PeripheralId, connected: bool) {
        if let Some(peer) = self.peer_device(id).await {
            platform.emit(PlatformEvent::LinkStateChanged { peer, connected });
        }
    }

    async fn peer_device(&self, id: &PeripheralId) -> Option<PeerDevice> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok()??;
        let address = properties.address.to_string();
        Some(match properties.local_name {
            Some(name) => PeerDevice::named(name, address),
            None => PeerDevice::new(address),
        })
    }
}
