//! In-process transport
//!
//! A [`MemoryHub`] plays the shared radio space: listeners register under
//! their device address and service UUID, and connectors get one end of a
//! `tokio::io::duplex` pipe while the listener receives the other.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::config::ServiceRecord;
use crate::sync::lock;
use crate::transport::{Accepted, ByteStream, ServiceListener, StreamTransport};
use crate::types::PeerDevice;

const PIPE_CAPACITY: usize = 64 * 1024;

type RegistryKey = (String, Uuid);

struct Registration {
    id: u64,
    sender: mpsc::UnboundedSender<Accepted>,
}

// ----------------------------------------------------------------------------
// Hub
// ----------------------------------------------------------------------------

/// Shared rendezvous space for [`MemoryTransport`]s
#[derive(Clone, Default)]
pub struct MemoryHub {
    listeners: Arc<Mutex<HashMap<RegistryKey, Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for the device `local`
    pub fn transport(&self, local: PeerDevice) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            local,
        }
    }

    /// Number of listeners currently bound
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// One device's view of a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    local: PeerDevice,
}

impl MemoryTransport {
    pub fn local(&self) -> &PeerDevice {
        &self.local
    }
}

#[async_trait]
impl StreamTransport for MemoryTransport {
    async fn listen(&self, service: &ServiceRecord) -> io::Result<Box<dyn ServiceListener>> {
        let key = (self.local.address().to_string(), service.uuid);
        let mut listeners = lock(&self.hub.listeners);
        if listeners
            .get(&key)
            .is_some_and(|existing| !existing.sender.is_closed())
        {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "service already bound on this device",
            ));
        }

        let id = self.hub.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        listeners.insert(key.clone(), Registration { id, sender });
        debug!("Memory listener {} bound for {}", id, key.0);

        Ok(Box::new(MemoryListener {
            id,
            key,
            receiver,
            hub: self.hub.clone(),
        }))
    }

    async fn connect(
        &self,
        address: &str,
        service: &ServiceRecord,
    ) -> io::Result<Box<dyn ByteStream>> {
        let key = (address.to_string(), service.uuid);
        let sender = lock(&self.hub.listeners)
            .get(&key)
            .map(|registration| registration.sender.clone())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "no listener for service")
            })?;

        let (local_end, remote_end) = tokio::io::duplex(PIPE_CAPACITY);
        sender
            .send(Accepted {
                stream: Box::new(remote_end),
                peer: Some(self.local.clone()),
            })
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener closed"))?;
        Ok(Box::new(local_end))
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

struct MemoryListener {
    id: u64,
    key: RegistryKey,
    receiver: mpsc::UnboundedReceiver<Accepted>,
    hub: MemoryHub,
}

#[async_trait]
impl ServiceListener for MemoryListener {
    async fn accept(&mut self) -> io::Result<Accepted> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "listener closed"))
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        let mut listeners = lock(&self.hub.listeners);
        if listeners.get(&self.key).is_some_and(|r| r.id == self.id) {
            listeners.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_connect_without_listener_is_refused() {
        let hub = MemoryHub::new();
        let transport = hub.transport(PeerDevice::new("B"));
        let result = transport.connect("A", &ChatConfig::default().service_record()).await;
        assert_eq!(result.err().map(|e| e.kind()), Some(io::ErrorKind::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_pipe_between_devices() {
        let hub = MemoryHub::new();
        let service = ChatConfig::default().service_record();
        let a = hub.transport(PeerDevice::named("Alpha", "A"));
        let b = hub.transport(PeerDevice::named("Beta", "B"));

        let mut listener = a.listen(&service).await.unwrap();
        assert!(a.listen(&service).await.is_err());

        let mut outbound = b.connect("A", &service).await.unwrap();
        let mut inbound = listener.accept().await.unwrap();
        assert_eq!(inbound.peer, Some(PeerDevice::new("B")));

        outbound.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        inbound.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(listener);
        assert_eq!(hub.listener_count(), 0);
    }
}
