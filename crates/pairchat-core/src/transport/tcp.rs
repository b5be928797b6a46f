//! TCP transport
//!
//! Peer addresses are `host:port` strings. TCP has no service records, so the
//! connector writes the 16-byte service UUID as a preamble and the listener
//! only hands out streams whose preamble matches its own service.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ServiceRecord;
use crate::transport::{Accepted, ByteStream, ServiceListener, StreamTransport};
use crate::types::PeerDevice;

const PREAMBLE_SIZE: usize = 16;
const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// TCP Transport
// ----------------------------------------------------------------------------

/// Stream transport over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_addr: SocketAddr,
}

impl TcpTransport {
    /// Listeners bind to `bind_addr`
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

#[async_trait]
impl StreamTransport for TcpTransport {
    async fn listen(&self, service: &ServiceRecord) -> io::Result<Box<dyn ServiceListener>> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        debug!(
            "Listening for {} on {}",
            service.name,
            listener.local_addr()?
        );
        Ok(Box::new(TcpServiceListener {
            listener,
            service_uuid: service.uuid,
        }))
    }

    async fn connect(
        &self,
        address: &str,
        service: &ServiceRecord,
    ) -> io::Result<Box<dyn ByteStream>> {
        let mut stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        stream.write_all(service.uuid.as_bytes()).await?;
        stream.flush().await?;
        Ok(Box::new(stream))
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

struct TcpServiceListener {
    listener: TcpListener,
    service_uuid: Uuid,
}

impl TcpServiceListener {
    async fn read_preamble(stream: &mut TcpStream) -> io::Result<Uuid> {
        let mut preamble = [0u8; PREAMBLE_SIZE];
        timeout(PREAMBLE_TIMEOUT, stream.read_exact(&mut preamble))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "service preamble timed out"))??;
        Ok(Uuid::from_bytes(preamble))
    }
}

#[async_trait]
impl ServiceListener for TcpServiceListener {
    async fn accept(&mut self) -> io::Result<Accepted> {
        loop {
            let (mut stream, remote) = self.listener.accept().await?;
            match Self::read_preamble(&mut stream).await {
                Ok(uuid) if uuid == self.service_uuid => {
                    stream.set_nodelay(true)?;
                    return Ok(Accepted {
                        stream: Box::new(stream),
                        peer: Some(PeerDevice::new(remote.to_string())),
                    });
                }
                Ok(uuid) => warn!("Dropping {} asking for unknown service {}", remote, uuid),
                Err(e) => warn!("Dropping {} without a service preamble: {}", remote, e),
            }
        }
    }
}
