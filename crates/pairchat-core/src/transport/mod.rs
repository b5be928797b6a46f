//! Stream transport abstraction
//!
//! A transport opens stream-oriented sockets addressed by a peer address and
//! a [`ServiceRecord`]. Listeners are bound to the service record and hand
//! out one byte stream per accepted peer. The Connection Manager is the only
//! caller; it owns every listener and stream it obtains here.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ServiceRecord;
use crate::types::PeerDevice;

pub mod memory;
pub mod tcp;

pub use memory::{MemoryHub, MemoryTransport};
pub use tcp::TcpTransport;

// ----------------------------------------------------------------------------
// Byte Streams
// ----------------------------------------------------------------------------

/// A connected, bidirectional byte stream
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A stream handed out by [`ServiceListener::accept`]
pub struct Accepted {
    pub stream: Box<dyn ByteStream>,
    /// The remote peer, when the transport can tell
    pub peer: Option<PeerDevice>,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted").field("peer", &self.peer).finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// Listener bound to a service record
#[async_trait]
pub trait ServiceListener: Send {
    /// Block until one inbound connection arrives
    async fn accept(&mut self) -> io::Result<Accepted>;
}

/// Opens listeners and outbound streams
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Bind a listener to `service`
    async fn listen(&self, service: &ServiceRecord) -> io::Result<Box<dyn ServiceListener>>;

    /// Open a stream to `service` on the peer at `address`
    async fn connect(&self, address: &str, service: &ServiceRecord)
        -> io::Result<Box<dyn ByteStream>>;
}
