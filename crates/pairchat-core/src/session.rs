//! Transport Session
//!
//! Wraps one live bidirectional stream: frames outgoing messages and decodes
//! inbound frames into [`ChatMessage`]s. A session never opens or closes its
//! stream. The Connection Manager closes it through the session's
//! [`CloseSignal`], which unblocks any pending read or write with an
//! I/O error.

use std::io;
use std::sync::Arc;

use futures::Stream;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::errors::{ChatError, ChatResult};
use crate::transport::ByteStream;
use crate::types::{ChatMessage, PeerDevice};
use crate::wire::{decode_payload, WireCodec};

// ----------------------------------------------------------------------------
// Close Signal
// ----------------------------------------------------------------------------

/// Closing handle for a listener or stream owned by the Connection Manager
#[derive(Debug, Clone)]
pub(crate) struct CloseSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub(crate) fn close(&self) {
        self.sender.send_replace(true);
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `close` has been called
    pub(crate) async fn closed(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|closed| *closed).await;
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed")
}

// ----------------------------------------------------------------------------
// Transport Session
// ----------------------------------------------------------------------------

/// Read/write wrapper around one connected stream
pub struct TransportSession {
    peer: Option<PeerDevice>,
    codec: WireCodec,
    fallback_sender: String,
    reader: Mutex<ReadHalf<Box<dyn ByteStream>>>,
    writer: Mutex<WriteHalf<Box<dyn ByteStream>>>,
    closed: CloseSignal,
}

impl TransportSession {
    pub(crate) fn new(
        stream: Box<dyn ByteStream>,
        peer: Option<PeerDevice>,
        codec: WireCodec,
        fallback_sender: &str,
        closed: CloseSignal,
    ) -> Self {
        let fallback_sender = peer
            .as_ref()
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| fallback_sender.to_string());
        let (reader, writer) = tokio::io::split(stream);
        Self {
            peer,
            codec,
            fallback_sender,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed,
        }
    }

    /// The remote peer, when known
    pub fn peer(&self) -> Option<&PeerDevice> {
        self.peer.as_ref()
    }

    /// Receive the next message; `None` once the peer closed the stream
    pub async fn next_message(&self) -> ChatResult<Option<ChatMessage>> {
        let mut reader = self.reader.lock().await;
        let frame = tokio::select! {
            biased;
            _ = self.closed.closed() => return Err(ChatError::TransferFailed(closed_error())),
            frame = self.codec.read_frame(&mut *reader) => frame?,
        };
        Ok(frame.map(|text| decode_payload(&text, &self.fallback_sender)))
    }

    /// Lazy sequence of inbound messages, in stream order
    ///
    /// Ends cleanly when the peer closes the stream. A transfer failure is
    /// yielded once as the last item.
    pub fn receive_messages(self: Arc<Self>) -> impl Stream<Item = ChatResult<ChatMessage>> + Send {
        futures::stream::unfold(Some(self), |session| async move {
            let session = session?;
            match session.next_message().await {
                Ok(Some(message)) => Some((Ok(message), Some(session))),
                Ok(None) => {
                    debug!("Peer closed the stream");
                    None
                }
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Write one message; `false` if it could not be written
    pub async fn send(&self, message: &ChatMessage) -> bool {
        let bytes = match self.codec.encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Not sending message: {}", e);
                return false;
            }
        };
        if self.closed.is_closed() {
            return false;
        }

        let mut writer = self.writer.lock().await;
        let result = tokio::select! {
            biased;
            _ = self.closed.closed() => Err(closed_error()),
            result = async {
                writer.write_all(&bytes).await?;
                writer.flush().await
            } => result,
        };

        match result {
            Ok(()) => {
                debug!("Sent {} bytes", bytes.len());
                true
            }
            Err(e) => {
                warn!("Failed to write message: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("peer", &self.peer)
            .field("wire_format", &self.codec.format())
            .finish_non_exhaustive()
    }
}
