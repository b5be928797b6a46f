//! Lifecycle events emitted by the Connection Manager

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::types::{ChatMessage, PeerDevice};

// ----------------------------------------------------------------------------
// Connection Events
// ----------------------------------------------------------------------------

/// Point-in-time occurrence in a connection's lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A peer socket is live; carries the peer when the transport knows it
    Established(Option<PeerDevice>),
    /// One decoded inbound message
    MessageReceived(ChatMessage),
    /// A surfaced failure, e.g. "Connection was interrupted"
    Error(String),
}

/// Connection Manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerState {
    #[default]
    Idle,
    Listening,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Idle => "idle",
            ManagerState::Listening => "listening",
            ManagerState::Connecting => "connecting",
            ManagerState::Connected => "connected",
            ManagerState::Closing => "closing",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Event Stream
// ----------------------------------------------------------------------------

/// Stream of lifecycle events for one `start_server` or `connect` call
///
/// The stream ends once the lifecycle has torn down. Dropping it cancels the
/// lifecycle; teardown still runs.
#[derive(Debug)]
pub struct ConnectionEvents {
    receiver: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionEvents {
    pub(crate) fn channel(buffer: usize) -> (mpsc::Sender<ConnectionEvent>, Self) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (sender, Self { receiver })
    }

    /// A stream that is already finished
    pub(crate) fn finished() -> Self {
        let (_, events) = Self::channel(1);
        events
    }

    /// Wait for the next event; `None` once the lifecycle is over
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.receiver.recv().await
    }
}

impl Stream for ConnectionEvents {
    type Item = ConnectionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
