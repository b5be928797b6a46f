//! Presentation state
//!
//! [`reduce`] folds discovery snapshots, link changes, error notifications and
//! lifecycle events into one immutable [`UiState`]. [`ChatController`] wires a
//! [`ConnectionManager`] into that reducer and publishes each new state on a
//! watch channel for whatever front end renders it.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::event::{ConnectionEvent, ConnectionEvents};
use crate::sync::lock;
use crate::types::{ChatMessage, PeerDevice};

// ----------------------------------------------------------------------------
// State and Reducer
// ----------------------------------------------------------------------------

/// Snapshot of everything a chat front end renders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiState {
    pub scanned_devices: Vec<PeerDevice>,
    pub paired_devices: Vec<PeerDevice>,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub error_message: Option<String>,
    pub current_connected_device: Option<PeerDevice>,
    pub messages: Vec<ChatMessage>,
}

/// Input to [`reduce`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiUpdate {
    ScannedDevices(Vec<PeerDevice>),
    PairedDevices(Vec<PeerDevice>),
    /// Link flag published by the Connection Manager
    LinkConnected(bool),
    /// A server or connect lifecycle was started
    ConnectingStarted,
    Connection(ConnectionEvent),
    /// The lifecycle's event stream ended, or the user disconnected
    ConnectionEnded,
    MessageSent(ChatMessage),
    ErrorNotified(String),
    ErrorDismissed,
}

/// Pure state transition
pub fn reduce(state: &UiState, update: UiUpdate) -> UiState {
    let mut next = state.clone();
    match update {
        UiUpdate::ScannedDevices(devices) => next.scanned_devices = devices,
        UiUpdate::PairedDevices(devices) => next.paired_devices = devices,
        UiUpdate::LinkConnected(connected) => next.is_connected = connected,
        UiUpdate::ConnectingStarted => next.is_connecting = true,
        UiUpdate::Connection(ConnectionEvent::Established(peer)) => {
            next.is_connected = true;
            next.is_connecting = false;
            next.error_message = None;
            next.current_connected_device = peer;
        }
        UiUpdate::Connection(ConnectionEvent::MessageReceived(message))
        | UiUpdate::MessageSent(message) => next.messages.push(message),
        UiUpdate::Connection(ConnectionEvent::Error(reason)) => {
            next.is_connected = false;
            next.is_connecting = false;
            next.error_message = Some(reason);
        }
        UiUpdate::ConnectionEnded => {
            next.is_connected = false;
            next.is_connecting = false;
            next.current_connected_device = None;
        }
        UiUpdate::ErrorNotified(message) => next.error_message = Some(message),
        UiUpdate::ErrorDismissed => next.error_message = None,
    }
    next
}

// ----------------------------------------------------------------------------
// Chat Controller
// ----------------------------------------------------------------------------

/// Drives a [`ConnectionManager`] on behalf of a front end
///
/// Must be created within a Tokio runtime.
pub struct ChatController {
    manager: ConnectionManager,
    state: Arc<watch::Sender<UiState>>,
    lifecycle: Mutex<Option<JoinHandle<()>>>,
    watchers: Vec<JoinHandle<()>>,
}

fn apply(state: &watch::Sender<UiState>, update: UiUpdate) {
    state.send_modify(|current| *current = reduce(current, update));
}

fn forward_watch<T, F>(
    mut receiver: watch::Receiver<T>,
    state: Arc<watch::Sender<UiState>>,
    to_update: F,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> UiUpdate + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let value = receiver.borrow_and_update().clone();
            apply(&state, to_update(value));
            if receiver.changed().await.is_err() {
                break;
            }
        }
    })
}

fn forward_errors(
    mut receiver: broadcast::Receiver<String>,
    state: Arc<watch::Sender<UiState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(message) => apply(&state, UiUpdate::ErrorNotified(message)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} error notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

impl ChatController {
    pub fn new(manager: ConnectionManager) -> Self {
        let (state, _) = watch::channel(UiState::default());
        let state = Arc::new(state);
        let discovery = manager.discovery();

        let watchers = vec![
            forward_watch(discovery.watch_scanned(), state.clone(), UiUpdate::ScannedDevices),
            forward_watch(discovery.watch_paired(), state.clone(), UiUpdate::PairedDevices),
            forward_watch(manager.watch_connected(), state.clone(), UiUpdate::LinkConnected),
            forward_errors(manager.errors(), state.clone()),
        ];

        Self {
            manager,
            state,
            lifecycle: Mutex::new(None),
            watchers,
        }
    }

    pub fn state(&self) -> UiState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<UiState> {
        self.state.subscribe()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn start_scan(&self) {
        self.manager.discovery().start_scan();
    }

    pub fn stop_scan(&self) {
        self.manager.discovery().stop_scan();
    }

    pub fn connect_to_device(&self, peer: PeerDevice) {
        self.abort_lifecycle();
        apply(&self.state, UiUpdate::ConnectingStarted);
        let events = self.manager.connect(peer);
        self.follow(events);
    }

    pub fn wait_for_incoming(&self) {
        self.abort_lifecycle();
        apply(&self.state, UiUpdate::ConnectingStarted);
        let events = self.manager.start_server();
        self.follow(events);
    }

    pub fn disconnect(&self) {
        self.abort_lifecycle();
        self.manager.close_connection();
        apply(&self.state, UiUpdate::ConnectionEnded);
    }

    /// Send `text`; the local echo is appended whenever a session existed
    ///
    /// A failed write still echoes the message. The manager only logs it.
    pub async fn send_message(&self, text: &str) -> Option<ChatMessage> {
        let message = self.manager.send_message(text).await?;
        apply(&self.state, UiUpdate::MessageSent(message.clone()));
        Some(message)
    }

    pub fn dismiss_error(&self) {
        apply(&self.state, UiUpdate::ErrorDismissed);
    }

    /// Stop following the manager and release it
    pub fn release(&self) {
        self.abort_lifecycle();
        for watcher in &self.watchers {
            watcher.abort();
        }
        self.manager.release();
    }

    fn follow(&self, mut events: ConnectionEvents) {
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next_event().await {
                apply(&state, UiUpdate::Connection(event));
            }
            apply(&state, UiUpdate::ConnectionEnded);
        });
        *lock(&self.lifecycle) = Some(task);
    }

    fn abort_lifecycle(&self) {
        if let Some(task) = lock(&self.lifecycle).take() {
            task.abort();
        }
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.abort_lifecycle();
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

impl std::fmt::Debug for ChatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatController")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
