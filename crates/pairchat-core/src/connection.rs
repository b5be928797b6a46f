//! Connection Manager
//!
//! Owns the listener and the peer socket and drives one connection through
//! `Idle -> Listening | Connecting -> Connected -> Closing -> Idle`.
//!
//! `start_server` and `connect` do not return a result. They return a
//! [`ConnectionEvents`] stream fed by a background task, which emits
//! `Established`, then one `MessageReceived` per inbound frame, or an `Error`.
//! Every lifecycle ends with the same teardown: handles closed and cleared,
//! state back to `Idle`, paired snapshot refreshed. The stream ends only after
//! teardown has run.
//!
//! Cancellation is closure-driven. `close_connection` fires the close signal
//! of the listener or socket, and whatever accept, connect, read or write is
//! pending fails with an I/O error, which ends the lifecycle.
//!
//! Each lifecycle carries a generation number. A new `start_server` or
//! `connect` closes the previous lifecycle's handles, and a lifecycle only
//! installs or tears down handles of its own generation, so at most one peer
//! socket is ever registered. Lifecycle tasks also run one at a time: a new
//! one opens nothing until the previous one has torn down.

use std::io;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::discovery::DiscoverySource;
use crate::errors::{ChatError, ChatResult};
use crate::event::{ConnectionEvent, ConnectionEvents, ManagerState};
use crate::platform::{
    BondStore, Capability, EventKind, ObserverId, Platform, PlatformEvent, PlatformObserver,
};
use crate::session::{CloseSignal, TransportSession};
use crate::sync::lock;
use crate::types::{ChatMessage, PeerDevice};
use crate::wire::WireCodec;

// ----------------------------------------------------------------------------
// Link-state Observer
// ----------------------------------------------------------------------------

/// Mirrors platform link changes of bonded peers into the connected flag
struct LinkStateObserver {
    bonds: Arc<dyn BondStore>,
    connected: Arc<watch::Sender<bool>>,
    errors: broadcast::Sender<String>,
}

impl PlatformObserver for LinkStateObserver {
    fn on_event(&self, event: &PlatformEvent) {
        let PlatformEvent::LinkStateChanged { peer, connected } = event else {
            return;
        };
        debug!("Link state of {} is now {}", peer, connected);

        if self.bonds.bonded_peers().contains(peer) {
            self.connected.send_replace(*connected);
        } else {
            warn!("Link change from unbonded peer {}", peer);
            let _ = self.errors.send(
                ChatError::UnbondedPeerConnection {
                    address: peer.address().to_string(),
                }
                .to_string(),
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Handle Slots
// ----------------------------------------------------------------------------

/// Handles owned by the manager; only this module mutates them
#[derive(Default)]
struct Slots {
    generation: u64,
    cancelled: bool,
    listener: Option<CloseSignal>,
    socket: Option<CloseSignal>,
    session: Option<Arc<TransportSession>>,
}

impl Slots {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && !self.cancelled
    }

    fn has_handles(&self) -> bool {
        self.listener.is_some() || self.socket.is_some()
    }

    fn close_all(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.close();
        }
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.session = None;
    }
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// Orchestrates discovery, connect, transfer and teardown for one peer
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ChatConfig,
    platform: Platform,
    discovery: Arc<DiscoverySource>,
    slots: Mutex<Slots>,
    // Held by the running lifecycle task until its teardown is done
    running: tokio::sync::Mutex<()>,
    state: watch::Sender<ManagerState>,
    connected: Arc<watch::Sender<bool>>,
    errors: broadcast::Sender<String>,
    link_observer: Mutex<Option<ObserverId>>,
}

impl ConnectionManager {
    /// Create a manager and register for link-state notifications
    pub fn new(config: ChatConfig, discovery: Arc<DiscoverySource>) -> ChatResult<Self> {
        config.validate()?;

        let platform = discovery.platform().clone();
        let errors = discovery.error_sender();
        let (state, _) = watch::channel(ManagerState::Idle);
        let (connected, _) = watch::channel(false);
        let connected = Arc::new(connected);

        let link_observer = platform.events.subscribe(
            EventKind::LinkState,
            Arc::new(LinkStateObserver {
                bonds: platform.bonds.clone(),
                connected: connected.clone(),
                errors: errors.clone(),
            }),
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                platform,
                discovery,
                slots: Mutex::new(Slots::default()),
                running: tokio::sync::Mutex::new(()),
                state,
                connected,
                errors,
                link_observer: Mutex::new(Some(link_observer)),
            }),
        })
    }

    /// Host a connection on the well-known service
    ///
    /// Without the connect capability nothing is opened and the returned
    /// stream is already finished. Must be called within a Tokio runtime.
    pub fn start_server(&self) -> ConnectionEvents {
        if !self.inner.platform.has_permission(Capability::Connect) {
            warn!(
                "{}, not starting server",
                ChatError::CapabilityDenied {
                    capability: Capability::Connect
                }
            );
            return ConnectionEvents::finished();
        }

        let (sender, events) = ConnectionEvents::channel(self.inner.config.event_buffer_size);
        let generation = self.inner.begin_lifecycle(ManagerState::Listening);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _running = inner.running.lock().await;
            inner.serve(generation, &sender).await;
            inner.teardown(generation);
        });
        events
    }

    /// Connect to `peer` on the well-known service
    ///
    /// Cancels any running scan first. Without the connect capability nothing
    /// is opened and the returned stream is already finished. Must be called
    /// within a Tokio runtime.
    pub fn connect(&self, peer: PeerDevice) -> ConnectionEvents {
        if !self.inner.platform.has_permission(Capability::Connect) {
            warn!(
                "{}, not connecting to {}",
                ChatError::CapabilityDenied {
                    capability: Capability::Connect
                },
                peer
            );
            return ConnectionEvents::finished();
        }

        let (sender, events) = ConnectionEvents::channel(self.inner.config.event_buffer_size);
        let generation = self.inner.begin_lifecycle(ManagerState::Connecting);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _running = inner.running.lock().await;
            inner.dial(generation, peer, &sender).await;
            inner.teardown(generation);
        });
        events
    }

    /// Send `text` to the connected peer
    ///
    /// Returns `None` when there is nothing to send through (no session, or
    /// the connect capability is missing). Otherwise returns the local message
    /// for echoing into the caller's log, even if the write failed.
    pub async fn send_message(&self, text: &str) -> Option<ChatMessage> {
        if !self.inner.platform.has_permission(Capability::Connect) {
            return None;
        }
        let session = lock(&self.inner.slots).session.clone()?;

        let sender_label = self
            .inner
            .platform
            .radio
            .local_name()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.inner.config.fallback_sender_name.clone());
        let message = ChatMessage::local(sender_label, text);

        if !session.send(&message).await {
            warn!("Message could not be written to the peer");
        }
        Some(message)
    }

    /// Close the listener and peer socket, whichever are open
    ///
    /// Idempotent and safe from any state.
    pub fn close_connection(&self) {
        self.inner.close_connection();
    }

    /// Ask the host to power the radio and make this device discoverable
    ///
    /// Returns whether the radio reports enabled afterwards.
    pub fn ensure_radio_ready(&self) -> bool {
        let radio = &self.inner.platform.radio;
        if !radio.is_enabled() {
            info!("Requesting radio enable");
            radio.request_enable();
        }
        if self.inner.platform.has_permission(Capability::Advertise) {
            radio.request_discoverable(self.inner.config.discoverable_duration_secs);
        }
        radio.is_enabled()
    }

    /// Unregister platform observers and close the connection
    pub fn release(&self) {
        if let Some(id) = lock(&self.inner.link_observer).take() {
            self.inner.platform.events.unsubscribe(id);
        }
        self.inner.discovery.release();
        self.inner.close_connection();
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ManagerState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// One-shot advisory error notifications
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.inner.errors.subscribe()
    }

    pub fn discovery(&self) -> &Arc<DiscoverySource> {
        &self.inner.discovery
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    pub fn has_open_listener(&self) -> bool {
        lock(&self.inner.slots).listener.is_some()
    }

    pub fn has_open_socket(&self) -> bool {
        lock(&self.inner.slots).socket.is_some()
    }

    /// Peer of the live session, if any
    pub fn connected_peer(&self) -> Option<PeerDevice> {
        lock(&self.inner.slots)
            .session
            .as_ref()
            .and_then(|session| session.peer().cloned())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

impl ManagerInner {
    fn codec(&self) -> WireCodec {
        WireCodec::new(
            self.config.wire_format,
            self.config.read_buffer_size,
            self.config.max_frame_len,
        )
    }

    fn begin_lifecycle(&self, state: ManagerState) -> u64 {
        let mut slots = lock(&self.slots);
        if slots.has_handles() {
            warn!("Closing the previous connection before starting a new one");
            slots.close_all();
        }
        slots.generation += 1;
        slots.cancelled = false;
        self.state.send_replace(state);
        slots.generation
    }

    fn close_connection(&self) {
        let mut slots = lock(&self.slots);
        let had_handles = slots.has_handles();
        slots.close_all();
        slots.cancelled = true;
        if *self.state.borrow() != ManagerState::Idle {
            self.state.send_replace(ManagerState::Closing);
        }
        if had_handles {
            info!("Connection closed");
        }
    }

    fn install_listener(&self, generation: u64, listener: &CloseSignal) -> bool {
        let mut slots = lock(&self.slots);
        if !slots.is_current(generation) {
            return false;
        }
        slots.listener = Some(listener.clone());
        true
    }

    fn retire_listener(&self, generation: u64) {
        let mut slots = lock(&self.slots);
        if slots.generation == generation {
            if let Some(listener) = slots.listener.take() {
                listener.close();
            }
        }
    }

    fn install_socket(&self, generation: u64, socket: &CloseSignal) -> bool {
        let mut slots = lock(&self.slots);
        if !slots.is_current(generation) {
            return false;
        }
        slots.socket = Some(socket.clone());
        true
    }

    fn discard_socket(&self, generation: u64) {
        let mut slots = lock(&self.slots);
        if slots.generation == generation {
            if let Some(socket) = slots.socket.take() {
                socket.close();
            }
        }
    }

    fn install_session(
        &self,
        generation: u64,
        socket: &CloseSignal,
        session: Arc<TransportSession>,
    ) -> bool {
        let mut slots = lock(&self.slots);
        if !slots.is_current(generation) {
            return false;
        }
        slots.socket = Some(socket.clone());
        slots.session = Some(session);
        self.state.send_replace(ManagerState::Connected);
        self.connected.send_replace(true);
        true
    }

    fn teardown(&self, generation: u64) {
        {
            let mut slots = lock(&self.slots);
            if slots.generation == generation {
                slots.close_all();
                self.state.send_replace(ManagerState::Idle);
                self.connected.send_replace(false);
            }
        }
        self.discovery.refresh_paired();
        debug!("Lifecycle {} torn down", generation);
    }

    async fn serve(&self, generation: u64, events: &mpsc::Sender<ConnectionEvent>) {
        let service = self.config.service_record();
        let mut listener = match self.platform.transport.listen(&service).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to open listener for {}: {}", service.name, e);
                return;
            }
        };
        let listener_closed = CloseSignal::new();
        if !self.install_listener(generation, &listener_closed) {
            debug!("Server cancelled before listening");
            return;
        }
        info!("Listening for {} ({})", service.name, service.uuid);

        let accepted = tokio::select! {
            biased;
            _ = listener_closed.closed() => {
                debug!("Listener closed while accepting");
                return;
            }
            _ = events.closed() => {
                debug!("Event consumer went away while accepting");
                return;
            }
            accepted = listener.accept() => accepted,
        };

        // One connection per server lifetime; the listener retires on accept
        drop(listener);
        self.retire_listener(generation);

        let accepted = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                return;
            }
        };
        match &accepted.peer {
            Some(peer) => info!("Connection established with {}", peer),
            None => info!("Connection established with an unknown peer"),
        }

        let socket_closed = CloseSignal::new();
        let session = Arc::new(TransportSession::new(
            accepted.stream,
            accepted.peer.clone(),
            self.codec(),
            &self.config.fallback_sender_name,
            socket_closed.clone(),
        ));
        if !self.install_session(generation, &socket_closed, session.clone()) {
            debug!("Server cancelled before the session started");
            return;
        }
        if events
            .send(ConnectionEvent::Established(accepted.peer))
            .await
            .is_err()
        {
            return;
        }
        self.relay(session, &socket_closed, events).await;
    }

    async fn dial(&self, generation: u64, peer: PeerDevice, events: &mpsc::Sender<ConnectionEvent>) {
        // Discovery and connecting share the radio
        self.discovery.stop_scan();

        let socket_closed = CloseSignal::new();
        if !self.install_socket(generation, &socket_closed) {
            debug!("Connect cancelled before dialing");
            return;
        }
        info!("Connecting to {}", peer);

        let service = self.config.service_record();
        let connected = tokio::select! {
            biased;
            _ = socket_closed.closed() => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connect cancelled",
            )),
            result = timeout(
                self.config.connection_timeout(),
                self.platform.transport.connect(peer.address(), &service),
            ) => result.unwrap_or_else(|_| Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            ))),
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                let interrupted = ChatError::connection_interrupted();
                error!("{} ({}): {}", interrupted, peer, e);
                self.discard_socket(generation);
                let _ = events
                    .send(ConnectionEvent::Error(interrupted.to_string()))
                    .await;
                return;
            }
        };
        info!("Connected to {}", peer);

        let session = Arc::new(TransportSession::new(
            stream,
            Some(peer.clone()),
            self.codec(),
            &self.config.fallback_sender_name,
            socket_closed.clone(),
        ));
        if !self.install_session(generation, &socket_closed, session.clone()) {
            debug!("Connect cancelled before the session started");
            return;
        }
        if events
            .send(ConnectionEvent::Established(Some(peer)))
            .await
            .is_err()
        {
            return;
        }
        self.relay(session, &socket_closed, events).await;
    }

    /// Forward session messages as lifecycle events until either side stops
    async fn relay(
        &self,
        session: Arc<TransportSession>,
        closed: &CloseSignal,
        events: &mpsc::Sender<ConnectionEvent>,
    ) {
        let messages = session.receive_messages();
        tokio::pin!(messages);

        loop {
            let next = tokio::select! {
                biased;
                _ = events.closed() => {
                    debug!("Event consumer went away");
                    return;
                }
                next = messages.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    // Closing the socket abandons an undelivered message
                    let delivered = tokio::select! {
                        biased;
                        _ = closed.closed() => false,
                        sent = events.send(ConnectionEvent::MessageReceived(message)) => sent.is_ok(),
                    };
                    if !delivered {
                        return;
                    }
                }
                Some(Err(e)) => {
                    debug!("Transfer ended: {}", e);
                    return;
                }
                None => {
                    info!("Peer disconnected");
                    return;
                }
            }
        }
    }
}
