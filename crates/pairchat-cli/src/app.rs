//! Application wiring and the interactive chat loop

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use pairchat_core::transport::{MemoryHub, StreamTransport, TcpTransport};
use pairchat_core::{
    ChatController, ConnectionEvent, ConnectionEvents, ConnectionManager, DiscoverySource,
    LocalPlatform, LocalPlatformConfig, PeerDevice, UiState,
};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

const QUIT_COMMAND: &str = "/quit";
const DEMO_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Which side of the connection this process plays
#[derive(Debug, Clone)]
pub enum ChatRole {
    Host,
    Join(PeerDevice),
}

// ----------------------------------------------------------------------------
// Chat Application
// ----------------------------------------------------------------------------

/// One device: local platform, manager and controller
pub struct ChatApp {
    local: Arc<LocalPlatform>,
    controller: ChatController,
}

impl ChatApp {
    /// Build the app over TCP using the configured bind address
    pub fn new(config: &AppConfig) -> Result<Self> {
        let transport = Arc::new(TcpTransport::new(config.device.bind_addr));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: &AppConfig, transport: Arc<dyn StreamTransport>) -> Result<Self> {
        let local = Arc::new(LocalPlatform::new(config.device.platform_config()));
        let discovery = Arc::new(DiscoverySource::new(local.platform(transport)));
        let manager = ConnectionManager::new(config.chat.clone(), discovery)?;
        Ok(Self {
            local,
            controller: ChatController::new(manager),
        })
    }

    pub fn local(&self) -> &Arc<LocalPlatform> {
        &self.local
    }

    pub fn controller(&self) -> &ChatController {
        &self.controller
    }

    /// Run one chat session over stdin/stdout until either side leaves
    pub async fn run_chat(&self, role: ChatRole) -> Result<()> {
        match role {
            ChatRole::Host => {
                if !self.controller.manager().ensure_radio_ready() {
                    warn!("Radio is not enabled");
                }
                println!("Waiting for a peer to connect...");
                self.controller.wait_for_incoming();
            }
            ChatRole::Join(peer) => {
                println!("Connecting to {}...", peer.display_name());
                self.controller.connect_to_device(peer);
            }
        }

        let result = self.chat_loop().await;
        self.controller.disconnect();
        result
    }

    async fn chat_loop(&self) -> Result<()> {
        let mut states = self.controller.watch_state();
        let mut input = BufReader::new(tokio::io::stdin()).lines();
        let mut printed = 0;
        let mut was_connected = false;

        loop {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let state = states.borrow_and_update().clone();
                    printed = print_new_messages(&state, printed);

                    if let Some(error) = &state.error_message {
                        eprintln!("! {}", error);
                        self.controller.dismiss_error();
                    }
                    if state.is_connected && !was_connected {
                        was_connected = true;
                        let peer = state
                            .current_connected_device
                            .as_ref()
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "peer".to_string());
                        println!("Connected to {}. Type {} to leave.", peer, QUIT_COMMAND);
                    }
                    if !state.is_connected && !state.is_connecting {
                        if was_connected {
                            println!("Disconnected");
                            return Ok(());
                        }
                        return Err(CliError::Connection("no connection was established".to_string()));
                    }
                }
                line = input.next_line() => {
                    let Some(line) = line? else {
                        debug!("Input closed");
                        return Ok(());
                    };
                    let text = line.trim();
                    if text == QUIT_COMMAND {
                        return Ok(());
                    }
                    if text.is_empty() {
                        continue;
                    }
                    if self.controller.send_message(text).await.is_none() {
                        println!("(not connected, message not sent)");
                    }
                }
            }
        }
    }

    /// Print paired peers, then scan for `scan_secs` when a radio is available
    pub async fn list_peers(&self, scan_secs: u64) -> Result<()> {
        let discovery = self.controller.manager().discovery();
        let paired = discovery.paired_devices();
        println!("Paired peers ({}):", paired.len());
        for peer in &paired {
            println!("  {}", peer);
        }

        if scan_secs > 0 {
            self.scan(Duration::from_secs(scan_secs)).await?;
            let scanned = discovery.scanned_devices();
            println!("Nearby peers ({}):", scanned.len());
            for peer in &scanned {
                println!("  {}", peer);
            }
        }
        Ok(())
    }

    #[cfg(feature = "ble")]
    async fn scan(&self, duration: Duration) -> Result<()> {
        use pairchat_core::platform::ble::BleScanner;

        let scanner = BleScanner::initialize().await?;
        self.controller.start_scan();
        let sightings = scanner.scan(&self.local, duration).await?;
        self.controller.stop_scan();
        debug!("{} sightings during scan", sightings);
        Ok(())
    }

    #[cfg(not(feature = "ble"))]
    async fn scan(&self, _duration: Duration) -> Result<()> {
        Err(CliError::FeatureNotAvailable(
            "scanning requires the `ble` feature".to_string(),
        ))
    }

    pub fn release(&self) {
        self.controller.release();
    }
}

fn print_new_messages(state: &UiState, printed: usize) -> usize {
    for message in state.messages.iter().skip(printed) {
        if !message.originated_locally {
            println!("{}: {}", message.sender_label, message.body);
        }
    }
    state.messages.len()
}

// ----------------------------------------------------------------------------
// Demo
// ----------------------------------------------------------------------------

fn demo_device(config: &AppConfig, hub: &MemoryHub, me: &PeerDevice, other: &PeerDevice) -> Result<ConnectionManager> {
    let local = Arc::new(LocalPlatform::new(LocalPlatformConfig {
        device_name: me.name().map(str::to_string),
        bonded: vec![other.clone()],
        ..Default::default()
    }));
    let transport = Arc::new(hub.transport(me.clone()));
    let discovery = Arc::new(DiscoverySource::new(local.platform(transport)));
    Ok(ConnectionManager::new(config.chat.clone(), discovery)?)
}

async fn next_event(events: &mut ConnectionEvents) -> Result<ConnectionEvent> {
    tokio::time::timeout(DEMO_STEP_TIMEOUT, events.next_event())
        .await
        .map_err(|_| CliError::Connection("timed out waiting for the peer".to_string()))?
        .ok_or_else(|| CliError::Connection("connection ended early".to_string()))
}

fn print_event(device: &str, event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Established(Some(peer)) => println!("[{}] connected to {}", device, peer),
        ConnectionEvent::Established(None) => println!("[{}] connected", device),
        ConnectionEvent::MessageReceived(message) => {
            println!("[{}] {}: {}", device, message.sender_label, message.body)
        }
        ConnectionEvent::Error(reason) => println!("[{}] error: {}", device, reason),
    }
}

/// Two in-process devices: Alpha hosts, Beta connects, they trade messages
pub async fn run_demo(config: &AppConfig, messages: usize) -> Result<()> {
    let hub = MemoryHub::new();
    let alpha_id = PeerDevice::named("Alpha", "alpha");
    let beta_id = PeerDevice::named("Beta", "beta");
    let alpha = demo_device(config, &hub, &alpha_id, &beta_id)?;
    let beta = demo_device(config, &hub, &beta_id, &alpha_id)?;

    let mut hosted = alpha.start_server();
    tokio::time::timeout(DEMO_STEP_TIMEOUT, async {
        while hub.listener_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| CliError::Connection("Alpha never started listening".to_string()))?;
    info!("Alpha is {}", alpha.state());

    let mut joined = beta.connect(alpha_id.clone());
    print_event("Beta", &next_event(&mut joined).await?);
    print_event("Alpha", &next_event(&mut hosted).await?);

    // Lockstep so read-boundary framing never merges two messages
    for round in 1..=messages {
        beta.send_message(&format!("hello #{}", round)).await;
        print_event("Alpha", &next_event(&mut hosted).await?);

        alpha.send_message(&format!("got #{}", round)).await;
        print_event("Beta", &next_event(&mut joined).await?);
    }

    beta.close_connection();
    while let Some(event) = hosted.next_event().await {
        print_event("Alpha", &event);
    }
    while joined.next_event().await.is_some() {}
    println!("Alpha is {}, Beta is {}", alpha.state(), beta.state());

    alpha.release();
    beta.release();
    Ok(())
}
