//! Connection lifecycle tests
//!
//! Two devices share an in-memory hub (or loopback TCP) and drive full
//! server/connect lifecycles through the public API.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pairchat_core::transport::{
    Accepted, ByteStream, MemoryHub, ServiceListener, StreamTransport, TcpTransport,
};
use pairchat_core::*;

const STEP: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

struct Device {
    id: PeerDevice,
    local: Arc<LocalPlatform>,
    manager: ConnectionManager,
}

fn device(hub: &MemoryHub, name: &str, address: &str, config: ChatConfig) -> Device {
    let id = PeerDevice::named(name, address);
    let local = Arc::new(LocalPlatform::new(LocalPlatformConfig {
        device_name: Some(name.to_string()),
        ..Default::default()
    }));
    let transport = Arc::new(hub.transport(id.clone()));
    let discovery = Arc::new(DiscoverySource::new(local.platform(transport)));
    let manager = ConnectionManager::new(config, discovery).unwrap();
    Device { id, local, manager }
}

fn pair(config: ChatConfig) -> (MemoryHub, Device, Device) {
    let hub = MemoryHub::new();
    let alpha = device(&hub, "Alpha", "alpha", config.clone());
    let beta = device(&hub, "Beta", "beta", config);
    alpha.local.add_bond(beta.id.clone());
    beta.local.add_bond(alpha.id.clone());
    (hub, alpha, beta)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(STEP, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next(events: &mut ConnectionEvents) -> Option<ConnectionEvent> {
    tokio::time::timeout(STEP, events.next_event())
        .await
        .expect("no event in time")
}

async fn expect_message(events: &mut ConnectionEvents) -> ChatMessage {
    match next(events).await {
        Some(ConnectionEvent::MessageReceived(message)) => message,
        other => panic!("expected a message, got {:?}", other),
    }
}

/// Alpha hosts, Beta connects; returns both event streams once established
async fn connect_pair(
    hub: &MemoryHub,
    alpha: &Device,
    beta: &Device,
) -> (ConnectionEvents, ConnectionEvents) {
    let mut hosted = alpha.manager.start_server();
    wait_until(|| hub.listener_count() == 1).await;
    assert_eq!(alpha.manager.state(), ManagerState::Listening);

    let mut joined = beta.manager.connect(alpha.id.clone());
    assert_eq!(
        next(&mut joined).await,
        Some(ConnectionEvent::Established(Some(alpha.id.clone())))
    );
    assert_eq!(
        next(&mut hosted).await,
        Some(ConnectionEvent::Established(Some(beta.id.clone())))
    );
    (hosted, joined)
}

// ----------------------------------------------------------------------------
// End-to-end
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_host_receives_messages_until_peer_closes() {
    let (hub, alpha, beta) = pair(ChatConfig::default());
    let (mut hosted, mut joined) = connect_pair(&hub, &alpha, &beta).await;

    assert_eq!(alpha.manager.state(), ManagerState::Connected);
    assert!(alpha.manager.is_connected());
    assert_eq!(hub.listener_count(), 0);
    assert!(!alpha.manager.has_open_listener());

    for body in ["one", "two", "three"] {
        let sent = beta.manager.send_message(body).await.unwrap();
        assert!(sent.originated_locally);

        let received = expect_message(&mut hosted).await;
        assert_eq!(received.body, body);
        assert_eq!(received.sender_label, "Beta");
        assert!(!received.originated_locally);
    }

    let reply = alpha.manager.send_message("welcome").await.unwrap();
    assert_eq!(reply.sender_label, "Alpha");
    assert_eq!(expect_message(&mut joined).await.body, "welcome");

    let queries = alpha.local.bond_queries();
    beta.manager.close_connection();

    assert_eq!(next(&mut hosted).await, None);
    assert_eq!(alpha.manager.state(), ManagerState::Idle);
    assert!(!alpha.manager.is_connected());
    assert!(!alpha.manager.has_open_socket());
    assert_eq!(alpha.local.bond_queries(), queries + 1);

    assert_eq!(next(&mut joined).await, None);
    assert_eq!(beta.manager.state(), ManagerState::Idle);
}

#[tokio::test]
async fn test_length_prefixed_burst_keeps_boundaries() {
    let config = ChatConfig::default().with_wire_format(WireFormat::LengthPrefixed);
    let (hub, alpha, beta) = pair(config);
    let (mut hosted, _joined) = connect_pair(&hub, &alpha, &beta).await;

    let bodies: Vec<String> = (0..20).map(|i| format!("burst #{} with a # inside", i)).collect();
    for body in &bodies {
        assert!(beta.manager.send_message(body).await.is_some());
    }

    for body in &bodies {
        let received = expect_message(&mut hosted).await;
        assert_eq!(&received.body, body);
        assert_eq!(received.sender_label, "Beta");
    }
}

#[tokio::test]
async fn test_host_close_ends_both_sides() {
    let (hub, alpha, beta) = pair(ChatConfig::default());
    let (mut hosted, mut joined) = connect_pair(&hub, &alpha, &beta).await;

    alpha.manager.close_connection();
    alpha.manager.close_connection();

    assert_eq!(next(&mut hosted).await, None);
    assert_eq!(next(&mut joined).await, None);
    assert_eq!(alpha.manager.state(), ManagerState::Idle);
    assert_eq!(beta.manager.state(), ManagerState::Idle);
    assert_eq!(beta.manager.send_message("late").await, None);
}

#[tokio::test]
async fn test_chat_over_loopback_tcp() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let host_local = Arc::new(LocalPlatform::default());
    let host = ConnectionManager::new(
        ChatConfig::default(),
        Arc::new(DiscoverySource::new(
            host_local.platform(Arc::new(TcpTransport::new(addr))),
        )),
    )
    .unwrap();

    let guest_local = Arc::new(LocalPlatform::new(LocalPlatformConfig {
        device_name: Some("Guest".to_string()),
        ..Default::default()
    }));
    let guest = ConnectionManager::new(
        ChatConfig::default(),
        Arc::new(DiscoverySource::new(
            guest_local.platform(Arc::new(TcpTransport::new("127.0.0.1:0".parse().unwrap()))),
        )),
    )
    .unwrap();

    let mut hosted = host.start_server();
    wait_until(|| host.has_open_listener()).await;

    let mut joined = guest.connect(PeerDevice::new(addr.to_string()));
    assert!(matches!(
        next(&mut joined).await,
        Some(ConnectionEvent::Established(Some(_)))
    ));
    assert!(matches!(
        next(&mut hosted).await,
        Some(ConnectionEvent::Established(Some(_)))
    ));

    guest.send_message("over tcp").await.unwrap();
    let received = expect_message(&mut hosted).await;
    assert_eq!(received.sender_label, "Guest");
    assert_eq!(received.body, "over tcp");

    guest.close_connection();
    assert_eq!(next(&mut hosted).await, None);
    assert_eq!(host.state(), ManagerState::Idle);
}

// ----------------------------------------------------------------------------
// Failure Paths
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_without_listener_reports_interruption_once() {
    let (_hub, alpha, beta) = pair(ChatConfig::default());
    let queries = beta.local.bond_queries();

    let mut joined = beta.manager.connect(alpha.id.clone());
    assert_eq!(
        next(&mut joined).await,
        Some(ConnectionEvent::Error("Connection was interrupted".to_string()))
    );
    assert_eq!(next(&mut joined).await, None);

    assert_eq!(beta.manager.state(), ManagerState::Idle);
    assert!(!beta.manager.has_open_socket());
    assert_eq!(beta.local.bond_queries(), queries + 1);
}

#[tokio::test]
async fn test_connect_cancels_running_scan() {
    let (_hub, alpha, beta) = pair(ChatConfig::default());
    beta.manager.discovery().start_scan();
    assert!(beta.local.is_discovering());

    let mut joined = beta.manager.connect(alpha.id.clone());
    while next(&mut joined).await.is_some() {}
    assert!(!beta.local.is_discovering());
    assert!(!beta.manager.discovery().is_scanning());
}

#[tokio::test]
async fn test_close_while_listening_tears_down_once() {
    let (hub, alpha, _beta) = pair(ChatConfig::default());
    let queries = alpha.local.bond_queries();

    let mut hosted = alpha.manager.start_server();
    wait_until(|| alpha.manager.has_open_listener()).await;
    alpha.manager.close_connection();

    assert_eq!(next(&mut hosted).await, None);
    assert_eq!(alpha.manager.state(), ManagerState::Idle);
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(alpha.local.bond_queries(), queries + 1);
}

#[tokio::test]
async fn test_dropping_events_cancels_lifecycle() {
    let (hub, alpha, _beta) = pair(ChatConfig::default());

    let hosted = alpha.manager.start_server();
    wait_until(|| hub.listener_count() == 1).await;
    drop(hosted);

    wait_until(|| alpha.manager.state() == ManagerState::Idle).await;
    assert_eq!(hub.listener_count(), 0);
    assert!(!alpha.manager.has_open_listener());
}

// ----------------------------------------------------------------------------
// Transport Failures
// ----------------------------------------------------------------------------

/// Transport whose listener fails on `listen` or on `accept`
struct FailingTransport {
    fail_listen: bool,
}

struct FailingListener;

#[async_trait]
impl ServiceListener for FailingListener {
    async fn accept(&mut self) -> io::Result<Accepted> {
        Err(io::Error::new(io::ErrorKind::ConnectionAborted, "radio went away"))
    }
}

#[async_trait]
impl StreamTransport for FailingTransport {
    async fn listen(&self, _service: &ServiceRecord) -> io::Result<Box<dyn ServiceListener>> {
        if self.fail_listen {
            Err(io::Error::new(io::ErrorKind::AddrInUse, "service busy"))
        } else {
            Ok(Box::new(FailingListener))
        }
    }

    async fn connect(
        &self,
        _address: &str,
        _service: &ServiceRecord,
    ) -> io::Result<Box<dyn ByteStream>> {
        Err(io::Error::from(io::ErrorKind::ConnectionRefused))
    }
}

fn failing_device(fail_listen: bool) -> (Arc<LocalPlatform>, ConnectionManager) {
    let local = Arc::new(LocalPlatform::new(LocalPlatformConfig {
        device_name: Some("Alpha".to_string()),
        ..Default::default()
    }));
    let transport = Arc::new(FailingTransport { fail_listen });
    let discovery = Arc::new(DiscoverySource::new(local.platform(transport)));
    let manager = ConnectionManager::new(ChatConfig::default(), discovery).unwrap();
    (local, manager)
}

async fn assert_server_ends_quietly(fail_listen: bool) {
    let (local, manager) = failing_device(fail_listen);
    let queries = local.bond_queries();

    let mut hosted = manager.start_server();
    assert_eq!(next(&mut hosted).await, None);
    assert_eq!(manager.state(), ManagerState::Idle);
    assert!(!manager.has_open_listener());
    assert!(!manager.has_open_socket());
    assert!(!manager.is_connected());
    assert_eq!(local.bond_queries(), queries + 1);
}

#[tokio::test]
async fn test_accept_failure_tears_down_once() {
    assert_server_ends_quietly(false).await;
}

#[tokio::test]
async fn test_listen_failure_tears_down_once() {
    assert_server_ends_quietly(true).await;
}

// ----------------------------------------------------------------------------
// Gating
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_without_session_is_benign() {
    let (_hub, alpha, _beta) = pair(ChatConfig::default());
    assert_eq!(alpha.manager.send_message("nobody").await, None);
}

#[tokio::test]
async fn test_send_uses_fallback_label_without_device_name() {
    let (hub, alpha, beta) = pair(ChatConfig::default().with_fallback_sender_name("Someone"));
    beta.local.set_device_name(None);
    let (mut hosted, _joined) = connect_pair(&hub, &alpha, &beta).await;

    let sent = beta.manager.send_message("anonymous").await.unwrap();
    assert_eq!(sent.sender_label, "Someone");
    assert_eq!(expect_message(&mut hosted).await.sender_label, "Someone");
}

#[tokio::test]
async fn test_denied_connect_capability_opens_nothing() {
    let (hub, alpha, beta) = pair(ChatConfig::default());
    alpha.local.revoke(Capability::Connect);
    beta.local.revoke(Capability::Connect);

    let mut hosted = alpha.manager.start_server();
    assert_eq!(next(&mut hosted).await, None);
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(alpha.manager.state(), ManagerState::Idle);

    let mut joined = beta.manager.connect(alpha.id.clone());
    assert_eq!(next(&mut joined).await, None);
    assert!(!beta.manager.has_open_socket());
    assert_eq!(beta.manager.send_message("hi").await, None);
}

#[tokio::test]
async fn test_denied_scan_capability_is_noop() {
    let (_hub, alpha, _beta) = pair(ChatConfig::default());
    alpha.local.revoke(Capability::Scan);

    alpha.manager.discovery().start_scan();
    alpha.manager.discovery().stop_scan();
    assert!(!alpha.local.is_discovering());
}

// ----------------------------------------------------------------------------
// Single Active Connection
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_new_server_supersedes_previous_one() {
    let (hub, alpha, beta) = pair(ChatConfig::default());

    let mut first = alpha.manager.start_server();
    wait_until(|| hub.listener_count() == 1).await;

    let mut second = alpha.manager.start_server();
    assert_eq!(next(&mut first).await, None);
    wait_until(|| alpha.manager.has_open_listener()).await;
    assert_eq!(hub.listener_count(), 1);
    assert_eq!(alpha.manager.state(), ManagerState::Listening);

    let mut joined = beta.manager.connect(alpha.id.clone());
    assert!(matches!(next(&mut joined).await, Some(ConnectionEvent::Established(_))));
    assert!(matches!(next(&mut second).await, Some(ConnectionEvent::Established(_))));
    assert!(alpha.manager.has_open_socket());
}

#[tokio::test]
async fn test_connect_while_connected_drops_old_socket() {
    let hub = MemoryHub::new();
    let alpha = device(&hub, "Alpha", "alpha", ChatConfig::default());
    let beta = device(&hub, "Beta", "beta", ChatConfig::default());
    let gamma = device(&hub, "Gamma", "gamma", ChatConfig::default());

    let (mut alpha_hosted, mut beta_joined) = connect_pair(&hub, &alpha, &beta).await;

    let mut gamma_hosted = gamma.manager.start_server();
    wait_until(|| gamma.manager.has_open_listener()).await;

    let mut beta_rejoined = beta.manager.connect(gamma.id.clone());
    assert_eq!(next(&mut beta_joined).await, None);
    assert_eq!(next(&mut alpha_hosted).await, None);
    assert!(matches!(
        next(&mut beta_rejoined).await,
        Some(ConnectionEvent::Established(_))
    ));
    assert!(matches!(
        next(&mut gamma_hosted).await,
        Some(ConnectionEvent::Established(_))
    ));
    assert_eq!(beta.manager.state(), ManagerState::Connected);
    assert_eq!(beta.manager.connected_peer(), Some(gamma.id.clone()));
}

// ----------------------------------------------------------------------------
// Platform Notifications
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_link_state_tracks_bonded_peers_only() {
    let (_hub, alpha, beta) = pair(ChatConfig::default());
    let mut errors = alpha.manager.errors();

    alpha.local.emit(PlatformEvent::LinkStateChanged {
        peer: beta.id.clone(),
        connected: true,
    });
    assert!(alpha.manager.is_connected());

    alpha.local.emit(PlatformEvent::LinkStateChanged {
        peer: PeerDevice::new("stranger"),
        connected: false,
    });
    assert!(alpha.manager.is_connected());
    assert_eq!(
        errors.try_recv().unwrap(),
        "Attempted connection with an unbonded peer: stranger"
    );
}

#[tokio::test]
async fn test_release_unregisters_and_closes() {
    let (hub, alpha, _beta) = pair(ChatConfig::default());
    let mut hosted = alpha.manager.start_server();
    wait_until(|| alpha.manager.has_open_listener()).await;

    alpha.manager.release();
    assert_eq!(next(&mut hosted).await, None);
    assert_eq!(alpha.local.observer_count(), 0);
    assert_eq!(hub.listener_count(), 0);
}
