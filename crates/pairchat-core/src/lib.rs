//! PairChat core
//!
//! Point-to-point text chat between two devices over a stream transport.
//! One device hosts a listener on a well-known service UUID, the other
//! connects to it, and both exchange UTF-8 messages until either side closes.
//!
//! ## Architecture
//!
//! - [`discovery`] - scanned and paired peer snapshots
//! - [`session`] - framing and decoding over one live stream
//! - [`connection`] - the connection lifecycle state machine
//! - [`presentation`] - UI state reducer and controller
//! - [`platform`] - capability, radio, bond and notification collaborators
//! - [`transport`] - stream transports (TCP, in-memory)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pairchat_core::{ChatConfig, ConnectionManager, DiscoverySource, LocalPlatform};
//! use pairchat_core::transport::TcpTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let local = Arc::new(LocalPlatform::default());
//! let transport = Arc::new(TcpTransport::new("0.0.0.0:7878".parse()?));
//! let discovery = Arc::new(DiscoverySource::new(local.platform(transport)));
//! let manager = ConnectionManager::new(ChatConfig::default(), discovery)?;
//!
//! let mut events = manager.start_server();
//! while let Some(event) = events.next_event().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod connection;
pub mod discovery;
pub mod errors;
pub mod event;
pub mod platform;
pub mod presentation;
pub mod session;
pub mod transport;
pub mod types;
pub mod wire;

mod sync;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ChatConfig, ServiceRecord, SERVICE_NAME, SERVICE_UUID};
pub use connection::ConnectionManager;
pub use discovery::DiscoverySource;
pub use errors::{ChatError, ChatResult};
pub use event::{ConnectionEvent, ConnectionEvents, ManagerState};
pub use platform::{Capability, LocalPlatform, LocalPlatformConfig, Platform, PlatformEvent};
pub use presentation::{reduce, ChatController, UiState, UiUpdate};
pub use session::TransportSession;
pub use types::{ChatMessage, PeerDevice};
pub use wire::{WireCodec, WireFormat};
