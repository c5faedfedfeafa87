//! PeerJS-compatible transport for mamelodi-webrtc
//!
//! Registers the local wire id with a PeerJS signaling server over WebSocket
//! and opens WebRTC data channels to other peers on the same server. Plugs
//! into [`mamelodi_webrtc::SessionManager`] as a [`mamelodi_webrtc::TransportFactory`].
//!
//! # Example
//!
//! ```rust,no_run
//! use mamelodi_config::Config;
//! use mamelodi_peerjs::PeerJsTransportFactory;
//! use mamelodi_webrtc::{ChannelListener, SessionManager, SessionService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     mamelodi_webrtc::logging::init(config.logging.is_dev_mode());
//!
//!     let factory = PeerJsTransportFactory::new(config.signaling.clone());
//!     let (listener, mut notifications) = ChannelListener::new();
//!     let (manager, events) = SessionManager::new(&config.webrtc, factory, listener);
//!     let (session, _task) = SessionService::spawn(manager, events);
//!
//!     session.open_for_connections("alice")?;
//!     while let Some(notification) = notifications.recv().await {
//!         println!("{:?}", notification);
//!     }
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;
pub mod protocol;
mod socket;
pub mod transport;

pub use connection::PeerJsConnection;
pub use error::PeerJsError;
pub use protocol::{ClientMessage, ServerMessage};
pub use transport::{PeerJsTransport, PeerJsTransportFactory};

/// Server rejected our API key
pub const KIND_INVALID_KEY: &str = "invalid-key";
/// Server reported an error of its own
pub const KIND_SERVER_ERROR: &str = "server-error";
/// Signaling socket failed
pub const KIND_SOCKET_ERROR: &str = "socket-error";
/// Signaling socket closed under us
pub const KIND_SOCKET_CLOSED: &str = "socket-closed";
/// WebRTC negotiation or channel failure
pub const KIND_WEBRTC: &str = "webrtc";
/// Queued payload could not be written to the channel
pub const KIND_SEND_FAILED: &str = "send-failed";
/// Remote offered a serialization other than `json`
pub const KIND_UNSUPPORTED_SERIALIZATION: &str = "unsupported-serialization";
