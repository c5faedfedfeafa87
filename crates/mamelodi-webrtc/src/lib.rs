//! Peer-to-peer session layer over a WebRTC signaling provider
//!
//! Opens a locally addressable peer identity, accepts and dials data
//! connections by peer id, and exchanges text messages with any number of
//! connected peers. The provider itself sits behind the [`Transport`] traits;
//! the application only sees [`SessionListener`] callbacks.
//!
//! # Overview
//!
//! - **Identity**: peer ids are namespaced on the provider by [`PeerIdCodec`]
//! - **Registry**: [`ConnectionRegistry`] holds exactly the peers whose connection is open
//! - **Errors**: provider errors are mapped to an [`ErrorDomain`] by the classifier
//! - **Session**: [`SessionManager`] ties it together; [`SessionService`] runs it on tokio
//!
//! # Example
//!
//! ```rust,no_run
//! use mamelodi_config::WebRtcConfig;
//! use mamelodi_webrtc::{ChannelListener, Message, MockNetwork, SessionManager, SessionService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = MockNetwork::new();
//!     let (listener, mut notifications) = ChannelListener::new();
//!     let (manager, events) = SessionManager::new(&WebRtcConfig::default(), network.factory(), listener);
//!     let (session, _task) = SessionService::spawn(manager, events);
//!
//!     session.open_for_connections("alice")?;
//!     session.connect_to("bob")?;
//!     session.send_message_to_all_peers(Message::chat("Sawubona")).await?;
//!
//!     while let Some(notification) = notifications.recv().await {
//!         println!("{:?}", notification);
//!     }
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod identity;
pub mod listener;
pub mod logging;
pub mod message;
pub mod mock;
pub mod registry;
pub mod service;
pub mod session;
pub mod transport;
pub mod types;

pub use classifier::{
    classify_connection_error, classify_dial_failure, classify_transport_error, ClassifiedError,
    ErrorDomain,
};
pub use identity::PeerIdCodec;
pub use listener::{
    ChannelListener, NotificationRx, ReportedError, SessionListener, SessionNotification,
};
pub use message::{Message, ReceivedMessage, ReceivedMessageType};
pub use mock::{MockConnection, MockNetwork, MockTransport, MockTransportFactory};
pub use registry::{ConnectionRegistry, PeerConnectionState};
pub use service::{SessionHandle, SessionService};
pub use session::{SessionError, SessionEventRx, SessionManager};
pub use transport::{
    ConnectionEvent, DataConnection, EventSink, ProviderError, SessionEvent, Transport,
    TransportError, TransportEvent, TransportFactory, TransportOptions,
};
pub use types::{ConnectedPeer, ConnectionMetadata, Direction, SessionState};
