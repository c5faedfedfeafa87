//! Transport abstraction
//!
//! Defines the traits the signaling/connection provider implements, and the
//! events it reports back. Implemented by the PeerJS transport in production
//! and by [`crate::mock`] in tests.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::ConnectionMetadata;

/// Errors returned synchronously by transport operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport not open")]
    NotOpen,
    #[error("Transport destroyed")]
    Destroyed,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Error reported asynchronously by the provider
///
/// `kind` is the provider's own error code (e.g. `peer-unavailable`),
/// `message` its free text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<TransportError> for ProviderError {
    fn from(err: TransportError) -> Self {
        let kind = match err {
            TransportError::NotOpen => "not-open",
            TransportError::Destroyed => "destroyed",
            TransportError::ConnectionClosed => "connection-closed",
            TransportError::SendFailed(_) => "send-failed",
            TransportError::Unavailable(_) => "unavailable",
        };
        Self::new(kind, err.to_string())
    }
}

/// Options handed to the provider when a transport is created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    pub stun_servers: Vec<String>,
}

/// Lifecycle events of a single data connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Data channel is open and ready to send
    Open,
    /// Text payload received
    Data(String),
    /// ICE connection state changed (informational)
    IceStateChanged(String),
    /// Error on this connection
    Error(ProviderError),
    /// Connection closed; terminal
    Close,
}

/// Events emitted by a transport instance
pub enum TransportEvent {
    /// Provider acknowledged our identity under this wire id
    Open(String),
    /// A remote peer dialed us
    Connection(Arc<dyn DataConnection>),
    /// A remote peer offered a media call (not supported)
    Call(String),
    /// Provider-level error
    Error(ProviderError),
    /// Lost the signaling server; identity no longer reachable
    Disconnected(String),
    /// Event on one of our data connections
    Peer {
        connection_id: String,
        event: ConnectionEvent,
    },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Open(id) => f.debug_tuple("Open").field(id).finish(),
            TransportEvent::Connection(conn) => f
                .debug_struct("Connection")
                .field("connection_id", &conn.connection_id())
                .field("peer", &conn.peer())
                .finish(),
            TransportEvent::Call(peer) => f.debug_tuple("Call").field(peer).finish(),
            TransportEvent::Error(err) => f.debug_tuple("Error").field(err).finish(),
            TransportEvent::Disconnected(id) => f.debug_tuple("Disconnected").field(id).finish(),
            TransportEvent::Peer {
                connection_id,
                event,
            } => f
                .debug_struct("Peer")
                .field("connection_id", connection_id)
                .field("event", event)
                .finish(),
        }
    }
}

/// A transport event tagged with the generation of the transport that sent it
#[derive(Debug)]
pub struct SessionEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Where a transport instance reports its events
///
/// Every event is tagged with the instance's generation, so the session can
/// drop events from a transport it has already replaced.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns false if the session is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Report an event on one data connection
    pub fn emit_connection(&self, connection_id: impl Into<String>, event: ConnectionEvent) -> bool {
        self.emit(TransportEvent::Peer {
            connection_id: connection_id.into(),
            event,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One point-to-point data connection to a remote peer
///
/// Operations never block; outcomes arrive as [`ConnectionEvent`]s.
pub trait DataConnection: Send + Sync {
    /// Provider-unique id of this connection
    fn connection_id(&self) -> &str;

    /// Wire id of the remote peer
    fn peer(&self) -> &str;

    /// Metadata attached by the dialing side
    fn metadata(&self) -> Option<&ConnectionMetadata>;

    /// Queue a text payload for the remote peer
    fn send(&self, payload: &str) -> Result<(), TransportError>;

    /// Close the connection; a `Close` event follows
    fn close(&self);
}

/// A live registration of our identity with the provider
pub trait Transport: Send {
    /// Wire id this transport was created for
    fn id(&self) -> &str;

    /// Dial a remote wire id
    fn connect(
        &self,
        wire_id: &str,
        metadata: ConnectionMetadata,
    ) -> Result<Arc<dyn DataConnection>, TransportError>;

    /// Tear down the transport and all its connections
    fn destroy(&self);
}

/// Creates transport instances bound to a local wire id
pub trait TransportFactory: Send {
    fn create(
        &self,
        local_wire_id: &str,
        options: &TransportOptions,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

impl<T: TransportFactory + ?Sized> TransportFactory for Box<T> {
    fn create(
        &self,
        local_wire_id: &str,
        options: &TransportOptions,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError> {
        (**self).create(local_wire_id, options, sink)
    }
}

impl<T: TransportFactory + Sync + ?Sized> TransportFactory for Arc<T> {
    fn create(
        &self,
        local_wire_id: &str,
        options: &TransportOptions,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError> {
        (**self).create(local_wire_id, options, sink)
    }
}
