//! Peer session manager
//!
//! Owns one local identity and its transport, tracks every data connection
//! from dial/accept to close, keeps the [`ConnectionRegistry`] in sync and
//! republishes everything through a [`SessionListener`].
//!
//! The manager is a plain state machine: commands are `&mut self` methods and
//! transport events are applied one at a time through [`SessionManager::handle_event`].
//! Events arrive on the receiver returned by [`SessionManager::new`]; the
//! [`crate::service`] module drives both from a single tokio task.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use mamelodi_config::WebRtcConfig;

use crate::classifier::{
    classify_connection_error, classify_dial_failure, classify_transport_error, ErrorDomain,
    ERROR_TRANSPORT_UNAVAILABLE,
};
use crate::identity::PeerIdCodec;
use crate::listener::SessionListener;
use crate::message::Message;
use crate::registry::{ConnectionRegistry, PeerConnectionState};
use crate::transport::{
    ConnectionEvent, DataConnection, EventSink, ProviderError, SessionEvent, Transport,
    TransportError, TransportEvent, TransportFactory, TransportOptions,
};
use crate::types::{ConnectedPeer, ConnectionMetadata, Direction, SessionState};

/// Errors returned to the direct caller of a session operation
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Peer {0} is not connected")]
    UnknownPeer(String),
    #[error("Received data from unregistered peer {0}")]
    UnregisteredPeer(String),
    #[error("Unknown connection {0}")]
    UnknownConnection(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Session service stopped")]
    ServiceStopped,
}

/// A connection we hold a handle for, open or not yet
struct TrackedConnection {
    peer: ConnectedPeer,
    handle: Arc<dyn DataConnection>,
    direction: Direction,
}

/// Receiver for the events of every transport the manager creates
pub type SessionEventRx = mpsc::UnboundedReceiver<SessionEvent>;

pub struct SessionManager<F: TransportFactory, L: SessionListener> {
    codec: PeerIdCodec,
    options: TransportOptions,
    factory: F,
    listener: L,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    transport: Option<Box<dyn Transport>>,
    local_id: Option<String>,
    state: SessionState,
    /// Generation of the current (or last) transport
    generation: u64,
    registry: ConnectionRegistry,
    /// Connection id -> handle, from dial/accept until close
    connections: HashMap<String, TrackedConnection>,
}

impl<F: TransportFactory, L: SessionListener> SessionManager<F, L> {
    pub fn new(config: &WebRtcConfig, factory: F, listener: L) -> (Self, SessionEventRx) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            codec: PeerIdCodec::new(config.peer_id_prefix.clone()),
            options: TransportOptions {
                stun_servers: config.stun_servers.clone(),
            },
            factory,
            listener,
            events_tx,
            transport: None,
            local_id: None,
            state: SessionState::Closed,
            generation: 0,
            registry: ConnectionRegistry::new(),
            connections: HashMap::new(),
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn codec(&self) -> &PeerIdCodec {
        &self.codec
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Snapshot of connected peers, unordered
    pub fn all_peers(&self) -> Vec<ConnectedPeer> {
        self.registry.all_peers()
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.registry.contains(peer_id)
    }

    /// Register `local_id` with the provider, replacing any current session
    pub fn open_for_connections(&mut self, local_id: &str) {
        self.close();

        self.local_id = Some(local_id.to_string());
        self.generation += 1;
        let wire_id = self.codec.encode(local_id);
        let sink = EventSink::new(self.generation, self.events_tx.clone());

        match self.factory.create(&wire_id, &self.options, sink) {
            Ok(transport) => {
                info!(
                    "Opening session as {} (wire id {}, generation {})",
                    local_id, wire_id, self.generation
                );
                self.transport = Some(transport);
                self.state = SessionState::Opening;
            }
            Err(e) => {
                error!("Failed to create transport for {}: {}", wire_id, e);
                self.state = SessionState::Closed;
                self.listener.error_occurred(
                    ErrorDomain::Connecting,
                    ERROR_TRANSPORT_UNAVAILABLE,
                    &ProviderError::from(e),
                    None,
                );
            }
        }
    }

    /// Dial `remote_id`; the outcome arrives as events
    pub fn connect_to(&mut self, remote_id: &str) {
        let Some(transport) = self.transport.as_ref() else {
            warn!("Cannot connect to {}: no open session", remote_id);
            self.report_dial_failure(remote_id, TransportError::NotOpen);
            return;
        };

        let metadata = ConnectionMetadata::new(self.local_id.clone().unwrap_or_default(), remote_id);
        let wire_id = self.codec.encode(remote_id);
        match transport.connect(&wire_id, metadata) {
            Ok(handle) => {
                debug!("Dialing {} ({})", remote_id, handle.connection_id());
                self.track(handle, Direction::Outbound);
            }
            Err(e) => {
                warn!("Dial to {} failed: {}", remote_id, e);
                self.report_dial_failure(remote_id, e);
            }
        }
    }

    /// Send an envelope to one connected peer
    pub fn send_message_to_peer(&self, peer_id: &str, message: &Message) -> Result<(), SessionError> {
        let payload = message.to_payload()?;
        self.send_text_to_peer(peer_id, &payload)
    }

    /// Send a raw payload to one connected peer
    pub fn send_text_to_peer(&self, peer_id: &str, payload: &str) -> Result<(), SessionError> {
        let Some(state) = self.registry.lookup(peer_id) else {
            warn!("Dropping message for {}: not connected", peer_id);
            return Err(SessionError::UnknownPeer(peer_id.to_string()));
        };
        state.connection.send(payload)?;
        Ok(())
    }

    /// Send an envelope to every connected peer
    ///
    /// Returns how many peers the payload was handed to.
    pub fn send_message_to_all_peers(&self, message: &Message) -> Result<usize, SessionError> {
        let payload = message.to_payload()?;
        let mut delivered = 0;
        for state in self.registry.entries() {
            match state.connection.send(&payload) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Broadcast to {} failed: {}", state.peer.id, e),
            }
        }
        debug!("Broadcast delivered to {}/{} peers", delivered, self.registry.len());
        Ok(delivered)
    }

    /// Tear down the session. Idempotent.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            info!("Closing session (generation {})", self.generation);
            transport.destroy();
        }
        for state in self.registry.drain() {
            self.listener.peer_disconnected(&state.peer);
        }
        self.connections.clear();
        self.state = SessionState::Closed;
    }

    /// Apply one transport event
    ///
    /// Errors are registry misses; they have already been logged and are
    /// never forwarded to the listener.
    pub fn handle_event(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        if event.generation != self.generation || self.transport.is_none() {
            debug!(
                "Ignoring event from stale transport (generation {}, current {}): {:?}",
                event.generation, self.generation, event.event
            );
            return Ok(());
        }

        match event.event {
            TransportEvent::Open(wire_id) => {
                self.handle_open(&wire_id);
                Ok(())
            }
            TransportEvent::Connection(handle) => {
                debug!("Incoming connection {} from {}", handle.connection_id(), handle.peer());
                self.track(handle, Direction::Inbound);
                Ok(())
            }
            TransportEvent::Call(peer) => {
                info!("Ignoring media call from {}", peer);
                Ok(())
            }
            TransportEvent::Error(err) => {
                self.handle_transport_error(&err);
                Ok(())
            }
            TransportEvent::Disconnected(wire_id) => {
                self.handle_disconnected(&wire_id);
                Ok(())
            }
            TransportEvent::Peer {
                connection_id,
                event,
            } => self.handle_connection_event(&connection_id, event),
        }
    }

    fn handle_open(&mut self, wire_id: &str) {
        let expected = self.local_id.as_deref().map(|id| self.codec.encode(id));
        if self.state != SessionState::Opening || expected.as_deref() != Some(wire_id) {
            debug!("Ignoring open for {} in state {}", wire_id, self.state);
            return;
        }

        self.state = SessionState::Open;
        let local_id = self.codec.decode(wire_id).to_string();
        info!("Session open as {}", local_id);
        self.listener.connection_opened(&local_id);
    }

    fn handle_transport_error(&mut self, err: &ProviderError) {
        let classified = classify_transport_error(err, &self.codec);
        warn!(
            "Transport error ({}, {}): {}",
            classified.domain, classified.error_type, err.message
        );
        let peer = classified.peer_id.map(ConnectedPeer::from_id);
        self.listener
            .error_occurred(classified.domain, &classified.error_type, err, peer.as_ref());
    }

    fn handle_disconnected(&mut self, wire_id: &str) {
        match self.state {
            SessionState::Opening | SessionState::Open => {
                info!("Lost signaling server for {}", wire_id);
                self.state = SessionState::Disconnected;
                self.listener.disconnected();
            }
            state => debug!("Ignoring disconnect for {} in state {}", wire_id, state),
        }
    }

    fn handle_connection_event(
        &mut self,
        connection_id: &str,
        event: ConnectionEvent,
    ) -> Result<(), SessionError> {
        let Some(tracked) = self.connections.get(connection_id) else {
            debug!("Event for unknown connection {}: {:?}", connection_id, event);
            return Err(SessionError::UnknownConnection(connection_id.to_string()));
        };
        let peer = tracked.peer.clone();
        let handle = tracked.handle.clone();
        let direction = tracked.direction;

        match event {
            ConnectionEvent::Open => {
                let already_open = self
                    .registry
                    .lookup(&peer.id)
                    .map(|s| s.connection_id() == connection_id)
                    .unwrap_or(false);
                if already_open {
                    return Ok(());
                }

                info!("Connected to {} ({}, {})", peer.id, direction, connection_id);
                self.registry
                    .register(peer.id.clone(), PeerConnectionState::new(peer.clone(), handle.clone()));
                self.listener.peer_connected(&peer);
                self.send_greeting(&peer, handle.as_ref());
                Ok(())
            }
            ConnectionEvent::Data(payload) => {
                let Some(state) = self.registry.lookup(&peer.id) else {
                    error!(
                        "Data on {} from {} before the connection opened",
                        connection_id, peer.id
                    );
                    return Err(SessionError::UnregisteredPeer(peer.id));
                };
                self.listener.message_received(&payload, &state.peer);
                Ok(())
            }
            ConnectionEvent::IceStateChanged(ice_state) => {
                debug!("ICE state for {} ({}): {}", peer.id, connection_id, ice_state);
                Ok(())
            }
            ConnectionEvent::Error(err) => {
                let classified = classify_connection_error(&err);
                warn!("Error on connection to {}: {}", peer.id, err);
                self.listener
                    .error_occurred(classified.domain, &classified.error_type, &err, Some(&peer));
                Ok(())
            }
            ConnectionEvent::Close => {
                self.connections.remove(connection_id);
                if let Some(state) = self.registry.remove_if_connection(&peer.id, connection_id) {
                    info!("Disconnected from {} ({})", peer.id, connection_id);
                    self.listener.peer_disconnected(&state.peer);
                } else {
                    debug!("Connection {} to {} closed before opening", connection_id, peer.id);
                }
                Ok(())
            }
        }
    }

    fn send_greeting(&self, peer: &ConnectedPeer, handle: &dyn DataConnection) {
        let local_id = self.local_id.as_deref().unwrap_or_default();
        let result = Message::greeting(local_id, &peer.id)
            .to_payload()
            .map_err(SessionError::from)
            .and_then(|payload| handle.send(&payload).map_err(SessionError::from));
        if let Err(e) = result {
            warn!("Failed to greet {}: {}", peer.id, e);
        }
    }

    fn track(&mut self, handle: Arc<dyn DataConnection>, direction: Direction) {
        let peer = ConnectedPeer::from_id(self.remote_id(handle.as_ref(), direction));
        self.connections.insert(
            handle.connection_id().to_string(),
            TrackedConnection {
                peer,
                handle,
                direction,
            },
        );
    }

    /// Logical id of the remote side of `handle`
    ///
    /// Metadata wins when present and not namespaced; the wire id is the fallback.
    fn remote_id(&self, handle: &dyn DataConnection, direction: Direction) -> String {
        handle
            .metadata()
            .and_then(|m| m.remote_id(direction))
            .filter(|id| !self.codec.is_encoded(id))
            .map(str::to_string)
            .unwrap_or_else(|| self.codec.decode(handle.peer()).to_string())
    }

    fn report_dial_failure(&self, remote_id: &str, err: TransportError) {
        let classified = classify_dial_failure(remote_id);
        let peer = ConnectedPeer::from_id(remote_id);
        self.listener.error_occurred(
            classified.domain,
            &classified.error_type,
            &ProviderError::from(err),
            Some(&peer),
        );
    }
}

impl<F: TransportFactory, L: SessionListener> Drop for SessionManager<F, L> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.destroy();
        }
    }
}
