//! Mock transport for testing and simulation
//!
//! [`MockNetwork`] plays the signaling provider in memory: transports
//! register their wire ids on it, dials between registered ids produce a
//! linked pair of [`MockConnection`]s, and payloads are delivered as
//! transport events. No sockets and no WebRTC.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::classifier::{KIND_PEER_UNAVAILABLE, KIND_UNAVAILABLE_ID};
use crate::transport::{
    ConnectionEvent, DataConnection, EventSink, ProviderError, Transport, TransportError,
    TransportEvent, TransportFactory, TransportOptions,
};
use crate::types::ConnectionMetadata;

// ============================================================================
// Mock Network
// ============================================================================

struct Registration {
    transport_id: u64,
    sink: EventSink,
}

#[derive(Default)]
struct NetworkState {
    /// Wire id -> transport currently holding it
    peers: HashMap<String, Registration>,
    /// Transport id -> connections it is an endpoint of
    connections: HashMap<u64, Vec<Arc<MockConnection>>>,
    /// Options each wire id was created with, in creation order
    created: Vec<(String, TransportOptions)>,
    fail_next_create: Option<String>,
}

/// In-memory signaling provider
pub struct MockNetwork {
    state: Mutex<NetworkState>,
    next_id: AtomicU64,
    /// Confirm identities automatically on create
    auto_open: bool,
}

impl MockNetwork {
    /// Network that confirms every free identity immediately
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_auto_open(true))
    }

    /// Network that never confirms identities on its own; tests inject `Open`
    pub fn manual() -> Arc<Self> {
        Arc::new(Self::with_auto_open(false))
    }

    fn with_auto_open(auto_open: bool) -> Self {
        Self {
            state: Mutex::new(NetworkState::default()),
            next_id: AtomicU64::new(1),
            auto_open,
        }
    }

    /// Factory creating transports registered on this network
    pub fn factory(self: &Arc<Self>) -> MockTransportFactory {
        MockTransportFactory {
            network: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Deliver an event to the transport registered under `wire_id`
    pub fn emit(&self, wire_id: &str, event: TransportEvent) -> bool {
        let sink = self.lock().peers.get(wire_id).map(|r| r.sink.clone());
        match sink {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// Deliver a connection event to the transport registered under `wire_id`
    pub fn emit_connection_event(
        &self,
        wire_id: &str,
        connection_id: &str,
        event: ConnectionEvent,
    ) -> bool {
        self.emit(
            wire_id,
            TransportEvent::Peer {
                connection_id: connection_id.to_string(),
                event,
            },
        )
    }

    /// Simulate losing the signaling server for `wire_id`
    pub fn disconnect(&self, wire_id: &str) -> bool {
        self.emit(wire_id, TransportEvent::Disconnected(wire_id.to_string()))
    }

    /// Make the next `create` fail with the given reason
    pub fn fail_next_create(&self, reason: impl Into<String>) {
        self.lock().fail_next_create = Some(reason.into());
    }

    pub fn is_registered(&self, wire_id: &str) -> bool {
        self.lock().peers.contains_key(wire_id)
    }

    /// Options passed to the most recent transport created for `wire_id`
    pub fn options_for(&self, wire_id: &str) -> Option<TransportOptions> {
        self.lock()
            .created
            .iter()
            .rev()
            .find(|(id, _)| id == wire_id)
            .map(|(_, options)| options.clone())
    }

    /// Connections the transport registered under `wire_id` is an endpoint of
    pub fn connections_of(&self, wire_id: &str) -> Vec<Arc<MockConnection>> {
        let state = self.lock();
        state
            .peers
            .get(wire_id)
            .and_then(|r| state.connections.get(&r.transport_id))
            .cloned()
            .unwrap_or_default()
    }

    fn create_transport(
        self: &Arc<Self>,
        local_wire_id: &str,
        options: &TransportOptions,
        sink: EventSink,
    ) -> Result<MockTransport, TransportError> {
        let transport_id = self.next_id();
        let mut state = self.lock();
        if let Some(reason) = state.fail_next_create.take() {
            return Err(TransportError::Unavailable(reason));
        }
        state
            .created
            .push((local_wire_id.to_string(), options.clone()));

        let taken = state
            .peers
            .get(local_wire_id)
            .map(|r| !r.sink.is_closed())
            .unwrap_or(false);

        if taken {
            sink.emit(TransportEvent::Error(ProviderError::new(
                KIND_UNAVAILABLE_ID,
                format!("ID \"{}\" is taken", local_wire_id),
            )));
        } else {
            state.peers.insert(
                local_wire_id.to_string(),
                Registration {
                    transport_id,
                    sink: sink.clone(),
                },
            );
            if self.auto_open {
                sink.emit(TransportEvent::Open(local_wire_id.to_string()));
            }
        }

        Ok(MockTransport {
            network: self.clone(),
            transport_id,
            id: local_wire_id.to_string(),
            sink,
            destroyed: AtomicBool::new(false),
        })
    }

    fn dial(
        &self,
        from: &MockTransport,
        wire_id: &str,
        metadata: ConnectionMetadata,
    ) -> Arc<dyn DataConnection> {
        let connection_id = format!("dc_{}", self.next_id());
        let link = Arc::new(Link::default());
        let mut state = self.lock();

        let target = state
            .peers
            .get(wire_id)
            .map(|r| (r.transport_id, r.sink.clone()));

        let Some((target_id, target_sink)) = target else {
            let ours = Arc::new(MockConnection::new(
                &connection_id,
                wire_id,
                Some(metadata),
                Some(from.sink.clone()),
                None,
                link,
            ));
            state
                .connections
                .entry(from.transport_id)
                .or_default()
                .push(ours.clone());
            drop(state);

            from.sink.emit(TransportEvent::Error(ProviderError::new(
                KIND_PEER_UNAVAILABLE,
                format!("Could not connect to peer {}", wire_id),
            )));
            ours.close();
            return ours;
        };

        let ours = Arc::new(MockConnection::new(
            &connection_id,
            wire_id,
            Some(metadata.clone()),
            Some(from.sink.clone()),
            Some(target_sink.clone()),
            link.clone(),
        ));
        let theirs = Arc::new(MockConnection::new(
            &connection_id,
            &from.id,
            Some(metadata),
            Some(target_sink.clone()),
            Some(from.sink.clone()),
            link,
        ));
        state
            .connections
            .entry(from.transport_id)
            .or_default()
            .push(ours.clone());
        state
            .connections
            .entry(target_id)
            .or_default()
            .push(theirs.clone());
        drop(state);

        target_sink.emit(TransportEvent::Connection(theirs));
        target_sink.emit_connection(connection_id.clone(), ConnectionEvent::Open);
        from.sink.emit_connection(connection_id, ConnectionEvent::Open);
        ours
    }

    fn unregister(&self, transport: &MockTransport) {
        let connections = {
            let mut state = self.lock();
            let holds_id = state
                .peers
                .get(&transport.id)
                .map(|r| r.transport_id == transport.transport_id)
                .unwrap_or(false);
            if holds_id {
                state.peers.remove(&transport.id);
            }
            state
                .connections
                .remove(&transport.transport_id)
                .unwrap_or_default()
        };
        for connection in connections {
            connection.close();
        }
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::with_auto_open(true)
    }
}

// ============================================================================
// Mock Transport
// ============================================================================

/// Creates [`MockTransport`]s on a [`MockNetwork`]
#[derive(Clone)]
pub struct MockTransportFactory {
    network: Arc<MockNetwork>,
}

impl MockTransportFactory {
    pub fn network(&self) -> &Arc<MockNetwork> {
        &self.network
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(
        &self,
        local_wire_id: &str,
        options: &TransportOptions,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let transport = self.network.create_transport(local_wire_id, options, sink)?;
        Ok(Box::new(transport))
    }
}

/// One registration on a [`MockNetwork`]
pub struct MockTransport {
    network: Arc<MockNetwork>,
    transport_id: u64,
    id: String,
    sink: EventSink,
    destroyed: AtomicBool,
}

impl Transport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn connect(
        &self,
        wire_id: &str,
        metadata: ConnectionMetadata,
    ) -> Result<Arc<dyn DataConnection>, TransportError> {
        if self.destroyed.load(Ordering::Relaxed) {
            return Err(TransportError::Destroyed);
        }
        Ok(self.network.dial(self, wire_id, metadata))
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::Relaxed) {
            self.network.unregister(self);
        }
    }
}

// ============================================================================
// Mock Connection
// ============================================================================

/// State shared by both ends of a connection
#[derive(Default)]
struct Link {
    closed: AtomicBool,
}

/// One end of an in-memory data connection
pub struct MockConnection {
    connection_id: String,
    peer: String,
    metadata: Option<ConnectionMetadata>,
    /// Events for our own side
    local: Option<EventSink>,
    /// Events for the other side
    remote: Option<EventSink>,
    link: Arc<Link>,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl MockConnection {
    fn new(
        connection_id: &str,
        peer: &str,
        metadata: Option<ConnectionMetadata>,
        local: Option<EventSink>,
        remote: Option<EventSink>,
        link: Arc<Link>,
    ) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            peer: peer.to_string(),
            metadata,
            local,
            remote,
            link,
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Connection not attached to any network; sends are only recorded
    pub fn standalone(
        connection_id: &str,
        peer: &str,
        metadata: Option<ConnectionMetadata>,
    ) -> Self {
        Self::new(connection_id, peer, metadata, None, None, Arc::new(Link::default()))
    }

    /// Make every following `send` fail
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Payloads successfully sent through this end
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Relaxed)
    }
}

impl DataConnection for MockConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn metadata(&self) -> Option<&ConnectionMetadata> {
        self.metadata.as_ref()
    }

    fn send(&self, payload: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(TransportError::SendFailed("simulated send failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(payload.to_string());
        if let Some(remote) = &self.remote {
            remote.emit_connection(
                self.connection_id.clone(),
                ConnectionEvent::Data(payload.to_string()),
            );
        }
        Ok(())
    }

    fn close(&self) {
        if self.link.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        for sink in self.local.iter().chain(self.remote.iter()) {
            sink.emit_connection(self.connection_id.clone(), ConnectionEvent::Close);
        }
    }
}
