//! Registry of open peer connections

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::transport::DataConnection;
use crate::types::ConnectedPeer;

/// A connected peer and its live connection
#[derive(Clone)]
pub struct PeerConnectionState {
    pub peer: ConnectedPeer,
    pub connection: Arc<dyn DataConnection>,
}

impl PeerConnectionState {
    pub fn new(peer: ConnectedPeer, connection: Arc<dyn DataConnection>) -> Self {
        Self { peer, connection }
    }

    pub fn connection_id(&self) -> &str {
        self.connection.connection_id()
    }
}

impl fmt::Debug for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnectionState")
            .field("peer", &self.peer)
            .field("connection_id", &self.connection.connection_id())
            .finish()
    }
}

/// Peer id -> open connection
///
/// A peer id is present iff its connection is open. Single writer: only the
/// session manager mutates it.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: HashMap<String, PeerConnectionState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `peer_id`
    pub fn register(&mut self, peer_id: impl Into<String>, state: PeerConnectionState) {
        self.peers.insert(peer_id.into(), state);
    }

    pub fn lookup(&self, peer_id: &str) -> Option<&PeerConnectionState> {
        self.peers.get(peer_id)
    }

    /// Remove `peer_id`; absent keys are a no-op
    pub fn remove(&mut self, peer_id: &str) -> Option<PeerConnectionState> {
        self.peers.remove(peer_id)
    }

    /// Remove `peer_id` only if it is registered with `connection_id`
    ///
    /// A late close from a replaced connection must not evict the newer one.
    pub fn remove_if_connection(
        &mut self,
        peer_id: &str,
        connection_id: &str,
    ) -> Option<PeerConnectionState> {
        match self.peers.get(peer_id) {
            Some(state) if state.connection_id() == connection_id => self.peers.remove(peer_id),
            _ => None,
        }
    }

    /// Snapshot of connected peers, unordered
    pub fn all_peers(&self) -> Vec<ConnectedPeer> {
        self.peers.values().map(|s| s.peer.clone()).collect()
    }

    /// Snapshot of all entries, unordered
    pub fn entries(&self) -> Vec<PeerConnectionState> {
        self.peers.values().cloned().collect()
    }

    /// Empty the registry, returning what was in it
    pub fn drain(&mut self) -> Vec<PeerConnectionState> {
        self.peers.drain().map(|(_, state)| state).collect()
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
