//! Session data model
//!
//! Value types shared by the session manager, the listener contract and
//! transport implementations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An application-visible connected peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectedPeer {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

impl ConnectedPeer {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Peer whose display name is its id
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
        }
    }
}

impl fmt::Display for ConnectedPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// Metadata the dialing side attaches to a connection
///
/// The acceptor only sees the dialer's wire id; `dialer` carries the
/// logical id. `target` lets the dialer's own side resolve the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    #[serde(rename = "peerId")]
    pub dialer: String,
    #[serde(rename = "targetPeerId", default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ConnectionMetadata {
    pub fn new(dialer: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            dialer: dialer.into(),
            target: Some(target.into()),
        }
    }

    /// Logical id of the remote side, seen from `direction`
    pub fn remote_id(&self, direction: Direction) -> Option<&str> {
        match direction {
            Direction::Inbound => Some(self.dialer.as_str()),
            Direction::Outbound => self.target.as_deref(),
        }
    }
}

/// Which side initiated a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// They dialed us
    Inbound,
    /// We dialed them
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// State of the local session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No active transport
    #[default]
    Closed,
    /// Transport created, waiting for the provider to confirm our id
    Opening,
    /// Identity acknowledged; ready to accept and dial
    Open,
    /// Lost the provider after having been open
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Closed => write!(f, "closed"),
            SessionState::Opening => write!(f, "opening"),
            SessionState::Open => write!(f, "open"),
            SessionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_peer_display_uses_name() {
        let peer = ConnectedPeer::new("bob", "Bob Mokoena");
        assert_eq!(peer.to_string(), "Bob Mokoena");
        assert_eq!(ConnectedPeer::from_id("bob").display_name, "bob");
    }

    #[test]
    fn test_metadata_remote_id_by_direction() {
        let metadata = ConnectionMetadata::new("alice", "bob");
        assert_eq!(metadata.remote_id(Direction::Inbound), Some("alice"));
        assert_eq!(metadata.remote_id(Direction::Outbound), Some("bob"));
    }

    #[test]
    fn test_metadata_wire_shape() {
        let metadata = ConnectionMetadata::new("alice", "bob");
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"{"peerId":"alice","targetPeerId":"bob"}"#);

        let dialer_only: ConnectionMetadata = serde_json::from_str(r#"{"peerId":"carol"}"#).unwrap();
        assert_eq!(dialer_only.target, None);
        assert_eq!(dialer_only.remote_id(Direction::Outbound), None);
    }

    #[test]
    fn test_session_state_default_closed() {
        assert_eq!(SessionState::default(), SessionState::Closed);
        assert_eq!(SessionState::Opening.to_string(), "opening");
    }
}
