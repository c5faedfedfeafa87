//! Peer id <-> wire id mapping
//!
//! The provider's id namespace is shared with every other application using
//! the same signaling server, so our ids are registered under a fixed prefix.

/// Prefixes and strips the provider namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdCodec {
    prefix: String,
}

impl PeerIdCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Wire id for a peer id
    pub fn encode(&self, peer_id: &str) -> String {
        format!("{}{}", self.prefix, peer_id)
    }

    /// Peer id for a wire id; ids without the prefix pass through unchanged
    pub fn decode<'a>(&self, wire_id: &'a str) -> &'a str {
        wire_id.strip_prefix(self.prefix.as_str()).unwrap_or(wire_id)
    }

    /// Whether `wire_id` names `own_peer_id`
    pub fn is_self(&self, wire_id: &str, own_peer_id: &str) -> bool {
        self.decode(wire_id) == own_peer_id
    }

    /// Whether `id` already carries the namespace prefix
    pub fn is_encoded(&self, id: &str) -> bool {
        !self.prefix.is_empty() && id.starts_with(self.prefix.as_str())
    }
}

impl Default for PeerIdCodec {
    fn default() -> Self {
        Self::new(mamelodi_config::DEFAULT_PEER_ID_PREFIX)
    }
}
