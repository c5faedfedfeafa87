//! Provider error classification
//!
//! Maps raw provider errors to the small set of domains the application sees.

use std::fmt;

use crate::identity::PeerIdCodec;
use crate::transport::ProviderError;

/// Provider kind: dial target is not registered with the server
pub const KIND_PEER_UNAVAILABLE: &str = "peer-unavailable";
/// Provider kind: our id is registered by someone else
pub const KIND_UNAVAILABLE_ID: &str = "unavailable-id";
/// Provider kind: our id contains characters the server rejects
pub const KIND_INVALID_ID: &str = "invalid-id";

/// Reported when the target of a dial is unreachable
pub const ERROR_PEER_NOT_AVAILABLE: &str = "PeerWithIdNotAvailable";
/// Reported when our identity is already taken
pub const ERROR_ID_TAKEN: &str = "IdAlreadyTaken";
/// Reported when our identity is rejected as malformed
pub const ERROR_INVALID_ID: &str = "InvalidId";
/// Reported when a dial fails before reaching the provider
pub const ERROR_CONNECTING_FAILED: &str = "ConnectingFailed";
/// Reported when the transport itself could not be created
pub const ERROR_TRANSPORT_UNAVAILABLE: &str = "TransportUnavailable";

/// Fixed text the provider puts in front of the unreachable peer's id
const PEER_UNAVAILABLE_PREFIX: &str = "Could not connect to peer ";

/// Where an error happened, from the application's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    /// Dialing a remote peer failed
    ConnectingToPeer,
    /// Registering our own identity failed
    Connecting,
    /// Uncategorized error on our transport
    Connection,
    /// Error on an already established peer connection
    ErrorOnConnectionToPeer,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDomain::ConnectingToPeer => write!(f, "ConnectingToPeer"),
            ErrorDomain::Connecting => write!(f, "Connecting"),
            ErrorDomain::Connection => write!(f, "Connection"),
            ErrorDomain::ErrorOnConnectionToPeer => write!(f, "ErrorOnConnectionToPeer"),
        }
    }
}

/// Result of classifying a provider error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub domain: ErrorDomain,
    pub error_type: String,
    /// Peer id named by the error, already decoded
    pub peer_id: Option<String>,
}

impl ClassifiedError {
    fn new(domain: ErrorDomain, error_type: impl Into<String>) -> Self {
        Self {
            domain,
            error_type: error_type.into(),
            peer_id: None,
        }
    }
}

/// Classifies errors raised by the transport itself (not by one connection)
///
/// Unknown kinds fall through to [`ErrorDomain::Connection`].
pub fn classify_transport_error(error: &ProviderError, codec: &PeerIdCodec) -> ClassifiedError {
    match error.kind.as_str() {
        KIND_PEER_UNAVAILABLE => {
            let mut classified =
                ClassifiedError::new(ErrorDomain::ConnectingToPeer, ERROR_PEER_NOT_AVAILABLE);
            classified.peer_id = unavailable_peer(&error.message, codec);
            classified
        }
        KIND_UNAVAILABLE_ID => ClassifiedError::new(ErrorDomain::Connecting, ERROR_ID_TAKEN),
        KIND_INVALID_ID => ClassifiedError::new(ErrorDomain::Connecting, ERROR_INVALID_ID),
        kind => ClassifiedError::new(ErrorDomain::Connection, kind),
    }
}

/// Classifies an error raised on a single peer connection
pub fn classify_connection_error(error: &ProviderError) -> ClassifiedError {
    ClassifiedError::new(ErrorDomain::ErrorOnConnectionToPeer, error.kind.as_str())
}

/// Classifies a dial that failed synchronously
pub fn classify_dial_failure(remote_id: &str) -> ClassifiedError {
    ClassifiedError {
        domain: ErrorDomain::ConnectingToPeer,
        error_type: ERROR_CONNECTING_FAILED.to_string(),
        peer_id: Some(remote_id.to_string()),
    }
}

/// Extracts and decodes the peer named in a `peer-unavailable` message
fn unavailable_peer(message: &str, codec: &PeerIdCodec) -> Option<String> {
    let wire_id = message.trim().strip_prefix(PEER_UNAVAILABLE_PREFIX)?.trim();
    if wire_id.is_empty() {
        return None;
    }
    Some(codec.decode(wire_id).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> PeerIdCodec {
        PeerIdCodec::new("mamelodi-webrtc-test-")
    }

    #[test]
    fn test_peer_unavailable_extracts_peer() {
        let error = ProviderError::new(
            KIND_PEER_UNAVAILABLE,
            "Could not connect to peer mamelodi-webrtc-test-bob",
        );
        let classified = classify_transport_error(&error, &codec());
        assert_eq!(classified.domain, ErrorDomain::ConnectingToPeer);
        assert_eq!(classified.error_type, ERROR_PEER_NOT_AVAILABLE);
        assert_eq!(classified.peer_id.as_deref(), Some("bob"));
    }

    #[test]
    fn test_peer_unavailable_with_unexpected_text() {
        let error = ProviderError::new(KIND_PEER_UNAVAILABLE, "peer went away");
        let classified = classify_transport_error(&error, &codec());
        assert_eq!(classified.domain, ErrorDomain::ConnectingToPeer);
        assert_eq!(classified.peer_id, None);
    }

    #[test]
    fn test_identity_errors() {
        let taken = ProviderError::new(KIND_UNAVAILABLE_ID, "ID \"x\" is taken");
        let classified = classify_transport_error(&taken, &codec());
        assert_eq!(classified.domain, ErrorDomain::Connecting);
        assert_eq!(classified.error_type, ERROR_ID_TAKEN);

        let invalid = ProviderError::new(KIND_INVALID_ID, "ID \"x y!\" is invalid");
        let classified = classify_transport_error(&invalid, &codec());
        assert_eq!(classified.domain, ErrorDomain::Connecting);
        assert_eq!(classified.error_type, ERROR_INVALID_ID);
    }

    #[test]
    fn test_unknown_kind_falls_through() {
        let error = ProviderError::new("socket-error", "Lost connection to server");
        let classified = classify_transport_error(&error, &codec());
        assert_eq!(classified.domain, ErrorDomain::Connection);
        assert_eq!(classified.error_type, "socket-error");
        assert_eq!(classified.peer_id, None);
    }

    #[test]
    fn test_connection_error() {
        let error = ProviderError::new("webrtc", "ICE failed");
        let classified = classify_connection_error(&error);
        assert_eq!(classified.domain, ErrorDomain::ErrorOnConnectionToPeer);
        assert_eq!(classified.error_type, "webrtc");
    }

    #[test]
    fn test_dial_failure_keeps_caller_id() {
        let classified = classify_dial_failure("bob");
        assert_eq!(classified.domain, ErrorDomain::ConnectingToPeer);
        assert_eq!(classified.error_type, ERROR_CONNECTING_FAILED);
        assert_eq!(classified.peer_id.as_deref(), Some("bob"));
    }
}
