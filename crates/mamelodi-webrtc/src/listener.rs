//! Listener contract between the session and the hosting application

use tokio::sync::mpsc;

use crate::classifier::ErrorDomain;
use crate::message::ReceivedMessage;
use crate::transport::ProviderError;
use crate::types::ConnectedPeer;

/// Notifications the session manager delivers to the application
///
/// Called sequentially from the session's single event loop.
pub trait SessionListener: Send {
    /// The provider confirmed our identity
    fn connection_opened(&self, local_id: &str);

    /// A connection to `peer` is open
    fn peer_connected(&self, peer: &ConnectedPeer);

    /// `peer` sent a payload
    fn message_received(&self, message: &str, peer: &ConnectedPeer);

    /// The connection to `peer` closed
    fn peer_disconnected(&self, peer: &ConnectedPeer);

    fn error_occurred(
        &self,
        domain: ErrorDomain,
        error_type: &str,
        error: &ProviderError,
        peer: Option<&ConnectedPeer>,
    );

    /// We lost the signaling provider
    fn disconnected(&self);
}

/// An error as reported through [`SessionListener::error_occurred`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub domain: ErrorDomain,
    pub error_type: String,
    pub error: ProviderError,
    pub peer: Option<ConnectedPeer>,
}

/// Owned form of a listener callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotification {
    ConnectionOpened(String),
    PeerConnected(ConnectedPeer),
    MessageReceived(ReceivedMessage),
    PeerDisconnected(ConnectedPeer),
    ErrorOccurred(ReportedError),
    Disconnected,
}

/// Receiver side of a [`ChannelListener`]
pub type NotificationRx = mpsc::UnboundedReceiver<SessionNotification>;

/// Listener that forwards every callback into a channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<SessionNotification>,
}

impl ChannelListener {
    pub fn new() -> (Self, NotificationRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, notification: SessionNotification) {
        // A dropped receiver only means nobody is listening anymore
        let _ = self.tx.send(notification);
    }
}

impl SessionListener for ChannelListener {
    fn connection_opened(&self, local_id: &str) {
        self.send(SessionNotification::ConnectionOpened(local_id.to_string()));
    }

    fn peer_connected(&self, peer: &ConnectedPeer) {
        self.send(SessionNotification::PeerConnected(peer.clone()));
    }

    fn message_received(&self, message: &str, peer: &ConnectedPeer) {
        self.send(SessionNotification::MessageReceived(
            ReceivedMessage::from_payload(message, Some(peer.clone())),
        ));
    }

    fn peer_disconnected(&self, peer: &ConnectedPeer) {
        self.send(SessionNotification::PeerDisconnected(peer.clone()));
    }

    fn error_occurred(
        &self,
        domain: ErrorDomain,
        error_type: &str,
        error: &ProviderError,
        peer: Option<&ConnectedPeer>,
    ) {
        self.send(SessionNotification::ErrorOccurred(ReportedError {
            domain,
            error_type: error_type.to_string(),
            error: error.clone(),
            peer: peer.cloned(),
        }));
    }

    fn disconnected(&self) {
        self.send(SessionNotification::Disconnected);
    }
}
