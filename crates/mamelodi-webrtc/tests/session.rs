//! End-to-end session tests over the in-memory provider
//!
//! Each peer runs its own session service; the mock network relays dials and
//! payloads between them.

use std::sync::Arc;
use std::time::Duration;

use mamelodi_config::WebRtcConfig;
use mamelodi_webrtc::{
    ChannelListener, ConnectedPeer, ErrorDomain, Message, MockNetwork, NotificationRx,
    ReceivedMessageType, SessionHandle, SessionManager, SessionNotification, SessionService,
    SessionState,
};
use tokio::time::timeout;

const PREFIX: &str = "mamelodi-webrtc-it-";

struct Peer {
    handle: SessionHandle,
    notifications: NotificationRx,
}

impl Peer {
    async fn open(network: &Arc<MockNetwork>, id: &str) -> Self {
        let config = WebRtcConfig {
            peer_id_prefix: PREFIX.to_string(),
            ..Default::default()
        };
        let (listener, notifications) = ChannelListener::new();
        let (manager, events) = SessionManager::new(&config, network.factory(), listener);
        let (handle, _task) = SessionService::spawn(manager, events);

        let mut peer = Self {
            handle,
            notifications,
        };
        peer.handle.open_for_connections(id).unwrap();
        assert_eq!(
            peer.next().await,
            SessionNotification::ConnectionOpened(id.to_string())
        );
        peer
    }

    async fn next(&mut self) -> SessionNotification {
        timeout(Duration::from_secs(2), self.notifications.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("listener channel closed")
    }

    /// Wait for a notification matching `f`, skipping others
    async fn wait_for(&mut self, f: impl Fn(&SessionNotification) -> bool) -> SessionNotification {
        loop {
            let n = self.next().await;
            if f(&n) {
                return n;
            }
        }
    }

    async fn wait_connected(&mut self, peer_id: &str) {
        self.wait_for(|n| matches!(n, SessionNotification::PeerConnected(p) if p.id == peer_id))
            .await;
    }
}

#[tokio::test]
async fn test_two_peers_chat() {
    let network = MockNetwork::new();
    let mut alice = Peer::open(&network, "alice").await;
    let mut bob = Peer::open(&network, "bob").await;

    alice.handle.connect_to("bob").unwrap();
    alice.wait_connected("bob").await;
    bob.wait_connected("alice").await;

    alice
        .handle
        .send_message_to_peer("bob", Message::chat("Dumela, Bob"))
        .await
        .unwrap();

    let received = bob
        .wait_for(|n| {
            matches!(n, SessionNotification::MessageReceived(m) if m.message == "Dumela, Bob")
        })
        .await;
    match received {
        SessionNotification::MessageReceived(m) => {
            assert_eq!(m.kind, ReceivedMessageType::Chat);
            assert_eq!(m.peer, Some(ConnectedPeer::from_id("alice")));
        }
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn test_broadcast_reaches_every_peer() {
    let network = MockNetwork::new();
    let mut hub = Peer::open(&network, "hub").await;
    let mut spokes = Vec::new();
    for id in ["thabo", "lerato", "sipho"] {
        let mut spoke = Peer::open(&network, id).await;
        spoke.handle.connect_to("hub").unwrap();
        spoke.wait_connected("hub").await;
        hub.wait_connected(id).await;
        spokes.push(spoke);
    }

    let delivered = hub
        .handle
        .send_message_to_all_peers(Message::chat("meeting at noon"))
        .await
        .unwrap();
    assert_eq!(delivered, 3);

    for spoke in &mut spokes {
        spoke
            .wait_for(|n| {
                matches!(n, SessionNotification::MessageReceived(m) if m.message == "meeting at noon")
            })
            .await;
    }
}

#[tokio::test]
async fn test_close_disconnects_remote() {
    let network = MockNetwork::new();
    let mut alice = Peer::open(&network, "alice").await;
    let mut bob = Peer::open(&network, "bob").await;
    alice.handle.connect_to("bob").unwrap();
    alice.wait_connected("bob").await;
    bob.wait_connected("alice").await;

    alice.handle.close().await.unwrap();

    assert_eq!(
        alice
            .wait_for(|n| matches!(n, SessionNotification::PeerDisconnected(_)))
            .await,
        SessionNotification::PeerDisconnected(ConnectedPeer::from_id("bob"))
    );
    assert_eq!(
        bob.wait_for(|n| matches!(n, SessionNotification::PeerDisconnected(_)))
            .await,
        SessionNotification::PeerDisconnected(ConnectedPeer::from_id("alice"))
    );
    assert_eq!(alice.handle.state().await.unwrap(), SessionState::Closed);
    assert!(alice.handle.all_peers().await.unwrap().is_empty());
    assert!(bob.handle.all_peers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_taken_id_reported() {
    let network = MockNetwork::new();
    let _first = Peer::open(&network, "alice").await;

    let (listener, mut notifications) = ChannelListener::new();
    let config = WebRtcConfig {
        peer_id_prefix: PREFIX.to_string(),
        ..Default::default()
    };
    let (manager, events) = SessionManager::new(&config, network.factory(), listener);
    let (handle, _task) = SessionService::spawn(manager, events);
    handle.open_for_connections("alice").unwrap();

    let notification = timeout(Duration::from_secs(2), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    match notification {
        SessionNotification::ErrorOccurred(reported) => {
            assert_eq!(reported.domain, ErrorDomain::Connecting);
            assert_eq!(reported.error_type, "IdAlreadyTaken");
        }
        other => panic!("unexpected notification: {:?}", other),
    }
    assert_eq!(handle.state().await.unwrap(), SessionState::Opening);
}

#[tokio::test]
async fn test_server_loss_reported() {
    let network = MockNetwork::new();
    let mut alice = Peer::open(&network, "alice").await;

    network.disconnect(&format!("{}alice", PREFIX));

    assert_eq!(alice.next().await, SessionNotification::Disconnected);
    assert_eq!(alice.handle.state().await.unwrap(), SessionState::Disconnected);
}
