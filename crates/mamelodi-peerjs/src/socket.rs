//! Signaling socket task
//!
//! Holds the WebSocket to the PeerJS server for one transport: sends queued
//! client messages and heartbeats, and routes server messages to the
//! transport's event sink or to the addressed connection.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};
use url::Url;

use mamelodi_webrtc::classifier::{KIND_PEER_UNAVAILABLE, KIND_UNAVAILABLE_ID};
use mamelodi_webrtc::{ConnectionEvent, DataConnection, ProviderError, TransportEvent};

use crate::connection::{Role, Signal};
use crate::error::PeerJsError;
use crate::protocol::{ClientMessage, ServerMessage, CONNECTION_TYPE_MEDIA, SERIALIZATION_JSON};
use crate::transport::Shared;
use crate::{
    KIND_INVALID_KEY, KIND_SERVER_ERROR, KIND_SOCKET_CLOSED, KIND_SOCKET_ERROR,
    KIND_UNSUPPORTED_SERIALIZATION,
};

pub(crate) async fn run(
    url: Url,
    shared: Arc<Shared>,
    mut outgoing: mpsc::UnboundedReceiver<ClientMessage>,
    mut shutdown: watch::Receiver<bool>,
    heartbeat_interval: Duration,
) {
    info!(
        "Connecting to signaling server {}",
        url.host_str().unwrap_or_default()
    );

    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = shutdown.changed() => return,
    };
    let (mut write, mut read) = match connected {
        Ok((ws, _)) => ws.split(),
        Err(e) => {
            fail(&shared, KIND_SOCKET_ERROR, format!("Error connecting to signaling server: {}", e));
            return;
        }
    };

    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;

    let failure = loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = write.close().await;
                    break None;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = send(&mut write, &ClientMessage::Heartbeat).await {
                    break Some((KIND_SOCKET_ERROR, e.to_string()));
                }
            }
            Some(message) = outgoing.recv() => {
                debug!("Sending {} to signaling server", message.msg_type());
                if let Err(e) = send(&mut write, &message).await {
                    break Some((KIND_SOCKET_ERROR, e.to_string()));
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => dispatch(&shared, &text),
                    Some(Ok(Message::Close(_))) | None => {
                        break Some((KIND_SOCKET_CLOSED, "Underlying socket is already closed.".to_string()));
                    }
                    Some(Err(e)) => break Some((KIND_SOCKET_ERROR, e.to_string())),
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    match failure {
        Some((kind, message)) => fail(&shared, kind, message),
        None => debug!("Signaling socket for {} shut down", shared.id),
    }
}

async fn send<S>(write: &mut S, message: &ClientMessage) -> Result<(), PeerJsError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    write.send(Message::Text(message.to_json()?.into())).await?;
    Ok(())
}

/// Report the loss of the server; the transport cannot recover
fn fail(shared: &Shared, kind: &str, message: String) {
    error!("Signaling socket for {} failed: {}", shared.id, message);
    shared
        .sink
        .emit(TransportEvent::Error(ProviderError::new(kind, message)));
    shared
        .sink
        .emit(TransportEvent::Disconnected(shared.id.clone()));
}

/// Route one server message
pub(crate) fn dispatch(shared: &Shared, text: &str) {
    let message = match ServerMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Invalid server message: {}", e);
            return;
        }
    };

    match message {
        ServerMessage::Open => {
            shared.sink.emit(TransportEvent::Open(shared.id.clone()));
        }
        ServerMessage::IdTaken { .. } => {
            shared.sink.emit(TransportEvent::Error(ProviderError::new(
                KIND_UNAVAILABLE_ID,
                format!("ID \"{}\" is taken", shared.id),
            )));
        }
        ServerMessage::InvalidKey { .. } => {
            shared.sink.emit(TransportEvent::Error(ProviderError::new(
                KIND_INVALID_KEY,
                format!("API KEY \"{}\" is invalid", shared.key),
            )));
        }
        ServerMessage::Error { payload } => {
            let message = payload.map(|p| p.msg).unwrap_or_default();
            shared
                .sink
                .emit(TransportEvent::Error(ProviderError::new(KIND_SERVER_ERROR, message)));
        }
        ServerMessage::Leave { src } => {
            debug!("{} left the server", src);
            for conn in shared.connections.to_peer(&src) {
                conn.close();
            }
        }
        ServerMessage::Expire { src } => {
            shared.sink.emit(TransportEvent::Error(ProviderError::new(
                KIND_PEER_UNAVAILABLE,
                format!("Could not connect to peer {}", src),
            )));
            for conn in shared.connections.to_peer(&src) {
                conn.close();
            }
        }
        ServerMessage::Offer { src, payload } => {
            if payload.connection_type == CONNECTION_TYPE_MEDIA {
                shared.sink.emit(TransportEvent::Call(src));
                return;
            }
            if shared.connections.get(&payload.connection_id).is_some() {
                debug!("Ignoring renegotiation of {}", payload.connection_id);
                return;
            }

            let metadata = payload
                .metadata
                .and_then(|value| serde_json::from_value(value).ok());
            let (conn, signals) = shared.new_connection(payload.connection_id, src, metadata);
            shared.sink.emit(TransportEvent::Connection(conn.clone()));

            match payload.serialization.as_deref() {
                None | Some(SERIALIZATION_JSON) => conn.spawn(
                    &shared.runtime,
                    Role::Accept {
                        offer_sdp: payload.sdp.sdp,
                    },
                    signals,
                    shared.stun_servers.clone(),
                ),
                Some(other) => {
                    conn.emit(ConnectionEvent::Error(ProviderError::new(
                        KIND_UNSUPPORTED_SERIALIZATION,
                        format!("Serialization \"{}\" is not supported", other),
                    )));
                    conn.close();
                }
            }
        }
        ServerMessage::Answer { src, payload } => match shared.connections.get(&payload.connection_id) {
            Some(conn) => conn.signal(Signal::Answer(payload.sdp.sdp)),
            None => debug!("Answer from {} for unknown connection {}", src, payload.connection_id),
        },
        ServerMessage::Candidate { src, payload } => {
            match shared.connections.get(&payload.connection_id) {
                Some(conn) => conn.signal(Signal::Candidate(payload.candidate)),
                None => debug!(
                    "Candidate from {} for unknown connection {}",
                    src, payload.connection_id
                ),
            }
        }
        ServerMessage::Heartbeat | ServerMessage::Unknown => {
            debug!("Ignoring server message: {}", text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connections;
    use mamelodi_webrtc::{EventSink, SessionEvent};
    use tokio::runtime::Handle;

    fn shared() -> (Shared, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (signaling, _signaling_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            id: "mamelodi-webrtc-alice".to_string(),
            key: "peerjs".to_string(),
            sink: EventSink::new(1, tx),
            stun_servers: Vec::new(),
            signaling,
            connections: Arc::new(Connections::default()),
            runtime: Handle::current(),
        };
        (shared, rx)
    }

    fn events(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e.event);
        }
        out
    }

    #[tokio::test]
    async fn test_open_and_id_taken() {
        let (shared, mut rx) = shared();
        dispatch(&shared, r#"{"type":"OPEN"}"#);
        dispatch(&shared, r#"{"type":"ID-TAKEN","payload":{"msg":"ID is taken"}}"#);

        match events(&mut rx).as_slice() {
            [TransportEvent::Open(id), TransportEvent::Error(err)] => {
                assert_eq!(id, "mamelodi-webrtc-alice");
                assert_eq!(err.kind, KIND_UNAVAILABLE_ID);
                assert_eq!(err.message, "ID \"mamelodi-webrtc-alice\" is taken");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expire_reports_peer_unavailable() {
        let (shared, mut rx) = shared();
        dispatch(&shared, r#"{"type":"EXPIRE","src":"mamelodi-webrtc-bob"}"#);

        match events(&mut rx).as_slice() {
            [TransportEvent::Error(err)] => {
                assert_eq!(err.kind, KIND_PEER_UNAVAILABLE);
                assert_eq!(err.message, "Could not connect to peer mamelodi-webrtc-bob");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_media_offer_is_a_call() {
        let (shared, mut rx) = shared();
        dispatch(
            &shared,
            r#"{"type":"OFFER","src":"mamelodi-webrtc-bob","payload":{"sdp":{"type":"offer","sdp":"v=0"},"type":"media","connectionId":"mc_1"}}"#,
        );

        assert!(matches!(
            events(&mut rx).as_slice(),
            [TransportEvent::Call(src)] if src == "mamelodi-webrtc-bob"
        ));
        assert_eq!(shared.connections.len(), 0);
    }

    #[tokio::test]
    async fn test_binary_offer_is_rejected() {
        let (shared, mut rx) = shared();
        dispatch(
            &shared,
            r#"{"type":"OFFER","src":"mamelodi-webrtc-bob","payload":{"sdp":{"type":"offer","sdp":"v=0"},"type":"data","connectionId":"dc_1","serialization":"binary","metadata":{"peerId":"bob"}}}"#,
        );

        let seen = events(&mut rx);
        assert_eq!(seen.len(), 3);
        match &seen[0] {
            TransportEvent::Connection(conn) => {
                assert_eq!(conn.connection_id(), "dc_1");
                assert_eq!(conn.metadata().map(|m| m.dialer.as_str()), Some("bob"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            &seen[1],
            TransportEvent::Peer { event: ConnectionEvent::Error(err), .. } if err.kind == KIND_UNSUPPORTED_SERIALIZATION
        ));
        assert!(matches!(&seen[2], TransportEvent::Peer { event: ConnectionEvent::Close, .. }));
        assert_eq!(shared.connections.len(), 0);
    }

    #[tokio::test]
    async fn test_server_error_and_garbage() {
        let (shared, mut rx) = shared();
        dispatch(&shared, "not json");
        dispatch(&shared, r#"{"type":"HEARTBEAT"}"#);
        dispatch(&shared, r#"{"type":"SOMETHING-NEW"}"#);
        dispatch(&shared, r#"{"type":"ERROR","payload":{"msg":"boom"}}"#);

        match events(&mut rx).as_slice() {
            [TransportEvent::Error(err)] => {
                assert_eq!(err.kind, KIND_SERVER_ERROR);
                assert_eq!(err.message, "boom");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }
}
