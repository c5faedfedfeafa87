//! Signaling socket against a local stand-in for a PeerJS server

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use mamelodi_config::SignalingConfig;
use mamelodi_peerjs::PeerJsTransportFactory;
use mamelodi_webrtc::{
    EventSink, SessionEvent, TransportEvent, TransportFactory, TransportOptions,
};

const WIRE_ID: &str = "mamelodi-webrtc-it-alice";

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> TransportEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
        .event
}

#[tokio::test]
async fn test_register_heartbeat_and_loss() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let request_uri = Arc::new(Mutex::new(None));

    let uri_slot = request_uri.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
            *uri_slot.lock().unwrap() = Some(req.uri().to_string());
            Ok(resp)
        })
        .await
        .unwrap();

        ws.send(Message::Text(r#"{"type":"OPEN"}"#.into())).await.unwrap();

        // Wait for a heartbeat before going away
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                if text.as_str() == r#"{"type":"HEARTBEAT"}"# {
                    break;
                }
            }
        }

        ws.send(Message::Text(
            r#"{"type":"EXPIRE","src":"mamelodi-webrtc-it-bob"}"#.into(),
        ))
        .await
        .unwrap();
        ws.close(None).await.unwrap();
    });

    let factory = PeerJsTransportFactory::new(SignalingConfig {
        host: "127.0.0.1".to_string(),
        port,
        secure: false,
        heartbeat_interval_ms: 50,
        ..Default::default()
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let transport = factory
        .create(WIRE_ID, &TransportOptions::default(), EventSink::new(3, tx))
        .unwrap();

    assert!(matches!(next_event(&mut rx).await, TransportEvent::Open(id) if id == WIRE_ID));

    match next_event(&mut rx).await {
        TransportEvent::Error(err) => {
            assert_eq!(err.kind, "peer-unavailable");
            assert_eq!(err.message, "Could not connect to peer mamelodi-webrtc-it-bob");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    match next_event(&mut rx).await {
        TransportEvent::Error(err) => assert_eq!(err.kind, "socket-closed"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Disconnected(id) if id == WIRE_ID));

    server.await.unwrap();
    let uri = request_uri.lock().unwrap().clone().unwrap();
    assert!(uri.starts_with("/peerjs?key=peerjs&id=mamelodi-webrtc-it-alice&token="));
    assert!(uri.ends_with("&version=1.5.4"));

    transport.destroy();
}

#[tokio::test]
async fn test_unreachable_server() {
    // Grab a free port, then close it
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let factory = PeerJsTransportFactory::new(SignalingConfig {
        host: "127.0.0.1".to_string(),
        port,
        secure: false,
        ..Default::default()
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _transport = factory
        .create(WIRE_ID, &TransportOptions::default(), EventSink::new(1, tx))
        .unwrap();

    match next_event(&mut rx).await {
        TransportEvent::Error(err) => assert_eq!(err.kind, "socket-error"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Disconnected(_)));
}
