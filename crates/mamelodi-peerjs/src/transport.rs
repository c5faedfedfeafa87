//! PeerJS transport and its factory

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use mamelodi_config::SignalingConfig;
use mamelodi_webrtc::{
    ConnectionMetadata, DataConnection, EventSink, Transport, TransportError, TransportFactory,
    TransportOptions,
};

use crate::connection::{Connections, PeerJsConnection, Role};
use crate::protocol::{new_connection_id, random_token, socket_url, ClientMessage};
use crate::socket;

/// State shared by a transport, its socket task and its connections
pub(crate) struct Shared {
    /// Our wire id
    pub id: String,
    /// API key, echoed in `invalid-key` errors
    pub key: String,
    pub sink: EventSink,
    pub stun_servers: Vec<String>,
    /// Messages for the socket task to send
    pub signaling: mpsc::UnboundedSender<ClientMessage>,
    pub connections: Arc<Connections>,
    pub runtime: Handle,
}

impl Shared {
    pub(crate) fn new_connection(
        &self,
        connection_id: String,
        peer: String,
        metadata: Option<ConnectionMetadata>,
    ) -> (
        Arc<PeerJsConnection>,
        mpsc::UnboundedReceiver<crate::connection::Signal>,
    ) {
        let (conn, signals) = PeerJsConnection::new(
            connection_id,
            peer,
            metadata,
            self.sink.clone(),
            self.signaling.clone(),
            &self.connections,
        );
        self.connections.insert(conn.clone());
        (conn, signals)
    }
}

/// Creates [`PeerJsTransport`]s against one signaling server
#[derive(Debug, Clone)]
pub struct PeerJsTransportFactory {
    config: SignalingConfig,
}

impl PeerJsTransportFactory {
    pub fn new(config: SignalingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }
}

impl TransportFactory for PeerJsTransportFactory {
    /// Registers `local_wire_id` with the server
    ///
    /// Must be called from within a tokio runtime; all network work runs on
    /// spawned tasks.
    fn create(
        &self,
        local_wire_id: &str,
        options: &TransportOptions,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let runtime =
            Handle::try_current().map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let url = socket_url(&self.config, local_wire_id, &random_token())
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let (signaling, outgoing) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            id: local_wire_id.to_string(),
            key: self.config.key.clone(),
            sink,
            stun_servers: options.stun_servers.clone(),
            signaling,
            connections: Arc::new(Connections::default()),
            runtime: runtime.clone(),
        });

        let heartbeat = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        runtime.spawn(socket::run(url, shared.clone(), outgoing, shutdown_rx, heartbeat));

        info!("PeerJS transport created for {}", local_wire_id);
        Ok(Box::new(PeerJsTransport {
            shared,
            shutdown,
            destroyed: AtomicBool::new(false),
        }))
    }
}

/// One registration with a PeerJS server
pub struct PeerJsTransport {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    destroyed: AtomicBool,
}

impl Transport for PeerJsTransport {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn connect(
        &self,
        wire_id: &str,
        metadata: ConnectionMetadata,
    ) -> Result<Arc<dyn DataConnection>, TransportError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(TransportError::Destroyed);
        }

        let (conn, signals) =
            self.shared
                .new_connection(new_connection_id(), wire_id.to_string(), Some(metadata));
        debug!("Dialing {} over {}", wire_id, conn.connection_id());
        conn.spawn(
            &self.shared.runtime,
            Role::Dial,
            signals,
            self.shared.stun_servers.clone(),
        );
        Ok(conn)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "Destroying PeerJS transport {} ({} connections)",
            self.shared.id,
            self.shared.connections.len()
        );
        let _ = self.shutdown.send(true);
        for conn in self.shared.connections.drain() {
            conn.close();
        }
    }
}

impl Drop for PeerJsTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_runtime() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = PeerJsTransportFactory::new(SignalingConfig::default());

        let result = factory.create(
            "mamelodi-webrtc-alice",
            &TransportOptions::default(),
            EventSink::new(1, tx),
        );

        assert!(matches!(result, Err(TransportError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_connect_after_destroy() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = PeerJsTransportFactory::new(SignalingConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            secure: false,
            ..Default::default()
        });
        let transport = factory
            .create("mamelodi-webrtc-alice", &TransportOptions::default(), EventSink::new(1, tx))
            .unwrap();
        assert_eq!(transport.id(), "mamelodi-webrtc-alice");

        transport.destroy();
        assert!(matches!(
            transport.connect("mamelodi-webrtc-bob", ConnectionMetadata::new("alice", "bob")),
            Err(TransportError::Destroyed)
        ));
    }
}
