//! PeerJS data connection over a WebRTC peer connection
//!
//! Each connection owns one `RTCPeerConnection` with a single ordered data
//! channel labelled with the connection id. Negotiation runs on its own task
//! and consumes the answer and trickled candidates routed to it by the socket.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use mamelodi_webrtc::{
    ConnectionEvent, ConnectionMetadata, DataConnection, EventSink, ProviderError, TransportError,
};

use crate::error::PeerJsError;
use crate::protocol::{
    decode_json_payload, encode_json_payload, AnswerPayload, CandidatePayload, ClientMessage,
    IceCandidate, OfferPayload, SessionDescription, CONNECTION_TYPE_DATA, SERIALIZATION_JSON,
};
use crate::{KIND_SEND_FAILED, KIND_WEBRTC};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Signaling input routed to one connection
#[derive(Debug)]
pub(crate) enum Signal {
    Answer(String),
    Candidate(IceCandidate),
    Close,
}

/// Which side of the negotiation we are
pub(crate) enum Role {
    /// We dialed: create the channel and send the offer
    Dial,
    /// They dialed: apply their offer and answer it
    Accept { offer_sdp: String },
}

/// Live connections of one transport, by connection id
#[derive(Default)]
pub(crate) struct Connections {
    inner: Mutex<HashMap<String, Arc<PeerJsConnection>>>,
}

impl Connections {
    pub(crate) fn insert(&self, conn: Arc<PeerJsConnection>) {
        lock(&self.inner).insert(conn.connection_id.clone(), conn);
    }

    pub(crate) fn get(&self, connection_id: &str) -> Option<Arc<PeerJsConnection>> {
        lock(&self.inner).get(connection_id).cloned()
    }

    pub(crate) fn remove(&self, connection_id: &str) -> Option<Arc<PeerJsConnection>> {
        lock(&self.inner).remove(connection_id)
    }

    pub(crate) fn to_peer(&self, peer: &str) -> Vec<Arc<PeerJsConnection>> {
        lock(&self.inner)
            .values()
            .filter(|c| c.peer == peer)
            .cloned()
            .collect()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<PeerJsConnection>> {
        lock(&self.inner).drain().map(|(_, c)| c).collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).len()
    }
}

/// One PeerJS data connection
pub struct PeerJsConnection {
    connection_id: String,
    /// Remote wire id
    peer: String,
    metadata: Option<ConnectionMetadata>,
    sink: EventSink,
    signaling: mpsc::UnboundedSender<ClientMessage>,
    signals: mpsc::UnboundedSender<Signal>,
    /// Payloads waiting for the channel writer; `None` once closed
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    table: Weak<Connections>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl PeerJsConnection {
    pub(crate) fn new(
        connection_id: String,
        peer: String,
        metadata: Option<ConnectionMetadata>,
        sink: EventSink,
        signaling: mpsc::UnboundedSender<ClientMessage>,
        table: &Arc<Connections>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Signal>) {
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            connection_id,
            peer,
            metadata,
            sink,
            signaling,
            signals,
            outgoing: Mutex::new(Some(outgoing)),
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            table: Arc::downgrade(table),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        (conn, signals_rx)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn signal(&self, signal: Signal) {
        let _ = self.signals.send(signal);
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        self.sink.emit_connection(self.connection_id.clone(), event);
    }

    fn send_signal(&self, message: ClientMessage) {
        debug!("Queueing {} for {} ({})", message.msg_type(), self.peer, self.connection_id);
        let _ = self.signaling.send(message);
    }

    /// Start negotiating on `runtime`
    pub(crate) fn spawn(
        self: &Arc<Self>,
        runtime: &Handle,
        role: Role,
        signals: mpsc::UnboundedReceiver<Signal>,
        stun_servers: Vec<String>,
    ) {
        let conn = self.clone();
        runtime.spawn(async move {
            if let Err(e) = conn.negotiate(role, signals, &stun_servers).await {
                if !conn.is_closed() {
                    warn!("Connection {} to {} failed: {}", conn.connection_id, conn.peer, e);
                    conn.emit(ConnectionEvent::Error(ProviderError::new(KIND_WEBRTC, e.to_string())));
                    conn.close();
                }
            }
        });
    }

    async fn negotiate(
        self: &Arc<Self>,
        role: Role,
        signals: mpsc::UnboundedReceiver<Signal>,
        stun_servers: &[String],
    ) -> Result<(), PeerJsError> {
        let pc = Arc::new(new_peer_connection(stun_servers).await?);
        self.watch(&pc);

        let result = self.exchange(&pc, role, signals).await;
        if let Err(e) = pc.close().await {
            debug!("Error closing peer connection {}: {}", self.connection_id, e);
        }
        result
    }

    /// Offer/answer, then apply routed signals until closed
    async fn exchange(
        self: &Arc<Self>,
        pc: &Arc<RTCPeerConnection>,
        role: Role,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) -> Result<(), PeerJsError> {
        let mut remote_set = false;
        match role {
            Role::Dial => {
                let init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = pc.create_data_channel(&self.connection_id, Some(init)).await?;
                self.attach(dc);

                let offer = pc.create_offer(None).await?;
                let sdp = offer.sdp.clone();
                pc.set_local_description(offer).await?;

                let metadata = self
                    .metadata
                    .as_ref()
                    .map(serde_json::to_value)
                    .transpose()?;
                self.send_signal(ClientMessage::Offer {
                    dst: self.peer.clone(),
                    payload: OfferPayload {
                        sdp: SessionDescription {
                            sdp_type: "offer".to_string(),
                            sdp,
                        },
                        connection_type: CONNECTION_TYPE_DATA.to_string(),
                        connection_id: self.connection_id.clone(),
                        label: Some(self.connection_id.clone()),
                        reliable: true,
                        serialization: Some(SERIALIZATION_JSON.to_string()),
                        metadata,
                    },
                });
            }
            Role::Accept { offer_sdp } => {
                let weak = Arc::downgrade(self);
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let weak = weak.clone();
                    Box::pin(async move {
                        if let Some(conn) = weak.upgrade() {
                            debug!("Received data channel '{}' from {}", dc.label(), conn.peer);
                            conn.attach(dc);
                        }
                    })
                }));

                pc.set_remote_description(RTCSessionDescription::offer(offer_sdp)?)
                    .await?;
                remote_set = true;

                let answer = pc.create_answer(None).await?;
                let sdp = answer.sdp.clone();
                pc.set_local_description(answer).await?;

                self.send_signal(ClientMessage::Answer {
                    dst: self.peer.clone(),
                    payload: AnswerPayload {
                        sdp: SessionDescription {
                            sdp_type: "answer".to_string(),
                            sdp,
                        },
                        connection_type: CONNECTION_TYPE_DATA.to_string(),
                        connection_id: self.connection_id.clone(),
                    },
                });
            }
        }

        // Candidates can overtake the answer on the signaling socket
        let mut early_candidates = Vec::new();
        while let Some(signal) = signals.recv().await {
            match signal {
                Signal::Answer(sdp) => {
                    pc.set_remote_description(RTCSessionDescription::answer(sdp)?)
                        .await?;
                    remote_set = true;
                    for candidate in early_candidates.drain(..) {
                        self.add_candidate(pc, candidate).await;
                    }
                }
                Signal::Candidate(candidate) if remote_set => self.add_candidate(pc, candidate).await,
                Signal::Candidate(candidate) => early_candidates.push(candidate),
                Signal::Close => break,
            }
        }
        Ok(())
    }

    async fn add_candidate(&self, pc: &RTCPeerConnection, candidate: IceCandidate) {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        if let Err(e) = pc.add_ice_candidate(init).await {
            warn!("Failed to add ICE candidate for {}: {}", self.connection_id, e);
        }
    }

    /// Peer connection level handlers
    fn watch(self: &Arc<Self>, pc: &RTCPeerConnection) {
        let weak = Arc::downgrade(self);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let weak = weak.clone();
            Box::pin(async move {
                let (Some(conn), Some(candidate)) = (weak.upgrade(), candidate) else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => conn.send_signal(ClientMessage::Candidate {
                        dst: conn.peer.clone(),
                        payload: CandidatePayload {
                            candidate: IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            },
                            connection_type: CONNECTION_TYPE_DATA.to_string(),
                            connection_id: conn.connection_id.clone(),
                        },
                    }),
                    Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(conn) = weak.upgrade() {
                    conn.emit(ConnectionEvent::IceStateChanged(state.to_string()));
                }
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(conn) = weak.upgrade() else {
                    return;
                };
                debug!("Peer connection {} state: {}", conn.connection_id, state);
                match state {
                    RTCPeerConnectionState::Failed => {
                        conn.emit(ConnectionEvent::Error(ProviderError::new(
                            KIND_WEBRTC,
                            format!("Negotiation of connection to {} failed.", conn.peer),
                        )));
                        conn.close();
                    }
                    RTCPeerConnectionState::Closed => conn.close(),
                    _ => {}
                }
            })
        }));
    }

    /// Data channel handlers
    fn attach(self: &Arc<Self>, dc: Arc<RTCDataChannel>) {
        let weak = Arc::downgrade(self);
        let weak_dc = Arc::downgrade(&dc);
        dc.on_open(Box::new(move || {
            let weak = weak.clone();
            let weak_dc = weak_dc.clone();
            Box::pin(async move {
                if let (Some(conn), Some(dc)) = (weak.upgrade(), weak_dc.upgrade()) {
                    conn.channel_open(dc);
                }
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(conn) = weak.upgrade() else {
                    return;
                };
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => conn.emit(ConnectionEvent::Data(decode_json_payload(&text))),
                    Err(_) => warn!(
                        "Dropping {} non-UTF-8 bytes from {}",
                        msg.data.len(),
                        conn.peer
                    ),
                }
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_close(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(conn) = weak.upgrade() {
                    conn.close();
                }
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_error(Box::new(move |err: webrtc::Error| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(conn) = weak.upgrade() {
                    conn.emit(ConnectionEvent::Error(ProviderError::new(KIND_WEBRTC, err.to_string())));
                }
            })
        }));
    }

    /// Start the writer and report the connection open
    fn channel_open(self: &Arc<Self>, dc: Arc<RTCDataChannel>) {
        let Some(mut rx) = lock(&self.outgoing_rx).take() else {
            return;
        };
        if self.is_closed() {
            return;
        }
        self.open.store(true, Ordering::SeqCst);
        info!("Data channel '{}' to {} open", dc.label(), self.peer);

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if let Err(e) = dc.send(&Bytes::from(payload)).await {
                    if let Some(conn) = weak.upgrade() {
                        conn.emit(ConnectionEvent::Error(ProviderError::new(
                            KIND_SEND_FAILED,
                            e.to_string(),
                        )));
                    }
                }
            }
            let _ = dc.close().await;
        });

        self.emit(ConnectionEvent::Open);
    }
}

impl DataConnection for PeerJsConnection {
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
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let encoded =
            encode_json_payload(payload).map_err(|e| TransportError::SendFailed(e.to_string()))?;
        match lock(&self.outgoing).as_ref() {
            Some(tx) => tx.send(encoded).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);
        lock(&self.outgoing).take();
        self.signal(Signal::Close);
        if let Some(table) = self.table.upgrade() {
            table.remove(&self.connection_id);
        }
        debug!("Connection {} to {} closed", self.connection_id, self.peer);
        self.emit(ConnectionEvent::Close);
    }
}

async fn new_peer_connection(stun_servers: &[String]) -> Result<RTCPeerConnection, PeerJsError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let ice_servers: Vec<RTCIceServer> = stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    Ok(api.new_peer_connection(config).await?)
}
