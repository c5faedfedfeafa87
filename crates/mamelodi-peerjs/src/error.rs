//! PeerJS transport errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerJsError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid signaling URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("No local description after negotiation")]
    MissingLocalDescription,
}
