//! PeerJS signaling protocol
//!
//! JSON messages exchanged with a PeerJS server over its WebSocket endpoint.
//! Every message carries a `type`; routed messages carry `src` (from the
//! server) or `dst` (from us) and a `payload`.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

use mamelodi_config::SignalingConfig;

use crate::error::PeerJsError;

/// Client version announced to the server
pub const CLIENT_VERSION: &str = "1.5.4";

/// Connection type of data channel offers
pub const CONNECTION_TYPE_DATA: &str = "data";
/// Connection type of media call offers
pub const CONNECTION_TYPE_MEDIA: &str = "media";

/// The only serialization we speak
pub const SERIALIZATION_JSON: &str = "json";

/// Prefix of data connection ids
pub const CONNECTION_ID_PREFIX: &str = "dc_";

/// Random alphanumeric token
pub fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(11)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Fresh data connection id
pub fn new_connection_id() -> String {
    format!("{}{}", CONNECTION_ID_PREFIX, random_token())
}

/// WebSocket URL registering `id` with the server
pub fn socket_url(config: &SignalingConfig, id: &str, token: &str) -> Result<Url, PeerJsError> {
    let url = Url::parse_with_params(
        &config.socket_base_url(),
        &[
            ("key", config.key.as_str()),
            ("id", id),
            ("token", token),
            ("version", CLIENT_VERSION),
        ],
    )?;
    Ok(url)
}

/// An SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

/// A trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferPayload {
    pub sdp: SessionDescription,
    #[serde(rename = "type")]
    pub connection_type: String,
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub reliable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub sdp: SessionDescription,
    #[serde(rename = "type")]
    pub connection_type: String,
    #[serde(rename = "connectionId")]
    pub connection_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub candidate: IceCandidate,
    #[serde(rename = "type")]
    pub connection_type: String,
    #[serde(rename = "connectionId")]
    pub connection_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub msg: String,
}

/// Messages the server sends us
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Our id is registered
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "ERROR")]
    Error {
        #[serde(default)]
        payload: Option<ErrorPayload>,
    },
    #[serde(rename = "ID-TAKEN")]
    IdTaken {
        #[serde(default)]
        payload: Option<ErrorPayload>,
    },
    #[serde(rename = "INVALID-KEY")]
    InvalidKey {
        #[serde(default)]
        payload: Option<ErrorPayload>,
    },
    /// `src` left the server
    #[serde(rename = "LEAVE")]
    Leave { src: String },
    /// A message we sent to `src` could not be delivered
    #[serde(rename = "EXPIRE")]
    Expire { src: String },
    #[serde(rename = "OFFER")]
    Offer { src: String, payload: OfferPayload },
    #[serde(rename = "ANSWER")]
    Answer { src: String, payload: AnswerPayload },
    #[serde(rename = "CANDIDATE")]
    Candidate {
        src: String,
        payload: CandidatePayload,
    },
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Messages we send to the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "OFFER")]
    Offer { dst: String, payload: OfferPayload },
    #[serde(rename = "ANSWER")]
    Answer { dst: String, payload: AnswerPayload },
    #[serde(rename = "CANDIDATE")]
    Candidate {
        dst: String,
        payload: CandidatePayload,
    },
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Short name for logging
    pub fn msg_type(&self) -> &'static str {
        match self {
            ClientMessage::Offer { .. } => "OFFER",
            ClientMessage::Answer { .. } => "ANSWER",
            ClientMessage::Candidate { .. } => "CANDIDATE",
            ClientMessage::Heartbeat => "HEARTBEAT",
        }
    }
}

/// Encode an application payload for a `json` data channel
///
/// Valid JSON goes out unchanged; anything else is sent as a JSON string.
pub fn encode_json_payload(payload: &str) -> Result<String, serde_json::Error> {
    if serde_json::from_str::<serde_json::Value>(payload).is_ok() {
        Ok(payload.to_string())
    } else {
        serde_json::to_string(payload)
    }
}

/// Decode a `json` data channel message into an application payload
///
/// JSON strings are unwrapped; other values are passed on as JSON text.
pub fn decode_json_payload(text: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::String(s)) => s,
        _ => text.to_string(),
    }
}
