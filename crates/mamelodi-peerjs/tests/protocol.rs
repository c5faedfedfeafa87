//! Wire shapes of the PeerJS signaling protocol

use mamelodi_peerjs::protocol::{
    AnswerPayload, CandidatePayload, ClientMessage, IceCandidate, OfferPayload, ServerMessage,
    SessionDescription,
};
use mamelodi_webrtc::ConnectionMetadata;
use serde_json::json;

#[test]
fn test_parse_offer_from_browser_peer() {
    let text = json!({
        "type": "OFFER",
        "src": "mamelodi-webrtc-bob",
        "dst": "mamelodi-webrtc-alice",
        "payload": {
            "sdp": { "type": "offer", "sdp": "v=0\r\n" },
            "type": "data",
            "connectionId": "dc_abc",
            "label": "dc_abc",
            "reliable": true,
            "serialization": "json",
            "metadata": { "peerId": "bob", "targetPeerId": "alice" },
            "browser": "firefox"
        }
    })
    .to_string();

    match ServerMessage::parse(&text).unwrap() {
        ServerMessage::Offer { src, payload } => {
            assert_eq!(src, "mamelodi-webrtc-bob");
            assert_eq!(payload.connection_id, "dc_abc");
            assert_eq!(payload.sdp.sdp_type, "offer");
            assert_eq!(payload.serialization.as_deref(), Some("json"));
            let metadata: ConnectionMetadata =
                serde_json::from_value(payload.metadata.unwrap()).unwrap();
            assert_eq!(metadata, ConnectionMetadata::new("bob", "alice"));
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_parse_candidate() {
    let text = r#"{"type":"CANDIDATE","src":"mamelodi-webrtc-bob","payload":{"candidate":{"candidate":"candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host","sdpMid":"0","sdpMLineIndex":0},"type":"data","connectionId":"dc_abc"}}"#;

    match ServerMessage::parse(text).unwrap() {
        ServerMessage::Candidate { payload, .. } => {
            assert_eq!(payload.connection_id, "dc_abc");
            assert_eq!(payload.candidate.sdp_mid.as_deref(), Some("0"));
            assert_eq!(payload.candidate.sdp_mline_index, Some(0));
            assert_eq!(payload.candidate.username_fragment, None);
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_parse_control_messages() {
    assert_eq!(ServerMessage::parse(r#"{"type":"OPEN"}"#).unwrap(), ServerMessage::Open);
    assert_eq!(
        ServerMessage::parse(r#"{"type":"LEAVE","src":"x-bob"}"#).unwrap(),
        ServerMessage::Leave {
            src: "x-bob".to_string()
        }
    );
    assert!(matches!(
        ServerMessage::parse(r#"{"type":"INVALID-KEY","payload":{"msg":"Invalid key provided"}}"#).unwrap(),
        ServerMessage::InvalidKey { payload: Some(p) } if p.msg == "Invalid key provided"
    ));
    assert_eq!(
        ServerMessage::parse(r#"{"type":"NEW-THING","payload":1}"#).unwrap(),
        ServerMessage::Unknown
    );
    assert!(ServerMessage::parse(r#"{"no_type":true}"#).is_err());
}

#[test]
fn test_client_offer_shape() {
    let message = ClientMessage::Offer {
        dst: "mamelodi-webrtc-bob".to_string(),
        payload: OfferPayload {
            sdp: SessionDescription {
                sdp_type: "offer".to_string(),
                sdp: "v=0".to_string(),
            },
            connection_type: "data".to_string(),
            connection_id: "dc_xyz".to_string(),
            label: Some("dc_xyz".to_string()),
            reliable: true,
            serialization: Some("json".to_string()),
            metadata: Some(serde_json::to_value(ConnectionMetadata::new("alice", "bob")).unwrap()),
        },
    };

    let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "OFFER",
            "dst": "mamelodi-webrtc-bob",
            "payload": {
                "sdp": { "type": "offer", "sdp": "v=0" },
                "type": "data",
                "connectionId": "dc_xyz",
                "label": "dc_xyz",
                "reliable": true,
                "serialization": "json",
                "metadata": { "peerId": "alice", "targetPeerId": "bob" }
            }
        })
    );
}

#[test]
fn test_client_answer_and_candidate_shapes() {
    let answer = ClientMessage::Answer {
        dst: "x-bob".to_string(),
        payload: AnswerPayload {
            sdp: SessionDescription {
                sdp_type: "answer".to_string(),
                sdp: "v=0".to_string(),
            },
            connection_type: "data".to_string(),
            connection_id: "dc_1".to_string(),
        },
    };
    let value: serde_json::Value = serde_json::from_str(&answer.to_json().unwrap()).unwrap();
    assert_eq!(value["type"], "ANSWER");
    assert_eq!(value["payload"]["sdp"]["type"], "answer");
    assert_eq!(value["payload"]["connectionId"], "dc_1");

    let candidate = ClientMessage::Candidate {
        dst: "x-bob".to_string(),
        payload: CandidatePayload {
            candidate: IceCandidate {
                candidate: "candidate:1".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
            connection_type: "data".to_string(),
            connection_id: "dc_1".to_string(),
        },
    };
    let value: serde_json::Value = serde_json::from_str(&candidate.to_json().unwrap()).unwrap();
    assert_eq!(
        value["payload"]["candidate"],
        json!({ "candidate": "candidate:1", "sdpMid": "0", "sdpMLineIndex": 0 })
    );
}
