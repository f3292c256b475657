use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CallId, UserId};

// SDP and ICE payloads are opaque: they are carried as raw JSON values and
// forwarded byte-for-byte. The server never inspects or canonicalizes them.

/// Events a client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Register { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    UserStatus { user_id: UserId, status: String },
    #[serde(rename_all = "camelCase")]
    CallInitiate {
        call_id: CallId,
        caller_id: UserId,
        receiver_ids: Vec<UserId>,
        call_type: String,
        #[serde(default)]
        extra_meta: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    CallAccept { call_id: CallId, receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    CallReject { call_id: CallId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    CallEnd { call_id: CallId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    UserReady { call_id: CallId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    WebrtcOffer {
        call_id: CallId,
        from: UserId,
        to: UserId,
        sdp: Value,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcAnswer {
        call_id: CallId,
        from: UserId,
        to: UserId,
        sdp: Value,
    },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        call_id: CallId,
        from: UserId,
        to: UserId,
        candidate: Value,
    },
}

/// Events the server sends to a client.
///
/// Forwarded signaling events carry the same name as their inbound
/// counterpart with the `to` field stripped; `to` is the only field ever
/// removed from a routed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Registered { success: bool },
    Error { message: String },
    ForceDisconnect { message: String },
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        call_id: CallId,
        caller_id: UserId,
        receiver_ids: Vec<UserId>,
        call_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extra_meta: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    CallRinging { call_id: CallId, receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    CallBusy { call_id: CallId, receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    CallAccepted { call_id: CallId, receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    CallRejected { call_id: CallId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    CallTimeout { call_id: CallId, reason: String },
    #[serde(rename_all = "camelCase")]
    CallEnded {
        call_id: CallId,
        user_id: UserId,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    StartSignaling { call_id: CallId },
    #[serde(rename_all = "camelCase")]
    WebrtcOffer {
        call_id: CallId,
        from: UserId,
        sdp: Value,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcAnswer {
        call_id: CallId,
        from: UserId,
        sdp: Value,
    },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        call_id: CallId,
        from: UserId,
        candidate: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_use_snake_case_names_and_camel_case_fields() {
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "call_initiate",
            "callId": "c1",
            "callerId": "alice",
            "receiverIds": ["bob"],
            "callType": "audio",
        }))
        .unwrap();
        match event {
            ClientEvent::CallInitiate {
                call_id,
                caller_id,
                receiver_ids,
                call_type,
                extra_meta,
            } => {
                assert_eq!(call_id, "c1");
                assert_eq!(caller_id, "alice");
                assert_eq!(receiver_ids, vec!["bob".to_string()]);
                assert_eq!(call_type, "audio");
                assert!(extra_meta.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn forwarded_offer_has_no_to_field() {
        let event = ServerEvent::WebrtcOffer {
            call_id: "c1".into(),
            from: "alice".into(),
            sdp: json!("v=0 raw-sdp"),
        };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "webrtc_offer");
        assert_eq!(wire["callId"], "c1");
        assert_eq!(wire["from"], "alice");
        assert_eq!(wire["sdp"], "v=0 raw-sdp");
        assert!(wire.get("to").is_none());
    }

    #[test]
    fn opaque_payloads_round_trip_unchanged() {
        let candidate = json!({
            "candidate": "candidate:1 1 UDP 2122252543 10.0.0.1 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        });
        let event = ServerEvent::IceCandidate {
            call_id: "c1".into(),
            from: "bob".into(),
            candidate: candidate.clone(),
        };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["candidate"], candidate);
    }

    #[test]
    fn extra_meta_is_omitted_when_absent() {
        let event = ServerEvent::IncomingCall {
            call_id: "c1".into(),
            caller_id: "alice".into(),
            receiver_ids: vec!["bob".into()],
            call_type: "video".into(),
            extra_meta: None,
        };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "incoming_call");
        assert!(wire.get("extraMeta").is_none());
    }
}
