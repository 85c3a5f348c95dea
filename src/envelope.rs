//! Wire envelopes for both protocol namespaces.
//!
//! RPC and bridge envelopes share a transport but never a tag: the two
//! namespaces are disjoint strings, carried here as two Rust enums joined by
//! an outer [`Envelope`]. Unknown tags deserialize as
//! `Envelope::Unknown` and are silently ignored by both engines, rather than
//! failing the connection over a message neither side needs to understand.

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level wire envelope. `serde`'s adjacently-tagged representation gives
/// every envelope a `"tag"` discriminant and a `"body"` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag", content = "body")]
pub enum Envelope {
    #[serde(rename = "HANDSHAKE_REQUEST")]
    HandshakeRequest(Handshake),
    #[serde(rename = "HANDSHAKE_REPLY")]
    HandshakeReply(Handshake),
    #[serde(rename = "RPC_REQUEST")]
    RpcRequest(RpcRequest),
    #[serde(rename = "RPC_RESOLVE")]
    RpcResolve(RpcResolve),
    #[serde(rename = "RPC_REJECT")]
    RpcReject(RpcReject),

    #[serde(rename = "BRIDGE_HANDSHAKE")]
    BridgeHandshake(BridgeHandshake),
    #[serde(rename = "BRIDGE_HANDSHAKE_ACK")]
    BridgeHandshakeAck(BridgeHandshakeAck),
    #[serde(rename = "BRIDGE_HANDSHAKE_ERROR")]
    BridgeHandshakeError(BridgeHandshakeError),
    #[serde(rename = "BRIDGE_BROADCAST")]
    BridgeBroadcast(BridgeBroadcast),
    #[serde(rename = "BRIDGE_RELAY")]
    BridgeRelay(BridgeRelay),
    #[serde(rename = "BRIDGE_DIRECT_MESSAGE")]
    BridgeDirectMessage(BridgeDirectMessage),
    #[serde(rename = "BRIDGE_DISCONNECT")]
    BridgeDisconnect(BridgeDisconnect),
    #[serde(rename = "BRIDGE_GET_TABS")]
    BridgeGetTabs(BridgeGetTabs),
    #[serde(rename = "BRIDGE_TABS_RESPONSE")]
    BridgeTabsResponse(BridgeTabsResponse),
    #[serde(rename = "BRIDGE_GET_STATE")]
    BridgeGetState(BridgeGetState),
    #[serde(rename = "BRIDGE_STATE_RESPONSE")]
    BridgeStateResponse(BridgeStateResponse),
    #[serde(rename = "BRIDGE_SET_STATE")]
    BridgeSetState(BridgeSetState),
    #[serde(rename = "BRIDGE_STATE_UPDATE")]
    BridgeStateUpdate(BridgeStateUpdate),

    /// Anything this build doesn't recognize. Deserializing into this
    /// variant instead of failing is what makes unknown tags silently
    /// ignorable rather than a hard parse error.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    pub cid: String,
    pub method_names: Vec<String>,
    pub schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub cid: String,
    pub call_id: String,
    pub call_name: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResolve {
    pub cid: String,
    pub call_id: String,
    pub call_name: String,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcReject {
    pub cid: String,
    pub call_id: String,
    pub call_name: String,
    pub error: RemoteError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeHandshake {
    pub tab_id: String,
    pub method_names: Vec<String>,
    pub channel: String,
    #[serde(default)]
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeHandshakeAck {
    pub tab_id: String,
    pub channel: String,
    pub shared_state: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BridgeErrorCode {
    #[serde(rename = "DUPLICATE_TAB_ID")]
    DuplicateTabId,
    #[serde(rename = "INVALID_PAYLOAD")]
    InvalidPayload,
    #[serde(rename = "UNKNOWN_ERROR")]
    UnknownError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeHandshakeError {
    pub code: BridgeErrorCode,
    pub error: String,
    #[serde(default)]
    pub tab_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeBroadcast {
    pub sender_tab_id: String,
    pub channel: String,
    pub method_name: String,
    pub args: Vec<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRelay {
    pub sender_tab_id: String,
    pub method_name: String,
    pub args: Vec<Value>,
    #[serde(default)]
    pub sender_result: Option<Value>,
    #[serde(default)]
    pub sender_error: Option<RemoteError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeDirectMessage {
    pub sender_tab_id: String,
    pub target_tab_id: String,
    pub channel: String,
    pub method_name: String,
    pub args: Vec<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeDisconnect {
    pub tab_id: String,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeGetTabs {
    pub channel: String,
    pub requesting_tab_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeTabsResponse {
    pub tab_ids: Vec<String>,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeGetState {
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStateResponse {
    pub state: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSetState {
    pub channel: String,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStateUpdate {
    pub key: String,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_deserializes_without_error() {
        let raw = serde_json::json!({ "tag": "SOMETHING_NEW", "body": { "x": 1 } });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        assert!(matches!(envelope, Envelope::Unknown));
    }

    #[test]
    fn rpc_request_round_trips_through_json() {
        let req = Envelope::RpcRequest(RpcRequest {
            cid: "abc".into(),
            call_id: "def".into(),
            call_name: "math.add".into(),
            args: vec![Value::from(1), Value::from(2)],
        });
        let json = serde_json::to_value(&req).unwrap();
        let back: Envelope = serde_json::from_value(json).unwrap();
        match back {
            Envelope::RpcRequest(r) => {
                assert_eq!(r.cid, "abc");
                assert_eq!(r.call_name, "math.add");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
