use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::RequestId;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCRequest {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JSONRPCRequest {
    pub fn new(id: RequestId, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    /// True for `notifications/*` and other id-less messages.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCResponse {
    #[serde(default = "default_jsonrpc_version")]
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub result: Value,
}

fn default_jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl JSONRPCResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc_version(),
            id: Some(id),
            result,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCError {
    #[serde(default = "default_jsonrpc_version")]
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: JSONRPCErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JSONRPCErrorDetails {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JSONRPCError {
    pub fn new(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: default_jsonrpc_version(),
            id,
            error: JSONRPCErrorDetails {
                code,
                message: message.into(),
                data: None,
            },
        }
    }
}

/// Either side of a JSON-RPC exchange, as read off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    Response(JSONRPCResponse),
    Error(JSONRPCError),
    Request(JSONRPCRequest),
}

#[test]
fn response_defaults_jsonrpc_version_on_deserialize() {
    let raw = serde_json::json!({"id": 7, "result": {"ok": true}});
    let parsed: JSONRPCResponse = serde_json::from_value(raw).unwrap();
    assert_eq!(parsed.jsonrpc, JSONRPC_VERSION);
    assert_eq!(parsed.id, Some(RequestId::Integer(7)));
}

#[test]
fn message_distinguishes_error_from_response() {
    let raw = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": -32601, "message": "Method not found"}
    });
    match serde_json::from_value::<JSONRPCMessage>(raw).unwrap() {
        JSONRPCMessage::Error(err) => assert_eq!(err.error.code, METHOD_NOT_FOUND),
        other => panic!("unexpected message: {other:?}"),
    }
}
