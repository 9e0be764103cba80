use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    result::Result as StdResult,
};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
pub const PREVIOUS_PROTOCOL_VERSION: &str = "2024-11-05";
/// Protocol revisions this runtime can speak, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[LATEST_PROTOCOL_VERSION, PREVIOUS_PROTOCOL_VERSION];
/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC error codes
/// JSON-RPC parse error code.
pub const PARSE_ERROR: i32 = -32700;
/// JSON-RPC invalid request error code.
pub const INVALID_REQUEST: i32 = -32600;
/// JSON-RPC method not found error code.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC invalid params error code.
pub const INVALID_PARAMS: i32 = -32602;
/// JSON-RPC internal error code.
pub const INTERNAL_ERROR: i32 = -32603;
/// The sampling peer (usually its user) rejected a createMessage request.
pub const SAMPLING_DECLINED: i32 = -1;

/// Refers to any valid JSON-RPC object that can be decoded off the wire, or
/// encoded to be sent.
///
/// Decoding classifies by shape: `id` and `method` make a request, `id`
/// alone makes a response, and no `id` makes a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
    Response(JSONRPCResponse),
}

impl JSONRPCMessage {
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
            extra: Map::new(),
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            extra: Map::new(),
        })
    }

    pub fn result(id: RequestId, result: Value) -> Self {
        Self::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Result(result),
            extra: Map::new(),
        })
    }

    pub fn error(id: RequestId, error: ErrorObject) -> Self {
        Self::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Error(error),
            extra: Map::new(),
        })
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Classify a decoded JSON value into an envelope.
    pub fn from_value(value: Value) -> StdResult<Self, String> {
        let Value::Object(mut map) = value else {
            return Err("envelope must be a JSON object".into());
        };

        match map.remove("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => return Err(format!("unsupported jsonrpc version: {other}")),
            None => return Err("missing jsonrpc version".into()),
        }

        let id = match map.remove("id") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                serde_json::from_value::<RequestId>(v)
                    .map_err(|_| "id must be a string or integer".to_string())?,
            ),
        };
        let method = match map.remove("method") {
            None => None,
            Some(Value::String(m)) => Some(m),
            Some(_) => return Err("method must be a string".into()),
        };

        match (id, method) {
            (Some(id), Some(method)) => {
                let params = map.remove("params");
                Ok(Self::Request(JSONRPCRequest {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    method,
                    params,
                    extra: map,
                }))
            }
            (None, Some(method)) => {
                let params = map.remove("params");
                Ok(Self::Notification(JSONRPCNotification {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    method,
                    params,
                    extra: map,
                }))
            }
            (Some(id), None) => {
                let payload = match (map.remove("result"), map.remove("error")) {
                    (Some(result), None) => ResponsePayload::Result(result),
                    (None, Some(error)) => ResponsePayload::Error(
                        serde_json::from_value(error)
                            .map_err(|e| format!("invalid error object: {e}"))?,
                    ),
                    (Some(_), Some(_)) => {
                        return Err("response carries both result and error".into());
                    }
                    (None, None) => return Err("response carries neither result nor error".into()),
                };
                Ok(Self::Response(JSONRPCResponse {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    payload,
                    extra: map,
                }))
            }
            (None, None) => Err("message has neither id nor method".into()),
        }
    }
}

impl<'de> Deserialize<'de> for JSONRPCMessage {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// A uniquely identifying ID for a request in JSON-RPC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// String request ID.
    String(String),
    /// Numeric request ID.
    Number(i64),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// A progress token, used to associate progress notifications with the original
/// request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

impl Display for ProgressToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for ProgressToken {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ProgressToken {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for ProgressToken {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// The reserved `_meta` member of request params.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RequestMeta {
    /// If specified, the caller is requesting out-of-band progress
    /// notifications for this request (as represented by
    /// notifications/progress). The value of this parameter is an opaque token
    /// that will be attached to any subsequent notifications. The receiver is
    /// not obligated to provide these notifications.
    #[serde(rename = "progressToken", skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<ProgressToken>,
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

impl RequestMeta {
    /// Extract `_meta` from raw request params. Absent or unparseable metadata
    /// yields the default.
    pub fn from_params(params: Option<&Value>) -> Self {
        params
            .and_then(|p| p.get("_meta"))
            .and_then(|m| serde_json::from_value(m.clone()).ok())
            .unwrap_or_default()
    }
}

/// A request that expects a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JSONRPCRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Top-level members this runtime does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A notification which does not expect a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JSONRPCNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A response to a request, carrying exactly one of a result or an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JSONRPCResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(flatten)]
    pub payload: ResponsePayload,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error type that occurred.
    pub code: i32,
    /// A short description of the error. The message SHOULD be limited to a
    /// concise single sentence.
    pub message: String,
    /// Additional information about the error. The value of this member is
    /// defined by the sender (e.g. detailed error information, nested
    /// errors etc.).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A response that indicates success but carries no data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyResult {
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}
