//! JSON-RPC 2.0 message model.
//!
//! Params and results stay as [`serde_json::Value`]: the proxy relays
//! payloads it does not interpret, and the few fields it does read are
//! extracted through explicit accessors rather than runtime reflection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{TransportError, TransportResult};

/// The JSON-RPC protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request id: JSON-RPC allows numbers and strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
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

/// A request: carries an id and expects exactly one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRpcRequest {
    /// Request id, unique per direction for the session.
    pub id: RequestId,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Method parameters, if any.
    pub params: Option<Value>,
}

/// An error object inside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code; server errors use the -32000..-32099 range.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A response: binds to a request by id, carrying a result or an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRpcResponse {
    /// Id of the request this answers.
    pub id: RequestId,
    /// Success payload.
    pub result: Option<Value>,
    /// Failure payload.
    pub error: Option<JsonRpcError>,
}

/// A notification: carries no id and expects no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRpcNotification {
    /// Method name.
    pub method: String,
    /// Method parameters, if any.
    pub params: Option<Value>,
}

/// One framed JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcMessage {
    /// A request (id + method).
    Request(JsonRpcRequest),
    /// A response (id + result or error).
    Response(JsonRpcResponse),
    /// A notification (method, no id).
    Notification(JsonRpcNotification),
}

/// Wire shape shared by all three message kinds.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// Build a request message.
    #[must_use]
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(JsonRpcRequest {
            id,
            method: method.into(),
            params,
        })
    }

    /// Build a notification message.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(JsonRpcNotification {
            method: method.into(),
            params,
        })
    }

    /// Build a success response.
    #[must_use]
    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response(JsonRpcResponse {
            id,
            result: Some(result),
            error: None,
        })
    }

    /// Build an error response.
    #[must_use]
    pub fn error_response(
        id: RequestId,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self::Response(JsonRpcResponse {
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        })
    }

    /// The message's request id, when it has one.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            Self::Notification(_) => None,
        }
    }

    /// The method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// True for [`JsonRpcMessage::Request`].
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Parse a message from a raw frame body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Parse`] when the body is not valid JSON
    /// or not classifiable as exactly one of request, response, or
    /// notification.
    pub fn from_bytes(bytes: &[u8]) -> TransportResult<Self> {
        let wire: WireMessage =
            serde_json::from_slice(bytes).map_err(|e| TransportError::Parse(e.to_string()))?;
        Self::from_wire(wire)
    }

    fn from_wire(wire: WireMessage) -> TransportResult<Self> {
        if wire.jsonrpc != JSONRPC_VERSION {
            return Err(TransportError::Parse(format!(
                "unsupported jsonrpc version: {:?}",
                wire.jsonrpc
            )));
        }
        match (wire.id, wire.method) {
            (Some(id), Some(method)) => Ok(Self::Request(JsonRpcRequest {
                id,
                method,
                params: wire.params,
            })),
            (None, Some(method)) => Ok(Self::Notification(JsonRpcNotification {
                method,
                params: wire.params,
            })),
            (Some(id), None) => {
                if wire.result.is_none() && wire.error.is_none() {
                    return Err(TransportError::Parse(
                        "response carries neither result nor error".to_string(),
                    ));
                }
                Ok(Self::Response(JsonRpcResponse {
                    id,
                    result: wire.result,
                    error: wire.error,
                }))
            },
            (None, None) => Err(TransportError::Parse(
                "message has neither id nor method".to_string(),
            )),
        }
    }

    /// Serialize to compact JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Parse`] when serialization fails; with
    /// `Value` payloads this only happens for non-string map keys.
    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        let wire = match self {
            Self::Request(r) => WireMessage {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: Some(r.id.clone()),
                method: Some(r.method.clone()),
                params: r.params.clone(),
                result: None,
                error: None,
            },
            Self::Response(r) => WireMessage {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: Some(r.id.clone()),
                method: None,
                params: None,
                result: r.result.clone(),
                error: r.error.clone(),
            },
            Self::Notification(n) => WireMessage {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: None,
                method: Some(n.method.clone()),
                params: n.params.clone(),
                result: None,
                error: None,
            },
        };
        serde_json::to_vec(&wire).map_err(|e| TransportError::Parse(e.to_string()))
    }
}
