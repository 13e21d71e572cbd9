//! Request objects and batch decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RequestId, VERSION};

/// A JSON-RPC request or notification.
///
/// A request without an id is a *notification*: the peer owes no response
/// for it, even on error. The `method` member decodes as an empty string
/// when absent so that validation, not decoding, reports the failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Version marker; `"2.0"`, or empty for unversioned v1 requests.
    #[serde(rename = "jsonrpc", default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Request id; absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    /// Name of the method to invoke.
    #[serde(default)]
    pub method: String,

    /// Opaque parameter value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a versioned call request.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Create a versioned notification (no id, no response owed).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Whether this request is a notification.
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// The params value, or JSON null when absent.
    pub fn params_or_null(&self) -> Value {
        self.params.clone().unwrap_or(Value::Null)
    }
}

/// A decoded inbound payload: one request or an array of them.
///
/// The wire form is remembered so responses can mirror it: a bare request
/// gets a bare response, an array gets an array (scenario-for-scenario,
/// a one-element array still answers with a one-element array).
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBatch {
    /// The requests, in wire order.
    pub requests: Vec<Request>,
    /// True when the payload was a JSON array.
    pub from_array: bool,
}

impl RequestBatch {
    /// Decode a payload value into a batch.
    ///
    /// An array decodes element-wise (an empty array is permitted here; the
    /// dispatcher rejects it). Any other value decodes as a single request.
    /// A shape failure anywhere rejects the whole payload.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Array(items) => {
                let requests = items
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<Result<Vec<Request>, _>>()?;
                Ok(Self {
                    requests,
                    from_array: true,
                })
            }
            other => Ok(Self {
                requests: vec![serde_json::from_value(other)?],
                from_array: false,
            }),
        }
    }

    /// Number of requests in the batch.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
