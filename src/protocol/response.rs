//! Response objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

use super::{RequestId, VERSION};

/// A JSON-RPC response carrying exactly one of `result` or `error`.
///
/// The id echoes the request's id; it serializes as JSON `null` when the
/// server could not recover an id (parse failures, empty batches).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Version marker, `"2.0"`.
    #[serde(rename = "jsonrpc", default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Echoed request id, or null.
    #[serde(default)]
    pub id: Option<RequestId>,

    /// Successful result value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error object on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

impl Response {
    /// A successful response for the given id.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            version: VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// An error response; `id` is `None` when no id could be recovered.
    pub fn failure(id: Option<RequestId>, error: Error) -> Self {
        Self {
            version: VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// The empty placeholder a batch hands back for notification slots.
    /// Carries neither result nor error and never reaches the wire.
    pub(crate) fn placeholder() -> Self {
        Self {
            version: String::new(),
            id: None,
            result: None,
            error: None,
        }
    }

    /// Whether this response reports an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Consume the response into its result, or the error it carries.
    ///
    /// A response with neither member (a batch placeholder) yields
    /// `Ok(Value::Null)`.
    pub fn into_result(self) -> Result<Value, Error> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// Deserialize the result value into a concrete type.
    pub fn result_as<T: serde::de::DeserializeOwned>(self) -> Result<T, Error> {
        let value = self.into_result()?;
        serde_json::from_value(value).map_err(|e| Error::internal(e.to_string()))
    }
}
