//! Error codes and error types.
//!
//! Two layers of errors live here:
//!
//! - [`Error`] is the structured JSON-RPC error object (`code`, `message`,
//!   optional `data`). It travels inside responses, is returned by method
//!   handlers, and is what clients inspect on a failed call.
//! - [`RpcError`] is the crate-level error for everything that never reaches
//!   the wire: I/O failures, framing violations, a closed channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A numeric JSON-RPC error code.
///
/// The reserved range (-32768..=-32000) is defined by the JSON-RPC 2.0
/// specification; the three `-3200x` codes are used by this runtime for
/// conditions the wire format has no standard code for.
///
/// # Example
///
/// ```
/// use jsonwire::Code;
///
/// assert_eq!(Code::METHOD_NOT_FOUND.0, -32601);
/// assert_eq!(Code::METHOD_NOT_FOUND.message(), Some("method not found"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Code(pub i64);

impl Code {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: Code = Code(-32700);
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: Code = Code(-32600);
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: Code = Code(-32601);
    /// Invalid method parameters.
    pub const INVALID_PARAMS: Code = Code(-32602);
    /// Internal JSON-RPC error.
    pub const INTERNAL: Code = Code(-32603);

    /// A server-side system error outside the reserved set.
    pub const SYSTEM: Code = Code(-32000);
    /// The request was cancelled before a response arrived.
    pub const CANCELLED: Code = Code(-32001);
    /// The server or client stopped before the request completed.
    pub const STOPPED: Code = Code(-32002);

    /// The standard message text for this code, if it has one.
    pub fn message(self) -> Option<&'static str> {
        match self {
            Code::PARSE_ERROR => Some("parse error"),
            Code::INVALID_REQUEST => Some("invalid request"),
            Code::METHOD_NOT_FOUND => Some("method not found"),
            Code::INVALID_PARAMS => Some("invalid params"),
            Code::INTERNAL => Some("internal error"),
            Code::SYSTEM => Some("system error"),
            Code::CANCELLED => Some("request cancelled"),
            Code::STOPPED => Some("server stopped"),
            _ => None,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(text) => f.write_str(text),
            None => write!(f, "error code {}", self.0),
        }
    }
}

impl From<i64> for Code {
    fn from(code: i64) -> Self {
        Code(code)
    }
}

/// A structured JSON-RPC error: the `error` member of a response.
///
/// Method handlers return this type directly; the dispatcher carries it to
/// the wire unchanged, so handlers control the code the peer observes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct Error {
    /// Numeric error code.
    pub code: Code,
    /// Short human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Error {
    /// Create an error with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error carrying structured data.
    pub fn with_data(code: Code, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// An error with the code's standard message text.
    pub fn from_code(code: Code) -> Self {
        match code.message() {
            Some(text) => Self::new(code, text),
            None => Self::new(code, format!("error code {}", code.0)),
        }
    }

    /// A `-32700` parse error.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(Code::PARSE_ERROR, message)
    }

    /// A `-32600` invalid request.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Code::INVALID_REQUEST, message)
    }

    /// A `-32601` method-not-found error naming the method.
    pub fn method_not_found(name: &str) -> Self {
        Self::new(Code::METHOD_NOT_FOUND, format!("no such method {name:?}"))
    }

    /// A `-32602` invalid-params error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Code::INVALID_PARAMS, message)
    }

    /// A `-32603` internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::INTERNAL, message)
    }

    /// A `-32001` cancellation error.
    pub fn cancelled() -> Self {
        Self::from_code(Code::CANCELLED)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err.to_string())
    }
}

/// Errors reported by the runtime itself rather than a JSON-RPC peer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// I/O failure on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure on an outbound message.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The framing layer observed a protocol violation. Fatal to the channel.
    #[error("framing error: {0}")]
    Frame(String),

    /// A structured JSON-RPC error.
    #[error(transparent)]
    Rpc(#[from] Error),

    /// The peer closed the connection at a message boundary.
    #[error("end of input")]
    Eof,
}

impl RpcError {
    /// The structured error code, if this error carries one.
    pub fn code(&self) -> Option<Code> {
        match self {
            RpcError::Rpc(err) => Some(err.code),
            _ => None,
        }
    }
}

/// Result type alias using [`RpcError`].
pub type Result<T> = std::result::Result<T, RpcError>;
