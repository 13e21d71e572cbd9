//! On-wire JSON-RPC 2.0 message shapes.
//!
//! Provides:
//! - [`RequestId`] - scalar request ids with numeric canonicalization
//! - [`Request`] / [`RequestBatch`] - inbound/outbound request objects
//! - [`Response`] - result-or-error response objects

mod id;
mod request;
mod response;

pub use id::RequestId;
pub use request::{Request, RequestBatch};
pub use response::Response;

/// The JSON-RPC version marker carried in the `jsonrpc` member.
pub const VERSION: &str = "2.0";
