//! # jsonwire
//!
//! A JSON-RPC 2.0 runtime over any bidirectional byte stream.
//!
//! The crate has three layers:
//!
//! - **Framing** ([`channel`]): turns a raw byte stream into discrete JSON
//!   payloads. Five disciplines: raw (JSON-syntax delimited), line,
//!   varint length prefix, and header blocks (plain, JSON, or LSP).
//! - **Server** ([`Server`]): reads request batches, validates them,
//!   dispatches to handlers with bounded concurrency, and writes
//!   spec-conformant responses.
//! - **Client** ([`Client`]): issues calls, notifications, and batches,
//!   correlating responses from a single reader with cancellation support.
//!
//! ## Example
//!
//! ```ignore
//! use jsonwire::{channel, Client, ClientOptions, MethodMap, Server, ServerOptions};
//! use jsonwire::channel::Framing;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> jsonwire::Result<()> {
//!     let mut methods = MethodMap::new();
//!     methods.register("Math.Add", |_ctx, (a, b): (i64, i64)| async move {
//!         Ok(a + b)
//!     });
//!
//!     let (server_end, client_end) = channel::pipe(Framing::Raw);
//!     let mut server = Server::new(methods, ServerOptions::default());
//!     server.start(server_end);
//!
//!     let client = Client::new(client_end, ClientOptions::default());
//!     let response = client.call("Math.Add", json!([2, 3])).await?;
//!     assert_eq!(response.into_result().unwrap(), json!(5));
//!
//!     client.close().await;
//!     server.stop().await;
//!     server.wait().await
//! }
//! ```

pub mod channel;
pub mod error;
pub mod handler;
pub mod protocol;

mod client;
mod server;

pub use client::{Batch, Client, ClientOptions, EncodeContextHook, NotifyCallback, Spec};
pub use error::{Code, Error, Result, RpcError};
pub use handler::{Assigner, Handler, MethodMap, RequestContext};
pub use protocol::{Request, RequestId, Response};
pub use server::{ContextHook, Server, ServerInfo, ServerOptions, SERVER_INFO_METHOD};
