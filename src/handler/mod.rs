//! Method handlers and name resolution.
//!
//! Provides:
//! - [`Handler`] - the object-safe trait the dispatcher invokes
//! - [`MethodMap`] - a name-to-handler table implementing [`Assigner`]
//! - [`RequestContext`] - per-request state handed to every handler
//!
//! # Example
//!
//! ```ignore
//! use jsonwire::MethodMap;
//!
//! let mut map = MethodMap::new();
//! map.register("Math.Add", |_ctx, (a, b): (i64, i64)| async move {
//!     Ok(a + b)
//! });
//! ```

mod assigner;
mod context;

pub use assigner::{Assigner, BoxFuture, Handler, HandlerResult, MethodMap, TypedHandler};
pub use context::RequestContext;
