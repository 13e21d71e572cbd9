//! Per-request context passed to handlers.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Request, RequestId};

/// Context handed to a handler for one request.
///
/// Carries the inbound request (so framework-level wrappers that only see
/// the context can still reach it), any metadata the server's `req_context`
/// hook derived from the request, and a cancellation token that fires when
/// the server stops.
///
/// # Thread Safety
///
/// `RequestContext` is `Clone` and can be moved freely across tasks; clones
/// share the same request and token.
#[derive(Clone)]
pub struct RequestContext {
    request: Arc<Request>,
    metadata: Option<Arc<Value>>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create a fresh context for a request, with no metadata and a token
    /// that never fires. Mainly for exercising handlers directly.
    pub fn new(request: Request) -> Self {
        Self {
            request: Arc::new(request),
            metadata: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Assemble a context from dispatcher state.
    pub(crate) fn with_parts(
        request: Arc<Request>,
        metadata: Option<Value>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request,
            metadata: metadata.map(Arc::new),
            cancel,
        }
    }

    /// The inbound request this context belongs to.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The method name being invoked.
    pub fn method(&self) -> &str {
        &self.request.method
    }

    /// The request id, absent for notifications.
    pub fn id(&self) -> Option<&RequestId> {
        self.request.id.as_ref()
    }

    /// Whether the request is a notification.
    pub fn is_notification(&self) -> bool {
        self.request.is_notification()
    }

    /// Metadata injected by the server's `req_context` hook, if any.
    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_deref()
    }

    /// Token cancelled when the server is stopping. Long-running handlers
    /// should select against [`RequestContext::cancelled`] to unblock.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves when the server begins shutting down.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Whether shutdown has already been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
