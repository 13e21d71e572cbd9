//! Client correlator.
//!
//! A [`Client`] owns a [`Channel`] for its lifetime and correlates calls
//! with responses arriving on a single reader task. Calls block until their
//! response arrives, the caller cancels, or the client closes; batches
//! resolve positionally no matter what order the responses arrive in.
//!
//! # Example
//!
//! ```ignore
//! use jsonwire::{Client, ClientOptions};
//! use serde_json::json;
//!
//! let client = Client::new(channel, ClientOptions::default());
//! let response = client.call("Math.Add", json!([2, 3])).await?;
//! assert_eq!(response.into_result()?, json!(5));
//! client.close().await;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelRx, ChannelTx};
use crate::error::{Code, Error, Result, RpcError};
use crate::protocol::{Request, RequestId, Response};

/// Hook applied to the outbound params of every call and notification,
/// splicing context-derived metadata into the wire request. Receives the
/// method name and the caller's params; returns the params to send.
pub type EncodeContextHook = Arc<
    dyn Fn(&str, Option<Value>) -> std::result::Result<Option<Value>, Error> + Send + Sync,
>;

/// Callback invoked for server push notifications (inbound requests with
/// no id). Without one, pushes are logged and dropped.
pub type NotifyCallback = Arc<dyn Fn(Request) + Send + Sync>;

/// Configuration for a [`Client`].
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Optional context encoder; see [`EncodeContextHook`].
    pub encode_context: Option<EncodeContextHook>,
    /// Optional push-notification callback; see [`NotifyCallback`].
    pub on_notify: Option<NotifyCallback>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("encode_context", &self.encode_context.is_some())
            .field("on_notify", &self.on_notify.is_some())
            .finish()
    }
}

/// One request of a client-side batch.
#[derive(Debug, Clone)]
pub struct Spec {
    /// Method name to invoke.
    pub method: String,
    /// Params to send, if any.
    pub params: Option<Value>,
    /// Send as a notification: no id, no response slot.
    pub notify: bool,
}

impl Spec {
    /// A call spec: reserves a response slot in the batch.
    pub fn new(method: impl Into<String>, params: impl Into<Option<Value>>) -> Self {
        Self {
            method: method.into(),
            params: params.into(),
            notify: false,
        }
    }

    /// A notification spec: fire-and-forget, placeholder response slot.
    pub fn notification(method: impl Into<String>, params: impl Into<Option<Value>>) -> Self {
        Self {
            method: method.into(),
            params: params.into(),
            notify: true,
        }
    }
}

/// Handle for an in-flight batch; see [`Client::batch`].
pub struct Batch {
    slots: Vec<Slot>,
    closed: CancellationToken,
}

enum Slot {
    Call(oneshot::Receiver<Response>),
    Notification,
}

impl Batch {
    /// Wait for every response in the batch.
    ///
    /// Responses are returned in spec order regardless of arrival order.
    /// Notification specs yield an empty placeholder with no error; calls
    /// interrupted by [`Client::close`] yield a stopped-code error.
    pub async fn wait(self) -> Vec<Response> {
        let mut responses = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            match slot {
                Slot::Call(rx) => {
                    let response = tokio::select! {
                        biased;
                        outcome = rx => outcome
                            .unwrap_or_else(|_| Response::failure(None, closing_error())),
                        _ = self.closed.cancelled() => {
                            Response::failure(None, closing_error())
                        }
                    };
                    responses.push(response);
                }
                Slot::Notification => responses.push(Response::placeholder()),
            }
        }
        responses
    }

    /// Number of specs submitted, notifications included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the batch had no specs.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn closing_error() -> Error {
    Error::new(Code::STOPPED, "client is closing")
}

struct ClientCore {
    writer: Mutex<ChannelTx>,
    pending: Mutex<HashMap<String, oneshot::Sender<Response>>>,
    next_id: AtomicI64,
    closed: CancellationToken,
    encode_context: Option<EncodeContextHook>,
    on_notify: Option<NotifyCallback>,
}

impl ClientCore {
    fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an outbound request, running the params through the context
    /// encoder when one is configured.
    fn make_request(
        &self,
        id: Option<RequestId>,
        method: &str,
        params: Option<Value>,
    ) -> Result<Request> {
        let params = match &self.encode_context {
            Some(hook) => hook(method, params).map_err(RpcError::Rpc)?,
            None => params,
        };
        Ok(match id {
            Some(id) => Request::new(id, method, params),
            None => Request::notification(method, params),
        })
    }

    async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(bytes).await
    }

    /// Fail every pending call by dropping its waiter.
    async fn fail_pending(&self) {
        self.pending.lock().await.clear();
    }
}

/// A JSON-RPC 2.0 client.
///
/// The client owns its transport: construct it with a connected
/// [`Channel`] and call [`Client::close`] when done. All methods take
/// `&self`; the client is cheap to share behind an `Arc`.
pub struct Client {
    core: Arc<ClientCore>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a client over `channel` and spawn its reader task.
    pub fn new(channel: Channel, options: ClientOptions) -> Self {
        let (tx, rx) = channel.split();
        let core = Arc::new(ClientCore {
            writer: Mutex::new(tx),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            closed: CancellationToken::new(),
            encode_context: options.encode_context,
            on_notify: options.on_notify,
        });
        let reader = tokio::spawn(run_reader(core.clone(), rx));
        Self {
            core,
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Issue a call and wait for its response.
    ///
    /// The returned [`Response`] may itself carry a JSON-RPC error from the
    /// server; use [`Response::into_result`] to collapse it.
    pub async fn call(&self, method: &str, params: impl Into<Option<Value>>) -> Result<Response> {
        self.call_with_cancel(CancellationToken::new(), method, params)
            .await
    }

    /// Issue a call that can be abandoned through `cancel`.
    ///
    /// On cancellation the pending entry is removed, the call returns the
    /// cancelled code, and a late response from the server is discarded.
    /// Nothing is sent on the wire: JSON-RPC 2.0 has no cancel message.
    pub async fn call_with_cancel(
        &self,
        cancel: CancellationToken,
        method: &str,
        params: impl Into<Option<Value>>,
    ) -> Result<Response> {
        if self.core.closed.is_cancelled() {
            return Err(RpcError::Rpc(closing_error()));
        }
        let id = self.core.next_id();
        let key = id.key();
        let request = self.core.make_request(Some(id), method, params.into())?;
        let bytes = serde_json::to_vec(&request)?;

        let (done_tx, done_rx) = oneshot::channel();
        self.core
            .pending
            .lock()
            .await
            .insert(key.clone(), done_tx);

        if let Err(err) = self.core.send(&bytes).await {
            self.core.pending.lock().await.remove(&key);
            return Err(err);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.core.pending.lock().await.remove(&key);
                tracing::debug!(id = %key, "call cancelled by caller");
                Err(RpcError::Rpc(Error::cancelled()))
            }
            _ = self.core.closed.cancelled() => {
                self.core.pending.lock().await.remove(&key);
                Err(RpcError::Rpc(closing_error()))
            }
            outcome = done_rx => match outcome {
                Ok(response) => Ok(response),
                Err(_) => Err(RpcError::Rpc(closing_error())),
            },
        }
    }

    /// Send a notification: fire-and-forget, no response is owed.
    ///
    /// Returns once the bytes have been handed to the channel.
    pub async fn notify(&self, method: &str, params: impl Into<Option<Value>>) -> Result<()> {
        if self.core.closed.is_cancelled() {
            return Err(RpcError::Rpc(closing_error()));
        }
        let request = self.core.make_request(None, method, params.into())?;
        let bytes = serde_json::to_vec(&request)?;
        self.core.send(&bytes).await
    }

    /// Submit several requests as one JSON array.
    ///
    /// The returned [`Batch`] resolves responses positionally by matching
    /// ids back to their submission index. An all-notification batch still
    /// sends an array and resolves to placeholders immediately.
    pub async fn batch(&self, specs: Vec<Spec>) -> Result<Batch> {
        if self.core.closed.is_cancelled() {
            return Err(RpcError::Rpc(closing_error()));
        }

        // Build every request first so an encoding failure registers
        // nothing; then reserve the pending slots and send.
        let mut requests = Vec::with_capacity(specs.len());
        let mut keys: Vec<Option<String>> = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.notify {
                requests.push(self.core.make_request(None, &spec.method, spec.params)?);
                keys.push(None);
            } else {
                let id = self.core.next_id();
                keys.push(Some(id.key()));
                requests.push(
                    self.core
                        .make_request(Some(id), &spec.method, spec.params)?,
                );
            }
        }
        let bytes = serde_json::to_vec(&requests)?;

        let mut slots = Vec::with_capacity(keys.len());
        {
            let mut pending = self.core.pending.lock().await;
            for key in &keys {
                match key {
                    Some(key) => {
                        let (done_tx, done_rx) = oneshot::channel();
                        pending.insert(key.clone(), done_tx);
                        slots.push(Slot::Call(done_rx));
                    }
                    None => slots.push(Slot::Notification),
                }
            }
        }

        if let Err(err) = self.core.send(&bytes).await {
            let mut pending = self.core.pending.lock().await;
            for key in keys.into_iter().flatten() {
                pending.remove(&key);
            }
            return Err(err);
        }
        Ok(Batch {
            slots,
            closed: self.core.closed.clone(),
        })
    }

    /// Close the client: fail all pending calls with the stopped code,
    /// close the channel, and join the reader. Idempotent.
    pub async fn close(&self) {
        if !self.core.closed.is_cancelled() {
            self.core.closed.cancel();
            self.core.fail_pending().await;
            let mut writer = self.core.writer.lock().await;
            if let Err(err) = writer.close().await {
                tracing::debug!("closing channel: {err}");
            }
        }
        if let Some(handle) = self.reader.lock().await.take() {
            if let Err(err) = handle.await {
                tracing::debug!("reader task failed: {err}");
            }
        }
    }
}

/// Reader loop: decode inbound payloads and fan responses out to waiters.
async fn run_reader(core: Arc<ClientCore>, mut rx: ChannelRx) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = core.closed.cancelled() => break,
            payload = rx.recv() => payload,
        };
        match payload {
            Ok(payload) => deliver_payload(&core, &payload).await,
            Err(RpcError::Eof) => {
                tracing::debug!("server closed the connection");
                break;
            }
            Err(err) => {
                tracing::debug!("receiving responses: {err}");
                break;
            }
        }
    }
    // Whatever ended the loop, no more responses are coming.
    core.closed.cancel();
    core.fail_pending().await;
}

/// Decode one payload (a response, a batch of them, or a server push) and
/// deliver each element.
async fn deliver_payload(core: &Arc<ClientCore>, payload: &[u8]) {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!("invalid response payload: {err}");
            return;
        }
    };
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    for item in items {
        deliver_one(core, item).await;
    }
}

async fn deliver_one(core: &Arc<ClientCore>, item: Value) {
    let Some(object) = item.as_object() else {
        tracing::debug!("dropping non-object response element");
        return;
    };

    // An element with a result or error member is a response; one with a
    // method and no id is a push notification from the server.
    if object.contains_key("result") || object.contains_key("error") {
        let response: Response = match serde_json::from_value(item) {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!("invalid response object: {err}");
                return;
            }
        };
        let Some(id) = &response.id else {
            tracing::debug!("dropping response with null id");
            return;
        };
        let key = id.key();
        let waiter = core.pending.lock().await.remove(&key);
        match waiter {
            Some(done_tx) => {
                // The waiter may have been cancelled in the meantime.
                let _ = done_tx.send(response);
            }
            None => tracing::debug!(id = %key, "dropping response for unknown id"),
        }
    } else if object.contains_key("method") && !object.contains_key("id") {
        match serde_json::from_value::<Request>(item) {
            Ok(push) => match &core.on_notify {
                Some(callback) => callback(push),
                None => {
                    tracing::debug!(method = %push.method, "dropping server notification")
                }
            },
            Err(err) => tracing::debug!("invalid server notification: {err}"),
        }
    } else {
        tracing::debug!("dropping unrecognized message element");
    }
}
