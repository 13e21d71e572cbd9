//! Server dispatcher.
//!
//! A [`Server`] reads framed request payloads from a [`Channel`], validates
//! and dispatches them (individually or in batches) to handlers resolved
//! through an [`Assigner`], and writes spec-conformant responses back.
//!
//! Lifecycle: construct with [`Server::new`] (detached), bind a transport
//! with [`Server::start`], signal shutdown with [`Server::stop`], and join
//! with [`Server::wait`], which reports the terminal state.
//!
//! Two persistent tasks run per server: the receive loop (decodes payloads
//! into batches and feeds the bounded inbound queue) and the dispatch loop
//! (validates each batch and spawns its executor). Executors run
//! concurrently across batches; every handler invocation holds one permit
//! of a semaphore sized by [`ServerOptions::concurrency`], so handler
//! parallelism stays bounded no matter how many batches are in flight.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelRx, ChannelTx};
use crate::error::{Error, Result, RpcError};
use crate::handler::{Assigner, BoxFuture, Handler, HandlerResult, RequestContext};
use crate::protocol::{Request, RequestBatch, RequestId, Response, VERSION};

/// Method name reserved for server introspection.
pub const SERVER_INFO_METHOD: &str = "rpc.serverInfo";

/// Hook deriving per-request context metadata from an inbound request.
///
/// The returned value is attached to the handler's [`RequestContext`]; an
/// error becomes that request's error response.
pub type ContextHook =
    Arc<dyn Fn(&Request) -> std::result::Result<Option<Value>, Error> + Send + Sync>;

/// Configuration for a [`Server`].
#[derive(Clone)]
pub struct ServerOptions {
    /// Maximum number of concurrently executing handlers. Defaults to 1,
    /// which runs handlers serially.
    pub concurrency: usize,
    /// Accept requests with an empty version marker (unversioned v1).
    pub allow_v1: bool,
    /// Serve the built-in `rpc.serverInfo` method.
    pub server_info: bool,
    /// Capacity of the inbound queue, in batches. A full queue makes the
    /// receive loop wait, applying backpressure to the transport.
    pub queue_bound: usize,
    /// Optional context hook; see [`ContextHook`].
    pub req_context: Option<ContextHook>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            allow_v1: false,
            server_info: true,
            queue_bound: 64,
            req_context: None,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("concurrency", &self.concurrency)
            .field("allow_v1", &self.allow_v1)
            .field("server_info", &self.server_info)
            .field("queue_bound", &self.queue_bound)
            .field("req_context", &self.req_context.is_some())
            .finish()
    }
}

/// The response payload of the `rpc.serverInfo` method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Method names exported by the assigner, sorted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Number of requests received.
    #[serde(default)]
    pub requests: i64,
    /// Request bytes received.
    #[serde(default, rename = "bytesIn")]
    pub bytes_in: i64,
    /// Response bytes written.
    #[serde(default, rename = "bytesOut")]
    pub bytes_out: i64,
}

#[derive(Debug, Default)]
struct Metrics {
    requests: AtomicI64,
    bytes_in: AtomicI64,
    bytes_out: AtomicI64,
}

/// Terminal state recorded by the first stop.
enum Terminal {
    Running,
    Stopped(Option<RpcError>),
}

struct ServerCore {
    assigner: Arc<dyn Assigner>,
    sem: Arc<Semaphore>,
    allow_v1: bool,
    server_info: bool,
    req_context: Option<ContextHook>,
    queue_bound: usize,
    metrics: Metrics,
    stop: CancellationToken,
    /// Ids admitted for handling whose responses have not yet been flushed.
    active: Mutex<HashSet<String>>,
    terminal: Mutex<Terminal>,
}

impl ServerCore {
    fn version_ok(&self, version: &str) -> bool {
        if version.is_empty() {
            return self.allow_v1;
        }
        version == VERSION
    }

    fn info_snapshot(&self) -> ServerInfo {
        ServerInfo {
            methods: self.assigner.names(),
            requests: self.metrics.requests.load(Ordering::Relaxed),
            bytes_in: self.metrics.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.metrics.bytes_out.load(Ordering::Relaxed),
        }
    }

    /// Record the terminal state and signal shutdown. Only the first caller
    /// takes effect; later calls are no-ops.
    async fn shutdown(&self, err: Option<RpcError>) {
        let mut terminal = self.terminal.lock().await;
        if matches!(*terminal, Terminal::Running) {
            match &err {
                Some(err) => tracing::debug!("server signaled to stop: {err}"),
                None => tracing::debug!("server signaled to stop"),
            }
            *terminal = Terminal::Stopped(err);
            self.stop.cancel();
        }
    }
}

/// Resolve a method name, layering the introspection method on top of the
/// user assigner.
fn assign(core: &Arc<ServerCore>, name: &str) -> Option<Arc<dyn Handler>> {
    if core.server_info && name == SERVER_INFO_METHOD {
        return Some(Arc::new(ServerInfoHandler { core: core.clone() }));
    }
    core.assigner.assign(name)
}

struct ServerInfoHandler {
    core: Arc<ServerCore>,
}

impl Handler for ServerInfoHandler {
    fn call(&self, _ctx: RequestContext, _req: Request) -> BoxFuture<'static, HandlerResult> {
        let info = self.core.info_snapshot();
        Box::pin(async move {
            serde_json::to_value(info).map_err(|err| Error::internal(err.to_string()))
        })
    }
}

/// One request of a batch, carried through validation and execution.
struct Task {
    request: Request,
    handler: Option<Arc<dyn Handler>>,
    result: Option<Value>,
    error: Option<Error>,
}

impl Task {
    fn runnable(&self) -> bool {
        self.error.is_none() && self.handler.is_some()
    }
}

/// A JSON-RPC 2.0 server.
///
/// # Example
///
/// ```ignore
/// use jsonwire::{channel, MethodMap, Server, ServerOptions};
///
/// let mut map = MethodMap::new();
/// map.register("Math.Add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) });
///
/// let mut server = Server::new(map, ServerOptions::default());
/// server.start(some_channel);
/// server.wait().await?;
/// ```
pub struct Server {
    core: Arc<ServerCore>,
    workers: Option<Workers>,
}

struct Workers {
    receive: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

impl Server {
    /// Create a new unstarted server dispatching through `assigner`.
    pub fn new(assigner: impl Assigner, options: ServerOptions) -> Self {
        Self {
            core: Arc::new(ServerCore {
                assigner: Arc::new(assigner),
                sem: Arc::new(Semaphore::new(options.concurrency.max(1))),
                allow_v1: options.allow_v1,
                server_info: options.server_info,
                req_context: options.req_context.clone(),
                queue_bound: options.queue_bound.max(1),
                metrics: Metrics::default(),
                stop: CancellationToken::new(),
                active: Mutex::new(HashSet::new()),
                terminal: Mutex::new(Terminal::Running),
            }),
            workers: None,
        }
    }

    /// Begin processing requests from `channel`.
    ///
    /// # Panics
    ///
    /// Panics if the server is already running; starting twice is a
    /// programming error.
    pub fn start(&mut self, channel: Channel) {
        if self.workers.is_some() {
            panic!("server is already running");
        }
        let (tx, rx) = channel.split();
        let writer = Arc::new(Mutex::new(tx));
        let (queue_tx, queue_rx) = mpsc::channel(self.core.queue_bound);

        let receive = tokio::spawn(run_receive(self.core.clone(), rx, writer.clone(), queue_tx));
        let dispatch = tokio::spawn(run_dispatch(self.core.clone(), queue_rx, writer));
        self.workers = Some(Workers { receive, dispatch });
    }

    /// Signal orderly shutdown. Safe to call repeatedly; only the first
    /// call records the terminal state.
    pub async fn stop(&self) {
        self.core.shutdown(None).await;
    }

    /// Block until both workers exit and return the terminal state:
    /// `Ok(())` after a clean stop or peer EOF, the transport or framing
    /// error otherwise.
    pub async fn wait(&mut self) -> Result<()> {
        if let Some(workers) = self.workers.take() {
            if let Err(err) = workers.receive.await {
                tracing::debug!("receive worker failed: {err}");
            }
            if let Err(err) = workers.dispatch.await {
                tracing::debug!("dispatch worker failed: {err}");
            }
        }
        let mut terminal = self.core.terminal.lock().await;
        match std::mem::replace(&mut *terminal, Terminal::Stopped(None)) {
            Terminal::Stopped(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    /// A snapshot of the server's counters and method list.
    pub fn info(&self) -> ServerInfo {
        self.core.info_snapshot()
    }
}

/// Receive loop: decode payloads and feed the inbound queue.
async fn run_receive(
    core: Arc<ServerCore>,
    mut rx: ChannelRx,
    writer: Arc<Mutex<ChannelTx>>,
    queue: mpsc::Sender<RequestBatch>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = core.stop.cancelled() => break,
            payload = rx.recv() => payload,
        };
        match payload {
            Err(RpcError::Eof) => {
                core.shutdown(None).await;
                break;
            }
            Err(err) => {
                core.shutdown(Some(err)).await;
                break;
            }
            Ok(payload) => {
                core.metrics
                    .bytes_in
                    .fetch_add(payload.len() as i64, Ordering::Relaxed);
                let batch = match serde_json::from_slice::<Value>(&payload) {
                    Ok(value) => RequestBatch::from_value(value),
                    // The framing already delimited this payload, so the
                    // stream is still aligned; report and keep reading.
                    Err(err) => Err(err),
                };
                match batch {
                    Err(err) => {
                        tracing::debug!("invalid JSON request message: {err}");
                        push_error(
                            &core,
                            &writer,
                            None,
                            Error::parse_error("invalid JSON request message"),
                        )
                        .await;
                    }
                    Ok(batch) if batch.is_empty() => {
                        push_error(
                            &core,
                            &writer,
                            None,
                            Error::invalid_request("empty request batch"),
                        )
                        .await;
                    }
                    Ok(batch) => {
                        core.metrics
                            .requests
                            .fetch_add(batch.len() as i64, Ordering::Relaxed);
                        tracing::debug!(count = batch.len(), "received request batch");
                        if queue.send(batch).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Dispatch loop: validate queued batches and spawn their executors.
async fn run_dispatch(
    core: Arc<ServerCore>,
    mut queue: mpsc::Receiver<RequestBatch>,
    writer: Arc<Mutex<ChannelTx>>,
) {
    let mut executors: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = core.stop.cancelled() => break,
            next = queue.recv() => match next {
                Some(batch) => {
                    let (tasks, admitted) = check_batch(&core, batch.requests).await;
                    executors.spawn(execute_batch(
                        core.clone(),
                        writer.clone(),
                        tasks,
                        batch.from_array,
                        admitted,
                    ));
                }
                None => break,
            },
            _ = executors.join_next(), if !executors.is_empty() => {}
        }
    }

    // Drain whatever is still queued: drop pending calls, but retain every
    // pending notification so in-flight notifications are still honored.
    queue.close();
    while let Some(batch) = queue.recv().await {
        let keep: Vec<Request> = batch
            .requests
            .into_iter()
            .filter(Request::is_notification)
            .collect();
        if keep.is_empty() {
            continue;
        }
        tracing::debug!(count = keep.len(), "retaining notifications at shutdown");
        let (tasks, admitted) = check_batch(&core, keep).await;
        executors.spawn(execute_batch(
            core.clone(),
            writer.clone(),
            tasks,
            batch.from_array,
            admitted,
        ));
    }

    while executors.join_next().await.is_some() {}

    let mut tx = writer.lock().await;
    if let Err(err) = tx.close().await {
        tracing::debug!("closing channel: {err}");
    }
}

/// Validate each request of a batch under the state lock.
///
/// Returns the tasks (invalid ones keep their error so it appears in the
/// response array) and the id keys admitted to the active set.
async fn check_batch(core: &Arc<ServerCore>, requests: Vec<Request>) -> (Vec<Task>, Vec<String>) {
    let mut tasks = Vec::with_capacity(requests.len());
    let mut admitted = Vec::new();

    let mut active = core.active.lock().await;
    for request in requests {
        let mut task = Task {
            request,
            handler: None,
            result: None,
            error: None,
        };
        if let Some(id) = &task.request.id {
            let key = id.key();
            if active.insert(key.clone()) {
                admitted.push(key);
            } else {
                task.error = Some(Error::invalid_request(format!(
                    "duplicate request id {key}"
                )));
            }
        }
        if task.error.is_none() {
            if !core.version_ok(&task.request.version) {
                task.error = Some(Error::invalid_request(format!(
                    "incorrect version marker {:?}",
                    task.request.version
                )));
            } else if task.request.method.is_empty() {
                task.error = Some(Error::invalid_request("empty method name"));
            } else {
                match assign(core, &task.request.method) {
                    Some(handler) => task.handler = Some(handler),
                    None => task.error = Some(Error::method_not_found(&task.request.method)),
                }
            }
        }
        if let Some(err) = &task.error {
            tracing::debug!(method = %task.request.method, "task error: {err}");
        }
        tasks.push(task);
    }
    (tasks, admitted)
}

/// Run a validated batch: invoke runnable tasks in parallel under the
/// semaphore, aggregate non-notification responses, and write them as a
/// single payload with the response-write lock held.
async fn execute_batch(
    core: Arc<ServerCore>,
    writer: Arc<Mutex<ChannelTx>>,
    mut tasks: Vec<Task>,
    from_array: bool,
    admitted: Vec<String>,
) {
    let mut running: JoinSet<(usize, std::result::Result<Value, Error>)> = JoinSet::new();
    for (index, task) in tasks.iter().enumerate() {
        if !task.runnable() {
            continue;
        }
        let Some(handler) = task.handler.clone() else {
            continue;
        };
        let core = core.clone();
        let request = task.request.clone();
        running.spawn(async move {
            let outcome = invoke(&core, handler, request).await;
            (index, outcome)
        });
    }

    while let Some(joined) = running.join_next().await {
        match joined {
            Ok((index, Ok(value))) => tasks[index].result = Some(value),
            Ok((index, Err(err))) => tasks[index].error = Some(err),
            Err(err) => tracing::error!("handler task failed: {err}"),
        }
    }
    // A handler that panicked leaves its task unresolved; report it rather
    // than dropping the response on the floor.
    for task in &mut tasks {
        if task.runnable() && task.result.is_none() {
            task.error = Some(Error::internal("handler failed to produce a result"));
        }
    }

    let responses = collect_responses(&mut tasks);
    if !responses.is_empty() {
        let payload = if from_array {
            serde_json::to_vec(&responses)
        } else {
            serde_json::to_vec(&responses[0])
        };
        match payload {
            Ok(bytes) => {
                let mut tx = writer.lock().await;
                match tx.send(&bytes).await {
                    Ok(()) => {
                        core.metrics
                            .bytes_out
                            .fetch_add(bytes.len() as i64, Ordering::Relaxed);
                        tracing::debug!(count = responses.len(), "sent responses");
                    }
                    Err(err) => {
                        // An incomplete response write leaves the framing
                        // in an unknown state; the session cannot continue.
                        drop(tx);
                        tracing::debug!("writing responses: {err}");
                        core.shutdown(Some(err)).await;
                    }
                }
            }
            Err(err) => tracing::error!("encoding responses: {err}"),
        }
    }

    if !admitted.is_empty() {
        let mut active = core.active.lock().await;
        for key in admitted {
            active.remove(&key);
        }
    }
}

/// Invoke one handler: derive the request context, call, and map the
/// outcome. Notification errors are logged and discarded downstream.
async fn invoke(
    core: &Arc<ServerCore>,
    handler: Arc<dyn Handler>,
    request: Request,
) -> std::result::Result<Value, Error> {
    let metadata = match &core.req_context {
        Some(hook) => hook(&request)?,
        None => None,
    };
    let permit = core
        .sem
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| Error::new(crate::error::Code::STOPPED, "server stopped"))?;
    let ctx = RequestContext::with_parts(
        Arc::new(request.clone()),
        metadata,
        core.stop.child_token(),
    );
    let outcome = handler.call(ctx, request).await;
    drop(permit);
    outcome
}

/// Build the response set for a batch, skipping notifications.
fn collect_responses(tasks: &mut Vec<Task>) -> Vec<Response> {
    let mut responses = Vec::new();
    for task in tasks.drain(..) {
        let Some(id) = task.request.id else {
            // No reply is owed to a notification, even on error.
            if let Some(err) = task.error {
                tracing::debug!(
                    method = %task.request.method,
                    "discarding error from notification: {err}"
                );
            }
            continue;
        };
        let response = match task.error {
            Some(err) => Response::failure(Some(id), err),
            None => Response::success(id, task.result.unwrap_or(Value::Null)),
        };
        responses.push(response);
    }
    responses
}

/// Write a standalone error response for a payload that never became a
/// batch (parse failures, empty batches). The id is null.
async fn push_error(
    core: &Arc<ServerCore>,
    writer: &Arc<Mutex<ChannelTx>>,
    id: Option<RequestId>,
    error: Error,
) {
    tracing::debug!(code = error.code.0, "error for request: {}", error.message);
    let response = Response::failure(id, error);
    match serde_json::to_vec(&response) {
        Ok(bytes) => {
            let mut tx = writer.lock().await;
            match tx.send(&bytes).await {
                Ok(()) => {
                    core.metrics
                        .bytes_out
                        .fetch_add(bytes.len() as i64, Ordering::Relaxed);
                }
                Err(err) => tracing::error!("writing error response: {err}"),
            }
        }
        Err(err) => tracing::error!("encoding error response: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{pipe, Framing};
    use crate::handler::MethodMap;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn math_map() -> MethodMap {
        let mut map = MethodMap::new();
        map.register("Math.Add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) });
        map.register("Math.Sub", |_ctx, (a, b): (i64, i64)| async move { Ok(a - b) });
        map.register("Log", |_ctx, _msg: Value| async move { Ok(Value::Null) });
        map
    }

    fn start_math_server(options: ServerOptions) -> (Server, crate::channel::Channel) {
        start_with_map(math_map(), options)
    }

    fn start_with_map(
        map: MethodMap,
        options: ServerOptions,
    ) -> (Server, crate::channel::Channel) {
        let (server_end, client_end) = pipe(Framing::Line);
        let mut server = Server::new(map, options);
        server.start(server_end);
        (server, client_end)
    }

    async fn roundtrip(chan: &mut crate::channel::Channel, payload: &str) -> Value {
        chan.send(payload.as_bytes()).await.unwrap();
        let bytes = chan.recv().await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_call_produces_result() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        let rsp = roundtrip(
            &mut chan,
            r#"{"jsonrpc":"2.0","id":1,"method":"Math.Add","params":[2,3]}"#,
        )
        .await;
        assert_eq!(rsp, json!({"jsonrpc": "2.0", "id": 1, "result": 5}));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        let rsp = roundtrip(
            &mut chan,
            r#"{"jsonrpc":"2.0","id":1,"method":"Nope","params":[]}"#,
        )
        .await;
        assert_eq!(rsp["error"]["code"], json!(-32601));
        assert_eq!(rsp["id"], json!(1));
    }

    #[tokio::test]
    async fn test_malformed_json_reported_and_session_continues() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());

        let rsp = roundtrip(&mut chan, "{oops").await;
        assert_eq!(rsp["id"], Value::Null);
        assert_eq!(rsp["error"]["code"], json!(-32700));

        // The session is still alive and processes further messages.
        let rsp = roundtrip(
            &mut chan,
            r#"{"jsonrpc":"2.0","id":2,"method":"Math.Sub","params":[5,2]}"#,
        )
        .await;
        assert_eq!(rsp["result"], json!(3));
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        let rsp = roundtrip(&mut chan, "[]").await;
        assert_eq!(rsp["id"], Value::Null);
        assert_eq!(rsp["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn test_batch_skips_notifications() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        let batch = json!([
            {"jsonrpc": "2.0", "id": 1, "method": "Math.Add", "params": [1, 1]},
            {"jsonrpc": "2.0", "id": 2, "method": "Math.Sub", "params": [5, 2]},
            {"jsonrpc": "2.0", "method": "Log", "params": ["hi"]},
        ]);
        let rsp = roundtrip(&mut chan, &batch.to_string()).await;
        let responses = rsp.as_array().unwrap();
        assert_eq!(responses.len(), 2);
        for rsp in responses {
            match rsp["id"].as_i64().unwrap() {
                1 => assert_eq!(rsp["result"], json!(2)),
                2 => assert_eq!(rsp["result"], json!(3)),
                other => panic!("unexpected response id {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_all_notification_batch_yields_no_bytes() {
        let (server, mut chan) = start_math_server(ServerOptions::default());
        let notes = json!([
            {"jsonrpc": "2.0", "method": "Log", "params": ["a"]},
            {"jsonrpc": "2.0", "method": "Log", "params": ["b"]},
        ]);
        chan.send(notes.to_string().as_bytes()).await.unwrap();

        // The next payload received must belong to the follow-up call, not
        // to the notification batch.
        let rsp = roundtrip(
            &mut chan,
            r#"{"jsonrpc":"2.0","id":9,"method":"Math.Add","params":[4,4]}"#,
        )
        .await;
        assert_eq!(rsp["id"], json!(9));
        assert_eq!(rsp["result"], json!(8));
        assert_eq!(server.info().requests, 3);
    }

    #[tokio::test]
    async fn test_single_request_answered_bare() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        let rsp = roundtrip(
            &mut chan,
            r#"{"jsonrpc":"2.0","id":1,"method":"Math.Add","params":[0,0]}"#,
        )
        .await;
        assert!(rsp.is_object());

        // A one-element array batch is answered with a one-element array.
        let rsp = roundtrip(
            &mut chan,
            r#"[{"jsonrpc":"2.0","id":2,"method":"Math.Add","params":[0,0]}]"#,
        )
        .await;
        assert_eq!(rsp.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_duplicate_id_within_batch() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        let batch = json!([
            {"jsonrpc": "2.0", "id": 7, "method": "Math.Add", "params": [1, 2]},
            {"jsonrpc": "2.0", "id": 7, "method": "Math.Add", "params": [3, 4]},
        ]);
        let rsp = roundtrip(&mut chan, &batch.to_string()).await;
        let responses = rsp.as_array().unwrap();
        assert_eq!(responses.len(), 2);

        let errors: Vec<bool> = responses
            .iter()
            .map(|r| r.get("error").is_some())
            .collect();
        assert_eq!(errors.iter().filter(|e| **e).count(), 1, "one rejected");
        let err = responses.iter().find(|r| r.get("error").is_some()).unwrap();
        assert_eq!(err["error"]["code"], json!(-32600));
        let ok = responses.iter().find(|r| r.get("result").is_some()).unwrap();
        assert_eq!(ok["result"], json!(3));
    }

    #[tokio::test]
    async fn test_id_released_after_response() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        for _ in 0..3 {
            let rsp = roundtrip(
                &mut chan,
                r#"{"jsonrpc":"2.0","id":1,"method":"Math.Add","params":[1,1]}"#,
            )
            .await;
            assert_eq!(rsp["result"], json!(2));
        }
    }

    #[tokio::test]
    async fn test_version_marker_required() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        let rsp = roundtrip(&mut chan, r#"{"id":1,"method":"Math.Add","params":[1,2]}"#).await;
        assert_eq!(rsp["error"]["code"], json!(-32600));

        let rsp = roundtrip(
            &mut chan,
            r#"{"jsonrpc":"1.1","id":2,"method":"Math.Add","params":[1,2]}"#,
        )
        .await;
        assert_eq!(rsp["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn test_v1_compat_mode() {
        let options = ServerOptions {
            allow_v1: true,
            ..ServerOptions::default()
        };
        let (_server, mut chan) = start_math_server(options);
        let rsp = roundtrip(&mut chan, r#"{"id":1,"method":"Math.Add","params":[1,2]}"#).await;
        assert_eq!(rsp["result"], json!(3));
    }

    #[tokio::test]
    async fn test_empty_method_name() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        let rsp = roundtrip(&mut chan, r#"{"jsonrpc":"2.0","id":1,"params":[1]}"#).await;
        assert_eq!(rsp["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn test_handler_error_codes_pass_through() {
        let mut map = MethodMap::new();
        map.register("Fail", |_ctx, (): ()| async move {
            Err::<Value, Error>(Error::with_data(
                crate::error::Code::SYSTEM,
                "deliberate",
                json!({"at": "Fail"}),
            ))
        });
        let (_server, mut chan) = start_with_map(map, ServerOptions::default());
        let rsp = roundtrip(&mut chan, r#"{"jsonrpc":"2.0","id":1,"method":"Fail"}"#).await;
        assert_eq!(rsp["error"]["code"], json!(-32000));
        assert_eq!(rsp["error"]["message"], json!("deliberate"));
        assert_eq!(rsp["error"]["data"], json!({"at": "Fail"}));
    }

    #[tokio::test]
    async fn test_server_info() {
        let (_server, mut chan) = start_math_server(ServerOptions::default());
        roundtrip(
            &mut chan,
            r#"{"jsonrpc":"2.0","id":1,"method":"Math.Add","params":[1,1]}"#,
        )
        .await;

        let rsp = roundtrip(
            &mut chan,
            r#"{"jsonrpc":"2.0","id":2,"method":"rpc.serverInfo"}"#,
        )
        .await;
        let info: ServerInfo = serde_json::from_value(rsp["result"].clone()).unwrap();
        assert_eq!(info.methods, vec!["Log", "Math.Add", "Math.Sub"]);
        assert_eq!(info.requests, 2);
        assert!(info.bytes_in > 0);
        assert!(info.bytes_out > 0);
    }

    #[tokio::test]
    async fn test_server_info_disabled() {
        let options = ServerOptions {
            server_info: false,
            ..ServerOptions::default()
        };
        let (_server, mut chan) = start_math_server(options);
        let rsp = roundtrip(
            &mut chan,
            r#"{"jsonrpc":"2.0","id":1,"method":"rpc.serverInfo"}"#,
        )
        .await;
        assert_eq!(rsp["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn test_req_context_metadata_reaches_handler() {
        let mut map = MethodMap::new();
        map.register("WhoAmI", |ctx: RequestContext, (): ()| async move {
            Ok(ctx.metadata().cloned().unwrap_or(Value::Null))
        });
        let hook: ContextHook = Arc::new(|req| Ok(req.params.clone()));
        let options = ServerOptions {
            req_context: Some(hook),
            ..ServerOptions::default()
        };
        let (_server, mut chan) = start_with_map(map, options);
        let rsp = roundtrip(
            &mut chan,
            r#"{"jsonrpc":"2.0","id":1,"method":"WhoAmI","params":{"user":"amy"}}"#,
        )
        .await;
        assert_eq!(rsp["result"], json!({"user": "amy"}));
    }

    #[tokio::test]
    async fn test_semaphore_bounds_handler_concurrency() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (current.clone(), peak.clone());

        let mut map = MethodMap::new();
        map.register("Slow", move |_ctx, (): ()| {
            let (current, peak) = (c.clone(), p.clone());
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let options = ServerOptions {
            concurrency: 2,
            ..ServerOptions::default()
        };
        let (_server, mut chan) = start_with_map(map, options);

        let batch: Vec<Value> = (1..=6)
            .map(|i| json!({"jsonrpc": "2.0", "id": i, "method": "Slow"}))
            .collect();
        let rsp = roundtrip(&mut chan, &Value::Array(batch).to_string()).await;
        assert_eq!(rsp.as_array().map(Vec::len), Some(6));
        assert!(peak.load(Ordering::SeqCst) <= 2, "bound exceeded");
        assert!(peak.load(Ordering::SeqCst) >= 2, "no parallelism observed");
    }

    #[tokio::test]
    async fn test_stop_then_wait_is_clean() {
        let (mut server, _chan) = start_math_server(ServerOptions::default());
        server.stop().await;
        server.stop().await; // idempotent
        assert!(server.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_peer_eof_is_clean_termination() {
        let (mut server, chan) = start_math_server(ServerOptions::default());
        drop(chan);
        assert!(server.wait().await.is_ok());
    }

    #[tokio::test]
    #[should_panic(expected = "already running")]
    async fn test_start_twice_panics() {
        let (a, _b) = pipe(Framing::Line);
        let (c, _d) = pipe(Framing::Line);
        let mut server = Server::new(math_map(), ServerOptions::default());
        server.start(a);
        server.start(c);
    }

    #[tokio::test]
    async fn test_handlers_observe_stop_via_context() {
        let mut map = MethodMap::new();
        map.register("Linger", |ctx: RequestContext, (): ()| async move {
            ctx.cancelled().await;
            Ok("unblocked")
        });
        let (mut server, mut chan) = start_with_map(map, ServerOptions::default());
        chan.send(br#"{"jsonrpc":"2.0","id":1,"method":"Linger"}"#)
            .await
            .unwrap();

        // Give the handler time to start blocking, then stop the server;
        // the handler must unblock for shutdown to complete.
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.stop().await;
        assert!(server.wait().await.is_ok());
    }
}
