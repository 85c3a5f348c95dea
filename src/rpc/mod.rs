//! The RPC engine: handshake, request/response correlation, proxy
//! materialization, transferables, and teardown.
//!
//! One connection, one background reader task, and a shared pending-call
//! table protected by `tokio::sync::Mutex`: each in-flight call claims a
//! correlation id and parks a `oneshot::Sender` under it in a plain
//! `Mutex<HashMap<_, oneshot::Sender<_>>>`, rather than reaching for an
//! external wait-map crate.

pub mod transferable;

use crate::envelope::{Envelope, Handshake, RpcReject, RpcRequest, RpcResolve};
use crate::error::{HandshakeError, RemoteError};
use crate::id;
use crate::schema;
use crate::schema::MethodDirectory;
use crate::transport::{Frame, PeerIdentity, Transport};
pub use transferable::{CallArg, TransferBuffer, Transferable};

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// The boxed future a registered method handler returns.
pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Value, RemoteError>> + Send>>;

/// A local method: receives its call arguments and the *caller's* remote
/// proxy as a final argument, so a handler can call back into whoever
/// invoked it without needing a separate lookup.
pub type MethodHandler = Arc<dyn Fn(Vec<Value>, Remote) -> MethodFuture + Send + Sync>;

/// A schema ready to be published at handshake time: a method table plus a
/// residual configuration tree. Built explicitly by the caller rather than
/// by reflecting over live closures, since Rust has no way to discover
/// "this value used to be a function" by walking a tree at runtime.
#[derive(Clone)]
pub struct LocalSchema {
    handlers: Arc<HashMap<String, MethodHandler>>,
    residual: Value,
}

impl LocalSchema {
    pub fn directory(&self) -> MethodDirectory {
        self.handlers.keys().cloned().collect()
    }

    pub fn residual(&self) -> &Value {
        &self.residual
    }
}

/// Builds a [`LocalSchema`] one method/data field at a time.
pub struct LocalSchemaBuilder {
    handlers: HashMap<String, MethodHandler>,
    residual: Value,
}

impl Default for LocalSchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSchemaBuilder {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            residual: Value::Object(serde_json::Map::new()),
        }
    }

    /// Register a method at a dotted path.
    pub fn method<F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>, Remote) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        let wrapped: MethodHandler = Arc::new(move |args, remote| Box::pin(handler(args, remote)));
        self.handlers.insert(path.into(), wrapped);
        self
    }

    /// Attach non-function configuration data at a dotted path, surviving
    /// into the published residual schema.
    pub fn data(mut self, path: &str, value: Value) -> Self {
        schema::set_path(&mut self.residual, path, value);
        self
    }

    pub fn build(self) -> LocalSchema {
        LocalSchema {
            handlers: Arc::new(self.handlers),
            residual: self.residual,
        }
    }
}

/// A materialized proxy for a peer's published schema. `call` invokes a
/// remote method by dotted name; `data`/`get` expose the peer's
/// non-function residual schema, since Rust has no dynamic property access
/// to hang proxy functions off of the way a dynamically-typed caller would.
#[derive(Clone)]
pub struct Remote {
    cid: String,
    directory: Arc<MethodDirectory>,
    residual: Arc<Value>,
    inner: Arc<ConnectionInner>,
}

impl Remote {
    fn new(cid: String, directory: MethodDirectory, residual: Value, inner: Arc<ConnectionInner>) -> Self {
        Self {
            cid,
            directory: Arc::new(directory),
            residual: Arc::new(residual),
            inner,
        }
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn methods(&self) -> &MethodDirectory {
        &self.directory
    }

    pub fn data(&self) -> &Value {
        &self.residual
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        schema::get_path(&self.residual, path)
    }

    /// Invoke a method on the peer, correlating the reply by a fresh
    /// `callID`.
    pub async fn call(&self, name: &str, args: Vec<CallArg>) -> Result<Value, RemoteError> {
        if !self.directory.contains(name) {
            return Err(RemoteError::new(format!("remote has no method {name:?}")).with_name("NoSuchMethod"));
        }
        self.inner.call(&self.cid, name, args).await
    }

    /// Convenience for callers with no transferables to attach.
    pub async fn call_json(&self, name: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        self.call(name, args.into_iter().map(CallArg::Value).collect()).await
    }
}

type PendingTable = Mutex<HashMap<String, oneshot::Sender<Result<Value, RemoteError>>>>;

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    pending: PendingTable,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionInner {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
            dispatch_task: Mutex::new(None),
        }
    }

    async fn call(&self, cid: &str, call_name: &str, args: Vec<CallArg>) -> Result<Value, RemoteError> {
        let call_id = id::generate();
        let (json_args, transfers) = transferable::prepare_args(args);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(call_id.clone(), tx);

        let envelope = Envelope::RpcRequest(RpcRequest {
            cid: cid.to_string(),
            call_id: call_id.clone(),
            call_name: call_name.to_string(),
            args: json_args,
        });

        if let Err(err) = self.transport.send(Frame::with_transfers(envelope, transfers)).await {
            self.pending.lock().await.remove(&call_id);
            return Err(RemoteError::new(err.to_string()).with_name("TransportError"));
        }

        match rx.await {
            Ok(outcome) => outcome,
            // Dropping the sender (on close()) wakes the receiver with an
            // error rather than hanging forever.
            Err(_) => Err(RemoteError::new("connection closed before a reply arrived").with_name("Closed")),
        }
    }

    async fn install_dispatch(
        self: &Arc<Self>,
        mut frames: mpsc::Receiver<Frame>,
        handlers: Arc<HashMap<String, MethodHandler>>,
        remote: Remote,
    ) {
        let inner = self.clone();
        let task = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                inner.clone().handle_frame(frame, &handlers, &remote).await;
            }
        });
        *self.dispatch_task.lock().await = Some(task);
    }

    async fn handle_frame(
        self: Arc<Self>,
        frame: Frame,
        handlers: &HashMap<String, MethodHandler>,
        remote: &Remote,
    ) {
        match frame.envelope {
            Envelope::RpcRequest(req) => {
                let args = transferable::resolve_args(req.args, &frame.transfers);
                let handler = handlers.get(&req.call_name).cloned();
                let transport = self.transport.clone();
                let remote_for_call = remote.clone();
                let RpcRequest { cid, call_id, call_name, .. } = req;

                tokio::spawn(async move {
                    let outcome = match handler {
                        Some(handler) => handler(args, remote_for_call).await,
                        None => Err(RemoteError::new(format!("no such method: {call_name}")).with_name("NoSuchMethod")),
                    };
                    let envelope = match outcome {
                        Ok(result) => Envelope::RpcResolve(RpcResolve { cid, call_id, call_name, result }),
                        Err(error) => Envelope::RpcReject(RpcReject { cid, call_id, call_name, error }),
                    };
                    if let Err(err) = transport.send(Frame::new(envelope)).await {
                        warn!(%err, "failed to deliver rpc response");
                    }
                });
            }
            Envelope::RpcResolve(res) => {
                if let Some(sender) = self.pending.lock().await.remove(&res.call_id) {
                    let _ = sender.send(Ok(res.result));
                } else {
                    trace!(call_id = %res.call_id, "ignoring resolve for unknown call id");
                }
            }
            Envelope::RpcReject(rej) => {
                if let Some(sender) = self.pending.lock().await.remove(&rej.call_id) {
                    let _ = sender.send(Err(rej.error));
                } else {
                    trace!(call_id = %rej.call_id, "ignoring reject for unknown call id");
                }
            }
            Envelope::HandshakeReply(_) => {
                debug!("ignoring trailing handshake echo after connection is established");
            }
            _ => trace!("ignoring envelope outside the rpc namespace"),
        }
    }

    /// Idempotent teardown: aborts the dispatch task and drops the
    /// pending-call table. Dropped `oneshot::Sender`s wake their receivers
    /// with an error rather than leaving them pending forever, since Rust
    /// has no GC'd dangling-promise equivalent.
    async fn close(&self) {
        if let Some(task) = self.dispatch_task.lock().await.take() {
            task.abort();
        }
        self.pending.lock().await.clear();
    }
}

/// An established RPC connection.
#[derive(Clone)]
pub struct Connection {
    pub cid: String,
    pub remote: Remote,
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

/// Responder-side connect (host role). Waits for a `HANDSHAKE_REQUEST` from
/// `expected_peer` (when given), validating the originating transport's
/// identity before acting — the direct analogue of comparing source window
/// and origin in a browser. Invalid-peer frames are dropped silently; no
/// reply, no error.
pub async fn connect_host<T>(
    transport: T,
    mut frames: mpsc::Receiver<Frame>,
    expected_peer: Option<PeerIdentity>,
    local: LocalSchema,
) -> Result<Connection, HandshakeError>
where
    T: Transport + 'static,
{
    let transport: Arc<dyn Transport> = Arc::new(transport);

    loop {
        let frame = frames
            .recv()
            .await
            .ok_or(HandshakeError::UnknownConnection("transport closed before handshake".into()))?;

        if let Some(expected) = &expected_peer {
            if &transport.peer() != expected {
                debug!(peer = %transport.peer(), "dropping handshake from unvalidated peer");
                continue;
            }
        }

        let Envelope::HandshakeRequest(request) = frame.envelope else {
            trace!("ignoring non-handshake envelope before connection is established");
            continue;
        };

        let cid = request.cid;
        let peer_directory: MethodDirectory = request.method_names.into_iter().collect();
        let peer_residual = request.schema;

        let inner = Arc::new(ConnectionInner::new(transport.clone()));
        let remote = Remote::new(cid.clone(), peer_directory, peer_residual, inner.clone());

        let reply = Envelope::HandshakeReply(Handshake {
            cid: cid.clone(),
            method_names: local.directory().into_iter().collect(),
            schema: local.residual.clone(),
        });
        transport.send(Frame::new(reply)).await?;

        inner.install_dispatch(frames, local.handlers.clone(), remote.clone()).await;

        return Ok(Connection { cid, remote, inner });
    }
}

/// Initiator-side connect (guest role). Generates
/// the connection's `cid`, sends `HANDSHAKE_REQUEST`, awaits a matching
/// `HANDSHAKE_REPLY`, then echoes a final `HANDSHAKE_REPLY` so the
/// responder can observe readiness.
pub async fn connect_guest<T>(
    transport: T,
    mut frames: mpsc::Receiver<Frame>,
    local: LocalSchema,
) -> Result<Connection, HandshakeError>
where
    T: Transport + 'static,
{
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let cid = id::generate();

    let request = Envelope::HandshakeRequest(Handshake {
        cid: cid.clone(),
        method_names: local.directory().into_iter().collect(),
        schema: local.residual.clone(),
    });
    transport.send(Frame::new(request)).await?;

    loop {
        let frame = frames
            .recv()
            .await
            .ok_or_else(|| HandshakeError::UnknownConnection(cid.clone()))?;

        let Envelope::HandshakeReply(reply) = frame.envelope else {
            trace!("ignoring non-handshake envelope before connection is established");
            continue;
        };

        if reply.cid != cid {
            debug!(got = %reply.cid, expected = %cid, "dropping handshake reply for unknown cid");
            continue;
        }

        let peer_directory: MethodDirectory = reply.method_names.into_iter().collect();
        let peer_residual = reply.schema;

        let inner = Arc::new(ConnectionInner::new(transport.clone()));
        let remote = Remote::new(cid.clone(), peer_directory, peer_residual, inner.clone());

        let echo = Envelope::HandshakeReply(Handshake {
            cid: cid.clone(),
            method_names: local.directory().into_iter().collect(),
            schema: local.residual.clone(),
        });
        transport.send(Frame::new(echo)).await?;

        inner.install_dispatch(frames, local.handlers.clone(), remote.clone()).await;

        return Ok(Connection { cid, remote, inner });
    }
}
