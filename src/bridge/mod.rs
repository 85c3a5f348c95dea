//! The bridge client: per-peer membership in a named channel on the relay,
//! broadcast/direct-message proxies, and the relay-driven re-execution of
//! remote peers' calls against local state.
//!
//! Structurally mirrors [`crate::rpc`]'s connection shape (one transport,
//! one background dispatch task, a method table keyed by dotted path) but
//! without call correlation for broadcasts/relays — a relayed invocation
//! fans out to every other peer and none of them reply to it.

pub mod relay;

use crate::envelope::{
    BridgeBroadcast, BridgeDirectMessage, BridgeDisconnect, BridgeErrorCode, BridgeGetState,
    BridgeGetTabs, BridgeHandshake, BridgeSetState, Envelope,
};
use crate::error::{BridgeError, RemoteError};
use crate::id;
use crate::schema::{self, MethodDirectory};
use crate::transport::{Frame, Transport};

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub type BridgeMethodFuture = Pin<Box<dyn Future<Output = Result<Value, RemoteError>> + Send>>;
pub type BridgeMethodHandler = Arc<dyn Fn(Vec<Value>) -> BridgeMethodFuture + Send + Sync>;

/// The schema a peer publishes when joining a channel: its method
/// directory plus whatever residual configuration data it wants other
/// peers and the relay itself to see.
#[derive(Clone)]
pub struct BridgeSchema {
    handlers: Arc<HashMap<String, BridgeMethodHandler>>,
    residual: Value,
}

impl BridgeSchema {
    pub fn directory(&self) -> MethodDirectory {
        self.handlers.keys().cloned().collect()
    }
}

pub struct BridgeSchemaBuilder {
    handlers: HashMap<String, BridgeMethodHandler>,
    residual: Value,
}

impl Default for BridgeSchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeSchemaBuilder {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            residual: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn method<F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        let wrapped: BridgeMethodHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.handlers.insert(path.into(), wrapped);
        self
    }

    pub fn data(mut self, path: &str, value: Value) -> Self {
        schema::set_path(&mut self.residual, path, value);
        self
    }

    pub fn build(self) -> BridgeSchema {
        BridgeSchema {
            handlers: Arc::new(self.handlers),
            residual: self.residual,
        }
    }
}

struct BridgeInner {
    transport: Arc<dyn Transport>,
    tab_id: String,
    channel: String,
    handlers: Arc<HashMap<String, BridgeMethodHandler>>,
    shared_state: Mutex<Value>,
    pending_tabs: Mutex<VecDeque<oneshot::Sender<Vec<String>>>>,
    pending_state: Mutex<VecDeque<oneshot::Sender<Value>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeInner {
    async fn install_dispatch(self: &Arc<Self>, mut frames: mpsc::Receiver<Frame>) {
        let inner = self.clone();
        let task = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                inner.handle_frame(frame.envelope).await;
            }
        });
        *self.dispatch_task.lock().await = Some(task);
    }

    async fn handle_frame(&self, envelope: Envelope) {
        match envelope {
            Envelope::BridgeRelay(relay) => {
                let Some(handler) = self.handlers.get(&relay.method_name).cloned() else {
                    trace!(method = %relay.method_name, "no local handler for relayed call");
                    return;
                };
                // Relayed invocations reproduce state; they never reply.
                if let Err(err) = handler(relay.args).await {
                    warn!(%err, method = %relay.method_name, "relayed call failed");
                }
            }
            Envelope::BridgeTabsResponse(resp) => {
                if let Some(sender) = self.pending_tabs.lock().await.pop_front() {
                    let _ = sender.send(resp.tab_ids);
                }
            }
            Envelope::BridgeStateResponse(resp) => {
                if let Some(sender) = self.pending_state.lock().await.pop_front() {
                    let _ = sender.send(resp.state);
                }
            }
            Envelope::BridgeStateUpdate(update) => {
                let mut state = self.shared_state.lock().await;
                schema::set_path(&mut state, &update.key, update.value);
            }
            Envelope::BridgeHandshakeError(err) => {
                warn!(code = ?err.code, "evicted from bridge channel by a duplicate tab id");
                if let Some(task) = self.dispatch_task.lock().await.take() {
                    task.abort();
                }
            }
            _ => trace!("ignoring envelope outside the bridge namespace"),
        }
    }

    async fn invoke_local(&self, method_name: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        let handler = self
            .handlers
            .get(method_name)
            .cloned()
            .ok_or_else(|| RemoteError::new(format!("no such method {method_name:?}")).with_name("NoSuchMethod"))?;
        handler(args).await
    }

    async fn close(&self) {
        let disconnect = Envelope::BridgeDisconnect(BridgeDisconnect {
            tab_id: self.tab_id.clone(),
            channel: self.channel.clone(),
        });
        let _ = self.transport.send(Frame::new(disconnect)).await;
        if let Some(task) = self.dispatch_task.lock().await.take() {
            task.abort();
        }
        self.pending_tabs.lock().await.clear();
        self.pending_state.lock().await.clear();
    }
}

/// A peer's connection to a bridge channel.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<BridgeInner>,
}

impl BridgeClient {
    pub fn tab_id(&self) -> &str {
        &self.inner.tab_id
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Run a method locally, then broadcast the invocation (and its
    /// outcome) to every other peer of the channel. The sender never
    /// receives its own relay.
    pub async fn broadcast(&self, method_name: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        let outcome = self.inner.invoke_local(method_name, args.clone()).await;
        let envelope = Envelope::BridgeBroadcast(BridgeBroadcast {
            sender_tab_id: self.inner.tab_id.clone(),
            channel: self.inner.channel.clone(),
            method_name: method_name.to_string(),
            args,
            result: outcome.as_ref().ok().cloned(),
            error: outcome.as_ref().err().cloned(),
        });
        if let Err(err) = self.inner.transport.send(Frame::new(envelope)).await {
            warn!(%err, "failed to publish broadcast to relay");
        }
        outcome
    }

    /// Run a method locally, then deliver it only to `target_tab_id`
    /// instead of fanning it out to the whole channel.
    pub async fn send_to(
        &self,
        target_tab_id: &str,
        method_name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RemoteError> {
        let outcome = self.inner.invoke_local(method_name, args.clone()).await;
        let envelope = Envelope::BridgeDirectMessage(BridgeDirectMessage {
            sender_tab_id: self.inner.tab_id.clone(),
            target_tab_id: target_tab_id.to_string(),
            channel: self.inner.channel.clone(),
            method_name: method_name.to_string(),
            args,
            result: outcome.as_ref().ok().cloned(),
            error: outcome.as_ref().err().cloned(),
        });
        if let Err(err) = self.inner.transport.send(Frame::new(envelope)).await {
            warn!(%err, "failed to publish direct message to relay");
        }
        outcome
    }

    pub async fn get_connected_tabs(&self) -> Result<Vec<String>, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending_tabs.lock().await.push_back(tx);
        let request = Envelope::BridgeGetTabs(BridgeGetTabs {
            channel: self.inner.channel.clone(),
            requesting_tab_id: self.inner.tab_id.clone(),
        });
        self.inner.transport.send(Frame::new(request)).await?;
        rx.await.map_err(|_| BridgeError::Closed)
    }

    /// Opt-in surface over the relay's shared-state envelopes: the relay
    /// keeps channel state internally regardless, but only a caller that
    /// actually asks for it pays for the round trip.
    pub async fn get_state(&self) -> Result<Value, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending_state.lock().await.push_back(tx);
        let request = Envelope::BridgeGetState(BridgeGetState {
            channel: self.inner.channel.clone(),
        });
        self.inner.transport.send(Frame::new(request)).await?;
        rx.await.map_err(|_| BridgeError::Closed)
    }

    pub async fn set_state(&self, key: impl Into<String>, value: Value) -> Result<(), BridgeError> {
        let request = Envelope::BridgeSetState(BridgeSetState {
            channel: self.inner.channel.clone(),
            key: key.into(),
            value,
        });
        self.inner.transport.send(Frame::new(request)).await?;
        Ok(())
    }

    /// The locally cached shared-state snapshot, updated on every
    /// `BRIDGE_STATE_UPDATE`. Does not round-trip through the relay.
    pub async fn cached_state(&self) -> Value {
        self.inner.shared_state.lock().await.clone()
    }

    pub async fn close(&self) {
        self.inner.close().await;
    }
}

/// Join a channel on the relay reachable over `transport`.
pub async fn connect<T>(
    transport: T,
    mut frames: mpsc::Receiver<Frame>,
    channel: impl Into<String>,
    tab_id: Option<String>,
    local: BridgeSchema,
) -> Result<BridgeClient, BridgeError>
where
    T: Transport + 'static,
{
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let tab_id = tab_id.unwrap_or_else(id::generate);
    let channel = channel.into();

    let handshake = Envelope::BridgeHandshake(BridgeHandshake {
        tab_id: tab_id.clone(),
        method_names: local.directory().into_iter().collect(),
        channel: channel.clone(),
        schema: Some(local.residual.clone()).filter(|v| !v.is_null()),
    });
    transport.send(Frame::new(handshake)).await?;

    let shared_state = loop {
        let frame = frames.recv().await.ok_or(BridgeError::Closed)?;
        match frame.envelope {
            Envelope::BridgeHandshakeAck(ack) if ack.tab_id == tab_id && ack.channel == channel => {
                break ack.shared_state;
            }
            Envelope::BridgeHandshakeError(err) if err.tab_id.as_deref() == Some(tab_id.as_str()) => {
                return Err(match err.code {
                    BridgeErrorCode::DuplicateTabId => BridgeError::DuplicateTabId(tab_id, channel),
                    _ => BridgeError::InvalidPayload(err.error),
                });
            }
            _ => {
                trace!("ignoring envelope before bridge handshake completes");
                continue;
            }
        }
    };

    debug!(%tab_id, %channel, "joined bridge channel");

    let inner = Arc::new(BridgeInner {
        transport,
        tab_id,
        channel,
        handlers: local.handlers,
        shared_state: Mutex::new(shared_state),
        pending_tabs: Mutex::new(VecDeque::new()),
        pending_state: Mutex::new(VecDeque::new()),
        dispatch_task: Mutex::new(None),
    });
    inner.install_dispatch(frames).await;

    Ok(BridgeClient { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::relay::RelayDaemon;
    use crate::transport::in_process::in_process_pair;
    use crate::transport::PeerIdentity;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    async fn join(
        daemon: &Arc<RelayDaemon>,
        channel: &str,
        tab_id: &str,
        schema: BridgeSchema,
    ) -> BridgeClient {
        let ((relay_t, relay_rx), (peer_t, peer_rx)) = in_process_pair(
            PeerIdentity::new("relay"),
            PeerIdentity::new(tab_id.to_string()),
        );
        let daemon = daemon.clone();
        tokio::spawn(async move {
            daemon.handle_connection(Arc::new(relay_t), relay_rx).await;
        });
        connect(peer_t, peer_rx, channel, Some(tab_id.to_string()), schema)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn broadcast_reaches_every_other_peer_and_never_the_sender() {
        let daemon = Arc::new(RelayDaemon::new());
        let counter_a = Arc::new(AtomicI64::new(0));
        let counter_b = Arc::new(AtomicI64::new(0));
        let counter_c = Arc::new(AtomicI64::new(0));

        let schema_for = |counter: Arc<AtomicI64>| {
            BridgeSchemaBuilder::new()
                .method("inc", move |args| {
                    let counter = counter.clone();
                    async move {
                        let n = args[0].as_i64().unwrap_or(0);
                        counter.fetch_add(n, Ordering::SeqCst);
                        Ok(json!(null))
                    }
                })
                .build()
        };

        let a = join(&daemon, "x", "a", schema_for(counter_a.clone())).await;
        let b = join(&daemon, "x", "b", schema_for(counter_b.clone())).await;
        let c = join(&daemon, "x", "c", schema_for(counter_c.clone())).await;

        a.broadcast("inc", vec![json!(5)]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(counter_a.load(Ordering::SeqCst), 5);
        assert_eq!(counter_b.load(Ordering::SeqCst), 5);
        assert_eq!(counter_c.load(Ordering::SeqCst), 5);

        let tabs = b.get_connected_tabs().await.unwrap();
        assert_eq!(tabs.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_tab_id_evicts_the_prior_holder() {
        let daemon = Arc::new(RelayDaemon::new());
        let p1 = join(&daemon, "y", "t", BridgeSchemaBuilder::new().build()).await;
        let p2 = join(&daemon, "y", "t", BridgeSchemaBuilder::new().build()).await;

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let tabs = p2.get_connected_tabs().await.unwrap();
        assert_eq!(tabs, vec!["t".to_string()]);

        // p1's relay-side endpoint was actually closed (not merely dropped
        // from the directory), so its own dispatch loop observed the close
        // and tore itself down; see relay::tests for the closure assertion
        // made directly against the relay's own transport handle.
        assert!(
            p1.inner.dispatch_task.lock().await.is_none(),
            "evicted peer's dispatch task should have been torn down"
        );
    }

    #[tokio::test]
    async fn send_to_reaches_only_the_targeted_peer() {
        let daemon = Arc::new(RelayDaemon::new());
        let counter_b = Arc::new(AtomicI64::new(0));
        let counter_c = Arc::new(AtomicI64::new(0));

        let schema_for = |counter: Arc<AtomicI64>| {
            BridgeSchemaBuilder::new()
                .method("inc", move |args| {
                    let counter = counter.clone();
                    async move {
                        let n = args[0].as_i64().unwrap_or(0);
                        counter.fetch_add(n, Ordering::SeqCst);
                        Ok(json!(null))
                    }
                })
                .build()
        };

        let a = join(&daemon, "direct", "a", BridgeSchemaBuilder::new().build()).await;
        let b = join(&daemon, "direct", "b", schema_for(counter_b.clone())).await;
        let _c = join(&daemon, "direct", "c", schema_for(counter_c.clone())).await;

        a.send_to("b", "inc", vec![json!(7)]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(counter_b.load(Ordering::SeqCst), 7);
        assert_eq!(counter_c.load(Ordering::SeqCst), 0, "c must not receive b's direct message");
    }

    #[tokio::test]
    async fn set_state_round_trips_through_get_state_and_the_cached_copy() {
        let daemon = Arc::new(RelayDaemon::new());
        let a = join(&daemon, "state", "a", BridgeSchemaBuilder::new().build()).await;
        let b = join(&daemon, "state", "b", BridgeSchemaBuilder::new().build()).await;

        a.set_state("count", json!(42)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let fetched = b.get_state().await.unwrap();
        assert_eq!(fetched, json!({ "count": 42 }));
        assert_eq!(b.cached_state().await, json!({ "count": 42 }));
        assert_eq!(a.cached_state().await, json!({ "count": 42 }));
    }

    #[tokio::test]
    async fn channel_is_torn_down_once_its_last_peer_disconnects() {
        let daemon = Arc::new(RelayDaemon::new());
        let a = join(&daemon, "teardown", "a", BridgeSchemaBuilder::new().build()).await;

        assert!(daemon.peer_method_names("teardown", "a").await.is_some());

        a.close().await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert!(
            daemon.peer_method_names("teardown", "a").await.is_none(),
            "channel should have been removed once its last peer left"
        );
    }
}
