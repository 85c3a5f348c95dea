//! The bridge relay daemon: a single long-lived task owning per-channel peer
//! directories and shared state, routing broadcasts and direct messages and
//! detecting duplicate identities.
//!
//! Generalizes a multi-client accept loop's
//! `Arc<Mutex<HashMap<ConnectionId, Stream>>>` connection directory from
//! "connection id → stream" to "channel name → peer directory", keeping the
//! same "spawn one handler task per accepted connection" shape.

use crate::envelope::{
    BridgeBroadcast, BridgeDirectMessage, BridgeErrorCode, BridgeGetState, BridgeGetTabs,
    BridgeHandshake, BridgeHandshakeAck, BridgeHandshakeError, BridgeSetState, BridgeStateResponse,
    BridgeStateUpdate, BridgeTabsResponse, Envelope,
};
use crate::schema;
use crate::transport::{Frame, Transport};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace, warn};

struct PeerRecord {
    transport: Arc<dyn Transport>,
    method_names: Vec<String>,
}

struct ChannelState {
    peers: HashMap<String, PeerRecord>,
    shared_state: Value,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            peers: HashMap::new(),
            shared_state: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Shared state for every channel the relay currently knows about. Channels
/// are created lazily on first reference and destroyed eagerly once their
/// last peer disconnects — an empty channel holds no state worth keeping
/// around.
#[derive(Default)]
pub struct RelayDaemon {
    channels: Mutex<HashMap<String, ChannelState>>,
}

impl RelayDaemon {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Drive one accepted peer connection until it disconnects or its
    /// transport closes. Intended to be spawned per connection by a
    /// listener loop (see `transport::stream::serve_tcp`/`serve_unix`).
    pub async fn handle_connection(self: Arc<Self>, transport: Arc<dyn Transport>, mut frames: mpsc::Receiver<Frame>) {
        let (channel, tab_id) = loop {
            let Some(frame) = frames.recv().await else { return };
            let Envelope::BridgeHandshake(handshake) = frame.envelope else {
                trace!("ignoring envelope before bridge handshake");
                continue;
            };
            let (channel, tab_id) = (handshake.channel.clone(), handshake.tab_id.clone());
            let ack = self.handshake(handshake, transport.clone()).await;
            if let Err(err) = transport.send(Frame::new(ack)).await {
                warn!(%err, "failed to acknowledge bridge handshake");
            }
            break (channel, tab_id);
        };

        while let Some(frame) = frames.recv().await {
            self.dispatch(&channel, frame.envelope, transport.clone()).await;
        }

        self.disconnect(&channel, &tab_id).await;
    }

    async fn handshake(&self, handshake: BridgeHandshake, transport: Arc<dyn Transport>) -> Envelope {
        let mut channels = self.channels.lock().await;
        let channel = channels.entry(handshake.channel.clone()).or_insert_with(ChannelState::new);

        if let Some(prior) = channel.peers.remove(&handshake.tab_id) {
            info!(tab_id = %handshake.tab_id, channel = %handshake.channel, "evicting prior holder of duplicate tab id");
            let error = Envelope::BridgeHandshakeError(BridgeHandshakeError {
                code: BridgeErrorCode::DuplicateTabId,
                error: format!("tab id {:?} reconnected on channel {:?}", handshake.tab_id, handshake.channel),
                tab_id: Some(handshake.tab_id.clone()),
                channel: Some(handshake.channel.clone()),
            });
            if let Err(err) = prior.transport.send(Frame::new(error)).await {
                warn!(%err, "failed to notify evicted peer");
            }
            // Close the evicted peer's endpoint outright so its still-running
            // connection task can't keep sending under the tab id it just lost.
            prior.transport.shutdown().await;
        } else if channel.peers.is_empty() {
            if let Some(schema) = &handshake.schema {
                channel.shared_state = schema.clone();
            }
        }

        channel.peers.insert(
            handshake.tab_id.clone(),
            PeerRecord {
                transport,
                method_names: handshake.method_names,
            },
        );
        info!(tab_id = %handshake.tab_id, channel = %handshake.channel, peers = channel.peers.len(), "peer joined bridge channel");

        Envelope::BridgeHandshakeAck(BridgeHandshakeAck {
            tab_id: handshake.tab_id,
            channel: handshake.channel,
            shared_state: channel.shared_state.clone(),
        })
    }

    async fn dispatch(&self, channel_name: &str, envelope: Envelope, requester: Arc<dyn Transport>) {
        match envelope {
            Envelope::BridgeBroadcast(broadcast) => self.relay_broadcast(channel_name, broadcast).await,
            Envelope::BridgeDirectMessage(message) => self.relay_direct(channel_name, message).await,
            Envelope::BridgeGetTabs(request) => self.reply_tabs(channel_name, request, requester).await,
            Envelope::BridgeGetState(request) => self.reply_state(channel_name, request, requester).await,
            Envelope::BridgeSetState(update) => self.apply_state_update(channel_name, update).await,
            Envelope::BridgeDisconnect(disconnect) => self.disconnect(channel_name, &disconnect.tab_id).await,
            _ => trace!("ignoring envelope outside the bridge dispatch table"),
        }
    }

    async fn relay_broadcast(&self, channel_name: &str, broadcast: BridgeBroadcast) {
        let relay = Envelope::BridgeRelay(crate::envelope::BridgeRelay {
            sender_tab_id: broadcast.sender_tab_id.clone(),
            method_name: broadcast.method_name,
            args: broadcast.args,
            sender_result: broadcast.result,
            sender_error: broadcast.error,
        });

        let channels = self.channels.lock().await;
        let Some(channel) = channels.get(channel_name) else { return };
        for (tab_id, peer) in &channel.peers {
            if tab_id == &broadcast.sender_tab_id {
                continue;
            }
            if let Err(err) = peer.transport.send(Frame::new(relay.clone())).await {
                warn!(%err, tab_id = %tab_id, "broadcast delivery failed for a peer");
            }
        }
    }

    async fn relay_direct(&self, channel_name: &str, message: BridgeDirectMessage) {
        let channels = self.channels.lock().await;
        let Some(channel) = channels.get(channel_name) else { return };
        let Some(target) = channel.peers.get(&message.target_tab_id) else {
            debug!(target = %message.target_tab_id, "dropping direct message to unknown tab");
            return;
        };
        let relay = Envelope::BridgeRelay(crate::envelope::BridgeRelay {
            sender_tab_id: message.sender_tab_id,
            method_name: message.method_name,
            args: message.args,
            sender_result: message.result,
            sender_error: message.error,
        });
        if let Err(err) = target.transport.send(Frame::new(relay)).await {
            warn!(%err, "direct message delivery failed");
        }
    }

    async fn reply_tabs(&self, channel_name: &str, request: BridgeGetTabs, requester: Arc<dyn Transport>) {
        let channels = self.channels.lock().await;
        let tab_ids = channels
            .get(channel_name)
            .map(|c| c.peers.keys().cloned().collect())
            .unwrap_or_default();
        drop(channels);
        let _ = request.requesting_tab_id;
        let response = Envelope::BridgeTabsResponse(BridgeTabsResponse {
            tab_ids,
            channel: channel_name.to_string(),
        });
        if let Err(err) = requester.send(Frame::new(response)).await {
            warn!(%err, "failed to reply to get_tabs");
        }
    }

    async fn reply_state(&self, channel_name: &str, _request: BridgeGetState, requester: Arc<dyn Transport>) {
        let channels = self.channels.lock().await;
        let state = channels
            .get(channel_name)
            .map(|c| c.shared_state.clone())
            .unwrap_or(Value::Null);
        drop(channels);
        let response = Envelope::BridgeStateResponse(BridgeStateResponse { state });
        if let Err(err) = requester.send(Frame::new(response)).await {
            warn!(%err, "failed to reply to get_state");
        }
    }

    async fn apply_state_update(&self, channel_name: &str, update: BridgeSetState) {
        let mut channels = self.channels.lock().await;
        let Some(channel) = channels.get_mut(channel_name) else { return };
        schema::set_path(&mut channel.shared_state, &update.key, update.value.clone());
        let broadcast = Envelope::BridgeStateUpdate(BridgeStateUpdate {
            key: update.key,
            value: update.value,
        });
        for peer in channel.peers.values() {
            if let Err(err) = peer.transport.send(Frame::new(broadcast.clone())).await {
                warn!(%err, "state update delivery failed");
            }
        }
    }

    async fn disconnect(&self, channel_name: &str, tab_id: &str) {
        let mut channels = self.channels.lock().await;
        let Some(channel) = channels.get_mut(channel_name) else { return };
        channel.peers.remove(tab_id);
        info!(%tab_id, channel = %channel_name, peers = channel.peers.len(), "peer left bridge channel");
        if channel.peers.is_empty() {
            channels.remove(channel_name);
            debug!(channel = %channel_name, "channel emptied and removed");
        }
    }

    /// Introspection helper exposing the declared method names of a
    /// connected peer.
    pub async fn peer_method_names(&self, channel_name: &str, tab_id: &str) -> Option<Vec<String>> {
        self.channels
            .lock()
            .await
            .get(channel_name)
            .and_then(|c| c.peers.get(tab_id))
            .map(|p| p.method_names.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::in_process::in_process_pair;
    use crate::transport::PeerIdentity;

    fn handshake(tab_id: &str, channel: &str) -> BridgeHandshake {
        BridgeHandshake {
            tab_id: tab_id.to_string(),
            method_names: Vec::new(),
            channel: channel.to_string(),
            schema: None,
        }
    }

    #[tokio::test]
    async fn duplicate_tab_id_handshake_closes_the_prior_peers_transport() {
        let daemon = RelayDaemon::new();

        let ((relay_side_1, _relay_rx_1), (_peer_side_1, _peer_rx_1)) =
            in_process_pair(PeerIdentity::new("relay"), PeerIdentity::new("t"));
        let relay_side_1: Arc<dyn Transport> = Arc::new(relay_side_1);
        daemon.handshake(handshake("t", "chan"), relay_side_1.clone()).await;

        let ((relay_side_2, _relay_rx_2), (_peer_side_2, _peer_rx_2)) =
            in_process_pair(PeerIdentity::new("relay"), PeerIdentity::new("t"));
        let relay_side_2: Arc<dyn Transport> = Arc::new(relay_side_2);
        let ack = daemon.handshake(handshake("t", "chan"), relay_side_2.clone()).await;
        assert!(matches!(ack, Envelope::BridgeHandshakeAck(_)));

        assert!(
            relay_side_1.send(Frame::new(Envelope::Unknown)).await.is_err(),
            "evicted peer's endpoint must be closed, not just dropped from the directory"
        );
        assert!(relay_side_2.send(Frame::new(Envelope::Unknown)).await.is_ok());
    }

    #[tokio::test]
    async fn channel_state_is_removed_once_its_last_peer_disconnects() {
        let daemon = RelayDaemon::new();
        let ((relay_side, _relay_rx), (_peer_side, _peer_rx)) =
            in_process_pair(PeerIdentity::new("relay"), PeerIdentity::new("solo"));
        let relay_side: Arc<dyn Transport> = Arc::new(relay_side);

        daemon.handshake(handshake("solo", "room"), relay_side).await;
        assert!(daemon.peer_method_names("room", "solo").await.is_some());

        daemon.disconnect("room", "solo").await;
        assert!(
            daemon.channels.lock().await.get("room").is_none(),
            "channel must be removed entirely once empty, not just left with no peers"
        );
    }

    #[tokio::test]
    async fn a_remaining_peer_keeps_the_channel_alive() {
        let daemon = RelayDaemon::new();
        let ((relay_a, _rx_a), (_peer_a, _peer_rx_a)) =
            in_process_pair(PeerIdentity::new("relay"), PeerIdentity::new("a"));
        let ((relay_b, _rx_b), (_peer_b, _peer_rx_b)) =
            in_process_pair(PeerIdentity::new("relay"), PeerIdentity::new("b"));

        daemon.handshake(handshake("a", "room"), Arc::new(relay_a)).await;
        daemon.handshake(handshake("b", "room"), Arc::new(relay_b)).await;

        daemon.disconnect("room", "a").await;
        assert!(daemon.channels.lock().await.get("room").is_some());
        assert!(daemon.peer_method_names("room", "b").await.is_some());
    }
}
