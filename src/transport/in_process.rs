//! In-process transport: both endpoints live in the same runtime and share
//! nothing but a pair of `mpsc` channels. Used when the two ends of a
//! connection live in the same process — a worker task and its host, or a
//! demo binary wiring up both sides of a call for itself.

use super::{Frame, PeerIdentity, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

const CHANNEL_CAPACITY: usize = 256;

/// One end of an in-process channel pair.
pub struct InProcessTransport {
    peer: PeerIdentity,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let outbound = self.outbound.lock().await;
        match outbound.as_ref() {
            Some(sender) => sender.send(frame).await.map_err(|_| TransportError::NotConnected),
            None => Err(TransportError::NotConnected),
        }
    }

    fn peer(&self) -> PeerIdentity {
        self.peer.clone()
    }

    /// Drop our sender half so the peer's receiver observes the channel
    /// ending once any already-queued frames are drained.
    async fn shutdown(&self) {
        self.outbound.lock().await.take();
    }
}

/// Build a connected pair: sending on one side's transport yields a frame on
/// the other side's receiver, and vice versa. Each side also gets its own
/// transport handle to pass to the RPC engine.
pub fn in_process_pair(
    host_identity: PeerIdentity,
    guest_identity: PeerIdentity,
) -> (
    (InProcessTransport, mpsc::Receiver<Frame>),
    (InProcessTransport, mpsc::Receiver<Frame>),
) {
    let (host_tx, host_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (guest_tx, guest_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let host_side = InProcessTransport {
        peer: guest_identity,
        outbound: Mutex::new(Some(guest_tx)),
    };
    let guest_side = InProcessTransport {
        peer: host_identity,
        outbound: Mutex::new(Some(host_tx)),
    };

    ((host_side, host_rx), (guest_side, guest_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BridgeDisconnect, Envelope};

    #[tokio::test]
    async fn frames_sent_on_one_side_arrive_on_the_others_receiver() {
        let ((host, _host_rx), (guest, mut guest_rx)) = in_process_pair(
            PeerIdentity::new("host"),
            PeerIdentity::new("guest"),
        );
        assert_eq!(host.peer(), PeerIdentity::new("guest"));
        assert_eq!(guest.peer(), PeerIdentity::new("host"));

        let envelope = Envelope::BridgeDisconnect(BridgeDisconnect {
            tab_id: "t1".into(),
            channel: "room".into(),
        });
        host.send(Frame::new(envelope)).await.unwrap();

        let received = guest_rx.recv().await.unwrap();
        matches!(received.envelope, Envelope::BridgeDisconnect(_));
    }

    #[tokio::test]
    async fn send_after_peer_receiver_dropped_fails() {
        let ((host, _host_rx), (_guest, guest_rx)) = in_process_pair(
            PeerIdentity::new("host"),
            PeerIdentity::new("guest"),
        );
        drop(guest_rx);

        let envelope = Envelope::BridgeDisconnect(BridgeDisconnect {
            tab_id: "t".into(),
            channel: "c".into(),
        });
        assert!(host.send(Frame::new(envelope)).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_causes_further_sends_to_fail_and_closes_the_peers_receiver() {
        let ((host, _host_rx), (guest, mut guest_rx)) = in_process_pair(
            PeerIdentity::new("host"),
            PeerIdentity::new("guest"),
        );

        host.shutdown().await;

        let envelope = Envelope::BridgeDisconnect(BridgeDisconnect {
            tab_id: "t".into(),
            channel: "c".into(),
        });
        assert!(host.send(Frame::new(envelope)).await.is_err());
        assert!(guest_rx.recv().await.is_none());

        // Idempotent: shutting down again is a no-op, not a panic.
        host.shutdown().await;
        let _ = &guest;
    }
}
