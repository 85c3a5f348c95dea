//! Loopback transport: a same-process connection where the host and guest
//! instance are one and the same. Used by tests and the `fabric-demo`
//! binary that want a fully working RPC connection without opening a
//! socket. Structurally a relabeled [`super::in_process`] pair, since a
//! loopback is just an in-process channel whose two peer identities happen
//! to coincide.

use super::in_process::in_process_pair;
use super::{Frame, PeerIdentity, Transport};
use tokio::sync::mpsc;

/// Build a connected loopback pair under a single shared identity label,
/// useful for tests that only care about exercising the RPC engine itself.
pub fn loopback_pair(
    label: impl Into<String>,
) -> (
    (impl Transport, mpsc::Receiver<Frame>),
    (impl Transport, mpsc::Receiver<Frame>),
) {
    let identity = PeerIdentity::new(label.into());
    in_process_pair(identity.clone(), identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BridgeDisconnect, Envelope};

    #[tokio::test]
    async fn loopback_pair_round_trips_a_frame() {
        let ((a, _a_rx), (b, mut b_rx)) = loopback_pair("test");
        let envelope = Envelope::BridgeDisconnect(BridgeDisconnect {
            tab_id: "t".into(),
            channel: "c".into(),
        });
        a.send(Frame::new(envelope)).await.unwrap();
        let received = b_rx.recv().await.unwrap();
        assert!(matches!(received.envelope, Envelope::BridgeDisconnect(_)));
    }
}
