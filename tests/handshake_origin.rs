//! Iframe-style origin validation at handshake time: a host given an
//! `expected_peer` silently drops handshake requests from any other
//! identity rather than completing the connection or replying with an
//! error.

use relay_fabric::rpc::{connect_guest, connect_host, LocalSchemaBuilder};
use relay_fabric::transport::in_process::in_process_pair;
use relay_fabric::transport::PeerIdentity;
use std::time::Duration;

#[tokio::test]
async fn host_drops_handshake_from_an_unexpected_peer() {
    // `in_process_pair`'s first argument becomes the *other* side's
    // observed peer identity, so passing "untrusted-origin" here is what
    // makes `host_t.peer()` report that identity to the host.
    let ((host_t, host_rx), (guest_t, guest_rx)) = in_process_pair(
        PeerIdentity::new("host"),
        PeerIdentity::new("untrusted-origin"),
    );

    let host_fut = connect_host(
        host_t,
        host_rx,
        Some(PeerIdentity::new("trusted-origin")),
        LocalSchemaBuilder::new().build(),
    );
    let guest_fut = connect_guest(guest_t, guest_rx, LocalSchemaBuilder::new().build());

    tokio::pin!(host_fut);
    tokio::pin!(guest_fut);

    let raced = tokio::time::timeout(Duration::from_millis(100), async {
        tokio::select! {
            result = &mut host_fut => Some(result),
            _ = &mut guest_fut => None,
        }
    })
    .await;

    // The host never resolves (it keeps waiting for a handshake from the
    // trusted origin), so the timeout fires before either branch does.
    assert!(raced.is_err(), "host should not complete a handshake from an unexpected peer");
}

#[tokio::test]
async fn host_accepts_handshake_from_the_expected_peer() {
    let identity = PeerIdentity::new("trusted-origin");
    let ((host_t, host_rx), (guest_t, guest_rx)) = in_process_pair(PeerIdentity::new("host"), identity.clone());

    let host_fut = connect_host(host_t, host_rx, Some(identity), LocalSchemaBuilder::new().build());
    let guest_fut = connect_guest(guest_t, guest_rx, LocalSchemaBuilder::new().build());

    let (host, guest) = tokio::join!(host_fut, guest_fut);
    assert_eq!(host.unwrap().cid, guest.unwrap().cid);
}
