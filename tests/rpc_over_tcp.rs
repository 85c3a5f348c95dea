//! End-to-end RPC handshake and call round-trip over a real TCP socket,
//! exercising `StreamTransport` rather than the in-process test double used
//! by the unit tests in `src/rpc/mod.rs`.

use relay_fabric::rpc::{connect_guest, connect_host, LocalSchemaBuilder};
use relay_fabric::transport::stream::{connect_tcp, serve_tcp};
use relay_fabric::transport::PeerIdentity;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[tokio::test]
async fn host_and_guest_complete_a_call_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (accepted_tx, accepted_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut accepted_tx = Some(accepted_tx);
        serve_tcp(listener, |peer_addr| PeerIdentity::new(peer_addr.to_string()), move |transport, frames| {
            if let Some(tx) = accepted_tx.take() {
                let _ = tx.send((transport, frames));
            }
        })
        .await;
    });

    let (client, client_rx) = connect_tcp(addr, PeerIdentity::new("server")).await.unwrap();
    let (server_transport, server_rx) = accepted_rx.await.unwrap();

    let host_schema = LocalSchemaBuilder::new()
        .method("echo", |args, _remote| async move { Ok(args[0].clone()) })
        .build();

    let host_fut = connect_host(server_transport, server_rx, None, host_schema);
    let guest_fut = connect_guest(client, client_rx, LocalSchemaBuilder::new().build());
    let (host, guest) = tokio::join!(host_fut, guest_fut);
    let _host = host.unwrap();
    let guest = guest.unwrap();

    let result = guest
        .remote
        .call_json("echo", vec![json!("hello over tcp")])
        .await
        .unwrap();
    assert_eq!(result, json!("hello over tcp"));
}
