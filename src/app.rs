//! Runner functions shared by the `relay-fabric` binary and its two
//! standalone counterparts (`relay-daemon`, `fabric-demo`), so the
//! dispatch logic for each role lives in exactly one place.

use crate::bridge::relay::RelayDaemon;
use crate::cli::{DemoArgs, RelayArgs};
use crate::rpc::{connect_guest, connect_host, LocalSchemaBuilder};
use crate::transport::in_process::in_process_pair;
use crate::transport::stream::serve_tcp;
use crate::transport::PeerIdentity;

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Run the bridge relay daemon until the process is killed, accepting TCP
/// connections on `args.bind` and routing broadcasts between channel
/// members. Mirrors a typical `start_multi_server` accept loop: one
/// accepted connection spawns one handler task.
pub async fn run_relay(args: &RelayArgs) -> Result<()> {
    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, "bridge relay daemon listening");

    let daemon = Arc::new(RelayDaemon::new());
    serve_tcp(listener, |addr| PeerIdentity::new(addr.to_string()), move |transport, frames| {
        let daemon = daemon.clone();
        let peer = transport.peer();
        info!(%peer, "accepted bridge peer connection");
        tokio::spawn(async move {
            daemon.handle_connection(Arc::new(transport), frames).await;
            info!(%peer, "bridge peer connection closed");
        });
    })
    .await;

    Ok(())
}

/// Run a host/guest RPC pair over an in-process transport: the host
/// publishes a `double` method that calls back into the guest's `bias`
/// method to show a call flowing in both directions on the same
/// connection, then the guest calls `double` and the result is printed.
pub async fn run_demo(args: &DemoArgs) -> Result<()> {
    let host_schema = LocalSchemaBuilder::new()
        .method("double", |call_args, remote| async move {
            let n = call_args[0].as_i64().unwrap_or(0);
            let bias = remote.call_json("bias", vec![]).await?;
            Ok(json!(n * 2 + bias.as_i64().unwrap_or(0)))
        })
        .build();

    let guest_schema = LocalSchemaBuilder::new()
        .method("bias", |_args, _remote| async { Ok(json!(1)) })
        .build();

    let ((host_t, host_rx), (guest_t, guest_rx)) =
        in_process_pair(PeerIdentity::new("host"), PeerIdentity::new("guest"));

    let host_fut = connect_host(host_t, host_rx, None, host_schema);
    let guest_fut = connect_guest(guest_t, guest_rx, guest_schema);
    let (host, guest) = tokio::join!(host_fut, guest_fut);
    let host = host.context("host handshake failed")?;
    let guest = guest.context("guest handshake failed")?;

    info!(cid = %host.cid, "host/guest connection established");

    let result = guest
        .remote
        .call_json("double", vec![json!(args.input)])
        .await
        .map_err(|err| anyhow::anyhow!("double call failed: {err}"))?;

    info!(input = args.input, result = %result, "guest called host's double method");
    println!("double({}) = {}", args.input, result);

    guest.close().await;
    host.close().await;
    Ok(())
}
