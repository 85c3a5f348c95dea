//! # relay-fabric CLI
//!
//! The primary entry point, dispatching to either the bridge relay daemon
//! or the host/guest RPC demo depending on the subcommand given. Both
//! roles are also available as standalone binaries (`relay-daemon`,
//! `fabric-demo`) for deployments that want a single-purpose process.

use anyhow::Result;
use clap::Parser;
use relay_fabric::app;
use relay_fabric::cli::{Args, Command};
use relay_fabric::logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Relay(relay_args) => {
            let _guard = logging::init(
                relay_args.verbose,
                relay_args.quiet,
                relay_args.log_file.as_deref(),
                "relay-daemon.log",
            );
            info!("starting bridge relay daemon");
            app::run_relay(&relay_args).await
        }
        Command::Demo(demo_args) => {
            let _guard = logging::init(
                demo_args.verbose,
                demo_args.quiet,
                demo_args.log_file.as_deref(),
                "fabric-demo.log",
            );
            info!("starting host/guest rpc demo");
            app::run_demo(&demo_args).await
        }
    }
}
