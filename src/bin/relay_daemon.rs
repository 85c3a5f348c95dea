//! Standalone bridge relay daemon binary: starts
//! [`relay_fabric::app::run_relay`] with its own argument parsing, for
//! deployments that want a single-purpose relay process rather than the
//! combined `relay-fabric relay` subcommand.

use anyhow::Result;
use clap::Parser;
use relay_fabric::app;
use relay_fabric::cli::RelayArgs;
use relay_fabric::logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = RelayArgs::parse();
    let _guard = logging::init(args.verbose, args.quiet, args.log_file.as_deref(), "relay-daemon.log");
    info!("starting bridge relay daemon");
    app::run_relay(&args).await
}
