//! Standalone host/guest RPC demo binary: starts [`relay_fabric::app::run_demo`]
//! with its own argument parsing, for users who just want to see a call
//! round-trip without touching the relay.

use anyhow::Result;
use clap::Parser;
use relay_fabric::app;
use relay_fabric::cli::DemoArgs;
use relay_fabric::logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = DemoArgs::parse();
    let _guard = logging::init(args.verbose, args.quiet, args.log_file.as_deref(), "fabric-demo.log");
    info!("starting host/guest rpc demo");
    app::run_demo(&args).await
}
