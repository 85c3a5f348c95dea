//! Command-line argument parsing shared by the fabric's binaries.
//!
//! One `clap::Parser` derive struct per binary, a `styles()` helper for
//! colored `--help` output, and the usual verbosity-count/quiet flags —
//! one small struct per binary rather than one big configuration struct,
//! since this crate ships a relay daemon and an RPC demo rather than a
//! single benchmark harness.

use clap::builder::styling::{AnsiColor, Styles};
use clap::Parser;

/// Returns the color scheme used for `--help` output, matching clap v3's
/// defaults so the help text looks the same as it always has.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Arguments for the `relay-daemon` binary, a standalone bridge relay that
/// accepts TCP connections and routes broadcasts between channel members.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Standalone bridge relay daemon", styles = styles())]
pub struct RelayArgs {
    /// Address to accept bridge peer connections on.
    #[arg(short, long, default_value = "127.0.0.1:7878", help_heading = "Network")]
    pub bind: String,

    /// Increase log verbosity (-v debug, -vv trace). Default is info.
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Logging")]
    pub verbose: u8,

    /// Suppress the colorized stdout summary; diagnostics still go to the log file.
    #[arg(short = 'q', long, help_heading = "Logging")]
    pub quiet: bool,

    /// Write detailed logs to this file instead of `relay-daemon.log` in the
    /// current directory. Pass `stderr` to log to the terminal instead.
    #[arg(long, help_heading = "Logging")]
    pub log_file: Option<String>,
}

/// Arguments for the `fabric-demo` binary, which exercises a host/guest RPC
/// pair end to end over an in-process transport and prints the exchange.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Host/guest RPC demo", styles = styles())]
pub struct DemoArgs {
    /// Value passed to the guest's `double` method.
    #[arg(short = 'n', long, default_value_t = 5, help_heading = "Demo")]
    pub input: i64,

    /// Increase log verbosity (-v debug, -vv trace). Default is info.
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Logging")]
    pub verbose: u8,

    /// Suppress the colorized stdout summary; diagnostics still go to the log file.
    #[arg(short = 'q', long, help_heading = "Logging")]
    pub quiet: bool,

    /// Write detailed logs to this file instead of `fabric-demo.log` in the
    /// current directory. Pass `stderr` to log to the terminal instead.
    #[arg(long, help_heading = "Logging")]
    pub log_file: Option<String>,
}

/// Top-level subcommand dispatch for the primary `relay-fabric` binary,
/// which can run either role without needing a second binary on `$PATH`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, styles = styles())]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the bridge relay daemon.
    Relay(RelayArgs),
    /// Run the host/guest RPC demo.
    Demo(DemoArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn relay_args_default_bind_address() {
        let args = RelayArgs::parse_from(["relay-daemon"]);
        assert_eq!(args.bind, "127.0.0.1:7878");
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn relay_args_accepts_custom_bind_and_verbosity() {
        let args = RelayArgs::parse_from(["relay-daemon", "--bind", "0.0.0.0:9000", "-vv"]);
        assert_eq!(args.bind, "0.0.0.0:9000");
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn demo_args_default_input() {
        let args = DemoArgs::parse_from(["fabric-demo"]);
        assert_eq!(args.input, 5);
    }

    #[test]
    fn top_level_args_dispatch_to_subcommands() {
        let args = Args::parse_from(["relay-fabric", "relay", "--bind", "127.0.0.1:1"]);
        match args.command {
            Command::Relay(relay) => assert_eq!(relay.bind, "127.0.0.1:1"),
            Command::Demo(_) => panic!("expected the relay subcommand"),
        }
    }

    #[test]
    fn command_factories_are_well_formed() {
        Args::command().debug_assert();
        RelayArgs::command().debug_assert();
        DemoArgs::command().debug_assert();
    }
}
