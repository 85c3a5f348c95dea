//! # relay-fabric
//!
//! A message-passing RPC and broadcast fabric: isolated execution contexts
//! (async tasks, worker processes, independent client connections) publish
//! schemas of callable methods to one another over a host/guest connection,
//! or join a named channel on a shared relay and broadcast invocations to
//! every other member.

pub mod app;
pub mod bridge;
pub mod cli;
pub mod error;
pub mod envelope;
pub mod id;
pub mod logging;
pub mod rpc;
pub mod schema;
pub mod transport;

pub use bridge::{BridgeClient, BridgeSchema, BridgeSchemaBuilder};
pub use error::{BridgeError, HandshakeError, RemoteError, TransportError};
pub use rpc::{Connection, LocalSchema, LocalSchemaBuilder, Remote};
pub use schema::{decompose, Decomposed, MethodDirectory};
pub use transport::{Frame, PeerIdentity, Transport};

/// The current version of the fabric crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
