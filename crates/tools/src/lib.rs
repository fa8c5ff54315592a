//! Tool-provider lifecycle management for colloquy.
//!
//! A declarative list of provider descriptors goes in; an immutable
//! `CapabilityRegistry` and a `ScopedConnections` release handle come out.
//! Every successfully opened connection is released exactly once, in
//! reverse order of acquisition, no matter how many siblings failed.

pub mod connection;
pub mod lifecycle;
pub mod remote;
pub mod stdio;

pub use connection::{ProviderConnection, ProviderConnector, TransportConnector};
pub use lifecycle::{
    LoadedProviders, ProviderOutcome, ProviderReport, ScopedConnections, load_providers,
};
pub use remote::RemoteConnection;
pub use stdio::StdioConnection;
