//! # esdb-client
//!
//! Client runtime for an event store reached over gRPC, either as a single
//! node or as a cluster discovered through gossip.
//!
//! ## Crate Structure
//!
//! - **`connection_string`**: parses `esdb://` / `esdb+discover://` descriptors into
//!   [`ConnectionSettings`].
//! - **`settings`**: endpoints, node preference, credentials and timeouts.
//! - **`config`**: the same settings loaded from TOML + environment via Figment.
//! - **`gossip`**: turns seeds into a membership list (`GossipDiscoverer`).
//! - **`selection`**: picks one member according to the node preference.
//! - **`channel`**: owns the single live channel and its generation counter.
//! - **`executor`**: the call path: resolve, lease, call, classify, retry once.
//! - **`streams`** / **`client`**: commands and the public handle.
//! - **`transport`** / **`codec`**: the tonic seam.
//! - **`error`**: `CommandError` and friends.
//! - **`logging`**: `tracing-subscriber` setup for binaries and tests.

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection_string;
pub mod error;
pub mod executor;
pub mod gossip;
pub mod logging;
pub mod selection;
pub mod settings;
pub mod streams;
pub mod transport;

pub use client::Client;
pub use error::{ClientError, CommandError, CommandResult, ParseError};
pub use executor::CallOptions;
pub use gossip::{ClusterMember, MemberRole};
pub use settings::{ConnectionSettings, Credentials, Endpoint, EndpointSet, NodePreference};
pub use streams::{DeleteResult, DeleteStreamOptions, ExpectedRevision, Position, StreamsClient};
pub use transport::{GrpcTransport, Transport};
