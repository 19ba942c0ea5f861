//! mpqsync library
//!
//! Data-file synchronization server for game clients: catalogs `.mpq`
//! archives, diffs client manifests against them and streams the
//! differences back over a pipe-delimited text protocol.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod event;
pub mod fingerprint;
pub mod handler;
pub mod notice;
pub mod plan;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod synclog;

pub use config::{BomPolicy, ServerConfig};
pub use event::{EventReceiver, ServerEvent};
pub use protocol::ProtocolVersion;
pub use server::{Server, StartError};
