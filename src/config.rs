//! Server configuration assembled by the operator before start

use crate::fingerprint::FingerprintKind;
use crate::protocol::ProtocolVersion;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Which reply classes are prefixed with a UTF-8 BOM.
///
/// Deployed clients expect the BOM on informational text replies but choke
/// on it in the middle of a patch burst, hence two independent switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BomPolicy {
    /// SERVER_INFO, NOTICE, FILE and ERROR replies.
    pub info_replies: bool,
    /// DELETE_FILES and UPDATE_FILES replies.
    pub sync_replies: bool,
}

impl Default for BomPolicy {
    fn default() -> Self {
        Self {
            info_replies: true,
            sync_replies: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to, and the one advertised in SERVER_INFO.
    pub bind_address: IpAddr,
    /// Port to bind. 0 picks an ephemeral port; SERVER_INFO then advertises
    /// the port actually bound.
    pub bind_port: u16,
    /// Display name advertised in SERVER_INFO.
    pub server_name: String,
    /// Directory scanned (top level only) for data archives.
    pub data_dir: PathBuf,
    /// Announcement text file.
    pub notice_path: PathBuf,
    /// Archive extension catalogued from the data directory, without the
    /// dot, matched case-insensitively.
    pub data_extension: String,
    pub protocol: ProtocolVersion,
    pub bom: BomPolicy,
    pub fingerprint: FingerprintKind,
    /// Drop a connection after this long without a complete request.
    /// `None` keeps connections open forever, which deployed clients
    /// rely on between patch checks.
    pub idle_timeout: Option<Duration>,
    /// When set, one JSONL entry is appended here per served sync request.
    pub sync_log: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            bind_port: 12345,
            server_name: "mpqsync".to_string(),
            data_dir: PathBuf::from("Data"),
            notice_path: PathBuf::from("G.txt"),
            data_extension: "mpq".to_string(),
            protocol: ProtocolVersion::default(),
            bom: BomPolicy::default(),
            fingerprint: FingerprintKind::default(),
            idle_timeout: None,
            sync_log: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.bind_port)
    }
}
