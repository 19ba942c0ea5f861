//! Shared wire-protocol constants for the mpqsync text transport

/// Terminator of every outbound message, and of inbound messages on the V2
/// framing.
pub const MESSAGE_TERMINATOR: &str = "<END_OF_MESSAGE>";

/// Inbound terminator on the legacy framing. A trailing carriage return is
/// tolerated and stripped, so CRLF clients work unchanged.
pub const LEGACY_TERMINATOR: u8 = b'\n';

/// Separator between fields inside a message body.
pub const FIELD_SEPARATOR: u8 = b'|';

/// Markers bracketing raw file bytes inside an UPDATE_FILES message. The
/// bytes between them are not escaped; clients locate the payload end via
/// the size field.
pub const FILE_START_MARKER: &str = "<START_OF_FILE>";
pub const FILE_END_MARKER: &str = "<END_OF_FILE>";

/// UTF-8 byte-order mark. Legacy clients key off it to pick a decoder, so
/// info-class replies carry it by default (see `BomPolicy`).
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

// Maximum inbound message size (1MB) - prevents a client that never sends a
// terminator from growing the receive buffer without bound
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

// Command keywords (keep spelling stable for compat with deployed clients)
pub mod command {
    pub const INIT_SERVER_INFO: &str = "INIT_SERVER_INFO";
    pub const CHECK_PATCHES: &str = "CHECK_PATCHES";

    // Legacy bare-keyword command set
    pub const GET_NOTICE: &str = "GET_NOTICE";
    pub const GET_SERVER_INFO: &str = "GET_SERVER_INFO";
    pub const GET_FILE: &str = "GET_FILE";
}

// Reply keywords
pub mod reply {
    pub const SERVER_INFO: &str = "SERVER_INFO";
    pub const NOTICE: &str = "NOTICE";
    pub const FILE: &str = "FILE";
    pub const DELETE_FILES: &str = "DELETE_FILES";
    pub const UPDATE_FILES: &str = "UPDATE_FILES";
    pub const ERROR: &str = "ERROR";
}

/// Which dialect a server speaks. The variants differ in both inbound
/// framing and command table; a server runs exactly one, selected by the
/// operator at startup rather than sniffed per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Newline-framed requests, bare-keyword commands
    /// (GET_NOTICE / GET_SERVER_INFO / GET_FILE).
    Legacy,
    /// `<END_OF_MESSAGE>`-framed requests, pipe-terminated command headers
    /// (INIT_SERVER_INFO / CHECK_PATCHES).
    V2,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V2
    }
}

impl ProtocolVersion {
    pub fn is_legacy(self) -> bool {
        matches!(self, ProtocolVersion::Legacy)
    }
}
