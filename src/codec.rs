//! Message framing and encoding shared by the server and its tests
//!
//! Inbound bytes are split into terminator-delimited bodies by
//! [`FramedReader`]; outbound replies are assembled by [`encode_message`].
//! Both sides are transport-agnostic so the logic stays testable without a
//! socket.

use crate::protocol::{
    ProtocolVersion, FIELD_SEPARATOR, LEGACY_TERMINATOR, MAX_MESSAGE_SIZE, MESSAGE_TERMINATOR,
    UTF8_BOM,
};
use anyhow::{bail, Result};

/// Incremental splitter for the inbound byte stream.
///
/// Feed raw reads in with [`extend`](Self::extend) and drain complete
/// message bodies with [`next_message`](Self::next_message). Terminators may
/// arrive split across reads, and one read may carry several messages.
pub struct FramedReader {
    version: ProtocolVersion,
    buf: Vec<u8>,
    // Resume offset so repeated scans over a slow-growing buffer stay linear
    scan_from: usize,
}

impl FramedReader {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            buf: Vec::new(),
            scan_from: 0,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered without a terminator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete message body, without its terminator.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete message yet, and
    /// an error when the unterminated buffer exceeds
    /// [`MAX_MESSAGE_SIZE`](crate::protocol::MAX_MESSAGE_SIZE).
    pub fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        let found = match self.version {
            ProtocolVersion::V2 => {
                let terminator = MESSAGE_TERMINATOR.as_bytes();
                find_subsequence(&self.buf, terminator, self.scan_from)
                    .map(|at| (at, terminator.len()))
            }
            ProtocolVersion::Legacy => self.buf[self.scan_from..]
                .iter()
                .position(|&b| b == LEGACY_TERMINATOR)
                .map(|at| (self.scan_from + at, 1)),
        };

        match found {
            Some((at, skip)) => {
                let mut body: Vec<u8> = self.buf[..at].to_vec();
                self.buf.drain(..at + skip);
                self.scan_from = 0;
                if self.version.is_legacy() && body.last() == Some(&b'\r') {
                    body.pop();
                }
                Ok(Some(body))
            }
            None => {
                if self.buf.len() > MAX_MESSAGE_SIZE {
                    bail!(
                        "message exceeds {} bytes without a terminator",
                        MAX_MESSAGE_SIZE
                    );
                }
                // The tail may hold a partial terminator; rescan only it
                let terminator_len = match self.version {
                    ProtocolVersion::V2 => MESSAGE_TERMINATOR.len(),
                    ProtocolVersion::Legacy => 1,
                };
                self.scan_from = self.buf.len().saturating_sub(terminator_len - 1);
                Ok(None)
            }
        }
    }
}

/// Assemble one outbound message: optional BOM, `|`-joined fields, then the
/// terminator. Fields are written verbatim, so binary file payloads pass
/// through untouched.
pub fn encode_message<F: AsRef<[u8]>>(fields: &[F], with_bom: bool) -> Vec<u8> {
    let body_len: usize = fields.iter().map(|f| f.as_ref().len()).sum();
    let mut out = Vec::with_capacity(
        UTF8_BOM.len() + body_len + fields.len() + MESSAGE_TERMINATOR.len(),
    );
    if with_bom {
        out.extend_from_slice(&UTF8_BOM);
    }
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(FIELD_SEPARATOR);
        }
        out.extend_from_slice(field.as_ref());
    }
    out.extend_from_slice(MESSAGE_TERMINATOR.as_bytes());
    out
}

/// Split a V2 body into its command header (everything through the first
/// `|`) and the payload after it. Returns `None` when the body has no
/// separator at all, which the protocol treats as a malformed request.
pub fn split_message(body: &[u8]) -> Option<(&[u8], &[u8])> {
    let at = body.iter().position(|&b| b == FIELD_SEPARATOR)?;
    Some((&body[..=at], &body[at + 1..]))
}

/// Strip a leading UTF-8 BOM if present.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&UTF8_BOM[..]).unwrap_or(bytes)
}

fn find_subsequence(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    let start = from.min(haystack.len() - needle.len() + 1);
    haystack[start..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|at| start + at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reply;

    fn v2_reader() -> FramedReader {
        FramedReader::new(ProtocolVersion::V2)
    }

    #[test]
    fn test_encode_message_with_bom() {
        let encoded = encode_message(&[reply::NOTICE.as_bytes(), b"hello"], true);
        assert_eq!(encoded, b"\xEF\xBB\xBFNOTICE|hello<END_OF_MESSAGE>".to_vec());
    }

    #[test]
    fn test_encode_message_without_bom() {
        let encoded = encode_message(&[reply::DELETE_FILES.as_bytes(), b"a.mpq", b"b.mpq"], false);
        assert_eq!(encoded, b"DELETE_FILES|a.mpq|b.mpq<END_OF_MESSAGE>".to_vec());
    }

    #[test]
    fn test_encode_message_single_field() {
        let encoded = encode_message(&[b"ERROR".as_slice()], false);
        assert_eq!(encoded, b"ERROR<END_OF_MESSAGE>".to_vec());
    }

    #[test]
    fn test_encode_binary_field_passes_through() {
        // File payloads may contain separators and terminator-like bytes
        let data = b"\x00\x01|<END".to_vec();
        let encoded = encode_message(&[b"UPDATE_FILES".as_slice(), data.as_slice()], false);
        assert_eq!(encoded, b"UPDATE_FILES|\x00\x01|<END<END_OF_MESSAGE>".to_vec());
    }

    #[test]
    fn test_v2_single_message() {
        let mut reader = v2_reader();
        reader.extend(b"INIT_SERVER_INFO|<END_OF_MESSAGE>");
        assert_eq!(
            reader.next_message().unwrap(),
            Some(b"INIT_SERVER_INFO|".to_vec())
        );
        assert_eq!(reader.next_message().unwrap(), None);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_v2_partial_arrival() {
        let mut reader = v2_reader();
        reader.extend(b"CHECK_PATCHES|a.mpq|1");
        assert_eq!(reader.next_message().unwrap(), None);
        reader.extend(b"23<END_OF_");
        assert_eq!(reader.next_message().unwrap(), None);
        reader.extend(b"MESSAGE>");
        assert_eq!(
            reader.next_message().unwrap(),
            Some(b"CHECK_PATCHES|a.mpq|123".to_vec())
        );
    }

    #[test]
    fn test_v2_terminator_split_byte_by_byte() {
        let mut reader = v2_reader();
        for &byte in b"X<END_OF_MESSAGE>" {
            reader.extend(&[byte]);
        }
        assert_eq!(reader.next_message().unwrap(), Some(b"X".to_vec()));
    }

    #[test]
    fn test_v2_multiple_messages_in_one_read() {
        let mut reader = v2_reader();
        reader.extend(b"A|<END_OF_MESSAGE>B|<END_OF_MESSAGE>C");
        assert_eq!(reader.next_message().unwrap(), Some(b"A|".to_vec()));
        assert_eq!(reader.next_message().unwrap(), Some(b"B|".to_vec()));
        assert_eq!(reader.next_message().unwrap(), None);
        assert_eq!(reader.buffered(), 1);
    }

    #[test]
    fn test_v2_empty_body() {
        let mut reader = v2_reader();
        reader.extend(b"<END_OF_MESSAGE>");
        assert_eq!(reader.next_message().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_v2_oversize_without_terminator_errors() {
        let mut reader = v2_reader();
        reader.extend(&vec![b'x'; MAX_MESSAGE_SIZE + 1]);
        assert!(reader.next_message().is_err());
    }

    #[test]
    fn test_v2_large_terminated_message_is_accepted() {
        let mut reader = v2_reader();
        reader.extend(&vec![b'x'; MAX_MESSAGE_SIZE]);
        reader.extend(b"<END_OF_MESSAGE>");
        let body = reader.next_message().unwrap().unwrap();
        assert_eq!(body.len(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_legacy_newline_framing() {
        let mut reader = FramedReader::new(ProtocolVersion::Legacy);
        reader.extend(b"GET_NOTICE\nGET_SERVER_INFO\n");
        assert_eq!(reader.next_message().unwrap(), Some(b"GET_NOTICE".to_vec()));
        assert_eq!(
            reader.next_message().unwrap(),
            Some(b"GET_SERVER_INFO".to_vec())
        );
        assert_eq!(reader.next_message().unwrap(), None);
    }

    #[test]
    fn test_legacy_strips_carriage_return() {
        let mut reader = FramedReader::new(ProtocolVersion::Legacy);
        reader.extend(b"GET_FILE\r\n");
        assert_eq!(reader.next_message().unwrap(), Some(b"GET_FILE".to_vec()));
    }

    #[test]
    fn test_legacy_interior_cr_is_kept() {
        let mut reader = FramedReader::new(ProtocolVersion::Legacy);
        reader.extend(b"GET\rME\n");
        assert_eq!(reader.next_message().unwrap(), Some(b"GET\rME".to_vec()));
    }

    #[test]
    fn test_split_message_on_first_separator() {
        let (header, payload) = split_message(b"CHECK_PATCHES|a.mpq|123").unwrap();
        assert_eq!(header, b"CHECK_PATCHES|");
        assert_eq!(payload, b"a.mpq|123");
    }

    #[test]
    fn test_split_message_empty_payload() {
        let (header, payload) = split_message(b"INIT_SERVER_INFO|").unwrap();
        assert_eq!(header, b"INIT_SERVER_INFO|");
        assert_eq!(payload, b"");
    }

    #[test]
    fn test_split_message_without_separator() {
        assert!(split_message(b"HELLO").is_none());
        assert!(split_message(b"").is_none());
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(b"\xEF\xBB\xBFtext"), b"text");
        assert_eq!(strip_bom(b"text"), b"text");
        assert_eq!(strip_bom(b""), b"");
    }

    #[test]
    fn test_encode_then_decode_round_trip() {
        let mut reader = v2_reader();
        let encoded = encode_message(&[b"SERVER_INFO".as_slice(), b"127.0.0.1", b"12345"], true);
        reader.extend(&encoded);
        let body = reader.next_message().unwrap().unwrap();
        assert_eq!(strip_bom(&body), b"SERVER_INFO|127.0.0.1|12345");
    }
}
