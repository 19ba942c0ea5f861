//! Command dispatch: turns decoded request bodies into reply messages
//!
//! The handler is stateless across requests. Every message is answered from
//! the shared catalog and notice alone, so connections carry no server-side
//! session state and any request is valid at any time.

use crate::catalog::FileCatalog;
use crate::codec;
use crate::config::BomPolicy;
use crate::notice::NoticeStore;
use crate::plan::{self, PatchPlan};
use crate::protocol::{command, reply, ProtocolVersion, FILE_END_MARKER, FILE_START_MARKER};
use crate::synclog::{SyncLog, SyncLogEntry};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity advertised in SERVER_INFO replies.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    /// Textual address clients should connect to.
    pub address: String,
    /// Port actually bound, not the one requested.
    pub port: u16,
    pub name: String,
}

pub struct SyncProtocolHandler {
    catalog: Arc<FileCatalog>,
    notice: Arc<NoticeStore>,
    identity: ServerIdentity,
    version: ProtocolVersion,
    bom: BomPolicy,
    sync_log: Option<SyncLog>,
}

impl SyncProtocolHandler {
    pub fn new(
        catalog: Arc<FileCatalog>,
        notice: Arc<NoticeStore>,
        identity: ServerIdentity,
        version: ProtocolVersion,
        bom: BomPolicy,
    ) -> Self {
        Self {
            catalog,
            notice,
            identity,
            version,
            bom,
            sync_log: None,
        }
    }

    pub fn with_sync_log(mut self, sync_log: SyncLog) -> Self {
        self.sync_log = Some(sync_log);
        self
    }

    /// Answer one decoded request body with zero or more encoded replies,
    /// in send order.
    pub fn handle(&self, peer: SocketAddr, body: &[u8]) -> Vec<Vec<u8>> {
        match self.version {
            ProtocolVersion::V2 => self.handle_v2(peer, body),
            ProtocolVersion::Legacy => self.handle_legacy(peer, body),
        }
    }

    fn handle_v2(&self, peer: SocketAddr, body: &[u8]) -> Vec<Vec<u8>> {
        // The command header runs through the first separator; a body
        // without any separator is not a command at all
        let (header, payload) = match codec::split_message(body) {
            Some(parts) => parts,
            None => {
                debug!(%peer, "malformed request without separator");
                return vec![self.error_reply("Invalid command format")];
            }
        };
        let keyword = &header[..header.len() - 1];

        if keyword == command::INIT_SERVER_INFO.as_bytes() {
            vec![self.server_info_reply(true)]
        } else if keyword == command::CHECK_PATCHES.as_bytes() {
            self.check_patches_replies(peer, payload)
        } else {
            debug!(%peer, keyword = %String::from_utf8_lossy(keyword), "unknown command");
            vec![self.error_reply("Unknown command")]
        }
    }

    fn handle_legacy(&self, peer: SocketAddr, body: &[u8]) -> Vec<Vec<u8>> {
        if body == command::GET_NOTICE.as_bytes() {
            let notice = self.notice.escaped();
            vec![codec::encode_message(
                &[reply::NOTICE.as_bytes(), notice.as_bytes()],
                self.bom.info_replies,
            )]
        } else if body == command::GET_SERVER_INFO.as_bytes() {
            vec![self.server_info_reply(false)]
        } else if body == command::GET_FILE.as_bytes() {
            // Kept for table completeness; direct fetch never shipped
            vec![codec::encode_message(
                &[reply::FILE.as_bytes(), b"not implemented"],
                self.bom.info_replies,
            )]
        } else {
            debug!(%peer, body = %String::from_utf8_lossy(body), "unknown legacy command");
            vec![self.error_reply("Unknown command")]
        }
    }

    /// SERVER_INFO|address|port|name, plus the escaped notice as a fifth
    /// field on the V2 table.
    fn server_info_reply(&self, include_notice: bool) -> Vec<u8> {
        let port = self.identity.port.to_string();
        if include_notice {
            let notice = self.notice.escaped();
            codec::encode_message(
                &[
                    reply::SERVER_INFO.as_bytes(),
                    self.identity.address.as_bytes(),
                    port.as_bytes(),
                    self.identity.name.as_bytes(),
                    notice.as_bytes(),
                ],
                self.bom.info_replies,
            )
        } else {
            codec::encode_message(
                &[
                    reply::SERVER_INFO.as_bytes(),
                    self.identity.address.as_bytes(),
                    port.as_bytes(),
                    self.identity.name.as_bytes(),
                ],
                self.bom.info_replies,
            )
        }
    }

    fn error_reply(&self, message: &str) -> Vec<u8> {
        codec::encode_message(
            &[reply::ERROR.as_bytes(), message.as_bytes()],
            self.bom.info_replies,
        )
    }

    /// The patch burst: at most one DELETE_FILES listing every file to
    /// remove, then one UPDATE_FILES per file to fetch, in catalog order.
    /// An in-sync client gets nothing back.
    fn check_patches_replies(&self, peer: SocketAddr, payload: &[u8]) -> Vec<Vec<u8>> {
        let manifest = plan::parse_manifest(&String::from_utf8_lossy(payload));
        let patch_plan = PatchPlan::compute(&self.catalog, &manifest);
        debug!(
            %peer,
            reported = manifest.len(),
            deletes = patch_plan.to_delete.len(),
            updates = patch_plan.to_update.len(),
            "computed patch plan"
        );

        let mut replies = Vec::new();
        if !patch_plan.to_delete.is_empty() {
            let mut fields: Vec<&[u8]> = Vec::with_capacity(1 + patch_plan.to_delete.len());
            fields.push(reply::DELETE_FILES.as_bytes());
            for name in &patch_plan.to_delete {
                fields.push(name.as_bytes());
            }
            replies.push(codec::encode_message(&fields, self.bom.sync_replies));
        }

        let mut entry = SyncLogEntry::now(peer.to_string(), command::CHECK_PATCHES);
        entry.deleted = patch_plan.to_delete.len();

        for name in &patch_plan.to_update {
            let catalog_entry = match self.catalog.get(name) {
                Some(e) => e,
                None => continue,
            };
            // The file can disappear or lose permissions between the
            // startup scan and now; skip it rather than kill the burst
            let data = match std::fs::read(&catalog_entry.path) {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        file = %catalog_entry.path.display(),
                        error = %e,
                        "skipping unreadable update file"
                    );
                    entry.skipped += 1;
                    continue;
                }
            };
            let size = data.len().to_string();
            entry.updated += 1;
            entry.bytes_sent += data.len() as u64;
            replies.push(codec::encode_message(
                &[
                    reply::UPDATE_FILES.as_bytes(),
                    name.as_bytes(),
                    size.as_bytes(),
                    FILE_START_MARKER.as_bytes(),
                    data.as_slice(),
                    FILE_END_MARKER.as_bytes(),
                ],
                self.bom.sync_replies,
            ));
        }

        if let Some(log) = &self.sync_log {
            if let Err(e) = log.append(&entry) {
                warn!(error = %e, "failed to append sync log entry");
            }
        }

        replies
    }
}
