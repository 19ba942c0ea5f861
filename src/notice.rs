//! Operator announcement text served to clients

use crate::codec;
use crate::event::{EventSender, ServerEvent};
use std::path::Path;
use tracing::warn;

/// Announcement loaded once at startup. Missing or unreadable files degrade
/// to an empty notice rather than failing the server.
#[derive(Debug, Default)]
pub struct NoticeStore {
    text: String,
}

impl NoticeStore {
    /// Read the notice file, tolerating a UTF-8 BOM left by text editors.
    pub fn load(path: &Path, events: &EventSender) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(codec::strip_bom(&bytes)).into_owned();
                Self { text }
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "notice unavailable, serving empty text");
                events.emit(ServerEvent::DataError {
                    path: path.to_path_buf(),
                    detail: format!("failed to read notice: {e}"),
                });
                Self::default()
            }
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Notice with newlines escaped as the two characters `\n`, the form
    /// carried inside a single pipe-delimited field.
    pub fn escaped(&self) -> String {
        self.text.replace('\n', "\\n")
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
