//! Patch-plan computation: diffing a client manifest against the catalog
//!
//! Pure decision logic, kept away from the transport so every edge case is
//! testable without a socket.

use crate::catalog::FileCatalog;
use std::collections::HashSet;

/// One file the client reported. `fingerprint` is `None` when the token did
/// not parse as a number; the name still counts as reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub fingerprint: Option<u64>,
}

/// Parse a CHECK_PATCHES payload into manifest entries.
///
/// Tokens are split on `|`, trimmed, and empty tokens dropped, then paired
/// consecutively as (name, fingerprint). A dangling final token is ignored.
pub fn parse_manifest(payload: &str) -> Vec<ManifestEntry> {
    let tokens: Vec<&str> = payload
        .split('|')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();

    let mut entries = Vec::with_capacity(tokens.len() / 2);
    for pair in tokens.chunks_exact(2) {
        entries.push(ManifestEntry {
            name: pair[0].to_string(),
            fingerprint: pair[1].parse::<u64>().ok(),
        });
    }
    entries
}

/// What one client must do to converge on the catalog. Computed per request
/// and discarded once the reply burst is sent.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PatchPlan {
    /// Files the client holds that the catalog does not: delete.
    pub to_delete: Vec<String>,
    /// Files missing or stale on the client: fetch.
    pub to_update: Vec<String>,
}

impl PatchPlan {
    /// Compare a parsed manifest against the catalog.
    ///
    /// A reported name absent from the catalog is deleted; a reported
    /// fingerprint that differs is updated; a catalogued file the client
    /// never mentioned is updated. Entries with an unparseable fingerprint
    /// join the reported set but trigger no action themselves.
    pub fn compute(catalog: &FileCatalog, manifest: &[ManifestEntry]) -> PatchPlan {
        let mut plan = PatchPlan::default();
        let mut reported: HashSet<&str> = HashSet::with_capacity(manifest.len());

        for entry in manifest {
            reported.insert(entry.name.as_str());
            let fp = match entry.fingerprint {
                Some(fp) => fp,
                None => continue,
            };
            match catalog.fingerprint(&entry.name) {
                None => plan.to_delete.push(entry.name.clone()),
                Some(have) if have != fp => plan.to_update.push(entry.name.clone()),
                Some(_) => {}
            }
        }

        // Catalog order is stable, so unreported files append in name order
        for name in catalog.names() {
            if !reported.contains(name) {
                plan.to_update.push(name.to_string());
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_update.is_empty()
    }
}
