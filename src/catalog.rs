//! Catalog of served data files, built once at startup

use crate::event::{EventSender, ServerEvent};
use crate::fingerprint::{self, FingerprintKind};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One catalogued archive. `name` is the bare file name as sent on the wire;
/// `path` is where the bytes live for UPDATE_FILES payloads.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub fingerprint: u64,
    pub path: PathBuf,
    pub size: u64,
}

/// Name-to-entry map over the data directory.
///
/// Ordered by name so patch bursts come out in a stable order. The catalog
/// is immutable after the startup scan; a restart picks up new files.
#[derive(Debug, Default)]
pub struct FileCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl FileCatalog {
    /// Scan the top level of `dir` for files with `extension` (matched
    /// case-insensitively, no dot) and fingerprint them in parallel.
    ///
    /// Never fails: a missing directory or an unreadable file is reported
    /// through `events` and the scan carries on with what it has.
    pub fn build(
        dir: &Path,
        extension: &str,
        kind: FingerprintKind,
        events: &EventSender,
    ) -> Self {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "data directory missing, serving an empty catalog");
            events.emit(ServerEvent::DataError {
                path: dir.to_path_buf(),
                detail: "data directory missing or not a directory".to_string(),
            });
            return Self::default();
        }

        // Top level only: nested directories are not part of the data set
        let mut candidates: Vec<(String, PathBuf, u64)> = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let matches = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(extension))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let name = match path.file_name() {
                Some(n) => n.to_string_lossy().into_owned(),
                None => continue,
            };
            match entry.metadata() {
                Ok(meta) => candidates.push((name, path.to_path_buf(), meta.len())),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable entry");
                    events.emit(ServerEvent::DataError {
                        path: path.to_path_buf(),
                        detail: format!("failed to stat: {e}"),
                    });
                }
            }
        }

        let fingerprinted: Vec<(String, PathBuf, u64, anyhow::Result<u64>)> = candidates
            .into_par_iter()
            .map(|(name, path, size)| {
                let result = fingerprint::fingerprint_file(&path, kind);
                (name, path, size, result)
            })
            .collect();

        let mut entries = BTreeMap::new();
        for (name, path, size, result) in fingerprinted {
            match result {
                Ok(fp) => {
                    debug!(file = %name, fingerprint = fp, size, "catalogued");
                    entries.insert(
                        name.clone(),
                        CatalogEntry {
                            name,
                            fingerprint: fp,
                            path,
                            size,
                        },
                    );
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "failed to fingerprint, skipping");
                    events.emit(ServerEvent::DataError {
                        path,
                        detail: format!("failed to fingerprint: {e:#}"),
                    });
                }
            }
        }

        Self { entries }
    }

    /// Build directly from entries, bypassing the filesystem scan.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn fingerprint(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|entry| entry.fingerprint)
    }

    /// Catalogued names in stable (lexicographic) order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_bytes;
    use std::fs;
    use tempfile::TempDir;

    fn scan(dir: &Path) -> FileCatalog {
        let (events, _rx) = EventSender::channel();
        FileCatalog::build(dir, "mpq", FingerprintKind::default(), &events)
    }

    #[test]
    fn test_build_catalogs_matching_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("patch-1.mpq"), b"one").unwrap();
        fs::write(temp_dir.path().join("patch-2.mpq"), b"two").unwrap();
        fs::write(temp_dir.path().join("readme.txt"), b"not an archive").unwrap();

        let catalog = scan(temp_dir.path());
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("patch-1.mpq").is_some());
        assert!(catalog.get("patch-2.mpq").is_some());
        assert!(catalog.get("readme.txt").is_none());
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("UPPER.MPQ"), b"x").unwrap();

        let catalog = scan(temp_dir.path());
        assert_eq!(catalog.len(), 1);
        // The name keeps its on-disk spelling
        assert!(catalog.get("UPPER.MPQ").is_some());
        assert!(catalog.get("upper.mpq").is_none());
    }

    #[test]
    fn test_subdirectories_are_not_scanned() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("deep.mpq"), b"x").unwrap();
        fs::write(temp_dir.path().join("top.mpq"), b"x").unwrap();

        let catalog = scan(temp_dir.path());
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("top.mpq").is_some());
    }

    #[test]
    fn test_missing_directory_yields_empty_catalog_and_event() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("no-such-dir");

        let (events, mut rx) = EventSender::channel();
        let catalog =
            FileCatalog::build(&missing, "mpq", FingerprintKind::default(), &events);

        assert!(catalog.is_empty());
        match rx.try_recv().unwrap() {
            ServerEvent::DataError { path, .. } => assert_eq!(path, missing),
            other => panic!("expected DataError, got {other:?}"),
        }
    }

    #[test]
    fn test_fingerprints_match_file_contents() {
        let temp_dir = TempDir::new().unwrap();
        let data = b"catalog fingerprint check";
        fs::write(temp_dir.path().join("data.mpq"), data).unwrap();

        let catalog = scan(temp_dir.path());
        assert_eq!(
            catalog.fingerprint("data.mpq"),
            Some(fingerprint_bytes(data, FingerprintKind::default()))
        );
        assert_eq!(catalog.get("data.mpq").unwrap().size, data.len() as u64);
    }

    #[test]
    fn test_names_are_sorted() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["zebra.mpq", "alpha.mpq", "middle.mpq"] {
            fs::write(temp_dir.path().join(name), b"x").unwrap();
        }

        let catalog = scan(temp_dir.path());
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["alpha.mpq", "middle.mpq", "zebra.mpq"]);
    }
}
