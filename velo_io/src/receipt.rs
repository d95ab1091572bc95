//! Receipt store (C10, spec §4.9).
//!
//! One line-oriented JSON document per installed package, keyed by name.
//! Mutations are atomic write-then-rename, the same pattern the blob cache
//! uses in [`crate::cache`] — grounded in the teacher's
//! `BlobWriter::commit`, generalized here from bytes to a JSON document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use velo_core::Error;

/// Spec §3: `installed_as = dependency ⇒ requested_by ≠ ∅`. A package can be
/// pulled in as a transitive dependency of more than one explicit root, so
/// `requested_by` is a set rather than a single name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstalledAs {
    Explicit,
    Dependency { requested_by: BTreeSet<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub name: String,
    pub version: String,
    pub bottle_sha256: String,
    pub installed_as: InstalledAs,
    #[serde(default)]
    pub symlinks_created: bool,
    #[serde(default)]
    pub corrupted_relocations: u32,
    pub installed_at: DateTime<Utc>,
}

impl Receipt {
    /// A minimally-populated receipt for packages installed before receipts
    /// existed, or whose receipt file is missing for any other reason.
    /// Per spec §4.9: "synthesizes a default `{installed_as = explicit}`".
    pub fn synthesize_default(name: &str, version: &str, now: DateTime<Utc>) -> Self {
        Receipt {
            name: name.to_string(),
            version: version.to_string(),
            bottle_sha256: String::new(),
            installed_as: InstalledAs::Explicit,
            symlinks_created: false,
            corrupted_relocations: 0,
            installed_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(ReceiptStore { dir })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn save(&self, receipt: &Receipt) -> Result<(), Error> {
        let path = self.path_for(&receipt.name);
        let json = serde_json::to_vec_pretty(receipt).map_err(|e| Error::ExtractionFailed {
            name: receipt.name.clone(),
            detail: format!("failed to serialize receipt: {e}"),
        })?;
        atomic_write(&path, &json)
    }

    pub fn load(&self, name: &str) -> Result<Option<Receipt>, Error> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|e| Error::ExtractionFailed {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
        let receipt = serde_json::from_slice(&bytes).map_err(|e| Error::ExtractionFailed {
            name: name.to_string(),
            detail: format!("failed to parse receipt: {e}"),
        })?;
        Ok(Some(receipt))
    }

    /// Loads the receipt for `name`, synthesizing a default explicit
    /// receipt tagged with `version` if none exists on disk.
    pub fn load_or_default(&self, name: &str, version: &str, now: DateTime<Utc>) -> Result<Receipt, Error> {
        match self.load(name)? {
            Some(receipt) => Ok(receipt),
            None => Ok(Receipt::synthesize_default(name, version, now)),
        }
    }

    /// Reads the current receipt (or a synthesized default), applies `f`,
    /// and atomically writes the result back.
    pub fn update(
        &self,
        name: &str,
        version: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Receipt),
    ) -> Result<Receipt, Error> {
        let mut receipt = self.load_or_default(name, version, now)?;
        f(&mut receipt);
        self.save(&receipt)?;
        Ok(receipt)
    }

    pub fn delete(&self, name: &str) -> Result<(), Error> {
        let path = self.path_for(name);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| Error::ExtractionFailed {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| Error::ExtractionFailed {
            name: self.dir.display().to_string(),
            detail: e.to_string(),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::ExtractionFailed {
                name: self.dir.display().to_string(),
                detail: e.to_string(),
            })?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::ExtractionFailed {
        name: path.display().to_string(),
        detail: e.to_string(),
    })?;
    std::io::Write::write_all(&mut tmp, contents).map_err(|e| Error::ExtractionFailed {
        name: path.display().to_string(),
        detail: e.to_string(),
    })?;
    tmp.persist(path).map_err(|e| Error::ExtractionFailed {
        name: path.display().to_string(),
        detail: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path()).unwrap();
        let receipt = Receipt {
            name: "tree".to_string(),
            version: "2.1.1".to_string(),
            bottle_sha256: "a".repeat(64),
            installed_as: InstalledAs::Explicit,
            symlinks_created: true,
            corrupted_relocations: 0,
            installed_at: now(),
        };

        store.save(&receipt).unwrap();
        let loaded = store.load("tree").unwrap().unwrap();
        assert_eq!(loaded, receipt);
    }

    #[test]
    fn load_missing_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path()).unwrap();
        assert_eq!(store.load("nope").unwrap(), None);
    }

    #[test]
    fn load_or_default_synthesizes_explicit_receipt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path()).unwrap();
        let receipt = store.load_or_default("tree", "2.1.1", now()).unwrap();
        assert_eq!(receipt.installed_as, InstalledAs::Explicit);
        assert_eq!(receipt.version, "2.1.1");
    }

    #[test]
    fn update_mutates_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path()).unwrap();
        store
            .update("tree", "2.1.1", now(), |r| {
                r.installed_as = InstalledAs::Dependency {
                    requested_by: BTreeSet::from(["ripgrep".to_string()]),
                };
            })
            .unwrap();

        let loaded = store.load("tree").unwrap().unwrap();
        assert_eq!(
            loaded.installed_as,
            InstalledAs::Dependency { requested_by: BTreeSet::from(["ripgrep".to_string()]) }
        );
    }

    #[test]
    fn delete_removes_receipt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path()).unwrap();
        store.update("tree", "2.1.1", now(), |_| {}).unwrap();
        store.delete("tree").unwrap();
        assert_eq!(store.load("tree").unwrap(), None);
    }

    #[test]
    fn list_returns_sorted_package_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(tmp.path()).unwrap();
        store.update("zlib", "1.3", now(), |_| {}).unwrap();
        store.update("tree", "2.1.1", now(), |_| {}).unwrap();

        assert_eq!(store.list().unwrap(), vec!["tree".to_string(), "zlib".to_string()]);
    }
}
