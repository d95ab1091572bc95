//! Project manifest and lockfile (C11, spec §4.10).
//!
//! Both are small JSON documents read/written wholesale rather than
//! line-oriented like the receipt store, since they're meant to be
//! hand-edited and diffed in version control. `BTreeMap` keeps key
//! ordering stable across writes so re-serializing an unchanged lockfile
//! produces an unchanged diff.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use velo_core::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Manifest {
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub taps: Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let bytes = std::fs::read(path).map_err(|e| Error::ProcessError {
            cmd: format!("read manifest {}", path.display()),
            code: None,
            detail: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| Error::ProcessError {
            cmd: format!("parse manifest {}", path.display()),
            code: None,
            detail: e.to_string(),
        })
    }

    pub fn load_or_default(path: &Path) -> Result<Self, Error> {
        if path.is_file() {
            Manifest::load(path)
        } else {
            Ok(Manifest::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| Error::ProcessError {
            cmd: format!("serialize manifest {}", path.display()),
            code: None,
            detail: e.to_string(),
        })?;
        atomic_write(path, &json)
    }

    pub fn add_dependency(&mut self, name: impl Into<String>, version_spec: impl Into<String>) {
        self.dependencies.insert(name.into(), version_spec.into());
    }

    pub fn remove_dependency(&mut self, name: &str) -> bool {
        self.dependencies.remove(name).is_some()
    }

    pub fn add_tap(&mut self, tap: impl Into<String>) {
        let tap = tap.into();
        if !self.taps.contains(&tap) {
            self.taps.push(tap);
        }
    }

    pub fn remove_tap(&mut self, tap: &str) -> bool {
        let before = self.taps.len();
        self.taps.retain(|t| t != tap);
        self.taps.len() != before
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub version: String,
    pub tap: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// Schema version stamped on every lockfile this crate writes. Bump when the
/// on-disk shape changes in a way that isn't backward-compatible.
pub const LOCKFILE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    #[serde(default)]
    pub dependencies: BTreeMap<String, LockedPackage>,
    pub version: u32,
}

impl Default for Lockfile {
    fn default() -> Self {
        Lockfile { dependencies: BTreeMap::new(), version: LOCKFILE_SCHEMA_VERSION }
    }
}

impl Lockfile {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let bytes = std::fs::read(path).map_err(|e| Error::ProcessError {
            cmd: format!("read lockfile {}", path.display()),
            code: None,
            detail: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| Error::ProcessError {
            cmd: format!("parse lockfile {}", path.display()),
            code: None,
            detail: e.to_string(),
        })
    }

    pub fn load_or_default(path: &Path) -> Result<Self, Error> {
        if path.is_file() {
            Lockfile::load(path)
        } else {
            Ok(Lockfile::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| Error::ProcessError {
            cmd: format!("serialize lockfile {}", path.display()),
            code: None,
            detail: e.to_string(),
        })?;
        atomic_write(path, &json)
    }

    /// Compares the lockfile's expectations against what's actually
    /// installed, returning a human-readable mismatch line per divergence:
    /// missing packages, version drift, or extraneous installs not in the
    /// lockfile at all.
    pub fn verify_installations(&self, installed: &BTreeMap<String, String>) -> Vec<String> {
        let mut mismatches = Vec::new();

        for (name, locked) in &self.dependencies {
            match installed.get(name) {
                None => mismatches.push(format!("{name}: locked at {} but not installed", locked.version)),
                Some(version) if version != &locked.version => {
                    mismatches.push(format!("{name}: locked at {} but {version} is installed", locked.version));
                }
                Some(_) => {}
            }
        }

        for name in installed.keys() {
            if !self.dependencies.contains_key(name) {
                mismatches.push(format!("{name}: installed but not present in the lockfile"));
            }
        }

        mismatches
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| Error::ProcessError {
        cmd: format!("create dir {}", dir.display()),
        code: None,
        detail: e.to_string(),
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::ProcessError {
        cmd: format!("write {}", path.display()),
        code: None,
        detail: e.to_string(),
    })?;
    std::io::Write::write_all(&mut tmp, contents).map_err(|e| Error::ProcessError {
        cmd: format!("write {}", path.display()),
        code: None,
        detail: e.to_string(),
    })?;
    tmp.persist(path).map_err(|e| Error::ProcessError {
        cmd: format!("persist {}", path.display()),
        code: None,
        detail: e.to_string(),
    })?;
    Ok(())
}
