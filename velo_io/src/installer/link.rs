//! Symlink management (step 5 of C9's install pipeline, spec §4.8).
//!
//! Grounded in the teacher's `Linker::link_keg`/`unlink_keg` call sites
//! (seen from `install/mod.rs` and `install/executor.rs`); the concrete
//! body is original since `link.rs` itself was not present in the
//! retrieved pack.

use std::path::{Path, PathBuf};
use velo_core::context::Paths;
use velo_core::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedFile {
    pub link_path: PathBuf,
    pub target_path: PathBuf,
}

/// Result of linking a keg's `bin/` directory. Conflicts are non-fatal per
/// spec §4.8: "the Cellar install remains, the symlink is skipped" — the
/// caller decides whether a non-empty `conflicts` list should mark the
/// receipt as a corrupted/partial install.
#[derive(Debug, Clone, Default)]
pub struct LinkOutcome {
    pub linked: Vec<LinkedFile>,
    pub conflicts: Vec<PathBuf>,
}

pub struct Linker {
    paths: Paths,
}

impl Linker {
    pub fn new(paths: Paths) -> Self {
        Linker { paths }
    }

    /// Creates or replaces `bin/<exe>` -> `keg_path/bin/<exe>` for every
    /// regular file under the keg's `bin/` directory.
    pub fn link_keg(&self, keg_path: &Path) -> Result<LinkOutcome, Error> {
        let bin_dir = keg_path.join("bin");
        let mut outcome = LinkOutcome::default();

        if !bin_dir.is_dir() {
            return Ok(outcome);
        }

        std::fs::create_dir_all(self.paths.bin_dir()).map_err(|e| Error::ExtractionFailed {
            name: self.paths.bin_dir().display().to_string(),
            detail: e.to_string(),
        })?;

        let entries = std::fs::read_dir(&bin_dir).map_err(|e| Error::ExtractionFailed {
            name: bin_dir.display().to_string(),
            detail: e.to_string(),
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| Error::ExtractionFailed {
                name: bin_dir.display().to_string(),
                detail: e.to_string(),
            })?;
            if !entry.path().is_file() {
                continue;
            }

            let Some(exe_name) = entry.file_name().to_str().map(|s| s.to_string()) else { continue };
            let link_path = self.paths.symlink_path(&exe_name);

            match self.link_one(&link_path, &entry.path()) {
                Ok(true) => outcome.linked.push(LinkedFile {
                    link_path,
                    target_path: entry.path(),
                }),
                Ok(false) => outcome.conflicts.push(link_path),
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    /// Returns `Ok(true)` if linked, `Ok(false)` if a conflicting
    /// non-symlink already occupies `link_path`.
    fn link_one(&self, link_path: &Path, target: &Path) -> Result<bool, Error> {
        match std::fs::symlink_metadata(link_path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                std::fs::remove_file(link_path).map_err(|e| Error::ExtractionFailed {
                    name: link_path.display().to_string(),
                    detail: e.to_string(),
                })?;
            }
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::ExtractionFailed {
                    name: link_path.display().to_string(),
                    detail: e.to_string(),
                })
            }
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(target, link_path).map_err(|e| Error::ExtractionFailed {
            name: link_path.display().to_string(),
            detail: e.to_string(),
        })?;

        Ok(true)
    }

    /// Removes every symlink under `bin/` whose target resolves into
    /// `keg_path`, returning the paths removed.
    pub fn unlink_keg(&self, keg_path: &Path) -> Result<Vec<PathBuf>, Error> {
        let bin_dir = self.paths.bin_dir();
        if !bin_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for entry in std::fs::read_dir(&bin_dir).map_err(|e| Error::ExtractionFailed {
            name: bin_dir.display().to_string(),
            detail: e.to_string(),
        })? {
            let entry = entry.map_err(|e| Error::ExtractionFailed {
                name: bin_dir.display().to_string(),
                detail: e.to_string(),
            })?;
            let path = entry.path();

            let Ok(target) = std::fs::read_link(&path) else { continue };
            if target.starts_with(keg_path) {
                std::fs::remove_file(&path).map_err(|e| Error::ExtractionFailed {
                    name: path.display().to_string(),
                    detail: e.to_string(),
                })?;
                removed.push(path);
            }
        }

        Ok(removed)
    }

    /// Points `opt/<name>` at `keg_path`, replacing any previous link.
    pub fn set_default_version(&self, name: &str, keg_path: &Path) -> Result<(), Error> {
        let opt_link = self.paths.opt_link(name);
        std::fs::create_dir_all(self.paths.opt_dir()).map_err(|e| Error::ExtractionFailed {
            name: self.paths.opt_dir().display().to_string(),
            detail: e.to_string(),
        })?;

        if opt_link.symlink_metadata().is_ok() {
            std::fs::remove_file(&opt_link).map_err(|e| Error::ExtractionFailed {
                name: opt_link.display().to_string(),
                detail: e.to_string(),
            })?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(keg_path, &opt_link).map_err(|e| Error::ExtractionFailed {
            name: opt_link.display().to_string(),
            detail: e.to_string(),
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> (tempfile::TempDir, Paths) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::new(tmp.path());
        paths.ensure_directories().unwrap();
        (tmp, paths)
    }

    #[test]
    fn link_keg_creates_symlinks_for_bin_contents() {
        let (_tmp, paths) = paths();
        let linker = Linker::new(paths.clone());
        let keg_path = paths.package_dir("tree", "2.1.1");
        std::fs::create_dir_all(keg_path.join("bin")).unwrap();
        std::fs::write(keg_path.join("bin/tree"), b"#!/bin/sh\n").unwrap();

        let outcome = linker.link_keg(&keg_path).unwrap();
        assert_eq!(outcome.linked.len(), 1);
        assert!(outcome.conflicts.is_empty());
        assert!(paths.symlink_path("tree").symlink_metadata().is_ok());
    }

    #[test]
    fn link_keg_reports_conflict_for_non_symlink() {
        let (_tmp, paths) = paths();
        let linker = Linker::new(paths.clone());
        let keg_path = paths.package_dir("tree", "2.1.1");
        std::fs::create_dir_all(keg_path.join("bin")).unwrap();
        std::fs::write(keg_path.join("bin/tree"), b"#!/bin/sh\n").unwrap();

        std::fs::create_dir_all(paths.bin_dir()).unwrap();
        std::fs::write(paths.symlink_path("tree"), b"not a symlink").unwrap();

        let outcome = linker.link_keg(&keg_path).unwrap();
        assert!(outcome.linked.is_empty());
        assert_eq!(outcome.conflicts, vec![paths.symlink_path("tree")]);
    }

    #[test]
    fn unlink_keg_removes_symlinks_pointing_into_it() {
        let (_tmp, paths) = paths();
        let linker = Linker::new(paths.clone());
        let keg_path = paths.package_dir("tree", "2.1.1");
        std::fs::create_dir_all(keg_path.join("bin")).unwrap();
        std::fs::write(keg_path.join("bin/tree"), b"#!/bin/sh\n").unwrap();
        linker.link_keg(&keg_path).unwrap();

        let removed = linker.unlink_keg(&keg_path).unwrap();
        assert_eq!(removed, vec![paths.symlink_path("tree")]);
        assert!(paths.symlink_path("tree").symlink_metadata().is_err());
    }

    #[test]
    fn set_default_version_updates_opt_symlink() {
        let (_tmp, paths) = paths();
        let linker = Linker::new(paths.clone());
        let keg_path = paths.package_dir("tree", "2.1.1");
        std::fs::create_dir_all(&keg_path).unwrap();

        linker.set_default_version("tree", &keg_path).unwrap();
        assert_eq!(paths.default_version("tree"), Some("2.1.1".to_string()));

        let keg_path_2 = paths.package_dir("tree", "2.2.0");
        std::fs::create_dir_all(&keg_path_2).unwrap();
        linker.set_default_version("tree", &keg_path_2).unwrap();
        assert_eq!(paths.default_version("tree"), Some("2.2.0".to_string()));
    }
}
