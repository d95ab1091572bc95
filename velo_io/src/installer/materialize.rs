//! Cellar materialization (steps 1-4 of C9's install pipeline, spec §4.8):
//! stage the extracted archive, relocate placeholder paths, atomically
//! promote into the Cellar, and update the `opt/<name>` default-version
//! symlink.
//!
//! Grounded in the teacher's `Store::ensure_entry` (same
//! stage-into-a-sibling-tmp-then-atomic-rename shape, generalized here
//! from a content-addressed store entry to a named package version) and
//! `install/executor.rs`'s `self.cellar.materialize(...)` call site.

use crate::extract::extract_tarball;
use crate::installer::link::Linker;
use crate::lock::FileLock;
use crate::relocate::{self, placeholder_replacements};
use std::path::{Path, PathBuf};
use velo_core::context::Paths;
use velo_core::Error;

pub struct MaterializeOutcome {
    pub keg_path: PathBuf,
    pub corrupted_relocations: u32,
}

pub struct Cellar {
    paths: Paths,
}

impl Cellar {
    pub fn new(paths: Paths) -> Self {
        Cellar { paths }
    }

    pub fn keg_path(&self, name: &str, version: &str) -> PathBuf {
        self.paths.package_dir(name, version)
    }

    fn staging_path(&self, name: &str, version: &str) -> PathBuf {
        self.paths.cellar_dir().join(name).join(format!("{version}.incoming"))
    }

    /// Runs stage -> relocate -> promote -> default-version for one
    /// package. `archive_path` is a downloaded, SHA-256-verified bottle
    /// tarball. If `force` is false and the target version already
    /// exists, returns [`Error::AlreadyInstalled`] without touching it.
    pub fn materialize(
        &self,
        name: &str,
        version: &str,
        archive_path: &Path,
        force: bool,
    ) -> Result<MaterializeOutcome, Error> {
        // Held for the whole stage/relocate/promote sequence so a second
        // process materializing the same package blocks instead of racing
        // on the final rename below.
        let _package_lock = FileLock::acquire(&self.paths.package_lock_path(name))?;

        let final_path = self.keg_path(name, version);
        if final_path.exists() && !force {
            return Err(Error::AlreadyInstalled {
                name: name.to_string(),
                version: version.to_string(),
            });
        }

        let staging = self.staging_path(name, version);
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| Error::ExtractionFailed {
                name: name.to_string(),
                detail: format!("could not clear stale staging directory: {e}"),
            })?;
        }
        std::fs::create_dir_all(&staging).map_err(|e| Error::ExtractionFailed {
            name: name.to_string(),
            detail: e.to_string(),
        })?;

        if let Err(e) = extract_tarball(archive_path, &staging) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        collapse_archive_root(&staging, name, version)?;

        let replacements = placeholder_replacements(self.paths.prefix(), &self.paths.cellar_dir());
        let corrupted_relocations = relocate_tree(&staging, &replacements);

        if final_path.exists() {
            std::fs::remove_dir_all(&final_path).map_err(|e| Error::ExtractionFailed {
                name: name.to_string(),
                detail: format!("could not remove previous install for force reinstall: {e}"),
            })?;
        }
        std::fs::create_dir_all(final_path.parent().unwrap()).map_err(|e| Error::ExtractionFailed {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
        std::fs::rename(&staging, &final_path).map_err(|e| Error::ExtractionFailed {
            name: name.to_string(),
            detail: format!("failed to promote staged install: {e}"),
        })?;

        let linker = Linker::new(self.paths.clone());
        linker.set_default_version(name, &final_path)?;

        Ok(MaterializeOutcome {
            keg_path: final_path,
            corrupted_relocations,
        })
    }

    pub fn remove_keg(&self, name: &str, version: &str) -> Result<(), Error> {
        let _package_lock = FileLock::acquire(&self.paths.package_lock_path(name))?;
        let path = self.keg_path(name, version);
        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|e| Error::ExtractionFailed {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Bottles archive as `<name>/<version>/...`; collapse that wrapper so
/// the staging directory's own root is the keg content.
fn collapse_archive_root(staging: &Path, name: &str, version: &str) -> Result<(), Error> {
    let wrapped = staging.join(name).join(version);
    if !wrapped.is_dir() {
        // Some bottles ship flat already; nothing to collapse.
        return Ok(());
    }

    for entry in std::fs::read_dir(&wrapped).map_err(|e| Error::ExtractionFailed {
        name: name.to_string(),
        detail: e.to_string(),
    })? {
        let entry = entry.map_err(|e| Error::ExtractionFailed {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
        let dest = staging.join(entry.file_name());
        std::fs::rename(entry.path(), dest).map_err(|e| Error::ExtractionFailed {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
    }

    let top_level = staging.join(name);
    std::fs::remove_dir_all(&top_level).map_err(|e| Error::ExtractionFailed {
        name: name.to_string(),
        detail: e.to_string(),
    })?;

    Ok(())
}

/// Walks every regular file in the staged tree, relocating placeholder
/// paths. A per-file relocation failure is logged and counted rather than
/// aborting the install, per spec §4.8's failure semantics.
fn relocate_tree(root: &Path, replacements: &std::collections::HashMap<String, String>) -> u32 {
    let mut corrupted = 0;
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Err(e) = relocate::relocate_file(entry.path(), replacements) {
            eprintln!("warning: relocation failed for '{}': {e}", entry.path().display());
            corrupted += 1;
        }
    }
    corrupted
}
