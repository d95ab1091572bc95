//! Advisory locking (C9/C13, spec §5): a process-wide lock anchored at
//! `P/.lock` and a per-package lock at `Cellar/<name>/.lock`, so two
//! concurrent `velo` invocations can't race on the same Cellar rename.
//!
//! Grounded in the teacher's `Store::ensure_entry`, which takes a per-key
//! exclusive lock with `fs4`'s `lock_exclusive()` before unpacking into the
//! store; the lock here is held for the duration of the guard and released
//! when it's dropped, same as the teacher's `lock_file`.

use fs4::fs_std::FileExt;
use std::fs::File;
use std::path::Path;
use velo_core::Error;

/// Removes `.lock` files left behind at `Cellar/<name>/.lock` for a package
/// whose Cellar entry no longer has any installed version directory —
/// the package was uninstalled (or never finished installing) while the
/// lock file itself survived. Grounded in the teacher's
/// `Store::cleanup_stale_locks`, adapted from a flat locks directory keyed
/// by store key to velo's per-package lock embedded in the package's own
/// Cellar directory.
pub fn cleanup_stale_package_locks(cellar_dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    let Ok(entries) = std::fs::read_dir(cellar_dir) else {
        return Ok(0);
    };

    for entry in entries {
        let entry = entry?;
        let package_dir = entry.path();
        if !package_dir.is_dir() {
            continue;
        }

        let lock_path = package_dir.join(".lock");
        if !lock_path.is_file() {
            continue;
        }

        let has_version = std::fs::read_dir(&package_dir)?
            .filter_map(|e| e.ok())
            .any(|e| e.path().is_dir());
        if !has_version && std::fs::remove_file(&lock_path).is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}

/// An acquired exclusive lock on a file. Released when dropped.
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Blocks until an exclusive lock on `path` is acquired, creating the
    /// lock file (and its parent directory) if they don't exist yet.
    pub fn acquire(path: &Path) -> Result<Self, Error> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| Error::ProcessError {
                cmd: format!("create dir {}", dir.display()),
                code: None,
                detail: e.to_string(),
            })?;
        }
        let file = File::create(path).map_err(|e| Error::ProcessError {
            cmd: format!("open lock {}", path.display()),
            code: None,
            detail: e.to_string(),
        })?;
        file.lock_exclusive().map_err(|e| Error::ProcessError {
            cmd: format!("lock {}", path.display()),
            code: None,
            detail: e.to_string(),
        })?;
        Ok(FileLock { _file: file })
    }
}
