//! Content-addressed bottle cache (part of C6/C9, spec §4.5/§5).
//!
//! Blobs are named by their SHA-256 so that concurrent downloads of the
//! same bottle coalesce onto one file instead of racing each other; a
//! writer stages into a unique temp file and only the first to finish
//! renames into place, matching the write-once/rename-if-absent rule in
//! spec §5. Grounded in the teacher's `blob.rs`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use velo_core::Error;

#[derive(Debug, Clone)]
pub struct BlobCache {
    blobs_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl BlobCache {
    pub fn new(blobs_dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let blobs_dir = blobs_dir.into();
        let tmp_dir = tmp_dir.into();
        std::fs::create_dir_all(&blobs_dir)?;
        std::fs::create_dir_all(&tmp_dir)?;
        Ok(BlobCache { blobs_dir, tmp_dir })
    }

    pub fn blob_path(&self, sha256: &str) -> PathBuf {
        self.blobs_dir.join(format!("{sha256}.tar.gz"))
    }

    pub fn has_blob(&self, sha256: &str) -> bool {
        self.blob_path(sha256).is_file()
    }

    pub fn remove_blob(&self, sha256: &str) -> std::io::Result<()> {
        let path = self.blob_path(sha256);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Opens a staging writer for `sha256`. The temp filename embeds the
    /// pid and thread id so that two concurrent writers for the same blob
    /// never collide on the same staging path.
    pub fn start_write(&self, sha256: &str) -> std::io::Result<BlobWriter> {
        let tmp_path = self.tmp_dir.join(format!(
            "{sha256}.{}.{:?}.tar.gz.part",
            std::process::id(),
            std::thread::current().id()
        ));
        let file = std::fs::File::create(&tmp_path)?;
        Ok(BlobWriter {
            file: Some(file),
            tmp_path,
            final_path: self.blob_path(sha256),
            committed: false,
        })
    }

    pub fn list_blobs(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut blobs = Vec::new();
        for entry in std::fs::read_dir(&self.blobs_dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                blobs.push(entry.path());
            }
        }
        Ok(blobs)
    }

    pub fn total_size(&self) -> std::io::Result<u64> {
        let mut total = 0;
        for blob in self.list_blobs()? {
            total += std::fs::metadata(blob)?.len();
        }
        Ok(total)
    }

    /// Removes staged files left behind by a writer that never committed
    /// (e.g. the process was killed mid-download), but only ones whose last
    /// modification is older than `older_than` (spec §3: `P/tmp/` entries
    /// older than 1 hour may be swept) — a `.part` file from a download
    /// still in flight must survive a concurrent cleanup pass.
    pub fn cleanup_temp_files(&self, older_than: Duration) -> std::io::Result<usize> {
        let cutoff = SystemTime::now().checked_sub(older_than);
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.tmp_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("part") {
                continue;
            }
            let age_ok = match (cutoff, entry.metadata().and_then(|m| m.modified())) {
                (Some(cutoff), Ok(modified)) => modified <= cutoff,
                // No cutoff (older_than larger than representable), or the
                // platform can't report mtime: fall back to sweeping.
                _ => true,
            };
            if age_ok {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn remove_blobs_except(&self, keep: &[String]) -> std::io::Result<usize> {
        let mut removed = 0;
        for blob in self.list_blobs()? {
            let stem = blob.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            let sha256 = stem.strip_suffix(".tar").unwrap_or(stem);
            if !keep.iter().any(|k| k == sha256) {
                std::fs::remove_file(blob)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// A staged write into the blob cache. Drop without calling [`commit`]
/// cleans up the temp file, so a failed download never leaves debris.
pub struct BlobWriter {
    file: Option<std::fs::File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.as_mut().expect("writer used after commit").write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.as_mut().expect("writer used after commit").flush()
    }
}

impl BlobWriter {
    /// Flushes and atomically promotes the staged file into the cache.
    /// Tolerates the final path already existing: another writer for the
    /// same content address may have won the race, and the content is
    /// identical by construction (the path is its own hash).
    pub fn commit(mut self) -> Result<PathBuf, Error> {
        let mut file = self.file.take().expect("writer used after commit");
        file.flush().map_err(|e| Error::DownloadFailed {
            name: self.final_path.display().to_string(),
            cause: e.to_string(),
        })?;
        file.sync_all().map_err(|e| Error::DownloadFailed {
            name: self.final_path.display().to_string(),
            cause: e.to_string(),
        })?;
        drop(file);

        if self.final_path.exists() {
            let _ = std::fs::remove_file(&self.tmp_path);
            self.committed = true;
            return Ok(self.final_path.clone());
        }

        match std::fs::rename(&self.tmp_path, &self.final_path) {
            Ok(()) => {
                self.committed = true;
                Ok(self.final_path.clone())
            }
            Err(e) if self.final_path.exists() => {
                let _ = std::fs::remove_file(&self.tmp_path);
                self.committed = true;
                let _ = e;
                Ok(self.final_path.clone())
            }
            Err(e) => Err(Error::DownloadFailed {
                name: self.final_path.display().to_string(),
                cause: e.to_string(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.tmp_path
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if !self.committed && self.tmp_path.exists() {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, BlobCache) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = BlobCache::new(tmp.path().join("blobs"), tmp.path().join("tmp")).unwrap();
        (tmp, cache)
    }

    #[test]
    fn write_then_commit_promotes_to_final_path() {
        let (_tmp, cache) = cache();
        let mut writer = cache.start_write("abc123").unwrap();
        writer.write_all(b"bottle contents").unwrap();
        let final_path = writer.commit().unwrap();

        assert!(final_path.is_file());
        assert_eq!(std::fs::read(&final_path).unwrap(), b"bottle contents");
        assert!(cache.has_blob("abc123"));
    }

    #[test]
    fn dropped_writer_without_commit_cleans_up_temp_file() {
        let (_tmp, cache) = cache();
        {
            let mut writer = cache.start_write("abc123").unwrap();
            writer.write_all(b"partial").unwrap();
        }
        assert!(!cache.has_blob("abc123"));
        assert_eq!(cache.cleanup_temp_files(Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn cleanup_temp_files_spares_recent_files_under_the_age_gate() {
        let (_tmp, cache) = cache();
        let mut writer = cache.start_write("abc123").unwrap();
        writer.write_all(b"still downloading").unwrap();
        std::mem::forget(writer);

        assert_eq!(cache.cleanup_temp_files(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(cache.cleanup_temp_files(Duration::ZERO).unwrap(), 1);
    }

    #[test]
    fn second_writer_for_same_blob_coalesces() {
        let (_tmp, cache) = cache();
        let mut first = cache.start_write("abc123").unwrap();
        first.write_all(b"one").unwrap();
        first.commit().unwrap();

        let mut second = cache.start_write("abc123").unwrap();
        second.write_all(b"one-again").unwrap();
        let final_path = second.commit().unwrap();

        assert_eq!(std::fs::read(&final_path).unwrap(), b"one");
    }

    #[test]
    fn remove_blobs_except_keeps_only_listed_hashes() {
        let (_tmp, cache) = cache();
        for hash in ["a", "b", "c"] {
            let mut w = cache.start_write(hash).unwrap();
            w.write_all(b"x").unwrap();
            w.commit().unwrap();
        }

        let removed = cache.remove_blobs_except(&["a".to_string()]).unwrap();
        assert_eq!(removed, 2);
        assert!(cache.has_blob("a"));
        assert!(!cache.has_blob("b"));
    }
}
