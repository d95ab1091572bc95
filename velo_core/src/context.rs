//! Global state: path layout, logging, and concurrency knobs.
//!
//! Per the design notes, global state is limited to the [`Paths`] singleton
//! and the [`crate::host::HostIdentity`] snapshot; both are established once
//! at entry and are immutable thereafter. [`Context`] bundles them together
//! with a logger handle and concurrency limits so callers thread a single
//! value through the install pipeline instead of several loose globals.

use crate::host::HostIdentity;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Canonical on-disk locations for a single scope (global or project-local).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    prefix: PathBuf,
}

impl Paths {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Paths {
            prefix: prefix.into(),
        }
    }

    /// `$HOME/.velo`
    pub fn global() -> Option<Self> {
        std::env::var_os("HOME").map(|home| Paths::new(PathBuf::from(home).join(".velo")))
    }

    /// `<project>/.velo`
    pub fn local(project_root: &Path) -> Self {
        Paths::new(project_root.join(".velo"))
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.prefix.join("Cellar")
    }

    pub fn package_dir(&self, name: &str, version: &str) -> PathBuf {
        self.cellar_dir().join(name).join(version)
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn symlink_path(&self, exe: &str) -> PathBuf {
        self.bin_dir().join(exe)
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.prefix.join("opt")
    }

    pub fn opt_link(&self, name: &str) -> PathBuf {
        self.opt_dir().join(name)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.prefix.join("Cache")
    }

    /// Cache files are named by content address (the bottle's SHA-256) so
    /// that concurrent downloads of the same blob coalesce; see DESIGN.md.
    pub fn cache_file(&self, key: &str) -> PathBuf {
        self.cache_dir().join(key)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.prefix.join("tmp")
    }

    pub fn temporary_file(&self, prefix: &str, ext: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        self.tmp_dir()
            .join(format!("{prefix}.{now}.{}.{ext}", std::process::id()))
    }

    pub fn taps_dir(&self) -> PathBuf {
        self.prefix.join("taps")
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.prefix.join("receipts")
    }

    pub fn receipt_file(&self, name: &str) -> PathBuf {
        self.receipts_dir().join(format!("{name}.json"))
    }

    /// Process-wide advisory lock path (spec §5): held around an entire
    /// install/uninstall operation.
    pub fn process_lock_path(&self) -> PathBuf {
        self.prefix.join(".lock")
    }

    /// Per-package advisory lock path (spec §5): held around the
    /// materialize/promote critical section for one package.
    pub fn package_lock_path(&self, name: &str) -> PathBuf {
        self.cellar_dir().join(name).join(".lock")
    }

    /// Creates the full directory skeleton; safe to call repeatedly.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.cellar_dir(),
            self.bin_dir(),
            self.opt_dir(),
            self.cache_dir(),
            self.tmp_dir(),
            self.taps_dir(),
            self.receipts_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// True if any version of `name` has a directory under the Cellar.
    pub fn is_installed(&self, name: &str) -> bool {
        !self.installed_versions(name).is_empty()
    }

    /// Installed versions of `name`, sorted using their directory names as
    /// plain strings (callers that need semantic ordering should parse them
    /// via [`crate::version::Version`]).
    pub fn installed_versions(&self, name: &str) -> Vec<String> {
        let dir = self.cellar_dir().join(name);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut versions: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        versions.sort();
        versions
    }

    /// The version `opt/<name>` currently points at, if any.
    pub fn default_version(&self, name: &str) -> Option<String> {
        let link = self.opt_link(name);
        let target = std::fs::read_link(&link).ok()?;
        target
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
    }

    /// Resolves `name` to whichever installed Cellar entry satisfies it,
    /// treating a bare name and its `@version` slots as equivalent (spec
    /// §4.6): a request for `python` is satisfied by any installed
    /// `python@X.Y`. Returns the installed name itself (`name`, or the first
    /// matching slot in sorted order), or `None` if nothing satisfies it.
    pub fn equivalent_installed_name(&self, name: &str) -> Option<String> {
        if self.is_installed(name) {
            return Some(name.to_string());
        }
        if name.contains('@') {
            return None;
        }

        let dir = self.cellar_dir();
        let entries = std::fs::read_dir(&dir).ok()?;
        let prefix = format!("{name}@");
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|slot| slot.starts_with(&prefix))
            .filter(|slot| self.is_installed(slot))
            .min()
    }

    /// Whether `bin_dir()` appears on the process's `PATH`.
    pub fn is_in_path(&self) -> bool {
        let Some(path_var) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path_var).any(|p| p == self.bin_dir())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// A cheap-to-clone handle that emits level-gated diagnostics to stderr.
///
/// The teacher's own code favors plain `eprintln!` for diagnostics over a
/// logging crate; this wraps that same habit behind a level filter instead
/// of introducing `log`/`tracing`.
#[derive(Clone)]
pub struct LoggerHandle {
    level: LogLevel,
    sink: Arc<dyn Fn(LogLevel, &str) + Send + Sync>,
}

impl LoggerHandle {
    pub fn new(level: LogLevel) -> Self {
        LoggerHandle {
            level,
            sink: Arc::new(|level, message| eprintln!("[{level:?}] {message}")),
        }
    }

    /// Construct a handle with a custom sink, e.g. to capture output in tests.
    pub fn with_sink(level: LogLevel, sink: impl Fn(LogLevel, &str) + Send + Sync + 'static) -> Self {
        LoggerHandle {
            level,
            sink: Arc::new(sink),
        }
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        if level <= self.level {
            (self.sink)(level, message.as_ref());
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message);
    }
}

impl Default for LoggerHandle {
    fn default() -> Self {
        LoggerHandle::new(LogLevel::Info)
    }
}

impl fmt::Debug for LoggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerHandle").field("level", &self.level).finish()
    }
}

/// Download concurrency knobs for the registry client (spec §5: K >= 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    pub max_concurrent_downloads: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        ConcurrencyLimits {
            max_concurrent_downloads: 4,
        }
    }
}

/// The single bundle of global state threaded through the install pipeline.
#[derive(Debug, Clone)]
pub struct Context {
    pub paths: Paths,
    pub host: HostIdentity,
    pub logger: LoggerHandle,
    pub concurrency: ConcurrencyLimits,
}

impl Context {
    pub fn new(paths: Paths, host: HostIdentity) -> Self {
        Context {
            paths,
            host,
            logger: LoggerHandle::default(),
            concurrency: ConcurrencyLimits::default(),
        }
    }

    pub fn with_logger(mut self, logger: LoggerHandle) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyLimits) -> Self {
        self.concurrency = concurrency;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Arch;
    use std::sync::{Arc, Mutex};

    #[test]
    fn paths_derive_expected_subdirectories() {
        let paths = Paths::new("/tmp/velo-test-prefix");
        assert_eq!(paths.cellar_dir(), PathBuf::from("/tmp/velo-test-prefix/Cellar"));
        assert_eq!(
            paths.package_dir("tree", "2.1.1"),
            PathBuf::from("/tmp/velo-test-prefix/Cellar/tree/2.1.1")
        );
        assert_eq!(paths.symlink_path("tree"), PathBuf::from("/tmp/velo-test-prefix/bin/tree"));
        assert_eq!(paths.opt_link("tree"), PathBuf::from("/tmp/velo-test-prefix/opt/tree"));
    }

    #[test]
    fn ensure_directories_creates_full_skeleton() {
        let tmp = tempfile_dir();
        let paths = Paths::new(&tmp);
        paths.ensure_directories().unwrap();

        for dir in [
            paths.cellar_dir(),
            paths.bin_dir(),
            paths.opt_dir(),
            paths.cache_dir(),
            paths.tmp_dir(),
            paths.taps_dir(),
            paths.receipts_dir(),
        ] {
            assert!(dir.is_dir(), "{dir:?} should exist");
        }

        // Idempotent.
        paths.ensure_directories().unwrap();
    }

    #[test]
    fn is_installed_reflects_cellar_contents() {
        let tmp = tempfile_dir();
        let paths = Paths::new(&tmp);
        paths.ensure_directories().unwrap();
        assert!(!paths.is_installed("tree"));

        std::fs::create_dir_all(paths.package_dir("tree", "2.1.1")).unwrap();
        assert!(paths.is_installed("tree"));
        assert_eq!(paths.installed_versions("tree"), vec!["2.1.1".to_string()]);
    }

    #[test]
    fn default_version_reads_opt_symlink() {
        let tmp = tempfile_dir();
        let paths = Paths::new(&tmp);
        paths.ensure_directories().unwrap();
        std::fs::create_dir_all(paths.package_dir("tree", "2.1.1")).unwrap();

        assert_eq!(paths.default_version("tree"), None);

        #[cfg(unix)]
        std::os::unix::fs::symlink(paths.package_dir("tree", "2.1.1"), paths.opt_link("tree"))
            .unwrap();

        #[cfg(unix)]
        assert_eq!(paths.default_version("tree"), Some("2.1.1".to_string()));
    }

    #[test]
    fn equivalent_installed_name_matches_version_slot() {
        let tmp = tempfile_dir();
        let paths = Paths::new(&tmp);
        paths.ensure_directories().unwrap();
        assert_eq!(paths.equivalent_installed_name("python"), None);

        std::fs::create_dir_all(paths.package_dir("python@3.11", "3.11.6")).unwrap();
        assert_eq!(paths.equivalent_installed_name("python"), Some("python@3.11".to_string()));

        // An exact match still wins over the slotted fallback.
        std::fs::create_dir_all(paths.package_dir("python", "3.12.0")).unwrap();
        assert_eq!(paths.equivalent_installed_name("python"), Some("python".to_string()));
    }

    #[test]
    fn logger_respects_level_filter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let logger = LoggerHandle::with_sink(LogLevel::Warn, move |level, msg| {
            seen_clone.lock().unwrap().push((level, msg.to_string()));
        });

        logger.debug("should be filtered out");
        logger.warn("should appear");
        logger.error("should also appear");

        let captured = seen.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].1, "should appear");
        assert_eq!(captured[1].1, "should also appear");
    }

    #[test]
    fn context_bundles_paths_and_host() {
        let ctx = Context::new(Paths::new("/tmp/velo"), HostIdentity::with_values(Arch::Arm64, 14));
        assert_eq!(ctx.concurrency.max_concurrent_downloads, 4);
        assert_eq!(ctx.host.os_major, 14);
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "velo-context-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }
}
