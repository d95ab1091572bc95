//! Install orchestration (C9, spec §4.8): wires the tap index, registry
//! client, cellar, linker, and receipt store into the full install/
//! uninstall/verify/repair pipeline.
//!
//! Grounded in the teacher's `Installer` (`install/mod.rs`) and its
//! `plan`/`execute_with_progress`/`uninstall` methods seen in
//! `install/planner.rs` and `install/executor.rs`; the concrete body is
//! original where those files weren't present in the retrieved pack.

pub mod link;
pub mod materialize;

use crate::cache::BlobCache;
use crate::installer::link::Linker;
use crate::installer::materialize::Cellar;
use crate::lock::{cleanup_stale_package_locks, FileLock};
use crate::progress::{report, ProgressCallback, ProgressEvent};
use crate::receipt::{InstalledAs, Receipt, ReceiptStore};
use crate::registry::{DownloadRequest, RegistryClient};
use crate::relocate::{placeholder_replacements, relocate_file};
use crate::tap::TapIndex;
use crate::traits::HttpClient;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use velo_core::context::Context;
use velo_core::formula::{Bottle, Formula};
use velo_core::{bottle, graph, planner};
use velo_core::Error;

/// Spec §4.8: a cached blob that fails to extract is assumed corrupted
/// rather than permanently bad; the installer evicts it and re-fetches
/// up to this many times before giving up. Grounded in the teacher's
/// `MAX_CORRUPTION_RETRIES`.
const MAX_CORRUPTION_RETRIES: u32 = 3;

/// Spec §3: `P/tmp/` entries older than this may be swept by [`Installer::cleanup`].
const STALE_TEMP_FILE_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub receipt: Receipt,
}

/// Tally of what a [`Installer::cleanup`] sweep removed. Grounded in the
/// teacher's `CleanupResult` (`install/mod.rs`), trimmed to the maintenance
/// this installer actually performs (no HTTP response cache to prune here).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub blobs_removed: usize,
    pub temp_files_removed: usize,
    pub locks_removed: usize,
}

pub struct Installer<H: HttpClient + 'static> {
    context: Context,
    tap_index: TapIndex,
    registry: RegistryClient<H>,
    cache: BlobCache,
    cellar: Cellar,
    linker: Linker,
    receipts: ReceiptStore,
    registry_base: String,
    namespace: String,
}

impl<H: HttpClient + 'static> Installer<H> {
    pub fn new(
        context: Context,
        tap_index: TapIndex,
        http: Arc<H>,
        registry_base: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self, Error> {
        let cache = BlobCache::new(context.paths.cache_dir(), context.paths.tmp_dir()).map_err(|e| {
            Error::ExtractionFailed {
                name: context.paths.cache_dir().display().to_string(),
                detail: e.to_string(),
            }
        })?;
        let registry = RegistryClient::new(http, cache.clone(), context.concurrency.max_concurrent_downloads);
        let cellar = Cellar::new(context.paths.clone());
        let linker = Linker::new(context.paths.clone());
        let receipts = ReceiptStore::new(context.paths.receipts_dir()).map_err(|e| Error::ExtractionFailed {
            name: context.paths.receipts_dir().display().to_string(),
            detail: e.to_string(),
        })?;

        Ok(Installer {
            context,
            tap_index,
            registry,
            cache,
            cellar,
            linker,
            receipts,
            registry_base: registry_base.into(),
            namespace: namespace.into(),
        })
    }

    /// Garbage-collects the blob cache and sweeps stale maintenance debris:
    /// cached bottles not referenced by any current receipt, `.part` files
    /// left by a download that never committed, and per-package lock files
    /// whose Cellar entry has since been fully uninstalled. Grounded in the
    /// teacher's `Installer::cleanup` (`install/executor.rs`).
    pub fn cleanup(&self) -> Result<CleanupReport, Error> {
        let mut keep = BTreeSet::new();
        for name in self.receipts.list()? {
            if let Some(receipt) = self.receipts.load(&name)? {
                keep.insert(receipt.bottle_sha256);
            }
        }

        let to_io_error = |context: &str| {
            move |e: std::io::Error| Error::ExtractionFailed {
                name: context.to_string(),
                detail: e.to_string(),
            }
        };

        let keep: Vec<String> = keep.into_iter().collect();
        let blobs_removed = self
            .cache
            .remove_blobs_except(&keep)
            .map_err(to_io_error("blob cache"))?;
        let temp_files_removed = self
            .cache
            .cleanup_temp_files(STALE_TEMP_FILE_AGE)
            .map_err(to_io_error("cache tmp dir"))?;
        let locks_removed = cleanup_stale_package_locks(&self.context.paths.cellar_dir())
            .map_err(to_io_error("Cellar lock files"))?;

        Ok(CleanupReport {
            blobs_removed,
            temp_files_removed,
            locks_removed,
        })
    }

    /// Resolves `root`'s full runtime dependency closure within `tap` and
    /// returns a deterministic install order, the formulas that order
    /// references, and the equivalence-aware resolution of each node against
    /// the current Path layout (spec §4.6).
    pub fn plan(
        &self,
        tap: &str,
        root: &str,
    ) -> Result<(planner::InstallPlan, BTreeMap<String, Formula>, graph::Resolution), Error> {
        let formulas = self.tap_index.build_full_index(tap)?;
        let graph = graph::build_graph(root, &formulas)?;
        let plan = planner::plan_install_order(&graph);
        let resolution = graph::Resolution::build(&graph, &formulas, &self.context.paths, &self.context.host);
        Ok((plan, formulas, resolution))
    }

    /// Runs [`Cellar::materialize`] and, if it fails to extract, assumes
    /// the cached blob named by `request.sha256` is corrupted: evicts it
    /// and re-downloads via [`RegistryClient::download_single`] before
    /// retrying, up to [`MAX_CORRUPTION_RETRIES`] times. Grounded in the
    /// teacher's `Executor::extract_with_retry`.
    async fn materialize_with_retry(
        &self,
        name: &str,
        version: &str,
        initial_blob_path: &Path,
        force: bool,
        request: &DownloadRequest,
        progress: &Option<Arc<ProgressCallback>>,
    ) -> Result<materialize::MaterializeOutcome, Error> {
        let mut blob_path = initial_blob_path.to_path_buf();
        let mut last_error = None;

        for attempt in 0..MAX_CORRUPTION_RETRIES {
            match self.cellar.materialize(name, version, &blob_path, force) {
                Ok(outcome) => return Ok(outcome),
                Err(Error::ExtractionFailed { name: failed_name, detail }) => {
                    let _ = self.registry.remove_cached_blob(&request.sha256);

                    if attempt + 1 < MAX_CORRUPTION_RETRIES {
                        eprintln!(
                            "warning: corrupted download detected for '{name}', retrying ({}/{MAX_CORRUPTION_RETRIES})...",
                            attempt + 2
                        );
                        match self.registry.download_single(request.clone(), progress.clone()).await {
                            Ok(result) => blob_path = result.blob_path,
                            Err(e) => {
                                last_error = Some(e);
                                break;
                            }
                        }
                    } else {
                        last_error = Some(Error::ExtractionFailed {
                            name: failed_name,
                            detail: format!(
                                "{detail}\n  failed after {MAX_CORRUPTION_RETRIES} attempts; the download may be corrupted at the source"
                            ),
                        });
                    }
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::ExtractionFailed {
            name: name.to_string(),
            detail: "extraction failed with unknown error".to_string(),
        }))
    }

    /// Installs `root` and every dependency not already present, in
    /// dependency order. A download failure for any package aborts the
    /// whole plan; packages already promoted into the Cellar before the
    /// failure remain on disk, per spec §4.8's failure semantics.
    pub async fn install(
        &self,
        tap: &str,
        root: &str,
        force: bool,
        create_symlinks: bool,
        progress: Option<Arc<ProgressCallback>>,
    ) -> Result<Vec<InstalledPackage>, Error> {
        // Process-wide lock (spec §5): held for the whole operation so a
        // second `velo install`/`uninstall` invocation queues up rather
        // than racing this one's Cellar writes.
        let _process_lock = FileLock::acquire(&self.context.paths.process_lock_path())?;

        let (plan, formulas, resolution) = self.plan(tap, root)?;

        let mut selections: BTreeMap<String, bottle::SelectedBottle> = BTreeMap::new();
        let mut requests = Vec::new();
        let mut promoted = Vec::new();

        for name in &plan.order {
            // Equivalence-aware (spec §4.6): a request for `python` is
            // satisfied by an already-installed `python@3.11`. If the root
            // itself is satisfied this way, promote it to explicit and link
            // it instead of silently doing nothing (spec §4.9 scenario S3).
            if let Some(installed_name) = resolution.equivalent_installed_name(name) {
                let installed_name = installed_name.to_string();
                if !force {
                    if name == root && create_symlinks {
                        self.create_symlinks_for_existing_package(&installed_name)?;
                        if let Some(receipt) = self.receipts.load(&installed_name)? {
                            promoted.push(InstalledPackage {
                                name: installed_name,
                                version: receipt.version.clone(),
                                receipt,
                            });
                        }
                    }
                    continue;
                }
            }
            let formula = formulas.get(name).ok_or_else(|| Error::FormulaNotFound {
                name: name.clone(),
                suggestions: Vec::new(),
            })?;

            let selected = bottle::select_bottle(formula, &self.context.host)?;
            let bottle = Bottle {
                sha256: selected.sha256.clone(),
                platform: selected.platform,
            };
            let url = bottle::bottle_url(&self.registry_base, &self.namespace, formula, &bottle);

            requests.push(DownloadRequest {
                url,
                sha256: selected.sha256.clone(),
                name: name.clone(),
            });
            selections.insert(name.clone(), selected);
        }

        let request_map: BTreeMap<String, DownloadRequest> =
            requests.iter().map(|r| (r.name.clone(), r.clone())).collect();

        let mut blob_paths = BTreeMap::new();
        if !requests.is_empty() {
            for name in requests.iter().map(|r| r.name.clone()) {
                report(&progress, ProgressEvent::DownloadStarted { name });
            }

            let mut rx = self.registry.download_all(requests, progress.clone());
            while let Some(result) = rx.recv().await {
                let result = result?;
                report(&progress, ProgressEvent::DownloadCompleted { name: result.name.clone() });
                blob_paths.insert(result.name, result.blob_path);
            }
        }

        let mut installed = Vec::new();
        for name in &plan.order {
            let Some(blob_path) = blob_paths.get(name) else {
                continue;
            };
            let formula = formulas.get(name).expect("formula resolved during planning");

            report(&progress, ProgressEvent::UnpackStarted { name: name.clone() });
            let outcome = self
                .materialize_with_retry(name, &formula.version, blob_path, force, &request_map[name], &progress)
                .await?;
            report(&progress, ProgressEvent::UnpackCompleted { name: name.clone() });
            report(
                &progress,
                ProgressEvent::RelocateCompleted {
                    name: name.clone(),
                    corrupted_relocations: outcome.corrupted_relocations,
                },
            );

            let mut symlinks_created = false;
            if create_symlinks {
                report(&progress, ProgressEvent::LinkStarted { name: name.clone() });
                let link_outcome = self.linker.link_keg(&outcome.keg_path)?;
                symlinks_created = link_outcome.conflicts.is_empty();
                report(&progress, ProgressEvent::LinkCompleted { name: name.clone() });
            }

            let bottle_sha256 = selections.get(name).map(|s| s.sha256.clone()).unwrap_or_default();
            let corrupted_relocations = outcome.corrupted_relocations;
            let is_root = name == root;

            let receipt = self.receipts.update(name, &formula.version, Utc::now(), |r| {
                r.bottle_sha256 = bottle_sha256.clone();
                r.installed_as = if is_root {
                    InstalledAs::Explicit
                } else {
                    // Union with any requesters already on record, so a package
                    // pulled in by more than one root keeps every requester.
                    let mut requested_by = match &r.installed_as {
                        InstalledAs::Dependency { requested_by } => requested_by.clone(),
                        InstalledAs::Explicit => std::collections::BTreeSet::new(),
                    };
                    requested_by.insert(root.to_string());
                    InstalledAs::Dependency { requested_by }
                };
                r.symlinks_created = symlinks_created;
                r.corrupted_relocations = corrupted_relocations;
            })?;

            installed.push(InstalledPackage {
                name: name.clone(),
                version: formula.version.clone(),
                receipt,
            });
        }

        promoted.extend(installed);
        Ok(promoted)
    }

    /// Installs `root` from `lockfile`'s pinned set instead of resolving
    /// against the tap (spec §4.10, scenario S5): every package reachable
    /// from `root` through the lockfile's nested `dependencies` edges is
    /// fetched from its locked URL and verified against its locked SHA-256,
    /// ignoring whatever version the tap currently publishes. A name
    /// reachable from `root` but absent from the lockfile fails the whole
    /// install with `LockfileDrift` rather than silently falling back to
    /// the tap.
    pub async fn install_frozen(
        &self,
        lockfile: &crate::manifest::Lockfile,
        root: &str,
        force: bool,
        create_symlinks: bool,
        progress: Option<Arc<ProgressCallback>>,
    ) -> Result<Vec<InstalledPackage>, Error> {
        let _process_lock = FileLock::acquire(&self.context.paths.process_lock_path())?;
        let order = frozen_install_order(lockfile, root)?;

        let mut requests = Vec::new();
        for name in &order {
            if !force && self.context.paths.equivalent_installed_name(name).is_some() {
                continue;
            }
            let locked = &lockfile.dependencies[name];
            requests.push(DownloadRequest { url: locked.url.clone(), sha256: locked.sha256.clone(), name: name.clone() });
        }

        let request_map: BTreeMap<String, DownloadRequest> =
            requests.iter().map(|r| (r.name.clone(), r.clone())).collect();

        let mut blob_paths = BTreeMap::new();
        if !requests.is_empty() {
            for name in requests.iter().map(|r| r.name.clone()) {
                report(&progress, ProgressEvent::DownloadStarted { name });
            }

            let mut rx = self.registry.download_all(requests, progress.clone());
            while let Some(result) = rx.recv().await {
                let result = result?;
                report(&progress, ProgressEvent::DownloadCompleted { name: result.name.clone() });
                blob_paths.insert(result.name, result.blob_path);
            }
        }

        let mut installed = Vec::new();
        for name in &order {
            let Some(blob_path) = blob_paths.get(name) else {
                continue;
            };
            let locked = &lockfile.dependencies[name];

            report(&progress, ProgressEvent::UnpackStarted { name: name.clone() });
            let outcome = self
                .materialize_with_retry(name, &locked.version, blob_path, force, &request_map[name], &progress)
                .await?;
            report(&progress, ProgressEvent::UnpackCompleted { name: name.clone() });
            report(
                &progress,
                ProgressEvent::RelocateCompleted {
                    name: name.clone(),
                    corrupted_relocations: outcome.corrupted_relocations,
                },
            );

            let mut symlinks_created = false;
            if create_symlinks {
                report(&progress, ProgressEvent::LinkStarted { name: name.clone() });
                let link_outcome = self.linker.link_keg(&outcome.keg_path)?;
                symlinks_created = link_outcome.conflicts.is_empty();
                report(&progress, ProgressEvent::LinkCompleted { name: name.clone() });
            }

            let bottle_sha256 = locked.sha256.clone();
            let corrupted_relocations = outcome.corrupted_relocations;
            let is_root = name == root;

            let receipt = self.receipts.update(name, &locked.version, Utc::now(), |r| {
                r.bottle_sha256 = bottle_sha256.clone();
                r.installed_as = if is_root {
                    InstalledAs::Explicit
                } else {
                    let mut requested_by = match &r.installed_as {
                        InstalledAs::Dependency { requested_by } => requested_by.clone(),
                        InstalledAs::Explicit => std::collections::BTreeSet::new(),
                    };
                    requested_by.insert(root.to_string());
                    InstalledAs::Dependency { requested_by }
                };
                r.symlinks_created = symlinks_created;
                r.corrupted_relocations = corrupted_relocations;
            })?;

            installed.push(InstalledPackage { name: name.clone(), version: locked.version.clone(), receipt });
        }

        Ok(installed)
    }

    /// Checks a package's receipt against what's actually on disk, returning
    /// a human-readable mismatch line per divergence found (empty if clean).
    pub fn verify_installation(&self, name: &str) -> Result<Vec<String>, Error> {
        let mut issues = Vec::new();

        let Some(receipt) = self.receipts.load(name)? else {
            issues.push(format!("{name}: no receipt on disk"));
            return Ok(issues);
        };

        let keg_path = self.cellar.keg_path(name, &receipt.version);
        if !keg_path.is_dir() {
            issues.push(format!("{name}: receipt references {} but the keg is missing", receipt.version));
            return Ok(issues);
        }

        if receipt.symlinks_created {
            let bin_dir = keg_path.join("bin");
            if bin_dir.is_dir() {
                for entry in std::fs::read_dir(&bin_dir)
                    .into_iter()
                    .flatten()
                    .filter_map(|e| e.ok())
                {
                    let Some(exe_name) = entry.file_name().to_str().map(|s| s.to_string()) else {
                        continue;
                    };
                    let link_path = self.context.paths.symlink_path(&exe_name);
                    match std::fs::read_link(&link_path) {
                        Ok(target) if target.starts_with(&keg_path) => {}
                        _ => issues.push(format!("{name}: expected symlink at {} is missing or points elsewhere", link_path.display())),
                    }
                }
            }
        }

        Ok(issues)
    }

    /// Removes a single installed version: its symlinks, its keg, and (if
    /// no versions remain) its receipt. If the removed version was the
    /// default, repoints `opt/<name>` at the newest remaining version.
    pub fn uninstall_version(&self, name: &str, version: &str) -> Result<(), Error> {
        let keg_path = self.cellar.keg_path(name, version);
        self.linker.unlink_keg(&keg_path)?;
        self.cellar.remove_keg(name, version)?;

        let was_default = self.context.paths.default_version(name).as_deref() == Some(version);
        let remaining = self.context.paths.installed_versions(name);

        if was_default {
            let opt_link = self.context.paths.opt_link(name);
            if opt_link.symlink_metadata().is_ok() {
                std::fs::remove_file(&opt_link).map_err(|e| Error::ExtractionFailed {
                    name: opt_link.display().to_string(),
                    detail: e.to_string(),
                })?;
            }
            if let Some(newest) = remaining.last() {
                self.linker.set_default_version(name, &self.cellar.keg_path(name, newest))?;
            }
        }

        if remaining.is_empty() {
            self.receipts.delete(name)?;
        }

        Ok(())
    }

    /// Removes every installed version of `name`.
    pub fn uninstall(&self, name: &str) -> Result<(), Error> {
        let _process_lock = FileLock::acquire(&self.context.paths.process_lock_path())?;
        for version in self.context.paths.installed_versions(name) {
            self.uninstall_version(name, &version)?;
        }
        Ok(())
    }

    /// Creates `bin/` symlinks for an already-installed package whose
    /// default version currently has none (e.g. it was installed only as a
    /// dependency and is now being promoted to an explicit install).
    pub fn create_symlinks_for_existing_package(&self, name: &str) -> Result<(), Error> {
        let Some(version) = self.context.paths.default_version(name) else {
            return Err(Error::FormulaNotFound { name: name.to_string(), suggestions: Vec::new() });
        };
        let keg_path = self.cellar.keg_path(name, &version);
        let link_outcome = self.linker.link_keg(&keg_path)?;
        let symlinks_created = link_outcome.conflicts.is_empty();

        self.receipts.update(name, &version, Utc::now(), |r| {
            r.symlinks_created = symlinks_created;
            r.installed_as = InstalledAs::Explicit;
        })?;

        Ok(())
    }

    /// Re-runs placeholder relocation across an installed keg, for repairing
    /// an install whose receipt recorded `corrupted_relocations > 0`.
    pub fn repair_binary_library_paths(&self, name: &str, version: &str) -> Result<u32, Error> {
        let keg_path = self.cellar.keg_path(name, version);
        let replacements = placeholder_replacements(self.context.paths.prefix(), &self.context.paths.cellar_dir());

        let mut corrupted = 0;
        for entry in walkdir::WalkDir::new(&keg_path).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Err(e) = relocate_file(entry.path(), &replacements) {
                eprintln!("warning: repair failed for '{}': {e}", entry.path().display());
                corrupted += 1;
            }
        }

        self.receipts.update(name, version, Utc::now(), |r| {
            r.corrupted_relocations = corrupted;
        })?;

        Ok(corrupted)
    }
}

/// Kahn's-algorithm order over a lockfile's `dependencies` edges, restricted
/// to the closure reachable from `root`, dependencies-first root-last (same
/// convention as [`velo_core::planner::plan_install_order`], reimplemented
/// here since the lockfile has no [`velo_core::graph::DependencyGraph`] to
/// build from). Any name in the closure missing from the lockfile is a
/// `LockfileDrift`, not a silent skip.
fn frozen_install_order(lockfile: &crate::manifest::Lockfile, root: &str) -> Result<Vec<String>, Error> {
    use std::collections::BTreeSet;

    if !lockfile.dependencies.contains_key(root) {
        return Err(Error::LockfileDrift { summary: vec![format!("{root} is not present in the lockfile")] });
    }

    let mut closure: BTreeSet<String> = BTreeSet::new();
    let mut stack = vec![root.to_string()];
    while let Some(name) = stack.pop() {
        if !closure.insert(name.clone()) {
            continue;
        }
        let Some(locked) = lockfile.dependencies.get(&name) else {
            return Err(Error::LockfileDrift {
                summary: vec![format!("{name} is required but not present in the lockfile")],
            });
        };
        for dep in locked.dependencies.keys() {
            stack.push(dep.clone());
        }
    }

    let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for name in &closure {
        let locked = &lockfile.dependencies[name];
        edges.insert(name.clone(), locked.dependencies.keys().cloned().collect());
    }

    // Outstanding-prerequisite count per node: a node's own dependency count
    // (out-degree in `edges`), not how many other nodes point to it. See
    // the matching note on `DependencyGraph::indegrees` in `velo_core::graph`.
    let mut indegree: BTreeMap<String, usize> =
        closure.iter().map(|n| (n.clone(), edges.get(n).map(|d| d.len()).unwrap_or(0))).collect();

    let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (name, deps) in &edges {
        for dep in deps {
            reverse.entry(dep.clone()).or_default().insert(name.clone());
        }
    }

    let mut ready: BTreeSet<String> =
        indegree.iter().filter(|(_, count)| **count == 0).map(|(name, _)| name.clone()).collect();
    let mut order = Vec::with_capacity(closure.len());

    while let Some(next) = ready.iter().next().cloned() {
        ready.remove(&next);
        order.push(next.clone());
        if let Some(dependents) = reverse.get(&next) {
            for dependent in dependents {
                if let Some(count) = indegree.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent.clone());
                    }
                }
            }
        }
    }

    if order.len() != closure.len() {
        return Err(Error::LockfileDrift {
            summary: vec!["lockfile contains a dependency cycle reachable from the requested package".to_string()],
        });
    }

    Ok(order)
}
