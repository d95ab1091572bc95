//! Install progress events (part of C9, spec §9: capability-set observers).
//!
//! Grounded in the teacher's `progress.rs`/`install/executor.rs` call
//! sites (`InstallProgress`, `ProgressCallback`): a plain enum plus a
//! `dyn Fn` callback, rather than an observer trait object hierarchy — the
//! event set is closed and small enough that dynamic dispatch over a
//! single function type is simpler than a trait.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    DownloadStarted { name: String },
    DownloadProgress { name: String, bytes: u64, total: Option<u64> },
    DownloadCompleted { name: String },
    UnpackStarted { name: String },
    UnpackCompleted { name: String },
    RelocateStarted { name: String },
    RelocateCompleted { name: String, corrupted_relocations: u32 },
    LinkStarted { name: String },
    LinkCompleted { name: String },
}

pub type ProgressCallback = dyn Fn(ProgressEvent) + Send + Sync;

/// Invokes `callback` with `event` if one was supplied; a no-op otherwise.
pub fn report(callback: &Option<Arc<ProgressCallback>>, event: ProgressEvent) {
    if let Some(cb) = callback {
        cb(event);
    }
}
