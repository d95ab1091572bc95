//! Filesystem and network I/O for the install pipeline: everything that
//! touches a socket or disk lives here, behind the mockable traits in
//! [`traits`] so the core algorithms in `velo_core` stay pure.

pub mod cache;
pub mod extract;
pub mod installer;
pub mod lock;
pub mod manifest;
pub mod progress;
pub mod receipt;
pub mod registry;
pub mod relocate;
pub mod scope;
pub mod tap;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod traits;

pub use installer::{CleanupReport, Installer, InstalledPackage};
