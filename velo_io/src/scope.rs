//! Scope resolver (C12, spec §4.11): decides whether an install targets
//! the project-local prefix or the global one, by walking upward from the
//! current directory looking for a manifest file.

use std::path::{Path, PathBuf};
use velo_core::context::Paths;
use velo_core::Error;

pub const MANIFEST_FILE_NAME: &str = "velo.json";
pub const LOCKFILE_FILE_NAME: &str = "velo.lock.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectContext {
    pub project_root: PathBuf,
    pub manifest_path: PathBuf,
    pub lockfile_path: PathBuf,
}

/// Walks from `start` upward through its ancestors looking for
/// `velo.json`. Stops at `$HOME` (or the filesystem root, if `$HOME` isn't
/// an ancestor of `start`) without erroring — a caller that requires
/// project context maps `None` to [`Error::NotInProjectContext`].
pub fn project_context(start: &Path) -> Option<ProjectContext> {
    let home = std::env::var_os("HOME").map(PathBuf::from);

    for ancestor in start.ancestors() {
        let manifest_path = ancestor.join(MANIFEST_FILE_NAME);
        if manifest_path.is_file() {
            return Some(ProjectContext {
                project_root: ancestor.to_path_buf(),
                manifest_path,
                lockfile_path: ancestor.join(LOCKFILE_FILE_NAME),
            });
        }

        if let Some(home) = &home {
            if ancestor == home {
                break;
            }
        }
    }

    None
}

pub fn project_context_required(start: &Path) -> Result<ProjectContext, Error> {
    project_context(start).ok_or(Error::NotInProjectContext)
}

/// Selects which [`Paths`] layout an operation should use: the project's
/// local `.velo` prefix when `prefer_local` is true and a project was
/// found, otherwise the global `$HOME/.velo` prefix.
pub fn path_layout(start: &Path, prefer_local: bool) -> Result<Paths, Error> {
    if prefer_local {
        if let Some(ctx) = project_context(start) {
            return Ok(Paths::local(&ctx.project_root));
        }
    }

    Paths::global().ok_or(Error::ProcessError {
        cmd: "resolve global prefix".to_string(),
        code: None,
        detail: "$HOME is not set".to_string(),
    })
}
