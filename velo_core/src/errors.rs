use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    FormulaNotFound {
        name: String,
        suggestions: Vec<String>,
    },
    FormulaParseError {
        name: String,
        detail: String,
    },
    NoCompatibleBottle {
        name: String,
        available_platforms: Vec<String>,
    },
    BottleNotAccessible {
        url: String,
        reason: String,
    },
    DownloadFailed {
        name: String,
        cause: String,
    },
    IntegrityFailure {
        name: String,
        expected: String,
        actual: String,
    },
    ExtractionFailed {
        name: String,
        detail: String,
    },
    RelocationFailed {
        file: PathBuf,
        detail: String,
    },
    SymlinkConflict {
        target: PathBuf,
    },
    AlreadyInstalled {
        name: String,
        version: String,
    },
    NotInProjectContext,
    LockfileDrift {
        summary: Vec<String>,
    },
    InvalidTapName {
        spec: String,
    },
    ProcessError {
        cmd: String,
        code: Option<i32>,
        detail: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FormulaNotFound { name, suggestions } => {
                write!(f, "formula '{name}' not found")?;
                if !suggestions.is_empty() {
                    write!(f, "\n  did you mean: {}?", suggestions.join(", "))?;
                }
                write!(f, "\n  hint: check the tap is indexed and the name is spelled correctly")
            }
            Error::FormulaParseError { name, detail } => {
                write!(
                    f,
                    "failed to parse formula '{name}': {detail}\n  hint: the formula file may use an unsupported DSL construct"
                )
            }
            Error::NoCompatibleBottle {
                name,
                available_platforms,
            } => {
                write!(f, "no compatible bottle for formula '{name}' on this host")?;
                if !available_platforms.is_empty() {
                    write!(f, " (available for: {})", available_platforms.join(", "))?;
                }
                write!(f, "\n  hint: building from source is not supported by this installer")
            }
            Error::BottleNotAccessible { url, reason } => {
                write!(
                    f,
                    "bottle not accessible at '{url}': {reason}\n  hint: the registry may have removed this blob; try re-indexing the tap"
                )
            }
            Error::DownloadFailed { name, cause } => {
                write!(
                    f,
                    "download failed for '{name}': {cause}\n  hint: check your network connection and try again"
                )
            }
            Error::IntegrityFailure {
                name,
                expected,
                actual,
            } => {
                write!(f, "checksum verification failed for '{name}'")?;
                write!(f, "\n  expected: {expected}\n  got:      {actual}")?;
                write!(f, "\n  hint: this may indicate a corrupted download; try again")
            }
            Error::ExtractionFailed { name, detail } => {
                write!(
                    f,
                    "failed to extract archive for '{name}': {detail}\n  hint: the downloaded bottle may be corrupted"
                )
            }
            Error::RelocationFailed { file, detail } => {
                write!(
                    f,
                    "failed to relocate '{}': {detail}\n  hint: run repair after install to retry this file",
                    file.display()
                )
            }
            Error::SymlinkConflict { target } => {
                write!(
                    f,
                    "cannot link '{}' (a non-symlink already exists there)\n  hint: remove the existing file or re-run with force",
                    target.display()
                )
            }
            Error::AlreadyInstalled { name, version } => {
                write!(
                    f,
                    "'{name}' {version} is already installed\n  hint: re-run with force to reinstall"
                )
            }
            Error::NotInProjectContext => {
                write!(
                    f,
                    "no project manifest found in this directory or any parent\n  hint: create one or pass an explicit global scope"
                )
            }
            Error::LockfileDrift { summary } => {
                write!(f, "lockfile verification failed:")?;
                for line in summary {
                    write!(f, "\n  - {line}")?;
                }
                write!(f, "\n  hint: re-run install without --frozen to update the lockfile")
            }
            Error::InvalidTapName { spec } => {
                write!(
                    f,
                    "invalid tap name '{spec}'\n  hint: tap names must look like 'org/repo'"
                )
            }
            Error::ProcessError { cmd, code, detail } => {
                write!(f, "command '{cmd}' failed")?;
                if let Some(code) = code {
                    write!(f, " (exit code {code})")?;
                }
                write!(f, ": {detail}")
            }
        }
    }
}

impl std::error::Error for Error {}
