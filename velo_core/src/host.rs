//! Host identity: architecture and OS major version, read once at startup.
//!
//! Per the design notes, this snapshot is immutable for the lifetime of a
//! run and is one of only two pieces of global state the core relies on
//! (the other being the [`crate::context::Paths`] singleton).

use crate::Error;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Arm64,
    X86_64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostIdentity {
    pub arch: Arch,
    pub os_major: u32,
}

impl HostIdentity {
    /// Construct an arbitrary identity, for tests that must not depend on
    /// the real host.
    pub fn with_values(arch: Arch, os_major: u32) -> Self {
        HostIdentity { arch, os_major }
    }

    /// Read the current host's architecture and OS major version.
    ///
    /// Architecture comes from `std::env::consts::ARCH`; the OS major
    /// version is obtained by shelling out to `sw_vers`, since no portable
    /// standard-library API exposes it.
    pub fn current() -> Result<Self, Error> {
        let arch = match std::env::consts::ARCH {
            "aarch64" => Arch::Arm64,
            "x86_64" => Arch::X86_64,
            other => {
                return Err(Error::ProcessError {
                    cmd: "host identity detection".to_string(),
                    code: None,
                    detail: format!("unsupported architecture '{other}'"),
                });
            }
        };

        let os_major = read_os_major()?;

        Ok(HostIdentity { arch, os_major })
    }
}

fn read_os_major() -> Result<u32, Error> {
    let output = Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .map_err(|e| Error::ProcessError {
            cmd: "sw_vers -productVersion".to_string(),
            code: None,
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::ProcessError {
            cmd: "sw_vers -productVersion".to_string(),
            code: output.status.code(),
            detail: "non-zero exit status".to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let major = stdout
        .trim()
        .split('.')
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| Error::ProcessError {
            cmd: "sw_vers -productVersion".to_string(),
            code: None,
            detail: format!("could not parse OS major version from '{}'", stdout.trim()),
        })?;

    Ok(major)
}
