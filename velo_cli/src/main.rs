//! velo - thin exerciser binary for the install/plan/verify pipeline.
//!
//! Kept intentionally minimal (no bundle/services/doctor surface), in the
//! same spirit as the teacher's `zb_cli` but scoped down to what
//! `velo_core`/`velo_io` actually implement.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use velo_core::context::Context;
use velo_core::host::HostIdentity;
use velo_io::manifest::Lockfile;
use velo_io::scope::{self, MANIFEST_FILE_NAME};
use velo_io::tap::TapIndex;
use velo_io::traits::ReqwestHttpClient;
use velo_io::Installer;

#[derive(Parser)]
#[command(name = "velo")]
#[command(about = "Per-user package manager for the Homebrew bottle ecosystem")]
#[command(version)]
struct Cli {
    /// Tap to resolve formulas from (owner/repo)
    #[arg(long, default_value = "homebrew/core")]
    tap: String,

    /// Bottle registry base URL
    #[arg(long, default_value = "https://ghcr.io")]
    registry: String,

    /// Registry namespace the formula's bottles are published under
    #[arg(long, default_value = "homebrew")]
    namespace: String,

    /// Use the project-local `.velo` prefix instead of `$HOME/.velo`
    #[arg(long)]
    local: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and print the dependency-ordered install plan for a formula
    Plan { formula: String },

    /// Install a formula and its unsatisfied runtime dependencies
    Install {
        formula: String,

        /// Reinstall even if already present
        #[arg(long)]
        force: bool,

        /// Skip creating bin/ symlinks
        #[arg(long)]
        no_link: bool,

        /// Install exactly the versions pinned in the project lockfile
        /// instead of resolving against the tap
        #[arg(long)]
        frozen: bool,
    },

    /// Check an installed formula's receipt against what's on disk
    Verify { formula: String },

    /// Remove every installed version of a formula
    Uninstall { formula: String },

    /// Remove cached bottles no longer referenced by any receipt, stale
    /// temp files, and orphaned per-package lock files
    Cleanup,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), velo_core::Error> {
    let cwd = std::env::current_dir().map_err(|e| velo_core::Error::ProcessError {
        cmd: "current_dir".to_string(),
        code: None,
        detail: e.to_string(),
    })?;
    let paths = scope::path_layout(&cwd, cli.local)?;
    paths.ensure_directories().map_err(|e| velo_core::Error::ExtractionFailed {
        name: paths.prefix().display().to_string(),
        detail: e.to_string(),
    })?;

    if cli.local && scope::project_context(&cwd).is_none() {
        eprintln!("note: no {MANIFEST_FILE_NAME} found above {}; using global prefix", cwd.display());
    }

    let host = HostIdentity::current()?;
    let context = Context::new(paths, host);
    let tap_index = TapIndex::new(context.paths.taps_dir());
    let http = Arc::new(ReqwestHttpClient::new());
    let installer = Installer::new(context, tap_index, http, cli.registry, cli.namespace)?;

    match cli.command {
        Commands::Plan { formula } => run_plan(&installer, &cli.tap, &formula),
        Commands::Install { formula, force, no_link, frozen } => {
            if frozen {
                run_install_frozen(&installer, &cwd, &formula, force, !no_link).await
            } else {
                run_install(&installer, &cli.tap, &formula, force, !no_link).await
            }
        }
        Commands::Verify { formula } => run_verify(&installer, &formula),
        Commands::Uninstall { formula } => run_uninstall(&installer, &formula),
        Commands::Cleanup => run_cleanup(&installer),
    }
}

fn run_plan<H: velo_io::traits::HttpClient + 'static>(
    installer: &Installer<H>,
    tap: &str,
    formula: &str,
) -> Result<(), velo_core::Error> {
    let (plan, formulas, resolution) = installer.plan(tap, formula)?;
    println!("install order for {formula} ({} package(s)):", plan.len());
    for name in &plan.order {
        let version = formulas.get(name).map(|f| f.version.as_str()).unwrap_or("?");
        let status = match resolution.equivalent_installed_name(name) {
            Some(installed) if installed == name => "installed",
            Some(_) => "installed (version slot)",
            None => "new",
        };
        println!("  {name} {version} [{status}]");
    }
    Ok(())
}

async fn run_install<H: velo_io::traits::HttpClient + 'static>(
    installer: &Installer<H>,
    tap: &str,
    formula: &str,
    force: bool,
    create_symlinks: bool,
) -> Result<(), velo_core::Error> {
    println!("==> installing {formula}");
    let installed = installer.install(tap, formula, force, create_symlinks, None).await?;

    if installed.is_empty() {
        println!("{formula} is already installed");
        return Ok(());
    }

    for pkg in &installed {
        println!("==> installed {} {}", pkg.name, pkg.version);
        if pkg.receipt.corrupted_relocations > 0 {
            println!(
                "    warning: {} file(s) could not be relocated; run `velo verify {}`",
                pkg.receipt.corrupted_relocations, pkg.name
            );
        }
    }
    Ok(())
}

/// Installs exactly the versions pinned in the project lockfile (spec
/// §4.10, scenario S5) instead of resolving against the tap.
async fn run_install_frozen<H: velo_io::traits::HttpClient + 'static>(
    installer: &Installer<H>,
    cwd: &std::path::Path,
    formula: &str,
    force: bool,
    create_symlinks: bool,
) -> Result<(), velo_core::Error> {
    let project = scope::project_context_required(cwd)?;
    let lockfile = Lockfile::load(&project.lockfile_path)?;

    println!("==> installing {formula} (frozen)");
    let installed = installer.install_frozen(&lockfile, formula, force, create_symlinks, None).await?;

    if installed.is_empty() {
        println!("{formula} is already installed at its locked version");
        return Ok(());
    }

    for pkg in &installed {
        println!("==> installed {} {} (locked)", pkg.name, pkg.version);
    }
    Ok(())
}

fn run_verify<H: velo_io::traits::HttpClient + 'static>(
    installer: &Installer<H>,
    formula: &str,
) -> Result<(), velo_core::Error> {
    let issues = installer.verify_installation(formula)?;
    if issues.is_empty() {
        println!("{formula}: ok");
    } else {
        for issue in &issues {
            println!("{issue}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_uninstall<H: velo_io::traits::HttpClient + 'static>(
    installer: &Installer<H>,
    formula: &str,
) -> Result<(), velo_core::Error> {
    println!("==> uninstalling {formula}");
    installer.uninstall(formula)?;
    println!("==> uninstalled {formula}");
    Ok(())
}

fn run_cleanup<H: velo_io::traits::HttpClient + 'static>(installer: &Installer<H>) -> Result<(), velo_core::Error> {
    let report = installer.cleanup()?;
    if report.blobs_removed == 0 && report.temp_files_removed == 0 && report.locks_removed == 0 {
        println!("nothing to clean up");
        return Ok(());
    }
    println!("==> cleaned up:");
    if report.blobs_removed > 0 {
        println!("  {} unreferenced cached bottle(s)", report.blobs_removed);
    }
    if report.temp_files_removed > 0 {
        println!("  {} stale temp file(s)", report.temp_files_removed);
    }
    if report.locks_removed > 0 {
        println!("  {} orphaned lock file(s)", report.locks_removed);
    }
    Ok(())
}
