use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::error::ShadowError;

/// Set in the environment of every shadowed child; its presence means the
/// current process already runs behind a shim.
pub const SHADOW_ACTIVE_ENV: &str = "SOCKET_SHADOW_ACTIVE";

/// How later invocations get routed through the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimStrategy {
    /// Write a forwarding script into a controlled directory and put that
    /// directory first on `PATH`.
    PathPrepend,
    /// Write an explicit `.cmd` forwarding shim, for platforms whose PATH
    /// precedence cannot be relied on.
    ShimFile,
}

impl ShimStrategy {
    pub fn for_platform() -> Self {
        if cfg!(windows) {
            ShimStrategy::ShimFile
        } else {
            ShimStrategy::PathPrepend
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShimOptions {
    pub dir: PathBuf,
    pub strategy: ShimStrategy,
    /// Harness executable the shim forwards to.
    pub harness: PathBuf,
    /// `PATH` the shim is installed against.
    pub current_path: Option<OsString>,
    /// Whether `SOCKET_SHADOW_ACTIVE` is set.
    pub active: bool,
}

impl ShimOptions {
    /// Options for the running process: its own executable, `PATH` and
    /// shadow marker.
    pub fn from_env(dir: PathBuf) -> std::io::Result<Self> {
        Ok(Self {
            dir,
            strategy: ShimStrategy::for_platform(),
            harness: std::env::current_exe()?,
            current_path: std::env::var_os("PATH"),
            active: std::env::var_os(SHADOW_ACTIVE_ENV).is_some(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShimOutcome {
    /// Already behind a shim; nothing was touched.
    AlreadyShadowed,
    Installed {
        path: PathBuf,
        /// `PATH` to export for `PathPrepend`.
        new_path: Option<OsString>,
        /// `false` when an identical shim was already on disk.
        written: bool,
    },
}

/// Idempotently install a forwarding shim for `bin`.
pub fn install_shim(bin: &str, options: &ShimOptions) -> Result<ShimOutcome, ShadowError> {
    if options.active || path_starts_with(options.current_path.as_deref(), &options.dir) {
        debug!(bin, "already shadowed; skipping shim install");
        return Ok(ShimOutcome::AlreadyShadowed);
    }

    let (file_name, content) = match options.strategy {
        ShimStrategy::PathPrepend => (bin.to_string(), posix_script(bin, &options.harness)),
        ShimStrategy::ShimFile => (format!("{bin}.cmd"), cmd_script(bin, &options.harness)),
    };
    let path = options.dir.join(file_name);
    let shim_err = |source: std::io::Error| ShadowError::ShimInstall {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(&options.dir).map_err(|source| ShadowError::ShimInstall {
        path: options.dir.clone(),
        source,
    })?;

    let written = match std::fs::read_to_string(&path) {
        Ok(existing) if existing == content => false,
        _ => {
            std::fs::write(&path, &content).map_err(shim_err)?;
            make_executable(&path).map_err(shim_err)?;
            true
        }
    };
    if written {
        info!(bin, path = %path.display(), "installed forwarding shim");
    }

    let new_path = match options.strategy {
        ShimStrategy::PathPrepend => {
            let mut entries = vec![options.dir.clone()];
            if let Some(current) = options.current_path.as_deref() {
                entries.extend(std::env::split_paths(current));
            }
            Some(std::env::join_paths(entries).map_err(|e| {
                shim_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
            })?)
        }
        ShimStrategy::ShimFile => None,
    };

    Ok(ShimOutcome::Installed {
        path,
        new_path,
        written,
    })
}

fn path_starts_with(path: Option<&OsStr>, dir: &Path) -> bool {
    path.and_then(|p| std::env::split_paths(p).next())
        .is_some_and(|head| head == dir)
}

fn posix_script(bin: &str, harness: &Path) -> String {
    format!(
        "#!/bin/sh\n# forwarding shim for {bin}\nexec \"{}\" shadow {bin} \"$@\"\n",
        harness.display()
    )
}

fn cmd_script(bin: &str, harness: &Path) -> String {
    format!(
        "@echo off\r\nrem forwarding shim for {bin}\r\n\"{}\" shadow {bin} %*\r\n",
        harness.display()
    )
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
