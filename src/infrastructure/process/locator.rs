use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::error::ShadowError;

/// Find the real package-manager executable on `search_path`.
///
/// Entries pointing at `shim_dir` are skipped so a shadowed binary never
/// resolves to its own forwarding shim. Search order is the PATH order.
pub fn find_real_bin(
    bin: &str,
    search_path: Option<&OsStr>,
    shim_dir: Option<&Path>,
) -> Result<PathBuf, ShadowError> {
    let entries: Vec<PathBuf> = search_path
        .map(|p| std::env::split_paths(p).collect())
        .unwrap_or_default();
    let searched: Vec<PathBuf> = entries
        .into_iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .filter(|dir| shim_dir.map_or(true, |shim| !same_dir(dir, shim)))
        .collect();

    let not_found = || ShadowError::ProcessNotFound {
        bin: bin.to_string(),
        searched: searched.len(),
    };
    if searched.is_empty() {
        return Err(not_found());
    }

    let joined: OsString = std::env::join_paths(&searched).map_err(|_| not_found())?;
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match which::which_in(bin, Some(joined), cwd) {
        Ok(found) => {
            debug!(bin, path = %found.display(), "located real binary");
            Ok(found)
        }
        Err(e) => {
            debug!(bin, error = %e, "real binary not found");
            Err(not_found())
        }
    }
}

/// Locate `bin` using the process's own `PATH`.
pub fn find_real_bin_in_env(bin: &str, shim_dir: Option<&Path>) -> Result<PathBuf, ShadowError> {
    let path = std::env::var_os("PATH");
    find_real_bin(bin, path.as_deref(), shim_dir)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn shim_directory_is_skipped() {
        let shim = tempfile::tempdir().unwrap();
        let real = tempfile::tempdir().unwrap();
        executable(shim.path(), "npm");
        let expected = executable(real.path(), "npm");

        let path = std::env::join_paths([shim.path(), real.path()]).unwrap();
        let found = find_real_bin("npm", Some(&path), Some(shim.path())).unwrap();
        assert_eq!(found.canonicalize().unwrap(), expected.canonicalize().unwrap());
    }

    #[test]
    fn first_match_in_path_order_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let expected = executable(first.path(), "npm");
        executable(second.path(), "npm");

        let path = std::env::join_paths([first.path(), second.path()]).unwrap();
        let found = find_real_bin("npm", Some(&path), None).unwrap();
        assert_eq!(found.canonicalize().unwrap(), expected.canonicalize().unwrap());
    }

    #[test]
    fn missing_binary_is_process_not_found() {
        let empty = tempfile::tempdir().unwrap();
        let path = std::env::join_paths([empty.path()]).unwrap();
        let err = find_real_bin("npm", Some(&path), None).unwrap_err();
        assert!(matches!(err, ShadowError::ProcessNotFound { ref bin, searched: 1 } if bin == "npm"));
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn only_shim_on_path_is_not_found() {
        let shim = tempfile::tempdir().unwrap();
        executable(shim.path(), "npm");
        let path = std::env::join_paths([shim.path()]).unwrap();
        let err = find_real_bin("npm", Some(&path), Some(shim.path())).unwrap_err();
        assert!(matches!(err, ShadowError::ProcessNotFound { searched: 0, .. }));
    }
}
