//! Filesystem helpers: private directories and legacy file retirement

use crate::error::{Error, Result};
use log::warn;
use std::path::{Path, PathBuf};

/// Ensure a directory exists and is accessible only by its owner (Unix: 0o700)
///
/// On other platforms the directory is only created.
///
/// # Errors
///
/// Returns `Error::DirectoryCreate` if creation fails, `Error::FileWrite` if
/// the permissions cannot be applied.
pub fn ensure_private_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|e| Error::DirectoryCreate {
        path: path.to_path_buf(),
        source: e,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
            Error::FileWrite {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
    }

    Ok(())
}

/// Rename a consumed legacy file to `<name>.migrated`.
///
/// Failure is logged and otherwise ignored.
pub fn retire_legacy_file(path: &Path) -> Option<PathBuf> {
    let mut name = path.as_os_str().to_os_string();
    name.push(".migrated");
    let target = PathBuf::from(name);

    match std::fs::rename(path, &target) {
        Ok(()) => Some(target),
        Err(e) => {
            warn!("Could not retire legacy file {}: {e}", path.display());
            None
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: PathBuf) -> PathBuf {
    if !path.starts_with("~") {
        return path;
    }
    match dirs::home_dir() {
        Some(home) => home.join(path.strip_prefix("~").unwrap_or(&path)),
        None => path,
    }
}
