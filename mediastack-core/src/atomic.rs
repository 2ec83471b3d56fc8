//! Atomic, owner-only file writes shared by the manifest and the ConfigStore.
//!
//! Write flow: `.tmp` sibling → `chmod 0600` → `rename`. The `.tmp` always lives
//! in the target's directory so the rename never crosses filesystems.

use std::path::{Path, PathBuf};

use crate::error::{io_err, StackError};

/// Create `dir` (mode `0700`) if it does not yet exist.
pub fn ensure_private_dir(dir: &Path) -> Result<(), StackError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

/// Atomically replace `path` with `contents`, readable by the owner only.
pub fn write_private(path: &Path, contents: &str) -> Result<(), StackError> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.tmp"))
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StackError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StackError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StackError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StackError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_private_cleans_up_tmp_and_sets_mode() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("riven.env");
        write_private(&path, "A=1\n").expect("write");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=1\n");
        assert!(!tmp_sibling(&path).exists(), ".tmp must be gone after save");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
            let dir_mode = std::fs::metadata(path.parent().unwrap())
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(dir_mode, 0o700);
        }
    }
}
