//! Hash-gated writer for the rendered compose file.
//!
//! 1. Normalise line endings.
//! 2. SHA-256 the rendered content and the file on disk.
//! 3. Skip if identical.
//! 4. Otherwise write `.tmp` (0600, it carries resolved secrets) and rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use mediastack_core::atomic::write_private;

use crate::error::{io_err, DeployError};

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Content changed or the file did not exist.
    Written { path: PathBuf },
    /// On-disk content already matches.
    Unchanged { path: PathBuf },
    /// Dry run: the file *would* have been written.
    WouldWrite { path: PathBuf },
}

impl WriteResult {
    pub fn changed(&self) -> bool {
        !matches!(self, WriteResult::Unchanged { .. })
    }
}

pub fn sha256_hex(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(content.as_bytes());
    hex::encode(h.finalize())
}

pub(crate) fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

/// Read `path`, or an empty string when it does not exist yet.
pub(crate) fn read_existing_or_empty(path: &Path) -> Result<String, DeployError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(normalize_line_endings(&content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Write `content` to `path` unless the file already holds it.
pub fn write_gated(path: &Path, content: &str, dry_run: bool) -> Result<WriteResult, DeployError> {
    let content = normalize_line_endings(content);
    let existing = read_existing_or_empty(path)?;

    if path.exists() && sha256_hex(&existing) == sha256_hex(&content) {
        tracing::debug!(path = %path.display(), "unchanged");
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }

    if dry_run {
        tracing::info!(path = %path.display(), "[dry-run] would write");
        return Ok(WriteResult::WouldWrite {
            path: path.to_path_buf(),
        });
    }

    write_private(path, &content)?;
    tracing::info!(path = %path.display(), "wrote");
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}
