//! `user_allow_other` in fuse.conf, required for rclone's `--allow-other`.

use std::fs;
use std::path::Path;

use crate::error::{io_err, HostError};

const OPTION: &str = "user_allow_other";

/// Ensure `user_allow_other` is enabled, uncommenting it if present as a
/// comment and appending it otherwise. Returns `true` when the file changed.
pub fn ensure_user_allow_other(path: &Path) -> Result<bool, HostError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(io_err(path, e)),
    };

    if contents.lines().any(|l| l.trim() == OPTION) {
        return Ok(false);
    }

    let mut uncommented = false;
    let mut lines: Vec<String> = contents
        .lines()
        .map(|line| {
            let stripped = line.trim_start().trim_start_matches('#').trim();
            if !uncommented && stripped == OPTION {
                uncommented = true;
                OPTION.to_string()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !uncommented {
        lines.push(OPTION.to_string());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(path, out).map_err(|e| io_err(path, e))?;
    tracing::info!(path = %path.display(), "enabled {OPTION}");
    Ok(true)
}
