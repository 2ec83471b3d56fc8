//! Unified diffs for `mediastack diff` and settings snapshots.

use std::path::{Path, PathBuf};

use similar::TextDiff;

use crate::error::DeployError;
use crate::writer::{normalize_line_endings, read_existing_or_empty};

/// A pending change to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

/// Compare `rendered` with what is on disk at `path`. `None` when identical.
/// `label` is used in the `a/` and `b/` headers.
pub fn diff_file(path: &Path, label: &str, rendered: &str) -> Result<Option<FileDiff>, DeployError> {
    let rendered = normalize_line_endings(rendered);
    let existing = read_existing_or_empty(path)?;
    if existing == rendered {
        return Ok(None);
    }
    Ok(Some(FileDiff {
        path: path.to_path_buf(),
        unified_diff: unified(&existing, &rendered, label),
    }))
}

/// Unified diff of two texts with three lines of context.
pub fn unified(old: &str, new: &str, label: &str) -> String {
    let old_header = format!("a/{label}");
    let new_header = format!("b/{label}");
    TextDiff::from_lines(old, new)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

/// Diff of two JSON documents, pretty-printed so each key sits on its own line.
pub fn json_diff(
    before: &serde_json::Value,
    after: &serde_json::Value,
    label: &str,
) -> Result<String, DeployError> {
    let old = serde_json::to_string_pretty(before)? + "\n";
    let new = serde_json::to_string_pretty(after)? + "\n";
    if old == new {
        return Ok(String::new());
    }
    Ok(unified(&old, &new, label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_file_has_no_diff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        std::fs::write(&path, "name: stack\n").unwrap();
        assert!(diff_file(&path, "docker-compose.yml", "name: stack\n")
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_file_diffs_against_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        let diff = diff_file(&path, "docker-compose.yml", "name: stack\n")
            .unwrap()
            .unwrap();
        assert!(diff.unified_diff.contains("--- a/docker-compose.yml"));
        assert!(diff.unified_diff.contains("+name: stack"));
    }

    #[test]
    fn json_diff_shows_changed_key_only() {
        let before = json!({"downloaders": {"real_debrid": {"enabled": false}}, "debug": true});
        let after = json!({"downloaders": {"real_debrid": {"enabled": true}}, "debug": true});
        let diff = json_diff(&before, &after, "riven").unwrap();
        assert!(diff.contains("-      \"enabled\": false"));
        assert!(diff.contains("+      \"enabled\": true"));
        assert!(!diff.contains("-  \"debug\""));
        assert!(json_diff(&before, &before, "riven").unwrap().is_empty());
    }
}
