//! Environment-file configuration store, one file per service group.
//!
//! `<root>/config/<group>.env` holds `KEY=value` lines. Every call re-reads the
//! file, so edits made by hand (or by another process) between calls are
//! always observed. Writes are atomic and owner-only.

use std::path::{Path, PathBuf};

use crate::atomic::write_private;
use crate::error::{io_err, StackError};
use crate::paths::config_dir;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Store rooted at `<root>/config/`.
    pub fn at(root: &Path) -> Self {
        Self {
            dir: config_dir(root),
        }
    }

    /// Store using `dir` directly as the directory of `.env` files.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<group>.env`
    pub fn file_path(&self, group: &str) -> PathBuf {
        self.dir.join(format!("{group}.env"))
    }

    /// Value of `key` in `group`, or `None` when the file or the key is absent.
    pub fn get(&self, group: &str, key: &str) -> Result<Option<String>, StackError> {
        let Some(contents) = self.read(group)? else {
            return Ok(None);
        };
        Ok(contents
            .lines()
            .filter_map(parse_line)
            .filter(|(k, _)| *k == key)
            .last()
            .map(|(_, v)| v))
    }

    /// Upsert: replace the value in place if `key` exists, else append.
    ///
    /// Comments, blank lines and unrelated keys are preserved verbatim.
    pub fn set(&self, group: &str, key: &str, value: &str) -> Result<(), StackError> {
        validate_key(key)?;
        if value.contains('\n') {
            return Err(StackError::Validation {
                key: key.to_string(),
                reason: "value must be a single line".to_string(),
            });
        }

        let contents = self.read(group)?.unwrap_or_default();
        let line = format!("{key}={}", quote(value));
        let mut replaced = false;
        let mut lines: Vec<String> = Vec::new();
        for existing in contents.lines() {
            match parse_line(existing) {
                Some((k, _)) if k == key => {
                    // Collapse duplicate keys onto the first occurrence.
                    if !replaced {
                        lines.push(line.clone());
                        replaced = true;
                    }
                }
                _ => lines.push(existing.to_string()),
            }
        }
        if !replaced {
            lines.push(line);
        }

        let mut out = lines.join("\n");
        out.push('\n');
        write_private(&self.file_path(group), &out)?;
        tracing::debug!(group, key, "config value stored");
        Ok(())
    }

    /// Remove `key` from `group`. Returns `true` if it was present.
    pub fn remove(&self, group: &str, key: &str) -> Result<bool, StackError> {
        let Some(contents) = self.read(group)? else {
            return Ok(false);
        };
        let mut removed = false;
        let kept: Vec<&str> = contents
            .lines()
            .filter(|line| match parse_line(line) {
                Some((k, _)) if k == key => {
                    removed = true;
                    false
                }
                _ => true,
            })
            .collect();
        if removed {
            let mut out = kept.join("\n");
            out.push('\n');
            write_private(&self.file_path(group), &out)?;
        }
        Ok(removed)
    }

    /// All `(key, value)` pairs of `group`, in file order.
    pub fn entries(&self, group: &str) -> Result<Vec<(String, String)>, StackError> {
        Ok(self
            .read(group)?
            .map(|contents| {
                contents
                    .lines()
                    .filter_map(parse_line)
                    .map(|(k, v)| (k.to_string(), v))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Names of all groups that have a file, sorted.
    pub fn groups(&self) -> Result<Vec<String>, StackError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut groups: Vec<String> = std::fs::read_dir(&self.dir)
            .map_err(|e| io_err(&self.dir, e))?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".env").map(str::to_string)
            })
            .collect();
        groups.sort();
        Ok(groups)
    }

    fn read(&self, group: &str) -> Result<Option<String>, StackError> {
        let path = self.file_path(group);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path, e)),
        }
    }
}

/// `KEY=value` → `(KEY, value)`; comments, blanks and malformed lines → `None`.
fn parse_line(line: &str) -> Option<(&str, String)> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, unquote(value.trim())))
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 {
        if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
            return inner.replace("\\\"", "\"").replace("\\\\", "\\");
        }
        if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
            return inner.to_string();
        }
    }
    value.to_string()
}

fn quote(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '#' | '$' | '\\'));
    if needs_quotes {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn validate_key(key: &str) -> Result<(), StackError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !key.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StackError::Validation {
            key: key.to_string(),
            reason: "keys must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
        })
    }
}
