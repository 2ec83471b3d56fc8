//! Parser for `/proc/self/mountinfo`.
//!
//! ```text
//! 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 shared:7 - ext3 /dev/root rw
//! (1)(2)(3)   (4)   (5)      (6)      (7)           (8) (9)   (10)     (11)
//! ```
//!
//! Field 7 is zero or more optional tags terminated by `-`. Propagation is
//! read from them: `shared:N` means shared, `master:N` means slave.

use std::path::{Path, PathBuf};

use mediastack_core::types::Propagation;

use crate::error::{io_err, HostError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_id: u32,
    pub parent_id: u32,
    pub root: String,
    pub mount_point: PathBuf,
    pub options: String,
    pub optional: Vec<String>,
    pub fs_type: String,
    pub source: String,
}

impl MountEntry {
    pub fn is_shared(&self) -> bool {
        self.optional.iter().any(|t| t.starts_with("shared:"))
    }

    pub fn is_slave(&self) -> bool {
        self.optional.iter().any(|t| t.starts_with("master:"))
    }

    /// Whether this entry already carries the requested propagation.
    pub fn satisfies(&self, propagation: Propagation) -> bool {
        match propagation {
            Propagation::Shared | Propagation::Rshared => self.is_shared(),
            Propagation::Rslave => self.is_slave() && !self.is_shared(),
        }
    }
}

/// Parse the whole table. Malformed lines are reported, not skipped.
pub fn parse(contents: &str) -> Result<Vec<MountEntry>, HostError> {
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_line)
        .collect()
}

pub fn read(path: &Path) -> Result<Vec<MountEntry>, HostError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse(&contents)
}

/// Topmost mount at exactly `path` (later entries shadow earlier ones).
pub fn find<'a>(entries: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    entries.iter().rev().find(|e| e.mount_point == path)
}

/// Whether `path` is a mount point carrying `propagation`. The recursive
/// modes also require it of every mount below `path`.
pub fn holds(entries: &[MountEntry], path: &Path, propagation: Propagation) -> bool {
    let Some(top) = find(entries, path) else {
        return false;
    };
    if !top.satisfies(propagation) {
        return false;
    }
    match propagation {
        Propagation::Shared => true,
        Propagation::Rshared | Propagation::Rslave => entries
            .iter()
            .filter(|e| e.mount_point != path && e.mount_point.starts_with(path))
            .all(|e| e.satisfies(propagation)),
    }
}

fn parse_line(line: &str) -> Result<MountEntry, HostError> {
    let malformed = |reason: &str| HostError::Malformed {
        what: "mountinfo line".to_string(),
        reason: format!("{reason}: {line}"),
    };

    let (head, tail) = line
        .split_once(" - ")
        .ok_or_else(|| malformed("missing separator"))?;
    let mut fields = head.split_whitespace();
    let mount_id = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| malformed("bad mount id"))?;
    let parent_id = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| malformed("bad parent id"))?;
    let _dev = fields.next().ok_or_else(|| malformed("missing device"))?;
    let root = fields.next().ok_or_else(|| malformed("missing root"))?;
    let mount_point = fields.next().ok_or_else(|| malformed("missing mount point"))?;
    let options = fields.next().ok_or_else(|| malformed("missing options"))?;
    let optional = fields.map(str::to_string).collect();

    let mut tail = tail.split_whitespace();
    let fs_type = tail.next().ok_or_else(|| malformed("missing fs type"))?;
    let source = tail.next().unwrap_or_default();

    Ok(MountEntry {
        mount_id,
        parent_id,
        root: unescape(root),
        mount_point: PathBuf::from(unescape(mount_point)),
        options: options.to_string(),
        optional,
        fs_type: fs_type.to_string(),
        source: unescape(source),
    })
}

/// Undo the kernel's octal escaping (`\040` space, `\011` tab, `\012`
/// newline, `\134` backslash).
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
