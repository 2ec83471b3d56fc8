//! Host facts: distribution and architecture.
//!
//! `detect` reads `/etc/os-release` and asks dpkg for the architecture. The
//! apt repository line is built from these.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::command::{argv, CommandRunner};
use crate::error::{io_err, HostError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFacts {
    /// `ID`, e.g. `debian`.
    pub id: String,
    /// `ID_LIKE` entries, e.g. `["debian"]` on Ubuntu.
    pub id_like: Vec<String>,
    /// `VERSION_CODENAME`, e.g. `bookworm`.
    pub codename: String,
    pub pretty_name: String,
    /// dpkg architecture, e.g. `amd64`.
    pub architecture: String,
}

impl HostFacts {
    /// Debian or a Debian derivative.
    pub fn is_debian_family(&self) -> bool {
        self.id == "debian" || self.id_like.iter().any(|l| l == "debian")
    }
}

/// Parse `KEY=value` / `KEY="value"` lines of os-release.
pub fn parse_os_release(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

pub fn detect(runner: &impl CommandRunner, os_release: &Path) -> Result<HostFacts, HostError> {
    let contents = fs::read_to_string(os_release).map_err(|e| io_err(os_release, e))?;
    let fields = parse_os_release(&contents);
    let get = |key: &str| fields.get(key).cloned().unwrap_or_default();

    let id = get("ID");
    if id.is_empty() {
        return Err(HostError::Malformed {
            what: os_release.display().to_string(),
            reason: "no ID field".to_string(),
        });
    }

    let arch = runner.run_checked("dpkg", &argv(&["--print-architecture"]))?;
    Ok(HostFacts {
        id,
        id_like: get("ID_LIKE").split_whitespace().map(str::to_string).collect(),
        codename: get("VERSION_CODENAME"),
        pretty_name: get("PRETTY_NAME"),
        architecture: arch.stdout.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;

    struct Arch;

    impl CommandRunner for Arch {
        fn run(&self, _program: &str, _args: &[String]) -> Result<CommandOutput, HostError> {
            Ok(CommandOutput::ok("arm64\n"))
        }
    }

    #[test]
    fn detects_ubuntu_as_debian_family() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("os-release");
        fs::write(
            &path,
            "PRETTY_NAME=\"Ubuntu 24.04 LTS\"\nID=ubuntu\nID_LIKE=debian\nVERSION_CODENAME=noble\n",
        )
        .unwrap();
        let facts = detect(&Arch, &path).unwrap();
        assert_eq!(facts.id, "ubuntu");
        assert_eq!(facts.codename, "noble");
        assert_eq!(facts.architecture, "arm64");
        assert_eq!(facts.pretty_name, "Ubuntu 24.04 LTS");
        assert!(facts.is_debian_family());
    }

    #[test]
    fn missing_id_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("os-release");
        fs::write(&path, "NAME=Mystery\n").unwrap();
        assert!(matches!(
            detect(&Arch, &path),
            Err(HostError::Malformed { .. })
        ));
    }
}
