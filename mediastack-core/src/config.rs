//! Host configuration (`<root>/host.yaml`).
//!
//! Every field has a default matching a stock Debian host, so the file is
//! optional and may override only what differs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StackError};
use crate::paths::host_config_path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Container engine binary.
    pub docker_bin: String,
    /// Mount table consulted by the MountPreparer.
    pub mountinfo_path: PathBuf,
    /// Where managed systemd units are written.
    pub systemd_unit_dir: PathBuf,
    /// Unit of the container engine that mounts must precede.
    pub engine_unit: String,
    pub fuse_conf_path: PathBuf,
    pub os_release_path: PathBuf,
    /// Timeout for admin API calls, in milliseconds.
    pub http_timeout_ms: u64,
    /// Attempts for image pulls before a service is marked failed.
    pub pull_attempts: u32,
    pub apt: AptConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            mountinfo_path: PathBuf::from("/proc/self/mountinfo"),
            systemd_unit_dir: PathBuf::from("/etc/systemd/system"),
            engine_unit: "docker.service".to_string(),
            fuse_conf_path: PathBuf::from("/etc/fuse.conf"),
            os_release_path: PathBuf::from("/etc/os-release"),
            http_timeout_ms: 10_000,
            pull_attempts: 3,
            apt: AptConfig::default(),
        }
    }
}

/// Runtime engine packages and their apt repository registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AptConfig {
    pub packages: Vec<String>,
    /// Base name of the `sources.list.d` entry.
    pub repository_name: String,
    pub repository_url: String,
    pub component: String,
    pub key_url: String,
    pub keyring_path: PathBuf,
    pub sources_dir: PathBuf,
}

impl Default for AptConfig {
    fn default() -> Self {
        Self {
            packages: vec![
                "docker-ce".to_string(),
                "docker-ce-cli".to_string(),
                "containerd.io".to_string(),
                "docker-compose-plugin".to_string(),
                "fuse3".to_string(),
            ],
            repository_name: "docker".to_string(),
            repository_url: "https://download.docker.com/linux/debian".to_string(),
            component: "stable".to_string(),
            key_url: "https://download.docker.com/linux/debian/gpg".to_string(),
            keyring_path: PathBuf::from("/etc/apt/keyrings/docker.asc"),
            sources_dir: PathBuf::from("/etc/apt/sources.list.d"),
        }
    }
}

impl HostConfig {
    /// Load `<root>/host.yaml`, falling back to defaults when it is absent.
    pub fn load_at(root: &Path) -> Result<Self, StackError> {
        let path = host_config_path(root);
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                serde_yaml::from_str(&contents).map_err(|e| StackError::Parse { path, source: e })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(io_err(path, e)),
        }
    }
}
