//! On-disk layout under the mediastack root.
//!
//! ```text
//! <root>/                       (default ~/.mediastack, mode 0700)
//!   stack.yaml                  stack manifest (0600)
//!   host.yaml                   optional host configuration overrides
//!   config/<group>.env          ConfigStore files (0600)
//!   compose/docker-compose.yml  rendered compose file
//!   snapshots/<service>/<ts>.json
//!   templates/*.tera            optional overrides of the embedded templates
//!   run/mediastack.pid          run lock
//! ```

use std::path::{Path, PathBuf};

use crate::error::StackError;

pub const ROOT_ENV: &str = "MEDIASTACK_ROOT";
pub const MANIFEST_FILE: &str = "stack.yaml";
pub const HOST_CONFIG_FILE: &str = "host.yaml";
pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const LOCK_FILE: &str = "mediastack.pid";

/// Resolve the root: explicit flag, then `$MEDIASTACK_ROOT`, then `~/.mediastack`.
pub fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf, StackError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(env) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(env));
    }
    dirs::home_dir()
        .map(|home| home.join(".mediastack"))
        .ok_or(StackError::HomeNotFound)
}

pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE)
}

pub fn host_config_path(root: &Path) -> PathBuf {
    root.join(HOST_CONFIG_FILE)
}

pub fn config_dir(root: &Path) -> PathBuf {
    root.join("config")
}

pub fn compose_dir(root: &Path) -> PathBuf {
    root.join("compose")
}

pub fn compose_file_path(root: &Path) -> PathBuf {
    compose_dir(root).join(COMPOSE_FILE)
}

pub fn snapshots_dir(root: &Path) -> PathBuf {
    root.join("snapshots")
}

pub fn templates_dir(root: &Path) -> PathBuf {
    root.join("templates")
}

pub fn run_dir(root: &Path) -> PathBuf {
    root.join("run")
}

pub fn lock_path(root: &Path) -> PathBuf {
    run_dir(root).join(LOCK_FILE)
}
