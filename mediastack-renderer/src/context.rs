//! Template contexts: serializable rendering payloads for each template.

use std::path::Path;

use serde::{Deserialize, Serialize};

use mediastack_core::types::MountSpec;

use crate::error::RenderError;

/// Prefix shared by every managed systemd unit.
pub const UNIT_PREFIX: &str = "mediastack-mount-";

/// Payload for the per-mount oneshot unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountUnitCtx {
    pub unit_name: String,
    pub path: String,
    pub propagation: String,
    pub flag: String,
    /// Container engine unit the mount must precede.
    pub engine_unit: String,
    pub version: String,
}

/// Payload for the container engine drop-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDropInCtx {
    pub engine_unit: String,
    pub units: Vec<String>,
    pub version: String,
}

/// Payload for the default `stack.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultStackCtx {
    pub project: String,
    pub network: String,
    /// Shared mount where rclone exposes the debrid library.
    pub media_mount: String,
    /// Directory of symlinks that Plex scans.
    pub library_path: String,
    /// Parent of every service's persistent data directory.
    pub data_root: String,
    pub timezone: String,
    pub version: String,
}

impl Default for DefaultStackCtx {
    fn default() -> Self {
        Self {
            project: "mediastack".to_string(),
            network: "mediastack".to_string(),
            media_mount: "/mnt/zurg".to_string(),
            library_path: "/mnt/library".to_string(),
            data_root: "/opt/mediastack".to_string(),
            timezone: "Etc/UTC".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl MountUnitCtx {
    pub fn from_mount(mount: &MountSpec, engine_unit: &str) -> Self {
        MountUnitCtx {
            unit_name: unit_name_for(&mount.host_path),
            path: mount.host_path.display().to_string(),
            propagation: mount.propagation.to_string(),
            flag: mount.propagation.mount_flag().to_string(),
            engine_unit: engine_unit.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl EngineDropInCtx {
    pub fn new(engine_unit: &str, mounts: &[MountSpec]) -> Self {
        EngineDropInCtx {
            engine_unit: engine_unit.to_string(),
            units: mounts.iter().map(|m| unit_name_for(&m.host_path)).collect(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// `/mnt/zurg` → `mediastack-mount-mnt-zurg.service`.
pub fn unit_name_for(path: &Path) -> String {
    let slug: String = path
        .to_string_lossy()
        .trim_matches('/')
        .chars()
        .map(|c| match c {
            '/' => '-',
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') => c,
            _ => '_',
        })
        .collect();
    let slug = if slug.is_empty() { "root".to_string() } else { slug };
    format!("{UNIT_PREFIX}{slug}.service")
}

/// Convert any serializable context to a [`tera::Context`].
pub fn to_tera_context<T: Serialize>(ctx: &T) -> Result<tera::Context, RenderError> {
    tera::Context::from_serialize(ctx).map_err(RenderError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn unit_names_are_derived_from_paths() {
        assert_eq!(
            unit_name_for(Path::new("/mnt/zurg")),
            "mediastack-mount-mnt-zurg.service"
        );
        assert_eq!(
            unit_name_for(Path::new("/srv/media library/")),
            "mediastack-mount-srv-media_library.service"
        );
        assert_eq!(unit_name_for(&PathBuf::from("/")), "mediastack-mount-root.service");
    }
}
