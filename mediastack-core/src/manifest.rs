//! Stack manifest persistence (`<root>/stack.yaml`).
//!
//! # API pattern
//!
//! Every function takes the root explicitly (`fn_at(root, …)`); the CLI resolves
//! the root once via [`crate::paths::resolve_root`] and tests pass a `TempDir`.

use std::path::Path;

use crate::atomic::write_private;
use crate::error::{io_err, StackError};
use crate::graph::DeploymentGraph;
use crate::paths::manifest_path;
use crate::types::StackManifest;

/// Load `<root>/stack.yaml`.
///
/// Returns `StackError::ManifestNotFound` if absent,
/// `StackError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(root: &Path) -> Result<StackManifest, StackError> {
    let path = manifest_path(root);
    if !path.exists() {
        return Err(StackError::ManifestNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    parse(&path, &contents)
}

/// Parse manifest YAML; `origin` names the source in errors.
pub fn parse(origin: &Path, contents: &str) -> Result<StackManifest, StackError> {
    serde_yaml::from_str(contents).map_err(|e| StackError::Parse {
        path: origin.to_path_buf(),
        source: e,
    })
}

/// Load the manifest and build its dependency graph, rejecting cycles,
/// duplicate names and dangling `depends_on` entries.
pub fn load_graph_at(root: &Path) -> Result<(StackManifest, DeploymentGraph), StackError> {
    let manifest = load_at(root)?;
    let graph = DeploymentGraph::from_manifest(&manifest)?;
    Ok((manifest, graph))
}

/// Atomically save the manifest (mode `0600`).
///
/// The graph is validated first so an invalid manifest never reaches disk.
pub fn save_at(root: &Path, manifest: &StackManifest) -> Result<(), StackError> {
    DeploymentGraph::from_manifest(manifest)?;
    let yaml = serde_yaml::to_string(manifest)?;
    write_private(&manifest_path(root), &yaml)
}

/// Write `manifest` only if no manifest exists yet.
///
/// Idempotent: returns the existing manifest unchanged when one is present.
pub fn init_at(root: &Path, manifest: StackManifest) -> Result<StackManifest, StackError> {
    if manifest_path(root).exists() {
        return load_at(root);
    }
    save_at(root, &manifest)?;
    tracing::info!(path = %manifest_path(root).display(), "wrote stack manifest");
    Ok(manifest)
}
