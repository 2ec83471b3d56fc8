//! Typed docker compose document built from resolved services.
//!
//! Every service becomes one compose service whose container name equals the
//! service name. The definition hash travels as a container label so the
//! orchestrator can detect drift by inspecting the running container.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use mediastack_core::types::VolumeMount;
use mediastack_core::ResolvedService;

use crate::error::RenderError;

/// Label carrying [`ResolvedService::hash`] on each container.
pub const HASH_LABEL: &str = "io.mediastack.definition-hash";
/// Label carrying the owning project.
pub const PROJECT_LABEL: &str = "io.mediastack.project";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub name: String,
    pub services: BTreeMap<String, ComposeService>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, ComposeNetwork>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, ComposeVolume>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    pub restart: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_opt: Vec<String>,
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Networks are created by the orchestrator before `up`, so compose only
/// references them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeNetwork {
    pub name: String,
    pub external: bool,
}

/// Named volume with a fixed name (no project prefix), so purge can address
/// it directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeVolume {
    pub name: String,
}

impl ComposeFile {
    /// Build the compose document for `project` from already-resolved services.
    pub fn build(project: &str, services: &[ResolvedService]) -> Self {
        let mut networks = BTreeMap::new();
        let mut volumes = BTreeMap::new();
        let mut compose_services = BTreeMap::new();

        for svc in services {
            for net in &svc.networks {
                networks.insert(
                    net.clone(),
                    ComposeNetwork {
                        name: net.clone(),
                        external: true,
                    },
                );
            }
            for vol in &svc.definition.named_volumes {
                volumes.insert(vol.clone(), ComposeVolume { name: vol.clone() });
            }
            compose_services.insert(svc.name().to_string(), service_entry(project, svc));
        }

        ComposeFile {
            name: project.to_string(),
            services: compose_services,
            networks,
            volumes,
        }
    }

    pub fn to_yaml(&self) -> Result<String, RenderError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Names of all networks referenced by any service, sorted.
    pub fn network_names(&self) -> BTreeSet<&str> {
        self.networks.values().map(|n| n.name.as_str()).collect()
    }
}

fn service_entry(project: &str, svc: &ResolvedService) -> ComposeService {
    let def = &svc.definition;
    let labels = BTreeMap::from([
        (HASH_LABEL.to_string(), svc.hash.clone()),
        (PROJECT_LABEL.to_string(), project.to_string()),
    ]);
    ComposeService {
        image: def.image.clone(),
        container_name: def.name.to_string(),
        restart: def.restart.to_string(),
        command: def.command.iter().map(|c| escape_dollars(c)).collect(),
        environment: svc
            .env
            .iter()
            .map(|(k, v)| (k.clone(), escape_dollars(v)))
            .collect(),
        ports: def.ports.clone(),
        volumes: def.volumes.iter().map(volume_entry).collect(),
        devices: def.devices.clone(),
        cap_add: def.cap_add.clone(),
        security_opt: def.security_opt.clone(),
        networks: svc.networks.clone(),
        depends_on: def.depends_on.iter().map(|d| d.to_string()).collect(),
        labels,
    }
}

/// Short volume syntax: `source:target[:ro][,<propagation>]`.
///
/// A relative `host_path` names a runtime-managed volume.
pub fn volume_entry(volume: &VolumeMount) -> String {
    let mut options: Vec<String> = Vec::new();
    if volume.read_only {
        options.push("ro".to_string());
    }
    if let Some(propagation) = volume.propagation {
        if is_bind_source(&volume.host_path) {
            options.push(propagation.to_string());
        }
    }
    let base = format!(
        "{}:{}",
        volume.host_path.display(),
        volume.container_path.display()
    );
    if options.is_empty() {
        base
    } else {
        format!("{base}:{}", options.join(","))
    }
}

fn is_bind_source(path: &Path) -> bool {
    path.is_absolute()
}

/// Compose interpolates `$`; literal dollars must be doubled.
fn escape_dollars(value: &str) -> String {
    value.replace('$', "$$")
}
