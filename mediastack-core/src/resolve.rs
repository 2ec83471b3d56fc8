//! Binding resolution: substitute ConfigStore and secret values into a
//! service's environment and compute its definition hash.
//!
//! The hash covers everything that changes the container (image, env,
//! volumes, ports, …) and nothing that does not (settings patch, health probe,
//! data dirs). A hash mismatch with the running container triggers recreation.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config_store::ConfigStore;
use crate::error::StackError;
use crate::types::{EnvValue, ServiceDefinition, ServiceName, VolumeMount};

/// A service with every binding substituted. Holds secret values: never log
/// `env` directly.
#[derive(Clone, PartialEq)]
pub struct ResolvedService {
    pub definition: ServiceDefinition,
    pub networks: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub hash: String,
}

impl ResolvedService {
    pub fn name(&self) -> &ServiceName {
        &self.definition.name
    }
}

impl std::fmt::Debug for ResolvedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedService")
            .field("name", &self.definition.name)
            .field("image", &self.definition.image)
            .field("networks", &self.networks)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("hash", &self.hash)
            .finish()
    }
}

#[derive(Serialize)]
struct HashInput<'a> {
    image: &'a str,
    networks: &'a [String],
    ports: &'a [String],
    volumes: &'a [VolumeMount],
    env: &'a BTreeMap<String, String>,
    command: &'a [String],
    devices: &'a [String],
    cap_add: &'a [String],
    security_opt: &'a [String],
    restart: String,
}

/// Resolve one service. Missing values are `StackError::UnresolvedBinding`.
pub fn resolve_service(
    definition: &ServiceDefinition,
    store: &ConfigStore,
    default_network: &str,
) -> Result<ResolvedService, StackError> {
    let mut env = BTreeMap::new();
    for binding in &definition.env {
        let value = match &binding.value {
            EnvValue::Secret { secret } => store
                .get(&secret.group, &secret.key)?
                .ok_or_else(|| StackError::UnresolvedBinding {
                    service: definition.name.clone(),
                    key: binding.key.clone(),
                    group: secret.group.clone(),
                    name: secret.key.clone(),
                })?,
            EnvValue::Literal(literal) => {
                interpolate(literal, store, &definition.name, &binding.key)?
            }
        };
        env.insert(binding.key.clone(), value);
    }

    let networks = if definition.networks.is_empty() {
        vec![default_network.to_string()]
    } else {
        definition.networks.clone()
    };

    let hash = definition_hash(definition, &networks, &env)?;
    Ok(ResolvedService {
        definition: definition.clone(),
        networks,
        env,
        hash,
    })
}

/// Resolve every service, in the order given. The first failure aborts.
pub fn resolve_all<'a>(
    services: impl IntoIterator<Item = &'a ServiceDefinition>,
    store: &ConfigStore,
    default_network: &str,
) -> Result<Vec<ResolvedService>, StackError> {
    services
        .into_iter()
        .map(|s| resolve_service(s, store, default_network))
        .collect()
}

fn definition_hash(
    definition: &ServiceDefinition,
    networks: &[String],
    env: &BTreeMap<String, String>,
) -> Result<String, StackError> {
    let input = HashInput {
        image: &definition.image,
        networks,
        ports: &definition.ports,
        volumes: &definition.volumes,
        env,
        command: &definition.command,
        devices: &definition.devices,
        cap_add: &definition.cap_add,
        security_opt: &definition.security_opt,
        restart: definition.restart.to_string(),
    };
    let json = serde_json::to_vec(&input).map_err(|e| StackError::Validation {
        key: definition.name.to_string(),
        reason: format!("definition is not serializable: {e}"),
    })?;
    let mut h = Sha256::new();
    h.update(&json);
    Ok(hex::encode(h.finalize()))
}

/// Replace `${group.KEY}` placeholders with ConfigStore values.
pub fn interpolate(
    template: &str,
    store: &ConfigStore,
    service: &ServiceName,
    binding: &str,
) -> Result<String, StackError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(StackError::Validation {
                key: format!("{service}.{binding}"),
                reason: "unterminated ${...} placeholder".to_string(),
            });
        };
        let reference = &after[..end];
        let Some((group, key)) = reference.split_once('.') else {
            return Err(StackError::Validation {
                key: format!("{service}.{binding}"),
                reason: format!("placeholder '{reference}' must be group.KEY"),
            });
        };
        let value = store
            .get(group, key)?
            .ok_or_else(|| StackError::UnresolvedBinding {
                service: service.clone(),
                key: binding.to_string(),
                group: group.to_string(),
                name: key.to_string(),
            })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
