//! Domain types for mediastack.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Everything persisted in `stack.yaml` round-trips through serde + serde_yaml.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed service name (also the container name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl ServiceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Mounts and volumes
// ---------------------------------------------------------------------------

/// Mount propagation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Propagation {
    Shared,
    #[default]
    Rshared,
    Rslave,
}

impl Propagation {
    /// Flag accepted by `mount --make-<mode>`.
    pub fn mount_flag(self) -> &'static str {
        match self {
            Propagation::Shared => "--make-shared",
            Propagation::Rshared => "--make-rshared",
            Propagation::Rslave => "--make-rslave",
        }
    }

    /// `true` when the mode propagates events out of the host namespace.
    pub fn is_shared(self) -> bool {
        matches!(self, Propagation::Shared | Propagation::Rshared)
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::Shared => write!(f, "shared"),
            Propagation::Rshared => write!(f, "rshared"),
            Propagation::Rslave => write!(f, "rslave"),
        }
    }
}

/// A host directory that must be a bind mount with the given propagation
/// before any dependent service starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub host_path: PathBuf,
    #[serde(default)]
    pub propagation: Propagation,
}

/// One bind mount into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation: Option<Propagation>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

// ---------------------------------------------------------------------------
// Environment bindings
// ---------------------------------------------------------------------------

/// Reference to a key inside a ConfigStore group (`<root>/config/<group>.env`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigRef {
    pub group: String,
    pub key: String,
}

impl fmt::Display for ConfigRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.key)
    }
}

/// Value of an environment binding.
///
/// Literals may embed `${group.KEY}` placeholders, resolved from the
/// ConfigStore at apply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Secret { secret: ConfigRef },
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub key: String,
    pub value: EnvValue,
}

// ---------------------------------------------------------------------------
// Health probes
// ---------------------------------------------------------------------------

/// What a readiness probe checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeKind {
    /// GET `url`; success is a 2xx, or `expect_status` when given, and the
    /// body containing `expect_body` when given.
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect_status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect_body: Option<String>,
    },
    /// TCP connect to `address` (`host:port`).
    Tcp { address: String },
    /// Run `command` inside the service's container; exit code 0 is success.
    Exec { command: Vec<String> },
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Http { url, .. } => write!(f, "http {url}"),
            ProbeKind::Tcp { address } => write!(f, "tcp {address}"),
            ProbeKind::Exec { command } => write!(f, "exec {}", command.join(" ")),
        }
    }
}

fn default_interval_ms() -> u64 {
    2_000
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_retries() -> u32 {
    10
}

/// A readiness probe with its polling budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthProbe {
    #[serde(flatten)]
    pub kind: ProbeKind,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl HealthProbe {
    pub fn new(kind: ProbeKind) -> Self {
        Self {
            kind,
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Upper bound on the time spent polling: one interval per retry.
    pub fn max_wait(&self) -> Duration {
        self.interval() * self.retries.max(1)
    }
}

// ---------------------------------------------------------------------------
// Service definition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    #[default]
    UnlessStopped,
    OnFailure,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::No => write!(f, "no"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::UnlessStopped => write!(f, "unless-stopped"),
            RestartPolicy::OnFailure => write!(f, "on-failure"),
        }
    }
}

/// Administrative settings API of a service plus the patch pushed into it
/// once the service is healthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsEndpoint {
    /// Base URL reachable from the host, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Settings path, e.g. `/api/v1/settings`. Keys are POSTed to `<path>/<key>`.
    pub path: String,
    /// Header carrying the credential, e.g. `x-api-key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConfigRef>,
    /// Dotted settings keys and their target values.
    #[serde(default)]
    pub patch: BTreeMap<String, serde_json::Value>,
}

impl SettingsEndpoint {
    pub fn settings_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }

    pub fn key_url(&self, key: &str) -> String {
        format!("{}/{}", self.settings_url().trim_end_matches('/'), key)
    }
}

/// Declarative description of one deployable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: ServiceName,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ServiceName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthProbe>,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_opt: Vec<String>,
    /// Host paths that must be shared mounts before this service starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_mounts: Vec<PathBuf>,
    /// Host directories deleted when the service's data is purged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_dirs: Vec<PathBuf>,
    /// Runtime-managed volumes deleted when the service's data is purged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub named_volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsEndpoint>,
}

impl ServiceDefinition {
    /// Minimal definition; the remaining fields take their defaults.
    pub fn new(name: impl Into<ServiceName>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            networks: vec![],
            ports: vec![],
            volumes: vec![],
            env: vec![],
            depends_on: vec![],
            health: None,
            restart: RestartPolicy::default(),
            command: vec![],
            devices: vec![],
            cap_add: vec![],
            security_opt: vec![],
            requires_mounts: vec![],
            data_dirs: vec![],
            named_volumes: vec![],
            settings: None,
        }
    }

    /// Every host path this service needs as a shared mount: explicit
    /// `requires_mounts` plus volumes declaring a propagation mode.
    pub fn mount_dependencies(&self) -> BTreeSet<PathBuf> {
        let mut paths: BTreeSet<PathBuf> = self.requires_mounts.iter().cloned().collect();
        for volume in &self.volumes {
            if volume.propagation.is_some() {
                paths.insert(volume.host_path.clone());
            }
        }
        paths
    }

    /// `true` if any mount dependency lives at or under `path`.
    pub fn references_mount(&self, path: &Path) -> bool {
        self.mount_dependencies()
            .iter()
            .any(|p| p.starts_with(path))
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeFormat {
    /// Lowercase hex of `length` random bytes (2 × length chars).
    Hex,
    /// Standard base64 of `length` random bytes.
    Base64,
    /// `length` characters from `[A-Za-z0-9]`.
    Alphanumeric,
}

/// Shape of an auto-generated secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretShape {
    pub format: ShapeFormat,
    pub length: usize,
}

/// How a secret value is obtained the first time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SecretPolicy {
    /// Ask the operator; an empty answer falls back to `default`, and is
    /// rejected when there is none. `default: ""` makes the value optional.
    Prompted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    /// Generate from the OS RNG.
    Generated(SecretShape),
    /// Ask the operator; an empty answer is rejected.
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    Hex,
    Alphanumeric,
    Base64,
}

impl Charset {
    pub fn accepts(self, c: char) -> bool {
        match self {
            Charset::Hex => c.is_ascii_hexdigit(),
            Charset::Alphanumeric => c.is_ascii_alphanumeric(),
            Charset::Base64 => c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Charset::Hex => write!(f, "hex"),
            Charset::Alphanumeric => write!(f, "alphanumeric"),
            Charset::Base64 => write!(f, "base64"),
        }
    }
}

/// Constraints a supplied or prompted value must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecretConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<Charset>,
}

/// Declaration of one secret in the stack manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub group: String,
    pub key: String,
    pub policy: SecretPolicy,
    #[serde(default)]
    pub constraint: SecretConstraint,
    /// Human prompt text; defaults to the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SecretSpec {
    pub fn config_ref(&self) -> ConfigRef {
        ConfigRef {
            group: self.group.clone(),
            key: self.key.clone(),
        }
    }

    pub fn prompt_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMethod {
    Prompted,
    Random,
    Supplied,
    Stored,
}

/// A provisioned secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub key: String,
    value: String,
    pub generation_method: GenerationMethod,
    pub persisted_at: PathBuf,
}

impl Secret {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        generation_method: GenerationMethod,
        persisted_at: PathBuf,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            generation_method,
            persisted_at,
        }
    }

    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("key", &self.key)
            .field("value", &"<redacted>")
            .field("generation_method", &self.generation_method)
            .field("persisted_at", &self.persisted_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Stack manifest
// ---------------------------------------------------------------------------

/// Root of `stack.yaml`: everything decided at configuration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackManifest {
    /// Compose project name; also used for the hard-reset confirmation phrase.
    pub project: String,
    /// Default network every service joins unless it lists its own.
    pub network: String,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    #[serde(default)]
    pub secrets: Vec<SecretSpec>,
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

impl StackManifest {
    pub fn service(&self, name: &ServiceName) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| &s.name == name)
    }

    pub fn mount(&self, path: &Path) -> Option<&MountSpec> {
        self.mounts.iter().find(|m| m.host_path == path)
    }
}

// ---------------------------------------------------------------------------
// Observed state
// ---------------------------------------------------------------------------

/// Container status as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Absent,
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
}

impl ContainerStatus {
    /// Parse the `State.Status` string reported by `docker inspect`.
    pub fn from_docker(status: &str) -> Self {
        match status {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "restarting" => ContainerStatus::Restarting,
            "paused" => ContainerStatus::Paused,
            "exited" | "removing" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Absent,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, ContainerStatus::Running | ContainerStatus::Restarting)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Absent => "absent",
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Health as reported by the runtime's own healthcheck, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_docker(status: &str) -> Self {
        match status {
            "starting" => HealthStatus::Starting,
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            _ => HealthStatus::None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::None => "-",
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Observed snapshot of one service. Always re-queried, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub service: ServiceName,
    pub container: ContainerStatus,
    pub health: HealthStatus,
    /// Definition hash label found on the container, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_hash: Option<String>,
}

impl RunState {
    pub fn absent(service: ServiceName) -> Self {
        Self {
            service,
            container: ContainerStatus::Absent,
            health: HealthStatus::None,
            definition_hash: None,
        }
    }
}

/// Lifecycle position of a service during one orchestrator operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceState {
    Undefined,
    Defined,
    Starting,
    Running { healthy: bool },
    Stopping,
    Stopped,
    Purged,
    Failed { reason: String },
    /// Not started because a dependency failed or never became ready.
    Blocked { by: ServiceName },
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Undefined => write!(f, "undefined"),
            ServiceState::Defined => write!(f, "defined"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running { healthy: true } => write!(f, "running (healthy)"),
            ServiceState::Running { healthy: false } => write!(f, "running (unhealthy)"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Purged => write!(f, "purged"),
            ServiceState::Failed { reason } => write!(f, "failed: {reason}"),
            ServiceState::Blocked { by } => write!(f, "blocked by {by}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
