//! mediastack core library: domain types, stack manifest persistence,
//! configuration store, secrets, dependency graph, errors.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`StackError`]
//! - [`manifest`]: load / save / init of `stack.yaml`
//! - [`config_store`]: per-group `.env` files
//! - [`secrets`]: [`SecretProvisioner`]
//! - [`graph`]: [`DeploymentGraph`]
//! - [`resolve`]: binding substitution and definition hashes
//! - [`retry`]: bounded retry shared by polling loops

pub mod atomic;
pub mod config;
pub mod config_store;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod paths;
pub mod resolve;
pub mod retry;
pub mod secrets;
pub mod types;

pub use config::HostConfig;
pub use config_store::ConfigStore;
pub use error::StackError;
pub use graph::DeploymentGraph;
pub use resolve::ResolvedService;
pub use retry::{retry, Backoff};
pub use secrets::{NoPrompt, Prompter, SecretProvisioner, StdinPrompter};
pub use types::{
    ConfigRef, ContainerStatus, EnvBinding, EnvValue, HealthProbe, HealthStatus, MountSpec,
    ProbeKind, Propagation, RunState, Secret, SecretPolicy, SecretSpec, ServiceDefinition,
    ServiceName, ServiceState, SettingsEndpoint, StackManifest, VolumeMount,
};
