//! The container runtime seam.
//!
//! [`RuntimeEngine`] is the only way the orchestrator touches containers.
//! [`DockerCompose`] drives `docker compose`; [`InMemoryRuntime`] records
//! calls and keeps state in memory for tests and dry runs.

mod compose;
mod memory;

pub use compose::DockerCompose;
pub use memory::InMemoryRuntime;

use mediastack_core::{RunState, ServiceName};
use mediastack_host::CommandOutput;
use mediastack_renderer::ComposeFile;

use crate::error::DeployError;

pub trait RuntimeEngine {
    /// Record the desired state of every service (the compose document).
    fn declare(&self, compose: &ComposeFile) -> Result<(), DeployError>;

    /// Create `name` unless it exists. Returns `true` when created.
    fn ensure_network(&self, name: &str) -> Result<bool, DeployError>;

    /// Remove `name`. Returns `false` when it did not exist.
    fn remove_network(&self, name: &str) -> Result<bool, DeployError>;

    fn pull(&self, service: &ServiceName) -> Result<(), DeployError>;

    /// Fresh observation of the service's container. Never cached.
    fn state(&self, service: &ServiceName) -> Result<RunState, DeployError>;

    /// Create or update the container from the declared definition.
    /// `recreate` forces a new container even if nothing changed.
    fn up(&self, service: &ServiceName, recreate: bool) -> Result<(), DeployError>;

    fn start(&self, service: &ServiceName) -> Result<(), DeployError>;

    fn stop(&self, service: &ServiceName) -> Result<(), DeployError>;

    /// Remove the container; `volumes` also drops its anonymous volumes.
    fn remove(&self, service: &ServiceName, volumes: bool) -> Result<(), DeployError>;

    /// Remove a named volume. Returns `false` when it did not exist.
    fn remove_volume(&self, name: &str) -> Result<bool, DeployError>;

    /// Run `command` inside the service's container.
    fn exec(&self, service: &ServiceName, command: &[String]) -> Result<CommandOutput, DeployError>;
}
