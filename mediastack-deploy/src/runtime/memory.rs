use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use mediastack_core::{ContainerStatus, HealthStatus, RunState, ServiceName};
use mediastack_host::CommandOutput;
use mediastack_renderer::{ComposeFile, HASH_LABEL};

use super::RuntimeEngine;
use crate::error::DeployError;

#[derive(Debug, Clone)]
struct Container {
    status: ContainerStatus,
    hash: Option<String>,
}

#[derive(Debug, Default)]
struct World {
    declared: Option<ComposeFile>,
    containers: BTreeMap<ServiceName, Container>,
    networks: BTreeSet<String>,
    volumes: BTreeSet<String>,
    calls: Vec<String>,
    failing: HashSet<ServiceName>,
    failing_pulls: HashSet<ServiceName>,
}

/// In-memory [`RuntimeEngine`]. Containers start instantly; `up` or `start`
/// of a service passed to [`InMemoryRuntime::fail_on`] errors. Every call is
/// recorded as `"<op> <target>"`.
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    world: RefCell<World>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `up`/`start` of `service` fail.
    pub fn fail_on(&self, service: impl Into<ServiceName>) {
        self.world.borrow_mut().failing.insert(service.into());
    }

    /// Make `pull` of `service` fail.
    pub fn fail_pull_on(&self, service: impl Into<ServiceName>) {
        self.world.borrow_mut().failing_pulls.insert(service.into());
    }

    /// Force a container into `status`, e.g. to simulate a crash.
    pub fn set_status(&self, service: impl Into<ServiceName>, status: ContainerStatus) {
        let mut world = self.world.borrow_mut();
        let entry = world
            .containers
            .entry(service.into())
            .or_insert(Container { status, hash: None });
        entry.status = status;
    }

    pub fn calls(&self) -> Vec<String> {
        self.world.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.world.borrow_mut().calls.clear();
    }

    pub fn declared(&self) -> Option<ComposeFile> {
        self.world.borrow().declared.clone()
    }

    pub fn networks(&self) -> BTreeSet<String> {
        self.world.borrow().networks.clone()
    }

    pub fn volumes(&self) -> BTreeSet<String> {
        self.world.borrow().volumes.clone()
    }

    fn record(&self, op: &str, target: &str) {
        self.world.borrow_mut().calls.push(format!("{op} {target}"));
    }

    fn check_failing(&self, service: &ServiceName, op: &str) -> Result<(), DeployError> {
        if self.world.borrow().failing.contains(service) {
            return Err(DeployError::Inspect {
                service: service.clone(),
                reason: format!("{op} failed"),
            });
        }
        Ok(())
    }
}

impl RuntimeEngine for InMemoryRuntime {
    fn declare(&self, compose: &ComposeFile) -> Result<(), DeployError> {
        self.record("declare", &compose.name);
        self.world.borrow_mut().declared = Some(compose.clone());
        Ok(())
    }

    fn ensure_network(&self, name: &str) -> Result<bool, DeployError> {
        self.record("ensure_network", name);
        Ok(self.world.borrow_mut().networks.insert(name.to_string()))
    }

    fn remove_network(&self, name: &str) -> Result<bool, DeployError> {
        self.record("remove_network", name);
        Ok(self.world.borrow_mut().networks.remove(name))
    }

    fn pull(&self, service: &ServiceName) -> Result<(), DeployError> {
        self.record("pull", service.as_str());
        if self.world.borrow().failing_pulls.contains(service) {
            return Err(DeployError::Inspect {
                service: service.clone(),
                reason: "pull failed".to_string(),
            });
        }
        Ok(())
    }

    fn state(&self, service: &ServiceName) -> Result<RunState, DeployError> {
        let world = self.world.borrow();
        Ok(match world.containers.get(service) {
            Some(c) => RunState {
                service: service.clone(),
                container: c.status,
                health: HealthStatus::None,
                definition_hash: c.hash.clone(),
            },
            None => RunState::absent(service.clone()),
        })
    }

    fn up(&self, service: &ServiceName, recreate: bool) -> Result<(), DeployError> {
        self.record(if recreate { "recreate" } else { "up" }, service.as_str());
        self.check_failing(service, "up")?;

        let mut world = self.world.borrow_mut();
        let declared = world
            .declared
            .as_ref()
            .and_then(|c| c.services.get(service.as_str()).map(|s| (c, s)))
            .map(|(compose, svc)| {
                let volumes: Vec<String> = compose
                    .volumes
                    .iter()
                    .filter(|(key, _)| {
                        svc.volumes
                            .iter()
                            .any(|entry| entry.starts_with(&format!("{key}:")))
                    })
                    .map(|(_, v)| v.name.clone())
                    .collect();
                (svc.labels.get(HASH_LABEL).cloned(), volumes)
            });
        let Some((hash, volumes)) = declared else {
            return Err(DeployError::Inspect {
                service: service.clone(),
                reason: "service is not declared".to_string(),
            });
        };
        world.volumes.extend(volumes);
        world.containers.insert(
            service.clone(),
            Container {
                status: ContainerStatus::Running,
                hash,
            },
        );
        Ok(())
    }

    fn start(&self, service: &ServiceName) -> Result<(), DeployError> {
        self.record("start", service.as_str());
        self.check_failing(service, "start")?;
        if let Some(c) = self.world.borrow_mut().containers.get_mut(service) {
            c.status = ContainerStatus::Running;
        }
        Ok(())
    }

    fn stop(&self, service: &ServiceName) -> Result<(), DeployError> {
        self.record("stop", service.as_str());
        if let Some(c) = self.world.borrow_mut().containers.get_mut(service) {
            c.status = ContainerStatus::Exited;
        }
        Ok(())
    }

    fn remove(&self, service: &ServiceName, volumes: bool) -> Result<(), DeployError> {
        self.record(if volumes { "remove -v" } else { "remove" }, service.as_str());
        self.world.borrow_mut().containers.remove(service);
        Ok(())
    }

    fn remove_volume(&self, name: &str) -> Result<bool, DeployError> {
        self.record("remove_volume", name);
        Ok(self.world.borrow_mut().volumes.remove(name))
    }

    fn exec(&self, service: &ServiceName, command: &[String]) -> Result<CommandOutput, DeployError> {
        self.record("exec", &format!("{service} {}", command.join(" ")));
        let running = self.state(service)?.container.is_running();
        Ok(if running {
            CommandOutput::ok("")
        } else {
            CommandOutput::failed(1, format!("container {service} is not running"))
        })
    }
}
