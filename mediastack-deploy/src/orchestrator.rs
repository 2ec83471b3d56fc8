//! Desired-state convergence over the deployment graph.
//!
//! `apply` plans everything first (order, bindings, compose document) so a
//! cycle or a missing value aborts before anything is touched. It then walks
//! the graph in start order: dependencies must be ready in this run, managed
//! mounts must be shared, and each container is created, recreated, started
//! or left alone depending on what the runtime reports.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use mediastack_core::resolve::{resolve_all, resolve_service};
use mediastack_core::{
    retry, Backoff, ConfigStore, ContainerStatus, DeploymentGraph, MountSpec, ResolvedService,
    RunState, ServiceDefinition, ServiceName, ServiceState, StackError, StackManifest,
};
use mediastack_host::MountControl;
use mediastack_renderer::ComposeFile;

use crate::error::DeployError;
use crate::health::{HealthChecker, Prober, Readiness};
use crate::runtime::RuntimeEngine;
use crate::summary::Summary;

// ---------------------------------------------------------------------------
// Options and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Re-run `up` on unchanged running services so freshly pulled images
    /// are picked up.
    pub refresh: bool,
    /// Treat a health timeout as ready enough for dependents to start.
    pub tolerate_unhealthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Recreated,
    Started,
    Refreshed,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownMode {
    /// Stop containers only.
    Stop,
    /// Stop and remove containers.
    Remove,
    /// Remove containers, their volumes and data directories.
    PurgeData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub service: ServiceName,
    pub state: ServiceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceOutcome {
    pub service: ServiceName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub state: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything one orchestrator operation did, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<ServiceOutcome>,
    pub transitions: Vec<Transition>,
    /// Non-fatal problems not tied to a final service state.
    pub warnings: Vec<String>,
}

impl RunReport {
    pub(crate) fn transition(&mut self, service: &ServiceName, state: ServiceState) {
        tracing::debug!(%service, %state, "transition");
        self.transitions.push(Transition {
            service: service.clone(),
            state,
        });
    }

    pub(crate) fn finish(
        &mut self,
        service: &ServiceName,
        action: Option<Action>,
        state: ServiceState,
        detail: Option<String>,
    ) {
        self.transition(service, state.clone());
        self.outcomes.push(ServiceOutcome {
            service: service.clone(),
            action,
            state,
            detail,
        });
    }

    pub(crate) fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    pub fn outcome(&self, service: &ServiceName) -> Option<&ServiceOutcome> {
        self.outcomes.iter().find(|o| &o.service == service)
    }

    pub fn state_of(&self, service: &ServiceName) -> Option<&ServiceState> {
        self.outcome(service).map(|o| &o.state)
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::new();
        for outcome in &self.outcomes {
            let name = outcome.service.as_str();
            let detail = match (&outcome.action, &outcome.detail) {
                (Some(action), Some(d)) => format!("{action:?}, {d}").to_lowercase(),
                (Some(action), None) => format!("{action:?}").to_lowercase(),
                (None, Some(d)) => d.clone(),
                (None, None) => outcome.state.to_string(),
            };
            match &outcome.state {
                ServiceState::Running { healthy: false } => summary.warn(name, detail),
                ServiceState::Failed { .. } | ServiceState::Blocked { .. } => {
                    summary.fail(name, outcome.state.to_string())
                }
                _ => summary.pass(name, detail),
            }
        }
        for warning in &self.warnings {
            summary.warn("warning", warning.clone());
        }
        summary
    }
}

/// The resolved services in start order and the compose document built
/// from them.
#[derive(Debug, Clone)]
pub struct Plan {
    pub services: Vec<ResolvedService>,
    pub compose: ComposeFile,
}

/// Whether a container matches its definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Drift {
    InSync,
    Drifted,
    Absent,
    /// The definition cannot be resolved (missing config value).
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub run: RunState,
    pub drift: Drift,
}

/// What to do with a container given its observed state.
pub fn converge_action(state: &RunState, hash: &str, refresh: bool) -> Action {
    if state.container == ContainerStatus::Absent {
        return Action::Created;
    }
    if state.definition_hash.as_deref() != Some(hash) {
        return Action::Recreated;
    }
    match state.container {
        ContainerStatus::Running | ContainerStatus::Restarting if refresh => Action::Refreshed,
        ContainerStatus::Running | ContainerStatus::Restarting => Action::Unchanged,
        ContainerStatus::Created | ContainerStatus::Exited => Action::Started,
        ContainerStatus::Paused | ContainerStatus::Dead | ContainerStatus::Absent => {
            Action::Recreated
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a> {
    manifest: &'a StackManifest,
    store: &'a ConfigStore,
    runtime: &'a dyn RuntimeEngine,
    mounts: &'a dyn MountControl,
    health: HealthChecker<'a>,
    pull_attempts: u32,
    pull_backoff: Backoff,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        manifest: &'a StackManifest,
        store: &'a ConfigStore,
        runtime: &'a dyn RuntimeEngine,
        mounts: &'a dyn MountControl,
        prober: &'a dyn Prober,
    ) -> Self {
        Self {
            manifest,
            store,
            runtime,
            mounts,
            health: HealthChecker::new(prober),
            pull_attempts: 3,
            pull_backoff: Backoff::Exponential {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(30),
            },
        }
    }

    pub fn with_pull_retry(mut self, attempts: u32, backoff: Backoff) -> Self {
        self.pull_attempts = attempts;
        self.pull_backoff = backoff;
        self
    }

    pub fn manifest(&self) -> &StackManifest {
        self.manifest
    }

    pub fn runtime(&self) -> &dyn RuntimeEngine {
        self.runtime
    }

    pub fn mounts(&self) -> &dyn MountControl {
        self.mounts
    }

    pub fn health(&self) -> &HealthChecker<'a> {
        &self.health
    }

    /// Resolve every service in start order and build the compose document.
    /// Touches nothing.
    pub fn plan(&self, graph: &DeploymentGraph) -> Result<Plan, DeployError> {
        let order = graph.topological_order()?;
        let services = resolve_all(order, self.store, &self.manifest.network)?;
        let compose = ComposeFile::build(&self.manifest.project, &services);
        Ok(Plan { services, compose })
    }

    /// Mount spec for a dependency path: the manifest's declaration, or the
    /// propagation requested by the service's own volume.
    fn mount_spec(&self, service: &ServiceDefinition, path: &Path) -> MountSpec {
        if let Some(spec) = self.manifest.mount(path) {
            return spec.clone();
        }
        let propagation = service
            .volumes
            .iter()
            .find(|v| v.host_path == path)
            .and_then(|v| v.propagation)
            .unwrap_or_default();
        MountSpec {
            host_path: path.to_path_buf(),
            propagation,
        }
    }

    /// Converge the graph to its declared state.
    pub fn apply(
        &self,
        graph: &DeploymentGraph,
        options: ApplyOptions,
    ) -> Result<RunReport, DeployError> {
        let plan = self.plan(graph)?;
        self.runtime.declare(&plan.compose)?;
        tracing::info!(
            project = %self.manifest.project,
            services = plan.services.len(),
            "applying"
        );

        let mut report = RunReport::default();
        let mut ready: HashSet<ServiceName> = HashSet::new();
        let mut mount_cache: HashMap<PathBuf, Result<(), String>> = HashMap::new();
        let mut networks: HashSet<String> = HashSet::new();

        for resolved in &plan.services {
            let name = resolved.name();
            let definition = &resolved.definition;
            report.transition(name, ServiceState::Defined);

            if let Some(dep) = definition.depends_on.iter().find(|d| !ready.contains(*d)) {
                tracing::warn!(service = %name, blocked_by = %dep, "dependency not ready");
                report.finish(name, None, ServiceState::Blocked { by: dep.clone() }, None);
                continue;
            }

            if let Err(reason) = self.prepare(resolved, &mut mount_cache, &mut networks) {
                report.finish(name, None, ServiceState::Failed { reason }, None);
                continue;
            }

            let action = match self.converge(resolved, options.refresh) {
                Ok(action) => action,
                Err(e) => {
                    let reason = e.to_string();
                    report.finish(name, None, ServiceState::Failed { reason }, None);
                    continue;
                }
            };
            if action != Action::Unchanged {
                report.transition(name, ServiceState::Starting);
            }

            let (state, detail) = self.await_ready(definition);
            let is_ready = match &state {
                ServiceState::Running { healthy } => *healthy || options.tolerate_unhealthy,
                _ => false,
            };
            if is_ready {
                ready.insert(name.clone());
            }
            report.finish(name, Some(action), state, detail);
        }

        Ok(report)
    }

    /// Mount and network preconditions, cached for the rest of the run.
    fn prepare(
        &self,
        resolved: &ResolvedService,
        mount_cache: &mut HashMap<PathBuf, Result<(), String>>,
        networks: &mut HashSet<String>,
    ) -> Result<(), String> {
        let definition = &resolved.definition;
        for path in definition.mount_dependencies() {
            let result = mount_cache.entry(path.clone()).or_insert_with(|| {
                let spec = self.mount_spec(definition, &path);
                self.mounts
                    .ensure_shared(&spec)
                    .map(|outcome| {
                        tracing::debug!(path = %path.display(), ?outcome, "mount ready");
                    })
                    .map_err(|e| e.to_string())
            });
            if let Err(e) = result {
                return Err(format!("mount {} not shared: {e}", path.display()));
            }
        }
        for network in &resolved.networks {
            if networks.contains(network) {
                continue;
            }
            self.runtime
                .ensure_network(network)
                .map_err(|e| format!("network {network}: {e}"))?;
            networks.insert(network.clone());
        }
        Ok(())
    }

    fn converge(&self, resolved: &ResolvedService, refresh: bool) -> Result<Action, DeployError> {
        let name = resolved.name();
        let state = self.runtime.state(name)?;
        let action = converge_action(&state, &resolved.hash, refresh);
        match action {
            Action::Created | Action::Refreshed => self.runtime.up(name, false)?,
            Action::Recreated => self.runtime.up(name, true)?,
            Action::Started => self.runtime.start(name)?,
            Action::Unchanged => {}
        }
        tracing::info!(service = %name, ?action, "converged");
        Ok(action)
    }

    fn await_ready(&self, definition: &ServiceDefinition) -> (ServiceState, Option<String>) {
        let name = &definition.name;
        if let Some(probe) = &definition.health {
            return match self.health.wait_ready(name, probe, probe.max_wait()) {
                Readiness::Ready { .. } => (ServiceState::Running { healthy: true }, None),
                Readiness::TimedOut { last_error, .. } => (
                    ServiceState::Running { healthy: false },
                    Some(format!("health timeout: {last_error}")),
                ),
            };
        }
        match self.runtime.state(name) {
            Ok(state) if state.container.is_running() => {
                (ServiceState::Running { healthy: true }, None)
            }
            Ok(state) => (
                ServiceState::Failed {
                    reason: format!("container {} after start", state.container),
                },
                None,
            ),
            Err(e) => (
                ServiceState::Failed {
                    reason: e.to_string(),
                },
                None,
            ),
        }
    }

    /// Pull every image (bounded retry), then apply with refresh so updated
    /// images replace the running containers. A failed pull is a warning;
    /// the service keeps its current image.
    pub fn update(
        &self,
        graph: &DeploymentGraph,
        options: ApplyOptions,
    ) -> Result<RunReport, DeployError> {
        let order = graph.topological_order()?;
        let mut pull_warnings = Vec::new();
        for service in order {
            let name = &service.name;
            let pulled = retry(self.pull_attempts, self.pull_backoff, |attempt| {
                self.runtime.pull(name).map_err(|e| {
                    tracing::debug!(service = %name, attempt, error = %e, "pull failed");
                    e
                })
            });
            if let Err(e) = pulled {
                pull_warnings.push(format!("pull {name}: {e}"));
            }
        }

        let mut report = self.apply(
            graph,
            ApplyOptions {
                refresh: true,
                ..options
            },
        )?;
        for warning in pull_warnings {
            report.warn(warning);
        }
        Ok(report)
    }

    /// Stop (and per `mode` remove or purge) every service, dependents
    /// first, then release managed mounts nothing running still uses.
    /// Best effort: a failure is recorded and the walk continues.
    pub fn teardown(
        &self,
        graph: &DeploymentGraph,
        mode: TeardownMode,
    ) -> Result<RunReport, DeployError> {
        let order = graph.teardown_order()?;
        let mut report = RunReport::default();

        for service in order {
            self.stop_service(service, mode, &mut report);
        }

        self.release_mounts(graph, &mut report);

        if mode != TeardownMode::Stop {
            let mut networks: BTreeSet<String> = BTreeSet::from([self.manifest.network.clone()]);
            for service in graph.services() {
                networks.extend(service.networks.iter().cloned());
            }
            for network in networks {
                if let Err(e) = self.runtime.remove_network(&network) {
                    report.warn(format!("network {network}: {e}"));
                }
            }
        }
        Ok(report)
    }

    /// Stop every service in `names`, in the order given. No mounts released.
    pub fn stop_services(
        &self,
        graph: &DeploymentGraph,
        names: &[ServiceName],
        report: &mut RunReport,
    ) -> Result<(), DeployError> {
        for name in names {
            let service = graph
                .get(name)
                .ok_or_else(|| StackError::UnknownService(name.clone()))?;
            self.stop_service(service, TeardownMode::Stop, report);
        }
        Ok(())
    }

    /// Stop one service and apply `mode`'s removal. Records the outcome.
    pub fn stop_service(
        &self,
        service: &ServiceDefinition,
        mode: TeardownMode,
        report: &mut RunReport,
    ) {
        let name = &service.name;
        report.transition(name, ServiceState::Stopping);
        match self.remove_service(service, mode) {
            Ok(()) => {
                let state = if mode == TeardownMode::PurgeData {
                    ServiceState::Purged
                } else {
                    ServiceState::Stopped
                };
                report.finish(name, None, state, None);
            }
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "teardown step failed");
                report.finish(
                    name,
                    None,
                    ServiceState::Failed {
                        reason: e.to_string(),
                    },
                    None,
                );
            }
        }
    }

    fn remove_service(
        &self,
        service: &ServiceDefinition,
        mode: TeardownMode,
    ) -> Result<(), DeployError> {
        let name = &service.name;
        let state = self.runtime.state(name)?;
        if state.container != ContainerStatus::Absent {
            if state.container.is_running() || state.container == ContainerStatus::Paused {
                self.runtime.stop(name)?;
            }
            match mode {
                TeardownMode::Stop => {}
                TeardownMode::Remove => self.runtime.remove(name, false)?,
                TeardownMode::PurgeData => self.runtime.remove(name, true)?,
            }
        }
        if mode == TeardownMode::PurgeData {
            purge_data(self.runtime, service)?;
        }
        Ok(())
    }

    /// Every host path managed as a shared mount by this stack.
    fn managed_mounts(&self, graph: &DeploymentGraph) -> BTreeSet<PathBuf> {
        let mut paths: BTreeSet<PathBuf> = self
            .manifest
            .mounts
            .iter()
            .map(|m| m.host_path.clone())
            .collect();
        for service in graph.services() {
            paths.extend(service.mount_dependencies());
        }
        paths
    }

    /// Release each managed mount once no service referencing it is running.
    pub fn release_mounts(&self, graph: &DeploymentGraph, report: &mut RunReport) {
        for path in self.managed_mounts(graph) {
            let running: Vec<&ServiceName> = graph
                .services()
                .iter()
                .filter(|s| s.references_mount(&path))
                .filter(|s| {
                    self.runtime
                        .state(&s.name)
                        .map(|st| st.container.is_running())
                        .unwrap_or(true)
                })
                .map(|s| &s.name)
                .collect();
            if let Some(holder) = running.first() {
                report.warn(format!(
                    "mount {} kept: {holder} is still running",
                    path.display()
                ));
                continue;
            }
            match self.mounts.release(&path) {
                Ok(true) => tracing::info!(path = %path.display(), "released"),
                Ok(false) => {}
                Err(e) => report.warn(format!("mount {}: {e}", path.display())),
            }
        }
    }

    /// Observed state of every service plus whether it matches its
    /// definition.
    pub fn status(&self, graph: &DeploymentGraph) -> Result<Vec<ServiceStatus>, DeployError> {
        let mut statuses = Vec::new();
        for service in graph.topological_order()? {
            let run = self.runtime.state(&service.name)?;
            let drift = if run.container == ContainerStatus::Absent {
                Drift::Absent
            } else {
                match resolve_service(service, self.store, &self.manifest.network) {
                    Ok(resolved) if run.definition_hash.as_deref() == Some(&resolved.hash) => {
                        Drift::InSync
                    }
                    Ok(_) => Drift::Drifted,
                    Err(_) => Drift::Unknown,
                }
            };
            statuses.push(ServiceStatus { run, drift });
        }
        Ok(statuses)
    }
}

/// Delete a service's named volumes and data directories.
pub(crate) fn purge_data(
    runtime: &dyn RuntimeEngine,
    service: &ServiceDefinition,
) -> Result<(), DeployError> {
    for volume in &service.named_volumes {
        if runtime.remove_volume(volume)? {
            tracing::info!(service = %service.name, volume, "volume removed");
        }
    }
    for dir in &service.data_dirs {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => tracing::info!(service = %service.name, dir = %dir.display(), "data removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(crate::error::io_err(dir, e)),
        }
    }
    Ok(())
}
