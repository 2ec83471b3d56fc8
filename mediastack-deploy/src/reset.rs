//! Soft and hard resets, and scoped data wipes.
//!
//! Everything here walks the graph in reverse start order. Hard reset is
//! gated on the phrase `wipe <project>` and attempts every resource class
//! even after one fails.

use std::io::ErrorKind;
use std::path::PathBuf;

use mediastack_core::{DeploymentGraph, ServiceName, StackError};
use mediastack_host::{AptPackages, BootUnits, CommandRunner, HostError};

use crate::error::DeployError;
use crate::orchestrator::{ApplyOptions, Orchestrator, RunReport, TeardownMode};
use crate::summary::Summary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    /// Stop services, cycle the managed mounts, apply again.
    Soft,
    /// Remove everything mediastack created. `confirmation` must equal
    /// [`ResetAgent::confirmation_phrase`].
    Hard { confirmation: String },
}

/// Host-level resources removed by a hard reset.
pub trait HostCleanup {
    fn remove_boot_units(&self) -> Result<Vec<PathBuf>, HostError>;
    fn purge_packages(&self) -> Result<(), HostError>;
}

/// [`HostCleanup`] over the real systemd unit directory and apt.
pub struct SystemCleanup<R> {
    pub units: BootUnits<R>,
    pub packages: AptPackages<R>,
}

impl<R: CommandRunner> HostCleanup for SystemCleanup<R> {
    fn remove_boot_units(&self) -> Result<Vec<PathBuf>, HostError> {
        self.units.remove_all()
    }

    fn purge_packages(&self) -> Result<(), HostError> {
        self.packages.purge()
    }
}

pub struct ResetAgent<'a> {
    orchestrator: &'a Orchestrator<'a>,
    root: PathBuf,
    cleanup: &'a dyn HostCleanup,
}

impl<'a> ResetAgent<'a> {
    pub fn new(
        orchestrator: &'a Orchestrator<'a>,
        root: impl Into<PathBuf>,
        cleanup: &'a dyn HostCleanup,
    ) -> Self {
        Self {
            orchestrator,
            root: root.into(),
            cleanup,
        }
    }

    pub fn confirmation_phrase(&self) -> String {
        format!("wipe {}", self.orchestrator.manifest().project)
    }

    pub fn reset(
        &self,
        graph: &DeploymentGraph,
        scope: ResetScope,
        options: ApplyOptions,
    ) -> Result<Summary, DeployError> {
        match scope {
            ResetScope::Soft => self.soft(graph, options),
            ResetScope::Hard { confirmation } => self.hard(graph, &confirmation),
        }
    }

    fn soft(&self, graph: &DeploymentGraph, options: ApplyOptions) -> Result<Summary, DeployError> {
        // Validate before stopping anything.
        self.orchestrator.plan(graph)?;
        tracing::info!("soft reset: stopping services");
        let teardown = self.orchestrator.teardown(graph, TeardownMode::Stop)?;
        let mut summary = teardown.summary();
        tracing::info!("soft reset: applying");
        let applied = self.orchestrator.apply(graph, options)?;
        summary.extend(applied.summary());
        Ok(summary)
    }

    fn hard(&self, graph: &DeploymentGraph, confirmation: &str) -> Result<Summary, DeployError> {
        let expected = self.confirmation_phrase();
        if confirmation.trim() != expected {
            return Err(DeployError::Confirmation { expected });
        }
        tracing::warn!(root = %self.root.display(), "hard reset");

        let mut summary = Summary::new();
        match self.orchestrator.teardown(graph, TeardownMode::PurgeData) {
            Ok(report) => summary.extend(report.summary()),
            Err(e) => summary.fail("services", e.to_string()),
        }

        match self.cleanup.remove_boot_units() {
            Ok(removed) => summary.pass("boot units", format!("{} files removed", removed.len())),
            Err(e) => summary.fail("boot units", e.to_string()),
        }

        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => summary.pass("config root", format!("{} removed", self.root.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                summary.pass("config root", "already absent")
            }
            Err(e) => summary.fail("config root", format!("{}: {e}", self.root.display())),
        }

        match self.cleanup.purge_packages() {
            Ok(()) => summary.pass("packages", "engine packages purged"),
            Err(e) => summary.fail("packages", e.to_string()),
        }
        Ok(summary)
    }

    /// Stop `service`'s dependents (reverse order), then purge the service's
    /// container, volumes and data directories. Mounts are left alone.
    pub fn wipe_data(
        &self,
        graph: &DeploymentGraph,
        service: &ServiceName,
    ) -> Result<RunReport, DeployError> {
        let definition = graph
            .get(service)
            .ok_or_else(|| StackError::UnknownService(service.clone()))?;
        let mut dependents = graph.dependents_of(service)?;
        dependents.reverse();

        let mut report = RunReport::default();
        self.orchestrator
            .stop_services(graph, &dependents, &mut report)?;
        self.orchestrator
            .stop_service(definition, TeardownMode::PurgeData, &mut report);
        Ok(report)
    }

    /// [`ResetAgent::wipe_data`] followed by a full apply.
    pub fn wipe_data_and_apply(
        &self,
        graph: &DeploymentGraph,
        service: &ServiceName,
        options: ApplyOptions,
    ) -> Result<Summary, DeployError> {
        let wiped = self.wipe_data(graph, service)?;
        let mut summary = wiped.summary();
        summary.extend(self.orchestrator.apply(graph, options)?.summary());
        Ok(summary)
    }
}
