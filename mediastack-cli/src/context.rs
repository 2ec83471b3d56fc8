//! Wiring shared by every command: the resolved state directory, host
//! configuration, and the live implementations of the deploy seams.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use mediastack_core::atomic::ensure_private_dir;
use mediastack_core::{
    manifest, paths, Backoff, ConfigStore, DeploymentGraph, HostConfig, ServiceState,
    StackManifest,
};
use mediastack_deploy::{
    DockerCompose, HttpSettingsClient, Orchestrator, Prober, RunLock, RunReport, RuntimeEngine,
    SettingsApplier, Summary,
};
use mediastack_host::{AptPackages, BootUnits, MountControl, MountPreparer, SystemRunner};
use mediastack_renderer::Renderer;

/// Flags accepted by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    pub root: Option<PathBuf>,
}

pub struct Env {
    pub root: PathBuf,
    pub host: HostConfig,
    pub store: ConfigStore,
}

impl Env {
    pub fn load(globals: &Globals) -> Result<Self> {
        let root = paths::resolve_root(globals.root.as_deref())
            .context("could not determine the state directory; pass --root")?;
        let host = HostConfig::load_at(&root).with_context(|| {
            format!("failed to load {}", paths::host_config_path(&root).display())
        })?;
        let store = ConfigStore::at(&root);
        Ok(Self { root, host, store })
    }

    /// Take the run lock, creating the state directory (mode 0700) first.
    pub fn lock(&self) -> Result<RunLock> {
        ensure_private_dir(&self.root)
            .with_context(|| format!("cannot create {}", self.root.display()))?;
        RunLock::acquire_at(&self.root).context("cannot start")
    }

    pub fn stack(&self) -> Result<(StackManifest, DeploymentGraph)> {
        manifest::load_graph_at(&self.root)
            .context("failed to load the stack manifest; run `mediastack install` first")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.host.http_timeout_ms)
    }

    pub fn renderer(&self) -> Result<Renderer> {
        Renderer::with_overrides(Some(&paths::templates_dir(&self.root)))
            .context("failed to load templates")
    }

    pub fn runtime(&self, manifest: &StackManifest) -> DockerCompose<SystemRunner> {
        DockerCompose::new(
            SystemRunner,
            &self.host.docker_bin,
            &manifest.project,
            paths::compose_file_path(&self.root),
        )
    }

    pub fn mounts(&self) -> MountPreparer<SystemRunner> {
        MountPreparer::new(SystemRunner, &self.host.mountinfo_path)
    }

    pub fn boot_units(&self) -> BootUnits<SystemRunner> {
        BootUnits::new(
            SystemRunner,
            &self.host.systemd_unit_dir,
            &self.host.engine_unit,
        )
    }

    pub fn packages(&self) -> AptPackages<SystemRunner> {
        AptPackages::new(SystemRunner, self.host.apt.clone(), self.http_timeout())
    }

    pub fn orchestrator<'a>(
        &'a self,
        manifest: &'a StackManifest,
        runtime: &'a dyn RuntimeEngine,
        mounts: &'a dyn MountControl,
        prober: &'a dyn Prober,
    ) -> Orchestrator<'a> {
        Orchestrator::new(manifest, &self.store, runtime, mounts, prober).with_pull_retry(
            self.host.pull_attempts,
            Backoff::Exponential {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(30),
            },
        )
    }

    /// Push each healthy service's settings patch. Services that did not
    /// become healthy in `report` are skipped with a warning.
    pub fn push_settings(&self, graph: &DeploymentGraph, report: &RunReport) -> Summary {
        let client = HttpSettingsClient::new(self.http_timeout());
        let applier = SettingsApplier::new(&client, &self.store, paths::snapshots_dir(&self.root));

        let mut summary = Summary::new();
        for service in graph.services() {
            let Some(endpoint) = &service.settings else {
                continue;
            };
            let check = format!("settings {}", service.name);
            if report.state_of(&service.name) != Some(&ServiceState::Running { healthy: true }) {
                summary.warn(check, "skipped: service is not healthy");
                continue;
            }
            match applier.apply_settings(&service.name, endpoint) {
                Ok(pushed) => {
                    // The diff may carry credentials; only its size is logged.
                    tracing::debug!(
                        service = %service.name,
                        diff_lines = pushed.diff.lines().count(),
                        "settings diff"
                    );
                    summary.extend(pushed.summary());
                }
                Err(e) => summary.fail(check, e.to_string()),
            }
        }
        summary
    }
}
