use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use mediastack_core::{ContainerStatus, HealthStatus, RunState, ServiceName};
use mediastack_host::command::{argv, display_command};
use mediastack_host::{CommandOutput, CommandRunner, HostError};
use mediastack_renderer::{ComposeFile, HASH_LABEL};

use super::RuntimeEngine;
use crate::error::DeployError;
use crate::writer::write_gated;

/// [`RuntimeEngine`] backed by the docker CLI and its compose plugin.
///
/// The compose file is the declared state; every service is brought up with
/// `--no-deps` because ordering and readiness are the orchestrator's job.
pub struct DockerCompose<R> {
    runner: R,
    docker: String,
    project: String,
    compose_file: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Inspect {
    state: InspectState,
    config: InspectConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    #[serde(default)]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

impl<R: CommandRunner> DockerCompose<R> {
    pub fn new(
        runner: R,
        docker: impl Into<String>,
        project: impl Into<String>,
        compose_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            docker: docker.into(),
            project: project.into(),
            compose_file: compose_file.into(),
        }
    }

    fn compose_args(&self, sub: &[&str]) -> Vec<String> {
        let file = self.compose_file.display().to_string();
        let mut args = argv(&["compose", "-p", &self.project, "-f", &file]);
        args.extend(argv(sub));
        args
    }

    fn compose(&self, sub: &[&str]) -> Result<CommandOutput, DeployError> {
        Ok(self.runner.run_checked(&self.docker, &self.compose_args(sub))?)
    }

    /// Run a docker command, mapping "No such ..." to `Ok(None)`.
    fn run_allow_missing(&self, args: &[&str]) -> Result<Option<CommandOutput>, DeployError> {
        let args = argv(args);
        let out = self.runner.run(&self.docker, &args)?;
        if out.success() {
            return Ok(Some(out));
        }
        if out.stderr.to_ascii_lowercase().contains("no such") {
            return Ok(None);
        }
        Err(HostError::Command {
            command: display_command(&self.docker, &args),
            status: out
                .code
                .map(|c| format!("exit {c}"))
                .unwrap_or_else(|| "signal".to_string()),
            stderr: out.stderr.trim().to_string(),
        }
        .into())
    }
}

fn parse_inspect(service: &ServiceName, stdout: &str) -> Result<RunState, DeployError> {
    let inspect_err = |reason: String| DeployError::Inspect {
        service: service.clone(),
        reason,
    };
    let mut entries: Vec<Inspect> =
        serde_json::from_str(stdout).map_err(|e| inspect_err(e.to_string()))?;
    let Some(entry) = entries.pop() else {
        return Ok(RunState::absent(service.clone()));
    };
    Ok(RunState {
        service: service.clone(),
        container: ContainerStatus::from_docker(&entry.state.status),
        health: entry
            .state
            .health
            .map(|h| HealthStatus::from_docker(&h.status))
            .unwrap_or_default(),
        definition_hash: entry
            .config
            .labels
            .and_then(|mut labels| labels.remove(HASH_LABEL)),
    })
}

impl<R: CommandRunner> RuntimeEngine for DockerCompose<R> {
    fn declare(&self, compose: &ComposeFile) -> Result<(), DeployError> {
        let yaml = compose.to_yaml()?;
        if write_gated(&self.compose_file, &yaml, false)?.changed() {
            self.compose(&["config", "--quiet"])?;
        }
        Ok(())
    }

    fn ensure_network(&self, name: &str) -> Result<bool, DeployError> {
        if self.run_allow_missing(&["network", "inspect", name])?.is_some() {
            return Ok(false);
        }
        self.runner
            .run_checked(&self.docker, &argv(&["network", "create", name]))?;
        tracing::info!(network = name, "network created");
        Ok(true)
    }

    fn remove_network(&self, name: &str) -> Result<bool, DeployError> {
        Ok(self.run_allow_missing(&["network", "rm", name])?.is_some())
    }

    fn pull(&self, service: &ServiceName) -> Result<(), DeployError> {
        self.compose(&["pull", service.as_str()])?;
        Ok(())
    }

    fn state(&self, service: &ServiceName) -> Result<RunState, DeployError> {
        match self.run_allow_missing(&["inspect", "--type", "container", service.as_str()])? {
            Some(out) => parse_inspect(service, &out.stdout),
            None => Ok(RunState::absent(service.clone())),
        }
    }

    fn up(&self, service: &ServiceName, recreate: bool) -> Result<(), DeployError> {
        let mut sub = vec!["up", "-d", "--no-deps"];
        if recreate {
            sub.push("--force-recreate");
        }
        sub.push(service.as_str());
        self.compose(&sub)?;
        Ok(())
    }

    fn start(&self, service: &ServiceName) -> Result<(), DeployError> {
        self.compose(&["start", service.as_str()])?;
        Ok(())
    }

    fn stop(&self, service: &ServiceName) -> Result<(), DeployError> {
        self.compose(&["stop", service.as_str()])?;
        Ok(())
    }

    fn remove(&self, service: &ServiceName, volumes: bool) -> Result<(), DeployError> {
        let mut sub = vec!["rm", "-f", "-s"];
        if volumes {
            sub.push("-v");
        }
        sub.push(service.as_str());
        self.compose(&sub)?;
        Ok(())
    }

    fn remove_volume(&self, name: &str) -> Result<bool, DeployError> {
        Ok(self.run_allow_missing(&["volume", "rm", name])?.is_some())
    }

    fn exec(&self, service: &ServiceName, command: &[String]) -> Result<CommandOutput, DeployError> {
        let mut args = argv(&["exec", service.as_str()]);
        args.extend(command.iter().cloned());
        Ok(self.runner.run(&self.docker, &args)?)
    }
}
