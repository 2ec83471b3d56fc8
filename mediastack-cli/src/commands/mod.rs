pub mod config;
pub mod diff;
pub mod install;
pub mod lifecycle;
pub mod reconfigure;
pub mod status;
pub mod wipe;

use std::collections::HashMap;
use std::io::IsTerminal;

use anyhow::{bail, Context, Result};

use mediastack_core::secrets::{parse_assignment, parse_ref, validate};
use mediastack_core::{
    ConfigRef, DeploymentGraph, NoPrompt, Prompter, SecretProvisioner, StackManifest,
    StdinPrompter,
};
use mediastack_deploy::{ApplyOptions, LiveProber, Summary};

use crate::context::Env;

/// Whether to prompt: not disabled by flag and stdin is a terminal.
pub(crate) fn interactive(non_interactive: bool) -> bool {
    !non_interactive && std::io::stdin().is_terminal()
}

/// Parsed and validated `--set` and `--rotate` arguments.
#[derive(Debug, Default)]
pub(crate) struct Inputs {
    supplied: HashMap<ConfigRef, String>,
    plain: Vec<(ConfigRef, String)>,
    rotate: Vec<ConfigRef>,
}

impl Inputs {
    /// Check every argument against `manifest` without writing anything.
    /// `--set` values for undeclared keys become plain configuration.
    pub(crate) fn check(
        manifest: &StackManifest,
        set: &[String],
        rotate: &[String],
    ) -> Result<Self> {
        let mut inputs = Self::default();
        for raw in set {
            let (target, value) = parse_assignment(raw)?;
            match manifest.secrets.iter().find(|s| s.config_ref() == target) {
                Some(spec) => {
                    validate(&spec.key, &value, &spec.constraint)?;
                    inputs.supplied.insert(target, value);
                }
                None => inputs.plain.push((target, value)),
            }
        }

        for raw in rotate {
            let target = parse_ref(raw)?;
            if !manifest.secrets.iter().any(|s| s.config_ref() == target) {
                bail!("cannot rotate {target}: not a declared secret");
            }
            inputs.rotate.push(target);
        }
        Ok(inputs)
    }
}

/// Provision every declared secret, honouring checked `--set` values and
/// `--rotate` targets, then store the plain configuration values.
pub(crate) fn provision(
    env: &Env,
    manifest: &StackManifest,
    inputs: Inputs,
    interactive: bool,
) -> Result<Summary> {
    let Inputs {
        supplied,
        plain,
        rotate,
    } = inputs;
    let prompter: &dyn Prompter = if interactive { &StdinPrompter } else { &NoPrompt };
    let provisioner = SecretProvisioner::new(&env.store, prompter).with_supplied(supplied);
    let secrets = provisioner
        .provision_all(&manifest.secrets, &rotate)
        .context("secret provisioning failed")?;

    let mut summary = Summary::new();
    for (spec, secret) in manifest.secrets.iter().zip(&secrets) {
        let method = format!("{:?}", secret.generation_method).to_lowercase();
        summary.pass(format!("secret {}", spec.config_ref()), method);
    }
    for (target, value) in plain {
        env.store
            .set(&target.group, &target.key, &value)
            .with_context(|| format!("failed to store {target}"))?;
        summary.pass(format!("config {target}"), "set");
    }
    Ok(summary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeployMode {
    Apply,
    Update,
}

/// Converge the stack and push settings into the services that came up
/// healthy.
pub(crate) fn deploy(
    env: &Env,
    manifest: &StackManifest,
    graph: &DeploymentGraph,
    mode: DeployMode,
) -> Result<Summary> {
    let runtime = env.runtime(manifest);
    let mounts = env.mounts();
    let prober = LiveProber::new(&runtime);
    let orchestrator = env.orchestrator(manifest, &runtime, &mounts, &prober);

    let report = match mode {
        DeployMode::Apply => orchestrator.apply(graph, ApplyOptions::default()),
        DeployMode::Update => orchestrator.update(graph, ApplyOptions::default()),
    }
    .context("deploy failed")?;

    let mut summary = report.summary();
    summary.extend(env.push_settings(graph, &report));
    Ok(summary)
}
