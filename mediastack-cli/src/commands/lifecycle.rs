//! `mediastack update`, `test-only` and `reset`.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use mediastack_deploy::{
    ApplyOptions, HealthChecker, LiveProber, ResetAgent, ResetScope, SystemCleanup,
};

use super::{deploy, DeployMode};
use crate::context::{Env, Globals};
use crate::output;

/// Arguments for `mediastack update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {}

impl UpdateArgs {
    pub fn run(self, globals: &Globals) -> Result<ExitCode> {
        let env = Env::load(globals)?;
        let _lock = env.lock()?;
        let (manifest, graph) = env.stack()?;

        output::step("Pulling images and restarting services");
        let summary = deploy(&env, &manifest, &graph, DeployMode::Update)?;
        Ok(output::finish(&summary))
    }
}

/// Arguments for `mediastack test-only`.
#[derive(Args, Debug)]
pub struct TestOnlyArgs {}

impl TestOnlyArgs {
    pub fn run(self, globals: &Globals) -> Result<ExitCode> {
        let env = Env::load(globals)?;
        let (manifest, graph) = env.stack()?;
        let runtime = env.runtime(&manifest);
        let prober = LiveProber::new(&runtime);

        output::step("Probing services");
        let summary = HealthChecker::new(&prober)
            .check_all(&graph, &runtime)
            .context("health check failed")?;
        Ok(output::finish(&summary))
    }
}

/// Arguments for `mediastack reset`.
#[derive(Args, Debug)]
pub struct ResetArgs {}

impl ResetArgs {
    pub fn run(self, globals: &Globals) -> Result<ExitCode> {
        let env = Env::load(globals)?;
        let _lock = env.lock()?;
        let (manifest, graph) = env.stack()?;
        let runtime = env.runtime(&manifest);
        let mounts = env.mounts();
        let prober = LiveProber::new(&runtime);
        let orchestrator = env.orchestrator(&manifest, &runtime, &mounts, &prober);
        let cleanup = SystemCleanup {
            units: env.boot_units(),
            packages: env.packages(),
        };
        let agent = ResetAgent::new(&orchestrator, &env.root, &cleanup);

        output::step("Restarting the stack");
        let summary = agent
            .reset(&graph, ResetScope::Soft, ApplyOptions::default())
            .context("reset failed")?;
        Ok(output::finish(&summary))
    }
}
