//! `mediastack reconfigure`: re-provision configuration and converge.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use super::{deploy, interactive, provision, DeployMode, Inputs};
use crate::context::{Env, Globals};
use crate::output;

/// Arguments for `mediastack reconfigure`.
#[derive(Args, Debug)]
pub struct ReconfigureArgs {
    /// Replace a stored secret with a fresh value.
    #[arg(long, value_name = "GROUP.KEY")]
    pub rotate: Vec<String>,

    /// Set a secret or configuration value.
    #[arg(long = "set", value_name = "GROUP.KEY=VALUE")]
    pub set: Vec<String>,

    /// Never prompt.
    #[arg(long)]
    pub non_interactive: bool,
}

impl ReconfigureArgs {
    pub fn run(self, globals: &Globals) -> Result<ExitCode> {
        let env = Env::load(globals)?;
        let (manifest, graph) = env.stack()?;
        let inputs = Inputs::check(&manifest, &self.set, &self.rotate)?;
        let _lock = env.lock()?;

        output::step("Configuration");
        let mut summary = provision(&env, &manifest, inputs, interactive(self.non_interactive))?;

        // Mounts may have been added or moved in the manifest.
        let renderer = env.renderer()?;
        let units = env
            .boot_units()
            .install(&renderer, &manifest.mounts)
            .context("failed to register boot units")?;
        if units.changed() {
            summary.pass("boot units", format!("{} updated", units.written.len()));
        }

        output::step("Deploy");
        summary.extend(deploy(&env, &manifest, &graph, DeployMode::Apply)?);
        Ok(output::finish(&summary))
    }
}
