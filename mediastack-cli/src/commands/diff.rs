//! `mediastack diff`: unified diff of the compose file a deploy would write.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use mediastack_core::paths;
use mediastack_deploy::diff::diff_file;
use mediastack_deploy::LiveProber;

use crate::context::{Env, Globals};

/// Arguments for `mediastack diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {}

impl DiffArgs {
    pub fn run(self, globals: &Globals) -> Result<ExitCode> {
        let env = Env::load(globals)?;
        let (manifest, graph) = env.stack()?;

        // Planning touches neither the runtime nor the mount table.
        let runtime = env.runtime(&manifest);
        let mounts = env.mounts();
        let prober = LiveProber::new(&runtime);
        let plan = env
            .orchestrator(&manifest, &runtime, &mounts, &prober)
            .plan(&graph)
            .context("failed to plan the deployment")?;
        let rendered = plan
            .compose
            .to_yaml()
            .context("failed to render the compose file")?;

        let path = paths::compose_file_path(&env.root);
        match diff_file(&path, "docker-compose.yml", &rendered)? {
            None => println!("No differences for {}.", path.display()),
            Some(diff) => {
                print!("{}", diff.unified_diff);
                if !diff.unified_diff.ends_with('\n') {
                    println!();
                }
            }
        }
        Ok(ExitCode::SUCCESS)
    }
}
