//! `mediastack wipe-db`, `wipe-db-reset` and `wipe-server`.

use std::io::{BufRead, IsTerminal, Write};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use mediastack_core::ServiceName;
use mediastack_deploy::{ApplyOptions, LiveProber, ResetAgent, ResetScope, SystemCleanup};

use crate::context::{Env, Globals};
use crate::output;

/// Arguments for `mediastack wipe-db` and `wipe-db-reset`.
#[derive(Args, Debug)]
pub struct WipeDbArgs {
    /// Database service to wipe; its dependents are stopped first.
    #[arg(long, default_value = "riven-db")]
    pub service: String,
}

impl WipeDbArgs {
    pub fn run(self, globals: &Globals, then_apply: bool) -> Result<ExitCode> {
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
        let service = ServiceName::from(self.service.as_str());

        output::step(&format!("Wiping {service}"));
        let summary = if then_apply {
            agent.wipe_data_and_apply(&graph, &service, ApplyOptions::default())
        } else {
            agent.wipe_data(&graph, &service).map(|report| report.summary())
        }
        .with_context(|| format!("wipe of {service} failed"))?;
        Ok(output::finish(&summary))
    }
}

/// Arguments for `mediastack wipe-server`.
#[derive(Args, Debug)]
pub struct WipeServerArgs {
    /// Confirmation phrase, `wipe <project>`. Prompted for when omitted on
    /// a terminal.
    #[arg(long, value_name = "PHRASE")]
    pub confirm: Option<String>,
}

impl WipeServerArgs {
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

        let expected = agent.confirmation_phrase();
        let confirmation = match self.confirm {
            Some(phrase) => phrase,
            None => ask_confirmation(&expected, &env)?,
        };

        output::step("Wiping the server");
        let summary = agent
            .reset(
                &graph,
                ResetScope::Hard { confirmation },
                ApplyOptions::default(),
            )
            .context("wipe-server refused")?;
        Ok(output::finish(&summary))
    }
}

fn ask_confirmation(expected: &str, env: &Env) -> Result<String> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        bail!("refusing to wipe without confirmation; pass --confirm \"{expected}\"");
    }
    println!(
        "{} This removes every container, volume, data directory, boot unit and \
         engine package managed by mediastack, and deletes {}.",
        "WARNING:".red().bold(),
        env.root.display()
    );
    print!("Type '{expected}' to continue: ");
    std::io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("failed to read confirmation")?;
    Ok(line)
}
