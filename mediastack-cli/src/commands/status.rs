//! `mediastack status`: container state and definition drift.

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use mediastack_core::{ContainerStatus, HealthStatus};
use mediastack_deploy::{Drift, LiveProber, ServiceStatus};

use crate::context::{Env, Globals};

/// Arguments for `mediastack status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, globals: &Globals) -> Result<ExitCode> {
        let env = Env::load(globals)?;
        let (manifest, graph) = env.stack()?;
        let runtime = env.runtime(&manifest);
        let mounts = env.mounts();
        let prober = LiveProber::new(&runtime);
        let orchestrator = env.orchestrator(&manifest, &runtime, &mounts, &prober);

        let services = orchestrator
            .status(&graph)
            .context("failed to query the container runtime")?;
        let report = StatusReport {
            project: manifest.project.clone(),
            checked_at: Utc::now(),
            services,
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
        } else {
            print_table(&report);
        }

        let all_good = report
            .services
            .iter()
            .all(|s| s.run.container.is_running() && s.drift == Drift::InSync);
        Ok(if all_good {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    project: String,
    checked_at: DateTime<Utc>,
    services: Vec<ServiceStatus>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "")]
    indicator: String,
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "container")]
    container: String,
    #[tabled(rename = "health")]
    health: String,
    #[tabled(rename = "definition")]
    drift: String,
}

fn print_table(report: &StatusReport) {
    println!(
        "mediastack v{} | project {} | {} services",
        env!("CARGO_PKG_VERSION"),
        report.project,
        report.services.len(),
    );
    if report.services.is_empty() {
        println!("No services declared.");
        return;
    }

    let rows: Vec<StatusTableRow> = report
        .services
        .iter()
        .map(|s| StatusTableRow {
            indicator: indicator(s),
            service: s.run.service.to_string(),
            container: s.run.container.to_string(),
            health: s.run.health.to_string(),
            drift: drift_label(s.drift).to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.services.iter().any(|s| s.drift == Drift::Drifted) {
        println!("Run 'mediastack reconfigure' to converge changed services.");
    }
}

fn indicator(status: &ServiceStatus) -> String {
    let run = &status.run;
    match (run.container, run.health, status.drift) {
        (ContainerStatus::Absent, _, _) => "■".bright_black().bold().to_string(),
        (_, HealthStatus::Unhealthy, _) => "■".red().bold().to_string(),
        (c, _, Drift::InSync) if c.is_running() => "■".green().bold().to_string(),
        (c, _, _) if c.is_running() => "■".yellow().bold().to_string(),
        _ => "■".red().bold().to_string(),
    }
}

fn drift_label(drift: Drift) -> &'static str {
    match drift {
        Drift::InSync => "in sync",
        Drift::Drifted => "changed",
        Drift::Absent => "not deployed",
        Drift::Unknown => "unresolved",
    }
}
