//! Terminal rendering of summaries.

use std::process::ExitCode;

use colored::Colorize;

use mediastack_deploy::{CheckStatus, Summary};

fn marker(status: CheckStatus) -> String {
    match status {
        CheckStatus::Pass => "✓".green().bold().to_string(),
        CheckStatus::Warn => "!".yellow().bold().to_string(),
        CheckStatus::Fail => "✗".red().bold().to_string(),
    }
}

/// Print every check, then the status line. Exit code 1 on any failure or
/// warning.
pub fn finish(summary: &Summary) -> ExitCode {
    for check in &summary.checks {
        println!("  {} {:<24} {}", marker(check.status), check.name, check.detail);
    }
    let line = summary.status_line();
    if summary.is_success() {
        println!("{}", line.green());
        ExitCode::SUCCESS
    } else {
        println!("{}", line.yellow());
        ExitCode::FAILURE
    }
}

pub fn step(title: &str) {
    println!("{} {}", "==>".blue().bold(), title.bold());
}
