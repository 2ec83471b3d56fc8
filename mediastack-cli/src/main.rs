//! mediastack: deploy and operate a self-hosted media stack.
//!
//! # Usage
//!
//! ```text
//! mediastack install [--set group.KEY=value]... [--non-interactive] [--skip-packages]
//! mediastack reconfigure [--rotate group.KEY]... [--set group.KEY=value]...
//! mediastack update
//! mediastack test-only
//! mediastack reset
//! mediastack wipe-db [--service riven-db]
//! mediastack wipe-db-reset [--service riven-db]
//! mediastack wipe-server [--confirm "wipe <project>"]
//! mediastack status [--json]
//! mediastack diff
//! mediastack config get|set|list
//! ```

mod commands;
mod context;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand,
    diff::DiffArgs,
    install::InstallArgs,
    lifecycle::{ResetArgs, TestOnlyArgs, UpdateArgs},
    reconfigure::ReconfigureArgs,
    status::StatusArgs,
    wipe::{WipeDbArgs, WipeServerArgs},
};
use context::Globals;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "mediastack",
    version,
    about = "Install and operate a Plex / Zurg / rclone / Zilean / Riven stack",
    long_about = None,
)]
struct Cli {
    /// State directory (default ~/.mediastack).
    #[arg(long, global = true, env = "MEDIASTACK_ROOT", value_name = "DIR")]
    root: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install packages, provision secrets, register boot units and deploy.
    Install(InstallArgs),

    /// Re-provision configuration (optionally rotating secrets) and converge.
    Reconfigure(ReconfigureArgs),

    /// Pull newer images and restart services on them.
    Update(UpdateArgs),

    /// Probe every service once and report.
    TestOnly(TestOnlyArgs),

    /// Stop everything, cycle the shared mounts and deploy again.
    Reset(ResetArgs),

    /// Delete a service's database (container, volumes, data directories).
    WipeDb(WipeDbArgs),

    /// wipe-db followed by a full deploy.
    WipeDbReset(WipeDbArgs),

    /// Remove everything mediastack created on this host.
    WipeServer(WipeServerArgs),

    /// Container state and definition drift per service.
    Status(StatusArgs),

    /// Unified diff of the compose file a deploy would write.
    Diff(DiffArgs),

    /// Read and write stored configuration values.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let globals = Globals { root: cli.root };

    match cli.command {
        Commands::Install(args) => args.run(&globals),
        Commands::Reconfigure(args) => args.run(&globals),
        Commands::Update(args) => args.run(&globals),
        Commands::TestOnly(args) => args.run(&globals),
        Commands::Reset(args) => args.run(&globals),
        Commands::WipeDb(args) => args.run(&globals, false),
        Commands::WipeDbReset(args) => args.run(&globals, true),
        Commands::WipeServer(args) => args.run(&globals),
        Commands::Status(args) => args.run(&globals),
        Commands::Diff(args) => args.run(&globals),
        Commands::Config { command } => commands::config::run(command, &globals),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
