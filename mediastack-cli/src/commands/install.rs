//! `mediastack install`: first-time setup of the whole host.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Args;

use mediastack_core::{manifest, paths, DeploymentGraph, StackManifest};
use mediastack_deploy::Summary;
use mediastack_host::{facts, fuse, SystemRunner};
use mediastack_renderer::{DefaultStackCtx, Renderer};

use super::{deploy, interactive, provision, DeployMode, Inputs};
use crate::context::{Env, Globals};
use crate::output;

/// Arguments for `mediastack install`.
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Pre-supply a secret or configuration value.
    #[arg(long = "set", value_name = "GROUP.KEY=VALUE")]
    pub set: Vec<String>,

    /// Never prompt; required secrets must come from --set.
    #[arg(long)]
    pub non_interactive: bool,

    /// Skip the apt repository and package installation.
    #[arg(long)]
    pub skip_packages: bool,

    /// Shared mount where rclone exposes the debrid library (new manifests only).
    #[arg(long, value_name = "PATH")]
    pub media_mount: Option<String>,

    /// Parent directory of service data (new manifests only).
    #[arg(long, value_name = "PATH")]
    pub data_root: Option<String>,

    /// Container timezone (new manifests only).
    #[arg(long, value_name = "TZ")]
    pub timezone: Option<String>,
}

impl InstallArgs {
    pub fn run(self, globals: &Globals) -> Result<ExitCode> {
        let env = Env::load(globals)?;
        let renderer = env.renderer()?;
        let (manifest, fresh) = self.load_or_render_manifest(&env, &renderer)?;
        let graph = DeploymentGraph::from_manifest(&manifest)?;
        let inputs = Inputs::check(&manifest, &self.set, &[])?;

        let _lock = env.lock()?;
        let mut summary = Summary::new();

        output::step("Host");
        if !self.skip_packages {
            summary.extend(install_packages(&env)?);
        }
        let fuse_changed = fuse::ensure_user_allow_other(&env.host.fuse_conf_path)
            .context("failed to enable user_allow_other")?;
        summary.pass(
            "fuse.conf",
            if fuse_changed {
                "user_allow_other enabled"
            } else {
                "already configured"
            },
        );

        output::step("Configuration");
        let manifest = if fresh {
            let saved = manifest::init_at(&env.root, manifest)?;
            println!("  wrote {}", paths::manifest_path(&env.root).display());
            saved
        } else {
            manifest
        };
        summary.extend(provision(
            &env,
            &manifest,
            inputs,
            interactive(self.non_interactive),
        )?);

        let units = env
            .boot_units()
            .install(&renderer, &manifest.mounts)
            .context("failed to register boot units")?;
        summary.pass(
            "boot units",
            format!(
                "{} written, {} unchanged",
                units.written.len(),
                units.unchanged.len()
            ),
        );

        output::step("Deploy");
        summary.extend(deploy(&env, &manifest, &graph, DeployMode::Apply)?);
        Ok(output::finish(&summary))
    }

    /// The existing manifest, or the default stack rendered with this
    /// invocation's overrides. The flag is set when nothing is on disk yet.
    fn load_or_render_manifest(
        &self,
        env: &Env,
        renderer: &Renderer,
    ) -> Result<(StackManifest, bool)> {
        let path = paths::manifest_path(&env.root);
        if path.exists() {
            let existing = manifest::load_at(&env.root)
                .with_context(|| format!("failed to load {}", path.display()))?;
            return Ok((existing, false));
        }

        let mut ctx = DefaultStackCtx::default();
        if let Some(m) = &self.media_mount {
            ctx.media_mount = m.clone();
        }
        if let Some(d) = &self.data_root {
            ctx.data_root = d.clone();
        }
        if let Some(tz) = &self.timezone {
            ctx.timezone = tz.clone();
        }
        let yaml = renderer
            .default_stack(&ctx)
            .context("failed to render the default stack")?;
        let rendered = manifest::parse(Path::new("stack.yaml.tera"), &yaml)?;
        Ok((rendered, true))
    }
}

fn install_packages(env: &Env) -> Result<Summary> {
    let facts = facts::detect(&SystemRunner, &env.host.os_release_path)
        .context("cannot identify the host distribution")?;
    if !facts.is_debian_family() {
        bail!(
            "unsupported distribution '{}': a Debian-family host is required",
            facts.pretty_name
        );
    }
    let installed = env
        .packages()
        .install(&facts)
        .context("package installation failed")?;

    let mut summary = Summary::new();
    let detail = if installed.is_empty() {
        "already installed".to_string()
    } else {
        format!("installed {}", installed.join(", "))
    };
    summary.pass("packages", detail);
    summary.pass(
        "host",
        format!("{} ({})", facts.pretty_name, facts.architecture),
    );
    Ok(summary)
}
