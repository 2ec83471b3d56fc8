//! `mediastack config get|set|list`: direct access to the ConfigStore.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Subcommand;

use mediastack_core::secrets::{self, parse_assignment, parse_ref};
use mediastack_core::{manifest, SecretSpec};

use crate::context::{Env, Globals};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print one value.
    Get {
        #[arg(value_name = "GROUP.KEY")]
        target: String,
    },

    /// Store one value. Declared secrets are checked against their
    /// constraints; run `mediastack reconfigure` to apply.
    Set {
        #[arg(value_name = "GROUP.KEY=VALUE")]
        assignment: String,
    },

    /// List stored keys, optionally for one group.
    List {
        group: Option<String>,

        /// Print secret values instead of masking them.
        #[arg(long)]
        reveal: bool,
    },
}

pub fn run(command: ConfigCommand, globals: &Globals) -> Result<ExitCode> {
    let env = Env::load(globals)?;
    match command {
        ConfigCommand::Get { target } => {
            let target = parse_ref(&target)?;
            match env.store.get(&target.group, &target.key)? {
                Some(value) => {
                    println!("{value}");
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("{target} is not set");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        ConfigCommand::Set { assignment } => {
            let (target, value) = parse_assignment(&assignment)?;
            if let Some(spec) = declared_secrets(&env)
                .iter()
                .find(|s| s.config_ref() == target)
            {
                secrets::validate(&spec.key, &value, &spec.constraint)?;
            }
            let _lock = env.lock()?;
            env.store
                .set(&target.group, &target.key, &value)
                .with_context(|| format!("failed to store {target}"))?;
            println!("✓ {target} updated");
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::List { group, reveal } => {
            let groups = match group {
                Some(g) => vec![g],
                None => env.store.groups()?,
            };
            let secrets = declared_secrets(&env);
            for group in groups {
                for (key, value) in env.store.entries(&group)? {
                    let secret = secrets.iter().any(|s| s.group == group && s.key == key);
                    let shown = if secret && !reveal {
                        mask(&value)
                    } else {
                        value
                    };
                    println!("{group}.{key}={shown}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Secret specs of the current manifest; none when there is no manifest yet.
fn declared_secrets(env: &Env) -> Vec<SecretSpec> {
    manifest::load_at(&env.root)
        .map(|m| m.secrets)
        .unwrap_or_default()
}

fn mask(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        "*".repeat(value.chars().count().min(8))
    }
}
