//! External command execution behind a trait, so every host mutation can be
//! observed in tests without touching the machine.

use std::process::Command;

use crate::error::HostError;

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait CommandRunner {
    /// Run `program` with `args` to completion. A non-zero exit is an `Ok`
    /// output; only a failure to spawn is an error.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError>;

    /// Like [`CommandRunner::run`], but a non-zero exit becomes
    /// `HostError::Command`.
    fn run_checked(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
        let output = self.run(program, args)?;
        if output.success() {
            return Ok(output);
        }
        Err(HostError::Command {
            command: display_command(program, args),
            status: output
                .code
                .map(|c| format!("exit {c}"))
                .unwrap_or_else(|| "signal".to_string()),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
        (**self).run(program, args)
    }
}

/// Runs commands on the real host via `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
        tracing::debug!(command = %display_command(program, args), "exec");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| HostError::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// `["a", "b"]` → `vec!["a".to_string(), "b".to_string()]`.
pub fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

pub fn display_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}
