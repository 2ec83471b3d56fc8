use std::path::PathBuf;

use thiserror::Error;

/// Error surface for host side effects: commands, mounts, units, packages.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("mount error at {path}: {reason}")]
    Mount { path: PathBuf, reason: String },

    #[error("render error: {0}")]
    Render(#[from] mediastack_renderer::RenderError),

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("malformed {what}: {reason}")]
    Malformed { what: String, reason: String },

    /// Several independent steps of one cleanup failed; the rest ran.
    #[error("{what} incomplete: {}", join(.errors))]
    Incomplete { what: String, errors: Vec<HostError> },
}

impl HostError {
    /// `Ok` when no step failed, the error itself when one did, and
    /// [`HostError::Incomplete`] otherwise.
    pub fn from_steps(what: &str, mut errors: Vec<HostError>) -> Result<(), HostError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(HostError::Incomplete {
                what: what.to_string(),
                errors,
            }),
        }
    }
}

fn join(errors: &[HostError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> HostError {
    HostError::Io {
        path: path.into(),
        source,
    }
}
