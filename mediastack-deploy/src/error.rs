//! Error types for mediastack-deploy.

use std::path::PathBuf;

use thiserror::Error;

use mediastack_core::{ServiceName, StackError};
use mediastack_host::HostError;
use mediastack_renderer::RenderError;

/// All errors that can arise from orchestration, health and settings
/// operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Manifest, graph, ConfigStore or secret failure.
    #[error(transparent)]
    Stack(#[from] StackError),

    /// Host command or mount failure.
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// The runtime reported something that could not be interpreted.
    #[error("runtime returned unexpected output for {service}: {reason}")]
    Inspect { service: ServiceName, reason: String },

    /// A settings endpoint could not be reached or rejected the request.
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another invocation holds the run lock.
    #[error("another mediastack run (pid {pid}) holds {path}")]
    Locked { path: PathBuf, pid: u32 },

    /// A destructive operation was not confirmed with the exact phrase.
    #[error("confirmation required: type '{expected}' to proceed")]
    Confirmation { expected: String },
}

impl DeployError {
    /// `true` for errors caused by operator input rather than the environment.
    pub fn is_validation(&self) -> bool {
        match self {
            DeployError::Stack(e) => e.is_validation(),
            DeployError::Confirmation { .. } => true,
            _ => false,
        }
    }
}

/// Convenience constructor for [`DeployError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DeployError {
    DeployError::Io {
        path: path.into(),
        source,
    }
}
