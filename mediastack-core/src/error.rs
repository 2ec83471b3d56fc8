//! Error types for mediastack-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ServiceName;

/// All errors that can arise from manifest, config-store, secret and graph
/// operations.
#[derive(Debug, Error)]
pub enum StackError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` and no explicit root was given.
    #[error("cannot determine home directory; set $HOME or MEDIASTACK_ROOT")]
    HomeNotFound,

    /// The stack manifest did not exist at the expected path.
    #[error("stack manifest not found at {path}")]
    ManifestNotFound { path: PathBuf },

    /// Two services in one graph share a name.
    #[error("service '{0}' is declared more than once")]
    DuplicateService(ServiceName),

    /// A `depends_on` entry names a service that was never declared.
    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency {
        service: ServiceName,
        dependency: ServiceName,
    },

    /// The dependency graph contains a cycle through the listed services.
    #[error("dependency cycle detected: {}", format_cycle(.services))]
    Cycle { services: Vec<ServiceName> },

    /// The named service is not part of the graph.
    #[error("unknown service '{0}'")]
    UnknownService(ServiceName),

    /// Bad operator input. Raised before any mutation takes place.
    #[error("invalid value for {key}: {reason}")]
    Validation { key: String, reason: String },

    /// A binding references a config or secret value that has not been provisioned.
    #[error("{service}: {key} references {group}.{name}, which is not set")]
    UnresolvedBinding {
        service: ServiceName,
        key: String,
        group: String,
        name: String,
    },

    /// Interactive input failed (closed stdin, terminal error).
    #[error("prompt for {key} failed: {source}")]
    Prompt {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StackError {
    /// `true` for errors caused by operator input rather than the environment.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StackError::Validation { .. }
                | StackError::UnresolvedBinding { .. }
                | StackError::Cycle { .. }
                | StackError::DuplicateService(_)
                | StackError::UnknownDependency { .. }
        )
    }
}

/// Convenience constructor for [`StackError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StackError {
    StackError::Io {
        path: path.into(),
        source,
    }
}

fn format_cycle(services: &[ServiceName]) -> String {
    let mut names: Vec<&str> = services.iter().map(|s| s.0.as_str()).collect();
    if let Some(first) = names.first().copied() {
        names.push(first);
    }
    names.join(" -> ")
}
