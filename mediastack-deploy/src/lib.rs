//! # mediastack-deploy
//!
//! Everything that runs after configuration: converging containers to the
//! manifest, readiness probing, pushing settings into healthy services and
//! tearing it all down again.
//!
//! - [`runtime`]: [`RuntimeEngine`] with docker compose and in-memory backends
//! - [`orchestrator`]: [`Orchestrator::apply`], `update`, `teardown`, `status`
//! - [`health`]: [`HealthChecker`] and probes
//! - [`settings`]: [`SettingsApplier`]
//! - [`reset`]: [`ResetAgent`]
//! - [`lock`]: [`RunLock`]

pub mod diff;
pub mod error;
pub mod health;
pub mod lock;
pub mod orchestrator;
pub mod reset;
pub mod runtime;
pub mod settings;
pub mod summary;
pub mod writer;

pub use error::DeployError;
pub use health::{HealthChecker, LiveProber, Prober, Readiness};
pub use lock::RunLock;
pub use orchestrator::{
    Action, ApplyOptions, Drift, Orchestrator, Plan, RunReport, ServiceStatus, TeardownMode,
};
pub use reset::{HostCleanup, ResetAgent, ResetScope, SystemCleanup};
pub use runtime::{DockerCompose, InMemoryRuntime, RuntimeEngine};
pub use settings::{HttpSettingsClient, SettingsApplier, SettingsClient, SettingsReport};
pub use summary::{Check, CheckStatus, Summary};
pub use writer::WriteResult;
