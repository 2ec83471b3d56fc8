//! Host side effects for mediastack: external commands, the mount table,
//! systemd boot units, apt packages, fuse.conf and host facts.
//!
//! Every mutation goes through [`CommandRunner`], so the orchestration layer
//! can be exercised without root.

mod error;
pub mod command;
pub mod facts;
pub mod fuse;
pub mod mount;
pub mod mountinfo;
pub mod packages;
pub mod systemd;

pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use error::HostError;
pub use facts::HostFacts;
pub use mount::{MountControl, MountOutcome, MountPreparer};
pub use packages::AptPackages;
pub use systemd::BootUnits;
