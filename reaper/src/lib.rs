//! Reap terminated children of this process and route their exit status
//!
//! A process acting as PID 1, or spawning children that may outlive their
//! natural parent, has to collect every terminated child. [`Reaper`] does so
//! in a background task driven by `SIGCHLD`, and hands each [`ExitRecord`]
//! to whoever registered interest in that pid, whether the registration
//! comes before or after the child was reaped.
pub mod config;
pub(crate) mod daemon;
pub mod exit;
pub(crate) mod registry;
pub mod wait;

use thiserror::Error;

pub use config::ReaperConfig;
pub use daemon::{active_loops, Reaper, SpawnGuard};
pub use exit::{signal_name, ExitRecord, ResourceUsage};
pub use registry::{Notification, RegistryStatistic};

pub mod prelude {
    pub use super::config::ReaperConfig;
    pub use super::daemon::Reaper;
    pub use super::exit::{ExitRecord, ResourceUsage};
    pub use super::registry::Notification;
    pub use super::Error;
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("pid {0} is already registered")]
    AlreadyRegistered(u32),
    #[error("reaper stopped")]
    ReaperStopped,
    #[error("Fail to subscribe to child termination: `{0}`")]
    Signal(#[source] std::io::Error),
    #[error("Fail to become subreaper: `{0}`")]
    Subreaper(#[source] std::io::Error),
}
