//! Diagram sandbox - runs model-generated diagram code in throwaway
//! workspaces, harvests the images it writes and reclaims the disk space
//! afterwards.
//!
//! A request flows through [`workspace::allocate`], [`executor::Executor`],
//! [`artifact::collect`] and [`retention::schedule_cleanup`];
//! [`lifecycle::LifecycleManager`] strings them together. Each pool also
//! gets a [`retention::SweepWorker`] that removes anything older than the
//! configured maximum age.

pub mod artifact;
pub mod config;
pub mod error;
pub mod executor;
pub mod http_server;
pub mod lifecycle;
pub mod provider;
pub mod retention;
pub mod state;
pub mod workspace;

pub use config::Settings;
pub use error::{ConfigError, ExecutionError, LifecycleError, WorkspaceError};
pub use executor::JobStatus;
pub use lifecycle::{ExecutionOutcome, LifecycleManager};
pub use workspace::Pool;
