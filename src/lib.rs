/*!
 * DHFS Launcher Library
 * Supervision of the DHFS server process and its native runtime
 */

pub mod core;
pub mod monitoring;
pub mod process;
pub mod runtime;

// Re-exports
pub use crate::core::*;
pub use monitoring::{init_tracing, RunSpan};
pub use process::{
    OsSpawner, OutputLine, OutputSource, ProcessHandle, ProcessSpawner, ProcessSupervisor,
    StartupOptions, SupervisorBuilder, SupervisorConfig, SupervisorEvent, SupervisorObserver,
    SupervisorState,
};
pub use runtime::{RuntimeEntry, RuntimeLayout, RuntimeLoader};
