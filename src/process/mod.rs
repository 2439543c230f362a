/*!
 * Process Module
 * Launching, supervising, and stopping the backend server process
 */

pub mod config;
mod dispatch;
pub mod executor;
pub mod options;
pub mod reader;
pub mod supervisor;
pub mod supervisor_builder;
pub mod traits;
pub mod types;

// Re-export for convenience
pub use config::SupervisorConfig;
pub use executor::{OsProcess, OsSpawner};
pub use options::StartupOptions;
pub use reader::{ChunkDecoder, LineScanner};
pub use supervisor::ProcessSupervisor;
pub use supervisor_builder::SupervisorBuilder;
pub use traits::{ExitCallback, OutputStream, ProcessHandle, ProcessSpawner, SupervisorObserver};
pub use types::{
    ExitReport, OutputLine, OutputSource, SupervisorEvent, SupervisorState, TerminationSignal,
};
