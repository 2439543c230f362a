/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Supervisor operation result
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Runtime loader operation result
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors surfaced by the process supervisor and its OS adapter
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SupervisorError {
    #[error("Failed to spawn '{program}': {reason}")]
    #[diagnostic(
        code(supervisor::spawn_failed),
        help("Check that the runtime home points at a valid install and that the launcher may execute it.")
    )]
    SpawnFailed { program: String, reason: String },

    #[error("Failed to signal process group {pid}: {reason}")]
    #[diagnostic(
        code(supervisor::termination_failed),
        help("The process may already be gone, or the launcher lacks permission to signal it.")
    )]
    TerminationFailed { pid: u32, reason: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] LoadError),

    #[error("I/O error: {0}")]
    #[diagnostic(code(supervisor::io))]
    Io(String),
}

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::Io(err.to_string())
    }
}

/// Errors raised while resolving the native runtime
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum LoadError {
    #[error("Runtime home not set")]
    #[diagnostic(
        code(runtime::home_not_set),
        help("Call set_home() with the runtime install directory before requesting the entry point.")
    )]
    HomeNotSet,

    #[error("Failed to load {}: {reason}", path.display())]
    #[diagnostic(
        code(runtime::library_open),
        help("Verify the runtime install contains the native library for this platform.")
    )]
    LibraryOpen { path: PathBuf, reason: String },

    #[error("Symbol {symbol} not found in {}: {reason}", path.display())]
    #[diagnostic(
        code(runtime::symbol_missing),
        help("The library loaded but does not export the expected entry point. Is this the right runtime?")
    )]
    SymbolMissing {
        path: PathBuf,
        symbol: String,
        reason: String,
    },
}
