/*!
 * Process Types
 * Common types for process supervision
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// No process is running
    Stopped,
    /// Process spawned, readiness marker not seen yet
    Starting,
    /// Process reported it is serving
    Running,
    /// Termination requested, waiting for the OS to report exit
    Stopping,
}

impl SupervisorState {
    /// True while a run is in flight
    #[inline]
    pub fn is_active(self) -> bool {
        !matches!(self, SupervisorState::Stopped)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SupervisorState::Stopped => "Stopped",
            SupervisorState::Starting => "Starting",
            SupervisorState::Running => "Running",
            SupervisorState::Stopping => "Stopping",
        };
        f.write_str(label)
    }
}

/// Where a forwarded output line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSource {
    Stdout,
    Stderr,
    /// Lines produced by the supervisor itself (startup, stop, diagnostics)
    Supervisor,
}

impl fmt::Display for OutputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputSource::Stdout => "stdout",
            OutputSource::Stderr => "stderr",
            OutputSource::Supervisor => "supervisor",
        })
    }
}

/// One chunk of decoded output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub source: OutputSource,
    pub text: String,
}

impl OutputLine {
    pub fn new(source: OutputSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

/// Notification published to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Output(OutputLine),
    StateChanged(SupervisorState),
}

/// Which termination request to deliver to the process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGTERM / taskkill without /F
    Graceful,
    /// SIGKILL / taskkill /F
    Force,
}

/// How the supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn with_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitReport {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => f.write_str("exit status unknown"),
        }
    }
}
