/*!
 * Process Traits
 * Seams between the supervisor, the OS, and whoever listens to it
 */

use super::types::{ExitReport, OutputLine, SupervisorEvent, SupervisorState, TerminationSignal};
use crate::core::errors::SupervisorResult;
use crate::core::types::Pid;
use std::io::Read;

/// Readable output stream of a child process
pub type OutputStream = Box<dyn Read + Send + 'static>;

/// Termination callback, invoked once with the exit report
pub type ExitCallback = Box<dyn FnOnce(ExitReport) + Send + 'static>;

/// Creates supervised processes
pub trait ProcessSpawner: Send + Sync {
    /// Spawn `argv[0]` with the remaining arguments as its own process group,
    /// stdout/stderr captured
    fn spawn(&self, argv: &[String]) -> SupervisorResult<Box<dyn ProcessHandle>>;
}

/// A spawned process, owned by the supervisor for one run
pub trait ProcessHandle: Send {
    /// OS process identifier
    fn pid(&self) -> Pid;

    /// Take the stdout stream; `None` once taken
    fn take_stdout(&mut self) -> Option<OutputStream>;

    /// Take the stderr stream; `None` once taken
    fn take_stderr(&mut self) -> Option<OutputStream>;

    /// Signal the process and everything in its group
    fn terminate(&self, signal: TerminationSignal) -> SupervisorResult<()>;

    /// Register the termination callback
    ///
    /// The callback runs at most once, on a thread the caller does not own,
    /// and never before this call. Implementations must not invoke it from
    /// inside `on_exit` or `terminate`; the supervisor holds its lock there.
    fn on_exit(&mut self, callback: ExitCallback);
}

/// Receives supervisor notifications
///
/// Calls arrive on the dispatcher thread, one at a time, in the order the
/// supervisor produced them.
pub trait SupervisorObserver: Send + 'static {
    fn on_output_line(&self, line: &OutputLine);

    fn on_state_change(&self, state: SupervisorState);
}

/// Lets a client consume notifications as a channel
impl SupervisorObserver for flume::Sender<SupervisorEvent> {
    fn on_output_line(&self, line: &OutputLine) {
        let _ = self.send(SupervisorEvent::Output(line.clone()));
    }

    fn on_state_change(&self, state: SupervisorState) {
        let _ = self.send(SupervisorEvent::StateChanged(state));
    }
}
