/*!
 * Process Executor
 * Handles OS-level process spawning, group signalling, and exit notification
 */

use super::traits::{ExitCallback, OutputStream, ProcessHandle, ProcessSpawner};
use super::types::{ExitReport, TerminationSignal};
use crate::core::errors::{SupervisorError, SupervisorResult};
use crate::core::types::Pid;
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, error, info, warn};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

#[cfg(target_os = "windows")]
const WINDOWS_CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(target_os = "windows")]
const WINDOWS_CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Spawns real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSpawner;

impl OsSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for OsSpawner {
    fn spawn(&self, argv: &[String]) -> SupervisorResult<Box<dyn ProcessHandle>> {
        let (program, args) = argv.split_first().ok_or_else(|| SupervisorError::SpawnFailed {
            program: String::new(),
            reason: "empty argument vector".to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Child leads its own group so termination reaches its children too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        #[cfg(target_os = "windows")]
        {
            cmd.creation_flags(WINDOWS_CREATE_NO_WINDOW | WINDOWS_CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let stdout = child.stdout.take().map(|s| Box::new(s) as OutputStream);
        let stderr = child.stderr.take().map(|s| Box::new(s) as OutputStream);

        // The watcher reaps the child as soon as it exits but holds the report
        // until a callback is registered
        let (exit_tx, exit_rx) = flume::bounded::<ExitCallback>(1);
        let watcher = thread::Builder::new()
            .name(format!("exit-watch-{pid}"))
            .spawn(move || {
                let report = match child.wait() {
                    Ok(status) => ExitReport::from(status),
                    Err(e) => {
                        warn!(pid, error = %e, "Failed to wait for process");
                        ExitReport::default()
                    }
                };
                debug!(pid, exit = %report, "Process exited");

                match exit_rx.recv() {
                    Ok(callback) => callback(report),
                    Err(_) => debug!(pid, "Process exited with no exit callback registered"),
                }
            });

        if let Err(e) = watcher {
            error!(pid, error = %e, "Failed to start exit watcher, killing process group");
            if let Err(kill_err) = signal_group(pid, TerminationSignal::Force) {
                error!(pid, error = %kill_err, "Failed to kill unwatched process group");
            }
            return Err(SupervisorError::SpawnFailed {
                program: program.clone(),
                reason: format!("exit watcher: {e}"),
            });
        }

        info!(pid, program = %program, args = args.len(), "Spawned OS process");

        Ok(Box::new(OsProcess {
            pid,
            stdout,
            stderr,
            exit_tx: Some(exit_tx),
        }))
    }
}

/// Handle to a process created by [`OsSpawner`]
pub struct OsProcess {
    pid: Pid,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    exit_tx: Option<flume::Sender<ExitCallback>>,
}

impl ProcessHandle for OsProcess {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    fn terminate(&self, signal: TerminationSignal) -> SupervisorResult<()> {
        signal_group(self.pid, signal)
    }

    fn on_exit(&mut self, callback: ExitCallback) {
        match self.exit_tx.take() {
            Some(tx) => {
                // Capacity 1 and a single send: never blocks
                if tx.send(callback).is_err() {
                    warn!(pid = self.pid, "Exit watcher gone before callback registration");
                }
            }
            None => warn!(pid = self.pid, "Exit callback already registered"),
        }
    }
}

/// Deliver a termination request to the process group led by `pid`
#[cfg(unix)]
fn signal_group(pid: Pid, signal: TerminationSignal) -> SupervisorResult<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid as NixPid;

    let sig = match signal {
        TerminationSignal::Graceful => Signal::SIGTERM,
        TerminationSignal::Force => Signal::SIGKILL,
    };

    killpg(NixPid::from_raw(pid as i32), sig).map_err(|e| SupervisorError::TerminationFailed {
        pid,
        reason: e.to_string(),
    })?;

    debug!(pid, signal = ?sig, "Signalled process group");
    Ok(())
}

/// Deliver a termination request to the process tree rooted at `pid`
#[cfg(target_os = "windows")]
fn signal_group(pid: Pid, signal: TerminationSignal) -> SupervisorResult<()> {
    let pid_arg = pid.to_string();
    let mut cmd = Command::new("taskkill");
    cmd.args(["/PID", pid_arg.as_str(), "/T"]);
    if signal == TerminationSignal::Force {
        cmd.arg("/F");
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(WINDOWS_CREATE_NO_WINDOW);

    let status = cmd.status().map_err(|e| SupervisorError::TerminationFailed {
        pid,
        reason: format!("taskkill failed to start: {e}"),
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(SupervisorError::TerminationFailed {
            pid,
            reason: format!("taskkill returned {status}"),
        })
    }
}
