/*!
 * OS Process Tests
 * Supervisor driving real /bin/sh processes and process groups
 */

use crate::fakes::{Events, TIMEOUT};
use dhfs_launcher::process::OsSpawner;
use dhfs_launcher::{
    OutputSource, ProcessHandle, ProcessSpawner, ProcessSupervisor, StartupOptions,
    SupervisorEvent, SupervisorResult, SupervisorState,
};
use std::time::Duration;

/// Runs a shell script in place of the server command line
struct Shell(&'static str);

impl ProcessSpawner for Shell {
    fn spawn(&self, _argv: &[String]) -> SupervisorResult<Box<dyn ProcessHandle>> {
        let argv = ["sh", "-c", self.0].map(String::from);
        OsSpawner::new().spawn(&argv)
    }
}

fn supervise(script: &'static str) -> (ProcessSupervisor, Events) {
    let (tx, events) = Events::channel();
    let supervisor = ProcessSupervisor::builder()
        .with_spawner(Shell(script))
        .build(tx)
        .unwrap();
    supervisor
        .start(&StartupOptions::new("/opt/jdk", "/opt/dhfs/server.jar"))
        .unwrap();
    (supervisor, events)
}

fn text(events: &[SupervisorEvent], source: OutputSource) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            SupervisorEvent::Output(line) if line.source == source => Some(line.text.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_server_lifecycle_with_real_process() {
    let (supervisor, mut events) =
        supervise("echo 'booting'; echo 'Listening on: 127.0.0.1:8080'; exec sleep 60");

    let pid = supervisor.pid().unwrap();
    let startup = events.until_state(SupervisorState::Running);
    assert!(text(&startup, OutputSource::Supervisor).contains(&format!("Started! PID: {pid}")));
    assert!(text(&startup, OutputSource::Stdout).contains("booting\n"));

    supervisor.stop();
    let shutdown = events.until_state(SupervisorState::Stopped);
    assert_eq!(shutdown.first(), Some(&SupervisorEvent::StateChanged(SupervisorState::Stopping)));
    assert!(text(&shutdown, OutputSource::Supervisor).contains("Stopped! killed by signal 15"));
}

#[test]
fn test_exit_code_and_both_streams_are_reported() {
    let (supervisor, mut events) = supervise("echo out; echo err >&2; exit 3");

    let all = events.until_state(SupervisorState::Stopped);
    assert_eq!(text(&all, OutputSource::Stdout), "out\n");
    assert_eq!(text(&all, OutputSource::Stderr), "err\n");
    assert!(text(&all, OutputSource::Supervisor).ends_with("Stopped! exit code 3\n"));
    assert!(!all.contains(&SupervisorEvent::StateChanged(SupervisorState::Running)));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[test]
fn test_stop_terminates_whole_process_group() {
    // The background sleep holds the pipes open; only a group signal lets
    // the readers see EOF
    let (supervisor, mut events) =
        supervise("sleep 60 & echo 'Listening on: 127.0.0.1:8080'; wait");
    events.until_state(SupervisorState::Running);

    supervisor.stop();
    assert!(supervisor.wait_for_state(SupervisorState::Stopped, TIMEOUT));
}

#[test]
fn test_kill_reaps_process_ignoring_sigterm() {
    let (supervisor, mut events) =
        supervise("trap '' TERM; echo 'Listening on: 127.0.0.1:8080'; while true; do sleep 1; done");
    events.until_state(SupervisorState::Running);

    supervisor.stop();
    assert!(!supervisor.wait_for_state(SupervisorState::Stopped, Duration::from_millis(500)));
    assert_eq!(supervisor.state(), SupervisorState::Stopping);

    supervisor.kill();
    let tail = events.until_state(SupervisorState::Stopped);
    assert!(text(&tail, OutputSource::Supervisor).contains("Stopped! killed by signal 9"));
}

#[test]
fn test_stop_reaches_group_left_behind_by_exited_server() {
    // The shell exits at once; the background sleep keeps stdout open
    let (supervisor, mut events) = supervise("sleep 30 & exit 1");
    events.until_state(SupervisorState::Starting);
    let pid = supervisor.pid().unwrap();

    let leader = nix::unistd::Pid::from_raw(pid as i32);
    let deadline = std::time::Instant::now() + TIMEOUT;
    while nix::sys::signal::kill(leader, None::<nix::sys::signal::Signal>).is_ok() {
        assert!(std::time::Instant::now() < deadline, "shell never exited");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(supervisor.state(), SupervisorState::Starting);

    supervisor.stop();
    let tail = events.until_state(SupervisorState::Stopped);
    assert_eq!(tail.first(), Some(&SupervisorEvent::StateChanged(SupervisorState::Stopping)));
    assert!(text(&tail, OutputSource::Supervisor).contains("Stopped! exit code 1"));
}

#[test]
fn test_drop_does_not_wait_for_leftover_group_members() {
    let (supervisor, mut events) = supervise("sleep 30 & exit 0");
    events.until_state(SupervisorState::Starting);
    std::thread::sleep(Duration::from_millis(200));

    let started = std::time::Instant::now();
    drop(supervisor);
    assert!(started.elapsed() < TIMEOUT);
}

#[test]
fn test_drop_reaps_running_process() {
    let (supervisor, mut events) = supervise("echo 'Listening on: 127.0.0.1:8080'; exec sleep 60");
    events.until_state(SupervisorState::Running);
    let pid = supervisor.pid().unwrap();

    drop(supervisor);

    // Group is gone: signalling it fails with ESRCH
    let group = nix::unistd::Pid::from_raw(pid as i32);
    let delivered = nix::sys::signal::killpg(group, None::<nix::sys::signal::Signal>);
    assert!(delivered.is_err());
}
