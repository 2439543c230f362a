/*!
 * Scripted Fake Processes
 * Spawner and handle doubles driven from the test thread
 */

use dhfs_launcher::process::{
    ExitCallback, ExitReport, OutputStream, ProcessHandle, ProcessSpawner, SupervisorEvent,
    SupervisorState, TerminationSignal,
};
use dhfs_launcher::{SupervisorError, SupervisorResult};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const FAKE_PID: u32 = 4100;
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking stream fed one message per read; EOF once every sender is gone
struct ChannelReader {
    rx: flume::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(bytes) => self.pending = bytes,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ControlState {
    stdout: Option<flume::Sender<Vec<u8>>>,
    stderr: Option<flume::Sender<Vec<u8>>>,
    exit: Option<ExitCallback>,
    terminations: Vec<TerminationSignal>,
}

/// Test-side remote for one fake process
#[derive(Clone)]
pub struct FakeControl {
    pid: u32,
    state: Arc<Mutex<ControlState>>,
    live_streams: Arc<AtomicUsize>,
}

impl FakeControl {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn stdout(&self, text: &str) {
        let state = self.state.lock();
        if let Some(tx) = &state.stdout {
            tx.send(text.as_bytes().to_vec()).unwrap();
        }
    }

    pub fn stderr(&self, text: &str) {
        let state = self.state.lock();
        if let Some(tx) = &state.stderr {
            tx.send(text.as_bytes().to_vec()).unwrap();
        }
    }

    /// Readers not yet dropped by the supervisor
    pub fn open_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> Vec<TerminationSignal> {
        self.state.lock().terminations.clone()
    }

    pub fn exit_registered(&self) -> bool {
        self.state.lock().exit.is_some()
    }

    /// Report `report` from a fresh thread while both streams stay open,
    /// like a leader whose group still holds its pipes
    pub fn exit_leaving_streams(&self, report: ExitReport) -> thread::JoinHandle<()> {
        let callback = self.state.lock().exit.take();
        match callback {
            Some(callback) => thread::spawn(move || callback(report)),
            None => panic!("exit callback not registered"),
        }
    }

    /// Close both streams without reporting an exit
    pub fn close_streams(&self) {
        let mut state = self.state.lock();
        state.stdout = None;
        state.stderr = None;
    }

    /// Close both streams and report `report` from this thread
    pub fn exit(&self, report: ExitReport) {
        let callback = {
            let mut state = self.state.lock();
            state.stdout = None;
            state.stderr = None;
            state.exit.take()
        };
        match callback {
            Some(callback) => callback(report),
            None => panic!("exit callback not registered"),
        }
    }
}

struct FakeProcess {
    control: FakeControl,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    fail_terminate: bool,
    exit_on_terminate: bool,
}

impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        self.control.pid
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    fn terminate(&self, signal: TerminationSignal) -> SupervisorResult<()> {
        self.control.state.lock().terminations.push(signal);
        if self.fail_terminate {
            return Err(SupervisorError::TerminationFailed {
                pid: self.control.pid,
                reason: "Operation not permitted".to_string(),
            });
        }
        if self.exit_on_terminate {
            let control = self.control.clone();
            let report = match signal {
                TerminationSignal::Graceful => ExitReport::with_signal(15),
                TerminationSignal::Force => ExitReport::with_signal(9),
            };
            thread::spawn(move || control.exit(report));
        }
        Ok(())
    }

    fn on_exit(&mut self, callback: ExitCallback) {
        self.control.state.lock().exit = Some(callback);
    }
}

/// Spawner handing out [`FakeProcess`]es; clones share the spawn log
#[derive(Clone, Default)]
pub struct FakeSpawner {
    spawned: Arc<Mutex<Vec<FakeControl>>>,
    argv: Arc<Mutex<Vec<Vec<String>>>>,
    fail: bool,
    fail_terminate: bool,
    exit_on_terminate: bool,
    gate: Option<(flume::Sender<()>, flume::Receiver<()>)>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every spawn fails like a missing executable
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Termination requests fail with EPERM
    pub fn stubborn() -> Self {
        Self {
            fail_terminate: true,
            ..Self::default()
        }
    }

    /// Processes exit as soon as they are signalled
    pub fn obedient() -> Self {
        Self {
            exit_on_terminate: true,
            ..Self::default()
        }
    }

    /// spawn() announces itself on the returned receiver and then blocks
    /// until the returned sender fires
    pub fn gated() -> (Self, flume::Receiver<()>, flume::Sender<()>) {
        let (entered_tx, entered_rx) = flume::unbounded();
        let (release_tx, release_rx) = flume::unbounded();
        let spawner = Self {
            gate: Some((entered_tx, release_rx)),
            ..Self::default()
        };
        (spawner, entered_rx, release_tx)
    }

    pub fn spawn_count(&self) -> usize {
        self.argv.lock().len()
    }

    pub fn last_argv(&self) -> Option<Vec<String>> {
        self.argv.lock().last().cloned()
    }

    pub fn last(&self) -> FakeControl {
        self.spawned
            .lock()
            .last()
            .cloned()
            .expect("nothing spawned yet")
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, argv: &[String]) -> SupervisorResult<Box<dyn ProcessHandle>> {
        self.argv.lock().push(argv.to_vec());

        if let Some((entered, release)) = &self.gate {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }

        if self.fail {
            return Err(SupervisorError::SpawnFailed {
                program: argv[0].clone(),
                reason: "No such file or directory (os error 2)".to_string(),
            });
        }

        let pid = FAKE_PID + self.spawned.lock().len() as u32;
        let live = Arc::new(AtomicUsize::new(2));
        let (out_tx, out_rx) = flume::unbounded();
        let (err_tx, err_rx) = flume::unbounded();

        let control = FakeControl {
            pid,
            state: Arc::new(Mutex::new(ControlState {
                stdout: Some(out_tx),
                stderr: Some(err_tx),
                ..ControlState::default()
            })),
            live_streams: live.clone(),
        };
        self.spawned.lock().push(control.clone());

        let stream = |rx| {
            Some(Box::new(ChannelReader {
                rx,
                pending: Vec::new(),
                live: live.clone(),
            }) as OutputStream)
        };

        Ok(Box::new(FakeProcess {
            control,
            stdout: stream(out_rx),
            stderr: stream(err_rx),
            fail_terminate: self.fail_terminate,
            exit_on_terminate: self.exit_on_terminate,
        }))
    }
}

/// Observer channel with helpers for waiting on notifications
pub struct Events {
    rx: flume::Receiver<SupervisorEvent>,
    seen: Vec<SupervisorEvent>,
}

impl Events {
    pub fn channel() -> (flume::Sender<SupervisorEvent>, Self) {
        let (tx, rx) = flume::unbounded();
        (tx, Self { rx, seen: Vec::new() })
    }

    /// Next notification, or panic after [`TIMEOUT`]
    pub fn next(&mut self) -> SupervisorEvent {
        let event = self
            .rx
            .recv_timeout(TIMEOUT)
            .unwrap_or_else(|e| panic!("no notification after {:?}: {e}", TIMEOUT));
        self.seen.push(event.clone());
        event
    }

    /// Collect notifications up to and including the state change to `state`
    pub fn until_state(&mut self, state: SupervisorState) -> Vec<SupervisorEvent> {
        let mut batch = Vec::new();
        loop {
            let event = self.next();
            let done = event == SupervisorEvent::StateChanged(state);
            batch.push(event);
            if done {
                return batch;
            }
        }
    }

    /// Assert nothing else arrives within `quiet`
    pub fn assert_quiet(&self, quiet: Duration) {
        if let Ok(event) = self.rx.recv_timeout(quiet) {
            panic!("unexpected notification: {event:?}");
        }
    }

    /// Everything received so far
    pub fn seen(&self) -> &[SupervisorEvent] {
        &self.seen
    }

    pub fn drain(&mut self) -> Vec<SupervisorEvent> {
        let rest: Vec<_> = self.rx.try_iter().collect();
        self.seen.extend(rest.iter().cloned());
        rest
    }
}

pub fn output(source: dhfs_launcher::OutputSource, text: &str) -> SupervisorEvent {
    SupervisorEvent::Output(dhfs_launcher::OutputLine::new(source, text))
}

pub fn state(state: SupervisorState) -> SupervisorEvent {
    SupervisorEvent::StateChanged(state)
}
