/*!
 * Process Supervisor
 *
 * Owns the lifecycle of one external process:
 *
 *   Stopped --start()--> Starting --marker--> Running
 *   {Starting, Running} --stop()--> Stopping --exit--> Stopped
 *
 * One mutex guards the state and the active run. It is held only for the
 * instant of a transition, never across the spawn call, stream reads, or
 * reader joins. Exit reports arrive on a thread owned by the process adapter
 * and go through the same lock as start/stop.
 *
 * Between entering Starting and receiving the spawned handle, start() runs
 * unlocked (the spawn window). The run exists but has no handle yet; a stop()
 * arriving then is recorded and delivered as soon as the handle lands.
 */

use super::config::SupervisorConfig;
use super::dispatch::{EventDispatcher, EventSink};
use super::options::StartupOptions;
use super::reader::{spawn_reader, LineScanner, Readiness};
use super::traits::{ProcessHandle, ProcessSpawner, SupervisorObserver};
use super::types::{ExitReport, OutputSource, SupervisorState, TerminationSignal};
use crate::core::errors::SupervisorResult;
use crate::core::types::{Pid, RunId};
use crate::monitoring::RunSpan;
use crate::runtime::RuntimeLoader;
use parking_lot::{Condvar, Mutex};
use std::mem;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One Start-to-Stopped cycle
struct ActiveRun {
    id: RunId,
    /// `None` only during the spawn window
    process: Option<Box<dyn ProcessHandle>>,
    readers: Vec<JoinHandle<()>>,
    /// Termination requested before the handle existed
    pending_signal: Option<TerminationSignal>,
    /// Exit reported; teardown in progress
    exited: bool,
    span: RunSpan,
}

impl ActiveRun {
    fn pending(id: RunId) -> Self {
        Self {
            id,
            process: None,
            readers: Vec::with_capacity(2),
            pending_signal: None,
            exited: false,
            span: RunSpan::new(id),
        }
    }
}

struct Core {
    state: SupervisorState,
    run: Option<ActiveRun>,
    next_run_id: RunId,
}

struct Shared {
    core: Mutex<Core>,
    changed: Condvar,
    sink: EventSink,
    config: SupervisorConfig,
}

/// Supervises one external server process
///
/// Notifications reach the observer through a FIFO dispatcher thread in the
/// order they were produced. Dropping a supervisor that is not Stopped stops
/// the process and waits for its exit.
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
    spawner: Arc<dyn ProcessSpawner>,
    runtime: Option<Arc<RuntimeLoader>>,
    dispatcher: EventDispatcher,
}

impl ProcessSupervisor {
    /// Supervisor spawning real OS processes with default settings
    pub fn new<O: SupervisorObserver>(observer: O) -> SupervisorResult<Self> {
        super::SupervisorBuilder::new().build(observer)
    }

    pub fn builder() -> super::SupervisorBuilder {
        super::SupervisorBuilder::new()
    }

    pub(super) fn from_parts<O: SupervisorObserver>(
        observer: O,
        spawner: Arc<dyn ProcessSpawner>,
        config: SupervisorConfig,
        runtime: Option<Arc<RuntimeLoader>>,
    ) -> SupervisorResult<Self> {
        let dispatcher = EventDispatcher::spawn(observer)?;
        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                state: SupervisorState::Stopped,
                run: None,
                next_run_id: 0,
            }),
            changed: Condvar::new(),
            sink: dispatcher.sink(),
            config,
        });

        Ok(Self {
            shared,
            spawner,
            runtime,
            dispatcher,
        })
    }

    /// Current state
    pub fn state(&self) -> SupervisorState {
        self.shared.core.lock().state
    }

    /// PID of the supervised process, once spawned
    pub fn pid(&self) -> Option<Pid> {
        let core = self.shared.core.lock();
        core.run
            .as_ref()
            .and_then(|run| run.process.as_ref())
            .map(|process| process.pid())
    }

    /// Launch the process described by `options`
    ///
    /// No-op unless Stopped. Returns once the process is spawned and its
    /// readers are running; never waits for readiness. A spawn or runtime
    /// failure leaves the supervisor Stopped and is returned to the caller.
    pub fn start(&self, options: &StartupOptions) -> SupervisorResult<()> {
        let run_id = {
            let mut core = self.shared.core.lock();
            if core.state != SupervisorState::Stopped {
                debug!(state = %core.state, "Start ignored, run already in flight");
                return Ok(());
            }
            core.next_run_id += 1;
            let run_id = core.next_run_id;
            core.state = SupervisorState::Starting;
            core.run = Some(ActiveRun::pending(run_id));
            self.shared.changed.notify_all();
            run_id
        };

        // Spawn window: lock released
        let spawned = self
            .preflight(options)
            .and_then(|()| self.spawner.spawn(&options.build_arguments()));

        let process = match spawned {
            Ok(process) => process,
            Err(e) => {
                let mut core = self.shared.core.lock();
                core.state = SupervisorState::Stopped;
                core.run = None;
                self.shared.changed.notify_all();
                error!(run_id, error = %e, "Failed to start process");
                return Err(e);
            }
        };

        self.attach(run_id, process);
        Ok(())
    }

    /// Request graceful termination of the process group
    ///
    /// No-op when Stopped or Stopping. Returns without waiting for exit. Once
    /// the process has exited, the request still reaches group members that
    /// keep its output open.
    pub fn stop(&self) {
        self.shared.request_termination(TerminationSignal::Graceful);
    }

    /// Forcefully kill the process group
    ///
    /// Also valid while Stopping, for a process that ignores the graceful
    /// request. The supervisor never escalates on its own.
    pub fn kill(&self) {
        self.shared.request_termination(TerminationSignal::Force);
    }

    /// Block until `state` is reached or `timeout` elapses
    pub fn wait_for_state(&self, state: SupervisorState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut core = self.shared.core.lock();
        while core.state != state {
            if self.shared.changed.wait_until(&mut core, deadline).timed_out() {
                return core.state == state;
            }
        }
        true
    }

    fn preflight(&self, options: &StartupOptions) -> SupervisorResult<()> {
        let Some(loader) = &self.runtime else {
            return Ok(());
        };

        loader.ensure_home(Path::new(&options.runtime_home));
        let entry = loader.entry_point()?;
        debug!(library = %entry.library().display(), "Runtime entry point resolved");
        Ok(())
    }

    /// Second half of start(): install the spawned handle into the run
    fn attach(&self, run_id: RunId, mut process: Box<dyn ProcessHandle>) {
        let shared = &self.shared;
        let mut core = shared.core.lock();
        let Core { state, run, .. } = &mut *core;

        let run = match run.as_mut() {
            Some(run) if run.id == run_id => run,
            _ => panic!("supervisor invariant violated: run {run_id} vanished during spawn"),
        };
        if *state != SupervisorState::Starting {
            panic!("supervisor invariant violated: {state} during spawn of run {run_id}");
        }

        let pid = process.pid();
        run.span.record_pid(pid);
        info!(run_id, pid, trace_id = %run.span.trace_id(), "Process started");

        shared.sink.output(OutputSource::Supervisor, format!("Started! PID: {pid}\n"));
        shared.sink.state(SupervisorState::Starting);

        let weak = Arc::downgrade(shared);
        let readiness = Readiness {
            scanner: LineScanner::new(
                shared.config.readiness_marker.clone(),
                shared.config.max_scanned_line,
            ),
            on_ready: Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.mark_ready(run_id);
                }
            }),
        };

        let streams = [
            (OutputSource::Stdout, process.take_stdout(), Some(readiness)),
            (OutputSource::Stderr, process.take_stderr(), None),
        ];
        for (source, stream, readiness) in streams {
            let Some(stream) = stream else {
                warn!(run_id, pid, stream = %source, "Process has no stream to read");
                continue;
            };
            match spawn_reader(
                source,
                pid,
                stream,
                shared.sink.clone(),
                shared.config.read_chunk_size,
                readiness,
            ) {
                Ok(reader) => run.readers.push(reader),
                Err(e) => {
                    error!(run_id, pid, stream = %source, error = %e, "Failed to spawn reader");
                    shared.sink.output(
                        OutputSource::Supervisor,
                        format!("Failed to read {source}: {e}\n"),
                    );
                    // Unread pipe would stall the child; bring the run down
                    run.pending_signal.get_or_insert(TerminationSignal::Graceful);
                }
            }
        }

        let weak = Arc::downgrade(shared);
        process.on_exit(Box::new(move |report| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_exit(run_id, report);
            }
        }));
        run.process = Some(process);

        if let Some(signal) = run.pending_signal.take() {
            debug!(run_id, pid, "Delivering stop requested during spawn");
            shared.enter(state, SupervisorState::Stopping);
            shared.deliver(run, signal);
        }
    }
}

impl Shared {
    /// Transition with notification
    fn enter(&self, state: &mut SupervisorState, next: SupervisorState) {
        let from = *state;
        debug!(%from, to = %next, "State transition");
        *state = next;
        self.sink.state(next);
        self.changed.notify_all();
    }

    /// Send a termination request; failures become an output line
    ///
    /// After the exit report the leader is reaped but the group may still
    /// hold the output pipes, so the request still goes to the group. A group
    /// that is already gone is not an error then.
    fn deliver(&self, run: &ActiveRun, signal: TerminationSignal) {
        let Some(process) = run.process.as_ref() else {
            panic!("supervisor invariant violated: signal without a process handle");
        };
        match process.terminate(signal) {
            Ok(()) => {}
            Err(e) if run.exited => {
                debug!(run_id = run.id, pid = process.pid(), error = %e, "Process group already gone");
            }
            Err(e) => {
                warn!(run_id = run.id, pid = process.pid(), error = %e, "Termination request failed");
                self.sink
                    .output(OutputSource::Supervisor, format!("Failed to stop process: {e}\n"));
            }
        }
    }

    fn request_termination(&self, signal: TerminationSignal) {
        let mut core = self.core.lock();
        let Core { state, run, .. } = &mut *core;

        let run = match (*state, run.as_mut()) {
            (SupervisorState::Stopped, _) => {
                debug!("Stop ignored, nothing running");
                return;
            }
            (SupervisorState::Stopping, _) if signal == TerminationSignal::Graceful => {
                debug!("Stop ignored, already stopping");
                return;
            }
            (_, Some(run)) => run,
            (state, None) => {
                panic!("supervisor invariant violated: {state} without an active run")
            }
        };

        if run.process.is_none() {
            // Spawn window: start() delivers it once the handle exists
            let pending = run.pending_signal.get_or_insert(signal);
            if signal == TerminationSignal::Force {
                *pending = signal;
            }
            debug!(run_id = run.id, ?signal, "Stop recorded during spawn");
            return;
        }

        if *state != SupervisorState::Stopping {
            self.enter(state, SupervisorState::Stopping);
        }
        info!(run_id = run.id, ?signal, exited = run.exited, "Terminating process group");
        self.deliver(run, signal);
    }

    /// Readiness marker seen on the stdout of `run_id`
    fn mark_ready(&self, run_id: RunId) {
        let mut core = self.core.lock();
        let Core { state, run, .. } = &mut *core;

        let Some(run) = run.as_ref().filter(|run| run.id == run_id) else {
            debug!(run_id, "Readiness from a finished run ignored");
            return;
        };

        match *state {
            SupervisorState::Starting if run.exited => {
                debug!(run_id, "Readiness after exit suppressed");
            }
            SupervisorState::Starting => {
                info!(run_id, "Process is serving");
                self.enter(state, SupervisorState::Running);
            }
            SupervisorState::Stopping => {
                debug!(run_id, "Readiness while stopping suppressed");
            }
            SupervisorState::Running | SupervisorState::Stopped => {
                panic!("supervisor invariant violated: readiness for run {run_id} in {state}")
            }
        }
    }

    /// Exit report for `run_id`, delivered on the adapter's thread
    fn handle_exit(&self, run_id: RunId, report: ExitReport) {
        let readers = {
            let mut core = self.core.lock();
            let Some(run) = core.run.as_mut().filter(|run| run.id == run_id) else {
                debug!(run_id, exit = %report, "Stale exit report ignored");
                return;
            };
            if run.exited {
                debug!(run_id, exit = %report, "Duplicate exit report ignored");
                return;
            }
            run.exited = true;
            run.span.record_exit(&report.to_string());
            mem::take(&mut run.readers)
        };

        // Streams hit EOF once the process group is gone
        for reader in readers {
            if reader.join().is_err() {
                error!(run_id, "Output reader panicked");
            }
        }

        let mut core = self.core.lock();
        let Core { state, run, .. } = &mut *core;
        let Some(finished) = run.take() else {
            panic!("supervisor invariant violated: run {run_id} vanished during teardown");
        };
        let previous = *state;
        let pid = finished.process.as_ref().map(|process| process.pid());
        drop(finished);

        if previous != SupervisorState::Stopping {
            warn!(run_id, ?pid, from = %previous, exit = %report, "Process exited without a stop request");
        }
        info!(run_id, ?pid, exit = %report, "Process stopped");

        self.sink
            .output(OutputSource::Supervisor, format!("Stopped! {report}\n"));
        self.enter(state, SupervisorState::Stopped);
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop();

        let mut core = self.shared.core.lock();
        while core.state != SupervisorState::Stopped {
            self.shared.changed.wait(&mut core);
        }
        drop(core);

        // Everything the run produced is queued by now
        self.dispatcher.shutdown();
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("state", &self.state())
            .field("pid", &self.pid())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}
