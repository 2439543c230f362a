/*!
 * Event Dispatch
 *
 * Single FIFO queue between the supervisor and its observer. Producers
 * (caller thread, stream readers, exit callback) enqueue without blocking;
 * one dispatcher thread delivers in enqueue order. Nothing is delivered while
 * supervisor locks are held, so observers may call back into the supervisor.
 */

use super::traits::SupervisorObserver;
use super::types::{OutputLine, OutputSource, SupervisorEvent, SupervisorState};
use crate::core::limits::DISPATCHER_THREAD_NAME;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{error, trace};

enum Dispatch {
    Event(SupervisorEvent),
    Shutdown,
}

/// Producer side of the queue
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: flume::Sender<Dispatch>,
}

impl EventSink {
    pub fn output(&self, source: OutputSource, text: impl Into<String>) {
        self.send(SupervisorEvent::Output(OutputLine::new(source, text)));
    }

    pub fn state(&self, state: SupervisorState) {
        self.send(SupervisorEvent::StateChanged(state));
    }

    fn send(&self, event: SupervisorEvent) {
        if self.tx.send(Dispatch::Event(event)).is_err() {
            trace!("Dispatcher gone, dropping event");
        }
    }
}

/// Owns the dispatcher thread
pub(crate) struct EventDispatcher {
    tx: flume::Sender<Dispatch>,
    worker: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub fn spawn<O: SupervisorObserver>(observer: O) -> io::Result<Self> {
        let (tx, rx) = flume::unbounded::<Dispatch>();

        let worker = thread::Builder::new()
            .name(DISPATCHER_THREAD_NAME.to_string())
            .spawn(move || {
                for message in rx.iter() {
                    let event = match message {
                        Dispatch::Event(event) => event,
                        Dispatch::Shutdown => break,
                    };
                    let delivered = panic::catch_unwind(AssertUnwindSafe(|| match &event {
                        SupervisorEvent::Output(line) => observer.on_output_line(line),
                        SupervisorEvent::StateChanged(state) => observer.on_state_change(*state),
                    }));
                    if delivered.is_err() {
                        error!(?event, "Observer panicked while handling event");
                    }
                }
            })?;

        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    /// Deliver everything queued so far, then stop the thread
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.tx.send(Dispatch::Shutdown);

        // Dropped from inside an observer callback: cannot join ourselves
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            error!("Dispatcher thread panicked");
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
