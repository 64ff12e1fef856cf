//! Observer sinks for run status and session log events
//!
//! Background threads never touch display state. They report through a
//! [`RunObserver`]; front ends usually install a [`ChannelObserver`] and drain
//! the queue on their own thread.

use crate::core::logger::{LogEntry, SessionLogger};
use crate::core::outcome::{RunSummary, TestOutcome};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// Receiver of run notifications. Implementations must be cheap and must not
/// block for long: they are called from the worker and reader threads.
pub trait RunObserver: Send + Sync {
    /// A row changed state (planned, running, or finished)
    fn on_status(&self, outcome: &TestOutcome);

    /// A send, receive, verdict, error or info event
    fn on_log(&self, entry: &LogEntry);

    /// The run is over; called exactly once per run
    fn on_finished(&self, _summary: &RunSummary) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl RunObserver for NullObserver {
    fn on_status(&self, _outcome: &TestOutcome) {}
    fn on_log(&self, _entry: &LogEntry) {}
}

/// Writes every log event to the session log, synchronously
impl RunObserver for Mutex<SessionLogger> {
    fn on_status(&self, _outcome: &TestOutcome) {}

    fn on_log(&self, entry: &LogEntry) {
        self.lock().log(entry.clone());
    }

    fn on_finished(&self, summary: &RunSummary) {
        self.lock().log(LogEntry::new(
            crate::core::logger::LogKind::Info,
            format!("Run finished. {summary}"),
        ));
    }
}

/// Message carried by a [`ChannelObserver`]
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Row state change
    Status(TestOutcome),
    /// Log event
    Log(LogEntry),
    /// End of run
    Finished(RunSummary),
}

/// Forwards notifications into a bounded queue
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<RunEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its queue
    pub fn bounded(capacity: usize) -> (Self, Receiver<RunEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }

    /// Create an observer whose queue never blocks the sender
    pub fn unbounded() -> (Self, Receiver<RunEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: RunEvent) {
        // Receiver gone means nobody is watching any more.
        let _ = self.tx.send(event);
    }
}

impl RunObserver for ChannelObserver {
    fn on_status(&self, outcome: &TestOutcome) {
        self.send(RunEvent::Status(outcome.clone()));
    }

    fn on_log(&self, entry: &LogEntry) {
        self.send(RunEvent::Log(entry.clone()));
    }

    fn on_finished(&self, summary: &RunSummary) {
        self.send(RunEvent::Finished(*summary));
    }
}

/// Broadcasts to several observers in order
#[derive(Clone, Default)]
pub struct Observers {
    sinks: Vec<Arc<dyn RunObserver>>,
}

impl Observers {
    /// No sinks
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn RunObserver>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl RunObserver for Observers {
    fn on_status(&self, outcome: &TestOutcome) {
        for sink in &self.sinks {
            sink.on_status(outcome);
        }
    }

    fn on_log(&self, entry: &LogEntry) {
        for sink in &self.sinks {
            sink.on_log(entry);
        }
    }

    fn on_finished(&self, summary: &RunSummary) {
        for sink in &self.sinks {
            sink.on_finished(summary);
        }
    }
}
