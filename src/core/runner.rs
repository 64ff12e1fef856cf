//! Run controller: sequences test cases across iterations
//!
//! A run plans every `(iteration, case)` row up front as PENDING, then works
//! through them one at a time on a worker thread. Rows are executed strictly
//! in sequence because they share one connection and one history cursor.
//! After a stop request the remaining rows stay PENDING.

use crate::core::executor::{CancelToken, ExecutorSettings, TestExecutor};
use crate::core::line_source::LineSource;
use crate::core::logger::{LogEntry, LogKind};
use crate::core::observer::RunObserver;
use crate::core::outcome::{RunSummary, TestOutcome};
use crate::core::testcase::TestCase;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Reasons a run cannot start or complete
#[derive(Error, Debug)]
pub enum RunError {
    /// No open connection
    #[error("Not connected: connect to a port first")]
    NotConnected,

    /// Another run is still active
    #[error("A run is already in progress")]
    AlreadyRunning,

    /// Zero iterations requested
    #[error("Iterations must be at least 1")]
    InvalidIterations,

    /// Worker thread could not be spawned
    #[error("Could not start run worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// Worker thread panicked
    #[error("Run worker panicked")]
    WorkerPanicked,
}

/// Process-wide state of the current run
#[derive(Debug, Default)]
pub struct RunState {
    running: AtomicBool,
    cancel: CancelToken,
    iterations: AtomicU32,
}

impl RunState {
    /// Whether a run is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a stop was requested for the active run
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Iterations of the active (or last) run
    pub fn iterations(&self) -> u32 {
        self.iterations.load(Ordering::SeqCst)
    }
}

/// Clears the running flag when the run ends, even by panic
struct RunningGuard(Arc<RunState>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    /// Every planned row, in execution order; rows never reached stay PENDING
    pub outcomes: Vec<TestOutcome>,
    pub cancelled: bool,
}

impl RunReport {
    /// Counts over the outcomes
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_outcomes(&self.outcomes, self.cancelled)
    }

    /// Rows that actually ran, in execution order
    pub fn executed(&self) -> Vec<TestOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.is_terminal())
            .cloned()
            .collect()
    }
}

/// Handle to a run in progress
pub struct RunHandle {
    plan: Vec<TestOutcome>,
    cancel: CancelToken,
    worker: JoinHandle<RunReport>,
}

impl RunHandle {
    /// The planned rows, all PENDING
    pub fn plan(&self) -> &[TestOutcome] {
        &self.plan
    }

    /// Request a cooperative stop
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the run to end
    pub fn join(self) -> Result<RunReport, RunError> {
        self.worker.join().map_err(|_| RunError::WorkerPanicked)
    }
}

/// Starts and stops runs against a [`LineSource`]
pub struct RunController {
    source: Arc<LineSource>,
    state: Arc<RunState>,
    settings: ExecutorSettings,
}

impl RunController {
    pub fn new(source: Arc<LineSource>) -> Self {
        Self {
            source,
            state: Arc::new(RunState::default()),
            settings: ExecutorSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Shared run state
    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    /// Whether a run is active
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Token that stops whichever run is active when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.state.cancel.clone()
    }

    /// Request a cooperative stop of the active run
    pub fn stop(&self) {
        if self.state.is_running() {
            self.state.cancel.cancel();
        }
    }

    fn acquire(&self) -> Result<RunningGuard, RunError> {
        if !self.source.is_connected() {
            return Err(RunError::NotConnected);
        }
        if self
            .state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunError::AlreadyRunning);
        }
        Ok(RunningGuard(Arc::clone(&self.state)))
    }

    /// Plan `iterations × cases` rows and execute them on a worker thread.
    ///
    /// Every planned row is reported to `observer` as PENDING before this
    /// returns.
    pub fn start(
        &self,
        cases: Vec<TestCase>,
        iterations: u32,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunHandle, RunError> {
        if iterations == 0 {
            return Err(RunError::InvalidIterations);
        }
        let guard = self.acquire()?;
        self.state.iterations.store(iterations, Ordering::SeqCst);

        let plan: Vec<TestOutcome> = (1..=iterations)
            .flat_map(|iteration| {
                cases
                    .iter()
                    .enumerate()
                    .map(move |(index, case)| TestOutcome::pending(iteration, index, case.clone()))
            })
            .collect();
        for row in &plan {
            observer.on_status(row);
        }

        info!(cases = cases.len(), iterations, "run started");
        observer.on_log(&LogEntry::new(
            LogKind::Info,
            format!("Run started: {} commands x {iterations} iterations", cases.len()),
        ));

        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let settings = self.settings;
        let rows = plan.clone();
        let worker = thread::Builder::new()
            .name("run-worker".into())
            .spawn(move || run_rows(rows, &source, &state, guard, settings, &*observer))?;

        Ok(RunHandle {
            plan,
            cancel: self.state.cancel.clone(),
            worker,
        })
    }

    /// Blocking form of [`RunController::start`]
    pub fn run(
        &self,
        cases: Vec<TestCase>,
        iterations: u32,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunReport, RunError> {
        self.start(cases, iterations, observer)?.join()
    }

    /// Execute one test case on the calling thread.
    ///
    /// A stop requested before the call leaves the returned row PENDING. The
    /// cancel flag is cleared once the case is done.
    pub fn execute_single(
        &self,
        case: &TestCase,
        observer: &dyn RunObserver,
    ) -> Result<TestOutcome, RunError> {
        let guard = self.acquire()?;
        let executor = TestExecutor::new(
            self.source.history(),
            self.source.as_ref(),
            observer,
            &self.state.cancel,
        )
        .with_settings(self.settings);
        let outcome = executor.execute_case(1, 0, case);

        self.state.cancel.reset();
        drop(guard);
        Ok(outcome)
    }
}

fn run_rows(
    mut rows: Vec<TestOutcome>,
    source: &LineSource,
    state: &RunState,
    guard: RunningGuard,
    settings: ExecutorSettings,
    observer: &dyn RunObserver,
) -> RunReport {
    let run_id = Uuid::new_v4();
    let started_at = Local::now();
    let executor = TestExecutor::new(source.history(), source, observer, &state.cancel)
        .with_settings(settings);

    for row in &mut rows {
        if state.cancel.is_cancelled() {
            break;
        }
        if !source.is_connected() {
            warn!("connection closed mid-run");
        }
        *row = executor.execute(row.clone());
    }

    let cancelled = state.cancel.is_cancelled();
    if cancelled {
        observer.on_log(&LogEntry::new(LogKind::Stop, "Execution stopped by user."));
    }

    let report = RunReport {
        run_id,
        started_at,
        finished_at: Local::now(),
        outcomes: rows,
        cancelled,
    };
    let summary = report.summary();
    info!(%run_id, %summary, "run finished");

    state.cancel.reset();
    drop(guard);
    observer.on_finished(&summary);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::line_source::LineSourceOptions;
    use crate::core::observer::NullObserver;
    use crate::core::outcome::TestStatus;
    use crate::core::transport::MockConnection;
    use std::time::Duration;

    fn idle_connection_without_writes() -> MockConnection {
        let mut mock = MockConnection::new();
        mock.expect_describe().return_const("mock".to_string());
        mock.expect_is_open().return_const(true);
        mock.expect_close().returning(|| Ok(()));
        mock.expect_read_line().returning(|timeout| {
            thread::sleep(timeout);
            Ok(None)
        });
        mock
    }

    fn idle_connection() -> MockConnection {
        let mut mock = idle_connection_without_writes();
        mock.expect_write().returning(|_| Ok(()));
        mock
    }

    fn controller(connected: bool) -> RunController {
        let source = Arc::new(LineSource::new(Arc::new(NullObserver), LineSourceOptions::default()));
        if connected {
            source.attach(Arc::new(idle_connection()));
        }
        RunController::new(source)
    }

    #[test]
    fn test_run_requires_connection() {
        let ctl = controller(false);
        let err = ctl
            .start(vec![TestCase::new("a", "A")], 1, Arc::new(NullObserver))
            .err();
        assert!(matches!(err, Some(RunError::NotConnected)));
        assert!(matches!(
            ctl.execute_single(&TestCase::new("a", "A"), &NullObserver),
            Err(RunError::NotConnected)
        ));
        assert!(!ctl.is_running());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let ctl = controller(true);
        let err = ctl.start(vec![TestCase::new("a", "A")], 0, Arc::new(NullObserver)).err();
        assert!(matches!(err, Some(RunError::InvalidIterations)));
    }

    #[test]
    fn test_second_run_is_rejected_while_active() {
        let ctl = controller(true);
        let slow = TestCase::new("slow", "AT").expected("OK").wait_till(0.3);

        let handle = ctl.start(vec![slow.clone()], 1, Arc::new(NullObserver)).unwrap();
        assert!(ctl.is_running());
        assert!(matches!(
            ctl.start(vec![slow], 1, Arc::new(NullObserver)),
            Err(RunError::AlreadyRunning)
        ));

        let report = handle.join().unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert!(!ctl.is_running());
    }

    #[test]
    fn test_stop_before_start_is_honoured() {
        let ctl = controller(true);
        ctl.cancel_token().cancel();

        let report = ctl
            .run(vec![TestCase::new("ping", "AT").expected("OK")], 2, Arc::new(NullObserver))
            .unwrap();

        assert!(report.cancelled);
        assert!(report.outcomes.iter().all(|o| o.result == TestStatus::Pending));
        assert!(report.executed().is_empty());
        assert!(!ctl.state().is_cancel_requested());
    }

    #[test]
    fn test_stop_before_single_command_sends_nothing() {
        let source = Arc::new(LineSource::new(Arc::new(NullObserver), LineSourceOptions::default()));
        let mut mock = idle_connection_without_writes();
        mock.expect_write().never();
        source.attach(Arc::new(mock));
        let ctl = RunController::new(source);
        ctl.cancel_token().cancel();

        let outcome = ctl
            .execute_single(&TestCase::new("ping", "AT").expected("OK"), &NullObserver)
            .unwrap();

        assert_eq!(outcome.result, TestStatus::Pending);
        assert_eq!(outcome.attempts, 0);
        assert!(!ctl.is_running());
        assert!(!ctl.state().is_cancel_requested());
    }

    #[test]
    fn test_stop_leaves_remaining_rows_pending() {
        let ctl = controller(true);
        let case = TestCase::new("slow", "AT").expected("OK").wait_till(0.2);

        let handle = ctl.start(vec![case], 3, Arc::new(NullObserver)).unwrap();
        assert_eq!(handle.plan().len(), 3);

        // First row takes ~200 ms; stop while it is in flight.
        thread::sleep(Duration::from_millis(50));
        handle.stop();
        let report = handle.join().unwrap();

        assert!(report.cancelled);
        assert!(report.outcomes[0].is_terminal());
        assert!(report.outcomes[1..].iter().all(|o| !o.is_terminal()));
        assert_eq!(report.executed().len(), 1);
        assert!(!ctl.state().is_cancel_requested());
    }
}
