//! Test executor: one test case, one iteration
//!
//! For every attempt the executor snapshots the history length, sends the
//! command, then polls the lines that arrived after the snapshot until the
//! predicate passes, the deadline expires, or the run is cancelled. Only
//! lines from the current attempt are ever evaluated.

use crate::core::evaluator::Matcher;
use crate::core::history::HistoryBuffer;
use crate::core::line_source::LineWriter;
use crate::core::logger::{LogEntry, LogKind};
use crate::core::observer::RunObserver;
use crate::core::outcome::{TestOutcome, TestStatus};
use crate::core::testcase::TestCase;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shortest time an attempt waits for output, whatever `wait_till` says
pub const MIN_WAIT: Duration = Duration::from_millis(100);

/// Default sleep between history samples
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Cooperative cancellation flag shared by the controller and its executors
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag for the next run
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Sleep between history samples; bounds cancellation latency
    pub poll_interval: Duration,
    /// Floor applied to every attempt's timeout
    pub min_wait: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_wait: MIN_WAIT,
        }
    }
}

/// Runs single test cases against a live history
pub struct TestExecutor<'a> {
    history: &'a HistoryBuffer,
    writer: &'a dyn LineWriter,
    observer: &'a dyn RunObserver,
    cancel: &'a CancelToken,
    settings: ExecutorSettings,
}

impl<'a> TestExecutor<'a> {
    pub fn new(
        history: &'a HistoryBuffer,
        writer: &'a dyn LineWriter,
        observer: &'a dyn RunObserver,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            history,
            writer,
            observer,
            cancel,
            settings: ExecutorSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    fn log(&self, kind: LogKind, message: impl Into<String>) {
        self.observer.on_log(&LogEntry::new(kind, message));
    }

    /// Run `case` as row `index` of `iteration`
    pub fn execute_case(&self, iteration: u32, index: usize, case: &TestCase) -> TestOutcome {
        self.execute(TestOutcome::pending(iteration, index, case.clone()))
    }

    /// Drive a planned row to a terminal state.
    ///
    /// A row reached after cancellation is returned untouched and nothing is
    /// reported for it.
    pub fn execute(&self, mut outcome: TestOutcome) -> TestOutcome {
        if self.cancel.is_cancelled() {
            return outcome;
        }
        outcome.result = TestStatus::Running;
        outcome.found.clear();
        outcome.attempts = 0;
        self.observer.on_status(&outcome);

        let case = &outcome.case;
        let (matcher, error) = Matcher::compile(&case.rule());
        if let Some(e) = error {
            warn!(test = %case.name, "{e}");
            self.log(LogKind::Error, format!("{}: {e}", case.name));
        }

        let wait = case.timeout().max(self.settings.min_wait);
        let mut found = String::new();
        let mut attempts = 0;
        let mut passed = false;

        for attempt in 1..=case.retries.max(1) {
            // A RUNNING row always gets its first send.
            if attempt > 1 && self.cancel.is_cancelled() {
                break;
            }
            attempts = attempt;

            // Snapshot before sending so a fast reply cannot be missed.
            let start = self.history.len();
            self.log(LogKind::Send, case.command.clone());
            if let Err(e) = self.writer.write_line(&case.command) {
                warn!(test = %case.name, attempt, "send failed: {e}");
                self.log(LogKind::Error, format!("Send failed: {e}"));
                found.clear();
                continue;
            }

            let deadline = Instant::now().checked_add(wait);
            let (text, pass) = self.poll(&matcher, start, deadline);
            found = text;
            if pass {
                passed = true;
                break;
            }
            debug!(test = %case.name, attempt, "no match before deadline");
        }

        let cancelled = !passed && self.cancel.is_cancelled();
        outcome.found = found;
        outcome.attempts = attempts;
        outcome.result = if passed { TestStatus::Pass } else { TestStatus::Fail };

        if cancelled {
            self.log(LogKind::Stop, format!("{} interrupted", outcome.case.name));
        }
        let kind = if passed { LogKind::Pass } else { LogKind::Fail };
        self.log(
            kind,
            format!("{} (Retries {})", outcome.case.name, outcome.case.retries),
        );
        self.observer.on_status(&outcome);
        outcome
    }

    /// Sample the history from `start` until a pass, the deadline, or cancellation.
    ///
    /// A deadline that does not fit in an `Instant` never expires.
    fn poll(&self, matcher: &Matcher, start: usize, deadline: Option<Instant>) -> (String, bool) {
        let mut accumulated = String::new();
        let mut seen = start;

        loop {
            let len = self.history.len();
            if len > seen {
                seen = len;
                accumulated = self.history.joined_since(start);
                if matcher.is_pass(&accumulated) {
                    return (accumulated, true);
                }
            }

            let now = Instant::now();
            let expired = deadline.is_some_and(|d| now >= d);
            if expired || self.cancel.is_cancelled() {
                return (accumulated, false);
            }
            let nap = match deadline {
                Some(d) => self.settings.poll_interval.min(d - now),
                None => self.settings.poll_interval,
            };
            thread::sleep(nap);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::observer::{ChannelObserver, NullObserver, RunEvent};
    use crate::core::transport::TransportError;
    use parking_lot::Mutex;

    /// Writer that plays a device: every write may trigger delayed replies
    pub(crate) struct FakeDevice {
        history: HistoryBuffer,
        replies: Mutex<Vec<Option<(Duration, Vec<&'static str>)>>>,
        fail_writes: Mutex<usize>,
        pub(crate) sent: Mutex<Vec<String>>,
    }

    impl FakeDevice {
        pub(crate) fn new(history: &HistoryBuffer) -> Self {
            Self {
                history: history.clone(),
                replies: Mutex::new(Vec::new()),
                fail_writes: Mutex::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }

        /// Queue the reply for the next write (`None` = stay silent)
        pub(crate) fn reply(self, after: Duration, lines: Vec<&'static str>) -> Self {
            self.replies.lock().push(Some((after, lines)));
            self
        }

        pub(crate) fn silent(self) -> Self {
            self.replies.lock().push(None);
            self
        }

        pub(crate) fn failing(self, writes: usize) -> Self {
            *self.fail_writes.lock() = writes;
            self
        }

        pub(crate) fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    impl LineWriter for FakeDevice {
        fn write_line(&self, command: &str) -> Result<(), TransportError> {
            {
                let mut failing = self.fail_writes.lock();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(TransportError::SendError("port unplugged".into()));
                }
            }
            self.sent.lock().push(command.to_string());

            let mut replies = self.replies.lock();
            if replies.is_empty() {
                return Ok(());
            }
            if let Some((after, lines)) = replies.remove(0) {
                let history = self.history.clone();
                thread::spawn(move || {
                    thread::sleep(after);
                    for line in lines {
                        history.append(line.to_string());
                    }
                });
            }
            Ok(())
        }
    }

    fn run(device: &FakeDevice, history: &HistoryBuffer, case: &TestCase) -> TestOutcome {
        let cancel = CancelToken::new();
        TestExecutor::new(history, device, &NullObserver, &cancel).execute_case(1, 0, case)
    }

    #[test]
    fn test_at_ok_passes_on_first_attempt() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history).reply(Duration::from_millis(100), vec!["OK"]);
        let case = TestCase::new("at", "AT").expected("OK").retries(2).wait_till(1.0);

        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Pass);
        assert!(outcome.found.contains("OK"));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(device.sent_count(), 1);
    }

    #[test]
    fn test_retry_exhaustion_sends_every_attempt() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history);
        let case = TestCase::new("never", "AT+NOPE").expected("OK").retries(3).wait_till(0.1);

        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Fail);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(device.sent_count(), 3);
        assert_eq!(outcome.found, "");
    }

    #[test]
    fn test_early_success_does_not_wait_out_timeout() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history).reply(Duration::from_millis(50), vec!["READY"]);
        let case = TestCase::new("boot", "RESET").expected("READY").wait_till(5.0);

        let started = Instant::now();
        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Pass);
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    }

    #[test]
    fn test_silence_fails_with_empty_found() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history).silent();
        let case = TestCase::new("ping", "PING").regex(r"ERR\d+").wait_till(0.5);

        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Fail);
        assert_eq!(outcome.found, "");
    }

    #[test]
    fn test_negative_match_fails() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history).reply(Duration::from_millis(20), vec!["FAULT READY"]);
        let case = TestCase::new("ready", "STATUS").expected("READY").negative("FAULT").wait_till(0.3);

        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Fail);
        assert_eq!(outcome.found, "FAULT READY");
    }

    #[test]
    fn test_send_failure_consumes_an_attempt() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history)
            .failing(1)
            .reply(Duration::from_millis(10), vec!["OK"]);
        let case = TestCase::new("flaky", "AT").expected("OK").retries(2);

        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Pass);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(device.sent_count(), 1);
    }

    #[test]
    fn test_lines_before_snapshot_are_ignored() {
        let history = HistoryBuffer::new();
        history.append("OK".into());
        let device = FakeDevice::new(&history).silent();
        let case = TestCase::new("stale", "AT").expected("OK").wait_till(0.1);

        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Fail);
        assert_eq!(outcome.found, "");
    }

    #[test]
    fn test_each_attempt_sees_only_its_own_lines() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history)
            .reply(Duration::from_millis(10), vec!["BUSY"])
            .reply(Duration::from_millis(10), vec!["IDLE"]);
        let case = TestCase::new("state", "STATE?").expected("IDLE").negative("BUSY").retries(2).wait_till(0.1);

        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Pass);
        assert_eq!(outcome.found, "IDLE");
    }

    #[test]
    fn test_timeout_floor() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history);
        let case = TestCase::new("tiny", "AT").expected("OK").wait_till(0.001);

        let started = Instant::now();
        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Fail);
        assert!(started.elapsed() >= MIN_WAIT);
    }

    #[test]
    fn test_cancel_mid_poll_returns_promptly() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history).reply(Duration::from_millis(10), vec!["partial"]);
        let case = TestCase::new("slow", "AT").expected("OK").retries(3).wait_till(5.0);
        let cancel = CancelToken::new();

        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let outcome = TestExecutor::new(&history, &device, &NullObserver, &cancel).execute_case(1, 0, &case);
        canceller.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcome.result, TestStatus::Fail);
        assert_eq!(outcome.found, "partial");
        assert_eq!(device.sent_count(), 1);
    }

    #[test]
    fn test_huge_wait_does_not_overflow_deadline() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history).reply(Duration::from_millis(20), vec!["OK"]);
        let case = TestCase::new("patient", "AT").expected("OK").wait_till(1e20);

        let outcome = run(&device, &history, &case);

        assert_eq!(outcome.result, TestStatus::Pass);
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_cancelled_before_start_stays_pending() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history).reply(Duration::from_millis(10), vec!["OK"]);
        let case = TestCase::new("late", "AT").expected("OK");
        let (observer, rx) = ChannelObserver::bounded(64);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = TestExecutor::new(&history, &device, &observer, &cancel).execute_case(1, 0, &case);

        assert_eq!(outcome.result, TestStatus::Pending);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(device.sent_count(), 0);
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_invalid_regex_fails_and_is_logged() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history).reply(Duration::from_millis(10), vec!["ERR("]);
        let case = TestCase::new("bad", "AT").regex("ERR(").wait_till(0.1);
        let (observer, rx) = ChannelObserver::bounded(64);
        let cancel = CancelToken::new();

        let outcome = TestExecutor::new(&history, &device, &observer, &cancel).execute_case(1, 0, &case);

        assert_eq!(outcome.result, TestStatus::Fail);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, RunEvent::Log(entry) if entry.kind == LogKind::Error)));
    }

    #[test]
    fn test_status_transitions_are_reported() {
        let history = HistoryBuffer::new();
        let device = FakeDevice::new(&history).reply(Duration::from_millis(10), vec!["OK"]);
        let case = TestCase::new("at", "AT").expected("OK");
        let (observer, rx) = ChannelObserver::bounded(64);
        let cancel = CancelToken::new();

        TestExecutor::new(&history, &device, &observer, &cancel).execute_case(1, 0, &case);

        let statuses: Vec<_> = rx
            .try_iter()
            .filter_map(|e| match e {
                RunEvent::Status(o) => Some(o.result),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, [TestStatus::Running, TestStatus::Pass]);
    }
}
