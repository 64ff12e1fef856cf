//! Per-test, per-iteration results

use crate::core::testcase::TestCase;
use serde::Serialize;
use std::fmt;

/// Lifecycle of one outcome: `Pending → Running → Pass | Fail`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    /// Planned, not dispatched yet
    Pending,
    /// Command sent, waiting for output
    Running,
    /// Predicate satisfied
    Pass,
    /// Retries exhausted, cancelled, or never matched
    Fail,
}

impl TestStatus {
    /// Whether this is `Pass` or `Fail`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Pass | Self::Fail)
    }

    /// Upper-case label as shown in tables and reports
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result record for one (iteration, test case) pair
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    /// 1-based iteration number
    pub iteration: u32,
    /// 0-based position of the case in the command list
    #[serde(skip)]
    pub index: usize,
    /// The test case as it was run
    #[serde(flatten)]
    pub case: TestCase,
    /// Response text of the last attempt, lines joined with `\n`
    pub found: String,
    /// Current status
    pub result: TestStatus,
    /// Send attempts made
    pub attempts: u32,
}

impl TestOutcome {
    /// Placeholder for a planned test
    pub fn pending(iteration: u32, index: usize, case: TestCase) -> Self {
        Self {
            iteration,
            index,
            case,
            found: String::new(),
            result: TestStatus::Pending,
            attempts: 0,
        }
    }

    /// Whether the test has finished
    pub fn is_terminal(&self) -> bool {
        self.result.is_terminal()
    }

    /// `found` trimmed by the case's display hints
    pub fn excerpt(&self) -> String {
        self.case.excerpt(&self.found)
    }
}

/// Counts over a list of outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Rows never executed (left over after a stop)
    pub pending: usize,
    /// Highest iteration number among executed rows
    pub iterations: u32,
    pub cancelled: bool,
}

impl RunSummary {
    /// Summarize `outcomes`; `total` counts executed rows only
    pub fn from_outcomes(outcomes: &[TestOutcome], cancelled: bool) -> Self {
        let mut summary = Self {
            cancelled,
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.result {
                TestStatus::Pass => summary.passed += 1,
                TestStatus::Fail => summary.failed += 1,
                TestStatus::Pending | TestStatus::Running => {
                    summary.pending += 1;
                    continue;
                }
            }
            summary.iterations = summary.iterations.max(outcome.iteration);
        }
        summary.total = summary.passed + summary.failed;
        summary
    }

    /// Every executed row passed and the run was not cut short
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.pending == 0 && !self.cancelled
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {}  Pass: {}  Fail: {}  Iterations: {}",
            self.total, self.passed, self.failed, self.iterations
        )?;
        if self.pending > 0 {
            write!(f, "  Not run: {}", self.pending)?;
        }
        if self.cancelled {
            write!(f, "  (stopped)")?;
        }
        Ok(())
    }
}
