//! Append-only history of received lines
//!
//! The reader thread of the [`LineSource`](crate::core::line_source::LineSource)
//! is the only writer. Readers take a start index before sending a command and
//! afterwards only look at lines from that index on.

use parking_lot::Mutex;
use std::sync::Arc;

/// Shared, append-only line log with stable indices.
///
/// Cloning yields another handle to the same log.
#[derive(Debug, Clone, Default)]
pub struct HistoryBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl HistoryBuffer {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines received so far; doubles as a snapshot index
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Whether nothing has been received yet
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Copy of every line from `start` on. An index past the end yields nothing.
    pub fn since(&self, start: usize) -> Vec<String> {
        let lines = self.lines.lock();
        lines.get(start..).map(<[String]>::to_vec).unwrap_or_default()
    }

    /// Lines from `start` on, joined with `\n`
    pub fn joined_since(&self, start: usize) -> String {
        let lines = self.lines.lock();
        lines.get(start..).map(|tail| tail.join("\n")).unwrap_or_default()
    }

    /// Copy of the whole history
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Append a line and return its index
    pub(crate) fn append(&self, line: String) -> usize {
        let mut lines = self.lines.lock();
        lines.push(line);
        lines.len() - 1
    }
}

/// Seed a history with already-received lines, e.g. a recorded session
impl FromIterator<String> for HistoryBuffer {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            lines: Arc::new(Mutex::new(iter.into_iter().collect())),
        }
    }
}
