//! Console output for the CLI
//!
//! Text output is meant for people watching a run; JSON output is one object
//! per line so it can be piped into other tools.

use crate::core::logger::LogEntry;
use crate::core::outcome::{RunSummary, TestOutcome};
use crate::core::testcase::TestCase;
use serde_json::json;
use std::io::{self, Write};

/// Output format for console output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// JSON lines
    Json,
}

const NAME_WIDTH: usize = 24;

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('~');
        cut
    }
}

/// One status row
pub fn format_outcome(outcome: &TestOutcome, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut line = format!(
                "[{:>3}] #{:<3} {:<width$} {:<7}",
                outcome.iteration,
                outcome.index + 1,
                truncate(&outcome.case.name, NAME_WIDTH),
                outcome.result.label(),
                width = NAME_WIDTH
            );
            if outcome.is_terminal() {
                line.push_str(&format!(" attempts={}", outcome.attempts));
                let excerpt = outcome.excerpt().replace('\n', " | ");
                if !excerpt.is_empty() {
                    line.push_str(&format!("  {}", truncate(&excerpt, 60)));
                }
                if !outcome.case.message.is_empty() {
                    line.push_str(&format!("  ({})", outcome.case.message));
                }
            }
            line
        }
        OutputFormat::Json => json!({
            "event": "status",
            "iteration": outcome.iteration,
            "index": outcome.index,
            "command_name": outcome.case.name,
            "result": outcome.result,
            "attempts": outcome.attempts,
            "found": outcome.found,
        })
        .to_string(),
    }
}

/// One session log line
pub fn format_log(entry: &LogEntry, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => entry.to_text(),
        OutputFormat::Json => entry.to_json(),
    }
}

/// End-of-run summary
pub fn format_summary(summary: &RunSummary, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => summary.to_string(),
        OutputFormat::Json => json!({ "event": "summary", "summary": summary }).to_string(),
    }
}

/// Command list as a numbered table
pub fn format_case_table(cases: &[TestCase]) -> String {
    let mut out = format!(
        "{:>3}  {:<width$} {:<20} {:<16} {:>6} {:>7}\n",
        "#",
        "NAME",
        "COMMAND",
        "EXPECT",
        "WAIT",
        "RETRIES",
        width = NAME_WIDTH
    );
    for (i, case) in cases.iter().enumerate() {
        let expect = if !case.regex.is_empty() {
            format!("/{}/", case.regex)
        } else if !case.expected.is_empty() {
            case.expected.clone()
        } else {
            "(any)".to_string()
        };
        out.push_str(&format!(
            "{:>3}  {:<width$} {:<20} {:<16} {:>6} {:>7}\n",
            i + 1,
            truncate(&case.name, NAME_WIDTH),
            truncate(&case.command, 20),
            truncate(&expect, 16),
            case.wait_till,
            case.retries,
            width = NAME_WIDTH
        ));
    }
    out
}

/// Line-oriented stdout writer that can be silenced
pub struct Console {
    quiet: bool,
    format: OutputFormat,
}

impl Console {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self { quiet, format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Write a line unless quiet
    pub fn line(&self, line: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()
    }

    /// Write a line even when quiet (final results)
    pub fn always(&self, line: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::outcome::TestStatus;

    #[test]
    fn test_text_row() {
        let mut outcome = TestOutcome::pending(2, 0, TestCase::new("firmware", "AT+GMR").message("check"));
        assert!(format_outcome(&outcome, OutputFormat::Text).contains("PENDING"));

        outcome.result = TestStatus::Pass;
        outcome.attempts = 1;
        outcome.found = "AT version:1.7\nOK".into();
        let line = format_outcome(&outcome, OutputFormat::Text);
        assert!(line.starts_with("[  2] #1"));
        assert!(line.contains("PASS"));
        assert!(line.contains("AT version:1.7 | OK"));
        assert!(line.contains("(check)"));
    }

    #[test]
    fn test_json_row_is_one_object() {
        let outcome = TestOutcome::pending(1, 3, TestCase::new("a", "A"));
        let value: serde_json::Value =
            serde_json::from_str(&format_outcome(&outcome, OutputFormat::Json)).unwrap();
        assert_eq!(value["index"], 3);
        assert_eq!(value["result"], "PENDING");
    }

    #[test]
    fn test_truncate_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 5), "abcd~");
    }

    #[test]
    fn test_case_table() {
        let table = format_case_table(&[
            TestCase::new("ping", "AT").expected("OK"),
            TestCase::new("ver", "ATI").regex(r"v\d"),
        ]);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains("/v\\d/"));
    }
}
