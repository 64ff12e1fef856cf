//! Session logging
//!
//! Every send, receive, verdict and error of a session becomes one timestamped
//! line in an append-only log file, written synchronously.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared handle to a session logger
pub type Logger = Arc<Mutex<SessionLogger>>;

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `[HH:MM:SS] [KIND] message`
    #[default]
    Text,
    /// One JSON object per line
    JsonLines,
}

/// Kind of session event
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogKind {
    /// Command written to the device
    Send,
    /// Line received from the device
    Recv,
    /// Test passed
    Pass,
    /// Test failed
    Fail,
    /// Transport, evaluation or I/O error
    Error,
    /// Informational
    Info,
    /// Stop requested
    Stop,
}

impl LogKind {
    /// Tag used in text output
    pub fn tag(self) -> &'static str {
        match self {
            Self::Send => "SEND",
            Self::Recv => "RECV",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
            Self::Info => "INFO",
            Self::Stop => "STOP",
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub kind: LogKind,
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped now
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
            message: message.into(),
        }
    }

    /// Format as text
    pub fn to_text(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.kind.tag(),
            self.message
        )
    }

    /// Format as JSON line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Session logger
pub struct SessionLogger {
    /// Output file
    file: Option<File>,
    /// Log file path
    path: Option<PathBuf>,
    /// Line format
    format: LogFormat,
    /// Recent entries, for search
    buffer: VecDeque<LogEntry>,
    /// Max buffer size
    max_buffer: usize,
    /// Lines logged
    lines_logged: usize,
}

impl Default for SessionLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLogger {
    /// Create new logger (not logging to file yet)
    pub fn new() -> Self {
        Self {
            file: None,
            path: None,
            format: LogFormat::Text,
            buffer: VecDeque::new(),
            max_buffer: 10_000,
            lines_logged: 0,
        }
    }

    /// Open (or create) `path` in append mode and log to it
    pub fn start(&mut self, path: impl Into<PathBuf>, format: LogFormat) -> io::Result<()> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.file = Some(file);
        self.path = Some(path);
        self.format = format;
        self.lines_logged = 0;
        Ok(())
    }

    /// Stop logging to file
    pub fn stop(&mut self) {
        if let Some(ref mut file) = self.file {
            let _ = file.flush();
        }
        self.file = None;
    }

    /// Is currently logging to a file
    pub fn is_logging(&self) -> bool {
        self.file.is_some()
    }

    /// Log file path
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record an entry
    pub fn log(&mut self, entry: LogEntry) {
        if let Some(ref mut file) = self.file {
            let line = match self.format {
                LogFormat::Text => entry.to_text(),
                LogFormat::JsonLines => entry.to_json(),
            };
            // A failing log file must not take the session down with it.
            if let Err(e) = writeln!(file, "{line}").and_then(|()| file.flush()) {
                tracing::warn!("session log write failed: {e}");
            } else {
                self.lines_logged += 1;
            }
        }

        self.buffer.push_back(entry);
        while self.buffer.len() > self.max_buffer {
            self.buffer.pop_front();
        }
    }

    /// Record a message of the given kind
    pub fn log_message(&mut self, kind: LogKind, message: &str) {
        self.log(LogEntry::new(kind, message));
    }

    /// Buffered entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.buffer.iter()
    }

    /// Buffered entries whose message contains `term`
    pub fn search(&self, term: &str) -> Vec<&LogEntry> {
        if term.is_empty() {
            return Vec::new();
        }
        self.buffer
            .iter()
            .filter(|entry| entry.message.contains(term))
            .collect()
    }

    /// Set max buffer size
    pub fn set_max_buffer(&mut self, size: usize) {
        self.max_buffer = size;
        while self.buffer.len() > self.max_buffer {
            self.buffer.pop_front();
        }
    }

    /// Lines written to the file since `start`
    pub fn lines_logged(&self) -> usize {
        self.lines_logged
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Search a session log file, returning `(line_number, line)` pairs (1-based)
pub fn search_file(path: &Path, term: &str) -> io::Result<Vec<(usize, String)>> {
    if term.is_empty() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut hits = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.contains(term) {
            hits.push((idx + 1, line));
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_text() {
        let entry = LogEntry::new(LogKind::Send, "AT");
        let text = entry.to_text();
        assert!(text.starts_with('['));
        assert!(text.ends_with("] [SEND] AT"));
    }

    #[test]
    fn test_buffer_limit() {
        let mut logger = SessionLogger::new();
        logger.set_max_buffer(5);

        for i in 0..10 {
            logger.log_message(LogKind::Recv, &i.to_string());
        }

        let kept: Vec<_> = logger.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(kept, ["5", "6", "7", "8", "9"]);
    }

    #[test]
    fn test_file_append_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.log");

        let mut logger = SessionLogger::new();
        logger.start(&path, LogFormat::Text).unwrap();
        logger.log_message(LogKind::Send, "AT+CSQ");
        logger.log_message(LogKind::Recv, "+CSQ: 21,0");
        logger.log_message(LogKind::Pass, "signal (Retries 1)");
        assert_eq!(logger.lines_logged(), 3);

        // Synchronous writes: visible without dropping the logger.
        let hits = search_file(&path, "CSQ").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert!(hits[1].1.contains("[RECV] +CSQ: 21,0"));

        assert_eq!(logger.search("signal").len(), 1);
        assert!(logger.search("").is_empty());

        // Reopening appends instead of truncating.
        drop(logger);
        let mut again = SessionLogger::new();
        again.start(&path, LogFormat::Text).unwrap();
        again.log_message(LogKind::Info, "second session");
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn test_json_lines_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");

        let mut logger = SessionLogger::new();
        logger.start(&path, LogFormat::JsonLines).unwrap();
        logger.log_message(LogKind::Error, "write failed");

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(value["kind"], "ERROR");
        assert_eq!(value["message"], "write failed");
    }
}
