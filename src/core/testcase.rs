//! Test case records and the editable command list
//!
//! Command files are JSON arrays of objects keyed `command_name`, `command`,
//! `expected`, `regex`, `negative`, `wait_till`, `print_after`,
//! `print_ahead_chars`, `message` and `retries`. Older files store every value
//! as a string, so numeric fields accept both numbers and numeric strings.
//! Rows are validated when loaded; a bad `retries` or `wait_till` is rejected
//! with its row number instead of being patched up during a run.

use crate::core::evaluator::Rule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default response timeout in seconds
pub const DEFAULT_WAIT_TILL: f64 = 1.0;

/// Longest accepted response timeout in seconds (one day)
pub const MAX_WAIT_TILL: f64 = 86_400.0;

/// Default number of attempts
pub const DEFAULT_RETRIES: u32 = 1;

/// A single invalid field
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid `{field}` value {value:?}: {reason}")]
pub struct TestCaseError {
    pub field: &'static str,
    pub value: String,
    pub reason: &'static str,
}

/// Command list errors
#[derive(Error, Debug)]
pub enum CommandListError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Root value is not an array
    #[error("JSON root must be a list of objects")]
    NotAList,

    /// A row failed validation (rows are numbered from 1)
    #[error("row {row}: {source}")]
    InvalidRow {
        row: usize,
        #[source]
        source: TestCaseError,
    },

    /// Index past the end of the list
    #[error("index {index} out of range (list has {len} commands)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// One command/expectation/retry specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTestCase")]
pub struct TestCase {
    /// Display name
    #[serde(rename = "command_name")]
    pub name: String,
    /// Text written to the device (the line terminator is added on send)
    pub command: String,
    /// Literal substring that must appear; empty when unused
    pub expected: String,
    /// Pattern searched in multi-line mode; empty when unused
    pub regex: String,
    /// Literal substring that must not appear; empty when unused
    pub negative: String,
    /// Response timeout in seconds
    pub wait_till: f64,
    /// Characters of the response to skip when displaying it
    pub print_after: u32,
    /// Characters of the response to display (0 = all)
    pub print_ahead_chars: u32,
    /// Free text
    pub message: String,
    /// Number of attempts, at least 1
    pub retries: u32,
}

impl Default for TestCase {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            expected: String::new(),
            regex: String::new(),
            negative: String::new(),
            wait_till: DEFAULT_WAIT_TILL,
            print_after: 0,
            print_ahead_chars: 0,
            message: String::new(),
            retries: DEFAULT_RETRIES,
        }
    }
}

impl TestCase {
    /// Create a test case that sends `command` and passes on any output
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set the expected substring
    #[must_use]
    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = expected.into();
        self
    }

    /// Set the regex
    #[must_use]
    pub fn regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = regex.into();
        self
    }

    /// Set the negative substring
    #[must_use]
    pub fn negative(mut self, negative: impl Into<String>) -> Self {
        self.negative = negative.into();
        self
    }

    /// Set the timeout in seconds
    #[must_use]
    pub fn wait_till(mut self, seconds: f64) -> Self {
        self.wait_till = seconds;
        self
    }

    /// Set the number of attempts
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the free-text message
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The row the editor inserts for "Add Command"
    pub fn placeholder() -> Self {
        Self::new("New Command", "")
    }

    /// Check the numeric fields
    pub fn validate(&self) -> Result<(), TestCaseError> {
        if self.retries == 0 {
            return Err(TestCaseError {
                field: "retries",
                value: "0".to_string(),
                reason: "must be at least 1",
            });
        }
        if !self.wait_till.is_finite() || self.wait_till <= 0.0 {
            return Err(TestCaseError {
                field: "wait_till",
                value: self.wait_till.to_string(),
                reason: "must be a positive number of seconds",
            });
        }
        if self.wait_till > MAX_WAIT_TILL {
            return Err(TestCaseError {
                field: "wait_till",
                value: self.wait_till.to_string(),
                reason: "must not exceed one day (86400 seconds)",
            });
        }
        Ok(())
    }

    /// Match fields as an evaluator rule
    pub fn rule(&self) -> Rule<'_> {
        Rule::new(&self.expected, &self.regex, &self.negative)
    }

    /// `wait_till` as a duration, capped at [`MAX_WAIT_TILL`]; non-positive
    /// or non-finite values give zero
    pub fn timeout(&self) -> Duration {
        if self.wait_till.is_finite() && self.wait_till > 0.0 {
            Duration::from_secs_f64(self.wait_till.min(MAX_WAIT_TILL))
        } else {
            Duration::ZERO
        }
    }

    /// The part of `found` the display hints select
    pub fn excerpt(&self, found: &str) -> String {
        let skipped = found.chars().skip(self.print_after as usize);
        if self.print_ahead_chars == 0 {
            skipped.collect()
        } else {
            skipped.take(self.print_ahead_chars as usize).collect()
        }
    }
}

/// Loosely typed row as found in command files
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTestCase {
    #[serde(alias = "name")]
    command_name: Value,
    command: Value,
    expected: Value,
    regex: Value,
    negative: Value,
    wait_till: Value,
    print_after: Value,
    print_ahead_chars: Value,
    message: Value,
    retries: Value,
}

fn text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn seconds(value: &Value, field: &'static str, default: f64) -> Result<f64, TestCaseError> {
    let invalid = |reason| TestCaseError {
        field,
        value: value.to_string(),
        reason,
    };
    match value {
        Value::Null => Ok(default),
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid("not a number")),
        Value::String(s) if s.trim().is_empty() => Ok(default),
        Value::String(s) => s.trim().parse().map_err(|_| invalid("not a number")),
        _ => Err(invalid("not a number")),
    }
}

fn count(value: &Value, field: &'static str, default: u32) -> Result<u32, TestCaseError> {
    let invalid = |reason| TestCaseError {
        field,
        value: value.to_string(),
        reason,
    };
    let parsed = match value {
        Value::Null => return Ok(default),
        Value::Number(n) => n.as_u64(),
        Value::String(s) if s.trim().is_empty() => return Ok(default),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .ok_or_else(|| invalid("not a non-negative integer"))
        .and_then(|n| u32::try_from(n).map_err(|_| invalid("too large")))
}

impl TryFrom<RawTestCase> for TestCase {
    type Error = TestCaseError;

    fn try_from(raw: RawTestCase) -> Result<Self, Self::Error> {
        let case = Self {
            wait_till: seconds(&raw.wait_till, "wait_till", DEFAULT_WAIT_TILL)?,
            retries: count(&raw.retries, "retries", DEFAULT_RETRIES)?,
            print_after: count(&raw.print_after, "print_after", 0)?,
            print_ahead_chars: count(&raw.print_ahead_chars, "print_ahead_chars", 0)?,
            name: text(raw.command_name),
            command: text(raw.command),
            expected: text(raw.expected),
            regex: text(raw.regex),
            negative: text(raw.negative),
            message: text(raw.message),
        };
        case.validate()?;
        Ok(case)
    }
}

/// Ordered, editable list of test cases
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    cases: Vec<TestCase>,
}

impl CommandList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap already validated cases
    pub fn from_cases(cases: Vec<TestCase>) -> Result<Self, CommandListError> {
        for (idx, case) in cases.iter().enumerate() {
            case.validate()
                .map_err(|source| CommandListError::InvalidRow { row: idx + 1, source })?;
        }
        Ok(Self { cases })
    }

    /// Parse a JSON command file body
    pub fn from_json_str(json: &str) -> Result<Self, CommandListError> {
        let Value::Array(rows) = serde_json::from_str::<Value>(json)? else {
            return Err(CommandListError::NotAList);
        };

        let mut cases = Vec::with_capacity(rows.len());
        for (idx, row) in rows.into_iter().enumerate() {
            // Non-object rows load as an all-default row.
            let raw = match row {
                Value::Object(_) => serde_json::from_value::<RawTestCase>(row)?,
                _ => RawTestCase::default(),
            };
            let case = TestCase::try_from(raw)
                .map_err(|source| CommandListError::InvalidRow { row: idx + 1, source })?;
            cases.push(case);
        }
        Ok(Self { cases })
    }

    /// Load a JSON command file
    pub fn load_json(path: &Path) -> Result<Self, CommandListError> {
        let content = std::fs::read_to_string(path)?;
        let list = Self::from_json_str(&content)?;
        tracing::debug!(path = %path.display(), commands = list.len(), "command list loaded");
        Ok(list)
    }

    /// Pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String, CommandListError> {
        Ok(serde_json::to_string_pretty(&self.cases)?)
    }

    /// Save as a JSON command file
    pub fn save_json(&self, path: &Path) -> Result<(), CommandListError> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Command at `index`
    pub fn get(&self, index: usize) -> Option<&TestCase> {
        self.cases.get(index)
    }

    /// Iterate in order
    pub fn iter(&self) -> impl Iterator<Item = &TestCase> {
        self.cases.iter()
    }

    /// Borrow as a slice
    pub fn as_slice(&self) -> &[TestCase] {
        &self.cases
    }

    /// Take the cases out
    pub fn into_vec(self) -> Vec<TestCase> {
        self.cases
    }

    fn check_index(&self, index: usize) -> Result<(), CommandListError> {
        if index < self.cases.len() {
            Ok(())
        } else {
            Err(CommandListError::IndexOutOfRange {
                index,
                len: self.cases.len(),
            })
        }
    }

    /// Append a case; returns its index
    pub fn push(&mut self, case: TestCase) -> Result<usize, CommandListError> {
        case.validate().map_err(|source| CommandListError::InvalidRow {
            row: self.cases.len() + 1,
            source,
        })?;
        self.cases.push(case);
        Ok(self.cases.len() - 1)
    }

    /// Append a "New Command" placeholder; returns its index
    pub fn add_placeholder(&mut self) -> usize {
        self.cases.push(TestCase::placeholder());
        self.cases.len() - 1
    }

    /// Insert a copy of the case at `index` right after it; returns the copy's index
    pub fn duplicate(&mut self, index: usize) -> Result<usize, CommandListError> {
        self.check_index(index)?;
        let copy = self.cases[index].clone();
        self.cases.insert(index + 1, copy);
        Ok(index + 1)
    }

    /// Remove and return the case at `index`
    pub fn remove(&mut self, index: usize) -> Result<TestCase, CommandListError> {
        self.check_index(index)?;
        Ok(self.cases.remove(index))
    }

    /// Move the case at `from` so that it ends up at `to`
    pub fn move_row(&mut self, from: usize, to: usize) -> Result<(), CommandListError> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from != to {
            let case = self.cases.remove(from);
            self.cases.insert(to, case);
        }
        Ok(())
    }

    /// Overwrite the case at `index`
    pub fn replace(&mut self, index: usize, case: TestCase) -> Result<(), CommandListError> {
        self.check_index(index)?;
        case.validate()
            .map_err(|source| CommandListError::InvalidRow { row: index + 1, source })?;
        self.cases[index] = case;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a TestCase;
    type IntoIter = std::slice::Iter<'a, TestCase>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"[
        {"command_name": "ping", "command": "AT", "expected": "OK", "regex": "",
         "negative": "", "wait_till": "2", "print_after": "0",
         "print_ahead_chars": "0", "message": "", "retries": "3"},
        {"command_name": "version", "command": "ATI", "wait_till": 0.5},
        "not an object"
    ]"#;

    #[test]
    fn test_load_legacy_string_fields() {
        let list = CommandList::from_json_str(LEGACY).unwrap();
        assert_eq!(list.len(), 3);

        let ping = list.get(0).unwrap();
        assert_eq!(ping.name, "ping");
        assert_eq!(ping.expected, "OK");
        assert!((ping.wait_till - 2.0).abs() < f64::EPSILON);
        assert_eq!(ping.retries, 3);

        let version = list.get(1).unwrap();
        assert_eq!(version.retries, DEFAULT_RETRIES);
        assert!((version.wait_till - 0.5).abs() < f64::EPSILON);

        assert_eq!(list.get(2).unwrap(), &TestCase::default());
    }

    #[test]
    fn test_rejects_bad_rows() {
        let err = CommandList::from_json_str(r#"[{"command": "AT"}, {"retries": "0"}]"#).unwrap_err();
        assert!(matches!(err, CommandListError::InvalidRow { row: 2, ref source } if source.field == "retries"));

        let err = CommandList::from_json_str(r#"[{"wait_till": "-1"}]"#).unwrap_err();
        assert!(matches!(err, CommandListError::InvalidRow { row: 1, ref source } if source.field == "wait_till"));

        let err = CommandList::from_json_str(r#"[{"command": "AT", "wait_till": 1e20}]"#).unwrap_err();
        assert!(matches!(err, CommandListError::InvalidRow { row: 1, ref source } if source.field == "wait_till"));

        let err = CommandList::from_json_str(r#"[{"wait_till": "soon"}]"#).unwrap_err();
        assert!(matches!(err, CommandListError::InvalidRow { .. }));

        let err = CommandList::from_json_str(r#"{"command": "AT"}"#).unwrap_err();
        assert!(matches!(err, CommandListError::NotAList));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.json");

        let mut list = CommandList::new();
        list.push(TestCase::new("ping", "AT").expected("OK").retries(2)).unwrap();
        list.push(TestCase::new("fault", "AT+X").negative("FAULT").wait_till(0.25)).unwrap();
        list.save_json(&path).unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("\"command_name\": \"ping\""));
        assert_eq!(CommandList::load_json(&path).unwrap(), list);
    }

    #[test]
    fn test_editor_operations() {
        let mut list = CommandList::from_cases(vec![
            TestCase::new("a", "A"),
            TestCase::new("b", "B"),
            TestCase::new("c", "C"),
        ])
        .unwrap();

        assert_eq!(list.duplicate(0).unwrap(), 1);
        let names: Vec<_> = list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "a", "b", "c"]);

        list.move_row(3, 0).unwrap();
        let names: Vec<_> = list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "a", "b"]);

        assert_eq!(list.remove(1).unwrap().name, "a");
        let idx = list.add_placeholder();
        assert_eq!(list.get(idx).unwrap().name, "New Command");

        list.replace(0, TestCase::new("c2", "C2")).unwrap();
        assert_eq!(list.get(0).unwrap().command, "C2");

        assert!(matches!(
            list.remove(10),
            Err(CommandListError::IndexOutOfRange { index: 10, len: 4 })
        ));
        assert!(list.replace(0, TestCase::new("bad", "X").retries(0)).is_err());
        assert!(list.push(TestCase::new("bad", "X").wait_till(0.0)).is_err());
    }

    #[test]
    fn test_excerpt_hints() {
        let mut case = TestCase::new("x", "X");
        assert_eq!(case.excerpt("abcdef"), "abcdef");
        case.print_after = 2;
        assert_eq!(case.excerpt("abcdef"), "cdef");
        case.print_ahead_chars = 3;
        assert_eq!(case.excerpt("abcdef"), "cde");
        assert_eq!(case.excerpt("ab"), "");
    }

    #[test]
    fn test_timeout() {
        assert_eq!(TestCase::new("x", "X").wait_till(1.5).timeout(), Duration::from_millis(1500));
        assert_eq!(TestCase::new("x", "X").wait_till(-1.0).timeout(), Duration::ZERO);
        assert_eq!(TestCase::new("x", "X").wait_till(f64::NAN).timeout(), Duration::ZERO);
        assert_eq!(TestCase::new("x", "X").wait_till(1e20).timeout(), Duration::from_secs(86_400));

        assert!(TestCase::new("x", "X").wait_till(MAX_WAIT_TILL).validate().is_ok());
        assert!(TestCase::new("x", "X").wait_till(MAX_WAIT_TILL + 1.0).validate().is_err());
    }
}
