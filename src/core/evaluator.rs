//! PASS/FAIL decision over accumulated device output
//!
//! Order of precedence:
//! 1. a non-empty `regex` is searched in multi-line mode;
//! 2. otherwise a non-empty `expected` must occur as a literal substring;
//! 3. otherwise any output at all passes.
//!
//! A non-empty `negative` that occurs in the text fails the check no matter
//! what the positive rule said.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Evaluation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// The regex field does not compile
    #[error("invalid regex `{pattern}`: {reason}")]
    InvalidRegex {
        /// Offending pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },
}

/// The match fields of a test case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rule<'a> {
    pub expected: &'a str,
    pub regex: &'a str,
    pub negative: &'a str,
}

impl<'a> Rule<'a> {
    /// Build a rule; surrounding whitespace is ignored
    pub fn new(expected: &'a str, regex: &'a str, negative: &'a str) -> Self {
        Self {
            expected: expected.trim(),
            regex: regex.trim(),
            negative: negative.trim(),
        }
    }
}

#[derive(Debug, Clone)]
enum Positive {
    Regex(Regex),
    Invalid,
    Substring(String),
    AnyOutput,
}

/// A compiled [`Rule`], cheap to evaluate repeatedly while output trickles in
#[derive(Debug, Clone)]
pub struct Matcher {
    positive: Positive,
    negative: Option<String>,
}

impl Matcher {
    /// Compile a rule.
    ///
    /// An invalid regex still yields a usable matcher that always fails; the
    /// compile error is returned alongside so the caller can report it once.
    pub fn compile(rule: &Rule<'_>) -> (Self, Option<EvaluationError>) {
        let rule = Rule::new(rule.expected, rule.regex, rule.negative);
        let mut error = None;

        let positive = if !rule.regex.is_empty() {
            match RegexBuilder::new(rule.regex).multi_line(true).build() {
                Ok(re) => Positive::Regex(re),
                Err(e) => {
                    error = Some(EvaluationError::InvalidRegex {
                        pattern: rule.regex.to_string(),
                        reason: e.to_string(),
                    });
                    Positive::Invalid
                }
            }
        } else if !rule.expected.is_empty() {
            Positive::Substring(rule.expected.to_string())
        } else {
            Positive::AnyOutput
        };

        let negative = (!rule.negative.is_empty()).then(|| rule.negative.to_string());

        (Self { positive, negative }, error)
    }

    /// PASS (`true`) or FAIL (`false`) for the text seen so far
    pub fn is_pass(&self, accumulated: &str) -> bool {
        let positive = match &self.positive {
            Positive::Regex(re) => re.is_match(accumulated),
            Positive::Invalid => false,
            Positive::Substring(expected) => accumulated.contains(expected.as_str()),
            Positive::AnyOutput => !accumulated.is_empty(),
        };

        match &self.negative {
            Some(negative) if accumulated.contains(negative.as_str()) => false,
            _ => positive,
        }
    }
}

/// One-shot evaluation of `rule` against `accumulated`
pub fn evaluate(accumulated: &str, rule: &Rule<'_>) -> Result<bool, EvaluationError> {
    let (matcher, error) = Matcher::compile(rule);
    match error {
        Some(e) => Err(e),
        None => Ok(matcher.is_pass(accumulated)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str, expected: &str, regex: &str, negative: &str) -> bool {
        evaluate(text, &Rule::new(expected, regex, negative)).unwrap()
    }

    #[test]
    fn test_any_output_passes_without_rules() {
        for text in ["", "x", "OK", "line one\nline two", " "] {
            assert_eq!(eval(text, "", "", ""), !text.is_empty(), "text {text:?}");
        }
    }

    #[test]
    fn test_expected_substring() {
        assert!(eval("+CSQ: 21,0\nOK", "OK", "", ""));
        assert!(!eval("ERROR", "OK", "", ""));
        assert!(!eval("", "OK", "", ""));
    }

    #[test]
    fn test_regex_takes_precedence_over_expected() {
        assert!(eval("ERR42", "OK", r"ERR\d+", ""));
        assert!(!eval("OK", "OK", r"ERR\d+", ""));
    }

    #[test]
    fn test_regex_is_multiline() {
        assert!(eval("boot\nREADY\nidle", "", "^READY$", ""));
        assert!(!eval("boot READY idle", "", "^READY$", ""));
    }

    #[test]
    fn test_negative_overrides_everything() {
        assert!(!eval("FAULT READY", "READY", "", "FAULT"));
        assert!(!eval("ERR7 FAULT", "", r"ERR\d", "FAULT"));
        assert!(!eval("FAULT", "", "", "FAULT"));
        assert!(eval("READY", "READY", "", "FAULT"));
    }

    #[test]
    fn test_whitespace_only_fields_are_empty() {
        assert!(eval("anything", "  ", "\t", " "));
    }

    #[test]
    fn test_invalid_regex() {
        let rule = Rule::new("", "ERR(", "");
        let err = evaluate("ERR(", &rule).unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidRegex { ref pattern, .. } if pattern == "ERR("));

        let (matcher, error) = Matcher::compile(&rule);
        assert!(error.is_some());
        assert!(!matcher.is_pass("ERR("));
    }

    #[test]
    fn test_growing_text_converges() {
        let (matcher, _) = Matcher::compile(&Rule::new("OK", "", "ERROR"));
        let mut text = String::new();
        let mut verdicts = Vec::new();
        for line in ["AT", "OK"] {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(line);
            verdicts.push(matcher.is_pass(&text));
            // Same input, same answer.
            assert_eq!(matcher.is_pass(&text), *verdicts.last().unwrap());
        }
        assert_eq!(verdicts, [false, true]);
    }
}
