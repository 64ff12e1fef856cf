//! Run report export
//!
//! HTML for people, JSON for tooling. Both cover only rows that actually ran.

use crate::core::outcome::{RunSummary, TestOutcome, TestStatus};
use crate::core::runner::RunReport;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Export failures
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("No results to export")]
    NoResults,

    #[error("Cannot write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot encode report: {0}")]
    Json(#[from] serde_json::Error),
}

const STYLE: &str = "body{font-family:Arial,sans-serif;margin:20px;}\
th,td{border:1px solid #ccc;padding:6px;font-size:13px;vertical-align:top;}\
table{border-collapse:collapse;width:100%;margin-top:10px;}\
.pass{background:#d4edda;} .fail{background:#f8d7da;}\
.summary{margin-bottom:20px;} .toggle{cursor:pointer;color:blue;text-decoration:underline;}\
.found{display:none;white-space:pre-wrap;border:1px solid #ccc;margin-top:4px;padding:4px;}";

const SCRIPT: &str = "function toggle(id){var e=document.getElementById(id);\
e.style.display=(e.style.display=='block')?'none':'block';}";

const COLUMNS: [&str; 13] = [
    "iteration",
    "command_name",
    "command",
    "expected",
    "regex",
    "negative",
    "wait_till",
    "print_after",
    "print_ahead_chars",
    "message",
    "retries",
    "found",
    "result",
];

/// Escape text for use in HTML element content and quoted attributes
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn cell(text: &str) -> String {
    format!("<td>{}</td>", escape_html(text))
}

/// Render executed outcomes as a standalone HTML page
pub fn render_html(outcomes: &[TestOutcome], generated_at: DateTime<Local>) -> Result<String, ReportError> {
    let executed: Vec<&TestOutcome> = outcomes.iter().filter(|o| o.is_terminal()).collect();
    if executed.is_empty() {
        return Err(ReportError::NoResults);
    }
    let summary = RunSummary::from_outcomes(outcomes, false);

    let mut html = String::with_capacity(4096 + executed.len() * 512);
    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Test Results</title>");
    html.push_str(&format!("<style>{STYLE}</style><script>{SCRIPT}</script></head><body>\n"));
    html.push_str("<h1>Test Results Report</h1>\n");
    html.push_str(&format!(
        "<p><b>Generated:</b> {}</p>\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    ));
    html.push_str(&format!(
        "<div class=\"summary\"><p><b>Total:</b> {} &nbsp; <b>Pass:</b> {} &nbsp; \
         <b>Fail:</b> {} &nbsp; <b>Iterations:</b> {}</p></div>\n",
        summary.total,
        summary.passed,
        summary.failed,
        summary.iterations.max(1)
    ));

    html.push_str("<table>\n<tr>");
    for column in COLUMNS {
        html.push_str(&format!("<th>{column}</th>"));
    }
    html.push_str("</tr>\n");

    for (row, outcome) in executed.iter().enumerate() {
        let case = &outcome.case;
        let css = if outcome.result == TestStatus::Pass { "pass" } else { "fail" };
        html.push_str(&format!("<tr class=\"{css}\">"));
        html.push_str(&cell(&outcome.iteration.to_string()));
        html.push_str(&cell(&case.name));
        html.push_str(&cell(&case.command));
        html.push_str(&cell(&case.expected));
        html.push_str(&cell(&case.regex));
        html.push_str(&cell(&case.negative));
        html.push_str(&cell(&case.wait_till.to_string()));
        html.push_str(&cell(&case.print_after.to_string()));
        html.push_str(&cell(&case.print_ahead_chars.to_string()));
        html.push_str(&cell(&case.message));
        html.push_str(&cell(&case.retries.to_string()));
        html.push_str(&format!(
            "<td><span class=\"toggle\" onclick=\"toggle('found{n}')\">View</span>\
             <div id=\"found{n}\" class=\"found\">{found}</div></td>",
            n = row + 1,
            found = escape_html(&outcome.found)
        ));
        html.push_str(&cell(outcome.result.label()));
        html.push_str("</tr>\n");
    }

    html.push_str("</table>\n</body></html>\n");
    Ok(html)
}

/// Write the HTML report for `report` to `path`
pub fn write_html(report: &RunReport, path: &Path) -> Result<(), ReportError> {
    let html = render_html(&report.outcomes, report.finished_at)?;
    std::fs::write(path, html)?;
    info!(path = %path.display(), "HTML report written");
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    run_id: Uuid,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
    cancelled: bool,
    summary: RunSummary,
    results: Vec<&'a TestOutcome>,
}

/// Render executed outcomes and run metadata as pretty JSON
pub fn render_json(report: &RunReport) -> Result<String, ReportError> {
    let results: Vec<&TestOutcome> = report.outcomes.iter().filter(|o| o.is_terminal()).collect();
    if results.is_empty() {
        return Err(ReportError::NoResults);
    }
    let doc = JsonReport {
        run_id: report.run_id,
        started_at: report.started_at,
        finished_at: report.finished_at,
        cancelled: report.cancelled,
        summary: report.summary(),
        results,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Write the JSON report for `report` to `path`
pub fn write_json(report: &RunReport, path: &Path) -> Result<(), ReportError> {
    std::fs::write(path, render_json(report)?)?;
    info!(path = %path.display(), "JSON report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testcase::TestCase;
    use tempfile::tempdir;

    fn finished(iteration: u32, case: TestCase, found: &str, result: TestStatus) -> TestOutcome {
        TestOutcome {
            found: found.to_string(),
            result,
            attempts: 1,
            ..TestOutcome::pending(iteration, 0, case)
        }
    }

    fn report(outcomes: Vec<TestOutcome>) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            finished_at: Local::now(),
            outcomes,
            cancelled: false,
        }
    }

    #[test]
    fn test_empty_results_are_rejected() {
        assert!(matches!(render_html(&[], Local::now()), Err(ReportError::NoResults)));
        let pending = TestOutcome::pending(1, 0, TestCase::new("a", "A"));
        assert!(matches!(render_json(&report(vec![pending])), Err(ReportError::NoResults)));
    }

    #[test]
    fn test_html_escapes_every_cell() {
        let case = TestCase::new("<b>name</b>", "AT&T").expected("\"OK\"").regex("a<b");
        let html = render_html(
            &[finished(1, case, "<script>alert(1)</script>", TestStatus::Fail)],
            Local::now(),
        )
        .unwrap();

        assert!(!html.contains("<b>name</b>"));
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;b&gt;name&lt;/b&gt;"));
        assert!(html.contains("AT&amp;T"));
        assert!(html.contains("&quot;OK&quot;"));
        assert!(html.contains("a&lt;b"));
        assert!(html.contains("class=\"fail\""));
    }

    #[test]
    fn test_html_summary_and_rows() {
        let outcomes = vec![
            finished(1, TestCase::new("at", "AT"), "OK", TestStatus::Pass),
            finished(2, TestCase::new("at", "AT"), "", TestStatus::Fail),
            TestOutcome::pending(3, 0, TestCase::new("at", "AT")),
        ];
        let html = render_html(&outcomes, Local::now()).unwrap();

        assert!(html.contains("<b>Total:</b> 2"));
        assert!(html.contains("<b>Pass:</b> 1"));
        assert!(html.contains("<b>Iterations:</b> 2"));
        assert_eq!(html.matches("<tr class=").count(), 2);
        assert!(html.contains("<th>print_ahead_chars</th>"));
    }

    #[test]
    fn test_write_reports_to_disk() {
        let dir = tempdir().unwrap();
        let report = report(vec![finished(1, TestCase::new("at", "AT"), "OK", TestStatus::Pass)]);

        let html_path = dir.path().join("results.html");
        write_html(&report, &html_path).unwrap();
        assert!(std::fs::read_to_string(&html_path).unwrap().contains("Test Results Report"));

        let json_path = dir.path().join("results.json");
        write_json(&report, &json_path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(value["summary"]["passed"], 1);
        assert_eq!(value["results"][0]["command_name"], "at");
        assert_eq!(value["results"][0]["result"], "PASS");
    }
}
