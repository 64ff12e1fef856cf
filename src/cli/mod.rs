//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Console formatting of run progress

pub mod display;
pub mod exit_codes;

pub use display::{format_case_table, format_log, format_outcome, format_summary, Console, OutputFormat};
pub use exit_codes::{exit_code_description, exit_code_for, print_exit_codes, CliResult, ExitCodes};
