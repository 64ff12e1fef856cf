//! # Probeline Core Library
//!
//! Command/response testing of line-oriented serial devices.
//!
//! A command list describes what to send and what a good reply looks like.
//! Each command is written to the device, and the lines that come back are
//! checked against the expected text, a regular expression, or a forbidden
//! pattern. Commands can be retried and the whole list can be repeated.
//!
//! ## Features
//!
//! - Serial ports (RS-232, RS-485, USB-Serial adapters)
//! - Simulated devices driven by JSON rule files
//! - Substring, regex and negative-match verdicts with retries
//! - Cooperative stop of long runs
//! - Timestamped session log, HTML and JSON reports
//! - CLI with exit codes for CI use
//!
//! ## Example
//!
//! ```rust,no_run
//! use probeline_core::{LineSource, LineSourceOptions, NullObserver, RunController, SerialConfig, TestCase};
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(LineSource::new(Arc::new(NullObserver), LineSourceOptions::default()));
//!     source.connect_serial(SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!
//!     let controller = RunController::new(source);
//!     let cases = vec![TestCase::new("ping", "AT").expected("OK")];
//!     let report = controller.run(cases, 3, Arc::new(NullObserver))?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::evaluator::{evaluate, EvaluationError, Matcher, Rule};
pub use crate::core::executor::{CancelToken, ExecutorSettings, TestExecutor};
pub use crate::core::history::HistoryBuffer;
pub use crate::core::line_source::{LineSource, LineSourceOptions, LineWriter};
pub use crate::core::logger::{LogEntry, LogFormat, LogKind, Logger, SessionLogger};
pub use crate::core::observer::{ChannelObserver, NullObserver, Observers, RunEvent, RunObserver};
pub use crate::core::outcome::{RunSummary, TestOutcome, TestStatus};
pub use crate::core::report::ReportError;
pub use crate::core::runner::{RunController, RunError, RunHandle, RunReport};
pub use crate::core::simulator::{DeviceProfile, DeviceTemplates, ResponseRule, SimulatedDevice};
pub use crate::core::testcase::{CommandList, CommandListError, TestCase};
pub use crate::core::transport::{Connection, LineEnding, SerialConfig, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
