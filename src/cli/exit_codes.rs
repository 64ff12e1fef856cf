//! CLI Exit Codes
//!
//! Stable process exit codes so scripts and CI jobs can branch on the outcome.

use crate::config::ConfigError;
use crate::core::report::ReportError;
use crate::core::runner::RunError;
use crate::core::simulator::SimulatorError;
use crate::core::testcase::CommandListError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// At least one test failed
    pub const TESTS_FAILED: u8 = 16;

    /// Command list validation failed
    pub const VALIDATION_FAILED: u8 = 17;

    /// Every code, in table order
    pub const ALL: [u8; 11] = [0, 1, 2, 3, 6, 7, 8, 11, 14, 16, 17];
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    pub fn success() -> Self {
        Self::Success(None)
    }

    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    pub fn tests_failed(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::TESTS_FAILED, msg.into())
    }

    pub fn cancelled() -> Self {
        Self::Error(ExitCodes::CANCELLED, "Execution stopped by user.".into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

fn io_code(err: &std::io::Error) -> u8 {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        ErrorKind::ConnectionRefused => ExitCodes::CONNECTION_FAILED,
        _ => ExitCodes::ERROR,
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(io_code(&err), err.to_string())
    }
}

/// Map a failure from the binary onto an exit code
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<TransportError>() {
            return match e {
                TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
                TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
                _ => ExitCodes::CONNECTION_FAILED,
            };
        }
        if let Some(e) = cause.downcast_ref::<RunError>() {
            return match e {
                RunError::NotConnected => ExitCodes::CONNECTION_FAILED,
                RunError::InvalidIterations => ExitCodes::INVALID_ARGS,
                _ => ExitCodes::ERROR,
            };
        }
        if let Some(e) = cause.downcast_ref::<CommandListError>() {
            return match e {
                CommandListError::Io(io) => io_code(io),
                CommandListError::IndexOutOfRange { .. } => ExitCodes::INVALID_ARGS,
                _ => ExitCodes::VALIDATION_FAILED,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitCodes::CONFIG_ERROR;
        }
        if let Some(e) = cause.downcast_ref::<SimulatorError>() {
            return match e {
                SimulatorError::Io(io) => io_code(io),
                _ => ExitCodes::CONFIG_ERROR,
            };
        }
        if let Some(ReportError::Io(io)) = cause.downcast_ref::<ReportError>() {
            return io_code(io);
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return io_code(io);
        }
    }
    ExitCodes::ERROR
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        11 => "Operation cancelled",
        14 => "Port not found",
        16 => "One or more tests failed",
        17 => "Validation failed",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in ExitCodes::ALL {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
