//! Transport layer for the device connection
//!
//! Supports:
//! - Serial ports (RS-232, RS-485, USB-Serial)
//! - A simulated device for dry runs and tests (see [`crate::core::simulator`])

mod serial;

pub use serial::{list_ports, SerialConfig, SerialConnection, SerialFlowControl, SerialParity};

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// No connection is open
    #[error("Not connected")]
    NotConnected,

    /// The peer went away
    #[error("Disconnected")]
    Disconnected,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),
}

/// Line terminator appended to every outgoing command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// CR+LF
    #[default]
    Crlf,
    /// LF only
    Lf,
    /// CR only
    Cr,
    /// Nothing appended
    None,
}

impl LineEnding {
    /// Terminator bytes
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Crlf => b"\r\n",
            Self::Lf => b"\n",
            Self::Cr => b"\r",
            Self::None => b"",
        }
    }
}

impl fmt::Display for LineEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crlf => write!(f, "CRLF"),
            Self::Lf => write!(f, "LF"),
            Self::Cr => write!(f, "CR"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for LineEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crlf" => Ok(Self::Crlf),
            "lf" => Ok(Self::Lf),
            "cr" => Ok(Self::Cr),
            "none" => Ok(Self::None),
            other => Err(format!("unknown line ending: {other}")),
        }
    }
}

/// A duplex, line-oriented connection to a device.
///
/// Implementations synchronize internally so that one thread can sit in
/// [`Connection::read_line`] while another calls [`Connection::write`].
#[cfg_attr(test, mockall::automock)]
pub trait Connection: Send + Sync {
    /// Whether the connection is still usable
    fn is_open(&self) -> bool;

    /// Transmit raw bytes
    fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one complete line.
    ///
    /// Returns `Ok(None)` when nothing complete arrived in time and
    /// `Err(TransportError::Disconnected)` once the peer is gone. The returned
    /// bytes exclude the terminator.
    fn read_line(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the connection. Closing twice is not an error.
    fn close(&self) -> Result<(), TransportError>;

    /// Human-readable connection info
    fn describe(&self) -> String;
}

/// Splits a byte stream into lines on LF, CR or CRLF.
///
/// Blank lines are swallowed, so a CRLF pair yields exactly one line.
#[derive(Debug, Default)]
pub(crate) struct LineAssembler {
    pending: BytesMut,
}

impl LineAssembler {
    pub(crate) fn extend(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Pop the next complete line, if any
    pub(crate) fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let pos = self.pending.iter().position(|&b| b == b'\n' || b == b'\r')?;
            let line = self.pending.split_to(pos);
            self.pending.advance(1);
            if !line.is_empty() {
                return Some(line.to_vec());
            }
        }
    }

    /// Take whatever partial line is buffered
    pub(crate) fn flush(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.split().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_ending_bytes() {
        assert_eq!(LineEnding::Crlf.as_bytes(), b"\r\n");
        assert_eq!(LineEnding::None.as_bytes(), b"");
        assert_eq!("LF".parse::<LineEnding>().unwrap(), LineEnding::Lf);
        assert!("tab".parse::<LineEnding>().is_err());
    }

    #[test]
    fn test_assembler_terminators() {
        let mut asm = LineAssembler::default();
        asm.extend(b"OK\r\nREADY\rAT+X\nparti");
        assert_eq!(asm.next_line().as_deref(), Some(&b"OK"[..]));
        assert_eq!(asm.next_line().as_deref(), Some(&b"READY"[..]));
        assert_eq!(asm.next_line().as_deref(), Some(&b"AT+X"[..]));
        assert_eq!(asm.next_line(), None);

        asm.extend(b"al");
        assert_eq!(asm.flush().as_deref(), Some(&b"partial"[..]));
        assert_eq!(asm.flush(), None);
    }
}
