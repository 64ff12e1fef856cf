//! Application settings

use crate::core::executor::{ExecutorSettings, DEFAULT_POLL_INTERVAL, MIN_WAIT};
use crate::core::line_source::LineSourceOptions;
use crate::core::logger::LogFormat;
use crate::core::transport::{LineEnding, SerialConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Configuration file problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Cannot encode configuration: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial port used by `run` and `send`
    pub serial: SerialConfig,
    /// Run defaults
    pub run: RunConfig,
    /// Session log settings
    pub logging: LoggingConfig,
    /// Report output paths
    pub report: ReportConfig,
}

impl AppConfig {
    /// Default location of the configuration file
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        super::config_dir()
            .map(|dir| dir.join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load config from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.iterations == 0 {
            return Err(ConfigError::Invalid {
                key: "run.iterations",
                reason: "must be at least 1".into(),
            });
        }
        if self.run.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "run.poll_interval_ms",
                reason: "must be positive".into(),
            });
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid {
                key: "serial.baud_rate",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Run defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Passes over the command list
    pub iterations: u32,
    /// How often a waiting test re-checks the history
    pub poll_interval_ms: u64,
    /// Lower bound for a test's wait window
    pub min_wait_ms: u64,
    /// Terminator appended to commands
    pub line_ending: LineEnding,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            min_wait_ms: MIN_WAIT.as_millis() as u64,
            line_ending: LineEnding::Crlf,
        }
    }
}

impl RunConfig {
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            min_wait: Duration::from_millis(self.min_wait_ms),
        }
    }

    pub fn line_source_options(&self, serial: &SerialConfig) -> LineSourceOptions {
        LineSourceOptions {
            line_ending: self.line_ending,
            read_timeout: serial.read_timeout(),
        }
    }
}

/// Session log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Append session events here; empty disables the session log
    pub session_log: PathBuf,
    pub format: LogFormat,
    /// Also write tracing diagnostics to a daily file in the log directory
    pub trace_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            session_log: PathBuf::from("session.log"),
            format: LogFormat::Text,
            trace_file: false,
        }
    }
}

/// Report output paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub html: Option<PathBuf>,
    pub json: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            html: Some(PathBuf::from("results.html")),
            json: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.run.iterations, 1);
        assert_eq!(config.run.min_wait_ms, 100);
        assert_eq!(config.logging.session_log, PathBuf::from("session.log"));
        assert_eq!(config.report.html, Some(PathBuf::from("results.html")));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[serial]\nport = \"/dev/ttyUSB0\"\nbaud_rate = 115200\n\n[run]\niterations = 5\nline_ending = \"lf\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.data_bits, 8);
        assert_eq!(config.run.iterations, 5);
        assert_eq!(config.run.line_ending, LineEnding::Lf);
        assert_eq!(config.run.poll_interval_ms, 20);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.run.iterations = 3;
        config.report.json = Some(PathBuf::from("out.json"));
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.run.iterations, 3);
        assert_eq!(loaded.report.json, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[run]\niterations = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::Invalid { key: "run.iterations", .. })
        ));

        std::fs::write(&path, "[run\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Parse { .. })));
    }
}
