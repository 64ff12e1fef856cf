//! Simulated line device
//!
//! A scriptable stand-in for a serial device. Each command line written to it
//! is matched against an ordered rule set; the first enabled match decides the
//! reply. Rule sets can be loaded from JSON, so a command list can be
//! exercised without hardware.

use crate::core::transport::{Connection, LineAssembler, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Rule file problems
#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("Cannot read rules: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid rules file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rule '{rule}' has an invalid pattern: {reason}")]
    InvalidPattern { rule: String, reason: String },
}

/// When a rule applies to a received command line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MatchCondition {
    /// Whole line equals `text`
    Exact {
        text: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    /// Line contains `text`
    Text {
        text: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    /// Line matches a regular expression
    Regex { pattern: String },
    /// Every line
    Any,
}

impl MatchCondition {
    /// Check a command line against this condition
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Self::Exact { text, case_sensitive: true } => line == text,
            Self::Exact { text, case_sensitive: false } => line.eq_ignore_ascii_case(text),
            Self::Text { text, case_sensitive: true } => line.contains(text.as_str()),
            Self::Text { text, case_sensitive: false } => {
                line.to_lowercase().contains(&text.to_lowercase())
            }
            Self::Regex { pattern } => Regex::new(pattern).is_ok_and(|re| re.is_match(line)),
            Self::Any => true,
        }
    }
}

/// What the device does once a rule matched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseAction {
    /// Emit these lines
    Reply { lines: Vec<String> },
    /// Emit the command back
    Echo,
    /// Emit nothing
    Silent,
    /// Drop the link, as if the cable was pulled
    Disconnect,
}

fn enabled_default() -> bool {
    true
}

/// One entry of a device rule set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub condition: MatchCondition,
    pub action: ResponseAction,
    /// Fixed delay before the reply
    #[serde(default)]
    pub delay_ms: u64,
    /// Random extra delay, uniformly 0..=jitter_ms
    #[serde(default)]
    pub jitter_ms: u64,
    /// Higher is checked first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Disable after the first match
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default, skip_serializing)]
    pub match_count: u64,
}

impl ResponseRule {
    /// Reply with `lines` whenever `condition` holds
    pub fn reply(name: &str, condition: MatchCondition, lines: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            condition,
            action: ResponseAction::Reply {
                lines: lines.iter().map(|l| l.to_string()).collect(),
            },
            delay_ms: 0,
            jitter_ms: 0,
            priority: 0,
            enabled: true,
            one_shot: false,
            match_count: 0,
        }
    }

    /// Echo every command
    pub fn echo(name: &str) -> Self {
        Self {
            action: ResponseAction::Echo,
            description: Some("Echo all input".to_string()),
            ..Self::reply(name, MatchCondition::Any, &[])
        }
    }

    /// Case-insensitive whole-line match helper
    pub fn on(name: &str, command: &str, lines: &[&str]) -> Self {
        Self::reply(
            name,
            MatchCondition::Exact {
                text: command.to_string(),
                case_sensitive: false,
            },
            lines,
        )
    }

    #[must_use]
    pub fn after(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub fn jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn once(mut self) -> Self {
        self.one_shot = true;
        self
    }

    fn delay(&self) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.delay_ms.saturating_add(jitter))
    }
}

/// Serializable device description: a name, a greeting and the rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    /// Lines emitted as soon as the device is opened
    #[serde(default)]
    pub banner: Vec<String>,
    #[serde(default)]
    pub rules: Vec<ResponseRule>,
}

impl DeviceProfile {
    /// Load a profile from a JSON file
    pub fn load(path: &Path) -> Result<Self, SimulatorError> {
        let content = std::fs::read_to_string(path)?;
        let profile: Self = serde_json::from_str(&content)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reject rules whose regex would never compile
    pub fn validate(&self) -> Result<(), SimulatorError> {
        for rule in &self.rules {
            if let MatchCondition::Regex { pattern } = &rule.condition {
                Regex::new(pattern).map_err(|e| SimulatorError::InvalidPattern {
                    rule: rule.name.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

/// In-memory device implementing [`Connection`]
pub struct SimulatedDevice {
    name: String,
    rules: RwLock<Vec<ResponseRule>>,
    inbound: Mutex<LineAssembler>,
    received: Mutex<Vec<String>>,
    tx: Sender<String>,
    rx: Receiver<String>,
    open: AtomicBool,
    failing_writes: AtomicUsize,
}

impl SimulatedDevice {
    /// Device with no rules; it accepts commands and stays silent
    pub fn new(name: &str) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            name: name.to_string(),
            rules: RwLock::new(Vec::new()),
            inbound: Mutex::new(LineAssembler::default()),
            received: Mutex::new(Vec::new()),
            tx,
            rx,
            open: AtomicBool::new(true),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Build a device from a profile, queueing its banner
    pub fn from_profile(profile: DeviceProfile) -> Self {
        let device = Self::new(&profile.name);
        for rule in profile.rules {
            device.add_rule(rule);
        }
        for line in profile.banner {
            device.push_line(line);
        }
        device
    }

    /// Load a profile from JSON and build the device
    pub fn load(path: &Path) -> Result<Self, SimulatorError> {
        Ok(Self::from_profile(DeviceProfile::load(path)?))
    }

    /// Add a rule, keeping the set ordered by priority
    pub fn add_rule(&self, rule: ResponseRule) {
        let mut rules = self.rules.write();
        rules.push(rule);
        // Stable sort keeps file order among equal priorities.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    #[must_use]
    pub fn with_rule(self, rule: ResponseRule) -> Self {
        self.add_rule(rule);
        self
    }

    /// Current rules, highest priority first
    pub fn rules(&self) -> Vec<ResponseRule> {
        self.rules.read().clone()
    }

    /// Emit an unsolicited line
    pub fn push_line(&self, line: impl Into<String>) {
        let _ = self.tx.send(line.into());
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Command lines received so far
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn respond(&self, command: &str) {
        let mut rules = self.rules.write();
        let Some(rule) = rules
            .iter_mut()
            .find(|rule| rule.enabled && rule.condition.matches(command))
        else {
            trace!(command, "no rule matched");
            return;
        };

        rule.match_count += 1;
        if rule.one_shot {
            rule.enabled = false;
        }
        debug!(rule = %rule.name, command, "rule matched");

        let lines = match &rule.action {
            ResponseAction::Reply { lines } => lines.clone(),
            ResponseAction::Echo => vec![command.to_string()],
            ResponseAction::Silent => return,
            ResponseAction::Disconnect => {
                self.open.store(false, Ordering::SeqCst);
                return;
            }
        };
        self.deliver(lines, rule.delay());
    }

    fn deliver(&self, lines: Vec<String>, delay: Duration) {
        if delay.is_zero() {
            for line in lines {
                let _ = self.tx.send(line);
            }
            return;
        }

        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name("sim-reply".into())
            .spawn(move || {
                thread::sleep(delay);
                for line in lines {
                    let _ = tx.send(line);
                }
            });
        if let Err(e) = spawned {
            debug!("reply thread failed to start: {e}");
        }
    }
}

impl Connection for SimulatedDevice {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let failing = self.failing_writes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_writes.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::SendError("simulated write failure".into()));
        }

        let commands: Vec<String> = {
            let mut inbound = self.inbound.lock();
            inbound.extend(data);
            std::iter::from_fn(|| inbound.next_line())
                .map(|raw| String::from_utf8_lossy(&raw).trim().to_string())
                .filter(|line| !line.is_empty())
                .collect()
        };
        for command in commands {
            self.received.lock().push(command.clone());
            self.respond(&command);
        }
        Ok(())
    }

    fn read_line(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Disconnected);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(line) => Ok(Some(line.into_bytes())),
            Err(RecvTimeoutError::Timeout) if self.is_open() => Ok(None),
            Err(_) => Err(TransportError::Disconnected),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("simulated:{}", self.name)
    }
}

/// Ready-made devices
pub struct DeviceTemplates;

impl DeviceTemplates {
    /// Echoes every command
    pub fn echo() -> SimulatedDevice {
        SimulatedDevice::new("Echo Device").with_rule(ResponseRule::echo("echo_all"))
    }

    /// Hayes-style modem profile
    pub fn at_modem_profile() -> DeviceProfile {
        DeviceProfile {
            name: "AT Modem".to_string(),
            banner: Vec::new(),
            rules: vec![
                ResponseRule::on("AT", "AT", &["OK"]).priority(10),
                ResponseRule::on("ATI", "ATI", &["Probeline Virtual Modem v1.0", "OK"]).priority(10),
                ResponseRule::on("GMR", "AT+GMR", &["AT version:1.7.4.0", "OK"])
                    .priority(10)
                    .after(20),
                ResponseRule::reply(
                    "unknown",
                    MatchCondition::Text {
                        text: "AT".to_string(),
                        case_sensitive: false,
                    },
                    &["ERROR"],
                )
                .priority(1),
            ],
        }
    }

    /// Device built from [`DeviceTemplates::at_modem_profile`]
    pub fn at_modem() -> SimulatedDevice {
        SimulatedDevice::from_profile(Self::at_modem_profile())
    }
}
