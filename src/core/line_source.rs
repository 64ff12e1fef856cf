//! Line source: owns the device connection and its reader thread
//!
//! The reader thread is the only writer of the [`HistoryBuffer`]. Every
//! non-empty line it receives is trimmed, appended to the history and
//! forwarded to the log sink.

use crate::core::history::HistoryBuffer;
use crate::core::logger::{LogEntry, LogKind};
use crate::core::observer::RunObserver;
use crate::core::transport::{Connection, LineEnding, SerialConfig, SerialConnection, TransportError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Line source settings
#[derive(Debug, Clone, Copy)]
pub struct LineSourceOptions {
    /// Terminator appended to every written command
    pub line_ending: LineEnding,
    /// How long one blocking read may take; bounds stop latency
    pub read_timeout: Duration,
}

impl Default for LineSourceOptions {
    fn default() -> Self {
        Self {
            line_ending: LineEnding::Crlf,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Anything that can send one command line to the device
pub trait LineWriter: Send + Sync {
    /// Send `command` followed by the line terminator
    fn write_line(&self, command: &str) -> Result<(), TransportError>;
}

struct ReaderTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owner of the single active connection
pub struct LineSource {
    history: HistoryBuffer,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    reader: Mutex<Option<ReaderTask>>,
    sink: Arc<dyn RunObserver>,
    options: LineSourceOptions,
}

impl LineSource {
    /// Create a disconnected line source that reports received lines to `sink`
    pub fn new(sink: Arc<dyn RunObserver>, options: LineSourceOptions) -> Self {
        Self {
            history: HistoryBuffer::new(),
            connection: RwLock::new(None),
            reader: Mutex::new(None),
            sink,
            options,
        }
    }

    /// Open a serial port and start reading from it
    pub fn connect_serial(&self, config: SerialConfig) -> Result<(), TransportError> {
        let connection = SerialConnection::open(config)?;
        self.attach(Arc::new(connection));
        Ok(())
    }

    /// Take ownership of an open connection and start the reader thread.
    ///
    /// Any previous connection is disconnected first.
    pub fn attach(&self, connection: Arc<dyn Connection>) {
        self.disconnect();

        let description = connection.describe();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let connection = Arc::clone(&connection);
            let history = self.history.clone();
            let sink = Arc::clone(&self.sink);
            let stop = Arc::clone(&stop);
            let read_timeout = self.options.read_timeout;
            thread::Builder::new()
                .name("line-reader".into())
                .spawn(move || reader_loop(&*connection, &history, &*sink, &stop, read_timeout))
        };

        match handle {
            Ok(handle) => {
                *self.connection.write() = Some(connection);
                *self.reader.lock() = Some(ReaderTask { stop, handle });
                info!(connection = %description, "connected");
                self.sink
                    .on_log(&LogEntry::new(LogKind::Info, format!("Connected to {description}")));
            }
            Err(e) => {
                // Without a reader nothing would ever reach the history.
                warn!("failed to spawn reader thread: {e}");
                let _ = connection.close();
                self.sink.on_log(&LogEntry::new(
                    LogKind::Error,
                    format!("Could not start reader for {description}: {e}"),
                ));
            }
        }
    }

    /// Stop the reader and close the connection. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let task = self.reader.lock().take();
        if let Some(task) = &task {
            task.stop.store(true, Ordering::SeqCst);
        }

        if let Some(connection) = self.connection.write().take() {
            if let Err(e) = connection.close() {
                debug!("close after disconnect: {e}");
            }
            info!("disconnected");
            self.sink.on_log(&LogEntry::new(LogKind::Info, "Disconnected"));
        }

        if let Some(task) = task {
            if task.handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }

    /// Whether a connection is attached and still open
    pub fn is_connected(&self) -> bool {
        self.connection
            .read()
            .as_ref()
            .is_some_and(|connection| connection.is_open())
    }

    /// Description of the active connection
    pub fn describe(&self) -> Option<String> {
        self.connection.read().as_ref().map(|c| c.describe())
    }

    /// Handle to the received-line history
    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    /// Line source settings
    pub fn options(&self) -> LineSourceOptions {
        self.options
    }
}

impl LineWriter for LineSource {
    fn write_line(&self, command: &str) -> Result<(), TransportError> {
        let connection = self
            .connection
            .read()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        if !connection.is_open() {
            return Err(TransportError::NotConnected);
        }

        let mut data = Vec::with_capacity(command.len() + 2);
        data.extend_from_slice(command.as_bytes());
        data.extend_from_slice(self.options.line_ending.as_bytes());
        connection.write(&data)
    }
}

impl Drop for LineSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn reader_loop(
    connection: &dyn Connection,
    history: &HistoryBuffer,
    sink: &dyn RunObserver,
    stop: &AtomicBool,
    read_timeout: Duration,
) {
    debug!("reader started");
    while !stop.load(Ordering::SeqCst) && connection.is_open() {
        match connection.read_line(read_timeout) {
            Ok(Some(raw)) => {
                let line = decode_line(&raw);
                if line.is_empty() {
                    continue;
                }
                history.append(line.clone());
                sink.on_log(&LogEntry::new(LogKind::Recv, line));
            }
            Ok(None) => {}
            Err(TransportError::Disconnected) => {
                if !stop.load(Ordering::SeqCst) {
                    warn!("connection lost");
                    sink.on_log(&LogEntry::new(LogKind::Error, "Connection lost"));
                    let _ = connection.close();
                }
                break;
            }
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                warn!("read error: {e}");
                sink.on_log(&LogEntry::new(LogKind::Error, format!("Read error: {e}")));
                thread::sleep(read_timeout);
            }
        }
    }
    debug!("reader stopped");
}

/// Decode a received line, dropping bytes that are not valid UTF-8
fn decode_line(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.trim().to_string(),
        Err(_) => {
            debug!(raw = %hex::encode(raw), "dropping undecodable bytes");
            String::from_utf8_lossy(raw)
                .replace(char::REPLACEMENT_CHARACTER, "")
                .trim()
                .to_string()
        }
    }
}
