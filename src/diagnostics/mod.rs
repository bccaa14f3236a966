//! Diagnostic Event Log
//!
//! A process-wide, size-rotated log shared by the acquisition worker, the
//! persistence writer and any front end. Every record is formatted once and
//! sent to two sinks:
//!
//! - a console sink receiving `Info` and above (stdout, or an in-memory
//!   [`LogBuffer`] for embedding and tests)
//! - a [`RotatingFile`] receiving `Debug` and above
//!
//! Line format:
//!
//! ```text
//! 2024-05-01 14:03:22 - acquisition - WARNING - [worker.rs:212] - [READING] Channel 3 failed: crc mismatch
//! ```
//!
//! Logging never fails from the caller's point of view. If the file cannot be
//! written, one fallback line goes to the console sink and the record is dropped.
//!
//! # Initialization
//!
//! [`DiagnosticSink::init`] creates the process instance exactly once and
//! returns it on every later call. Components take an `Arc<DiagnosticSink>`
//! instead of reaching for the global, so tests can build isolated sinks with
//! [`DiagnosticSink::new`].
//!
//! ```no_run
//! use thermo_daq::config::DiagnosticsConfig;
//! use thermo_daq::diagnostics::DiagnosticSink;
//!
//! let sink = DiagnosticSink::init(&DiagnosticsConfig::default());
//! sink.info("main", "Application started");
//! ```

mod layer;
mod rotation;

pub use layer::{install_tracing, DiagnosticLayer};
pub use rotation::RotatingFile;

use crate::channel::ChannelId;
use crate::config::DiagnosticsConfig;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

const MAX_BUFFERED_LINES: usize = 1000;

static GLOBAL_SINK: OnceLock<Arc<DiagnosticSink>> = OnceLock::new();

/// Record severity, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Verbose detail, file only
    Debug,
    /// Normal operation
    Info,
    /// Recovered problem
    Warning,
    /// Failed operation
    Error,
    /// Unexpected fault
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Source location of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// File name without directories
    pub file: String,
    /// Line number
    pub line: u32,
}

impl SourceLocation {
    /// Location of a `#[track_caller]` call site.
    pub fn from_caller(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line())
    }

    /// Location from a file path and line.
    pub fn new(path: &str, line: u32) -> Self {
        let file = Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Self { file, line }
    }
}

/// One diagnostic event.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Emission time
    pub timestamp: DateTime<Local>,
    /// Severity
    pub severity: Severity,
    /// Originating component tag
    pub component: String,
    /// Free-text message
    pub message: String,
    /// Captured failure detail, if any
    pub detail: Option<String>,
    /// Where the record was emitted
    pub location: Option<SourceLocation>,
}

impl LogRecord {
    /// Record stamped with the current time.
    pub fn new(severity: Severity, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            severity,
            component: component.into(),
            message: message.into(),
            detail: None,
            location: None,
        }
    }

    /// Attach failure detail.
    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// Attach a source location.
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Render as one log line (without trailing newline).
    pub fn format_line(&self) -> String {
        let location = match &self.location {
            Some(loc) => format!("{}:{}", loc.file, loc.line),
            None => "-".to_string(),
        };
        let mut line = format!(
            "{} - {} - {} - [{}] - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.component,
            self.severity,
            location,
            self.message
        );
        if let Some(detail) = &self.detail {
            line.push_str(" - caused by: ");
            line.push_str(detail);
        }
        line
    }
}

/// A thread-safe, fixed-capacity buffer of console lines.
///
/// Used as the console sink when records should be shown by an embedding
/// front end instead of printed.
#[derive(Clone, Debug, Default)]
pub struct LogBuffer(Arc<Mutex<VecDeque<String>>>);

impl LogBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(VecDeque::with_capacity(
            MAX_BUFFERED_LINES,
        ))))
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, line: String) {
        let mut buffer = self.lock();
        if buffer.len() >= MAX_BUFFERED_LINES {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }

    /// Snapshot of the buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Buffered lines containing `needle`.
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|line| line.contains(needle))
            .cloned()
            .collect()
    }

    /// Drop all buffered lines.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Where console-level records go.
#[derive(Clone, Debug)]
pub enum ConsoleTarget {
    /// Standard output
    Stdout,
    /// In-memory buffer
    Buffer(LogBuffer),
    /// Discard
    Disabled,
}

impl ConsoleTarget {
    fn write_line(&self, line: &str) {
        match self {
            ConsoleTarget::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out, "{line}");
            }
            ConsoleTarget::Buffer(buffer) => buffer.push(line.to_string()),
            ConsoleTarget::Disabled => {}
        }
    }
}

/// Process-wide diagnostic log.
#[derive(Debug)]
pub struct DiagnosticSink {
    log_path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: Mutex<Option<RotatingFile>>,
    console: ConsoleTarget,
    console_min: Severity,
    file_min: Severity,
}

impl DiagnosticSink {
    /// Initialize the process-wide sink, or return the existing one.
    ///
    /// Only the first call's configuration takes effect.
    pub fn init(config: &DiagnosticsConfig) -> Arc<Self> {
        GLOBAL_SINK
            .get_or_init(|| Arc::new(Self::new(config)))
            .clone()
    }

    /// The process-wide sink, if [`init`](Self::init) has run.
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL_SINK.get().cloned()
    }

    /// Build a standalone sink from configuration.
    pub fn new(config: &DiagnosticsConfig) -> Self {
        let console = if config.console {
            ConsoleTarget::Stdout
        } else {
            ConsoleTarget::Disabled
        };
        Self::with_console(config, console)
    }

    /// Build a standalone sink with an explicit console target.
    pub fn with_console(config: &DiagnosticsConfig, console: ConsoleTarget) -> Self {
        let log_path = config.log_path();
        let file = match RotatingFile::open(&log_path, config.max_bytes, config.backup_count) {
            Ok(file) => Some(file),
            Err(e) => {
                console.write_line(&format!(
                    "Warning: could not open diagnostic log {}: {e}",
                    log_path.display()
                ));
                None
            }
        };
        Self {
            log_path,
            max_bytes: config.max_bytes,
            backup_count: config.backup_count,
            file: Mutex::new(file),
            console,
            console_min: Severity::Info,
            file_min: Severity::Debug,
        }
    }

    /// Path of the active log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Write a record to both sinks. Never fails.
    pub fn emit(&self, record: LogRecord) {
        let line = record.format_line();

        if record.severity >= self.file_min {
            if let Err(e) = self.write_file(&line) {
                self.console
                    .write_line(&format!("Diagnostic log write failed: {e}"));
            }
        }

        if record.severity >= self.console_min {
            self.console.write_line(&line);
        }
    }

    fn write_file(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(RotatingFile::open(
                &self.log_path,
                self.max_bytes,
                self.backup_count,
            )?);
        }
        match guard.as_mut() {
            Some(file) => file.write_line(line),
            None => Ok(()),
        }
    }

    /// Flush the file sink.
    pub fn flush(&self) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.flush() {
                self.console
                    .write_line(&format!("Diagnostic log flush failed: {e}"));
            }
        }
    }

    #[track_caller]
    fn log(&self, severity: Severity, component: &str, message: String, detail: Option<String>) {
        let mut record = LogRecord::new(severity, component, message)
            .at(SourceLocation::from_caller(Location::caller()));
        record.detail = detail;
        self.emit(record);
    }

    /// Log at Debug.
    #[track_caller]
    pub fn debug(&self, component: &str, message: impl Into<String>) {
        self.log(Severity::Debug, component, message.into(), None);
    }

    /// Log at Info.
    #[track_caller]
    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.log(Severity::Info, component, message.into(), None);
    }

    /// Log at Warning.
    #[track_caller]
    pub fn warning(&self, component: &str, message: impl Into<String>) {
        self.log(Severity::Warning, component, message.into(), None);
    }

    /// Log at Warning with failure detail.
    #[track_caller]
    pub fn warning_with(&self, component: &str, message: impl Into<String>, detail: impl fmt::Display) {
        self.log(Severity::Warning, component, message.into(), Some(detail.to_string()));
    }

    /// Log at Error.
    #[track_caller]
    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.log(Severity::Error, component, message.into(), None);
    }

    /// Log at Error with failure detail.
    #[track_caller]
    pub fn error_with(&self, component: &str, message: impl Into<String>, detail: impl fmt::Display) {
        self.log(Severity::Error, component, message.into(), Some(detail.to_string()));
    }

    /// Log at Critical.
    #[track_caller]
    pub fn critical(&self, component: &str, message: impl Into<String>) {
        self.log(Severity::Critical, component, message.into(), None);
    }

    /// Log at Critical with failure detail.
    #[track_caller]
    pub fn critical_with(&self, component: &str, message: impl Into<String>, detail: impl fmt::Display) {
        self.log(Severity::Critical, component, message.into(), Some(detail.to_string()));
    }

    /// Channel connect/disconnect and similar hardware events (Info).
    #[track_caller]
    pub fn hardware_event(&self, channel: ChannelId, status: &str, details: &str) {
        let mut message = format!("[HARDWARE] Channel {}: {status}", channel.number());
        if !details.is_empty() {
            message.push_str(" - ");
            message.push_str(details);
        }
        self.log(Severity::Info, "hardware", message, None);
    }

    /// A channel read failed (Warning).
    #[track_caller]
    pub fn reading_failed(&self, channel: ChannelId, reason: &str) {
        self.log(
            Severity::Warning,
            "acquisition",
            format!("[READING] Channel {} failed: {reason}", channel.number()),
            None,
        );
    }

    /// A file operation failed (Error).
    #[track_caller]
    pub fn io_event(&self, component: &str, message: &str, detail: Option<&dyn fmt::Display>) {
        self.log(
            Severity::Error,
            component,
            format!("[IO] {message}"),
            detail.map(|d| d.to_string()),
        );
    }
}
