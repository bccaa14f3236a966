//! Daily CSV data files.
//!
//! While a session is active, every reading batch becomes one row of
//! `<data_dir>/temperatures_YYYY-MM-DD.csv`:
//!
//! ```text
//! Timestamp,CH1,CH2,CH3,CH4,CH5,CH6,CH7,CH8
//! 01-05-2024 14:03:22,21.4,23.1,,25.0,27.2,29.9,31.0,33.3
//! ```
//!
//! The header is written only when the file is new or empty, so restarting a
//! session on the same day appends to the existing file. Failed reads and
//! channels not polled are empty fields. The file for a row is chosen from the
//! batch timestamp: the first batch of a new day closes the old file and opens
//! the next one.

use crate::channel::{ChannelId, CHANNEL_COUNT};
use crate::diagnostics::DiagnosticSink;
use crate::error::{AppResult, DaqError};
use crate::measurement_types::ReadingBatch;
use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const COMPONENT: &str = "persistence";

/// Format of the first column.
pub const ROW_TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Name of the data file for a calendar day.
pub fn file_name_for(day: NaiveDate) -> String {
    format!("temperatures_{}.csv", day.format("%Y-%m-%d"))
}

/// Header row.
pub fn header() -> Vec<String> {
    std::iter::once("Timestamp".to_string())
        .chain(ChannelId::all().map(|ch| ch.to_string()))
        .collect()
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if !v.is_nan() => v.to_string(),
        _ => String::new(),
    }
}

#[derive(Debug)]
struct ActiveSession {
    dir: PathBuf,
    day: NaiveDate,
    file: Option<File>,
}

impl ActiveSession {
    fn path(&self) -> PathBuf {
        self.dir.join(file_name_for(self.day))
    }

    fn file(&mut self) -> AppResult<&mut File> {
        if self.file.is_none() {
            self.file = Some(open_day_file(&self.path())?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| DaqError::Storage("data file not open".to_string()))
    }

    fn write_row(&mut self, record: &[String]) -> AppResult<()> {
        let bytes = encode_record(record)?;
        let file = self.file()?;
        append_whole(file, &bytes)
    }

    fn close(&mut self) -> AppResult<()> {
        if let Some(file) = self.file.take() {
            file.sync_data()?;
        }
        Ok(())
    }
}

/// One CSV line, fully encoded before anything touches the file.
fn encode_record<I, T>(record: I) -> AppResult<Vec<u8>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(record)?;
    writer
        .into_inner()
        .map_err(|e| DaqError::Storage(e.error().to_string()))
}

/// Append `bytes` as a unit. A write that fails partway is cut back to the
/// previous end of file so no partial line is left behind.
fn append_whole(file: &mut File, bytes: &[u8]) -> AppResult<()> {
    let end = file.metadata()?.len();
    if let Err(e) = file.write_all(bytes) {
        let _ = file.set_len(end);
        return Err(e.into());
    }
    Ok(())
}

fn open_day_file(path: &Path) -> AppResult<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        append_whole(&mut file, &encode_record(header())?)?;
    }
    Ok(file)
}

/// Appends reading batches to the daily CSV file of the active session.
#[derive(Debug)]
pub struct PersistenceWriter {
    diag: Arc<DiagnosticSink>,
    session: Option<ActiveSession>,
}

impl PersistenceWriter {
    /// Writer with no active session.
    pub fn new(diag: Arc<DiagnosticSink>) -> Self {
        Self {
            diag,
            session: None,
        }
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Path of the file rows are currently written to.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.session.as_ref().map(ActiveSession::path)
    }

    /// Start a session writing into `target_dir`.
    ///
    /// Starting while a session is active logs a Warning and changes nothing.
    pub fn start_session(&mut self, target_dir: impl AsRef<Path>) -> AppResult<()> {
        if let Some(path) = self.current_path() {
            self.diag.warning(
                COMPONENT,
                format!("Session already active, still writing to {}", path.display()),
            );
            return Ok(());
        }

        let mut session = ActiveSession {
            dir: target_dir.as_ref().to_path_buf(),
            day: Local::now().date_naive(),
            file: None,
        };
        let path = session.path();
        let existed = path.exists();
        if let Err(e) = session.file() {
            self.diag.io_event(
                COMPONENT,
                &format!("Could not start session at {}", path.display()),
                Some(&e),
            );
            return Err(e);
        }

        let verb = if existed { "Appending to" } else { "Created" };
        self.diag
            .info(COMPONENT, format!("Session started. {verb} {}", path.display()));
        self.session = Some(session);
        Ok(())
    }

    /// Append one batch as a row. Does nothing when no session is active.
    ///
    /// A failed write is logged and returned; the session stays active and
    /// the next append tries again, reopening the file if needed. A data file
    /// removed or replaced while open is reopened at its path.
    pub fn append(&mut self, batch: &ReadingBatch) -> AppResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        let day = batch.timestamp.date_naive();
        if day != session.day {
            let previous = session.path();
            if let Err(e) = session.close() {
                self.diag.io_event(
                    COMPONENT,
                    &format!("Could not close {}", previous.display()),
                    Some(&e),
                );
            }
            session.day = day;
            self.diag.info(
                COMPONENT,
                format!(
                    "Date changed, switching from {} to {}",
                    previous.display(),
                    session.path().display()
                ),
            );
        }

        let mut record = Vec::with_capacity(CHANNEL_COUNT + 1);
        record.push(batch.timestamp.format(ROW_TIMESTAMP_FORMAT).to_string());
        record.extend(batch.row().into_iter().map(format_value));

        if session.file.is_some() && !session.path().is_file() {
            self.diag.warning(
                COMPONENT,
                format!("{} is gone, reopening it", session.path().display()),
            );
            session.file = None;
        }
        let result = session.write_row(&record);

        if let Err(e) = &result {
            // The next append reopens the file.
            session.file = None;
            self.diag.io_event(
                COMPONENT,
                &format!("Failed to write row to {}", session.path().display()),
                Some(e),
            );
        }
        result
    }

    /// Flush and close the session file. Close failures are logged only.
    pub fn stop_session(&mut self) -> AppResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let path = session.path();
        match session.close() {
            Ok(()) => self
                .diag
                .info(COMPONENT, format!("Session stopped, closed {}", path.display())),
            Err(e) => self.diag.io_event(
                COMPONENT,
                &format!("Error closing {}", path.display()),
                Some(&e),
            ),
        }
        Ok(())
    }
}

impl Drop for PersistenceWriter {
    fn drop(&mut self) {
        let _ = self.stop_session();
    }
}
