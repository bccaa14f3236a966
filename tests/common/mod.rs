//! Shared helpers for integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Local};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use thermo_daq::acquisition::AcquisitionEvent;
use thermo_daq::channel::ChannelId;
use thermo_daq::config::{AppConfig, DiagnosticsConfig};
use thermo_daq::diagnostics::{ConsoleTarget, DiagnosticSink, LogBuffer};
use thermo_daq::measurement_types::{Reading, ReadingBatch, SourceKind};
use tokio::sync::broadcast;

pub fn ch(n: u8) -> ChannelId {
    ChannelId::new(n).unwrap()
}

/// Scratch directories, a config pointing into them and an isolated sink.
pub struct Harness {
    pub dir: TempDir,
    pub config: AppConfig,
    pub diag: Arc<DiagnosticSink>,
    pub console: LogBuffer,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.data_dir = dir.path().join("data");
    config.diagnostics = DiagnosticsConfig {
        log_dir: dir.path().join("logs"),
        console: false,
        ..Default::default()
    };
    let console = LogBuffer::new();
    let diag = Arc::new(DiagnosticSink::with_console(
        &config.diagnostics,
        ConsoleTarget::Buffer(console.clone()),
    ));
    Harness {
        dir,
        config,
        diag,
        console,
    }
}

impl Harness {
    /// Full diagnostic log file contents.
    pub fn log(&self) -> String {
        fs::read_to_string(self.diag.log_path()).unwrap_or_default()
    }

    /// Log lines containing `needle`.
    pub fn log_lines(&self, needle: &str) -> Vec<String> {
        self.log()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config.storage.data_dir.clone()
    }

    /// Data file for today.
    pub fn today_csv(&self) -> PathBuf {
        self.data_dir().join(thermo_daq::data::storage::file_name_for(
            Local::now().date_naive(),
        ))
    }
}

/// Wait for the next batch, returning it with every event published before it.
pub async fn next_batch(
    rx: &mut broadcast::Receiver<AcquisitionEvent>,
) -> (ReadingBatch, Vec<AcquisitionEvent>) {
    let mut others = Vec::new();
    loop {
        match rx.recv().await.unwrap() {
            AcquisitionEvent::NewReadings(batch) => return (batch, others),
            other => others.push(other),
        }
    }
}

/// Batch with the given values for CH1.. at `timestamp`.
pub fn batch_at(timestamp: DateTime<Local>, values: &[f64]) -> ReadingBatch {
    let readings = values
        .iter()
        .zip(ChannelId::all())
        .map(|(&value, channel)| Reading {
            timestamp,
            channel,
            value,
            source: SourceKind::Synthetic,
        })
        .collect();
    ReadingBatch {
        cycle: 1,
        timestamp,
        readings,
    }
}

/// Data rows of a CSV file (header excluded), split into fields.
pub fn csv_rows(path: &std::path::Path) -> Vec<Vec<String>> {
    let content = fs::read_to_string(path).unwrap();
    let mut lines = content.lines();
    assert_eq!(
        lines.next(),
        Some("Timestamp,CH1,CH2,CH3,CH4,CH5,CH6,CH7,CH8")
    );
    lines
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}
