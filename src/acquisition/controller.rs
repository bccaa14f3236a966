//! Command surface of the acquisition core.
//!
//! [`AcquisitionController`] owns the channel table, the shared
//! [`PersistenceWriter`] and the data source between runs. Acquisition and
//! sessions are independent: a session can be open while acquisition is
//! stopped (no rows are written), and acquisition can run without a session.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use thermo_daq::acquisition::AcquisitionController;
//! use thermo_daq::config::AppConfig;
//! use thermo_daq::diagnostics::DiagnosticSink;
//! use thermo_daq::hardware::NoHardware;
//!
//! # async fn demo() -> thermo_daq::error::AppResult<()> {
//! let config = AppConfig::load()?;
//! let diag = DiagnosticSink::init(&config.diagnostics);
//! let mut controller = AcquisitionController::new(&config, Box::new(NoHardware), diag);
//! let mut events = controller.subscribe();
//! controller.start_acquisition().await?;
//! controller.start_session().await?;
//! # let _ = events.recv().await;
//! # Ok(())
//! # }
//! ```

use super::worker::AcquisitionWorker;
use super::{AcquisitionEvent, WorkerCommand, EVENT_CAPACITY};
use crate::channel::{ChannelId, ChannelTable, SensorType};
use crate::config::{validate_poll_interval, AcquisitionConfig, AppConfig};
use crate::connectivity::ChannelStateTracker;
use crate::data::PersistenceWriter;
use crate::diagnostics::DiagnosticSink;
use crate::error::{AppResult, DaqError};
use crate::hardware::{select_source, DataSource, DeviceConnector, SyntheticSource};
use crate::measurement_types::SourceKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

const COMPONENT: &str = "controller";

struct RunningWorker {
    commands: mpsc::Sender<WorkerCommand>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<DataSource>,
}

/// Starts, stops and reconfigures acquisition.
pub struct AcquisitionController {
    config: AcquisitionConfig,
    data_dir: PathBuf,
    connector: Box<dyn DeviceConnector>,
    source: Option<DataSource>,
    source_kind: Option<SourceKind>,
    channels: Arc<RwLock<ChannelTable>>,
    writer: Arc<Mutex<PersistenceWriter>>,
    events: broadcast::Sender<AcquisitionEvent>,
    diag: Arc<DiagnosticSink>,
    poll_interval: Duration,
    running: Option<RunningWorker>,
}

impl AcquisitionController {
    /// Controller for the given configuration. Nothing is opened until
    /// [`start_acquisition`](Self::start_acquisition).
    pub fn new(
        config: &AppConfig,
        connector: Box<dyn DeviceConnector>,
        diag: Arc<DiagnosticSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config: config.acquisition.clone(),
            data_dir: config.storage.data_dir.clone(),
            connector,
            source: None,
            source_kind: None,
            channels: Arc::new(RwLock::new(config.channel_table())),
            writer: Arc::new(Mutex::new(PersistenceWriter::new(diag.clone()))),
            events,
            diag,
            poll_interval: config.acquisition.poll_interval(),
            running: None,
        }
    }

    /// Receive events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the channel configuration and connectivity.
    pub fn channels(&self) -> ChannelTable {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether the worker is running.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Kind of the selected source, once selection has happened.
    ///
    /// Reflects the kind at the last start or stop; a degradation during a run
    /// is reported through [`AcquisitionEvent::SourceFallback`].
    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source_kind
    }

    /// Current poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Directory receiving session files.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Whether a session is active.
    pub async fn is_session_active(&self) -> bool {
        self.writer.lock().await.is_active()
    }

    /// File the active session writes to.
    pub async fn session_path(&self) -> Option<PathBuf> {
        self.writer.lock().await.current_path()
    }

    fn publish(&self, event: AcquisitionEvent) {
        let _ = self.events.send(event);
    }

    async fn take_source(&mut self) -> DataSource {
        if let Some(source) = self.source.take() {
            return source;
        }
        let table = self.channels();
        let selection =
            select_source(self.connector.as_ref(), &table, &self.config, &self.diag).await;
        self.publish(AcquisitionEvent::SourceSelected(selection.source.kind()));
        if let Some(reason) = selection.fallback_reason {
            self.publish(AcquisitionEvent::SourceFallback { reason });
        }
        selection.source
    }

    /// Start polling. The source is selected on the first start only.
    pub async fn start_acquisition(&mut self) -> AppResult<()> {
        if self.running.is_some() {
            return Err(DaqError::AcquisitionRunning);
        }

        let source = self.take_source().await;
        self.source_kind = Some(source.kind());

        let (command_tx, command_rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = AcquisitionWorker::new(
            source,
            self.channels.clone(),
            ChannelStateTracker::from_config(&self.config),
            self.writer.clone(),
            self.events.clone(),
            self.diag.clone(),
            self.poll_interval,
            self.config.synthetic_seed,
        );
        let handle = tokio::spawn(worker.run(command_rx, stop_rx));

        self.running = Some(RunningWorker {
            commands: command_tx,
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stop polling and wait for the worker to finish its current cycle.
    ///
    /// Any active session is closed.
    pub async fn stop_acquisition(&mut self) -> AppResult<()> {
        let running = self.running.take().ok_or(DaqError::AcquisitionNotRunning)?;
        let _ = running.stop.send(());

        let source = match running.handle.await {
            Ok(source) => source,
            Err(e) => {
                self.diag
                    .critical_with(COMPONENT, "Acquisition worker failed", &e);
                // The hardware handle went down with the task.
                DataSource::Synthetic(SyntheticSource::new(self.config.synthetic_seed))
            }
        };
        self.source_kind = Some(source.kind());
        self.source = Some(source);
        Ok(())
    }

    /// Open a session in the configured data directory.
    ///
    /// A no-op (with a Warning) when a session is already active.
    pub async fn start_session(&self) -> AppResult<()> {
        let mut writer = self.writer.lock().await;
        let was_active = writer.is_active();
        writer.start_session(&self.data_dir)?;
        if !was_active {
            self.publish(AcquisitionEvent::SessionStateChanged { active: true });
        }
        Ok(())
    }

    /// Close the active session, if any.
    pub async fn stop_session(&self) -> AppResult<()> {
        let mut writer = self.writer.lock().await;
        if !writer.is_active() {
            return Ok(());
        }
        writer.stop_session()?;
        self.publish(AcquisitionEvent::SessionStateChanged { active: false });
        Ok(())
    }

    async fn notify_worker(&self, command: WorkerCommand) -> AppResult<()> {
        if let Some(running) = &self.running {
            running
                .commands
                .send(command)
                .await
                .map_err(|_| DaqError::TaskFailed("acquisition worker has exited".to_string()))?;
        }
        Ok(())
    }

    /// Enable or disable a channel. Its connectivity returns to unknown.
    pub async fn set_channel_enabled(&self, channel: ChannelId, enabled: bool) -> AppResult<()> {
        let changed = self
            .channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_enabled(channel, enabled);
        if !changed {
            return Ok(());
        }
        let verb = if enabled { "enabled" } else { "disabled" };
        self.diag.info(COMPONENT, format!("{channel} {verb}"));
        self.notify_worker(WorkerCommand::ChannelEnabled(channel, enabled))
            .await
    }

    /// Change a channel's thermocouple type and push it to the card.
    pub async fn set_channel_type(
        &self,
        channel: ChannelId,
        sensor_type: SensorType,
    ) -> AppResult<()> {
        let changed = self
            .channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_sensor_type(channel, sensor_type);
        if !changed {
            return Ok(());
        }
        self.diag
            .info(COMPONENT, format!("{channel} set to type {sensor_type}"));

        if self.running.is_some() {
            return self
                .notify_worker(WorkerCommand::SensorTypeChanged(channel, sensor_type))
                .await;
        }
        if let Some(source) = &self.source {
            source
                .set_sensor_type(channel, sensor_type)
                .await
                .map_err(|e| {
                    self.diag.error_with(
                        COMPONENT,
                        format!("Failed to set {channel} to type {sensor_type}"),
                        &e,
                    );
                    DaqError::Instrument(e.to_string())
                })?;
        }
        Ok(())
    }

    /// Change the poll interval (1..=3600 s). The interval must be longer
    /// than the per-read timeout.
    pub async fn set_poll_interval(&mut self, secs: u64) -> AppResult<()> {
        let interval = validate_poll_interval(secs)?;
        if interval <= self.config.read_timeout() {
            return Err(DaqError::Configuration(format!(
                "poll interval {secs}s is not longer than the {} ms read timeout",
                self.config.read_timeout_ms
            )));
        }
        self.poll_interval = interval;
        self.notify_worker(WorkerCommand::SetPollInterval(interval))
            .await
    }

    /// Stop acquisition if running and close any session.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        if self.running.is_some() {
            self.stop_acquisition().await?;
        }
        self.stop_session().await?;
        self.diag.flush();
        Ok(())
    }
}
