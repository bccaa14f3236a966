//! The background polling loop.
//!
//! Each cycle polls the enabled channels, updates connectivity, publishes a
//! [`ReadingBatch`] and appends it to the active session. A cycle never ends
//! the loop: per-channel failures become NaN readings, a lost card degrades the
//! source to synthetic data, and any other error or panic is logged as
//! Critical at the cycle boundary. The loop ends only on the stop signal.

use super::{AcquisitionEvent, WorkerCommand};
use crate::channel::{ChannelId, ChannelTable, ConnectivityState};
use crate::connectivity::ChannelStateTracker;
use crate::data::PersistenceWriter;
use crate::diagnostics::DiagnosticSink;
use crate::hardware::{DataSource, DeviceError};
use crate::measurement_types::{Reading, ReadingBatch};
use chrono::Local;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::Instant;

const COMPONENT: &str = "acquisition";

/// State owned by one acquisition run.
pub struct AcquisitionWorker {
    source: DataSource,
    channels: Arc<RwLock<ChannelTable>>,
    tracker: ChannelStateTracker,
    writer: Arc<Mutex<PersistenceWriter>>,
    events: broadcast::Sender<AcquisitionEvent>,
    diag: Arc<DiagnosticSink>,
    interval: Duration,
    synthetic_seed: Option<u64>,
    cycle: u64,
}

impl AcquisitionWorker {
    /// Build a worker. Connectivity starts `Unknown` for every channel.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: DataSource,
        channels: Arc<RwLock<ChannelTable>>,
        tracker: ChannelStateTracker,
        writer: Arc<Mutex<PersistenceWriter>>,
        events: broadcast::Sender<AcquisitionEvent>,
        diag: Arc<DiagnosticSink>,
        interval: Duration,
        synthetic_seed: Option<u64>,
    ) -> Self {
        Self {
            source,
            channels,
            tracker,
            writer,
            events,
            diag,
            interval,
            synthetic_seed,
            cycle: 0,
        }
    }

    fn table(&self) -> RwLockReadGuard<'_, ChannelTable> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, ChannelTable> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: AcquisitionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Run until `stop` fires (or its sender is dropped), then close any
    /// active session and hand the data source back.
    ///
    /// The first cycle runs immediately. `stop` is checked before every cycle
    /// and wins over an elapsed interval, so a stop request never starts
    /// another cycle.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorkerCommand>,
        mut stop: oneshot::Receiver<()>,
    ) -> DataSource {
        {
            let mut table = self.table_mut();
            for id in ChannelId::all() {
                table.set_state(id, ConnectivityState::Unknown);
            }
        }
        self.diag.info(
            COMPONENT,
            format!(
                "Acquisition started: {} every {}s",
                self.source.describe(),
                self.interval.as_secs()
            ),
        );

        'acquire: loop {
            if !matches!(stop.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                break;
            }
            let cycle_start = Instant::now();
            self.run_cycle_guarded().await;

            let sleep = tokio::time::sleep_until(cycle_start + self.interval);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop => break 'acquire,
                    _ = &mut sleep => break,
                    command = commands.recv() => match command {
                        Some(command) => {
                            let interval_changed = matches!(command, WorkerCommand::SetPollInterval(_));
                            self.apply(command).await;
                            if interval_changed {
                                sleep.as_mut().reset(Instant::now() + self.interval);
                            }
                        }
                        None => break 'acquire,
                    },
                }
            }
        }

        self.shutdown().await;
        self.source
    }

    async fn shutdown(&mut self) {
        let mut writer = self.writer.lock().await;
        if writer.is_active() {
            let _ = writer.stop_session();
            self.publish(AcquisitionEvent::SessionStateChanged { active: false });
        }
        drop(writer);
        self.diag.info(
            COMPONENT,
            format!("Acquisition stopped after {} cycles", self.cycle),
        );
    }

    async fn apply(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::ChannelEnabled(channel, _) => {
                self.tracker.reset(channel);
            }
            WorkerCommand::SensorTypeChanged(channel, sensor_type) => {
                self.tracker.reset(channel);
                if let Err(e) = self.source.set_sensor_type(channel, sensor_type).await {
                    self.diag.error_with(
                        COMPONENT,
                        format!("Failed to set {channel} to type {sensor_type}"),
                        &e,
                    );
                    if let DeviceError::Lost(reason) = e {
                        self.degrade(reason);
                    }
                }
            }
            WorkerCommand::SetPollInterval(interval) => {
                self.interval = interval;
                self.diag.info(
                    COMPONENT,
                    format!("Poll interval set to {}s", interval.as_secs()),
                );
            }
        }
    }

    fn degrade(&mut self, reason: String) {
        self.diag.warning_with(
            COMPONENT,
            "Hardware lost, using synthetic data from now on",
            &reason,
        );
        self.source.degrade(self.synthetic_seed);
        self.publish(AcquisitionEvent::SourceFallback { reason });
    }

    async fn run_cycle_guarded(&mut self) {
        match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.diag.critical_with(
                COMPONENT,
                format!("Unexpected error in cycle {}", self.cycle),
                format!("{e:#}"),
            ),
            Err(panic) => self.diag.critical_with(
                COMPONENT,
                format!("Cycle {} panicked", self.cycle),
                panic_message(panic.as_ref()),
            ),
        }
    }

    /// One poll cycle.
    pub async fn run_cycle(&mut self) -> anyhow::Result<()> {
        self.cycle += 1;
        let enabled = self.table().enabled();
        let timestamp = Local::now();

        let mut outcome = self.source.poll(&enabled).await;
        if let Some(reason) = outcome.device_lost.take() {
            self.degrade(reason);
            outcome = self.source.poll(&enabled).await;
        }
        let source = self.source.kind();

        let mut readings = Vec::with_capacity(outcome.samples.len());
        for (channel, sample) in outcome.samples {
            if let Some(transition) = self.tracker.update(channel, sample.signal_mv) {
                self.table_mut().set_state(channel, transition.to);
                let details = sample
                    .signal_mv
                    .map(|mv| format!("{mv:.2} mV"))
                    .unwrap_or_default();
                self.diag
                    .hardware_event(channel, &transition.to.to_string(), &details);
                self.publish(AcquisitionEvent::ConnectivityChanged {
                    channel,
                    state: transition.to,
                });
            }

            let value = match sample.temperature {
                Ok(celsius) => celsius,
                Err(e) => {
                    let reason = e.to_string();
                    self.diag.reading_failed(channel, &reason);
                    self.publish(AcquisitionEvent::ReadFailed { channel, reason });
                    f64::NAN
                }
            };
            readings.push(Reading {
                timestamp,
                channel,
                value,
                source,
            });
        }

        let batch = ReadingBatch {
            cycle: self.cycle,
            timestamp,
            readings,
        };
        self.diag.debug(
            COMPONENT,
            format!(
                "Cycle {}: {} readings from {}, {} failed",
                batch.cycle,
                batch.readings.len(),
                source,
                batch.failed_count()
            ),
        );
        self.publish(AcquisitionEvent::NewReadings(batch.clone()));

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.append(&batch) {
            // Transient write failures are already logged; the next cycle retries.
            if !e.is_transient() {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("bad sample");
        assert_eq!(panic_message(payload.as_ref()), "bad sample");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
