//! Integration tests for the acquisition loop, driven with paused time.

mod common;

use async_trait::async_trait;
use common::{ch, csv_rows, harness, next_batch};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thermo_daq::acquisition::{AcquisitionController, AcquisitionEvent, AcquisitionWorker};
use thermo_daq::channel::{ChannelId, ChannelTable, ConnectivityState, SensorType};
use thermo_daq::connectivity::ChannelStateTracker;
use thermo_daq::data::PersistenceWriter;
use thermo_daq::error::DaqError;
use thermo_daq::hardware::{
    ChannelFault, DataSource, DeviceConnector, DeviceError, HardwareSource, MockConnector,
    MockThermocouple, NoHardware, ThermocoupleDevice,
};
use thermo_daq::measurement_types::SourceKind;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::Instant;

fn mock_controller(h: &common::Harness, card: &MockThermocouple) -> AcquisitionController {
    AcquisitionController::new(
        &h.config,
        Box::new(MockConnector::new(card.clone())),
        h.diag.clone(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_fallback_to_synthetic_warns_once() {
    let h = harness();
    let connector = MockConnector::failing("i2c bus 1 not found");
    let mut controller =
        AcquisitionController::new(&h.config, Box::new(connector.clone()), h.diag.clone());
    let mut rx = controller.subscribe();

    let started = Instant::now();
    controller.start_acquisition().await.unwrap();
    let (batch, events) = next_batch(&mut rx).await;
    assert!(started.elapsed() <= h.config.acquisition.poll_interval());

    assert!(events.contains(&AcquisitionEvent::SourceSelected(SourceKind::Synthetic)));
    assert!(events.contains(&AcquisitionEvent::SourceFallback {
        reason: "i2c bus 1 not found".to_string()
    }));
    assert_eq!(batch.readings.len(), 8);
    assert!(batch.readings.iter().all(|r| r.source == SourceKind::Synthetic));
    assert!(batch.readings.iter().all(|r| r.is_valid()));

    next_batch(&mut rx).await;
    controller.stop_acquisition().await.unwrap();
    controller.start_acquisition().await.unwrap();
    next_batch(&mut rx).await;
    controller.stop_acquisition().await.unwrap();

    assert_eq!(connector.attempts(), 1);
    assert_eq!(controller.source_kind(), Some(SourceKind::Synthetic));
    let warnings = h.log_lines(" - WARNING - ");
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("caused by: i2c bus 1 not found"));
}

#[tokio::test(start_paused = true)]
async fn test_batches_follow_poll_interval() {
    let h = harness();
    let mut controller = AcquisitionController::new(&h.config, Box::new(NoHardware), h.diag.clone());
    let mut rx = controller.subscribe();

    controller.start_acquisition().await.unwrap();
    let (first, _) = next_batch(&mut rx).await;
    let t0 = Instant::now();
    let (second, _) = next_batch(&mut rx).await;

    assert!(t0.elapsed() >= Duration::from_secs(5));
    assert!(t0.elapsed() < Duration::from_secs(6));
    assert_eq!((first.cycle, second.cycle), (1, 2));
    controller.stop_acquisition().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_single_channel_failure_is_isolated() {
    let h = harness();
    let card = MockThermocouple::new();
    card.set_fault(ch(3), ChannelFault::Fail("crc mismatch".into()));
    let mut controller = mock_controller(&h, &card);
    let mut rx = controller.subscribe();

    controller.start_session().await.unwrap();
    controller.start_acquisition().await.unwrap();
    let (batch, events) = next_batch(&mut rx).await;
    next_batch(&mut rx).await;
    controller.stop_acquisition().await.unwrap();

    assert!(batch.value(ch(3)).unwrap().is_nan());
    assert_eq!(batch.failed_count(), 1);
    for n in [1, 2, 4, 5, 6, 7, 8] {
        assert!(batch.value(ch(n)).unwrap().is_finite());
    }
    assert!(events.contains(&AcquisitionEvent::ReadFailed {
        channel: ch(3),
        reason: "crc mismatch".to_string()
    }));

    let rows = csv_rows(&h.today_csv());
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row[3], "");
        assert!(row.iter().enumerate().all(|(i, f)| i == 3 || !f.is_empty()));
    }
    assert_eq!(h.log_lines("[READING] Channel 3 failed: crc mismatch").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connectivity_events_are_edge_triggered() {
    let h = harness();
    let card = MockThermocouple::new();
    let mut controller = mock_controller(&h, &card);
    let mut rx = controller.subscribe();

    controller.start_acquisition().await.unwrap();
    let (_, events) = next_batch(&mut rx).await;
    let connected = events
        .iter()
        .filter(|e| matches!(e, AcquisitionEvent::ConnectivityChanged { state: ConnectivityState::Connected, .. }))
        .count();
    assert_eq!(connected, 8);

    card.set_plugged(ch(5), false);
    let (batch, events) = next_batch(&mut rx).await;
    assert_eq!(
        events,
        vec![AcquisitionEvent::ConnectivityChanged {
            channel: ch(5),
            state: ConnectivityState::Disconnected
        }]
    );
    // An unplugged channel still reports whatever the card returns.
    assert!(batch.value(ch(5)).is_some());
    assert_eq!(
        controller.channels().get(ch(5)).state,
        ConnectivityState::Disconnected
    );

    let (_, events) = next_batch(&mut rx).await;
    assert!(events.is_empty());

    card.set_plugged(ch(5), true);
    let (_, events) = next_batch(&mut rx).await;
    assert_eq!(
        events,
        vec![AcquisitionEvent::ConnectivityChanged {
            channel: ch(5),
            state: ConnectivityState::Connected
        }]
    );
    controller.stop_acquisition().await.unwrap();

    assert_eq!(h.log_lines("[HARDWARE] Channel 5: disconnected - 0.00 mV").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_prompt_and_closes_session() {
    let h = harness();
    let mut config = h.config.clone();
    config.acquisition.poll_interval_secs = 3600;
    let mut controller = AcquisitionController::new(&config, Box::new(NoHardware), h.diag.clone());
    let mut rx = controller.subscribe();

    controller.start_session().await.unwrap();
    controller.start_acquisition().await.unwrap();
    next_batch(&mut rx).await;

    let t0 = Instant::now();
    controller.stop_acquisition().await.unwrap();
    assert!(t0.elapsed() < Duration::from_secs(1));
    assert!(!controller.is_running());
    assert!(!controller.is_session_active().await);

    let mut saw_session_closed = false;
    while let Ok(event) = rx.try_recv() {
        if event == (AcquisitionEvent::SessionStateChanged { active: false }) {
            saw_session_closed = true;
        }
    }
    assert!(saw_session_closed);

    let content = std::fs::read_to_string(h.today_csv()).unwrap();
    assert!(content.ends_with('\n'));
    let rows = csv_rows(&h.today_csv());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_channel_times_out() {
    let h = harness();
    let card = MockThermocouple::new();
    card.set_fault(ch(2), ChannelFault::Hang);
    let mut controller = mock_controller(&h, &card);
    let mut rx = controller.subscribe();

    let t0 = Instant::now();
    controller.start_acquisition().await.unwrap();
    let (batch, events) = next_batch(&mut rx).await;
    controller.stop_acquisition().await.unwrap();

    // The start-up connectivity check and the first cycle each wait out one timeout.
    assert!(t0.elapsed() >= Duration::from_secs(1));
    assert!(t0.elapsed() < Duration::from_secs(2));
    assert!(batch.value(ch(2)).unwrap().is_nan());
    assert_eq!(batch.failed_count(), 1);
    assert!(events.contains(&AcquisitionEvent::ReadFailed {
        channel: ch(2),
        reason: "read timed out after 500 ms".to_string()
    }));
}

#[tokio::test(start_paused = true)]
async fn test_lost_device_degrades_to_synthetic() {
    let h = harness();
    let card = MockThermocouple::new();
    let mut controller = mock_controller(&h, &card);
    let mut rx = controller.subscribe();

    controller.start_acquisition().await.unwrap();
    let (first, events) = next_batch(&mut rx).await;
    assert!(events.contains(&AcquisitionEvent::SourceSelected(SourceKind::Hardware)));
    assert!(first.readings.iter().all(|r| r.source == SourceKind::Hardware));

    card.set_lost(true);
    let (second, events) = next_batch(&mut rx).await;
    assert!(events.contains(&AcquisitionEvent::SourceFallback {
        reason: "card not responding".to_string()
    }));
    assert!(second.readings.iter().all(|r| r.source == SourceKind::Synthetic));
    assert_eq!(second.failed_count(), 0);

    // Recovery of the card does not bring the hardware back.
    card.set_lost(false);
    let (third, _) = next_batch(&mut rx).await;
    assert!(third.readings.iter().all(|r| r.source == SourceKind::Synthetic));
    controller.stop_acquisition().await.unwrap();
    assert_eq!(controller.source_kind(), Some(SourceKind::Synthetic));

    assert_eq!(h.log_lines(" - WARNING - ").len(), 1);
    assert_eq!(h.log_lines("Hardware lost").len(), 1);
}

/// A card whose next read panics once armed.
#[derive(Clone)]
struct PanickingCard {
    inner: MockThermocouple,
    armed: Arc<AtomicBool>,
}

#[async_trait]
impl ThermocoupleDevice for PanickingCard {
    fn describe(&self) -> String {
        "panicking card".to_string()
    }

    async fn read_temperature(&self, channel: ChannelId) -> Result<f64, DeviceError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("driver bug");
        }
        self.inner.read_temperature(channel).await
    }

    async fn read_millivolts(&self, channel: ChannelId) -> Result<f64, DeviceError> {
        self.inner.read_millivolts(channel).await
    }

    async fn set_sensor_type(
        &self,
        channel: ChannelId,
        sensor_type: SensorType,
    ) -> Result<(), DeviceError> {
        self.inner.set_sensor_type(channel, sensor_type).await
    }
}

#[async_trait]
impl DeviceConnector for PanickingCard {
    async fn connect(&self) -> anyhow::Result<Box<dyn ThermocoupleDevice>> {
        Ok(Box::new(self.clone()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_panic_in_cycle_is_contained() {
    let h = harness();
    let card = PanickingCard {
        inner: MockThermocouple::new(),
        armed: Arc::new(AtomicBool::new(false)),
    };
    let mut controller = AcquisitionController::new(&h.config, Box::new(card.clone()), h.diag.clone());
    let mut rx = controller.subscribe();

    controller.start_acquisition().await.unwrap();
    let (first, _) = next_batch(&mut rx).await;
    card.armed.store(true, Ordering::SeqCst);
    let (next, _) = next_batch(&mut rx).await;
    controller.stop_acquisition().await.unwrap();

    assert_eq!(first.cycle, 1);
    assert_eq!(next.cycle, 3);
    assert!(next.readings.iter().all(|r| r.is_valid()));
    let critical = h.log_lines(" - CRITICAL - ");
    assert_eq!(critical.len(), 1);
    assert!(critical[0].contains("Cycle 2 panicked - caused by: driver bug"));
}

#[tokio::test(start_paused = true)]
async fn test_reconfiguration_while_running() {
    let h = harness();
    let card = MockThermocouple::new();
    let mut controller = mock_controller(&h, &card);
    let mut rx = controller.subscribe();

    controller.start_acquisition().await.unwrap();
    next_batch(&mut rx).await;

    controller.set_channel_enabled(ch(7), false).await.unwrap();
    controller.set_channel_type(ch(1), SensorType::T).await.unwrap();
    controller.set_poll_interval(10).await.unwrap();
    assert!(matches!(
        controller.set_poll_interval(0).await,
        Err(DaqError::InvalidPollInterval(0))
    ));
    assert!(matches!(
        controller.set_poll_interval(3601).await,
        Err(DaqError::InvalidPollInterval(3601))
    ));

    let t0 = Instant::now();
    let (batch, _) = next_batch(&mut rx).await;
    let (_, _) = next_batch(&mut rx).await;
    assert!(t0.elapsed() >= Duration::from_secs(20));
    assert!(t0.elapsed() < Duration::from_secs(21));

    assert_eq!(batch.readings.len(), 7);
    assert_eq!(batch.value(ch(7)), None);
    assert_eq!(card.sensor_type(ch(1)), SensorType::T);
    let table = controller.channels();
    assert!(!table.get(ch(7)).enabled);
    assert_eq!(table.get(ch(1)).sensor_type, SensorType::T);
    controller.stop_acquisition().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sessions_and_acquisition_are_independent() {
    let h = harness();
    let mut controller = AcquisitionController::new(&h.config, Box::new(NoHardware), h.diag.clone());
    let mut rx = controller.subscribe();

    controller.start_session().await.unwrap();
    controller.start_session().await.unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        AcquisitionEvent::SessionStateChanged { active: true }
    );
    assert!(rx.try_recv().is_err());

    assert!(matches!(
        controller.stop_acquisition().await,
        Err(DaqError::AcquisitionNotRunning)
    ));
    controller.start_acquisition().await.unwrap();
    assert!(matches!(
        controller.start_acquisition().await,
        Err(DaqError::AcquisitionRunning)
    ));
    next_batch(&mut rx).await;

    controller.stop_session().await.unwrap();
    assert!(!controller.is_session_active().await);
    next_batch(&mut rx).await;
    controller.shutdown().await.unwrap();

    assert_eq!(csv_rows(&h.today_csv()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_overlong_cycle_starts_no_new_cycle() {
    let h = harness();
    // A cycle that outlasts the interval leaves the next tick already due
    // when the stop request is seen; repeat to rule out a lucky ordering.
    for _ in 0..20 {
        let card = MockThermocouple::new();
        card.set_fault(ch(2), ChannelFault::Hang);
        let source = DataSource::Hardware(HardwareSource::new(
            Box::new(card),
            Duration::from_millis(1500),
        ));
        let (events, mut rx) = broadcast::channel(64);
        let worker = AcquisitionWorker::new(
            source,
            Arc::new(RwLock::new(ChannelTable::default())),
            ChannelStateTracker::default(),
            Arc::new(Mutex::new(PersistenceWriter::new(h.diag.clone()))),
            events,
            h.diag.clone(),
            Duration::from_secs(1),
            Some(1),
        );
        let (_commands, command_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(worker.run(command_rx, stop_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stop_requested = Instant::now();
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(stop_requested.elapsed() < Duration::from_secs(2));
        let mut batches = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AcquisitionEvent::NewReadings(_)) {
                batches += 1;
            }
        }
        assert_eq!(batches, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_is_logged_and_loop_continues() {
    let h = harness();
    let mut controller = AcquisitionController::new(&h.config, Box::new(NoHardware), h.diag.clone());
    let mut rx = controller.subscribe();

    controller.start_session().await.unwrap();
    controller.start_acquisition().await.unwrap();
    let (first, _) = next_batch(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // A directory in place of the data file makes the next row fail.
    std::fs::remove_file(h.today_csv()).unwrap();
    std::fs::create_dir(h.today_csv()).unwrap();
    let (second, _) = next_batch(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    std::fs::remove_dir(h.today_csv()).unwrap();

    let (third, _) = next_batch(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(controller.is_session_active().await);
    controller.stop_acquisition().await.unwrap();

    assert_eq!((first.cycle, second.cycle, third.cycle), (1, 2, 3));
    let errors = h.log_lines(" - ERROR - ");
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].contains("[IO] Failed to write row"));
    assert!(h.log_lines(" - CRITICAL - ").is_empty());

    let rows = csv_rows(&h.today_csv());
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0][0],
        third.timestamp.format("%d-%m-%Y %H:%M:%S").to_string()
    );
}

#[tokio::test]
async fn test_poll_interval_must_exceed_read_timeout() {
    let h = harness();
    let mut config = h.config.clone();
    config.acquisition.poll_interval_secs = 10;
    config.acquisition.read_timeout_ms = 2000;
    let mut controller = AcquisitionController::new(&config, Box::new(NoHardware), h.diag.clone());

    assert!(matches!(
        controller.set_poll_interval(2).await,
        Err(DaqError::Configuration(_))
    ));
    assert_eq!(controller.poll_interval(), Duration::from_secs(10));
    controller.set_poll_interval(3).await.unwrap();
    assert_eq!(controller.poll_interval(), Duration::from_secs(3));
}
