//! Sensor client: drives the Polar Verity Sense BLE state machine and turns
//! PMD/HR notifications into [`Sample`] values, grounded on
//! `app/acquisition/polar_client.py`.
//!
//! `btleplug` is the cross-platform async BLE stack standing in for the
//! reference client's `bleak` library (§ see DESIGN.md for the substitution
//! rationale). Connection management runs as a background `tokio` task;
//! decoded samples and state transitions are delivered through single-owner
//! callback slots, matching the observer-wiring convention used across the
//! pipeline (`SlidingWindow::on_window`, `PipelineOrchestrator::on_inference`).

use std::collections::VecDeque;
use std::sync::Arc;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Manager, Peripheral};
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;

use crate::config::BleConfig;
use crate::error::CoreError;
use crate::sensor::protocol;
use crate::types::{ConnectionState, DeviceInfo, Sample};

const SIGNAL_QUALITY_WINDOW: usize = 50;

type SampleCallback = Box<dyn FnMut(Sample) + Send>;
type StateCallback = Box<dyn FnMut(ConnectionState) + Send>;
type DisconnectCallback = Box<dyn FnMut() + Send>;

/// Rolling mean of the last `SIGNAL_QUALITY_WINDOW` skin-contact bits.
struct SignalQualityTracker {
    window: VecDeque<bool>,
}

impl SignalQualityTracker {
    fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(SIGNAL_QUALITY_WINDOW),
        }
    }

    fn push(&mut self, skin_contact: bool) -> f64 {
        if self.window.len() == SIGNAL_QUALITY_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(skin_contact);
        let on = self.window.iter().filter(|&&v| v).count();
        on as f64 / self.window.len() as f64
    }
}

pub struct SensorClient {
    config: BleConfig,
    device: Arc<Mutex<DeviceInfo>>,
    quality: Mutex<SignalQualityTracker>,
    on_sample: Mutex<Option<SampleCallback>>,
    on_state_change: Mutex<Option<StateCallback>>,
    on_unexpected_disconnect: Mutex<Option<DisconnectCallback>>,
}

impl SensorClient {
    pub fn new(config: BleConfig) -> Self {
        Self {
            config,
            device: Arc::new(Mutex::new(DeviceInfo::new())),
            quality: Mutex::new(SignalQualityTracker::new()),
            on_sample: Mutex::new(None),
            on_state_change: Mutex::new(None),
            on_unexpected_disconnect: Mutex::new(None),
        }
    }

    pub async fn on_sample(&self, callback: impl FnMut(Sample) + Send + 'static) {
        *self.on_sample.lock().await = Some(Box::new(callback));
    }

    pub async fn on_state_change(&self, callback: impl FnMut(ConnectionState) + Send + 'static) {
        *self.on_state_change.lock().await = Some(Box::new(callback));
    }

    pub async fn on_unexpected_disconnect(&self, callback: impl FnMut() + Send + 'static) {
        *self.on_unexpected_disconnect.lock().await = Some(Box::new(callback));
    }

    pub async fn device_info(&self) -> DeviceInfo {
        self.device.lock().await.clone()
    }

    async fn set_state(&self, state: ConnectionState) {
        self.device.lock().await.connection_state = state;
        if let Some(cb) = self.on_state_change.lock().await.as_mut() {
            cb(state);
        }
    }

    /// Scan for a device whose advertised name contains `config.device_name`
    /// case-insensitively, connect, subscribe to the HR and PMD characteristics, and start PPI
    /// streaming. Runs to completion (`disconnect()` or an unrecoverable
    /// protocol error); intended to be driven from a dedicated task.
    pub async fn run(&self) -> Result<(), CoreError> {
        self.set_state(ConnectionState::Scanning).await;
        let peripheral = self.scan().await?;

        self.set_state(ConnectionState::Connecting).await;
        self.connect_with_retry(&peripheral).await?;

        self.set_state(ConnectionState::Connected).await;
        self.read_device_identity(&peripheral).await?;

        self.set_state(ConnectionState::Streaming).await;
        let result = self.stream(&peripheral).await;

        match &result {
            Ok(()) => self.set_state(ConnectionState::Disconnected).await,
            Err(_) => self.set_state(ConnectionState::Error).await,
        }
        result
    }

    async fn scan(&self) -> Result<Peripheral, CoreError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::ProtocolError("no BLE adapter available".into()))?;

        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(self.config.scan_timeout).await;

        for peripheral in adapter.peripherals().await? {
            if let Ok(Some(props)) = peripheral.properties().await {
                if let Some(name) = props.local_name {
                    if name.to_lowercase().contains(&self.config.device_name.to_lowercase()) {
                        adapter.stop_scan().await.ok();
                        return Ok(peripheral);
                    }
                }
            }
        }

        adapter.stop_scan().await.ok();
        Err(CoreError::DeviceNotFound(self.config.device_name.clone()))
    }

    async fn connect_with_retry(&self, peripheral: &Peripheral) -> Result<(), CoreError> {
        let mut last_err = None;
        for attempt in 1..=self.config.reconnect_attempts {
            match peripheral.connect().await {
                Ok(()) => {
                    peripheral.discover_services().await?;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "connect attempt failed");
                    last_err = Some(e);
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
            }
        }
        Err(CoreError::ConnectFailed {
            attempts: self.config.reconnect_attempts,
            source: last_err.unwrap(),
        })
    }

    async fn read_device_identity(&self, peripheral: &Peripheral) -> Result<(), CoreError> {
        let props = peripheral
            .properties()
            .await?
            .ok_or_else(|| CoreError::ProtocolError("missing peripheral properties".into()))?;

        let mut device = self.device.lock().await;
        device.name = props.local_name.unwrap_or_default();
        device.address = peripheral.address().to_string();
        drop(device);

        if let Some(battery_char) = peripheral
            .characteristics()
            .iter()
            .find(|c| c.uuid == self.config.battery_uuid)
        {
            if let Ok(value) = peripheral.read(battery_char).await {
                if let Some(&level) = value.first() {
                    self.device.lock().await.battery_level = level as i32;
                }
            }
        }

        Ok(())
    }

    async fn stream(&self, peripheral: &Peripheral) -> Result<(), CoreError> {
        let characteristics = peripheral.characteristics();
        let hr_char = characteristics
            .iter()
            .find(|c| c.uuid == self.config.hr_service_uuid)
            .cloned();
        let pmd_control = characteristics
            .iter()
            .find(|c| c.uuid == self.config.pmd_control_uuid)
            .cloned()
            .ok_or_else(|| CoreError::ProtocolError("PMD control characteristic missing".into()))?;
        let pmd_data = characteristics
            .iter()
            .find(|c| c.uuid == self.config.pmd_data_uuid)
            .cloned()
            .ok_or_else(|| CoreError::ProtocolError("PMD data characteristic missing".into()))?;

        if let Some(hr_char) = &hr_char {
            peripheral.subscribe(hr_char).await?;
        }
        peripheral.subscribe(&pmd_data).await?;
        peripheral.subscribe(&pmd_control).await?;

        // Subscribe before writing so the control-point indication for this
        // command can't race ahead of the stream we read it back from.
        let mut notifications = peripheral.notifications().await?;

        peripheral
            .write(&pmd_control, &protocol::encode_start_ppi(), WriteType::WithResponse)
            .await?;

        let mut was_streaming = false;
        let run_result = match self
            .await_control_response(&mut notifications, &pmd_control.uuid)
            .await
        {
            Ok(()) => {
                was_streaming = true;
                loop {
                    match notifications.next().await {
                        Some(data) => self.handle_notification(&data.uuid, &data.value).await,
                        None => break Err(CoreError::UnexpectedDisconnect),
                    }
                }
            }
            Err(e) => Err(e),
        };

        self.shutdown(peripheral, &pmd_control).await;

        // Only an unsolicited drop of an already-streaming session fires the
        // dedicated callback (§4.A); a rejected START command surfaces as a
        // plain protocol error to the caller instead.
        if run_result.is_err() && was_streaming {
            if let Some(cb) = self.on_unexpected_disconnect.lock().await.as_mut() {
                cb();
            }
        }
        run_result
    }

    /// Wait for the PMD control-point indication echoing the command just
    /// written, and surface a non-OK status as a protocol error (§4.A,
    /// §8: "Command response with status != 0 on START PPI -> logged at
    /// error level; streaming not claimed successful"). Any non-control
    /// notification observed while waiting (a data-channel sample arriving
    /// before the indication) is handled inline rather than dropped.
    async fn await_control_response(
        &self,
        notifications: &mut (impl Stream<Item = btleplug::api::ValueNotification> + Unpin),
        control_uuid: &uuid::Uuid,
    ) -> Result<(), CoreError> {
        loop {
            match notifications.next().await {
                Some(data) if data.uuid == *control_uuid => {
                    return protocol::decode_control_response(&data.value).map_err(|e| {
                        tracing::error!(error = %e, "PMD control command rejected");
                        CoreError::ProtocolError(e)
                    });
                }
                Some(data) => self.handle_notification(&data.uuid, &data.value).await,
                None => return Err(CoreError::UnexpectedDisconnect),
            }
        }
    }

    async fn handle_notification(&self, uuid: &uuid::Uuid, value: &[u8]) {
        let now = monotonic_now();
        if *uuid == self.config.hr_service_uuid {
            if let Some(hr) = protocol::decode_standard_hr_frame(value) {
                if let Some(cb) = self.on_sample.lock().await.as_mut() {
                    cb(Sample::hr_only(now, hr));
                }
            }
            return;
        }

        if *uuid == self.config.pmd_data_uuid {
            let Some(frame) = protocol::decode_ppi_frame(value) else {
                return;
            };
            let mut ppi_ms = Vec::with_capacity(frame.samples.len());
            let mut errors_ms = Vec::with_capacity(frame.samples.len());
            let mut rr_quality = Vec::with_capacity(frame.samples.len());
            let mut quality = self.quality.lock().await;
            for sample in &frame.samples {
                ppi_ms.push(sample.ppi_ms);
                errors_ms.push(sample.error_estimate_ms);
                rr_quality.push(sample.rr_valid);
                let ratio = quality.push(sample.skin_contact);
                self.device.lock().await.signal_quality = ratio;
            }
            drop(quality);

            if let Some(cb) = self.on_sample.lock().await.as_mut() {
                cb(Sample::ppi_batch(now, ppi_ms, errors_ms, rr_quality));
            }
        }
    }

    /// Best-effort teardown: stop PPI streaming, then disconnect. Neither
    /// step's failure is treated as fatal — the client is already exiting.
    async fn shutdown(&self, peripheral: &Peripheral, pmd_control: &btleplug::api::Characteristic) {
        let stop = peripheral
            .write(pmd_control, &protocol::encode_stop_ppi(), WriteType::WithResponse)
            .await;
        if let Err(e) = stop {
            tracing::warn!(error = %e, "failed to stop PPI stream cleanly");
        }
        if let Err(e) = peripheral.disconnect().await {
            tracing::warn!(error = %e, "failed to disconnect cleanly");
        }
    }
}

fn monotonic_now() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
