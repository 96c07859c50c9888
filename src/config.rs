//! Layered configuration, mirroring `app/config/settings.py`'s
//! dataclass-with-defaults shape: typed structs with documented numeric
//! defaults, overridable from the environment.

use std::time::Duration;

/// PPI cleaning and window-emission thresholds (§6, §4.B, §4.C).
#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub window_size_sec: f64,
    pub window_step_sec: f64,
    pub min_ppi_ms: u16,
    pub max_ppi_ms: u16,
    pub max_ppi_diff_ratio: f64,
    pub min_quality_ratio: f64,
    pub interpolation_method: InterpolationMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMethod {
    Linear,
    Cubic,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            window_size_sec: 15.0,
            window_step_sec: 1.0,
            min_ppi_ms: 300,
            max_ppi_ms: 2000,
            max_ppi_diff_ratio: 0.20,
            min_quality_ratio: 0.80,
            interpolation_method: InterpolationMethod::Cubic,
        }
    }
}

/// Inference engine tuning (§6, §4.E).
#[derive(Debug, Clone, PartialEq)]
pub struct MlConfig {
    pub model_path: Option<String>,
    pub scaler_path: Option<String>,
    pub prediction_interval_sec: f64,
    pub fatigue_horizon_min: f64,
    pub score_smoothing_alpha: f64,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            scaler_path: None,
            prediction_interval_sec: 1.0,
            fatigue_horizon_min: 10.0,
            score_smoothing_alpha: 0.3,
        }
    }
}

/// Sensor discovery and transport parameters (§6, §4.A).
#[derive(Debug, Clone, PartialEq)]
pub struct BleConfig {
    pub device_name: String,
    pub scan_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub hr_service_uuid: uuid::Uuid,
    pub battery_uuid: uuid::Uuid,
    pub pmd_control_uuid: uuid::Uuid,
    pub pmd_data_uuid: uuid::Uuid,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: "Polar".to_string(),
            scan_timeout: Duration::from_secs(10),
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(500),
            hr_service_uuid: uuid::uuid!("00002a37-0000-1000-8000-00805f9b34fb"),
            battery_uuid: uuid::uuid!("00002a19-0000-1000-8000-00805f9b34fb"),
            pmd_control_uuid: uuid::uuid!("fb005c81-02e7-f387-1cad-8acd2d8df0c8"),
            pmd_data_uuid: uuid::uuid!("fb005c82-02e7-f387-1cad-8acd2d8df0c8"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub signal: SignalConfig,
    pub ml: MlConfig,
    pub ble: BleConfig,
}

impl AppConfig {
    /// Overlay environment variables onto the defaults, mirroring
    /// `load_config()`'s `os.getenv(...)` overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_f64("HRV_WINDOW_SIZE_SEC") {
            config.signal.window_size_sec = v;
        }
        if let Some(v) = env_f64("HRV_WINDOW_STEP_SEC") {
            config.signal.window_step_sec = v;
        }
        if let Some(v) = env_u16("HRV_MIN_PPI_MS") {
            config.signal.min_ppi_ms = v;
        }
        if let Some(v) = env_u16("HRV_MAX_PPI_MS") {
            config.signal.max_ppi_ms = v;
        }
        if let Some(v) = env_f64("HRV_SCORE_SMOOTHING_ALPHA") {
            config.ml.score_smoothing_alpha = v;
        }
        if let Some(v) = env_f64("HRV_FATIGUE_HORIZON_MIN") {
            config.ml.fatigue_horizon_min = v;
        }
        if let Ok(v) = std::env::var("HRV_DEVICE_NAME") {
            config.ble.device_name = v;
        }
        if let Some(v) = env_f64("HRV_SCAN_TIMEOUT_SEC") {
            config.ble.scan_timeout = Duration::from_secs_f64(v);
        }

        config
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.signal.window_size_sec, 15.0);
        assert_eq!(config.signal.window_step_sec, 1.0);
        assert_eq!(config.signal.min_ppi_ms, 300);
        assert_eq!(config.signal.max_ppi_ms, 2000);
        assert_eq!(config.signal.max_ppi_diff_ratio, 0.20);
        assert_eq!(config.signal.min_quality_ratio, 0.80);
        assert_eq!(config.ml.score_smoothing_alpha, 0.3);
        assert_eq!(config.ml.fatigue_horizon_min, 10.0);
        assert_eq!(config.ble.reconnect_attempts, 3);
    }

    #[test]
    fn env_override_parses_numeric_values() {
        std::env::set_var("HRV_WINDOW_SIZE_SEC", "20.0");
        std::env::set_var("HRV_DEVICE_NAME", "Verity Sense");
        let config = AppConfig::from_env();
        assert_eq!(config.signal.window_size_sec, 20.0);
        assert_eq!(config.ble.device_name, "Verity Sense");
        std::env::remove_var("HRV_WINDOW_SIZE_SEC");
        std::env::remove_var("HRV_DEVICE_NAME");
    }
}
