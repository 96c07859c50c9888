//! Core data model shared across the pipeline stages.
//!
//! Mirrors the shapes in the original `PolarSample`/`WindowData`/`HRVFeatures`
//! dataclasses, translated into owned, `Clone`-able Rust structs so values can
//! cross task boundaries by move (per the cross-task boundary design note)
//! instead of by shared reference.

use serde::{Deserialize, Serialize};

/// Connection phase of the sensor client's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Streaming,
    Error,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

/// Identity and health of the connected sensor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub address: String,
    /// 0-100, or -1 when not yet read.
    pub battery_level: i32,
    /// Rolling mean of the last 50 skin-contact bits, in [0, 1].
    pub signal_quality: f64,
    pub connection_state: ConnectionState,
}

impl DeviceInfo {
    pub fn new() -> Self {
        Self {
            battery_level: -1,
            ..Default::default()
        }
    }
}

/// A single decoded sample off the wireless link: either an HR reading, a
/// batch of PPI intervals, or both (a frame never carries more than one kind
/// per the PMD/HR service split, but the orchestrator treats them uniformly).
#[derive(Debug, Clone)]
pub struct Sample {
    pub timestamp: f64,
    pub hr: u16,
    pub ppi_ms: Vec<u16>,
    pub ppi_errors_ms: Vec<u16>,
    pub rr_quality: Vec<bool>,
}

impl Sample {
    pub fn hr_only(timestamp: f64, hr: u16) -> Self {
        Self {
            timestamp,
            hr,
            ppi_ms: Vec::new(),
            ppi_errors_ms: Vec::new(),
            rr_quality: Vec::new(),
        }
    }

    pub fn ppi_batch(
        timestamp: f64,
        ppi_ms: Vec<u16>,
        ppi_errors_ms: Vec<u16>,
        rr_quality: Vec<bool>,
    ) -> Self {
        Self {
            timestamp,
            hr: 0,
            ppi_ms,
            ppi_errors_ms,
            rr_quality,
        }
    }
}

/// A snapshot of the sliding window's buffer at emission time. A copy, never
/// a reference into the live buffer (§4.C).
#[derive(Debug, Clone, Default)]
pub struct WindowData {
    pub ppi_ms: Vec<f64>,
    pub timestamps: Vec<f64>,
    pub window_start: f64,
    pub window_end: f64,
    pub sample_count: usize,
}

/// Output of the PPI cleaner: original intervals, a validity mask, and the
/// derived quality ratio. The cleaner never mutates its inputs.
#[derive(Debug, Clone, Default)]
pub struct CleanedPpi {
    pub timestamps: Vec<f64>,
    pub intervals_ms: Vec<f64>,
    pub mask_valid: Vec<bool>,
    pub quality_ratio: f64,
    pub n_original: usize,
    pub n_removed: usize,
}

/// Fixed-ordering 14-feature HRV vector plus observability fields.
///
/// `FEATURE_NAMES` defines the order consumed by [`crate::inference`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvFeatures {
    // Time domain
    pub mean_hr: f64,
    pub mean_rr: f64,
    pub sdnn: f64,
    pub rmssd: f64,
    pub pnn50: f64,
    pub sdsd: f64,
    pub cv_rr: f64,

    // Frequency domain
    pub lf_power: f64,
    pub hf_power: f64,
    pub lf_hf_ratio: f64,
    pub total_power: f64,

    // Nonlinear
    pub sd1: f64,
    pub sd2: f64,
    pub sd_ratio: f64,

    // Quality
    pub quality_ratio: f64,
    pub sample_count: usize,
}

pub const FEATURE_NAMES: [&str; 14] = [
    "mean_hr", "mean_rr", "sdnn", "rmssd", "pnn50", "sdsd", "cv_rr", "lf_power", "hf_power",
    "lf_hf_ratio", "total_power", "sd1", "sd2", "sd_ratio",
];

impl HrvFeatures {
    pub fn empty(quality_ratio: f64, sample_count: usize) -> Self {
        Self {
            mean_hr: 0.0,
            mean_rr: 0.0,
            sdnn: 0.0,
            rmssd: 0.0,
            pnn50: 0.0,
            sdsd: 0.0,
            cv_rr: 0.0,
            lf_power: 0.0,
            hf_power: 0.0,
            lf_hf_ratio: 0.0,
            total_power: 0.0,
            sd1: 0.0,
            sd2: 0.0,
            sd_ratio: 0.0,
            quality_ratio,
            sample_count,
        }
    }

    /// Ordered feature vector matching [`FEATURE_NAMES`], for consumption by
    /// the inference engine.
    pub fn to_vector(&self) -> [f64; 14] {
        [
            self.mean_hr,
            self.mean_rr,
            self.sdnn,
            self.rmssd,
            self.pnn50,
            self.sdsd,
            self.cv_rr,
            self.lf_power,
            self.hf_power,
            self.lf_hf_ratio,
            self.total_power,
            self.sd1,
            self.sd2,
            self.sd_ratio,
        ]
    }

    /// Rounded JSON representation, per the outbound-event rounding rules (§6).
    pub fn rounded(&self) -> serde_json::Value {
        serde_json::json!({
            "mean_hr": round_dp(self.mean_hr, 1),
            "mean_rr": round_dp(self.mean_rr, 1),
            "sdnn": round_dp(self.sdnn, 2),
            "rmssd": round_dp(self.rmssd, 2),
            "pnn50": round_dp(self.pnn50, 2),
            "sdsd": round_dp(self.sdsd, 2),
            "cv_rr": round_dp(self.cv_rr, 4),
            "lf_power": round_dp(self.lf_power, 2),
            "hf_power": round_dp(self.hf_power, 2),
            "lf_hf_ratio": round_dp(self.lf_hf_ratio, 3),
            "total_power": round_dp(self.total_power, 2),
            "sd1": round_dp(self.sd1, 2),
            "sd2": round_dp(self.sd2, 2),
            "sd_ratio": round_dp(self.sd_ratio, 3),
            "quality_ratio": round_dp(self.quality_ratio, 3),
            "sample_count": self.sample_count,
        })
    }
}

/// stress / cognitive_load / fatigue triplet, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CognitiveScores {
    pub stress: f64,
    pub cognitive_load: f64,
    pub fatigue: f64,
    pub timestamp: f64,
}

impl CognitiveScores {
    pub fn rounded(&self) -> serde_json::Value {
        serde_json::json!({
            "stress": round_dp(self.stress, 1),
            "cognitive_load": round_dp(self.cognitive_load, 1),
            "fatigue": round_dp(self.fatigue, 1),
            "timestamp": self.timestamp,
        })
    }
}

/// Short-horizon linear projection of the fatigue score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FatigueTrend {
    /// score-points per minute; positive = worsening.
    pub slope: f64,
    pub predicted_fatigue_at_horizon: f64,
    /// in [0, 1]
    pub confidence: f64,
}

/// Full result of processing one window (or one HR-only fallback tick).
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub scores: CognitiveScores,
    pub features: HrvFeatures,
    pub fatigue_trend: FatigueTrend,
    pub timestamp: f64,
    pub window_quality: f64,
}

impl InferenceResult {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "scores": self.scores.rounded(),
            "features": self.features.rounded(),
            "fatigue_trend": {
                "slope": round_dp(self.fatigue_trend.slope, 3),
                "predicted_fatigue_10min": round_dp(self.fatigue_trend.predicted_fatigue_at_horizon, 1),
                "confidence": round_dp(self.fatigue_trend.confidence, 2),
            },
            "timestamp": self.timestamp,
            "window_quality": round_dp(self.window_quality, 3),
        })
    }
}

/// The three outbound event shapes a transport collaborator consumes (§6).
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Inference(InferenceResult),
    HrUpdate { hr: u16, timestamp: f64 },
    DeviceState(DeviceInfo),
}

impl PipelineEvent {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PipelineEvent::Inference(result) => serde_json::json!({
                "event": "inference",
                "data": result.to_json(),
            }),
            PipelineEvent::HrUpdate { hr, timestamp } => serde_json::json!({
                "event": "hr_update",
                "data": { "hr": hr, "timestamp": timestamp },
            }),
            PipelineEvent::DeviceState(info) => serde_json::json!({
                "event": "device_state",
                "data": {
                    "connection_state": info.connection_state,
                    "name": info.name,
                    "address": info.address,
                    "battery_level": info.battery_level,
                    "signal_quality": round_dp(info.signal_quality, 3),
                },
            }),
        }
    }
}

/// One recorded data point, handed to the `SessionRecorder` collaborator
/// when a session is active (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: f64,
    pub hr: f64,
    pub rmssd: f64,
    pub sdnn: f64,
    pub pnn50: f64,
    pub mean_rr: f64,
    pub lf_power: f64,
    pub hf_power: f64,
    pub lf_hf_ratio: f64,
    pub stress: f64,
    pub cognitive_load: f64,
    pub fatigue: f64,
    pub window_quality: f64,
    pub fatigue_slope: f64,
    pub fatigue_predicted: f64,
}

pub(crate) fn round_dp(value: f64, dp: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}
