//! Error types for the HRV cognitive-state pipeline

use thiserror::Error;

/// Errors surfaced across the core pipeline.
///
/// Only the control-plane variants are expected to propagate as `Err` out of
/// public APIs (`DeviceNotFound`, `ConnectFailed`, `ProtocolError`,
/// `UnexpectedDisconnect`). The data-plane variants exist so call sites can
/// log a single consistent message; they are absorbed into a degraded result
/// rather than returned, per the error handling policy.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("device not found: scan for '{0}' exhausted")]
    DeviceNotFound(String),

    #[error("failed to connect after {attempts} attempts: {source}")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: btleplug::Error,
    },

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("device disconnected unexpectedly")]
    UnexpectedDisconnect,

    #[error("model prediction failed, falling back to heuristic: {0}")]
    PredictionFailed(String),

    #[error("PSD computation failed: {0}")]
    PsdFailed(String),

    #[error("window quality below threshold: {ratio:.3} < {min:.3}")]
    LowQualityWindow { ratio: f64, min: f64 },

    #[error("BLE transport error: {0}")]
    Transport(#[from] btleplug::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no active session")]
    NoActiveSession,

    #[error("a session is already active")]
    SessionAlreadyActive,
}

/// Errors a `SessionRecorder` implementation may report back to the orchestrator.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("a session is already active")]
    AlreadyActive,

    #[error("no active session")]
    NotActive,

    #[error("recorder backend error: {0}")]
    Backend(String),
}
