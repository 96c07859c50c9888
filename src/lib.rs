//! Real-time wearable HRV cognitive-state inference pipeline.
//!
//! Wires a Polar Verity Sense sensor client through PPI artifact cleaning,
//! sliding-window buffering, HRV feature extraction and heuristic cognitive
//! scoring into a single orchestrator ([`pipeline::PipelineOrchestrator`]).

pub mod cleaning;
pub mod config;
pub mod error;
pub mod features;
pub mod inference;
pub mod pipeline;
pub mod recorder;
pub mod sensor;
pub mod types;
pub mod window;

pub use config::AppConfig;
pub use error::{CoreError, RecorderError};
pub use pipeline::PipelineOrchestrator;
pub use recorder::{InMemoryRecorder, SessionRecorder};
pub use sensor::SensorClient;
pub use types::{
    CognitiveScores, ConnectionState, DataPoint, DeviceInfo, FatigueTrend, HrvFeatures,
    InferenceResult, PipelineEvent, Sample,
};
