//! Session recording contract (§6).
//!
//! `SessionRecorder` is a contract only: the pipeline calls into it on
//! session boundaries and per-window data points, but persistence (CSV
//! export, a database, etc.) is explicitly out of scope here. `InMemoryRecorder`
//! is a reference implementation used by tests and the `doctor`/`stream`
//! CLI demo path, grounded on the session bookkeeping in
//! `app/storage/session_manager.py` without its file-export machinery.

use chrono::{DateTime, Utc};

use crate::error::RecorderError;
use crate::types::DataPoint;

/// Identifies and bounds a single recording session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Collaborator the pipeline orchestrator drives across a session's
/// lifetime. Implementations decide how (or whether) to persist data points;
/// the orchestrator only requires the state transitions below to be honored.
pub trait SessionRecorder: Send {
    fn start_session(&mut self, session_id: String) -> Result<SessionInfo, RecorderError>;
    fn stop_session(&mut self) -> Result<SessionInfo, RecorderError>;
    fn is_recording(&self) -> bool;
    fn record_data_point(&mut self, point: DataPoint) -> Result<(), RecorderError>;
}

/// In-memory reference `SessionRecorder`. Not a production persistence
/// layer: data points are held for the session's lifetime only and
/// discarded once a new session starts.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    current: Option<SessionInfo>,
    points: Vec<DataPoint>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_points(&self) -> &[DataPoint] {
        &self.points
    }
}

impl SessionRecorder for InMemoryRecorder {
    fn start_session(&mut self, session_id: String) -> Result<SessionInfo, RecorderError> {
        if self.current.is_some() {
            return Err(RecorderError::AlreadyActive);
        }
        let info = SessionInfo {
            session_id,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.current = Some(info.clone());
        self.points.clear();
        Ok(info)
    }

    fn stop_session(&mut self) -> Result<SessionInfo, RecorderError> {
        let mut info = self.current.take().ok_or(RecorderError::NotActive)?;
        info.ended_at = Some(Utc::now());
        Ok(info)
    }

    fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    fn record_data_point(&mut self, point: DataPoint) -> Result<(), RecorderError> {
        if self.current.is_none() {
            return Err(RecorderError::NotActive);
        }
        self.points.push(point);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_point(timestamp: f64) -> DataPoint {
        DataPoint {
            timestamp,
            hr: 70.0,
            rmssd: 40.0,
            sdnn: 50.0,
            pnn50: 10.0,
            mean_rr: 850.0,
            lf_power: 1.0,
            hf_power: 1.0,
            lf_hf_ratio: 1.0,
            stress: 20.0,
            cognitive_load: 20.0,
            fatigue: 20.0,
            window_quality: 1.0,
            fatigue_slope: 0.0,
            fatigue_predicted: 20.0,
        }
    }

    #[test]
    fn record_before_start_fails() {
        let mut recorder = InMemoryRecorder::new();
        assert!(recorder.record_data_point(sample_point(0.0)).is_err());
    }

    #[test]
    fn starting_twice_fails() {
        let mut recorder = InMemoryRecorder::new();
        recorder.start_session("s1".into()).unwrap();
        assert!(recorder.start_session("s2".into()).is_err());
    }

    #[test]
    fn stopping_without_starting_fails() {
        let mut recorder = InMemoryRecorder::new();
        assert!(recorder.stop_session().is_err());
    }

    #[test]
    fn full_session_lifecycle_accumulates_points() {
        let mut recorder = InMemoryRecorder::new();
        recorder.start_session("s1".into()).unwrap();
        assert!(recorder.is_recording());
        recorder.record_data_point(sample_point(0.0)).unwrap();
        recorder.record_data_point(sample_point(1.0)).unwrap();
        assert_eq!(recorder.data_points().len(), 2);
        recorder.stop_session().unwrap();
        assert!(!recorder.is_recording());
    }

    #[test]
    fn new_session_clears_previous_points() {
        let mut recorder = InMemoryRecorder::new();
        recorder.start_session("s1".into()).unwrap();
        recorder.record_data_point(sample_point(0.0)).unwrap();
        recorder.stop_session().unwrap();
        recorder.start_session("s2".into()).unwrap();
        assert_eq!(recorder.data_points().len(), 0);
    }
}
