//! Orchestrator wiring the sensor client through cleaning, windowing,
//! feature extraction and inference, grounded on `app/domain/pipeline.py`.

use std::sync::{Arc, Mutex};

use crate::cleaning::PpiCleaner;
use crate::config::AppConfig;
use crate::error::CoreError;
use crate::features::FeatureExtractor;
use crate::inference::{FatigueTrendTracker, HeuristicModel, Predictor, ScoreSmoother};
use crate::recorder::SessionRecorder;
use crate::types::{
    CognitiveScores, DataPoint, DeviceInfo, HrvFeatures, InferenceResult, PipelineEvent, Sample,
    WindowData,
};
use crate::window::SlidingWindow;

const HR_ONLY_MIN_INTERVAL_SEC: f64 = 3.0;

type EventCallback = Box<dyn FnMut(PipelineEvent) + Send>;

struct SessionState {
    recorder: Box<dyn SessionRecorder>,
    active: bool,
}

/// Mutable pipeline state behind a single lock, mirroring the reference
/// orchestrator's single-threaded event-handling model: every ingress path
/// (`receive_ppi`, `receive_hr`) and every session-boundary call serializes
/// through this state instead of each stage owning independent locks.
struct PipelineState {
    window: SlidingWindow,
    smoother: ScoreSmoother,
    trend: FatigueTrendTracker,
    last_hr_emit: f64,
    session_start: Option<f64>,
}

pub struct PipelineOrchestrator {
    config: AppConfig,
    predictor: Predictor,
    state: Mutex<PipelineState>,
    session: Mutex<Option<SessionState>>,
    on_event: Mutex<Option<EventCallback>>,
    /// Completed windows land here via `SlidingWindow::on_window`, which
    /// runs synchronously inside `add_samples` while `state` is locked.
    /// Writing into this independent slot (rather than calling back into
    /// the orchestrator directly) avoids re-entering `state`'s mutex.
    pending_window: Arc<Mutex<Option<WindowData>>>,
}

impl PipelineOrchestrator {
    pub fn new(config: AppConfig) -> Self {
        let mut window = SlidingWindow::new(&config.signal);
        let smoother = ScoreSmoother::new(config.ml.score_smoothing_alpha);
        let trend = FatigueTrendTracker::new(&config.ml);
        let predictor = Predictor::load(&config.ml);

        let pending_window: Arc<Mutex<Option<WindowData>>> = Arc::new(Mutex::new(None));
        let slot = pending_window.clone();
        window.on_window(move |w| *slot.lock().unwrap() = Some(w));

        Self {
            state: Mutex::new(PipelineState {
                window,
                smoother,
                trend,
                last_hr_emit: 0.0,
                session_start: None,
            }),
            session: Mutex::new(None),
            on_event: Mutex::new(None),
            pending_window,
            predictor,
            config,
        }
    }

    pub fn on_event(&self, callback: impl FnMut(PipelineEvent) + Send + 'static) {
        *self.on_event.lock().unwrap() = Some(Box::new(callback));
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(cb) = self.on_event.lock().unwrap().as_mut() {
            cb(event);
        }
    }

    pub fn device_state_changed(&self, info: DeviceInfo) {
        self.emit(PipelineEvent::DeviceState(info));
    }

    /// Ingress for a decoded PPI batch. Feeds the sliding window; a complete
    /// window triggers cleaning, feature extraction, scoring and emission.
    pub fn receive_ppi(&self, sample: &Sample) {
        {
            let mut state = self.state.lock().unwrap();
            let wall_clock_now = sample.timestamp;
            state
                .window
                .add_samples(&sample.ppi_ms, sample.timestamp, wall_clock_now);
        }

        let window = self.pending_window.lock().unwrap().take();
        if let Some(window) = window {
            self.process_window(window);
        }
    }

    fn process_window(&self, window: WindowData) {
        let cleaner = PpiCleaner::new(&self.config.signal);
        let cleaned = cleaner.clean(
            &window.ppi_ms.iter().map(|&v| v as u16).collect::<Vec<_>>(),
            &window.timestamps,
        );

        if cleaned.quality_ratio < self.config.signal.min_quality_ratio {
            let err = CoreError::LowQualityWindow {
                ratio: cleaned.quality_ratio,
                min: self.config.signal.min_quality_ratio,
            };
            tracing::warn!(%err, "emitting window despite low quality");
        }

        let filled = cleaner.interpolate(&cleaned);
        let extractor = FeatureExtractor::new(&self.config.signal);
        let features = extractor.extract(&filled, cleaned.quality_ratio);

        let result = self.score_features(features, window.window_end);
        self.emit(PipelineEvent::Inference(result.clone()));
        self.record(&result);
    }

    fn score_features(&self, features: HrvFeatures, timestamp: f64) -> InferenceResult {
        let (raw, prediction_error) = self.predictor.predict(&features);
        if let Some(err) = prediction_error {
            tracing::warn!(%err, "prediction failed for this window, used heuristic fallback");
        }
        let mut state = self.state.lock().unwrap();
        let scores = CognitiveScores {
            timestamp,
            ..state.smoother.smooth(raw)
        };
        state.trend.push(timestamp, scores.fatigue);
        let fatigue_trend = state.trend.trend();

        InferenceResult {
            scores,
            features,
            fatigue_trend,
            timestamp,
            window_quality: features.quality_ratio,
        }
    }

    /// Ingress for a standalone HR reading (no PPI batch attached). Emits an
    /// `HrUpdate` event always, and a degraded HR-only inference at most
    /// once every [`HR_ONLY_MIN_INTERVAL_SEC`] seconds until a real window
    /// becomes available.
    pub fn receive_hr(&self, hr: u16, timestamp: f64) {
        self.emit(PipelineEvent::HrUpdate { hr, timestamp });

        let should_emit = {
            let mut state = self.state.lock().unwrap();
            let elapsed_since_start = state
                .session_start
                .map(|start| (timestamp - start) / 60.0)
                .unwrap_or(0.0);
            let due = state.last_hr_emit == 0.0 || timestamp - state.last_hr_emit >= HR_ONLY_MIN_INTERVAL_SEC;
            if due {
                state.last_hr_emit = timestamp;
            }
            due.then_some(elapsed_since_start)
        };

        if let Some(elapsed_min) = should_emit {
            let raw = HeuristicModel::score_hr_only(hr, elapsed_min);
            let mut state = self.state.lock().unwrap();
            let scores = CognitiveScores { timestamp, ..state.smoother.smooth(raw) };
            let result = InferenceResult {
                scores,
                features: HrvFeatures::empty(0.0, 0),
                fatigue_trend: state.trend.trend(),
                timestamp,
                window_quality: 0.0,
            };
            drop(state);
            self.emit(PipelineEvent::Inference(result.clone()));
            self.record(&result);
        }
    }

    fn record(&self, result: &InferenceResult) {
        let mut session = self.session.lock().unwrap();
        if let Some(session_state) = session.as_mut() {
            if session_state.active {
                let point = DataPoint {
                    timestamp: result.timestamp,
                    hr: result.features.mean_hr,
                    rmssd: result.features.rmssd,
                    sdnn: result.features.sdnn,
                    pnn50: result.features.pnn50,
                    mean_rr: result.features.mean_rr,
                    lf_power: result.features.lf_power,
                    hf_power: result.features.hf_power,
                    lf_hf_ratio: result.features.lf_hf_ratio,
                    stress: result.scores.stress,
                    cognitive_load: result.scores.cognitive_load,
                    fatigue: result.scores.fatigue,
                    window_quality: result.window_quality,
                    fatigue_slope: result.fatigue_trend.slope,
                    fatigue_predicted: result.fatigue_trend.predicted_fatigue_at_horizon,
                };
                if let Err(e) = session_state.recorder.record_data_point(point) {
                    tracing::warn!(error = %e, "failed to record data point");
                }
            }
        }
    }

    pub fn start_session(
        &self,
        session_id: String,
        recorder: Box<dyn SessionRecorder>,
        now: f64,
    ) -> Result<(), CoreError> {
        let mut session = self.session.lock().unwrap();
        if session.is_some() {
            return Err(CoreError::SessionAlreadyActive);
        }
        let mut recorder = recorder;
        recorder
            .start_session(session_id)
            .map_err(|e| CoreError::ProtocolError(e.to_string()))?;
        *session = Some(SessionState { recorder, active: true });
        drop(session);

        let mut state = self.state.lock().unwrap();
        state.window.reset();
        state.smoother.reset();
        state.trend.reset();
        state.last_hr_emit = 0.0;
        state.session_start = Some(now);
        Ok(())
    }

    pub fn stop_session(&self) -> Result<(), CoreError> {
        let mut session = self.session.lock().unwrap();
        let mut session_state = session.take().ok_or(CoreError::NoActiveSession)?;
        session_state
            .recorder
            .stop_session()
            .map_err(|e| CoreError::ProtocolError(e.to_string()))?;
        Ok(())
    }

    /// Force-stop without requiring a prior `start_session`; used on
    /// unexpected disconnect so the pipeline never ends up stuck "active".
    pub fn force_stop_session(&self) {
        let mut session = self.session.lock().unwrap();
        if let Some(mut session_state) = session.take() {
            let _ = session_state.recorder.stop_session();
        }
        let mut state = self.state.lock().unwrap();
        state.window.reset();
        state.smoother.reset();
        state.session_start = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::InMemoryRecorder;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn hr_update_always_emits_regardless_of_cadence() {
        let pipeline = PipelineOrchestrator::new(AppConfig::default());
        let events: Arc<StdMutex<Vec<PipelineEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        pipeline.on_event(move |event| sink.lock().unwrap().push(event));

        pipeline.receive_hr(70, 0.0);
        pipeline.receive_hr(71, 0.5);

        let recorded = events.lock().unwrap();
        let hr_updates = recorded
            .iter()
            .filter(|e| matches!(e, PipelineEvent::HrUpdate { .. }))
            .count();
        assert_eq!(hr_updates, 2);
    }

    #[test]
    fn hr_only_inference_is_rate_limited() {
        let pipeline = PipelineOrchestrator::new(AppConfig::default());
        let events: Arc<StdMutex<Vec<PipelineEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        pipeline.on_event(move |event| sink.lock().unwrap().push(event));

        pipeline.receive_hr(70, 0.0);
        pipeline.receive_hr(71, 1.0); // within 3s window, no second inference
        pipeline.receive_hr(72, 4.0); // past the gate

        let recorded = events.lock().unwrap();
        let inferences = recorded
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Inference(_)))
            .count();
        assert_eq!(inferences, 2);
    }

    #[test]
    fn start_session_twice_fails() {
        let pipeline = PipelineOrchestrator::new(AppConfig::default());
        pipeline
            .start_session("s1".into(), Box::new(InMemoryRecorder::new()), 0.0)
            .unwrap();
        let err = pipeline.start_session("s2".into(), Box::new(InMemoryRecorder::new()), 1.0);
        assert!(err.is_err());
    }

    #[test]
    fn stop_without_start_fails() {
        let pipeline = PipelineOrchestrator::new(AppConfig::default());
        assert!(pipeline.stop_session().is_err());
    }

    #[test]
    fn force_stop_is_safe_without_active_session() {
        let pipeline = PipelineOrchestrator::new(AppConfig::default());
        pipeline.force_stop_session();
    }

    /// End-to-end: a steady 75 bpm stream (800ms RR) through receive_ppi
    /// should flow cleaning -> extraction -> prediction -> smoothing into a
    /// single inference with mean_hr ~= 75 and a mid-range stress score.
    #[test]
    fn clean_stable_stream_produces_one_plausible_inference() {
        let pipeline = PipelineOrchestrator::new(AppConfig::default());
        let events: Arc<StdMutex<Vec<PipelineEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        pipeline.on_event(move |event| sink.lock().unwrap().push(event));

        let ppi_ms: Vec<u16> = vec![800; 60];
        let errors_ms = vec![0u16; 60];
        let rr_quality = vec![true; 60];
        let sample = Sample::ppi_batch(48.0, ppi_ms, errors_ms, rr_quality);
        pipeline.receive_ppi(&sample);

        let recorded = events.lock().unwrap();
        let inferences: Vec<_> = recorded
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Inference(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(inferences.len(), 1);

        let result = inferences[0];
        assert!((result.features.mean_hr - 75.0).abs() < 0.5);
        assert!(result.features.sdnn < 0.5);
        assert!(result.features.rmssd < 0.5);
        assert_eq!(result.features.lf_hf_ratio, 0.0);
        assert!(result.scores.stress > 30.0 && result.scores.stress < 60.0);
        for v in [result.scores.stress, result.scores.cognitive_load, result.scores.fatigue] {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn fatigue_trend_end_to_end_over_rising_windows() {
        let pipeline = PipelineOrchestrator::new(AppConfig::default());
        let events: Arc<StdMutex<Vec<PipelineEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        pipeline.on_event(move |event| sink.lock().unwrap().push(event));

        // 20 HR-only fallback ticks, 30s apart (10 minutes total), driving
        // fatigue up as elapsed session time grows.
        for i in 0..20 {
            let t = i as f64 * 30.0;
            pipeline.receive_hr(75, t);
        }

        let recorded = events.lock().unwrap();
        let last_inference = recorded
            .iter()
            .rev()
            .find_map(|e| match e {
                PipelineEvent::Inference(r) => Some(r),
                _ => None,
            })
            .expect("at least one inference");
        assert!(last_inference.fatigue_trend.slope >= 0.0);
        assert!((0.0..=100.0).contains(&last_inference.fatigue_trend.predicted_fatigue_at_horizon));
    }
}
