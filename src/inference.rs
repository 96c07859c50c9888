//! Feature-to-score prediction (trained model with heuristic fallback), EMA
//! smoothing, and short-horizon fatigue-trend projection, grounded on
//! `app/ml/model.py` and `app/ml/inference.py`.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::config::MlConfig;
use crate::error::CoreError;
use crate::types::{CognitiveScores, FatigueTrend, HrvFeatures};

const TREND_CAPACITY: usize = 120;
const MIN_TREND_POINTS: usize = 6;
const TREND_CONFIDENCE_SPAN_MIN: f64 = 5.0;
const N_FEATURES: usize = 14;

fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

/// A standard-scaler transform (per-feature mean/scale), serialized
/// alongside the model file at `MlConfig::scaler_path`.
#[derive(Debug, Deserialize)]
struct Scaler {
    mean: [f64; N_FEATURES],
    scale: [f64; N_FEATURES],
}

impl Scaler {
    fn transform(&self, features: &[f64; N_FEATURES]) -> [f64; N_FEATURES] {
        let mut out = [0.0; N_FEATURES];
        for i in 0..N_FEATURES {
            let scale = if self.scale[i].abs() > 1e-12 { self.scale[i] } else { 1.0 };
            out[i] = (features[i] - self.mean[i]) / scale;
        }
        out
    }
}

/// A linear regression model mapping 14 scaled features to the
/// (stress, cognitive_load, fatigue) triplet: one weight row per output plus
/// an intercept, serialized at `MlConfig::model_path`.
#[derive(Debug, Deserialize)]
struct TrainedModel {
    coefficients: [[f64; N_FEATURES]; 3],
    intercepts: [f64; 3],
}

impl TrainedModel {
    fn predict(&self, scaled: &[f64; N_FEATURES]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (row, coeffs) in out.iter_mut().zip(self.coefficients.iter()) {
            *row = coeffs.iter().zip(scaled.iter()).map(|(c, x)| c * x).sum::<f64>();
        }
        for (o, intercept) in out.iter_mut().zip(self.intercepts.iter()) {
            *o += intercept;
        }
        out
    }
}

/// Loads and applies the optional trained model + scaler pair. Absence or a
/// load failure is a normal branch (heuristic mode), never retried (§9).
pub struct Predictor {
    trained: Option<(TrainedModel, Scaler)>,
}

impl Predictor {
    /// Attempt to load the configured model/scaler pair once. Logs and falls
    /// back to heuristic-only on any failure; never returns `Err`.
    pub fn load(config: &MlConfig) -> Self {
        let trained = match (&config.model_path, &config.scaler_path) {
            (Some(model_path), Some(scaler_path)) => {
                match load_pair(model_path, scaler_path) {
                    Ok(pair) => {
                        tracing::info!(model_path, scaler_path, "loaded trained cognitive-score model");
                        Some(pair)
                    }
                    Err(err) => {
                        tracing::warn!(%err, "trained model load failed, using heuristic mode");
                        None
                    }
                }
            }
            _ => None,
        };
        Self { trained }
    }

    pub fn heuristic_only() -> Self {
        Self { trained: None }
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    /// Predict raw (unsmoothed) scores for a feature vector. Falls back to
    /// the heuristic model if the trained path errors on this window
    /// (`CoreError::PredictionFailed`, logged once per occurrence by the
    /// caller).
    pub fn predict(&self, features: &HrvFeatures) -> (CognitiveScores, Option<CoreError>) {
        if let Some((model, scaler)) = &self.trained {
            let scaled = scaler.transform(&features.to_vector());
            let [stress, cognitive_load, fatigue] = model.predict(&scaled);
            if stress.is_finite() && cognitive_load.is_finite() && fatigue.is_finite() {
                return (
                    CognitiveScores {
                        stress: clamp(stress, 0.0, 100.0),
                        cognitive_load: clamp(cognitive_load, 0.0, 100.0),
                        fatigue: clamp(fatigue, 0.0, 100.0),
                        timestamp: 0.0,
                    },
                    None,
                );
            }
            let err = CoreError::PredictionFailed("trained model produced a non-finite output".into());
            return (HeuristicModel::score(features), Some(err));
        }
        (HeuristicModel::score(features), None)
    }
}

fn load_pair(model_path: &str, scaler_path: &str) -> Result<(TrainedModel, Scaler), CoreError> {
    let model: TrainedModel = load_json(model_path)?;
    let scaler: Scaler = load_json(scaler_path)?;
    Ok((model, scaler))
}

fn load_json<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T, CoreError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// The heuristic model from `app/ml/model.py`, reproduced formula-for-formula.
pub struct HeuristicModel;

impl HeuristicModel {
    pub fn score(features: &HrvFeatures) -> CognitiveScores {
        let stress = 0.4 * clamp((features.lf_hf_ratio - 0.5) / 4.0 * 100.0, 0.0, 100.0)
            + 0.4 * clamp((1.0 - features.rmssd / 80.0) * 100.0, 0.0, 100.0)
            + 0.2 * clamp((features.mean_hr - 60.0) / 50.0 * 60.0, 0.0, 100.0);

        let cognitive_load = 0.35 * clamp((1.0 - features.sdnn / 100.0) * 100.0, 0.0, 100.0)
            + 0.35 * clamp((features.mean_hr - 55.0) / 55.0 * 80.0, 0.0, 100.0)
            + 0.30 * clamp((1.0 - features.sd1 / 50.0) * 100.0, 0.0, 100.0);

        let fatigue = 0.40 * clamp((1.0 - features.rmssd / 60.0) * 80.0, 0.0, 100.0)
            + 0.35 * clamp((1.0 - features.pnn50 / 30.0) * 80.0, 0.0, 100.0)
            + 0.25 * clamp((features.mean_hr - 65.0) / 40.0 * 50.0, 0.0, 100.0);

        CognitiveScores {
            stress,
            cognitive_load,
            fatigue,
            timestamp: 0.0,
        }
    }

    /// Degraded-mode estimate used before a full HRV window is available,
    /// driven only by instantaneous HR and elapsed session time.
    pub fn score_hr_only(hr: u16, elapsed_min: f64) -> CognitiveScores {
        let hr = hr as f64;
        let stress_est = clamp((hr - 60.0) * 1.5, 0.0, 100.0);
        let load_est = clamp((hr - 55.0) * 0.8, 0.0, 100.0);
        let fatigue_est = clamp(elapsed_min * 1.5 + (hr - 65.0) * 0.3, 0.0, 100.0);

        CognitiveScores {
            stress: stress_est,
            cognitive_load: load_est,
            fatigue: fatigue_est,
            timestamp: 0.0,
        }
    }
}

/// Exponential moving-average smoother over a `CognitiveScores` triplet.
/// The first observation passes through unchanged; every subsequent one
/// blends with the running average at `alpha`.
pub struct ScoreSmoother {
    alpha: f64,
    state: Option<CognitiveScores>,
}

impl ScoreSmoother {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, state: None }
    }

    pub fn smooth(&mut self, raw: CognitiveScores) -> CognitiveScores {
        let smoothed = match self.state {
            None => raw,
            Some(prev) => CognitiveScores {
                stress: self.alpha * raw.stress + (1.0 - self.alpha) * prev.stress,
                cognitive_load: self.alpha * raw.cognitive_load
                    + (1.0 - self.alpha) * prev.cognitive_load,
                fatigue: self.alpha * raw.fatigue + (1.0 - self.alpha) * prev.fatigue,
                timestamp: raw.timestamp,
            },
        };
        self.state = Some(smoothed);
        smoothed
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

/// Ring buffer of `(timestamp_sec, fatigue_score)` points feeding a degree-1
/// least-squares fit for a short-horizon fatigue projection.
pub struct FatigueTrendTracker {
    points: VecDeque<(f64, f64)>,
    horizon_min: f64,
}

impl FatigueTrendTracker {
    pub fn new(config: &MlConfig) -> Self {
        Self {
            points: VecDeque::with_capacity(TREND_CAPACITY),
            horizon_min: config.fatigue_horizon_min,
        }
    }

    pub fn push(&mut self, timestamp_sec: f64, fatigue: f64) {
        if self.points.len() == TREND_CAPACITY {
            self.points.pop_front();
        }
        self.points.push_back((timestamp_sec, fatigue));
    }

    pub fn reset(&mut self) {
        self.points.clear();
    }

    /// Fit `fatigue = slope * minutes_since_first + intercept` for the slope
    /// and R², then project `horizon_min` minutes ahead from the latest
    /// observed fatigue value (not the fitted intercept), scaling confidence
    /// by both fit quality and how much of the horizon the observed span
    /// covers.
    pub fn trend(&self) -> FatigueTrend {
        if self.points.len() < MIN_TREND_POINTS {
            return FatigueTrend::default();
        }

        let t0 = self.points[0].0;
        let xs: Vec<f64> = self.points.iter().map(|(t, _)| (t - t0) / 60.0).collect();
        let ys: Vec<f64> = self.points.iter().map(|(_, f)| *f).collect();

        let (slope, _intercept, r_squared) = least_squares_fit(&xs, &ys);
        let span_min = *xs.last().unwrap();
        let current_fatigue = self.points.back().unwrap().1;

        let confidence = clamp(r_squared, 0.0, 1.0) * clamp(span_min / TREND_CONFIDENCE_SPAN_MIN, 0.0, 1.0);
        let predicted = clamp(current_fatigue + slope * self.horizon_min, 0.0, 100.0);

        FatigueTrend {
            slope,
            predicted_fatigue_at_horizon: predicted,
            confidence,
        }
    }
}

/// Ordinary least-squares line fit; returns `(slope, intercept, r_squared)`.
fn least_squares_fit(xs: &[f64], ys: &[f64]) -> (f64, f64, f64) {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
    }

    if var_x < 1e-12 {
        return (0.0, mean_y, 0.0);
    }

    let slope = cov / var_x;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let predicted = slope * x + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }
    let r_squared = if ss_tot < 1e-12 { 0.0 } else { 1.0 - ss_res / ss_tot };

    (slope, intercept, r_squared.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::types::HrvFeatures;

    fn mk_features(mean_hr: f64, rmssd: f64, sdnn: f64, sd1: f64, pnn50: f64, lf_hf: f64) -> HrvFeatures {
        HrvFeatures {
            mean_hr,
            mean_rr: 60000.0 / mean_hr,
            sdnn,
            rmssd,
            pnn50,
            sdsd: 0.0,
            cv_rr: 0.0,
            lf_power: 0.0,
            hf_power: 0.0,
            lf_hf_ratio: lf_hf,
            total_power: 0.0,
            sd1,
            sd2: 0.0,
            sd_ratio: 0.0,
            quality_ratio: 1.0,
            sample_count: 20,
        }
    }

    #[test]
    fn relaxed_profile_yields_low_scores() {
        let features = mk_features(60.0, 70.0, 90.0, 40.0, 25.0, 1.0);
        let scores = HeuristicModel::score(&features);
        assert!(scores.stress < 40.0);
        assert!(scores.cognitive_load < 40.0);
        assert!(scores.fatigue < 40.0);
    }

    #[test]
    fn strained_profile_yields_high_scores() {
        let features = mk_features(110.0, 10.0, 20.0, 5.0, 2.0, 5.0);
        let scores = HeuristicModel::score(&features);
        assert!(scores.stress > 60.0);
        assert!(scores.cognitive_load > 60.0);
        assert!(scores.fatigue > 60.0);
    }

    #[test]
    fn scores_are_always_clamped_to_0_100() {
        let extreme = mk_features(500.0, -1000.0, -1000.0, -1000.0, -1000.0, 1000.0);
        let scores = HeuristicModel::score(&extreme);
        for v in [scores.stress, scores.cognitive_load, scores.fatigue] {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn hr_only_fallback_increases_with_elapsed_time() {
        let early = HeuristicModel::score_hr_only(80, 1.0);
        let later = HeuristicModel::score_hr_only(80, 8.0);
        assert!(later.fatigue > early.fatigue);
    }

    #[test]
    fn smoother_passes_first_value_through_unchanged() {
        let mut smoother = ScoreSmoother::new(0.3);
        let raw = CognitiveScores {
            stress: 50.0,
            cognitive_load: 40.0,
            fatigue: 30.0,
            timestamp: 1.0,
        };
        let out = smoother.smooth(raw);
        assert_eq!(out.stress, raw.stress);
    }

    #[test]
    fn smoother_blends_subsequent_values() {
        let mut smoother = ScoreSmoother::new(0.5);
        smoother.smooth(CognitiveScores { stress: 0.0, cognitive_load: 0.0, fatigue: 0.0, timestamp: 0.0 });
        let second = smoother.smooth(CognitiveScores { stress: 100.0, cognitive_load: 0.0, fatigue: 0.0, timestamp: 1.0 });
        assert!((second.stress - 50.0).abs() < 1e-9);
    }

    #[test]
    fn smoother_reset_restarts_pass_through() {
        let mut smoother = ScoreSmoother::new(0.3);
        smoother.smooth(CognitiveScores { stress: 10.0, cognitive_load: 10.0, fatigue: 10.0, timestamp: 0.0 });
        smoother.reset();
        let raw = CognitiveScores { stress: 90.0, cognitive_load: 90.0, fatigue: 90.0, timestamp: 1.0 };
        let out = smoother.smooth(raw);
        assert_eq!(out.stress, 90.0);
    }

    #[test]
    fn fatigue_trend_needs_minimum_points() {
        let config = MlConfig::default();
        let mut tracker = FatigueTrendTracker::new(&config);
        for i in 0..5 {
            tracker.push(i as f64 * 60.0, 20.0 + i as f64 * 5.0);
        }
        let trend = tracker.trend();
        assert_eq!(trend.confidence, 0.0);
        assert_eq!(trend.slope, 0.0);
    }

    #[test]
    fn fatigue_trend_detects_rising_slope() {
        let config = MlConfig::default();
        let mut tracker = FatigueTrendTracker::new(&config);
        for i in 0..10 {
            tracker.push(i as f64 * 60.0, 20.0 + i as f64 * 5.0);
        }
        let trend = tracker.trend();
        assert!(trend.slope > 0.0);
        assert!(trend.confidence > 0.0);
    }

    #[test]
    fn fatigue_trend_projects_from_current_value_not_intercept() {
        // 20 points, fatigue rising linearly 40 -> 60 over 10 minutes.
        let config = MlConfig { fatigue_horizon_min: 10.0, ..MlConfig::default() };
        let mut tracker = FatigueTrendTracker::new(&config);
        for i in 0..20 {
            let minutes = i as f64 * 10.0 / 19.0;
            let fatigue = 40.0 + (60.0 - 40.0) * (i as f64 / 19.0);
            tracker.push(minutes * 60.0, fatigue);
        }
        let trend = tracker.trend();
        assert!((trend.slope - 2.0).abs() < 0.1);
        assert!((trend.predicted_fatigue_at_horizon - 80.0).abs() < 1.0);
    }

    #[test]
    fn fatigue_trend_ring_buffer_caps_at_capacity() {
        let config = MlConfig::default();
        let mut tracker = FatigueTrendTracker::new(&config);
        for i in 0..(TREND_CAPACITY + 30) {
            tracker.push(i as f64 * 60.0, 10.0);
        }
        assert_eq!(tracker.points.len(), TREND_CAPACITY);
    }

    #[test]
    fn fatigue_trend_reset_clears_points() {
        let config = MlConfig::default();
        let mut tracker = FatigueTrendTracker::new(&config);
        for i in 0..10 {
            tracker.push(i as f64 * 60.0, 20.0);
        }
        tracker.reset();
        assert_eq!(tracker.trend(), FatigueTrend::default());
    }

    fn mk_extreme_features() -> HrvFeatures {
        mk_features(60.0, 70.0, 90.0, 40.0, 25.0, 1.0)
    }

    #[test]
    fn predictor_falls_back_to_heuristic_when_unconfigured() {
        let predictor = Predictor::load(&MlConfig::default());
        assert!(!predictor.is_trained());
        let (scores, err) = predictor.predict(&mk_extreme_features());
        assert!(err.is_none());
        assert_eq!(scores, HeuristicModel::score(&mk_extreme_features()));
    }

    #[test]
    fn predictor_falls_back_when_files_missing() {
        let config = MlConfig {
            model_path: Some("/nonexistent/model.json".into()),
            scaler_path: Some("/nonexistent/scaler.json".into()),
            ..MlConfig::default()
        };
        let predictor = Predictor::load(&config);
        assert!(!predictor.is_trained());
    }

    #[test]
    fn predictor_uses_trained_model_when_files_load() {
        let dir = std::env::temp_dir().join(format!(
            "hrv_monitor_test_{:?}",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let model_path = dir.join("model.json");
        let scaler_path = dir.join("scaler.json");

        let mut coefficients = [[0.0; N_FEATURES]; 3];
        coefficients[0][0] = 1.0; // stress = mean_hr (scaled)
        let model_json = serde_json::json!({
            "coefficients": coefficients,
            "intercepts": [5.0, 10.0, 15.0],
        });
        let zero_mean = [0.0; N_FEATURES];
        let unit_scale = [1.0; N_FEATURES];
        let scaler_json = serde_json::json!({
            "mean": zero_mean,
            "scale": unit_scale,
        });
        write!(std::fs::File::create(&model_path).unwrap(), "{}", model_json).unwrap();
        write!(std::fs::File::create(&scaler_path).unwrap(), "{}", scaler_json).unwrap();

        let config = MlConfig {
            model_path: Some(model_path.to_string_lossy().into_owned()),
            scaler_path: Some(scaler_path.to_string_lossy().into_owned()),
            ..MlConfig::default()
        };
        let predictor = Predictor::load(&config);
        assert!(predictor.is_trained());

        let features = mk_extreme_features();
        let (scores, err) = predictor.predict(&features);
        assert!(err.is_none());
        assert!((scores.stress - clamp(features.mean_hr + 5.0, 0.0, 100.0)).abs() < 1e-9);
        assert_eq!(scores.cognitive_load, 10.0);
        assert_eq!(scores.fatigue, 15.0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
