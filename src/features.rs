//! HRV feature extraction: time-domain, frequency-domain (Welch PSD) and
//! nonlinear (Poincaré) metrics, grounded on `app/features/hrv_features.py`.
//!
//! The Welch periodogram implementation follows the FFT-segment-and-average
//! shape used for spectral estimation in
//! `examples/jeffrydegrande-voicevo/src/dsp/cpps.rs`, adapted from a
//! single-FFT CPP estimate to a multi-segment averaged PSD.

use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

use crate::config::{InterpolationMethod, SignalConfig};
use crate::error::CoreError;
use crate::types::HrvFeatures;

const LF_LOW_HZ: f64 = 0.04;
const LF_HIGH_HZ: f64 = 0.15;
const HF_HIGH_HZ: f64 = 0.40;
const RESAMPLE_HZ: f64 = 4.0;
const MIN_DURATION_SEC: f64 = 10.0;
const MIN_SAMPLES: usize = 4;
const MAX_SEGMENT_LEN: usize = 256;

pub struct FeatureExtractor<'a> {
    config: &'a SignalConfig,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(config: &'a SignalConfig) -> Self {
        Self { config }
    }

    /// Compute the full feature set from a cleaned, gap-filled RR series
    /// (milliseconds) and the quality ratio the cleaner reported for it.
    pub fn extract(&self, rr_ms: &[f64], quality_ratio: f64) -> HrvFeatures {
        if rr_ms.len() < MIN_SAMPLES {
            return HrvFeatures::empty(quality_ratio, rr_ms.len());
        }

        let (mean_rr, mean_hr, sdnn, rmssd, sdsd, pnn50, cv_rr) = time_domain(rr_ms);
        let (sd1, sd2, sd_ratio) = nonlinear(rr_ms);

        let duration_sec: f64 = rr_ms.iter().sum::<f64>() / 1000.0;
        let (lf_power, hf_power, lf_hf_ratio, total_power) = if duration_sec < MIN_DURATION_SEC {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            match self.frequency_domain(rr_ms) {
                Ok(bands) => bands,
                Err(err) => {
                    tracing::warn!(%err, "PSD computation failed, zeroing frequency-domain block");
                    (0.0, 0.0, 0.0, 0.0)
                }
            }
        };

        HrvFeatures {
            mean_hr,
            mean_rr,
            sdnn,
            rmssd,
            pnn50,
            sdsd,
            cv_rr,
            lf_power,
            hf_power,
            lf_hf_ratio,
            total_power,
            sd1,
            sd2,
            sd_ratio,
            quality_ratio,
            sample_count: rr_ms.len(),
        }
    }

    /// Resample, window, and integrate the Welch PSD into LF/HF band power.
    /// Returns `Err(CoreError::PsdFailed)` instead of propagating a NaN/Inf
    /// reading — per §9's "report NaN as 0, never propagate" policy — so the
    /// caller can zero this block and keep the rest of the feature vector.
    fn frequency_domain(&self, rr_ms: &[f64]) -> Result<(f64, f64, f64, f64), CoreError> {
        let resampled = resample_uniform(rr_ms, RESAMPLE_HZ, self.config.interpolation_method);
        if resampled.len() < 8 {
            return Ok((0.0, 0.0, 0.0, 0.0));
        }

        let mean: f64 = resampled.iter().sum::<f64>() / resampled.len() as f64;
        let centered: Vec<f64> = resampled.iter().map(|v| v - mean).collect();

        let (freqs, psd) = welch_psd(&centered, RESAMPLE_HZ);
        let lf_power = trapz_band(&freqs, &psd, LF_LOW_HZ, LF_HIGH_HZ);
        let hf_power = trapz_band(&freqs, &psd, LF_HIGH_HZ, HF_HIGH_HZ);
        let total_power = lf_power + hf_power;
        let lf_hf_ratio = if hf_power > 1e-12 { lf_power / hf_power } else { 0.0 };

        if ![lf_power, hf_power, total_power, lf_hf_ratio].iter().all(|v| v.is_finite()) {
            return Err(CoreError::PsdFailed("non-finite PSD band power".into()));
        }

        Ok((lf_power, hf_power, lf_hf_ratio, total_power))
    }
}

fn time_domain(rr_ms: &[f64]) -> (f64, f64, f64, f64, f64, f64, f64) {
    let n = rr_ms.len() as f64;
    let mean_rr = rr_ms.iter().sum::<f64>() / n;
    let mean_hr = if mean_rr > 0.0 { 60000.0 / mean_rr } else { 0.0 };

    let variance = rr_ms.iter().map(|v| (v - mean_rr).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    let sdnn = variance.sqrt();

    let diffs: Vec<f64> = rr_ms.windows(2).map(|w| w[1] - w[0]).collect();
    let rmssd = if diffs.is_empty() {
        0.0
    } else {
        (diffs.iter().map(|d| d.powi(2)).sum::<f64>() / diffs.len() as f64).sqrt()
    };

    let sdsd = if diffs.len() < 2 {
        0.0
    } else {
        let mean_diff = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let diff_var = diffs.iter().map(|d| (d - mean_diff).powi(2)).sum::<f64>()
            / (diffs.len() as f64 - 1.0);
        diff_var.sqrt()
    };

    let pnn50 = if diffs.is_empty() {
        0.0
    } else {
        let over_50 = diffs.iter().filter(|d| d.abs() > 50.0).count();
        100.0 * over_50 as f64 / diffs.len() as f64
    };

    let cv_rr = if mean_rr > 0.0 { sdnn / mean_rr } else { 0.0 };

    (mean_rr, mean_hr, sdnn, rmssd, sdsd, pnn50, cv_rr)
}

fn nonlinear(rr_ms: &[f64]) -> (f64, f64, f64) {
    let diffs: Vec<f64> = rr_ms.windows(2).map(|w| w[1] - w[0]).collect();
    if diffs.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mean_diff = diffs.iter().sum::<f64>() / diffs.len() as f64;
    let diff_variance = diffs.iter().map(|d| (d - mean_diff).powi(2)).sum::<f64>()
        / (diffs.len() as f64 - 1.0).max(1.0);
    let sd1 = (diff_variance / 2.0).sqrt();

    let sums: Vec<f64> = rr_ms.windows(2).map(|w| w[1] + w[0]).collect();
    let mean_sum = sums.iter().sum::<f64>() / sums.len() as f64;
    let sum_variance = sums.iter().map(|s| (s - mean_sum).powi(2)).sum::<f64>()
        / (sums.len() as f64 - 1.0).max(1.0);
    let sd2 = (sum_variance / 2.0).sqrt();

    let sd_ratio = if sd2 > 1e-12 { sd1 / sd2 } else { 0.0 };

    (sd1, sd2, sd_ratio)
}

/// Resample an RR-interval series (ms) onto a uniform time grid at
/// `target_hz`, using the cumulative sum of intervals as the time axis.
fn resample_uniform(rr_ms: &[f64], target_hz: f64, method: InterpolationMethod) -> Vec<f64> {
    let mut t = Vec::with_capacity(rr_ms.len());
    let mut acc = 0.0;
    for &rr in rr_ms {
        acc += rr / 1000.0;
        t.push(acc);
    }
    let duration = *t.last().unwrap();
    if duration <= 0.0 {
        return Vec::new();
    }

    let step = 1.0 / target_hz;
    let n_samples = (duration / step).floor() as usize;
    let mut grid = Vec::with_capacity(n_samples);
    let mut time = 0.0;
    for _ in 0..n_samples {
        grid.push(interp_at(time, &t, rr_ms, method));
        time += step;
    }
    grid
}

fn interp_at(x: f64, t: &[f64], y: &[f64], method: InterpolationMethod) -> f64 {
    if x <= t[0] {
        return y[0];
    }
    if x >= *t.last().unwrap() {
        return *y.last().unwrap();
    }

    let pos = t.partition_point(|&v| v <= x);
    let lo = pos - 1;
    let hi = pos;

    match method {
        InterpolationMethod::Linear => {
            let frac = (x - t[lo]) / (t[hi] - t[lo]);
            y[lo] + frac * (y[hi] - y[lo])
        }
        InterpolationMethod::Cubic => cubic_interp(x, t, y, lo, hi),
    }
}

/// Catmull-Rom cubic interpolation over the neighbourhood of `[lo, hi]`,
/// falling back to the straddling control points at the series boundary.
fn cubic_interp(x: f64, t: &[f64], y: &[f64], lo: usize, hi: usize) -> f64 {
    let p0 = if lo == 0 { lo } else { lo - 1 };
    let p3 = if hi + 1 >= t.len() { hi } else { hi + 1 };

    let (t0, t1, t2, t3) = (t[p0], t[lo], t[hi], t[p3]);
    let (y0, y1, y2, y3) = (y[p0], y[lo], y[hi], y[p3]);

    let span = t2 - t1;
    if span <= 0.0 {
        return y1;
    }
    let frac = (x - t1) / span;

    let m1 = if t2 - t0 > 0.0 { (y2 - y0) / (t2 - t0) } else { 0.0 } * span;
    let m2 = if t3 - t1 > 0.0 { (y3 - y1) / (t3 - t1) } else { 0.0 } * span;

    let f2 = frac * frac;
    let f3 = f2 * frac;
    let h00 = 2.0 * f3 - 3.0 * f2 + 1.0;
    let h10 = f3 - 2.0 * f2 + frac;
    let h01 = -2.0 * f3 + 3.0 * f2;
    let h11 = f3 - f2;

    h00 * y1 + h10 * m1 + h01 * y2 + h11 * m2
}

/// Welch power spectral density: segment the signal, apply a Hann window,
/// FFT each segment, average the periodograms across 50%-overlapping
/// segments.
fn welch_psd(signal: &[f64], fs: f64) -> (Vec<f64>, Vec<f64>) {
    let segment_len = signal.len().min(MAX_SEGMENT_LEN);
    let step = (segment_len / 2).max(1);

    let window: Vec<f64> = (0..segment_len)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (segment_len as f64 - 1.0)).cos())
        })
        .collect();
    let window_power: f64 = window.iter().map(|w| w * w).sum();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(segment_len);

    let n_bins = segment_len / 2 + 1;
    let mut psd_sum = vec![0.0f64; n_bins];
    let mut n_segments = 0usize;

    let mut start = 0;
    while start + segment_len <= signal.len() {
        let mut buf: Vec<Complex64> = signal[start..start + segment_len]
            .iter()
            .zip(window.iter())
            .map(|(&s, &w)| Complex64::new(s * w, 0.0))
            .collect();
        fft.process(&mut buf);

        for (bin, slot) in psd_sum.iter_mut().enumerate().take(n_bins) {
            let mag2 = buf[bin].norm_sqr();
            *slot += mag2 / (fs * window_power);
        }
        n_segments += 1;
        start += step;
    }

    if n_segments == 0 {
        return (Vec::new(), Vec::new());
    }

    let psd: Vec<f64> = psd_sum.iter().map(|v| v / n_segments as f64).collect();
    let freqs: Vec<f64> = (0..n_bins)
        .map(|i| i as f64 * fs / segment_len as f64)
        .collect();
    (freqs, psd)
}

/// Trapezoidal integration of `psd` over `[low, high)` Hz.
fn trapz_band(freqs: &[f64], psd: &[f64], low: f64, high: f64) -> f64 {
    if freqs.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..freqs.len() - 1 {
        let (f0, f1) = (freqs[i], freqs[i + 1]);
        if f1 < low || f0 >= high {
            continue;
        }
        total += 0.5 * (psd[i] + psd[i + 1]) * (f1 - f0);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> SignalConfig {
        SignalConfig::default()
    }

    #[test]
    fn fewer_than_four_samples_yields_empty_features() {
        let config = default_config();
        let extractor = FeatureExtractor::new(&config);
        let features = extractor.extract(&[800.0, 810.0, 790.0], 1.0);
        assert_eq!(features.mean_hr, 0.0);
        assert_eq!(features.sample_count, 3);
    }

    #[test]
    fn short_window_skips_frequency_domain() {
        let config = default_config();
        let extractor = FeatureExtractor::new(&config);
        // 8 samples at 800ms = 6.4s, below the 10s floor.
        let rr = vec![800.0; 8];
        let features = extractor.extract(&rr, 1.0);
        assert_eq!(features.lf_power, 0.0);
        assert_eq!(features.hf_power, 0.0);
        assert_eq!(features.lf_hf_ratio, 0.0);
        assert!(features.mean_hr > 0.0);
    }

    #[test]
    fn constant_rr_series_has_zero_variability() {
        let config = default_config();
        let extractor = FeatureExtractor::new(&config);
        let rr = vec![800.0; 20];
        let features = extractor.extract(&rr, 1.0);
        assert!((features.sdnn).abs() < 1e-9);
        assert!((features.rmssd).abs() < 1e-9);
        assert!((features.pnn50).abs() < 1e-9);
        assert!((features.mean_hr - 75.0).abs() < 1e-6);
    }

    #[test]
    fn mean_hr_matches_mean_rr_conversion() {
        let config = default_config();
        let extractor = FeatureExtractor::new(&config);
        let rr = vec![1000.0; 15];
        let features = extractor.extract(&rr, 1.0);
        assert!((features.mean_hr - 60.0).abs() < 1e-6);
        assert!((features.mean_rr - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn variable_rr_series_produces_nonzero_frequency_power() {
        let config = default_config();
        let extractor = FeatureExtractor::new(&config);
        // 40 samples with a slow oscillation, ~32s duration.
        let rr: Vec<f64> = (0..40)
            .map(|i| 800.0 + 40.0 * (i as f64 * 0.3).sin())
            .collect();
        let features = extractor.extract(&rr, 1.0);
        assert!(features.total_power >= 0.0);
        assert!(features.sd1 >= 0.0);
        assert!(features.sd2 >= 0.0);
    }

    #[test]
    fn sd2_stays_finite_on_alternating_rr_series() {
        let config = default_config();
        let extractor = FeatureExtractor::new(&config);
        let rr = vec![800.0, 400.0, 800.0, 400.0, 800.0, 400.0];
        let features = extractor.extract(&rr, 1.0);
        assert!(features.sd2.is_finite());
        assert!(features.sd2 >= 0.0);
    }

    #[test]
    fn sd2_matches_direct_sum_series_formula() {
        // rr[i+1] + rr[i] sums: 1200, 1400, 1200, 1400 -> Bessel std / sqrt(2).
        let rr = vec![800.0, 400.0, 1000.0, 200.0, 1200.0];
        let (sd1, sd2, sd_ratio) = super::nonlinear(&rr);
        let sums = [1200.0_f64, 1400.0, 1200.0, 1400.0];
        let mean_sum = sums.iter().sum::<f64>() / sums.len() as f64;
        let sum_var = sums.iter().map(|s| (s - mean_sum).powi(2)).sum::<f64>() / (sums.len() as f64 - 1.0);
        let expected_sd2 = (sum_var / 2.0).sqrt();
        assert!((sd2 - expected_sd2).abs() < 1e-9);
        assert!((sd_ratio - sd1 / sd2).abs() < 1e-9);
    }
}
