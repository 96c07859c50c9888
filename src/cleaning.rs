//! PPI (pulse-to-pulse interval) cleaning and artifact removal.
//!
//! Applies physiological range filtering and successive-difference checks to
//! remove ectopic beats and motion artifacts, grounded on
//! `app/signal/ppi_cleaning.py`.

use crate::config::{InterpolationMethod, SignalConfig};
use crate::types::CleanedPpi;

pub struct PpiCleaner<'a> {
    config: &'a SignalConfig,
}

impl<'a> PpiCleaner<'a> {
    pub fn new(config: &'a SignalConfig) -> Self {
        Self { config }
    }

    pub fn clean(&self, ppi_ms: &[u16], timestamps: &[f64]) -> CleanedPpi {
        let n_original = ppi_ms.len();
        if n_original == 0 {
            return CleanedPpi {
                timestamps: Vec::new(),
                intervals_ms: Vec::new(),
                mask_valid: Vec::new(),
                quality_ratio: 0.0,
                n_original: 0,
                n_removed: 0,
            };
        }

        let ppi: Vec<f64> = ppi_ms.iter().map(|&v| v as f64).collect();
        let min = self.config.min_ppi_ms as f64;
        let max = self.config.max_ppi_ms as f64;

        // 1. Physiological range filter.
        let mut mask: Vec<bool> = ppi.iter().map(|&v| v >= min && v <= max).collect();

        // 2. Successive-difference filter: pair-invalidate ectopic neighbours.
        if ppi.len() > 1 {
            for i in 0..ppi.len() - 1 {
                let diff_ratio = (ppi[i + 1] - ppi[i]).abs() / ppi[i];
                if diff_ratio > self.config.max_ppi_diff_ratio {
                    mask[i] = false;
                    mask[i + 1] = false;
                }
            }
        }

        let n_valid = mask.iter().filter(|&&v| v).count();
        let n_removed = n_original - n_valid;
        let quality_ratio = n_valid as f64 / n_original as f64;

        if quality_ratio < self.config.min_quality_ratio {
            tracing::warn!(
                valid = n_valid,
                total = n_original,
                quality_ratio,
                "low quality PPI segment"
            );
        }

        CleanedPpi {
            timestamps: timestamps.to_vec(),
            intervals_ms: ppi,
            mask_valid: mask,
            quality_ratio,
            n_original,
            n_removed,
        }
    }

    /// Replace invalid indices by interpolation against the valid subset.
    /// Linear over the index axis is the contractual default; cubic is a
    /// permitted variant for the RR time series used by the PSD block
    /// (§9 Open Questions, item 1) but the cleaner's own gap-fill always
    /// uses linear regardless of `interpolation_method`, matching the
    /// Python reference's unconditional `np.interp`.
    pub fn interpolate(&self, cleaned: &CleanedPpi) -> Vec<f64> {
        if cleaned.n_original == 0 || cleaned.mask_valid.iter().all(|&v| v) {
            return cleaned.intervals_ms.clone();
        }

        let valid_idx: Vec<usize> = cleaned
            .mask_valid
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .map(|(i, _)| i)
            .collect();

        if valid_idx.len() < 2 {
            return cleaned.intervals_ms.clone();
        }

        let mut result = cleaned.intervals_ms.clone();
        for (i, valid) in cleaned.mask_valid.iter().enumerate() {
            if !valid {
                result[i] = linear_interp_at(i, &valid_idx, &cleaned.intervals_ms);
            }
        }
        result
    }
}

/// Linear interpolation of `series[valid_idx]` evaluated at index `x`,
/// extrapolating with the nearest valid endpoint outside the valid range —
/// the behaviour of `numpy.interp`.
fn linear_interp_at(x: usize, valid_idx: &[usize], series: &[f64]) -> f64 {
    let x = x as f64;

    if x <= valid_idx[0] as f64 {
        return series[valid_idx[0]];
    }
    if x >= *valid_idx.last().unwrap() as f64 {
        return series[*valid_idx.last().unwrap()];
    }

    let pos = valid_idx.partition_point(|&idx| (idx as f64) <= x);
    let lo = valid_idx[pos - 1];
    let hi = valid_idx[pos];
    let t = (x - lo as f64) / (hi as f64 - lo as f64);
    series[lo] + t * (series[hi] - series[lo])
}

/// Whether the cleaner's gap-fill stage is configured for cubic vs linear
/// resampling of the RR time series downstream in the PSD block (§9).
pub fn psd_uses_cubic(config: &SignalConfig) -> bool {
    matches!(config.interpolation_method, InterpolationMethod::Cubic)
}
