//! Heart-rate estimation
//!
//! ## Strategies
//! - `PeakIntervalEstimator` - beats from a `PeakDetector`, mean in-band rate
//! - `consensus_bpm` - pairwise agreement across up to three sensors
//! - `SpectralEstimator` - single-segment Welch PSD with neighbour-bin refinement
//! - `mean_valid_hr` - ground-truth HR traces filtered by `min_valid_hr`

mod consensus;
mod peaks;
mod spectral;

pub use consensus::{consensus_bpm, UNKNOWN_BPM};
pub use peaks::{
    instantaneous_rates, mean_rate_in_band, LocalMaximaDetector, PeakDetector, PeakEstimate,
    PeakIntervalEstimator,
};
pub use spectral::{dominant_frequency, normalize, welch_single_segment, Psd, SpectralEstimator, WELCH_OVERLAP};

use crate::config::HrConfig;

/// Mean of the HR values passing `min_valid_hr`, `None` if none do.
pub fn mean_valid_hr(values: &[f64], config: &HrConfig) -> Option<f64> {
    let kept = config.filter_hr_values(values);
    if kept.is_empty() {
        return None;
    }
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_valid_hr() {
        let mut config = HrConfig::default();
        assert_relative_eq!(mean_valid_hr(&[60.0, 80.0], &config).unwrap(), 70.0);
        assert_eq!(mean_valid_hr(&[], &config), None);

        config.min_valid_hr = Some(65.0);
        assert_relative_eq!(mean_valid_hr(&[60.0, 80.0, 70.0], &config).unwrap(), 75.0);
        assert_eq!(mean_valid_hr(&[10.0, 20.0], &config), None);
    }
}
