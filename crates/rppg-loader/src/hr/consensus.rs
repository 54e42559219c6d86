//! Multi-sensor agreement.

use crate::error::{LoaderError, Result};

/// Sentinel for "no usable estimate". Never a measurement.
pub const UNKNOWN_BPM: f64 = 0.0;

/// Estimates whose integer part is zero (or that are not finite) carry no
/// information.
fn is_informative(bpm: f64) -> bool {
    bpm.is_finite() && bpm.trunc() != 0.0
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Combines up to three per-sensor rates into one.
///
/// Uninformative estimates are dropped first. One survivor is returned as
/// is; two are averaged when they differ by less than `tolerance_bpm`,
/// otherwise the lower wins. With three, only the 1↔2 and 2↔3 pairs are
/// compared: both agreeing averages all three, a single agreeing pair is
/// averaged, and no agreement falls back to the median. Sensors 1 and 3 are
/// never compared with each other.
pub fn consensus_bpm(estimates: &[f64], tolerance_bpm: f64) -> Result<f64> {
    let rates: Vec<f64> = estimates.iter().copied().filter(|r| is_informative(*r)).collect();
    let agree = |a: f64, b: f64| (a - b).abs() < tolerance_bpm;

    match rates.as_slice() {
        [] => Ok(UNKNOWN_BPM),
        [only] => Ok(*only),
        [a, b] => {
            if agree(*a, *b) {
                Ok(mean(&rates))
            } else {
                Ok(a.min(*b))
            }
        }
        [a, b, c] => Ok(match (agree(*a, *b), agree(*b, *c)) {
            (true, true) => mean(&rates),
            (true, false) => mean(&[*a, *b]),
            (false, true) => mean(&[*b, *c]),
            (false, false) => {
                let mut sorted = [*a, *b, *c];
                sorted.sort_by(|x, y| x.total_cmp(y));
                sorted[1]
            }
        }),
        _ => Err(LoaderError::Contract(format!(
            "consensus is defined for at most 3 sensors, got {}",
            rates.len()
        ))),
    }
}
