//! Time ↔ index mapping strategies.
//!
//! `Regular` streams map with arithmetic (`time = index / frequency`),
//! `Irregular` streams carry an ascending timestamp table and search it.

use std::rc::Rc;

use super::Alignment;
use crate::error::{LoaderError, Result};

/// Products of `time * frequency` this close to an integer count as exact ties.
const TIE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum TimeBase {
    Regular { frequency: f64, frame_count: usize },
    Irregular { timestamps: Rc<[f64]> },
}

impl TimeBase {
    pub fn regular(frequency: f64, frame_count: usize) -> Result<Self> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(LoaderError::InvalidArgument(format!(
                "sample frequency must be positive, got {}",
                frequency
            )));
        }
        Ok(Self::Regular {
            frequency,
            frame_count,
        })
    }

    /// Builds an irregular time base. Timestamps must be non-decreasing.
    pub fn irregular(timestamps: impl Into<Rc<[f64]>>) -> Result<Self> {
        let timestamps = timestamps.into();
        if let Some(pos) = timestamps.windows(2).position(|w| !(w[0] <= w[1])) {
            return Err(LoaderError::DataConsistency(format!(
                "timestamps not ascending at index {}: {} then {}",
                pos,
                timestamps[pos],
                timestamps[pos + 1]
            )));
        }
        Ok(Self::Irregular { timestamps })
    }

    pub fn frame_count(&self) -> usize {
        match self {
            Self::Regular { frame_count, .. } => *frame_count,
            Self::Irregular { timestamps } => timestamps.len(),
        }
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, Self::Regular { .. })
    }

    /// Exact time of `index`.
    pub fn time_of(&self, index: usize) -> Result<f64> {
        let len = self.frame_count();
        if index >= len {
            return Err(LoaderError::IndexOutOfRange { index, len });
        }
        Ok(match self {
            Self::Regular { frequency, .. } => index as f64 / frequency,
            Self::Irregular { timestamps } => timestamps[index],
        })
    }

    /// Inverse mapping.
    ///
    /// `Left` yields the latest frame at or before `time` (`None` before the
    /// first frame, last index past the end). `Right` yields the earliest
    /// frame at or after `time` (0 before the first frame, `None` past the end).
    pub fn index_of(&self, time: f64, alignment: Alignment) -> Option<usize> {
        match self {
            Self::Regular {
                frequency,
                frame_count,
            } => regular_index_of(*frequency, *frame_count, time, alignment),
            Self::Irregular { timestamps } => irregular_index_of(timestamps, time, alignment),
        }
    }

    /// Nominal sampling rate. Irregular streams report `(n - 1) / span`,
    /// or 0 when fewer than two distinct timestamps exist.
    pub fn sample_frequency(&self) -> f64 {
        match self {
            Self::Regular { frequency, .. } => *frequency,
            Self::Irregular { timestamps } => {
                let n = timestamps.len();
                if n < 2 {
                    return 0.0;
                }
                let span = timestamps[n - 1] - timestamps[0];
                if span > 0.0 {
                    (n - 1) as f64 / span
                } else {
                    0.0
                }
            }
        }
    }

    /// Timestamp table for irregular streams.
    pub fn timestamps(&self) -> Option<Rc<[f64]>> {
        match self {
            Self::Irregular { timestamps } => Some(Rc::clone(timestamps)),
            Self::Regular { .. } => None,
        }
    }
}

fn regular_index_of(
    frequency: f64,
    frame_count: usize,
    time: f64,
    alignment: Alignment,
) -> Option<usize> {
    if frame_count == 0 {
        return None;
    }
    let approx = time * frequency;
    if !approx.is_finite() {
        return None;
    }
    let last = (frame_count - 1) as f64;

    let nearest = approx.round();
    let position = if (approx - nearest).abs() <= TIE_TOLERANCE * nearest.abs().max(1.0) {
        Some(nearest)
    } else {
        None
    };

    match alignment {
        Alignment::Left => {
            let index = position.unwrap_or_else(|| approx.floor());
            if index < 0.0 {
                None
            } else if index >= last {
                Some(frame_count - 1)
            } else {
                Some(index as usize)
            }
        }
        Alignment::Right => {
            let index = position.unwrap_or_else(|| approx.ceil());
            if index <= 0.0 {
                Some(0)
            } else if index > last {
                None
            } else {
                Some(index as usize)
            }
        }
    }
}

fn irregular_index_of(timestamps: &[f64], time: f64, alignment: Alignment) -> Option<usize> {
    let length = timestamps.len();
    if length == 0 {
        return None;
    }

    let first_ts = timestamps[0];
    let last_ts = timestamps[length - 1];

    if first_ts > time {
        return match alignment {
            Alignment::Left => None,
            Alignment::Right => Some(0),
        };
    }
    if last_ts < time {
        return match alignment {
            Alignment::Left => Some(length - 1),
            Alignment::Right => None,
        };
    }
    if length == 1 {
        return (time == first_ts).then_some(0);
    }

    for i in 0..length - 1 {
        let t1 = timestamps[i];
        let t2 = timestamps[i + 1];
        if time == t1 {
            return Some(i);
        } else if time == t2 {
            return Some(i + 1);
        } else if t1 <= time && time <= t2 {
            return match alignment {
                Alignment::Left => Some(i),
                Alignment::Right => Some(i + 1),
            };
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn irregular(ts: &[f64]) -> TimeBase {
        TimeBase::irregular(ts.to_vec()).unwrap()
    }

    #[test]
    fn test_regular_time_of() {
        let tb = TimeBase::regular(30.0, 90).unwrap();
        assert_relative_eq!(tb.time_of(0).unwrap(), 0.0);
        assert_relative_eq!(tb.time_of(45).unwrap(), 1.5);
        assert!(matches!(
            tb.time_of(90),
            Err(LoaderError::IndexOutOfRange { index: 90, len: 90 })
        ));
    }

    #[test]
    fn test_regular_floor_and_ceil() {
        let tb = TimeBase::regular(10.0, 100).unwrap();
        assert_eq!(tb.index_of(0.55, Alignment::Left), Some(5));
        assert_eq!(tb.index_of(0.55, Alignment::Right), Some(6));
        assert_eq!(tb.index_of(0.5, Alignment::Left), Some(5));
        assert_eq!(tb.index_of(0.5, Alignment::Right), Some(5));
    }

    #[test]
    fn test_regular_snaps_rounding_noise_to_ties() {
        let tb = TimeBase::regular(10.0, 100).unwrap();
        // 0.1 + 0.2 lands a hair above 0.3
        let t = 0.1 + 0.2;
        assert!(t * 10.0 > 3.0);
        assert_eq!(tb.index_of(t, Alignment::Left), Some(3));
        assert_eq!(tb.index_of(t, Alignment::Right), Some(3));
        // a genuine offset is not snapped
        assert_eq!(tb.index_of(0.3001, Alignment::Right), Some(4));
    }

    #[test]
    fn test_regular_out_of_range() {
        let tb = TimeBase::regular(10.0, 100).unwrap();
        assert_eq!(tb.index_of(-0.05, Alignment::Left), None);
        assert_eq!(tb.index_of(-0.05, Alignment::Right), Some(0));
        assert_eq!(tb.index_of(50.0, Alignment::Left), Some(99));
        assert_eq!(tb.index_of(50.0, Alignment::Right), None);
    }

    #[test]
    fn test_regular_rejects_bad_frequency() {
        assert!(TimeBase::regular(0.0, 10).is_err());
        assert!(TimeBase::regular(f64::NAN, 10).is_err());
    }

    #[test]
    fn test_irregular_bracketing() {
        let tb = irregular(&[0.0, 0.04, 0.1, 0.13, 0.2]);
        assert_eq!(tb.index_of(0.07, Alignment::Left), Some(1));
        assert_eq!(tb.index_of(0.07, Alignment::Right), Some(2));
        assert_eq!(tb.index_of(0.13, Alignment::Left), Some(3));
        assert_eq!(tb.index_of(0.13, Alignment::Right), Some(3));
    }

    #[test]
    fn test_irregular_out_of_range() {
        let tb = irregular(&[1.0, 1.5, 2.5]);
        assert_eq!(tb.index_of(0.5, Alignment::Left), None);
        assert_eq!(tb.index_of(0.5, Alignment::Right), Some(0));
        assert_eq!(tb.index_of(3.0, Alignment::Left), Some(2));
        assert_eq!(tb.index_of(3.0, Alignment::Right), None);
    }

    #[test]
    fn test_irregular_empty_and_single() {
        let empty = irregular(&[]);
        assert_eq!(empty.index_of(0.0, Alignment::Left), None);
        assert_eq!(empty.index_of(0.0, Alignment::Right), None);

        let single = irregular(&[2.0]);
        assert_eq!(single.index_of(2.0, Alignment::Left), Some(0));
        assert_eq!(single.index_of(2.0, Alignment::Right), Some(0));
    }

    #[test]
    fn test_irregular_rejects_descending() {
        assert!(matches!(
            TimeBase::irregular(vec![0.0, 0.2, 0.1]),
            Err(LoaderError::DataConsistency(_))
        ));
    }

    #[test]
    fn test_sample_frequency() {
        assert_relative_eq!(TimeBase::regular(128.0, 5).unwrap().sample_frequency(), 128.0);
        assert_relative_eq!(irregular(&[0.0, 0.5, 1.0]).sample_frequency(), 2.0);
        assert_relative_eq!(irregular(&[0.0]).sample_frequency(), 0.0);
    }

    proptest! {
        #[test]
        fn test_regular_round_trip(frequency in 1.0f64..1000.0, count in 1usize..2000) {
            let tb = TimeBase::regular(frequency, count).unwrap();
            for i in 0..count {
                let t = tb.time_of(i).unwrap();
                prop_assert_eq!(t, i as f64 / frequency);
                prop_assert_eq!(tb.index_of(t, Alignment::Left), Some(i));
                prop_assert_eq!(tb.index_of(t, Alignment::Right), Some(i));
            }
        }

        #[test]
        fn test_irregular_between_entries(
            gaps in proptest::collection::vec(0.001f64..1.0, 2..50),
            frac in 0.01f64..0.99,
        ) {
            let mut ts = Vec::with_capacity(gaps.len());
            let mut acc = 0.0;
            for g in &gaps {
                acc += g;
                ts.push(acc);
            }
            let tb = TimeBase::irregular(ts.clone()).unwrap();
            for i in 0..ts.len() - 1 {
                let t = ts[i] + (ts[i + 1] - ts[i]) * frac;
                if t > ts[i] && t < ts[i + 1] {
                    prop_assert_eq!(tb.index_of(t, Alignment::Left), Some(i));
                    prop_assert_eq!(tb.index_of(t, Alignment::Right), Some(i + 1));
                }
            }
            prop_assert_eq!(tb.index_of(ts[0] - 0.5, Alignment::Left), None);
            prop_assert_eq!(tb.index_of(ts[0] - 0.5, Alignment::Right), Some(0));
            let last = ts.len() - 1;
            prop_assert_eq!(tb.index_of(ts[last] + 0.5, Alignment::Left), Some(last));
            prop_assert_eq!(tb.index_of(ts[last] + 0.5, Alignment::Right), None);
        }
    }
}
