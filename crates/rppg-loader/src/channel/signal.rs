//! Regularly sampled scalar channels (ECG leads, PPG, HR traces).

use std::rc::Rc;

use crate::error::{LoaderError, Result};
use crate::memo::Memo;
use crate::stream::{FrameData, FrameSource, TimeBase};

/// Produces the full sample array of one signal.
pub trait SignalReader {
    fn read_samples(&self) -> Result<Vec<f64>>;
}

impl<F> SignalReader for F
where
    F: Fn() -> Result<Vec<f64>>,
{
    fn read_samples(&self) -> Result<Vec<f64>> {
        self()
    }
}

struct Preloaded(Rc<[f64]>);

impl SignalReader for Preloaded {
    fn read_samples(&self) -> Result<Vec<f64>> {
        Ok(self.0.to_vec())
    }
}

/// Signal channel source. Samples are read once on first access and kept
/// until [`purge`](FrameSource::purge).
pub struct SignalSource {
    reader: Box<dyn SignalReader>,
    frequency: f64,
    expected_frames: Option<usize>,
    sync_offset: f64,
    samples: Memo<Rc<[f64]>>,
}

impl SignalSource {
    pub fn new(reader: impl SignalReader + 'static, frequency: f64) -> Self {
        Self {
            reader: Box::new(reader),
            frequency,
            expected_frames: None,
            sync_offset: 0.0,
            samples: Memo::new(),
        }
    }

    pub fn from_samples(samples: Vec<f64>, frequency: f64) -> Self {
        Self::new(Preloaded(samples.into()), frequency)
    }

    /// Requires the signal to have exactly `frames` samples, typically the
    /// frame count of the video recorded alongside it.
    pub fn with_expected_frames(mut self, frames: Option<usize>) -> Self {
        self.expected_frames = frames;
        self
    }

    pub fn with_sync_offset(mut self, offset: f64) -> Self {
        self.sync_offset = offset;
        self
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn samples(&self) -> Result<Rc<[f64]>> {
        self.samples.get_or_try_init(|| {
            let samples = self.reader.read_samples()?;
            if let Some(expected) = self.expected_frames {
                if samples.len() != expected {
                    return Err(LoaderError::DataConsistency(format!(
                        "signal has {} samples but video has {} frames",
                        samples.len(),
                        expected
                    )));
                }
            }
            Ok(samples.into())
        })
    }
}

impl FrameSource for SignalSource {
    fn time_base(&self) -> Result<TimeBase> {
        TimeBase::regular(self.frequency, self.samples()?.len())
    }

    fn load(&self, start: usize, count: usize) -> Result<Vec<FrameData>> {
        let samples = self.samples()?;
        let window = samples
            .get(start..start + count)
            .ok_or(LoaderError::IndexOutOfRange {
                index: start + count,
                len: samples.len(),
            })?;
        Ok(window.iter().copied().map(FrameData::Sample).collect())
    }

    fn sync_offset(&self) -> Result<f64> {
        Ok(self.sync_offset)
    }

    fn purge(&self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_parity_mismatch_is_data_consistency() {
        let source = SignalSource::from_samples(vec![0.0; 9], 30.0).with_expected_frames(Some(10));
        let err = source.time_base().unwrap_err();
        assert!(err.is_data_consistency());

        let source = SignalSource::from_samples(vec![0.0; 10], 30.0).with_expected_frames(Some(10));
        assert_eq!(source.time_base().unwrap().frame_count(), 10);
    }

    #[test]
    fn test_reader_called_once_until_purge() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let source = SignalSource::new(
            move || {
                counter.set(counter.get() + 1);
                Ok(vec![1.0, 2.0, 3.0])
            },
            1.0,
        );

        assert_eq!(source.load(1, 2).unwrap(), vec![FrameData::Sample(2.0), FrameData::Sample(3.0)]);
        source.load(0, 1).unwrap();
        assert_eq!(calls.get(), 1);

        source.purge();
        source.load(0, 1).unwrap();
        assert_eq!(calls.get(), 2);
    }
}
