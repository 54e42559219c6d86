//! Frame streams
//!
//! A frame stream is an ordered sequence of frames `(index, time, data)` with
//! a fixed synchronization offset onto the session-wide sync time axis:
//! `sync_time = local_time + offset`.
//!
//! ## Components
//! - `FrameStream` - time/index mapping contract plus windowed reads
//! - `TimeBase` - regular (arithmetic) and irregular (timestamp table) mappings
//! - `FrameSource` / `SourceStream` - collaborator-facing producer and its memoizing adapter
//! - `CachedStream` - paged caching decorator over any stream

mod cache;
mod source;
mod time_base;

pub use cache::CachedStream;
pub use source::{FrameSource, SourceStream};
pub use time_base::TimeBase;

use ndarray::Array3;
use std::rc::Rc;

use crate::error::Result;

/// Tie-breaking rule converting a continuous time into a frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alignment {
    /// Latest frame at or before the query time
    Left,
    /// Earliest frame at or after the query time
    Right,
}

/// Frame payload
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    /// Interleaved RGB pixels, shape (height, width, 3)
    Image(Array3<u8>),
    /// One scalar sample of a physiological signal
    Sample(f64),
    /// Facial landmark points (x, y)
    Landmarks(Vec<(i32, i32)>),
}

impl FrameData {
    pub fn as_sample(&self) -> Option<f64> {
        match self {
            Self::Sample(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Array3<u8>> {
        match self {
            Self::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_landmarks(&self) -> Option<&[(i32, i32)]> {
        match self {
            Self::Landmarks(points) => Some(points),
            _ => None,
        }
    }
}

/// One materialized frame. Payloads are shared so that serving a slice of a
/// cached page does not copy pixel buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub time: f64,
    pub data: Rc<FrameData>,
}

/// Extracts scalar samples, skipping non-sample payloads.
pub fn samples_of(frames: &[Frame]) -> Vec<f64> {
    frames.iter().filter_map(|f| f.data.as_sample()).collect()
}

/// Time/index mapping contract shared by every channel.
pub trait FrameStream {
    /// Total number of frames; computed once.
    fn frame_count(&self) -> Result<usize>;

    /// Local time (seconds from stream start) of `index`.
    fn time_of(&self, index: usize) -> Result<f64>;

    /// Inverse of [`time_of`](Self::time_of); see [`TimeBase::index_of`].
    fn index_of(&self, time: f64, alignment: Alignment) -> Result<Option<usize>>;

    /// Materializes `count` frames starting at `start`.
    fn read(&self, start: usize, count: usize) -> Result<Vec<Frame>>;

    /// Offset from local time to sync time; fixed for the stream's lifetime.
    fn sync_offset(&self) -> Result<f64>;

    /// Nominal sampling rate in Hz.
    fn sample_frequency(&self) -> Result<f64>;

    /// Releases cached materialized state. Identity and offsets are kept.
    fn purge(&self) {}

    fn sync_time_of(&self, index: usize) -> Result<f64> {
        Ok(self.time_of(index)? + self.sync_offset()?)
    }

    fn local_time_of(&self, sync_time: f64) -> Result<f64> {
        Ok(sync_time - self.sync_offset()?)
    }

    fn index_of_sync_time(&self, sync_time: f64, alignment: Alignment) -> Result<Option<usize>> {
        self.index_of(self.local_time_of(sync_time)?, alignment)
    }

    /// Local time of the first frame, 0 for an empty stream.
    fn start_time(&self) -> Result<f64> {
        if self.frame_count()? == 0 {
            return Ok(0.0);
        }
        self.time_of(0)
    }

    fn sync_start_time(&self) -> Result<f64> {
        Ok(self.start_time()? + self.sync_offset()?)
    }

    /// Time between the first and last frame, 0 for an empty stream.
    fn duration(&self) -> Result<f64> {
        let count = self.frame_count()?;
        if count == 0 {
            return Ok(0.0);
        }
        Ok(self.time_of(count - 1)? - self.time_of(0)?)
    }

    /// Single frame, `None` outside `[0, frame_count)`.
    fn frame_at(&self, index: usize) -> Result<Option<Frame>> {
        if index >= self.frame_count()? {
            return Ok(None);
        }
        Ok(self.read(index, 1)?.into_iter().next())
    }

    fn frame_at_time(&self, time: f64, alignment: Alignment) -> Result<Option<Frame>> {
        match self.index_of(time, alignment)? {
            Some(index) => self.frame_at(index),
            None => Ok(None),
        }
    }

    fn frame_at_sync_time(&self, sync_time: f64, alignment: Alignment) -> Result<Option<Frame>> {
        self.frame_at_time(self.local_time_of(sync_time)?, alignment)
    }

    /// Frames inside `[time, time + duration]`, lower bound `Right`-aligned
    /// and upper bound `Left`-aligned. Both ends are closed: a frame exactly
    /// at `time + duration` is included.
    ///
    /// `None` when `duration` is negative, the window starts after the last
    /// frame, or it resolves to no frames.
    fn read_by_time(&self, time: f64, duration: f64) -> Result<Option<Vec<Frame>>> {
        if !(duration >= 0.0) {
            return Ok(None);
        }
        let count = self.frame_count()?;
        let first = match self.index_of(time, Alignment::Right)? {
            Some(index) if index < count => index,
            _ => return Ok(None),
        };
        let last = match self.index_of(time + duration, Alignment::Left)? {
            Some(index) if index >= first => index,
            _ => return Ok(None),
        };
        self.read(first, last - first + 1).map(Some)
    }

    fn read_by_sync_time(&self, sync_time: f64, duration: f64) -> Result<Option<Vec<Frame>>> {
        if !(duration >= 0.0) {
            return Ok(None);
        }
        self.read_by_time(self.local_time_of(sync_time)?, duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SignalSource;

    fn ramp(count: usize, frequency: f64, offset: f64) -> SourceStream<SignalSource> {
        let samples = (0..count).map(|i| i as f64).collect();
        SourceStream::new(SignalSource::from_samples(samples, frequency).with_sync_offset(offset))
    }

    #[test]
    fn test_read_by_time_window() {
        let stream = ramp(100, 10.0, 0.0);
        let frames = stream.read_by_time(1.05, 0.5).unwrap().unwrap();
        // [1.05, 1.55] -> indices 11..=15
        assert_eq!(frames.first().unwrap().index, 11);
        assert_eq!(frames.last().unwrap().index, 15);
        assert_eq!(samples_of(&frames), vec![11.0, 12.0, 13.0, 14.0, 15.0]);
    }

    #[test]
    fn test_read_by_time_edges() {
        let stream = ramp(10, 10.0, 0.0);
        assert!(stream.read_by_time(0.2, -0.1).unwrap().is_none());
        // starts after the last frame
        assert!(stream.read_by_time(5.0, 1.0).unwrap().is_none());
        // ends before the first frame
        assert!(stream.read_by_time(-3.0, 1.0).unwrap().is_none());
        // strictly between two frames
        assert!(stream.read_by_time(0.21, 0.05).unwrap().is_none());
        // overhanging both ends clamps to the whole stream
        let all = stream.read_by_time(-1.0, 100.0).unwrap().unwrap();
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn test_read_by_time_includes_frame_at_window_end() {
        let stream = ramp(10, 10.0, 0.0);
        let frames = stream.read_by_time(0.2, 0.3).unwrap().unwrap();
        assert_eq!(samples_of(&frames), vec![2.0, 3.0, 4.0, 5.0]);
        let single = stream.read_by_time(0.4, 0.0).unwrap().unwrap();
        assert_eq!(samples_of(&single), vec![4.0]);
    }

    #[test]
    fn test_read_by_sync_time_applies_offset() {
        let stream = ramp(50, 10.0, 2.0);
        let frames = stream.read_by_sync_time(3.0, 0.2).unwrap().unwrap();
        assert_eq!(samples_of(&frames), vec![10.0, 11.0, 12.0]);
        assert_eq!(stream.sync_time_of(10).unwrap(), 3.0);
        assert_eq!(stream.local_time_of(3.0).unwrap(), 1.0);
        assert_eq!(stream.index_of_sync_time(3.0, Alignment::Left).unwrap(), Some(10));
    }

    #[test]
    fn test_frame_accessors() {
        let stream = ramp(5, 1.0, 0.0);
        assert_eq!(stream.frame_at(2).unwrap().unwrap().data.as_sample(), Some(2.0));
        assert!(stream.frame_at(5).unwrap().is_none());
        let frame = stream.frame_at_time(2.5, Alignment::Right).unwrap().unwrap();
        assert_eq!(frame.index, 3);
        assert_eq!(stream.duration().unwrap(), 4.0);
    }

    #[test]
    fn test_empty_stream_duration() {
        let stream = ramp(0, 30.0, 1.0);
        assert_eq!(stream.duration().unwrap(), 0.0);
        assert_eq!(stream.sync_start_time().unwrap(), 1.0);
        assert!(stream.read_by_time(0.0, 1.0).unwrap().is_none());
    }
}
