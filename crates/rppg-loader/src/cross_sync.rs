//! Overlap of the video and reference-signal intervals on the sync axis.

use serde::Serialize;

use crate::error::Result;
use crate::stream::FrameStream;

/// Video and signal intervals plus their intersection, all in sync time.
///
/// `duration <= 0` means the two streams do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrossSyncWindow {
    pub video_sync_start: f64,
    pub video_duration: f64,
    pub signal_sync_start: f64,
    pub signal_duration: f64,
    pub start: f64,
    pub duration: f64,
}

impl CrossSyncWindow {
    pub fn from_intervals(
        video_sync_start: f64,
        video_duration: f64,
        signal_sync_start: f64,
        signal_duration: f64,
    ) -> Self {
        let start = video_sync_start.max(signal_sync_start);
        let end = (video_sync_start + video_duration).min(signal_sync_start + signal_duration);
        Self {
            video_sync_start,
            video_duration,
            signal_sync_start,
            signal_duration,
            start,
            duration: end - start,
        }
    }

    pub fn compute(video: &dyn FrameStream, signal: &dyn FrameStream) -> Result<Self> {
        Ok(Self::from_intervals(
            video.sync_start_time()?,
            video.duration()?,
            signal.sync_start_time()?,
            signal.duration()?,
        ))
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn has_overlap(&self) -> bool {
        self.duration > 0.0
    }
}
