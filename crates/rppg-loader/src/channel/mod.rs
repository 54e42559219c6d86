//! Channels
//!
//! A channel is one named, cached frame stream of a session. Sources for the
//! supported payload kinds live here:
//! - `SignalSource` - regularly sampled scalar signals
//! - `VideoSource` - video decoded through a `FrameExtractor`
//! - `LandmarkSource` - per-frame landmark sets timed by the video
//! - `FfmpegExtractor` - subprocess decoding backend

mod ffmpeg;
mod landmark;
mod signal;
mod video;

pub use ffmpeg::FfmpegExtractor;
pub use landmark::{LandmarkReader, LandmarkSet, LandmarkSource};
pub use signal::{SignalReader, SignalSource};
pub use video::{frame_timestamps, CropRect, FrameExtractor, PacketTimestamp, VideoInfo, VideoSource};

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::stream::{
    samples_of, Alignment, CachedStream, Frame, FrameSource, FrameStream, SourceStream, TimeBase,
};

/// Identity of a channel within a session: a kind plus parameters.
///
/// Two requests with equal specs resolve to the same channel instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelSpec {
    kind: String,
    params: BTreeMap<String, String>,
}

impl ChannelSpec {
    pub const VIDEO: &'static str = "video";

    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn video() -> Self {
        Self::new(Self::VIDEO)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is_video(&self) -> bool {
        self.kind == Self::VIDEO
    }
}

impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, "({})", params.join(","))?;
        }
        Ok(())
    }
}

pub type ChannelStream = CachedStream<SourceStream<Box<dyn FrameSource>>>;

pub struct Channel {
    spec: ChannelSpec,
    stream: ChannelStream,
}

impl Channel {
    pub fn new(spec: ChannelSpec, source: Box<dyn FrameSource>, min_page_size: Option<usize>) -> Self {
        Self {
            spec,
            stream: CachedStream::new(SourceStream::new(source), min_page_size),
        }
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    pub fn time_base(&self) -> Result<TimeBase> {
        self.stream.inner().time_base()
    }

    pub fn page_bounds(&self) -> Option<(usize, usize)> {
        self.stream.page_bounds()
    }

    /// Scalar samples inside a sync-time window.
    pub fn samples_by_sync_time(&self, sync_time: f64, duration: f64) -> Result<Option<Vec<f64>>> {
        Ok(self
            .read_by_sync_time(sync_time, duration)?
            .map(|frames| samples_of(&frames)))
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("spec", &self.spec)
            .field("page", &self.page_bounds())
            .finish()
    }
}

impl FrameStream for Channel {
    fn frame_count(&self) -> Result<usize> {
        self.stream.frame_count()
    }

    fn time_of(&self, index: usize) -> Result<f64> {
        self.stream.time_of(index)
    }

    fn index_of(&self, time: f64, alignment: Alignment) -> Result<Option<usize>> {
        self.stream.index_of(time, alignment)
    }

    fn read(&self, start: usize, count: usize) -> Result<Vec<Frame>> {
        self.stream.read(start, count)
    }

    fn sync_offset(&self) -> Result<f64> {
        self.stream.sync_offset()
    }

    fn sample_frequency(&self) -> Result<f64> {
        self.stream.sample_frequency()
    }

    fn purge(&self) {
        self.stream.purge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_identity_and_display() {
        let a = ChannelSpec::new("ecg").with_param("lead", "2");
        let b = ChannelSpec::new("ecg").with_param("lead", "2");
        assert_eq!(a, b);
        assert_ne!(a, ChannelSpec::new("ecg").with_param("lead", "3"));
        assert_eq!(a.to_string(), "ecg(lead=2)");
        assert_eq!(ChannelSpec::video().to_string(), "video");
        assert!(ChannelSpec::video().is_video());
        assert_eq!(a.param("lead"), Some("2"));
    }

    #[test]
    fn test_channel_reads_through_page() {
        let source = SignalSource::from_samples((0..100).map(f64::from).collect(), 10.0).with_sync_offset(1.0);
        let channel = Channel::new(ChannelSpec::new("ppg"), Box::new(source), Some(30));

        let samples = channel.samples_by_sync_time(2.0, 0.3).unwrap().unwrap();
        assert_eq!(samples, vec![10.0, 11.0, 12.0, 13.0]);
        assert_eq!(channel.page_bounds(), Some((10, 30)));
        assert!(channel.time_base().unwrap().is_regular());

        channel.purge();
        assert_eq!(channel.page_bounds(), None);
    }
}
