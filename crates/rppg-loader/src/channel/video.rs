//! Video channels.
//!
//! Decoding is delegated to a [`FrameExtractor`]; the channel only turns
//! packet timestamps into an irregular time base and slices the raw RGB
//! buffer into `(height, width, 3)` images.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{LoaderError, Result};
use crate::memo::Memo;
use crate::stream::{FrameData, FrameSource, TimeBase};

/// Crop rectangle in pixels, applied by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Stream-level facts reported by probing a video file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Coded width in pixels
    pub width: u32,
    /// Coded height in pixels
    pub height: u32,
    /// Rotation hint in degrees, as tagged in the container
    pub rotation: i32,
    /// Packet time base as `(numerator, denominator)`
    pub time_base: (i64, i64),
}

impl VideoInfo {
    /// Rotation folded into `[0, 360)`.
    pub fn normalized_rotation(&self) -> i32 {
        self.rotation.rem_euclid(360)
    }

    /// Display size: width and height swap unless rotation is 0 or 180.
    pub fn oriented_size(&self) -> (u32, u32) {
        match self.normalized_rotation() {
            0 | 180 => (self.width, self.height),
            _ => (self.height, self.width),
        }
    }

    pub fn seconds_per_tick(&self) -> Result<f64> {
        let (num, den) = self.time_base;
        if den == 0 {
            return Err(LoaderError::DataConsistency(format!(
                "video time base {}/{} has a zero denominator",
                num, den
            )));
        }
        Ok(num as f64 / den as f64)
    }
}

/// Per-frame packet timing as reported by the demuxer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketTimestamp {
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

/// Converts packet ticks to seconds, preferring pts over dts.
///
/// Enumeration stops at the first frame carrying neither; some containers
/// end with such frames and everything after them is dropped.
pub fn frame_timestamps(packets: &[PacketTimestamp], seconds_per_tick: f64) -> Vec<f64> {
    packets
        .iter()
        .map_while(|packet| packet.pts.or(packet.dts))
        .map(|ticks| ticks as f64 * seconds_per_tick)
        .collect()
}

/// Video decoding backend.
pub trait FrameExtractor {
    fn probe(&self, path: &Path) -> Result<VideoInfo>;

    fn packet_timestamps(&self, path: &Path) -> Result<Vec<PacketTimestamp>>;

    /// Decodes `count` frames from `start` as packed RGB24, cropped when
    /// `crop` is set. The buffer holds `count * w * h * 3` bytes.
    fn extract(&self, path: &Path, start: usize, count: usize, crop: Option<CropRect>) -> Result<Vec<u8>>;
}

pub struct VideoSource {
    path: PathBuf,
    crop: Option<CropRect>,
    sync_offset: f64,
    extractor: Rc<dyn FrameExtractor>,
    info: Memo<VideoInfo>,
    timestamps: Memo<Rc<[f64]>>,
}

impl VideoSource {
    pub fn new(path: impl Into<PathBuf>, extractor: Rc<dyn FrameExtractor>) -> Self {
        Self {
            path: path.into(),
            crop: None,
            sync_offset: 0.0,
            extractor,
            info: Memo::new(),
            timestamps: Memo::new(),
        }
    }

    pub fn with_crop(mut self, crop: Option<CropRect>) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_sync_offset(mut self, offset: f64) -> Self {
        self.sync_offset = offset;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn crop(&self) -> Option<CropRect> {
        self.crop
    }

    pub fn info(&self) -> Result<VideoInfo> {
        self.info.get_or_try_init(|| self.extractor.probe(&self.path))
    }

    /// `(width, height)` of delivered frames: the crop if set, otherwise the
    /// rotation-adjusted video size.
    pub fn frame_size(&self) -> Result<(u32, u32)> {
        match self.crop {
            Some(crop) => Ok((crop.w, crop.h)),
            None => Ok(self.info()?.oriented_size()),
        }
    }

    pub fn timestamps(&self) -> Result<Rc<[f64]>> {
        self.timestamps.get_or_try_init(|| {
            let seconds_per_tick = self.info()?.seconds_per_tick()?;
            let packets = self.extractor.packet_timestamps(&self.path)?;
            let timestamps = frame_timestamps(&packets, seconds_per_tick);
            if timestamps.len() < packets.len() {
                log::debug!(
                    "{}: timestamps truncated at frame {} of {}",
                    self.path.display(),
                    timestamps.len(),
                    packets.len()
                );
            }
            Ok(timestamps.into())
        })
    }
}

impl FrameSource for VideoSource {
    fn time_base(&self) -> Result<TimeBase> {
        TimeBase::irregular(self.timestamps()?)
    }

    fn load(&self, start: usize, count: usize) -> Result<Vec<FrameData>> {
        let (width, height) = self.frame_size()?;
        let (width, height) = (width as usize, height as usize);
        let frame_len = width * height * 3;
        if frame_len == 0 {
            return Err(LoaderError::Collaborator(format!(
                "{}: empty frame size {}x{}",
                self.path.display(),
                width,
                height
            )));
        }

        let buffer = self.extractor.extract(&self.path, start, count, self.crop)?;
        if buffer.len() < frame_len * count {
            return Err(LoaderError::Collaborator(format!(
                "{}: decoder returned {} bytes for {} frames of {}x{}",
                self.path.display(),
                buffer.len(),
                count,
                width,
                height
            )));
        }

        buffer
            .chunks_exact(frame_len)
            .take(count)
            .map(|chunk| {
                Array3::from_shape_vec((height, width, 3), chunk.to_vec())
                    .map(FrameData::Image)
                    .map_err(|e| LoaderError::Collaborator(e.to_string()))
            })
            .collect()
    }

    fn sync_offset(&self) -> Result<f64> {
        Ok(self.sync_offset)
    }

    fn purge(&self) {
        self.info.clear();
        self.timestamps.clear();
    }
}
