//! Folder-per-subject datasets.
//!
//! Layout:
//!
//! ```text
//! <root>/subject<N>/vid.avi
//! <root>/subject<N>/ground_truth.txt   rows: PPG trace, HR trace, timestamps
//! <root>/subject<N>/landmark.txt       optional, one row of x y pairs per frame
//! ```
//!
//! The ground-truth traces carry no timing of their own; their rate is taken
//! from the first two video frame timestamps and their length must match
//! the video frame count.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::channel::{
    ChannelSpec, FfmpegExtractor, FrameExtractor, LandmarkSource, SignalSource,
};
use crate::config::VideoConfig;
use crate::error::{LoaderError, Result};
use crate::parsers::{read_landmark_rows, read_text_row};
use crate::session::{Dataset, HrStrategy, Session, SessionMetadata, SessionRecord};
use crate::stream::{FrameSource, FrameStream};

pub struct SubjectFolderDataset {
    title: String,
    root: PathBuf,
    extractor: Rc<dyn FrameExtractor>,
}

impl SubjectFolderDataset {
    /// HR trace timed by the video
    pub const GROUND_TRUTH: &'static str = "ground_truth";
    /// HR trace at a nominal 1 Hz; needs no video probe
    pub const GROUND_TRUTH_SC: &'static str = "ground_truth_sc";
    /// PPG trace timed by the video
    pub const GROUND_TRUTH_PPG: &'static str = "ground_truth_ppg";
    pub const LANDMARK: &'static str = "landmark";

    const VIDEO_FILE: &'static str = "vid.avi";
    const GROUND_TRUTH_FILE: &'static str = "ground_truth.txt";
    const LANDMARK_FILE: &'static str = "landmark.txt";
    const PPG_ROW: usize = 0;
    const HR_ROW: usize = 1;

    pub fn new(root: impl Into<PathBuf>, extractor: Rc<dyn FrameExtractor>) -> Self {
        Self {
            title: "subject-folder".to_string(),
            root: root.into(),
            extractor,
        }
    }

    pub fn with_ffmpeg(root: impl Into<PathBuf>, config: &VideoConfig) -> Self {
        Self::new(root, Rc::new(FfmpegExtractor::new(config)))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Digits following `subject` in a directory name.
    fn subject_number(name: &str) -> Option<u64> {
        let digits: String = name
            .strip_prefix("subject")?
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    fn ground_truth_path(session: &Session) -> PathBuf {
        session.path().join(Self::GROUND_TRUTH_FILE)
    }

    /// Trace of row `row` sampled at the video frame rate.
    fn video_timed_trace(&self, session: &Session, row: usize) -> Result<SignalSource> {
        let timestamps = session
            .video_channel()?
            .time_base()?
            .timestamps()
            .unwrap_or_else(|| Rc::from(Vec::new()));
        if timestamps.len() < 2 {
            return Err(LoaderError::DataConsistency(format!(
                "session '{}': need at least 2 video frames to time the ground truth, got {}",
                session.key(),
                timestamps.len()
            )));
        }
        let step = timestamps[1] - timestamps[0];
        if !(step > 0.0) {
            return Err(LoaderError::DataConsistency(format!(
                "session '{}': first video frames share timestamp {}",
                session.key(),
                timestamps[0]
            )));
        }

        let path = Self::ground_truth_path(session);
        Ok(SignalSource::new(move || read_text_row(&path, row), 1.0 / step)
            .with_expected_frames(Some(timestamps.len())))
    }
}

impl Dataset for SubjectFolderDataset {
    fn title(&self) -> &str {
        &self.title
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn discover(&self) -> Result<Vec<(String, SessionRecord)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(number) = Self::subject_number(&name) {
                found.push((number, name));
            }
        }
        found.sort();

        Ok(found
            .into_iter()
            .map(|(number, name)| {
                let record = SessionRecord::new()
                    .with("basedir", name.as_str())
                    .with("subject", number.to_string());
                (name, record)
            })
            .collect())
    }

    fn metadata(&self, session: &Session) -> Result<SessionMetadata> {
        let path = session.path();
        let mut metadata = SessionMetadata {
            video_path: Some(path.join(Self::VIDEO_FILE)),
            path: path.clone(),
            ..Default::default()
        };
        metadata.extra.insert(
            "ground_truth_path".to_string(),
            path.join(Self::GROUND_TRUTH_FILE).display().to_string(),
        );
        let landmark_path = path.join(Self::LANDMARK_FILE);
        if landmark_path.is_file() {
            metadata
                .extra
                .insert("landmark_path".to_string(), landmark_path.display().to_string());
        }
        Ok(metadata)
    }

    fn open_channel(&self, session: &Session, spec: &ChannelSpec) -> Result<Box<dyn FrameSource>> {
        match spec.kind() {
            ChannelSpec::VIDEO => Ok(Box::new(session.video_source(Rc::clone(&self.extractor))?)),
            Self::GROUND_TRUTH => Ok(Box::new(self.video_timed_trace(session, Self::HR_ROW)?)),
            Self::GROUND_TRUTH_PPG => Ok(Box::new(self.video_timed_trace(session, Self::PPG_ROW)?)),
            Self::GROUND_TRUTH_SC => {
                let path = Self::ground_truth_path(session);
                Ok(Box::new(SignalSource::new(
                    move || read_text_row(&path, Self::HR_ROW),
                    1.0,
                )))
            }
            Self::LANDMARK => {
                let path = session.path().join(Self::LANDMARK_FILE);
                let video = session.video_channel()?;
                Ok(Box::new(LandmarkSource::new(
                    move || read_landmark_rows(&path),
                    move || video.time_base(),
                )))
            }
            other => Err(LoaderError::InvalidArgument(format!(
                "{}: unknown channel kind '{}'",
                self.title, other
            ))),
        }
    }

    fn cross_sync_channel(&self, _session: &Session) -> Option<ChannelSpec> {
        Some(ChannelSpec::new(Self::GROUND_TRUTH))
    }

    fn pulse_channel(&self, _session: &Session) -> Option<ChannelSpec> {
        Some(ChannelSpec::new(Self::GROUND_TRUTH_PPG))
    }

    fn hr_strategy(&self, _session: &Session) -> HrStrategy {
        HrStrategy::GroundTruthSeries {
            window_channel: ChannelSpec::new(Self::GROUND_TRUTH),
            summary_channel: ChannelSpec::new(Self::GROUND_TRUTH_SC),
        }
    }

    /// Valid when the ground truth exists, both video-timed traces match the
    /// video frame count and at least one HR value passes `min_valid_hr`.
    fn is_valid(&self, session: &Session) -> Result<bool> {
        if !Self::ground_truth_path(session).is_file() {
            log::warn!("session '{}' has no {}", session.key(), Self::GROUND_TRUTH_FILE);
            return Ok(false);
        }
        for kind in [Self::GROUND_TRUTH, Self::GROUND_TRUTH_PPG] {
            session.channel(&ChannelSpec::new(kind))?.frame_count()?;
        }
        Ok(session
            .mean_reference_hr(&ChannelSpec::new(Self::GROUND_TRUTH_SC))?
            .is_some())
    }
}
