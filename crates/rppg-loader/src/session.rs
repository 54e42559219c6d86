//! Sessions and the dataset collaborator contract.
//!
//! A [`Session`] is one recording. It memoizes its path, metadata, validity,
//! cross-sync window and channels; a [`Dataset`] supplies the
//! dataset-specific pieces (discovery, metadata, channel sources, HR
//! strategy).

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::channel::{Channel, ChannelSpec, CropRect, FrameExtractor, VideoSource};
use crate::config::{CacheConfig, LoaderConfig};
use crate::cross_sync::CrossSyncWindow;
use crate::error::{LoaderError, Result};
use crate::hr::{
    self, consensus_bpm, LocalMaximaDetector, PeakDetector, PeakIntervalEstimator, SpectralEstimator,
    UNKNOWN_BPM,
};
use crate::memo::Memo;
use crate::stream::{samples_of, FrameSource, FrameStream};

/// Discovery output for one session: string fields such as `basedir`,
/// `subject` or `trial`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRecord {
    fields: BTreeMap<String, String>,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Session directory relative to the dataset root.
    pub fn basedir(&self) -> Option<&str> {
        self.get("basedir")
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SessionRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Normalized metadata consumed by channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionMetadata {
    pub path: PathBuf,
    pub video_path: Option<PathBuf>,
    pub crop: Option<CropRect>,
    /// Dataset-specific values whose schema varies between datasets
    pub extra: BTreeMap<String, String>,
}

/// How a session turns a sync-time window into a heart rate.
#[derive(Debug, Clone, PartialEq)]
pub enum HrStrategy {
    /// Peak intervals per cardiac lead, combined by consensus
    PeakInterval { channels: Vec<ChannelSpec> },
    /// Spectral estimate of one pulsatile channel
    Spectral { channel: ChannelSpec, invert: bool },
    /// Per-frame HR trace shipped with the dataset; falls back to the
    /// session mean of `summary_channel` when the window has no valid value
    GroundTruthSeries {
        window_channel: ChannelSpec,
        summary_channel: ChannelSpec,
    },
    Unavailable,
}

/// Dataset collaborator.
pub trait Dataset {
    fn title(&self) -> &str;

    fn root(&self) -> &Path;

    /// Ordered `(key, record)` pairs.
    fn discover(&self) -> Result<Vec<(String, SessionRecord)>>;

    fn session_path(&self, key: &str, record: &SessionRecord) -> PathBuf {
        self.root().join(record.basedir().unwrap_or(key))
    }

    /// Verbatim source metadata; the record itself by default.
    fn raw_metadata(&self, session: &Session) -> Result<BTreeMap<String, String>> {
        Ok(session.record().fields().clone())
    }

    fn metadata(&self, session: &Session) -> Result<SessionMetadata>;

    /// Builds the source behind `spec`. Unknown specs are a contract error.
    fn open_channel(&self, session: &Session, spec: &ChannelSpec) -> Result<Box<dyn FrameSource>>;

    fn min_page_size(&self, spec: &ChannelSpec, cache: &CacheConfig) -> Option<usize> {
        if spec.is_video() {
            cache.video_min_page_size
        } else {
            cache.signal_min_page_size
        }
    }

    /// Reference channel aligned against the video.
    fn cross_sync_channel(&self, _session: &Session) -> Option<ChannelSpec> {
        None
    }

    /// Optical pulse channel, when the dataset records one.
    fn pulse_channel(&self, _session: &Session) -> Option<ChannelSpec> {
        None
    }

    fn hr_strategy(&self, _session: &Session) -> HrStrategy {
        HrStrategy::Unavailable
    }

    /// May read signal data. Data-consistency errors mark the session invalid.
    fn is_valid(&self, _session: &Session) -> Result<bool> {
        Ok(true)
    }

    /// Beat locator for a peak-interval channel.
    fn peak_detector(&self, session: &Session, _spec: &ChannelSpec) -> Box<dyn PeakDetector> {
        Box::new(LocalMaximaDetector::from_config(&session.config().hr))
    }
}

pub struct Session {
    key: String,
    escaped_key: String,
    dataset_path: PathBuf,
    record: SessionRecord,
    dataset: Rc<dyn Dataset>,
    config: Rc<LoaderConfig>,
    path: Memo<PathBuf>,
    raw_metadata: Memo<Rc<BTreeMap<String, String>>>,
    metadata: Memo<Rc<SessionMetadata>>,
    validity: Memo<bool>,
    cross_sync: Memo<Option<CrossSyncWindow>>,
    reference_hr: RefCell<HashMap<ChannelSpec, Option<f64>>>,
    channels: RefCell<HashMap<ChannelSpec, Rc<Channel>>>,
}

impl Session {
    pub(crate) fn new(
        key: String,
        escaped_key: String,
        record: SessionRecord,
        dataset: Rc<dyn Dataset>,
        config: Rc<LoaderConfig>,
    ) -> Self {
        Self {
            key,
            escaped_key,
            dataset_path: dataset.root().to_path_buf(),
            record,
            dataset,
            config,
            path: Memo::new(),
            raw_metadata: Memo::new(),
            metadata: Memo::new(),
            validity: Memo::new(),
            cross_sync: Memo::new(),
            reference_hr: RefCell::new(HashMap::new()),
            channels: RefCell::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn escaped_key(&self) -> &str {
        &self.escaped_key
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn path(&self) -> PathBuf {
        self.path
            .get_or_init(|| self.dataset.session_path(&self.key, &self.record))
    }

    pub fn raw_metadata(&self) -> Result<Rc<BTreeMap<String, String>>> {
        self.raw_metadata
            .get_or_try_init(|| self.dataset.raw_metadata(self).map(Rc::new))
    }

    pub fn metadata(&self) -> Result<Rc<SessionMetadata>> {
        self.metadata
            .get_or_try_init(|| self.dataset.metadata(self).map(Rc::new))
    }

    /// Computed once. The dataset's own check runs first, then the
    /// cross-sync window is resolved so that video/signal parity is
    /// asserted. Data-consistency failures count as invalid; other failures
    /// propagate and are retried on the next call.
    pub fn is_valid(&self) -> Result<bool> {
        self.validity.get_or_try_init(|| {
            let checked = self.dataset.is_valid(self).and_then(|valid| {
                if valid {
                    self.cross_sync()?;
                }
                Ok(valid)
            });
            match checked {
                Ok(valid) => Ok(valid),
                Err(e) if e.is_data_consistency() => {
                    log::warn!("session '{}' rejected: {}", self.key, e);
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
    }

    /// Channel for `spec`, opened on first request and shared afterwards.
    pub fn channel(&self, spec: &ChannelSpec) -> Result<Rc<Channel>> {
        if let Some(channel) = self.channels.borrow().get(spec) {
            return Ok(Rc::clone(channel));
        }

        // opening may recurse into other channels of this session
        let source = self.dataset.open_channel(self, spec)?;
        let page_size = self.dataset.min_page_size(spec, &self.config.cache);
        log::debug!(
            "session '{}': opened channel {} (page size {:?})",
            self.key,
            spec,
            page_size
        );
        let channel = Rc::new(Channel::new(spec.clone(), source, page_size));

        let mut channels = self.channels.borrow_mut();
        Ok(Rc::clone(channels.entry(spec.clone()).or_insert(channel)))
    }

    pub fn video_channel(&self) -> Result<Rc<Channel>> {
        self.channel(&ChannelSpec::video())
    }

    pub fn pulse_channel(&self) -> Result<Option<Rc<Channel>>> {
        self.dataset
            .pulse_channel(self)
            .map(|spec| self.channel(&spec))
            .transpose()
    }

    /// Video source described by this session's metadata.
    pub fn video_source(&self, extractor: Rc<dyn FrameExtractor>) -> Result<VideoSource> {
        let metadata = self.metadata()?;
        let path = metadata.video_path.clone().ok_or_else(|| {
            LoaderError::Contract(format!("session '{}' has no video", self.key))
        })?;
        Ok(VideoSource::new(path, extractor).with_crop(metadata.crop))
    }

    /// Overlap of the video and the dataset's reference channel, `None` when
    /// the dataset names no reference channel.
    pub fn cross_sync(&self) -> Result<Option<CrossSyncWindow>> {
        self.cross_sync.get_or_try_init(|| {
            let spec = match self.dataset.cross_sync_channel(self) {
                Some(spec) => spec,
                None => return Ok(None),
            };
            let video = self.video_channel()?;
            let signal = self.channel(&spec)?;
            CrossSyncWindow::compute(&*video, &*signal).map(Some)
        })
    }

    /// Mean of the valid HR values of a whole HR-trace channel.
    pub fn mean_reference_hr(&self, spec: &ChannelSpec) -> Result<Option<f64>> {
        if let Some(mean) = self.reference_hr.borrow().get(spec) {
            return Ok(*mean);
        }
        let channel = self.channel(spec)?;
        let frames = channel.read(0, channel.frame_count()?)?;
        let mean = hr::mean_valid_hr(&samples_of(&frames), &self.config.hr);
        self.reference_hr.borrow_mut().insert(spec.clone(), mean);
        Ok(mean)
    }

    /// Heart rate over `[sync_time, sync_time + duration]`, `None` when
    /// unknown.
    pub fn estimate_hr(&self, sync_time: f64, duration: f64) -> Result<Option<f64>> {
        let hr_config = &self.config.hr;
        match self.dataset.hr_strategy(self) {
            HrStrategy::PeakInterval { channels } => {
                let mut rates = Vec::with_capacity(channels.len());
                for spec in &channels {
                    let estimator = PeakIntervalEstimator::with_detector(
                        self.dataset.peak_detector(self, spec),
                        hr_config.peak_band_bpm,
                    );
                    let channel = self.channel(spec)?;
                    let bpm = match channel.samples_by_sync_time(sync_time, duration)? {
                        Some(samples) => {
                            estimator
                                .estimate(&samples, channel.sample_frequency()?)?
                                .bpm
                        }
                        None => UNKNOWN_BPM,
                    };
                    rates.push(bpm);
                }
                let bpm = consensus_bpm(&rates, hr_config.agreement_tolerance_bpm)?;
                Ok((bpm != UNKNOWN_BPM).then_some(bpm))
            }
            HrStrategy::Spectral { channel, invert } => {
                let channel = self.channel(&channel)?;
                match channel.samples_by_sync_time(sync_time, duration)? {
                    Some(samples) => SpectralEstimator::from_config(hr_config).estimate_bpm(
                        &samples,
                        channel.sample_frequency()?,
                        invert,
                    ),
                    None => Ok(None),
                }
            }
            HrStrategy::GroundTruthSeries {
                window_channel,
                summary_channel,
            } => {
                let channel = self.channel(&window_channel)?;
                let values = channel
                    .samples_by_sync_time(sync_time, duration)?
                    .unwrap_or_default();
                match hr::mean_valid_hr(&values, hr_config) {
                    Some(bpm) => Ok(Some(bpm)),
                    None => self.mean_reference_hr(&summary_channel),
                }
            }
            HrStrategy::Unavailable => Ok(None),
        }
    }

    /// Drops metadata and channel pages. Validity, offsets and the channels
    /// themselves survive.
    pub fn purge(&self) {
        self.raw_metadata.clear();
        self.metadata.clear();
        let channels: Vec<Rc<Channel>> = self.channels.borrow().values().cloned().collect();
        for channel in channels {
            channel.purge();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("escaped_key", &self.escaped_key)
            .field("dataset", &self.dataset.title())
            .field("record", &self.record)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SignalSource;
    use std::cell::Cell;

    struct Ramp {
        root: PathBuf,
        opens: Cell<usize>,
    }

    impl Dataset for Ramp {
        fn title(&self) -> &str {
            "ramp"
        }

        fn root(&self) -> &Path {
            &self.root
        }

        fn discover(&self) -> Result<Vec<(String, SessionRecord)>> {
            Ok(vec![("s1".into(), SessionRecord::new().with("basedir", "dir1"))])
        }

        fn metadata(&self, session: &Session) -> Result<SessionMetadata> {
            Ok(SessionMetadata {
                path: session.path(),
                ..Default::default()
            })
        }

        fn open_channel(&self, _session: &Session, spec: &ChannelSpec) -> Result<Box<dyn FrameSource>> {
            self.opens.set(self.opens.get() + 1);
            match spec.kind() {
                "hr" => Ok(Box::new(SignalSource::from_samples(vec![70.0, 72.0, 74.0, 10.0], 1.0))),
                "broken" => Err(LoaderError::DataConsistency("row count".into())),
                other => Err(LoaderError::InvalidArgument(format!("unknown channel {}", other))),
            }
        }

        fn hr_strategy(&self, _session: &Session) -> HrStrategy {
            HrStrategy::GroundTruthSeries {
                window_channel: ChannelSpec::new("hr"),
                summary_channel: ChannelSpec::new("hr"),
            }
        }

        fn is_valid(&self, session: &Session) -> Result<bool> {
            session.channel(&ChannelSpec::new("broken")).map(|_| true)
        }
    }

    fn session(min_valid_hr: Option<f64>) -> Session {
        let mut config = LoaderConfig::default();
        config.hr.min_valid_hr = min_valid_hr;
        Session::new(
            "s1".into(),
            "s1".into(),
            SessionRecord::new().with("basedir", "dir1"),
            Rc::new(Ramp {
                root: PathBuf::from("/data"),
                opens: Cell::new(0),
            }),
            Rc::new(config),
        )
    }

    #[test]
    fn test_record_helpers() {
        let record: SessionRecord = vec![("basedir", "x"), ("subject", "3")].into_iter().collect();
        assert_eq!(record.basedir(), Some("x"));
        assert_eq!(record.get("subject"), Some("3"));
        assert_eq!(record.get("trial"), None);
    }

    #[test]
    fn test_path_uses_basedir() {
        let session = session(None);
        assert_eq!(session.path(), PathBuf::from("/data/dir1"));
        assert_eq!(session.metadata().unwrap().path, PathBuf::from("/data/dir1"));
        assert_eq!(session.raw_metadata().unwrap().get("basedir").map(String::as_str), Some("dir1"));
    }

    #[test]
    fn test_channels_are_memoized() {
        let session = session(None);
        let a = session.channel(&ChannelSpec::new("hr")).unwrap();
        let b = session.channel(&ChannelSpec::new("hr")).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(session.channel(&ChannelSpec::new("nope")).is_err());
    }

    #[test]
    fn test_data_consistency_marks_invalid() {
        let session = session(None);
        assert!(!session.is_valid().unwrap());
    }

    #[test]
    fn test_ground_truth_series_falls_back_to_session_mean() {
        let session = session(Some(40.0));
        // window [0, 1] -> 70, 72
        assert_eq!(session.estimate_hr(0.0, 1.0).unwrap(), Some(71.0));
        // window [3, 3] holds only the implausible 10 -> mean of 70, 72, 74
        assert_eq!(session.estimate_hr(3.0, 0.0).unwrap(), Some(72.0));
        // window outside the trace
        assert_eq!(session.estimate_hr(10.0, 1.0).unwrap(), Some(72.0));
    }

    #[test]
    fn test_purge_keeps_channel_identity() {
        let session = session(None);
        let channel = session.channel(&ChannelSpec::new("hr")).unwrap();
        channel.read(0, 2).unwrap();
        session.metadata().unwrap();
        session.purge();
        let again = session.channel(&ChannelSpec::new("hr")).unwrap();
        assert!(Rc::ptr_eq(&channel, &again));
        assert_eq!(again.read(0, 2).unwrap().len(), 2);
    }
}
