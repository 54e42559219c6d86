//! # rppg-loader
//!
//! Time-synchronized access to remote photoplethysmography recordings.
//!
//! This crate provides:
//! - **Frame streams**: video, physiological signals and landmarks on one
//!   shared sync time axis, with paged caching
//! - **Sessions**: lazily discovered recordings with memoized metadata,
//!   validity and channels
//! - **Reference heart rate**: peak-interval consensus, spectral (Welch)
//!   and ground-truth trace estimation over a sync-time window
//!
//! ## Example
//!
//! ```ignore
//! use rppg_loader::{LoaderConfig, SessionRegistry, SubjectFolderDataset};
//!
//! let config = LoaderConfig::default();
//! let dataset = SubjectFolderDataset::with_ffmpeg("/data/ubfc", &config.video);
//! let registry = SessionRegistry::new(dataset, config);
//!
//! for session in registry.sessions()? {
//!     let window = session.cross_sync()?;
//!     if let Some(bpm) = session.estimate_hr(10.0, 5.0)? {
//!         println!("{}: {:.1} BPM ({:?})", session.key(), bpm, window);
//!     }
//! }
//! ```

pub mod channel;
pub mod config;
pub mod cross_sync;
pub mod datasets;
pub mod error;
pub mod hr;
pub mod memo;
pub mod parsers;
pub mod registry;
pub mod session;
pub mod stream;

pub use channel::{Channel, ChannelSpec, CropRect, FfmpegExtractor, FrameExtractor, VideoSource};
pub use config::{CacheConfig, ConfigError, HrConfig, LoaderConfig, VideoConfig};
pub use cross_sync::CrossSyncWindow;
pub use datasets::SubjectFolderDataset;
pub use error::{LoaderError, Result};
pub use registry::{escape_key, SessionRegistry};
pub use session::{Dataset, HrStrategy, Session, SessionMetadata, SessionRecord};
pub use stream::{Alignment, Frame, FrameData, FrameStream};
