//! Collaborator-facing frame producers.
//!
//! A [`FrameSource`] knows how to build a time base and load raw payloads
//! (decode video, parse a signal file). [`SourceStream`] turns it into a
//! [`FrameStream`], memoizing the time base and the sync offset.

use std::rc::Rc;

use super::{Alignment, Frame, FrameData, FrameStream, TimeBase};
use crate::error::{LoaderError, Result};
use crate::memo::Memo;

pub trait FrameSource {
    /// Builds the time base; may perform I/O.
    fn time_base(&self) -> Result<TimeBase>;

    /// Loads exactly `count` payloads starting at `start`.
    /// The range has already been checked against the time base.
    fn load(&self, start: usize, count: usize) -> Result<Vec<FrameData>>;

    /// Offset from local time to sync time.
    fn sync_offset(&self) -> Result<f64> {
        Ok(0.0)
    }

    /// Drops cached raw data (decoded samples, probed metadata).
    fn purge(&self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn time_base(&self) -> Result<TimeBase> {
        (**self).time_base()
    }

    fn load(&self, start: usize, count: usize) -> Result<Vec<FrameData>> {
        (**self).load(start, count)
    }

    fn sync_offset(&self) -> Result<f64> {
        (**self).sync_offset()
    }

    fn purge(&self) {
        (**self).purge()
    }
}

pub struct SourceStream<S> {
    source: S,
    time_base: Memo<TimeBase>,
    sync_offset: Memo<f64>,
}

impl<S: FrameSource> SourceStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            time_base: Memo::new(),
            sync_offset: Memo::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn time_base(&self) -> Result<TimeBase> {
        self.time_base.get_or_try_init(|| self.source.time_base())
    }
}

impl<S: FrameSource> FrameStream for SourceStream<S> {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.time_base()?.frame_count())
    }

    fn time_of(&self, index: usize) -> Result<f64> {
        self.time_base()?.time_of(index)
    }

    fn index_of(&self, time: f64, alignment: Alignment) -> Result<Option<usize>> {
        Ok(self.time_base()?.index_of(time, alignment))
    }

    fn read(&self, start: usize, count: usize) -> Result<Vec<Frame>> {
        let time_base = self.time_base()?;
        let len = time_base.frame_count();
        let end = start.checked_add(count).filter(|end| *end <= len).ok_or(
            LoaderError::IndexOutOfRange {
                index: start.saturating_add(count.saturating_sub(1)),
                len,
            },
        )?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let payloads = self.source.load(start, count)?;
        if payloads.len() != count {
            return Err(LoaderError::Collaborator(format!(
                "requested {} frames from {}, got {}",
                count,
                start,
                payloads.len()
            )));
        }

        (start..end)
            .zip(payloads)
            .map(|(index, data)| {
                Ok(Frame {
                    index,
                    time: time_base.time_of(index)?,
                    data: Rc::new(data),
                })
            })
            .collect()
    }

    fn sync_offset(&self) -> Result<f64> {
        self.sync_offset.get_or_try_init(|| self.source.sync_offset())
    }

    fn sample_frequency(&self) -> Result<f64> {
        Ok(self.time_base()?.sample_frequency())
    }

    fn purge(&self) {
        self.time_base.clear();
        self.source.purge();
    }
}
