//! Facial landmark channels.
//!
//! Landmark files carry one row per video frame and no timing of their own,
//! so the channel borrows the video's time base and asserts row/frame parity.

use std::rc::Rc;

use crate::error::{LoaderError, Result};
use crate::memo::Memo;
use crate::stream::{FrameData, FrameSource, TimeBase};

pub type LandmarkSet = Vec<(i32, i32)>;

pub trait LandmarkReader {
    fn read_landmarks(&self) -> Result<Vec<LandmarkSet>>;
}

impl<F> LandmarkReader for F
where
    F: Fn() -> Result<Vec<LandmarkSet>>,
{
    fn read_landmarks(&self) -> Result<Vec<LandmarkSet>> {
        self()
    }
}

pub struct LandmarkSource {
    reader: Box<dyn LandmarkReader>,
    timing: Box<dyn Fn() -> Result<TimeBase>>,
    rows: Memo<Rc<[LandmarkSet]>>,
}

impl LandmarkSource {
    /// `timing` supplies the time base of the video the landmarks were
    /// tracked on.
    pub fn new(
        reader: impl LandmarkReader + 'static,
        timing: impl Fn() -> Result<TimeBase> + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            timing: Box::new(timing),
            rows: Memo::new(),
        }
    }

    fn rows(&self, expected: usize) -> Result<Rc<[LandmarkSet]>> {
        self.rows.get_or_try_init(|| {
            let rows = self.reader.read_landmarks()?;
            if rows.len() != expected {
                return Err(LoaderError::DataConsistency(format!(
                    "landmark file has {} rows but video has {} frames",
                    rows.len(),
                    expected
                )));
            }
            Ok(rows.into())
        })
    }
}

impl FrameSource for LandmarkSource {
    fn time_base(&self) -> Result<TimeBase> {
        let time_base = (self.timing)()?;
        self.rows(time_base.frame_count())?;
        Ok(time_base)
    }

    fn load(&self, start: usize, count: usize) -> Result<Vec<FrameData>> {
        let expected = (self.timing)()?.frame_count();
        let rows = self.rows(expected)?;
        let window = rows
            .get(start..start + count)
            .ok_or(LoaderError::IndexOutOfRange {
                index: start + count,
                len: rows.len(),
            })?;
        Ok(window.iter().cloned().map(FrameData::Landmarks).collect())
    }

    fn purge(&self) {
        self.rows.clear();
    }
}
