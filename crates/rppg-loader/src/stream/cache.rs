//! Paged caching decorator.
//!
//! Holds at most one contiguous page of materialized frames. A read that is
//! not fully inside the page drops it before loading a replacement starting
//! at the requested index, so peak memory stays at one page.

use std::cell::RefCell;

use super::{Alignment, Frame, FrameStream};
use crate::error::{LoaderError, Result};

#[derive(Debug)]
struct Page {
    start: usize,
    frames: Vec<Frame>,
}

impl Page {
    fn contains(&self, start: usize, count: usize) -> bool {
        start >= self.start && start + count <= self.start + self.frames.len()
    }
}

pub struct CachedStream<S> {
    inner: S,
    min_page_size: Option<usize>,
    page: RefCell<Option<Page>>,
}

impl<S: FrameStream> CachedStream<S> {
    /// `None` disables caching; reads go straight to `inner`.
    pub fn new(inner: S, min_page_size: Option<usize>) -> Self {
        Self {
            inner,
            min_page_size: min_page_size.filter(|size| *size > 0),
            page: RefCell::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn min_page_size(&self) -> Option<usize> {
        self.min_page_size
    }

    /// `(start, len)` of the current page.
    pub fn page_bounds(&self) -> Option<(usize, usize)> {
        self.page
            .borrow()
            .as_ref()
            .map(|page| (page.start, page.frames.len()))
    }
}

impl<S: FrameStream> FrameStream for CachedStream<S> {
    fn frame_count(&self) -> Result<usize> {
        self.inner.frame_count()
    }

    fn time_of(&self, index: usize) -> Result<f64> {
        self.inner.time_of(index)
    }

    fn index_of(&self, time: f64, alignment: Alignment) -> Result<Option<usize>> {
        self.inner.index_of(time, alignment)
    }

    fn read(&self, start: usize, count: usize) -> Result<Vec<Frame>> {
        let min_page_size = match self.min_page_size {
            Some(size) => size,
            None => return self.inner.read(start, count),
        };

        let len = self.frame_count()?;
        if start.checked_add(count).map_or(true, |end| end > len) {
            return Err(LoaderError::IndexOutOfRange {
                index: start.saturating_add(count.saturating_sub(1)),
                len,
            });
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let hit = matches!(&*self.page.borrow(), Some(page) if page.contains(start, count));
        if !hit {
            self.page.borrow_mut().take();
            let page_len = min_page_size.max(count).min(len - start);
            log::debug!(
                "cache miss for [{}, {}): loading page [{}, {})",
                start,
                start + count,
                start,
                start + page_len
            );
            let frames = self.inner.read(start, page_len)?;
            *self.page.borrow_mut() = Some(Page { start, frames });
        }

        let page = self.page.borrow();
        match page.as_ref() {
            Some(page) => {
                let offset = start - page.start;
                Ok(page.frames[offset..offset + count].to_vec())
            }
            None => Err(LoaderError::Contract("cache page missing after reload".into())),
        }
    }

    fn sync_offset(&self) -> Result<f64> {
        self.inner.sync_offset()
    }

    fn sample_frequency(&self) -> Result<f64> {
        self.inner.sample_frequency()
    }

    fn purge(&self) {
        self.page.borrow_mut().take();
        self.inner.purge();
    }
}
