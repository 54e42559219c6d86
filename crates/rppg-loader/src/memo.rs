//! Once-computed cells for lazily derived fields.
//!
//! Every derived value in the loader (metadata, timestamps, validity,
//! offsets, cross-sync windows) lives in a [`Memo`]: either uninitialized or
//! computed. Values are produced on first read and handed out by clone, so
//! heavy payloads are stored behind `Rc`.
//!
//! The cell is `!Sync`. Callers sharing a session across threads must
//! serialize access themselves.

use std::cell::RefCell;

#[derive(Debug)]
pub struct Memo<T> {
    slot: RefCell<Option<T>>,
}

impl<T: Clone> Memo<T> {
    pub const fn new() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }

    /// Current value, if computed.
    pub fn get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    pub fn is_computed(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Returns the memoized value, computing it with `init` on first use.
    ///
    /// A failed `init` leaves the cell uninitialized so the next read retries.
    /// If `init` re-enters and fills the cell itself, the first stored value wins.
    pub fn get_or_try_init<E, F>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let value = init()?;
        let mut slot = self.slot.borrow_mut();
        Ok(slot.get_or_insert(value).clone())
    }

    pub fn get_or_init<F>(&self, init: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self.get_or_try_init::<std::convert::Infallible, _>(|| Ok(init())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Drops the computed value; the next read recomputes it.
    pub fn clear(&self) {
        self.slot.borrow_mut().take();
    }
}

impl<T: Clone> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}
