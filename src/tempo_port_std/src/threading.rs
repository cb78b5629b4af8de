//! Handing the processor from one backing thread to another
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// The permission to run, passed between backing threads.
///
/// A baton stores at most one permit; giving it twice before it's taken has
/// the same effect as giving it once. Once cancelled, it stays cancelled.
#[derive(Debug)]
pub(crate) struct Baton {
    st: Mutex<BatonSt>,
    cv: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatonSt {
    Empty,
    Given,
    Cancelled,
}

/// Returned by [`Baton::take`] when the baton was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancelled;

impl Baton {
    pub(crate) const fn new() -> Self {
        Self {
            st: Mutex::new(BatonSt::Empty),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatonSt> {
        // A backing thread never panics while holding this lock
        self.st.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Let the thread waiting in [`Self::take`] proceed.
    pub(crate) fn give(&self) {
        let mut st = self.lock();
        if *st == BatonSt::Empty {
            *st = BatonSt::Given;
        }
        drop(st);
        self.cv.notify_all();
    }

    /// Make every current and future call to [`Self::take`] fail.
    pub(crate) fn cancel(&self) {
        *self.lock() = BatonSt::Cancelled;
        self.cv.notify_all();
    }

    /// Wait until the baton is given, and consume the permit.
    pub(crate) fn take(&self) -> Result<(), Cancelled> {
        let mut st = self.lock();
        loop {
            match *st {
                BatonSt::Given => {
                    *st = BatonSt::Empty;
                    return Ok(());
                }
                BatonSt::Cancelled => return Err(Cancelled),
                BatonSt::Empty => {
                    st = self.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}
