#![allow(dead_code)] // suppress warning when doing selective testing
use spin::Mutex as SpinMutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// An atomic counter for checking an execution sequence.
pub(crate) struct SeqTracker {
    counter: AtomicUsize,
}

impl SeqTracker {
    /// Construct `SeqTracker`.
    pub(crate) const fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }

    /// Assert that the counter is equal to `old` and then replace it with
    /// `new`.
    #[track_caller]
    pub(crate) fn expect_and_replace(&self, old: usize, new: usize) {
        log::debug!(
            "{} (expected: {}) → {}",
            self.counter.load(Ordering::Relaxed),
            old,
            new
        );
        let got = self
            .counter
            .compare_exchange(old, new, Ordering::Relaxed, Ordering::Relaxed)
            .unwrap_or_else(|x| x);
        assert_eq!(got, old, "expected {}, got {}", old, got);
    }
}

/// Records the order in which threads pass certain points.
#[derive(Clone, Default)]
pub(crate) struct Trace(Arc<SpinMutex<Vec<&'static str>>>);

impl Trace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: &'static str) {
        log::debug!("trace: {event}");
        self.0.lock().push(event);
    }

    /// Remove and return all events recorded so far.
    pub(crate) fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.0.lock())
    }
}
