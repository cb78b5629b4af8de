//! Priority-ordered wait sets
use alloc::vec::Vec;

use crate::thread::{Priority, ThreadId};

/// An entry of [`WaitQueue`].
pub(crate) trait Waiter: Copy {
    /// The thread this entry belongs to. Its effective priority determines
    /// the entry's position.
    fn thread(&self) -> ThreadId;
}

impl Waiter for ThreadId {
    fn thread(&self) -> ThreadId {
        *self
    }
}

/// A set of waiters ordered by the effective priorities of their threads in
/// descending order. Waiters with identical priorities are kept in the
/// arrival order.
///
/// Effective priorities can change while a thread is waiting (because of
/// donation), so the order established at insertion time may become stale.
/// [`Self::pop_front`] restores the order before choosing a waiter.
#[derive(Debug)]
pub(crate) struct WaitQueue<W> {
    waiters: Vec<W>,
}

impl<W: Waiter> WaitQueue<W> {
    pub(crate) const fn new() -> Self {
        Self {
            waiters: Vec::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Insert `waiter` after every waiter whose priority is not lower than
    /// `priority`.
    pub(crate) fn insert(
        &mut self,
        waiter: W,
        priority: Priority,
        priority_of: impl Fn(ThreadId) -> Priority,
    ) {
        let i = (self.waiters.iter())
            .position(|w| priority_of(w.thread()) < priority)
            .unwrap_or(self.waiters.len());
        self.waiters.insert(i, waiter);
    }

    /// Re-sort the waiters by their current priorities, then remove and
    /// return the first one.
    pub(crate) fn pop_front(&mut self, priority_of: impl Fn(ThreadId) -> Priority) -> Option<W> {
        if self.waiters.is_empty() {
            return None;
        }
        // `sort_by_key` is stable, so arrival order among equals survives
        self.waiters
            .sort_by_key(|w| core::cmp::Reverse(priority_of(w.thread())));
        Some(self.waiters.remove(0))
    }

    /// Get the highest current priority among the waiters.
    pub(crate) fn highest_priority(
        &self,
        priority_of: impl Fn(ThreadId) -> Priority,
    ) -> Option<Priority> {
        self.waiters.iter().map(|w| priority_of(w.thread())).max()
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = W> + '_ {
        self.waiters.iter().copied()
    }
}
