//! Thread ready queue implementation (internal use only).
use alloc::collections::VecDeque;
use core::fmt;

use super::{Priority, ThreadId, NUM_PRIORITY_LEVELS};
use crate::utils::PrioBitmap;

/// Tracks the list of Ready threads, sorted by effective priority order.
///
/// The ready queue uses a set of queues segregated by the priorities of
/// contained threads. Among threads having identical effective priorities,
/// the one inserted first is dequeued first.
pub(crate) struct ReadyQueue {
    /// The set of segregated thread ready queues, in which each queue stores
    /// the list of Ready threads at the corresponding priority.
    ///
    /// Invariant: `!queues[i].is_empty() == bitmap.get(i)`
    queues: [VecDeque<ThreadId>; NUM_PRIORITY_LEVELS],

    /// The thread ready bitmap, in which each bit indicates whether the
    /// segregated queue corresponding to that bit contains a thread or not.
    bitmap: PrioBitmap,
}

impl fmt::Debug for ReadyQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(
                self.queues
                    .iter()
                    .enumerate()
                    .rev()
                    .filter(|(_, queue)| !queue.is_empty()),
            )
            .finish()
    }
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self {
            queues: core::array::from_fn(|_| VecDeque::new()),
            bitmap: PrioBitmap::new(),
        }
    }

    /// Return a flag indicating whether the queue contains no threads.
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.bitmap.find_highest_set().is_none()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Get the effective priority of the thread at the front of the queue.
    pub(crate) fn highest_priority(&self) -> Option<Priority> {
        self.bitmap.find_highest_set().map(|i| i as Priority)
    }

    /// Insert the specified thread into the ready queue.
    ///
    /// `thread` will be inserted as close to the back as possible without
    /// violating the priority ordering. I.e., if there are one or more threads
    /// having effective priorities identical to that of `thread`, `thread`
    /// will be inserted after such threads.
    pub(crate) fn push_back(&mut self, thread: ThreadId, priority: Priority) {
        let pri = priority as usize;
        debug_assert!(
            !self.queues[pri].contains(&thread),
            "{thread:?} is already in the ready queue"
        );
        self.queues[pri].push_back(thread);
        self.bitmap.set(pri);
    }

    /// Remove the thread at the front of the queue.
    pub(crate) fn pop_front(&mut self) -> Option<ThreadId> {
        let pri = self.bitmap.find_highest_set()?;
        let thread = self.queues[pri].pop_front();
        if self.queues[pri].is_empty() {
            self.bitmap.clear(pri);
        }
        thread
    }

    /// Remove the specified thread, which was lastly inserted with the
    /// effective priority `priority`. Returns `false` if the thread was not
    /// found.
    pub(crate) fn remove(&mut self, thread: ThreadId, priority: Priority) -> bool {
        let pri = priority as usize;
        let queue = &mut self.queues[pri];
        let Some(i) = queue.iter().position(|&t| t == thread) else {
            return false;
        };
        queue.remove(i);
        if queue.is_empty() {
            self.bitmap.clear(pri);
        }
        true
    }

    /// Reposition the specified thread within the ready queue after a change
    /// in its effective priority from `old_priority` to `priority`.
    ///
    /// `thread` will be re-inserted as close to the back as possible without
    /// violating the priority ordering.
    pub(crate) fn reorder(&mut self, thread: ThreadId, priority: Priority, old_priority: Priority) {
        if priority == old_priority {
            return;
        }
        let removed = self.remove(thread, old_priority);
        debug_assert!(removed, "{thread:?} is not in the ready queue");
        self.push_back(thread, priority);
    }

    /// Iterate over the contained threads in dequeue order.
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.queues.iter().rev().flat_map(|queue| queue.iter().copied())
    }
}
