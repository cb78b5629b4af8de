//! Priority donation
//!
//! A thread blocked on a [`Lock`] lends its effective priority to the lock's
//! owner, and through the owner to the owner of the lock the owner is blocked
//! on, and so on. A donation is never withdrawn explicitly. Instead, when a
//! thread releases a lock, its effective priority is recomputed from the
//! waiters that are still blocked on the locks it holds.
//!
//! [`Lock`]: crate::Lock
use crate::{state::State, thread::ThreadId};

impl<TS> State<TS> {
    /// Raise the effective priorities along the chain of lock owners that
    /// `donor` is (transitively) blocked on to `donor`'s effective priority.
    ///
    /// The walk stops at the first owner that already runs at that priority
    /// or higher. The chain length isn't bounded.
    pub(crate) fn donate_priority(&mut self, donor: ThreadId) {
        if !cfg!(feature = "priority_donation") {
            return;
        }

        let priority = self.cb(donor).priority;
        let mut waiting_on = self.cb(donor).waiting_on;

        while let Some(lock) = waiting_on {
            let Some(owner) = self.locks[lock.index()].owner else {
                break;
            };
            let owner_cb = self.cb(owner);
            if owner_cb.priority >= priority {
                break;
            }
            waiting_on = owner_cb.waiting_on;

            log::trace!("{donor:?} donates priority {priority} to {owner:?}");
            self.set_effective_priority(owner, priority);
        }
    }

    /// Recompute the effective priority of `thread` as the maximum of its
    /// base priority and the effective priorities of the threads blocked on
    /// the locks it holds.
    pub(crate) fn restore_priority(&mut self, thread: ThreadId) {
        let cb = self.cb(thread);
        let mut priority = cb.base_priority;

        if cfg!(feature = "priority_donation") {
            for &lock in cb.held_locks.iter() {
                let sem = self.locks[lock.index()].sem;
                if let Some(donated) = self.semaphore_waiter_priority(sem) {
                    priority = priority.max(donated);
                }
            }
        }

        self.set_effective_priority(thread, priority);
    }
}
