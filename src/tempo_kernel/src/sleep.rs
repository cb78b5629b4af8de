//! Timed sleep
use alloc::collections::VecDeque;

use crate::{
    error::{SleepError, TickError},
    state::State,
    thread::{Link, ThreadId},
    timer::Tick,
    Kernel, Port,
};

/// Sleeping threads, sorted by wake-up tick in ascending order. Threads with
/// the same wake-up tick are kept in the order they went to sleep.
#[derive(Debug, Default)]
pub(crate) struct SleepQueue {
    entries: VecDeque<(Tick, ThreadId)>,
}

impl SleepQueue {
    pub(crate) const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Get the earliest wake-up tick.
    pub(crate) fn next_deadline(&self) -> Option<Tick> {
        self.entries.front().map(|&(tick, _)| tick)
    }

    pub(crate) fn insert(&mut self, thread: ThreadId, wake_tick: Tick) {
        let i = self.entries.partition_point(|&(tick, _)| tick <= wake_tick);
        self.entries.insert(i, (wake_tick, thread));
    }

    /// Remove the first entry if its wake-up tick is not later than `now`.
    pub(crate) fn pop_expired(&mut self, now: Tick) -> Option<ThreadId> {
        match self.entries.front() {
            Some(&(tick, thread)) if tick <= now => {
                self.entries.pop_front();
                Some(thread)
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Tick, ThreadId)> + '_ {
        self.entries.iter().copied()
    }
}

impl<TS> State<TS> {
    /// Put `thread` (the running thread) into the sleep queue.
    pub(crate) fn enqueue_sleeper(&mut self, thread: ThreadId, wake_tick: Tick) {
        self.link(thread, Link::Sleep);
        self.cb_mut(thread).wake_tick = wake_tick;
        self.sleep_queue.insert(thread, wake_tick);
    }

    /// Make every sleeper whose wake-up tick is not later than `now` Ready.
    /// Returns the number of woken threads.
    pub(crate) fn tick_wake(&mut self, now: Tick) -> usize {
        let mut num_woken = 0;
        while let Some(thread) = self.sleep_queue.pop_expired(now) {
            let link = self.unlink(thread);
            debug_assert_eq!(link, Link::Sleep);
            debug_assert!(self.cb(thread).wake_tick <= now);
            self.make_ready(thread);
            num_woken += 1;
        }
        if num_woken > 0 {
            log::trace!("tick {now}: woke {num_woken} thread(s)");
        }
        num_woken
    }
}

impl<P: Port> Kernel<P> {
    /// Block the running thread until the tick count reaches `wake_tick`.
    /// Returns immediately if it already has.
    pub fn sleep_until(&self, wake_tick: Tick) -> Result<(), SleepError> {
        self.sleep_inner(|_| wake_tick)
    }

    /// Block the running thread for `ticks` timer ticks.
    pub fn sleep(&self, ticks: Tick) -> Result<(), SleepError> {
        self.sleep_inner(|now| now.saturating_add(ticks))
    }

    fn sleep_inner(&self, wake_tick: impl FnOnce(Tick) -> Tick) -> Result<(), SleepError> {
        self.expect_thread_context()?;
        let mut lock = self.lock_cpu()?;
        let st = self.state.write(&mut *lock);
        let cur = st.running_thread()?;
        if st.is_idle(cur) {
            return Err(SleepError::BadObjectState);
        }

        let wake_tick = wake_tick(st.timer.ticks);
        if wake_tick <= st.timer.ticks {
            return Ok(());
        }

        st.enqueue_sleeper(cur, wake_tick);
        log::trace!("{cur:?} sleeps until tick {wake_tick}");
        self.wait_until_woken_up(&mut lock);
        Ok(())
    }

    /// Make every sleeper whose wake-up tick is not later than `now` Ready.
    ///
    /// [`Self::timer_tick`] does this on every tick. This method is for ports
    /// that keep time on their own.
    pub fn tick_wake(&self, now: Tick) -> Result<(), TickError> {
        let mut lock = self.lock_cpu()?;
        self.state.write(&mut *lock).tick_wake(now);
        self.unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Get the earliest wake-up tick among the sleeping threads.
    pub fn next_wake_tick(&self) -> Result<Option<Tick>, crate::BadContextError> {
        let lock = self.lock_cpu()?;
        Ok(self.state.read(&*lock).sleep_queue.next_deadline())
    }
}
