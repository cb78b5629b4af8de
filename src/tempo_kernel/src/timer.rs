//! Timer ticks, time slicing, and tick accounting
use core::fmt;

use crate::{
    error::{BadContextError, TickError},
    state::State,
    thread::ThreadStatus,
    Kernel, Port,
};

/// A point of time or a duration, measured in timer ticks.
pub type Tick = u64;

/// The default number of timer ticks a thread may run before it's forced to
/// yield to other threads of equal priority.
pub const TIME_SLICE: u32 = 4;

/// Timer ticks charged to each category of threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Ticks during which the idle thread was running.
    pub idle_ticks: u64,
    /// Ticks during which a kernel thread was running.
    pub kernel_ticks: u64,
    /// Ticks during which a thread created with [`ThreadBuilder::user`] was
    /// running.
    ///
    /// [`ThreadBuilder::user`]: crate::ThreadBuilder::user
    pub user_ticks: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} idle ticks, {} kernel ticks, {} user ticks",
            self.idle_ticks, self.kernel_ticks, self.user_ticks
        )
    }
}

pub(crate) struct TimerState {
    /// The number of ticks since boot.
    pub(crate) ticks: Tick,
    /// The number of ticks the running thread has consumed since it was
    /// dispatched.
    pub(crate) slice_ticks: u32,
    /// Set by an interrupt handler to make the interrupted thread yield when
    /// the handler returns.
    pub(crate) yield_on_return: bool,
    pub(crate) stats: Stats,
}

impl TimerState {
    pub(crate) const fn new() -> Self {
        Self {
            ticks: 0,
            slice_ticks: 0,
            yield_on_return: false,
            stats: Stats {
                idle_ticks: 0,
                kernel_ticks: 0,
                user_ticks: 0,
            },
        }
    }
}

impl<TS> State<TS> {
    /// Advance the clock by one tick. Charges the tick to the running thread,
    /// requests a yield when its time slice is used up, and wakes sleepers
    /// whose deadline has come. Returns the new tick count.
    pub(crate) fn tick(&mut self) -> Tick {
        self.timer.ticks += 1;

        if let Some(running) = self.running {
            let is_idle = self.is_idle(running);
            let is_user = self.cb(running).user;
            let stats = &mut self.timer.stats;
            if is_idle {
                stats.idle_ticks += 1;
            } else if is_user {
                stats.user_ticks += 1;
            } else {
                stats.kernel_ticks += 1;
            }

            self.timer.slice_ticks += 1;
            if self.timer.slice_ticks >= self.config.time_slice {
                self.timer.yield_on_return = true;
            }
        }

        let now = self.timer.ticks;
        self.tick_wake(now);
        now
    }
}

impl<P: Port> Kernel<P> {
    /// Process a timer interrupt. Must be called by the port's timer interrupt
    /// handler, which must call [`Self::leave_interrupt`] before returning to
    /// the interrupted thread.
    pub fn timer_tick(&self) -> Result<(), TickError> {
        if !self.port.is_interrupt_context() {
            return Err(TickError::BadContext);
        }

        let mut lock = self.lock_cpu()?;
        let now = self.state.write(&mut *lock).tick();
        log::trace!("tick {now}");

        self.unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Perform the yield requested while handling an interrupt, if any.
    ///
    /// Must be called by the port at the end of an interrupt handler, on the
    /// interrupted thread's execution context, after the interrupt context
    /// has ended.
    pub fn leave_interrupt(&self) -> Result<(), BadContextError> {
        debug_assert!(!self.port.is_interrupt_context());
        let mut lock = self.lock_cpu()?;
        let timer = &mut self.state.write(&mut *lock).timer;
        if !core::mem::replace(&mut timer.yield_on_return, false) {
            return Ok(());
        }
        self.dispatch(&mut lock, ThreadStatus::Ready);
        Ok(())
    }

    /// Get the number of timer ticks since boot.
    pub fn ticks(&self) -> Result<Tick, BadContextError> {
        let lock = self.lock_cpu()?;
        Ok(self.state.read(&*lock).timer.ticks)
    }

    /// Get the tick accounting statistics.
    pub fn stats(&self) -> Result<Stats, BadContextError> {
        let lock = self.lock_cpu()?;
        Ok(self.state.read(&*lock).timer.stats)
    }

    /// Log the tick accounting statistics.
    pub fn print_stats(&self) -> Result<(), BadContextError> {
        let stats = self.stats()?;
        log::info!("Thread: {stats}");
        Ok(())
    }
}
