//! Kernel global state
use alloc::vec::Vec;
use core::fmt;
use slab::Slab;

use crate::{
    condvar::CondvarCb,
    error::BadContextError,
    lock::LockCb,
    semaphore::SemaphoreCb,
    sleep::SleepQueue,
    thread::{readyqueue::ReadyQueue, ThreadCb, ThreadId},
    timer::TimerState,
    Kernel, KernelConfig, Port,
};

/// The state of a kernel instance, protected by CPU Lock.
///
/// Every queue here holds thread handles, not threads. A thread belongs to at
/// most one of the ready queue, a semaphore's wait set, or the sleep queue;
/// [`ThreadCb::link`] records which one.
pub(crate) struct State<TS> {
    /// Every thread that hasn't been reclaimed yet, including `main`, `idle`,
    /// and Dying threads awaiting reclamation.
    pub(crate) threads: Slab<ThreadCb<TS>>,
    pub(crate) semaphores: Slab<SemaphoreCb>,
    pub(crate) locks: Slab<LockCb>,
    pub(crate) condvars: Slab<CondvarCb>,

    pub(crate) ready_queue: ReadyQueue,
    pub(crate) sleep_queue: SleepQueue,

    /// The currently running thread. `None` until the kernel boots.
    pub(crate) running: Option<ThreadId>,
    /// The thread that runs when nothing else is Ready. It's never in the
    /// ready queue.
    pub(crate) idle: Option<ThreadId>,
    /// Dying threads. Their records are freed the next time the dispatcher
    /// runs, by which time their execution contexts are no longer in use.
    pub(crate) destruction_req: Vec<ThreadId>,
    pub(crate) next_tid: u32,

    pub(crate) timer: TimerState,
    pub(crate) config: KernelConfig,
}

impl<TS> State<TS> {
    pub(crate) fn new(config: KernelConfig) -> Self {
        Self {
            threads: Slab::new(),
            semaphores: Slab::new(),
            locks: Slab::new(),
            condvars: Slab::new(),
            ready_queue: ReadyQueue::new(),
            sleep_queue: SleepQueue::new(),
            running: None,
            idle: None,
            destruction_req: Vec::new(),
            next_tid: 1,
            timer: TimerState::new(),
            config,
        }
    }
}

impl<TS> fmt::Debug for State<TS> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        struct Threads<'a, TS>(&'a Slab<ThreadCb<TS>>);

        impl<TS> fmt::Debug for Threads<'_, TS> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_list()
                    .entries(self.0.iter().map(|(_, cb)| cb))
                    .finish()
            }
        }

        f.debug_struct("State")
            .field("running", &self.running)
            .field("idle", &self.idle)
            .field("ready_queue", &self.ready_queue)
            .field("sleep_queue", &self.sleep_queue)
            .field("threads", &Threads(&self.threads))
            .field("ticks", &self.timer.ticks)
            .finish_non_exhaustive()
    }
}

impl<P: Port> Kernel<P> {
    /// Return `BadContext` unless the current context is a thread context and
    /// CPU Lock is inactive, i.e., the caller is allowed to block.
    pub(crate) fn expect_thread_context(&self) -> Result<(), BadContextError> {
        if self.port.is_interrupt_context() || self.port.is_cpu_lock_active() {
            Err(BadContextError::BadContext)
        } else {
            Ok(())
        }
    }
}
