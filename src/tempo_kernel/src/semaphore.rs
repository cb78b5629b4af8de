//! Semaphores
use alloc::sync::Arc;
use core::fmt;

use crate::{
    error::{
        BadContextError, PollSemaphoreError, QuerySemaphoreError, SignalSemaphoreError,
        WaitSemaphoreError,
    },
    klock::CpuLockGuard,
    state::State,
    thread::{Link, Priority, ThreadId},
    wait::WaitQueue,
    Kernel, Port,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SemaphoreId(pub(crate) usize);

/// *Semaphore control block* - the state data of a semaphore.
#[derive(Debug)]
pub(crate) struct SemaphoreCb {
    pub(crate) value: usize,
    pub(crate) waiters: WaitQueue<ThreadId>,
}

impl<TS> State<TS> {
    pub(crate) fn create_semaphore(&mut self, value: usize) -> SemaphoreId {
        SemaphoreId(self.semaphores.insert(SemaphoreCb {
            value,
            waiters: WaitQueue::new(),
        }))
    }

    pub(crate) fn delete_semaphore(&mut self, id: SemaphoreId) {
        let cb = self.semaphores.remove(id.0);
        debug_assert!(cb.waiters.is_empty(), "deleted a semaphore with waiters");
    }

    /// Take one permit if there is any.
    pub(crate) fn poll_semaphore(&mut self, id: SemaphoreId) -> bool {
        let cb = &mut self.semaphores[id.0];
        if cb.value > 0 {
            cb.value -= 1;
            true
        } else {
            false
        }
    }

    /// Add `thread` (the running thread) to the semaphore's wait set. The
    /// caller blocks it afterwards.
    pub(crate) fn enqueue_semaphore_waiter(&mut self, id: SemaphoreId, thread: ThreadId) {
        self.link(thread, Link::Semaphore(id));
        let priority = self.cb(thread).priority;
        let Self {
            threads,
            semaphores,
            ..
        } = self;
        semaphores[id.0]
            .waiters
            .insert(thread, priority, |t| threads[t.slot()].priority);
    }

    /// Add one permit and make the highest-priority waiter (if any) Ready.
    /// Returns the woken thread.
    ///
    /// The woken thread competes for the permit again when it runs; it isn't
    /// handed the permit directly.
    pub(crate) fn signal_semaphore(&mut self, id: SemaphoreId) -> Option<ThreadId> {
        let Self {
            threads,
            semaphores,
            ..
        } = self;
        let cb = &mut semaphores[id.0];
        let woken = cb.waiters.pop_front(|t| threads[t.slot()].priority);
        cb.value += 1;

        if let Some(thread) = woken {
            let link = self.unlink(thread);
            debug_assert_eq!(link, Link::Semaphore(id));
            self.make_ready(thread);
        }
        woken
    }

    /// Get the highest effective priority among the semaphore's waiters.
    pub(crate) fn semaphore_waiter_priority(&self, id: SemaphoreId) -> Option<Priority> {
        self.semaphores[id.0]
            .waiters
            .highest_priority(|t| self.threads[t.slot()].priority)
    }
}

impl<P: Port> Kernel<P> {
    /// Take one permit from a semaphore, blocking the running thread until one
    /// is available. The current context must be a thread context.
    pub(crate) fn wait_semaphore(
        &self,
        lock: &mut CpuLockGuard<'_, P>,
        id: SemaphoreId,
    ) -> Result<(), BadContextError> {
        loop {
            let st = self.state.write(&mut **lock);
            if st.poll_semaphore(id) {
                return Ok(());
            }
            let cur = st.running_thread()?;
            st.enqueue_semaphore_waiter(id, cur);
            self.wait_until_woken_up(lock);
        }
    }
}

/// A counting semaphore.
///
/// Waiters are woken up in the order of their effective priorities at the
/// time of [`Semaphore::up`].
pub struct Semaphore<P: Port> {
    kernel: Arc<Kernel<P>>,
    id: SemaphoreId,
}

impl<P: Port> fmt::Debug for Semaphore<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Semaphore").field(&self.id.0).finish()
    }
}

impl<P: Port> Semaphore<P> {
    /// Construct a semaphore with `value` permits.
    pub fn new(kernel: &Arc<Kernel<P>>, value: usize) -> Result<Self, BadContextError> {
        let mut lock = kernel.lock_cpu()?;
        let id = kernel.state.write(&mut *lock).create_semaphore(value);
        Ok(Self {
            kernel: Arc::clone(kernel),
            id,
        })
    }

    /// Take one permit, blocking the running thread until one is available.
    pub fn down(&self) -> Result<(), WaitSemaphoreError> {
        self.kernel.expect_thread_context()?;
        let mut lock = self.kernel.lock_cpu()?;
        self.kernel.wait_semaphore(&mut lock, self.id)?;
        Ok(())
    }

    /// Take one permit if there is any. Never blocks, so this may be called
    /// from an interrupt context.
    pub fn try_down(&self) -> Result<bool, PollSemaphoreError> {
        let mut lock = self.kernel.lock_cpu()?;
        Ok(self.kernel.state.write(&mut *lock).poll_semaphore(self.id))
    }

    /// Add one permit and wake up the highest-priority waiter. If the woken
    /// thread outranks the caller, the caller yields (or, in an interrupt
    /// context, yields when the interrupt handler returns).
    pub fn up(&self) -> Result<(), SignalSemaphoreError> {
        let mut lock = self.kernel.lock_cpu()?;
        self.kernel.state.write(&mut *lock).signal_semaphore(self.id);
        self.kernel.unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Get the number of available permits.
    pub fn value(&self) -> Result<usize, QuerySemaphoreError> {
        let lock = self.kernel.lock_cpu()?;
        Ok(self.kernel.state.read(&*lock).semaphores[self.id.0].value)
    }

    /// Get the kernel this semaphore belongs to.
    pub fn kernel(&self) -> &Arc<Kernel<P>> {
        &self.kernel
    }
}

impl<P: Port> Drop for Semaphore<P> {
    fn drop(&mut self) {
        // Leak the storage if the kernel is in a CPU Lock state
        if let Ok(mut lock) = self.kernel.lock_cpu() {
            self.kernel.state.write(&mut *lock).delete_semaphore(self.id);
        }
    }
}
