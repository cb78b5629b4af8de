//! Condition variables
use alloc::sync::Arc;
use core::fmt;

use crate::{
    error::{AcquireLockError, BadContextError, SignalCondvarError, WaitCondvarError},
    lock::{Lock, LockId},
    semaphore::SemaphoreId,
    state::State,
    thread::ThreadId,
    wait::{WaitQueue, Waiter},
    Kernel, Port,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CondvarId(usize);

/// A thread waiting on a condition variable. Each waiter blocks on a private
/// semaphore so that a signal wakes exactly that thread.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CondvarWaiter {
    sem: SemaphoreId,
    thread: ThreadId,
}

impl Waiter for CondvarWaiter {
    fn thread(&self) -> ThreadId {
        self.thread
    }
}

/// *Condition variable control block* - the state data of a condition
/// variable.
#[derive(Debug)]
pub(crate) struct CondvarCb {
    pub(crate) waiters: WaitQueue<CondvarWaiter>,
}

impl<TS> State<TS> {
    pub(crate) fn create_condvar(&mut self) -> CondvarId {
        CondvarId(self.condvars.insert(CondvarCb {
            waiters: WaitQueue::new(),
        }))
    }

    pub(crate) fn delete_condvar(&mut self, id: CondvarId) {
        let cb = self.condvars.remove(id.0);
        debug_assert!(cb.waiters.is_empty(), "deleted a condvar with waiters");
    }

    fn expect_lock_owner(&self, lock: LockId, thread: ThreadId) -> bool {
        self.locks[lock.index()].owner == Some(thread)
    }

    /// Register `thread` as a waiter, returning the semaphore it should block
    /// on.
    fn enqueue_condvar_waiter(&mut self, id: CondvarId, thread: ThreadId) -> SemaphoreId {
        let sem = self.create_semaphore(0);
        let priority = self.cb(thread).priority;
        let Self {
            threads, condvars, ..
        } = self;
        condvars[id.0].waiters.insert(
            CondvarWaiter { sem, thread },
            priority,
            |t| threads[t.slot()].priority,
        );
        sem
    }

    /// Wake up the highest-priority waiter. Returns `false` if there was
    /// none.
    pub(crate) fn signal_condvar(&mut self, id: CondvarId) -> bool {
        let Self {
            threads, condvars, ..
        } = self;
        let Some(waiter) = condvars[id.0]
            .waiters
            .pop_front(|t| threads[t.slot()].priority)
        else {
            return false;
        };
        self.signal_semaphore(waiter.sem);
        true
    }
}

/// A condition variable, used together with a [`Lock`].
///
/// Waiters are woken up in the order of their effective priorities at the
/// time of [`Condvar::signal`]. Signals are not remembered: signaling a
/// condition variable that nobody waits on does nothing.
pub struct Condvar<P: Port> {
    kernel: Arc<Kernel<P>>,
    id: CondvarId,
}

impl<P: Port> fmt::Debug for Condvar<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Condvar").field(&self.id.0).finish()
    }
}

impl<P: Port> Condvar<P> {
    pub fn new(kernel: &Arc<Kernel<P>>) -> Result<Self, BadContextError> {
        let mut lock = kernel.lock_cpu()?;
        let id = kernel.state.write(&mut *lock).create_condvar();
        Ok(Self {
            kernel: Arc::clone(kernel),
            id,
        })
    }

    /// Atomically release `lock` and wait for a signal, then re-acquire
    /// `lock` before returning.
    ///
    /// The caller must own `lock`. Returns `BadParam` if `lock` belongs to
    /// another kernel.
    pub fn wait(&self, lock: &Lock<P>) -> Result<(), WaitCondvarError> {
        if !Arc::ptr_eq(&self.kernel, lock.kernel()) {
            return Err(WaitCondvarError::BadParam);
        }
        let kernel = &*self.kernel;
        kernel.expect_thread_context()?;

        let mut guard = kernel.lock_cpu()?;
        let st = kernel.state.write(&mut *guard);
        let cur = st.running_thread()?;
        if !st.expect_lock_owner(lock.id(), cur) {
            return Err(WaitCondvarError::NotOwner);
        }

        let sem = st.enqueue_condvar_waiter(self.id, cur);

        // The thread woken up by the release can't run before we block
        st.release_lock(lock.id(), cur);
        log::trace!("{cur:?} waits on condvar {}", self.id.0);

        kernel.wait_semaphore(&mut guard, sem)?;
        kernel.state.write(&mut *guard).delete_semaphore(sem);

        kernel
            .acquire_lock(&mut guard, lock.id())
            .map_err(|e| match e {
                AcquireLockError::BadContext => WaitCondvarError::BadContext,
                AcquireLockError::WouldDeadlock => unreachable!("the lock was just released"),
            })
    }

    /// Wake up the highest-priority waiter, if any.
    ///
    /// The caller must own `lock`, the lock the waiters used.
    pub fn signal(&self, lock: &Lock<P>) -> Result<(), SignalCondvarError> {
        self.signal_inner(lock, false)
    }

    /// Wake up every waiter.
    ///
    /// The caller must own `lock`, the lock the waiters used.
    pub fn broadcast(&self, lock: &Lock<P>) -> Result<(), SignalCondvarError> {
        self.signal_inner(lock, true)
    }

    fn signal_inner(&self, lock: &Lock<P>, all: bool) -> Result<(), SignalCondvarError> {
        if !Arc::ptr_eq(&self.kernel, lock.kernel()) {
            return Err(SignalCondvarError::BadParam);
        }
        let kernel = &*self.kernel;
        kernel.expect_thread_context()?;

        let mut guard = kernel.lock_cpu()?;
        let st = kernel.state.write(&mut *guard);
        let cur = st.running_thread()?;
        if !st.expect_lock_owner(lock.id(), cur) {
            return Err(SignalCondvarError::NotOwner);
        }

        while st.signal_condvar(self.id) && all {}

        kernel.unlock_cpu_and_check_preemption(guard);
        Ok(())
    }

    /// Get the kernel this condition variable belongs to.
    pub fn kernel(&self) -> &Arc<Kernel<P>> {
        &self.kernel
    }
}

impl<P: Port> Drop for Condvar<P> {
    fn drop(&mut self) {
        // Leak the storage if the kernel is in a CPU Lock state
        if let Ok(mut lock) = self.kernel.lock_cpu() {
            self.kernel.state.write(&mut *lock).delete_condvar(self.id);
        }
    }
}
