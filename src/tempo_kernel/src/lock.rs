//! Locks
use alloc::sync::Arc;
use core::{fmt, mem};

use crate::{
    error::{
        AcquireLockError, BadContextError, QueryLockError, ReleaseLockError, TryAcquireLockError,
    },
    klock::CpuLockGuard,
    semaphore::SemaphoreId,
    state::State,
    thread::ThreadId,
    Kernel, Port,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LockId(usize);

impl LockId {
    pub(crate) const fn index(self) -> usize {
        self.0
    }
}

/// *Lock control block* - the state data of a lock.
///
/// A lock is a binary semaphore with an owner. Its donors are the threads
/// blocked on `sem`.
#[derive(Debug)]
pub(crate) struct LockCb {
    pub(crate) sem: SemaphoreId,
    /// Invariant: `owner.is_some()` iff the semaphore's permit is taken
    pub(crate) owner: Option<ThreadId>,
}

impl<TS> State<TS> {
    pub(crate) fn create_lock(&mut self) -> LockId {
        let sem = self.create_semaphore(1);
        LockId(self.locks.insert(LockCb { sem, owner: None }))
    }

    pub(crate) fn delete_lock(&mut self, id: LockId) {
        let cb = self.locks.remove(id.0);
        if let Some(owner) = cb.owner {
            // Dropping a held lock releases it on behalf of the owner
            let owner_cb = self.cb_mut(owner);
            owner_cb.held_locks.retain(|&l| l != id);
            self.restore_priority(owner);
        }
        self.delete_semaphore(cb.sem);
    }

    /// Take the lock for `thread` if it's free.
    pub(crate) fn try_take_lock(&mut self, id: LockId, thread: ThreadId) -> bool {
        let sem = self.locks[id.0].sem;
        if !self.poll_semaphore(sem) {
            return false;
        }
        debug_assert!(self.locks[id.0].owner.is_none());
        self.locks[id.0].owner = Some(thread);
        self.cb_mut(thread).held_locks.push(id);
        true
    }

    /// Give up `thread`'s ownership of the lock and wake up the
    /// highest-priority waiter. The caller is responsible for checking
    /// preemption.
    pub(crate) fn release_lock(&mut self, id: LockId, thread: ThreadId) {
        debug_assert_eq!(self.locks[id.0].owner, Some(thread));
        self.cb_mut(thread).held_locks.retain(|&l| l != id);
        self.restore_priority(thread);
        self.locks[id.0].owner = None;

        let sem = self.locks[id.0].sem;
        self.signal_semaphore(sem);
    }

    /// Release every lock held by `thread`, which is about to exit.
    pub(crate) fn abandon_held_locks(&mut self, thread: ThreadId) {
        let held_locks = mem::take(&mut self.cb_mut(thread).held_locks);
        if !held_locks.is_empty() {
            log::warn!(
                "{thread:?} exited while holding {} lock(s)",
                held_locks.len()
            );
        }
        for id in held_locks {
            self.locks[id.0].owner = None;
            let sem = self.locks[id.0].sem;
            self.signal_semaphore(sem);
        }
    }
}

impl<P: Port> Kernel<P> {
    /// Acquire a lock, blocking the running thread (and lending it its
    /// priority) while another thread owns it. The current context must be a
    /// thread context.
    pub(crate) fn acquire_lock(
        &self,
        lock: &mut CpuLockGuard<'_, P>,
        id: LockId,
    ) -> Result<(), AcquireLockError> {
        let st = self.state.write(&mut **lock);
        let cur = st.running_thread()?;
        if st.locks[id.0].owner == Some(cur) {
            return Err(AcquireLockError::WouldDeadlock);
        }
        let sem = st.locks[id.0].sem;

        loop {
            let st = self.state.write(&mut **lock);
            if st.try_take_lock(id, cur) {
                break;
            }

            st.cb_mut(cur).waiting_on = Some(id);
            st.donate_priority(cur);
            st.enqueue_semaphore_waiter(sem, cur);
            self.wait_until_woken_up(lock);
        }

        self.state.write(&mut **lock).cb_mut(cur).waiting_on = None;
        log::trace!("{cur:?} acquired lock {}", id.0);
        Ok(())
    }
}

/// A mutual exclusion lock with priority donation.
///
/// Unlike a binary [`Semaphore`], a lock has an owner: only the thread that
/// acquired it can release it, and it can't be acquired recursively.
///
/// [`Semaphore`]: crate::Semaphore
pub struct Lock<P: Port> {
    kernel: Arc<Kernel<P>>,
    id: LockId,
}

impl<P: Port> fmt::Debug for Lock<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Lock").field(&self.id.0).finish()
    }
}

impl<P: Port> Lock<P> {
    /// Construct a lock that isn't owned by anyone.
    pub fn new(kernel: &Arc<Kernel<P>>) -> Result<Self, BadContextError> {
        let mut lock = kernel.lock_cpu()?;
        let id = kernel.state.write(&mut *lock).create_lock();
        Ok(Self {
            kernel: Arc::clone(kernel),
            id,
        })
    }

    pub(crate) fn id(&self) -> LockId {
        self.id
    }

    /// Acquire the lock, blocking until it's available.
    ///
    /// While blocked, the caller donates its effective priority to the owner
    /// (and transitively to whatever the owner is blocked on).
    pub fn acquire(&self) -> Result<(), AcquireLockError> {
        self.kernel.expect_thread_context()?;
        let mut lock = self.kernel.lock_cpu()?;
        self.kernel.acquire_lock(&mut lock, self.id)
    }

    /// Acquire the lock if it's available. Returns `false` (without donating
    /// anything) if any thread owns it.
    ///
    /// This can be called from an interrupt context, in which case the lock
    /// is taken on behalf of the interrupted thread.
    pub fn try_acquire(&self) -> Result<bool, TryAcquireLockError> {
        let mut lock = self.kernel.lock_cpu()?;
        let st = self.kernel.state.write(&mut *lock);
        let cur = st.running_thread()?;
        Ok(st.try_take_lock(self.id, cur))
    }

    /// Release the lock. The caller's effective priority drops to what the
    /// donors of its remaining locks justify, and the highest-priority waiter
    /// is woken up. The caller yields if it's outranked as a result.
    pub fn release(&self) -> Result<(), ReleaseLockError> {
        self.kernel.expect_thread_context()?;
        let mut lock = self.kernel.lock_cpu()?;
        let st = self.kernel.state.write(&mut *lock);
        let cur = st.running_thread()?;
        if st.locks[self.id.0].owner != Some(cur) {
            return Err(ReleaseLockError::NotOwner);
        }
        st.release_lock(self.id, cur);
        log::trace!("{cur:?} released lock {}", self.id.0);
        self.kernel.unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Get a flag indicating whether the running thread (the interrupted
    /// thread in an interrupt context) owns the lock.
    pub fn held_by_current(&self) -> Result<bool, QueryLockError> {
        let lock = self.kernel.lock_cpu()?;
        let st = self.kernel.state.read(&*lock);
        Ok(st.locks[self.id.0].owner == Some(st.running_thread()?))
    }

    /// Get the thread owning the lock.
    pub fn owner(&self) -> Result<Option<ThreadId>, QueryLockError> {
        let lock = self.kernel.lock_cpu()?;
        Ok(self.kernel.state.read(&*lock).locks[self.id.0].owner)
    }

    /// Get the kernel this lock belongs to.
    pub fn kernel(&self) -> &Arc<Kernel<P>> {
        &self.kernel
    }
}

impl<P: Port> Drop for Lock<P> {
    fn drop(&mut self) {
        // Leak the storage if the kernel is in a CPU Lock state
        if let Ok(mut lock) = self.kernel.lock_cpu() {
            self.kernel.state.write(&mut *lock).delete_lock(self.id);
        }
    }
}
