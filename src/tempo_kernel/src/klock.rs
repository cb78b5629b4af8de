//! Kernel state locking mechanism
use core::{
    ops,
    sync::atomic::{AtomicUsize, Ordering},
};
use tokenlock::{Token, TokenLock};

use crate::{error::BadContextError, Port};

/// The keyhole type for [`TokenLock`] that can be "unlocked" by
/// [`CpuLockToken`]. Every kernel instance gets a distinct keyhole so that the
/// token of one kernel can't open the cells of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct CpuLockKeyhole {
    instance: usize,
}

impl CpuLockKeyhole {
    pub(super) fn new() -> Self {
        static NEXT_INSTANCE: AtomicUsize = AtomicUsize::new(0);
        Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// The key that "unlocks" [`CpuLockCell`].
pub(super) struct CpuLockToken {
    instance: usize,
}

// This is safe because `CpuLockToken` only can be borrowed from `CpuLockGuard`,
// and there is at most one instance of `CpuLockGuard` per kernel instance at
// any point of time
unsafe impl Token<CpuLockKeyhole> for CpuLockToken {
    fn eq_id(&self, keyhole: &CpuLockKeyhole) -> bool {
        self.instance == keyhole.instance
    }
}

/// Cell type that can be accessed by [`CpuLockToken`] (which can be obtained
/// by [`lock_cpu`]).
pub(super) struct CpuLockCell<T: ?Sized>(TokenLock<T, CpuLockKeyhole>);

impl<T> CpuLockCell<T> {
    pub(super) const fn new(keyhole: CpuLockKeyhole, x: T) -> Self {
        Self(TokenLock::new(keyhole, x))
    }
}

impl<T> ops::Deref for CpuLockCell<T> {
    type Target = TokenLock<T, CpuLockKeyhole>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> ops::DerefMut for CpuLockCell<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Attempt to enter a CPU Lock state and get an RAII guard.
/// Return `BadContext` if the kernel is already in a CPU Lock state.
pub(super) fn lock_cpu<P: Port>(
    port: &P,
    keyhole: CpuLockKeyhole,
) -> Result<CpuLockGuard<'_, P>, BadContextError> {
    // Safety: `try_enter_cpu_lock` is only meant to be called by the kernel
    if unsafe { port.try_enter_cpu_lock() } {
        // Safety: We just entered a CPU Lock state. This also means there are
        //         no instances of `CpuLockGuard` existing at this point.
        Ok(unsafe { assume_cpu_lock(port, keyhole) })
    } else {
        Err(BadContextError::BadContext)
    }
}

/// Assume a CPU Lock state and get `CpuLockGuard`.
///
/// # Safety
///
/// The system must be really in a CPU Lock state. There must be no instances of
/// `CpuLockGuard` for the same kernel instance existing at the point of the
/// call.
pub(super) unsafe fn assume_cpu_lock<P: Port>(
    port: &P,
    keyhole: CpuLockKeyhole,
) -> CpuLockGuard<'_, P> {
    debug_assert!(port.is_cpu_lock_active());

    CpuLockGuard {
        port,
        token: CpuLockToken {
            instance: keyhole.instance,
        },
    }
}

/// RAII guard for a CPU Lock state.
///
/// [`CpuLockToken`] can be borrowed from this type.
pub(super) struct CpuLockGuard<'a, P: Port> {
    port: &'a P,
    token: CpuLockToken,
}

impl<P: Port> Drop for CpuLockGuard<'_, P> {
    fn drop(&mut self) {
        // Safety: CPU Lock is currently active, and it's us (the kernel) who
        // are currently controlling the CPU Lock state
        unsafe {
            self.port.leave_cpu_lock();
        }
    }
}

impl<P: Port> ops::Deref for CpuLockGuard<'_, P> {
    type Target = CpuLockToken;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<P: Port> ops::DerefMut for CpuLockGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}
