//! The Tempo kernel: priority-scheduled threads on a single execution context,
//! with semaphores, locks, and condition variables built on top of them.
//!
//! # Overview
//!
//! A [`Kernel`] owns a set of threads. At any point of time exactly one of
//! them is Running. The others are Ready (waiting in the ready queue for their
//! turn), Blocked (waiting on a [`Semaphore`], a [`Lock`], a [`Condvar`], a
//! deadline, or an explicit [`Kernel::unblock`]), or Dying (exited, waiting to
//! be reclaimed).
//!
//! The ready queue is ordered by *effective priority*. Among threads having
//! identical effective priorities, the one that became Ready first runs first.
//! When nothing is Ready, a dedicated idle thread runs.
//!
//! ## Priority donation
//!
//! When a thread blocks on a [`Lock`] owned by a lower-priority thread, it
//! lends its priority to the owner, and transitively to whatever the owner is
//! waiting for. When the owner releases the lock, its effective priority is
//! recomputed from its base priority and the waiters of the locks it still
//! holds. This is enabled by the `priority_donation` Cargo feature.
//!
//! ## Ports
//!
//! The kernel doesn't know how to switch execution contexts or mask
//! interrupts. These are provided by a [`Port`]. The port also delivers timer
//! ticks by calling [`Kernel::timer_tick`] from an interrupt context.
//!
//! ## Contexts
//!
//! Kernel state is only mutated inside a CPU Lock state (a critical section in
//! which interrupts are masked). Operations that might block the caller return
//! [`BadContext`] when called from an interrupt context.
//!
//! [`BadContext`]: ResultCode::BadContext
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
extern crate alloc;

use alloc::{boxed::Box, sync::Arc};
use core::fmt;

mod cfg;
mod condvar;
mod donation;
mod error;
mod klock;
mod lock;
mod semaphore;
mod sleep;
mod state;
mod thread;
mod timer;
mod utils;
mod wait;

pub use self::{
    cfg::KernelConfig,
    condvar::Condvar,
    error::*,
    lock::Lock,
    semaphore::Semaphore,
    thread::{
        Priority, ThreadBuilder, ThreadId, ThreadName, ThreadStatus, PRI_DEFAULT, PRI_MAX,
        PRI_MIN, THREAD_NAME_LEN,
    },
    timer::{Stats, Tick, TIME_SLICE},
};

/// Implemented by a port. This trait contains items related to low-level
/// operations for controlling CPU states and context switching.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// initializing the execution environment and providing a dispatcher
/// implementation.
///
/// These methods are only meant to be called by the kernel.
#[allow(clippy::missing_safety_doc)]
pub unsafe trait Port: Send + Sync + Sized + 'static {
    /// The port-specific execution state of a thread.
    type ThreadState: Send + Sync + 'static;

    /// Prepare an execution context that will run `entry` when it's first
    /// dispatched.
    ///
    /// `entry` starts with CPU Lock active and never returns; the kernel
    /// takes care of both. Returns `None` if the port ran out of resources.
    fn initialize_thread_state(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Option<Self::ThreadState>;

    /// Start running the first thread (`main`).
    ///
    /// Precondition: CPU Lock active. A bare-metal port never returns from
    /// this method. A hosted port may return to its host, which then waits
    /// for the system to finish.
    unsafe fn dispatch_first_thread(&self, first: &Self::ThreadState);

    /// Suspend the execution context `prev` (the current one) and resume
    /// `next`. Returns when `prev` is resumed again.
    ///
    /// Precondition: CPU Lock active. The CPU Lock state is handed over to
    /// `next` and is active again when this method returns.
    unsafe fn switch_context(&self, prev: &Self::ThreadState, next: &Self::ThreadState);

    /// Discard the execution context `prev` (the current one) and resume
    /// `next`.
    ///
    /// Precondition: CPU Lock active.
    unsafe fn exit_and_dispatch(&self, prev: &Self::ThreadState, next: &Self::ThreadState)
        -> !;

    /// Disable all kernel-managed interrupts (this state is called *CPU Lock*).
    ///
    /// Precondition: CPU Lock inactive
    unsafe fn enter_cpu_lock(&self);

    /// Re-enable kernel-managed interrupts previously disabled by
    /// `enter_cpu_lock`, thus deactivating the CPU Lock state.
    ///
    /// Precondition: CPU Lock active
    unsafe fn leave_cpu_lock(&self);

    /// Activate CPU Lock. Return `true` iff CPU Lock was inactive before the
    /// call.
    unsafe fn try_enter_cpu_lock(&self) -> bool {
        if self.is_cpu_lock_active() {
            false
        } else {
            // Safety: CPU Lock inactive
            unsafe { self.enter_cpu_lock() };
            true
        }
    }

    /// Return a flag indicating whether CPU Lock is currently active.
    fn is_cpu_lock_active(&self) -> bool;

    /// Return a flag indicating whether the current context is an interrupt
    /// context.
    fn is_interrupt_context(&self) -> bool;

    /// Wait until an interrupt is delivered. Called by the idle thread with
    /// CPU Lock inactive.
    fn wait_for_interrupt(&self);
}

/// A kernel instance.
///
/// Created by [`Kernel::new`] and started by [`Kernel::boot`], which is
/// usually called by the port's startup routine.
pub struct Kernel<P: Port> {
    port: P,
    keyhole: klock::CpuLockKeyhole,
    state: klock::CpuLockCell<state::State<P::ThreadState>>,
}

impl<P: Port> Kernel<P> {
    /// Construct a kernel instance that runs on `port`.
    pub fn new(port: P, config: KernelConfig) -> Arc<Self> {
        let keyhole = klock::CpuLockKeyhole::new();
        Arc::new(Self {
            port,
            keyhole,
            state: klock::CpuLockCell::new(keyhole, state::State::new(config)),
        })
    }

    /// Get a reference to the port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Attempt to enter a CPU Lock state and get an RAII guard.
    fn lock_cpu(&self) -> Result<klock::CpuLockGuard<'_, P>, BadContextError> {
        klock::lock_cpu(&self.port, self.keyhole)
    }
}

impl<P: Port> fmt::Debug for Kernel<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.lock_cpu() {
            Ok(lock) => self.state.read(&*lock).fmt(f),
            Err(_) => f.write_str("Kernel { < locked > }"),
        }
    }
}
