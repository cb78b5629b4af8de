//! Error types
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use tempo_kernel::ResultCode;
            /// assert_eq!(ResultCode::WouldDeadlock.as_str(), "WouldDeadlock");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the kernel's operations can
    /// produce.
    ///
    /// The codes are matched to their closest equivalents in μITRON4.0.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// A parameter is invalid in a way that is no covered by any other error
        /// codes.
        BadParam = -17,
        /// The specified object identifier doesn't refer to a live object. This
        /// happens, for example, when the thread it referred to has exited and
        /// has been reclaimed.
        BadId = -18,
        /// The current context disallows the operation, e.g., a blocking
        /// operation was attempted in an interrupt context.
        BadContext = -25,
        /// The caller does not own the resource.
        NotOwner = -29,
        /// Resource deadlock would occur.
        WouldDeadlock = -30,
        /// Insufficient memory or another resource needed to create an object.
        NoMemory = -33,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_context_error {}
    /// Error type for operations that only fail because of the calling
    /// context. Returned by [`Semaphore::new`] and friends.
    ///
    /// [`Semaphore::new`]: crate::Semaphore::new
    pub enum BadContextError {
        /// CPU Lock is active, or the operation is not allowed in the current
        /// context.
        BadContext,
    }
}

define_error! {
    mod bad_id_error {}
    /// Error type for looking up a thread by [`ThreadId`].
    ///
    /// [`ThreadId`]: crate::ThreadId
    pub enum BadIdError {
        /// The thread does not exist anymore.
        BadId,
    }
}

define_error! {
    mod boot_error {}
    /// Error type for [`Kernel::boot`].
    ///
    /// [`Kernel::boot`]: crate::Kernel::boot
    pub enum BootError: BadContextError {
        /// CPU Lock is active.
        BadContext,
        /// The port could not provide an execution context for the `main` or
        /// `idle` thread.
        NoMemory,
        /// The kernel has already been booted.
        BadObjectState,
    }
}

define_error! {
    mod spawn_error {}
    /// Error type for [`Kernel::spawn`] and [`ThreadBuilder::spawn`].
    ///
    /// [`Kernel::spawn`]: crate::Kernel::spawn
    /// [`ThreadBuilder::spawn`]: crate::ThreadBuilder::spawn
    pub enum SpawnError: BadContextError {
        /// CPU Lock is active, or the kernel hasn't booted yet.
        BadContext,
        /// The priority is out of range.
        BadParam,
        /// The thread limit has been reached, or the port could not provide
        /// an execution context for the new thread.
        NoMemory,
    }
}

define_error! {
    mod get_current_thread_error {}
    /// Error type for [`Kernel::current_thread`].
    ///
    /// [`Kernel::current_thread`]: crate::Kernel::current_thread
    pub enum GetCurrentThreadError: BadContextError {
        /// CPU Lock is active, or the current context is not a thread context.
        BadContext,
    }
}

define_error! {
    mod query_thread_error {}
    /// Error type for [`Kernel::thread_priority`], [`Kernel::thread_status`],
    /// and other thread queries.
    ///
    /// [`Kernel::thread_priority`]: crate::Kernel::thread_priority
    /// [`Kernel::thread_status`]: crate::Kernel::thread_status
    pub enum QueryThreadError: BadContextError, BadIdError {
        /// CPU Lock is active, or (for queries about the current thread) the
        /// current context is not a thread context.
        BadContext,
        /// The thread does not exist anymore.
        BadId,
    }
}

define_error! {
    mod set_priority_error {}
    /// Error type for [`Kernel::set_priority`].
    ///
    /// [`Kernel::set_priority`]: crate::Kernel::set_priority
    pub enum SetPriorityError: BadContextError {
        /// CPU Lock is active, or the current context is not a thread context.
        BadContext,
        /// The priority is out of range.
        BadParam,
    }
}

define_error! {
    mod yield_error {}
    /// Error type for [`Kernel::yield_now`].
    ///
    /// [`Kernel::yield_now`]: crate::Kernel::yield_now
    pub enum YieldError: BadContextError {
        /// CPU Lock is active, or the current context is not a thread context.
        BadContext,
    }
}

define_error! {
    mod block_error {}
    /// Error type for [`Kernel::block`].
    ///
    /// [`Kernel::block`]: crate::Kernel::block
    pub enum BlockError: BadContextError {
        /// CPU Lock is active, or the current context is not a thread context.
        BadContext,
        /// The caller is the idle thread.
        BadObjectState,
    }
}

define_error! {
    mod unblock_error {}
    /// Error type for [`Kernel::unblock`].
    ///
    /// [`Kernel::unblock`]: crate::Kernel::unblock
    pub enum UnblockError: BadContextError, BadIdError {
        /// CPU Lock is active.
        BadContext,
        /// The thread does not exist anymore.
        BadId,
        /// The thread is not blocked by [`Kernel::block`]. Threads waiting on
        /// a semaphore or sleeping can only be woken up by the respective
        /// wake-up operation.
        ///
        /// [`Kernel::block`]: crate::Kernel::block
        BadObjectState,
    }
}

define_error! {
    mod exit_thread_error {}
    /// Error type for [`Kernel::exit_thread`].
    ///
    /// [`Kernel::exit_thread`]: crate::Kernel::exit_thread
    pub enum ExitThreadError: BadContextError {
        /// CPU Lock is active, or the current context is not a thread context.
        BadContext,
        /// The caller is the idle thread.
        BadObjectState,
    }
}

define_error! {
    mod sleep_error {}
    /// Error type for [`Kernel::sleep`] and [`Kernel::sleep_until`].
    ///
    /// [`Kernel::sleep`]: crate::Kernel::sleep
    /// [`Kernel::sleep_until`]: crate::Kernel::sleep_until
    pub enum SleepError: BadContextError {
        /// CPU Lock is active, or the current context is not a thread context.
        BadContext,
        /// The caller is the idle thread, which must always be ready to run.
        BadObjectState,
    }
}

define_error! {
    mod tick_error {}
    /// Error type for [`Kernel::timer_tick`] and [`Kernel::tick_wake`].
    ///
    /// [`Kernel::timer_tick`]: crate::Kernel::timer_tick
    /// [`Kernel::tick_wake`]: crate::Kernel::tick_wake
    pub enum TickError: BadContextError {
        /// CPU Lock is active, or ([`Kernel::timer_tick`] only) the current
        /// context is not an interrupt context.
        ///
        /// [`Kernel::timer_tick`]: crate::Kernel::timer_tick
        BadContext,
    }
}

define_error! {
    mod wait_semaphore_error {}
    /// Error type for [`Semaphore::down`].
    ///
    /// [`Semaphore::down`]: crate::Semaphore::down
    pub enum WaitSemaphoreError: BadContextError {
        /// CPU Lock is active, or the current context is not a thread context.
        BadContext,
    }
}

define_error! {
    mod poll_semaphore_error {}
    /// Error type for [`Semaphore::try_down`].
    ///
    /// [`Semaphore::try_down`]: crate::Semaphore::try_down
    pub enum PollSemaphoreError: BadContextError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod signal_semaphore_error {}
    /// Error type for [`Semaphore::up`].
    ///
    /// [`Semaphore::up`]: crate::Semaphore::up
    pub enum SignalSemaphoreError: BadContextError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod query_semaphore_error {}
    /// Error type for [`Semaphore::value`].
    ///
    /// [`Semaphore::value`]: crate::Semaphore::value
    pub enum QuerySemaphoreError: BadContextError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod acquire_lock_error {}
    /// Error type for [`Lock::acquire`].
    ///
    /// [`Lock::acquire`]: crate::Lock::acquire
    pub enum AcquireLockError: BadContextError {
        /// CPU Lock is active, or the current context is not a thread context.
        BadContext,
        /// The lock is already held by the calling thread.
        WouldDeadlock,
    }
}

define_error! {
    mod try_acquire_lock_error {}
    /// Error type for [`Lock::try_acquire`].
    ///
    /// [`Lock::try_acquire`]: crate::Lock::try_acquire
    pub enum TryAcquireLockError: BadContextError {
        /// CPU Lock is active, or the kernel hasn't booted yet.
        BadContext,
    }
}

define_error! {
    mod release_lock_error {}
    /// Error type for [`Lock::release`].
    ///
    /// [`Lock::release`]: crate::Lock::release
    pub enum ReleaseLockError: BadContextError {
        /// CPU Lock is active, or the kernel hasn't booted yet.
        BadContext,
        /// The lock is not held by the calling thread.
        NotOwner,
    }
}

define_error! {
    mod query_lock_error {}
    /// Error type for [`Lock::held_by_current`] and [`Lock::owner`].
    ///
    /// [`Lock::held_by_current`]: crate::Lock::held_by_current
    /// [`Lock::owner`]: crate::Lock::owner
    pub enum QueryLockError: BadContextError {
        /// CPU Lock is active, or the kernel hasn't booted yet.
        BadContext,
    }
}

define_error! {
    mod wait_condvar_error {}
    /// Error type for [`Condvar::wait`].
    ///
    /// [`Condvar::wait`]: crate::Condvar::wait
    pub enum WaitCondvarError: BadContextError {
        /// CPU Lock is active, or the current context is not a thread context.
        BadContext,
        /// The lock belongs to a different kernel instance.
        BadParam,
        /// The lock is not held by the calling thread.
        NotOwner,
    }
}

define_error! {
    mod signal_condvar_error {}
    /// Error type for [`Condvar::signal`] and [`Condvar::broadcast`].
    ///
    /// [`Condvar::signal`]: crate::Condvar::signal
    /// [`Condvar::broadcast`]: crate::Condvar::broadcast
    pub enum SignalCondvarError: BadContextError {
        /// CPU Lock is active, or the kernel hasn't booted yet.
        BadContext,
        /// The lock belongs to a different kernel instance.
        BadParam,
        /// The lock is not held by the calling thread.
        NotOwner,
    }
}
