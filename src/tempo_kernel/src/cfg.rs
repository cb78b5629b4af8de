//! Kernel configuration
use crate::timer::TIME_SLICE;

/// The runtime configuration of a [`Kernel`].
///
/// [`Kernel`]: crate::Kernel
///
/// # Examples
///
/// ```
/// use tempo_kernel::KernelConfig;
/// let config = KernelConfig::new().with_max_threads(8).with_time_slice(2);
/// assert_eq!(config.max_threads, 8);
/// assert_eq!(config.time_slice, 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// The maximum number of threads that can exist at the same time,
    /// including `main`, `idle`, and exited threads that haven't been
    /// reclaimed yet. Thread creation fails with [`NoMemory`] beyond this.
    ///
    /// [`NoMemory`]: crate::ResultCode::NoMemory
    pub max_threads: usize,
    /// The number of timer ticks a thread may run before it's forced to yield
    /// to other threads of equal priority.
    pub time_slice: u32,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            max_threads: 64,
            time_slice: TIME_SLICE,
        }
    }

    pub const fn with_max_threads(self, max_threads: usize) -> Self {
        Self {
            max_threads,
            ..self
        }
    }

    /// Override the time slice length. Zero is treated as one.
    pub const fn with_time_slice(self, time_slice: u32) -> Self {
        Self {
            time_slice: if time_slice == 0 { 1 } else { time_slice },
            ..self
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
