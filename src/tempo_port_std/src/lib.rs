//! Simulation environment for running the Tempo kernel on a hosted
//! environment.
//!
//! Every kernel thread is backed by an OS thread. Only the backing thread of
//! the running kernel thread is allowed to make progress; a context switch
//! passes a [baton] from one backing thread to another. CPU Lock is a flag
//! that's handed over along with the baton.
//!
//! Interrupts are simulated synchronously. [`interrupt`] runs a handler in an
//! interrupt context on the calling thread, and [`timer_interrupt`] delivers
//! one timer tick. The idle thread delivers timer ticks whenever it runs, so
//! sleeping threads wake up as soon as nothing else is Ready. If the idle
//! thread finds that no thread is sleeping, nothing can ever wake up the
//! blocked threads, and the simulation panics with a deadlock error.
//!
//! [baton]: threading::Baton
//!
//! # Example
//!
//! ```
//! use tempo_kernel::{KernelConfig, Semaphore, PRI_DEFAULT};
//!
//! let value = tempo_port_std::run(KernelConfig::new(), |kernel| {
//!     let sem = std::sync::Arc::new(Semaphore::new(kernel, 0).unwrap());
//!     let sem2 = std::sync::Arc::clone(&sem);
//!     kernel
//!         .spawn("worker", PRI_DEFAULT + 1, move || {
//!             sem2.down().unwrap();
//!         })
//!         .unwrap();
//!     // The worker outranks us, so it's already waiting
//!     sem.up().unwrap();
//!     42
//! });
//! assert_eq!(value, 42);
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
use once_cell::sync::OnceCell;
use spin::Mutex as SpinMutex;
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Weak,
    },
    thread::JoinHandle,
};
use tempo_kernel::{BadContextError, Kernel, KernelConfig, Port, TickError};

mod threading;

use self::threading::Baton;

/// The kernel instance type used with this port.
pub type StdKernel = Kernel<StdPort>;

/// The role of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    Unknown,
    /// The backing thread for a kernel thread.
    Thread,
}

thread_local! {
    /// The current thread's role. It's automatically assigned after the
    /// creation of a thread managed by the port.
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Unknown);

    /// The baton to pass after the current backing thread unwinds its stack
    /// with [`ExitSignal`].
    static PENDING_HANDOFF: RefCell<Option<Arc<Baton>>> = RefCell::new(None);
}

/// The panic payload used to unwind the stack of an exiting thread.
struct ExitSignal;

/// The panic payload used to unwind the stack of a thread when the simulation
/// shuts down.
struct ShutdownSignal;

/// Sent to the thread that called [`run`].
enum Event {
    /// `main` returned.
    Finished,
    /// A kernel thread panicked.
    Panicked(Box<dyn Any + Send>),
}

/// The state shared by a [`StdPort`] and its backing threads.
struct Shared {
    cpu_lock: AtomicBool,
    in_interrupt: AtomicBool,
    /// Once set, CPU Lock can't be entered, and every backing thread unwinds
    /// as soon as it's resumed.
    shutdown: AtomicBool,
    kernel: OnceCell<Weak<StdKernel>>,
    /// The backing threads that haven't exited yet, cancelled on shutdown.
    backing_threads: SpinMutex<Vec<BackingThread>>,
    event_send: SpinMutex<Option<mpsc::Sender<Event>>>,
}

impl Shared {
    /// Stop the simulation and notify the thread that called [`run`].
    fn finish(&self, event: Event) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(send) = &*self.event_send.lock() {
            // The receiver outlives every backing thread
            let _ = send.send(event);
        }
    }
}

struct BackingThread {
    baton: Arc<Baton>,
    join_handle: JoinHandle<()>,
}

/// The [`Port`] implementation for hosted environments.
pub struct StdPort {
    shared: Arc<Shared>,
}

impl fmt::Debug for StdPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StdPort")
            .field("cpu_lock", &self.shared.cpu_lock)
            .field("in_interrupt", &self.shared.in_interrupt)
            .field("shutdown", &self.shared.shutdown)
            .finish_non_exhaustive()
    }
}

/// The port-specific state of a kernel thread.
pub struct ThreadState {
    name: String,
    baton: Arc<Baton>,
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ThreadState").field(&self.name).finish()
    }
}

impl StdPort {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                cpu_lock: AtomicBool::new(false),
                in_interrupt: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                kernel: OnceCell::new(),
                backing_threads: SpinMutex::new(Vec::new()),
                event_send: SpinMutex::new(None),
            }),
        }
    }

    /// Park the current backing thread until `baton` is passed to it again.
    /// Unwinds the stack if the simulation shuts down in the meantime.
    fn suspend(&self, baton: &Baton) {
        if baton.take().is_err() || self.shared.shutdown.load(Ordering::SeqCst) {
            panic::resume_unwind(Box::new(ShutdownSignal));
        }
    }

    fn kernel(&self) -> Option<Arc<StdKernel>> {
        self.shared.kernel.get().and_then(Weak::upgrade)
    }
}

fn expect_backing_thread() {
    assert_eq!(
        THREAD_ROLE.with(Cell::get),
        ThreadRole::Thread,
        "the current thread is not managed by the port"
    );
}

unsafe impl Port for StdPort {
    type ThreadState = ThreadState;

    fn initialize_thread_state(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Option<ThreadState> {
        let baton = Arc::new(Baton::new());
        let shared = Arc::clone(&self.shared);
        let baton2 = Arc::clone(&baton);

        let join_handle = std::thread::Builder::new()
            .name(format!("tempo:{name}"))
            .spawn(move || {
                THREAD_ROLE.with(|role| role.set(ThreadRole::Thread));

                // Wait until dispatched for the first time
                if baton2.take().is_err() || shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }

                match panic::catch_unwind(AssertUnwindSafe(entry)) {
                    Ok(()) => unreachable!("a thread entry point returned"),
                    Err(payload) if payload.is::<ExitSignal>() => {
                        // Nothing has to be cancelled or joined anymore
                        shared
                            .backing_threads
                            .lock()
                            .retain(|t| !Arc::ptr_eq(&t.baton, &baton2));
                        if let Some(next) = PENDING_HANDOFF.with(|h| h.borrow_mut().take()) {
                            next.give();
                        }
                    }
                    Err(payload) if payload.is::<ShutdownSignal>() => {}
                    Err(payload) => shared.finish(Event::Panicked(payload)),
                }
            })
            .map_err(|e| log::warn!("failed to spawn a backing thread: {e}"))
            .ok()?;

        log::trace!("initialize_thread_state({name:?})");
        self.shared.backing_threads.lock().push(BackingThread {
            baton: Arc::clone(&baton),
            join_handle,
        });

        Some(ThreadState {
            name: name.to_owned(),
            baton,
        })
    }

    unsafe fn dispatch_first_thread(&self, first: &ThreadState) {
        log::trace!("dispatch_first_thread({first:?})");
        assert!(self.is_cpu_lock_active());
        first.baton.give();
    }

    unsafe fn switch_context(&self, prev: &ThreadState, next: &ThreadState) {
        log::trace!("switch_context({prev:?} -> {next:?})");
        expect_backing_thread();
        debug_assert!(self.is_cpu_lock_active());
        next.baton.give();
        self.suspend(&prev.baton);
    }

    unsafe fn exit_and_dispatch(&self, prev: &ThreadState, next: &ThreadState) -> ! {
        log::trace!("exit_and_dispatch({prev:?} -> {next:?})");
        expect_backing_thread();

        // Pass the baton after the stack is unwound
        PENDING_HANDOFF.with(|h| *h.borrow_mut() = Some(Arc::clone(&next.baton)));
        panic::resume_unwind(Box::new(ExitSignal));
    }

    unsafe fn enter_cpu_lock(&self) {
        let was_active = self.shared.cpu_lock.swap(true, Ordering::SeqCst);
        debug_assert!(!was_active);
    }

    unsafe fn leave_cpu_lock(&self) {
        // During shutdown, CPU Lock stays active so that nothing touches the
        // kernel state while stacks are unwound
        if !self.shared.shutdown.load(Ordering::SeqCst) {
            let was_active = self.shared.cpu_lock.swap(false, Ordering::SeqCst);
            debug_assert!(was_active);
        }
    }

    unsafe fn try_enter_cpu_lock(&self) -> bool {
        !self.shared.shutdown.load(Ordering::SeqCst)
            && (self.shared.cpu_lock)
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    fn is_cpu_lock_active(&self) -> bool {
        self.shared.cpu_lock.load(Ordering::SeqCst)
    }

    fn is_interrupt_context(&self) -> bool {
        self.shared.in_interrupt.load(Ordering::SeqCst)
            || THREAD_ROLE.with(Cell::get) != ThreadRole::Thread
    }

    fn wait_for_interrupt(&self) {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            panic::resume_unwind(Box::new(ShutdownSignal));
        }
        let Some(kernel) = self.kernel() else {
            return;
        };

        match kernel.next_wake_tick() {
            Ok(Some(_)) => {
                if let Err(e) = timer_interrupt(&kernel) {
                    log::warn!("failed to deliver a timer tick: {e:?}");
                }
            }
            Ok(None) => {
                panic!("deadlock: every thread is blocked, and no thread is sleeping");
            }
            Err(BadContextError::BadContext) => {}
        }
    }
}

/// Run `handler` in an interrupt context on the current kernel thread, then
/// perform the yield the handler requested, if any.
///
/// Returns `BadContext` if called from outside a kernel thread, from an
/// interrupt context, or while CPU Lock is active.
pub fn interrupt<R>(
    kernel: &StdKernel,
    handler: impl FnOnce(&StdKernel) -> R,
) -> Result<R, BadContextError> {
    let port = kernel.port();
    if THREAD_ROLE.with(Cell::get) != ThreadRole::Thread || port.is_cpu_lock_active() {
        return Err(BadContextError::BadContext);
    }
    if port.shared.in_interrupt.swap(true, Ordering::SeqCst) {
        return Err(BadContextError::BadContext);
    }

    let output = handler(kernel);

    port.shared.in_interrupt.store(false, Ordering::SeqCst);
    kernel.leave_interrupt()?;
    Ok(output)
}

/// Deliver one timer tick to the kernel, as if a timer interrupt was taken
/// on the current kernel thread.
pub fn timer_interrupt(kernel: &StdKernel) -> Result<(), TickError> {
    interrupt(kernel, Kernel::timer_tick)?
}

/// Boot a kernel instance and run `main` as its `main` thread. Returns when
/// `main` returns.
///
/// Kernel threads still alive at that point are abandoned. If any kernel
/// thread panics, the panic is propagated to the caller.
pub fn run<R: Send + 'static>(
    config: KernelConfig,
    main: impl FnOnce(&Arc<StdKernel>) -> R + Send + 'static,
) -> R {
    let _ = env_logger::try_init();

    let port = StdPort::new();
    let shared = Arc::clone(&port.shared);
    let kernel = Kernel::new(port, config);
    shared
        .kernel
        .set(Arc::downgrade(&kernel))
        .unwrap_or_else(|_| unreachable!());

    let (event_send, event_recv) = mpsc::channel();
    *shared.event_send.lock() = Some(event_send);

    let output = Arc::new(SpinMutex::new(None));
    let main = {
        let kernel = Arc::clone(&kernel);
        let shared = Arc::clone(&shared);
        let output = Arc::clone(&output);
        move || {
            *output.lock() = Some(main(&kernel));
            log::debug!("main returned");
            shared.finish(Event::Finished);
            panic::resume_unwind(Box::new(ShutdownSignal));
        }
    };

    // Safety: We are the port's startup routine
    if let Err(e) = unsafe { kernel.boot(main) } {
        panic!("failed to boot the kernel: {e:?}");
    }
    drop(kernel);

    let event = event_recv.recv();

    // Wake up every backing thread so that they can unwind and exit
    log::trace!("shutting down");
    shared.shutdown.store(true, Ordering::SeqCst);
    loop {
        let backing_threads = mem::take(&mut *shared.backing_threads.lock());
        if backing_threads.is_empty() {
            break;
        }
        for t in &backing_threads {
            t.baton.cancel();
        }
        for t in backing_threads {
            // Panics are reported through `event`
            let _ = t.join_handle.join();
        }
    }
    *shared.event_send.lock() = None;

    match event {
        Ok(Event::Finished) => {}
        Ok(Event::Panicked(payload)) => panic::resume_unwind(payload),
        Err(mpsc::RecvError) => unreachable!(),
    }

    let output = output.lock().take();
    output.unwrap_or_else(|| unreachable!("`main` finished without an output"))
}
