//! Threads
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use arrayvec::ArrayString;
use core::{convert::Infallible, fmt, mem};

use crate::{
    error::{
        BadContextError, BadIdError, BlockError, BootError, ExitThreadError,
        GetCurrentThreadError, QueryThreadError, SetPriorityError, SpawnError, UnblockError,
        YieldError,
    },
    klock::CpuLockGuard,
    lock::LockId,
    semaphore::SemaphoreId,
    state::State,
    timer::Tick,
    utils::PRIO_BITMAP_LEN,
    Kernel, Port,
};

pub(crate) mod readyqueue;

/// A thread priority. Larger values mean higher priorities.
pub type Priority = u8;

/// The lowest priority. The idle thread runs at this priority.
pub const PRI_MIN: Priority = 0;
/// The priority of `main` and the default priority of spawned threads.
pub const PRI_DEFAULT: Priority = 31;
/// The highest priority.
pub const PRI_MAX: Priority = 63;

pub(crate) const NUM_PRIORITY_LEVELS: usize = PRI_MAX as usize + 1;

const _: () = assert!(NUM_PRIORITY_LEVELS <= PRIO_BITMAP_LEN);

/// Stamped on every live thread record. A mismatch means the record was
/// overwritten by something else.
const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// The maximum length of a thread name, in bytes.
pub const THREAD_NAME_LEN: usize = 16;

/// A thread name. Longer names are truncated.
pub type ThreadName = ArrayString<THREAD_NAME_LEN>;

/// Truncate `name` to [`THREAD_NAME_LEN`] bytes without splitting a
/// character.
fn truncate_name(name: &str) -> ThreadName {
    let mut out = ThreadName::new();
    for ch in name.chars() {
        if out.try_push(ch).is_err() {
            break;
        }
    }
    out
}

/// Identifies a thread.
///
/// A `ThreadId` stays unique for the lifetime of the kernel; a handle to a
/// reclaimed thread never aliases a newer thread occupying the same storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId {
    slot: usize,
    tid: u32,
}

impl ThreadId {
    pub(crate) const fn from_raw_parts(slot: usize, tid: u32) -> Self {
        Self { slot, tid }
    }

    /// Get the thread number. The thread created by [`Kernel::boot`] is
    /// numbered `1`, and every subsequently created thread gets the next
    /// number.
    pub const fn tid(self) -> u32 {
        self.tid
    }

    pub(crate) const fn slot(self) -> usize {
        self.slot
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ThreadId({})", self.tid)
    }
}

/// The scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadStatus {
    /// The thread is currently executing.
    Running,
    /// The thread is in the ready queue.
    Ready,
    /// The thread is waiting for something. The idle thread is also reported
    /// as Blocked while it's not running.
    Blocked,
    /// The thread has exited and its record is about to be reclaimed.
    Dying,
}

/// The kernel-side structure a thread handle is held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Unlinked,
    /// In the ready queue
    Ready,
    /// In a semaphore's wait set
    Semaphore(SemaphoreId),
    /// In the sleep queue
    Sleep,
    /// Blocked by [`Kernel::block`], waiting for [`Kernel::unblock`]
    Parked,
}

/// *Thread control block* - the state data of a thread.
pub(crate) struct ThreadCb<TS> {
    magic: u32,
    pub(crate) tid: u32,
    pub(crate) name: ThreadName,
    pub(crate) st: ThreadStatus,

    /// The effective priority. Every scheduling decision is based on this
    /// value.
    ///
    /// Invariant: `priority >= base_priority`
    pub(crate) priority: Priority,
    /// The priority set by the thread itself. `priority` returns to this value
    /// when it has no donors.
    pub(crate) base_priority: Priority,

    /// The lock this thread is blocked on.
    pub(crate) waiting_on: Option<LockId>,
    /// The locks this thread owns, in the acquisition order.
    pub(crate) held_locks: Vec<LockId>,

    pub(crate) link: Link,
    /// The tick at which the thread should be woken up. Only meaningful while
    /// `link == Link::Sleep`.
    pub(crate) wake_tick: Tick,

    /// Charge timer ticks spent by this thread as user ticks.
    pub(crate) user: bool,

    pub(crate) port_state: Arc<TS>,
}

impl<TS> fmt::Debug for ThreadCb<TS> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadCb")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("st", &self.st)
            .field("priority", &self.priority)
            .field("base_priority", &self.base_priority)
            .field("waiting_on", &self.waiting_on)
            .field("held_locks", &self.held_locks)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

impl<TS> ThreadCb<TS> {
    fn check_integrity(&self, id: ThreadId) {
        assert_eq!(
            self.magic, THREAD_MAGIC,
            "the record of {id:?} is corrupted"
        );
        assert_eq!(self.tid, id.tid, "{id:?} was reclaimed");
    }
}

impl<TS> State<TS> {
    fn allocate_tid(&mut self) -> u32 {
        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);
        tid
    }

    /// Create a thread record. The new thread is Blocked and unlinked.
    pub(crate) fn insert_thread(
        &mut self,
        name: &str,
        priority: Priority,
        user: bool,
        port_state: Arc<TS>,
    ) -> ThreadId {
        debug_assert!(priority <= PRI_MAX);
        let tid = self.allocate_tid();
        let slot = self.threads.insert(ThreadCb {
            magic: THREAD_MAGIC,
            tid,
            name: truncate_name(name),
            st: ThreadStatus::Blocked,
            priority,
            base_priority: priority,
            waiting_on: None,
            held_locks: Vec::new(),
            link: Link::Unlinked,
            wake_tick: 0,
            user,
            port_state,
        });
        ThreadId { slot, tid }
    }

    /// Look up a thread by a user-supplied handle.
    pub(crate) fn thread(&self, id: ThreadId) -> Result<&ThreadCb<TS>, BadIdError> {
        match self.threads.get(id.slot) {
            Some(cb) if cb.tid == id.tid => {
                cb.check_integrity(id);
                Ok(cb)
            }
            _ => Err(BadIdError::BadId),
        }
    }

    /// Get the record of a thread known to be alive.
    pub(crate) fn cb(&self, id: ThreadId) -> &ThreadCb<TS> {
        let cb = &self.threads[id.slot];
        cb.check_integrity(id);
        cb
    }

    /// Get the record of a thread known to be alive.
    pub(crate) fn cb_mut(&mut self, id: ThreadId) -> &mut ThreadCb<TS> {
        let cb = &mut self.threads[id.slot];
        cb.check_integrity(id);
        cb
    }

    /// Get the running thread, checking the integrity of its record.
    pub(crate) fn running_thread(&self) -> Result<ThreadId, BadContextError> {
        let id = self.running.ok_or(BadContextError::BadContext)?;
        let cb = self.cb(id);
        debug_assert_eq!(cb.st, ThreadStatus::Running);
        Ok(id)
    }

    pub(crate) fn is_idle(&self, id: ThreadId) -> bool {
        self.idle == Some(id)
    }

    /// Record that `id` is now held by the structure `link`.
    pub(crate) fn link(&mut self, id: ThreadId, link: Link) {
        let cb = self.cb_mut(id);
        assert_eq!(cb.link, Link::Unlinked, "{id:?} is already linked");
        cb.link = link;
    }

    pub(crate) fn unlink(&mut self, id: ThreadId) -> Link {
        mem::replace(&mut self.cb_mut(id).link, Link::Unlinked)
    }

    /// Transition a Blocked thread into the Ready state and insert it into
    /// the ready queue. The caller must have unlinked it from whatever it was
    /// waiting on.
    pub(crate) fn make_ready(&mut self, id: ThreadId) {
        debug_assert!(!self.is_idle(id));
        let cb = self.cb_mut(id);
        assert_eq!(cb.st, ThreadStatus::Blocked, "{id:?} is not blocked");
        assert_eq!(cb.link, Link::Unlinked);
        cb.st = ThreadStatus::Ready;
        cb.link = Link::Ready;
        let priority = cb.priority;
        self.ready_queue.push_back(id, priority);
        log::trace!("{id:?} is ready at priority {priority}");
    }

    /// Update the effective priority of `id`, keeping the ready queue sorted.
    ///
    /// Wait sets are not reordered here; they are sorted when a waiter is
    /// chosen.
    pub(crate) fn set_effective_priority(&mut self, id: ThreadId, priority: Priority) {
        let cb = self.cb_mut(id);
        let old_priority = mem::replace(&mut cb.priority, priority);
        if cb.link == Link::Ready {
            self.ready_queue.reorder(id, priority, old_priority);
        }
    }

    /// Return `true` if the head of the ready queue should take over the
    /// running thread.
    pub(crate) fn should_preempt(&self) -> bool {
        let (Some(running), Some(top)) = (self.running, self.ready_queue.highest_priority())
        else {
            return false;
        };
        self.is_idle(running) || top > self.cb(running).priority
    }

    /// Free the records of Dying threads.
    fn reap_dying_threads(&mut self) {
        while let Some(id) = self.destruction_req.pop() {
            debug_assert_ne!(self.running, Some(id));
            let cb = self.threads.remove(id.slot);
            debug_assert_eq!(cb.st, ThreadStatus::Dying);
            log::debug!("reclaimed {id:?} ({})", cb.name);
        }
    }

    /// Transition the running thread `prev` into `new_status` and elect the
    /// next thread to run. Returns the elected thread, which may be `prev`
    /// itself.
    ///
    /// - `Ready`: `prev` goes to the back of its priority level in the ready
    ///   queue (the idle thread never enters the ready queue).
    /// - `Blocked`: the caller has already linked `prev` to whatever it's
    ///   waiting on.
    /// - `Dying`: `prev` is queued for reclamation.
    pub(crate) fn switch_out(&mut self, prev: ThreadId, new_status: ThreadStatus) -> ThreadId {
        self.reap_dying_threads();

        let is_idle = self.is_idle(prev);
        let cb = self.cb_mut(prev);
        assert_eq!(cb.st, ThreadStatus::Running);
        match new_status {
            ThreadStatus::Ready if is_idle => {
                cb.st = ThreadStatus::Blocked;
            }
            ThreadStatus::Ready => {
                debug_assert_eq!(cb.link, Link::Unlinked);
                cb.st = ThreadStatus::Ready;
                cb.link = Link::Ready;
                let priority = cb.priority;
                self.ready_queue.push_back(prev, priority);
            }
            ThreadStatus::Blocked => {
                debug_assert!(is_idle || cb.link != Link::Unlinked);
                cb.st = ThreadStatus::Blocked;
            }
            ThreadStatus::Dying => {
                debug_assert_eq!(cb.link, Link::Unlinked);
                cb.st = ThreadStatus::Dying;
                self.destruction_req.push(prev);
            }
            ThreadStatus::Running => unreachable!(),
        }

        self.choose_next_running_thread()
    }

    /// Take the head of the ready queue (or the idle thread if the ready queue
    /// is empty) and make it the running thread.
    fn choose_next_running_thread(&mut self) -> ThreadId {
        let next = match self.ready_queue.pop_front() {
            Some(id) => {
                self.cb_mut(id).link = Link::Unlinked;
                id
            }
            None => self.idle.expect("the idle thread does not exist"),
        };
        self.cb_mut(next).st = ThreadStatus::Running;
        self.running = Some(next);
        self.timer.slice_ticks = 0;
        next
    }
}

/// Builds a new thread.
///
/// # Examples
///
/// ```rust,ignore
/// let id = ThreadBuilder::new()
///     .name("worker")
///     .priority(PRI_DEFAULT + 1)
///     .spawn(&kernel, || log::info!("hello"))?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ThreadBuilder<'a> {
    name: &'a str,
    priority: Priority,
    user: bool,
}

impl<'a> ThreadBuilder<'a> {
    pub const fn new() -> Self {
        Self {
            name: "",
            priority: PRI_DEFAULT,
            user: false,
        }
    }

    /// Set the thread's name. Names longer than [`THREAD_NAME_LEN`] bytes
    /// are truncated.
    pub const fn name(self, name: &'a str) -> Self {
        Self { name, ..self }
    }

    /// Set the thread's base priority. The default value is [`PRI_DEFAULT`].
    pub const fn priority(self, priority: Priority) -> Self {
        Self { priority, ..self }
    }

    /// Charge the timer ticks spent by this thread as [`user_ticks`].
    ///
    /// [`user_ticks`]: crate::Stats::user_ticks
    pub const fn user(self, user: bool) -> Self {
        Self { user, ..self }
    }

    /// Create the thread and make it Ready. If the new thread outranks the
    /// caller, the caller yields before this method returns.
    pub fn spawn<P: Port>(
        self,
        kernel: &Arc<Kernel<P>>,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<ThreadId, SpawnError> {
        kernel.spawn_inner(&self, Box::new(entry))
    }
}

impl Default for ThreadBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Port> Kernel<P> {
    /// Create the `main` and idle threads and start running `main`.
    ///
    /// `main` runs at [`PRI_DEFAULT`] and gets the thread number `1`.
    ///
    /// # Safety
    ///
    /// This is meant to be called by the port's startup routine, exactly once,
    /// from outside any thread.
    pub unsafe fn boot(
        self: &Arc<Self>,
        main: impl FnOnce() + Send + 'static,
    ) -> Result<ThreadId, BootError> {
        let mut lock = self.lock_cpu()?;
        let st = self.state.write(&mut *lock);
        if st.running.is_some() {
            return Err(BootError::BadObjectState);
        }

        let main_state = self
            .port
            .initialize_thread_state("main", self.thread_entry(Box::new(main)))
            .ok_or(BootError::NoMemory)?;
        let idle_entry = {
            let kernel = Arc::clone(self);
            Box::new(move || {
                kernel.idle_loop();
            })
        };
        let idle_state = self
            .port
            .initialize_thread_state("idle", self.thread_entry(idle_entry))
            .ok_or(BootError::NoMemory)?;

        let main_id = st.insert_thread("main", PRI_DEFAULT, false, Arc::new(main_state));
        let idle_id = st.insert_thread("idle", PRI_MIN, false, Arc::new(idle_state));
        st.idle = Some(idle_id);
        st.cb_mut(main_id).st = ThreadStatus::Running;
        st.running = Some(main_id);

        let first = Arc::clone(&st.cb(main_id).port_state);
        log::debug!("booting with main = {main_id:?}, idle = {idle_id:?}");

        // The CPU Lock state is handed over to `main`
        mem::forget(lock);

        // Safety: CPU Lock active
        unsafe { self.port.dispatch_first_thread(&first) };

        Ok(main_id)
    }

    /// Wrap a thread entry point with the code that leaves the initial CPU
    /// Lock state and exits the thread on return.
    fn thread_entry(self: &Arc<Self>, entry: Box<dyn FnOnce() + Send>) -> Box<dyn FnOnce() + Send> {
        let kernel = Arc::clone(self);
        Box::new(move || {
            // Safety: A thread is dispatched for the first time with CPU Lock
            //         active, and we own that CPU Lock state
            unsafe { kernel.port.leave_cpu_lock() };

            entry();

            // Safety: Nothing on this stack is used after this point
            match unsafe { kernel.exit_thread() } {
                Ok(x) => match x {},
                Err(e) => panic!("failed to exit a thread: {e:?}"),
            }
        })
    }

    /// The body of the idle thread. It steps aside whenever another thread is
    /// Ready, and otherwise waits for an interrupt.
    fn idle_loop(&self) -> ! {
        loop {
            if let Ok(mut lock) = self.lock_cpu() {
                self.dispatch(&mut lock, ThreadStatus::Blocked);
            }
            self.port.wait_for_interrupt();
        }
    }

    /// Transition the running thread into `new_status` and switch to the
    /// thread elected by [`State::switch_out`]. Returns when the calling
    /// thread is dispatched again.
    pub(crate) fn dispatch(&self, lock: &mut CpuLockGuard<'_, P>, new_status: ThreadStatus) {
        debug_assert_ne!(new_status, ThreadStatus::Dying);
        let st = self.state.write(&mut **lock);
        let Some(prev) = st.running else {
            return;
        };

        let next = st.switch_out(prev, new_status);
        if next == prev {
            return;
        }

        let prev_state = Arc::clone(&st.cb(prev).port_state);
        let next_state = Arc::clone(&st.cb(next).port_state);
        log::trace!("switching from {prev:?} to {next:?}");

        // Safety: CPU Lock active
        unsafe { self.port.switch_context(&prev_state, &next_state) };
    }

    /// Transition the running thread into the Blocked state. Returns when
    /// woken up.
    ///
    /// The caller must have linked the running thread to whatever will wake
    /// it up, and the current context must be a thread context.
    pub(crate) fn wait_until_woken_up(&self, lock: &mut CpuLockGuard<'_, P>) {
        debug_assert!(!self.port.is_interrupt_context());
        self.dispatch(lock, ThreadStatus::Blocked);
    }

    /// Relinquish CPU Lock. Before that, if there's a Ready thread that
    /// outranks the running thread, yield to it.
    ///
    /// In an interrupt context, the yield is deferred until the interrupt
    /// handler returns.
    ///
    /// System services that transition a thread into the Ready state or lower
    /// the running thread's priority should call this before returning to the
    /// caller.
    pub(crate) fn unlock_cpu_and_check_preemption(&self, mut lock: CpuLockGuard<'_, P>) {
        let st = self.state.write(&mut *lock);
        if !st.should_preempt() {
            return;
        }

        if self.port.is_interrupt_context() {
            st.timer.yield_on_return = true;
            return;
        }

        self.dispatch(&mut lock, ThreadStatus::Ready);
    }

    fn spawn_inner(
        self: &Arc<Self>,
        builder: &ThreadBuilder<'_>,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<ThreadId, SpawnError> {
        if builder.priority > PRI_MAX {
            return Err(SpawnError::BadParam);
        }

        let mut lock = self.lock_cpu()?;
        let st = self.state.write(&mut *lock);
        if st.running.is_none() {
            return Err(SpawnError::BadContext);
        }
        if st.threads.len() >= st.config.max_threads {
            log::debug!("can't spawn {:?}: too many threads", builder.name);
            return Err(SpawnError::NoMemory);
        }

        let port_state = self
            .port
            .initialize_thread_state(builder.name, self.thread_entry(entry))
            .ok_or(SpawnError::NoMemory)?;
        let id = st.insert_thread(
            builder.name,
            builder.priority,
            builder.user,
            Arc::new(port_state),
        );
        st.make_ready(id);
        log::debug!(
            "spawned {id:?} ({:?}) at priority {}",
            builder.name,
            builder.priority
        );

        self.unlock_cpu_and_check_preemption(lock);
        Ok(id)
    }

    /// Create a thread named `name` with base priority `priority` and make it
    /// Ready. Equivalent to using [`ThreadBuilder`].
    ///
    /// If the new thread outranks the caller, the caller yields before this
    /// method returns. Thus the new thread may run, and even exit, before
    /// this method returns.
    pub fn spawn(
        self: &Arc<Self>,
        name: &str,
        priority: Priority,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<ThreadId, SpawnError> {
        ThreadBuilder::new()
            .name(name)
            .priority(priority)
            .spawn(self, entry)
    }

    /// Get the running thread.
    pub fn current_thread(&self) -> Result<ThreadId, GetCurrentThreadError> {
        self.expect_thread_context()?;
        let lock = self.lock_cpu()?;
        Ok(self.state.read(&*lock).running_thread()?)
    }

    /// Get the name of a thread.
    pub fn thread_name(&self, thread: ThreadId) -> Result<ThreadName, QueryThreadError> {
        let lock = self.lock_cpu()?;
        Ok(self.state.read(&*lock).thread(thread)?.name)
    }

    /// Get the scheduling state of a thread.
    pub fn thread_status(&self, thread: ThreadId) -> Result<ThreadStatus, QueryThreadError> {
        let lock = self.lock_cpu()?;
        Ok(self.state.read(&*lock).thread(thread)?.st)
    }

    /// Get the effective priority of a thread.
    pub fn thread_priority(&self, thread: ThreadId) -> Result<Priority, QueryThreadError> {
        let lock = self.lock_cpu()?;
        Ok(self.state.read(&*lock).thread(thread)?.priority)
    }

    /// Get the base priority of a thread.
    pub fn thread_base_priority(&self, thread: ThreadId) -> Result<Priority, QueryThreadError> {
        let lock = self.lock_cpu()?;
        Ok(self.state.read(&*lock).thread(thread)?.base_priority)
    }

    /// Get the effective priority of the running thread.
    pub fn priority(&self) -> Result<Priority, QueryThreadError> {
        self.expect_thread_context()?;
        let lock = self.lock_cpu()?;
        let st = self.state.read(&*lock);
        Ok(st.cb(st.running_thread()?).priority)
    }

    /// Set the base priority of the running thread.
    ///
    /// The effective priority becomes the higher of the new base priority and
    /// the priorities donated by the waiters of the locks the thread holds.
    /// If this makes another Ready thread outrank the caller, the caller
    /// yields.
    pub fn set_priority(&self, priority: Priority) -> Result<(), SetPriorityError> {
        if priority > PRI_MAX {
            return Err(SetPriorityError::BadParam);
        }
        self.expect_thread_context()?;

        let mut lock = self.lock_cpu()?;
        let st = self.state.write(&mut *lock);
        let cur = st.running_thread()?;
        st.cb_mut(cur).base_priority = priority;
        st.restore_priority(cur);
        log::trace!(
            "{cur:?}: base priority = {priority}, effective priority = {}",
            st.cb(cur).priority
        );

        self.unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Move the running thread to the back of its priority level in the
    /// ready queue and run the head of the ready queue. This may choose the
    /// caller again.
    pub fn yield_now(&self) -> Result<(), YieldError> {
        self.expect_thread_context()?;
        let mut lock = self.lock_cpu()?;
        self.state.read(&*lock).running_thread()?;
        self.dispatch(&mut lock, ThreadStatus::Ready);
        Ok(())
    }

    /// Block the running thread until another context calls
    /// [`Self::unblock`] on it.
    pub fn block(&self) -> Result<(), BlockError> {
        self.expect_thread_context()?;
        let mut lock = self.lock_cpu()?;
        let st = self.state.write(&mut *lock);
        let cur = st.running_thread()?;
        if st.is_idle(cur) {
            return Err(BlockError::BadObjectState);
        }
        st.link(cur, Link::Parked);
        log::trace!("{cur:?} blocked");
        self.wait_until_woken_up(&mut lock);
        Ok(())
    }

    /// Make a thread blocked by [`Self::block`] Ready.
    ///
    /// This doesn't preempt the caller even if `thread` outranks it. This
    /// method may be called from an interrupt context.
    pub fn unblock(&self, thread: ThreadId) -> Result<(), UnblockError> {
        let mut lock = self.lock_cpu()?;
        let st = self.state.write(&mut *lock);
        let cb = st.thread(thread)?;
        if cb.st != ThreadStatus::Blocked || cb.link != Link::Parked {
            return Err(UnblockError::BadObjectState);
        }
        st.unlink(thread);
        st.make_ready(thread);
        Ok(())
    }

    /// Terminate the running thread. Locks it still owns are released.
    ///
    /// The thread's record is reclaimed after the next thread is dispatched.
    ///
    /// # Safety
    ///
    /// The stack of the calling thread is discarded without running any
    /// destructors.
    pub unsafe fn exit_thread(&self) -> Result<Infallible, ExitThreadError> {
        self.expect_thread_context()?;
        let mut lock = self.lock_cpu()?;
        let st = self.state.write(&mut *lock);
        let prev = st.running_thread()?;
        if st.is_idle(prev) {
            return Err(ExitThreadError::BadObjectState);
        }

        st.abandon_held_locks(prev);

        let next = st.switch_out(prev, ThreadStatus::Dying);
        let prev_state = Arc::clone(&st.cb(prev).port_state);
        let next_state = Arc::clone(&st.cb(next).port_state);
        log::debug!("{prev:?} exited, switching to {next:?}");

        // The CPU Lock state is handed over to `next`
        mem::forget(lock);

        // Safety: CPU Lock active
        unsafe { self.port.exit_and_dispatch(&prev_state, &next_state) }
    }
}
