//! Thread creation, queries, blocking, and termination
use std::sync::Arc;
use tempo_kernel::{
    ExitThreadError, KernelConfig, Lock, QueryThreadError, Semaphore, SetPriorityError,
    SpawnError, ThreadBuilder, ThreadStatus, UnblockError, PRI_DEFAULT, PRI_MAX,
};

use super::utils::{SeqTracker, Trace};

#[test]
fn thread_queries() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let main = kernel.current_thread().unwrap();
        assert_eq!(main.tid(), 1);
        assert_eq!(kernel.thread_name(main).unwrap().as_str(), "main");
        assert_eq!(kernel.thread_status(main), Ok(ThreadStatus::Running));
        assert_eq!(kernel.thread_priority(main), Ok(PRI_DEFAULT));
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT));

        let worker = kernel
            .spawn("a-thread-with-a-long-name", PRI_DEFAULT - 1, || {})
            .unwrap();
        assert_eq!(worker.tid(), 3);
        assert_eq!(format!("{worker:?}"), "ThreadId(3)");
        assert_eq!(
            kernel.thread_name(worker).unwrap().as_str(),
            "a-thread-with-a-"
        );
        assert_eq!(kernel.thread_status(worker), Ok(ThreadStatus::Ready));
        assert_eq!(kernel.thread_priority(worker), Ok(PRI_DEFAULT - 1));

        let dump = format!("{kernel:?}");
        log::debug!("{dump}");
        assert!(dump.contains("\"idle\""));
    });
}

#[test]
fn reclaim_after_exit() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let worker = kernel.spawn("quitter", PRI_DEFAULT + 1, || {}).unwrap();

        // Reclaimed when the next thread switch happens
        assert_eq!(kernel.thread_status(worker), Ok(ThreadStatus::Dying));
        kernel.yield_now().unwrap();
        assert_eq!(
            kernel.thread_status(worker),
            Err(QueryThreadError::BadId)
        );

        // The slot is reused, but the stale handle stays invalid
        let worker2 = kernel.spawn("next", PRI_DEFAULT - 1, || {}).unwrap();
        assert_ne!(worker2, worker);
        assert_eq!(worker2.tid(), worker.tid() + 1);
        assert_eq!(kernel.thread_name(worker), Err(QueryThreadError::BadId));
    });
}

#[test]
fn explicit_exit() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let seq = Arc::new(SeqTracker::new());

        let (seq2, kernel2) = (Arc::clone(&seq), Arc::clone(kernel));
        kernel
            .spawn("exiter", PRI_DEFAULT + 1, move || {
                seq2.expect_and_replace(0, 1);
                // Safety: Only `Arc`s live on this stack, and leaking them is fine
                match unsafe { kernel2.exit_thread() } {
                    Ok(never) => match never {},
                    Err(e) => panic!("exit_thread failed: {e:?}"),
                }
            })
            .unwrap();
        seq.expect_and_replace(1, 2);

        let result = tempo_port_std::interrupt(kernel, |kernel| {
            // Safety: Fails in an interrupt context
            unsafe { kernel.exit_thread() }.err()
        });
        assert_eq!(result, Ok(Some(ExitThreadError::BadContext)));
    });
}

#[test]
fn spawn_errors() {
    tempo_port_std::run(KernelConfig::new().with_max_threads(3), |kernel| {
        assert_eq!(
            kernel.spawn("bad", PRI_MAX + 1, || {}),
            Err(SpawnError::BadParam)
        );
        assert_eq!(
            kernel.set_priority(PRI_MAX + 1),
            Err(SetPriorityError::BadParam)
        );

        // `main`, `idle`, and this one
        kernel.spawn("a", PRI_DEFAULT - 1, || {}).unwrap();
        assert_eq!(
            kernel.spawn("b", PRI_DEFAULT - 1, || {}),
            Err(SpawnError::NoMemory)
        );

        // `a` exits but isn't reclaimed yet
        kernel.set_priority(PRI_DEFAULT - 2).unwrap();
        assert_eq!(
            kernel.spawn("b", PRI_DEFAULT - 1, || {}),
            Err(SpawnError::NoMemory)
        );

        kernel.yield_now().unwrap();
        kernel.spawn("b", PRI_DEFAULT - 1, || {}).unwrap();
    });
}

#[test]
fn block_and_unblock() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let seq = Arc::new(SeqTracker::new());

        let (seq2, kernel2) = (Arc::clone(&seq), Arc::clone(kernel));
        let blocked = kernel
            .spawn("blocked", PRI_DEFAULT + 1, move || {
                seq2.expect_and_replace(0, 1);
                kernel2.block().unwrap();
                seq2.expect_and_replace(2, 3);
            })
            .unwrap();
        seq.expect_and_replace(1, 2);
        assert_eq!(kernel.thread_status(blocked), Ok(ThreadStatus::Blocked));

        // Doesn't preempt the caller
        kernel.unblock(blocked).unwrap();
        assert_eq!(kernel.thread_status(blocked), Ok(ThreadStatus::Ready));
        assert_eq!(kernel.unblock(blocked), Err(UnblockError::BadObjectState));

        kernel.yield_now().unwrap();
        seq.expect_and_replace(3, 4);
    });
}

/// `unblock` can't be used to wake up a thread waiting for something else.
#[test]
fn unblock_wrong_state() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let main = kernel.current_thread().unwrap();
        assert_eq!(kernel.unblock(main), Err(UnblockError::BadObjectState));

        let sem = Arc::new(Semaphore::new(kernel, 0).unwrap());
        let sem2 = Arc::clone(&sem);
        let waiter = kernel
            .spawn("waiter", PRI_DEFAULT + 1, move || sem2.down().unwrap())
            .unwrap();
        assert_eq!(kernel.unblock(waiter), Err(UnblockError::BadObjectState));
        assert_eq!(kernel.thread_status(waiter), Ok(ThreadStatus::Blocked));
        sem.up().unwrap();
        assert_eq!(kernel.thread_status(waiter), Ok(ThreadStatus::Dying));
    });
}

#[test]
fn user_tick_accounting() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let kernel2 = Arc::clone(kernel);
        ThreadBuilder::new()
            .name("user")
            .priority(PRI_DEFAULT + 1)
            .user(true)
            .spawn(kernel, move || {
                for _ in 0..3 {
                    tempo_port_std::timer_interrupt(&kernel2).unwrap();
                }
            })
            .unwrap();
        tempo_port_std::timer_interrupt(kernel).unwrap();

        let stats = kernel.stats().unwrap();
        assert_eq!(stats.user_ticks, 3);
        assert_eq!(stats.kernel_ticks, 1);
        assert_eq!(stats.idle_ticks, 0);
        assert_eq!(
            stats.to_string(),
            "0 idle ticks, 1 kernel ticks, 3 user ticks"
        );
    });
}

/// Locks held by an exiting thread are released on its behalf.
#[test]
fn exit_while_holding_lock() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        let lock = Arc::new(Lock::new(kernel).unwrap());
        let sem = Arc::new(Semaphore::new(kernel, 0).unwrap());

        let (t2, lock2, sem2) = (t.clone(), Arc::clone(&lock), Arc::clone(&sem));
        let holder = kernel
            .spawn("holder", PRI_DEFAULT + 1, move || {
                lock2.acquire().unwrap();
                sem2.down().unwrap();
                t2.push("holder");
            })
            .unwrap();

        let (t2, lock2) = (t.clone(), Arc::clone(&lock));
        kernel
            .spawn("waiter", PRI_DEFAULT + 2, move || {
                lock2.acquire().unwrap();
                t2.push("waiter");
                lock2.release().unwrap();
            })
            .unwrap();
        assert_eq!(kernel.thread_priority(holder), Ok(PRI_DEFAULT + 2));

        sem.up().unwrap();
        t.push("main");
        assert_eq!(lock.owner(), Ok(None));
        assert_eq!(lock.try_acquire(), Ok(true));
    });
    assert_eq!(trace.take(), ["holder", "waiter", "main"]);
}

#[test]
#[should_panic(expected = "boom")]
fn thread_panic_is_propagated() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        kernel
            .spawn("panicker", PRI_DEFAULT + 1, || panic!("boom"))
            .unwrap();
        unreachable!();
    });
}

#[test]
#[should_panic(expected = "deadlock")]
fn deadlock_is_detected() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let sem = Semaphore::new(kernel, 0).unwrap();
        sem.down().unwrap();
    });
}

#[test]
fn run_returns_output() {
    let output = tempo_port_std::run(KernelConfig::new(), |kernel| {
        kernel.current_thread().unwrap().tid() * 10
    });
    assert_eq!(output, 10);
}
