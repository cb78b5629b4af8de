//! Semaphores, locks, priority donation, and condition variables
use std::sync::Arc;
use tempo_kernel::{
    AcquireLockError, Condvar, KernelConfig, Lock, ReleaseLockError, Semaphore,
    SignalCondvarError, ThreadStatus, WaitCondvarError, PRI_DEFAULT,
};

use super::utils::{SeqTracker, Trace};

#[test]
fn semaphore_wakes_highest_priority() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        let sem = Arc::new(Semaphore::new(kernel, 0).unwrap());
        for (name, priority) in [("p3", 3), ("p7", 7), ("p5", 5)] {
            let (t, sem) = (t.clone(), Arc::clone(&sem));
            kernel
                .spawn(name, PRI_DEFAULT + priority, move || {
                    sem.down().unwrap();
                    t.push(name);
                })
                .unwrap();
        }

        for _ in 0..3 {
            sem.up().unwrap();
        }
        assert_eq!(sem.value(), Ok(0));
    });
    assert_eq!(trace.take(), ["p7", "p5", "p3"]);
}

#[test]
fn semaphore_counts() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let sem = Semaphore::new(kernel, 2).unwrap();
        assert_eq!(sem.try_down(), Ok(true));
        sem.down().unwrap();
        assert_eq!(sem.try_down(), Ok(false));
        sem.up().unwrap();
        assert_eq!(sem.value(), Ok(1));
    });
}

/// A lower-priority waiter doesn't preempt the thread that wakes it up.
#[test]
fn semaphore_up_without_preemption() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let seq = Arc::new(SeqTracker::new());
        let sem = Arc::new(Semaphore::new(kernel, 0).unwrap());

        let (seq2, sem2) = (Arc::clone(&seq), Arc::clone(&sem));
        kernel
            .spawn("low", PRI_DEFAULT + 1, move || {
                seq2.expect_and_replace(0, 1);
                sem2.down().unwrap();
                seq2.expect_and_replace(3, 4);
            })
            .unwrap();
        seq.expect_and_replace(1, 2);

        // Make the waiter a lower-priority thread
        kernel.set_priority(PRI_DEFAULT + 2).unwrap();
        sem.up().unwrap();
        seq.expect_and_replace(2, 3);
        kernel.set_priority(PRI_DEFAULT).unwrap();
        seq.expect_and_replace(4, 5);
    });
}

#[test]
fn lock_ownership() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let lock = Arc::new(Lock::new(kernel).unwrap());
        let main = kernel.current_thread().unwrap();

        assert_eq!(lock.owner(), Ok(None));
        lock.acquire().unwrap();
        assert_eq!(lock.owner(), Ok(Some(main)));
        assert_eq!(lock.held_by_current(), Ok(true));
        assert_eq!(lock.acquire(), Err(AcquireLockError::WouldDeadlock));

        let lock2 = Arc::clone(&lock);
        kernel
            .spawn("other", PRI_DEFAULT + 1, move || {
                assert_eq!(lock2.held_by_current(), Ok(false));
                assert_eq!(lock2.try_acquire(), Ok(false));
                assert_eq!(lock2.release(), Err(ReleaseLockError::NotOwner));
            })
            .unwrap();

        lock.release().unwrap();
        assert_eq!(lock.owner(), Ok(None));
        assert_eq!(lock.release(), Err(ReleaseLockError::NotOwner));
        assert_eq!(lock.try_acquire(), Ok(true));
        lock.release().unwrap();
    });
}

/// Failing `try_acquire` leaves the owner and the waiters alone.
#[test]
fn try_acquire_held_lock() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        let lock = Arc::new(Lock::new(kernel).unwrap());
        let sem = Arc::new(Semaphore::new(kernel, 0).unwrap());

        // `holder` takes the lock and waits for `sem`
        let (t2, lock2, sem2) = (t.clone(), Arc::clone(&lock), Arc::clone(&sem));
        let holder = kernel
            .spawn("holder", PRI_DEFAULT + 2, move || {
                lock2.acquire().unwrap();
                sem2.down().unwrap();
                t2.push("holder");
                lock2.release().unwrap();
            })
            .unwrap();

        // `waiter` blocks in `acquire`
        let (t2, lock2) = (t.clone(), Arc::clone(&lock));
        let waiter = kernel
            .spawn("waiter", PRI_DEFAULT + 1, move || {
                lock2.acquire().unwrap();
                t2.push("waiter");
                lock2.release().unwrap();
            })
            .unwrap();
        assert_eq!(kernel.thread_status(waiter), Ok(ThreadStatus::Blocked));

        for _ in 0..5 {
            assert_eq!(lock.try_acquire(), Ok(false));
        }
        assert_eq!(lock.owner(), Ok(Some(holder)));
        assert_eq!(lock.held_by_current(), Ok(false));
        assert_eq!(kernel.thread_status(waiter), Ok(ThreadStatus::Blocked));
        assert_eq!(kernel.thread_priority(holder), Ok(PRI_DEFAULT + 2));
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT));

        sem.up().unwrap();
        t.push("main");
        assert_eq!(lock.owner(), Ok(None));
    });
    assert_eq!(trace.take(), ["holder", "waiter", "main"]);
}

#[test]
fn single_donation() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        let lock = Arc::new(Lock::new(kernel).unwrap());
        let main = kernel.current_thread().unwrap();
        lock.acquire().unwrap();

        let (t2, lock2) = (t.clone(), Arc::clone(&lock));
        kernel
            .spawn("high", PRI_DEFAULT + 10, move || {
                lock2.acquire().unwrap();
                t2.push("high");
                lock2.release().unwrap();
            })
            .unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT + 10));
        assert_eq!(kernel.thread_base_priority(main), Ok(PRI_DEFAULT));

        // Doesn't preempt us because of the donation
        let t2 = t.clone();
        kernel
            .spawn("medium", PRI_DEFAULT + 5, move || t2.push("medium"))
            .unwrap();
        t.push("main: release");

        lock.release().unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT));
        t.push("main");
    });
    assert_eq!(trace.take(), ["main: release", "high", "medium", "main"]);
}

#[test]
fn nested_donation() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        let lock_a = Arc::new(Lock::new(kernel).unwrap());
        let lock_b = Arc::new(Lock::new(kernel).unwrap());
        lock_a.acquire().unwrap();

        // `medium` owns `lock_b` and waits for `lock_a`
        let (t2, a2, b2) = (t.clone(), Arc::clone(&lock_a), Arc::clone(&lock_b));
        let medium = kernel
            .spawn("medium", PRI_DEFAULT + 2, move || {
                b2.acquire().unwrap();
                a2.acquire().unwrap();
                t2.push("medium");
                a2.release().unwrap();
                b2.release().unwrap();
                t2.push("medium: done");
            })
            .unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT + 2));

        // `high` waits for `lock_b`
        let (t2, b2) = (t.clone(), Arc::clone(&lock_b));
        kernel
            .spawn("high", PRI_DEFAULT + 4, move || {
                b2.acquire().unwrap();
                t2.push("high");
                b2.release().unwrap();
            })
            .unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT + 4));
        assert_eq!(kernel.thread_priority(medium), Ok(PRI_DEFAULT + 4));
        assert_eq!(kernel.thread_base_priority(medium), Ok(PRI_DEFAULT + 2));

        lock_a.release().unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT));
        t.push("main");
    });
    assert_eq!(trace.take(), ["medium", "high", "medium: done", "main"]);
}

#[test]
fn multiple_donations() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        let lock_a = Arc::new(Lock::new(kernel).unwrap());
        let lock_b = Arc::new(Lock::new(kernel).unwrap());
        lock_a.acquire().unwrap();
        lock_b.acquire().unwrap();

        for (name, priority, lock) in [("a", 2, &lock_a), ("b", 4, &lock_b)] {
            let (t2, lock2) = (t.clone(), Arc::clone(lock));
            kernel
                .spawn(name, PRI_DEFAULT + priority, move || {
                    lock2.acquire().unwrap();
                    t2.push(name);
                    lock2.release().unwrap();
                })
                .unwrap();
        }
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT + 4));

        lock_b.release().unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT + 2));
        t.push("main: released b");

        lock_a.release().unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT));
        t.push("main: released a");
    });
    assert_eq!(
        trace.take(),
        ["b", "main: released b", "a", "main: released a"]
    );
}

/// Changing the base priority doesn't cancel donations.
#[test]
fn set_priority_while_donated() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let lock = Arc::new(Lock::new(kernel).unwrap());
        lock.acquire().unwrap();

        let lock2 = Arc::clone(&lock);
        kernel
            .spawn("high", PRI_DEFAULT + 10, move || {
                lock2.acquire().unwrap();
                lock2.release().unwrap();
            })
            .unwrap();

        kernel.set_priority(PRI_DEFAULT - 5).unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT + 10));
        kernel.set_priority(PRI_DEFAULT + 20).unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT + 20));
        kernel.set_priority(PRI_DEFAULT - 5).unwrap();

        lock.release().unwrap();
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT - 5));
    });
}

#[test]
fn condvar_signal_order() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        let lock = Arc::new(Lock::new(kernel).unwrap());
        let cv = Arc::new(Condvar::new(kernel).unwrap());
        for (name, priority) in [("p2", 2), ("p8", 8), ("p5", 5)] {
            let (t2, lock2, cv2) = (t.clone(), Arc::clone(&lock), Arc::clone(&cv));
            kernel
                .spawn(name, PRI_DEFAULT + priority, move || {
                    lock2.acquire().unwrap();
                    cv2.wait(&lock2).unwrap();
                    assert_eq!(lock2.held_by_current(), Ok(true));
                    t2.push(name);
                    lock2.release().unwrap();
                })
                .unwrap();
        }

        for _ in 0..3 {
            lock.acquire().unwrap();
            cv.signal(&lock).unwrap();
            lock.release().unwrap();
        }
        t.push("main");
    });
    assert_eq!(trace.take(), ["p8", "p5", "p2", "main"]);
}

#[test]
fn condvar_broadcast() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        let lock = Arc::new(Lock::new(kernel).unwrap());
        let cv = Arc::new(Condvar::new(kernel).unwrap());
        for (name, priority) in [("p2", 2), ("p8", 8), ("p5", 5)] {
            let (t2, lock2, cv2) = (t.clone(), Arc::clone(&lock), Arc::clone(&cv));
            kernel
                .spawn(name, PRI_DEFAULT + priority, move || {
                    lock2.acquire().unwrap();
                    cv2.wait(&lock2).unwrap();
                    t2.push(name);
                    lock2.release().unwrap();
                })
                .unwrap();
        }

        lock.acquire().unwrap();
        cv.broadcast(&lock).unwrap();
        // `p8` woke up first, found `lock` taken, and donated its priority
        // to us. The others are still Ready.
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT + 8));
        t.push("main");
        lock.release().unwrap();

        // Not remembered
        lock.acquire().unwrap();
        cv.signal(&lock).unwrap();
        lock.release().unwrap();
    });
    assert_eq!(trace.take(), ["main", "p8", "p5", "p2"]);
}

#[test]
fn condvar_requires_owner() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let lock = Lock::new(kernel).unwrap();
        let cv = Condvar::new(kernel).unwrap();
        assert_eq!(cv.wait(&lock), Err(WaitCondvarError::NotOwner));
        assert_eq!(cv.signal(&lock), Err(SignalCondvarError::NotOwner));
        assert_eq!(cv.broadcast(&lock), Err(SignalCondvarError::NotOwner));
    });
}
