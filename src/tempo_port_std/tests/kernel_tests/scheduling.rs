//! Dispatching order, preemption, and time slicing
use std::sync::Arc;
use tempo_kernel::{KernelConfig, ThreadStatus, PRI_DEFAULT, PRI_MIN, TIME_SLICE};

use super::utils::{SeqTracker, Trace};

#[test]
fn priority_order() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        for (name, priority) in [("a", 10), ("b", 20), ("c", 20)] {
            let t = t.clone();
            kernel.spawn(name, priority, move || t.push(name)).unwrap();
        }
        // None of them outranks `main`
        assert!(t.take().is_empty());

        kernel.set_priority(PRI_MIN).unwrap();
        t.push("main");
    });
    assert_eq!(trace.take(), ["b", "c", "a", "main"]);
}

#[test]
fn preemption() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let seq = Arc::new(SeqTracker::new());

        let seq2 = Arc::clone(&seq);
        kernel
            .spawn("high", PRI_DEFAULT + 1, move || seq2.expect_and_replace(0, 1))
            .unwrap();
        seq.expect_and_replace(1, 2);

        let seq2 = Arc::clone(&seq);
        let low = kernel
            .spawn("low", PRI_DEFAULT - 1, move || seq2.expect_and_replace(3, 4))
            .unwrap();
        assert_eq!(kernel.thread_status(low), Ok(ThreadStatus::Ready));
        seq.expect_and_replace(2, 3);

        // Lowering the priority below a Ready thread yields immediately
        kernel.set_priority(PRI_DEFAULT - 2).unwrap();
        seq.expect_and_replace(4, 5);
        assert_eq!(kernel.priority(), Ok(PRI_DEFAULT - 2));
    });
}

#[test]
fn yield_round_robin() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        kernel.set_priority(PRI_DEFAULT + 1).unwrap();
        for name in ["a", "b"] {
            let t = t.clone();
            let kernel2 = Arc::clone(kernel);
            kernel
                .spawn(name, PRI_DEFAULT + 1, move || {
                    for _ in 0..3 {
                        t.push(name);
                        kernel2.yield_now().unwrap();
                    }
                })
                .unwrap();
        }

        // We are at the head of the ready queue's priority level, but yielding
        // puts us behind `a` and `b`
        kernel.yield_now().unwrap();
        t.push("main");
        kernel.set_priority(PRI_DEFAULT).unwrap();
        t.push("main");
    });
    assert_eq!(
        trace.take(),
        ["a", "b", "main", "a", "b", "a", "b", "main"]
    );
}

#[test]
fn yield_alone() {
    tempo_port_std::run(KernelConfig::new(), |kernel| {
        let main = kernel.current_thread().unwrap();
        kernel.yield_now().unwrap();
        assert_eq!(kernel.current_thread(), Ok(main));
        assert_eq!(kernel.thread_status(main), Ok(ThreadStatus::Running));
    });
}

#[test]
fn time_slicing() {
    const ROUNDS: usize = 2;
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        kernel.set_priority(PRI_DEFAULT + 1).unwrap();
        for name in ["a", "b"] {
            let t = t.clone();
            let kernel2 = Arc::clone(kernel);
            kernel
                .spawn(name, PRI_DEFAULT + 1, move || {
                    for _ in 0..ROUNDS * TIME_SLICE as usize {
                        t.push(name);
                        tempo_port_std::timer_interrupt(&kernel2).unwrap();
                    }
                })
                .unwrap();
        }
        kernel.set_priority(PRI_DEFAULT).unwrap();

        let ticks = 2 * ROUNDS as u64 * u64::from(TIME_SLICE);
        assert_eq!(kernel.ticks(), Ok(ticks));
        assert_eq!(kernel.stats().unwrap().kernel_ticks, ticks);
    });

    let expected: Vec<_> = ["a", "b", "a", "b"]
        .iter()
        .flat_map(|&name| std::iter::repeat(name).take(TIME_SLICE as usize))
        .collect();
    assert_eq!(trace.take(), expected);
}

#[test]
fn custom_time_slice() {
    let trace = Trace::new();
    let t = trace.clone();
    let config = KernelConfig::new().with_time_slice(1);
    tempo_port_std::run(config, move |kernel| {
        kernel.set_priority(PRI_DEFAULT + 1).unwrap();
        for name in ["a", "b"] {
            let t = t.clone();
            let kernel2 = Arc::clone(kernel);
            kernel
                .spawn(name, PRI_DEFAULT + 1, move || {
                    for _ in 0..2 {
                        t.push(name);
                        tempo_port_std::timer_interrupt(&kernel2).unwrap();
                    }
                })
                .unwrap();
        }
        kernel.set_priority(PRI_DEFAULT).unwrap();
    });
    assert_eq!(trace.take(), ["a", "b", "a", "b"]);
}

/// A thread that uses up its time slice doesn't yield to lower-priority
/// threads.
#[test]
fn time_slice_keeps_priority() {
    let trace = Trace::new();
    let t = trace.clone();
    tempo_port_std::run(KernelConfig::new(), move |kernel| {
        let t2 = t.clone();
        kernel
            .spawn("low", PRI_DEFAULT - 1, move || t2.push("low"))
            .unwrap();
        for _ in 0..TIME_SLICE * 2 {
            tempo_port_std::timer_interrupt(kernel).unwrap();
        }
        t.push("main");
        kernel.set_priority(PRI_MIN).unwrap();
    });
    assert_eq!(trace.take(), ["main", "low"]);
}
