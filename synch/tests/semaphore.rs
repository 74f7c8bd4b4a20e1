use keos::{
    interrupt,
    thread::{Current, Priority, ThreadBuilder, ThreadState, get_state_by_tid},
};
use keos_synch::Semaphore;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

fn p(v: u8) -> Priority {
    Priority::new(v).unwrap()
}

#[test]
fn counter_arithmetic() {
    keos::boot(|| {
        let sema = Semaphore::new(2);
        sema.down();
        sema.down();
        assert_eq!(sema.value(), 0);
        sema.up();
        assert_eq!(sema.value(), 1);
        assert!(sema.try_down());
        assert_eq!(sema.value(), 0);
        assert!(!sema.try_down());
        assert_eq!(sema.value(), 0);
        sema.up();
        sema.up();
        assert_eq!(sema.value(), 2);
    });
}

#[test]
fn self_test() {
    keos::boot(Semaphore::self_test);
}

#[test]
fn down_blocks_until_up() {
    keos::boot(|| {
        let sema = Arc::new(Semaphore::new(0));
        let passed = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let (sema, passed) = (sema.clone(), passed.clone());
            ThreadBuilder::new("waiter")
                .priority(p(40))
                .spawn(move || {
                    sema.down();
                    passed.fetch_add(1, Ordering::SeqCst);
                })
        };
        assert_eq!(get_state_by_tid(waiter.tid), Ok(ThreadState::Parked));
        assert_eq!(passed.load(Ordering::SeqCst), 0);

        // The waiter is more urgent, so it runs before `up` returns.
        sema.up();
        assert_eq!(passed.load(Ordering::SeqCst), 1);
        assert_eq!(sema.value(), 0);
        waiter.join();
    });
}

#[test]
fn try_down_never_blocks() {
    keos::boot(|| {
        let sema = Arc::new(Semaphore::new(0));
        let prober = {
            let sema = sema.clone();
            ThreadBuilder::new("prober")
                .priority(p(40))
                .spawn(move || {
                    assert!(!sema.try_down());
                    assert!(!sema.try_down());
                })
        };
        // The prober ran to completion without ever parking.
        assert_eq!(prober.join(), 0);
        assert_eq!(sema.value(), 0);
    });
}

#[test]
fn wakes_highest_priority_first() {
    keos::boot_with(
        |conf| conf.main_priority(Priority::MIN),
        || {
            let sema = Arc::new(Semaphore::new(0));
            let order = Arc::new(Mutex::new(Vec::new()));
            let mut handles = Vec::new();
            // Each waiter preempts the boot thread and blocks right away, so
            // they block in the order 1, 5, 3.
            for priority in [1, 5, 3] {
                let (sema, order) = (sema.clone(), order.clone());
                handles.push(
                    ThreadBuilder::new(format!("waiter-{priority}"))
                        .priority(p(priority))
                        .spawn(move || {
                            sema.down();
                            order.lock().unwrap().push(priority);
                        }),
                );
            }
            for expected in [5, 3, 1] {
                sema.up();
                assert_eq!(order.lock().unwrap().last(), Some(&expected));
            }
            for h in handles {
                h.join();
            }
            assert_eq!(sema.value(), 0);
        },
    );
}

#[test]
fn n_permits() {
    const PERMITS: usize = 3;
    keos::boot(|| {
        let sema = Arc::new(Semaphore::new(PERMITS));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles = (0..8)
            .map(|i| {
                let (sema, active, peak) = (sema.clone(), active.clone(), peak.clone());
                ThreadBuilder::new(format!("user-{i}")).spawn(move || {
                    for _ in 0..3 {
                        sema.down();
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        Current::yield_now();
                        active.fetch_sub(1, Ordering::SeqCst);
                        sema.up();
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            assert_eq!(h.join(), 0);
        }
        assert_eq!(peak.load(Ordering::SeqCst), PERMITS);
        assert_eq!(sema.value(), PERMITS);
    });
}

#[test]
fn up_from_interrupt_handler() {
    keos::boot(|| {
        let sema = Arc::new(Semaphore::new(0));
        let woke = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let (sema, woke) = (sema.clone(), woke.clone());
            ThreadBuilder::new("waiter")
                .priority(p(50))
                .spawn(move || {
                    sema.down();
                    woke.fetch_add(1, Ordering::SeqCst);
                })
        };
        {
            let sema = sema.clone();
            interrupt::register(33, move |_| {
                assert!(!sema.try_down());
                sema.up();
            });
        }
        assert!(interrupt::raise(33));
        // The yield is deferred to the return from the handler.
        assert_eq!(woke.load(Ordering::SeqCst), 1);
        waiter.join();
    });
}

#[test]
#[should_panic(expected = "Semaphore::down: cannot block inside an interrupt handler")]
fn down_inside_interrupt_handler_is_fatal() {
    keos::boot(|| {
        let sema = Arc::new(Semaphore::new(1));
        interrupt::register(34, move |_| sema.down());
        interrupt::raise(34);
    });
}

#[test]
#[should_panic(expected = "deadlock")]
fn down_without_up_deadlocks() {
    keos::boot(|| {
        Semaphore::new(0).down();
    });
}
