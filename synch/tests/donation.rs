//! Priority donation through sleeping locks.
//!
//! Every scenario runs the boot thread at the lowest priority, so that each
//! spawned thread runs until it blocks before the boot thread continues.
use keos::thread::{Current, Priority, ThreadBuilder};
use keos_synch::{Lock, Semaphore};
use std::sync::{Arc, Mutex};

fn p(v: u8) -> Priority {
    Priority::new(v).unwrap()
}

fn boot_low(main: impl FnOnce() + Send + 'static) {
    keos::boot_with(|conf| conf.main_priority(Priority::MIN), main)
}

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

#[test]
fn single_level() {
    boot_low(|| {
        let a = Arc::new(Lock::new());
        let go = Arc::new(Semaphore::new(0));
        let events: Log = Default::default();

        let low = {
            let (a, go, events) = (a.clone(), go.clone(), events.clone());
            ThreadBuilder::new("low").priority(p(1)).spawn(move || {
                a.acquire();
                go.down();
                a.release();
                record(&events, format!("low released at {}", Current::priority()));
            })
        };
        let medium = {
            let (a, events) = (a.clone(), events.clone());
            ThreadBuilder::new("medium")
                .priority(p(5))
                .spawn(move || {
                    a.acquire();
                    record(&events, "medium acquired");
                    a.release();
                    assert_eq!(Current::priority(), p(5));
                })
        };

        let th = low.thread().clone();
        assert_eq!(th.priority(), p(5));
        assert_eq!(th.base_priority(), p(1));
        let donations = th.donations.lock();
        assert_eq!(donations.get(a.id()), Some(p(5)));
        donations.unlock();

        go.up();
        medium.join();
        low.join();
        assert_eq!(th.priority(), p(1));
        assert_eq!(
            *events.lock().unwrap(),
            ["medium acquired", "low released at 1"]
        );
    });
}

#[test]
fn multi_level() {
    boot_low(|| {
        let (a, b) = (Arc::new(Lock::new()), Arc::new(Lock::new()));
        let go = Arc::new(Semaphore::new(0));
        let events: Log = Default::default();

        // L2 holds B.
        let l2 = {
            let (b, go, events) = (b.clone(), go.clone(), events.clone());
            ThreadBuilder::new("l2").priority(p(2)).spawn(move || {
                b.acquire();
                go.down();
                b.release();
                record(&events, format!("l2 released B at {}", Current::priority()));
            })
        };
        // L1 holds A and sleeps on B.
        let l1 = {
            let (a, b, events) = (a.clone(), b.clone(), events.clone());
            ThreadBuilder::new("l1").priority(p(1)).spawn(move || {
                a.acquire();
                b.acquire();
                record(&events, format!("l1 acquired B at {}", Current::priority()));
                b.release();
                a.release();
                record(&events, format!("l1 released A at {}", Current::priority()));
            })
        };
        assert_eq!(l2.thread().priority(), p(2));

        // H sleeps on A; the donation flows through L1 into L2.
        let h = {
            let (a, events) = (a.clone(), events.clone());
            ThreadBuilder::new("h").priority(p(10)).spawn(move || {
                a.acquire();
                record(&events, "h acquired A");
                a.release();
            })
        };
        assert_eq!(l1.thread().priority(), p(10));
        assert_eq!(l2.thread().priority(), p(10));

        go.up();
        for th in [h, l1, l2] {
            th.join();
        }
        assert_eq!(
            *events.lock().unwrap(),
            [
                "l1 acquired B at 10",
                "h acquired A",
                "l2 released B at 2",
                "l1 released A at 1",
            ]
        );
    });
}

#[test]
fn release_restores_remaining_donations() {
    boot_low(|| {
        let (a, b) = (Arc::new(Lock::new()), Arc::new(Lock::new()));
        let go = Arc::new(Semaphore::new(0));
        let events: Log = Default::default();

        let low = {
            let (a, b, go, events) = (a.clone(), b.clone(), go.clone(), events.clone());
            ThreadBuilder::new("low").priority(p(1)).spawn(move || {
                a.acquire();
                b.acquire();
                go.down();
                a.release();
                record(&events, format!("low released A at {}", Current::priority()));
                b.release();
                record(&events, format!("low released B at {}", Current::priority()));
            })
        };
        let waiter = |name: &'static str, priority: u8, lock: &Arc<Lock>| {
            let (lock, events) = (lock.clone(), events.clone());
            ThreadBuilder::new(name)
                .priority(p(priority))
                .spawn(move || {
                    lock.acquire();
                    record(&events, format!("{name} acquired"));
                    lock.release();
                })
        };
        let h1 = waiter("h1", 50, &a);
        assert_eq!(low.thread().priority(), p(50));
        // A smaller donation through another lock is still remembered.
        let h2 = waiter("h2", 40, &b);
        assert_eq!(low.thread().priority(), p(50));
        let donations = low.thread().donations.lock();
        assert_eq!(donations.len(), 2);
        assert_eq!(donations.get(b.id()), Some(p(40)));
        donations.unlock();

        go.up();
        for th in [h1, h2, low] {
            th.join();
        }
        assert_eq!(
            *events.lock().unwrap(),
            [
                "h1 acquired",
                "low released A at 40",
                "h2 acquired",
                "low released B at 1",
            ]
        );
    });
}

#[test]
fn repeated_donation_through_one_lock_keeps_the_largest() {
    boot_low(|| {
        let a = Arc::new(Lock::new());
        let go = Arc::new(Semaphore::new(0));

        let low = {
            let (a, go) = (a.clone(), go.clone());
            ThreadBuilder::new("low").priority(p(1)).spawn(move || {
                a.acquire();
                go.down();
                a.release();
            })
        };
        let waiters = [20, 30, 25]
            .into_iter()
            .map(|priority| {
                let a = a.clone();
                ThreadBuilder::new(format!("waiter-{priority}"))
                    .priority(p(priority))
                    .spawn(move || {
                        a.acquire();
                        a.release();
                    })
            })
            .collect::<Vec<_>>();

        let th = low.thread().clone();
        assert_eq!(th.priority(), p(30));
        let donations = th.donations.lock();
        assert_eq!(donations.len(), 1);
        assert_eq!(donations.get(a.id()), Some(p(30)));
        donations.unlock();

        go.up();
        for w in waiters {
            w.join();
        }
        low.join();
        assert_eq!(th.priority(), p(1));
    });
}

#[test]
fn set_priority_under_donation() {
    boot_low(|| {
        let a = Arc::new(Lock::new());
        let go = Arc::new(Semaphore::new(0));
        let events: Log = Default::default();

        let low = {
            let (a, go, events) = (a.clone(), go.clone(), events.clone());
            ThreadBuilder::new("low").priority(p(10)).spawn(move || {
                a.acquire();
                go.down();
                // The base drops below the donation, which still applies.
                Current::set_priority(p(5));
                record(
                    &events,
                    format!("low at {} over {}", Current::priority(), Current::base_priority()),
                );
                a.release();
                record(&events, format!("low released at {}", Current::priority()));
            })
        };
        let high = {
            let (a, events) = (a.clone(), events.clone());
            ThreadBuilder::new("high")
                .priority(p(20))
                .spawn(move || {
                    a.acquire();
                    record(&events, "high acquired");
                    a.release();
                })
        };
        assert_eq!(low.thread().priority(), p(20));

        go.up();
        high.join();
        low.join();
        assert_eq!(
            *events.lock().unwrap(),
            ["low at 20 over 5", "high acquired", "low released at 5"]
        );
    });
}

#[test]
fn donation_lets_the_holder_outrun_intermediate_threads() {
    boot_low(|| {
        let a = Arc::new(Lock::new());
        let go = Arc::new(Semaphore::new(0));
        let events: Log = Default::default();

        let low = {
            let (a, go, events) = (a.clone(), go.clone(), events.clone());
            ThreadBuilder::new("low").priority(p(1)).spawn(move || {
                a.acquire();
                go.down();
                record(&events, "low works");
                a.release();
            })
        };
        // Medium sleeps on the same semaphore as low.
        let medium = {
            let (go, events) = (go.clone(), events.clone());
            ThreadBuilder::new("medium")
                .priority(p(5))
                .spawn(move || {
                    go.down();
                    record(&events, "medium works");
                })
        };
        let high = {
            let (a, events) = (a.clone(), events.clone());
            ThreadBuilder::new("high")
                .priority(p(10))
                .spawn(move || {
                    a.acquire();
                    record(&events, "high works");
                    a.release();
                })
        };

        // The first permit goes to low on the strength of the donation.
        go.up();
        go.up();
        for th in [high, medium, low] {
            th.join();
        }
        assert_eq!(
            *events.lock().unwrap(),
            ["low works", "high works", "medium works"]
        );
    });
}

#[test]
fn new_owner_inherits_the_remaining_waiters() {
    boot_low(|| {
        let (a, b) = (Arc::new(Lock::new()), Arc::new(Lock::new()));
        let go = Arc::new(Semaphore::new(0));
        let events: Log = Default::default();

        let h = {
            let (a, go) = (a.clone(), go.clone());
            ThreadBuilder::new("h").priority(p(1)).spawn(move || {
                a.acquire();
                go.down();
                a.release();
            })
        };
        // W1 holds B and sleeps on A.
        let w1 = {
            let (a, b, events) = (a.clone(), b.clone(), events.clone());
            ThreadBuilder::new("w1").priority(p(2)).spawn(move || {
                b.acquire();
                a.acquire();
                b.release();
                record(&events, format!("w1 holds A at {}", Current::priority()));
                a.release();
                record(&events, format!("w1 released A at {}", Current::priority()));
            })
        };
        let x = {
            let (b, events) = (b.clone(), events.clone());
            ThreadBuilder::new("x").priority(p(20)).spawn(move || {
                b.acquire();
                record(&events, "x acquired B");
                b.release();
            })
        };
        let w2 = {
            let (a, events) = (a.clone(), events.clone());
            ThreadBuilder::new("w2").priority(p(10)).spawn(move || {
                a.acquire();
                record(&events, "w2 acquired A");
                a.release();
            })
        };
        assert_eq!(h.thread().priority(), p(20));

        // A goes to w1, which must keep w2's donation once it returns x's.
        go.up();
        for th in [x, w2, w1, h] {
            th.join();
        }
        assert_eq!(
            *events.lock().unwrap(),
            [
                "x acquired B",
                "w1 holds A at 10",
                "w2 acquired A",
                "w1 released A at 2",
            ]
        );
    });
}

#[test]
fn waiter_donates_again_after_losing_the_wakeup() {
    boot_low(|| {
        let a = Arc::new(Lock::new());
        let go = Arc::new(Semaphore::new(0));
        let events: Log = Default::default();

        let low = {
            let (a, go, events) = (a.clone(), go.clone(), events.clone());
            ThreadBuilder::new("low").priority(p(1)).spawn(move || {
                a.acquire();
                go.down();
                {
                    // With interrupts off nothing preempts us, so we take the
                    // lock back before the woken waiter runs.
                    let _guard = keos::interrupt::InterruptGuard::new();
                    a.release();
                    a.acquire();
                }
                Current::yield_now();
                record(&events, format!("low holds A at {}", Current::priority()));
                a.release();
                record(&events, format!("low released at {}", Current::priority()));
            })
        };
        let high = {
            let (a, events) = (a.clone(), events.clone());
            ThreadBuilder::new("high")
                .priority(p(40))
                .spawn(move || {
                    a.acquire();
                    record(&events, "high acquired");
                    a.release();
                })
        };
        assert_eq!(low.thread().priority(), p(40));

        go.up();
        high.join();
        low.join();
        assert_eq!(
            *events.lock().unwrap(),
            ["low holds A at 40", "high acquired", "low released at 1"]
        );
    });
}
