//! The virtual clock and scheduler.
//!
//! Grounded on `moonblokz-radio-simulator`'s `time_driver.rs`: a map from
//! timestamp to the wakers due at that time, plus a cell holding "now". That
//! driver needs `Mutex`+`Condvar` because a dedicated OS thread paces real
//! time against the virtual one; this kernel is strictly single-threaded and
//! cooperative, so `RefCell` is all that is needed, and there is no
//! real-time pacing at all — idle simply means "jump to the next deadline".

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;

/// Simulated time, in abstract ticks. Monotonically non-decreasing.
pub type Time = u64;

#[derive(Default)]
struct Scheduler {
    now: Time,
    /// Wakers due at a given timestamp. `BTreeMap` keeps the queue sorted so
    /// the kernel loop can always look at the earliest pending deadline.
    due: BTreeMap<Time, Vec<Waker>>,
}

struct Inner {
    sched: RefCell<Scheduler>,
    pool: RefCell<LocalPool>,
}

/// A simulation environment: the clock, the wakeup queue, and the executor.
///
/// Cloning an `Environment` is cheap and shares the same kernel (it is an
/// `Rc` handle), the way every process/bus/node in a simulation run needs a
/// handle back to the shared clock.
#[derive(Clone)]
pub struct Environment {
    inner: Rc<Inner>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            inner: Rc::new(Inner {
                sched: RefCell::new(Scheduler::default()),
                pool: RefCell::new(LocalPool::new()),
            }),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> Time {
        self.inner.sched.borrow().now
    }

    /// A future that resolves once `delay` ticks have passed.
    pub fn timeout(&self, delay: Time) -> Timeout {
        Timeout {
            env: self.clone(),
            at: self.now() + delay,
            registered: false,
        }
    }

    /// Spawn a detached process (fire-and-forget, like `env.process(...)` in
    /// `simpy` or `spawner.spawn(...)` in `moonblokz-radio-simulator`).
    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        self.inner
            .pool
            .borrow_mut()
            .spawner()
            .spawn_local(fut)
            .expect("kernel executor rejected a spawn");
    }

    /// Drive the simulation until no process can make further progress:
    /// alternately poll every runnable task to exhaustion, then jump the
    /// clock straight to the earliest pending deadline and wake whoever is
    /// due. Returns once both the run queue and the wakeup queue are empty.
    pub fn run(&self) {
        loop {
            self.inner.pool.borrow_mut().run_until_stalled();

            let next_due = self.inner.sched.borrow().due.keys().next().copied();
            match next_due {
                None => break,
                Some(t) => {
                    let wakers = {
                        let mut sched = self.inner.sched.borrow_mut();
                        sched.now = t;
                        sched.due.remove(&t).unwrap_or_default()
                    };
                    for waker in wakers {
                        waker.wake();
                    }
                }
            }
        }
    }

    fn register_wake(&self, at: Time, waker: Waker) {
        self.inner.sched.borrow_mut().due.entry(at).or_default().push(waker);
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Leaf future backing [`Environment::timeout`]. The only primitive in the
/// kernel that talks directly to the scheduler queue; every other waitable
/// thing (condition variables, interruptible waits, `any_of`/`all_of` races)
/// is built from ordinary safe combinators over `Timeout` and [`Event`](super::Event).
pub struct Timeout {
    env: Environment,
    at: Time,
    registered: bool,
}

impl Future for Timeout {
    type Output = Time;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Time> {
        let this = self.get_mut();
        if this.env.now() >= this.at {
            return Poll::Ready(this.env.now());
        }
        if !this.registered {
            this.env.register_wake(this.at, cx.waker().clone());
            this.registered = true;
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_advances_straight_to_next_deadline() {
        let env = Environment::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let env2 = env.clone();
            let log2 = log.clone();
            env.spawn(async move {
                env2.timeout(100).await;
                log2.borrow_mut().push(env2.now());
            });
        }
        {
            let env2 = env.clone();
            let log2 = log.clone();
            env.spawn(async move {
                env2.timeout(10).await;
                log2.borrow_mut().push(env2.now());
            });
        }

        env.run();
        assert_eq!(*log.borrow(), vec![10, 100]);
        assert_eq!(env.now(), 100);
    }

    #[test]
    fn equal_time_events_fire_in_insertion_order() {
        let env = Environment::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let env2 = env.clone();
            let log2 = log.clone();
            env.spawn(async move {
                env2.timeout(5).await;
                log2.borrow_mut().push(i);
            });
        }

        env.run();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }
}
