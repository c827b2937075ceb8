//! Condition variables built on top of [`Event`].
//!
//! Grounded on `original_source/utils/condition_var.py`: `ConditionVar` keeps
//! a FIFO of waiters, each represented by one single-shot event, and
//! `notify()` pops and succeeds exactly the oldest one (`appendleft`/`pop` on
//! a deque is a FIFO, confirmed by reading the Python). `BroadcastConditionVar`
//! instead keeps exactly one shared event that every waiter awaits, and
//! replaces it with a fresh one after firing so later waiters don't see a
//! stale value.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::event::{Event, EventWait};

/// FIFO single-waker signal: each call to `wait()` joins the back of a
/// queue; each call to `notify_one()` wakes exactly the oldest still-waiting
/// caller with the given value.
pub struct CondVar<T: Clone> {
    queue: Rc<RefCell<VecDeque<Event<T>>>>,
}

impl<T: Clone> Clone for CondVar<T> {
    fn clone(&self) -> Self {
        CondVar { queue: self.queue.clone() }
    }
}

impl<T: Clone> CondVar<T> {
    pub fn new() -> Self {
        CondVar { queue: Rc::new(RefCell::new(VecDeque::new())) }
    }

    /// Register as a waiter and return a future that resolves once this
    /// waiter is the one `notify_one` picks.
    pub fn wait(&self) -> EventWait<T> {
        let ev = Event::new();
        self.queue.borrow_mut().push_back(ev.clone());
        ev.wait()
    }

    /// Wake the oldest waiter still in the queue, if any.
    pub fn notify_one(&self, value: T) {
        if let Some(ev) = self.queue.borrow_mut().pop_front() {
            ev.succeed(value);
        }
    }

    /// Wake every waiter currently queued.
    pub fn notify_all(&self, value: T) {
        let waiters: Vec<_> = self.queue.borrow_mut().drain(..).collect();
        for ev in waiters {
            ev.succeed(value.clone());
        }
    }
}

impl<T: Clone> Default for CondVar<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A signal every current and future waiter observes at once: `broadcast`
/// wakes everyone waiting *right now* and then rotates in a fresh event so
/// the next round of waiters doesn't immediately see the value that already
/// fired.
pub struct BroadcastCondVar<T: Clone> {
    current: Rc<RefCell<Event<T>>>,
}

impl<T: Clone> Clone for BroadcastCondVar<T> {
    fn clone(&self) -> Self {
        BroadcastCondVar { current: self.current.clone() }
    }
}

impl<T: Clone> BroadcastCondVar<T> {
    pub fn new() -> Self {
        BroadcastCondVar { current: Rc::new(RefCell::new(Event::new())) }
    }

    pub fn wait(&self) -> EventWait<T> {
        self.current.borrow().wait()
    }

    pub fn broadcast(&self, value: T) {
        let fired = self.current.replace(Event::new());
        fired.succeed(value);
    }
}

impl<T: Clone> Default for BroadcastCondVar<T> {
    fn default() -> Self {
        Self::new()
    }
}
