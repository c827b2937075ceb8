//! One-shot events: the building block for condition variables and for
//! `any_of`/`all_of` composition (via `futures::future::{select, join}` at
//! the call site, since both already operate on any `Future`).

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Inner<T> {
    value: Option<T>,
    wakers: Vec<Waker>,
}

/// An event succeeds at most once with a value; every waiter observes the
/// same value once it does. Mirrors `simpy.Event`.
pub struct Event<T: Clone> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: Clone> Clone for Event<T> {
    fn clone(&self) -> Self {
        Event { inner: self.inner.clone() }
    }
}

impl<T: Clone> Event<T> {
    pub fn new() -> Self {
        Event {
            inner: Rc::new(RefCell::new(Inner { value: None, wakers: Vec::new() })),
        }
    }

    /// Succeed the event with `value`. A no-op if it already succeeded
    /// (an event succeeds at most once).
    pub fn succeed(&self, value: T) {
        let wakers = {
            let mut inner = self.inner.borrow_mut();
            if inner.value.is_some() {
                return;
            }
            inner.value = Some(value);
            std::mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.inner.borrow().value.is_some()
    }

    /// A future that resolves to the event's value once it succeeds.
    pub fn wait(&self) -> EventWait<T> {
        EventWait { event: self.clone() }
    }
}

impl<T: Clone> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventWait<T: Clone> {
    event: Event<T>,
}

impl<T: Clone> Future for EventWait<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.event.inner.borrow_mut();
        if let Some(v) = &inner.value {
            return Poll::Ready(v.clone());
        }
        inner.wakers.push(cx.waker().clone());
        Poll::Pending
    }
}

/// The outcome of a timed receive: either a value arrived, or the deadline
/// was reached first. Distinguished "timeout sentinel" from `spec.md` §4.4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received<T> {
    Value(T),
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Environment;

    #[test]
    fn event_succeeds_once_and_replays_to_new_waiters() {
        let env = Environment::new();
        let ev: Event<u32> = Event::new();
        ev.succeed(7);
        ev.succeed(9); // ignored, already succeeded

        let ev2 = ev.clone();
        let got = Rc::new(RefCell::new(None));
        let got2 = got.clone();
        env.spawn(async move {
            got2.borrow_mut().replace(ev2.wait().await);
        });
        env.run();
        assert_eq!(*got.borrow(), Some(7));
    }
}
