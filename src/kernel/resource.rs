//! A capacity-limited resource with FIFO queuing and an optional
//! fail-fast ("exclusive") mode.
//!
//! Grounded on `original_source/utils/preemption_first_resource.py`
//! (`PreemptionFirstResource`): a resource of fixed capacity where callers
//! either queue for a slot in arrival order, or — in exclusive mode — are
//! rejected immediately if no slot is free, rather than joining a queue.
//! `spec.md` §4.6 leaves open whether a second concurrent send blocks or
//! fails; this primitive supports both, and `MasterNode` picks one at
//! construction time (`DESIGN.md` records the default).

use std::cell::RefCell;
use std::rc::Rc;

use super::condvar::CondVar;

struct State {
    capacity: usize,
    in_use: usize,
}

/// A resource with `capacity` concurrent slots.
pub struct PreemptiveResource {
    state: Rc<RefCell<State>>,
    waiters: CondVar<()>,
    exclusive: bool,
}

impl PreemptiveResource {
    /// `exclusive = true` makes `try_acquire` the only way in: `acquire`
    /// still queues FIFO, but callers that want synchronous "Busy" rejection
    /// should use `try_acquire` when constructing the resource this way.
    pub fn new(capacity: usize, exclusive: bool) -> Self {
        PreemptiveResource {
            state: Rc::new(RefCell::new(State { capacity, in_use: 0 })),
            waiters: CondVar::new(),
            exclusive,
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Non-blocking: returns a guard immediately if a slot is free, `None`
    /// otherwise. The caller in exclusive mode is expected to treat `None`
    /// as `SimError::Busy`.
    pub fn try_acquire(&self) -> Option<ResourceGuard> {
        let mut state = self.state.borrow_mut();
        if state.in_use < state.capacity {
            state.in_use += 1;
            Some(ResourceGuard { state: self.state.clone(), waiters: self.waiters.clone() })
        } else {
            None
        }
    }

    /// Blocking, FIFO-fair acquire: resolves once a slot is free and this
    /// caller is the oldest one waiting for it.
    pub async fn acquire(&self) -> ResourceGuard {
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            self.waiters.wait().await;
        }
    }
}

/// Holds one slot of a [`PreemptiveResource`]; releases it on drop.
pub struct ResourceGuard {
    state: Rc<RefCell<State>>,
    waiters: CondVar<()>,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.state.borrow_mut().in_use -= 1;
        self.waiters.notify_one(());
    }
}
