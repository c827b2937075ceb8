//! Network node transmit/receive core (`spec.md` §4.4).
//!
//! Grounded on `original_source/infrastructure/node.py`'s `NetworkNode`:
//! transmit and deliver both funnel through one `occupy` coroutine that
//! tracks "medium busy" state. The one detail that is easy to get backwards
//! (and was wrong in an earlier Python draft this was checked against): the
//! *old* `last_transmission_start` must be read out before it is overwritten
//! with `now`, because `elapsed` is computed against the old value.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::bus::Bus;
use crate::kernel::{wait, Environment, Event, InterruptCause, ProcessHandle, Received, Time};
use crate::message::{transmission_delay, MediumValue, TransmittedMessage};
use crate::packet::Packet;

pub type NodeId = u16;

struct OccupyState {
    message_in_transmission: Option<TransmittedMessage<Packet>>,
    last_transmission_start: Option<Time>,
}

/// Base medium behavior shared by the master and every slave.
pub struct NetworkNode {
    static_address: NodeId,
    env: Environment,
    transmission_speed: f64,
    buses: RefCell<Vec<Weak<Bus>>>,
    state: RefCell<OccupyState>,
    current_occupy: RefCell<Option<ProcessHandle>>,
    current_done: RefCell<Option<Event<()>>>,
    receive_cond: crate::kernel::BroadcastCondVar<TransmittedMessage<Packet>>,
}

impl NetworkNode {
    pub fn new(env: Environment, static_address: NodeId, transmission_speed: f64) -> Rc<Self> {
        Rc::new(NetworkNode {
            static_address,
            env,
            transmission_speed,
            buses: RefCell::new(Vec::new()),
            state: RefCell::new(OccupyState {
                message_in_transmission: None,
                last_transmission_start: None,
            }),
            current_occupy: RefCell::new(None),
            current_done: RefCell::new(None),
            receive_cond: crate::kernel::BroadcastCondVar::new(),
        })
    }

    pub fn static_address(&self) -> NodeId {
        self.static_address
    }

    pub fn transmission_speed(&self) -> f64 {
        self.transmission_speed
    }

    pub fn attach_bus(&self, bus: &Rc<Bus>) {
        self.buses.borrow_mut().push(Rc::downgrade(bus));
    }

    /// Source-side: send `value` (of wire length `length`) onto every
    /// incident bus.
    pub fn transmit(self: &Rc<Self>, value: Packet, length: u64) {
        let delay = transmission_delay(self.transmission_speed, length);
        let msg = TransmittedMessage::packet(value, delay, self.static_address);
        let node = self.clone();
        self.env.spawn(async move {
            node.occupy(msg, true).await;
        });
    }

    /// Bus-side: a message has arrived for this node.
    pub fn deliver(self: &Rc<Self>, msg: TransmittedMessage<Packet>) {
        let node = self.clone();
        self.env.spawn(async move {
            node.occupy(msg, false).await;
        });
    }

    /// Wait for the next successfully-received message, or for `timeout`
    /// simulated ticks to pass, whichever comes first.
    pub async fn receive_event(&self, timeout: Option<Time>) -> Received<TransmittedMessage<Packet>> {
        match timeout {
            None => Received::Value(self.receive_cond.wait().await),
            Some(d) => {
                match futures::future::select(self.receive_cond.wait(), self.env.timeout(d)).await
                {
                    futures::future::Either::Left((v, _)) => Received::Value(v),
                    futures::future::Either::Right(_) => Received::TimedOut,
                }
            }
        }
    }

    async fn occupy(self: Rc<Self>, message: TransmittedMessage<Packet>, is_transmission: bool) {
        if is_transmission {
            loop {
                let done = self.current_done.borrow().clone();
                match done {
                    Some(ev) => {
                        ev.wait().await;
                    }
                    None => break,
                }
            }
        } else if let Some(handle) = self.current_occupy.borrow_mut().take() {
            handle.interrupt(InterruptCause::Delivery);
        }

        let handle = ProcessHandle::new();
        let done: Event<()> = Event::new();
        *self.current_occupy.borrow_mut() = Some(handle.clone());
        *self.current_done.borrow_mut() = Some(done.clone());

        // Capture the OLD start time before overwriting it: `elapsed` below
        // must be measured against the previous occupant's start, not "now".
        let prior_start = self.state.borrow().last_transmission_start;
        self.state.borrow_mut().last_transmission_start = Some(self.env.now());

        let to_wait = {
            let mut state = self.state.borrow_mut();
            match state.message_in_transmission.take() {
                None => {
                    let delay = message.transmission_delay;
                    state.message_in_transmission = Some(message.clone());
                    delay
                }
                Some(current) => {
                    log::warn!(
                        "node {}: collision between an in-flight message and a new one",
                        self.static_address
                    );
                    let now = self.env.now();
                    let elapsed = now - prior_start.unwrap_or(now);
                    let remaining = current.transmission_delay.saturating_sub(elapsed);
                    let to_wait = message.transmission_delay.max(remaining);
                    state.message_in_transmission = Some(TransmittedMessage {
                        value: Rc::new(MediumValue::Collision),
                        transmission_delay: elapsed + to_wait,
                        sender: None,
                    });
                    to_wait
                }
            }
        };

        if is_transmission {
            for bus in self.buses.borrow().iter().filter_map(Weak::upgrade) {
                bus.send(message.clone());
            }
        }

        let outcome = wait(&handle, self.env.timeout(to_wait)).await;

        if outcome.is_err() {
            // Superseded by a later delivery, which has already installed
            // itself as the current occupant; only wake queued transmitters.
            done.succeed(());
            return;
        }
        *self.current_occupy.borrow_mut() = None;
        *self.current_done.borrow_mut() = None;
        done.succeed(());

        let finished = match self.state.borrow_mut().message_in_transmission.take() {
            Some(m) => m,
            None => return,
        };

        if !is_transmission {
            self.receive_cond.broadcast(finished);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Environment;
    use crate::message::TransmittedMessage;

    #[test]
    fn deliver_wakes_a_pending_receive_event() {
        let env = Environment::new();
        let node = NetworkNode::new(env.clone(), 7, 1.0);

        let received = Rc::new(RefCell::new(None));
        let received2 = received.clone();
        let node2 = node.clone();
        env.spawn(async move {
            if let Received::Value(msg) = node2.receive_event(None).await {
                *received2.borrow_mut() = Some(msg);
            }
        });

        node.deliver(TransmittedMessage::packet(Packet::ack(0, 7), 3, 1));
        env.run();

        assert!(received.borrow().is_some());
    }

    #[test]
    fn receive_event_times_out_when_nothing_arrives() {
        let env = Environment::new();
        let node = NetworkNode::new(env.clone(), 1, 1.0);

        let result = Rc::new(RefCell::new(None));
        let result2 = result.clone();
        let node2 = node.clone();
        env.spawn(async move {
            let timed_out = matches!(node2.receive_event(Some(5)).await, Received::TimedOut);
            *result2.borrow_mut() = Some(timed_out);
        });
        env.run();

        assert_eq!(*result.borrow(), Some(true));
    }
}
