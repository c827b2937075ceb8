//! The shared medium (`spec.md` §4.3).
//!
//! Grounded on `original_source/infrastructure/bus.py`'s `BusState`: a bus
//! holds at most one in-flight message, merges a second arrival into a
//! `Collision` sentinel sized `max(d1, d2)`, and always waits exactly its
//! own fixed `propagation_delay` before delivering — regardless of either
//! message's own transmission delay. Unlike `original_source`'s
//! `UpdatableProcess` (which keeps the original send's timer running across
//! an update), this follows `spec.md`'s numbered protocol literally: a
//! second `send` interrupts the first sender and restarts the wait.

use std::rc::{Rc, Weak};
use std::cell::RefCell;

use crate::kernel::{wait, Environment, InterruptCause, ProcessHandle, Time};
use crate::message::{MediumValue, TransmittedMessage};
use crate::node::NetworkNode;
use crate::packet::Packet;

pub struct Bus {
    env: Environment,
    propagation_delay: Time,
    neighbors: RefCell<Vec<Weak<NetworkNode>>>,
    in_flight: RefCell<Option<TransmittedMessage<Packet>>>,
    current_send: RefCell<Option<ProcessHandle>>,
}

impl Bus {
    pub fn new(env: Environment, propagation_delay: Time) -> Rc<Self> {
        Rc::new(Bus {
            env,
            propagation_delay,
            neighbors: RefCell::new(Vec::new()),
            in_flight: RefCell::new(None),
            current_send: RefCell::new(None),
        })
    }

    pub fn propagation_delay(&self) -> Time {
        self.propagation_delay
    }

    /// Connect a node as a graph-neighbor of this bus. The bus only holds a
    /// weak reference; the owning `Network` keeps the strong one, so a bus
    /// and its nodes never form an `Rc` cycle (`spec.md` §9 cyclic-reference
    /// note).
    pub fn connect(&self, node: &Rc<NetworkNode>) {
        self.neighbors.borrow_mut().push(Rc::downgrade(node));
    }

    /// Source-side entry point: hand a message to this bus.
    pub fn send(self: &Rc<Self>, msg: TransmittedMessage<Packet>) {
        let bus = self.clone();
        self.env.spawn(async move {
            bus.send_proc(msg).await;
        });
    }

    async fn send_proc(self: Rc<Self>, msg: TransmittedMessage<Packet>) {
        if let Some(prev) = self.current_send.borrow_mut().take() {
            prev.interrupt(InterruptCause::Other("bus superseded by a later send".into()));
        }

        let handle = ProcessHandle::new();
        *self.current_send.borrow_mut() = Some(handle.clone());

        {
            let mut in_flight = self.in_flight.borrow_mut();
            match in_flight.take() {
                None => {
                    *in_flight = Some(msg);
                }
                Some(existing) => {
                    log::warn!(
                        "bus: collision between a message already in flight and a new one"
                    );
                    let delay = msg.transmission_delay.max(existing.transmission_delay);
                    *in_flight = Some(TransmittedMessage {
                        value: Rc::new(MediumValue::Collision),
                        transmission_delay: delay,
                        sender: None,
                    });
                }
            }
        }

        let outcome = wait(&handle, self.env.timeout(self.propagation_delay)).await;

        if outcome.is_err() {
            // We were superseded by a later send, which already holds
            // `current_send`; it owns finalization now.
            return;
        }
        *self.current_send.borrow_mut() = None;

        let delivered = match self.in_flight.borrow_mut().take() {
            Some(m) => m,
            None => return,
        };

        for neighbor in self.neighbors.borrow().iter().filter_map(Weak::upgrade) {
            if Some(neighbor.static_address()) == delivered.sender {
                continue;
            }
            neighbor.deliver(delivered.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Received;

    #[test]
    fn a_second_send_while_one_is_in_flight_restarts_the_wait_and_collides() {
        // `send` interrupts a still-pending first send and restarts the
        // propagation wait from the moment of the second send, rather than
        // keeping the first send's timer running (module doc comment): the
        // delivery lands exactly `propagation_delay` ticks after the
        // *second* send, and the two overlapping sends merge into one
        // `Collision` delivery rather than two separate ones.
        let env = Environment::new();
        let bus = Bus::new(env.clone(), 10);

        let sender = NetworkNode::new(env.clone(), 1, 1.0);
        let receiver = NetworkNode::new(env.clone(), 2, 1.0);
        bus.connect(&sender);
        bus.connect(&receiver);
        sender.attach_bus(&bus);
        receiver.attach_bus(&bus);

        let arrivals = Rc::new(RefCell::new(Vec::new()));
        let arrivals2 = arrivals.clone();
        let receiver2 = receiver.clone();
        let env2 = env.clone();
        env.spawn(async move {
            loop {
                match receiver2.receive_event(None).await {
                    Received::Value(msg) => arrivals2.borrow_mut().push((env2.now(), msg.is_collision())),
                    Received::TimedOut => {}
                }
            }
        });

        bus.send(TransmittedMessage::packet(Packet::ack(0, 2), 2, 1));
        bus.send(TransmittedMessage::packet(Packet::ack(1, 2), 2, 1));
        env.run();

        assert_eq!(*arrivals.borrow(), vec![(10, true)]);
    }
}
