//! Bus fan-out and collision-delay dominance (`spec.md` §8 quantified
//! invariants), exercised directly against the medium rather than through
//! the full protocol stack.

use std::cell::RefCell;
use std::rc::Rc;

use rethunder_sim::kernel::Received;
use rethunder_sim::node::NetworkNode;
use rethunder_sim::packet::Packet;
use rethunder_sim::Environment;
use rethunder_sim::{bus::Bus, message::TransmittedMessage};

fn spawn_collector(
    env: &Environment,
    node: &Rc<NetworkNode>,
) -> Rc<RefCell<Vec<(u64, TransmittedMessage<Packet>)>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let log2 = log.clone();
    let node2 = node.clone();
    let env2 = env.clone();
    env.spawn(async move {
        loop {
            match node2.receive_event(None).await {
                Received::Value(msg) => log2.borrow_mut().push((env2.now(), msg)),
                Received::TimedOut => {}
            }
        }
    });
    log
}

#[test]
fn a_lone_send_reaches_every_other_neighbor_after_propagation_delay() {
    let env = Environment::new();
    let bus = Bus::new(env.clone(), 4);

    let sender = NetworkNode::new(env.clone(), 1, 2.0);
    let receiver_a = NetworkNode::new(env.clone(), 2, 2.0);
    let receiver_b = NetworkNode::new(env.clone(), 3, 2.0);

    for node in [&sender, &receiver_a, &receiver_b] {
        bus.connect(node);
        node.attach_bus(&bus);
    }

    let log_a = spawn_collector(&env, &receiver_a);
    let log_b = spawn_collector(&env, &receiver_b);
    let log_sender = spawn_collector(&env, &sender);

    sender.transmit(Packet::ack(0, 2), 8);
    env.run();

    assert_eq!(log_a.borrow().len(), 1);
    assert_eq!(log_a.borrow()[0].0, 4);
    assert!(!log_a.borrow()[0].1.is_collision());

    assert_eq!(log_b.borrow().len(), 1);
    assert_eq!(log_b.borrow()[0].0, 4);

    // The sender itself never receives its own transmission back.
    assert!(log_sender.borrow().is_empty());
}

#[test]
fn two_overlapping_sends_collide_and_deliver_after_the_buss_own_delay() {
    let env = Environment::new();
    let bus = Bus::new(env.clone(), 4);

    let sender_a = NetworkNode::new(env.clone(), 1, 2.0);
    let sender_b = NetworkNode::new(env.clone(), 2, 2.0);
    let receiver = NetworkNode::new(env.clone(), 3, 2.0);

    for node in [&sender_a, &sender_b, &receiver] {
        bus.connect(node);
        node.attach_bus(&bus);
    }

    let log = spawn_collector(&env, &receiver);

    // transmission_delay(2.0, 8) = 4, transmission_delay(2.0, 16) = 8: the
    // two messages carry different delays so the dominance check is
    // meaningful (max(4, 8) = 8), even though the bus itself only ever
    // waits its own fixed propagation_delay (4) before delivering.
    sender_a.transmit(Packet::ack(0, 3), 8);
    sender_b.transmit(Packet::ack(1, 3), 16);
    env.run();

    let deliveries = log.borrow();
    assert_eq!(deliveries.len(), 1, "exactly one delivery reaches the receiver");
    let (time, msg) = &deliveries[0];
    assert_eq!(*time, 4, "the bus delivers after its own fixed propagation delay");
    assert!(msg.is_collision(), "two overlapping sends must merge into a Collision");
    assert_eq!(
        msg.transmission_delay, 8,
        "a synthesized collision carries max(d1, d2), not either sender's own delay"
    );
}
