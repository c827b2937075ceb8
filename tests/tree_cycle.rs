//! Scenario 4 (`spec.md` §8): a tree over 17 slaves plus one extra edge
//! closing a cycle. Repeated descending-order sends must still resolve
//! correctly and in order.

use std::cell::RefCell;
use std::rc::Rc;

use rethunder_sim::{Edge, Environment, Network, SimConfig, SlaveSpec};

#[test]
fn tree_with_cycle_repeated_sends_in_descending_order() {
    let env = Environment::new();
    let received = Rc::new(RefCell::new(Vec::<String>::new()));

    // Binary tree over static addresses 1..=17 rooted at master(0) via 0-1,
    // plus an extra edge (16, 17) that closes a cycle without disconnecting
    // anything.
    let mut edges = vec![Edge::new(0, 1)];
    for i in 1..=8u16 {
        edges.push(Edge::new(i, 2 * i));
        edges.push(Edge::new(i, 2 * i + 1));
    }
    edges.push(Edge::new(16, 17));

    let slaves: Vec<SlaveSpec> = (1..=17u16)
        .map(|i| SlaveSpec {
            static_address: i,
            logic_address: None,
            on_message_received: Box::new(move |_payload, _len| {
                let reply = format!("ans_{i}").into_bytes();
                let len = reply.len() as u64;
                (reply, len)
            }),
        })
        .collect();

    let received2 = received.clone();
    let net = Network::build(
        env.clone(),
        1.0,
        edges,
        slaves,
        true,
        SimConfig::default(),
        Box::new(move |payload, _len| {
            received2.borrow_mut().push(String::from_utf8(payload).unwrap());
        }),
    )
    .expect("valid graph");

    for _round in 0..2 {
        for i in (1..=17u16).rev() {
            net.master.send_message(b"Blip".to_vec(), 4, i).expect("queued");
            env.run();
        }
    }

    let mut expected = Vec::new();
    for _round in 0..2 {
        for i in (1..=17u16).rev() {
            expected.push(format!("ans_{i}"));
        }
    }
    assert_eq!(*received.borrow(), expected);
}
