//! Scenario 2 (`spec.md` §8): one shared bus, master plus 50 slaves.

use std::cell::RefCell;
use std::rc::Rc;

use rethunder_sim::{Edge, Environment, Network, SimConfig, SlaveSpec};

#[test]
fn star_of_fifty_slaves_replies_in_order() {
    let env = Environment::new();
    let received = Rc::new(RefCell::new(Vec::<String>::new()));

    let members: Vec<u16> = std::iter::once(0).chain(1..=50u16).collect();
    let edges = vec![Edge::shared(members, 5)];
    let slaves: Vec<SlaveSpec> = (1..=50u16)
        .map(|i| SlaveSpec {
            static_address: i,
            logic_address: None,
            on_message_received: Box::new(move |_payload, _len| {
                let reply = format!("Blop_{i}").into_bytes();
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

    for i in 1..=50u16 {
        net.master.send_message(b"Blip".to_vec(), 4, i).expect("queued");
        env.run();
    }

    let expected: Vec<String> = (1..=50).map(|i| format!("Blop_{i}")).collect();
    assert_eq!(*received.borrow(), expected);
}
