//! The slave node: forwarding, addressing adoption, and response
//! construction (`spec.md` §4.7).
//!
//! Grounded on `original_source/protocol/slave_node.py`'s `SlaveNode`,
//! adapted from its `tracers_list` forwarding scheme (an older draft) to
//! the path-stack design `spec.md` §4.6.3/§4.7 specifies as normative;
//! `previous_node_static_addr` mirrors that file's
//! `__response_waiting_address` bookkeeping for routing a response back to
//! whichever hop sent the request.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::config::SimConfig;
use crate::kernel::Environment;
use crate::node::{NetworkNode, NodeId};
use crate::packet::{AddressKind, Packet, PacketBody, ResponseBody};
use crate::protocol::ReThunderNode;

pub struct SlaveNode {
    env: Environment,
    proto: Rc<ReThunderNode>,
    logic_address: Cell<Option<u16>>,
    last_sent_routing_table: RefCell<HashMap<u16, NodeId>>,
    previous_node_static_addr: Cell<Option<NodeId>>,
    #[allow(clippy::type_complexity)]
    on_message_received: RefCell<Box<dyn FnMut(Vec<u8>, u64) -> (Vec<u8>, u64)>>,
}

impl SlaveNode {
    pub fn new(
        env: Environment,
        transmission_speed: f64,
        static_address: NodeId,
        logic_address: Option<u16>,
        config: SimConfig,
        on_message_received: Box<dyn FnMut(Vec<u8>, u64) -> (Vec<u8>, u64)>,
    ) -> Rc<Self> {
        let network = NetworkNode::new(env.clone(), static_address, transmission_speed);
        let proto = ReThunderNode::new(env.clone(), network, config);

        let slave = Rc::new(SlaveNode {
            env,
            proto,
            logic_address: Cell::new(logic_address),
            last_sent_routing_table: RefCell::new(HashMap::new()),
            previous_node_static_addr: Cell::new(None),
            on_message_received: RefCell::new(on_message_received),
        });

        slave.proto.spawn_receive_loop();
        slave.spawn_main_loop();
        slave
    }

    pub fn network(&self) -> &Rc<NetworkNode> {
        &self.proto.network
    }

    pub fn static_address(&self) -> NodeId {
        self.proto.static_address()
    }

    pub fn logic_address(&self) -> Option<u16> {
        self.logic_address.get()
    }

    fn spawn_main_loop(self: &Rc<Self>) {
        let slave = self.clone();
        self.env.spawn(async move {
            loop {
                let packet = slave.proto.receive_packet().await;
                if let Some(response) = slave.handle_received(packet) {
                    let frames = response.number_of_frames() as u64;
                    slave.proto.send_packet(response, frames);
                }
            }
        });
    }

    fn is_destination_of(&self, pkt: &Packet) -> bool {
        let req = match pkt.as_request() {
            Some(r) => r,
            None => return false,
        };
        if pkt.header.is_addressing_static {
            self.static_address() == req.destination
        } else {
            self.logic_address.get() == Some(req.destination)
        }
    }

    fn handle_received(&self, mut pkt: Packet) -> Option<Packet> {
        let keep = match &pkt.body {
            PacketBody::Request(_) => self.handle_request(&mut pkt),
            PacketBody::Response(_) => self.handle_response(&mut pkt),
            _ => {
                log::warn!("slave {}: received an unsupported packet variant", self.static_address());
                false
            }
        };
        keep.then_some(pkt)
    }

    /// Returns `true` if `pkt` should be forwarded/transmitted as-is
    /// (mutated in place), `false` if it was dropped.
    fn handle_request(&self, pkt: &mut Packet) -> bool {
        if pkt.next_hop() != self.static_address() {
            return false;
        }

        let source_static = pkt.source_static();
        self.previous_node_static_addr.set(source_static);

        if let Some(req) = pkt.as_request() {
            if let Some(&assigned) = req.new_logic_addresses.get(&self.static_address()) {
                self.logic_address.set(Some(assigned));
            }
        }

        let my_logic = self.logic_address.get();
        if let Some(req) = pkt.as_request_mut() {
            req.source_static = self.static_address();
            req.source_logic = my_logic;
        }

        if self.is_destination_of(pkt) {
            let path_empty = pkt.as_request().map(|r| r.path.is_empty()).unwrap_or(true);
            if path_empty {
                let response = self.make_response_packet(pkt);
                *pkt = response;
                return true;
            }
            let req = pkt.as_request_mut().expect("checked above");
            let (kind, addr) = req.path.pop().expect("non-empty, just checked");
            req.destination = addr;
            pkt.header.is_addressing_static = kind == AddressKind::Static;
            pkt.header.destination_is_endpoint =
                pkt.as_request().map(|r| r.path.is_empty()).unwrap_or(false);
        }

        let next_hop = if pkt.header.is_addressing_static {
            pkt.as_request().map(|r| r.destination)
        } else {
            let destination = pkt.as_request().map(|r| r.destination).unwrap_or(0);
            let table = self.last_sent_routing_table.borrow();
            let next_logic_hop = table.keys().copied().filter(|&a| a <= destination).max();
            match next_logic_hop {
                Some(addr) if addr > self.logic_address.get().unwrap_or(0) => table.get(&addr).copied(),
                _ => None,
            }
        };

        match next_hop {
            Some(hop) => {
                if let Some(req) = pkt.as_request_mut() {
                    req.next_hop = hop;
                }
                true
            }
            None => {
                log::warn!(
                    "slave {}: no progress possible forwarding request, dropping",
                    self.static_address()
                );
                false
            }
        }
    }

    fn make_response_packet(&self, request: &Packet) -> Packet {
        let req = request.as_request().expect("only called for Request packets");
        let noise_table = self.proto.noise_table.borrow().clone();

        *self.last_sent_routing_table.borrow_mut() = self.proto.routing_table.borrow().clone();

        let (reply_payload, reply_length) =
            (self.on_message_received.borrow_mut())(req.payload.clone(), req.payload_length);

        let body = ResponseBody {
            source_static: self.static_address(),
            source_logic: self.logic_address.get(),
            next_hop: self.previous_node_static_addr.get().unwrap_or(req.source_static),
            noise_tables: vec![noise_table],
            payload: reply_payload,
            payload_length: reply_length,
        };

        Packet::response(request.header.token, body)
    }

    /// Returns `true` if `pkt` should be forwarded (mutated in place).
    fn handle_response(&self, pkt: &mut Packet) -> bool {
        if pkt.next_hop() != self.static_address() {
            return false;
        }
        let previous_hop = match self.previous_node_static_addr.take() {
            Some(h) => h,
            None => {
                log::warn!(
                    "slave {}: received a response with no pending request to return it to",
                    self.static_address()
                );
                return false;
            }
        };

        let my_logic = self.logic_address.get();
        let static_addr = self.static_address();
        let noise_table = self.proto.noise_table.borrow().clone();

        if let Some(resp) = pkt.as_response_mut() {
            resp.source_static = static_addr;
            resp.source_logic = my_logic;
            resp.next_hop = previous_hop;
            resp.noise_tables.push(noise_table);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(next_hop: NodeId, destination: u16, path: Vec<(AddressKind, u16)>) -> Packet {
        Packet::request(
            0,
            AddressKind::Static,
            crate::packet::RequestBody {
                source_static: 0,
                source_logic: Some(0),
                next_hop,
                destination,
                path,
                new_logic_addresses: HashMap::new(),
                payload: b"hi".to_vec(),
                payload_length: 2,
            },
        )
    }

    fn new_slave(env: &Environment, static_address: NodeId) -> Rc<SlaveNode> {
        SlaveNode::new(
            env.clone(),
            1.0,
            static_address,
            None,
            SimConfig::default(),
            Box::new(|payload, len| (payload, len)),
        )
    }

    #[test]
    fn request_not_addressed_to_this_hop_is_dropped() {
        let env = Environment::new();
        let slave = new_slave(&env, 5);
        let mut pkt = request(9, 0, Vec::new());
        assert!(!slave.handle_request(&mut pkt), "next_hop 9 != this node's static address 5");
    }

    #[test]
    fn a_new_logic_address_assigned_in_transit_is_adopted() {
        let env = Environment::new();
        let slave = new_slave(&env, 5);
        let mut pkt = request(5, 0, Vec::new());
        if let Some(req) = pkt.as_request_mut() {
            req.new_logic_addresses.insert(5, 42);
        }
        slave.handle_request(&mut pkt);
        assert_eq!(slave.logic_address(), Some(42));
    }

    #[test]
    fn an_endpoint_request_with_an_empty_path_yields_a_response() {
        let env = Environment::new();
        let slave = new_slave(&env, 5);
        // destination addressed statically to this node, no further path.
        let mut pkt = request(5, 5, Vec::new());
        let kept = slave.handle_request(&mut pkt);
        assert!(kept);
        assert!(matches!(pkt.body, crate::packet::PacketBody::Response(_)));
    }
}
