//! The packet-protocol layer shared by the master and every slave
//! (`spec.md` §4.5).
//!
//! Grounded on `original_source/protocol/rethunder_node.py`'s
//! `ReThunderNode`: a thin layer above the raw network node that updates
//! `noise_table`/`routing_table` from every arriving packet's header, drops
//! unreadable ones, answers pending acks, and republishes everything else
//! to a protocol-level receive condition variable that the master/slave
//! dispatch loops actually wait on.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::config::SimConfig;
use crate::kernel::{BroadcastCondVar, Environment, Event, Received};
use crate::message::MediumValue;
use crate::node::{NetworkNode, NodeId};
use crate::packet::{Packet, PacketBody};

pub struct ReThunderNode {
    env: Environment,
    pub network: Rc<NetworkNode>,
    pub noise_table: RefCell<HashMap<NodeId, u16>>,
    pub routing_table: RefCell<HashMap<u16, NodeId>>,
    recv_cond: BroadcastCondVar<Packet>,
    pending_acks: RefCell<HashMap<u8, Event<()>>>,
    config: SimConfig,
}

impl ReThunderNode {
    pub fn new(env: Environment, network: Rc<NetworkNode>, config: SimConfig) -> Rc<Self> {
        Rc::new(ReThunderNode {
            env,
            network,
            noise_table: RefCell::new(HashMap::new()),
            routing_table: RefCell::new(HashMap::new()),
            recv_cond: BroadcastCondVar::new(),
            pending_acks: RefCell::new(HashMap::new()),
            config,
        })
    }

    pub fn static_address(&self) -> NodeId {
        self.network.static_address()
    }

    /// Spawn the permanent ingest loop: every arriving message funnels
    /// through here before either the master or slave dispatch loop ever
    /// sees a `Packet`.
    pub fn spawn_receive_loop(self: &Rc<Self>) {
        let this = self.clone();
        self.env.spawn(async move {
            loop {
                match this.network.receive_event(None).await {
                    Received::Value(msg) => this.handle_incoming(msg),
                    Received::TimedOut => {}
                }
            }
        });
    }

    fn handle_incoming(&self, msg: crate::message::TransmittedMessage<Packet>) {
        if msg.is_collision() {
            log::debug!("node {}: dropping a collision on the medium", self.static_address());
            return;
        }
        let packet = match &*msg.value {
            MediumValue::Packet(p) => p.clone(),
            MediumValue::Collision => unreachable!("checked above"),
        };

        if let Some(source) = packet.source_static() {
            let noise = packet.frame_error_average();
            self.noise_table.borrow_mut().insert(source, (noise * 1000.0).round() as u16);
            if let Some(logic) = packet.source_logic() {
                self.routing_table.borrow_mut().insert(logic, source);
            }
            // Every received packet with a source triggers a matching Ack
            // back to the previous hop, when the ack sub-protocol is on
            // (`spec.md` §4.5).
            if self.config.ack_enabled {
                self.send_ack(packet.header.token, source);
            }
        }

        if !packet.is_readable() {
            log::warn!("node {}: dropping an unreadable packet", self.static_address());
            return;
        }

        if let PacketBody::Ack { next_hop } = &packet.body {
            if *next_hop == self.static_address() {
                if let Some(ev) = self.pending_acks.borrow_mut().remove(&packet.header.token) {
                    ev.succeed(());
                }
            }
            return;
        }

        self.recv_cond.broadcast(packet);
    }

    pub async fn receive_packet(&self) -> Packet {
        self.recv_cond.wait().await
    }

    pub fn send_packet(&self, pkt: Packet, length: u64) {
        self.network.transmit(pkt, length);
    }

    /// Send `pkt`, waiting up to `ack_timeout` for a matching `Ack`;
    /// retransmit up to `retransmissions` times (`spec.md` §4.5/§6). Only
    /// meaningful when `config.ack_enabled`; callers that don't use the ack
    /// sub-protocol should call `send_packet` directly.
    pub async fn transmit_with_ack(&self, pkt: Packet, length: u64) -> bool {
        let token = pkt.header.token;
        for attempt in 0..=self.config.retransmissions {
            let ev: Event<()> = Event::new();
            self.pending_acks.borrow_mut().insert(token, ev.clone());
            self.send_packet(pkt.clone(), length);

            match futures::future::select(ev.wait(), self.env.timeout(self.config.ack_timeout)).await
            {
                futures::future::Either::Left(_) => return true,
                futures::future::Either::Right(_) => {
                    self.pending_acks.borrow_mut().remove(&token);
                    log::info!(
                        "node {}: ack timeout for token {} (attempt {}/{})",
                        self.static_address(),
                        token,
                        attempt + 1,
                        self.config.retransmissions + 1
                    );
                }
            }
        }
        false
    }

    /// Reply with an `Ack{next_hop}` addressed back to `previous_hop`.
    pub fn send_ack(&self, token: u8, previous_hop: NodeId) {
        self.send_packet(Packet::ack(token, previous_hop), 2);
    }
}
