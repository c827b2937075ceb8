//! Wires a static-address adjacency graph into buses and nodes
//! (`spec.md` §6 "Node graph input").
//!
//! Grounded on `original_source/infrastructure/network.py`'s `Network`:
//! the external-facing construction helper that turns a plain graph of
//! static addresses into `Bus`/`NetworkNode` objects. This is the one place
//! that holds the *strong* `Rc`s the rest of the crate only references
//! weakly (`spec.md` §9 cyclic-reference note): a `Network` outliving every
//! bus and node it built is what keeps the simulation alive.

use std::collections::HashMap;
use std::rc::Rc;

use crate::bus::Bus;
use crate::config::SimConfig;
use crate::error::SimError;
use crate::kernel::{Environment, Time};
use crate::master::MasterNode;
use crate::node::NodeId;
use crate::slave::SlaveNode;

const DEFAULT_PROPAGATION_DELAY: Time = 10;

/// A segment of the input graph: a `Bus` shared by `members`, with the
/// given propagation delay. Two-node edges are the common case, but a
/// single shared bus can hold any number of members (`spec.md` §8 scenario
/// 2: one shared bus, master plus 50 slaves), since every member of a real
/// shared medium can hear every other member directly — the node graph
/// gets a direct edge between each pair of members, same as a two-node
/// edge.
pub struct Edge {
    pub members: Vec<NodeId>,
    pub propagation_delay: Time,
}

impl Edge {
    pub fn new(a: NodeId, b: NodeId) -> Self {
        Edge { members: vec![a, b], propagation_delay: DEFAULT_PROPAGATION_DELAY }
    }

    pub fn with_delay(a: NodeId, b: NodeId, propagation_delay: Time) -> Self {
        Edge { members: vec![a, b], propagation_delay }
    }

    /// One bus shared by more than two static addresses.
    pub fn shared(members: Vec<NodeId>, propagation_delay: Time) -> Self {
        Edge { members, propagation_delay }
    }

    /// Every unordered pair of members, for feeding the master's node graph.
    fn pairs(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.members.iter().enumerate().flat_map(move |(i, &a)| {
            self.members[i + 1..].iter().map(move |&b| (a, b))
        })
    }
}

#[allow(clippy::type_complexity)]
pub struct SlaveSpec {
    pub static_address: NodeId,
    pub logic_address: Option<u16>,
    pub on_message_received: Box<dyn FnMut(Vec<u8>, u64) -> (Vec<u8>, u64)>,
}

/// Owns every bus and node created for one simulation run.
pub struct Network {
    pub master: Rc<MasterNode>,
    pub slaves: HashMap<NodeId, Rc<SlaveNode>>,
    _buses: Vec<Rc<Bus>>,
}

impl Network {
    /// Build a master plus one slave per `slaves` entry, and a `Bus` per
    /// `edges` entry connecting the two endpoints' network nodes.
    pub fn build(
        env: Environment,
        transmission_speed: f64,
        edges: Vec<Edge>,
        slaves: Vec<SlaveSpec>,
        assign_logic_addresses: bool,
        config: SimConfig,
        on_master_message: Box<dyn FnMut(Vec<u8>, u64)>,
    ) -> Result<Rc<Self>, SimError> {
        let static_edges: Vec<(NodeId, NodeId)> = edges.iter().flat_map(Edge::pairs).collect();

        let master = MasterNode::init_from_static_addr_graph(
            env.clone(),
            transmission_speed,
            &static_edges,
            assign_logic_addresses,
            config,
            on_master_message,
        )?;

        let mut slave_nodes: HashMap<NodeId, Rc<SlaveNode>> = HashMap::new();
        for spec in slaves {
            if spec.static_address == 0 {
                return Err(SimError::DuplicateStaticAddress { static_address: 0 });
            }
            let slave = SlaveNode::new(
                env.clone(),
                transmission_speed,
                spec.static_address,
                spec.logic_address,
                config,
                spec.on_message_received,
            );
            if slave_nodes.insert(spec.static_address, slave).is_some() {
                return Err(SimError::DuplicateStaticAddress { static_address: spec.static_address });
            }
        }

        let mut buses = Vec::with_capacity(edges.len());
        for edge in &edges {
            let bus = Bus::new(env.clone(), edge.propagation_delay);

            for &member in &edge.members {
                let node = if member == 0 {
                    master.network().clone()
                } else {
                    slave_nodes
                        .get(&member)
                        .ok_or(SimError::InvalidArgument {
                            message: format!("edge references unknown static address {}", member),
                        })?
                        .network()
                        .clone()
                };
                bus.connect(&node);
                node.attach_bus(&bus);
            }

            buses.push(bus);
        }

        Ok(Rc::new(Network { master, slaves: slave_nodes, _buses: buses }))
    }
}
