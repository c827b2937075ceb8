//! The master-side node graph, shortest-paths tree, and logic-address
//! book-keeping (`spec.md` §3/§4.6.4, Design Notes §9).
//!
//! Grounded on `original_source/protocol/node_data_manager.py`
//! (`NodeDataManager`, bidirectional static/logic index with in-place
//! swap) and `original_source/utils/graph.py` (`shortest_paths_tree`,
//! `preorder_tree_dfs`). Nodes are stored in an arena (`Vec<NodeRecord>`)
//! addressed by a plain `usize` handle rather than as owned graph nodes, so
//! the graph, the SPT, and the address index can all refer to the same
//! node without any of them owning it (`spec.md` §9's "never let a node own
//! the network" applies equally to the master's own bookkeeping).

use std::collections::{BTreeMap, HashMap};

use crate::error::SimError;
use crate::node::NodeId;

pub type NodeRef = usize;

const MAX_ADDRESS: u16 = (1 << 11) - 1;

pub struct NodeRecord {
    pub static_address: NodeId,
    logic_address: Option<u16>,
    /// The master's belief about the address the slave currently holds;
    /// `None` while an assignment is unconfirmed.
    pub current_logic_address: Option<u16>,
}

/// Bidirectional static-address / logic-address index over the node arena.
pub struct NodeDataManager {
    records: Vec<NodeRecord>,
    static_to_id: BTreeMap<NodeId, NodeRef>,
    logic_to_id: BTreeMap<u16, NodeRef>,
}

impl NodeDataManager {
    pub fn new() -> Self {
        NodeDataManager {
            records: Vec::new(),
            static_to_id: BTreeMap::new(),
            logic_to_id: BTreeMap::new(),
        }
    }

    pub fn create(&mut self, static_address: NodeId) -> Result<NodeRef, SimError> {
        if self.static_to_id.contains_key(&static_address) {
            return Err(SimError::DuplicateStaticAddress { static_address });
        }
        let id = self.records.len();
        self.records.push(NodeRecord {
            static_address,
            logic_address: None,
            current_logic_address: None,
        });
        self.static_to_id.insert(static_address, id);
        Ok(id)
    }

    /// Smallest unused static address in `[1, 2047]` (0 is the master's).
    pub fn allocate_static_address(&self) -> Result<NodeId, SimError> {
        Self::free_address(&self.static_to_id)
    }

    /// Smallest unused logic address in `[1, 2047]`.
    pub fn allocate_logic_address(&self) -> Result<u16, SimError> {
        Self::free_address(&self.logic_to_id)
    }

    fn free_address(used: &BTreeMap<u16, NodeRef>) -> Result<u16, SimError> {
        let mut candidate = 1u16;
        for &addr in used.keys() {
            if addr < candidate {
                continue;
            }
            if addr == candidate {
                candidate += 1;
            } else {
                break;
            }
        }
        if candidate > MAX_ADDRESS {
            return Err(SimError::AddressExhausted);
        }
        Ok(candidate)
    }

    pub fn by_static(&self, static_address: NodeId) -> Option<NodeRef> {
        self.static_to_id.get(&static_address).copied()
    }

    pub fn from_logic_address(&self, addr: u16) -> Option<NodeRef> {
        self.logic_to_id.get(&addr).copied()
    }

    pub fn static_address(&self, id: NodeRef) -> NodeId {
        self.records[id].static_address
    }

    pub fn logic_address(&self, id: NodeRef) -> Option<u16> {
        self.records[id].logic_address
    }

    pub fn current_logic_address(&self, id: NodeRef) -> Option<u16> {
        self.records[id].current_logic_address
    }

    pub fn set_current_logic_address(&mut self, id: NodeRef, addr: Option<u16>) {
        self.records[id].current_logic_address = addr;
    }

    /// Ascending iterator over logic addresses currently in use (root's `0`
    /// included), pairing each with its node.
    pub fn logic_addresses_view(&self) -> impl Iterator<Item = (u16, NodeRef)> + '_ {
        self.logic_to_id.iter().map(|(&addr, &id)| (addr, id))
    }

    pub fn set_logic_address(&mut self, id: NodeRef, addr: Option<u16>) {
        if let Some(old) = self.records[id].logic_address {
            self.logic_to_id.remove(&old);
        }
        if let Some(new) = addr {
            self.logic_to_id.insert(new, id);
        }
        self.records[id].logic_address = addr;
    }

    /// In-place swap of two nodes' logic-address labels, keeping the
    /// reverse index consistent. Node identities (and everything else
    /// about them) are unchanged.
    pub fn swap_logic_address(&mut self, a: NodeRef, b: NodeRef) {
        let addr_a = self.records[a].logic_address;
        let addr_b = self.records[b].logic_address;
        self.records[a].logic_address = addr_b;
        self.records[b].logic_address = addr_a;
        if let Some(addr) = addr_a {
            self.logic_to_id.insert(addr, b);
        }
        if let Some(addr) = addr_b {
            self.logic_to_id.insert(addr, a);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl Default for NodeDataManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Undirected, noise-weighted graph over node records.
#[derive(Default)]
pub struct NodeGraph {
    edges: HashMap<NodeRef, HashMap<NodeRef, f64>>,
}

impl NodeGraph {
    pub fn new() -> Self {
        NodeGraph { edges: HashMap::new() }
    }

    pub fn add_edge(&mut self, a: NodeRef, b: NodeRef, noise: f64) {
        self.edges.entry(a).or_default().insert(b, noise);
        self.edges.entry(b).or_default().insert(a, noise);
    }

    pub fn neighbors(&self, a: NodeRef) -> impl Iterator<Item = NodeRef> + '_ {
        self.edges.get(&a).into_iter().flat_map(|m| m.keys().copied())
    }

    pub fn noise(&self, a: NodeRef, b: NodeRef) -> Option<f64> {
        self.edges.get(&a).and_then(|m| m.get(&b)).copied()
    }

    /// `noise_new = α·noise_old + (1−α)·observed` (`spec.md` §3/§8). `alpha`
    /// comes from `SimConfig::alpha` rather than a hardcoded constant, so a
    /// harness can tune the smoothing weight per scenario.
    pub fn smooth_noise(&mut self, a: NodeRef, b: NodeRef, observed: f64, alpha: f64) {
        let old = self.noise(a, b).unwrap_or(observed);
        let updated = alpha * old + (1.0 - alpha) * observed;
        self.add_edge(a, b, updated);
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|m| m.len()).sum::<usize>() / 2
    }
}

/// A directed, rooted spanning tree over the node graph (`spec.md` §3).
pub struct Spt {
    root: NodeRef,
    parent: HashMap<NodeRef, NodeRef>,
    children: HashMap<NodeRef, Vec<NodeRef>>,
    /// Path from root to each node, root-to-node order.
    paths: HashMap<NodeRef, Vec<NodeRef>>,
}

impl Spt {
    pub fn father(&self, node: NodeRef) -> Option<NodeRef> {
        self.parent.get(&node).copied()
    }

    pub fn children(&self, node: NodeRef) -> &[NodeRef] {
        self.children.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn path_to(&self, node: NodeRef) -> Option<&[NodeRef]> {
        self.paths.get(&node).map(Vec::as_slice)
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }
}

/// Builds the shortest-paths tree rooted at `root`, using Dijkstra over
/// noise edge weights. A plain O(V²) selection loop is used rather than a
/// binary-heap priority queue: simulated networks in this crate's scope
/// stay small enough that the asymptotics don't matter, and it avoids
/// pulling in an ordered-float wrapper for a one-off comparison.
pub fn shortest_paths_tree(graph: &NodeGraph, nodes: &NodeDataManager, root: NodeRef) -> Spt {
    let mut dist: HashMap<NodeRef, f64> = HashMap::new();
    let mut parent: HashMap<NodeRef, NodeRef> = HashMap::new();
    let mut visited: HashMap<NodeRef, bool> = HashMap::new();

    dist.insert(root, 0.0);
    for id in 0..nodes.len() {
        visited.insert(id, false);
    }

    loop {
        let mut best: Option<(NodeRef, f64)> = None;
        for (&n, &d) in dist.iter() {
            if visited.get(&n).copied().unwrap_or(false) {
                continue;
            }
            if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                best = Some((n, d));
            }
        }
        let Some((u, du)) = best else { break };
        visited.insert(u, true);

        for v in graph.neighbors(u) {
            if visited.get(&v).copied().unwrap_or(false) {
                continue;
            }
            let w = graph.noise(u, v).unwrap_or(0.0);
            let nd = du + w;
            if dist.get(&v).map(|&d| nd < d).unwrap_or(true) {
                dist.insert(v, nd);
                parent.insert(v, u);
            }
        }
    }

    let mut children: HashMap<NodeRef, Vec<NodeRef>> = HashMap::new();
    for (&n, &p) in parent.iter() {
        children.entry(p).or_default().push(n);
    }

    let mut paths: HashMap<NodeRef, Vec<NodeRef>> = HashMap::new();
    for &n in dist.keys() {
        let mut path = vec![n];
        let mut cur = n;
        while let Some(&p) = parent.get(&cur) {
            path.push(p);
            cur = p;
        }
        path.reverse();
        paths.insert(n, path);
    }

    Spt { root, parent, children, paths }
}

/// Preorder DFS logic-address assignment: root gets `0`, then each child is
/// visited depth-first in turn, incrementing a shared counter.
pub fn assign_logic_addresses_preorder(nodes: &mut NodeDataManager, spt: &Spt) {
    let mut counter = 0u16;
    let mut stack = vec![spt.root()];
    while let Some(n) = stack.pop() {
        nodes.set_logic_address(n, Some(counter));
        counter += 1;
        // Push in reverse so children are visited in ascending NodeRef
        // order, matching a stable preorder traversal.
        let mut kids: Vec<NodeRef> = spt.children(n).to_vec();
        kids.sort_unstable();
        for k in kids.into_iter().rev() {
            stack.push(k);
        }
    }
}

/// Re-assign logic addresses to restore tree-preorder monotonicity after
/// the node graph/SPT has changed (`spec.md` §4.6.4). Iterates ascending
/// logic addresses (skipping the root) so the address associated with a
/// node can move mid-iteration without disturbing the iteration order.
pub fn readdress_nodes(nodes: &mut NodeDataManager, spt: &Spt) {
    let addrs: Vec<u16> = nodes.logic_addresses_view().map(|(a, _)| a).filter(|&a| a != 0).collect();

    let mut previous_node_addr = 0u16;

    for logic_addr in addrs {
        let Some(mut node) = nodes.from_logic_address(logic_addr) else { continue };
        let Some(previous_node) = nodes.from_logic_address(previous_node_addr) else { continue };
        previous_node_addr = logic_addr;

        loop {
            let Some(father) = spt.father(node) else { break };
            let father_addr = nodes.logic_address(father).unwrap_or(0);
            let node_addr = nodes.logic_address(node).unwrap_or(0);
            if father_addr > node_addr {
                nodes.swap_logic_address(node, father);
                node = father;
            } else {
                break;
            }
        }

        let Some(father) = spt.father(node) else { continue };
        if father == previous_node {
            continue;
        }

        let greatest_son = spt
            .children(previous_node)
            .iter()
            .copied()
            .max_by_key(|&c| nodes.logic_address(c).unwrap_or(0));

        if let Some(greatest_son) = greatest_son {
            nodes.swap_logic_address(node, greatest_son);
            continue;
        }

        let mut ancestor = match spt.father(previous_node) {
            Some(a) => a,
            None => continue,
        };

        loop {
            if ancestor == spt.root() || ancestor == father {
                break;
            }
            let greatest_son = spt
                .children(ancestor)
                .iter()
                .copied()
                .max_by_key(|&c| nodes.logic_address(c).unwrap_or(0));

            if let Some(gs) = greatest_son {
                if nodes.logic_address(gs).unwrap_or(0) > nodes.logic_address(node).unwrap_or(0) {
                    nodes.swap_logic_address(node, gs);
                    break;
                }
            }

            ancestor = match spt.father(ancestor) {
                Some(a) => a,
                None => break,
            };
        }
    }
}
