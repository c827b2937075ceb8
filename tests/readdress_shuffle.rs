//! Scenario 6 (`spec.md` §8): after logic addresses on a deterministic tree
//! are scrambled into an arbitrary distinct permutation, `readdress_nodes`
//! must restore "parent address < child address" everywhere while only
//! moving which label points at which node record.

use rethunder_sim::addressing::{
    assign_logic_addresses_preorder, readdress_nodes, shortest_paths_tree, NodeDataManager,
    NodeGraph, NodeRef, Spt,
};
use rethunder_sim::NodeId;

/// All descendants of `n` (not including `n` itself), walked breadth-first
/// over the SPT's `children` edges.
fn descendants(spt: &Spt, n: NodeRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeRef> = spt.children(n).to_vec();
    while let Some(c) = stack.pop() {
        stack.extend_from_slice(spt.children(c));
        out.push(c);
    }
    out
}

fn binary_tree(n: usize) -> (NodeDataManager, NodeGraph) {
    let mut nodes = NodeDataManager::new();
    let mut graph = NodeGraph::new();
    let ids: Vec<_> = (0..n).map(|i| nodes.create(i as NodeId).unwrap()).collect();
    for i in 0..n {
        for child in [2 * i + 1, 2 * i + 2] {
            if child < n {
                graph.add_edge(ids[i], ids[child], 0.5);
            }
        }
    }
    (nodes, graph)
}

#[test]
fn readdress_restores_monotonicity_after_a_shuffle() {
    let (mut nodes, graph) = binary_tree(17);
    let root = nodes.by_static(0).unwrap();
    let spt = shortest_paths_tree(&graph, &nodes, root);
    assign_logic_addresses_preorder(&mut nodes, &spt);

    let node_refs_before: Vec<_> = (0..17u16).map(|i| nodes.by_static(i)).collect();

    // Scramble the canonical preorder assignment into an arbitrary distinct
    // permutation of [1, 16] via a fixed sequence of pairwise swaps -- a
    // deterministic stand-in for "assign a random distinct logic address to
    // every non-root node".
    let shuffle_pairs: [(u16, u16); 8] =
        [(1, 16), (2, 9), (3, 14), (4, 7), (5, 12), (6, 11), (8, 15), (10, 13)];
    for &(a, b) in &shuffle_pairs {
        let na = nodes.from_logic_address(a).unwrap();
        let nb = nodes.from_logic_address(b).unwrap();
        nodes.swap_logic_address(na, nb);
    }

    readdress_nodes(&mut nodes, &spt);

    for i in 1..17u16 {
        let n = nodes.by_static(i).unwrap();
        let father = spt.father(n).expect("every non-root has a parent");
        assert!(
            nodes.logic_address(father) < nodes.logic_address(n),
            "node {i}'s logic address must exceed its parent's after re-addressing"
        );
    }

    let node_refs_after: Vec<_> = (0..17u16).map(|i| nodes.by_static(i)).collect();
    assert_eq!(
        node_refs_before, node_refs_after,
        "node identities must not change, only which address label points at them"
    );

    // Sibling ordering: for any two siblings s1, s2 with s1 visited before
    // s2 in preorder (ascending NodeRef, the order `assign_logic_addresses_
    // preorder` visits children in), L(s1) < L(s2).
    //
    // Subtree bounds: every descendant of a node n has its logic address in
    // (L(n), L(next-sibling-of-n)], using +∞ when n has no next sibling.
    for i in 0..17u16 {
        let parent = nodes.by_static(i).unwrap();
        let mut kids = spt.children(parent).to_vec();
        kids.sort_unstable();
        for pair in kids.windows(2) {
            let (s1, s2) = (pair[0], pair[1]);
            assert!(
                nodes.logic_address(s1) < nodes.logic_address(s2),
                "sibling visited earlier in preorder must keep a smaller logic address"
            );
        }

        for (idx, &child) in kids.iter().enumerate() {
            let lower = nodes.logic_address(child).unwrap();
            let upper = kids.get(idx + 1).map(|&next| nodes.logic_address(next).unwrap());
            for d in descendants(&spt, child) {
                let addr = nodes.logic_address(d).unwrap();
                assert!(addr > lower, "descendant address must exceed its subtree root's");
                if let Some(upper) = upper {
                    assert!(addr <= upper, "descendant address must not cross into the next sibling's subtree");
                }
            }
        }
    }
}
