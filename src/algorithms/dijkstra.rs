use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::protocol::lsdb::Lsdb;
use crate::{Cost, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortestPath {
    pub cost: Cost,
    pub next_hop: NodeId,
}

/// Single-source Dijkstra over the LSDB graph.
///
/// A node is discovered through any LSA that lists it, but its own edges are
/// only relaxed when its LSA is present: a neighbor whose LSA has not
/// arrived yet is reachable itself without leading anywhere further.
/// Equal-cost candidates are settled lowest ID first.
pub fn calculate_shortest_paths(lsdb: &Lsdb, source: NodeId) -> HashMap<NodeId, ShortestPath> {
    // node -> (cost, predecessor)
    let mut tentative: HashMap<NodeId, (Cost, Option<NodeId>)> = HashMap::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut heap: BinaryHeap<Reverse<(Cost, NodeId)>> = BinaryHeap::new();

    tentative.insert(source, (0, None));
    heap.push(Reverse((0, source)));

    while let Some(Reverse((cost, node))) = heap.pop() {
        if !visited.insert(node) {
            continue;
        }

        let Some(lsa) = lsdb.lsa(node) else {
            continue;
        };

        for (&neighbor, &link_cost) in &lsa.links {
            if visited.contains(&neighbor) {
                continue;
            }
            let candidate = cost.saturating_add(link_cost);
            let improves = tentative
                .get(&neighbor)
                .is_none_or(|&(known, _)| candidate < known);
            if improves {
                tentative.insert(neighbor, (candidate, Some(node)));
                heap.push(Reverse((candidate, neighbor)));
            }
        }
    }

    tentative
        .iter()
        .filter(|(node, _)| **node != source)
        .filter_map(|(&destination, &(cost, _))| {
            find_next_hop(&tentative, source, destination)
                .map(|next_hop| (destination, ShortestPath { cost, next_hop }))
        })
        .collect()
}

/// Walks predecessors back from `destination` to the node adjacent to `source`.
fn find_next_hop(
    tentative: &HashMap<NodeId, (Cost, Option<NodeId>)>,
    source: NodeId,
    destination: NodeId,
) -> Option<NodeId> {
    let mut current = destination;
    // Bounded by the node count so a corrupt predecessor chain cannot spin.
    for _ in 0..tentative.len() {
        match tentative.get(&current)?.1 {
            Some(previous) if previous == source => return Some(current),
            Some(previous) => current = previous,
            None => return None,
        }
    }
    None
}
