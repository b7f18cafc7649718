use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::algorithms::dijkstra::ShortestPath;
use crate::{Cost, NodeId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingTable {
    entries: BTreeMap<NodeId, RouteEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: NodeId,
    pub next_hop: NodeId,
    pub cost: Cost,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the table with a fresh SPF result. Destinations missing from
    /// `paths` are unreachable and dropped.
    pub fn apply(&mut self, paths: &HashMap<NodeId, ShortestPath>) {
        for (&destination, path) in paths {
            let entry = RouteEntry {
                destination,
                next_hop: path.next_hop,
                cost: path.cost,
            };
            match self.entries.insert(destination, entry) {
                None => info!("add route {} {} {}", destination, path.next_hop, path.cost),
                Some(previous) if previous != entry => {
                    info!("update route {} {} {}", destination, path.next_hop, path.cost)
                }
                Some(_) => {}
            }
        }

        let broken: Vec<NodeId> = self
            .entries
            .keys()
            .filter(|destination| !paths.contains_key(destination))
            .copied()
            .collect();
        for destination in broken {
            self.entries.remove(&destination);
            info!("remove route {}", destination);
        }
    }

    pub fn get_route(&self, destination: NodeId) -> Option<&RouteEntry> {
        self.entries.get(&destination)
    }

    pub fn next_hop(&self, destination: NodeId) -> Option<NodeId> {
        self.entries.get(&destination).map(|entry| entry.next_hop)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn routes(&self) -> Vec<RouteEntry> {
        self.entries.values().copied().collect()
    }
}
