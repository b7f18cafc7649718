use chrono::{DateTime, Utc};
use log::info;
use std::collections::BTreeMap;

use super::messages::HelloKind;
use super::neighbor::{Neighbor, NeighborState};
use crate::NodeId;

/// Adjacency state per configured link. Entries exist only while the link
/// store holds a link to the same ID; the router enforces that.
#[derive(Debug, Clone, Default)]
pub struct NeighborManager {
    neighbors: BTreeMap<NodeId, Neighbor>,
}

impl NeighborManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_neighbor(&mut self, id: NodeId, now: DateTime<Utc>) {
        self.neighbors.entry(id).or_insert_with(|| Neighbor::new(id, now));
    }

    pub fn remove_neighbor(&mut self, id: NodeId) -> Option<Neighbor> {
        let removed = self.neighbors.remove(&id);
        if removed.is_some() {
            info!("remove neighbor {}", id);
        }
        removed
    }

    pub fn neighbors(&self) -> Vec<Neighbor> {
        self.neighbors.values().cloned().collect()
    }

    pub fn state(&self, id: NodeId) -> Option<NeighborState> {
        self.neighbors.get(&id).map(|neighbor| neighbor.state)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.neighbors.keys().copied().collect()
    }

    /// Returns true when the state actually changed.
    pub fn set_state(&mut self, id: NodeId, state: NeighborState, now: DateTime<Utc>) -> bool {
        match self.neighbors.get_mut(&id) {
            Some(neighbor) if neighbor.state != state => {
                info!("update neighbor state {} {}", id, state);
                neighbor.state = state;
                neighbor.state_changed = now;
                true
            }
            _ => false,
        }
    }

    /// Applies a received Hello. Returns true when the sender should get our
    /// DBD, which is every `received` Hello from a known neighbor: the peer
    /// is still waiting on a digest it may have lost.
    pub fn handle_hello(&mut self, id: NodeId, kind: HelloKind, now: DateTime<Utc>) -> bool {
        let Some(state) = self.state(id) else {
            return false;
        };
        match kind {
            HelloKind::Init => {
                self.set_state(id, NeighborState::Init, now);
                false
            }
            HelloKind::Received => {
                if state != NeighborState::Full {
                    self.set_state(id, NeighborState::Exchange, now);
                }
                true
            }
        }
    }

    /// Called when a peer digest produced no requests. Moves an exchanging
    /// neighbor to Full and returns true if the caller must send the last DBD.
    /// A neighbor still in Down or Init stays there: the FSM only reaches Full
    /// through Exchange, and the next Hello/DBD round completes it.
    pub fn complete_exchange(&mut self, id: NodeId, now: DateTime<Utc>) -> bool {
        if self.state(id) == Some(NeighborState::Exchange) {
            self.set_state(id, NeighborState::Full, now)
        } else {
            false
        }
    }

    pub fn hello_for(&self, id: NodeId) -> HelloKind {
        match self.state(id) {
            Some(NeighborState::Down) | None => HelloKind::Init,
            Some(_) => HelloKind::Received,
        }
    }

    pub fn pending_adjacency(&self) -> Vec<NodeId> {
        self.neighbors
            .values()
            .filter(|neighbor| !neighbor.is_full())
            .map(|neighbor| neighbor.id)
            .collect()
    }

    pub fn exchanging(&self) -> Vec<NodeId> {
        self.neighbors
            .values()
            .filter(|neighbor| neighbor.state == NeighborState::Exchange)
            .map(|neighbor| neighbor.id)
            .collect()
    }

    pub fn states(&self) -> BTreeMap<NodeId, NeighborState> {
        self.neighbors
            .iter()
            .map(|(id, neighbor)| (*id, neighbor.state))
            .collect()
    }
}
