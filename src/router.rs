use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::algorithms::dijkstra::calculate_shortest_paths;
use crate::config::ProtocolConfig;
use crate::error::LinkError;
use crate::protocol::lsdb::{LinkMap, Lsa, Lsdb};
use crate::protocol::messages::{Body, Packet};
use crate::protocol::neighbor::{Neighbor, NeighborState};
use crate::protocol::neighbor_manager::NeighborManager;
use crate::protocol::routing_table::{RouteEntry, RoutingTable};
use crate::{Cost, NodeId, Sequence};

/// Side effect requested by the state machine. The caller performs it after
/// releasing the state lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Unicast to the node's listening port.
    Send { to: NodeId, packet: Packet },
    /// Packet addressed to this router, for the operator or the overlay.
    Deliver(Packet),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LsdbSnapshot {
    pub origin: NodeId,
    pub sequence: Sequence,
    pub links: LinkMap,
    pub age_secs: i64,
}

/// All state of one router: link store, LSDB (self LSA included), neighbor
/// table and the routing table derived from the LSDB.
///
/// Every mutating method takes the current time and returns the packets it
/// wants sent, so the whole protocol runs without sockets or clocks.
#[derive(Debug, Clone)]
pub struct RouterState {
    id: NodeId,
    config: ProtocolConfig,
    links: LinkMap,
    pub(crate) lsdb: Lsdb,
    pub(crate) neighbors: NeighborManager,
    routing_table: RoutingTable,
    overlay_peers: BTreeSet<NodeId>,
}

impl RouterState {
    pub fn new(id: NodeId, config: ProtocolConfig, now: DateTime<Utc>) -> Self {
        let mut lsdb = Lsdb::new();
        lsdb.set(Lsa::new(id, 0, LinkMap::new()), now);
        Self {
            id,
            config,
            links: LinkMap::new(),
            lsdb,
            neighbors: NeighborManager::new(),
            routing_table: RoutingTable::new(),
            overlay_peers: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn lsdb(&self) -> &Lsdb {
        &self.lsdb
    }

    pub fn self_sequence(&self) -> Sequence {
        self.lsdb.sequence_of(self.id).unwrap_or_default()
    }

    // ---- Link store -------------------------------------------------------

    pub fn add_link(&mut self, id: NodeId, cost: Cost, now: DateTime<Utc>) -> Result<Vec<Action>, LinkError> {
        if id == self.id {
            return Err(LinkError::SelfLink(id));
        }
        if self.links.contains_key(&id) {
            return Err(LinkError::AlreadyExists(id));
        }
        self.links.insert(id, cost);
        self.neighbors.add_neighbor(id, now);
        info!("add neighbour {} {}", id, cost);
        Ok(self.link_changed(now))
    }

    pub fn set_link(&mut self, id: NodeId, cost: Cost, now: DateTime<Utc>) -> Result<Vec<Action>, LinkError> {
        let Some(current) = self.links.get_mut(&id) else {
            return Err(LinkError::NotFound(id));
        };
        *current = cost;
        info!("update neighbour {} {}", id, cost);
        Ok(self.link_changed(now))
    }

    pub fn remove_link(&mut self, id: NodeId, now: DateTime<Utc>) -> Result<Vec<Action>, LinkError> {
        self.neighbors.remove_neighbor(id);
        if self.links.remove(&id).is_none() {
            return Err(LinkError::NotFound(id));
        }
        Ok(self.link_changed(now))
    }

    fn link_changed(&mut self, now: DateTime<Utc>) -> Vec<Action> {
        let actions = match self.next_sequence() {
            Some(sequence) => self.originate(sequence, now),
            None => Vec::new(),
        };
        self.recompute_routes();
        actions
    }

    /// Sequence for the next self LSA, or None once the space is used up.
    /// Wrapping would make every peer discard our LSAs as stale.
    fn next_sequence(&self) -> Option<Sequence> {
        let current = self.self_sequence();
        let next = current.checked_add(1);
        if next.is_none() {
            warn!("Sequence space exhausted at {}, not reoriginating", current);
        }
        next
    }

    /// Installs a new self LSA with `sequence` and floods it.
    pub(crate) fn originate(&mut self, sequence: Sequence, now: DateTime<Utc>) -> Vec<Action> {
        let lsa = Lsa::new(self.id, sequence, self.links.clone());
        info!("update LSA {} {}", self.id, sequence);
        self.lsdb.set(lsa.clone(), now);
        self.flood(vec![lsa])
    }

    /// LSU carrying `lsas` to every configured neighbor, whatever its state.
    pub(crate) fn flood(&self, lsas: Vec<Lsa>) -> Vec<Action> {
        self.neighbors
            .ids()
            .into_iter()
            .filter_map(|to| self.send_direct(Packet::new(self.id, to, Body::Lsu(lsas.clone()))))
            .collect()
    }

    pub(crate) fn recompute_routes(&mut self) {
        let paths = calculate_shortest_paths(&self.lsdb, self.id);
        self.routing_table.apply(&paths);
    }

    // ---- Aging / timer ----------------------------------------------------

    /// One timer tick: self-LSA refresh, foreign-LSA expiry, SPF when either
    /// changed the LSDB, then Hello/DBD retransmission.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Action> {
        let mut actions = Vec::new();
        let mut changed = false;

        let refresh_due = self
            .lsdb
            .get(self.id)
            .is_none_or(|stored| stored.age_secs(now) >= secs(self.config.lsa_refresh_interval));
        if refresh_due {
            if let Some(sequence) = self.next_sequence() {
                actions.extend(self.originate(sequence, now));
                changed = true;
            }
        }

        for origin in self.lsdb.expired(now, self.config.lsa_max_age, self.id) {
            self.lsdb.remove(origin);
            self.neighbors.set_state(origin, NeighborState::Down, now);
            changed = true;
        }

        if changed {
            self.recompute_routes();
        }

        for id in self.neighbors.pending_adjacency() {
            let hello = Body::Hello(self.neighbors.hello_for(id));
            actions.extend(self.send_direct(Packet::new(self.id, id, hello)));
        }
        for id in self.neighbors.exchanging() {
            actions.extend(self.send_direct(self.dbd_packet(id)));
        }

        actions
    }

    pub(crate) fn dbd_packet(&self, to: NodeId) -> Packet {
        Packet::new(self.id, to, Body::Dbd(self.lsdb.digest()))
    }

    // ---- Transport boundary -----------------------------------------------

    /// Unicast over a configured link only.
    pub fn send_direct(&self, packet: Packet) -> Option<Action> {
        if !self.has_link(packet.dst) {
            debug!("No link to {}, dropping {}", packet.dst, packet);
            return None;
        }
        Some(Action::Send { to: packet.dst, packet })
    }

    /// Hands `packet` to the next hop for its destination. Dropped without a
    /// route, or when the next hop is `exclude` (the node it came from).
    pub fn send_via_route(&self, packet: Packet, exclude: Option<NodeId>) -> Option<Action> {
        let Some(next_hop) = self.routing_table.next_hop(packet.dst) else {
            debug!("No route to {}, dropping {}", packet.dst, packet);
            return None;
        };
        if Some(next_hop) == exclude {
            debug!("Next hop {} is the sender, dropping {}", next_hop, packet);
            return None;
        }
        Some(Action::Send { to: next_hop, packet })
    }

    pub fn register_overlay_peer(&mut self, id: NodeId) {
        self.overlay_peers.insert(id);
    }

    pub fn unregister_overlay_peer(&mut self, id: NodeId) {
        self.overlay_peers.remove(&id);
    }

    pub fn has_link(&self, id: NodeId) -> bool {
        self.links.contains_key(&id)
    }

    /// Datagrams are only taken from configured links and overlay peers.
    pub fn accepts_from(&self, id: NodeId) -> bool {
        id != self.id && (self.has_link(id) || self.overlay_peers.contains(&id))
    }

    // ---- Snapshots --------------------------------------------------------

    pub fn next_hop(&self, destination: NodeId) -> Option<NodeId> {
        self.routing_table.next_hop(destination)
    }

    pub fn routing_table(&self) -> Vec<RouteEntry> {
        self.routing_table.routes()
    }

    pub fn link_table(&self) -> BTreeMap<NodeId, Cost> {
        self.links.clone()
    }

    pub fn neighbor_states(&self) -> BTreeMap<NodeId, NeighborState> {
        self.neighbors.states()
    }

    pub fn neighbor_table(&self) -> Vec<Neighbor> {
        self.neighbors.neighbors()
    }

    pub fn lsdb_snapshot(&self, now: DateTime<Utc>) -> Vec<LsdbSnapshot> {
        self.lsdb
            .iter()
            .map(|(origin, stored)| LsdbSnapshot {
                origin: *origin,
                sequence: stored.lsa.sequence,
                links: stored.lsa.links.clone(),
                age_secs: stored.age_secs(now),
            })
            .collect()
    }
}

fn secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn router(id: NodeId, now: DateTime<Utc>) -> RouterState {
        RouterState::new(id, ProtocolConfig::default(), now)
    }

    fn sent_lsus(actions: &[Action]) -> Vec<(NodeId, Vec<Lsa>)> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Send { to, packet: Packet { body: Body::Lsu(lsas), .. } } => Some((*to, lsas.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn add_link_bumps_sequence_floods_and_routes() {
        let now = Utc::now();
        let mut state = router(1, now);

        let actions = state.add_link(2, 4, now).unwrap();
        assert_eq!(state.self_sequence(), 1);
        assert_eq!(state.neighbor_states().get(&2), Some(&NeighborState::Down));

        let lsus = sent_lsus(&actions);
        assert_eq!(lsus.len(), 1);
        assert_eq!(lsus[0].0, 2);
        assert_eq!(lsus[0].1[0].links.get(&2), Some(&4));

        assert_eq!(
            state.routing_table(),
            vec![RouteEntry { destination: 2, next_hop: 2, cost: 4 }]
        );
    }

    #[test]
    fn link_operations_report_rejections() {
        let now = Utc::now();
        let mut state = router(1, now);
        assert_eq!(state.add_link(1, 1, now), Err(LinkError::SelfLink(1)));
        state.add_link(2, 1, now).unwrap();
        assert_eq!(state.add_link(2, 5, now), Err(LinkError::AlreadyExists(2)));
        assert_eq!(state.set_link(3, 5, now), Err(LinkError::NotFound(3)));
        assert_eq!(state.remove_link(3, now), Err(LinkError::NotFound(3)));
        assert_eq!(state.self_sequence(), 1);
    }

    #[test]
    fn set_link_updates_cost_in_place() {
        let now = Utc::now();
        let mut state = router(1, now);
        state.add_link(2, 1, now).unwrap();
        state.add_link(3, 1, now).unwrap();

        let actions = state.set_link(2, 9, now).unwrap();
        assert_eq!(state.self_sequence(), 3);
        assert_eq!(state.link_table(), BTreeMap::from([(2, 9), (3, 1)]));
        assert_eq!(sent_lsus(&actions).len(), 2);
        assert_eq!(state.routing_table()[0].cost, 9);
    }

    #[test]
    fn remove_link_drops_neighbor_and_route() {
        let now = Utc::now();
        let mut state = router(1, now);
        state.add_link(2, 1, now).unwrap();
        state.add_link(3, 2, now).unwrap();

        let actions = state.remove_link(2, now).unwrap();
        assert!(!state.neighbor_states().contains_key(&2));
        assert!(!state.link_table().contains_key(&2));
        assert_eq!(state.next_hop(2), None);
        // The removed neighbor is no longer flooded to.
        assert_eq!(sent_lsus(&actions).iter().map(|(to, _)| *to).collect::<Vec<_>>(), vec![3]);
        assert!(!state.accepts_from(2));
    }

    #[test]
    fn self_lsa_is_refreshed_after_fifteen_seconds() {
        let start = Utc::now();
        let mut state = router(1, start);
        state.add_link(2, 1, start).unwrap();

        let actions = state.tick(start + Duration::seconds(14));
        assert_eq!(state.self_sequence(), 1);
        assert!(sent_lsus(&actions).is_empty());

        let actions = state.tick(start + Duration::seconds(15));
        assert_eq!(state.self_sequence(), 2);
        let lsus = sent_lsus(&actions);
        assert_eq!(lsus.len(), 1);
        assert_eq!(lsus[0].1[0].sequence, 2);
    }

    #[test]
    fn tick_retransmits_hello_and_dbd() {
        let now = Utc::now();
        let mut state = router(1, now);
        state.add_link(2, 1, now).unwrap();
        state.add_link(3, 1, now).unwrap();
        state.neighbors.set_state(3, NeighborState::Exchange, now);

        let actions = state.tick(now);
        let tags: Vec<(NodeId, &str)> = actions
            .iter()
            .filter_map(|action| match action {
                Action::Send { to, packet } => Some((*to, packet.body.tag())),
                Action::Deliver(_) => None,
            })
            .collect();
        assert_eq!(tags, vec![(2, "HELLO"), (3, "HELLO"), (3, "DBD")]);

        state.neighbors.set_state(2, NeighborState::Full, now);
        state.neighbors.set_state(3, NeighborState::Full, now);
        assert!(state.tick(now).is_empty());
    }

    #[test]
    fn send_via_route_respects_sender_exclusion() {
        let now = Utc::now();
        let mut state = router(1, now);
        state.add_link(2, 1, now).unwrap();

        let packet = Packet::new(5, 2, Body::Msg("hi".into()));
        assert_eq!(
            state.send_via_route(packet.clone(), None),
            Some(Action::Send { to: 2, packet: packet.clone() })
        );
        assert_eq!(state.send_via_route(packet, Some(2)), None);
        assert_eq!(state.send_via_route(Packet::new(1, 9, Body::Msg("x".into())), None), None);
    }

    #[test]
    fn send_direct_requires_a_link() {
        let now = Utc::now();
        let mut state = router(1, now);
        state.register_overlay_peer(40);
        assert!(state.accepts_from(40));
        assert_eq!(state.send_direct(Packet::new(1, 40, Body::Msg("x".into()))), None);
        state.unregister_overlay_peer(40);
        assert!(!state.accepts_from(40));
    }
}
