use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::lsdb::Lsa;
use super::messages::{Body, DbdEntry, HelloKind, Packet};
use crate::router::{Action, RouterState};
use crate::{NodeId, Sequence};

impl RouterState {
    /// Entry point for a raw datagram received from `source_port`.
    ///
    /// Own-port echoes, unknown ports and undecodable packets are dropped
    /// here; nothing a peer sends can fail the receive loop.
    pub fn handle_datagram(&mut self, source_port: u16, data: &[u8], now: DateTime<Utc>) -> Vec<Action> {
        if self.config().port_for(self.id()) == Some(source_port) {
            return Vec::new();
        }

        let Some(sender) = self
            .config()
            .node_for_port(source_port)
            .filter(|id| self.accepts_from(*id))
        else {
            debug!("Ignoring datagram from unknown port {}", source_port);
            return Vec::new();
        };

        match Packet::decode(data) {
            Ok(packet) => {
                debug!("Received {} via {}", packet, sender);
                self.handle_packet(sender, packet, now)
            }
            Err(e) => {
                warn!("Dropping malformed packet from {}: {}", sender, e);
                Vec::new()
            }
        }
    }

    /// Handles a decoded packet that arrived from neighbor `sender`.
    pub fn handle_packet(&mut self, sender: NodeId, packet: Packet, now: DateTime<Utc>) -> Vec<Action> {
        if packet.dst != self.id() {
            if packet.body.is_forwardable() {
                info!("Forward {} from {} to {}", packet.body.tag(), packet.src, packet.dst);
                return self.send_via_route(packet, Some(sender)).into_iter().collect();
            }
            debug!("Dropping {} not addressed to us", packet);
            return Vec::new();
        }

        if packet.body.is_forwardable() {
            return vec![Action::Deliver(packet)];
        }

        // Overlay peers have no link and may only exchange data packets.
        if !self.has_link(sender) {
            debug!("Dropping {} from linkless peer {}", packet, sender);
            return Vec::new();
        }

        let from = packet.src;
        match packet.body {
            Body::Hello(kind) => self.handle_hello(from, kind, now),
            Body::Dbd(digest) => self.handle_dbd(from, &digest, now),
            Body::Lsr(origins) => self.handle_lsr(from, &origins),
            Body::Lsu(lsas) => self.handle_lsu(lsas, now),
            Body::Msg(_) | Body::Overlay(..) => Vec::new(),
        }
    }

    fn handle_hello(&mut self, from: NodeId, kind: HelloKind, now: DateTime<Utc>) -> Vec<Action> {
        if self.neighbors.handle_hello(from, kind, now) {
            self.send_direct(self.dbd_packet(from)).into_iter().collect()
        } else {
            Vec::new()
        }
    }

    fn handle_dbd(&mut self, from: NodeId, digest: &[DbdEntry], now: DateTime<Utc>) -> Vec<Action> {
        let requests = self.lsdb.request_list(digest);
        if !requests.is_empty() {
            debug!("Requesting {:?} from {}", requests, from);
            let lsr = Packet::new(self.id(), from, Body::Lsr(requests));
            return self.send_direct(lsr).into_iter().collect();
        }

        // Databases agree. Our last DBD lets the peer reach the same verdict.
        if self.neighbors.complete_exchange(from, now) {
            self.send_direct(self.dbd_packet(from)).into_iter().collect()
        } else {
            Vec::new()
        }
    }

    fn handle_lsr(&self, from: NodeId, origins: &[NodeId]) -> Vec<Action> {
        let mut lsas = Vec::with_capacity(origins.len());
        for &origin in origins {
            match self.lsdb.lsa(origin) {
                Some(lsa) => lsas.push(lsa.clone()),
                // The peer's view of our digest is stale; answer the rest.
                None => warn!("LSR from {} asks for unknown origin {}, skipping", from, origin),
            }
        }
        if lsas.is_empty() {
            return Vec::new();
        }
        self.send_direct(Packet::new(self.id(), from, Body::Lsu(lsas)))
            .into_iter()
            .collect()
    }

    fn handle_lsu(&mut self, lsas: Vec<Lsa>, now: DateTime<Utc>) -> Vec<Action> {
        let mut actions = Vec::new();
        let mut accepted = Vec::new();

        for lsa in lsas {
            // Nothing can be newer, so such an LSA could never be replaced.
            if lsa.sequence == Sequence::MAX {
                warn!("Dropping LSA {} at the top of the sequence space", lsa.origin);
                continue;
            }
            if lsa.origin == self.id() {
                actions.extend(self.reclaim_self_lsa(&lsa, now));
            } else if self.lsdb.install(lsa.clone(), now) {
                accepted.push(lsa);
            }
        }

        if !accepted.is_empty() {
            self.recompute_routes();
            actions.extend(self.flood(accepted));
        }
        actions
    }

    /// A copy of our own LSA that is newer than ours, or differs at the same
    /// sequence, predates a restart. Jump past it so peers replace it.
    fn reclaim_self_lsa(&mut self, lsa: &Lsa, now: DateTime<Utc>) -> Vec<Action> {
        let current = self.self_sequence();
        let differs = self
            .lsdb
            .lsa(self.id())
            .is_some_and(|own| own.links != lsa.links);
        if lsa.sequence < current || (lsa.sequence == current && !differs) {
            return Vec::new();
        }
        let Some(next) = lsa.sequence.checked_add(1) else {
            warn!("Cannot reoriginate past self LSA seq {}", lsa.sequence);
            return Vec::new();
        };
        info!("Stale self LSA seq {} seen, reoriginating", lsa.sequence);
        self.originate(next, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::protocol::messages::OverlayKind;
    use crate::protocol::neighbor::NeighborState;
    use crate::{Cost, Sequence};

    fn router_with_links(id: NodeId, links: &[(NodeId, Cost)], now: DateTime<Utc>) -> RouterState {
        let mut state = RouterState::new(id, ProtocolConfig::default(), now);
        for &(neighbor, cost) in links {
            state.add_link(neighbor, cost, now).unwrap();
        }
        state
    }

    fn lsa(origin: NodeId, sequence: Sequence, links: &[(NodeId, Cost)]) -> Lsa {
        Lsa::new(origin, sequence, links.iter().copied().collect())
    }

    fn sends(actions: &[Action]) -> Vec<(NodeId, &Body)> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Send { to, packet } => Some((*to, &packet.body)),
                Action::Deliver(_) => None,
            })
            .collect()
    }

    #[test]
    fn accepted_lsu_is_reflooded_to_every_neighbor() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1), (3, 1)], now);
        let update = lsa(2, 4, &[(1, 1), (5, 2)]);

        let actions = state.handle_packet(2, Packet::new(2, 1, Body::Lsu(vec![update.clone()])), now);
        let flooded = sends(&actions);
        assert_eq!(flooded.len(), 2);
        assert!(flooded.iter().all(|(_, body)| **body == Body::Lsu(vec![update.clone()])));
        assert_eq!(state.next_hop(5), Some(2));
    }

    #[test]
    fn redelivered_lsu_is_absorbed() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);
        let packet = Packet::new(2, 1, Body::Lsu(vec![lsa(2, 4, &[(1, 1)])]));

        assert!(!state.handle_packet(2, packet.clone(), now).is_empty());
        let before = state.lsdb_snapshot(now);
        assert!(state.handle_packet(2, packet, now).is_empty());
        let older = Packet::new(2, 1, Body::Lsu(vec![lsa(2, 3, &[])]));
        assert!(state.handle_packet(2, older, now).is_empty());
        assert_eq!(state.lsdb_snapshot(now), before);
    }

    #[test]
    fn mixed_batch_refloods_only_accepted() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);
        state.handle_packet(2, Packet::new(2, 1, Body::Lsu(vec![lsa(2, 4, &[])])), now);

        let batch = vec![lsa(2, 4, &[]), lsa(7, 1, &[(2, 1)])];
        let actions = state.handle_packet(2, Packet::new(2, 1, Body::Lsu(batch)), now);
        assert_eq!(sends(&actions), vec![(2, &Body::Lsu(vec![lsa(7, 1, &[(2, 1)])]))]);
    }

    #[test]
    fn lsr_skips_unknown_origins() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);
        state.handle_packet(2, Packet::new(2, 1, Body::Lsu(vec![lsa(2, 1, &[(1, 1)])])), now);

        let actions = state.handle_packet(2, Packet::new(2, 1, Body::Lsr(vec![2, 42])), now);
        assert_eq!(sends(&actions), vec![(2, &Body::Lsu(vec![lsa(2, 1, &[(1, 1)])]))]);

        let actions = state.handle_packet(2, Packet::new(2, 1, Body::Lsr(vec![42])), now);
        assert!(actions.is_empty());
    }

    #[test]
    fn dbd_with_missing_origins_sends_lsr() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);
        state.neighbors.set_state(2, NeighborState::Exchange, now);

        let digest = vec![
            DbdEntry { origin: 1, sequence: 1 },
            DbdEntry { origin: 2, sequence: 3 },
            DbdEntry { origin: 6, sequence: 1 },
        ];
        let actions = state.handle_packet(2, Packet::new(2, 1, Body::Dbd(digest)), now);
        assert_eq!(sends(&actions), vec![(2, &Body::Lsr(vec![2, 6]))]);
        assert_eq!(state.neighbor_states()[&2], NeighborState::Exchange);
    }

    #[test]
    fn matching_dbd_completes_exchange_once() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);
        state.neighbors.set_state(2, NeighborState::Exchange, now);
        let digest = vec![DbdEntry { origin: 1, sequence: 1 }];

        let actions = state.handle_packet(2, Packet::new(2, 1, Body::Dbd(digest.clone())), now);
        assert_eq!(state.neighbor_states()[&2], NeighborState::Full);
        assert_eq!(sends(&actions).len(), 1);
        assert!(matches!(sends(&actions)[0].1, Body::Dbd(_)));

        assert!(state.handle_packet(2, Packet::new(2, 1, Body::Dbd(digest)), now).is_empty());
    }

    #[test]
    fn received_hello_answers_with_dbd() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);

        let actions = state.handle_packet(2, Packet::new(2, 1, Body::Hello(HelloKind::Received)), now);
        assert_eq!(state.neighbor_states()[&2], NeighborState::Exchange);
        assert!(matches!(sends(&actions)[..], [(2, Body::Dbd(_))]));

        let actions = state.handle_packet(2, Packet::new(2, 1, Body::Hello(HelloKind::Init)), now);
        assert!(actions.is_empty());
        assert_eq!(state.neighbor_states()[&2], NeighborState::Init);
    }

    #[test]
    fn datagram_guards() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);
        let hello = b"2,1\nHELLO\ninit";

        // Own port, unknown port, port below the base.
        assert!(state.handle_datagram(10001, hello, now).is_empty());
        assert!(state.handle_datagram(10009, b"9,1\nHELLO\ninit", now).is_empty());
        assert!(state.handle_datagram(80, hello, now).is_empty());
        assert_eq!(state.neighbor_states()[&2], NeighborState::Down);

        // Malformed input leaves the router serving.
        assert!(state.handle_datagram(10002, b"garbage", now).is_empty());
        assert!(state.handle_datagram(10002, b"2,1\nPING\nx", now).is_empty());

        state.handle_datagram(10002, hello, now);
        assert_eq!(state.neighbor_states()[&2], NeighborState::Init);
    }

    #[test]
    fn data_packets_are_delivered_or_forwarded() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1), (3, 1)], now);

        let local = Packet::new(3, 1, Body::Msg("hello".into()));
        assert_eq!(
            state.handle_packet(3, local.clone(), now),
            vec![Action::Deliver(local)]
        );

        let transit = Packet::new(3, 2, Body::Overlay(OverlayKind::Tunnel, "inner".into()));
        assert_eq!(
            state.handle_packet(3, transit.clone(), now),
            vec![Action::Send { to: 2, packet: transit.clone() }]
        );
        // Never bounced back the way it came.
        assert!(state.handle_packet(2, transit, now).is_empty());

        let control = Packet::new(3, 2, Body::Hello(HelloKind::Init));
        assert!(state.handle_packet(3, control, now).is_empty());
    }

    #[test]
    fn newer_copy_of_own_lsa_forces_reorigination() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);
        assert_eq!(state.self_sequence(), 1);

        let stale = lsa(1, 9, &[(4, 4)]);
        let actions = state.handle_packet(2, Packet::new(2, 1, Body::Lsu(vec![stale])), now);
        assert_eq!(state.self_sequence(), 10);
        assert_eq!(state.lsdb().lsa(1).unwrap().links.get(&2), Some(&1));
        assert!(matches!(sends(&actions)[..], [(2, Body::Lsu(_))]));

        let echo = lsa(1, 10, &[(2, 1)]);
        assert!(state.handle_packet(2, Packet::new(2, 1, Body::Lsu(vec![echo])), now).is_empty());
    }

    #[test]
    fn lsa_at_top_of_sequence_space_is_dropped() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);

        let own = format!("2,1\nLSU\n1,{},2:1", Sequence::MAX);
        assert!(state.handle_datagram(10002, own.as_bytes(), now).is_empty());
        assert_eq!(state.self_sequence(), 1);

        let foreign = format!("2,1\nLSU\n2,{},1:1", Sequence::MAX);
        assert!(state.handle_datagram(10002, foreign.as_bytes(), now).is_empty());
        assert!(!state.lsdb().contains(2));
    }

    #[test]
    fn exhausted_sequence_stops_refresh_without_wrapping() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);

        let near_top = format!("2,1\nLSU\n1,{},4:4", Sequence::MAX - 1);
        state.handle_datagram(10002, near_top.as_bytes(), now);
        assert_eq!(state.self_sequence(), Sequence::MAX);

        let actions = state.tick(now + chrono::Duration::seconds(15));
        assert_eq!(state.self_sequence(), Sequence::MAX);
        assert!(sends(&actions).iter().all(|(_, body)| !matches!(body, Body::Lsu(_))));

        let actions = state.set_link(2, 7, now).unwrap();
        assert!(actions.is_empty());
        assert_eq!(state.self_sequence(), Sequence::MAX);
    }

    #[test]
    fn overlay_peers_only_exchange_data() {
        let now = Utc::now();
        let mut state = router_with_links(1, &[(2, 1)], now);
        state.register_overlay_peer(40);

        assert!(state.handle_datagram(10040, b"40,1\nLSU\n40,5,1:1", now).is_empty());
        assert!(!state.lsdb().contains(40));
        assert!(state.handle_datagram(10040, b"40,1\nHELLO\nreceived", now).is_empty());

        let actions = state.handle_datagram(10040, b"40,1\nREQ\nregister", now);
        assert_eq!(
            actions,
            vec![Action::Deliver(Packet::new(
                40,
                1,
                Body::Overlay(OverlayKind::Request, "register".into())
            ))]
        );
    }
}
