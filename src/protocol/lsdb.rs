use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::messages::DbdEntry;
use crate::{Cost, NodeId, Sequence};

pub type LinkMap = BTreeMap<NodeId, Cost>;

/// Link-state advertisement as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lsa {
    pub origin: NodeId,
    pub sequence: Sequence,
    pub links: LinkMap,
}

impl Lsa {
    pub fn new(origin: NodeId, sequence: Sequence, links: LinkMap) -> Self {
        Self { origin, sequence, links }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLsa {
    pub lsa: Lsa,
    /// Origination time for self, local receipt time for everyone else.
    pub last_updated: DateTime<Utc>,
}

impl StoredLsa {
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_updated).num_seconds()
    }
}

/// Most recent LSA from every known router, keyed by origin.
#[derive(Debug, Clone, Default)]
pub struct Lsdb {
    entries: BTreeMap<NodeId, StoredLsa>,
}

impl Lsdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, origin: NodeId) -> Option<&StoredLsa> {
        self.entries.get(&origin)
    }

    pub fn lsa(&self, origin: NodeId) -> Option<&Lsa> {
        self.entries.get(&origin).map(|stored| &stored.lsa)
    }

    pub fn sequence_of(&self, origin: NodeId) -> Option<Sequence> {
        self.entries.get(&origin).map(|stored| stored.lsa.sequence)
    }

    pub fn contains(&self, origin: NodeId) -> bool {
        self.entries.contains_key(&origin)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &StoredLsa)> {
        self.entries.iter()
    }

    /// Accepts `lsa` only if its origin is unknown or its sequence is strictly
    /// newer than the stored one. Returns whether the database changed.
    pub fn install(&mut self, lsa: Lsa, now: DateTime<Utc>) -> bool {
        match self.sequence_of(lsa.origin) {
            Some(stored) if stored >= lsa.sequence => return false,
            Some(_) => info!("update LSA {} {}", lsa.origin, lsa.sequence),
            None => info!("add LSA {} {}", lsa.origin, lsa.sequence),
        }
        self.entries.insert(lsa.origin, StoredLsa { lsa, last_updated: now });
        true
    }

    /// Unconditional replace, used for the self-originated LSA only.
    pub(crate) fn set(&mut self, lsa: Lsa, now: DateTime<Utc>) {
        self.entries.insert(lsa.origin, StoredLsa { lsa, last_updated: now });
    }

    pub fn remove(&mut self, origin: NodeId) -> Option<StoredLsa> {
        let removed = self.entries.remove(&origin);
        if removed.is_some() {
            info!("remove LSA {}", origin);
        }
        removed
    }

    /// Origin/sequence digest sent in a DBD.
    pub fn digest(&self) -> Vec<DbdEntry> {
        self.entries
            .values()
            .map(|stored| DbdEntry {
                origin: stored.lsa.origin,
                sequence: stored.lsa.sequence,
            })
            .collect()
    }

    /// Origins a peer advertised that we lack or hold an older copy of.
    pub fn request_list(&self, peer_digest: &[DbdEntry]) -> Vec<NodeId> {
        peer_digest
            .iter()
            .filter(|entry| match self.sequence_of(entry.origin) {
                None => true,
                Some(local) => local < entry.sequence,
            })
            .map(|entry| entry.origin)
            .collect()
    }

    /// Foreign origins whose last update is at least `max_age` seconds old.
    pub fn expired(&self, now: DateTime<Utc>, max_age: u64, self_id: NodeId) -> Vec<NodeId> {
        let max_age = i64::try_from(max_age).unwrap_or(i64::MAX);
        self.entries
            .iter()
            .filter(|(origin, stored)| **origin != self_id && stored.age_secs(now) >= max_age)
            .map(|(origin, _)| *origin)
            .collect()
    }
}
