use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborState {
    Down,
    Init,
    Exchange,
    Full,
}

impl fmt::Display for NeighborState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NeighborState::Down => "Down",
            NeighborState::Init => "Init",
            NeighborState::Exchange => "Exchange",
            NeighborState::Full => "Full",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: NodeId,
    pub state: NeighborState,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub state_changed: DateTime<Utc>,
}

impl Neighbor {
    pub fn new(id: NodeId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: NeighborState::Down,
            state_changed: now,
        }
    }

    pub fn is_full(&self) -> bool {
        self.state == NeighborState::Full
    }
}
