pub mod algorithms;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod router;

use std::sync::Arc;
use tokio::sync::Mutex;

/// Router identifier. A router listens on `port_base + id`.
pub type NodeId = u16;
pub type Cost = u32;
pub type Sequence = u64;

pub use config::ProtocolConfig;
pub use error::{CodecError, LinkError};
pub use protocol::ProtocolEngine;
pub use router::{Action, RouterState};

/// Link store, LSDB, neighbor table and routing table share one lock so that
/// a mutation and the SPF pass it triggers are atomic.
pub type SharedRouterState = Arc<Mutex<RouterState>>;
