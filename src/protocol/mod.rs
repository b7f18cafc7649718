pub mod lsdb;
pub mod message_handler;
pub mod messages;
pub mod neighbor;
pub mod neighbor_manager;
pub mod routing_table;
pub mod task_manager;
pub mod transport;

pub use lsdb::{LinkMap, Lsa, Lsdb, StoredLsa};
pub use messages::{Body, DbdEntry, HelloKind, OverlayKind, Packet};
pub use neighbor::{Neighbor, NeighborState};
pub use routing_table::{RouteEntry, RoutingTable};
pub use transport::Dispatcher;

use anyhow::Context;
use chrono::Utc;
use log::{info, warn};
use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::ProtocolConfig;
use crate::error::LinkError;
use crate::router::{LsdbSnapshot, RouterState};
use crate::{Cost, NodeId, SharedRouterState};

/// One router process: the shared protocol state, its UDP socket and the
/// receive/timer tasks. Its methods are the API offered to the operator
/// command loop and to the Mobile-IP overlay.
pub struct ProtocolEngine {
    id: NodeId,
    state: SharedRouterState,
    socket: Arc<UdpSocket>,
    config: Arc<ProtocolConfig>,
    dispatcher: Dispatcher,
    shutdown_tx: broadcast::Sender<()>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ProtocolEngine {
    /// Binds `bind_address:port_base+id`. The returned receiver yields every
    /// `MSG` and overlay packet addressed to this router.
    pub async fn bind(
        id: NodeId,
        config: ProtocolConfig,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<Packet>)> {
        let port = config
            .port_for(id)
            .with_context(|| format!("router id {} overflows port base {}", id, config.port_base))?;
        let addr = SocketAddrV4::new(config.bind_address, port);
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("Router {} listening on {}", id, addr);

        let socket = Arc::new(socket);
        let state = Arc::new(Mutex::new(RouterState::new(id, config.clone(), Utc::now())));
        let config = Arc::new(config);
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(socket.clone(), config.clone(), delivery_tx);
        let (shutdown_tx, _) = broadcast::channel(1);

        let engine = Self {
            id,
            state,
            socket,
            config,
            dispatcher,
            shutdown_tx,
            task_handles: Mutex::new(Vec::new()),
        };
        Ok((engine, delivery_rx))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Spawns the receive and timer tasks. Calling it again restarts them.
    pub async fn start(&self) {
        let mut handles = self.task_handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        handles.extend(task_manager::start_tasks(
            self.state.clone(),
            self.socket.clone(),
            self.dispatcher.clone(),
            self.config.clone(),
            &self.shutdown_tx,
        ));
    }

    /// Stops both tasks and waits for them to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = self.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Protocol task ended abnormally: {}", e);
                }
            }
        }
        info!("Router {} stopped", self.id);
    }

    pub async fn add_link(&self, id: NodeId, cost: Cost) -> Result<(), LinkError> {
        let actions = self.state.lock().await.add_link(id, cost, Utc::now())?;
        self.dispatcher.dispatch(actions).await;
        Ok(())
    }

    pub async fn set_link(&self, id: NodeId, cost: Cost) -> Result<(), LinkError> {
        let actions = self.state.lock().await.set_link(id, cost, Utc::now())?;
        self.dispatcher.dispatch(actions).await;
        Ok(())
    }

    pub async fn remove_link(&self, id: NodeId) -> Result<(), LinkError> {
        let actions = self.state.lock().await.remove_link(id, Utc::now())?;
        self.dispatcher.dispatch(actions).await;
        Ok(())
    }

    pub async fn next_hop(&self, destination: NodeId) -> Option<NodeId> {
        self.state.lock().await.next_hop(destination)
    }

    pub async fn routing_table(&self) -> Vec<RouteEntry> {
        self.state.lock().await.routing_table()
    }

    pub async fn link_table(&self) -> BTreeMap<NodeId, Cost> {
        self.state.lock().await.link_table()
    }

    pub async fn neighbor_states(&self) -> BTreeMap<NodeId, NeighborState> {
        self.state.lock().await.neighbor_states()
    }

    pub async fn neighbor_table(&self) -> Vec<Neighbor> {
        self.state.lock().await.neighbor_table()
    }

    pub async fn lsdb_snapshot(&self) -> Vec<LsdbSnapshot> {
        self.state.lock().await.lsdb_snapshot(Utc::now())
    }

    /// Sends `body` from `src` to `dst` through the current next hop.
    /// Returns false when it was dropped (no route, or the next hop is
    /// `exclude`).
    pub async fn send_via_route(&self, body: Body, src: NodeId, dst: NodeId, exclude: Option<NodeId>) -> bool {
        let action = self
            .state
            .lock()
            .await
            .send_via_route(Packet::new(src, dst, body), exclude);
        self.dispatch_one(action).await
    }

    /// Sends `body` straight to `dst`, which must be a configured link.
    pub async fn send_direct(&self, body: Body, src: NodeId, dst: NodeId) -> bool {
        let action = self.state.lock().await.send_direct(Packet::new(src, dst, body));
        self.dispatch_one(action).await
    }

    pub async fn register_overlay_peer(&self, id: NodeId) {
        self.state.lock().await.register_overlay_peer(id);
    }

    pub async fn unregister_overlay_peer(&self, id: NodeId) {
        self.state.lock().await.unregister_overlay_peer(id);
    }

    async fn dispatch_one(&self, action: Option<crate::router::Action>) -> bool {
        match action {
            Some(action) => {
                self.dispatcher.dispatch(vec![action]).await;
                true
            }
            None => false,
        }
    }
}
