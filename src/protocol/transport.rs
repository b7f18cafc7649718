use log::{debug, info, warn};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::messages::{Body, Packet};
use crate::config::ProtocolConfig;
use crate::router::Action;
use crate::NodeId;

/// Performs the actions produced by `RouterState` once the state lock has
/// been released.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    socket: Arc<UdpSocket>,
    config: Arc<ProtocolConfig>,
    deliveries: mpsc::UnboundedSender<Packet>,
}

impl Dispatcher {
    pub fn new(
        socket: Arc<UdpSocket>,
        config: Arc<ProtocolConfig>,
        deliveries: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Self { socket, config, deliveries }
    }

    pub async fn dispatch(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, packet } => self.send(to, &packet).await,
                Action::Deliver(packet) => self.deliver(packet),
            }
        }
    }

    async fn send(&self, to: NodeId, packet: &Packet) {
        let Some(addr) = self.config.socket_addr(to) else {
            warn!("No port for node {}, dropping {}", to, packet);
            return;
        };

        match self.socket.send_to(packet.encode().as_bytes(), addr).await {
            Ok(_) => debug!("Sent {} via {}", packet, to),
            Err(e) => warn!("Failed to send {} to {}: {}", packet, addr, e),
        }
    }

    fn deliver(&self, packet: Packet) {
        if let Body::Msg(text) = &packet.body {
            info!("Recv message from {}: {}", packet.src, text);
        }
        if self.deliveries.send(packet).is_err() {
            debug!("Delivery receiver closed, packet discarded");
        }
    }
}
