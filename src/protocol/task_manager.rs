use chrono::Utc;
use log::{debug, error, info};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::transport::Dispatcher;
use crate::config::ProtocolConfig;
use crate::SharedRouterState;

pub(crate) fn start_tasks(
    state: SharedRouterState,
    socket: Arc<UdpSocket>,
    dispatcher: Dispatcher,
    config: Arc<ProtocolConfig>,
    shutdown_tx: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let listen_handle = {
        let state = state.clone();
        let dispatcher = dispatcher.clone();
        let buffer_size = config.recv_buffer_size;
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            listen_task(state, socket, dispatcher, buffer_size, &mut shutdown_rx).await;
        })
    };

    let timer_handle = {
        let interval = config.tick_interval();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            timer_task(state, dispatcher, interval, &mut shutdown_rx).await;
        })
    };

    info!("Protocol tasks started");
    vec![listen_handle, timer_handle]
}

async fn listen_task(
    state: SharedRouterState,
    socket: Arc<UdpSocket>,
    dispatcher: Dispatcher,
    buffer_size: usize,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let mut buffer = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Listen task shutting down");
                break;
            }
            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((len, addr)) => {
                        let actions = {
                            let mut guard = state.lock().await;
                            guard.handle_datagram(addr.port(), &buffer[..len], Utc::now())
                        };
                        dispatcher.dispatch(actions).await;
                    }
                    // Timeouts and ICMP echoes of sends to closed ports are not errors here.
                    Err(e) if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock
                            | ErrorKind::TimedOut
                            | ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionRefused
                    ) => {
                        debug!("Ignoring receive error: {}", e);
                    }
                    Err(e) => {
                        error!("Failed to receive packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
}

/// Fixed sleep between ticks; drift is not corrected.
async fn timer_task(
    state: SharedRouterState,
    dispatcher: Dispatcher,
    interval: Duration,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Timer task shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                let actions = {
                    let mut guard = state.lock().await;
                    guard.tick(Utc::now())
                };
                dispatcher.dispatch(actions).await;
            }
        }
    }
}
