use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder;

use ospf_sim::commands::run_command_loop;
use ospf_sim::protocol::Body;
use ospf_sim::{NodeId, ProtocolConfig, ProtocolEngine};

#[derive(Parser)]
#[command(name = "ospf-sim", about = "Link-state router process listening on port_base + id")]
struct Cli {
    /// Router ID; a random one in 1..=99 is picked when omitted
    id: Option<NodeId>,

    /// JSON file with protocol settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the port base from the config
    #[arg(long)]
    port_base: Option<u16>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ProtocolConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ProtocolConfig::default(),
    };
    if let Some(port_base) = cli.port_base {
        config.port_base = port_base;
    }

    let id = match cli.id {
        Some(id) => id,
        None => {
            println!("Router ID not given, generating random ID");
            rand::rng().random_range(1..=99)
        }
    };
    println!("Router ID: {}", id);

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = rt.block_on(async {
        let (engine, mut deliveries) = ProtocolEngine::bind(id, config).await?;
        let engine = Arc::new(engine);
        engine.start().await;

        // MSG payloads are already logged by the dispatcher; overlay
        // packets have no consumer in this binary.
        tokio::spawn(async move {
            while let Some(packet) = deliveries.recv().await {
                if !matches!(packet.body, Body::Msg(_)) {
                    info!("Unhandled {}", packet);
                }
            }
        });

        let outcome = tokio::select! {
            result = run_command_loop(engine.clone()) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                Ok(())
            }
        };

        engine.shutdown().await;
        outcome
    });

    // The stdin reader sits on a blocking thread that never returns by itself.
    rt.shutdown_timeout(Duration::from_millis(500));
    if let Err(e) = &result {
        warn!("Router {} exiting with error: {:#}", id, e);
    }
    result
}
