use log::{error, info};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::protocol::messages::Body;
use crate::protocol::ProtocolEngine;
use crate::{Cost, NodeId};

const HELP: &str = "\
addlink <ROUTER ID> <COST>   add a link and start adjacency
setlink <ROUTER ID> <COST>   change the cost of a link
rmlink <ROUTER ID>           remove a link
send <ROUTER ID> <MESSAGE>   route a text message
links                        show configured links
rt                           show the routing table
nb                           show neighbor states
lsdb                         dump the link-state database
help                         show this help
exit                         stop the router";

/// One line typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddLink { id: NodeId, cost: Cost },
    SetLink { id: NodeId, cost: Cost },
    RemoveLink { id: NodeId },
    Send { dst: NodeId, message: String },
    Links,
    Routes,
    Neighbors,
    Lsdb,
    Help,
    Exit,
}

impl Command {
    /// `Ok(None)` for a blank line, `Err` with the usage text otherwise.
    pub fn parse(line: &str, self_id: NodeId) -> Result<Option<Command>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match verb {
            "addlink" => {
                let (id, cost) = parse_link_args(&args).ok_or("addlink <ROUTER ID> <COST>")?;
                if id == self_id {
                    return Err("Cannot add link to self".to_string());
                }
                Command::AddLink { id, cost }
            }
            "setlink" => {
                let (id, cost) = parse_link_args(&args).ok_or("setlink <ROUTER ID> <COST>")?;
                Command::SetLink { id, cost }
            }
            "rmlink" => match args.as_slice() {
                [id] => Command::RemoveLink {
                    id: id.parse().map_err(|_| "rmlink <ROUTER ID>")?,
                },
                _ => return Err("rmlink <ROUTER ID>".to_string()),
            },
            "send" => {
                let usage = "send <ROUTER ID> <MESSAGE>";
                let (dst, message) = match args.split_first() {
                    Some((dst, rest)) if !rest.is_empty() => (dst, rest.join(" ")),
                    _ => return Err(usage.to_string()),
                };
                Command::Send {
                    dst: dst.parse().map_err(|_| usage)?,
                    message,
                }
            }
            "links" => Command::Links,
            "rt" => Command::Routes,
            "nb" => Command::Neighbors,
            "lsdb" => Command::Lsdb,
            "help" => Command::Help,
            "exit" => Command::Exit,
            _ => return Err(format!("Unknown command: {}", line.trim())),
        };
        Ok(Some(command))
    }
}

fn parse_link_args(args: &[&str]) -> Option<(NodeId, Cost)> {
    match args {
        [id, cost] => Some((id.parse().ok()?, cost.parse().ok()?)),
        _ => None,
    }
}

/// Runs `command` against the engine and renders the reply for the console.
pub async fn execute(engine: &ProtocolEngine, command: Command) -> String {
    let mut out = String::new();
    match command {
        Command::AddLink { id, cost } => {
            if let Err(e) = engine.add_link(id, cost).await {
                out.push_str(&e.to_string());
            }
        }
        Command::SetLink { id, cost } => {
            if let Err(e) = engine.set_link(id, cost).await {
                out.push_str(&e.to_string());
            }
        }
        Command::RemoveLink { id } => {
            if let Err(e) = engine.remove_link(id).await {
                out.push_str(&e.to_string());
            }
        }
        Command::Send { dst, message } => {
            let src = engine.id();
            if !engine.send_via_route(Body::Msg(message), src, dst, None).await {
                let _ = write!(out, "No route to {}", dst);
            }
        }
        Command::Links => {
            let _ = writeln!(out, "{:<10} {:>6}", "NEIGHBOR", "COST");
            for (id, cost) in engine.link_table().await {
                let _ = writeln!(out, "{:<10} {:>6}", id, cost);
            }
        }
        Command::Routes => {
            let _ = writeln!(out, "{:<12} {:<10} {:>6}", "DESTINATION", "NEXT HOP", "COST");
            for route in engine.routing_table().await {
                let _ = writeln!(out, "{:<12} {:<10} {:>6}", route.destination, route.next_hop, route.cost);
            }
        }
        Command::Neighbors => {
            for neighbor in engine.neighbor_table().await {
                let _ = writeln!(
                    out,
                    "{} {} since {}",
                    neighbor.id,
                    neighbor.state,
                    neighbor.state_changed.format("%H:%M:%S")
                );
            }
        }
        Command::Lsdb => match serde_json::to_string_pretty(&engine.lsdb_snapshot().await) {
            Ok(json) => out.push_str(&json),
            Err(e) => {
                let _ = write!(out, "Failed to serialize LSDB: {}", e);
            }
        },
        Command::Help => out.push_str(HELP),
        Command::Exit => {}
    }
    out.trim_end().to_string()
}

/// Reads commands from stdin until `exit` or end of input.
pub async fn run_command_loop(engine: Arc<ProtocolEngine>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line, engine.id()) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                println!("{}", usage);
                continue;
            }
        };

        if command == Command::Exit {
            info!("Exit requested");
            return Ok(());
        }

        let output = execute(&engine, command).await;
        if !output.is_empty() {
            println!("{}", output);
        }
    }

    error!("Standard input closed");
    Ok(())
}
