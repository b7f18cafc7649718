//! Text framing shared by every node:
//!
//! ```text
//! <src>,<dst>\n<TYPE>\n<payload>
//! ```
//!
//! The payload is the last section, so `MSG` and overlay payloads may contain
//! any character including newlines. Every other field is an integer, which
//! keeps the `,` `\n` `:` `;` delimiters unambiguous without escaping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::lsdb::{LinkMap, Lsa};
use crate::error::CodecError;
use crate::{NodeId, Sequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HelloKind {
    Init,
    Received,
}

/// Packet types owned by the Mobile-IP overlay. The core only forwards or
/// delivers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayKind {
    Request,
    Reply,
    Tunnel,
    Agent,
}

impl OverlayKind {
    fn tag(self) -> &'static str {
        match self {
            OverlayKind::Request => "REQ",
            OverlayKind::Reply => "REP",
            OverlayKind::Tunnel => "TUN",
            OverlayKind::Agent => "AGENT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbdEntry {
    pub origin: NodeId,
    pub sequence: Sequence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Hello(HelloKind),
    Dbd(Vec<DbdEntry>),
    Lsr(Vec<NodeId>),
    Lsu(Vec<Lsa>),
    Msg(String),
    Overlay(OverlayKind, String),
}

impl Body {
    pub fn tag(&self) -> &'static str {
        match self {
            Body::Hello(_) => "HELLO",
            Body::Dbd(_) => "DBD",
            Body::Lsr(_) => "LSR",
            Body::Lsu(_) => "LSU",
            Body::Msg(_) => "MSG",
            Body::Overlay(kind, _) => kind.tag(),
        }
    }

    /// Data-plane types are relayed hop by hop; control types never leave
    /// the link they were sent on.
    pub fn is_forwardable(&self) -> bool {
        matches!(self, Body::Msg(_) | Body::Overlay(..))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub src: NodeId,
    pub dst: NodeId,
    pub body: Body,
}

impl Packet {
    pub fn new(src: NodeId, dst: NodeId, body: Body) -> Self {
        Self { src, dst, body }
    }

    pub fn encode(&self) -> String {
        format!("{},{}\n{}\n{}", self.src, self.dst, self.body.tag(), encode_payload(&self.body))
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(data).map_err(|_| CodecError::Utf8)?;
        let sections: Vec<&str> = text.splitn(3, '\n').collect();
        let &[header, tag, payload] = &sections[..] else {
            return Err(CodecError::Framing(sections.len()));
        };

        let (src, dst) = header
            .split_once(',')
            .and_then(|(src, dst)| Some((src.trim().parse::<NodeId>().ok()?, dst.trim().parse::<NodeId>().ok()?)))
            .ok_or_else(|| CodecError::Header(header.to_string()))?;

        let body = match tag.trim() {
            "HELLO" => Body::Hello(decode_hello(payload)?),
            "DBD" => Body::Dbd(decode_lines(payload, "DBD", decode_dbd_line)?),
            "LSR" => Body::Lsr(decode_lines(payload, "LSR", |line| line.parse::<NodeId>().ok())?),
            "LSU" => Body::Lsu(decode_lines(payload, "LSU", decode_lsa_line)?),
            "MSG" => Body::Msg(payload.to_string()),
            "REQ" => Body::Overlay(OverlayKind::Request, payload.to_string()),
            "REP" => Body::Overlay(OverlayKind::Reply, payload.to_string()),
            "TUN" => Body::Overlay(OverlayKind::Tunnel, payload.to_string()),
            "AGENT" => Body::Overlay(OverlayKind::Agent, payload.to_string()),
            other => return Err(CodecError::UnknownType(other.to_string())),
        };

        Ok(Self { src, dst, body })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.body.tag(), self.src, self.dst)
    }
}

fn encode_payload(body: &Body) -> String {
    match body {
        Body::Hello(HelloKind::Init) => "init".to_string(),
        Body::Hello(HelloKind::Received) => "received".to_string(),
        Body::Dbd(entries) => entries
            .iter()
            .map(|entry| format!("{},{}", entry.origin, entry.sequence))
            .collect::<Vec<_>>()
            .join("\n"),
        Body::Lsr(origins) => origins
            .iter()
            .map(|origin| origin.to_string())
            .collect::<Vec<_>>()
            .join("\n"),
        Body::Lsu(lsas) => lsas.iter().map(encode_lsa_line).collect::<Vec<_>>().join("\n"),
        Body::Msg(text) | Body::Overlay(_, text) => text.clone(),
    }
}

fn encode_lsa_line(lsa: &Lsa) -> String {
    let links = lsa
        .links
        .iter()
        .map(|(neighbor, cost)| format!("{}:{}", neighbor, cost))
        .collect::<Vec<_>>()
        .join(";");
    format!("{},{},{}", lsa.origin, lsa.sequence, links)
}

fn decode_hello(payload: &str) -> Result<HelloKind, CodecError> {
    match payload.trim() {
        "init" => Ok(HelloKind::Init),
        "received" => Ok(HelloKind::Received),
        other => Err(CodecError::Payload {
            kind: "HELLO",
            line: other.to_string(),
        }),
    }
}

fn decode_lines<T>(
    payload: &str,
    kind: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Vec<T>, CodecError> {
    payload
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            parse(line).ok_or_else(|| CodecError::Payload {
                kind,
                line: line.to_string(),
            })
        })
        .collect()
}

fn decode_dbd_line(line: &str) -> Option<DbdEntry> {
    let (origin, sequence) = line.split_once(',')?;
    Some(DbdEntry {
        origin: origin.trim().parse().ok()?,
        sequence: sequence.trim().parse().ok()?,
    })
}

fn decode_lsa_line(line: &str) -> Option<Lsa> {
    let mut fields = line.splitn(3, ',');
    let origin = parse_field(fields.next())?;
    let sequence = parse_field(fields.next())?;
    let mut links = LinkMap::new();
    for link in fields.next().unwrap_or("").split(';').map(str::trim) {
        if link.is_empty() {
            continue;
        }
        let (neighbor, cost) = link.split_once(':')?;
        links.insert(neighbor.trim().parse().ok()?, cost.trim().parse().ok()?);
    }
    Some(Lsa { origin, sequence, links })
}

fn parse_field<T: FromStr>(field: Option<&str>) -> Option<T> {
    field?.trim().parse().ok()
}
