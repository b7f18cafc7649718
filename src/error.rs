use thiserror::Error;

use crate::NodeId;

/// Rejected link store operation. Reported to the operator, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link to {0} already exists")]
    AlreadyExists(NodeId),
    #[error("link to {0} not found")]
    NotFound(NodeId),
    #[error("cannot add link to self ({0})")]
    SelfLink(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("packet is not valid UTF-8")]
    Utf8,
    #[error("expected address, type and payload sections, found {0}")]
    Framing(usize),
    #[error("malformed address header `{0}`")]
    Header(String),
    #[error("unknown packet type `{0}`")]
    UnknownType(String),
    #[error("malformed {kind} payload `{line}`")]
    Payload { kind: &'static str, line: String },
}
