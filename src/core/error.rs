//! Error types for the streaming core

use thiserror::Error;

use super::types::{ClientId, HierarchyId, NodeId};

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("client id 0 is reserved")]
    InvalidClient,

    #[error("unknown client: {0}")]
    UnknownClient(ClientId),

    #[error("client already connected: {0}")]
    DuplicateClient(ClientId),

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("unknown hierarchy: {0}")]
    UnknownHierarchy(HierarchyId),

    #[error("{child} is held by {holder}, {requester} cannot take it")]
    OwnershipConflict {
        child: HierarchyId,
        holder: ClientId,
        requester: ClientId,
    },

    #[error("{node} already belongs to hierarchy {hierarchy}")]
    AlreadyClaimed { node: NodeId, hierarchy: HierarchyId },

    #[error("cannot parent {child} under {parent}: would create a cycle")]
    ReparentCycle { child: NodeId, parent: NodeId },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
