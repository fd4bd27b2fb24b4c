//! Model error types

use thiserror::Error;

use crate::mutation::MutationKind;
use crate::node::NodeId;

/// Errors raised while parsing or validating recorded session data.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Snapshot input could not be turned into a usable snapshot.
    #[error("malformed snapshot: {reason}")]
    MalformedSnapshot { reason: String },

    /// A mutation addresses a node id that is not part of the tree.
    #[error("{mutation} mutation targets unknown node {target}")]
    UnknownTarget {
        target: NodeId,
        mutation: MutationKind,
    },

    /// A node id appeared twice. Ids are never reused within a session.
    #[error("node id {id} is already in use")]
    DuplicateId { id: NodeId },

    /// A removal names a node that is not a direct child of the target.
    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    /// The session has no full snapshot to reconstruct from.
    #[error("session has no full snapshot to use as a reconstruction base")]
    MissingBaseSnapshot,

    #[error("invalid session data: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedSnapshot {
            reason: reason.into(),
        }
    }
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
