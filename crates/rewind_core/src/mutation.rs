//! Id-addressed tree mutations.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, Result};
use crate::node::{NodeId, SerializedNode};
use crate::time::Timestamp;

/// A single recorded change to the tree.
///
/// Mutations are only meaningful relative to the full snapshot that precedes
/// them. Every variant addresses its `target` by [`NodeId`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mutation {
    /// Insert `nodes` (with their subtrees) under `target`.
    ///
    /// `index` is the position in the target's child list; `None` appends.
    AddChildren {
        target: NodeId,
        timestamp: Timestamp,
        nodes: Vec<SerializedNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    /// Remove the listed children (and their subtrees) from `target`.
    RemoveChildren {
        target: NodeId,
        timestamp: Timestamp,
        ids: Vec<NodeId>,
    },
    /// Set an attribute; a `None` value removes it.
    SetAttribute {
        target: NodeId,
        timestamp: Timestamp,
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
    /// Replace the text content of `target`.
    SetText {
        target: NodeId,
        timestamp: Timestamp,
        #[serde(default)]
        text: String,
    },
    /// Set a computed style property; a `None` value removes it.
    SetStyle {
        target: NodeId,
        timestamp: Timestamp,
        property: String,
        #[serde(default)]
        value: Option<String>,
    },
}

/// Discriminant of a [`Mutation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    AddChildren,
    RemoveChildren,
    SetAttribute,
    SetText,
    SetStyle,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::AddChildren => "addChildren",
            MutationKind::RemoveChildren => "removeChildren",
            MutationKind::SetAttribute => "setAttribute",
            MutationKind::SetText => "setText",
            MutationKind::SetStyle => "setStyle",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Mutation {
    pub fn target(&self) -> NodeId {
        match self {
            Mutation::AddChildren { target, .. }
            | Mutation::RemoveChildren { target, .. }
            | Mutation::SetAttribute { target, .. }
            | Mutation::SetText { target, .. }
            | Mutation::SetStyle { target, .. } => *target,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Mutation::AddChildren { timestamp, .. }
            | Mutation::RemoveChildren { timestamp, .. }
            | Mutation::SetAttribute { timestamp, .. }
            | Mutation::SetText { timestamp, .. }
            | Mutation::SetStyle { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::AddChildren { .. } => MutationKind::AddChildren,
            Mutation::RemoveChildren { .. } => MutationKind::RemoveChildren,
            Mutation::SetAttribute { .. } => MutationKind::SetAttribute,
            Mutation::SetText { .. } => MutationKind::SetText,
            Mutation::SetStyle { .. } => MutationKind::SetStyle,
        }
    }

    /// Nodes introduced by this mutation (empty unless `AddChildren`).
    pub fn added_nodes(&self) -> &[SerializedNode] {
        match self {
            Mutation::AddChildren { nodes, .. } => nodes,
            _ => &[],
        }
    }

    /// Validate against the set of ids currently present in the tree.
    pub fn validate(&self, known: &FxHashSet<NodeId>) -> Result<()> {
        self.validate_with(|id| known.contains(&id))
    }

    /// Validate using an arbitrary membership test.
    ///
    /// Fails with [`ModelError::UnknownTarget`] when the target (or a removed
    /// child) is absent, and with [`ModelError::DuplicateId`] when an added
    /// subtree reuses an id that is already live or repeats one internally.
    pub fn validate_with<F: Fn(NodeId) -> bool>(&self, is_known: F) -> Result<()> {
        let target = self.target();
        if !is_known(target) {
            return Err(ModelError::UnknownTarget {
                target,
                mutation: self.kind(),
            });
        }

        match self {
            Mutation::RemoveChildren { ids, .. } => {
                if let Some(&missing) = ids.iter().find(|&&id| !is_known(id)) {
                    return Err(ModelError::UnknownTarget {
                        target: missing,
                        mutation: self.kind(),
                    });
                }
            }
            Mutation::AddChildren { nodes, .. } => {
                let mut added = FxHashSet::default();
                for node in nodes {
                    node.collect_ids(&mut added)?;
                }
                if let Some(&reused) = added.iter().find(|&&id| is_known(id)) {
                    return Err(ModelError::DuplicateId { id: reused });
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(ids: &[u64]) -> FxHashSet<NodeId> {
        ids.iter().copied().map(NodeId).collect()
    }

    #[test]
    fn parses_tagged_variants() {
        let raw = r#"[
            {"type": "setText", "target": 2, "timestamp": 100, "text": "hi"},
            {"type": "removeChildren", "target": 1, "timestamp": 200, "ids": [3]},
            {"type": "setAttribute", "target": 2, "timestamp": 210, "name": "class"}
        ]"#;
        let mutations: Vec<Mutation> = serde_json::from_str(raw).unwrap();
        assert_eq!(mutations[0].kind(), MutationKind::SetText);
        assert_eq!(mutations[1].target(), NodeId(1));
        assert_eq!(mutations[2].timestamp(), Timestamp::from_millis(210.0));
        assert!(matches!(
            &mutations[2],
            Mutation::SetAttribute { value: None, .. }
        ));
    }

    #[test]
    fn unknown_target_fails_validation() {
        let m = Mutation::SetText {
            target: NodeId(42),
            timestamp: Timestamp::ZERO,
            text: "x".into(),
        };
        let err = m.validate(&known(&[1, 2])).unwrap_err();
        assert!(matches!(
            err,
            ModelError::UnknownTarget { target, mutation: MutationKind::SetText } if target == NodeId(42)
        ));
    }

    #[test]
    fn removing_unknown_child_fails_validation() {
        let m = Mutation::RemoveChildren {
            target: NodeId(1),
            timestamp: Timestamp::ZERO,
            ids: vec![NodeId(2), NodeId(5)],
        };
        let err = m.validate(&known(&[1, 2])).unwrap_err();
        assert!(matches!(err, ModelError::UnknownTarget { target, .. } if target == NodeId(5)));
    }

    #[test]
    fn added_ids_must_be_fresh() {
        let m = Mutation::AddChildren {
            target: NodeId(1),
            timestamp: Timestamp::ZERO,
            nodes: vec![SerializedNode::element(2, "p")],
            index: None,
        };
        assert!(m.validate(&known(&[1])).is_ok());
        assert!(matches!(
            m.validate(&known(&[1, 2])).unwrap_err(),
            ModelError::DuplicateId { .. }
        ));
    }
}
