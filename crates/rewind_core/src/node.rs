//! Serialized tree nodes as captured by the recording SDK.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ModelError, Result};

/// Stable node handle. Unique within a session and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Kind of a serialized node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Element,
    Text,
    Comment,
    Document,
}

/// A node of a captured tree, with its subtree inlined.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNode {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SerializedNode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub computed_styles: BTreeMap<String, String>,
}

impl SerializedNode {
    fn bare(id: u64, kind: NodeKind) -> Self {
        Self {
            id: NodeId(id),
            kind,
            tag_name: None,
            text_content: None,
            attributes: BTreeMap::new(),
            children: Vec::new(),
            computed_styles: BTreeMap::new(),
        }
    }

    /// Create the document root.
    pub fn document(id: u64) -> Self {
        Self::bare(id, NodeKind::Document)
    }

    /// Create an element node.
    pub fn element(id: u64, tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: Some(tag_name.into()),
            ..Self::bare(id, NodeKind::Element)
        }
    }

    /// Create a text node.
    pub fn text(id: u64, content: impl Into<String>) -> Self {
        Self {
            text_content: Some(content.into()),
            ..Self::bare(id, NodeKind::Text)
        }
    }

    /// Create a comment node.
    pub fn comment(id: u64, content: impl Into<String>) -> Self {
        Self {
            text_content: Some(content.into()),
            ..Self::bare(id, NodeKind::Comment)
        }
    }

    /// Append a child.
    pub fn with_child(mut self, child: SerializedNode) -> Self {
        self.children.push(child);
        self
    }

    /// Set an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set a computed style property.
    pub fn with_style(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.computed_styles.insert(property.into(), value.into());
        self
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        let mut total = 0;
        self.walk(&mut |_, _| total += 1);
        total
    }

    /// Depth-first pre-order walk. The callback receives each node and its depth.
    ///
    /// Uses an explicit stack, so arbitrarily deep trees are fine.
    pub fn walk<F: FnMut(&SerializedNode, usize)>(&self, f: &mut F) {
        let mut stack = vec![(self, 0)];
        while let Some((node, depth)) = stack.pop() {
            f(node, depth);
            stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
        }
    }

    /// Add every id in this subtree to `ids`, failing on the first repeat.
    pub fn collect_ids(&self, ids: &mut FxHashSet<NodeId>) -> Result<()> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if !ids.insert(node.id) {
                return Err(ModelError::DuplicateId { id: node.id });
            }
            stack.extend(node.children.iter().rev());
        }
        Ok(())
    }
}

/// Total node count across a forest.
pub fn count_nodes(nodes: &[SerializedNode]) -> usize {
    nodes.iter().map(SerializedNode::count).sum()
}
