//! Live tree: the mutable in-memory reconstruction used for rendering.
//!
//! Nodes are stored flat in an id-indexed map, so attribute, text and style
//! mutations resolve their target in O(1). Child order is kept per node as a
//! list of ids.

use rewind_core::{
    ModelError, Mutation, NodeId, NodeKind, Result, ScrollPosition, SerializedNode, Viewport,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// A reconstructed node.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub tag_name: Option<String>,
    pub text: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub styles: BTreeMap<String, String>,
    pub parent: Option<NodeId>,
    pub children: SmallVec<[NodeId; 4]>,
}

impl LiveNode {
    fn from_serialized(node: &SerializedNode, parent: Option<NodeId>) -> Self {
        Self {
            id: node.id,
            kind: node.kind,
            tag_name: node.tag_name.clone(),
            text: node.text_content.clone(),
            attributes: node.attributes.clone(),
            styles: node.computed_styles.clone(),
            parent,
            children: node.children.iter().map(|c| c.id).collect(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// The reconstructed tree plus the view state of the recorded page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveTree {
    nodes: FxHashMap<NodeId, LiveNode>,
    roots: Vec<NodeId>,
    viewport: Option<Viewport>,
    scroll: Option<ScrollPosition>,
}

impl LiveTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize a serialized forest.
    ///
    /// Fails with `DuplicateId` if any id repeats.
    pub fn from_nodes(nodes: &[SerializedNode]) -> Result<Self> {
        let mut tree = Self::new();
        for node in nodes {
            tree.materialize(node, None)?;
            tree.roots.push(node.id);
        }
        Ok(tree)
    }

    fn materialize(&mut self, node: &SerializedNode, parent: Option<NodeId>) -> Result<()> {
        // Iterative so deeply nested documents cannot overflow the stack.
        let mut stack = vec![(node, parent)];
        while let Some((current, parent)) = stack.pop() {
            if self.nodes.contains_key(&current.id) {
                return Err(rewind_core::ModelError::DuplicateId { id: current.id });
            }
            self.nodes
                .insert(current.id, LiveNode::from_serialized(current, parent));
            for child in current.children.iter().rev() {
                stack.push((child, Some(current.id)));
            }
        }
        Ok(())
    }

    /// Apply one mutation in place.
    ///
    /// The mutation is validated first; on error the tree is unchanged.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        mutation.validate_with(|id| self.nodes.contains_key(&id))?;

        match mutation {
            Mutation::AddChildren {
                target,
                nodes,
                index,
                ..
            } => {
                for node in nodes {
                    self.materialize(node, Some(*target))?;
                }
                if let Some(parent) = self.nodes.get_mut(target) {
                    let at = index.unwrap_or(parent.children.len()).min(parent.children.len());
                    parent.children.insert_many(at, nodes.iter().map(|n| n.id));
                }
            }
            Mutation::RemoveChildren { target, ids, .. } => {
                if let Some(&child) = ids
                    .iter()
                    .find(|id| self.nodes.get(id).and_then(|n| n.parent) != Some(*target))
                {
                    return Err(ModelError::NotAChild {
                        parent: *target,
                        child,
                    });
                }
                for id in ids {
                    self.remove_subtree(*id);
                }
            }
            Mutation::SetAttribute {
                target,
                name,
                value,
                ..
            } => {
                if let Some(node) = self.nodes.get_mut(target) {
                    match value {
                        Some(value) => {
                            node.attributes.insert(name.clone(), value.clone());
                        }
                        None => {
                            node.attributes.remove(name);
                        }
                    }
                }
            }
            Mutation::SetText { target, text, .. } => {
                if let Some(node) = self.nodes.get_mut(target) {
                    node.text = Some(text.clone());
                }
            }
            Mutation::SetStyle {
                target,
                property,
                value,
                ..
            } => {
                if let Some(node) = self.nodes.get_mut(target) {
                    match value {
                        Some(value) => {
                            node.styles.insert(property.clone(), value.clone());
                        }
                        None => {
                            node.styles.remove(property);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Detach `id` from its parent and drop its whole subtree from the index.
    fn remove_subtree(&mut self, id: NodeId) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        match parent {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|&r| r != id),
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&LiveNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Top-level node ids in document order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// The first top-level node.
    pub fn root(&self) -> Option<&LiveNode> {
        self.roots.first().and_then(|id| self.nodes.get(id))
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &LiveNode> + '_ {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(|c| self.nodes.get(c))
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn scroll(&self) -> Option<ScrollPosition> {
        self.scroll
    }

    pub(crate) fn set_view_state(
        &mut self,
        viewport: Option<Viewport>,
        scroll: Option<ScrollPosition>,
    ) {
        self.viewport = viewport;
        self.scroll = scroll;
    }

    /// Concatenated text of a node and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if node.kind == NodeKind::Text {
                if let Some(text) = &node.text {
                    out.push_str(text);
                }
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Short human-readable descriptor for a node, e.g. `button#save.primary`.
    pub fn describe(&self, id: NodeId) -> Option<String> {
        let node = self.nodes.get(&id)?;
        let descriptor = match node.kind {
            NodeKind::Document => "document".to_string(),
            NodeKind::Text => match node.parent.and_then(|p| self.describe(p)) {
                Some(parent) => format!("{parent} > text"),
                None => "text".to_string(),
            },
            NodeKind::Comment => "comment".to_string(),
            NodeKind::Element => {
                let mut out = node
                    .tag_name
                    .as_deref()
                    .unwrap_or("element")
                    .to_ascii_lowercase();
                if let Some(dom_id) = node.attribute("id").filter(|s| !s.is_empty()) {
                    out.push('#');
                    out.push_str(dom_id);
                }
                if let Some(classes) = node.attribute("class") {
                    for class in classes.split_whitespace() {
                        out.push('.');
                        out.push_str(class);
                    }
                }
                if let Some(name) = node.attribute("name") {
                    out.push_str(&format!("[name=\"{name}\"]"));
                }
                out
            }
        };
        Some(descriptor)
    }

    /// Serialize back into the capture format, roots in document order.
    pub fn to_serialized(&self) -> Vec<SerializedNode> {
        self.roots
            .iter()
            .filter_map(|&id| self.serialize_node(id))
            .collect()
    }

    /// Rebuild the subtree under `id`. Children are assembled on an explicit
    /// stack so depth is not limited by the call stack.
    fn serialize_node(&self, id: NodeId) -> Option<SerializedNode> {
        let shallow = |node: &LiveNode| SerializedNode {
            id: node.id,
            kind: node.kind,
            tag_name: node.tag_name.clone(),
            text_content: node.text.clone(),
            attributes: node.attributes.clone(),
            children: Vec::with_capacity(node.children.len()),
            computed_styles: node.styles.clone(),
        };

        let root = self.nodes.get(&id)?;
        let mut stack = vec![(root, shallow(root), 0)];
        while let Some((node, _, next)) = stack.last_mut() {
            if let Some(&child) = node.children.get(*next) {
                *next += 1;
                if let Some(child) = self.nodes.get(&child) {
                    stack.push((child, shallow(child), 0));
                }
                continue;
            }
            let (_, done, _) = stack.pop()?;
            match stack.last_mut() {
                Some((_, parent, _)) => parent.children.push(done),
                None => return Some(done),
            }
        }
        None
    }
}
