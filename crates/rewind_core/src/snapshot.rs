//! Snapshots: full trees, incremental mutation batches and viewport metadata.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::mutation::Mutation;
use crate::node::{count_nodes, NodeId, SerializedNode};
use crate::time::Timestamp;

/// Snapshot kind. Only `Full` snapshots can serve as a reconstruction base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Full,
    Incremental,
    Meta,
}

/// Visible area of the recorded page.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// Document scroll offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
}

/// A captured state of the tree at a point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp: Timestamp,
    pub kind: SnapshotKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<SerializedNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutations: Vec<Mutation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll: Option<ScrollPosition>,
}

impl Snapshot {
    /// A complete tree.
    pub fn full(timestamp: impl Into<Timestamp>, nodes: Vec<SerializedNode>) -> Self {
        Self {
            timestamp: timestamp.into(),
            kind: SnapshotKind::Full,
            nodes,
            mutations: Vec::new(),
            viewport: None,
            scroll: None,
        }
    }

    /// A batch of mutations relative to the preceding full snapshot.
    pub fn incremental(timestamp: impl Into<Timestamp>, mutations: Vec<Mutation>) -> Self {
        Self {
            timestamp: timestamp.into(),
            kind: SnapshotKind::Incremental,
            nodes: Vec::new(),
            mutations,
            viewport: None,
            scroll: None,
        }
    }

    /// Viewport / scroll metadata only.
    pub fn meta(timestamp: impl Into<Timestamp>) -> Self {
        Self {
            timestamp: timestamp.into(),
            kind: SnapshotKind::Meta,
            nodes: Vec::new(),
            mutations: Vec::new(),
            viewport: None,
            scroll: None,
        }
    }

    pub fn with_viewport(mut self, width: f64, height: f64) -> Self {
        self.viewport = Some(Viewport { width, height });
        self
    }

    pub fn with_scroll(mut self, x: f64, y: f64) -> Self {
        self.scroll = Some(ScrollPosition { x, y });
        self
    }

    /// Parse a snapshot from raw JSON bytes.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            crate::json::from_slice(raw).map_err(|e| ModelError::malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Build a snapshot from an already-decoded JSON value and check it.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let snapshot: Snapshot =
            crate::json::from_value(value).map_err(|e| ModelError::malformed(e.to_string()))?;
        snapshot.check()?;
        Ok(snapshot)
    }

    /// Structural checks that make a snapshot usable.
    fn check(&self) -> Result<()> {
        if let Some(viewport) = self.viewport {
            if !(viewport.width.is_finite() && viewport.height.is_finite())
                || viewport.width < 0.0
                || viewport.height < 0.0
            {
                return Err(ModelError::malformed(format!(
                    "invalid viewport {}x{}",
                    viewport.width, viewport.height
                )));
            }
        }

        match self.kind {
            SnapshotKind::Full => {
                if self.nodes.is_empty() {
                    return Err(ModelError::malformed(format!(
                        "full snapshot at {} has no nodes",
                        self.timestamp
                    )));
                }
                self.known_ids().map_err(|e| match e {
                    ModelError::DuplicateId { id } => ModelError::malformed(format!(
                        "node id {id} appears twice in snapshot at {}",
                        self.timestamp
                    )),
                    other => other,
                })?;
            }
            SnapshotKind::Incremental | SnapshotKind::Meta => {
                if !self.nodes.is_empty() {
                    return Err(ModelError::malformed(format!(
                        "{:?} snapshot at {} carries a node tree",
                        self.kind, self.timestamp
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.kind == SnapshotKind::Full
    }

    /// Number of nodes in the captured tree (zero for non-full snapshots).
    pub fn node_count(&self) -> usize {
        count_nodes(&self.nodes)
    }

    /// Every node id in the captured tree.
    pub fn known_ids(&self) -> Result<FxHashSet<NodeId>> {
        let mut ids = FxHashSet::default();
        for node in &self.nodes {
            node.collect_ids(&mut ids)?;
        }
        Ok(ids)
    }
}
