//! Rewind Core
//!
//! Data model for recorded browser sessions:
//!
//! - **Serialized trees**: [`SerializedNode`] as captured by the recording SDK
//! - **Snapshots**: full trees, incremental mutation batches and viewport metadata
//! - **Mutations**: id-addressed deltas applied on top of a full snapshot
//! - **Session events**: interactions, errors, network and navigation records
//!
//! Everything here is plain data plus validation. Reconstruction and playback
//! live in `rewind_replay`.
//!
//! # Example
//!
//! ```rust
//! use rewind_core::{Snapshot, SerializedNode};
//!
//! let raw = br#"{
//!     "timestamp": 0,
//!     "kind": "full",
//!     "nodes": [{ "id": 1, "kind": "element", "tagName": "body" }]
//! }"#;
//! let snapshot = Snapshot::parse(raw).unwrap();
//! assert!(snapshot.is_full());
//! assert_eq!(snapshot.node_count(), 1);
//! ```

pub mod error;
pub mod events;
pub mod json;
pub mod mutation;
pub mod node;
pub mod session;
pub mod snapshot;
pub mod time;

pub use error::{ModelError, Result};
pub use events::{
    ErrorEvent, InteractionEvent, InteractionKind, NavigationEvent, NetworkEvent, Severity,
};
pub use mutation::{Mutation, MutationKind};
pub use node::{count_nodes, NodeId, NodeKind, SerializedNode};
pub use session::{parse_session, LoadReport, RecordedSession, SessionBuilder};
pub use snapshot::{ScrollPosition, Snapshot, SnapshotKind, Viewport};
pub use time::Timestamp;
