//! Tree reconstruction engine.
//!
//! Given the session's snapshots, produces the live tree at any time `T`:
//!
//! 1. Binary-search the nearest full snapshot at or before `T` (the base).
//! 2. Materialize it and collect every mutation recorded before the next
//!    full snapshot (the window), sorted by timestamp.
//! 3. Apply mutations with `timestamp <= T` in order.
//!
//! Forward seeks inside the same window only apply the new mutations. A
//! backward seek past an applied mutation, or a seek into another window,
//! rebuilds from the base. Mutations that cannot be applied are skipped and
//! recorded as [`ReconstructionWarning`]s.

use rewind_core::{
    ModelError, Mutation, MutationKind, NodeId, ScrollPosition, Snapshot, SnapshotKind, Timestamp,
    Viewport,
};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::ReconstructError;
use crate::tree::LiveTree;

/// A mutation that was skipped during reconstruction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReconstructionWarning {
    pub timestamp: Timestamp,
    pub target: NodeId,
    pub mutation: MutationKind,
    pub reason: String,
}

impl ReconstructionWarning {
    fn new(mutation: &Mutation, error: &ModelError) -> Self {
        Self {
            timestamp: mutation.timestamp(),
            target: mutation.target(),
            mutation: mutation.kind(),
            reason: error.to_string(),
        }
    }
}

/// How a reconstruction request was satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionMode {
    /// The live tree was discarded and rebuilt from a base snapshot.
    Rebuilt,
    /// Only mutations since the last applied time were applied.
    Incremental,
    /// The tree already reflected the requested time.
    Unchanged,
}

/// Outcome of [`ReconstructionEngine::reconstruct`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reconstruction {
    pub mode: ReconstructionMode,
    /// Mutations applied by this call.
    pub applied: usize,
    /// Mutations skipped by this call.
    pub skipped: usize,
    /// Timestamp of the base snapshot in use.
    pub base_time: Timestamp,
    /// Bumped whenever the live tree is rebuilt.
    pub epoch: u64,
}

/// Counters over the engine's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub rebuilds: u64,
    pub incremental_passes: u64,
    pub mutations_applied: u64,
    pub mutations_skipped: u64,
}

/// The active base window and its live tree.
#[derive(Debug)]
struct Window {
    /// Position in `ReconstructionEngine::bases`.
    base: usize,
    mutations: Vec<Mutation>,
    /// Index of the next mutation to apply.
    cursor: usize,
    applied_until: Timestamp,
    tree: LiveTree,
}

impl Window {
    /// Apply pending mutations up to and including `until`.
    ///
    /// `reported` is the number of leading window mutations whose failures
    /// were already reported; replaying them after a rebuild skips them
    /// again without a second warning.
    fn advance(
        &mut self,
        until: Timestamp,
        reported: &mut usize,
        warnings: &mut Vec<ReconstructionWarning>,
    ) -> (usize, usize) {
        let (mut applied, mut skipped) = (0, 0);
        while let Some(mutation) = self.mutations.get(self.cursor) {
            if mutation.timestamp() > until {
                break;
            }
            match self.tree.apply(mutation) {
                Ok(()) => applied += 1,
                Err(_) if self.cursor < *reported => {
                    tracing::trace!(
                        target_id = %mutation.target(),
                        at = %mutation.timestamp(),
                        "skipping previously reported mutation"
                    );
                    skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        target_id = %mutation.target(),
                        mutation = %mutation.kind(),
                        at = %mutation.timestamp(),
                        error = %e,
                        "skipping mutation during reconstruction"
                    );
                    warnings.push(ReconstructionWarning::new(mutation, &e));
                    skipped += 1;
                }
            }
            self.cursor += 1;
        }
        *reported = (*reported).max(self.cursor);
        self.applied_until = until;
        (applied, skipped)
    }

    /// True if no applied mutation is newer than `t`, i.e. the tree already
    /// matches `t` even though `t` is earlier than `applied_until`.
    fn covers(&self, t: Timestamp) -> bool {
        match self.cursor.checked_sub(1).and_then(|i| self.mutations.get(i)) {
            Some(last) => last.timestamp() <= t,
            None => true,
        }
    }
}

/// Owns the live tree for one replay session.
#[derive(Debug)]
pub struct ReconstructionEngine {
    snapshots: Vec<Snapshot>,
    /// Indices of full snapshots in `snapshots`.
    bases: Vec<usize>,
    viewports: Vec<(Timestamp, Viewport)>,
    scrolls: Vec<(Timestamp, ScrollPosition)>,
    window: Option<Window>,
    warnings: Vec<ReconstructionWarning>,
    /// Per base window: how many leading mutations have had their failures
    /// reported. Survives rebuilds so scrubbing does not repeat warnings.
    reported: FxHashMap<usize, usize>,
    stats: EngineStats,
    epoch: u64,
}

impl ReconstructionEngine {
    /// Create an engine over a session's snapshots. Input is sorted defensively.
    pub fn new(mut snapshots: Vec<Snapshot>) -> Self {
        snapshots.sort_by_key(|s| s.timestamp);

        let bases = snapshots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == SnapshotKind::Full)
            .map(|(i, _)| i)
            .collect();
        let viewports = snapshots
            .iter()
            .filter_map(|s| s.viewport.map(|v| (s.timestamp, v)))
            .collect();
        let scrolls = snapshots
            .iter()
            .filter_map(|s| s.scroll.map(|v| (s.timestamp, v)))
            .collect();

        Self {
            snapshots,
            bases,
            viewports,
            scrolls,
            window: None,
            warnings: Vec::new(),
            reported: FxHashMap::default(),
            stats: EngineStats::default(),
            epoch: 0,
        }
    }

    /// Reconstruct the tree at `t`, reusing the current window when possible.
    pub fn reconstruct(&mut self, t: Timestamp) -> Result<Reconstruction, ReconstructError> {
        let base = self.base_for(t)?;
        let base_time = self.snapshots[self.bases[base]].timestamp;

        let reusable = self
            .window
            .as_mut()
            .filter(|w| w.base == base && (t >= w.applied_until || w.covers(t)));

        let outcome = match reusable {
            Some(window) => {
                let (applied, skipped) = if t >= window.applied_until {
                    let reported = self.reported.entry(base).or_default();
                    window.advance(t, reported, &mut self.warnings)
                } else {
                    window.applied_until = t;
                    (0, 0)
                };
                self.stats.incremental_passes += 1;
                Reconstruction {
                    mode: if applied + skipped > 0 {
                        ReconstructionMode::Incremental
                    } else {
                        ReconstructionMode::Unchanged
                    },
                    applied,
                    skipped,
                    base_time,
                    epoch: self.epoch,
                }
            }
            None => {
                let (applied, skipped) = self.rebuild(base, t)?;
                Reconstruction {
                    mode: ReconstructionMode::Rebuilt,
                    applied,
                    skipped,
                    base_time,
                    epoch: self.epoch,
                }
            }
        };

        self.stats.mutations_applied += outcome.applied as u64;
        self.stats.mutations_skipped += outcome.skipped as u64;
        self.apply_view_state(t);
        Ok(outcome)
    }

    /// Position in `bases` of the nearest full snapshot at or before `t`.
    /// Times before the first full snapshot use the first one.
    fn base_for(&self, t: Timestamp) -> Result<usize, ReconstructError> {
        if self.bases.is_empty() {
            return Err(ReconstructError::NoBaseSnapshot { at: t });
        }
        let after = self
            .bases
            .partition_point(|&i| self.snapshots[i].timestamp <= t);
        Ok(after.saturating_sub(1))
    }

    fn rebuild(&mut self, base: usize, t: Timestamp) -> Result<(usize, usize), ReconstructError> {
        // Drop the old tree before building the new one.
        self.window = None;

        let (base_snapshot, mutations) = self.window_parts(base);
        let base_time = base_snapshot.timestamp;
        let tree = LiveTree::from_nodes(&base_snapshot.nodes).map_err(|source| {
            ReconstructError::MalformedBase {
                timestamp: base_time,
                source,
            }
        })?;

        tracing::debug!(
            base = %base_time,
            nodes = tree.len(),
            mutations = mutations.len(),
            target = %t,
            "rebuilding live tree from base snapshot"
        );

        let mut window = Window {
            base,
            mutations,
            cursor: 0,
            applied_until: base_time,
            tree,
        };
        let reported = self.reported.entry(base).or_default();
        let counts = window.advance(t, reported, &mut self.warnings);

        self.window = Some(window);
        self.epoch += 1;
        self.stats.rebuilds += 1;
        Ok(counts)
    }

    /// The base snapshot for `t` and its window's mutations in apply order,
    /// without touching the live tree. Feeds [`reconstruct`] on another
    /// thread.
    pub fn window_for(&self, t: Timestamp) -> Result<(&Snapshot, Vec<Mutation>), ReconstructError> {
        let base = self.base_for(t)?;
        Ok(self.window_parts(base))
    }

    fn window_parts(&self, base: usize) -> (&Snapshot, Vec<Mutation>) {
        let base_index = self.bases[base];
        let end_index = self
            .bases
            .get(base + 1)
            .copied()
            .unwrap_or(self.snapshots.len());

        let mut mutations: Vec<Mutation> = self.snapshots[base_index..end_index]
            .iter()
            .filter(|s| s.kind != SnapshotKind::Meta)
            .flat_map(|s| s.mutations.iter().cloned())
            .collect();
        mutations.sort_by_key(Mutation::timestamp);
        (&self.snapshots[base_index], mutations)
    }

    fn apply_view_state(&mut self, t: Timestamp) {
        let viewport = latest_at(&self.viewports, t);
        let scroll = latest_at(&self.scrolls, t);
        if let Some(window) = self.window.as_mut() {
            window.tree.set_view_state(viewport, scroll);
        }
    }

    /// Convenience: reconstruct and borrow the tree.
    pub fn tree_at(&mut self, t: Timestamp) -> Result<&LiveTree, ReconstructError> {
        self.reconstruct(t)?;
        self.window
            .as_ref()
            .map(|w| &w.tree)
            .ok_or(ReconstructError::NoBaseSnapshot { at: t })
    }

    /// The current live tree, if one has been built.
    pub fn tree(&self) -> Option<&LiveTree> {
        self.window.as_ref().map(|w| &w.tree)
    }

    /// Time the live tree currently reflects.
    pub fn applied_until(&self) -> Option<Timestamp> {
        self.window.as_ref().map(|w| w.applied_until)
    }

    /// The full snapshot the current window is based on.
    pub fn base_snapshot(&self) -> Option<&Snapshot> {
        self.window
            .as_ref()
            .map(|w| &self.snapshots[self.bases[w.base]])
    }

    /// Mutations of the current window recorded at or before `until`.
    pub fn window_mutations(&self, until: Timestamp) -> Vec<Mutation> {
        self.window
            .as_ref()
            .map(|w| {
                w.mutations
                    .iter()
                    .take_while(|m| m.timestamp() <= until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn warnings(&self) -> &[ReconstructionWarning] {
        &self.warnings
    }

    /// Drain accumulated warnings.
    pub fn take_warnings(&mut self) -> Vec<ReconstructionWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Discard the live tree. The next `reconstruct` rebuilds from a base.
    pub fn invalidate(&mut self) {
        if self.window.take().is_some() {
            self.epoch += 1;
        }
    }
}

fn latest_at<T: Copy>(marks: &[(Timestamp, T)], t: Timestamp) -> Option<T> {
    let after = marks.partition_point(|(at, _)| *at <= t);
    after.checked_sub(1).map(|i| marks[i].1)
}

/// Reconstruct a detached tree from `base` and `mutations` up to `until`.
///
/// Mutations are applied in timestamp order (stable for equal stamps);
/// faulty ones are skipped and returned as warnings. The base must be a
/// full snapshot.
pub fn reconstruct(
    base: &Snapshot,
    mutations: &[Mutation],
    until: Timestamp,
) -> Result<(LiveTree, Vec<ReconstructionWarning>), ReconstructError> {
    if !base.is_full() {
        return Err(ReconstructError::MalformedBase {
            timestamp: base.timestamp,
            source: ModelError::MissingBaseSnapshot,
        });
    }
    let tree = LiveTree::from_nodes(&base.nodes).map_err(|source| {
        ReconstructError::MalformedBase {
            timestamp: base.timestamp,
            source,
        }
    })?;

    let mut ordered: Vec<Mutation> = mutations.to_vec();
    ordered.sort_by_key(Mutation::timestamp);

    let mut window = Window {
        base: 0,
        mutations: ordered,
        cursor: 0,
        applied_until: base.timestamp,
        tree,
    };
    let mut warnings = Vec::new();
    window.advance(until, &mut 0, &mut warnings);
    window
        .tree
        .set_view_state(base.viewport, base.scroll);
    Ok((window.tree, warnings))
}
