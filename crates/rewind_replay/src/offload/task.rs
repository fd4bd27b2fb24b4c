//! Offloadable task definitions.

use rewind_core::{count_nodes, Mutation, SerializedNode, Snapshot, Timestamp};
use serde::Serialize;

use super::complexity::{analyze, ComplexityReport};
use super::css::minify;
use crate::engine::reconstruct;
use crate::error::OffloadError;

/// Fractional progress of a running task.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Progress {
    pub phase: &'static str,
    /// 0.0 to 100.0
    pub percent: f32,
}

impl Progress {
    pub fn new(phase: &'static str, done: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (done as f32 / total as f32 * 100.0).clamp(0.0, 100.0)
        };
        Self { phase, percent }
    }
}

/// Heavy work that may run on the offload worker.
#[derive(Clone, Debug, PartialEq)]
pub enum OffloadTask {
    /// Rebuild a tree from a base snapshot and its mutations.
    ReconstructBulk {
        base: Snapshot,
        mutations: Vec<Mutation>,
        until: Timestamp,
    },
    /// Minify stylesheet text.
    CompressStylesheets { sheets: Vec<String> },
    /// Structural metrics over a node forest.
    AnalyzeComplexity { nodes: Vec<SerializedNode> },
}

/// Terminal result of a task.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "task", rename_all = "camelCase")]
pub enum TaskOutput {
    Reconstructed {
        nodes: Vec<SerializedNode>,
        node_count: usize,
        warnings: usize,
    },
    Stylesheets {
        sheets: Vec<String>,
        bytes_before: usize,
        bytes_after: usize,
    },
    Complexity(ComplexityReport),
}

impl OffloadTask {
    pub fn name(&self) -> &'static str {
        match self {
            OffloadTask::ReconstructBulk { .. } => "reconstructBulk",
            OffloadTask::CompressStylesheets { .. } => "compressStylesheets",
            OffloadTask::AnalyzeComplexity { .. } => "analyzeComplexity",
        }
    }

    /// Work units used to pick an executor: nodes for tree tasks, rules
    /// (closing braces) for stylesheets.
    pub fn size(&self) -> usize {
        match self {
            OffloadTask::ReconstructBulk {
                base, mutations, ..
            } => {
                base.node_count()
                    + mutations
                        .iter()
                        .map(|m| count_nodes(m.added_nodes()))
                        .sum::<usize>()
            }
            OffloadTask::CompressStylesheets { sheets } => sheets
                .iter()
                .map(|s| s.bytes().filter(|&b| b == b'}').count())
                .sum(),
            OffloadTask::AnalyzeComplexity { nodes } => count_nodes(nodes),
        }
    }

    /// Run the task to completion on the current thread.
    ///
    /// `report` receives progress; returning `false` from it aborts the task
    /// with [`OffloadError::Cancelled`].
    pub fn run(
        &self,
        report: &mut dyn FnMut(Progress) -> bool,
    ) -> Result<TaskOutput, OffloadError> {
        let task = self.name();
        let mut checkpoint = |progress: Progress| -> Result<(), OffloadError> {
            if report(progress) {
                Ok(())
            } else {
                Err(OffloadError::Cancelled { task })
            }
        };

        match self {
            OffloadTask::ReconstructBulk {
                base,
                mutations,
                until,
            } => {
                checkpoint(Progress::new("reconstruct", 0, 2))?;
                let (tree, warnings) = reconstruct(base, mutations, *until)?;
                checkpoint(Progress::new("serialize", 1, 2))?;
                let nodes = tree.to_serialized();
                checkpoint(Progress::new("serialize", 2, 2))?;
                Ok(TaskOutput::Reconstructed {
                    node_count: tree.len(),
                    nodes,
                    warnings: warnings.len(),
                })
            }
            OffloadTask::CompressStylesheets { sheets } => {
                let mut out = Vec::with_capacity(sheets.len());
                for (i, sheet) in sheets.iter().enumerate() {
                    checkpoint(Progress::new("minify", i, sheets.len()))?;
                    out.push(minify(sheet));
                }
                checkpoint(Progress::new("minify", sheets.len(), sheets.len()))?;
                Ok(TaskOutput::Stylesheets {
                    bytes_before: sheets.iter().map(String::len).sum(),
                    bytes_after: out.iter().map(String::len).sum(),
                    sheets: out,
                })
            }
            OffloadTask::AnalyzeComplexity { nodes } => {
                let total = count_nodes(nodes);
                let metrics = analyze(nodes, |done| {
                    checkpoint(Progress::new("analyze", done, total)).is_ok()
                })
                .ok_or(OffloadError::Cancelled { task })?;
                Ok(TaskOutput::Complexity(metrics))
            }
        }
    }
}
