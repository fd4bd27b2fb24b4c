//! Structural complexity metrics for a captured tree.

use rewind_core::{NodeKind, SerializedNode};
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Nodes visited between progress reports.
const REPORT_EVERY: usize = 1024;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityReport {
    pub node_count: usize,
    pub element_count: usize,
    pub text_count: usize,
    /// Depth of the deepest node; roots are depth 1.
    pub max_depth: usize,
    pub max_fan_out: usize,
    pub distinct_tags: usize,
    pub attribute_count: usize,
    pub style_count: usize,
    pub text_bytes: usize,
    /// Normalized to 0..=100.
    pub score: f64,
}

impl ComplexityReport {
    fn finish(mut self) -> Self {
        let size = 25.0 * (1.0 + self.node_count as f64).log10();
        let depth = 1.5 * self.max_depth as f64;
        let breadth = 0.05 * self.max_fan_out as f64;
        let styling = 5.0 * (1.0 + self.style_count as f64).log10();
        self.score = (size + depth + breadth + styling).clamp(0.0, 100.0);
        self
    }
}

/// Walk `nodes` and collect metrics. `progress` is called with the number of
/// nodes visited so far; returning `false` stops the walk and yields `None`.
pub fn analyze<F>(nodes: &[SerializedNode], mut progress: F) -> Option<ComplexityReport>
where
    F: FnMut(usize) -> bool,
{
    let mut report = ComplexityReport::default();
    let mut tags: FxHashSet<&str> = FxHashSet::default();
    let mut stack: Vec<(&SerializedNode, usize)> = nodes.iter().rev().map(|n| (n, 1)).collect();

    while let Some((node, depth)) = stack.pop() {
        report.node_count += 1;
        report.max_depth = report.max_depth.max(depth);
        report.max_fan_out = report.max_fan_out.max(node.children.len());
        report.attribute_count += node.attributes.len();
        report.style_count += node.computed_styles.len();

        match node.kind {
            NodeKind::Element => {
                report.element_count += 1;
                if let Some(tag) = node.tag_name.as_deref() {
                    tags.insert(tag);
                }
            }
            NodeKind::Text => {
                report.text_count += 1;
                report.text_bytes += node.text_content.as_deref().map_or(0, str::len);
            }
            NodeKind::Comment | NodeKind::Document => {}
        }

        if report.node_count % REPORT_EVERY == 0 && !progress(report.node_count) {
            return None;
        }
        stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
    }

    if !progress(report.node_count) {
        return None;
    }
    report.distinct_tags = tags.len();
    Some(report.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn page() -> Vec<SerializedNode> {
        vec![SerializedNode::document(1).with_child(
            SerializedNode::element(2, "body")
                .with_attribute("class", "app")
                .with_child(
                    SerializedNode::element(3, "ul")
                        .with_child(SerializedNode::element(4, "li").with_child(SerializedNode::text(5, "one")))
                        .with_child(SerializedNode::element(6, "li").with_style("color", "red")),
                )
                .with_child(SerializedNode::comment(7, "x")),
        )]
    }

    #[test]
    fn counts_structure() {
        let report = analyze(&page(), |_| true).unwrap();
        assert_eq!(report.node_count, 7);
        assert_eq!(report.element_count, 4);
        assert_eq!(report.text_count, 1);
        assert_eq!(report.max_depth, 5);
        assert_eq!(report.max_fan_out, 2);
        assert_eq!(report.distinct_tags, 3);
        assert_eq!(report.attribute_count, 1);
        assert_eq!(report.style_count, 1);
        assert_eq!(report.text_bytes, 3);
        assert!(report.score > 0.0 && report.score <= 100.0);
    }

    #[test]
    fn score_grows_with_size() {
        let small = analyze(&page(), |_| true).unwrap();
        let wide: Vec<SerializedNode> = (0..5_000).map(|i| SerializedNode::element(i, "div")).collect();
        let large = analyze(&wide, |_| true).unwrap();
        assert!(large.score > small.score);
    }

    #[test]
    fn empty_forest() {
        let report = analyze(&[], |_| true).unwrap();
        assert_eq!(report.node_count, 0);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn stops_when_progress_refuses() {
        let wide: Vec<SerializedNode> = (0..3_000).map(|i| SerializedNode::element(i, "div")).collect();
        let mut calls = 0;
        let result = analyze(&wide, |_| {
            calls += 1;
            calls < 2
        });
        assert!(result.is_none());
        assert_eq!(calls, 2);
    }
}
