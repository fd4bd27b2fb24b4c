//! Derived dashboard counters.

use std::collections::BTreeMap;

use rewind_core::{InteractionKind, RecordedSession};
use serde::Serialize;

use crate::offload::ComplexityReport;

/// Interactions per minute at which density stops adding to engagement.
const SATURATING_DENSITY: f64 = 30.0;

/// Counters for the elapsed part of a replay.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub current_ms: f64,
    pub duration_ms: f64,
    pub interactions: usize,
    pub interactions_by_kind: BTreeMap<InteractionKind, usize>,
    pub errors: usize,
    pub network_failures: usize,
    pub navigations: usize,
    /// Errors per minute of elapsed replay time.
    pub error_rate: f64,
    /// 0 to 100, from interaction density and variety.
    pub engagement_score: f64,
    pub reconstruction_warnings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<ComplexityReport>,
}

/// Relative timestamps per event class, sorted, for prefix counts.
#[derive(Debug, Default)]
pub(crate) struct InsightTracker {
    by_kind: BTreeMap<InteractionKind, Vec<f64>>,
    errors: Vec<f64>,
    network_failures: Vec<f64>,
    navigations: Vec<f64>,
    insights: Insights,
}

impl InsightTracker {
    pub(crate) fn new(session: &RecordedSession) -> Self {
        let mut by_kind: BTreeMap<InteractionKind, Vec<f64>> = BTreeMap::new();
        for event in &session.interactions {
            by_kind
                .entry(event.kind)
                .or_default()
                .push(session.relative(event.timestamp));
        }
        let relative = |ts| session.relative(ts);
        let mut tracker = Self {
            by_kind,
            errors: session.errors.iter().map(|e| relative(e.timestamp)).collect(),
            network_failures: session
                .network
                .iter()
                .filter(|n| n.is_failure())
                .map(|n| relative(n.timestamp))
                .collect(),
            navigations: session.navigation.iter().map(|n| relative(n.timestamp)).collect(),
            insights: Insights {
                duration_ms: session.duration_ms(),
                ..Insights::default()
            },
        };
        // Session lists are sorted already; this only guards hand-built input.
        for times in tracker.by_kind.values_mut() {
            times.sort_by(f64::total_cmp);
        }
        tracker.errors.sort_by(f64::total_cmp);
        tracker.network_failures.sort_by(f64::total_cmp);
        tracker.navigations.sort_by(f64::total_cmp);
        tracker
    }

    pub(crate) fn update(&mut self, current_ms: f64) {
        let upto = |times: &[f64]| times.partition_point(|&t| t <= current_ms);

        let by_kind: BTreeMap<InteractionKind, usize> = self
            .by_kind
            .iter()
            .map(|(kind, times)| (*kind, upto(times)))
            .filter(|(_, n)| *n > 0)
            .collect();
        let interactions: usize = by_kind.values().sum();
        let errors = upto(&self.errors);

        let minutes = current_ms / 60_000.0;
        let (error_rate, density) = if minutes > 0.0 {
            (errors as f64 / minutes, interactions as f64 / minutes)
        } else {
            (0.0, 0.0)
        };
        let variety = by_kind.len() as f64 / InteractionKind::ALL.len() as f64;
        let engagement = 60.0 * (density / SATURATING_DENSITY).min(1.0) + 40.0 * variety;

        let insights = &mut self.insights;
        insights.current_ms = current_ms;
        insights.interactions = interactions;
        insights.interactions_by_kind = by_kind;
        insights.errors = errors;
        insights.network_failures = upto(&self.network_failures);
        insights.navigations = upto(&self.navigations);
        insights.error_rate = error_rate;
        insights.engagement_score = engagement.clamp(0.0, 100.0);
    }

    pub(crate) fn record_warnings(&mut self, count: usize) {
        self.insights.reconstruction_warnings += count;
    }

    pub(crate) fn set_complexity(&mut self, report: Option<ComplexityReport>) {
        self.insights.complexity = report;
    }

    pub(crate) fn insights(&self) -> &Insights {
        &self.insights
    }
}
