//! Subcommand implementations

use anyhow::{Context, Result};
use rewind_core::{
    parse_session, InteractionKind, LoadReport, NodeId, NodeKind, RecordedSession, SerializedNode,
    SnapshotKind,
};
use rewind_replay::{
    CorrelationEngine, EngineStats, Insights, LiveTree, OffloadTask, Offloader, PlaybackScheduler,
    PlaybackSignal, PlaybackState, ReconstructionEngine, TaskOutput,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::RewindConfig;

/// Read and parse a session export.
pub fn load_session(path: &Path) -> Result<RecordedSession> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let session = parse_session(&raw)
        .with_context(|| format!("Failed to load session from {}", path.display()))?;
    tracing::info!(
        session = %session.session_id,
        snapshots = session.snapshots.len(),
        events = session.event_count(),
        "loaded session"
    );
    Ok(session)
}

fn print_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}

// ============================================================================
// inspect
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub duration_ms: f64,
    pub full_snapshots: usize,
    pub incremental_snapshots: usize,
    pub meta_snapshots: usize,
    pub mutations: usize,
    pub base_nodes: usize,
    pub interactions: BTreeMap<InteractionKind, usize>,
    pub errors: usize,
    pub network_requests: usize,
    pub network_failures: usize,
    pub navigations: usize,
    pub report: LoadReport,
}

impl SessionSummary {
    pub fn new(session: &RecordedSession) -> Self {
        let count = |kind| session.snapshots.iter().filter(|s| s.kind == kind).count();
        let mut interactions = BTreeMap::new();
        for event in &session.interactions {
            *interactions.entry(event.kind).or_default() += 1;
        }
        Self {
            session_id: session.session_id.clone(),
            duration_ms: session.duration_ms(),
            full_snapshots: count(SnapshotKind::Full),
            incremental_snapshots: count(SnapshotKind::Incremental),
            meta_snapshots: count(SnapshotKind::Meta),
            mutations: session.snapshots.iter().map(|s| s.mutations.len()).sum(),
            base_nodes: session.snapshots.first().map_or(0, |s| s.node_count()),
            interactions,
            errors: session.errors.len(),
            network_requests: session.network.len(),
            network_failures: session.network.iter().filter(|n| n.is_failure()).count(),
            navigations: session.navigation.len(),
            report: session.report.clone(),
        }
    }
}

pub fn inspect(path: &Path, config: &RewindConfig) -> Result<()> {
    let session = load_session(path)?;
    print_json(&SessionSummary::new(&session), config.output.pretty)
}

// ============================================================================
// replay
// ============================================================================

#[derive(Debug, Default)]
pub struct ReplayOptions {
    pub speed: Option<f64>,
    /// Stop at this many ms since session start.
    pub until: Option<f64>,
    /// Tick length in real milliseconds.
    pub tick: Option<f64>,
    /// Print every signal as a JSON line.
    pub signals: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub session_id: String,
    pub state: PlaybackState,
    pub current_ms: f64,
    pub duration_ms: f64,
    pub speed: f64,
    pub ticks: u64,
    pub signals: BTreeMap<&'static str, usize>,
    pub engine: EngineStats,
    pub insights: Insights,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// Play the session headlessly with a deterministic tick loop.
pub fn run_replay(session: RecordedSession, config: &RewindConfig, options: &ReplayOptions) -> Result<ReplayReport> {
    let mut replay = config.replay.clone();
    if let Some(tick) = options.tick {
        anyhow::ensure!(
            tick.is_finite() && tick > 0.0,
            "--tick must be a positive number of milliseconds"
        );
        replay.playback.tick_interval_ms = tick;
    }
    let step = replay.playback.tick_interval_ms;

    let mut scheduler =
        PlaybackScheduler::new(session, replay).context("Failed to prepare session for playback")?;
    if let Some(speed) = options.speed {
        anyhow::ensure!(scheduler.set_speed(speed), "invalid playback speed {speed}");
    }
    let until = options
        .until
        .unwrap_or(f64::INFINITY)
        .clamp(0.0, scheduler.duration());

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut drain = |scheduler: &mut PlaybackScheduler| -> Result<()> {
        for signal in scheduler.take_signals() {
            *counts.entry(signal.name()).or_default() += 1;
            match &signal {
                PlaybackSignal::Fault(reason) => tracing::error!(%reason, "replay fault"),
                PlaybackSignal::Degraded { task, reason } => {
                    tracing::warn!(task, %reason, "background task degraded")
                }
                _ => {}
            }
            if options.signals {
                println!("{}", serde_json::to_string(&signal)?);
            }
        }
        Ok(())
    };

    let mut ticks = 0;
    scheduler.play();
    while scheduler.state() == PlaybackState::Playing && scheduler.current_time() < until {
        // Land exactly on `until` instead of overshooting it.
        let remaining = (until - scheduler.current_time()) / scheduler.speed();
        if remaining > step {
            scheduler.tick(step);
        } else {
            scheduler.tick(remaining);
            if scheduler.current_time() < until {
                scheduler.seek(until);
            }
        }
        ticks += 1;
        drain(&mut scheduler)?;
    }
    if scheduler.state() == PlaybackState::Playing {
        scheduler.pause();
    }

    // Let background analysis land so the report includes it.
    while scheduler.has_pending_task() {
        thread::sleep(Duration::from_millis(5));
        scheduler.tick(0.0);
    }
    drain(&mut scheduler)?;

    tracing::info!(
        ticks,
        position = scheduler.current_time(),
        state = %scheduler.state(),
        "replay finished"
    );

    Ok(ReplayReport {
        session_id: scheduler.session().session_id.clone(),
        state: scheduler.state(),
        current_ms: scheduler.current_time(),
        duration_ms: scheduler.duration(),
        speed: scheduler.speed(),
        ticks,
        signals: counts,
        engine: scheduler.engine_stats(),
        insights: scheduler.insights().clone(),
        fault: scheduler.fault().map(str::to_string),
    })
}

pub fn replay(path: &Path, config: &RewindConfig, options: &ReplayOptions) -> Result<()> {
    let session = load_session(path)?;
    let report = run_replay(session, config, options)?;
    print_json(&report, config.output.pretty)
}

// ============================================================================
// correlate
// ============================================================================

/// Correlate every error, describing interaction targets from the tree as it
/// was when each interaction happened.
pub fn correlation_engine(session: &RecordedSession, config: &RewindConfig) -> CorrelationEngine {
    let mut engine = CorrelationEngine::new(config.replay.correlation.clone());
    engine.extend(
        session.interactions.iter().cloned(),
        session.errors.iter().cloned(),
        session.network.iter().cloned(),
    );

    let mut trees = ReconstructionEngine::new(session.snapshots.clone());
    for interaction in session.interactions.iter().filter(|i| i.target_id.is_some()) {
        match trees.tree_at(interaction.timestamp) {
            Ok(tree) => engine.describe_targets(tree),
            Err(e) => {
                tracing::warn!(error = %e, "cannot describe interaction targets");
                break;
            }
        }
    }
    engine
}

pub fn correlate(path: &Path, config: &RewindConfig) -> Result<()> {
    let session = load_session(path)?;
    let engine = correlation_engine(&session, config);
    tracing::info!(errors = engine.correlate().len(), "correlated errors");
    print_json(engine.correlate(), config.output.pretty)
}

// ============================================================================
// tree
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum TreeFormat {
    /// Indented markup outline
    Outline,
    /// Serialized node forest
    Json,
}

pub fn tree(path: &Path, at: f64, format: TreeFormat, config: &RewindConfig) -> Result<()> {
    let session = load_session(path)?;
    match format {
        TreeFormat::Json => print_json(&export_tree(&session, at, config)?, config.output.pretty),
        TreeFormat::Outline => {
            let mut engine = ReconstructionEngine::new(session.snapshots.clone());
            let reconstruction = engine
                .reconstruct(session.absolute(at))
                .with_context(|| format!("Failed to reconstruct the tree at {at}ms"))?;
            let tree = engine
                .tree()
                .context("Reconstruction produced no tree")?;
            tracing::info!(
                nodes = tree.len(),
                applied = reconstruction.applied,
                skipped = reconstruction.skipped,
                "reconstructed tree"
            );
            print!("{}", outline(tree));
            Ok(())
        }
    }
}

/// Rebuild the serialized tree at `at` through the offload pipeline, so
/// large windows are reconstructed on the worker.
pub fn export_tree(
    session: &RecordedSession,
    at: f64,
    config: &RewindConfig,
) -> Result<Vec<SerializedNode>> {
    let engine = ReconstructionEngine::new(session.snapshots.clone());
    let until = session.absolute(at);
    let (base, mutations) = engine
        .window_for(until)
        .with_context(|| format!("Failed to reconstruct the tree at {at}ms"))?;
    let task = OffloadTask::ReconstructBulk {
        base: base.clone(),
        mutations,
        until,
    };

    let offloader = Offloader::new(config.replay.offload.clone());
    let output = offloader.process(task, |p| {
        tracing::debug!(phase = p.phase, percent = p.percent, "reconstruct progress")
    })?;
    let TaskOutput::Reconstructed {
        nodes,
        node_count,
        warnings,
    } = output
    else {
        anyhow::bail!("bulk reconstruction returned an unexpected result");
    };
    tracing::info!(nodes = node_count, skipped = warnings, "reconstructed tree");
    Ok(nodes)
}

/// Render the tree as indented markup.
pub fn outline(tree: &LiveTree) -> String {
    let mut out = String::new();
    if let Some(viewport) = tree.viewport() {
        let _ = writeln!(out, "# viewport {}x{}", viewport.width, viewport.height);
    }
    if let Some(scroll) = tree.scroll() {
        let _ = writeln!(out, "# scroll {},{}", scroll.x, scroll.y);
    }
    let mut stack: Vec<(NodeId, usize)> = tree.roots().iter().rev().map(|&id| (id, 0)).collect();
    while let Some((id, depth)) = stack.pop() {
        let Some(node) = tree.get(id) else { continue };
        let indent = "  ".repeat(depth);
        let text = node.text.as_deref().unwrap_or_default();
        let _ = match node.kind {
            NodeKind::Document => writeln!(out, "{indent}#document"),
            NodeKind::Text => writeln!(out, "{indent}{text:?}"),
            NodeKind::Comment => writeln!(out, "{indent}<!--{text}-->"),
            NodeKind::Element => {
                let tag = node.tag_name.as_deref().unwrap_or("?");
                let mut line = format!("{indent}<{tag}");
                for (name, value) in &node.attributes {
                    let _ = write!(line, " {name}={value:?}");
                }
                writeln!(out, "{line}> [{id}]")
            }
        };
        stack.extend(node.children.iter().rev().map(|&child| (child, depth + 1)));
    }
    out
}

// ============================================================================
// minify
// ============================================================================

pub fn minify(path: &Path, config: &RewindConfig) -> Result<()> {
    let css = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let offloader = Offloader::new(config.replay.offload.clone());
    let output = offloader.process(OffloadTask::CompressStylesheets { sheets: vec![css] }, |p| {
        tracing::debug!(phase = p.phase, percent = p.percent, "minify progress")
    })?;

    let TaskOutput::Stylesheets {
        sheets,
        bytes_before,
        bytes_after,
    } = output
    else {
        anyhow::bail!("stylesheet compression returned an unexpected result");
    };
    tracing::info!(bytes_before, bytes_after, "compressed stylesheet");
    for sheet in sheets {
        println!("{sheet}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rewind_core::{
        count_nodes, ErrorEvent, InteractionEvent, Mutation, NetworkEvent, SerializedNode, Snapshot,
        Timestamp,
    };

    fn session() -> RecordedSession {
        RecordedSession::builder("cli")
            .snapshot(
                Snapshot::full(
                    0.0,
                    vec![SerializedNode::element(1, "body")
                        .with_child(
                            SerializedNode::element(2, "button")
                                .with_attribute("id", "pay")
                                .with_child(SerializedNode::text(3, "Pay")),
                        )],
                )
                .with_viewport(800.0, 600.0),
            )
            .snapshot(Snapshot::incremental(
                3_000.0,
                vec![Mutation::RemoveChildren {
                    target: NodeId(1),
                    timestamp: Timestamp::from_millis(3_000.0),
                    ids: vec![NodeId(2)],
                }],
            ))
            .snapshot(Snapshot::meta(4_000.0))
            .interaction(InteractionEvent::new("c1", InteractionKind::Click, 1_000.0).with_target(NodeId(2)))
            .network(NetworkEvent::new("n1", "/api/pay", 1_100.0).with_status(500))
            .error(ErrorEvent::new("e1", "TypeError: Cannot read properties of undefined", 1_200.0))
            .build()
            .unwrap()
    }

    #[test]
    fn summary_counts_records() {
        let summary = SessionSummary::new(&session());
        assert_eq!(summary.full_snapshots, 1);
        assert_eq!(summary.incremental_snapshots, 1);
        assert_eq!(summary.meta_snapshots, 1);
        assert_eq!(summary.mutations, 1);
        assert_eq!(summary.base_nodes, 3);
        assert_eq!(summary.interactions.get(&InteractionKind::Click), Some(&1));
        assert_eq!(summary.network_failures, 1);
        assert_eq!(summary.duration_ms, 4_000.0);
    }

    #[test]
    fn replay_stops_exactly_at_until() {
        let mut config = RewindConfig::default();
        config.replay.offload.use_worker = false;
        let options = ReplayOptions {
            speed: Some(2.0),
            until: Some(1_000.0),
            tick: Some(16.0),
            signals: false,
        };
        let report = run_replay(session(), &config, &options).unwrap();
        assert_eq!(report.current_ms, 1_000.0);
        assert_eq!(report.state, PlaybackState::Paused);
        assert_eq!(report.insights.interactions, 1);
        assert!(report.signals.contains_key("stateChanged"));
    }

    #[test]
    fn replay_to_end_finishes() {
        let mut config = RewindConfig::default();
        config.replay.offload.use_worker = false;
        let report = run_replay(session(), &config, &ReplayOptions::default()).unwrap();
        assert_eq!(report.current_ms, 4_000.0);
        assert_eq!(report.state, PlaybackState::Paused);
        assert_eq!(report.signals.get("finished"), Some(&1));
        assert_eq!(report.insights.errors, 1);
    }

    #[test]
    fn replay_rejects_bad_tick() {
        let options = ReplayOptions {
            tick: Some(0.0),
            ..ReplayOptions::default()
        };
        assert!(run_replay(session(), &RewindConfig::default(), &options).is_err());
    }

    #[test]
    fn correlation_describes_targets_as_they_were() {
        let engine = correlation_engine(&session(), &RewindConfig::default());
        let correlation = engine.get("e1").unwrap();
        assert_eq!(correlation.primary(), Some("c1"));
        assert_eq!(correlation.user_path, vec!["button#pay".to_string()]);
        assert_eq!(correlation.failed_requests, vec!["n1".to_string()]);
    }

    #[test]
    fn exported_tree_reflects_removals() {
        let config = RewindConfig::default();
        let before = export_tree(&session(), 2_000.0, &config).unwrap();
        assert_eq!(count_nodes(&before), 3);

        let after = export_tree(&session(), 3_500.0, &config).unwrap();
        assert_eq!(after, vec![SerializedNode::element(1, "body")]);
    }

    #[test]
    fn outline_renders_markup() {
        let tree = LiveTree::from_nodes(&session().snapshots[0].nodes).unwrap();
        assert_eq!(
            outline(&tree),
            "<body> [1]\n  <button id=\"pay\"> [2]\n    \"Pay\"\n"
        );
    }
}
