//! End-to-end replay behavior: reconstruction determinism, transport
//! scenarios and error correlation through the public API.

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::sample::Index;
use rewind_core::{
    ErrorEvent, InteractionEvent, InteractionKind, Mutation, NodeId, RecordedSession,
    SerializedNode, Snapshot, Timestamp,
};
use rewind_replay::{
    reconstruct, CorrelationEngine, LiveTree, PlaybackScheduler, PlaybackSignal, PlaybackState,
    ReconstructionEngine, ReplayConfig,
};

fn ts(ms: f64) -> Timestamp {
    Timestamp::from_millis(ms)
}

// ---------------------------------------------------------------------------
// Generated mutation streams
// ---------------------------------------------------------------------------

/// Abstract edit, resolved against the live ids when the stream is built.
#[derive(Clone, Debug)]
enum Op {
    Text(Index, String),
    Attribute(Index, &'static str, Option<String>),
    Style(Index, &'static str, Option<String>),
    Add(Index, usize),
    Remove(Index),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let name = prop_oneof![Just("class"), Just("title"), Just("data-x")];
    let property = prop_oneof![Just("color"), Just("display")];
    prop_oneof![
        (any::<Index>(), "[a-z ]{0,8}").prop_map(|(i, s)| Op::Text(i, s)),
        (any::<Index>(), name, proptest::option::of("[a-z]{1,5}"))
            .prop_map(|(i, n, v)| Op::Attribute(i, n, v)),
        (any::<Index>(), property, proptest::option::of("[a-z]{1,5}"))
            .prop_map(|(i, p, v)| Op::Style(i, p, v)),
        (any::<Index>(), 1usize..4).prop_map(|(i, k)| Op::Add(i, k)),
        any::<Index>().prop_map(Op::Remove),
    ]
}

/// Mirror of the tree shape used to emit only valid mutations.
struct Model {
    parent: BTreeMap<u64, u64>,
    children: BTreeMap<u64, Vec<u64>>,
    next: u64,
}

impl Model {
    fn live(&self) -> Vec<u64> {
        std::iter::once(1).chain(self.parent.keys().copied()).collect()
    }

    fn remove(&mut self, id: u64) {
        if let Some(parent) = self.parent.remove(&id) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|&c| c != id);
            }
        }
        for child in self.children.remove(&id).unwrap_or_default() {
            self.remove(child);
        }
    }
}

#[derive(Debug)]
struct Stream {
    base: Snapshot,
    mutations: Vec<Mutation>,
    /// Node count after each mutation.
    counts: Vec<usize>,
}

impl Stream {
    fn snapshots(&self) -> Vec<Snapshot> {
        std::iter::once(self.base.clone())
            .chain(
                self.mutations
                    .iter()
                    .map(|m| Snapshot::incremental(m.timestamp(), vec![m.clone()])),
            )
            .collect()
    }

    fn expected_count(&self, at: f64) -> usize {
        let applied = self
            .mutations
            .iter()
            .take_while(|m| m.timestamp().as_millis() <= at)
            .count();
        match applied {
            0 => self.base.node_count(),
            n => self.counts[n - 1],
        }
    }

    fn end(&self) -> f64 {
        (self.mutations.len() as f64 + 1.0) * 10.0
    }
}

fn build_stream(initial: u64, ops: &[Op]) -> Stream {
    let mut root = SerializedNode::element(1, "main");
    let mut model = Model {
        parent: BTreeMap::new(),
        children: BTreeMap::new(),
        next: initial + 1,
    };
    for id in 2..=initial {
        root = root.with_child(SerializedNode::element(id, "div"));
        model.parent.insert(id, 1);
        model.children.entry(1).or_default().push(id);
    }

    let mut mutations = Vec::new();
    let mut counts = Vec::new();
    for op in ops {
        let live = model.live();
        let timestamp = ts((mutations.len() as f64 + 1.0) * 10.0);
        let mutation = match op {
            Op::Text(i, text) => Mutation::SetText {
                target: NodeId(*i.get(&live)),
                timestamp,
                text: text.clone(),
            },
            Op::Attribute(i, name, value) => Mutation::SetAttribute {
                target: NodeId(*i.get(&live)),
                timestamp,
                name: name.to_string(),
                value: value.clone(),
            },
            Op::Style(i, property, value) => Mutation::SetStyle {
                target: NodeId(*i.get(&live)),
                timestamp,
                property: property.to_string(),
                value: value.clone(),
            },
            Op::Add(i, k) => {
                let target = *i.get(&live);
                let nodes: Vec<SerializedNode> = (0..*k)
                    .map(|_| {
                        let id = model.next;
                        model.next += 1;
                        model.parent.insert(id, target);
                        model.children.entry(target).or_default().push(id);
                        SerializedNode::element(id, "span")
                    })
                    .collect();
                Mutation::AddChildren {
                    target: NodeId(target),
                    timestamp,
                    nodes,
                    index: None,
                }
            }
            Op::Remove(i) => {
                let candidates: Vec<u64> = model.parent.keys().copied().collect();
                if candidates.is_empty() {
                    continue;
                }
                let id = *i.get(&candidates);
                let parent = model.parent[&id];
                model.remove(id);
                Mutation::RemoveChildren {
                    target: NodeId(parent),
                    timestamp,
                    ids: vec![NodeId(id)],
                }
            }
        };
        mutations.push(mutation);
        counts.push(model.live().len());
    }

    Stream {
        base: Snapshot::full(0.0, vec![root]).with_viewport(1024.0, 768.0),
        mutations,
        counts,
    }
}

fn stream_strategy() -> impl Strategy<Value = Stream> {
    (1u64..8, prop::collection::vec(op_strategy(), 0..40))
        .prop_map(|(initial, ops)| build_stream(initial, &ops))
}

fn tree_at(engine: &mut ReconstructionEngine, at: f64) -> LiveTree {
    engine.tree_at(ts(at)).expect("stream has a base").clone()
}

proptest! {
    #[test]
    fn incremental_matches_direct(stream in stream_strategy(), a in 0.0f64..1.0, b in 0.0f64..1.0) {
        let (t1, t2) = if a <= b { (a, b) } else { (b, a) };
        let (t1, t2) = (t1 * stream.end(), t2 * stream.end());

        let mut stepped = ReconstructionEngine::new(stream.snapshots());
        tree_at(&mut stepped, t1);
        let incremental = tree_at(&mut stepped, t2);

        let mut direct = ReconstructionEngine::new(stream.snapshots());
        prop_assert_eq!(incremental, tree_at(&mut direct, t2));
        prop_assert!(stepped.warnings().is_empty());
    }

    #[test]
    fn node_count_tracks_net_changes(stream in stream_strategy(), at in 0.0f64..1.0) {
        let at = at * stream.end();
        let mut engine = ReconstructionEngine::new(stream.snapshots());
        prop_assert_eq!(tree_at(&mut engine, at).len(), stream.expected_count(at));
    }

    #[test]
    fn backward_then_forward_round_trips(stream in stream_strategy(), a in 0.0f64..1.0, b in 0.0f64..1.0) {
        let (early, late) = if a <= b { (a, b) } else { (b, a) };
        let (early, late) = (early * stream.end(), late * stream.end());

        let mut engine = ReconstructionEngine::new(stream.snapshots());
        let original = tree_at(&mut engine, late);
        tree_at(&mut engine, early);
        prop_assert_eq!(tree_at(&mut engine, late), original);
    }

    #[test]
    fn detached_reconstruct_agrees_with_engine(stream in stream_strategy()) {
        let end = stream.end();
        let (tree, warnings) = reconstruct(&stream.base, &stream.mutations, ts(end)).unwrap();
        let mut engine = ReconstructionEngine::new(stream.snapshots());
        prop_assert!(warnings.is_empty());
        prop_assert_eq!(tree.to_serialized(), tree_at(&mut engine, end).to_serialized());
    }

    #[test]
    fn seek_always_lands_in_range(target in -50_000.0f64..50_000.0) {
        let mut scheduler = PlaybackScheduler::new(timed_session(10_000.0), ReplayConfig::testing()).unwrap();
        scheduler.seek(target);
        prop_assert!((0.0..=10_000.0).contains(&scheduler.current_time()));
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

fn timed_session(duration: f64) -> RecordedSession {
    RecordedSession::builder("timed")
        .snapshot(Snapshot::full(0.0, vec![SerializedNode::element(1, "body")]))
        .snapshot(Snapshot::meta(duration))
        .build()
        .unwrap()
}

#[test]
fn three_node_scenario() {
    let snapshots = vec![
        Snapshot::full(
            0.0,
            vec![SerializedNode::element(1, "div")
                .with_child(SerializedNode::text(2, "old"))
                .with_child(SerializedNode::element(3, "p"))],
        ),
        Snapshot::incremental(
            100.0,
            vec![Mutation::SetText {
                target: NodeId(2),
                timestamp: ts(100.0),
                text: "new".into(),
            }],
        ),
        Snapshot::incremental(
            200.0,
            vec![Mutation::RemoveChildren {
                target: NodeId(1),
                timestamp: ts(200.0),
                ids: vec![NodeId(3)],
            }],
        ),
    ];
    let mut engine = ReconstructionEngine::new(snapshots);

    let at_150 = tree_at(&mut engine, 150.0);
    let mut ids: Vec<u64> = [1, 2, 3].into_iter().filter(|&i| at_150.contains(NodeId(i))).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(at_150.text_content(NodeId(1)), "new");

    let at_250 = tree_at(&mut engine, 250.0);
    ids = [1, 2, 3].into_iter().filter(|&i| at_250.contains(NodeId(i))).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(at_250.len(), 2);
    assert_eq!(at_250.text_content(NodeId(1)), "new");
}

#[test]
fn double_speed_finishes_after_five_seconds() {
    let mut scheduler =
        PlaybackScheduler::new(timed_session(10_000.0), ReplayConfig::testing()).unwrap();
    scheduler.play();
    scheduler.set_speed(2.0);

    // 5 seconds of 16ms ticks.
    let mut elapsed = 0.0;
    while elapsed < 5_000.0 {
        scheduler.tick(16.0);
        elapsed += 16.0;
    }

    assert!((scheduler.current_time() - 10_000.0).abs() < 1.0);
    assert_eq!(scheduler.state(), PlaybackState::Paused);
}

#[test]
fn seek_past_end_while_playing_pauses() {
    let mut scheduler =
        PlaybackScheduler::new(timed_session(10_000.0), ReplayConfig::testing()).unwrap();
    scheduler.seek(-1.0);
    assert_eq!(scheduler.current_time(), 0.0);

    scheduler.play();
    scheduler.seek(12_345.0);
    assert_eq!(scheduler.current_time(), 10_000.0);
    assert_eq!(scheduler.state(), PlaybackState::Paused);

    // Restartable through stop then play.
    scheduler.stop();
    scheduler.play();
    scheduler.advance();
    assert_eq!(scheduler.state(), PlaybackState::Playing);
    assert_eq!(scheduler.current_time(), 16.0);
}

#[test]
fn speed_change_applies_from_next_tick() {
    let mut scheduler =
        PlaybackScheduler::new(timed_session(10_000.0), ReplayConfig::testing()).unwrap();
    scheduler.play();
    scheduler.tick(100.0);
    scheduler.set_speed(4.0);
    assert_eq!(scheduler.current_time(), 100.0);
    scheduler.tick(100.0);
    assert_eq!(scheduler.current_time(), 500.0);

    let signals = scheduler.take_signals();
    assert!(signals.contains(&PlaybackSignal::SpeedChanged(4.0)));
}

#[test]
fn click_before_error_is_primary_in_user_path() {
    let mut engine = CorrelationEngine::default();
    engine.add_interaction(
        InteractionEvent::new("earlier", InteractionKind::Input, 3_000.0).with_target(NodeId(4)),
    );
    engine.add_interaction(
        InteractionEvent::new("click", InteractionKind::Click, 4_800.0).with_target(NodeId(9)),
    );
    engine.add_error(ErrorEvent::new("boom", "Uncaught TypeError", 5_000.0).with_target_hint("9"));

    let correlation = &engine.correlate()[0];
    assert_eq!(correlation.error_id, "boom");
    assert_eq!(correlation.primary(), Some("click"));
    assert_eq!(correlation.user_path[0], "#node-9");
    assert_eq!(correlation.user_path.len(), 2);
}

#[test]
fn unknown_target_does_not_halt_playback() {
    let session = RecordedSession::builder("lossy")
        .snapshot(Snapshot::full(0.0, vec![SerializedNode::element(1, "body")]))
        .snapshot(Snapshot::incremental(
            50.0,
            vec![Mutation::SetText {
                target: NodeId(404),
                timestamp: ts(50.0),
                text: "lost".into(),
            }],
        ))
        .snapshot(Snapshot::meta(1_000.0))
        .build()
        .unwrap();
    let mut scheduler = PlaybackScheduler::new(session, ReplayConfig::testing()).unwrap();
    scheduler.play();
    for _ in 0..10 {
        scheduler.advance();
    }

    assert_eq!(scheduler.state(), PlaybackState::Playing);
    assert_eq!(scheduler.insights().reconstruction_warnings, 1);
    assert!(scheduler
        .take_signals()
        .iter()
        .any(|s| matches!(s, PlaybackSignal::ReconstructionWarning(w) if w.target == NodeId(404))));
}
