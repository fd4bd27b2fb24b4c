//! Loading recorded sessions from the event store export.
//!
//! The store hands over an ordered list of records, each tagged with a
//! `record` discriminator (`snapshot`, `interaction`, `error`, `network`,
//! `navigation`), an absolute `timestamp` and a `sessionId`. Input is not
//! trusted: records are sorted, de-duplicated by a stable key and
//! individually malformed events are skipped. A snapshot that cannot be
//! parsed, or a session without a leading full snapshot, rejects the load.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, Result};
use crate::events::{ErrorEvent, InteractionEvent, NavigationEvent, NetworkEvent};
use crate::json;
use crate::snapshot::{Snapshot, SnapshotKind};
use crate::time::Timestamp;

/// Counters describing what happened to the raw records during loading.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Records that were missing required fields or had an unknown type.
    pub skipped: usize,
    /// Records dropped because their stable key was already seen.
    pub duplicates: usize,
    /// Records belonging to a different session.
    pub foreign: usize,
}

/// A session ready for replay: every list sorted by timestamp, ids unique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedSession {
    pub session_id: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub snapshots: Vec<Snapshot>,
    pub interactions: Vec<InteractionEvent>,
    pub errors: Vec<ErrorEvent>,
    pub network: Vec<NetworkEvent>,
    pub navigation: Vec<NavigationEvent>,
    pub report: LoadReport,
}

impl RecordedSession {
    /// Start assembling a session programmatically.
    pub fn builder(session_id: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(session_id)
    }

    /// Replay length in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.end_time.since(self.start_time).max(0.0)
    }

    /// Convert an absolute timestamp to milliseconds since session start.
    pub fn relative(&self, timestamp: Timestamp) -> f64 {
        timestamp.since(self.start_time)
    }

    /// Convert milliseconds since session start to an absolute timestamp.
    pub fn absolute(&self, offset_ms: f64) -> Timestamp {
        self.start_time.offset_by(offset_ms)
    }

    /// Timestamp of any event (interaction, error, network, navigation) by id.
    pub fn event_timestamp(&self, id: &str) -> Option<Timestamp> {
        self.interactions
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.timestamp)
            .or_else(|| self.errors.iter().find(|e| e.id == id).map(|e| e.timestamp))
            .or_else(|| self.network.iter().find(|e| e.id == id).map(|e| e.timestamp))
            .or_else(|| {
                self.navigation
                    .iter()
                    .find(|e| e.id == id)
                    .map(|e| e.timestamp)
            })
    }

    /// Total number of non-snapshot events.
    pub fn event_count(&self) -> usize {
        self.interactions.len() + self.errors.len() + self.network.len() + self.navigation.len()
    }
}

/// Collects records and normalizes them into a [`RecordedSession`].
#[derive(Debug, Default)]
pub struct SessionBuilder {
    session_id: String,
    snapshots: Vec<Snapshot>,
    interactions: Vec<InteractionEvent>,
    errors: Vec<ErrorEvent>,
    network: Vec<NetworkEvent>,
    navigation: Vec<NavigationEvent>,
    report: LoadReport,
}

impl SessionBuilder {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshots.push(snapshot);
        self
    }

    pub fn interaction(mut self, event: InteractionEvent) -> Self {
        self.interactions.push(event);
        self
    }

    pub fn error(mut self, event: ErrorEvent) -> Self {
        self.errors.push(event);
        self
    }

    pub fn network(mut self, event: NetworkEvent) -> Self {
        self.network.push(event);
        self
    }

    pub fn navigation(mut self, event: NavigationEvent) -> Self {
        self.navigation.push(event);
        self
    }

    /// Sort, de-duplicate and validate.
    pub fn build(mut self) -> Result<RecordedSession> {
        // Stable sorts keep arrival order among equal timestamps, so the
        // first-arrived duplicate is the one that survives.
        self.snapshots
            .sort_by_key(|s| (s.timestamp, snapshot_rank(s.kind)));
        self.interactions.sort_by_key(|e| e.timestamp);
        self.errors.sort_by_key(|e| e.timestamp);
        self.network.sort_by_key(|e| e.timestamp);
        self.navigation.sort_by_key(|e| e.timestamp);

        let mut duplicates = 0;
        duplicates += dedup_snapshots(&mut self.snapshots);
        duplicates += dedup_by_key(&mut self.interactions, |e| e.id.clone());
        duplicates += dedup_by_key(&mut self.errors, |e| e.id.clone());
        duplicates += dedup_by_key(&mut self.network, |e| e.id.clone());
        duplicates += dedup_by_key(&mut self.navigation, |e| e.id.clone());
        if duplicates > 0 {
            tracing::debug!(duplicates, "dropped duplicate session records");
        }
        self.report.duplicates += duplicates;

        match self.snapshots.first() {
            Some(first) if first.is_full() => {}
            Some(first) => {
                tracing::warn!(
                    kind = ?first.kind,
                    timestamp = %first.timestamp,
                    "session does not start with a full snapshot"
                );
                return Err(ModelError::MissingBaseSnapshot);
            }
            None => return Err(ModelError::MissingBaseSnapshot),
        }

        let stamps = self
            .snapshots
            .iter()
            .map(|s| s.timestamp)
            .chain(self.interactions.iter().map(|e| e.timestamp))
            .chain(self.errors.iter().map(|e| e.timestamp))
            .chain(self.network.iter().map(|e| e.timestamp))
            .chain(self.navigation.iter().map(|e| e.timestamp));
        let (start_time, end_time) = stamps.fold((None, None), |(lo, hi), t| {
            (
                Some(lo.map_or(t, |lo: Timestamp| lo.min(t))),
                Some(hi.map_or(t, |hi: Timestamp| hi.max(t))),
            )
        });

        Ok(RecordedSession {
            session_id: self.session_id,
            start_time: start_time.unwrap_or_default(),
            end_time: end_time.unwrap_or_default(),
            snapshots: self.snapshots,
            interactions: self.interactions,
            errors: self.errors,
            network: self.network,
            navigation: self.navigation,
            report: self.report,
        })
    }
}

fn snapshot_rank(kind: SnapshotKind) -> u8 {
    match kind {
        SnapshotKind::Full => 0,
        SnapshotKind::Incremental => 1,
        SnapshotKind::Meta => 2,
    }
}

/// Drop snapshots equal to an earlier one at the same timestamp.
///
/// Distinct batches recorded in the same millisecond are all kept.
fn dedup_snapshots(snapshots: &mut Vec<Snapshot>) -> usize {
    let before = snapshots.len();
    let mut kept: Vec<Snapshot> = Vec::with_capacity(before);
    for snapshot in snapshots.drain(..) {
        let duplicate = kept
            .iter()
            .rev()
            .take_while(|k| k.timestamp == snapshot.timestamp)
            .any(|k| *k == snapshot);
        if !duplicate {
            kept.push(snapshot);
        }
    }
    *snapshots = kept;
    before - snapshots.len()
}

/// Keep the first element for every key; returns how many were removed.
fn dedup_by_key<T, K, F>(items: &mut Vec<T>, key: F) -> usize
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let before = items.len();
    let mut seen = FxHashSet::default();
    items.retain(|item| seen.insert(key(item)));
    before - items.len()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SessionFile {
    Envelope {
        #[serde(rename = "sessionId", default)]
        session_id: Option<String>,
        events: Vec<Value>,
    },
    Records(Vec<Value>),
}

/// Parse an event store export into a replayable session.
///
/// Accepts either `{"sessionId": "...", "events": [...]}` or a bare array
/// of records. Without an envelope id, the first record's `sessionId`
/// defines the session.
pub fn parse_session(raw: &[u8]) -> Result<RecordedSession> {
    let file: SessionFile = json::from_slice(raw)?;
    let (declared, records) = match file {
        SessionFile::Envelope { session_id, events } => (session_id, events),
        SessionFile::Records(records) => (None, records),
    };

    let session_id = declared
        .or_else(|| {
            records
                .iter()
                .find_map(|r| r.get("sessionId").and_then(Value::as_str))
                .map(str::to_string)
        })
        .unwrap_or_default();

    let mut builder = SessionBuilder::new(session_id.clone());

    for record in records {
        if let Some(owner) = record.get("sessionId").and_then(Value::as_str) {
            if owner != session_id {
                builder.report.foreign += 1;
                continue;
            }
        }

        let kind = record
            .get("record")
            .and_then(Value::as_str)
            .map(str::to_string);
        match kind.as_deref() {
            Some("snapshot") => {
                let snapshot = Snapshot::from_value(record)?;
                builder.snapshots.push(snapshot);
            }
            Some("interaction") => push_event(&mut builder.interactions, &mut builder.report, record),
            Some("error") => push_event(&mut builder.errors, &mut builder.report, record),
            Some("network") => push_event(&mut builder.network, &mut builder.report, record),
            Some("navigation") => push_event(&mut builder.navigation, &mut builder.report, record),
            other => {
                tracing::warn!(record = ?other, "skipping record of unknown type");
                builder.report.skipped += 1;
            }
        }
    }

    if builder.report.foreign > 0 {
        tracing::warn!(
            foreign = builder.report.foreign,
            session = %session_id,
            "dropped records from other sessions"
        );
    }

    builder.build()
}

fn push_event<T>(into: &mut Vec<T>, report: &mut LoadReport, record: Value)
where
    T: for<'de> Deserialize<'de>,
{
    match json::from_value::<T>(record) {
        Ok(event) => into.push(event),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed session event");
            report.skipped += 1;
        }
    }
}
