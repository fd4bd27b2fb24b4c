//! Error correlation.
//!
//! Links each recorded error to the interactions that preceded it inside a
//! lookback window and derives a root-cause hint from a table of message
//! rules. Correlations are derived state: they are recomputed whenever an
//! event is registered and never persisted.

use regex::Regex;
use rewind_core::{ErrorEvent, InteractionEvent, InteractionKind, NetworkEvent, NodeId, Severity, Timestamp};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::config::CorrelationConfig;
use crate::tree::LiveTree;

/// Root cause reported when no rule matches.
pub const UNKNOWN_CAUSE: &str = "unknown";

/// Messages repeated this many times escalate to [`Severity::High`].
const REPEAT_ESCALATION: usize = 3;

/// An error and the user activity that likely led to it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    pub error_id: String,
    pub timestamp: Timestamp,
    pub severity: Severity,
    pub root_cause: String,
    /// Target descriptors, primary cause first, then most recent first.
    pub user_path: Vec<String>,
    /// Interaction ids in the same order as `user_path`.
    pub interactions: Vec<String>,
    /// Failed requests inside the lookback window.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_requests: Vec<String>,
    pub suggestions: Vec<String>,
}

impl Correlation {
    /// Id of the interaction chosen as primary cause.
    pub fn primary(&self) -> Option<&str> {
        self.interactions.first().map(String::as_str)
    }
}

/// One row of the root-cause table.
struct CauseRule {
    name: &'static str,
    /// Matched against the error message and stack.
    pattern: Option<Regex>,
    /// Required type of the primary interaction.
    after: Option<InteractionKind>,
    requires_failed_request: bool,
    cause: &'static str,
    suggestions: &'static [&'static str],
}

impl CauseRule {
    fn try_new(name: &'static str, pattern: Option<&str>, cause: &'static str) -> Option<Self> {
        let pattern = match pattern {
            Some(p) => match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(rule = name, error = %e, "dropping correlation rule");
                    return None;
                }
            },
            None => None,
        };
        Some(Self {
            name,
            pattern,
            after: None,
            requires_failed_request: false,
            cause,
            suggestions: &[],
        })
    }

    fn after(mut self, kind: InteractionKind) -> Self {
        self.after = Some(kind);
        self
    }

    fn with_failed_request(mut self) -> Self {
        self.requires_failed_request = true;
        self
    }

    fn suggest(mut self, suggestions: &'static [&'static str]) -> Self {
        self.suggestions = suggestions;
        self
    }

    fn matches(&self, text: &str, primary: Option<InteractionKind>, failed_requests: usize) -> bool {
        if self.requires_failed_request && failed_requests == 0 {
            return false;
        }
        if let Some(kind) = self.after {
            if primary != Some(kind) {
                return false;
            }
        }
        self.pattern.as_ref().map_or(true, |re| re.is_match(text))
    }
}

const NULL_ACCESS: &str = r"(?i)cannot read propert(y|ies) of (null|undefined)|cannot set propert(y|ies) of (null|undefined)|undefined is not an object|null is not an object|is (null|undefined)\b";

fn builtin_rules() -> Vec<CauseRule> {
    [
        CauseRule::try_new(
            "null-access-after-input",
            Some(NULL_ACCESS),
            "missing validation before property access",
        )
        .map(|r| {
            r.after(InteractionKind::Input).suggest(&[
                "Validate the field value before reading its properties",
                "Guard optional form state with a null check",
            ])
        }),
        CauseRule::try_new(
            "null-access-after-click",
            Some(NULL_ACCESS),
            "click handler accessed state that was not ready",
        )
        .map(|r| {
            r.after(InteractionKind::Click).suggest(&[
                "Disable the control until its data has loaded",
                "Check that the handler's target element still exists",
            ])
        }),
        CauseRule::try_new(
            "null-access",
            Some(NULL_ACCESS),
            "null or undefined value dereferenced",
        )
        .map(|r| r.suggest(&["Add a null check before the failing access"])),
        CauseRule::try_new(
            "not-a-function",
            Some(r"(?i)is not a function|is not a constructor"),
            "called a value that is not a function",
        )
        .map(|r| {
            r.suggest(&[
                "Check the shape of the object returned by the preceding call",
                "Look for a dependency version mismatch",
            ])
        }),
        CauseRule::try_new(
            "stale-chunk",
            Some(r"(?i)loading (css )?chunk \S+ failed|failed to fetch dynamically imported module|importing a module script failed"),
            "application bundle changed while the page was open",
        )
        .map(|r| {
            r.suggest(&[
                "Reload the page when a chunk fails to load",
                "Keep previous build assets available after a deploy",
            ])
        }),
        CauseRule::try_new(
            "json-parse",
            Some(r"(?i)unexpected token .* in json|unexpected end of json|json\.parse|is not valid json"),
            "response body was not valid JSON",
        )
        .map(|r| {
            r.suggest(&[
                "Check the response status before parsing the body",
                "Verify the endpoint returns JSON for error responses",
            ])
        }),
        CauseRule::try_new(
            "network-message",
            Some(r"(?i)failed to fetch|networkerror|network request failed|load failed|net::err_|status code [45]\d\d"),
            "network request failed",
        )
        .map(|r| {
            r.suggest(&[
                "Handle request failures with a retry or an error state",
                "Check connectivity and CORS configuration for the endpoint",
            ])
        }),
        CauseRule::try_new("recursion", Some(r"(?i)maximum call stack size exceeded|too much recursion"), "unbounded recursion")
            .map(|r| r.suggest(&["Look for a render or event loop that re-triggers itself"])),
        CauseRule::try_new(
            "permission",
            Some(r"(?i)permission denied|notallowederror|securityerror|not allowed by the user agent|blocked by cors"),
            "browser refused a permission or security-sensitive operation",
        )
        .map(|r| {
            r.suggest(&[
                "Request the permission from a user gesture",
                "Handle the denied case explicitly",
            ])
        }),
        CauseRule::try_new("failed-request-in-window", None, "preceded by a failed network request")
            .map(|r| {
                r.with_failed_request()
                    .suggest(&["Inspect the failed request before the error"])
            }),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Event class; ids are only unique within one class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum EventClass {
    Interaction,
    Error,
    Network,
}

/// Registers errors, interactions and network events and keeps the
/// correlation list current.
pub struct CorrelationEngine {
    config: CorrelationConfig,
    rules: Vec<CauseRule>,
    /// Sorted by timestamp.
    interactions: Vec<InteractionEvent>,
    /// Sorted by timestamp.
    errors: Vec<ErrorEvent>,
    /// Sorted by timestamp.
    network: Vec<NetworkEvent>,
    seen: FxHashSet<(EventClass, String)>,
    descriptors: FxHashMap<NodeId, String>,
    correlations: Vec<Correlation>,
}

impl std::fmt::Debug for CorrelationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationEngine")
            .field("rules", &self.rules.iter().map(|r| r.name).collect::<Vec<_>>())
            .field("interactions", &self.interactions.len())
            .field("errors", &self.errors.len())
            .field("network", &self.network.len())
            .field("correlations", &self.correlations.len())
            .finish()
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(CorrelationConfig::default())
    }
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            rules: builtin_rules(),
            interactions: Vec::new(),
            errors: Vec::new(),
            network: Vec::new(),
            seen: FxHashSet::default(),
            descriptors: FxHashMap::default(),
            correlations: Vec::new(),
        }
    }

    /// Register an error. Returns `false` if its id was already registered.
    pub fn add_error(&mut self, error: ErrorEvent) -> bool {
        if !self.seen.insert((EventClass::Error, error.id.clone())) {
            return false;
        }
        insert_sorted(&mut self.errors, error, |e| e.timestamp);
        self.recompute();
        true
    }

    /// Register an interaction. Returns `false` if its id was already registered.
    pub fn add_interaction(&mut self, interaction: InteractionEvent) -> bool {
        if !self.seen.insert((EventClass::Interaction, interaction.id.clone())) {
            return false;
        }
        insert_sorted(&mut self.interactions, interaction, |i| i.timestamp);
        self.recompute();
        true
    }

    /// Register a network request. Returns `false` if its id was already registered.
    pub fn add_network(&mut self, request: NetworkEvent) -> bool {
        if !self.seen.insert((EventClass::Network, request.id.clone())) {
            return false;
        }
        insert_sorted(&mut self.network, request, |n| n.timestamp);
        self.recompute();
        true
    }

    /// Register many events and recompute once.
    pub fn extend(
        &mut self,
        interactions: impl IntoIterator<Item = InteractionEvent>,
        errors: impl IntoIterator<Item = ErrorEvent>,
        network: impl IntoIterator<Item = NetworkEvent>,
    ) {
        for i in interactions {
            if self.seen.insert((EventClass::Interaction, i.id.clone())) {
                self.interactions.push(i);
            }
        }
        for e in errors {
            if self.seen.insert((EventClass::Error, e.id.clone())) {
                self.errors.push(e);
            }
        }
        for n in network {
            if self.seen.insert((EventClass::Network, n.id.clone())) {
                self.network.push(n);
            }
        }
        self.interactions.sort_by_key(|i| i.timestamp);
        self.errors.sort_by_key(|e| e.timestamp);
        self.network.sort_by_key(|n| n.timestamp);
        self.recompute();
    }

    /// Use the live tree to describe interaction targets that carry no selector.
    pub fn describe_targets(&mut self, tree: &LiveTree) {
        let mut changed = false;
        for id in self.interactions.iter().filter_map(|i| i.target_id) {
            if self.descriptors.contains_key(&id) {
                continue;
            }
            if let Some(descriptor) = tree.describe(id) {
                self.descriptors.insert(id, descriptor);
                changed = true;
            }
        }
        if changed {
            self.recompute();
        }
    }

    /// Current correlations, one per registered error, in error time order.
    pub fn correlate(&self) -> &[Correlation] {
        &self.correlations
    }

    /// Correlation for one error.
    pub fn get(&self, error_id: &str) -> Option<&Correlation> {
        self.correlations.iter().find(|c| c.error_id == error_id)
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    fn recompute(&mut self) {
        let mut repeats: FxHashMap<&str, usize> = FxHashMap::default();
        for error in &self.errors {
            *repeats.entry(error.message.as_str()).or_default() += 1;
        }

        let correlations: Vec<Correlation> = self
            .errors
            .iter()
            .map(|error| self.correlate_one(error, repeats.get(error.message.as_str()).copied().unwrap_or(1)))
            .collect();

        tracing::trace!(count = correlations.len(), "recomputed correlations");
        self.correlations = correlations;
    }

    fn correlate_one(&self, error: &ErrorEvent, repeats: usize) -> Correlation {
        let from = error.timestamp.offset_by(-self.config.lookback_ms);
        let window = in_window(&self.interactions, from, error.timestamp, |i| i.timestamp);

        // Most recent first.
        let mut ordered: Vec<&InteractionEvent> = window.iter().rev().collect();
        if let Some(hint) = error.target_hint.as_deref() {
            if let Some(pos) = ordered.iter().position(|i| self.matches_hint(i, hint)) {
                let primary = ordered.remove(pos);
                ordered.insert(0, primary);
            }
        }
        ordered.truncate(self.config.max_path_len);

        let failed_requests: Vec<String> = in_window(&self.network, from, error.timestamp, |n| n.timestamp)
            .iter()
            .filter(|n| n.is_failure())
            .map(|n| n.id.clone())
            .collect();

        let text = match &error.stack {
            Some(stack) => format!("{}\n{}", error.message, stack),
            None => error.message.clone(),
        };
        let primary_kind = ordered.first().map(|i| i.kind);
        let rule = self
            .rules
            .iter()
            .find(|r| r.matches(&text, primary_kind, failed_requests.len()));

        let (root_cause, suggestions) = match rule {
            Some(rule) => {
                tracing::debug!(error = %error.id, rule = rule.name, "matched root-cause rule");
                (
                    rule.cause.to_string(),
                    rule.suggestions.iter().map(|s| s.to_string()).collect(),
                )
            }
            None => (UNKNOWN_CAUSE.to_string(), Vec::new()),
        };

        let mut severity = error.severity.unwrap_or(self.config.default_severity);
        if repeats >= REPEAT_ESCALATION {
            severity = severity.max(Severity::High);
        }

        Correlation {
            error_id: error.id.clone(),
            timestamp: error.timestamp,
            severity,
            root_cause,
            user_path: ordered.iter().map(|i| self.descriptor(i)).collect(),
            interactions: ordered.iter().map(|i| i.id.clone()).collect(),
            failed_requests,
            suggestions,
        }
    }

    fn descriptor(&self, interaction: &InteractionEvent) -> String {
        if let Some(selector) = interaction.selector() {
            return selector.to_string();
        }
        match interaction.target_id {
            Some(id) => self
                .descriptors
                .get(&id)
                .cloned()
                .unwrap_or_else(|| format!("#node-{id}")),
            None => interaction.kind.to_string(),
        }
    }

    fn matches_hint(&self, interaction: &InteractionEvent, hint: &str) -> bool {
        if interaction.selector() == Some(hint) {
            return true;
        }
        let Some(id) = interaction.target_id else {
            return false;
        };
        id.to_string() == hint
            || format!("#node-{id}") == hint
            || self.descriptors.get(&id).map(String::as_str) == Some(hint)
    }
}

fn insert_sorted<T>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> Timestamp) {
    let at = key(&item);
    let pos = items.partition_point(|existing| key(existing) <= at);
    items.insert(pos, item);
}

/// Items with `from <= key < until`.
fn in_window<T>(items: &[T], from: Timestamp, until: Timestamp, key: impl Fn(&T) -> Timestamp) -> &[T] {
    let start = items.partition_point(|i| key(i) < from);
    let end = items.partition_point(|i| key(i) < until);
    &items[start..end.max(start)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rewind_core::SerializedNode;
    use serde_json::json;

    fn click(id: &str, at: f64, selector: &str) -> InteractionEvent {
        InteractionEvent::new(id, InteractionKind::Click, at).with_data(json!({ "selector": selector }))
    }

    #[test]
    fn click_just_before_error_is_primary() {
        let mut engine = CorrelationEngine::default();
        engine.add_interaction(click("i0", 1_000.0, "a.nav"));
        engine.add_interaction(click("i1", 4_800.0, "button#save"));
        engine.add_error(
            ErrorEvent::new("e1", "Cannot read properties of undefined (reading 'id')", 5_000.0)
                .with_target_hint("button#save"),
        );

        let c = engine.get("e1").unwrap();
        assert_eq!(c.primary(), Some("i1"));
        assert_eq!(c.user_path, vec!["button#save".to_string(), "a.nav".to_string()]);
        assert_eq!(c.root_cause, "click handler accessed state that was not ready");
        assert!(!c.suggestions.is_empty());
    }

    #[test]
    fn target_hint_beats_recency() {
        let mut engine = CorrelationEngine::default();
        engine.add_interaction(
            InteractionEvent::new("i1", InteractionKind::Input, 4_000.0)
                .with_target(NodeId(7))
                .with_data(json!({ "selector": "input[name=email]" })),
        );
        engine.add_interaction(click("i2", 4_900.0, "div.backdrop"));
        engine.add_error(
            ErrorEvent::new("e1", "TypeError: value is undefined", 5_000.0).with_target_hint("7"),
        );

        let c = engine.get("e1").unwrap();
        assert_eq!(c.interactions, vec!["i1".to_string(), "i2".to_string()]);
        assert_eq!(c.root_cause, "missing validation before property access");
    }

    #[test]
    fn lookback_window_is_half_open() {
        let mut engine = CorrelationEngine::new(CorrelationConfig {
            lookback_ms: 1_000.0,
            ..CorrelationConfig::default()
        });
        engine.add_interaction(click("early", 3_999.0, "a"));
        engine.add_interaction(click("edge", 4_000.0, "b"));
        engine.add_interaction(click("same", 5_000.0, "c"));
        engine.add_error(ErrorEvent::new("e1", "boom", 5_000.0));

        assert_eq!(engine.get("e1").unwrap().interactions, vec!["edge".to_string()]);
    }

    #[test]
    fn no_rule_degrades_to_unknown() {
        let mut engine = CorrelationEngine::default();
        engine.add_error(ErrorEvent::new("e1", "something odd happened", 100.0));
        let c = engine.get("e1").unwrap();
        assert_eq!(c.root_cause, UNKNOWN_CAUSE);
        assert!(c.suggestions.is_empty());
        assert!(c.user_path.is_empty());
        assert_eq!(c.severity, Severity::Medium);
    }

    #[test]
    fn failed_request_in_window_explains_error() {
        let mut engine = CorrelationEngine::default();
        engine.add_network(NetworkEvent::new("n1", "/api/cart", 4_500.0).with_status(503));
        engine.add_network(NetworkEvent::new("n2", "/api/user", 4_600.0).with_status(200));
        engine.add_error(ErrorEvent::new("e1", "render aborted", 5_000.0));

        let c = engine.get("e1").unwrap();
        assert_eq!(c.failed_requests, vec!["n1".to_string()]);
        assert_eq!(c.root_cause, "preceded by a failed network request");
    }

    #[test]
    fn message_rules_are_ordered() {
        let mut engine = CorrelationEngine::default();
        engine.add_error(ErrorEvent::new(
            "e1",
            "TypeError: Failed to fetch dynamically imported module",
            0.0,
        ));
        engine.add_error(ErrorEvent::new("e2", "SyntaxError: Unexpected token < in JSON at position 0", 0.0));
        engine.add_error(ErrorEvent::new("e3", "RangeError: Maximum call stack size exceeded", 0.0));
        engine.add_error(ErrorEvent::new("e4", "x.map is not a function", 0.0));

        let causes: Vec<&str> = engine.correlate().iter().map(|c| c.root_cause.as_str()).collect();
        assert_eq!(
            causes,
            vec![
                "application bundle changed while the page was open",
                "response body was not valid JSON",
                "unbounded recursion",
                "called a value that is not a function",
            ]
        );
    }

    #[test]
    fn registration_is_idempotent() {
        let mut engine = CorrelationEngine::default();
        assert!(engine.add_interaction(click("i1", 10.0, "a")));
        assert!(!engine.add_interaction(click("i1", 20.0, "b")));
        assert!(engine.add_error(ErrorEvent::new("e1", "boom", 50.0)));
        assert!(!engine.add_error(ErrorEvent::new("e1", "boom", 50.0)));
        assert_eq!(engine.correlate().len(), 1);
        assert_eq!(engine.correlate()[0].user_path, vec!["a".to_string()]);
    }

    #[test]
    fn ids_are_scoped_per_event_class() {
        let mut engine = CorrelationEngine::default();
        assert!(engine.add_interaction(click("7", 4_000.0, "button")));
        assert!(engine.add_network(NetworkEvent::new("7", "/api", 4_100.0).with_status(500)));
        assert!(engine.add_error(ErrorEvent::new("7", "boom", 4_500.0)));
        assert!(!engine.add_error(ErrorEvent::new("7", "boom", 4_600.0)));

        assert_eq!(engine.correlate().len(), 1);
        let correlation = engine.get("7").unwrap();
        assert_eq!(correlation.interactions, vec!["7".to_string()]);
        assert_eq!(correlation.failed_requests, vec!["7".to_string()]);

        let mut bulk = CorrelationEngine::default();
        bulk.extend(
            [click("1", 10.0, "a")],
            [ErrorEvent::new("1", "boom", 20.0)],
            [NetworkEvent::new("1", "/x", 15.0)],
        );
        assert_eq!(bulk.correlate().len(), 1);
    }

    #[test]
    fn repeated_message_escalates() {
        let mut engine = CorrelationEngine::default();
        for (i, at) in [100.0, 200.0].into_iter().enumerate() {
            engine.add_error(ErrorEvent::new(format!("e{i}"), "quota exceeded", at).with_severity(Severity::Low));
        }
        assert!(engine.correlate().iter().all(|c| c.severity == Severity::Low));

        engine.add_error(ErrorEvent::new("e2", "quota exceeded", 300.0).with_severity(Severity::Low));
        assert!(engine.correlate().iter().all(|c| c.severity == Severity::High));
    }

    #[test]
    fn path_is_capped_and_uses_tree_descriptors() {
        let mut engine = CorrelationEngine::new(CorrelationConfig {
            max_path_len: 2,
            ..CorrelationConfig::default()
        });
        for i in 0..4u64 {
            engine.add_interaction(
                InteractionEvent::new(format!("i{i}"), InteractionKind::Click, 1_000.0 + i as f64)
                    .with_target(NodeId(2)),
            );
        }
        engine.add_error(ErrorEvent::new("e1", "boom", 2_000.0));
        assert_eq!(
            engine.get("e1").unwrap().user_path,
            vec!["#node-2".to_string(), "#node-2".to_string()]
        );

        let tree = LiveTree::from_nodes(&[SerializedNode::element(1, "form")
            .with_child(SerializedNode::element(2, "button").with_attribute("id", "submit"))])
        .unwrap();
        engine.describe_targets(&tree);
        let c = engine.get("e1").unwrap();
        assert_eq!(c.user_path, vec!["button#submit".to_string(), "button#submit".to_string()]);
        assert_eq!(c.interactions, vec!["i3".to_string(), "i2".to_string()]);
    }

    #[test]
    fn bulk_registration_sorts_events() {
        let mut engine = CorrelationEngine::default();
        engine.extend(
            vec![click("late", 900.0, "b"), click("early", 100.0, "a")],
            vec![ErrorEvent::new("e1", "boom", 1_000.0)],
            Vec::new(),
        );
        assert_eq!(
            engine.get("e1").unwrap().interactions,
            vec!["late".to_string(), "early".to_string()]
        );
    }
}
