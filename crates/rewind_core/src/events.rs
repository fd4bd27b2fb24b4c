//! Recorded session events: interactions, errors, network and navigation.
//!
//! All events are immutable once captured and are consumed read-only
//! during replay. Optional fields default when missing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::node::NodeId;
use crate::time::Timestamp;

/// Kind of user interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Input,
    Scroll,
    Hover,
    Focus,
    Blur,
    Keydown,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 7] = [
        InteractionKind::Click,
        InteractionKind::Input,
        InteractionKind::Scroll,
        InteractionKind::Hover,
        InteractionKind::Focus,
        InteractionKind::Blur,
        InteractionKind::Keydown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Click => "click",
            InteractionKind::Input => "input",
            InteractionKind::Scroll => "scroll",
            InteractionKind::Hover => "hover",
            InteractionKind::Focus => "focus",
            InteractionKind::Blur => "blur",
            InteractionKind::Keydown => "keydown",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user interaction captured by the recording SDK.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<NodeId>,
    /// Free-form payload (`x`/`y`, `selector`, `value`, `key`, ...).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl InteractionEvent {
    pub fn new(id: impl Into<String>, kind: InteractionKind, timestamp: impl Into<Timestamp>) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp: timestamp.into(),
            target_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_target(mut self, target: NodeId) -> Self {
        self.target_id = Some(target);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Pointer position, when the SDK recorded one.
    pub fn position(&self) -> Option<(f64, f64)> {
        let x = self.data.get("x")?.as_f64()?;
        let y = self.data.get("y")?.as_f64()?;
        Some((x, y))
    }

    /// CSS selector of the target, when the SDK recorded one.
    pub fn selector(&self) -> Option<&str> {
        self.data.get("selector")?.as_str()
    }

    /// Value typed into an input, when recorded.
    pub fn value(&self) -> Option<&str> {
        self.data.get("value")?.as_str()
    }
}

/// Error severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// An error captured in the monitored page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Selector or node id string pointing at the element involved, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl ErrorEvent {
    pub fn new(id: impl Into<String>, message: impl Into<String>, timestamp: impl Into<Timestamp>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            stack: None,
            timestamp: timestamp.into(),
            url: None,
            target_hint: None,
            severity: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_target_hint(mut self, hint: impl Into<String>) -> Self {
        self.target_hint = Some(hint.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// A network request observed during the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub id: String,
    pub timestamp: Timestamp,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Transport-level failure message (CORS, offline, aborted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NetworkEvent {
    pub fn new(id: impl Into<String>, url: impl Into<String>, timestamp: impl Into<Timestamp>) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
            method: default_method(),
            url: url.into(),
            status: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// HTTP error status or a transport failure.
    pub fn is_failure(&self) -> bool {
        match self.status {
            Some(status) => status >= 400,
            None => self.error.is_some(),
        }
    }
}

/// A page navigation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEvent {
    pub id: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub url: String,
}
