//! Tracking events as emitted by the engine and as republished after
//! correlation.

use std::sync::Arc;
use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::identity::NodeId;
use crate::span::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StateEntered,
    StateChanged,
    Other,
}

impl EventKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::StateEntered => "entered",
            Self::StateChanged => "changed",
            Self::Other => "other",
        }
    }
}

/// Runtime node an event was raised for, as described by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub id: NodeId,
    pub display_name: SmolStr,
    pub type_name: SmolStr,
}

impl EventSource {
    pub fn new(
        id: impl Into<NodeId>,
        display_name: impl Into<SmolStr>,
        type_name: impl Into<SmolStr>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            type_name: type_name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// `None` for instance-level records such as workflow started/completed.
    pub source: Option<EventSource>,
    pub kind: EventKind,
    /// Engine state label, e.g. `Executing` or `Closed`.
    pub state: SmolStr,
    pub timestamp: SystemTime,
    pub variables: Option<IndexMap<SmolStr, String>>,
}

impl TrackingEvent {
    pub fn activity(source: EventSource, kind: EventKind, state: impl Into<SmolStr>) -> Self {
        Self {
            source: Some(source),
            kind,
            state: state.into(),
            timestamp: SystemTime::now(),
            variables: None,
        }
    }

    pub fn instance(state: impl Into<SmolStr>) -> Self {
        Self {
            source: None,
            kind: EventKind::Other,
            state: state.into(),
            timestamp: SystemTime::now(),
            variables: None,
        }
    }

    #[must_use]
    pub fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_variables(mut self, variables: IndexMap<SmolStr, String>) -> Self {
        self.variables = Some(variables);
        self
    }

    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        self.source.as_ref().map(|source| &source.id)
    }
}

/// Runtime node found through the correlation lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedNode {
    pub id: NodeId,
    pub display_name: SmolStr,
    pub type_name: SmolStr,
    pub span: Option<SourceSpan>,
}

/// Event republished by the sink after identity resolution.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelatedEvent {
    pub sequence: u64,
    pub event: TrackingEvent,
    /// `None` when the identity has a design span but no runtime counterpart.
    pub resolved: Option<Arc<ResolvedNode>>,
    pub span: Option<SourceSpan>,
}

impl CorrelatedEvent {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.resolved
            .as_ref()
            .map(|node| node.display_name.as_str())
            .or_else(|| {
                self.event
                    .source
                    .as_ref()
                    .map(|source| source.display_name.as_str())
            })
            .unwrap_or("")
    }
}
