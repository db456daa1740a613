//! Bounded execution log of correlated tracking records.

use std::collections::VecDeque;
use std::fmt;
use std::time::UNIX_EPOCH;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use smol_str::SmolStr;

use crate::error::SubscriberError;
use crate::event::CorrelatedEvent;
use crate::identity::NodeId;
use crate::sink::EventSubscriber;
use crate::span::SourceSpan;
use crate::ui::{UiMessage, UiSender};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingRecordInfo {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub node: Option<NodeId>,
    pub display_name: SmolStr,
    pub state: SmolStr,
    pub span: Option<SourceSpan>,
    pub variables: Option<IndexMap<SmolStr, String>>,
}

impl TrackingRecordInfo {
    pub fn from_event(event: &CorrelatedEvent) -> Self {
        let timestamp_ms = event
            .event
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            sequence: event.sequence,
            timestamp_ms,
            node: event.event.node_id().cloned(),
            display_name: SmolStr::new(event.display_name()),
            state: event.event.state.clone(),
            span: event.span.clone(),
            variables: event.event.variables.clone(),
        }
    }
}

/// `[HH:MM:SS.mmm] [name] [state]`, time of day in UTC.
impl fmt::Display for TrackingRecordInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.timestamp_ms % 1000;
        let secs = self.timestamp_ms / 1000;
        write!(
            f,
            "[{:02}:{:02}:{:02}.{ms:03}] [{}] [{}]",
            (secs / 3600) % 24,
            (secs / 60) % 60,
            secs % 60,
            self.display_name,
            self.state
        )
    }
}

#[derive(Debug)]
pub struct ExecutionLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrackingRecordInfo>>,
    ui: Option<UiSender>,
}

impl ExecutionLog {
    pub fn new(capacity: usize, ui: Option<UiSender>) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
            ui,
        }
    }

    pub fn push(&self, record: TrackingRecordInfo) {
        {
            let mut entries = self.entries.lock();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(record.clone());
        }
        if let Some(ui) = &self.ui {
            ui.post(UiMessage::EventRecorded { record });
        }
    }

    #[must_use]
    pub fn entries(&self) -> Vec<TrackingRecordInfo> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Entry at `index`, oldest retained entry first.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<TrackingRecordInfo> {
        self.entries.lock().get(index).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// One rendered record per line.
    #[must_use]
    pub fn text(&self) -> String {
        let entries = self.entries.lock();
        let mut out = String::new();
        for entry in entries.iter() {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }
}

impl EventSubscriber for ExecutionLog {
    fn on_event(&self, event: &CorrelatedEvent) -> Result<(), SubscriberError> {
        self.push(TrackingRecordInfo::from_event(event));
        Ok(())
    }
}
