//! Asynchronous queue from the worker thread to the UI-facing side.
//!
//! Posting never blocks and never fails from the poster's point of view; a
//! disconnected UI simply stops receiving.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use crate::engine::ValidationReport;
use crate::identity::NodeId;
use crate::log::TrackingRecordInfo;
use crate::session::{RunReport, SessionState};
use crate::span::SourceSpan;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiMessage {
    /// `None` clears the highlight.
    LocationChanged { span: Option<SourceSpan> },
    EventRecorded { record: TrackingRecordInfo },
    Suspended { span: SourceSpan, node: NodeId },
    Resumed,
    SessionStateChanged { state: SessionState },
    RunRejected { report: ValidationReport },
    RunFinished { report: RunReport },
    BreakpointChanged { span: SourceSpan, enabled: bool },
}

#[derive(Debug, Clone)]
pub struct UiSender {
    tx: Sender<UiMessage>,
}

impl UiSender {
    pub fn post(&self, message: UiMessage) {
        if self.tx.send(message).is_err() {
            tracing::trace!("ui queue disconnected; message dropped");
        }
    }
}

#[derive(Debug)]
pub struct UiQueue {
    rx: Receiver<UiMessage>,
}

impl UiQueue {
    pub fn try_recv(&self) -> Option<UiMessage> {
        self.rx.try_recv().ok()
    }

    /// `None` on timeout or when every sender is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<UiMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn drain(&self) -> Vec<UiMessage> {
        self.rx.try_iter().collect()
    }
}

pub fn ui_channel() -> (UiSender, UiQueue) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (UiSender { tx }, UiQueue { rx })
}
