//! Contracts for the external collaborators: the execution engine and the
//! design model.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use smol_str::SmolStr;

use crate::event::TrackingEvent;
use crate::identity::NodeId;
use crate::tree::{DesignNode, RuntimeNode};

/// Receives tracking events synchronously on the engine's thread.
pub trait TrackingParticipant: Send + Sync {
    fn track(&self, event: TrackingEvent);
}

/// Compiles program text and runs the compiled program.
pub trait ExecutionEngine: Send + Sync + 'static {
    type Program: Send + Sync + 'static;
    type Node: RuntimeNode;

    fn compile(&self, text: &str) -> Result<Self::Program, ValidationReport>;

    /// Root of the runtime tree, or `None` when the engine exposes none.
    fn runtime_root<'a>(&self, program: &'a Self::Program) -> Option<&'a Self::Node>;

    /// Runs to completion or abort on the calling thread, reporting every state
    /// change to `participant` before continuing.
    fn run(
        &self,
        program: &Self::Program,
        participant: &dyn TrackingParticipant,
        control: &RunControl,
    ) -> RunOutcome;
}

/// Editable design tree owned by the host.
pub trait DesignModel {
    type Node: DesignNode;

    /// Commits pending edits so `text` reflects the current tree.
    fn flush(&mut self);

    fn text(&self) -> &str;

    fn document_name(&self) -> &str;

    fn root(&self) -> Option<&Self::Node>;

    fn selected(&self) -> Option<&NodeId>;

    /// Returns `false` when no node carries `id`.
    fn select(&mut self, id: &NodeId) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Completed { outputs: IndexMap<SmolStr, String> },
    Aborted { reason: SmolStr },
}

/// Abort token shared between the session and a running engine.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    inner: Arc<RunControlInner>,
}

#[derive(Debug, Default)]
struct RunControlInner {
    abort: AtomicBool,
    reason: Mutex<Option<SmolStr>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_abort(&self, reason: impl Into<SmolStr>) {
        let mut slot = self.inner.reason.lock();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        self.inner.abort.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_abort_requested(&self) -> bool {
        self.inner.abort.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn abort_reason(&self) -> Option<SmolStr> {
        self.inner.reason.lock().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub node: Option<NodeId>,
    pub message: SmolStr,
}

impl ValidationError {
    pub fn new(node: Option<NodeId>, message: impl Into<SmolStr>) -> Self {
        Self {
            node,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{node}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn single(error: ValidationError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors"),
            [only] => write!(f, "{only}"),
            [first, rest @ ..] => write!(f, "{first} (and {} more)", rest.len()),
        }
    }
}
