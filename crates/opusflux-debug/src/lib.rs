//! Step-level debugging core for tree-shaped workflow programs.
//!
//! The crate correlates a design-time program tree with the runtime tree an
//! external engine compiles from the same text, intercepts the engine's
//! tracking events on its worker thread, and suspends that thread at enabled
//! breakpoints until the UI-facing side resumes it.
//!
//! The engine and the design model are collaborators described by the traits
//! in [`engine`] and [`tree`]; [`session::ExecutionSession`] ties a run
//! together. [`harness`] provides an outline-based model and a scripted engine
//! for tests and the console front end.

pub mod breakpoints;
pub mod config;
pub mod controller;
pub mod correlate;
pub mod engine;
pub mod error;
pub mod event;
pub mod harness;
pub mod identity;
pub mod log;
pub mod profile;
pub mod session;
pub mod signal;
pub mod sink;
pub mod span;
pub mod tree;
pub mod ui;

pub use breakpoints::{Breakpoint, BreakpointRegistry, BreakpointToggle};
pub use config::{BreakOn, DebugSettings};
pub use controller::{DebugController, DebugStop, StopOutcome};
pub use correlate::{Correlation, CorrelationIssue, Correlator};
pub use engine::{
    DesignModel, ExecutionEngine, RunControl, RunOutcome, TrackingParticipant, ValidationError,
    ValidationReport,
};
pub use error::{DebugError, SubscriberError};
pub use event::{CorrelatedEvent, EventKind, EventSource, ResolvedNode, TrackingEvent};
pub use identity::NodeId;
pub use log::{ExecutionLog, TrackingRecordInfo};
pub use profile::TrackingProfile;
pub use session::{ExecutionSession, RunId, RunReport, SessionState};
pub use signal::{ResumeSignal, WaitOutcome};
pub use sink::{Delivery, DropReason, EventSink, EventSubscriber};
pub use span::{SourceDocument, SourceSpan, SpanTable};
pub use tree::{DesignNode, OrderedTree, RuntimeNode};
pub use ui::{ui_channel, UiMessage, UiQueue, UiSender};
