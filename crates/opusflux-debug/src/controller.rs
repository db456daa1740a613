//! Debug controller: location highlighting and suspension at breakpoints.
//!
//! Everything here except [`DebugController::resume`] and
//! [`DebugController::release`] runs on the worker thread inside the sink
//! callback. The UI-facing side learns about locations and suspensions only
//! through the UI queue.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use smol_str::SmolStr;
use tracing::debug;

use crate::breakpoints::BreakpointRegistry;
use crate::config::BreakOn;
use crate::error::SubscriberError;
use crate::event::{CorrelatedEvent, ResolvedNode};
use crate::identity::NodeId;
use crate::signal::{ResumeSignal, WaitOutcome};
use crate::sink::EventSubscriber;
use crate::span::SourceSpan;
use crate::ui::{UiMessage, UiSender};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugStop {
    pub node: NodeId,
    pub display_name: SmolStr,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker did not stop.
    Passed,
    Resumed,
    /// Abort released the worker.
    Released,
}

#[derive(Debug, Default)]
struct ControllerState {
    location: Option<SourceSpan>,
    suspended: Option<DebugStop>,
    stops: Vec<DebugStop>,
}

pub struct DebugController {
    breakpoints: Arc<BreakpointRegistry>,
    signal: Arc<ResumeSignal>,
    ui: UiSender,
    dwell: Duration,
    break_on: BreakOn,
    state: Mutex<ControllerState>,
}

impl DebugController {
    pub fn new(
        breakpoints: Arc<BreakpointRegistry>,
        signal: Arc<ResumeSignal>,
        ui: UiSender,
        dwell: Duration,
        break_on: BreakOn,
    ) -> Self {
        Self {
            breakpoints,
            signal,
            ui,
            dwell,
            break_on,
            state: Mutex::new(ControllerState::default()),
        }
    }

    /// Handles one correlated event on the worker thread, blocking it while
    /// suspended at an enabled breakpoint.
    pub fn on_correlated_event(
        &self,
        resolved: Option<&ResolvedNode>,
        span: Option<&SourceSpan>,
    ) -> StopOutcome {
        self.handle(resolved, span, true)
    }

    fn handle(
        &self,
        resolved: Option<&ResolvedNode>,
        span: Option<&SourceSpan>,
        may_suspend: bool,
    ) -> StopOutcome {
        if let Some(span) = span {
            if self.highlight(Some(span.clone())) && !self.dwell.is_zero() && !self.signal.is_released()
            {
                thread::sleep(self.dwell);
            }
        }
        let (Some(node), Some(span)) = (resolved, span) else {
            return StopOutcome::Passed;
        };
        if !may_suspend || !self.breakpoints.is_enabled(span) || self.signal.is_released() {
            return StopOutcome::Passed;
        }

        self.breakpoints.record_hit(span);
        let stop = DebugStop {
            node: node.id.clone(),
            display_name: node.display_name.clone(),
            span: span.clone(),
        };
        self.signal.arm();
        {
            let mut state = self.state.lock();
            state.suspended = Some(stop.clone());
            state.stops.push(stop);
        }
        debug!("suspended at {} ({span})", node.display_name);
        self.ui.post(UiMessage::Suspended {
            span: span.clone(),
            node: node.id.clone(),
        });

        let outcome = match self.signal.wait() {
            WaitOutcome::Resumed => StopOutcome::Resumed,
            WaitOutcome::Released => StopOutcome::Released,
        };
        self.state.lock().suspended = None;
        debug!("left {} ({outcome:?})", node.display_name);
        self.ui.post(UiMessage::Resumed);
        outcome
    }

    /// Publishes `location` unless it is already current. Returns whether a
    /// message was posted.
    pub fn highlight(&self, location: Option<SourceSpan>) -> bool {
        {
            let mut state = self.state.lock();
            if state.location == location {
                return false;
            }
            state.location = location.clone();
        }
        self.ui.post(UiMessage::LocationChanged { span: location });
        true
    }

    pub fn clear_location(&self) {
        self.highlight(None);
    }

    /// Wakes a suspended worker; `false` when none is suspended.
    pub fn resume(&self) -> bool {
        self.signal.set()
    }

    /// Frees the worker now and for the rest of the run.
    pub fn release(&self) {
        self.signal.release();
    }

    /// Per-run reset, before the first event of a new run.
    pub fn reset(&self) {
        self.signal.reset();
        *self.state.lock() = ControllerState::default();
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended.is_some()
    }

    #[must_use]
    pub fn suspended_at(&self) -> Option<DebugStop> {
        self.state.lock().suspended.clone()
    }

    #[must_use]
    pub fn current_location(&self) -> Option<SourceSpan> {
        self.state.lock().location.clone()
    }

    /// Every suspension of the current run, oldest first.
    #[must_use]
    pub fn stops(&self) -> Vec<DebugStop> {
        self.state.lock().stops.clone()
    }

    #[must_use]
    pub fn breakpoints(&self) -> &Arc<BreakpointRegistry> {
        &self.breakpoints
    }
}

impl EventSubscriber for DebugController {
    fn on_event(&self, event: &CorrelatedEvent) -> Result<(), SubscriberError> {
        let may_suspend = self.break_on.allows(event.event.kind);
        self.handle(event.resolved.as_deref(), event.span.as_ref(), may_suspend);
        Ok(())
    }
}
