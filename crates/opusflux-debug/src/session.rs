//! Execution session: owns at most one run and its worker thread.
//!
//! The session lives on the UI-facing side. Nothing here blocks on engine
//! progress except [`ExecutionSession::wait`] and the bounded wait inside
//! [`ExecutionSession::abort`].

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use serde::Serialize;
use smol_str::SmolStr;
use tracing::{debug, error, info, warn};

use crate::breakpoints::{BreakpointRegistry, BreakpointToggle};
use crate::config::DebugSettings;
use crate::controller::{DebugController, DebugStop};
use crate::correlate::{Correlation, Correlator};
use crate::engine::{DesignModel, ExecutionEngine, RunControl, RunOutcome, ValidationReport};
use crate::error::DebugError;
use crate::identity::NodeId;
use crate::log::ExecutionLog;
use crate::signal::ResumeSignal;
use crate::sink::{EventSink, EventSubscriber};
use crate::span::{SourceDocument, SourceSpan, SpanTable};
use crate::ui::{UiMessage, UiSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run: RunId,
    pub outcome: RunOutcome,
    pub events_forwarded: u64,
    pub subscriber_faults: u64,
    pub stops: Vec<DebugStop>,
}

impl RunReport {
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self.outcome {
            RunOutcome::Completed { .. } => SessionState::Completed,
            RunOutcome::Aborted { .. } => SessionState::Aborted,
        }
    }
}

struct ActiveRun {
    id: RunId,
    control: RunControl,
    done: Receiver<RunReport>,
    handle: Option<JoinHandle<()>>,
    sink: Arc<EventSink>,
}

pub struct ExecutionSession<E: ExecutionEngine> {
    engine: Arc<E>,
    settings: DebugSettings,
    ui: UiSender,
    state: Arc<Mutex<SessionState>>,
    breakpoints: Arc<BreakpointRegistry>,
    controller: Arc<DebugController>,
    log: Arc<ExecutionLog>,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
    design_map: SpanTable,
    correlation: Option<Arc<Correlation>>,
    validation: Option<ValidationReport>,
    active: Option<ActiveRun>,
    last_report: Option<RunReport>,
    next_run: u64,
}

impl<E: ExecutionEngine> ExecutionSession<E> {
    pub fn new(engine: E, settings: DebugSettings, ui: UiSender) -> Self {
        let breakpoints = Arc::new(BreakpointRegistry::new());
        let controller = Arc::new(DebugController::new(
            Arc::clone(&breakpoints),
            Arc::new(ResumeSignal::new()),
            ui.clone(),
            settings.highlight_dwell,
            settings.break_on,
        ));
        let log = Arc::new(ExecutionLog::new(settings.log_capacity, Some(ui.clone())));
        Self {
            engine: Arc::new(engine),
            settings,
            ui,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            breakpoints,
            controller,
            log,
            subscribers: Vec::new(),
            design_map: SpanTable::new(),
            correlation: None,
            validation: None,
            active: None,
            last_report: None,
            next_run: 1,
        }
    }

    /// Registers an extra subscriber for every later run, after the log and
    /// the controller.
    pub fn subscribe(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    #[must_use]
    pub fn settings(&self) -> &DebugSettings {
        &self.settings
    }

    #[must_use]
    pub fn breakpoints(&self) -> &Arc<BreakpointRegistry> {
        &self.breakpoints
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<DebugController> {
        &self.controller
    }

    #[must_use]
    pub fn log(&self) -> &Arc<ExecutionLog> {
        &self.log
    }

    #[must_use]
    pub fn design_map(&self) -> &SpanTable {
        &self.design_map
    }

    /// Correlation of the latest accepted run.
    #[must_use]
    pub fn correlation(&self) -> Option<&Arc<Correlation>> {
        self.correlation.as_ref()
    }

    #[must_use]
    pub fn last_validation(&self) -> Option<&ValidationReport> {
        self.validation.as_ref()
    }

    #[must_use]
    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    #[must_use]
    pub fn current_run(&self) -> Option<RunId> {
        self.active.as_ref().map(|run| run.id)
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.controller.is_suspended()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
        self.ui.post(UiMessage::SessionStateChanged { state });
    }

    /// Compiles the flushed program, correlates it and starts the worker.
    pub fn start<M: DesignModel>(&mut self, model: &mut M) -> Result<RunId, DebugError> {
        self.reap()?;
        if self.active.is_some() {
            return Err(DebugError::AlreadyRunning);
        }

        model.flush();
        let text = model.text().to_string();
        let program = match self.engine.compile(&text) {
            Ok(program) => program,
            Err(report) => {
                warn!("run rejected: {report}");
                if self.state() != SessionState::Idle {
                    self.set_state(SessionState::Idle);
                }
                self.validation = Some(report.clone());
                self.ui.post(UiMessage::RunRejected {
                    report: report.clone(),
                });
                return Err(DebugError::Validation(report));
            }
        };
        self.validation = None;

        let document = SourceDocument::new(model.document_name(), text);
        let correlation = Correlator::correlate(
            model.root(),
            self.engine.runtime_root(&program),
            &document,
        );
        self.design_map = match model.root() {
            Some(_) if !correlation.design_map().is_empty() => correlation.design_map().clone(),
            Some(root) => Correlator::map_design(root, &document),
            None => SpanTable::new(),
        };
        let correlation = Arc::new(correlation);
        self.correlation = Some(Arc::clone(&correlation));

        self.controller.reset();
        self.log.clear();
        let sink = Arc::new(EventSink::new(
            correlation,
            self.settings.profile.clone(),
            self.settings.internal_type_prefixes.clone(),
        ));
        sink.subscribe(self.log.clone());
        sink.subscribe(self.controller.clone());
        for subscriber in &self.subscribers {
            sink.subscribe(Arc::clone(subscriber));
        }

        let id = RunId(self.next_run);
        self.next_run += 1;
        let control = RunControl::new();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        self.set_state(SessionState::Running);

        let engine = Arc::clone(&self.engine);
        let worker_sink = Arc::clone(&sink);
        let worker_control = control.clone();
        let controller = Arc::clone(&self.controller);
        let state = Arc::clone(&self.state);
        let ui = self.ui.clone();
        let spawned = thread::Builder::new()
            .name(format!("opusflux-{id}"))
            .spawn(move || {
                let mut outcome = engine.run(&program, &*worker_sink, &worker_control);
                worker_sink.close();
                controller.clear_location();
                if worker_control.is_abort_requested() {
                    if let RunOutcome::Completed { .. } = outcome {
                        outcome = RunOutcome::Aborted {
                            reason: worker_control
                                .abort_reason()
                                .unwrap_or_else(|| SmolStr::new("aborted")),
                        };
                    }
                }
                let report = RunReport {
                    run: id,
                    outcome,
                    events_forwarded: worker_sink.forwarded_count(),
                    subscriber_faults: worker_sink.fault_count(),
                    stops: controller.stops(),
                };
                let finished = report.state();
                *state.lock() = finished;
                ui.post(UiMessage::SessionStateChanged { state: finished });
                ui.post(UiMessage::RunFinished {
                    report: report.clone(),
                });
                let _ = done_tx.send(report);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.set_state(SessionState::Idle);
                return Err(DebugError::WorkerSpawn(err.to_string().into()));
            }
        };

        info!("{id} started for {}", document.name());
        self.active = Some(ActiveRun {
            id,
            control,
            done: done_rx,
            handle: Some(handle),
            sink,
        });
        Ok(id)
    }

    /// The single Run command: starts when idle, continues otherwise.
    pub fn run_or_continue<M: DesignModel>(
        &mut self,
        model: &mut M,
    ) -> Result<Option<RunId>, DebugError> {
        self.reap()?;
        if self.active.is_some() {
            self.resume()?;
            return Ok(None);
        }
        self.start(model).map(Some)
    }

    /// Continues a suspended worker. Returns `false` when it was not suspended.
    pub fn resume(&mut self) -> Result<bool, DebugError> {
        if self.active.is_none() {
            return Err(DebugError::NotRunning);
        }
        Ok(self.controller.resume())
    }

    /// Requests termination and waits up to `abort_grace` for the worker.
    pub fn abort(&mut self, reason: impl Into<SmolStr>) -> Result<RunReport, DebugError> {
        self.reap()?;
        let Some(active) = &self.active else {
            return Err(DebugError::NotRunning);
        };
        let reason = reason.into();
        debug!("aborting {}: {reason}", active.id);
        active.control.request_abort(reason);
        self.controller.release();
        self.controller.clear_location();

        let grace = self.settings.abort_grace;
        match self.collect(Some(grace))? {
            Some(report) => Ok(report),
            None => {
                let waited_ms = grace.as_millis() as u64;
                error!("execution thread did not exit within {waited_ms} ms of abort");
                Err(DebugError::WorkerStuck { waited_ms })
            }
        }
    }

    /// Blocks until the run finishes or `timeout` elapses. `Ok(None)` means
    /// the run is still going.
    pub fn wait(&mut self, timeout: Duration) -> Result<Option<RunReport>, DebugError> {
        if self.active.is_none() {
            return self
                .last_report
                .clone()
                .map(Some)
                .ok_or(DebugError::NotRunning);
        }
        self.collect(Some(timeout))
    }

    /// Rebuilds the design map after the model changed and clears the log.
    pub fn refresh_design<M: DesignModel>(&mut self, model: &mut M) {
        model.flush();
        let document = SourceDocument::new(model.document_name(), model.text());
        self.design_map = match model.root() {
            Some(root) => Correlator::map_design(root, &document),
            None => SpanTable::new(),
        };
        self.log.clear();
        debug!(
            "design map rebuilt for {}: {} nodes",
            document.name(),
            self.design_map.len()
        );
    }

    /// Toggles a breakpoint on the model's selected node.
    pub fn toggle_breakpoint<M: DesignModel>(
        &mut self,
        model: &M,
    ) -> Result<BreakpointToggle, DebugError> {
        let selected = model.selected().ok_or(DebugError::NoSelection)?;
        let span = self
            .design_map
            .get(selected)
            .cloned()
            .ok_or_else(|| DebugError::NoSourceSpan(selected.clone()))?;
        let toggle = self.breakpoints.toggle(span.clone());
        self.ui.post(UiMessage::BreakpointChanged {
            span,
            enabled: toggle == BreakpointToggle::Added,
        });
        Ok(toggle)
    }

    /// Re-highlights the location of a recorded tracking entry.
    pub fn select_log_entry(&self, index: usize) -> Result<Option<SourceSpan>, DebugError> {
        let entry = self
            .log
            .get(index)
            .ok_or(DebugError::UnknownLogEntry(index))?;
        self.controller.highlight(entry.span.clone());
        Ok(entry.span)
    }

    /// Selects the node a validation error of the last rejected run names.
    pub fn focus_validation_error<M: DesignModel>(
        &self,
        model: &mut M,
        index: usize,
    ) -> Result<NodeId, DebugError> {
        let error = self
            .validation
            .as_ref()
            .and_then(|report| report.errors.get(index))
            .ok_or(DebugError::UnknownValidationError(index))?;
        let node = error
            .node
            .clone()
            .ok_or(DebugError::UnlocatedValidationError(index))?;
        if !model.select(&node) {
            return Err(DebugError::UnknownNode(node));
        }
        Ok(node)
    }

    /// Collects a finished run without blocking.
    fn reap(&mut self) -> Result<(), DebugError> {
        self.collect(None).map(|_| ())
    }

    fn collect(&mut self, timeout: Option<Duration>) -> Result<Option<RunReport>, DebugError> {
        let Some(active) = &self.active else {
            return Ok(None);
        };
        let received = match timeout {
            Some(timeout) => active.done.recv_timeout(timeout),
            None => active.done.try_recv().map_err(|err| match err {
                TryRecvError::Empty => RecvTimeoutError::Timeout,
                TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
            }),
        };
        match received {
            Ok(report) => {
                if let Some(mut active) = self.active.take() {
                    if let Some(handle) = active.handle.take() {
                        let _ = handle.join();
                    }
                }
                info!("{} finished: {:?}", report.run, report.state());
                self.last_report = Some(report.clone());
                Ok(Some(report))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(mut active) = self.active.take() {
                    active.sink.close();
                    if let Some(handle) = active.handle.take() {
                        let _ = handle.join();
                    }
                    error!("execution thread for {} panicked", active.id);
                }
                self.controller.release();
                self.controller.clear_location();
                self.set_state(SessionState::Aborted);
                Err(DebugError::WorkerPanicked)
            }
        }
    }
}

impl<E: ExecutionEngine> Drop for ExecutionSession<E> {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(err) = self.abort("session dropped") {
                warn!("run outstanding at session drop: {err}");
            }
        }
    }
}
