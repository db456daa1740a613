use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use expect_test::expect;
use opusflux_debug::harness::{OutlineEngine, OutlineProgram};
use opusflux_debug::{
    ui_channel, BreakOn, BreakpointToggle, CorrelatedEvent, DebugError, DebugSettings, EventSubscriber,
    ExecutionSession, NodeId, RunOutcome, SessionState, SubscriberError, UiMessage, UiQueue,
};
use parking_lot::Mutex;

const PROGRAM: &str = "\
sequence Main {
    step N1 {
        url = \"a\"
    }
    step N2 {
        out.result = \"b\"
    }
}
";

const TIMEOUT: Duration = Duration::from_secs(5);

fn program() -> OutlineProgram {
    OutlineProgram::parse("main.flux", PROGRAM).expect("valid outline")
}

fn settings(break_on: BreakOn) -> DebugSettings {
    DebugSettings {
        break_on,
        abort_grace: TIMEOUT,
        ..DebugSettings::default()
    }
}

fn session_with(
    engine: OutlineEngine,
    settings: DebugSettings,
) -> (ExecutionSession<OutlineEngine>, UiQueue) {
    let (tx, queue) = ui_channel();
    (ExecutionSession::new(engine, settings, tx), queue)
}

fn break_at(session: &mut ExecutionSession<OutlineEngine>, program: &mut OutlineProgram, name: &str) {
    session.refresh_design(program);
    assert!(program.select_by_name(name), "node {name} exists");
    session.toggle_breakpoint(&*program).expect("breakpoint toggled");
}

/// Collects UI messages until one matches `pred`; returns everything seen.
fn collect_until(queue: &UiQueue, pred: impl Fn(&UiMessage) -> bool) -> Vec<UiMessage> {
    let deadline = Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message = queue
            .recv_timeout(remaining)
            .expect("expected UI message before timeout");
        let done = pred(&message);
        seen.push(message);
        if done {
            return seen;
        }
    }
}

fn is_suspended(message: &UiMessage) -> bool {
    matches!(message, UiMessage::Suspended { .. })
}

fn location_lines(messages: &[UiMessage]) -> Vec<u32> {
    messages
        .iter()
        .filter_map(|message| match message {
            UiMessage::LocationChanged { span: Some(span) } => Some(span.start_line),
            _ => None,
        })
        .collect()
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<CorrelatedEvent>>,
}

impl EventSubscriber for Recorder {
    fn on_event(&self, event: &CorrelatedEvent) -> Result<(), SubscriberError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

struct Refusing;

impl EventSubscriber for Refusing {
    fn on_event(&self, _event: &CorrelatedEvent) -> Result<(), SubscriberError> {
        Err(SubscriberError::new("refusing every event"))
    }
}

#[test]
fn breakpoint_suspends_at_second_node_and_continue_completes() {
    let (mut session, queue) = session_with(OutlineEngine::new(), settings(BreakOn::Entered));
    let mut program = program();
    break_at(&mut session, &mut program, "N2");
    queue.drain();

    session.start(&mut program).expect("run started");
    let before = collect_until(&queue, is_suspended);
    let lines = location_lines(&before);
    assert_eq!(lines, vec![1, 2, 5], "Main, N1 then N2 highlighted");
    let Some(UiMessage::Suspended { span, node }) = before.last() else {
        panic!("last message must be the suspension");
    };
    assert_eq!(node, &NodeId::new("1.2"));
    assert_eq!(span.bounds(), (5, 5, 7, 6));
    assert!(session.is_suspended());
    assert_eq!(session.state(), SessionState::Running);

    assert!(session.resume().expect("run outstanding"));
    let report = session
        .wait(TIMEOUT)
        .expect("run finished cleanly")
        .expect("run finished in time");
    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(report.stops.len(), 1);
    let RunOutcome::Completed { outputs } = &report.outcome else {
        panic!("expected completion, got {:?}", report.outcome);
    };
    assert_eq!(outputs.get("result").map(String::as_str), Some("\"b\""));
    assert_eq!(session.breakpoints().list()[0].hit_count, 1);
    assert_eq!(session.controller().current_location(), None);
}

#[test]
fn default_break_on_stops_on_entry_and_on_close() {
    let (mut session, queue) = session_with(OutlineEngine::new(), settings(BreakOn::Any));
    let mut program = program();
    break_at(&mut session, &mut program, "N1");

    session.start(&mut program).expect("run started");
    for _ in 0..2 {
        collect_until(&queue, is_suspended);
        assert!(session.resume().expect("run outstanding"));
    }
    let report = session
        .wait(TIMEOUT)
        .expect("run finished cleanly")
        .expect("run finished in time");
    assert_eq!(report.state(), SessionState::Completed);
    assert_eq!(report.stops.len(), 2);
}

#[test]
fn breakpoint_added_while_suspended_is_hit_later_in_the_run() {
    let (mut session, queue) = session_with(OutlineEngine::new(), settings(BreakOn::Entered));
    let mut program = program();
    break_at(&mut session, &mut program, "N1");

    session.start(&mut program).expect("run started");
    let first = collect_until(&queue, is_suspended);
    assert!(matches!(
        first.last(),
        Some(UiMessage::Suspended { node, .. }) if node == &NodeId::new("1.1")
    ));

    assert!(program.select_by_name("N2"));
    assert_eq!(
        session.toggle_breakpoint(&program).expect("toggled mid-run"),
        BreakpointToggle::Added
    );
    assert!(session.resume().expect("run outstanding"));

    let second = collect_until(&queue, is_suspended);
    assert!(matches!(
        second.last(),
        Some(UiMessage::Suspended { node, .. }) if node == &NodeId::new("1.2")
    ));
    assert!(session.resume().expect("run outstanding"));
    let report = session
        .wait(TIMEOUT)
        .expect("run finished cleanly")
        .expect("run finished in time");
    assert_eq!(report.state(), SessionState::Completed);
    assert_eq!(report.stops.len(), 2);
}

#[test]
fn breakpoint_removed_while_suspended_is_not_hit() {
    let (mut session, queue) = session_with(OutlineEngine::new(), settings(BreakOn::Entered));
    let mut program = program();
    break_at(&mut session, &mut program, "N1");
    break_at(&mut session, &mut program, "N2");

    session.start(&mut program).expect("run started");
    collect_until(&queue, is_suspended);

    assert!(program.select_by_name("N2"));
    assert_eq!(
        session.toggle_breakpoint(&program).expect("toggled mid-run"),
        BreakpointToggle::Removed
    );
    assert!(session.resume().expect("run outstanding"));

    let rest = collect_until(&queue, |message| {
        matches!(message, UiMessage::RunFinished { .. })
    });
    assert!(!rest.iter().any(is_suspended));
    let report = session
        .wait(TIMEOUT)
        .expect("run finished cleanly")
        .expect("run finished in time");
    assert_eq!(report.stops.len(), 1);
    assert_eq!(report.stops[0].node, NodeId::new("1.1"));
}

#[test]
fn abort_while_suspended_ends_aborted() {
    let (mut session, queue) = session_with(OutlineEngine::new(), settings(BreakOn::Entered));
    let mut program = program();
    break_at(&mut session, &mut program, "N2");

    session.start(&mut program).expect("run started");
    collect_until(&queue, is_suspended);

    let started = Instant::now();
    let report = session.abort("user").expect("worker exits within grace");
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(
        report.outcome,
        RunOutcome::Aborted {
            reason: "user".into()
        }
    );
    assert_eq!(session.state(), SessionState::Aborted);
    assert!(!session.is_suspended());

    let rest = collect_until(&queue, |message| {
        matches!(message, UiMessage::RunFinished { .. })
    });
    assert!(!rest.iter().any(|message| matches!(
        message,
        UiMessage::SessionStateChanged {
            state: SessionState::Completed
        }
    )));
    assert!(matches!(session.resume(), Err(DebugError::NotRunning)));
}

#[test]
fn abort_while_running_without_breakpoints() {
    let engine = OutlineEngine::new().with_step_delay(Duration::from_millis(50));
    let (mut session, _queue) = session_with(engine, settings(BreakOn::Any));
    let mut program = program();

    session.start(&mut program).expect("run started");
    let report = session.abort("user").expect("worker exits within grace");
    assert_eq!(report.state(), SessionState::Aborted);
    assert!(report.stops.is_empty());
}

#[test]
fn unmapped_runtime_nodes_never_reach_subscribers() {
    let settings = DebugSettings {
        internal_type_prefixes: Vec::new(),
        ..settings(BreakOn::Any)
    };
    let (mut session, _queue) = session_with(OutlineEngine::new(), settings);
    let recorder = Arc::new(Recorder::default());
    session.subscribe(recorder.clone());
    let mut program = program();

    session.start(&mut program).expect("run started");
    session
        .wait(TIMEOUT)
        .expect("run finished cleanly")
        .expect("run finished in time");

    let events = recorder.events.lock();
    assert_eq!(events.len(), 6, "Executing and Closed for three user nodes");
    assert!(events.iter().all(|event| event.resolved.is_some()));
    assert!(events
        .iter()
        .all(|event| !event.resolved.as_ref().is_some_and(|node| node.type_name.contains("expressions"))));
    let sequences = events.iter().map(|event| event.sequence).collect::<Vec<_>>();
    assert_eq!(sequences, (1..=6).collect::<Vec<_>>());
    assert_eq!(session.log().len(), 6);
}

#[test]
fn second_start_is_rejected_while_a_run_is_outstanding() {
    let (mut session, queue) = session_with(OutlineEngine::new(), settings(BreakOn::Entered));
    let mut program = program();
    break_at(&mut session, &mut program, "N1");

    let first = session.start(&mut program).expect("run started");
    collect_until(&queue, is_suspended);
    assert!(matches!(
        session.start(&mut program),
        Err(DebugError::AlreadyRunning)
    ));
    assert_eq!(session.current_run(), Some(first));

    assert_eq!(
        session.run_or_continue(&mut program).expect("continues"),
        None
    );
    session
        .wait(TIMEOUT)
        .expect("run finished cleanly")
        .expect("run finished in time");
    let second = session
        .run_or_continue(&mut program)
        .expect("starts again")
        .expect("new run id");
    assert_ne!(first, second);
    collect_until(&queue, is_suspended);
    session.abort("done").expect("aborted");
}

#[test]
fn validation_failure_leaves_the_session_idle() {
    let (mut session, queue) = session_with(OutlineEngine::new(), settings(BreakOn::Any));
    let mut program = program();
    program.edit("sequence Main {\n    step N1 {\n        url =\n    }\n}\n");

    let err = session.start(&mut program).expect_err("validation fails");
    let DebugError::Validation(report) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert_eq!(report.errors[0].node, Some(NodeId::new("1.1")));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.current_run(), None);
    assert!(session.correlation().is_none());

    let messages = queue.drain();
    assert!(matches!(messages.as_slice(), [UiMessage::RunRejected { .. }]));

    let focused = session
        .focus_validation_error(&mut program, 0)
        .expect("error names a node");
    assert_eq!(focused, NodeId::new("1.1"));
    assert!(matches!(
        session.focus_validation_error(&mut program, 3),
        Err(DebugError::UnknownValidationError(3))
    ));
}

#[test]
fn faulty_subscriber_does_not_stop_the_run() {
    let (mut session, _queue) = session_with(OutlineEngine::new(), settings(BreakOn::Any));
    session.subscribe(Arc::new(Refusing));
    let mut program = program();

    session.start(&mut program).expect("run started");
    let report = session
        .wait(TIMEOUT)
        .expect("run finished cleanly")
        .expect("run finished in time");
    assert_eq!(report.state(), SessionState::Completed);
    assert_eq!(report.subscriber_faults, report.events_forwarded);
    assert_eq!(session.log().len() as u64, report.events_forwarded);
}

#[test]
fn correlation_maps_agree_and_are_stable_across_runs() {
    let (mut session, _queue) = session_with(OutlineEngine::new(), settings(BreakOn::Any));
    let mut program = program();

    session.start(&mut program).expect("first run");
    session.wait(TIMEOUT).expect("first run finished");
    let first = Arc::clone(session.correlation().expect("correlated"));
    for (id, span) in first.runtime_map().iter() {
        assert_eq!(first.design_map().get(id), Some(span));
    }
    assert!(first.issues().is_empty(), "{:?}", first.issues());

    session.start(&mut program).expect("second run");
    session.wait(TIMEOUT).expect("second run finished");
    let second = session.correlation().expect("correlated");
    assert_eq!(first.design_map(), second.design_map());
    assert_eq!(first.runtime_map(), second.runtime_map());
    assert_eq!(session.design_map(), second.design_map());
}

#[test]
fn engine_without_runtime_tree_runs_without_debugging() {
    let engine = OutlineEngine::new().without_runtime_tree();
    let (mut session, _queue) = session_with(engine, settings(BreakOn::Any));
    let mut program = program();
    break_at(&mut session, &mut program, "N1");

    session.start(&mut program).expect("run started");
    let report = session
        .wait(TIMEOUT)
        .expect("run finished cleanly")
        .expect("run finished in time");
    assert_eq!(report.state(), SessionState::Completed);
    assert!(report.stops.is_empty());
    assert!(session.correlation().expect("correlated").is_empty());
    assert!(!session.design_map().is_empty());
}

#[test]
fn selecting_a_log_entry_highlights_its_node() {
    let (mut session, queue) = session_with(OutlineEngine::new(), settings(BreakOn::Any));
    let mut program = program();

    session.start(&mut program).expect("run started");
    session.wait(TIMEOUT).expect("run finished");
    queue.drain();

    let entries = session.log().entries();
    let n1 = entries
        .iter()
        .position(|entry| entry.display_name == "N1")
        .expect("N1 recorded");
    let span = session
        .select_log_entry(n1)
        .expect("entry exists")
        .expect("entry has a location");
    assert_eq!(span.start_line, 2);
    assert!(matches!(
        queue.drain().as_slice(),
        [UiMessage::LocationChanged { span: Some(_) }]
    ));
}

#[test]
fn execution_log_renders_each_tracked_state() {
    let clock = UNIX_EPOCH + Duration::from_millis(3_723_004);
    let engine = OutlineEngine::new().with_fixed_clock(clock);
    let (mut session, _queue) = session_with(engine, settings(BreakOn::Any));
    let mut program = program();

    session.start(&mut program).expect("run started");
    session.wait(TIMEOUT).expect("run finished");
    expect![[r#"
        [01:02:03.004] [Main] [Executing]
        [01:02:03.004] [N1] [Executing]
        [01:02:03.004] [N1] [Closed]
        [01:02:03.004] [N2] [Executing]
        [01:02:03.004] [N2] [Closed]
        [01:02:03.004] [Main] [Closed]
    "#]]
    .assert_eq(&session.log().text());

    session.refresh_design(&mut program);
    assert!(session.log().is_empty());
}
