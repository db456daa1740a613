//! Outline programs and a scripted engine that replays them.
//!
//! An outline is brace-structured text:
//!
//! ```text
//! sequence Main {
//!     step Fetch {
//!         url = "https://example.test"
//!     }
//!     log Done;
//! }
//! ```
//!
//! `kind Name {` opens a node, `}` closes it, `kind Name;` is a leaf and
//! `key = value` sets a property on the enclosing node. Identities are
//! positional paths (`1`, `1.1`, `1.2`, ...) and therefore identical for the
//! design model and every compilation of the same text.
//!
//! [`OutlineEngine`] does not interpret anything. It walks the compiled tree
//! depth-first and reports `Executing` on entry and `Closed` on exit for every
//! node. Properties named `out.<name>` become run outputs.

use std::ops::ControlFlow;
use std::thread;
use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::engine::{
    DesignModel, ExecutionEngine, RunControl, RunOutcome, TrackingParticipant, ValidationError,
    ValidationReport,
};
use crate::event::{EventKind, EventSource, TrackingEvent};
use crate::identity::NodeId;
use crate::tree::{DesignNode, OrderedTree, RuntimeNode};

const TYPE_PREFIX: &str = "flux";
const LITERAL_TYPE: &str = "flux.expressions.Literal";
const OUTPUT_PREFIX: &str = "out.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineNode {
    id: NodeId,
    kind: SmolStr,
    name: SmolStr,
    anchor: String,
    type_name: String,
    properties: IndexMap<SmolStr, String>,
    children: Vec<OutlineNode>,
}

impl OutlineNode {
    fn new(id: NodeId, header: &str) -> Self {
        let mut parts = header.split_whitespace();
        let kind = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or(kind);
        Self {
            id,
            kind: SmolStr::new(kind),
            name: SmolStr::new(name),
            anchor: header.to_string(),
            type_name: format!("{TYPE_PREFIX}.{kind}"),
            properties: IndexMap::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn properties(&self) -> &IndexMap<SmolStr, String> {
        &self.properties
    }

    #[must_use]
    pub fn children(&self) -> &[OutlineNode] {
        &self.children
    }

    fn find(&self, pred: &dyn Fn(&OutlineNode) -> bool) -> Option<&OutlineNode> {
        if pred(self) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(pred))
    }
}

impl OrderedTree for OutlineNode {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn ordered_children(&self) -> Vec<&Self> {
        self.children.iter().collect()
    }
}

impl DesignNode for OutlineNode {
    fn anchor(&self) -> &str {
        &self.anchor
    }
}

impl RuntimeNode for OutlineNode {
    fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Parses outline text into its root node.
fn parse_outline(text: &str) -> Result<OutlineNode, ValidationReport> {
    let mut stack: Vec<OutlineNode> = Vec::new();
    let mut roots: Vec<OutlineNode> = Vec::new();
    let mut errors = Vec::new();

    for (line_idx, raw) in text.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
            continue;
        }
        if line == "}" {
            match stack.pop() {
                Some(done) => attach(&mut stack, &mut roots, done),
                None => errors.push(ValidationError::new(
                    None,
                    format!("line {line_no}: unexpected '}}'"),
                )),
            }
            continue;
        }
        if let Some((key, value)) = property(line) {
            match stack.last_mut() {
                Some(owner) => {
                    owner.properties.insert(SmolStr::new(key), value.to_string());
                }
                None => errors.push(ValidationError::new(
                    None,
                    format!("line {line_no}: property '{key}' outside of a block"),
                )),
            }
            continue;
        }
        let (header, opens) = if let Some(header) = line.strip_suffix('{') {
            (header.trim_end(), true)
        } else if let Some(header) = line.strip_suffix(';') {
            (header.trim_end(), false)
        } else {
            let node = stack.last().map(|owner| owner.id.clone());
            errors.push(ValidationError::new(
                node,
                format!("line {line_no}: expected '{{', ';' or 'key = value'"),
            ));
            continue;
        };
        if header.is_empty() {
            errors.push(ValidationError::new(
                None,
                format!("line {line_no}: missing node kind"),
            ));
            continue;
        }
        let id = next_id(&stack, &roots);
        let node = OutlineNode::new(id, header);
        if opens {
            stack.push(node);
        } else {
            attach(&mut stack, &mut roots, node);
        }
    }

    while let Some(open) = stack.pop() {
        errors.push(ValidationError::new(
            Some(open.id.clone()),
            format!("'{}' is never closed", open.anchor),
        ));
    }
    if roots.len() > 1 {
        for extra in &roots[1..] {
            errors.push(ValidationError::new(
                Some(extra.id.clone()),
                format!("'{}' is outside the root node", extra.anchor),
            ));
        }
    }
    if !errors.is_empty() {
        return Err(ValidationReport { errors });
    }
    roots.into_iter().next().ok_or_else(|| {
        ValidationReport::single(ValidationError::new(None, "program has no nodes"))
    })
}

fn property(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let is_ident = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '.');
    if !is_ident {
        return None;
    }
    let value = value.trim();
    Some((key, value.strip_suffix(';').unwrap_or(value).trim_end()))
}

fn next_id(stack: &[OutlineNode], roots: &[OutlineNode]) -> NodeId {
    match stack.last() {
        Some(parent) => parent.id.child(parent.children.len() + 1),
        None => NodeId::new((roots.len() + 1).to_string()),
    }
}

fn attach(stack: &mut [OutlineNode], roots: &mut Vec<OutlineNode>, node: OutlineNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

/// Every property needs a value; reported against the owning node.
fn check_values(node: &OutlineNode, errors: &mut Vec<ValidationError>) {
    for (key, value) in &node.properties {
        if value.is_empty() {
            errors.push(ValidationError::new(
                Some(node.id.clone()),
                format!("property '{key}' of '{}' has no value", node.name),
            ));
        }
    }
    for child in &node.children {
        check_values(child, errors);
    }
}

/// Design model backed by outline text.
#[derive(Debug, Clone)]
pub struct OutlineProgram {
    document: SmolStr,
    text: String,
    pending: Option<String>,
    root: Option<OutlineNode>,
    selected: Option<NodeId>,
}

impl OutlineProgram {
    pub fn parse(document: impl Into<SmolStr>, text: impl Into<String>) -> Result<Self, ValidationReport> {
        let text = text.into();
        let root = parse_outline(&text)?;
        Ok(Self {
            document: document.into(),
            text,
            pending: None,
            root: Some(root),
            selected: None,
        })
    }

    /// Stages an edit; it becomes visible on the next `flush`.
    pub fn edit(&mut self, text: impl Into<String>) {
        self.pending = Some(text.into());
    }

    #[must_use]
    pub fn root_node(&self) -> Option<&OutlineNode> {
        self.root.as_ref()
    }

    #[must_use]
    pub fn find(&self, id: &NodeId) -> Option<&OutlineNode> {
        self.root.as_ref()?.find(&|node: &OutlineNode| node.id == *id)
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&OutlineNode> {
        self.root.as_ref()?.find(&|node: &OutlineNode| node.name == name)
    }

    pub fn select_by_name(&mut self, name: &str) -> bool {
        let Some(id) = self.find_by_name(name).map(|node| node.id.clone()) else {
            return false;
        };
        self.selected = Some(id);
        true
    }
}

impl DesignModel for OutlineProgram {
    type Node = OutlineNode;

    fn flush(&mut self) {
        let Some(text) = self.pending.take() else {
            return;
        };
        // An unparsable edit leaves no design tree; the engine reports why.
        self.root = parse_outline(&text).ok();
        self.text = text;
        if let Some(selected) = self.selected.take() {
            if self.find(&selected).is_some() {
                self.selected = Some(selected);
            }
        }
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn document_name(&self) -> &str {
        &self.document
    }

    fn root(&self) -> Option<&OutlineNode> {
        self.root.as_ref()
    }

    fn selected(&self) -> Option<&NodeId> {
        self.selected.as_ref()
    }

    fn select(&mut self, id: &NodeId) -> bool {
        if self.find(id).is_none() {
            return false;
        }
        self.selected = Some(id.clone());
        true
    }
}

/// Runtime tree node: a compiled outline node or an engine-internal literal.
#[derive(Debug, Clone)]
pub struct CompiledStep {
    id: NodeId,
    display_name: SmolStr,
    type_name: String,
    properties: IndexMap<SmolStr, String>,
    children: Vec<CompiledStep>,
}

impl CompiledStep {
    fn compile(node: &OutlineNode) -> Self {
        let literals = node
            .properties
            .iter()
            .enumerate()
            .map(|(idx, (key, value))| Self {
                id: NodeId::new(format!("{}.e{}", node.id, idx + 1)),
                display_name: key.clone(),
                type_name: LITERAL_TYPE.to_string(),
                properties: IndexMap::from([(SmolStr::new("value"), value.clone())]),
                children: Vec::new(),
            });
        let children = literals
            .chain(node.children.iter().map(Self::compile))
            .collect();
        Self {
            id: node.id.clone(),
            display_name: node.name.clone(),
            type_name: node.type_name.clone(),
            properties: node.properties.clone(),
            children,
        }
    }

    fn source(&self) -> EventSource {
        EventSource::new(self.id.clone(), self.display_name.clone(), self.type_name.as_str())
    }
}

impl OrderedTree for CompiledStep {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn ordered_children(&self) -> Vec<&Self> {
        self.children.iter().collect()
    }
}

impl RuntimeNode for CompiledStep {
    fn type_name(&self) -> &str {
        &self.type_name
    }
}

#[derive(Debug, Clone)]
pub struct CompiledOutline {
    root: CompiledStep,
}

/// Scripted engine replaying an outline depth-first.
#[derive(Debug, Clone)]
pub struct OutlineEngine {
    step_delay: Duration,
    clock: Option<SystemTime>,
    expose_runtime_tree: bool,
}

impl Default for OutlineEngine {
    fn default() -> Self {
        Self {
            step_delay: Duration::ZERO,
            clock: None,
            expose_runtime_tree: true,
        }
    }
}

impl OutlineEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps between entering and closing every node.
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Stamps every event with `clock` instead of the current time.
    #[must_use]
    pub fn with_fixed_clock(mut self, clock: SystemTime) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Hides the runtime tree, as an engine without introspection would.
    #[must_use]
    pub fn without_runtime_tree(mut self) -> Self {
        self.expose_runtime_tree = false;
        self
    }

    fn emit(&self, participant: &dyn TrackingParticipant, event: TrackingEvent) {
        let event = match self.clock {
            Some(clock) => event.at(clock),
            None => event,
        };
        participant.track(event);
    }

    fn execute(
        &self,
        step: &CompiledStep,
        participant: &dyn TrackingParticipant,
        control: &RunControl,
        outputs: &mut IndexMap<SmolStr, String>,
    ) -> ControlFlow<()> {
        if control.is_abort_requested() {
            return ControlFlow::Break(());
        }
        let mut entered = TrackingEvent::activity(step.source(), EventKind::StateEntered, "Executing");
        if !step.properties.is_empty() {
            entered = entered.with_variables(step.properties.clone());
        }
        self.emit(participant, entered);

        for child in &step.children {
            self.execute(child, participant, control, outputs)?;
        }
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
        if control.is_abort_requested() {
            return ControlFlow::Break(());
        }
        for (key, value) in &step.properties {
            if let Some(name) = key.strip_prefix(OUTPUT_PREFIX) {
                outputs.insert(SmolStr::new(name), value.clone());
            }
        }
        self.emit(
            participant,
            TrackingEvent::activity(step.source(), EventKind::StateChanged, "Closed"),
        );
        ControlFlow::Continue(())
    }
}

impl ExecutionEngine for OutlineEngine {
    type Program = CompiledOutline;
    type Node = CompiledStep;

    fn compile(&self, text: &str) -> Result<CompiledOutline, ValidationReport> {
        let root = parse_outline(text)?;
        let mut errors = Vec::new();
        check_values(&root, &mut errors);
        if !errors.is_empty() {
            return Err(ValidationReport { errors });
        }
        Ok(CompiledOutline {
            root: CompiledStep::compile(&root),
        })
    }

    fn runtime_root<'a>(&self, program: &'a CompiledOutline) -> Option<&'a CompiledStep> {
        self.expose_runtime_tree.then_some(&program.root)
    }

    fn run(
        &self,
        program: &CompiledOutline,
        participant: &dyn TrackingParticipant,
        control: &RunControl,
    ) -> RunOutcome {
        self.emit(participant, TrackingEvent::instance("Started"));
        let mut outputs = IndexMap::new();
        match self.execute(&program.root, participant, control, &mut outputs) {
            ControlFlow::Continue(()) => {
                self.emit(participant, TrackingEvent::instance("Completed"));
                RunOutcome::Completed { outputs }
            }
            ControlFlow::Break(()) => {
                self.emit(participant, TrackingEvent::instance("Aborted"));
                RunOutcome::Aborted {
                    reason: control
                        .abort_reason()
                        .unwrap_or_else(|| SmolStr::new("aborted")),
                }
            }
        }
    }
}
