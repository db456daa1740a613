//! Correlation of the design tree, the compiled runtime tree and the program
//! text.
//!
//! The design pass visits the design tree in pre-order and locates every
//! node's anchor in the document, producing the long-lived design span table.
//! The runtime pass walks the compiled tree in lock-step with the design tree.
//! Positions are verified against identities: a runtime child whose identity
//! has a design counterpart consumes the next design position, and when the
//! identities disagree the pairing follows the identity and an
//! [`CorrelationIssue::OrderDiverged`] is recorded. Runtime nodes without a
//! design counterpart are engine-internal and stay unmapped.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::{debug, trace, warn};

use crate::event::ResolvedNode;
use crate::identity::NodeId;
use crate::span::{SourceDocument, SpanTable};
use crate::tree::{DesignNode, RuntimeNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationIssue {
    /// The node's anchor does not occur in the document.
    MissingAnchor { id: NodeId },
    /// The runtime tree enumerated `found` where the design tree has `expected`.
    OrderDiverged {
        expected: Option<NodeId>,
        found: NodeId,
    },
    /// A runtime identity appeared more than once; the first occurrence wins.
    DuplicateRuntimeId { id: NodeId },
    /// Design node with no runtime counterpart.
    Unmatched { id: NodeId },
}

/// Maps produced for one run.
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    document: SmolStr,
    design: SpanTable,
    runtime: SpanTable,
    lookup: IndexMap<NodeId, Arc<ResolvedNode>>,
    issues: Vec<CorrelationIssue>,
}

impl Correlation {
    /// No debugging information available.
    pub fn empty(document: impl Into<SmolStr>) -> Self {
        Self {
            document: document.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn document(&self) -> &str {
        self.document.as_str()
    }

    #[must_use]
    pub fn design_map(&self) -> &SpanTable {
        &self.design
    }

    #[must_use]
    pub fn runtime_map(&self) -> &SpanTable {
        &self.runtime
    }

    #[must_use]
    pub fn lookup(&self, id: &NodeId) -> Option<&Arc<ResolvedNode>> {
        self.lookup.get(id)
    }

    #[must_use]
    pub fn issues(&self) -> &[CorrelationIssue] {
        &self.issues
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.design.is_empty() && self.runtime.is_empty() && self.lookup.is_empty()
    }
}

pub struct Correlator;

impl Correlator {
    /// Design-only pass; rebuilds the span table used for breakpoint toggles.
    pub fn map_design<D: DesignNode>(root: &D, document: &SourceDocument) -> SpanTable {
        DesignPass::run(root, document).table
    }

    /// Builds all three maps. A missing tree on either side yields empty maps.
    pub fn correlate<D: DesignNode, R: RuntimeNode>(
        design: Option<&D>,
        runtime: Option<&R>,
        document: &SourceDocument,
    ) -> Correlation {
        let (Some(design), Some(runtime)) = (design, runtime) else {
            debug!(
                "correlation skipped for {}: design={} runtime={}",
                document.name(),
                design.is_some(),
                runtime.is_some()
            );
            return Correlation::empty(document.name());
        };

        let pass = DesignPass::run(design, document);
        let mut walk = RuntimeWalk {
            design: &pass,
            runtime: SpanTable::new(),
            lookup: IndexMap::new(),
            issues: Vec::new(),
        };
        walk.visit(runtime, &mut Siblings::new(vec![design.node_id()]));

        let RuntimeWalk {
            runtime: runtime_map,
            lookup,
            issues: walk_issues,
            ..
        } = walk;
        let mut issues = pass.issues.clone();
        issues.extend(walk_issues);
        for id in &pass.order {
            if !lookup.contains_key(id) {
                issues.push(CorrelationIssue::Unmatched { id: id.clone() });
            }
        }
        debug!(
            "correlated {} of {} design nodes in {} ({} issues)",
            lookup.len(),
            pass.order.len(),
            document.name(),
            issues.len()
        );

        Correlation {
            document: SmolStr::new(document.name()),
            design: pass.table,
            runtime: runtime_map,
            lookup,
            issues,
        }
    }
}

struct DesignPass<'a, D> {
    document: &'a SourceDocument,
    cursor: usize,
    table: SpanTable,
    index: FxHashMap<NodeId, &'a D>,
    order: Vec<NodeId>,
    issues: Vec<CorrelationIssue>,
}

impl<'a, D: DesignNode> DesignPass<'a, D> {
    fn run(root: &'a D, document: &'a SourceDocument) -> Self {
        let mut pass = Self {
            document,
            cursor: 0,
            table: SpanTable::new(),
            index: FxHashMap::default(),
            order: Vec::new(),
            issues: Vec::new(),
        };
        pass.visit(root);
        pass
    }

    fn visit(&mut self, node: &'a D) {
        let id = node.node_id();
        if self.index.contains_key(id) {
            trace!("design identity {id} repeated; keeping first node");
        } else {
            self.index.insert(id.clone(), node);
            self.order.push(id.clone());
        }
        let anchor = node.anchor();
        match self.document.locate(anchor, self.cursor) {
            Some((span, start)) => {
                self.cursor = start + anchor.len();
                self.table.insert(id.clone(), span);
            }
            None => {
                debug!("anchor '{anchor}' for {id} not found in {}", self.document.name());
                self.issues
                    .push(CorrelationIssue::MissingAnchor { id: id.clone() });
            }
        }
        for child in node.ordered_children() {
            self.visit(child);
        }
    }
}

/// Design children still expected under the nearest mapped runtime ancestor.
/// Unmapped runtime nodes pass the cursor through to their children.
struct Siblings<'x> {
    ids: Vec<&'x NodeId>,
    position: usize,
}

impl<'x> Siblings<'x> {
    fn new(ids: Vec<&'x NodeId>) -> Self {
        Self { ids, position: 0 }
    }

    fn next_expected(&mut self) -> Option<&'x NodeId> {
        let id = self.ids.get(self.position).copied();
        self.position += 1;
        id
    }
}

struct RuntimeWalk<'p, 'a, D> {
    design: &'p DesignPass<'a, D>,
    runtime: SpanTable,
    lookup: IndexMap<NodeId, Arc<ResolvedNode>>,
    issues: Vec<CorrelationIssue>,
}

impl<'p, 'a, D: DesignNode> RuntimeWalk<'p, 'a, D> {
    fn visit<R: RuntimeNode>(&mut self, node: &R, siblings: &mut Siblings<'_>) {
        let id = node.node_id();
        let Some(design) = self.design.index.get(id).copied() else {
            trace!("runtime node {id} ({}) is engine-internal", node.type_name());
            for child in node.ordered_children() {
                self.visit(child, siblings);
            }
            return;
        };

        match siblings.next_expected() {
            Some(expected) if expected != id => {
                warn!("runtime enumeration diverged: expected {expected}, found {id}");
                self.issues.push(CorrelationIssue::OrderDiverged {
                    expected: Some(expected.clone()),
                    found: id.clone(),
                });
            }
            None => {
                warn!("runtime enumeration diverged: unexpected {id}");
                self.issues.push(CorrelationIssue::OrderDiverged {
                    expected: None,
                    found: id.clone(),
                });
            }
            Some(_) => {}
        }

        if self.lookup.contains_key(id) {
            warn!("runtime identity {id} enumerated twice");
            self.issues
                .push(CorrelationIssue::DuplicateRuntimeId { id: id.clone() });
            return;
        }

        let span = self.design.table.get(id).cloned();
        if let Some(span) = &span {
            self.runtime.insert(id.clone(), span.clone());
        }
        self.lookup.insert(
            id.clone(),
            Arc::new(ResolvedNode {
                id: id.clone(),
                display_name: SmolStr::new(node.display_name()),
                type_name: SmolStr::new(node.type_name()),
                span,
            }),
        );

        let mut children = Siblings::new(
            design
                .ordered_children()
                .into_iter()
                .map(|child| child.node_id())
                .collect(),
        );
        for child in node.ordered_children() {
            self.visit(child, &mut children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::OrderedTree;

    #[derive(Debug, Clone)]
    struct Node {
        id: NodeId,
        name: String,
        anchor: String,
        type_name: String,
        children: Vec<Node>,
    }

    impl Node {
        fn new(id: &str, name: &str, children: Vec<Node>) -> Self {
            Self {
                id: NodeId::new(id),
                name: name.to_string(),
                anchor: format!("step {name}"),
                type_name: "flux.Step".to_string(),
                children,
            }
        }

        fn internal(id: &str) -> Self {
            Self {
                id: NodeId::new(id),
                name: "Literal".to_string(),
                anchor: String::new(),
                type_name: "flux.expressions.Literal".to_string(),
                children: Vec::new(),
            }
        }
    }

    impl OrderedTree for Node {
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

    impl DesignNode for Node {
        fn anchor(&self) -> &str {
            &self.anchor
        }
    }

    impl RuntimeNode for Node {
        fn type_name(&self) -> &str {
            &self.type_name
        }
    }

    const TEXT: &str = "step Main {\n    step A {\n    }\n    step B {\n    }\n}\n";

    fn design() -> Node {
        Node::new(
            "1",
            "Main",
            vec![Node::new("1.1", "A", vec![]), Node::new("1.2", "B", vec![])],
        )
    }

    #[test]
    fn maps_agree_for_every_correlated_node() {
        let doc = SourceDocument::new("main.flux", TEXT);
        let design = design();
        let mut runtime = design.clone();
        runtime.children[0].children.push(Node::internal("1.1.e1"));

        let correlation = Correlator::correlate(Some(&design), Some(&runtime), &doc);
        assert!(correlation.issues().is_empty(), "{:?}", correlation.issues());
        assert_eq!(correlation.runtime_map().len(), 3);
        for (id, span) in correlation.runtime_map().iter() {
            assert_eq!(correlation.design_map().get(id), Some(span));
            let resolved = correlation.lookup(id).expect("lookup entry");
            assert_eq!(resolved.span.as_ref(), Some(span));
        }
        assert!(correlation.lookup(&NodeId::new("1.1.e1")).is_none());
        let b = correlation.design_map().get(&NodeId::new("1.2")).expect("B span");
        assert_eq!(b.bounds(), (4, 5, 5, 6));
    }

    #[test]
    fn missing_runtime_tree_yields_empty_maps() {
        let doc = SourceDocument::new("main.flux", TEXT);
        let design = design();
        let correlation = Correlator::correlate::<Node, Node>(Some(&design), None, &doc);
        assert!(correlation.is_empty());
        assert_eq!(correlation.document(), "main.flux");
    }

    #[test]
    fn reordered_runtime_children_pair_by_identity() {
        let doc = SourceDocument::new("main.flux", TEXT);
        let design = design();
        let mut runtime = design.clone();
        runtime.children.reverse();

        let correlation = Correlator::correlate(Some(&design), Some(&runtime), &doc);
        assert!(correlation.issues().contains(&CorrelationIssue::OrderDiverged {
            expected: Some(NodeId::new("1.1")),
            found: NodeId::new("1.2"),
        }));
        let a = correlation.lookup(&NodeId::new("1.1")).expect("A resolved");
        assert_eq!(a.span.as_ref(), correlation.design_map().get(&NodeId::new("1.1")));
    }

    #[test]
    fn design_nodes_without_runtime_counterpart_are_reported() {
        let doc = SourceDocument::new("main.flux", TEXT);
        let design = design();
        let mut runtime = design.clone();
        runtime.children.pop();

        let correlation = Correlator::correlate(Some(&design), Some(&runtime), &doc);
        assert_eq!(
            correlation.issues(),
            &[CorrelationIssue::Unmatched {
                id: NodeId::new("1.2")
            }]
        );
        assert!(correlation.design_map().contains(&NodeId::new("1.2")));
        assert!(!correlation.runtime_map().contains(&NodeId::new("1.2")));
    }

    #[test]
    fn user_nodes_nested_under_internal_nodes_are_still_found() {
        let doc = SourceDocument::new("main.flux", TEXT);
        let design = design();
        let mut runtime = design.clone();
        let b = runtime.children.pop().expect("B");
        let mut wrapper = Node::internal("1.w");
        wrapper.children.push(b);
        runtime.children.push(wrapper);

        let correlation = Correlator::correlate(Some(&design), Some(&runtime), &doc);
        assert!(correlation.lookup(&NodeId::new("1.2")).is_some());
        assert!(correlation.lookup(&NodeId::new("1.w")).is_none());
    }

    #[test]
    fn wrapped_middle_child_keeps_sibling_order() {
        let text = "step Main {\n    step A;\n    step B;\n    step C;\n}\n";
        let doc = SourceDocument::new("main.flux", text);
        let design = Node::new(
            "1",
            "Main",
            vec![
                Node::new("1.1", "A", vec![]),
                Node::new("1.2", "B", vec![]),
                Node::new("1.3", "C", vec![]),
            ],
        );
        let mut runtime = design.clone();
        let c = runtime.children.pop().expect("C");
        let b = runtime.children.pop().expect("B");
        let mut wrapper = Node::internal("1.w");
        wrapper.children.push(b);
        runtime.children.push(wrapper);
        runtime.children.push(c);

        let correlation = Correlator::correlate(Some(&design), Some(&runtime), &doc);
        assert!(correlation.issues().is_empty(), "{:?}", correlation.issues());
        assert_eq!(correlation.runtime_map().len(), 4);
    }

    #[test]
    fn correlation_is_idempotent() {
        let doc = SourceDocument::new("main.flux", TEXT);
        let design = design();
        let runtime = design.clone();
        let first = Correlator::correlate(Some(&design), Some(&runtime), &doc);
        let second = Correlator::correlate(Some(&design), Some(&runtime), &doc);
        assert_eq!(first.design_map(), second.design_map());
        assert_eq!(first.runtime_map(), second.runtime_map());
    }
}
