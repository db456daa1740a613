//! Ordered child enumeration shared by design and runtime trees.
//!
//! Both tree representations must enumerate children in the same
//! deterministic order. The correlator walks them in lock-step and verifies
//! the order against node identities as it goes.

use crate::identity::NodeId;

pub trait OrderedTree {
    fn node_id(&self) -> &NodeId;

    fn display_name(&self) -> &str;

    /// Children in the deterministic order the tree enumerates them.
    fn ordered_children(&self) -> Vec<&Self>;
}

/// Node of the editable design tree.
pub trait DesignNode: OrderedTree {
    /// Marker text that identifies where the node is written in the program.
    fn anchor(&self) -> &str;
}

/// Node of the runtime tree compiled by the engine.
pub trait RuntimeNode: OrderedTree {
    /// Engine type name, used to recognise framework-internal nodes.
    fn type_name(&self) -> &str;
}
