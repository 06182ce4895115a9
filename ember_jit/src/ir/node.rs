//! Tree IR nodes.
//!
//! A node is an operator plus an ordered list of children. Parents own their
//! children exclusively; a value consumed by several parents is bound to a
//! shared temp with `DefTemp` and read back through `TempRef` leaves, so no
//! subtree is ever duplicated.
//!
//! # Node Structure
//!
//! Each node has:
//! - **Operator**: What the node computes
//! - **Children**: Operand subtrees, evaluated left to right
//! - **Parent**: The consumer, `None` for statement roots
//! - **Position**: Linear position assigned by `TreeIr::reindex`
//! - **Location**: Register or spill slot written by the annotator

use super::arena::Id;
use super::operators::Operator;
use super::position::ProgPoint;
use crate::regalloc::Location;
use smallvec::SmallVec;

// =============================================================================
// Node ID Type Alias
// =============================================================================

/// Unique identifier for a node in the tree IR.
pub type NodeId = Id<Node>;

/// Children are stored inline up to binary arity.
pub type ChildList = SmallVec<[NodeId; 2]>;

// =============================================================================
// Node
// =============================================================================

/// A tree IR node.
#[derive(Debug, Clone)]
pub struct Node {
    /// The operation.
    pub op: Operator,
    /// Operand subtrees, in evaluation order.
    pub children: ChildList,
    /// Consuming node, if any.
    pub parent: Option<NodeId>,
    /// Linear position.
    pub pos: ProgPoint,
    /// Assigned location of the value this node produces or references.
    pub location: Option<Location>,
}

impl Node {
    /// Create an unnumbered, unannotated node.
    pub fn new(op: Operator, children: &[NodeId]) -> Self {
        Node {
            op,
            children: SmallVec::from_slice(children),
            parent: None,
            pos: ProgPoint::INVALID,
            location: None,
        }
    }
}
