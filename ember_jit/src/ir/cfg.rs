//! Control flow graph of tree statements.
//!
//! A [`TreeIr`] is a list of basic blocks in source order. Each block holds
//! ordered statement roots; edges are block ids, so loops are plain index
//! cycles. Positions are assigned by [`TreeIr::reindex`] in block order,
//! statement order and tree post-order.
//!
//! After allocation a block also carries synthetic instructions keyed by
//! [`Gap`], and each outgoing [`Edge`] carries the moves that reconcile
//! locations between the two blocks.

use super::arena::{Arena, Id};
use super::node::{Node, NodeId};
use super::operators::{Label, Operator, TempId};
use super::position::{Gap, ProgPoint};
use crate::regalloc::spill::SyntheticInst;
use smallvec::SmallVec;
use std::fmt;

// =============================================================================
// Basic Block
// =============================================================================

/// Block identifier.
pub type BlockId = Id<BasicBlock>;

/// A control-flow edge to `target`.
#[derive(Debug, Clone)]
pub struct Edge {
    pub target: BlockId,
    /// Resolution code executed when control takes this edge.
    pub moves: Vec<SyntheticInst>,
}

impl Edge {
    fn new(target: BlockId) -> Self {
        Edge {
            target,
            moves: Vec::new(),
        }
    }
}

/// A basic block in the CFG.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Label of the stack program this block starts at.
    pub label: Option<Label>,

    /// Statement roots, in order. The last one is the terminator.
    pub statements: Vec<NodeId>,

    /// Predecessor blocks.
    pub predecessors: SmallVec<[BlockId; 2]>,

    /// Outgoing edges, in terminator operand order.
    pub successors: SmallVec<[Edge; 2]>,

    /// Position of the first node.
    pub start: ProgPoint,

    /// Position of the last node.
    pub end: ProgPoint,

    /// Spill code placed inside the block, sorted by gap.
    pub synthetic: Vec<(Gap, SyntheticInst)>,
}

impl BasicBlock {
    fn new(label: Option<Label>) -> Self {
        BasicBlock {
            label,
            statements: Vec::new(),
            predecessors: SmallVec::new(),
            successors: SmallVec::new(),
            start: ProgPoint::INVALID,
            end: ProgPoint::INVALID,
            synthetic: Vec::new(),
        }
    }

    /// Successor block ids.
    pub fn successor_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.successors.iter().map(|edge| edge.target)
    }

    /// Check if `pos` falls inside this block.
    #[inline]
    pub fn contains(&self, pos: ProgPoint) -> bool {
        self.start.is_valid() && self.start <= pos && pos <= self.end
    }

    /// Insert spill code, keeping gap order. Instructions at the same gap
    /// keep insertion order.
    pub fn insert_synthetic(&mut self, gap: Gap, inst: SyntheticInst) {
        let index = self.synthetic.partition_point(|(g, _)| *g <= gap);
        self.synthetic.insert(index, (gap, inst));
    }
}

/// One item of a block's final instruction stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step<'a> {
    Node(NodeId),
    Synthetic(&'a SyntheticInst),
}

// =============================================================================
// Tree IR
// =============================================================================

/// A function lowered to trees.
#[derive(Debug, Clone)]
pub struct TreeIr {
    nodes: Arena<Node>,
    blocks: Arena<BasicBlock>,
    param_count: u32,
    local_count: u32,
    temp_count: u32,
    /// Node at each position, filled by `reindex`.
    order: Vec<NodeId>,
}

impl TreeIr {
    /// Create an empty function body.
    pub fn new(param_count: u32, local_count: u32) -> Self {
        TreeIr {
            nodes: Arena::new(),
            blocks: Arena::new(),
            param_count,
            local_count,
            temp_count: 0,
            order: Vec::new(),
        }
    }

    #[inline]
    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    #[inline]
    pub fn local_count(&self) -> u32 {
        self.local_count
    }

    #[inline]
    pub fn temp_count(&self) -> u32 {
        self.temp_count
    }

    /// Number of numbered positions.
    #[inline]
    pub fn position_count(&self) -> u32 {
        self.order.len() as u32
    }

    /// Reserve a fresh shared temp.
    pub fn new_temp(&mut self) -> TempId {
        let temp = TempId(self.temp_count);
        self.temp_count += 1;
        temp
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Append a new empty block.
    pub fn add_block(&mut self, label: Option<Label>) -> BlockId {
        self.blocks.alloc(BasicBlock::new(label))
    }

    /// Create a node owning `children`.
    pub fn add_node(&mut self, op: Operator, children: &[NodeId]) -> NodeId {
        let id = self.nodes.alloc(Node::new(op, children));
        for &child in children {
            self.nodes[child].parent = Some(id);
        }
        id
    }

    /// Append a statement root to `block`.
    pub fn append_statement(&mut self, block: BlockId, root: NodeId) {
        self.blocks[block].statements.push(root);
    }

    /// Rebuild predecessor and successor lists from the terminators.
    pub fn recompute_edges(&mut self) {
        for block in self.blocks.ids() {
            let blk = &mut self.blocks[block];
            blk.predecessors.clear();
            blk.successors.clear();
        }

        for block in self.blocks.ids() {
            let targets = match self.terminator(block) {
                Some(term) => self.nodes[term].op.successors(),
                None => SmallVec::new(),
            };
            for target in targets {
                if !self.blocks[block].successor_ids().any(|t| t == target) {
                    self.blocks[block].successors.push(Edge::new(target));
                }
                if !self.blocks[target].predecessors.contains(&block) {
                    self.blocks[target].predecessors.push(block);
                }
            }
        }
    }

    /// Assign linear positions in block order, statement order and tree
    /// post-order.
    pub fn reindex(&mut self) {
        self.order.clear();
        for block in self.blocks.ids() {
            let nodes = self.block_nodes(block);
            let first = self.order.len() as u32;
            for &node in &nodes {
                self.nodes[node].pos = ProgPoint::new(self.order.len() as u32);
                self.order.push(node);
            }

            let blk = &mut self.blocks[block];
            if nodes.is_empty() {
                blk.start = ProgPoint::INVALID;
                blk.end = ProgPoint::INVALID;
            } else {
                blk.start = ProgPoint::new(first);
                blk.end = ProgPoint::new(self.order.len() as u32 - 1);
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The entry block.
    #[inline]
    pub fn entry(&self) -> BlockId {
        BlockId::new(0)
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Block ids in source order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + use<> {
        self.blocks.ids()
    }

    /// Blocks with their ids in source order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks.iter()
    }

    /// The block's terminator, if its last statement is one.
    pub fn terminator(&self, block: BlockId) -> Option<NodeId> {
        self.blocks[block]
            .statements
            .last()
            .copied()
            .filter(|&root| self.nodes[root].op.is_terminator())
    }

    fn visit_post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in &self.nodes[id].children {
            self.visit_post_order(child, out);
        }
        out.push(id);
    }

    /// Nodes of one block in execution order.
    pub fn block_nodes(&self, block: BlockId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &root in &self.blocks[block].statements {
            self.visit_post_order(root, &mut out);
        }
        out
    }

    /// All nodes in execution order. Valid after `reindex`.
    pub fn execution_order(&self) -> &[NodeId] {
        &self.order
    }

    /// The node numbered `pos`.
    pub fn node_at(&self, pos: ProgPoint) -> Option<NodeId> {
        self.order.get(pos.as_usize()).copied()
    }

    /// The block containing `pos`.
    pub fn block_at(&self, pos: ProgPoint) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|(_, blk)| blk.contains(pos))
            .map(|(id, _)| id)
    }

    /// Distance from the statement root.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = self.nodes[id].parent;
        while let Some(parent) = cur {
            depth += 1;
            cur = self.nodes[parent].parent;
        }
        depth
    }

    /// The block's instruction stream: nodes in execution order with spill
    /// code merged in at its gaps.
    pub fn schedule(&self, block: BlockId) -> Vec<Step<'_>> {
        let synthetic = &self.blocks[block].synthetic;
        let mut steps = Vec::new();
        let mut next = 0;

        for node in self.block_nodes(block) {
            let pos = self.nodes[node].pos;
            while next < synthetic.len() && synthetic[next].0 <= Gap::Before(pos) {
                steps.push(Step::Synthetic(&synthetic[next].1));
                next += 1;
            }
            steps.push(Step::Node(node));
            while next < synthetic.len() && synthetic[next].0 <= Gap::After(pos) {
                steps.push(Step::Synthetic(&synthetic[next].1));
                next += 1;
            }
        }
        steps.extend(synthetic[next..].iter().map(|(_, inst)| Step::Synthetic(inst)));
        steps
    }
}

// =============================================================================
// Dump
// =============================================================================

impl fmt::Display for TreeIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, block) in self.blocks.iter() {
            write!(f, "bb{}", id.index())?;
            if let Some(label) = block.label {
                write!(f, " ({})", label)?;
            }
            let preds: Vec<String> = block
                .predecessors
                .iter()
                .map(|p| format!("bb{}", p.index()))
                .collect();
            writeln!(f, ": preds [{}]", preds.join(", "))?;

            let mut indent = 2;
            for step in self.schedule(id) {
                match step {
                    Step::Node(node_id) => {
                        let node = &self.nodes[node_id];
                        indent = 2 + 2 * self.depth(node_id);
                        write!(f, "{:indent$}[{}] {}", "", node.pos, node.op)?;
                        if let Some(loc) = node.location {
                            write!(f, " @ {}", loc)?;
                        }
                        writeln!(f)?;
                    }
                    Step::Synthetic(inst) => writeln!(f, "{:indent$}{}", "", inst)?,
                }
            }

            for edge in &block.successors {
                writeln!(f, "  -> bb{}", edge.target.index())?;
                for inst in &edge.moves {
                    writeln!(f, "     {}", inst)?;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::{BinaryOp, LocalId};
    use crate::regalloc::spill::SpillSlot;
    use crate::regalloc::{Location, PReg, ValueId};
    use indoc::indoc;

    /// bb0: l0 = 7; jmp bb1
    /// bb1: ret l0 + 1
    fn two_blocks() -> TreeIr {
        let mut ir = TreeIr::new(0, 1);
        let bb0 = ir.add_block(None);
        let bb1 = ir.add_block(Some(Label(0)));

        let c = ir.add_node(Operator::Const(7), &[]);
        let st = ir.add_node(Operator::StLocal(LocalId(0)), &[c]);
        ir.append_statement(bb0, st);
        let jmp = ir.add_node(Operator::Jmp(bb1), &[]);
        ir.append_statement(bb0, jmp);

        let ld = ir.add_node(Operator::LdLocal(LocalId(0)), &[]);
        let one = ir.add_node(Operator::Const(1), &[]);
        let add = ir.add_node(Operator::Binary(BinaryOp::Add), &[ld, one]);
        let ret = ir.add_node(Operator::Ret, &[add]);
        ir.append_statement(bb1, ret);

        ir.recompute_edges();
        ir.reindex();
        ir
    }

    #[test]
    fn test_reindex_positions() {
        let ir = two_blocks();
        let bb0 = ir.block(BlockId::new(0));
        let bb1 = ir.block(BlockId::new(1));

        assert_eq!((bb0.start, bb0.end), (ProgPoint::new(0), ProgPoint::new(2)));
        assert_eq!((bb1.start, bb1.end), (ProgPoint::new(3), ProgPoint::new(6)));
        assert_eq!(ir.position_count(), 7);
        assert_eq!(ir.block_at(ProgPoint::new(4)), Some(BlockId::new(1)));
        assert_eq!(ir.block_at(ProgPoint::new(9)), None);

        let ret = ir.node_at(ProgPoint::new(6)).unwrap();
        assert_eq!(ir.node(ret).op, Operator::Ret);
        assert!(ir.node(ret).parent.is_none());
    }

    #[test]
    fn test_edges() {
        let ir = two_blocks();
        let bb0 = ir.block(BlockId::new(0));
        let bb1 = ir.block(BlockId::new(1));

        assert_eq!(bb0.successor_ids().collect::<Vec<_>>(), vec![BlockId::new(1)]);
        assert_eq!(bb1.predecessors.as_slice(), &[BlockId::new(0)]);
        assert!(bb1.successors.is_empty());
    }

    #[test]
    fn test_schedule_merges_gaps() {
        let mut ir = two_blocks();
        let v = ValueId::new(0);
        let reg = Location::Reg(PReg::new(0));
        let slot = Location::Slot(SpillSlot::new(0));
        let reload = SyntheticInst::transfer(v, slot, reg);
        let store = SyntheticInst::transfer(v, reg, slot);

        let bb1 = BlockId::new(1);
        ir.block_mut(bb1)
            .insert_synthetic(Gap::Before(ProgPoint::new(5)), reload);
        ir.block_mut(bb1)
            .insert_synthetic(Gap::After(ProgPoint::new(3)), store);

        let steps = ir.schedule(bb1);
        let ld = ir.node_at(ProgPoint::new(3)).unwrap();
        let one = ir.node_at(ProgPoint::new(4)).unwrap();
        let add = ir.node_at(ProgPoint::new(5)).unwrap();
        let ret = ir.node_at(ProgPoint::new(6)).unwrap();

        assert_eq!(
            steps,
            vec![
                Step::Node(ld),
                Step::Synthetic(&store),
                Step::Node(one),
                Step::Synthetic(&reload),
                Step::Node(add),
                Step::Node(ret),
            ]
        );
    }

    #[test]
    fn test_dump() {
        let ir = two_blocks();
        let expected = indoc! {"
            bb0: preds []
                [0] const 7
              [1] stloc l0
              [2] jmp bb1
              -> bb1
            bb1 (L0): preds [bb0]
                  [3] ldloc l0
                  [4] const 1
                [5] add
              [6] ret
        "};
        assert_eq!(ir.to_string(), expected);
    }
}
