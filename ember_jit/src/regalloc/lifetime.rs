//! Lifetime analysis.
//!
//! Numbers every allocatable value, records its concrete uses, and widens
//! each interval across block boundaries using backward liveness.
//!
//! # Value Numbering
//!
//! Value ids are dense: locals first, then temps, then one value per
//! `Const`/`Binary` node in execution order.
//!
//! # Reads and Writes
//!
//! A node reads the values bound to its children at its own position; reads
//! are recorded before the node's own write. Reference leaves (`LdLocal`,
//! `TempRef`) have no value of their own: they stand for the referenced value
//! at the parent's position.
//!
//! # Liveness
//!
//! Per-block `gen`/`kill` sets feed the usual backward equations
//! `live_in = gen | (live_out - kill)`, `live_out = union of successor
//! live_in`, iterated over the blocks in reverse order until nothing
//! changes, which handles loop back-edges.

use super::ValueId;
use super::interval::{LiveInterval, UsePosition, ValueKind};
use crate::error::LifetimeError;
use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::cfg::{BlockId, TreeIr};
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::{LocalId, Operator, TempId};
use crate::ir::position::ProgPoint;
use log::{debug, trace};
use smallvec::SmallVec;

// =============================================================================
// Binding
// =============================================================================

/// The value a node produces or references, and where it is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub value: ValueId,
    /// Position at which the node's location is read off the interval.
    pub at: ProgPoint,
}

// =============================================================================
// Lifetimes
// =============================================================================

/// Result of lifetime analysis.
#[derive(Debug, Clone)]
pub struct Lifetimes {
    /// One interval per value, indexed by value id.
    pub intervals: Vec<LiveInterval>,
    /// Values live on entry to each block.
    pub live_in: Vec<BitSet>,
    /// Values live on exit from each block.
    pub live_out: Vec<BitSet>,
    /// Value bound to each node.
    pub bindings: SecondaryMap<Node, Option<Binding>>,
}

impl Lifetimes {
    #[inline]
    pub fn interval(&self, value: ValueId) -> &LiveInterval {
        &self.intervals[value.as_usize()]
    }

    #[inline]
    pub fn binding(&self, node: NodeId) -> Option<Binding> {
        self.bindings.get(node).copied().flatten()
    }
}

// =============================================================================
// Lifetime Builder
// =============================================================================

/// Computes [`Lifetimes`] for a numbered [`TreeIr`].
pub struct LifetimeBuilder<'a> {
    ir: &'a TreeIr,
    intervals: Vec<LiveInterval>,
    bindings: SecondaryMap<Node, Option<Binding>>,
    gen_sets: Vec<BitSet>,
    kill_sets: Vec<BitSet>,
}

impl<'a> LifetimeBuilder<'a> {
    /// Create a builder. The IR must have been reindexed.
    pub fn new(ir: &'a TreeIr) -> Self {
        LifetimeBuilder {
            ir,
            intervals: Vec::new(),
            bindings: SecondaryMap::with_len(ir.num_nodes()),
            gen_sets: vec![BitSet::new(); ir.num_blocks()],
            kill_sets: vec![BitSet::new(); ir.num_blocks()],
        }
    }

    /// Run the analysis.
    pub fn build(mut self) -> Result<Lifetimes, LifetimeError> {
        self.number_values();
        self.bind_nodes();
        self.collect_uses()?;
        let (live_in, live_out) = self.solve_liveness();
        self.check_definitions(&live_in)?;
        self.widen(&live_in, &live_out);

        debug!(
            "built {} intervals ({} live) over {} blocks",
            self.intervals.len(),
            self.intervals.iter().filter(|i| !i.is_empty()).count(),
            self.ir.num_blocks()
        );
        for interval in &self.intervals {
            trace!("  {}", interval);
        }

        Ok(Lifetimes {
            intervals: self.intervals,
            live_in,
            live_out,
            bindings: self.bindings,
        })
    }

    #[inline]
    fn local_value(&self, local: LocalId) -> ValueId {
        ValueId::new(local.0)
    }

    #[inline]
    fn temp_value(&self, temp: TempId) -> ValueId {
        ValueId::new(self.ir.local_count() + temp.0)
    }

    fn number_values(&mut self) {
        for l in 0..self.ir.local_count() {
            let value = ValueId::new(l);
            self.intervals
                .push(LiveInterval::new(value, ValueKind::Local(LocalId(l))));
        }
        for t in 0..self.ir.temp_count() {
            let value = self.temp_value(TempId(t));
            self.intervals
                .push(LiveInterval::new(value, ValueKind::Temp(TempId(t))));
        }
        for &node in self.ir.execution_order() {
            if self.ir.node(node).op.produces_value() {
                let value = ValueId::new(self.intervals.len() as u32);
                self.intervals
                    .push(LiveInterval::new(value, ValueKind::Node(node)));
                self.bindings.set(
                    node,
                    Some(Binding {
                        value,
                        at: self.ir.node(node).pos,
                    }),
                );
            }
        }
    }

    fn bind_nodes(&mut self) {
        for &id in self.ir.execution_order() {
            let node = self.ir.node(id);
            let observed_at = node.parent.map_or(node.pos, |p| self.ir.node(p).pos);
            let binding = match node.op {
                Operator::LdLocal(local) => Some(Binding {
                    value: self.local_value(local),
                    at: observed_at,
                }),
                Operator::TempRef(temp) => Some(Binding {
                    value: self.temp_value(temp),
                    at: observed_at,
                }),
                Operator::StLocal(local) => Some(Binding {
                    value: self.local_value(local),
                    at: node.pos,
                }),
                Operator::DefTemp(temp) => Some(Binding {
                    value: self.temp_value(temp),
                    at: node.pos,
                }),
                _ => continue,
            };
            self.bindings.set(id, binding);
        }
    }

    /// The value written by a node, if any.
    fn written_value(&self, id: NodeId) -> Option<ValueId> {
        match self.ir.node(id).op {
            Operator::Const(_)
            | Operator::Binary(_)
            | Operator::StLocal(_)
            | Operator::DefTemp(_) => self.bindings[id].map(|b| b.value),
            _ => None,
        }
    }

    fn collect_uses(&mut self) -> Result<(), LifetimeError> {
        for block in self.ir.block_ids() {
            let b = block.as_usize();
            for id in self.ir.block_nodes(block) {
                let node = self.ir.node(id);
                let pos = node.pos;

                let mut reads: SmallVec<[ValueId; 2]> = SmallVec::new();
                for &child in &node.children {
                    if let Some(binding) = self.bindings[child] {
                        if !reads.contains(&binding.value) {
                            reads.push(binding.value);
                        }
                    }
                }
                for &value in &reads {
                    self.intervals[value.as_usize()].add_use(UsePosition::use_pos(pos));
                    if !self.kill_sets[b].contains(value.as_usize()) {
                        self.gen_sets[b].insert(value.as_usize());
                    }
                }

                let Some(value) = self.written_value(id) else {
                    continue;
                };
                let interval = &mut self.intervals[value.as_usize()];
                if let Operator::DefTemp(temp) = node.op {
                    if interval.def_node.is_some() {
                        return Err(LifetimeError::TempRedefined { temp });
                    }
                }
                interval.add_use(UsePosition::def(pos));
                if interval.def_node.is_none() {
                    interval.def_node = Some(id);
                    interval.def_op = Some(node.op.kind());
                    interval.operands = reads;
                }
                self.kill_sets[b].insert(value.as_usize());
            }
        }
        Ok(())
    }

    fn solve_liveness(&self) -> (Vec<BitSet>, Vec<BitSet>) {
        let num_blocks = self.ir.num_blocks();
        let num_values = self.intervals.len();
        let mut live_in = vec![BitSet::with_capacity(num_values); num_blocks];
        let mut live_out = vec![BitSet::with_capacity(num_values); num_blocks];

        let blocks: Vec<BlockId> = self.ir.block_ids().collect();
        let mut iterations = 0;
        let mut changed = true;
        while changed {
            changed = false;
            iterations += 1;
            for &block in blocks.iter().rev() {
                let b = block.as_usize();
                let mut out = BitSet::with_capacity(num_values);
                for succ in self.ir.block(block).successor_ids() {
                    out.union_with(&live_in[succ.as_usize()]);
                }

                let mut inn = out.clone();
                inn.subtract(&self.kill_sets[b]);
                inn.union_with(&self.gen_sets[b]);

                changed |= live_out[b].union_with(&out);
                changed |= live_in[b].union_with(&inn);
            }
        }

        debug!("liveness converged after {} iterations", iterations);
        (live_in, live_out)
    }

    /// Blocks reachable from the entry along successor edges.
    fn reachable_blocks(&self) -> BitSet {
        let entry = self.ir.entry();
        let mut reached = BitSet::with_capacity(self.ir.num_blocks());
        let mut worklist = vec![entry];
        reached.insert(entry.as_usize());
        while let Some(block) = worklist.pop() {
            for succ in self.ir.block(block).successor_ids() {
                if reached.insert(succ.as_usize()) {
                    worklist.push(succ);
                }
            }
        }
        reached
    }

    /// A value live into the entry is read on some path before any write.
    /// Unreachable blocks never execute and are not checked.
    fn check_definitions(&self, live_in: &[BitSet]) -> Result<(), LifetimeError> {
        let entry = self.ir.entry();
        let params = self.ir.param_count() as usize;

        if let Some(v) = live_in[entry.as_usize()].iter().find(|&v| v >= params) {
            return Err(self.use_before_def(ValueId::new(v as u32), entry));
        }

        let reachable = self.reachable_blocks();
        let unreachable = self.ir.num_blocks() - reachable.count();
        if unreachable > 0 {
            debug!("{} unreachable blocks skipped by definition checks", unreachable);
        }

        for interval in &self.intervals {
            let is_param = interval.value.as_usize() < params;
            if is_param || interval.def_position().is_some() {
                continue;
            }
            let read = interval.uses().iter().find_map(|u| {
                self.ir
                    .block_at(u.pos)
                    .filter(|b| reachable.contains(b.as_usize()))
            });
            if let Some(block) = read {
                return Err(self.use_before_def(interval.value, block));
            }
        }
        Ok(())
    }

    fn use_before_def(&self, value: ValueId, block: BlockId) -> LifetimeError {
        LifetimeError::UseBeforeDef {
            value,
            kind: self.intervals[value.as_usize()].kind,
            block,
        }
    }

    fn widen(&mut self, live_in: &[BitSet], live_out: &[BitSet]) {
        for (block, blk) in self.ir.blocks() {
            if !blk.start.is_valid() {
                continue;
            }
            let b = block.as_usize();
            for v in live_in[b].iter() {
                self.intervals[v].cover(blk.start);
            }
            for v in live_out[b].iter() {
                self.intervals[v].cover(blk.end);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
