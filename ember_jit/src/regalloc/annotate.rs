//! Annotation
//!
//! Writes the allocation back onto the IR: every value-producing or
//! referencing node gets the location of its value, block-local spill code is
//! spliced into its blocks, and edge transfers are attached to their edges.

use super::interval::LiveInterval;
use super::lifetime::Binding;
use super::resolve::EdgeMoves;
use super::spill::SpillCode;
use super::{AllocatorStats, Location, ValueId};
use crate::ir::arena::SecondaryMap;
use crate::ir::cfg::TreeIr;
use crate::ir::node::{Node, NodeId};
use crate::ir::position::ProgPoint;

/// A compilation unit after register allocation.
#[derive(Debug, Clone)]
pub struct AllocatedUnit {
    /// The annotated IR.
    pub ir: TreeIr,
    /// Final intervals, indexed by value id.
    pub intervals: Vec<LiveInterval>,
    pub stats: AllocatorStats,
}

impl AllocatedUnit {
    /// Number of spill slots created for values.
    #[inline]
    pub fn spill_count(&self) -> usize {
        self.stats.num_spilled
    }

    #[inline]
    pub fn interval(&self, value: ValueId) -> &LiveInterval {
        &self.intervals[value.as_usize()]
    }

    /// Location of `value` at `pos`.
    pub fn location_at(&self, value: ValueId, pos: ProgPoint) -> Option<Location> {
        self.interval(value).location_at(pos)
    }

    /// Location annotated on `node`.
    #[inline]
    pub fn location_of(&self, node: NodeId) -> Option<Location> {
        self.ir.node(node).location
    }
}

/// Apply an allocation to `ir`.
pub fn annotate(
    mut ir: TreeIr,
    intervals: Vec<LiveInterval>,
    bindings: &SecondaryMap<Node, Option<Binding>>,
    spill_code: SpillCode,
    edge_moves: Vec<EdgeMoves>,
    stats: AllocatorStats,
) -> AllocatedUnit {
    for (node, binding) in bindings.iter() {
        if let Some(Binding { value, at }) = *binding {
            ir.node_mut(node).location = intervals[value.as_usize()].location_at(at);
        }
    }

    for &(block, gap, inst) in spill_code.entries() {
        ir.block_mut(block).insert_synthetic(gap, inst);
    }

    for EdgeMoves {
        block,
        successor,
        moves,
    } in edge_moves
    {
        ir.block_mut(block).successors[successor].moves = moves;
    }

    AllocatedUnit {
        ir,
        intervals,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::builder::TreeBuilder;
    use crate::ir::cfg::Step;
    use crate::ir::position::{Gap, ProgPoint};
    use crate::ir::stack::{StackFunction, StackInstruction as S};
    use crate::regalloc::spill::SyntheticKind;
    use crate::regalloc::{AllocatorConfig, Location, PReg, RegisterAllocator};

    #[test]
    fn test_spill_code_is_spliced_in_order() {
        let func = StackFunction::new(
            0,
            0,
            vec![
                S::Push(1),
                S::Push(2),
                S::Add,
                S::Push(3),
                S::Push(4),
                S::Add,
                S::Add,
                S::Ret,
            ],
        );
        let ir = TreeBuilder::new(&func).build().unwrap();
        let unit = RegisterAllocator::new(AllocatorConfig::default().with_registers(2))
            .allocate(ir)
            .unwrap();

        let entry = unit.ir.entry();
        let block = unit.ir.block(entry);
        assert_eq!(block.synthetic.len(), 2);
        assert!(matches!(block.synthetic[0].0, Gap::After(p) if p.index() == 2));
        assert!(matches!(block.synthetic[1].0, Gap::Before(p) if p.index() == 6));

        let kinds: Vec<_> = unit
            .ir
            .schedule(entry)
            .into_iter()
            .filter_map(|step| match step {
                Step::Synthetic(inst) => Some(inst.kind),
                Step::Node(_) => None,
            })
            .collect();
        assert_eq!(kinds, vec![SyntheticKind::Store, SyntheticKind::Reload]);
    }

    #[test]
    fn test_nodes_carry_locations() {
        let func = StackFunction::new(0, 0, vec![S::Push(1), S::Push(2), S::Add, S::Ret]);
        let ir = TreeBuilder::new(&func).build().unwrap();
        let unit = RegisterAllocator::default().allocate(ir).unwrap();

        for &id in unit.ir.execution_order() {
            let node = unit.ir.node(id);
            if node.op.produces_value() {
                assert!(unit.location_of(id).is_some_and(|l| l.is_reg()));
            } else {
                assert_eq!(unit.location_of(id), None);
            }
        }
        let sum = unit.ir.node_at(ProgPoint::new(2)).unwrap();
        assert_eq!(unit.location_of(sum), Some(Location::Reg(PReg::new(0))));
    }
}
