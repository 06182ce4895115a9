//! Edge Resolution
//!
//! A value live across a control-flow edge may sit in different locations at
//! the end of the predecessor and the start of the successor: a split may
//! fall on a block boundary, or the successor may be a loop header whose
//! allocation was decided before the back-edge was scanned. Each such
//! mismatch becomes a transfer on the edge.
//!
//! All transfers of one edge happen at once, so they are ordered as a
//! parallel move:
//!
//! 1. Transfers into slots (stores and slot-to-slot moves). Every slot
//!    belongs to a single value, so no other transfer reads it.
//! 2. Register-to-register moves, each emitted once no remaining move still
//!    reads its destination. A cycle is broken by storing one value to a
//!    scratch slot and reloading it once its destination has been vacated.
//! 3. Reloads from slots into registers.

use super::interval::LiveInterval;
use super::spill::{SpillSlot, SpillSlotPool, SyntheticInst, SyntheticKind};
use super::{Location, PReg, ValueId};
use crate::ir::arena::BitSet;
use crate::ir::cfg::{BlockId, TreeIr};
use log::{debug, trace};

/// Transfers placed on one CFG edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMoves {
    /// Source block of the edge.
    pub block: BlockId,
    /// Index of the edge among the block's successors.
    pub successor: usize,
    pub moves: Vec<SyntheticInst>,
}

impl EdgeMoves {
    /// Count the transfers of one kind.
    pub fn count(&self, kind: SyntheticKind) -> usize {
        self.moves.iter().filter(|m| m.kind == kind).count()
    }
}

/// Compute the transfers needed on every edge of `ir`.
///
/// The scratch slot, if any cycle needs one, is taken from `slots` and shared
/// by all edges.
pub fn resolve_edges(
    ir: &TreeIr,
    intervals: &[LiveInterval],
    live_in: &[BitSet],
    slots: &mut SpillSlotPool,
) -> Vec<EdgeMoves> {
    let mut scratch = None;
    let mut result = Vec::new();

    for (id, block) in ir.blocks() {
        for (index, edge) in block.successors.iter().enumerate() {
            let target = ir.block(edge.target);
            let mut transfers = Vec::new();
            for value in live_in[edge.target.as_usize()].iter() {
                let interval = &intervals[value];
                let from = interval.location_at(block.end);
                let to = interval.location_at(target.start);
                if let (Some(from), Some(to)) = (from, to)
                    && from != to
                {
                    transfers.push(SyntheticInst::transfer(interval.value, from, to));
                }
            }
            if transfers.is_empty() {
                continue;
            }

            let moves = order_parallel_moves(transfers, &mut scratch, slots);
            trace!("  edge bb{} -> bb{}: {} moves", id.index(), edge.target.index(), moves.len());
            result.push(EdgeMoves {
                block: id,
                successor: index,
                moves,
            });
        }
    }

    debug!(
        "resolved {} edges with {} moves",
        result.len(),
        result.iter().map(|e| e.moves.len()).sum::<usize>()
    );
    result
}

/// Sequentialize transfers that conceptually happen at the same instant.
///
/// Each destination must be distinct, as must each source.
pub fn order_parallel_moves(
    transfers: Vec<SyntheticInst>,
    scratch: &mut Option<SpillSlot>,
    slots: &mut SpillSlotPool,
) -> Vec<SyntheticInst> {
    let mut ordered = Vec::with_capacity(transfers.len());
    let mut reg_moves: Vec<(ValueId, PReg, PReg)> = Vec::new();
    let mut reloads = Vec::new();

    for inst in transfers {
        match (inst.from, inst.to) {
            (_, Location::Slot(_)) => ordered.push(inst),
            (Location::Reg(from), Location::Reg(to)) => reg_moves.push((inst.value, from, to)),
            (Location::Slot(_), Location::Reg(_)) => reloads.push(inst),
        }
    }

    // Value stored to scratch and the register it must end up in.
    let mut parked: Option<(ValueId, PReg)> = None;
    while !reg_moves.is_empty() {
        let ready = reg_moves
            .iter()
            .position(|&(_, _, to)| !reg_moves.iter().any(|&(_, from, _)| from == to));

        match ready {
            Some(index) => {
                let (value, from, to) = reg_moves.remove(index);
                ordered.push(SyntheticInst::transfer(value, Location::Reg(from), Location::Reg(to)));
            }
            None => {
                debug_assert!(parked.is_none());
                let (value, from, to) = reg_moves.remove(0);
                let slot = *scratch.get_or_insert_with(|| slots.alloc());
                trace!("  break cycle through {} with {}", slot, value);
                ordered.push(SyntheticInst::transfer(value, Location::Reg(from), Location::Slot(slot)));
                parked = Some((value, to));
            }
        }

        if let Some((value, to)) = parked
            && !reg_moves.iter().any(|&(_, from, _)| from == to)
            && let Some(slot) = *scratch
        {
            ordered.push(SyntheticInst::transfer(value, Location::Slot(slot), Location::Reg(to)));
            parked = None;
        }
    }

    ordered.extend(reloads);
    ordered
}

// =============================================================================
// Tests
// =============================================================================
