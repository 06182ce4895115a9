//! Linear Scan Register Allocator
//!
//! Allocation over closed intervals with operand reuse and spill-driven
//! interval splitting.
//!
//! # Algorithm Overview
//!
//! 1. Queue intervals by (start, start kind, value id); continuing starts
//!    (live-in values and resumed split children) go before fresh
//!    definitions at the same position
//! 2. At each start, expire active intervals that ended before it
//! 3. A fresh definition of a reuse-eligible operation takes the register of
//!    an operand whose interval ends exactly here
//! 4. Otherwise take the lowest free register
//! 5. With no free register, evict the active interval whose next use is
//!    furthest away if that is beyond our own next read; else spill the
//!    current interval at birth
//!
//! An evicted interval keeps its register up to the position before the
//! eviction, moves to a fresh spill slot, and is re-queued at its next use,
//! where it is reloaded into whatever register it gets.
//!
//! # References
//!
//! - Poletto & Sarkar, "Linear Scan Register Allocation" (1999)
//! - Wimmer & Franz, "Linear Scan Register Allocation on SSA Form" (2010)

use super::interval::{LiveInterval, LiveRange, SubInterval};
use super::spill::{SpillCode, SpillSlot, SpillSlotPool, SyntheticInst};
use super::{AllocatorConfig, AllocatorStats, Location, PReg, ValueId};
use crate::ir::arena::BitSet;
use crate::ir::cfg::{BlockId, TreeIr};
use crate::ir::position::{Gap, ProgPoint};
use log::{debug, trace};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

// =============================================================================
// Work Queue
// =============================================================================

/// Live-in starts and resumed children.
const RANK_CONTINUE: u8 = 0;
/// Starts at the value's own definition.
const RANK_FRESH_DEF: u8 = 1;

/// An interval (or split child) waiting to be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Pending {
    start: ProgPoint,
    rank: u8,
    value: ValueId,
    /// Set for split children, which come back from a spill slot.
    resume: bool,
}

/// Allocation state of one value.
#[derive(Debug, Clone, Copy)]
struct ValueState {
    /// Register currently holding the value.
    reg: Option<PReg>,
    /// First position of the current register segment.
    seg_start: ProgPoint,
    /// Slot holding the value and the first position of that segment.
    spilled: Option<(SpillSlot, ProgPoint)>,
}

impl ValueState {
    const UNALLOCATED: ValueState = ValueState {
        reg: None,
        seg_start: ProgPoint::INVALID,
        spilled: None,
    };
}

/// Output of the scan.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Intervals with their sub-intervals filled in.
    pub intervals: Vec<LiveInterval>,
    /// Stores and reloads inside blocks.
    pub spill_code: SpillCode,
    /// Slots handed out so far.
    pub slots: SpillSlotPool,
    pub stats: AllocatorStats,
}

// =============================================================================
// Linear Scan Allocator
// =============================================================================

/// The linear scan register allocator.
pub struct LinearScanAllocator<'a> {
    config: &'a AllocatorConfig,
    /// Block containing each position.
    block_of: Vec<BlockId>,
    /// Positions that start a block.
    block_starts: BitSet,

    intervals: Vec<LiveInterval>,
    states: Vec<ValueState>,
    unhandled: BinaryHeap<Reverse<Pending>>,
    /// Intervals holding a register, sorted by (end, value).
    active: Vec<(ProgPoint, ValueId)>,
    /// Current occupant of each register.
    registers: Vec<Option<ValueId>>,
    free: BitSet,

    slots: SpillSlotPool,
    spill_code: SpillCode,
    stats: AllocatorStats,
}

impl<'a> LinearScanAllocator<'a> {
    /// Create a new allocator for the intervals of `ir`.
    pub fn new(config: &'a AllocatorConfig, ir: &TreeIr, intervals: Vec<LiveInterval>) -> Self {
        let mut block_of = vec![ir.entry(); ir.position_count() as usize];
        let mut block_starts = BitSet::with_capacity(block_of.len());
        for (id, block) in ir.blocks() {
            if !block.start.is_valid() {
                continue;
            }
            block_starts.insert(block.start.as_usize());
            for pos in block.start.as_usize()..=block.end.as_usize() {
                block_of[pos] = id;
            }
        }

        let k = config.num_registers;
        LinearScanAllocator {
            config,
            block_of,
            block_starts,
            states: vec![ValueState::UNALLOCATED; intervals.len()],
            intervals,
            unhandled: BinaryHeap::new(),
            active: Vec::new(),
            registers: vec![None; k],
            free: BitSet::filled(k),
            slots: SpillSlotPool::new(),
            spill_code: SpillCode::new(),
            stats: AllocatorStats::default(),
        }
    }

    /// Allocate every interval.
    pub fn run(mut self) -> ScanResult {
        for interval in &self.intervals {
            if interval.is_empty() {
                continue;
            }
            let rank = if interval.starts_with_def() {
                RANK_FRESH_DEF
            } else {
                RANK_CONTINUE
            };
            self.unhandled.push(Reverse(Pending {
                start: interval.start(),
                rank,
                value: interval.value,
                resume: false,
            }));
        }
        debug!(
            "linear scan: {} intervals, {} registers",
            self.unhandled.len(),
            self.config.num_registers
        );

        while let Some(Reverse(current)) = self.unhandled.pop() {
            self.expire(current.start);

            if current.rank == RANK_FRESH_DEF {
                if let Some(reg) = self.try_reuse(current) {
                    self.assign(current, reg);
                    continue;
                }
            }

            if let Some(reg) = self.free.first() {
                self.assign(current, PReg::new(reg as u8));
                continue;
            }

            self.spill_or_evict(current);
        }

        self.finish()
    }

    // =========================================================================
    // Scan Steps
    // =========================================================================

    /// Release every active interval that ends before `pos`.
    fn expire(&mut self, pos: ProgPoint) {
        while let Some(&(end, value)) = self.active.first() {
            if end >= pos {
                break;
            }
            self.active.remove(0);
            trace!("  expire {} at {}", value, pos);
            self.release(value, end);
        }
    }

    /// Take the register of an operand whose last use is this definition.
    fn try_reuse(&mut self, current: Pending) -> Option<PReg> {
        let interval = &self.intervals[current.value.as_usize()];
        let eligible = interval
            .def_op
            .is_some_and(|kind| self.config.is_reuse_eligible(kind));
        if !eligible {
            return None;
        }

        let operands = interval.operands.clone();
        let mut reused: Option<(ValueId, PReg)> = None;
        for operand in operands {
            if operand == current.value {
                continue;
            }
            let Some(reg) = self.states[operand.as_usize()].reg else {
                continue;
            };
            if self.intervals[operand.as_usize()].end() != current.start {
                continue;
            }
            self.active.retain(|&(_, v)| v != operand);
            self.release(operand, current.start);
            if reused.is_none() {
                reused = Some((operand, reg));
            }
        }

        let (operand, reg) = reused?;
        trace!("  {} reuses {} of {}", current.value, reg, operand);
        self.intervals[current.value.as_usize()].reused_from = Some(operand);
        self.stats.num_reused += 1;
        Some(reg)
    }

    /// Give `reg` to the pending interval.
    fn assign(&mut self, current: Pending, reg: PReg) {
        let value = current.value;
        let pos = current.start;
        self.free.remove(reg.as_usize());
        self.registers[reg.as_usize()] = Some(value);

        let state = &mut self.states[value.as_usize()];
        state.reg = Some(reg);
        state.seg_start = pos;
        if let Some((slot, from)) = state.spilled.take() {
            self.push_segment(value, from, pos.prev(), Location::Slot(slot));

            let reads_here = self.intervals[value.as_usize()]
                .next_use_at_or_after(pos)
                .is_some_and(|u| u.pos == pos && u.kind.reads());
            if current.resume && reads_here && !self.is_block_start(pos) {
                self.spill_code.push(
                    self.block_of[pos.as_usize()],
                    Gap::Before(pos),
                    SyntheticInst::transfer(value, Location::Slot(slot), Location::Reg(reg)),
                );
            }
        }

        let end = self.intervals[value.as_usize()].end();
        let index = self.active.partition_point(|&entry| entry < (end, value));
        self.active.insert(index, (end, value));
        trace!("  assign {} -> {} at {}", value, reg, pos);
    }

    /// No register is free: evict the interval used furthest away, or spill
    /// the current one.
    fn spill_or_evict(&mut self, current: Pending) {
        let pos = current.start;
        let own_next = self.intervals[current.value.as_usize()]
            .next_read_at_or_after(pos)
            .map_or(u32::MAX, |u| u.pos.index());

        let mut victim: Option<(u32, ValueId)> = None;
        for &(_, value) in &self.active {
            let next = self.intervals[value.as_usize()]
                .next_use_at_or_after(pos)
                .map_or(u32::MAX, |u| u.pos.index());
            if victim.is_none_or(|(best, _)| next > best) {
                victim = Some((next, value));
            }
        }

        match victim {
            Some((next, value)) if next > own_next => {
                let reg = self.evict(value, pos);
                self.assign(current, reg);
            }
            _ => self.spill_at_birth(current),
        }
    }

    /// Move an active interval to a fresh slot from `pos` on.
    fn evict(&mut self, value: ValueId, pos: ProgPoint) -> PReg {
        let ValueState { reg, seg_start, .. } = self.states[value.as_usize()];
        let Some(reg) = reg else {
            unreachable!("evicting {} which holds no register", value);
        };

        if seg_start < pos {
            self.push_segment(value, seg_start, pos.prev(), Location::Reg(reg));
        }
        self.active.retain(|&(_, v)| v != value);
        self.registers[reg.as_usize()] = None;

        let slot = self.slots.alloc();
        self.stats.num_spilled += 1;
        let state = &mut self.states[value.as_usize()];
        state.reg = None;
        state.spilled = Some((slot, pos));

        if !self.is_block_start(pos) {
            let interval = &self.intervals[value.as_usize()];
            let last = interval
                .last_use_before(pos)
                .map(|u| u.pos)
                .filter(|&q| q >= seg_start);
            let gap = match last {
                Some(q) if self.block_of[q.as_usize()] == self.block_of[pos.as_usize()] => {
                    Gap::After(q)
                }
                _ => Gap::Before(pos),
            };
            self.spill_code.push(
                self.block_of[pos.as_usize()],
                gap,
                SyntheticInst::transfer(value, Location::Reg(reg), Location::Slot(slot)),
            );
        }

        debug!("spill {} from {} to {} at {}", value, reg, slot, pos);
        self.requeue(value, pos);
        reg
    }

    /// Keep the current interval in memory.
    fn spill_at_birth(&mut self, current: Pending) {
        let value = current.value;
        if self.states[value.as_usize()].spilled.is_none() {
            let slot = self.slots.alloc();
            self.stats.num_spilled += 1;
            self.states[value.as_usize()].spilled = Some((slot, current.start));
            debug!("spill {} at birth to {} at {}", value, slot, current.start);
        } else {
            trace!("  {} stays in memory at {}", value, current.start);
        }
        self.requeue(value, current.start.next());
    }

    /// Queue a split child at the next use at or after `from`.
    fn requeue(&mut self, value: ValueId, from: ProgPoint) {
        let next = self.intervals[value.as_usize()]
            .next_use_at_or_after(from)
            .map(|u| u.pos);
        if let Some(start) = next {
            self.stats.num_splits += 1;
            self.unhandled.push(Reverse(Pending {
                start,
                rank: RANK_CONTINUE,
                value,
                resume: true,
            }));
        }
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Close the register segment of `value` at `end` and free the register.
    fn release(&mut self, value: ValueId, end: ProgPoint) {
        let state = &mut self.states[value.as_usize()];
        let Some(reg) = state.reg.take() else {
            return;
        };
        let seg_start = state.seg_start;
        self.push_segment(value, seg_start, end, Location::Reg(reg));
        self.registers[reg.as_usize()] = None;
        self.free.insert(reg.as_usize());
    }

    fn push_segment(&mut self, value: ValueId, start: ProgPoint, end: ProgPoint, location: Location) {
        self.intervals[value.as_usize()].sub_intervals.push(SubInterval {
            range: LiveRange::new(start, end),
            location,
        });
    }

    #[inline]
    fn is_block_start(&self, pos: ProgPoint) -> bool {
        self.block_starts.contains(pos.as_usize())
    }

    fn finish(mut self) -> ScanResult {
        for (end, value) in std::mem::take(&mut self.active) {
            self.release(value, end);
        }
        for i in 0..self.states.len() {
            if let Some((slot, from)) = self.states[i].spilled.take() {
                let end = self.intervals[i].end();
                self.push_segment(ValueId::new(i as u32), from, end, Location::Slot(slot));
            }
        }

        for interval in &mut self.intervals {
            interval.sub_intervals.sort_by_key(|sub| sub.range.start);
        }

        self.stats.num_values = self.intervals.len();
        self.stats.num_allocated = self.intervals.iter().filter(|i| i.has_register()).count();
        self.stats.num_stores = self.spill_code.num_stores();
        self.stats.num_reloads = self.spill_code.num_reloads();
        self.stats.num_spill_slots = self.slots.count() as usize;

        ScanResult {
            intervals: self.intervals,
            spill_code: self.spill_code,
            slots: self.slots,
            stats: self.stats,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::TreeBuilder;
    use crate::ir::operators::{LocalId, OpKind};
    use crate::ir::stack::{StackFunction, StackInstruction as S};
    use crate::regalloc::lifetime::LifetimeBuilder;
    use crate::regalloc::spill::SyntheticKind;

    fn scan(config: &AllocatorConfig, insts: Vec<S>, locals: u32) -> ScanResult {
        let func = StackFunction::new(0, locals, insts);
        let ir = TreeBuilder::new(&func).build().unwrap();
        let lifetimes = LifetimeBuilder::new(&ir).build().unwrap();
        LinearScanAllocator::new(config, &ir, lifetimes.intervals).run()
    }

    fn abc_program() -> Vec<S> {
        vec![
            S::Push(1),
            S::StLocal(LocalId(0)),
            S::Push(2),
            S::StLocal(LocalId(1)),
            S::LdLocal(LocalId(0)),
            S::LdLocal(LocalId(1)),
            S::Add,
            S::StLocal(LocalId(2)),
            S::LdLocal(LocalId(2)),
            S::Ret,
        ]
    }

    fn nested_sums() -> Vec<S> {
        vec![
            S::Push(1),
            S::Push(2),
            S::Add,
            S::Push(3),
            S::Push(4),
            S::Add,
            S::Add,
            S::Ret,
        ]
    }

    fn reg(i: u8) -> Location {
        Location::Reg(PReg::new(i))
    }

    #[test]
    fn test_operand_reuse_chain() {
        let config = AllocatorConfig::default().with_registers(2);
        let result = scan(&config, abc_program(), 3);

        assert_eq!(result.stats.num_spilled, 0);
        let a = &result.intervals[0];
        let c = &result.intervals[2];
        let add = &result.intervals[5];

        assert_eq!(add.reused_from, Some(ValueId::new(0)));
        assert_eq!(c.reused_from, Some(ValueId::new(5)));
        assert_eq!(a.location_at(ProgPoint::new(6)), Some(reg(0)));
        assert_eq!(c.location_at(ProgPoint::new(9)), Some(reg(0)));
        assert_eq!(result.stats.num_reused, 4);
    }

    #[test]
    fn test_no_reuse_takes_fresh_register() {
        let config = AllocatorConfig::default()
            .with_registers(3)
            .with_operand_reuse(false);
        let result = scan(&config, abc_program(), 3);

        assert_eq!(result.stats.num_spilled, 0);
        assert_eq!(result.stats.num_reused, 0);
        let a = &result.intervals[0];
        let b = &result.intervals[1];
        let add = &result.intervals[5];
        let add_reg = add.location_at(ProgPoint::new(6));
        assert_ne!(add_reg, a.location_at(ProgPoint::new(6)));
        assert_ne!(add_reg, b.location_at(ProgPoint::new(6)));
    }

    #[test]
    fn test_furthest_use_is_evicted() {
        let config = AllocatorConfig::default().with_registers(2);
        let result = scan(&config, nested_sums(), 0);

        // v2 = 1 + 2 is not needed until the final add at 6.
        assert_eq!(result.stats.num_spilled, 1);
        let first_sum = &result.intervals[2];
        assert_eq!(first_sum.sub_intervals.len(), 3);
        assert!(matches!(
            first_sum.location_at(ProgPoint::new(4)),
            Some(Location::Slot(_))
        ));
        assert!(first_sum.location_at(ProgPoint::new(6)).is_some_and(|l| l.is_reg()));

        let entries = result.spill_code.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, Gap::After(ProgPoint::new(2)));
        assert_eq!(entries[0].2.kind, SyntheticKind::Store);
        assert_eq!(entries[1].1, Gap::Before(ProgPoint::new(6)));
        assert_eq!(entries[1].2.kind, SyntheticKind::Reload);
        assert_eq!(entries[1].2.value, ValueId::new(2));
    }

    #[test]
    fn test_division_does_not_reuse() {
        let config = AllocatorConfig::default().with_registers(3);
        assert!(!config.is_reuse_eligible(OpKind::Div));
        let result = scan(&config, vec![S::Push(8), S::Push(2), S::Div, S::Ret], 0);

        let quotient = &result.intervals[2];
        assert_eq!(quotient.reused_from, None);
        assert_eq!(quotient.location_at(ProgPoint::new(2)), Some(reg(2)));
    }

    #[test]
    fn test_single_register_spills_at_birth() {
        let config = AllocatorConfig::default().with_registers(1);
        let result = scan(&config, vec![S::Push(8), S::Push(2), S::Div, S::Ret], 0);

        // const 8 holds r0 through the div, so neither const 2 nor the
        // quotient can take it before position 3.
        let divisor = &result.intervals[1];
        let quotient = &result.intervals[2];
        assert!(!divisor.has_register());
        assert_eq!(result.stats.num_spilled, 2);
        assert_eq!(quotient.location_at(ProgPoint::new(3)), Some(reg(0)));
        assert_eq!(result.spill_code.num_reloads(), 1);
        for interval in &result.intervals {
            for u in interval.uses() {
                assert!(interval.location_at(u.pos).is_some());
            }
        }
    }
}
