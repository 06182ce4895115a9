//! Spill Code
//!
//! Spill slots and the synthetic instructions that move values between
//! registers and slots.
//!
//! # Design
//!
//! - Every spill event gets a fresh slot; slots are never recycled
//! - Block-local code is recorded against a [`Gap`] so it can be spliced in
//!   without renumbering; edge code lives on the CFG edge

use super::{Location, ValueId};
use crate::ir::cfg::BlockId;
use crate::ir::position::Gap;
use std::fmt;

// =============================================================================
// Spill Slot
// =============================================================================

/// A stack slot for storing spilled values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpillSlot(u32);

impl SpillSlot {
    /// Create a new spill slot.
    #[inline]
    pub const fn new(index: u32) -> Self {
        SpillSlot(index)
    }

    /// Get the slot index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SpillSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

// =============================================================================
// Spill Slot Pool
// =============================================================================

/// Unbounded slot allocator.
#[derive(Debug, Clone, Default)]
pub struct SpillSlotPool {
    next: u32,
}

impl SpillSlotPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        SpillSlotPool { next: 0 }
    }

    /// Hand out a slot that has never been used.
    pub fn alloc(&mut self) -> SpillSlot {
        let slot = SpillSlot::new(self.next);
        self.next += 1;
        slot
    }

    /// Number of slots handed out.
    pub fn count(&self) -> u32 {
        self.next
    }
}

// =============================================================================
// Synthetic Instructions
// =============================================================================

/// What a synthetic instruction does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntheticKind {
    /// Register to slot.
    Store,
    /// Slot to register.
    Reload,
    /// Register to register, or slot to slot.
    Move,
}

/// An instruction inserted by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntheticInst {
    pub kind: SyntheticKind,
    /// The value being transferred.
    pub value: ValueId,
    pub from: Location,
    pub to: Location,
}

impl SyntheticInst {
    /// Transfer `value` between two locations, classifying the kind from
    /// the endpoints.
    pub fn transfer(value: ValueId, from: Location, to: Location) -> Self {
        let kind = match (from, to) {
            (Location::Reg(_), Location::Slot(_)) => SyntheticKind::Store,
            (Location::Slot(_), Location::Reg(_)) => SyntheticKind::Reload,
            _ => SyntheticKind::Move,
        };
        SyntheticInst {
            kind,
            value,
            from,
            to,
        }
    }
}

impl fmt::Display for SyntheticInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kind {
            SyntheticKind::Store => "store",
            SyntheticKind::Reload => "reload",
            SyntheticKind::Move => "move",
        };
        write!(f, "{} {} {} -> {}", name, self.value, self.from, self.to)
    }
}

// =============================================================================
// Spill Code
// =============================================================================

/// Block-local spill code produced by the linear scan.
#[derive(Debug, Clone, Default)]
pub struct SpillCode {
    entries: Vec<(BlockId, Gap, SyntheticInst)>,
    num_stores: usize,
    num_reloads: usize,
}

impl SpillCode {
    /// Create a new empty spill code container.
    pub fn new() -> Self {
        SpillCode::default()
    }

    /// Record an instruction at `gap` inside `block`.
    pub fn push(&mut self, block: BlockId, gap: Gap, inst: SyntheticInst) {
        match inst.kind {
            SyntheticKind::Store => self.num_stores += 1,
            SyntheticKind::Reload => self.num_reloads += 1,
            SyntheticKind::Move => {}
        }
        self.entries.push((block, gap, inst));
    }

    /// All entries in the order they were recorded.
    pub fn entries(&self) -> &[(BlockId, Gap, SyntheticInst)] {
        &self.entries
    }

    /// Check if there is any spill code.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the number of stores.
    pub fn num_stores(&self) -> usize {
        self.num_stores
    }

    /// Get the number of reloads.
    pub fn num_reloads(&self) -> usize {
        self.num_reloads
    }
}

// =============================================================================
// Tests
// =============================================================================
