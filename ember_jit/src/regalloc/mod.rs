//! Register Allocation Module
//!
//! Linear scan allocation over the tree IR.
//!
//! # Architecture
//!
//! - `lifetime.rs`: Value numbering, use positions and cross-block liveness
//! - `interval.rs`: Live interval representation and manipulation
//! - `linear_scan.rs`: Linear scan allocator with operand reuse and splitting
//! - `spill.rs`: Spill slots and synthetic move/store/reload instructions
//! - `resolve.rs`: Location fix-up on control-flow edges
//! - `annotate.rs`: Writes locations and spill code back onto the IR
//!
//! # Usage
//!
//! ```ignore
//! let allocator = RegisterAllocator::new(AllocatorConfig::default());
//! let unit = allocator.allocate(ir)?;
//! println!("{} spills", unit.spill_count());
//! ```

pub mod annotate;
pub mod interval;
pub mod lifetime;
pub mod linear_scan;
pub mod resolve;
pub mod spill;

use crate::error::{ConfigError, Result};
use crate::ir::cfg::TreeIr;
use crate::ir::operators::OpKind;
use log::debug;
use rustc_hash::FxHashSet;

// Re-export key types
pub use annotate::AllocatedUnit;
pub use interval::{LiveInterval, LiveRange, UseKind, UsePosition, ValueKind};
pub use lifetime::{LifetimeBuilder, Lifetimes};
pub use linear_scan::LinearScanAllocator;
pub use spill::{SpillCode, SpillSlot, SyntheticInst, SyntheticKind};

// =============================================================================
// Value
// =============================================================================

/// An allocatable value: a local, a shared temp, or a node result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        ValueId(index)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =============================================================================
// Physical Register
// =============================================================================

/// A physical register of the single allocatable class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PReg(u8);

impl PReg {
    /// Largest supported register file.
    pub const MAX_REGISTERS: usize = u8::MAX as usize + 1;

    #[inline]
    pub const fn new(index: u8) -> Self {
        PReg(index)
    }

    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for PReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

// =============================================================================
// Location
// =============================================================================

/// Where a value lives at some position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Reg(PReg),
    Slot(SpillSlot),
}

impl Location {
    #[inline]
    pub fn is_reg(self) -> bool {
        matches!(self, Location::Reg(_))
    }

    #[inline]
    pub fn reg(self) -> Option<PReg> {
        match self {
            Location::Reg(r) => Some(r),
            Location::Slot(_) => None,
        }
    }

    #[inline]
    pub fn slot(self) -> Option<SpillSlot> {
        match self {
            Location::Reg(_) => None,
            Location::Slot(s) => Some(s),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Reg(r) => write!(f, "{}", r),
            Location::Slot(s) => write!(f, "{}", s),
        }
    }
}

// =============================================================================
// Allocator Configuration
// =============================================================================

/// Order in which blocks are laid out and scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockOrder {
    /// Blocks as they appear in the source program.
    #[default]
    Source,
}

/// Configuration for the register allocator.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Number of allocatable registers (K).
    pub num_registers: usize,
    /// Let a definition take the register of an operand that dies at it.
    pub allow_operand_reuse: bool,
    /// Operations whose result may be written into an operand register.
    pub reuse_eligible: FxHashSet<OpKind>,
    pub block_order: BlockOrder,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            num_registers: 4,
            allow_operand_reuse: true,
            reuse_eligible: [
                OpKind::Add,
                OpKind::Sub,
                OpKind::Mul,
                OpKind::Eq,
                OpKind::StLocal,
                OpKind::DefTemp,
            ]
            .into_iter()
            .collect(),
            block_order: BlockOrder::Source,
        }
    }
}

impl AllocatorConfig {
    pub fn with_registers(mut self, num_registers: usize) -> Self {
        self.num_registers = num_registers;
        self
    }

    pub fn with_operand_reuse(mut self, allow: bool) -> Self {
        self.allow_operand_reuse = allow;
        self
    }

    pub fn with_reuse_eligible(mut self, kinds: impl IntoIterator<Item = OpKind>) -> Self {
        self.reuse_eligible = kinds.into_iter().collect();
        self
    }

    /// Reject configurations the allocator cannot run with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.num_registers == 0 {
            return Err(ConfigError::NoRegisters);
        }
        if self.num_registers > PReg::MAX_REGISTERS {
            return Err(ConfigError::TooManyRegisters {
                requested: self.num_registers,
                max: PReg::MAX_REGISTERS,
            });
        }
        Ok(())
    }

    /// Check whether a definition by `kind` may reuse an operand register.
    #[inline]
    pub fn is_reuse_eligible(&self, kind: OpKind) -> bool {
        self.allow_operand_reuse && self.reuse_eligible.contains(&kind)
    }
}

// =============================================================================
// Allocation Statistics
// =============================================================================

/// Statistics from register allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Number of values, including ones never used.
    pub num_values: usize,
    /// Number of values holding a register somewhere.
    pub num_allocated: usize,
    /// Number of spill slots created for values.
    pub num_spilled: usize,
    pub num_reloads: usize,
    pub num_stores: usize,
    /// Number of definitions that took an operand's register.
    pub num_reused: usize,
    /// Number of split children created.
    pub num_splits: usize,
    /// Instructions placed on control-flow edges.
    pub num_edge_moves: usize,
    /// Total slots in the frame, scratch included.
    pub num_spill_slots: usize,
}

impl std::fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} values, {} in registers, {} spilled, {} reused, {} splits, \
             {} stores, {} reloads, {} edge moves, {} slots",
            self.num_values,
            self.num_allocated,
            self.num_spilled,
            self.num_reused,
            self.num_splits,
            self.num_stores,
            self.num_reloads,
            self.num_edge_moves,
            self.num_spill_slots
        )
    }
}

// =============================================================================
// Register Allocator
// =============================================================================

/// Runs lifetime analysis, linear scan, edge resolution and annotation.
#[derive(Debug, Clone, Default)]
pub struct RegisterAllocator {
    config: AllocatorConfig,
}

impl RegisterAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        RegisterAllocator { config }
    }

    #[inline]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocate every value of `ir`, consuming it and returning it annotated.
    pub fn allocate(&self, ir: TreeIr) -> Result<AllocatedUnit> {
        self.config.validate()?;

        let Lifetimes {
            intervals,
            live_in,
            bindings,
            ..
        } = LifetimeBuilder::new(&ir).build()?;

        let scan = LinearScanAllocator::new(&self.config, &ir, intervals).run();
        let mut slots = scan.slots;
        let mut stats = scan.stats;

        let edge_moves = resolve::resolve_edges(&ir, &scan.intervals, &live_in, &mut slots);
        stats.num_edge_moves = edge_moves.iter().map(|e| e.moves.len()).sum();
        stats.num_stores += edge_moves.iter().map(|e| e.count(SyntheticKind::Store)).sum::<usize>();
        stats.num_reloads += edge_moves.iter().map(|e| e.count(SyntheticKind::Reload)).sum::<usize>();
        stats.num_spill_slots = slots.count() as usize;

        debug!("register allocation: {}", stats);
        Ok(annotate::annotate(
            ir,
            scan.intervals,
            &bindings,
            scan.spill_code,
            edge_moves,
            stats,
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;
    use crate::ir::builder::TreeBuilder;
    use crate::ir::operators::LocalId;
    use crate::ir::stack::{StackFunction, StackInstruction as S};

    #[test]
    fn test_default_config() {
        let config = AllocatorConfig::default();
        assert_eq!(config.num_registers, 4);
        assert_eq!(config.block_order, BlockOrder::Source);
        assert!(config.is_reuse_eligible(OpKind::Add));
        assert!(config.is_reuse_eligible(OpKind::StLocal));
        assert!(!config.is_reuse_eligible(OpKind::Div));
        assert!(!config.is_reuse_eligible(OpKind::Const));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_config_setters() {
        let config = AllocatorConfig::default()
            .with_registers(2)
            .with_reuse_eligible([OpKind::Div]);
        assert_eq!(config.num_registers, 2);
        assert!(config.is_reuse_eligible(OpKind::Div));
        assert!(!config.is_reuse_eligible(OpKind::Add));

        let config = config.with_operand_reuse(false);
        assert!(!config.is_reuse_eligible(OpKind::Div));
    }

    #[test]
    fn test_config_validation() {
        let config = AllocatorConfig::default().with_registers(0);
        assert_eq!(config.validate(), Err(ConfigError::NoRegisters));

        let config = AllocatorConfig::default().with_registers(300);
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyRegisters {
                requested: 300,
                max: 256
            })
        );
        assert_eq!(AllocatorConfig::default().with_registers(256).validate(), Ok(()));
    }

    #[test]
    fn test_location_accessors() {
        let reg = Location::Reg(PReg::new(3));
        let slot = Location::Slot(SpillSlot::new(1));
        assert!(reg.is_reg());
        assert!(!slot.is_reg());
        assert_eq!(reg.reg(), Some(PReg::new(3)));
        assert_eq!(slot.slot(), Some(SpillSlot::new(1)));
        assert_eq!(reg.to_string(), "r3");
        assert_eq!(slot.to_string(), "s1");
        assert_eq!(ValueId::new(7).to_string(), "v7");
    }

    #[test]
    fn test_allocate_rejects_zero_registers() {
        let func = StackFunction::new(0, 0, vec![S::Push(1), S::Ret]);
        let ir = TreeBuilder::new(&func).build().unwrap();
        let allocator = RegisterAllocator::new(AllocatorConfig::default().with_registers(0));
        let err = allocator.allocate(ir).unwrap_err();
        assert_eq!(err, CompileError::Config(ConfigError::NoRegisters));
    }

    #[test]
    fn test_allocate_reports_use_before_def() {
        let func = StackFunction::new(0, 1, vec![S::LdLocal(LocalId(0)), S::Ret]);
        let ir = TreeBuilder::new(&func).build().unwrap();
        let err = RegisterAllocator::default().allocate(ir).unwrap_err();
        assert!(matches!(err, CompileError::Lifetime(_)));
    }

    #[test]
    fn test_stats_display() {
        let func = StackFunction::new(0, 0, vec![S::Push(1), S::Push(2), S::Add, S::Ret]);
        let ir = TreeBuilder::new(&func).build().unwrap();
        let unit = RegisterAllocator::default().allocate(ir).unwrap();
        assert_eq!(unit.stats.num_values, 3);
        assert_eq!(unit.spill_count(), 0);
        assert_eq!(
            unit.stats.to_string(),
            "3 values, 3 in registers, 0 spilled, 1 reused, 0 splits, \
             0 stores, 0 reloads, 0 edge moves, 0 slots"
        );
    }
}
