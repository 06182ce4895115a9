//! Tree IR and linear-scan register allocation for the Ember JIT.
//!
//! The backend lowers stack bytecode to per-block statement trees, computes
//! live intervals for every value, and assigns each value a register or a
//! spill slot:
//! - Stack bytecode to tree IR translation
//! - Cross-block liveness over a tree-order numbering
//! - Linear scan allocation with operand reuse and interval splitting
//! - Spill code and parallel-move edge resolution
//!
//! ```ignore
//! let func = StackFunction::new(0, 1, instructions);
//! let unit = ember_jit::compile(&func, &AllocatorConfig::default())?;
//! println!("{}", unit.ir);
//! ```

pub mod error;
pub mod ir;
pub mod regalloc;

pub use error::{CompileError, Result};

use ir::{StackFunction, TreeBuilder};
use log::debug;
use regalloc::{AllocatedUnit, AllocatorConfig, RegisterAllocator};

/// Lower `func` to trees and allocate registers for it.
pub fn compile(func: &StackFunction, config: &AllocatorConfig) -> Result<AllocatedUnit> {
    let ir = TreeBuilder::new(func).build()?;
    debug!(
        "compiling {} blocks, {} nodes with {} registers",
        ir.num_blocks(),
        ir.num_nodes(),
        config.num_registers
    );
    RegisterAllocator::new(config.clone()).allocate(ir)
}
