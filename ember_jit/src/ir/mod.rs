//! Tree Intermediate Representation.
//!
//! # Core Components
//!
//! - **Stack** (`stack.rs`): Stack bytecode input
//! - **Operators** (`operators.rs`): Tree operator definitions
//! - **Arena** (`arena.rs`): Index arenas, side tables and bit sets
//! - **Position** (`position.rs`): Linear positions and insertion gaps
//! - **Node** (`node.rs`): Tree node definitions
//! - **CFG** (`cfg.rs`): Basic blocks of statement trees
//! - **Builder** (`builder.rs`): Stack bytecode to tree translation

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod node;
pub mod operators;
pub mod position;
pub mod stack;

// Re-export commonly used types
pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::TreeBuilder;
pub use cfg::{BasicBlock, BlockId, Edge, Step, TreeIr};
pub use node::{Node, NodeId};
pub use operators::{BinaryOp, Label, LocalId, OpKind, Operator, TempId};
pub use position::{Gap, ProgPoint};
pub use stack::{StackFunction, StackInstruction};
