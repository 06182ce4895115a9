//! Compilation errors.
//!
//! Every error is fatal for the compilation unit. Structural problems are
//! caught while building trees or computing lifetimes; the allocator itself
//! never fails on a well-formed interval set.

use crate::ir::cfg::BlockId;
use crate::ir::operators::{Label, LocalId, TempId};
use crate::regalloc::ValueId;
use crate::regalloc::interval::ValueKind;
use thiserror::Error;

/// The stack program cannot be lowered to trees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedProgram {
    #[error("empty program")]
    EmptyProgram,

    #[error("{params} parameters declared but only {locals} locals")]
    TooManyParams { params: u32, locals: u32 },

    #[error("operand stack underflow at instruction {index}")]
    StackUnderflow { index: usize },

    #[error("{count} operands left on the stack at instruction {index}")]
    LeftoverOperands { index: usize, count: usize },

    #[error("label {label} reached with a non-empty operand stack")]
    LabelInsideStatement { label: Label },

    #[error("branch to undefined label {label} at instruction {index}")]
    UndefinedLabel { label: Label, index: usize },

    #[error("label {label} defined twice")]
    DuplicateLabel { label: Label },

    #[error("local {local} out of range at instruction {index}")]
    LocalOutOfRange { local: LocalId, index: usize },

    #[error("program does not end with ret, jmp or br")]
    MissingTerminator,
}

/// Lifetime analysis found a value without a reaching definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifetimeError {
    #[error("{kind} ({value}) used before definition in bb{}", .block.index())]
    UseBeforeDef {
        value: ValueId,
        kind: ValueKind,
        block: BlockId,
    },

    #[error("temp {temp} defined more than once")]
    TempRedefined { temp: TempId },
}

/// The allocator configuration is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one register is required")]
    NoRegisters,

    #[error("{requested} registers requested, at most {max} supported")]
    TooManyRegisters { requested: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Malformed(#[from] MalformedProgram),

    #[error(transparent)]
    Lifetime(#[from] LifetimeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = CompileError::from(MalformedProgram::UndefinedLabel {
            label: Label(4),
            index: 7,
        });
        assert_eq!(
            err.to_string(),
            "branch to undefined label L4 at instruction 7"
        );

        let err = LifetimeError::UseBeforeDef {
            value: ValueId::new(2),
            kind: ValueKind::Local(LocalId(2)),
            block: BlockId::new(1),
        };
        assert_eq!(err.to_string(), "local l2 (v2) used before definition in bb1");
    }
}
