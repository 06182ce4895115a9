//! Stack bytecode input.
//!
//! A function body is a flat list of operand-stack instructions with label
//! markers. Locals `0..param_count` are parameters and hold a value on entry.

use super::operators::{BinaryOp, Label, LocalId};
use std::fmt;

/// A single stack instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackInstruction {
    /// Push the value of a local.
    LdLocal(LocalId),
    /// Pop into a local.
    StLocal(LocalId),
    /// Push a constant.
    Push(i64),
    /// Pop and drop.
    Pop,
    /// Duplicate the top of stack.
    Dup,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    /// Branch target marker.
    Label(Label),
    /// Unconditional jump.
    Jmp(Label),
    /// Pop a condition; jump to `if_true` when non-zero, else `if_false`.
    Branch { if_true: Label, if_false: Label },
    /// Pop and return.
    Ret,
}

impl StackInstruction {
    /// The binary operator, for arithmetic and comparison instructions.
    pub const fn binary_op(self) -> Option<BinaryOp> {
        match self {
            StackInstruction::Add => Some(BinaryOp::Add),
            StackInstruction::Sub => Some(BinaryOp::Sub),
            StackInstruction::Mul => Some(BinaryOp::Mul),
            StackInstruction::Div => Some(BinaryOp::Div),
            StackInstruction::Eq => Some(BinaryOp::Eq),
            _ => None,
        }
    }

    /// Check if control never falls through this instruction.
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            StackInstruction::Jmp(_) | StackInstruction::Branch { .. } | StackInstruction::Ret
        )
    }
}

impl fmt::Display for StackInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackInstruction::LdLocal(l) => write!(f, "ldloc {}", l),
            StackInstruction::StLocal(l) => write!(f, "stloc {}", l),
            StackInstruction::Push(v) => write!(f, "push {}", v),
            StackInstruction::Pop => write!(f, "pop"),
            StackInstruction::Dup => write!(f, "dup"),
            StackInstruction::Label(l) => write!(f, "{}:", l),
            StackInstruction::Jmp(l) => write!(f, "jmp {}", l),
            StackInstruction::Branch { if_true, if_false } => {
                write!(f, "br {}, {}", if_true, if_false)
            }
            StackInstruction::Ret => write!(f, "ret"),
            other => match other.binary_op() {
                Some(op) => write!(f, "{}", op),
                None => Ok(()),
            },
        }
    }
}

/// A function in stack bytecode form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFunction {
    pub param_count: u32,
    pub local_count: u32,
    pub instructions: Vec<StackInstruction>,
}

impl StackFunction {
    pub fn new(param_count: u32, local_count: u32, instructions: Vec<StackInstruction>) -> Self {
        StackFunction {
            param_count,
            local_count,
            instructions,
        }
    }
}

impl fmt::Display for StackFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "; params {}, locals {}",
            self.param_count, self.local_count
        )?;
        for inst in &self.instructions {
            match inst {
                StackInstruction::Label(_) => writeln!(f, "{}", inst)?,
                _ => writeln!(f, "    {}", inst)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing() {
        let func = StackFunction::new(
            1,
            2,
            vec![
                StackInstruction::Label(Label(0)),
                StackInstruction::LdLocal(LocalId(0)),
                StackInstruction::Push(2),
                StackInstruction::Mul,
                StackInstruction::Ret,
            ],
        );
        assert_eq!(
            func.to_string(),
            "; params 1, locals 2\nL0:\n    ldloc l0\n    push 2\n    mul\n    ret\n"
        );
        assert!(StackInstruction::Ret.is_terminator());
        assert_eq!(StackInstruction::Pop.binary_op(), None);
    }
}
