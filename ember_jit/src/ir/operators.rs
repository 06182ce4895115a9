//! Operator definitions for the tree IR.
//!
//! Operators fall into three groups:
//! - **Values**: `Const` and `Binary` compute a result consumed by their parent
//! - **References**: `LdLocal` and `TempRef` name a value defined elsewhere and
//!   are read at their parent's position
//! - **Statements**: `StLocal`, `DefTemp`, `Discard` and the terminators
//!   `Ret`, `Jmp`, `Branch` only appear as statement roots

use super::cfg::BlockId;
use smallvec::SmallVec;
use std::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// A local variable slot of the stack program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// A shared temp: one definition, several uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TempId(pub u32);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A branch target marker in the stack program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

// =============================================================================
// Binary Operators
// =============================================================================

/// Two-operand arithmetic and comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinaryOp {
    /// a + b
    Add = 0,
    /// a - b
    Sub = 1,
    /// a * b
    Mul = 2,
    /// a / b
    Div = 3,
    /// a == b
    Eq = 4,
}

impl BinaryOp {
    /// The matching [`OpKind`].
    #[inline]
    pub const fn kind(self) -> OpKind {
        match self {
            BinaryOp::Add => OpKind::Add,
            BinaryOp::Sub => OpKind::Sub,
            BinaryOp::Mul => OpKind::Mul,
            BinaryOp::Div => OpKind::Div,
            BinaryOp::Eq => OpKind::Eq,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Eq => "eq",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Operator Kind
// =============================================================================

/// Payload-free operator tag.
///
/// Used as the key for per-operation configuration such as operand reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Const,
    LdLocal,
    TempRef,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    StLocal,
    DefTemp,
    Discard,
    Ret,
    Jmp,
    Branch,
}

// =============================================================================
// Operator
// =============================================================================

/// The operation performed by a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Integer constant.
    Const(i64),
    /// Read of a local variable.
    LdLocal(LocalId),
    /// Read of a shared temp.
    TempRef(TempId),
    /// Binary operation over the two children.
    Binary(BinaryOp),
    /// Write the single child into a local.
    StLocal(LocalId),
    /// Bind the single child to a shared temp.
    DefTemp(TempId),
    /// Evaluate the single child and drop the result.
    Discard,
    /// Return the single child.
    Ret,
    /// Unconditional jump.
    Jmp(BlockId),
    /// Two-way branch on the single child.
    Branch { if_true: BlockId, if_false: BlockId },
}

impl Operator {
    /// Get the payload-free kind.
    pub const fn kind(&self) -> OpKind {
        match self {
            Operator::Const(_) => OpKind::Const,
            Operator::LdLocal(_) => OpKind::LdLocal,
            Operator::TempRef(_) => OpKind::TempRef,
            Operator::Binary(op) => op.kind(),
            Operator::StLocal(_) => OpKind::StLocal,
            Operator::DefTemp(_) => OpKind::DefTemp,
            Operator::Discard => OpKind::Discard,
            Operator::Ret => OpKind::Ret,
            Operator::Jmp(_) => OpKind::Jmp,
            Operator::Branch { .. } => OpKind::Branch,
        }
    }

    /// Check if the node computes a fresh value for its parent.
    #[inline]
    pub const fn produces_value(&self) -> bool {
        matches!(self, Operator::Const(_) | Operator::Binary(_))
    }

    /// Check if the node is a transparent reference to a local or temp.
    #[inline]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Operator::LdLocal(_) | Operator::TempRef(_))
    }

    /// Check if the node ends a basic block.
    #[inline]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            Operator::Ret | Operator::Jmp(_) | Operator::Branch { .. }
        )
    }

    /// Control-flow successors of a terminator, in operand order.
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match *self {
            Operator::Jmp(target) => smallvec::smallvec![target],
            Operator::Branch { if_true, if_false } => smallvec::smallvec![if_true, if_false],
            _ => SmallVec::new(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Const(v) => write!(f, "const {}", v),
            Operator::LdLocal(l) => write!(f, "ldloc {}", l),
            Operator::TempRef(t) => write!(f, "ref {}", t),
            Operator::Binary(op) => write!(f, "{}", op),
            Operator::StLocal(l) => write!(f, "stloc {}", l),
            Operator::DefTemp(t) => write!(f, "def {}", t),
            Operator::Discard => write!(f, "discard"),
            Operator::Ret => write!(f, "ret"),
            Operator::Jmp(target) => write!(f, "jmp bb{}", target.index()),
            Operator::Branch { if_true, if_false } => {
                write!(f, "br bb{}, bb{}", if_true.index(), if_false.index())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_shape() {
        assert!(Operator::Const(3).produces_value());
        assert!(!Operator::LdLocal(LocalId(0)).produces_value());
        assert!(Operator::TempRef(TempId(0)).is_reference());
        assert!(Operator::Ret.is_terminator());
        assert!(!Operator::Discard.is_terminator());
    }

    #[test]
    fn test_branch_successors() {
        let br = Operator::Branch {
            if_true: BlockId::new(2),
            if_false: BlockId::new(5),
        };
        assert_eq!(
            br.successors().as_slice(),
            &[BlockId::new(2), BlockId::new(5)]
        );
        assert!(Operator::Ret.successors().is_empty());
    }

    #[test]
    fn test_kind_and_display() {
        assert_eq!(Operator::Binary(BinaryOp::Div).kind(), OpKind::Div);
        assert_eq!(format!("{}", Operator::StLocal(LocalId(3))), "stloc l3");
        assert_eq!(format!("{}", Operator::Binary(BinaryOp::Eq)), "eq");
    }
}
