//! Stack bytecode to tree IR translation.
//!
//! The builder folds the operand stack into trees: every producer becomes a
//! child of the instruction that pops it, and instructions with side effects
//! (`stloc`, `pop`, temp bindings, terminators) become statement roots.
//!
//! # Translation Strategy
//!
//! 1. **Leaders**: Every label and every instruction after a terminator
//!    starts a block, created in source order
//! 2. **Folding**: Walk the instructions with a stack of pending trees;
//!    a block that runs into a label without a terminator gets an explicit
//!    fall-through `jmp`
//! 3. **Sharing**: `dup` of a local or temp read copies the leaf; `dup` of
//!    any other tree binds it to a fresh temp
//! 4. **Ordering**: Before a `stloc`, pending trees below the stored value
//!    are bound to temps so they still observe the old local values

use super::cfg::{BlockId, TreeIr};
use super::node::NodeId;
use super::operators::{BinaryOp, Label, LocalId, Operator};
use super::stack::{StackFunction, StackInstruction};
use crate::error::MalformedProgram;
use log::{debug, trace};
use rustc_hash::FxHashMap;

type BuildResult<T> = Result<T, MalformedProgram>;

// =============================================================================
// Tree Builder
// =============================================================================

/// Builder for lowering a [`StackFunction`] into a [`TreeIr`].
pub struct TreeBuilder<'a> {
    func: &'a StackFunction,

    /// The IR being built.
    ir: TreeIr,

    /// Pending operand trees.
    stack: Vec<NodeId>,

    /// Block receiving statements.
    current: BlockId,

    /// Block started by each leader instruction.
    block_at: FxHashMap<usize, BlockId>,

    /// Block started by each label.
    labels: FxHashMap<Label, BlockId>,
}

impl<'a> TreeBuilder<'a> {
    /// Create a new builder.
    pub fn new(func: &'a StackFunction) -> Self {
        TreeBuilder {
            func,
            ir: TreeIr::new(func.param_count, func.local_count),
            stack: Vec::new(),
            current: BlockId::new(0),
            block_at: FxHashMap::default(),
            labels: FxHashMap::default(),
        }
    }

    /// Lower the whole function. Edges and positions are computed before
    /// returning.
    pub fn build(mut self) -> BuildResult<TreeIr> {
        let func = self.func;
        if func.instructions.is_empty() {
            return Err(MalformedProgram::EmptyProgram);
        }
        if func.param_count > func.local_count {
            return Err(MalformedProgram::TooManyParams {
                params: func.param_count,
                locals: func.local_count,
            });
        }

        self.collect_blocks()?;

        for (index, &inst) in func.instructions.iter().enumerate() {
            if index > 0 {
                if let Some(&block) = self.block_at.get(&index) {
                    self.enter_block(block, inst)?;
                }
            }
            self.lower(index, inst)?;
        }

        if !self.is_terminated() {
            return Err(MalformedProgram::MissingTerminator);
        }

        self.ir.recompute_edges();
        self.ir.reindex();
        debug!(
            "lowered {} instructions into {} blocks, {} nodes",
            func.instructions.len(),
            self.ir.num_blocks(),
            self.ir.num_nodes()
        );
        Ok(self.ir)
    }

    /// First pass: create one block per leader.
    fn collect_blocks(&mut self) -> BuildResult<()> {
        let func = self.func;
        let insts = &func.instructions;
        for (index, &inst) in insts.iter().enumerate() {
            let after_terminator = index > 0 && insts[index - 1].is_terminator();
            match inst {
                StackInstruction::Label(label) => {
                    if self.labels.contains_key(&label) {
                        return Err(MalformedProgram::DuplicateLabel { label });
                    }
                    let block = self.ir.add_block(Some(label));
                    self.labels.insert(label, block);
                    self.block_at.insert(index, block);
                }
                _ if index == 0 || after_terminator => {
                    let block = self.ir.add_block(None);
                    self.block_at.insert(index, block);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Switch to the block starting at the current instruction.
    fn enter_block(&mut self, block: BlockId, inst: StackInstruction) -> BuildResult<()> {
        if let StackInstruction::Label(label) = inst {
            if !self.stack.is_empty() {
                return Err(MalformedProgram::LabelInsideStatement { label });
            }
        }
        if !self.is_terminated() {
            trace!("fall-through from bb{} to bb{}", self.current.index(), block.index());
            let jmp = self.ir.add_node(Operator::Jmp(block), &[]);
            self.emit(jmp);
        }
        self.current = block;
        Ok(())
    }

    // =========================================================================
    // Instruction Lowering
    // =========================================================================

    fn lower(&mut self, index: usize, inst: StackInstruction) -> BuildResult<()> {
        match inst {
            StackInstruction::LdLocal(local) => {
                self.check_local(local, index)?;
                self.push_leaf(Operator::LdLocal(local));
            }
            StackInstruction::StLocal(local) => {
                self.check_local(local, index)?;
                let value = self.pop(index)?;
                self.bind_pending();
                let store = self.ir.add_node(Operator::StLocal(local), &[value]);
                self.emit(store);
            }
            StackInstruction::Push(value) => self.push_leaf(Operator::Const(value)),
            StackInstruction::Pop => {
                let value = self.pop(index)?;
                let discard = self.ir.add_node(Operator::Discard, &[value]);
                self.emit(discard);
            }
            StackInstruction::Dup => self.dup(index)?,
            StackInstruction::Add => self.binary(index, BinaryOp::Add)?,
            StackInstruction::Sub => self.binary(index, BinaryOp::Sub)?,
            StackInstruction::Mul => self.binary(index, BinaryOp::Mul)?,
            StackInstruction::Div => self.binary(index, BinaryOp::Div)?,
            StackInstruction::Eq => self.binary(index, BinaryOp::Eq)?,
            StackInstruction::Label(_) => {}
            StackInstruction::Jmp(label) => {
                let target = self.target(label, index)?;
                self.expect_empty(index)?;
                let jmp = self.ir.add_node(Operator::Jmp(target), &[]);
                self.emit(jmp);
            }
            StackInstruction::Branch { if_true, if_false } => {
                let if_true = self.target(if_true, index)?;
                let if_false = self.target(if_false, index)?;
                let cond = self.pop(index)?;
                self.expect_empty(index)?;
                let br = self
                    .ir
                    .add_node(Operator::Branch { if_true, if_false }, &[cond]);
                self.emit(br);
            }
            StackInstruction::Ret => {
                let value = self.pop(index)?;
                self.expect_empty(index)?;
                let ret = self.ir.add_node(Operator::Ret, &[value]);
                self.emit(ret);
            }
        }
        Ok(())
    }

    fn binary(&mut self, index: usize, op: BinaryOp) -> BuildResult<()> {
        let rhs = self.pop(index)?;
        let lhs = self.pop(index)?;
        let node = self.ir.add_node(Operator::Binary(op), &[lhs, rhs]);
        self.stack.push(node);
        Ok(())
    }

    fn dup(&mut self, index: usize) -> BuildResult<()> {
        let top = self.pop(index)?;
        let op = self.ir.node(top).op;
        if op.is_reference() {
            self.stack.push(top);
            self.push_leaf(op);
        } else {
            let temp = self.ir.new_temp();
            let def = self.ir.add_node(Operator::DefTemp(temp), &[top]);
            self.emit(def);
            self.push_leaf(Operator::TempRef(temp));
            self.push_leaf(Operator::TempRef(temp));
        }
        Ok(())
    }

    /// Bind every pending tree that may read a local to a temp.
    fn bind_pending(&mut self) {
        for slot in 0..self.stack.len() {
            let pending = self.stack[slot];
            if matches!(
                self.ir.node(pending).op,
                Operator::Const(_) | Operator::TempRef(_)
            ) {
                continue;
            }
            let temp = self.ir.new_temp();
            let def = self.ir.add_node(Operator::DefTemp(temp), &[pending]);
            self.emit(def);
            self.stack[slot] = self.ir.add_node(Operator::TempRef(temp), &[]);
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn push_leaf(&mut self, op: Operator) {
        let leaf = self.ir.add_node(op, &[]);
        self.stack.push(leaf);
    }

    fn pop(&mut self, index: usize) -> BuildResult<NodeId> {
        self.stack
            .pop()
            .ok_or(MalformedProgram::StackUnderflow { index })
    }

    fn emit(&mut self, root: NodeId) {
        self.ir.append_statement(self.current, root);
    }

    fn expect_empty(&self, index: usize) -> BuildResult<()> {
        if self.stack.is_empty() {
            Ok(())
        } else {
            Err(MalformedProgram::LeftoverOperands {
                index,
                count: self.stack.len(),
            })
        }
    }

    fn check_local(&self, local: LocalId, index: usize) -> BuildResult<()> {
        if local.0 < self.func.local_count {
            Ok(())
        } else {
            Err(MalformedProgram::LocalOutOfRange { local, index })
        }
    }

    fn target(&self, label: Label, index: usize) -> BuildResult<BlockId> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(MalformedProgram::UndefinedLabel { label, index })
    }

    fn is_terminated(&self) -> bool {
        self.ir.terminator(self.current).is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::stack::StackInstruction as S;
    use indoc::indoc;

    fn build(params: u32, locals: u32, insts: Vec<S>) -> BuildResult<TreeIr> {
        let func = StackFunction::new(params, locals, insts);
        TreeBuilder::new(&func).build()
    }

    #[test]
    fn test_straight_line() {
        let ir = build(
            0,
            3,
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
            ],
        )
        .unwrap();

        let expected = indoc! {"
            bb0: preds []
                [0] const 1
              [1] stloc l0
                [2] const 2
              [3] stloc l1
                  [4] ldloc l0
                  [5] ldloc l1
                [6] add
              [7] stloc l2
                [8] ldloc l2
              [9] ret
        "};
        assert_eq!(ir.to_string(), expected);
        assert_eq!(ir.position_count(), 10);
    }

    #[test]
    fn test_fall_through_and_loop() {
        // l0 = 3; L0: l0 = l0 - 1; br l0 == 0 ? L1 : L0; L1: ret l0
        let ir = build(
            0,
            1,
            vec![
                S::Push(3),
                S::StLocal(LocalId(0)),
                S::Label(Label(0)),
                S::LdLocal(LocalId(0)),
                S::Push(1),
                S::Sub,
                S::StLocal(LocalId(0)),
                S::LdLocal(LocalId(0)),
                S::Push(0),
                S::Eq,
                S::Branch {
                    if_true: Label(1),
                    if_false: Label(0),
                },
                S::Label(Label(1)),
                S::LdLocal(LocalId(0)),
                S::Ret,
            ],
        )
        .unwrap();

        assert_eq!(ir.num_blocks(), 3);
        let entry = ir.block(BlockId::new(0));
        let term = ir.terminator(BlockId::new(0)).unwrap();
        assert_eq!(ir.node(term).op, Operator::Jmp(BlockId::new(1)));
        assert_eq!(entry.statements.len(), 2);

        let header = ir.block(BlockId::new(1));
        assert_eq!(header.label, Some(Label(0)));
        assert_eq!(
            header.predecessors.as_slice(),
            &[BlockId::new(0), BlockId::new(1)]
        );
        assert_eq!(
            header.successor_ids().collect::<Vec<_>>(),
            vec![BlockId::new(2), BlockId::new(1)]
        );
    }

    #[test]
    fn test_dup_binds_temp() {
        let ir = build(0, 0, vec![S::Push(2), S::Push(3), S::Add, S::Dup, S::Mul, S::Ret]).unwrap();

        let expected = indoc! {"
            bb0: preds []
                  [0] const 2
                  [1] const 3
                [2] add
              [3] def t0
                  [4] ref t0
                  [5] ref t0
                [6] mul
              [7] ret
        "};
        assert_eq!(ir.to_string(), expected);
        assert_eq!(ir.temp_count(), 1);
    }

    #[test]
    fn test_dup_copies_local_read() {
        let ir = build(1, 1, vec![S::LdLocal(LocalId(0)), S::Dup, S::Mul, S::Ret]).unwrap();
        assert_eq!(ir.temp_count(), 0);
        assert_eq!(ir.num_nodes(), 4);
    }

    #[test]
    fn test_store_binds_pending_reads() {
        // push l0; l0 = 5; ret old_l0 + l0
        let ir = build(
            1,
            1,
            vec![
                S::LdLocal(LocalId(0)),
                S::Push(5),
                S::StLocal(LocalId(0)),
                S::LdLocal(LocalId(0)),
                S::Add,
                S::Ret,
            ],
        )
        .unwrap();

        let expected = indoc! {"
            bb0: preds []
                [0] ldloc l0
              [1] def t0
                [2] const 5
              [3] stloc l0
                  [4] ref t0
                  [5] ldloc l0
                [6] add
              [7] ret
        "};
        assert_eq!(ir.to_string(), expected);
    }

    #[test]
    fn test_malformed_programs() {
        assert_eq!(build(0, 0, vec![]).unwrap_err(), MalformedProgram::EmptyProgram);
        assert_eq!(
            build(2, 1, vec![S::Push(0), S::Ret]).unwrap_err(),
            MalformedProgram::TooManyParams { params: 2, locals: 1 }
        );
        assert_eq!(
            build(0, 0, vec![S::Push(1), S::Add, S::Ret]).unwrap_err(),
            MalformedProgram::StackUnderflow { index: 1 }
        );
        assert_eq!(
            build(0, 0, vec![S::Push(1), S::Push(2), S::Ret]).unwrap_err(),
            MalformedProgram::LeftoverOperands { index: 2, count: 1 }
        );
        assert_eq!(
            build(0, 0, vec![S::Push(1), S::Label(Label(0)), S::Ret]).unwrap_err(),
            MalformedProgram::LabelInsideStatement { label: Label(0) }
        );
        assert_eq!(
            build(0, 0, vec![S::Jmp(Label(9))]).unwrap_err(),
            MalformedProgram::UndefinedLabel {
                label: Label(9),
                index: 0
            }
        );
        assert_eq!(
            build(
                0,
                0,
                vec![S::Label(Label(0)), S::Label(Label(0)), S::Push(0), S::Ret]
            )
            .unwrap_err(),
            MalformedProgram::DuplicateLabel { label: Label(0) }
        );
        assert_eq!(
            build(0, 1, vec![S::LdLocal(LocalId(1)), S::Ret]).unwrap_err(),
            MalformedProgram::LocalOutOfRange {
                local: LocalId(1),
                index: 0
            }
        );
        assert_eq!(
            build(0, 1, vec![S::Push(1), S::StLocal(LocalId(0))]).unwrap_err(),
            MalformedProgram::MissingTerminator
        );
    }
}
