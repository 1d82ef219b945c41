use crate::arena::Arena;
use crate::dfg::{byte_mask, Block, BlockInfo, Function, Op, OpInfo, Var, VarInfo, VarUse};
use crate::dom::DominatorTree;
use crate::opcode::OpCode;

/// Error type for malformed function construction.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Input count does not match the opcode's arity.
    #[error("{opcode:?} takes {expected} inputs, got {got}")]
    ArityMismatch {
        opcode: OpCode,
        expected: usize,
        got: usize,
    },
    /// The opcode produces no value and cannot be built as an expression.
    #[error("{0:?} produces no output")]
    NoOutput(OpCode),
    /// The block already has a terminating branch.
    #[error("block {0:?} already has a terminator")]
    DuplicateTerminator(Block),
    /// Variable sizes are 1 to 8 bytes.
    #[error("unsupported variable size {0}")]
    InvalidSize(usize),
    /// A function needs at least one block.
    #[error("function has no blocks")]
    Empty,
}

/// Incrementally assembles a [`Function`].
///
/// The first block created is the entry. `finish` wires predecessor and
/// use lists and computes the dominator tree; the builder performs all
/// validation so the finished function never has to.
#[derive(Default)]
pub struct FunctionBuilder {
    vars: Arena<VarInfo, Var>,
    ops: Arena<OpInfo, Op>,
    blocks: Arena<BlockInfo, Block>,
    redirects: Vec<(Var, Var)>,
}

impl FunctionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&mut self) -> Block {
        self.blocks.alloc(BlockInfo::default())
    }

    /// A free variable: no defining op, treated as an unconstrained input.
    pub fn input(&mut self, size: usize) -> Result<Var, BuildError> {
        check_size(size)?;
        Ok(self.vars.alloc(VarInfo {
            size,
            constant: None,
            def: None,
            uses: Vec::new(),
        }))
    }

    /// A literal variable; the value is masked to `size` bytes.
    pub fn constant(&mut self, value: u64, size: usize) -> Result<Var, BuildError> {
        check_size(size)?;
        Ok(self.vars.alloc(VarInfo {
            size,
            constant: Some(value & byte_mask(size)),
            def: None,
            uses: Vec::new(),
        }))
    }

    /// Append a value-producing op to `block` and return its output
    /// variable of `out_size` bytes.
    pub fn op(
        &mut self,
        block: Block,
        opcode: OpCode,
        inputs: &[Var],
        out_size: usize,
    ) -> Result<Var, BuildError> {
        check_size(out_size)?;
        if !opcode.has_output() {
            return Err(BuildError::NoOutput(opcode));
        }
        check_arity(opcode, inputs.len())?;
        if self.blocks[block].terminator.is_some() {
            return Err(BuildError::DuplicateTerminator(block));
        }
        let op = self.ops.next_id();
        let out = self.vars.alloc(VarInfo {
            size: out_size,
            constant: None,
            def: Some(op),
            uses: Vec::new(),
        });
        self.ops.alloc(OpInfo {
            opcode,
            inputs: inputs.to_vec(),
            output: Some(out),
            block,
        });
        self.blocks[block].ops.push(op);
        Ok(out)
    }

    /// Terminate `block` with an unconditional jump.
    pub fn branch(&mut self, block: Block, target: Block) -> Result<(), BuildError> {
        if self.blocks[block].terminator.is_some() || !self.blocks[block].succs.is_empty() {
            return Err(BuildError::DuplicateTerminator(block));
        }
        self.blocks[block].succs.push(target);
        Ok(())
    }

    /// Terminate `block` with a conditional branch on `cond`; control goes
    /// to `on_true` when `cond` is nonzero, `on_false` otherwise.
    pub fn cbranch(
        &mut self,
        block: Block,
        cond: Var,
        on_true: Block,
        on_false: Block,
    ) -> Result<Op, BuildError> {
        if self.blocks[block].terminator.is_some() || !self.blocks[block].succs.is_empty() {
            return Err(BuildError::DuplicateTerminator(block));
        }
        let op = self.ops.alloc(OpInfo {
            opcode: OpCode::CBranch,
            inputs: vec![cond],
            output: None,
            block,
        });
        let info = &mut self.blocks[block];
        info.ops.push(op);
        info.terminator = Some(op);
        info.succs.push(on_false);
        info.succs.push(on_true);
        Ok(op)
    }

    /// Replace every use of `placeholder` with `actual`, resolved at
    /// `finish`. This is how a cyclic def-use edge (a phi reading a
    /// value defined later in the loop body) is wired: build the phi
    /// against a placeholder input, then redirect it.
    pub fn redirect_input(&mut self, placeholder: Var, actual: Var) {
        self.redirects.push((placeholder, actual));
    }

    pub fn finish(mut self) -> Result<Function, BuildError> {
        if self.blocks.is_empty() {
            return Err(BuildError::Empty);
        }
        let entry = Block::from(crate::arena::Id(0));

        for (placeholder, actual) in std::mem::take(&mut self.redirects) {
            for (_, op) in self.ops.iter_mut() {
                for input in op.inputs.iter_mut() {
                    if *input == placeholder {
                        *input = actual;
                    }
                }
            }
        }

        // Use lists.
        let mut uses: Vec<Vec<VarUse>> = vec![Vec::new(); self.vars.len()];
        for (op, info) in self.ops.iter() {
            for (slot, &v) in info.inputs.iter().enumerate() {
                uses[v.raw()].push(VarUse { op, slot });
            }
        }
        for (v, list) in uses.into_iter().enumerate() {
            self.vars[Var::from(crate::arena::Id(v))].uses = list;
        }

        // Predecessors.
        let mut preds: Vec<Vec<Block>> = vec![Vec::new(); self.blocks.len()];
        for (b, info) in self.blocks.iter() {
            for &s in info.succs.iter() {
                preds[s.raw()].push(b);
            }
        }
        for (b, list) in preds.into_iter().enumerate() {
            self.blocks[Block::from(crate::arena::Id(b))].preds = list;
        }

        let dom = DominatorTree::build(&self.blocks, entry);
        Ok(Function {
            vars: self.vars,
            ops: self.ops,
            blocks: self.blocks,
            entry,
            dom,
        })
    }
}

fn check_size(size: usize) -> Result<(), BuildError> {
    if size == 0 || size > 8 {
        return Err(BuildError::InvalidSize(size));
    }
    Ok(())
}

fn check_arity(opcode: OpCode, got: usize) -> Result<(), BuildError> {
    match opcode.arity() {
        Some(expected) if expected != got => Err(BuildError::ArityMismatch {
            opcode,
            expected,
            got,
        }),
        None if got == 0 => Err(BuildError::ArityMismatch {
            opcode,
            expected: 1,
            got,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_straight_line() {
        let mut fb = FunctionBuilder::new();
        let b0 = fb.block();
        let x = fb.input(4).unwrap();
        let c = fb.constant(2, 4).unwrap();
        let y = fb.op(b0, OpCode::IntMult, &[x, c], 4).unwrap();
        let f = fb.finish().unwrap();

        assert_eq!(f.var(y).def(), Some(f.var(x).uses()[0].op));
        assert_eq!(f.var(x).uses().len(), 1);
        assert_eq!(f.var(c).constant(), Some(2));
        assert_eq!(f.entry(), b0);
    }

    #[test]
    fn arity_is_checked() {
        let mut fb = FunctionBuilder::new();
        let b0 = fb.block();
        let x = fb.input(4).unwrap();
        let err = fb.op(b0, OpCode::IntAdd, &[x], 4).unwrap_err();
        assert!(matches!(err, BuildError::ArityMismatch { .. }));
    }

    #[test]
    fn diamond_dominators() {
        let mut fb = FunctionBuilder::new();
        let top = fb.block();
        let lhs = fb.block();
        let rhs = fb.block();
        let join = fb.block();
        let cond = fb.input(1).unwrap();
        fb.cbranch(top, cond, lhs, rhs).unwrap();
        fb.branch(lhs, join).unwrap();
        fb.branch(rhs, join).unwrap();
        let f = fb.finish().unwrap();

        assert!(f.dominates(top, join));
        assert!(f.dominates(top, lhs));
        assert!(!f.dominates(lhs, join));
        assert!(!f.dominates(join, lhs));
        assert_eq!(f.block(top).succs(), &[rhs, lhs]);
    }
}
