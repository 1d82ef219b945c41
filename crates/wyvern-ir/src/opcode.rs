/// The closed set of operations the analyses understand.
///
/// Sizes are byte counts carried by the variables, not by the opcode; an
/// extension or truncation derives its semantics from the input and output
/// sizes of the op it appears on.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpCode {
    /// Straight assignment.
    Copy,
    /// Phi-like merge of the values arriving along each in-edge.
    MultiEqual,
    /// Conditional branch on a boolean input; edge order is held by the
    /// owning block (successor 0 = false edge, successor 1 = true edge).
    CBranch,
    IntAdd,
    IntSub,
    IntMult,
    IntAnd,
    IntOr,
    IntXor,
    /// Logical shift left.
    IntShl,
    /// Logical shift right.
    IntShr,
    /// Arithmetic shift right.
    IntSar,
    /// Two's-complement negation.
    IntNeg,
    /// Bitwise complement.
    IntNot,
    IntZext,
    IntSext,
    /// Truncation: input 1 is a constant byte offset into input 0.
    SubPiece,
    IntEqual,
    IntNotEqual,
    /// Unsigned less-than.
    IntLess,
    /// Signed less-than.
    IntSLess,
    /// Unsigned less-or-equal.
    IntLessEqual,
    /// Signed less-or-equal.
    IntSLessEqual,
    PopCount,
}

impl OpCode {
    /// Number of data inputs the op takes, or `None` for variadic ops.
    pub fn arity(self) -> Option<usize> {
        use OpCode::*;
        match self {
            MultiEqual => None,
            Copy | CBranch | IntNeg | IntNot | IntZext | IntSext | PopCount => Some(1),
            IntAdd | IntSub | IntMult | IntAnd | IntOr | IntXor | IntShl | IntShr | IntSar
            | SubPiece | IntEqual | IntNotEqual | IntLess | IntSLess | IntLessEqual
            | IntSLessEqual => Some(2),
        }
    }

    /// True for ops producing a boolean comparison of their inputs.
    pub fn is_comparison(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            IntEqual | IntNotEqual | IntLess | IntSLess | IntLessEqual | IntSLessEqual
        )
    }

    /// True for single-input ops whose concrete action on a value can be
    /// reversed exactly (given the input and output sizes).
    pub fn is_invertible_unary(self) -> bool {
        use OpCode::*;
        matches!(self, Copy | IntNeg | IntNot | IntZext | IntSext)
    }

    /// True if the op produces an output variable.
    pub fn has_output(self) -> bool {
        !matches!(self, OpCode::CBranch)
    }
}

#[cfg(test)]
mod tests {
    use super::OpCode;

    #[test]
    fn arity_covers_every_opcode() {
        assert_eq!(OpCode::MultiEqual.arity(), None);
        assert_eq!(OpCode::Copy.arity(), Some(1));
        assert_eq!(OpCode::IntAdd.arity(), Some(2));
        assert_eq!(OpCode::SubPiece.arity(), Some(2));
        assert!(OpCode::IntSLess.is_comparison());
        assert!(!OpCode::IntAdd.is_comparison());
        assert!(!OpCode::CBranch.has_output());
    }
}
