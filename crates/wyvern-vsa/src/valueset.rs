use wyvern_ir::{identifier, OpCode, Var};
use wyvern_range::CircleRange;

identifier!(
    /// Index of a [`ValueSet`] in the solver's arena.
    struct ValueSetId
);
identifier!(
    /// Index of a [`crate::Partition`] in the solver's arena.
    struct PartitionId
);

/// Interpretation of a value set's range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeCode {
    /// Plain integer values.
    Absolute,
    /// Offsets relative to the designated stack register.
    StackRelative,
}

/// A per-input constraint on the defining operation: when recomputing
/// the owner's range, the input at `slot` additionally lies in `range`.
/// A slot equal to the input count holds the widening landmark.
#[derive(Clone, Debug)]
pub struct Equation {
    pub(crate) slot: usize,
    pub(crate) range: CircleRange,
}

impl Equation {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn range(&self) -> &CircleRange {
        &self.range
    }
}

/// The range of values reaching one variable, together with the node's
/// place in the data-flow subsystem being iterated.
///
/// The `count` field serves two lives: depth-first numbering while the
/// topological order is built, then the widening counter during the
/// solve; the solver resets it between the phases.
#[derive(Clone, Debug)]
pub struct ValueSet {
    pub(crate) var: Var,
    pub(crate) type_code: TypeCode,
    pub(crate) opcode: Option<OpCode>,
    pub(crate) num_inputs: usize,
    pub(crate) range: CircleRange,
    pub(crate) count: u32,
    pub(crate) equations: Vec<Equation>,
    pub(crate) part_head: Option<PartitionId>,
    pub(crate) next: Option<ValueSetId>,
}

impl ValueSet {
    pub(crate) fn new(var: Var, type_code: TypeCode, opcode: Option<OpCode>, num_inputs: usize) -> Self {
        ValueSet {
            var,
            type_code,
            opcode,
            num_inputs,
            range: CircleRange::empty(),
            count: 0,
            equations: Vec::new(),
            part_head: None,
            next: None,
        }
    }

    /// The variable this set describes.
    pub fn var(&self) -> Var {
        self.var
    }

    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    /// Opcode of the defining operation, `None` for inputs and constants.
    pub fn opcode(&self) -> Option<OpCode> {
        self.opcode
    }

    /// The current range of values.
    pub fn range(&self) -> &CircleRange {
        &self.range
    }

    /// Record a constraint on input `slot` of the defining operation.
    /// A second constraint on the same slot intersects with the first.
    pub(crate) fn add_equation(&mut self, slot: usize, constraint: CircleRange) {
        if let Some(eq) = self.equations.iter_mut().find(|eq| eq.slot == slot) {
            eq.range.intersect(&constraint);
            return;
        }
        let pos = self
            .equations
            .iter()
            .position(|eq| eq.slot > slot)
            .unwrap_or(self.equations.len());
        self.equations.insert(
            pos,
            Equation {
                slot,
                range: constraint,
            },
        );
    }

    /// Store a widening landmark at the virtual slot past the inputs.
    /// The first landmark recorded wins.
    pub(crate) fn add_landmark(&mut self, constraint: CircleRange) {
        let slot = self.num_inputs;
        if self.equations.iter().any(|eq| eq.slot == slot) {
            return;
        }
        self.equations.push(Equation {
            slot,
            range: constraint,
        });
    }

    pub(crate) fn equation(&self, slot: usize) -> Option<&CircleRange> {
        self.equations
            .iter()
            .find(|eq| eq.slot == slot)
            .map(|eq| &eq.range)
    }

    /// The widening landmark, if one was recorded.
    pub fn landmark(&self) -> Option<&CircleRange> {
        self.equation(self.num_inputs)
    }

    /// Note that iteration has come back around to this node.
    pub(crate) fn looped(&mut self) {
        self.count += 1;
    }
}
