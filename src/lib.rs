//! Value-set analysis for machine-code data flow.
//!
//! The workspace splits into three layers, re-exported here:
//!
//! - [`wyvern_ir`]: the data-flow IR the analyses consume: variables,
//!   operations, blocks, dominators, and a validating builder.
//! - [`wyvern_range`]: [`CircleRange`], circular strided integer sets
//!   with pull-back and push-forward through the IR operators.
//! - [`wyvern_vsa`]: [`ValueSetSolver`], the widening fixpoint that
//!   assigns a range to every variable flowing into a set of sinks.
//!
//! ```no_run
//! use wyvern::prelude::*;
//!
//! # fn demo(func: &Function, sink: Var) -> Result<(), VsaError> {
//! let mut solver = ValueSetSolver::new(func);
//! solver.establish_value_sets(&[sink], None)?;
//! solver.solve(10_000);
//! let range = solver.value_set(sink).unwrap().range();
//! println!("{range}");
//! # Ok(())
//! # }
//! ```

pub use wyvern_ir::{BuildError, Block, Function, FunctionBuilder, Op, OpCode, Var};
pub use wyvern_range::{CircleRange, IntersectStatus, UnionStatus};
pub use wyvern_vsa::{SolveOutcome, SolverConfig, TypeCode, ValueSet, ValueSetSolver, VsaError};

pub mod prelude {
    pub use wyvern_ir::{Block, Function, FunctionBuilder, Op, OpCode, Var};
    pub use wyvern_range::CircleRange;
    pub use wyvern_vsa::{SolveOutcome, SolverConfig, ValueSetSolver, VsaError};
}
