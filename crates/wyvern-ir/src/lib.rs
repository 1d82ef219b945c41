//! The data-flow IR the wyvern analyses consume: variables, operations,
//! and basic blocks in typed-index arenas, plus dominator queries and a
//! validating builder.

pub mod arena;
mod builder;
mod dfg;
mod dom;
mod lattice;
mod opcode;

pub use arena::{Arena, Id, Identifier};
pub use builder::{BuildError, FunctionBuilder};
pub use dfg::{byte_mask, Block, BlockInfo, Function, Op, OpInfo, Var, VarInfo, VarUse};
pub use dom::DominatorTree;
pub use lattice::{HasBottom, HasTop, Lattice};
pub use opcode::OpCode;
