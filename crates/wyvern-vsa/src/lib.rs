//! Value-set analysis over the wyvern IR.
//!
//! Given a set of sink variables, [`ValueSetSolver`] discovers every
//! variable that can flow into them, decomposes the resulting data-flow
//! graph into a weak topological order, and iterates circular strided
//! ranges ([`wyvern_range::CircleRange`]) to a fixpoint, widening where
//! loops keep a range growing. The caller reads the result off each
//! variable's [`ValueSet`].

mod constraint;
mod partition;
mod solver;
mod valueset;

pub use partition::Partition;
pub use solver::ValueSetSolver;
pub use valueset::{Equation, TypeCode, ValueSet, ValueSetId};

/// Error type for solver misuse at setup time. The analysis itself
/// never errors: unrepresentable results saturate to full ranges and
/// iteration ceilings are ordinary outcomes.
#[derive(Debug, thiserror::Error)]
pub enum VsaError {
    /// No sinks were supplied to build a system from.
    #[error("no sink variables supplied")]
    EmptySinks,
}

/// How a [`ValueSetSolver::solve`] run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveOutcome {
    /// A full sweep completed with no partition left dirty.
    Converged,
    /// The iteration ceiling was reached first; every range is still a
    /// sound over-approximation.
    IterationLimit,
}

impl SolveOutcome {
    pub fn is_converged(self) -> bool {
        matches!(self, SolveOutcome::Converged)
    }
}

/// Tunables for the fixpoint iteration.
#[derive(Clone, Copy, Debug, bon::Builder)]
pub struct SolverConfig {
    /// Iteration count at which a still-growing node is widened against
    /// its landmark.
    #[builder(default = 3)]
    pub widening_threshold: u32,
    /// Iteration count at which a still-growing node saturates to the
    /// full range, guaranteeing termination.
    #[builder(default = 10)]
    pub full_threshold: u32,
    /// Largest stride the push-forwards and containers may introduce.
    #[builder(default = 32)]
    pub max_step: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig::builder().build()
    }
}
