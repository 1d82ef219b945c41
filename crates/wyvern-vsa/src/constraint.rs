//! Branch-derived constraints.
//!
//! A conditional branch splits the values a variable can hold on its two
//! out-edges. Each edge's fact is attached as an equation to every
//! operation reading the variable in blocks dominated by that edge's
//! target, and recorded as the variable's widening landmark.

use log::trace;

use wyvern_ir::{Block, Op, OpCode, Var};
use wyvern_range::CircleRange;

use crate::solver::ValueSetSolver;

impl ValueSetSolver<'_> {
    /// Derive constraints from every conditional branch in the function.
    pub(crate) fn generate_constraints(&mut self) {
        let branches: Vec<Op> = self.func.cbranches().collect();
        for cbranch in branches {
            self.constraints_from_cbranch(cbranch);
        }
    }

    /// Lift the branch condition into a range on each out-edge and walk
    /// it back through the condition's defining operations.
    fn constraints_from_cbranch(&mut self, cbranch: Op) {
        let info = self.func.op(cbranch);
        let cond = info.input(0);
        let block = info.block();
        let succs = self.func.block(block).succs();
        if succs.len() != 2 {
            return;
        }
        let (on_false, on_true) = (succs[0], succs[1]);
        for (target, taken) in [(on_true, true), (on_false, false)] {
            // A fact holds inside the target only if the edge is the sole
            // way in; a join block sees other paths too.
            if self.func.block(target).preds().len() != 1 {
                continue;
            }
            self.constraints_from_path(cond, target, taken);
        }
    }

    /// Starting from the condition value, produce the initial range and
    /// pull it back through chains of invertible defining operations,
    /// constraining every tracked variable met along the way.
    fn constraints_from_path(&mut self, cond: Var, split_point: Block, taken: bool) {
        let (mut var, mut range) = match self.lift_condition(cond, taken) {
            Some(lifted) => lifted,
            None => return,
        };
        loop {
            if range.is_full() {
                return;
            }
            self.apply_constraints(var, &range, split_point);
            let Some(def) = self.func.var(var).def() else {
                return;
            };
            let mut pulled = range;
            let result = pulled.pull_back(self.func, def, false);
            let Some(next) = result.constrained else {
                return;
            };
            var = next;
            range = pulled;
        }
    }

    /// Turn the branch condition into `(variable, range-when-taken)`.
    ///
    /// A comparison against a constant yields the half-plane (or its
    /// inverse) directly; any other condition is read as a zero/nonzero
    /// test on the condition value itself.
    fn lift_condition(&self, cond: Var, taken: bool) -> Option<(Var, CircleRange)> {
        if let Some(def) = self.func.var(cond).def() {
            let info = self.func.op(def);
            if info.opcode().is_comparison() {
                let mut constant = None;
                let mut variable = None;
                for (slot, &v) in info.inputs().iter().enumerate() {
                    match self.func.var(v).constant() {
                        Some(c) => constant = Some((slot, c)),
                        None => variable = Some(v),
                    }
                }
                if let (Some((cslot, c)), Some(v)) = (constant, variable) {
                    let size = self.func.var(v).size();
                    let range =
                        CircleRange::comparison_range(info.opcode(), c, cslot, size, taken);
                    if range.is_empty() || range.is_full() {
                        return None;
                    }
                    return Some((v, range));
                }
            }
        }
        // Fall back to the boolean reading of the condition itself.
        let size = self.func.var(cond).size();
        let range = CircleRange::comparison_range(OpCode::IntNotEqual, 0, 0, size, taken);
        Some((cond, range))
    }

    /// Attach `range` as an equation to every read of `var` dominated by
    /// `split_point`, and as the widening landmark of `var` itself.
    fn apply_constraints(&mut self, var: Var, range: &CircleRange, split_point: Block) {
        let Some(&vsid) = self.map.get(&var) else {
            return;
        };
        trace!("constraint {:?} in {} below {:?}", var, range, split_point);
        self.value_sets[vsid].add_landmark(*range);
        for vu in self.func.var(var).uses() {
            let reader = self.func.op(vu.op);
            if !self.func.dominates(split_point, reader.block()) {
                continue;
            }
            let Some(out) = reader.output() else {
                continue;
            };
            if let Some(&out_id) = self.map.get(&out) {
                self.value_sets[out_id].add_equation(vu.slot, *range);
            }
        }
    }
}
