use log::{debug, trace};
use rustc_hash::FxHashMap;

use wyvern_ir::{Arena, Function, OpCode, Var};
use wyvern_range::{CircleRange, UnionStatus};

use crate::partition::{PartChain, Partition};
use crate::valueset::{PartitionId, TypeCode, ValueSet, ValueSetId};
use crate::{SolveOutcome, SolverConfig, VsaError};

/// Assigns a [`ValueSet`] to every variable that can flow into a set of
/// sink variables, then iterates the system to a fixpoint.
///
/// The system is built backward from the sinks by
/// [`establish_value_sets`](Self::establish_value_sets), ordered with a
/// weak topological decomposition, and run by [`solve`](Self::solve).
/// A solver instance analyzes one function once; it borrows the IR for
/// its whole lifetime and owns every node it creates.
pub struct ValueSetSolver<'ir> {
    pub(crate) func: &'ir Function,
    pub(crate) value_sets: Arena<ValueSet, ValueSetId>,
    pub(crate) partitions: Arena<Partition, PartitionId>,
    pub(crate) map: FxHashMap<Var, ValueSetId>,
    pub(crate) root_nodes: Vec<ValueSetId>,
    pub(crate) node_stack: Vec<ValueSetId>,
    pub(crate) order: PartChain,
    pub(crate) dfi: u32,
    num_iterations: usize,
    config: SolverConfig,
    /// Reused across `iterate` calls so the main loop does not allocate.
    scratch_ranges: Vec<CircleRange>,
    scratch_rel: Vec<bool>,
}

impl<'ir> ValueSetSolver<'ir> {
    pub fn new(func: &'ir Function) -> Self {
        ValueSetSolver {
            func,
            value_sets: Arena::new(),
            partitions: Arena::new(),
            map: FxHashMap::default(),
            root_nodes: Vec::new(),
            node_stack: Vec::new(),
            order: PartChain::default(),
            dfi: 0,
            num_iterations: 0,
            config: SolverConfig::builder().build(),
            scratch_ranges: Vec::new(),
            scratch_rel: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: SolverConfig) -> Self {
        self.config = config;
        self
    }

    /// How many node iterations the last [`solve`](Self::solve) used.
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    /// The value set computed for `var`, if `var` is part of the system.
    pub fn value_set(&self, var: Var) -> Option<&ValueSet> {
        self.map.get(&var).map(|&id| &self.value_sets[id])
    }

    /// All value sets in the system.
    pub fn value_sets(&self) -> impl Iterator<Item = &ValueSet> {
        self.value_sets.iter().map(|(_, vs)| vs)
    }

    // -- System construction ------------------------------------------------

    /// Build the data-flow subsystem that can reach `sinks`, walking
    /// backward through defining operations. `stack_reg` designates the
    /// variable whose values are tracked as stack-relative offsets.
    pub fn establish_value_sets(
        &mut self,
        sinks: &[Var],
        stack_reg: Option<Var>,
    ) -> Result<(), VsaError> {
        if sinks.is_empty() {
            return Err(VsaError::EmptySinks);
        }
        let mut worklist: Vec<Var> = sinks.to_vec();
        while let Some(var) = worklist.pop() {
            if self.map.contains_key(&var) {
                continue;
            }
            let info = self.func.var(var);
            let size = info.size();
            let type_code = if stack_reg == Some(var) {
                TypeCode::StackRelative
            } else {
                TypeCode::Absolute
            };

            let (opcode, num_inputs, range, is_root) = if let Some(c) = info.constant() {
                (None, 0, CircleRange::single(c, size), true)
            } else if stack_reg == Some(var) {
                // The base register contributes offset zero.
                (None, 0, CircleRange::single(0, size), true)
            } else if let Some(def) = info.def() {
                let op = self.func.op(def);
                for &input in op.inputs() {
                    if self.func.var(input).constant().is_none() {
                        worklist.push(input);
                    }
                }
                (
                    Some(op.opcode()),
                    op.num_inputs(),
                    CircleRange::empty(),
                    false,
                )
            } else {
                (None, 0, CircleRange::full(size), true)
            };

            let mut vs = ValueSet::new(var, type_code, opcode, num_inputs);
            vs.range = range;
            let id = self.value_sets.alloc(vs);
            self.map.insert(var, id);
            if is_root {
                self.root_nodes.push(id);
            }
        }
        debug!(
            "value-set system: {} nodes, {} roots",
            self.value_sets.len(),
            self.root_nodes.len()
        );

        self.propagate_type_codes();
        self.generate_constraints();
        self.establish_topological_order();
        Ok(())
    }

    /// Forward pass marking value sets that carry stack offsets: copies
    /// and merges of a relative value, and additions or subtractions of
    /// a constant to one.
    fn propagate_type_codes(&mut self) {
        let ids: Vec<ValueSetId> = self.value_sets.iter().map(|(id, _)| id).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &id in &ids {
                let vs = &self.value_sets[id];
                if vs.type_code == TypeCode::StackRelative {
                    continue;
                }
                let Some(opc) = vs.opcode else { continue };
                let def = self.func.var(vs.var).def().expect("defined node");
                let inputs = self.func.op(def).inputs();
                let relative = |solver: &Self, v: Var| {
                    solver
                        .map
                        .get(&v)
                        .map(|&i| solver.value_sets[i].type_code == TypeCode::StackRelative)
                        .unwrap_or(false)
                };
                let rel_count = inputs.iter().filter(|&&v| relative(self, v)).count();
                let becomes_relative = match opc {
                    OpCode::Copy | OpCode::MultiEqual => rel_count > 0,
                    OpCode::IntAdd | OpCode::IntSub => {
                        rel_count == 1
                            && inputs
                                .iter()
                                .all(|&v| relative(self, v) || self.func.var(v).constant().is_some())
                    }
                    _ => false,
                };
                if becomes_relative {
                    self.value_sets[id].type_code = TypeCode::StackRelative;
                    changed = true;
                }
            }
        }
    }

    // -- Fixpoint -----------------------------------------------------------

    /// Recompute one node's range from its inputs. Returns true if the
    /// range changed.
    pub(crate) fn iterate(&mut self, id: ValueSetId) -> bool {
        let (var, opcode, out_rel) = {
            let vs = &self.value_sets[id];
            (vs.var, vs.opcode, vs.type_code == TypeCode::StackRelative)
        };
        let Some(opc) = opcode else {
            // Roots keep their seeded range.
            return false;
        };
        if self.value_sets[id].range.is_full() {
            // Already at top; nothing can move it.
            return false;
        }
        self.value_sets[id].looped();

        let def = self.func.var(var).def().expect("defined node");
        let op = self.func.op(def);
        let out_size = self.func.var(var).size();
        let inputs = op.inputs();

        // Gather input ranges, applying any branch-derived equations.
        let mut in_ranges = std::mem::take(&mut self.scratch_ranges);
        let mut in_rel = std::mem::take(&mut self.scratch_rel);
        in_ranges.clear();
        in_rel.clear();
        for (slot, &v) in inputs.iter().enumerate() {
            let vinfo = self.func.var(v);
            let (mut r, rel) = match vinfo.constant() {
                Some(c) => (CircleRange::single(c, vinfo.size()), false),
                None => {
                    let src = self.map[&v];
                    let vs = &self.value_sets[src];
                    (vs.range, vs.type_code == TypeCode::StackRelative)
                }
            };
            if let Some(eq) = self.value_sets[id].equation(slot) {
                r.intersect(&eq.clone());
            }
            in_ranges.push(r);
            in_rel.push(rel);
        }

        let mixes_cleanly = match opc {
            OpCode::Copy | OpCode::MultiEqual => {
                in_rel.iter().all(|&r| r == out_rel)
            }
            OpCode::IntAdd | OpCode::IntSub => {
                let rel_count = in_rel.iter().filter(|&&r| r).count();
                if out_rel {
                    rel_count == 1
                } else {
                    rel_count == 0 || (opc == OpCode::IntSub && rel_count == 2)
                }
            }
            _ => !in_rel.iter().any(|&r| r),
        };

        let new_range = if !mixes_cleanly {
            CircleRange::full(out_size)
        } else if in_ranges.iter().any(|r| r.is_empty()) && opc != OpCode::MultiEqual {
            // An input not yet computed this sweep; nothing to add.
            CircleRange::empty()
        } else {
            match opc {
                OpCode::Copy => in_ranges[0],
                OpCode::MultiEqual => {
                    let mut merged = CircleRange::empty();
                    for r in &in_ranges {
                        if merged.circle_union(r) == UnionStatus::Failed {
                            merged.minimal_container(r, self.config.max_step);
                        }
                    }
                    merged
                }
                _ if inputs.len() == 1 => {
                    let in_size = self.func.var(inputs[0]).size();
                    CircleRange::push_forward_unary(opc, &in_ranges[0], in_size, out_size)
                }
                _ => {
                    let in_size = self.func.var(inputs[0]).size();
                    CircleRange::push_forward_binary(
                        opc,
                        &in_ranges[0],
                        &in_ranges[1],
                        in_size,
                        out_size,
                        self.config.max_step,
                    )
                }
            }
        };

        self.scratch_ranges = in_ranges;
        self.scratch_rel = in_rel;

        let previous = self.value_sets[id].range;
        let mut updated = previous;
        if updated.circle_union(&new_range) == UnionStatus::Failed {
            updated.minimal_container(&new_range, self.config.max_step);
        }

        if updated != previous && !previous.is_empty() {
            let count = self.value_sets[id].count;
            if count >= self.config.full_threshold {
                // Still moving after all grace; force convergence.
                updated = CircleRange::full(out_size);
            } else if count == self.config.widening_threshold {
                updated = self.do_widening(id, &previous, updated);
            }
        }

        let changed = updated != previous;
        self.value_sets[id].range = updated;
        changed
    }

    /// One attempt to jump a still-moving range out to the node's
    /// landmark (or the landmark's complement). Without a landmark, or
    /// outside either region, the plain union is kept and growth
    /// continues until the full threshold.
    fn do_widening(
        &mut self,
        id: ValueSetId,
        previous: &CircleRange,
        updated: CircleRange,
    ) -> CircleRange {
        let left_is_stable = previous.min() == updated.min();
        let Some(mark) = self.value_sets[id].landmark().copied() else {
            return updated;
        };
        let mut result = updated;
        if mark.contains_all(&updated) {
            result.widen(&mark, left_is_stable);
        } else {
            let mut inverted = mark;
            if inverted.invert() && inverted.contains_all(&updated) {
                result.widen(&inverted, left_is_stable);
            } else {
                return updated;
            }
        }
        trace!(
            "widening {:?}: {} -> {}",
            self.value_sets[id].var,
            updated,
            result
        );
        result
    }

    /// Iterate the system to a fixpoint, or stop after `max` individual
    /// node iterations. A forced stop still leaves every range a sound
    /// over-approximation of what has been seen so far.
    pub fn solve(&mut self, max: usize) -> SolveOutcome {
        self.num_iterations = 0;
        for (_, vs) in self.value_sets.iter_mut() {
            vs.count = 0;
        }

        let mut component_stack: Vec<PartitionId> = Vec::new();
        let mut cur_component: Option<PartitionId> = None;
        let mut cur = self.order.start;

        while let Some(node) = cur {
            self.num_iterations += 1;
            if self.num_iterations > max {
                debug!("iteration ceiling {} reached", max);
                return SolveOutcome::IterationLimit;
            }

            if let Some(head) = self.value_sets[node].part_head {
                if cur_component != Some(head) {
                    component_stack.push(head);
                    cur_component = Some(head);
                    self.partitions[head].dirty = false;
                }
            }

            if self.iterate(node) {
                // A change anywhere re-dirties every enclosing component.
                for &pid in &component_stack {
                    self.partitions[pid].dirty = true;
                }
            }

            // Leaving a component tail: restart it while dirty, and keep
            // unwinding where several components end on the same node.
            loop {
                let Some(component) = cur_component else {
                    cur = self.value_sets[node].next;
                    break;
                };
                if self.partitions[component].stop != node {
                    cur = self.value_sets[node].next;
                    break;
                }
                if self.partitions[component].dirty {
                    self.partitions[component].dirty = false;
                    cur = Some(self.partitions[component].start);
                    break;
                }
                component_stack.pop();
                cur_component = component_stack.last().copied();
            }
        }
        debug!("converged after {} iterations", self.num_iterations);
        SolveOutcome::Converged
    }
}
