//! Weak topological ordering of the value-set graph.
//!
//! The data-flow graph (edges run definition to use) is linearized so
//! that every strongly-connected component sits contiguously behind its
//! head, components nesting recursively: Bourdoncle's decomposition.
//! The recursion of the textbook algorithm is converted to an explicit
//! frame stack so deeply nested loops cannot exhaust the call stack.

use crate::solver::ValueSetSolver;
use crate::valueset::{PartitionId, ValueSetId};

/// A contiguous run of the weak topological order forming one
/// strongly-connected component.
#[derive(Clone, Copy, Debug)]
pub struct Partition {
    pub(crate) start: ValueSetId,
    pub(crate) stop: ValueSetId,
    pub(crate) dirty: bool,
}

impl Partition {
    pub fn start(&self) -> ValueSetId {
        self.start
    }

    pub fn stop(&self) -> ValueSetId {
        self.stop
    }
}

/// A partition under construction: a chain of nodes threaded through
/// their `next` links.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PartChain {
    pub(crate) start: Option<ValueSetId>,
    pub(crate) stop: Option<ValueSetId>,
}

/// Enumerates the graph successors of one node: the value sets computed
/// by operations reading this node's variable. The simulated root, used
/// to kick off the traversal, has the root nodes as successors.
pub(crate) struct ValueSetEdge {
    targets: Vec<ValueSetId>,
    pos: usize,
}

impl ValueSetEdge {
    pub(crate) fn new(solver: &ValueSetSolver<'_>, node: ValueSetId) -> Self {
        let var = solver.value_sets[node].var;
        let mut targets = Vec::new();
        for vu in solver.func.var(var).uses() {
            if let Some(out) = solver.func.op(vu.op).output() {
                if let Some(&succ) = solver.map.get(&out) {
                    targets.push(succ);
                }
            }
        }
        ValueSetEdge { targets, pos: 0 }
    }

    pub(crate) fn next(&mut self) -> Option<ValueSetId> {
        let t = self.targets.get(self.pos).copied();
        self.pos += 1;
        t
    }
}

enum Phase {
    /// Ordinary depth-first visit, tracking the minimum head reached.
    Visit,
    /// Re-scanning a loop head's successors to rebuild its component.
    Component,
}

struct Frame {
    node: ValueSetId,
    phase: Phase,
    edge: ValueSetEdge,
    head: u32,
    looped: bool,
    /// Which entry of the partition-build stack this frame prepends to.
    part: usize,
    /// The chain collecting this node's component while in
    /// [`Phase::Component`].
    comp_part: usize,
}

impl ValueSetSolver<'_> {
    /// Linearize the value-set graph into `self.order`: a weak
    /// topological order with every loop head preceding its body.
    pub(crate) fn establish_topological_order(&mut self) {
        for (_, vs) in self.value_sets.iter_mut() {
            vs.count = 0;
            vs.next = None;
            vs.part_head = None;
        }
        self.node_stack.clear();
        self.dfi = 0;

        let mut parts: Vec<PartChain> = vec![PartChain::default()];
        let roots = self.root_nodes.clone();
        for root in roots {
            if self.value_sets[root].count == 0 {
                self.run_visit(root, &mut parts);
            }
        }
        // Components with no external input are unreachable from the
        // roots but still need a place in the order.
        let all: Vec<ValueSetId> = self.value_sets.iter().map(|(id, _)| id).collect();
        for id in all {
            if self.value_sets[id].count == 0 {
                self.run_visit(id, &mut parts);
            }
        }
        debug_assert_eq!(parts.len(), 1);
        self.order = parts.pop().unwrap_or_default();
        debug_assert!(self.node_stack.is_empty());
    }

    /// One outermost `visit` call, iterated with explicit frames.
    fn run_visit(&mut self, root: ValueSetId, parts: &mut Vec<PartChain>) {
        let mut frames: Vec<Frame> = vec![self.enter_visit(root, 0)];
        let mut returned: Option<u32> = None;

        while let Some(frame) = frames.last_mut() {
            match frame.phase {
                Phase::Visit => {
                    if let Some(min) = returned.take() {
                        if min <= frame.head {
                            frame.head = min;
                            frame.looped = true;
                        }
                    }
                    let mut descend = None;
                    while let Some(succ) = frame.edge.next() {
                        let seen = self.value_sets[succ].count;
                        if seen == 0 {
                            descend = Some(succ);
                            break;
                        }
                        if seen <= frame.head {
                            frame.head = seen;
                            frame.looped = true;
                        }
                    }
                    if let Some(succ) = descend {
                        let part = frame.part;
                        frames.push(self.enter_visit(succ, part));
                        continue;
                    }
                    // All successors examined.
                    let node = frame.node;
                    let head = frame.head;
                    if head == self.value_sets[node].count {
                        self.value_sets[node].count = u32::MAX;
                        let mut popped = self.node_stack.pop().expect("visit stack");
                        if frame.looped {
                            while popped != node {
                                self.value_sets[popped].count = 0;
                                popped = self.node_stack.pop().expect("visit stack");
                            }
                            // Decompose the subgraph under this head.
                            parts.push(PartChain::default());
                            frame.phase = Phase::Component;
                            frame.comp_part = parts.len() - 1;
                            frame.edge = ValueSetEdge::new(self, node);
                            continue;
                        }
                        debug_assert_eq!(popped, node);
                        prepend_node(&mut parts[frame.part], node, self);
                    }
                    returned = Some(head);
                    frames.pop();
                }
                Phase::Component => {
                    returned = None;
                    let mut descend = None;
                    while let Some(succ) = frame.edge.next() {
                        if self.value_sets[succ].count == 0 {
                            descend = Some(succ);
                            break;
                        }
                    }
                    if let Some(succ) = descend {
                        let part = frame.comp_part;
                        frames.push(self.enter_visit(succ, part));
                        continue;
                    }
                    // The component below the head is fully ordered.
                    let node = frame.node;
                    let head = frame.head;
                    let parent = frame.part;
                    debug_assert_eq!(frame.comp_part, parts.len() - 1);
                    let mut comp = parts.pop().expect("component chain");
                    prepend_node(&mut comp, node, self);
                    let pid = self.partitions.alloc(Partition {
                        start: comp.start.expect("component start"),
                        stop: comp.stop.expect("component stop"),
                        dirty: false,
                    });
                    self.value_sets[node].part_head = Some(pid);
                    prepend_chain(&mut parts[parent], comp, self);
                    returned = Some(head);
                    frames.pop();
                }
            }
        }
    }

    fn enter_visit(&mut self, node: ValueSetId, part: usize) -> Frame {
        self.node_stack.push(node);
        self.dfi += 1;
        self.value_sets[node].count = self.dfi;
        Frame {
            node,
            phase: Phase::Visit,
            edge: ValueSetEdge::new(self, node),
            head: self.dfi,
            looped: false,
            part,
            comp_part: 0,
        }
    }
}

fn prepend_node(chain: &mut PartChain, node: ValueSetId, solver: &mut ValueSetSolver<'_>) {
    solver.value_sets[node].next = chain.start;
    chain.start = Some(node);
    if chain.stop.is_none() {
        chain.stop = Some(node);
    }
}

fn prepend_chain(outer: &mut PartChain, head: PartChain, solver: &mut ValueSetSolver<'_>) {
    let (Some(start), Some(stop)) = (head.start, head.stop) else {
        return;
    };
    solver.value_sets[stop].next = outer.start;
    outer.start = Some(start);
    if outer.stop.is_none() {
        outer.stop = Some(stop);
    }
}
