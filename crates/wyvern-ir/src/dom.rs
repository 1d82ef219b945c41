//! Dominator tree over the block graph.
//!
//! Uses the iterative reverse-postorder refinement: cheap to build at the
//! block counts seen in single functions, and `dominates` walks the idom
//! chain so no dominance matrix is materialized.

use crate::arena::Arena;
use crate::dfg::{Block, BlockInfo};

#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: Block,
    /// Immediate dominator per raw block index; `None` for the entry and
    /// for unreachable blocks.
    idom: Vec<Option<Block>>,
}

impl DominatorTree {
    pub(crate) fn build(blocks: &Arena<BlockInfo, Block>, entry: Block) -> Self {
        let order = postorder(blocks, entry);
        let mut po_index = vec![usize::MAX; blocks.len()];
        for (i, &b) in order.iter().enumerate() {
            po_index[b.raw()] = i;
        }

        let mut idom: Vec<Option<Block>> = vec![None; blocks.len()];
        idom[entry.raw()] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            // Reverse postorder, entry excluded.
            for &b in order.iter().rev() {
                if b == entry {
                    continue;
                }
                let mut new_idom: Option<Block> = None;
                for &p in blocks[b].preds.iter() {
                    if idom[p.raw()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &po_index, p, cur),
                    });
                }
                if new_idom.is_some() && idom[b.raw()] != new_idom {
                    idom[b.raw()] = new_idom;
                    changed = true;
                }
            }
        }
        idom[entry.raw()] = None;
        DominatorTree { entry, idom }
    }

    pub fn entry(&self) -> Block {
        self.entry
    }

    /// The immediate dominator of `b`, or `None` for the entry and for
    /// blocks unreachable from it.
    pub fn immediate_dominator(&self, b: Block) -> Option<Block> {
        self.idom[b.raw()]
    }

    /// True if `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        if a == b {
            return true;
        }
        let mut current = b;
        while let Some(up) = self.idom[current.raw()] {
            if up == a {
                return true;
            }
            current = up;
        }
        false
    }
}

fn postorder(blocks: &Arena<BlockInfo, Block>, entry: Block) -> Vec<Block> {
    let mut seen = vec![false; blocks.len()];
    let mut order = Vec::with_capacity(blocks.len());
    // (block, next successor index) frames.
    let mut stack: Vec<(Block, usize)> = vec![(entry, 0)];
    seen[entry.raw()] = true;
    while let Some(top) = stack.last_mut() {
        let b = top.0;
        let succs = &blocks[b].succs;
        if top.1 < succs.len() {
            let s = succs[top.1];
            top.1 += 1;
            if !seen[s.raw()] {
                seen[s.raw()] = true;
                stack.push((s, 0));
            }
        } else {
            order.push(b);
            stack.pop();
        }
    }
    order
}

/// Walk the two idom chains upward (by postorder number) until they meet.
fn intersect(
    idom: &[Option<Block>],
    po_index: &[usize],
    mut a: Block,
    mut b: Block,
) -> Block {
    while a != b {
        while po_index[a.raw()] < po_index[b.raw()] {
            a = idom[a.raw()].expect("processed predecessor has an idom");
        }
        while po_index[b.raw()] < po_index[a.raw()] {
            b = idom[b.raw()].expect("processed predecessor has an idom");
        }
    }
    a
}
