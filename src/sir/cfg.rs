//! Control-flow neighborhoods for the definite-initialization walks.
//!
//! The liveness fixpoint recurses through predecessors and the diagnostic
//! filter walks successors from the entry; both consume this snapshot,
//! which is captured before the rewriter starts mutating the CFG.

use std::collections::{HashMap, HashSet};

use crate::sir::ir::{BlockId, Function, Terminator};

/// Predecessor and successor maps for one function.
pub struct Cfg {
    entry: BlockId,
    preds: HashMap<BlockId, Vec<BlockId>>,
    succs: HashMap<BlockId, Vec<BlockId>>,
}

impl Cfg {
    pub fn new(func: &Function) -> Self {
        let entry = func.entry_block();
        let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        let mut succs: HashMap<BlockId, Vec<BlockId>> = HashMap::new();

        for block in &func.blocks {
            let targets = branch_targets(&block.term);
            for &target in &targets {
                // A conditional branch with both arms on one target still
                // contributes a single predecessor edge.
                let edges = preds.entry(target).or_default();
                if !edges.contains(&block.id) {
                    edges.push(block.id);
                }
            }
            succs.insert(block.id, targets);
        }

        Self {
            entry,
            preds,
            succs,
        }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        self.preds.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        self.succs.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The set of blocks a path from the entry can reach.
    ///
    /// Definite-initialization diagnostics are suppressed outside this set
    /// (such blocks hold synthesized code a cleanup pass will drop), so
    /// callers compute it lazily, on the first error.
    pub fn reachable_from_entry(&self) -> HashSet<BlockId> {
        let mut reachable = HashSet::new();
        reachable.insert(self.entry);
        let mut worklist = vec![self.entry];
        while let Some(block) = worklist.pop() {
            for &succ in self.succs(block) {
                if reachable.insert(succ) {
                    worklist.push(succ);
                }
            }
        }
        reachable
    }
}

fn branch_targets(term: &Terminator) -> Vec<BlockId> {
    match term {
        Terminator::Br { target, .. } => vec![*target],
        Terminator::CondBr {
            then_bb, else_bb, ..
        } => {
            if then_bb == else_bb {
                vec![*then_bb]
            } else {
                vec![*then_bb, *else_bb]
            }
        }
        Terminator::Return { .. } | Terminator::Unreachable => Vec::new(),
    }
}
