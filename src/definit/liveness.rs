//! Per-block state and the liveness query.
//!
//! Answers "what is the initialization state of elements `[first, first+n)`
//! immediately before this instruction" by scanning backward inside the
//! block and recursing into predecessor live-outs, caching per-block
//! results as the fixpoint settles. Cycles are broken by the `Computing`
//! marker, which contributes bottom and lets other paths define the join.

use indexmap::IndexMap;

use crate::definit::lattice::{AvailabilitySet, DiKind, merge_kinds};
use crate::definit::memory::MemoryUse;
use crate::sir::cfg::Cfg;
use crate::sir::ir::{BlockId, Function, InstId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LiveOutState {
    Unknown,
    Computing,
    Known,
}

/// Cached per-block facts about one memory object.
#[derive(Debug, Clone)]
pub(super) struct BlockState {
    /// Whether the block holds a store, inout use, or other
    /// liveness-defining use.
    pub has_non_load_use: bool,
    /// Live-out availability; only authoritative once `lo_state` is
    /// `Known`. Before that it holds local availability only.
    pub availability: AvailabilitySet,
    pub lo_state: LiveOutState,
}

impl BlockState {
    pub fn new(num_elements: usize) -> Self {
        Self {
            has_non_load_use: false,
            availability: AvailabilitySet::new(num_elements),
            lo_state: LiveOutState::Unknown,
        }
    }
}

/// A liveness query over the checker's block-state cache.
pub(super) struct Liveness<'a> {
    pub func: &'a Function,
    pub cfg: &'a Cfg,
    /// The memory-defining instruction; scanning past it means the memory
    /// does not exist yet.
    pub memory_inst: InstId,
    pub num_elements: usize,
    pub uses: &'a [MemoryUse],
    /// Non-load uses by instruction; `None` marks the memory-defining
    /// instruction itself.
    pub non_load_uses: &'a IndexMap<InstId, Option<usize>>,
    pub per_block: &'a mut IndexMap<BlockId, BlockState>,
}

impl<'a> Liveness<'a> {
    /// Availability of `[first_elt, first_elt + num_elts)` immediately
    /// before `inst`. Slots outside the range are unspecified.
    pub fn liveness_at(
        &mut self,
        inst: InstId,
        first_elt: usize,
        num_elts: usize,
    ) -> AvailabilitySet {
        let mut result = AvailabilitySet::new(self.num_elements);

        // Empty queries don't care about any element.
        if num_elts == 0 {
            return result;
        }

        let inst_bb = self.func.inst(inst).block;

        // The vastly most common case is single-element memory, which has
        // a cheaper scan.
        if self.num_elements == 1 {
            if self.block_state(inst_bb).has_non_load_use {
                let pos = self.func.position_in_block(inst);
                let block = self.func.block(inst_bb);
                for &prev in block.insts[..pos].iter().rev() {
                    if !self.non_load_uses.contains_key(&prev) {
                        continue;
                    }
                    // Reaching the allocation itself means the memory is
                    // not defined yet; any other non-load use defines it.
                    result.set(
                        0,
                        if prev == self.memory_inst {
                            DiKind::No
                        } else {
                            DiKind::Yes
                        },
                    );
                    return result;
                }
            }

            let mut value = None;
            self.preds_live_out_1(inst_bb, &mut value);

            // An unknown result means the query ran inside a cycle not
            // dominated by the allocation; force Yes so callers never see
            // bottom.
            result.set(0, value.unwrap_or(DiKind::Yes));
            return result;
        }

        // Track which elements are still unsatisfied by the local scan.
        let mut needed = vec![false; self.num_elements];
        for elt in first_elt..first_elt + num_elts {
            needed[elt] = true;
        }

        if self.block_state(inst_bb).has_non_load_use {
            let pos = self.func.position_in_block(inst);
            let block = self.func.block(inst_bb);
            for &prev in block.insts[..pos].iter().rev() {
                let Some(entry) = self.non_load_uses.get(&prev) else {
                    continue;
                };

                if prev == self.memory_inst {
                    // The scan hit the allocation: everything still needed
                    // is uninitialized, everything satisfied was stored
                    // after it.
                    for elt in first_elt..first_elt + num_elts {
                        result.set(elt, if needed[elt] { DiKind::No } else { DiKind::Yes });
                    }
                    return result;
                }

                let use_ = &self.uses[entry.expect("non-load use without record")];
                for elt in use_.range() {
                    needed[elt] = false;
                }
                if !needed.iter().any(|&pending| pending) {
                    result.change_unset_to(DiKind::Yes);
                    return result;
                }
            }
        }

        self.preds_live_out_n(inst_bb, &mut result);

        // Locally satisfied elements win over predecessor merges, and
        // still-unknown slots (unreachable cycles) are forced to Yes.
        for elt in first_elt..first_elt + num_elts {
            if !needed[elt] || result.get_conditional(elt).is_none() {
                result.set(elt, DiKind::Yes);
            }
        }
        result
    }

    fn block_state(&mut self, block: BlockId) -> &mut BlockState {
        self.per_block
            .entry(block)
            .or_insert_with(|| BlockState::new(self.num_elements))
    }

    fn live_out_1(&mut self, block: BlockId) -> Option<DiKind> {
        {
            let state = self.block_state(block);
            match state.lo_state {
                LiveOutState::Known => return state.availability.get_conditional(0),
                // Cycles contribute no information; other paths feeding the
                // join define the result.
                LiveOutState::Computing => return None,
                LiveOutState::Unknown => {}
            }

            // A local definite initialization dominates anything the
            // predecessors might say.
            if state.availability.get_conditional(0) == Some(DiKind::Yes) {
                state.lo_state = LiveOutState::Known;
                return Some(DiKind::Yes);
            }

            state.lo_state = LiveOutState::Computing;
        }

        let mut result = self.block_state(block).availability.get_conditional(0);
        self.preds_live_out_1(block, &mut result);

        let state = self.block_state(block);
        match result {
            Some(kind) => {
                state.availability.set(0, kind);
                state.lo_state = LiveOutState::Known;
            }
            // Do not cache a bottom answer: a cycle may close with more
            // information on a later query.
            None => state.lo_state = LiveOutState::Unknown,
        }
        result
    }

    fn preds_live_out_1(&mut self, block: BlockId, result: &mut Option<DiKind>) {
        let preds: Vec<BlockId> = self.cfg.preds(block).to_vec();
        for pred in preds {
            *result = merge_kinds(*result, self.live_out_1(pred));
        }
    }

    fn live_out_n(&mut self, block: BlockId) -> AvailabilitySet {
        {
            let state = self.block_state(block);
            match state.lo_state {
                LiveOutState::Known => return state.availability.clone(),
                LiveOutState::Computing => return AvailabilitySet::new(self.num_elements),
                LiveOutState::Unknown => {}
            }
            state.lo_state = LiveOutState::Computing;
        }

        let mut result = AvailabilitySet::new(self.num_elements);
        self.preds_live_out_n(block, &mut result);

        let state = self
            .per_block
            .get_mut(&block)
            .expect("block state inserted above");

        // Local definite initializations win over the predecessor merge; a
        // No from one path never demotes a locally stored element.
        for elt in 0..state.availability.len() {
            if state.availability.get_conditional(elt) == Some(DiKind::Yes) {
                result.set(elt, DiKind::Yes);
            }
        }

        if result.contains_unknown() {
            // Do not cache a partial answer (see live_out_1).
            state.lo_state = LiveOutState::Unknown;
        } else {
            state.availability = result.clone();
            state.lo_state = LiveOutState::Known;
        }
        result
    }

    fn preds_live_out_n(&mut self, block: BlockId, result: &mut AvailabilitySet) {
        let preds: Vec<BlockId> = self.cfg.preds(block).to_vec();
        for pred in preds {
            let pred_out = self.live_out_n(pred);
            result.merge_in(&pred_out);
        }
    }
}
