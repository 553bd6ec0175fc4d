//! The lifetime checker: definite-initialization analysis of one memory
//! object.
//!
//! Walks the collected use list, verifies every use observes initialized
//! memory on all inbound paths, resolves ambiguous init-or-assign stores,
//! and hands dynamically ambiguous cases to the conditional rewriter.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::definit::errors::DiDiagnostic;
use crate::definit::lattice::{AvailabilitySet, DiKind};
use crate::definit::liveness::{BlockState, LiveOutState, Liveness};
use crate::definit::memory::{MemoryObject, MemoryUse, UseKind};
use crate::diag::Span;
use crate::sir::cfg::Cfg;
use crate::sir::ir::{BlockId, Callee, Function, InstId, InstKind, Terminator};
use crate::sir::types::TypeTable;

pub(super) struct LifetimeChecker<'a> {
    pub(super) func: &'a mut Function,
    pub(super) types: &'a mut TypeTable,
    pub(super) memory: MemoryObject,
    /// Grows while rewriting appends records; iterate by index and skip
    /// tombstones.
    pub(super) uses: Vec<MemoryUse>,
    /// Tombstoned with `None` when a release is rewritten away.
    pub(super) releases: Vec<Option<InstId>>,
    /// Releases reaching memory that is live only on some paths, with the
    /// availability observed at the release.
    pub(super) conditional_destroys: Vec<(usize, AvailabilitySet)>,
    pub(super) per_block: IndexMap<BlockId, BlockState>,
    /// Non-load uses by instruction; `None` marks the memory-defining
    /// instruction.
    pub(super) non_load_uses: IndexMap<InstId, Option<usize>>,
    /// Predecessor map captured before any rewriting mutates the CFG.
    pub(super) cfg: Cfg,
    pub(super) has_conditional_init_assign_or_destroys: bool,
    pub(super) emitted_error_locs: Vec<Span>,
    reachable_from_entry: Option<HashSet<BlockId>>,
    pub(super) diags: &'a mut Vec<DiDiagnostic>,
}

impl<'a> LifetimeChecker<'a> {
    pub(super) fn new(
        func: &'a mut Function,
        types: &'a mut TypeTable,
        memory: MemoryObject,
        uses: Vec<MemoryUse>,
        releases: Vec<InstId>,
        diags: &'a mut Vec<DiDiagnostic>,
    ) -> Self {
        let num_elements = memory.num_elements();
        let cfg = Cfg::new(func);
        let mut per_block: IndexMap<BlockId, BlockState> = IndexMap::new();
        let mut non_load_uses: IndexMap<InstId, Option<usize>> = IndexMap::new();

        for (idx, use_) in uses.iter().enumerate() {
            let inst = use_.inst.expect("collected use without instruction");

            // Loads and escapes are checked but are not definition points
            // for liveness purposes.
            if matches!(use_.kind, UseKind::Load | UseKind::Escape) {
                continue;
            }

            non_load_uses.insert(inst, Some(idx));

            let block = func.inst(inst).block;
            let state = per_block
                .entry(block)
                .or_insert_with(|| BlockState::new(num_elements));
            state.has_non_load_use = true;

            // Non-load uses are checked to be live-in or full stores, so
            // the block acts as a live-out for cross-block analysis.
            if num_elements != 0 {
                for elt in use_.range() {
                    state.availability.set(elt, DiKind::Yes);
                }
            }

            // A block with every element locally available is already a
            // known live-out; the norm for single-element memory.
            if state.availability.is_all(DiKind::Yes) {
                state.lo_state = LiveOutState::Known;
            }
        }

        // The allocation itself participates in the dataflow walks even
        // though it is not a use: memory is uninitialized at its
        // definition.
        non_load_uses.insert(memory.inst, None);
        let mem_block = func.inst(memory.inst).block;
        let state = per_block
            .entry(mem_block)
            .or_insert_with(|| BlockState::new(num_elements));
        state.has_non_load_use = true;
        state.availability.change_unset_to(DiKind::No);
        state.lo_state = LiveOutState::Known;

        Self {
            func,
            types,
            memory,
            uses,
            releases: releases.into_iter().map(Some).collect(),
            conditional_destroys: Vec::new(),
            per_block,
            non_load_uses,
            cfg,
            has_conditional_init_assign_or_destroys: false,
            emitted_error_locs: Vec::new(),
            reachable_from_entry: None,
            diags,
        }
    }

    pub(super) fn run(&mut self) {
        // The use list can grow and reallocate as rewriting appends
        // records, so this must not be a for-each loop.
        let mut idx = 0;
        while idx < self.uses.len() {
            let use_ = self.uses[idx].clone();
            let Some(inst) = use_.inst else {
                idx += 1;
                continue;
            };

            match use_.kind {
                // The frontend only emits these when it knows they are
                // correct; nothing to check.
                UseKind::Initialization | UseKind::Assign => {}

                UseKind::InitOrAssign => {
                    // Plain stores of stack values go through multiple
                    // init/destroy cycles for loop codegen; accept them as
                    // initializations without a liveness query.
                    if !matches!(self.func.inst(inst).kind, InstKind::Store { .. }) {
                        self.handle_store_use(idx);
                    }
                }

                UseKind::PartialStore => self.handle_store_use(idx),

                UseKind::Load | UseKind::IndirectIn => {
                    let (initialized, super_init_done) = self.is_initialized_at_use(&use_);
                    if !initialized {
                        self.handle_load_use_failure(&use_, super_init_done);
                    }
                }

                UseKind::InOut => self.handle_inout_use(&use_),

                UseKind::Escape => self.handle_escape_use(&use_),

                UseKind::SuperInit => self.handle_super_init_use(&use_),

                UseKind::SelfInit => self.handle_self_init_use(idx),
            }

            idx += 1;
        }

        // An invalid program gets diagnostics, not rewritten IR.
        if !self.emitted_error_locs.is_empty() {
            return;
        }

        // Releases of nontrivial memory destruct whatever is live; adjust
        // them for paths where the memory is only partially set up.
        if !self.memory.is_trivial(self.types) {
            for release_idx in 0..self.releases.len() {
                self.process_non_trivial_release(release_idx);
            }
        }
        if !self.emitted_error_locs.is_empty() {
            return;
        }

        let mut control_addr = None;
        if self.has_conditional_init_assign_or_destroys {
            control_addr = Some(self.handle_conditional_init_assign());
        }
        if !self.conditional_destroys.is_empty() {
            self.handle_conditional_destroys(control_addr);
        }
    }

    pub(super) fn liveness_at(
        &mut self,
        inst: InstId,
        first_elt: usize,
        num_elts: usize,
    ) -> AvailabilitySet {
        Liveness {
            func: &*self.func,
            cfg: &self.cfg,
            memory_inst: self.memory.inst,
            num_elements: self.memory.num_elements(),
            uses: self.uses.as_slice(),
            non_load_uses: &self.non_load_uses,
            per_block: &mut self.per_block,
        }
        .liveness_at(inst, first_elt, num_elts)
    }

    /// Whether every element the use touches is definitely initialized,
    /// and whether the super-init slot (when the use covers it) is.
    fn is_initialized_at_use(&mut self, use_: &MemoryUse) -> (bool, bool) {
        let inst = use_.inst.expect("checking a tombstoned use");
        let liveness = self.liveness_at(inst, use_.first_element, use_.num_elements);

        let num_elements = self.memory.num_elements();
        let mut super_init_done = true;
        if use_.first_element + use_.num_elements == num_elements
            && self.memory.is_derived_class_self()
            && liveness.get(num_elements - 1) != DiKind::Yes
        {
            super_init_done = false;
        }

        let initialized = use_.range().all(|elt| liveness.get(elt) == DiKind::Yes);
        (initialized, super_init_done)
    }

    // ===== store classification =====

    fn handle_store_use(&mut self, use_idx: usize) {
        let use_ = self.uses[use_idx].clone();
        let inst = use_.inst.expect("store use without instruction");
        let liveness = self.liveness_at(inst, use_.first_element, use_.num_elements);

        let mut fully_initialized = true;
        let mut fully_uninitialized = true;
        for elt in use_.range() {
            match liveness.get(elt) {
                DiKind::Yes => fully_uninitialized = false,
                DiKind::No => fully_initialized = false,
                DiKind::Partial => {
                    fully_initialized = false;
                    fully_uninitialized = false;
                }
            }
        }

        // A partial store writes one element of a larger object; the whole
        // object must already be set up.
        if use_.kind == UseKind::PartialStore && !fully_initialized {
            debug_assert_eq!(use_.num_elements, 1, "partial stores are intra-element");
            self.diagnose_init_error(&use_, |name, span| {
                DiDiagnostic::StructNotFullyInitialized(name, span)
            });
            return;
        }

        // Immutable elements admit exactly one initialization: anything
        // other than a definitely uninitialized slot is an overwrite.
        if use_.kind == UseKind::PartialStore || !fully_uninitialized {
            for elt in use_.range() {
                if liveness.get(elt) == DiKind::No || !self.memory.is_element_let(elt) {
                    continue;
                }
                if self.should_emit_error(inst) {
                    let name = self.memory.path_string_to(elt).to_string();
                    let span = self.diag_loc(inst);
                    self.diags
                        .push(DiDiagnostic::ImmutablePropertyAlreadyInitialized(name, span));
                }
                return;
            }
        }

        if fully_uninitialized {
            self.uses[use_idx].kind = UseKind::Initialization;
        } else if fully_initialized {
            self.uses[use_idx].kind = UseKind::Assign;
        } else {
            // Initialized on some paths only: needs dynamic control logic.
            debug_assert_eq!(
                use_.kind,
                UseKind::InitOrAssign,
                "only init-or-assign stores can be path-dependent"
            );
            if !use_.only_touches_trivial_elements(&self.memory, self.types) {
                self.has_conditional_init_assign_or_destroys = true;
            }
            return;
        }

        self.update_instruction_for_init_state(use_idx);
    }

    // ===== inout and escape uses =====

    fn handle_inout_use(&mut self, use_: &MemoryUse) {
        let (initialized, _) = self.is_initialized_at_use(use_);
        if !initialized {
            self.diagnose_init_error(use_, |name, span| {
                DiDiagnostic::VariableInOutBeforeInitialized(name, span)
            });
            return;
        }

        // Immutable elements may have their initial value set but never a
        // subsequent overwrite, which a mutable pass-by-address would
        // permit.
        let inst = use_.inst.expect("inout use without instruction");
        for elt in use_.range() {
            if !self.memory.is_element_let(elt) {
                continue;
            }
            if self.should_emit_error(inst) {
                let name = self.memory.path_string_to(elt).to_string();
                let span = self.diag_loc(inst);
                self.diags
                    .push(DiDiagnostic::ImmutablePropertyPassedInOut(name, span));
            }
            return;
        }
    }

    fn handle_escape_use(&mut self, use_: &MemoryUse) {
        let (initialized, _) = self.is_initialized_at_use(use_);
        if initialized {
            return;
        }
        let inst = use_.inst.expect("escape use without instruction");

        if self.memory.is_delegating_init() {
            // A load of self consumed only by the return is a return
            // before self.init; report that specifically.
            if self.load_feeds_return(inst) {
                if self.should_emit_error(inst) {
                    let span = self.diag_loc(inst);
                    self.diags
                        .push(DiDiagnostic::ReturnFromInitWithoutSelfInit(span));
                }
                return;
            }
            self.diagnose_init_error(use_, |_, span| {
                DiDiagnostic::SelfUseBeforeInitInDelegatingInit(span)
            });
            return;
        }

        if matches!(self.func.inst(inst).kind, InstKind::MarkFnEscape { .. }) {
            self.diagnose_init_error(use_, |name, span| {
                DiDiagnostic::GlobalVariableFunctionUseUninit(name, span)
            });
        } else if matches!(self.func.inst(inst).kind, InstKind::AddrToPtr { .. }) {
            self.diagnose_init_error(use_, |name, span| {
                DiDiagnostic::VariableAddrTakenBeforeInitialized(name, span)
            });
        } else {
            self.diagnose_init_error(use_, |name, span| {
                DiDiagnostic::VariableEscapeBeforeInitialized(name, span)
            });
        }
    }

    // ===== load failures =====

    /// Triage for a use of incompletely initialized memory: pick the most
    /// specific diagnostic the instruction shape supports.
    fn handle_load_use_failure(&mut self, use_: &MemoryUse, super_init_done: bool) {
        let inst = use_.inst.expect("load use without instruction");

        if self.load_feeds_return(inst) && self.memory.is_any_init_self() {
            if !self.should_emit_error(inst) {
                return;
            }
            let span = self.diag_loc(inst);
            if self.memory.is_enum_init_self() {
                self.diags
                    .push(DiDiagnostic::ReturnFromInitWithoutInitingSelf(span));
            } else if !super_init_done {
                self.diags.push(DiDiagnostic::SuperSelfInitNotCalledBeforeReturn(
                    self.memory.is_delegating_init(),
                    span,
                ));
            } else {
                self.diags
                    .push(DiDiagnostic::ReturnFromInitWithoutInitingStoredProperties(span));
                self.note_uninitialized_members(use_);
            }
            return;
        }

        // A method or accessor call on self gets named in the diagnostic.
        let method = match &self.func.inst(inst).kind {
            InstKind::Apply {
                callee: Callee::Method { name, accessor },
                ..
            } => Some((name.clone(), *accessor)),
            _ => None,
        };
        if let Some((name, accessor)) = method {
            if !self.should_emit_error(inst) {
                return;
            }
            let span = self.diag_loc(inst);
            self.diags.push(DiDiagnostic::SelfUseBeforeFullyInit(
                name,
                accessor,
                !super_init_done,
                span,
            ));
            if super_init_done {
                self.note_uninitialized_members(use_);
            }
            return;
        }

        if !super_init_done {
            if self.should_emit_error(inst) {
                let span = self.diag_loc(inst);
                self.diags.push(DiDiagnostic::SelfBeforeSuperSelfInit(
                    self.memory.is_delegating_init(),
                    span,
                ));
            }
            return;
        }

        // A call in a class initializer must be a use of self before the
        // stored properties are set up.
        if matches!(self.func.inst(inst).kind, InstKind::Apply { .. })
            && self.memory.is_class_init_self()
        {
            if self.should_emit_error(inst) {
                let span = self.diag_loc(inst);
                self.diags.push(DiDiagnostic::UseOfSelfBeforeFullyInit(span));
                self.note_uninitialized_members(use_);
            }
            return;
        }

        // A whole-self load in a struct/enum initializer likewise.
        if matches!(self.func.inst(inst).kind, InstKind::Load { .. })
            && self.memory.is_any_init_self()
            && !self.memory.is_class_init_self()
        {
            if self.should_emit_error(inst) {
                let span = self.diag_loc(inst);
                self.diags.push(DiDiagnostic::UseOfSelfBeforeFullyInit(span));
                self.note_uninitialized_members(use_);
            }
            return;
        }

        self.diagnose_init_error(use_, |name, span| {
            DiDiagnostic::VariableUsedBeforeInitialized(name, span)
        });
    }

    // ===== super.init / self.init =====

    fn handle_super_init_use(&mut self, use_: &MemoryUse) {
        let inst = use_.inst.expect("super.init use without instruction");
        let num_elements = self.memory.num_elements();
        let liveness = self.liveness_at(inst, 0, num_elements);

        // Only one super.init call is allowed.
        match liveness.get(num_elements - 1) {
            DiKind::No => {}
            DiKind::Yes | DiKind::Partial => {
                if self.should_emit_error(inst) {
                    let span = self.diag_loc(inst);
                    self.diags
                        .push(DiDiagnostic::SelfInitMultipleTimes(false, span));
                }
                return;
            }
        }

        // Every stored property must be initialized before the superclass
        // initializer runs.
        for elt in 0..num_elements - 1 {
            if liveness.get(elt) == DiKind::Yes {
                continue;
            }
            let implicit = self.func.inst(inst).loc.is_none();
            self.diagnose_init_error(use_, move |name, span| {
                if implicit {
                    DiDiagnostic::IvarNotInitializedAtImplicitSuperInit(name, span)
                } else {
                    DiDiagnostic::IvarNotInitializedAtSuperInit(name, span)
                }
            });
            return;
        }
    }

    fn handle_self_init_use(&mut self, use_idx: usize) {
        let use_ = self.uses[use_idx].clone();
        let inst = use_.inst.expect("self.init use without instruction");
        debug_assert_eq!(
            self.memory.num_elements(),
            1,
            "delegating initializers have a single element"
        );

        match self.liveness_at(inst, 0, 1).get(0) {
            DiKind::No => {}
            DiKind::Yes | DiKind::Partial => {
                // Only one self.init call is allowed; report it only as the
                // first problem found.
                if self.emitted_error_locs.is_empty() && self.should_emit_error(inst) {
                    let span = self.diag_loc(inst);
                    self.diags
                        .push(DiDiagnostic::SelfInitMultipleTimes(true, span));
                }
                return;
            }
        }

        // The call initializes self; make the instruction say so.
        if matches!(self.func.inst(inst).kind, InstKind::CopyAddr { .. }) {
            if let InstKind::CopyAddr { is_init, .. } = &mut self.func.inst_mut(inst).kind {
                *is_init = true;
            }
        } else if matches!(self.func.inst(inst).kind, InstKind::Assign { .. }) {
            self.update_instruction_for_init_state(use_idx);
        }
    }

    // ===== releases =====

    /// Adjusts one lifetime-ending instruction for paths where the memory
    /// is not (fully) initialized.
    fn process_non_trivial_release(&mut self, release_idx: usize) {
        let Some(inst) = self.releases[release_idx] else {
            return;
        };

        // Deallocations of the raw memory are explicit cleanup, not
        // destruction of its contents.
        if matches!(
            self.func.inst(inst).kind,
            InstKind::DeallocStack { .. } | InstKind::DeallocBox { .. } | InstKind::DeallocRef { .. }
        ) {
            return;
        }
        debug_assert!(matches!(
            self.func.inst(inst).kind,
            InstKind::Destroy { .. } | InstKind::ReleaseValue { .. }
        ));

        let num_elements = self.memory.num_elements();
        let availability = self.liveness_at(inst, 0, num_elements);

        // Fully live memory destructs as written.
        if availability.is_all(DiKind::Yes) {
            return;
        }

        // Partial cleanup of a class instance under construction is not
        // supported; a failing class initializer must have initialized
        // everything first.
        if self.memory.is_class_init_self() && self.should_emit_error(inst) {
            let span = self.diag_loc(inst);
            self.diags
                .push(DiDiagnostic::ObjectNotFullyInitializedBeforeFailure(span));
        }

        if availability.is_all(DiKind::No) {
            self.eliminate_dead_release(release_idx, inst);
            return;
        }

        if availability.has_any(DiKind::Partial) {
            self.has_conditional_init_assign_or_destroys = true;
        }
        self.conditional_destroys.push((release_idx, availability));
    }

    // ===== diagnostics plumbing =====

    pub(super) fn diag_loc(&self, inst: InstId) -> Span {
        self.func.inst(inst).loc.unwrap_or(self.func.loc)
    }

    /// Diagnostics fire once per source location, and never in blocks that
    /// cannot be reached from the entry (synthesized unreachable code).
    pub(super) fn should_emit_error(&mut self, inst: InstId) -> bool {
        let block = self.func.inst(inst).block;
        if !self.is_reachable_from_entry(block) {
            return false;
        }

        let loc = self.diag_loc(inst);
        if self.emitted_error_locs.contains(&loc) {
            return false;
        }
        self.emitted_error_locs.push(loc);
        true
    }

    fn is_reachable_from_entry(&mut self, block: BlockId) -> bool {
        let reachable = self
            .reachable_from_entry
            .get_or_insert_with(|| self.cfg.reachable_from_entry());
        reachable.contains(&block)
    }

    /// Symbolic name of the first uninitialized element a failing use
    /// touches.
    fn uninit_element_name(&mut self, use_: &MemoryUse) -> String {
        let inst = use_.inst.expect("naming a tombstoned use");
        let liveness = self.liveness_at(inst, use_.first_element, use_.num_elements);
        let elt = use_
            .range()
            .find(|&elt| liveness.get(elt) != DiKind::Yes)
            .expect("no uninitialized element in a failing use");
        self.memory.path_string_to(elt).to_string()
    }

    fn diagnose_init_error(
        &mut self,
        use_: &MemoryUse,
        make: impl FnOnce(String, Span) -> DiDiagnostic,
    ) {
        let inst = use_.inst.expect("diagnosing a tombstoned use");
        if !self.should_emit_error(inst) {
            return;
        }
        let name = self.uninit_element_name(use_);
        let span = self.diag_loc(inst);
        self.diags.push(make(name, span));
    }

    /// Notes naming each still-uninitialized stored property of a
    /// designated initializer's self.
    fn note_uninitialized_members(&mut self, use_: &MemoryUse) {
        if !self.memory.is_any_init_self() || self.memory.is_delegating_init() {
            return;
        }
        let inst = use_.inst.expect("noting a tombstoned use");
        let liveness = self.liveness_at(inst, use_.first_element, use_.num_elements);
        let num_elements = self.memory.num_elements();

        for elt in use_.range() {
            if liveness.get(elt) == DiKind::Yes {
                continue;
            }
            // A missing super.init is reported separately, not as a
            // property note.
            if elt == num_elements - 1 && self.memory.is_derived_class_self() {
                continue;
            }
            let name = self.memory.path_string_to(elt).to_string();
            let span = self.memory.elements[elt].loc.unwrap_or(self.diag_loc(inst));
            self.diags
                .push(DiDiagnostic::StoredPropertyNotInitialized(name, span));
        }
    }

    /// Whether `inst` is a load whose only consumer is the enclosing
    /// block's return.
    fn load_feeds_return(&self, inst: InstId) -> bool {
        if !matches!(self.func.inst(inst).kind, InstKind::Load { .. }) {
            return false;
        }
        let Some(result) = self.func.inst(inst).result else {
            return false;
        };
        if !self.func.value_users(result.id).is_empty() {
            return false;
        }
        let Some(user_block) = self.func.terminator_user(result.id) else {
            return false;
        };
        matches!(
            self.func.block(user_block).term,
            Terminator::Return { value: Some(value) } if value == result.id
        )
    }
}
