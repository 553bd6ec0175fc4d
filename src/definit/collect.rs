//! Use collection for a memory object.
//!
//! Walks the function once in block order and classifies every
//! instruction touching the `mark_uninit` address (directly or through a
//! `field_addr` projection) into the use records the checker consumes,
//! separating out the instructions that end the memory's lifetime.

use std::collections::HashMap;

use crate::definit::memory::{MemoryObject, MemoryUse, UseKind};
use crate::sir::ir::{ArgConvention, Callee, Function, InstId, InstKind, ValueId};
use crate::sir::types::TypeTable;

/// Produces the use list and release list for one memory object.
pub fn collect_memory_uses(
    func: &Function,
    types: &TypeTable,
    memory: &MemoryObject,
) -> (Vec<MemoryUse>, Vec<InstId>) {
    let collector = UseCollector::new(func, types, memory);
    collector.collect()
}

struct UseCollector<'a> {
    func: &'a Function,
    memory: &'a MemoryObject,
    /// Whole-memory address aliases: the sentinel result and, for box-backed
    /// memory, the raw projection it wraps.
    whole_aliases: Vec<ValueId>,
    /// Element-aligned projections of the memory address.
    projections: HashMap<ValueId, usize>,
    /// Projections into an element's interior; stores through these are
    /// partial stores and require the element to be initialized already.
    sub_projections: HashMap<ValueId, usize>,
    /// The backing box value for class-self memory allocated in a box.
    box_value: Option<ValueId>,
    uses: Vec<MemoryUse>,
    releases: Vec<InstId>,
}

impl<'a> UseCollector<'a> {
    fn new(func: &'a Function, types: &'a TypeTable, memory: &'a MemoryObject) -> Self {
        let whole_aliases = vec![memory.addr, memory.base];

        let mut projections = HashMap::new();
        let mut sub_projections = HashMap::new();
        if types.is_aggregate(memory.ty) {
            // Two passes: element projections first, then projections into
            // those elements' interiors.
            for block in &func.blocks {
                for &inst in &block.insts {
                    if let InstKind::FieldAddr { base, index } = func.inst(inst).kind
                        && base == memory.addr
                        && let Some(result) = func.inst(inst).result
                    {
                        projections.insert(result.id, index);
                    }
                }
            }
            for block in &func.blocks {
                for &inst in &block.insts {
                    if let InstKind::FieldAddr { base, .. } = func.inst(inst).kind
                        && let Some(&elt) = projections.get(&base)
                        && let Some(result) = func.inst(inst).result
                    {
                        sub_projections.insert(result.id, elt);
                    }
                }
            }
        } else {
            // Scalar memory has a single element; any projection of the
            // address digs into its interior.
            for block in &func.blocks {
                for &inst in &block.insts {
                    if let InstKind::FieldAddr { base, .. } = func.inst(inst).kind
                        && base == memory.addr
                        && let Some(result) = func.inst(inst).result
                    {
                        sub_projections.insert(result.id, 0);
                    }
                }
            }
        }

        let box_value = func.defining_inst(memory.base).and_then(|producer| {
            match func.inst(producer).kind {
                InstKind::ProjectBox { box_value } => Some(box_value),
                _ => None,
            }
        });

        Self {
            func,
            memory,
            whole_aliases,
            projections,
            sub_projections,
            box_value,
            uses: Vec::new(),
            releases: Vec::new(),
        }
    }

    fn collect(mut self) -> (Vec<MemoryUse>, Vec<InstId>) {
        for block in &self.func.blocks {
            for &inst in &block.insts {
                self.visit(inst);
            }
        }
        (self.uses, self.releases)
    }

    /// The element range an address value covers, if it belongs to the
    /// memory: the whole object, one projected element, or an element's
    /// interior.
    fn touched_range(&self, value: ValueId) -> Option<(usize, usize)> {
        if self.whole_aliases.contains(&value) {
            return Some((0, self.memory.num_elements()));
        }
        self.projections
            .get(&value)
            .or_else(|| self.sub_projections.get(&value))
            .map(|&index| (index, 1))
    }

    fn add_use(&mut self, inst: InstId, kind: UseKind, range: (usize, usize)) {
        self.uses.push(MemoryUse::new(inst, kind, range.0, range.1));
    }

    /// A store's classification: writes at element granularity are
    /// ambiguous until the checker resolves them; writes into an element's
    /// interior are partial stores.
    fn store_kind(&self, ptr: ValueId) -> UseKind {
        if self.sub_projections.contains_key(&ptr) {
            UseKind::PartialStore
        } else {
            UseKind::InitOrAssign
        }
    }

    fn visit(&mut self, inst: InstId) {
        if inst == self.memory.inst {
            return;
        }
        match &self.func.inst(inst).kind {
            // Projections are not uses themselves; their users are.
            InstKind::FieldAddr { .. } => {}

            InstKind::Load { ptr } => {
                if let Some(range) = self.touched_range(*ptr) {
                    // Delegating-self memory routes reads through the
                    // escape path so "self before self.init" is reported.
                    let kind = if self.memory.is_delegating_init() {
                        UseKind::Escape
                    } else {
                        UseKind::Load
                    };
                    self.add_use(inst, kind, range);
                }
            }

            InstKind::Store { ptr, .. } => {
                if let Some(range) = self.touched_range(*ptr) {
                    // A plain store into delegating-self memory is the
                    // frontend writing back a delegated instance; it is
                    // already in final form and needs no classification.
                    let kind = if self.memory.is_delegating_init() {
                        UseKind::Initialization
                    } else {
                        self.store_kind(*ptr)
                    };
                    self.add_use(inst, kind, range);
                }
            }

            InstKind::Assign { ptr, .. } => {
                // Raw assigns always go through the classifier, delegating
                // self included: the checker must both resolve them by
                // liveness and materialize their final form.
                if let Some(range) = self.touched_range(*ptr) {
                    self.add_use(inst, self.store_kind(*ptr), range);
                }
            }

            InstKind::CopyAddr { src, dest, is_init } => {
                if let Some(range) = self.touched_range(*src) {
                    self.add_use(inst, UseKind::Load, range);
                }
                if let Some(range) = self.touched_range(*dest) {
                    let kind = if *is_init {
                        UseKind::Initialization
                    } else {
                        self.store_kind(*dest)
                    };
                    self.add_use(inst, kind, range);
                }
            }

            InstKind::StoreWeak { ptr, is_init, .. } => {
                if let Some(range) = self.touched_range(*ptr) {
                    let kind = if *is_init {
                        UseKind::Initialization
                    } else {
                        self.store_kind(*ptr)
                    };
                    self.add_use(inst, kind, range);
                }
            }

            InstKind::Apply { callee, args } => {
                let on_memory = args.iter().any(|arg| self.touched_range(arg.value).is_some());
                match callee {
                    Callee::SuperInit if on_memory => {
                        self.add_use(inst, UseKind::SuperInit, (0, self.memory.num_elements()));
                    }
                    Callee::SelfInit if on_memory => {
                        self.add_use(inst, UseKind::SelfInit, (0, self.memory.num_elements()));
                    }
                    // A method or accessor call reads the receiver; the
                    // failure handler names the member when it is not
                    // fully initialized.
                    Callee::Method { .. } if on_memory => {
                        let range = args
                            .iter()
                            .find_map(|arg| self.touched_range(arg.value))
                            .expect("method call marked as touching the memory");
                        self.add_use(inst, UseKind::Load, range);
                    }
                    _ => {
                        for arg in args {
                            let Some(range) = self.touched_range(arg.value) else {
                                continue;
                            };
                            let kind = match arg.convention {
                                ArgConvention::InOut => UseKind::InOut,
                                ArgConvention::IndirectIn => UseKind::IndirectIn,
                                ArgConvention::Value => UseKind::Escape,
                            };
                            self.add_use(inst, kind, range);
                        }
                    }
                }
            }

            InstKind::AddrToPtr { addr } | InstKind::MarkFnEscape { addr } => {
                if let Some(range) = self.touched_range(*addr) {
                    self.add_use(inst, UseKind::Escape, range);
                }
            }

            InstKind::Destroy { addr } => {
                // Only whole-object destroys end the tracked lifetime.
                if self.whole_aliases.contains(addr) {
                    self.releases.push(inst);
                }
            }

            InstKind::ReleaseValue { value } => {
                if Some(*value) == self.box_value {
                    self.releases.push(inst);
                }
            }

            InstKind::DeallocStack { addr } => {
                if self.whole_aliases.contains(addr) {
                    self.releases.push(inst);
                }
            }

            InstKind::DeallocBox { box_value } => {
                if Some(*box_value) == self.box_value {
                    self.releases.push(inst);
                }
            }

            InstKind::DeallocRef { .. }
            | InstKind::Const { .. }
            | InstKind::Builtin { .. }
            | InstKind::AllocStack { .. }
            | InstKind::AllocBox { .. }
            | InstKind::ProjectBox { .. }
            | InstKind::MarkUninit { .. } => {}
        }
    }
}
