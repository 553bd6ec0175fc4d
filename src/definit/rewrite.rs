//! IR rewriting for resolved and dynamically ambiguous stores.
//!
//! Once classification settles, stores are lowered to their final form.
//! Stores whose init-vs-assign answer depends on the path taken get a
//! per-object initialization bitmap: one bit per element, set at each
//! initialization, tested at ambiguous assigns and partially live
//! destroys through small CFG diamonds.

use crate::definit::checker::LifetimeChecker;
use crate::definit::lattice::DiKind;
use crate::definit::memory::{MemoryUse, UseKind};
use crate::sir::builder::Cursor;
use crate::sir::ir::{
    BuiltinFn, Function, InstId, InstKind, Terminator, ValueId, delete_trivially_dead,
};
use crate::sir::types::TypeKind;

impl LifetimeChecker<'_> {
    /// Materializes the concrete instruction form for a use whose kind has
    /// settled to initialization or assignment.
    pub(super) fn update_instruction_for_init_state(&mut self, use_idx: usize) {
        let use_ = self.uses[use_idx].clone();
        let inst = use_.inst.expect("updating a tombstoned use");

        let is_init = match use_.kind {
            UseKind::Initialization | UseKind::SelfInit => true,
            UseKind::Assign => false,
            kind => panic!("use kind {:?} has no init state", kind),
        };

        if matches!(
            self.func.inst(inst).kind,
            InstKind::CopyAddr { .. } | InstKind::StoreWeak { .. }
        ) {
            // Flag-carrying stores just learn their answer.
            match &mut self.func.inst_mut(inst).kind {
                InstKind::CopyAddr { is_init: flag, .. }
                | InstKind::StoreWeak { is_init: flag, .. } => {
                    debug_assert!(!*flag, "store already knows it is an initialization");
                    *flag = is_init;
                }
                _ => unreachable!(),
            }
        } else if matches!(self.func.inst(inst).kind, InstKind::Assign { .. }) {
            // Ambiguous assigns are rewritten into their composite form.
            self.uses[use_idx].inst = None;
            self.non_load_uses.swap_remove(&inst);

            let (load_inst, store_inst) = self.lower_assign(inst, is_init);

            // Track the instructions the lowering introduced so later
            // passes over the use list see them.
            if let Some(load_inst) = load_inst {
                self.uses.push(MemoryUse::new(
                    load_inst,
                    UseKind::Load,
                    use_.first_element,
                    use_.num_elements,
                ));
            }
            self.non_load_uses.insert(store_inst, Some(self.uses.len()));
            self.uses.push(MemoryUse::new(
                store_inst,
                use_.kind,
                use_.first_element,
                use_.num_elements,
            ));
        } else {
            // Plain stores are already in final form.
            debug_assert!(matches!(self.func.inst(inst).kind, InstKind::Store { .. }));
        }
    }

    /// Lowers an `assign` into a plain store (initializations and trivial
    /// destinations) or the load/store/release sequence that transfers
    /// ownership into already-initialized memory.
    fn lower_assign(&mut self, inst: InstId, is_init: bool) -> (Option<InstId>, InstId) {
        let InstKind::Assign { ptr, value } = self.func.inst(inst).kind else {
            panic!("lowering a non-assign instruction");
        };
        let dest_ty = self.types.pointee(self.func.value_type(ptr));

        if is_init || self.types.is_trivial(dest_ty) {
            let store = {
                let mut b = Cursor::before(self.func, self.types, inst);
                b.create_store(value, ptr)
            };
            self.func.erase_inst(inst);
            return (None, store);
        }

        // The incoming value already carries its ownership count; the old
        // value's count is dropped after it is replaced.
        let (old, store) = {
            let mut b = Cursor::before(self.func, self.types, inst);
            let old = b.create_load(ptr);
            let store = b.create_store(value, ptr);
            b.emit_release_value(old);
            (old, store)
        };
        let load_inst = self
            .func
            .defining_inst(old)
            .expect("load emitted by assign lowering");
        self.func.erase_inst(inst);
        (Some(load_inst), store)
    }

    /// Installs the per-object initialization bitmap and resolves every
    /// dynamically ambiguous store. Returns the bitmap's address for the
    /// destroy rewriter.
    pub(super) fn handle_conditional_init_assign(&mut self) -> ValueId {
        let num_elements = self.memory.num_elements();
        debug_assert!(
            (1..=128).contains(&num_elements),
            "bitmap width out of range"
        );
        let bits = num_elements as u8;
        let iv_ty = self.types.add(TypeKind::Int { bits });
        let i1_ty = self.types.add(TypeKind::Int { bits: 1 });

        // The bitmap lives for the whole function: allocated first thing
        // in the entry block, deallocated before every return.
        let entry = self.func.entry_block();
        let bitmap_addr = {
            let mut b = Cursor::at_block_start(self.func, self.types, entry);
            b.create_alloc_stack(iv_ty)
        };
        for block_idx in 0..self.func.blocks.len() {
            if matches!(self.func.blocks[block_idx].term, Terminator::Return { .. }) {
                let block = self.func.blocks[block_idx].id;
                let mut b = Cursor::before_terminator(self.func, self.types, block);
                b.create_dealloc_stack(bitmap_addr);
            }
        }

        // Nothing is initialized when the memory comes into existence.
        {
            let mut b = Cursor::after(self.func, self.types, self.memory.inst);
            let zero = b.create_integer_literal(iv_ty, 0);
            b.create_store(zero, bitmap_addr);
        }

        // Mark elements live at each initialization; disambiguate each
        // conditional assign with a per-element runtime check.
        let mut idx = 0;
        while idx < self.uses.len() {
            let use_ = self.uses[idx].clone();
            let Some(inst) = use_.inst else {
                idx += 1;
                continue;
            };

            match use_.kind {
                UseKind::Initialization => {
                    if !use_.only_touches_trivial_elements(&self.memory, self.types) {
                        let mask = use_.element_bitmask(num_elements);
                        let covers_all =
                            use_.first_element == 0 && use_.num_elements == num_elements;
                        let mut b = Cursor::before(self.func, self.types, inst);
                        let mask_val = b.create_integer_literal(iv_ty, mask);
                        // A full-coverage mask overwrites; otherwise OR the
                        // new bits into the current value.
                        let store_val = if covers_all {
                            mask_val
                        } else {
                            let current = b.create_load(bitmap_addr);
                            b.create_builtin(
                                BuiltinFn::Or { bits },
                                vec![current, mask_val],
                                iv_ty,
                            )
                        };
                        b.create_store(store_val, bitmap_addr);
                    }
                    idx += 1;
                    continue;
                }
                UseKind::InitOrAssign => {}
                _ => {
                    idx += 1;
                    continue;
                }
            }

            // Ambiguity over trivial elements needs no dynamic logic; an
            // overwrite of a trivial value is just a store.
            if use_.only_touches_trivial_elements(&self.memory, self.types) {
                idx += 1;
                continue;
            }

            // Destroy whatever is dynamically live in the target range so
            // the store below is always an initialization.
            let bitmap = {
                let mut b = Cursor::before(self.func, self.types, inst);
                b.create_load(bitmap_addr)
            };
            for elt in use_.range() {
                let taken = {
                    let mut b = Cursor::before(self.func, self.types, inst);
                    let mut cond = bitmap;
                    if num_elements != 1 {
                        if elt != 0 {
                            let amt = b.create_integer_literal(iv_ty, elt as i128);
                            cond =
                                b.create_builtin(BuiltinFn::Lshr { bits }, vec![cond, amt], iv_ty);
                        }
                        cond = b.create_builtin(BuiltinFn::TruncTo1 { bits }, vec![cond], i1_ty);
                    }
                    let (taken, _cont) = b.insert_cfg_diamond(cond);
                    taken
                };
                let mut b = Cursor::at_block_start(self.func, self.types, taken);
                let elt_addr = self.memory.emit_element_address(&mut b, elt);
                let destroy = b.emit_destroy_addr(elt_addr);
                self.releases.push(Some(destroy));
            }

            // All in-range elements are now uninitialized on every path.
            self.uses[idx].kind = UseKind::Initialization;
            self.update_instruction_for_init_state(idx);
            // Revisit this index so the new initialization form gets its
            // bitmap update.
        }

        bitmap_addr
    }

    /// Rewrites destroys of partially live memory: destroy the elements
    /// known live, skip the ones known dead, and test the bitmap for the
    /// rest.
    pub(super) fn handle_conditional_destroys(&mut self, control_addr: Option<ValueId>) {
        let num_elements = self.memory.num_elements();
        let bits = num_elements as u8;
        let mask_tys = control_addr.map(|addr| {
            let iv_ty = self.types.pointee(self.func.value_type(addr));
            let i1_ty = self.types.add(TypeKind::Int { bits: 1 });
            (iv_ty, i1_ty)
        });

        let destroys = std::mem::take(&mut self.conditional_destroys);
        for (release_idx, availability) in destroys {
            let inst = self.releases[release_idx].expect("conditional destroy already rewritten");
            let mut loaded_mask: Option<ValueId> = None;

            for elt in 0..num_elements {
                match availability.get(elt) {
                    // Known dead: nothing to destroy.
                    DiKind::No => {}

                    // Known live: destroy unconditionally at the release.
                    DiKind::Yes => {
                        let mut b = Cursor::before(self.func, self.types, inst);
                        let elt_addr = self.memory.emit_element_address(&mut b, elt);
                        let destroy = b.emit_destroy_addr(elt_addr);
                        self.releases.push(Some(destroy));
                    }

                    // Path-dependent: branch on the element's bitmap bit.
                    DiKind::Partial => {
                        let control_addr =
                            control_addr.expect("partially live destroy without control variable");
                        let (iv_ty, i1_ty) = mask_tys.expect("control variable without its type");
                        let taken = {
                            let mut b = Cursor::before(self.func, self.types, inst);
                            let mask = match loaded_mask {
                                Some(mask) => mask,
                                None => {
                                    let mask = b.create_load(control_addr);
                                    loaded_mask = Some(mask);
                                    mask
                                }
                            };
                            let mut cond = mask;
                            if num_elements != 1 {
                                if elt != 0 {
                                    let amt = b.create_integer_literal(iv_ty, elt as i128);
                                    cond = b.create_builtin(
                                        BuiltinFn::Lshr { bits },
                                        vec![cond, amt],
                                        iv_ty,
                                    );
                                }
                                cond = b.create_builtin(
                                    BuiltinFn::TruncTo1 { bits },
                                    vec![cond],
                                    i1_ty,
                                );
                            }
                            let (taken, _cont) = b.insert_cfg_diamond(cond);
                            taken
                        };
                        let mut b = Cursor::at_block_start(self.func, self.types, taken);
                        let elt_addr = self.memory.emit_element_address(&mut b, elt);
                        let destroy = b.emit_destroy_addr(elt_addr);
                        self.releases.push(Some(destroy));
                    }
                }
            }

            // An early release of a class under construction still has to
            // free the instance itself.
            if self.memory.is_class_init_self() {
                let (_dealloc_ref, dealloc_box) = self.emit_class_self_dealloc(inst);
                if let Some(dealloc_box) = dealloc_box {
                    self.releases.push(Some(dealloc_box));
                }
            }

            let operand = release_operand(self.func, inst);
            self.func.erase_inst(inst);
            self.releases[release_idx] = None;
            if let Some(producer) = self.func.defining_inst(operand) {
                delete_trivially_dead(self.func, producer);
            }
        }
    }

    /// Removes a release of memory known to be fully uninitialized. Class
    /// self still needs its never-constructed instance deallocated.
    pub(super) fn eliminate_dead_release(&mut self, release_idx: usize, inst: InstId) {
        if self.memory.is_class_init_self() {
            let (dealloc_ref, dealloc_box) = self.emit_class_self_dealloc(inst);
            self.releases[release_idx] = Some(dealloc_ref);
            if let Some(dealloc_box) = dealloc_box {
                self.releases.push(Some(dealloc_box));
            }
            self.func.erase_inst(inst);
            return;
        }

        debug_assert!(matches!(
            self.func.inst(inst).kind,
            InstKind::Destroy { .. }
        ));
        let operand = release_operand(self.func, inst);
        self.func.erase_inst(inst);
        self.releases[release_idx] = None;
        if let Some(producer) = self.func.defining_inst(operand) {
            delete_trivially_dead(self.func, producer);
        }
    }

    /// Emits `dealloc_ref` (loading the instance through its box or
    /// address when needed) and, for box-backed self, the `dealloc_box`.
    fn emit_class_self_dealloc(&mut self, release: InstId) -> (InstId, Option<InstId>) {
        let operand = release_operand(self.func, release);
        let operand_ty = self.func.value_type(operand);
        let is_box = matches!(self.types.kind(operand_ty), TypeKind::Box { .. });
        let is_addr = matches!(self.types.kind(operand_ty), TypeKind::Ptr { .. });

        let mut b = Cursor::before(self.func, self.types, release);
        let pointer = if is_box {
            let addr = b.create_project_box(operand);
            b.create_load(addr)
        } else if is_addr {
            b.create_load(operand)
        } else {
            operand
        };
        let dealloc_ref = b.create_dealloc_ref(pointer);
        let dealloc_box = is_box.then(|| b.create_dealloc_box(operand));
        (dealloc_ref, dealloc_box)
    }
}

fn release_operand(func: &Function, inst: InstId) -> ValueId {
    match func.inst(inst).kind {
        InstKind::Destroy { addr } => addr,
        InstKind::ReleaseValue { value } => value,
        ref kind => panic!("not a release instruction: {:?}", kind),
    }
}
