//! Definite initialization.
//!
//! For every memory object flagged with a `mark_uninit` sentinel, verifies
//! that each use observes initialized memory on all paths, resolves
//! ambiguous init-or-assign stores (inserting a runtime initialization
//! bitmap when the answer is path-dependent), and rewrites destruction of
//! partially initialized objects. Residual raw ops are lowered afterwards
//! so the IR leaving the pass is always free of them.

mod checker;
mod collect;
mod errors;
mod lattice;
mod liveness;
mod memory;
mod rewrite;

pub use collect::collect_memory_uses;
pub use errors::DiDiagnostic;
pub use lattice::{AvailabilitySet, DiKind, merge_kinds};
pub use memory::{ElementInfo, MemoryObject, MemoryUse, UseKind};

use crate::sir::builder::Cursor;
use crate::sir::ir::{Function, InstKind, replace_value_in_func};
use crate::sir::types::TypeTable;

use self::checker::LifetimeChecker;

/// Runs definite-initialization checking and rewriting over one function.
///
/// Diagnostics are appended to `diags`; when any fire, the offending
/// memory object is left unrewritten (the raw-op lowering below still
/// runs). Returns whether the function changed.
pub fn run(func: &mut Function, types: &mut TypeTable, diags: &mut Vec<DiDiagnostic>) -> bool {
    let mut changed = false;

    let mut sentinels = Vec::new();
    for block in &func.blocks {
        for &inst in &block.insts {
            if matches!(func.inst(inst).kind, InstKind::MarkUninit { .. }) {
                sentinels.push(inst);
            }
        }
    }

    for inst in sentinels {
        let memory = MemoryObject::of_mark_uninit(func, types, inst);
        let (uses, releases) = collect_memory_uses(func, types, &memory);
        let mut checker = LifetimeChecker::new(func, types, memory, uses, releases, diags);
        checker.run();
        changed = true;
    }

    changed |= lower_raw_ops(func, types);
    changed
}

/// Lowers the raw ops only this pass understands: leftover `assign`s
/// become plain assignments, `mark_uninit` forwards its operand and
/// disappears, and `mark_fn_escape` is deleted.
fn lower_raw_ops(func: &mut Function, types: &mut TypeTable) -> bool {
    let mut pending = Vec::new();
    for block in &func.blocks {
        for &inst in &block.insts {
            if matches!(
                func.inst(inst).kind,
                InstKind::Assign { .. } | InstKind::MarkUninit { .. } | InstKind::MarkFnEscape { .. }
            ) {
                pending.push(inst);
            }
        }
    }

    let changed = !pending.is_empty();
    for inst in pending {
        match func.inst(inst).kind.clone() {
            InstKind::Assign { ptr, value } => {
                let dest_ty = types.pointee(func.value_type(ptr));
                let trivial = types.is_trivial(dest_ty);
                {
                    let mut b = Cursor::before(func, types, inst);
                    if trivial {
                        b.create_store(value, ptr);
                    } else {
                        let old = b.create_load(ptr);
                        b.create_store(value, ptr);
                        b.emit_release_value(old);
                    }
                }
                func.erase_inst(inst);
            }
            InstKind::MarkUninit { ptr, .. } => {
                let result = func
                    .inst(inst)
                    .result
                    .expect("mark_uninit forwards an address")
                    .id;
                func.erase_inst(inst);
                replace_value_in_func(func, result, ptr);
            }
            InstKind::MarkFnEscape { .. } => func.erase_inst(inst),
            _ => unreachable!(),
        }
    }
    changed
}

#[cfg(test)]
#[path = "../tests/definit/common.rs"]
mod common;
#[cfg(test)]
#[path = "../tests/definit/t_lattice.rs"]
mod t_lattice;
#[cfg(test)]
#[path = "../tests/definit/t_liveness.rs"]
mod t_liveness;
#[cfg(test)]
#[path = "../tests/definit/t_checker.rs"]
mod t_checker;
#[cfg(test)]
#[path = "../tests/definit/t_rewrite.rs"]
mod t_rewrite;
