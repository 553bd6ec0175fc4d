use indoc::indoc;

use super::common::{assert_ir_eq, count_cond_brs, count_insts, run_pass};
use crate::diag::Span;
use crate::sir::builder::FunctionBuilder;
use crate::sir::format::format_func;
use crate::sir::ir::{BlockId, Callee, InstKind, MemoryKind, ValueId};
use crate::sir::types::{TypeKind, TypeTable};

fn make_value(
    builder: &mut FunctionBuilder,
    block: BlockId,
    ty: crate::sir::types::TypeId,
) -> ValueId {
    builder.apply(
        block,
        Callee::Fn {
            name: "make".to_string(),
        },
        Vec::new(),
        ty,
    )
}

fn bitmap_stores(func: &crate::sir::ir::Function, types: &TypeTable) -> (ValueId, usize, usize) {
    // The bitmap is the alloc_stack of integer type; returns its address,
    // the number of stores to it, and the number of loads of it.
    let bitmap = func
        .blocks
        .iter()
        .flat_map(|block| &block.insts)
        .find_map(|&inst| match func.inst(inst).kind {
            InstKind::AllocStack { ty } if matches!(types.kind(ty), TypeKind::Int { .. }) => {
                func.inst(inst).result.map(|r| r.id)
            }
            _ => None,
        })
        .expect("initialization bitmap was allocated");
    let stores = count_insts(func, |kind| {
        matches!(kind, InstKind::Store { ptr, .. } if *ptr == bitmap)
    });
    let loads = count_insts(func, |kind| {
        matches!(kind, InstKind::Load { ptr } if *ptr == bitmap)
    });
    (bitmap, stores, loads)
}

#[test]
fn test_simple_var_init_lowers_to_store() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let i64_ty = builder.types().add(TypeKind::Int { bits: 64 });
    let bb0 = builder.add_block();
    let stack = builder.alloc_stack(bb0, i64_ty);
    let mem = builder.mark_uninit(bb0, stack, MemoryKind::Var, "x");
    let value = builder.const_int(bb0, i64_ty, 7);
    builder.assign(bb0, value, mem);
    builder.dealloc_stack(bb0, stack);
    builder.ret(bb0, None);
    let (mut func, mut types) = builder.finish();

    let diags = run_pass(&mut func, &mut types);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    assert_ir_eq(format_func(&func, &types), indoc! {"
        fn f() {
          bb0():
            %v0: ptr<i64> = alloc_stack $i64
            %v2: i64 = const 7:i64
            store %v2 to %v0
            dealloc_stack %v0
            ret
        }
    "});
}

#[test]
fn test_overwrite_lowers_to_load_store_release() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let ref_ty = builder.types().add(TypeKind::Ref {
        class: "C".to_string(),
    });
    let bb0 = builder.add_block();
    let stack = builder.alloc_stack(bb0, ref_ty);
    let mem = builder.mark_uninit(bb0, stack, MemoryKind::Var, "x");
    let first = make_value(&mut builder, bb0, ref_ty);
    builder.assign(bb0, first, mem);
    let second = make_value(&mut builder, bb0, ref_ty);
    builder.assign(bb0, second, mem);
    builder.destroy(bb0, mem);
    builder.dealloc_stack(bb0, stack);
    builder.ret(bb0, None);
    let (mut func, mut types) = builder.finish();

    let diags = run_pass(&mut func, &mut types);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    assert_ir_eq(format_func(&func, &types), indoc! {"
        fn f() {
          bb0():
            %v0: ptr<ref C> = alloc_stack $ref C
            %v2: ref C = apply @make()
            store %v2 to %v0
            %v3: ref C = apply @make()
            %v4: ref C = load %v0
            store %v3 to %v0
            release_value %v4
            destroy_addr %v0
            dealloc_stack %v0
            ret
        }
    "});
}

#[test]
fn test_conditional_init_assign_inserts_bitmap_and_diamond() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let ref_ty = builder.types().add(TypeKind::Ref {
        class: "C".to_string(),
    });
    let bb0 = builder.add_block();
    let stack = builder.alloc_stack(bb0, ref_ty);
    let mem = builder.mark_uninit(bb0, stack, MemoryKind::Var, "x");
    let cond = builder.const_bool(bb0, true);
    let bb1 = builder.add_block();
    let bb2 = builder.add_block();
    let bb3 = builder.add_block();
    builder.cond_br(bb0, cond, bb1, bb2);
    let v1 = make_value(&mut builder, bb1, ref_ty);
    builder.assign(bb1, v1, mem);
    builder.br(bb1, bb3);
    builder.br(bb2, bb3);
    let v2 = make_value(&mut builder, bb3, ref_ty);
    builder.assign(bb3, v2, mem);
    builder.destroy(bb3, mem);
    builder.dealloc_stack(bb3, stack);
    builder.ret(bb3, None);
    let (mut func, mut types) = builder.finish();

    let diags = run_pass(&mut func, &mut types);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    // A diamond was split out of the join block for the ambiguous assign.
    assert_eq!(func.blocks.len(), 6);
    assert_eq!(count_cond_brs(&func), 2);
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Assign { .. })),
        0
    );
    // The destroy after the join assign stays; the diamond adds one more.
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Destroy { .. })),
        2
    );
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::AllocStack { .. })),
        2
    );

    // Single-element bitmaps need no shift/trunc arithmetic: zero store,
    // two mask stores, one load feeding the branch condition.
    let (_bitmap, stores, loads) = bitmap_stores(&func, &types);
    assert_eq!(stores, 3);
    assert_eq!(loads, 1);
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Builtin { .. })),
        0
    );
}

#[test]
fn test_multi_element_bitmap_uses_mask_arithmetic() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let ref_ty = builder.types().add(TypeKind::Ref {
        class: "C".to_string(),
    });
    let tuple_ty = builder.types().add(TypeKind::Tuple {
        fields: vec![ref_ty, ref_ty],
    });
    let bb0 = builder.add_block();
    let stack = builder.alloc_stack(bb0, tuple_ty);
    let mem = builder.mark_uninit(bb0, stack, MemoryKind::Var, "x");
    let cond = builder.const_bool(bb0, true);
    let bb1 = builder.add_block();
    let bb2 = builder.add_block();
    let bb3 = builder.add_block();
    builder.cond_br(bb0, cond, bb1, bb2);
    let elt1 = builder.field_addr(bb1, mem, 1);
    let v1 = make_value(&mut builder, bb1, ref_ty);
    builder.assign(bb1, v1, elt1);
    builder.br(bb1, bb3);
    builder.br(bb2, bb3);
    let elt1_again = builder.field_addr(bb3, mem, 1);
    let v2 = make_value(&mut builder, bb3, ref_ty);
    builder.assign(bb3, v2, elt1_again);
    builder.ret(bb3, None);
    let (mut func, mut types) = builder.finish();

    let diags = run_pass(&mut func, &mut types);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    assert_eq!(func.blocks.len(), 6);
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Assign { .. })),
        0
    );
    // Element 1 is tracked with or/lshr/trunc mask arithmetic: two
    // partial-mask updates and one bit test.
    let or_count = count_insts(&func, |kind| {
        matches!(kind, InstKind::Builtin { func, .. }
            if matches!(func, crate::sir::ir::BuiltinFn::Or { .. }))
    });
    let lshr_count = count_insts(&func, |kind| {
        matches!(kind, InstKind::Builtin { func, .. }
            if matches!(func, crate::sir::ir::BuiltinFn::Lshr { .. }))
    });
    let trunc_count = count_insts(&func, |kind| {
        matches!(kind, InstKind::Builtin { func, .. }
            if matches!(func, crate::sir::ir::BuiltinFn::TruncTo1 { .. }))
    });
    assert_eq!(or_count, 2);
    assert_eq!(lshr_count, 1);
    assert_eq!(trunc_count, 1);
}

#[test]
fn test_conditional_destroy_tests_the_bitmap() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let ref_ty = builder.types().add(TypeKind::Ref {
        class: "C".to_string(),
    });
    let bb0 = builder.add_block();
    let stack = builder.alloc_stack(bb0, ref_ty);
    let mem = builder.mark_uninit(bb0, stack, MemoryKind::Var, "x");
    let cond = builder.const_bool(bb0, true);
    let bb1 = builder.add_block();
    let bb2 = builder.add_block();
    let bb3 = builder.add_block();
    builder.cond_br(bb0, cond, bb1, bb2);
    let value = make_value(&mut builder, bb1, ref_ty);
    builder.assign(bb1, value, mem);
    builder.br(bb1, bb3);
    builder.br(bb2, bb3);
    builder.destroy(bb3, mem);
    builder.dealloc_stack(bb3, stack);
    builder.ret(bb3, None);
    let (mut func, mut types) = builder.finish();

    let diags = run_pass(&mut func, &mut types);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    // The unconditional destroy was replaced by a bitmap test guarding a
    // destroy in the taken block.
    assert_eq!(func.blocks.len(), 6);
    assert_eq!(count_cond_brs(&func), 2);
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Destroy { .. })),
        1
    );
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::AllocStack { .. })),
        2
    );
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::DeallocStack { .. })),
        2
    );
}

#[test]
fn test_destroy_of_never_initialized_memory_is_deleted() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let ref_ty = builder.types().add(TypeKind::Ref {
        class: "C".to_string(),
    });
    let bb0 = builder.add_block();
    let stack = builder.alloc_stack(bb0, ref_ty);
    let mem = builder.mark_uninit(bb0, stack, MemoryKind::Var, "x");
    builder.destroy(bb0, mem);
    builder.dealloc_stack(bb0, stack);
    builder.ret(bb0, None);
    let (mut func, mut types) = builder.finish();

    let diags = run_pass(&mut func, &mut types);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Destroy { .. })),
        0
    );
    assert_eq!(func.blocks.len(), 1);
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::AllocStack { .. })),
        1
    );
}

#[test]
fn test_delegating_assign_after_self_init_lowers_as_assignment() {
    // Unlike a plain store, an assign into delegating-self memory still
    // goes through classification: after the self.init call the memory is
    // live, so the assign resolves to an overwrite and releases the
    // previously delegated instance.
    let mut builder = FunctionBuilder::new("init", Span::default());
    let self_ty = builder.types().add(TypeKind::Ref {
        class: "S".to_string(),
    });
    let unit = builder.types().add(TypeKind::Unit);
    let bb0 = builder.add_block();
    let stack = builder.alloc_stack(bb0, self_ty);
    let mem = builder.mark_uninit(
        bb0,
        stack,
        MemoryKind::DelegatingSelf { in_class: true },
        "self",
    );
    builder.apply(
        bb0,
        Callee::SelfInit,
        vec![crate::sir::ir::ApplyArg::value(mem)],
        unit,
    );
    let value = make_value(&mut builder, bb0, self_ty);
    builder.assign(bb0, value, mem);
    builder.ret(bb0, None);
    let (mut func, mut types) = builder.finish();

    let diags = run_pass(&mut func, &mut types);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Assign { .. })),
        0
    );
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Load { .. })),
        1
    );
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Store { .. })),
        1
    );
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::ReleaseValue { .. })),
        1
    );
}

#[test]
fn test_delegating_assign_before_self_init_lowers_as_init() {
    let mut builder = FunctionBuilder::new("init", Span::default());
    let self_ty = builder.types().add(TypeKind::Ref {
        class: "S".to_string(),
    });
    let bb0 = builder.add_block();
    let stack = builder.alloc_stack(bb0, self_ty);
    let mem = builder.mark_uninit(
        bb0,
        stack,
        MemoryKind::DelegatingSelf { in_class: true },
        "self",
    );
    let value = make_value(&mut builder, bb0, self_ty);
    builder.assign(bb0, value, mem);
    builder.ret(bb0, None);
    let (mut func, mut types) = builder.finish();

    let diags = run_pass(&mut func, &mut types);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Assign { .. })),
        0
    );
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Store { .. })),
        1
    );
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::ReleaseValue { .. })),
        0
    );
}

#[test]
fn test_trivial_plain_stores_are_accepted_as_init() {
    // Plain stores of trivial stack values go through multiple
    // init/destroy cycles; they are accepted as initializations without
    // classification, so no release is materialized for the second one.
    let mut builder = FunctionBuilder::new("f", Span::default());
    let i64_ty = builder.types().add(TypeKind::Int { bits: 64 });
    let bb0 = builder.add_block();
    let stack = builder.alloc_stack(bb0, i64_ty);
    let mem = builder.mark_uninit(bb0, stack, MemoryKind::Var, "x");
    let first = builder.const_int(bb0, i64_ty, 1);
    builder.store(bb0, first, mem);
    let second = builder.const_int(bb0, i64_ty, 2);
    builder.store(bb0, second, mem);
    builder.dealloc_stack(bb0, stack);
    builder.ret(bb0, None);
    let (mut func, mut types) = builder.finish();

    let diags = run_pass(&mut func, &mut types);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::Store { .. })),
        2
    );
    assert_eq!(
        count_insts(&func, |kind| matches!(kind, InstKind::ReleaseValue { .. })),
        0
    );
}
