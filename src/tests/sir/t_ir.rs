use indoc::indoc;

use crate::diag::Span;
use crate::sir::builder::{Cursor, FunctionBuilder};
use crate::sir::cfg::Cfg;
use crate::sir::format::format_func;
use crate::sir::ir::{
    BlockId, InstKind, Terminator, delete_trivially_dead, replace_value_in_func,
};
use crate::sir::types::TypeKind;

#[test]
fn test_split_block_moves_tail_and_terminator() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let i64_ty = builder.types().add(TypeKind::Int { bits: 64 });
    let bb0 = builder.add_block();
    let slot = builder.alloc_stack(bb0, i64_ty);
    let value = builder.const_int(bb0, i64_ty, 1);
    let store = builder.store(bb0, value, slot);
    builder.ret(bb0, None);
    let (mut func, _types) = builder.finish();

    let cont = func.split_block(bb0, 2);
    assert_eq!(func.blocks.len(), 2);
    assert_eq!(func.block(bb0).insts.len(), 2);
    assert_eq!(func.block(cont).insts, vec![store]);
    assert_eq!(func.inst(store).block, cont);
    assert!(matches!(
        func.block(bb0).term,
        Terminator::Br { target, .. } if target == cont
    ));
    assert!(matches!(func.block(cont).term, Terminator::Return { .. }));
}

#[test]
fn test_cursor_diamond_wires_a_triangle() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let i64_ty = builder.types().add(TypeKind::Int { bits: 64 });
    let bb0 = builder.add_block();
    let slot = builder.alloc_stack(bb0, i64_ty);
    let cond = builder.const_bool(bb0, true);
    let value = builder.const_int(bb0, i64_ty, 1);
    let store = builder.store(bb0, value, slot);
    builder.ret(bb0, None);
    let (mut func, mut types) = builder.finish();

    let (taken, cont) = {
        let mut cursor = Cursor::before(&mut func, &mut types, store);
        cursor.insert_cfg_diamond(cond)
    };

    assert_eq!(func.blocks.len(), 3);
    assert!(matches!(
        func.block(bb0).term,
        Terminator::CondBr { then_bb, else_bb, .. } if then_bb == taken && else_bb == cont
    ));
    assert!(matches!(
        func.block(taken).term,
        Terminator::Br { target, .. } if target == cont
    ));
    assert_eq!(func.inst(store).block, cont);
}

#[test]
fn test_replace_value_rewrites_uses() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let i64_ty = builder.types().add(TypeKind::Int { bits: 64 });
    let bb0 = builder.add_block();
    let a = builder.alloc_stack(bb0, i64_ty);
    let b = builder.alloc_stack(bb0, i64_ty);
    let value = builder.const_int(bb0, i64_ty, 1);
    let store = builder.store(bb0, value, a);
    builder.ret(bb0, None);
    let (mut func, _types) = builder.finish();

    replace_value_in_func(&mut func, a, b);
    assert!(matches!(
        func.inst(store).kind,
        InstKind::Store { ptr, .. } if ptr == b
    ));
}

#[test]
fn test_delete_trivially_dead_walks_address_chains() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let i64_ty = builder.types().add(TypeKind::Int { bits: 64 });
    let pair_ty = builder.types().add(TypeKind::Tuple {
        fields: vec![i64_ty, i64_ty],
    });
    let bb0 = builder.add_block();
    let slot = builder.alloc_stack(bb0, pair_ty);
    let elt = builder.field_addr(bb0, slot, 0);
    builder.ret(bb0, None);
    let (mut func, _types) = builder.finish();

    let elt_inst = func.defining_inst(elt).expect("field_addr defined");
    delete_trivially_dead(&mut func, elt_inst);
    // The projection dies; the allocation is not a pure address producer
    // and stays.
    assert_eq!(func.defining_inst(elt), None);
    assert!(func.defining_inst(slot).is_some());
}

#[test]
fn test_cfg_preds_and_succs() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let bb0 = builder.add_block();
    let cond = builder.const_bool(bb0, true);
    let bb1 = builder.add_block();
    let bb2 = builder.add_block();
    let bb3 = builder.add_block();
    builder.cond_br(bb0, cond, bb1, bb2);
    builder.br(bb1, bb3);
    builder.br(bb2, bb3);
    builder.ret(bb3, None);
    let (func, _types) = builder.finish();

    let cfg = Cfg::new(&func);
    assert_eq!(cfg.entry(), bb0);
    assert_eq!(cfg.succs(bb0), &[bb1, bb2]);
    assert_eq!(cfg.preds(bb3), &[bb1, bb2]);
    assert_eq!(cfg.preds(bb0), &[] as &[BlockId]);
}

#[test]
fn test_cfg_reachability_excludes_orphan_blocks() {
    let mut builder = FunctionBuilder::new("f", Span::default());
    let bb0 = builder.add_block();
    builder.ret(bb0, None);
    // A self-looping block no path from the entry reaches.
    let bb1 = builder.add_block();
    builder.br(bb1, bb1);
    let (func, _types) = builder.finish();

    let cfg = Cfg::new(&func);
    let reachable = cfg.reachable_from_entry();
    assert!(reachable.contains(&bb0));
    assert!(!reachable.contains(&bb1));
}

#[test]
fn test_format_smoke() {
    let mut builder = FunctionBuilder::new("main", Span::default());
    let i64_ty = builder.types().add(TypeKind::Int { bits: 64 });
    let bb0 = builder.add_block();
    let value = builder.const_int(bb0, i64_ty, 4);
    builder.ret(bb0, Some(value));
    let (func, types) = builder.finish();

    let expected = indoc! {"
        fn main() {
          bb0():
            %v0: i64 = const 4:i64
            ret %v0
        }
    "};
    assert_eq!(format_func(&func, &types).trim(), expected.trim());
}
