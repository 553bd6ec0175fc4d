//! Shared helpers for definite-initialization tests.

use crate::definit::{DiDiagnostic, run};
use crate::sir::ir::{Function, InstKind, Terminator};
use crate::sir::types::TypeTable;

pub fn run_pass(func: &mut Function, types: &mut TypeTable) -> Vec<DiDiagnostic> {
    let mut diags = Vec::new();
    run(func, types, &mut diags);
    diags
}

pub fn assert_ir_eq(actual: impl AsRef<str>, expected: impl AsRef<str>) {
    let actual = actual.as_ref().trim();
    let expected = expected.as_ref().trim();
    assert!(
        actual == expected,
        "IR mismatch\n--- actual ---\n{}\n--- expected ---\n{}",
        actual,
        expected
    );
}

/// Counts attached instructions matching a predicate.
pub fn count_insts(func: &Function, pred: impl Fn(&InstKind) -> bool) -> usize {
    func.blocks
        .iter()
        .flat_map(|block| &block.insts)
        .filter(|&&inst| pred(&func.inst(inst).kind))
        .count()
}

pub fn count_cond_brs(func: &Function) -> usize {
    func.blocks
        .iter()
        .filter(|block| matches!(block.term, Terminator::CondBr { .. }))
        .count()
}
