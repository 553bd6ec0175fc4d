//! Textual SIR formatter.
//!
//! Produces the human-readable form used by golden tests and debug dumps.

use std::fmt::Write;

use crate::sir::ir::{
    ArgConvention, Callee, ConstValue, Function, InstKind, Instruction, MemoryKind, Terminator,
    ValueId,
};
use crate::sir::types::{TypeId, TypeKind, TypeTable};

pub fn format_func(func: &Function, types: &TypeTable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "fn {}() {{", func.name);
    for block in &func.blocks {
        let params = block
            .params
            .iter()
            .map(|p| format!("%v{}: {}", p.value.id.0, format_type(types, p.value.ty)))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "  bb{}({}):", block.id.0, params);
        for &inst in &block.insts {
            let _ = writeln!(out, "    {}", format_inst(func.inst(inst), types));
        }
        let _ = writeln!(out, "    {}", format_term(&block.term));
    }
    out.push_str("}\n");
    out
}

pub fn format_type(types: &TypeTable, ty: TypeId) -> String {
    let info = types.get(ty);
    if let Some(name) = &info.name {
        return name.clone();
    }
    match &info.kind {
        TypeKind::Unit => "()".to_string(),
        TypeKind::Bool => "bool".to_string(),
        TypeKind::Int { bits } => format!("i{}", bits),
        TypeKind::Ptr { elem } => format!("ptr<{}>", format_type(types, *elem)),
        TypeKind::Box { elem } => format!("box<{}>", format_type(types, *elem)),
        TypeKind::Ref { class } => format!("ref {}", class),
        TypeKind::Tuple { fields } => {
            let fields = fields
                .iter()
                .map(|f| format_type(types, *f))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", fields)
        }
        TypeKind::Struct { fields } => {
            let fields = fields
                .iter()
                .map(|f| format!("{}: {}", f.name, format_type(types, f.ty)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("struct {{{}}}", fields)
        }
        TypeKind::Fn { params, ret } => {
            let params = params
                .iter()
                .map(|p| format_type(types, *p))
                .collect::<Vec<_>>()
                .join(", ");
            format!("fn({}) -> {}", params, format_type(types, *ret))
        }
    }
}

fn format_inst(inst: &Instruction, types: &TypeTable) -> String {
    let body = format_inst_kind(&inst.kind, types);
    match &inst.result {
        Some(result) => format!(
            "%v{}: {} = {}",
            result.id.0,
            format_type(types, result.ty),
            body
        ),
        None => body,
    }
}

fn format_inst_kind(kind: &InstKind, types: &TypeTable) -> String {
    match kind {
        InstKind::Const { value } => match value {
            ConstValue::Unit => "const ()".to_string(),
            ConstValue::Bool(b) => format!("const {}", b),
            ConstValue::Int { value, bits } => format!("const {}:i{}", value, bits),
        },
        InstKind::Builtin { func, args } => {
            format!("builtin {}({})", func.name(), format_values(args))
        }
        InstKind::AllocStack { ty } => format!("alloc_stack ${}", format_type(types, *ty)),
        InstKind::AllocBox { ty } => format!("alloc_box ${}", format_type(types, *ty)),
        InstKind::ProjectBox { box_value } => format!("project_box %v{}", box_value.0),
        InstKind::MarkUninit { ptr, kind, name } => {
            format!(
                "mark_uninit [{}] %v{} \"{}\"",
                memory_kind_tag(*kind),
                ptr.0,
                name
            )
        }
        InstKind::FieldAddr { base, index } => format!("field_addr %v{}, {}", base.0, index),
        InstKind::Load { ptr } => format!("load %v{}", ptr.0),
        InstKind::Store { ptr, value } => format!("store %v{} to %v{}", value.0, ptr.0),
        InstKind::Assign { ptr, value } => format!("assign %v{} to %v{}", value.0, ptr.0),
        InstKind::CopyAddr { src, dest, is_init } => {
            let init = if *is_init { "[init] " } else { "" };
            format!("copy_addr %v{} to {}%v{}", src.0, init, dest.0)
        }
        InstKind::StoreWeak { ptr, value, is_init } => {
            let init = if *is_init { "[init] " } else { "" };
            format!("store_weak %v{} to {}%v{}", value.0, init, ptr.0)
        }
        InstKind::AddrToPtr { addr } => format!("addr_to_ptr %v{}", addr.0),
        InstKind::MarkFnEscape { addr } => format!("mark_fn_escape %v{}", addr.0),
        InstKind::Apply { callee, args } => {
            let args = args
                .iter()
                .map(|arg| {
                    let conv = match arg.convention {
                        ArgConvention::Value => "",
                        ArgConvention::InOut => "inout ",
                        ArgConvention::IndirectIn => "in ",
                    };
                    format!("{}%v{}", conv, arg.value.0)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let callee = match callee {
                Callee::Fn { name } => format!("@{}", name),
                Callee::Method { name, accessor } => {
                    if *accessor {
                        format!("accessor \"{}\"", name)
                    } else {
                        format!("method \"{}\"", name)
                    }
                }
                Callee::SuperInit => "super.init".to_string(),
                Callee::SelfInit => "self.init".to_string(),
            };
            format!("apply {}({})", callee, args)
        }
        InstKind::Destroy { addr } => format!("destroy_addr %v{}", addr.0),
        InstKind::ReleaseValue { value } => format!("release_value %v{}", value.0),
        InstKind::DeallocStack { addr } => format!("dealloc_stack %v{}", addr.0),
        InstKind::DeallocBox { box_value } => format!("dealloc_box %v{}", box_value.0),
        InstKind::DeallocRef { value } => format!("dealloc_ref %v{}", value.0),
    }
}

fn format_term(term: &Terminator) -> String {
    match term {
        Terminator::Br { target, args } => {
            if args.is_empty() {
                format!("br bb{}", target.0)
            } else {
                format!("br bb{}({})", target.0, format_values(args))
            }
        }
        Terminator::CondBr {
            cond,
            then_bb,
            else_bb,
            ..
        } => format!("cond_br %v{}, bb{}, bb{}", cond.0, then_bb.0, else_bb.0),
        Terminator::Return { value } => match value {
            Some(value) => format!("ret %v{}", value.0),
            None => "ret".to_string(),
        },
        Terminator::Unreachable => "unreachable".to_string(),
    }
}

fn format_values(values: &[ValueId]) -> String {
    values
        .iter()
        .map(|v| format!("%v{}", v.0))
        .collect::<Vec<_>>()
        .join(", ")
}

fn memory_kind_tag(kind: MemoryKind) -> &'static str {
    match kind {
        MemoryKind::Var => "var",
        MemoryKind::StructSelf => "structself",
        MemoryKind::EnumSelf => "enumself",
        MemoryKind::RootClassSelf => "rootself",
        MemoryKind::DerivedClassSelf => "derivedself",
        MemoryKind::DelegatingSelf { .. } => "delegatingself",
    }
}
