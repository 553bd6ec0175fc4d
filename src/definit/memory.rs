//! Memory objects and use records for definite initialization.
//!
//! A memory object is an allocation flagged by a `mark_uninit` sentinel,
//! viewed as `N` indexable elements: tuple components, stored properties,
//! or the virtual super-init slot a derived-class `self` carries in its
//! last index.

use crate::diag::Span;
use crate::sir::builder::Cursor;
use crate::sir::ir::{Function, InstId, InstKind, MemoryKind, ValueId};
use crate::sir::types::{TypeId, TypeKind, TypeTable};

/// How an instruction touches a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseKind {
    /// Reads the memory without writing it.
    Load,
    /// A store known to be an initialization.
    Initialization,
    /// A store that is an init or an assign depending on the path.
    InitOrAssign,
    /// A store known to overwrite initialized memory.
    Assign,
    /// A store to a single element of a larger memory; always one element.
    PartialStore,
    /// Consumed as a by-address call argument.
    IndirectIn,
    /// Passed mutably by address.
    InOut,
    /// The address escapes the analysis.
    Escape,
    /// A `super.init` call on a derived-class `self`.
    SuperInit,
    /// A delegating `self.init` call.
    SelfInit,
}

/// One record of the memory's use list.
#[derive(Debug, Clone)]
pub struct MemoryUse {
    /// `None` once the instruction is rewritten away; consumers skip
    /// tombstones.
    pub inst: Option<InstId>,
    pub kind: UseKind,
    pub first_element: usize,
    pub num_elements: usize,
}

impl MemoryUse {
    pub fn new(inst: InstId, kind: UseKind, first_element: usize, num_elements: usize) -> Self {
        Self {
            inst: Some(inst),
            kind,
            first_element,
            num_elements,
        }
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.first_element..self.first_element + self.num_elements
    }

    /// Whether every element the use touches is of trivial type. Trivial
    /// elements need no bitmap tracking and no destruction.
    pub fn only_touches_trivial_elements(&self, memory: &MemoryObject, types: &TypeTable) -> bool {
        self.range().all(|elt| match memory.elements[elt].ty {
            Some(ty) => types.is_trivial(ty),
            // The virtual super-init slot has no storage.
            None => true,
        })
    }

    /// Bit mask selecting this use's elements in the initialization bitmap.
    pub fn element_bitmask(&self, num_elements: usize) -> i128 {
        debug_assert!(num_elements <= 128);
        let mut mask: u128 = 0;
        for elt in self.range() {
            mask |= 1u128 << elt;
        }
        mask as i128
    }
}

/// One element of a memory object.
#[derive(Debug, Clone)]
pub struct ElementInfo {
    /// Access-path name used in diagnostics.
    pub name: String,
    /// `None` for the virtual super-init slot, which has no storage.
    pub ty: Option<TypeId>,
    pub is_let: bool,
    /// Declaration site, when the element comes from a declared property.
    pub loc: Option<Span>,
}

impl ElementInfo {
    pub fn is_super_init_slot(&self) -> bool {
        self.ty.is_none()
    }
}

/// Everything the checker needs to know about one flagged allocation.
#[derive(Debug, Clone)]
pub struct MemoryObject {
    /// The `mark_uninit` sentinel.
    pub inst: InstId,
    /// The sentinel's forwarded address; all uses go through this value.
    pub addr: ValueId,
    /// The raw allocation address the sentinel wraps.
    pub base: ValueId,
    pub kind: MemoryKind,
    /// The allocated (pointee) type.
    pub ty: TypeId,
    pub elements: Vec<ElementInfo>,
    pub loc: Option<Span>,
}

impl MemoryObject {
    /// Builds the memory-object view of a `mark_uninit` instruction.
    pub fn of_mark_uninit(func: &Function, types: &TypeTable, inst: InstId) -> Self {
        let instruction = func.inst(inst);
        let InstKind::MarkUninit { ptr, kind, name } = &instruction.kind else {
            panic!("memory object requires a mark_uninit, got {:?}", instruction.kind);
        };
        let addr = instruction.result.expect("mark_uninit forwards an address").id;
        let ty = types.pointee(func.value_type(*ptr));

        let mut elements = element_table(types, ty, *kind, name);
        if matches!(kind, MemoryKind::DerivedClassSelf) {
            elements.push(ElementInfo {
                name: "super.init".to_string(),
                ty: None,
                is_let: false,
                loc: None,
            });
        }

        Self {
            inst,
            addr,
            base: *ptr,
            kind: *kind,
            ty,
            elements,
            loc: instruction.loc,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn is_any_init_self(&self) -> bool {
        !matches!(self.kind, MemoryKind::Var)
    }

    pub fn is_class_init_self(&self) -> bool {
        matches!(
            self.kind,
            MemoryKind::RootClassSelf
                | MemoryKind::DerivedClassSelf
                | MemoryKind::DelegatingSelf { in_class: true }
        )
    }

    pub fn is_delegating_init(&self) -> bool {
        matches!(self.kind, MemoryKind::DelegatingSelf { .. })
    }

    pub fn is_derived_class_self(&self) -> bool {
        matches!(self.kind, MemoryKind::DerivedClassSelf)
    }

    pub fn is_enum_init_self(&self) -> bool {
        matches!(self.kind, MemoryKind::EnumSelf)
    }

    pub fn is_element_let(&self, elt: usize) -> bool {
        self.elements[elt].is_let
    }

    pub fn is_trivial(&self, types: &TypeTable) -> bool {
        types.is_trivial(self.ty)
    }

    pub fn path_string_to(&self, elt: usize) -> &str {
        &self.elements[elt].name
    }

    /// Materializes the address of element `elt` at the cursor.
    pub fn emit_element_address(&self, cursor: &mut Cursor<'_>, elt: usize) -> ValueId {
        debug_assert!(!self.elements[elt].is_super_init_slot());
        if cursor.types.is_aggregate(self.ty) {
            cursor.create_field_addr(self.addr, elt)
        } else {
            debug_assert_eq!(elt, 0);
            self.addr
        }
    }
}

/// Per-element table for the allocated type: one entry per tuple component
/// or stored property, or a single entry for scalar memory.
fn element_table(
    types: &TypeTable,
    ty: TypeId,
    kind: MemoryKind,
    root_name: &str,
) -> Vec<ElementInfo> {
    let self_like = !matches!(kind, MemoryKind::Var);
    match types.kind(ty) {
        TypeKind::Tuple { fields } => fields
            .iter()
            .enumerate()
            .map(|(idx, field)| ElementInfo {
                name: format!("{}.{}", root_name, idx),
                ty: Some(*field),
                is_let: false,
                loc: None,
            })
            .collect(),
        TypeKind::Struct { fields } => fields
            .iter()
            .map(|field| ElementInfo {
                // Self memory reports bare property names; variables keep
                // the full access path.
                name: if self_like {
                    field.name.clone()
                } else {
                    format!("{}.{}", root_name, field.name)
                },
                ty: Some(field.ty),
                is_let: field.is_let,
                loc: field.loc,
            })
            .collect(),
        _ => vec![ElementInfo {
            name: root_name.to_string(),
            ty: Some(ty),
            is_let: false,
            loc: None,
        }],
    }
}
