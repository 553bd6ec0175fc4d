//! SIR data model.
//!
//! SIR is an SSA IR with explicit memory objects: allocations, loads,
//! stores, and ownership operations appear as instructions, and ambiguous
//! stores (`assign`) plus the `mark_uninit` sentinel survive until the
//! definite-initialization pass resolves them.
//!
//! Instructions live in a per-function arena and blocks hold id lists, so
//! instruction handles stay valid across block splits and insertions.

use crate::diag::Span;
use crate::sir::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

impl ValueId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub u32);

impl InstId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueDef {
    pub id: ValueId,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockParam {
    pub value: ValueDef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub params: Vec<BlockParam>,
    pub insts: Vec<InstId>,
    pub term: Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub id: InstId,
    /// Block currently holding the instruction; kept in sync by insertion,
    /// erasure, and block splitting.
    pub block: BlockId,
    pub result: Option<ValueDef>,
    pub kind: InstKind,
    pub loc: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstValue {
    Unit,
    Bool(bool),
    Int { value: i128, bits: u8 },
}

/// The mask-arithmetic builtins referenced by the initialization bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFn {
    Or { bits: u8 },
    Lshr { bits: u8 },
    TruncTo1 { bits: u8 },
}

impl BuiltinFn {
    pub fn name(&self) -> String {
        match self {
            BuiltinFn::Or { bits } => format!("or_i{}", bits),
            BuiltinFn::Lshr { bits } => format!("lshr_i{}", bits),
            BuiltinFn::TruncTo1 { bits } => format!("trunc_i{}_i1", bits),
        }
    }
}

/// Which flavor of memory a `mark_uninit` sentinel introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// A plain local variable.
    Var,
    /// `self` in a struct initializer.
    StructSelf,
    /// `self` in an enum initializer.
    EnumSelf,
    /// `self` in a root-class designated initializer.
    RootClassSelf,
    /// `self` in a derived-class designated initializer; the virtual
    /// super-init slot occupies the last element index.
    DerivedClassSelf,
    /// `self` in a delegating initializer (`self.init(...)`).
    DelegatingSelf { in_class: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgConvention {
    /// Passed by value; an address passed this way escapes.
    Value,
    /// Mutable by-address argument; requires initialized memory.
    InOut,
    /// Consumed by-address argument; requires initialized memory.
    IndirectIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyArg {
    pub value: ValueId,
    pub convention: ArgConvention,
}

impl ApplyArg {
    pub fn value(value: ValueId) -> Self {
        Self {
            value,
            convention: ArgConvention::Value,
        }
    }

    pub fn inout(value: ValueId) -> Self {
        Self {
            value,
            convention: ArgConvention::InOut,
        }
    }

    pub fn indirect_in(value: ValueId) -> Self {
        Self {
            value,
            convention: ArgConvention::IndirectIn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    Fn { name: String },
    /// Dynamically dispatched method or property accessor on `self`.
    Method { name: String, accessor: bool },
    /// The superclass designated initializer.
    SuperInit,
    /// A peer initializer in a delegating initializer.
    SelfInit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Const {
        value: ConstValue,
    },
    Builtin {
        func: BuiltinFn,
        args: Vec<ValueId>,
    },
    AllocStack {
        ty: TypeId,
    },
    AllocBox {
        ty: TypeId,
    },
    /// Address of the payload of a box.
    ProjectBox {
        box_value: ValueId,
    },
    /// Sentinel flagging `ptr` as a memory object requiring
    /// definite-initialization analysis. Forwards the address.
    MarkUninit {
        ptr: ValueId,
        kind: MemoryKind,
        name: String,
    },
    FieldAddr {
        base: ValueId,
        index: usize,
    },
    Load {
        ptr: ValueId,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
    },
    /// Ambiguous init-or-assign store; resolved by definite initialization.
    Assign {
        ptr: ValueId,
        value: ValueId,
    },
    CopyAddr {
        src: ValueId,
        dest: ValueId,
        is_init: bool,
    },
    StoreWeak {
        ptr: ValueId,
        value: ValueId,
        is_init: bool,
    },
    /// Converts an address to an opaque pointer; the address escapes.
    AddrToPtr {
        addr: ValueId,
    },
    /// Sentinel marking an address as captured by a local function.
    MarkFnEscape {
        addr: ValueId,
    },
    Apply {
        callee: Callee,
        args: Vec<ApplyArg>,
    },
    /// Destroys the value stored at `addr` (no deallocation).
    Destroy {
        addr: ValueId,
    },
    /// Releases a loaded value (strong release for refs, elementwise for
    /// aggregates).
    ReleaseValue {
        value: ValueId,
    },
    DeallocStack {
        addr: ValueId,
    },
    DeallocBox {
        box_value: ValueId,
    },
    DeallocRef {
        value: ValueId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Br {
        target: BlockId,
        args: Vec<ValueId>,
    },
    CondBr {
        cond: ValueId,
        then_bb: BlockId,
        then_args: Vec<ValueId>,
        else_bb: BlockId,
        else_args: Vec<ValueId>,
    },
    Return {
        value: Option<ValueId>,
    },
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub loc: Span,
    pub blocks: Vec<Block>,
    /// Instruction arena; erased instructions stay here but are detached
    /// from every block's id list.
    pub insts: Vec<Instruction>,
    value_tys: Vec<TypeId>,
}

impl Function {
    pub fn new(name: impl Into<String>, loc: Span) -> Self {
        Self {
            name: name.into(),
            loc,
            blocks: Vec::new(),
            insts: Vec::new(),
            value_tys: Vec::new(),
        }
    }

    pub fn entry_block(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.index()]
    }

    pub fn value_type(&self, value: ValueId) -> TypeId {
        self.value_tys[value.index()]
    }

    pub fn alloc_value(&mut self, ty: TypeId) -> ValueId {
        let id = ValueId(self.value_tys.len() as u32);
        self.value_tys.push(ty);
        id
    }

    /// Appends a new empty block (terminator starts out unreachable).
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            params: Vec::new(),
            insts: Vec::new(),
            term: Terminator::Unreachable,
        });
        id
    }

    pub fn add_block_param(&mut self, block: BlockId, ty: TypeId) -> ValueId {
        let value = self.alloc_value(ty);
        self.block_mut(block).params.push(BlockParam {
            value: ValueDef { id: value, ty },
        });
        value
    }

    /// Allocates an instruction in the arena and inserts it into `block` at
    /// position `index`.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstKind,
        result: Option<ValueDef>,
        loc: Option<Span>,
    ) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(Instruction {
            id,
            block,
            result,
            kind,
            loc,
        });
        self.block_mut(block).insts.insert(index, id);
        id
    }

    /// Detaches an instruction from its block. The arena entry remains so
    /// that stale handles still resolve, but the instruction no longer
    /// executes.
    pub fn erase_inst(&mut self, id: InstId) {
        let block = self.inst(id).block;
        self.block_mut(block).insts.retain(|&inst| inst != id);
    }

    /// Position of an attached instruction within its block.
    pub fn position_in_block(&self, id: InstId) -> usize {
        let block = self.block(self.inst(id).block);
        block
            .insts
            .iter()
            .position(|&inst| inst == id)
            .unwrap_or_else(|| panic!("sir instruction {:?} detached from {:?}", id, block.id))
    }

    /// Splits `block` before position `index`: instructions from `index`
    /// on, and the terminator, move to a fresh block; the original block
    /// falls through to it.
    pub fn split_block(&mut self, block: BlockId, index: usize) -> BlockId {
        let cont = self.add_block();
        let moved: Vec<InstId> = self.block_mut(block).insts.split_off(index);
        for &inst in &moved {
            self.inst_mut(inst).block = cont;
        }
        let term = std::mem::replace(
            &mut self.block_mut(block).term,
            Terminator::Br {
                target: cont,
                args: Vec::new(),
            },
        );
        let cont_block = self.block_mut(cont);
        cont_block.insts = moved;
        cont_block.term = term;
        cont
    }

    /// All attached instructions using `value`, in block order.
    pub fn value_users(&self, value: ValueId) -> Vec<InstId> {
        let mut users = Vec::new();
        for block in &self.blocks {
            for &inst in &block.insts {
                let mut used = false;
                for_each_inst_use(&self.inst(inst).kind, |v| used |= v == value);
                if used {
                    users.push(inst);
                }
            }
        }
        users
    }

    /// The attached instruction defining `value`, if any.
    pub fn defining_inst(&self, value: ValueId) -> Option<InstId> {
        for block in &self.blocks {
            for &inst in &block.insts {
                if self.inst(inst).result.is_some_and(|r| r.id == value) {
                    return Some(inst);
                }
            }
        }
        None
    }

    /// The block whose terminator uses `value`, if any.
    pub fn terminator_user(&self, value: ValueId) -> Option<BlockId> {
        self.blocks.iter().find_map(|block| {
            let mut used = false;
            for_each_term_use(&block.term, |v| used |= v == value);
            used.then_some(block.id)
        })
    }
}

/// Visits each SSA value used by an instruction.
pub fn for_each_inst_use(kind: &InstKind, mut f: impl FnMut(ValueId)) {
    match kind {
        InstKind::Const { .. } | InstKind::AllocStack { .. } | InstKind::AllocBox { .. } => {}
        InstKind::Builtin { args, .. } => {
            for arg in args {
                f(*arg);
            }
        }
        InstKind::ProjectBox { box_value: value }
        | InstKind::MarkUninit { ptr: value, .. }
        | InstKind::FieldAddr { base: value, .. }
        | InstKind::Load { ptr: value }
        | InstKind::AddrToPtr { addr: value }
        | InstKind::MarkFnEscape { addr: value }
        | InstKind::Destroy { addr: value }
        | InstKind::ReleaseValue { value }
        | InstKind::DeallocStack { addr: value }
        | InstKind::DeallocBox { box_value: value }
        | InstKind::DeallocRef { value } => f(*value),
        InstKind::Store { ptr, value }
        | InstKind::Assign { ptr, value }
        | InstKind::StoreWeak { ptr, value, .. } => {
            f(*ptr);
            f(*value);
        }
        InstKind::CopyAddr { src, dest, .. } => {
            f(*src);
            f(*dest);
        }
        InstKind::Apply { args, .. } => {
            for arg in args {
                f(arg.value);
            }
        }
    }
}

/// Visits each SSA value used by a terminator.
pub fn for_each_term_use(term: &Terminator, mut f: impl FnMut(ValueId)) {
    match term {
        Terminator::Br { args, .. } => {
            for value in args {
                f(*value);
            }
        }
        Terminator::CondBr {
            cond,
            then_args,
            else_args,
            ..
        } => {
            f(*cond);
            for value in then_args {
                f(*value);
            }
            for value in else_args {
                f(*value);
            }
        }
        Terminator::Return { value } => {
            if let Some(value) = value {
                f(*value);
            }
        }
        Terminator::Unreachable => {}
    }
}

/// Replaces all uses of `from` with `to` in an instruction.
pub fn replace_value_in_inst(kind: &mut InstKind, from: ValueId, to: ValueId) {
    let replace = |value: &mut ValueId| {
        if *value == from {
            *value = to;
        }
    };

    match kind {
        InstKind::Const { .. } | InstKind::AllocStack { .. } | InstKind::AllocBox { .. } => {}
        InstKind::Builtin { args, .. } => {
            for arg in args {
                replace(arg);
            }
        }
        InstKind::ProjectBox { box_value: value }
        | InstKind::MarkUninit { ptr: value, .. }
        | InstKind::FieldAddr { base: value, .. }
        | InstKind::Load { ptr: value }
        | InstKind::AddrToPtr { addr: value }
        | InstKind::MarkFnEscape { addr: value }
        | InstKind::Destroy { addr: value }
        | InstKind::ReleaseValue { value }
        | InstKind::DeallocStack { addr: value }
        | InstKind::DeallocBox { box_value: value }
        | InstKind::DeallocRef { value } => replace(value),
        InstKind::Store { ptr, value }
        | InstKind::Assign { ptr, value }
        | InstKind::StoreWeak { ptr, value, .. } => {
            replace(ptr);
            replace(value);
        }
        InstKind::CopyAddr { src, dest, .. } => {
            replace(src);
            replace(dest);
        }
        InstKind::Apply { args, .. } => {
            for arg in args {
                replace(&mut arg.value);
            }
        }
    }
}

/// Replaces all uses of `from` with `to` in a terminator.
pub fn replace_value_in_term(term: &mut Terminator, from: ValueId, to: ValueId) {
    let replace = |value: &mut ValueId| {
        if *value == from {
            *value = to;
        }
    };

    match term {
        Terminator::Br { args, .. } => {
            for value in args {
                replace(value);
            }
        }
        Terminator::CondBr {
            cond,
            then_args,
            else_args,
            ..
        } => {
            replace(cond);
            for value in then_args {
                replace(value);
            }
            for value in else_args {
                replace(value);
            }
        }
        Terminator::Return { value } => {
            if let Some(value) = value {
                replace(value);
            }
        }
        Terminator::Unreachable => {}
    }
}

/// Replaces `from` with `to` throughout a function.
pub fn replace_value_in_func(func: &mut Function, from: ValueId, to: ValueId) {
    for block_idx in 0..func.blocks.len() {
        let inst_ids: Vec<InstId> = func.blocks[block_idx].insts.clone();
        for inst in inst_ids {
            replace_value_in_inst(&mut func.inst_mut(inst).kind, from, to);
        }
        replace_value_in_term(&mut func.blocks[block_idx].term, from, to);
    }
}

/// Whether an instruction only produces an address or constant and may be
/// deleted when its result is unused.
pub fn is_removable_when_unused(kind: &InstKind) -> bool {
    matches!(
        kind,
        InstKind::Const { .. }
            | InstKind::Builtin { .. }
            | InstKind::ProjectBox { .. }
            | InstKind::FieldAddr { .. }
            | InstKind::AddrToPtr { .. }
    )
}

/// Erases `inst` if its result has no remaining users, then retries on the
/// values it used. Mirrors upstream cleanup after a release is removed.
pub fn delete_trivially_dead(func: &mut Function, inst: InstId) {
    if !is_removable_when_unused(&func.inst(inst).kind) {
        return;
    }
    let Some(result) = func.inst(inst).result else {
        return;
    };
    if !func.value_users(result.id).is_empty() || func.terminator_user(result.id).is_some() {
        return;
    }

    let mut operands = Vec::new();
    for_each_inst_use(&func.inst(inst).kind, |v| operands.push(v));
    func.erase_inst(inst);

    for operand in operands {
        let producer = func
            .insts
            .iter()
            .find(|i| i.result.is_some_and(|r| r.id == operand))
            .map(|i| i.id);
        if let Some(producer) = producer
            && func.block(func.inst(producer).block).insts.contains(&producer)
        {
            delete_trivially_dead(func, producer);
        }
    }
}
