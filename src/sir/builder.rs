//! SIR construction and rewriting builders.
//!
//! [`FunctionBuilder`] appends instructions block by block and manages id
//! allocation; it is how tests and lowering produce functions.
//! [`Cursor`] is an insertion-point builder over an existing function; the
//! definite-initialization rewriter uses it to splice instructions and
//! split blocks without invalidating instruction handles.

use crate::diag::Span;
use crate::sir::ir::{
    ApplyArg, BlockId, BuiltinFn, Callee, ConstValue, Function, InstId, InstKind, MemoryKind,
    Terminator, ValueDef, ValueId,
};
use crate::sir::types::{TypeId, TypeKind, TypeTable};

/// Constructs SIR functions while managing id allocation.
pub struct FunctionBuilder {
    func: Function,
    types: TypeTable,
    loc: Option<Span>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, loc: Span) -> Self {
        Self {
            func: Function::new(name, loc),
            types: TypeTable::new(),
            loc: None,
        }
    }

    pub fn types(&mut self) -> &mut TypeTable {
        &mut self.types
    }

    /// Sets the source span attached to subsequently emitted instructions.
    pub fn set_loc(&mut self, loc: Option<Span>) {
        self.loc = loc;
    }

    /// Appends a new basic block and returns its id.
    pub fn add_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    pub fn add_block_param(&mut self, block: BlockId, ty: TypeId) -> ValueId {
        self.func.add_block_param(block, ty)
    }

    /// Sets the terminator for a block.
    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.func.block_mut(block).term = term;
    }

    pub fn br(&mut self, block: BlockId, target: BlockId) {
        self.set_terminator(
            block,
            Terminator::Br {
                target,
                args: Vec::new(),
            },
        );
    }

    pub fn cond_br(&mut self, block: BlockId, cond: ValueId, then_bb: BlockId, else_bb: BlockId) {
        self.set_terminator(
            block,
            Terminator::CondBr {
                cond,
                then_bb,
                then_args: Vec::new(),
                else_bb,
                else_args: Vec::new(),
            },
        );
    }

    pub fn ret(&mut self, block: BlockId, value: Option<ValueId>) {
        self.set_terminator(block, Terminator::Return { value });
    }

    pub fn const_int(&mut self, block: BlockId, ty: TypeId, value: i128) -> ValueId {
        let bits = match self.types.kind(ty) {
            TypeKind::Int { bits } => *bits,
            kind => panic!("const_int of non-integer type {:?}", kind),
        };
        self.emit_value(block, InstKind::Const {
            value: ConstValue::Int { value, bits },
        }, ty)
    }

    pub fn const_bool(&mut self, block: BlockId, value: bool) -> ValueId {
        let ty = self.types.add(TypeKind::Bool);
        self.emit_value(block, InstKind::Const {
            value: ConstValue::Bool(value),
        }, ty)
    }

    pub fn alloc_stack(&mut self, block: BlockId, ty: TypeId) -> ValueId {
        let ptr_ty = self.types.add(TypeKind::Ptr { elem: ty });
        self.emit_value(block, InstKind::AllocStack { ty }, ptr_ty)
    }

    pub fn alloc_box(&mut self, block: BlockId, ty: TypeId) -> ValueId {
        let box_ty = self.types.add(TypeKind::Box { elem: ty });
        self.emit_value(block, InstKind::AllocBox { ty }, box_ty)
    }

    pub fn project_box(&mut self, block: BlockId, box_value: ValueId) -> ValueId {
        let elem = self.types.pointee(self.func.value_type(box_value));
        let ptr_ty = self.types.add(TypeKind::Ptr { elem });
        self.emit_value(block, InstKind::ProjectBox { box_value }, ptr_ty)
    }

    pub fn mark_uninit(
        &mut self,
        block: BlockId,
        ptr: ValueId,
        kind: MemoryKind,
        name: impl Into<String>,
    ) -> ValueId {
        let ty = self.func.value_type(ptr);
        self.emit_value(
            block,
            InstKind::MarkUninit {
                ptr,
                kind,
                name: name.into(),
            },
            ty,
        )
    }

    pub fn field_addr(&mut self, block: BlockId, base: ValueId, index: usize) -> ValueId {
        let agg = self.types.pointee(self.func.value_type(base));
        let elem = self.types.field_type(agg, index);
        let ptr_ty = self.types.add(TypeKind::Ptr { elem });
        self.emit_value(block, InstKind::FieldAddr { base, index }, ptr_ty)
    }

    pub fn load(&mut self, block: BlockId, ptr: ValueId) -> ValueId {
        let ty = self.types.pointee(self.func.value_type(ptr));
        self.emit_value(block, InstKind::Load { ptr }, ty)
    }

    pub fn store(&mut self, block: BlockId, value: ValueId, ptr: ValueId) -> InstId {
        self.emit_void(block, InstKind::Store { ptr, value })
    }

    pub fn assign(&mut self, block: BlockId, value: ValueId, ptr: ValueId) -> InstId {
        self.emit_void(block, InstKind::Assign { ptr, value })
    }

    pub fn copy_addr(&mut self, block: BlockId, src: ValueId, dest: ValueId) -> InstId {
        self.emit_void(block, InstKind::CopyAddr {
            src,
            dest,
            is_init: false,
        })
    }

    pub fn addr_to_ptr(&mut self, block: BlockId, addr: ValueId) -> ValueId {
        let ty = self.func.value_type(addr);
        self.emit_value(block, InstKind::AddrToPtr { addr }, ty)
    }

    pub fn mark_fn_escape(&mut self, block: BlockId, addr: ValueId) -> InstId {
        self.emit_void(block, InstKind::MarkFnEscape { addr })
    }

    pub fn apply(
        &mut self,
        block: BlockId,
        callee: Callee,
        args: Vec<ApplyArg>,
        ret: TypeId,
    ) -> ValueId {
        self.emit_value(block, InstKind::Apply { callee, args }, ret)
    }

    pub fn destroy(&mut self, block: BlockId, addr: ValueId) -> InstId {
        self.emit_void(block, InstKind::Destroy { addr })
    }

    pub fn release_value(&mut self, block: BlockId, value: ValueId) -> InstId {
        self.emit_void(block, InstKind::ReleaseValue { value })
    }

    pub fn dealloc_stack(&mut self, block: BlockId, addr: ValueId) -> InstId {
        self.emit_void(block, InstKind::DeallocStack { addr })
    }

    pub fn dealloc_box(&mut self, block: BlockId, box_value: ValueId) -> InstId {
        self.emit_void(block, InstKind::DeallocBox { box_value })
    }

    /// Finalizes the builder and returns the constructed function.
    pub fn finish(self) -> (Function, TypeTable) {
        (self.func, self.types)
    }

    fn emit_value(&mut self, block: BlockId, kind: InstKind, ty: TypeId) -> ValueId {
        let value = self.func.alloc_value(ty);
        let index = self.func.block(block).insts.len();
        self.func.insert_inst(
            block,
            index,
            kind,
            Some(ValueDef { id: value, ty }),
            self.loc,
        );
        value
    }

    fn emit_void(&mut self, block: BlockId, kind: InstKind) -> InstId {
        let index = self.func.block(block).insts.len();
        self.func.insert_inst(block, index, kind, None, self.loc)
    }
}

/// An insertion point into an existing function.
///
/// Emitted instructions land before the point and the point advances past
/// them, so consecutive emissions appear in program order.
pub struct Cursor<'a> {
    pub func: &'a mut Function,
    pub types: &'a mut TypeTable,
    block: BlockId,
    index: usize,
    loc: Option<Span>,
}

impl<'a> Cursor<'a> {
    /// Positions the cursor immediately before `inst`, inheriting its span.
    pub fn before(func: &'a mut Function, types: &'a mut TypeTable, inst: InstId) -> Self {
        let block = func.inst(inst).block;
        let index = func.position_in_block(inst);
        let loc = func.inst(inst).loc;
        Self {
            func,
            types,
            block,
            index,
            loc,
        }
    }

    /// Positions the cursor immediately after `inst`, inheriting its span.
    pub fn after(func: &'a mut Function, types: &'a mut TypeTable, inst: InstId) -> Self {
        let mut cursor = Self::before(func, types, inst);
        cursor.index += 1;
        cursor
    }

    pub fn at_block_start(func: &'a mut Function, types: &'a mut TypeTable, block: BlockId) -> Self {
        Self {
            func,
            types,
            block,
            index: 0,
            loc: None,
        }
    }

    pub fn before_terminator(
        func: &'a mut Function,
        types: &'a mut TypeTable,
        block: BlockId,
    ) -> Self {
        let index = func.block(block).insts.len();
        Self {
            func,
            types,
            block,
            index,
            loc: None,
        }
    }

    pub fn set_loc(&mut self, loc: Option<Span>) {
        self.loc = loc;
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn create_integer_literal(&mut self, ty: TypeId, value: i128) -> ValueId {
        let bits = match self.types.kind(ty) {
            TypeKind::Int { bits } => *bits,
            kind => panic!("integer literal of non-integer type {:?}", kind),
        };
        self.emit_value(InstKind::Const {
            value: ConstValue::Int { value, bits },
        }, ty)
    }

    pub fn create_load(&mut self, ptr: ValueId) -> ValueId {
        let ty = self.types.pointee(self.func.value_type(ptr));
        self.emit_value(InstKind::Load { ptr }, ty)
    }

    pub fn create_store(&mut self, value: ValueId, ptr: ValueId) -> InstId {
        self.emit_void(InstKind::Store { ptr, value })
    }

    pub fn create_builtin(&mut self, func: BuiltinFn, args: Vec<ValueId>, ty: TypeId) -> ValueId {
        self.emit_value(InstKind::Builtin { func, args }, ty)
    }

    pub fn create_alloc_stack(&mut self, ty: TypeId) -> ValueId {
        let ptr_ty = self.types.add(TypeKind::Ptr { elem: ty });
        self.emit_value(InstKind::AllocStack { ty }, ptr_ty)
    }

    pub fn create_dealloc_stack(&mut self, addr: ValueId) -> InstId {
        self.emit_void(InstKind::DeallocStack { addr })
    }

    pub fn create_dealloc_ref(&mut self, value: ValueId) -> InstId {
        self.emit_void(InstKind::DeallocRef { value })
    }

    pub fn create_dealloc_box(&mut self, box_value: ValueId) -> InstId {
        self.emit_void(InstKind::DeallocBox { box_value })
    }

    pub fn create_project_box(&mut self, box_value: ValueId) -> ValueId {
        let elem = self.types.pointee(self.func.value_type(box_value));
        let ptr_ty = self.types.add(TypeKind::Ptr { elem });
        self.emit_value(InstKind::ProjectBox { box_value }, ptr_ty)
    }

    pub fn create_field_addr(&mut self, base: ValueId, index: usize) -> ValueId {
        let agg = self.types.pointee(self.func.value_type(base));
        let elem = self.types.field_type(agg, index);
        let ptr_ty = self.types.add(TypeKind::Ptr { elem });
        self.emit_value(InstKind::FieldAddr { base, index }, ptr_ty)
    }

    pub fn emit_destroy_addr(&mut self, addr: ValueId) -> InstId {
        self.emit_void(InstKind::Destroy { addr })
    }

    pub fn emit_release_value(&mut self, value: ValueId) -> InstId {
        self.emit_void(InstKind::ReleaseValue { value })
    }

    /// Splits the current block at the cursor. Everything from the cursor
    /// on, including the terminator, moves to the returned continuation
    /// block; the cursor is left at its start.
    pub fn split_block(&mut self) -> BlockId {
        let cont = self.func.split_block(self.block, self.index);
        self.block = cont;
        self.index = 0;
        cont
    }

    /// Splits the current block and wires a conditional branch on `cond`
    /// into a fresh taken block that falls through to the continuation (a
    /// CFG triangle). Returns `(taken, continuation)` with the cursor at
    /// the continuation's start.
    pub fn insert_cfg_diamond(&mut self, cond: ValueId) -> (BlockId, BlockId) {
        let start = self.block;
        let cont = self.split_block();

        let taken = self.func.add_block();
        self.func.block_mut(taken).term = Terminator::Br {
            target: cont,
            args: Vec::new(),
        };
        self.func.block_mut(start).term = Terminator::CondBr {
            cond,
            then_bb: taken,
            then_args: Vec::new(),
            else_bb: cont,
            else_args: Vec::new(),
        };
        (taken, cont)
    }

    fn emit_value(&mut self, kind: InstKind, ty: TypeId) -> ValueId {
        let value = self.func.alloc_value(ty);
        self.func.insert_inst(
            self.block,
            self.index,
            kind,
            Some(ValueDef { id: value, ty }),
            self.loc,
        );
        self.index += 1;
        value
    }

    fn emit_void(&mut self, kind: InstKind) -> InstId {
        let inst = self
            .func
            .insert_inst(self.block, self.index, kind, None, self.loc);
        self.index += 1;
        inst
    }
}
