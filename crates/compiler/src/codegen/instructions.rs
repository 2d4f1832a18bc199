//! Instruction lowerer: one translation per SSA opcode.
//!
//! Every instruction is either **pure** (straight-line C over frame
//! slots) or **suspending**: it ends the current leaf function by
//! carving the next frame at `frame + 1`, filling its header and
//! parameters, advancing `ctx->stack_pointer`, and tail-returning the
//! function object to run next. The categorization is strict: an
//! instruction suspends exactly when it calls into the runtime or
//! into another SL function.
//!
//! Suspension results travel through `result_ptr`: the callee writes
//! the caller's slot while the caller's frame sleeps, and the
//! continuation leaf reads the slot after the callee popped itself.

use std::fmt::Write as _;

use gox_ssa::{
    BasicKind, BinOpKind, Builtin, CallCommon, Callee, Function, Instr, InstrKind, Operand,
    Program, SelectState, Type, TypeId, UnOpKind,
};

use super::CodeGen;
use super::error::CodeGenError;
use super::functions::LeafEmitter;
use crate::codegen::frames::FrameLayout;

/// Per-function context handed to the lowerer.
pub(crate) struct FuncCx<'a> {
    pub id: gox_ssa::FuncId,
    pub func: &'a Function,
    pub layout: &'a FrameLayout,
}

/// What lowering one instruction did to the leaf structure.
pub(crate) enum Lowered {
    Pure,
    /// The leaf ended with a tail return; `post` runs first in the
    /// continuation leaf.
    Suspended { post: String },
}

/// Strict suspension test (see module docs). Mirrored by the lowerer:
/// every `true` here must end its leaf with a tail return.
pub(crate) fn is_suspending(program: &Program, func: &Function, instr: &Instr) -> bool {
    match &instr.kind {
        InstrKind::Alloc { heap } => *heap,
        InstrKind::Call { call } => match &call.callee {
            Callee::Builtin(Builtin::Print | Builtin::Println) => false,
            _ => true,
        },
        InstrKind::Defer { .. } | InstrKind::Go { .. } => true,
        InstrKind::BinOp { op: BinOpKind::Add, x, .. } => {
            is_string(program, operand_type(program, func, x))
        }
        InstrKind::Convert { x } => {
            let to = instr.result.as_ref().map(|r| r.ty);
            let from = operand_type(program, func, x);
            match to {
                Some(to) => {
                    is_string(program, Some(to)) != is_string(program, from)
                }
                None => false,
            }
        }
        InstrKind::Lookup { x, .. } => {
            matches!(
                operand_type(program, func, x).map(|t| program.underlying(t)),
                Some(Type::Map { .. })
            )
        }
        InstrKind::MakeChan { .. }
        | InstrKind::MakeClosure { .. }
        | InstrKind::MakeInterface { .. }
        | InstrKind::MakeMap { .. }
        | InstrKind::MakeSlice { .. }
        | InstrKind::MapUpdate { .. }
        | InstrKind::Next { .. }
        | InstrKind::Panic { .. }
        | InstrKind::RunDefers
        | InstrKind::Select { .. }
        | InstrKind::Send { .. } => true,
        InstrKind::Slice { x, .. } => is_string(program, operand_type(program, func, x)),
        InstrKind::UnOp { op: UnOpKind::Recv, .. } => true,
        _ => false,
    }
}

fn is_string(program: &Program, ty: Option<TypeId>) -> bool {
    matches!(
        ty.map(|t| program.underlying(t)),
        Some(Type::Basic(BasicKind::String))
    )
}

/// Resolve an operand's SL type inside `func`.
pub(crate) fn operand_type(program: &Program, func: &Function, op: &Operand) -> Option<TypeId> {
    match op {
        Operand::Const(c) => Some(c.ty),
        Operand::Func(f) => Some(program.func(*f).signature),
        Operand::Global(g) => Some(program.global(*g).ty),
        Operand::Param(i) => func.params.get(*i as usize).map(|p| p.ty),
        Operand::FreeVar(i) => func.free_vars.get(*i as usize).map(|p| p.ty),
        Operand::Reg(name) => func
            .blocks
            .iter()
            .flat_map(|b| b.instrs.iter())
            .find_map(|i| i.result.as_ref().filter(|r| &r.name == name).map(|r| r.ty)),
    }
}

/// C scalar backing a basic kind's `raw` field.
fn basic_c_raw(kind: BasicKind) -> &'static str {
    match kind {
        BasicKind::Bool => "bool",
        BasicKind::Int => "intptr_t",
        BasicKind::Int8 => "int8_t",
        BasicKind::Int16 => "int16_t",
        BasicKind::Int32 => "int32_t",
        BasicKind::Int64 => "int64_t",
        BasicKind::Uint | BasicKind::Uintptr => "uintptr_t",
        BasicKind::Uint8 => "uint8_t",
        BasicKind::Uint16 => "uint16_t",
        BasicKind::Uint32 => "uint32_t",
        BasicKind::Uint64 => "uint64_t",
        BasicKind::Float32 => "float",
        BasicKind::Float64 => "double",
        BasicKind::Complex64 => "float _Complex",
        BasicKind::Complex128 => "double _Complex",
        BasicKind::String => "const char*",
        BasicKind::UnsafePointer => "void*",
        BasicKind::Invalid => "void*",
    }
}

/// Unsigned counterpart used for shift lowering.
fn unsigned_c_raw(kind: BasicKind) -> &'static str {
    match kind {
        BasicKind::Int | BasicKind::Uint | BasicKind::Uintptr => "uintptr_t",
        BasicKind::Int8 | BasicKind::Uint8 => "uint8_t",
        BasicKind::Int16 | BasicKind::Uint16 => "uint16_t",
        BasicKind::Int32 | BasicKind::Uint32 => "uint32_t",
        BasicKind::Int64 | BasicKind::Uint64 => "uint64_t",
        _ => "uintptr_t",
    }
}

/// Bit width of an integer kind, as a C expression.
fn width_expr(kind: BasicKind) -> &'static str {
    match kind {
        BasicKind::Int | BasicKind::Uint | BasicKind::Uintptr => "(sizeof(intptr_t) * 8)",
        BasicKind::Int8 | BasicKind::Uint8 => "8",
        BasicKind::Int16 | BasicKind::Uint16 => "16",
        BasicKind::Int32 | BasicKind::Uint32 => "32",
        BasicKind::Int64 | BasicKind::Uint64 => "64",
        _ => "(sizeof(intptr_t) * 8)",
    }
}

impl<'p> CodeGen<'p> {
    /// C expression reading `op` inside `cx`'s frame. Every produced
    /// expression designates storage that survives suspension:
    /// constants and function objects are statics, globals have
    /// static address objects, everything else lives in the frame.
    pub(crate) fn operand(&mut self, cx: &FuncCx<'_>, op: &Operand) -> Result<String, CodeGenError> {
        match op {
            Operand::Const(c) => self.const_ref(c),
            Operand::Func(f) => Ok(format!("funcobj_{}", self.mint.function_name(*f))),
            Operand::Global(g) => Ok(format!("{}_ptr", self.mint.global_name(*g))),
            Operand::Param(i) => Ok(format!("frame->signature.param{i}")),
            Operand::FreeVar(i) => {
                let Some(fv_struct) = &cx.layout.freevars_struct else {
                    return Err(CodeGenError::Invariant(format!(
                        "{} reads free variable {i} but captures nothing",
                        cx.func.rel_name
                    )));
                };
                let field = cx.layout.freevar_fields.get(*i as usize).ok_or_else(|| {
                    CodeGenError::Invariant(format!(
                        "{} reads free variable {i} out of range",
                        cx.func.rel_name
                    ))
                })?;
                Ok(format!(
                    "((struct {fv_struct}*)frame->common.free_vars)->{field}"
                ))
            }
            Operand::Reg(name) => {
                let slot = cx.layout.slots.get(name).ok_or_else(|| {
                    CodeGenError::Invariant(format!(
                        "{} reads register {name} with no frame slot",
                        cx.func.rel_name
                    ))
                })?;
                Ok(format!("frame->{}", slot.field))
            }
        }
    }

    fn operand_ty(&self, cx: &FuncCx<'_>, op: &Operand) -> Result<TypeId, CodeGenError> {
        operand_type(self.program, cx.func, op).ok_or_else(|| {
            CodeGenError::Invariant(format!("unresolvable operand in {}", cx.func.rel_name))
        })
    }

    /// `&runtime_info_type_T` for the `TypeInfo` of `ty`.
    pub(crate) fn type_info_ref(&self, ty: TypeId) -> String {
        format!("&runtime_info_type_{}", self.ctype(ty))
    }

    /// The frame slot of the instruction's result, if it has one.
    fn result_slot<'a>(
        &self,
        cx: &'a FuncCx<'_>,
        instr: &Instr,
    ) -> Option<&'a crate::codegen::frames::Slot> {
        instr
            .result
            .as_ref()
            .and_then(|r| cx.layout.slots.get(&r.name))
    }

    /// Lower one instruction into the current leaf. Suspending
    /// instructions end the leaf; the caller then opens the
    /// continuation leaf named by the instruction label.
    pub(crate) fn lower_instr(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
    ) -> Result<Lowered, CodeGenError> {
        if self.config.line_comments {
            leaf.line(&format!("// {instr}"));
        }
        match &instr.kind {
            InstrKind::Alloc { heap: false } => {
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let (field, c_type) = (slot.field.clone(), slot.c_type.clone());
                let buf = slot
                    .buf
                    .clone()
                    .ok_or_else(|| CodeGenError::Invariant("stack alloc without buffer".into()))?;
                leaf.line(&format!(
                    "memset(&frame->{}, 0, sizeof(frame->{}));",
                    buf.field, buf.field
                ));
                leaf.line(&format!(
                    "frame->{field} = ({c_type}){{ .raw = &frame->{} }};",
                    buf.field
                ));
                Ok(Lowered::Pure)
            }
            InstrKind::Alloc { heap: true } => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("heap alloc without result slot".into())
                })?;
                let field = slot.field.clone();
                let elem = match self.program.underlying(slot.ty) {
                    Type::Pointer { elem } => *elem,
                    _ => {
                        return Err(CodeGenError::Invariant(format!(
                            "heap alloc {instr} has non-pointer type"
                        )));
                    }
                };
                let elem_name = self.ctype(elem);
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameNew",
                    &[
                        format!("next_frame->result_ptr = (void**)&frame->{field};"),
                        format!("next_frame->size = sizeof({elem_name});"),
                    ],
                    "(FunctionObject){ .func_ptr = gox5_new, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            InstrKind::BinOp { op, x, y } => self.lower_binop(cx, leaf, b, i, instr, *op, x, y),
            InstrKind::UnOp { op, x, comma_ok } => {
                self.lower_unop(cx, leaf, b, i, instr, *op, x, *comma_ok)
            }
            InstrKind::Call { call } => self.lower_call(cx, leaf, b, i, instr, call),
            InstrKind::Defer { call } => self.lower_defer_go(cx, leaf, b, i, instr, call, false),
            InstrKind::Go { call } => self.lower_defer_go(cx, leaf, b, i, instr, call, true),
            InstrKind::ChangeInterface { x } | InstrKind::ChangeType { x } => {
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let field = slot.field.clone();
                let xe = self.operand(cx, x)?;
                leaf.line(&format!(
                    "memcpy(&frame->{field}, &{xe}, sizeof(frame->{field}));"
                ));
                Ok(Lowered::Pure)
            }
            InstrKind::Convert { x } => self.lower_convert(cx, leaf, b, i, instr, x),
            InstrKind::Extract { tuple, index } => {
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let field = slot.field.clone();
                let te = self.operand(cx, tuple)?;
                leaf.line(&format!("frame->{field} = {te}.raw.e{index};"));
                Ok(Lowered::Pure)
            }
            InstrKind::Field { x, field } => {
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let dst = slot.field.clone();
                let xt = self.operand_ty(cx, x)?;
                let fname = self.struct_field_cname(xt, *field as usize)?;
                let xe = self.operand(cx, x)?;
                leaf.line(&format!("frame->{dst} = {xe}.{fname};"));
                Ok(Lowered::Pure)
            }
            InstrKind::FieldAddr { x, field } => {
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let dst = slot.field.clone();
                let c_type = slot.c_type.clone();
                let xt = self.operand_ty(cx, x)?;
                let strukt = match self.program.underlying(xt) {
                    Type::Pointer { elem } => *elem,
                    _ => {
                        return Err(CodeGenError::Invariant(format!(
                            "FieldAddr through non-pointer: {instr}"
                        )));
                    }
                };
                let fname = self.struct_field_cname(strukt, *field as usize)?;
                let xe = self.operand(cx, x)?;
                leaf.line(&format!(
                    "frame->{dst} = ({c_type}){{ .raw = &{xe}.raw->{fname} }};"
                ));
                Ok(Lowered::Pure)
            }
            InstrKind::Index { x, index } => {
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let dst = slot.field.clone();
                let xe = self.operand(cx, x)?;
                let ie = self.operand(cx, index)?;
                leaf.line(&format!("frame->{dst} = {xe}.raw[{ie}.raw];"));
                Ok(Lowered::Pure)
            }
            InstrKind::IndexAddr { x, index } => {
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let dst = slot.field.clone();
                let c_type = slot.c_type.clone();
                let xt = self.operand_ty(cx, x)?;
                let xe = self.operand(cx, x)?;
                let ie = self.operand(cx, index)?;
                let elem_addr = match self.program.underlying(xt) {
                    Type::Slice { .. } => format!("&{xe}.typed.ptr[{ie}.raw]"),
                    Type::Pointer { .. } => format!("&{xe}.raw->raw[{ie}.raw]"),
                    _ => {
                        return Err(CodeGenError::Unsupported(format!(
                            "IndexAddr base: {instr}"
                        )));
                    }
                };
                leaf.line(&format!(
                    "frame->{dst} = ({c_type}){{ .raw = {elem_addr} }};"
                ));
                Ok(Lowered::Pure)
            }
            InstrKind::If { cond } => {
                let block = &cx.func.blocks[b as usize];
                let (then_b, else_b) = match block.succs.as_slice() {
                    [t, e] => (*t, *e),
                    _ => {
                        return Err(CodeGenError::Invariant(format!(
                            "If without two successors in {}",
                            cx.func.rel_name
                        )));
                    }
                };
                let ce = self.operand(cx, cond)?;
                let tn = self.mint.block_name(cx.id, then_b);
                let en = self.mint.block_name(cx.id, else_b);
                leaf.line(&format!(
                    "return ({ce}.raw) ? (FunctionObject){{ .func_ptr = {tn}, .free_vars = frame->common.free_vars }} : (FunctionObject){{ .func_ptr = {en}, .free_vars = frame->common.free_vars }};"
                ));
                Ok(Lowered::Pure)
            }
            InstrKind::Jump => {
                let block = &cx.func.blocks[b as usize];
                let succ = *block.succs.first().ok_or_else(|| {
                    CodeGenError::Invariant(format!("Jump without successor in {}", cx.func.rel_name))
                })?;
                let sn = self.mint.block_name(cx.id, succ);
                leaf.line(&format!(
                    "return (FunctionObject){{ .func_ptr = {sn}, .free_vars = frame->common.free_vars }};"
                ));
                Ok(Lowered::Pure)
            }
            InstrKind::Phi { edges } => {
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let field = slot.field.clone();
                let block = &cx.func.blocks[b as usize];
                let mut line = String::new();
                for (k, edge) in edges.iter().enumerate() {
                    let pred = block.preds[k];
                    let pred_last = &cx.layout.block_last[pred as usize];
                    let ee = self.operand(cx, edge)?;
                    write!(
                        line,
                        "if (ctx->prev_func.func_ptr == {pred_last}) {{ frame->{field} = {ee}; }} else "
                    )?;
                }
                line.push_str("{ assert(false); }");
                leaf.line(&line);
                Ok(Lowered::Pure)
            }
            InstrKind::Range { x } => {
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let field = slot.field.clone();
                let xe = self.operand(cx, x)?;
                leaf.line(&format!(
                    "frame->{field} = (IterObject){{ .collection = (void*){xe}.raw, .count = 0 }};"
                ));
                Ok(Lowered::Pure)
            }
            InstrKind::Next { iter, is_string } => {
                self.lower_next(cx, leaf, b, i, instr, iter, *is_string)
            }
            InstrKind::Lookup { x, index, comma_ok } => {
                self.lower_lookup(cx, leaf, b, i, instr, x, index, *comma_ok)
            }
            InstrKind::Slice { x, low, high } => {
                self.lower_slice(cx, leaf, b, i, instr, x, low, high)
            }
            InstrKind::Store { addr, val } => {
                let ae = self.operand(cx, addr)?;
                let ve = self.operand(cx, val)?;
                leaf.line(&format!("*{ae}.raw = {ve};"));
                Ok(Lowered::Pure)
            }
            InstrKind::TypeAssert { x, asserted, comma_ok } => {
                self.lower_type_assert(cx, leaf, instr, x, *asserted, *comma_ok)
            }
            InstrKind::MakeChan { size } => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("MakeChan without result slot".into())
                })?;
                let field = slot.field.clone();
                let elem = match self.program.underlying(slot.ty) {
                    Type::Chan { elem } => *elem,
                    _ => {
                        return Err(CodeGenError::Invariant(format!(
                            "MakeChan of non-channel: {instr}"
                        )));
                    }
                };
                let info = self.type_info_ref(elem);
                let se = self.operand(cx, size)?;
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameChannelNew",
                    &[
                        format!("next_frame->result_ptr = &frame->{field}.raw;"),
                        format!("next_frame->type_id = {info};"),
                        format!("next_frame->capacity = {se}.raw;"),
                    ],
                    "(FunctionObject){ .func_ptr = gox5_channel_new, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            InstrKind::MakeMap { reserve: _ } => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("MakeMap without result slot".into())
                })?;
                let field = slot.field.clone();
                let (key, value) = match self.program.underlying(slot.ty) {
                    Type::Map { key, value } => (*key, *value),
                    _ => {
                        return Err(CodeGenError::Invariant(format!(
                            "MakeMap of non-map: {instr}"
                        )));
                    }
                };
                let ki = self.type_info_ref(key);
                let vi = self.type_info_ref(value);
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameMapNew",
                    &[
                        format!("next_frame->result_ptr = &frame->{field}.raw;"),
                        format!("next_frame->key_type = {ki};"),
                        format!("next_frame->value_type = {vi};"),
                    ],
                    "(FunctionObject){ .func_ptr = gox5_map_new, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            InstrKind::MakeSlice { len, cap } => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("MakeSlice without result slot".into())
                })?;
                let field = slot.field.clone();
                let elem = match self.program.underlying(slot.ty) {
                    Type::Slice { elem } => *elem,
                    _ => {
                        return Err(CodeGenError::Invariant(format!(
                            "MakeSlice of non-slice: {instr}"
                        )));
                    }
                };
                let elem_name = self.ctype(elem);
                let le = self.operand(cx, len)?;
                let ce = self.operand(cx, cap)?;
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameNew",
                    &[
                        format!("next_frame->result_ptr = (void**)&frame->{field}.typed.ptr;"),
                        format!("next_frame->size = sizeof({elem_name}) * (uintptr_t){ce}.raw;"),
                    ],
                    "(FunctionObject){ .func_ptr = gox5_new, .free_vars = NULL }",
                );
                let mut post = String::new();
                writeln!(post, "frame->{field}.typed.size = (size_t){le}.raw;")?;
                writeln!(post, "frame->{field}.typed.capacity = (size_t){ce}.raw;")?;
                Ok(Lowered::Suspended { post })
            }
            InstrKind::MakeClosure { func, bindings } => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("MakeClosure without result slot".into())
                })?;
                let field = slot.field.clone();
                let target = self.program.func(*func);
                if target.free_vars.len() != bindings.len() {
                    return Err(CodeGenError::Invariant(format!(
                        "closure over {} binds {} of {} free variables",
                        target.rel_name,
                        bindings.len(),
                        target.free_vars.len()
                    )));
                }
                let fname = self.mint.function_name(*func);
                let mut fields = vec![
                    format!("next_frame->result_ptr = &frame->{field};"),
                    format!("next_frame->user_function = {fname};"),
                    format!("next_frame->num_object_ptrs = {};", bindings.len()),
                ];
                for (k, binding) in bindings.iter().enumerate() {
                    let be = self.operand(cx, binding)?;
                    // Captures are word-sized (addresses of the
                    // captured variables); copy the word itself.
                    fields.push(format!(
                        "memcpy(&next_frame->object_ptrs[{k}], &{be}, sizeof(void*));"
                    ));
                }
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameMakeClosure",
                    &fields,
                    "(FunctionObject){ .func_ptr = gox5_make_closure, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            InstrKind::MakeInterface { x } => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("MakeInterface without result slot".into())
                })?;
                let field = slot.field.clone();
                let xt = self.operand_ty(cx, x)?;
                let info = self.type_info_ref(xt);
                let xe = self.operand(cx, x)?;
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameMakeInterface",
                    &[
                        format!("next_frame->result_ptr = &frame->{field};"),
                        format!("next_frame->receiver = (void*)&{xe};"),
                        format!("next_frame->type_id = {info};"),
                    ],
                    "(FunctionObject){ .func_ptr = gox5_make_interface, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            InstrKind::MapUpdate { map, key, value } => {
                let me = self.operand(cx, map)?;
                let ke = self.operand(cx, key)?;
                let ve = self.operand(cx, value)?;
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameMapSet",
                    &[
                        format!("next_frame->map = {me}.raw;"),
                        format!("next_frame->key = (void*)&{ke};"),
                        format!("next_frame->value = (void*)&{ve};"),
                    ],
                    "(FunctionObject){ .func_ptr = gox5_map_set, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            InstrKind::Panic { x } => {
                let xe = self.operand(cx, x)?;
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFramePanicRaise",
                    &[format!("next_frame->value = {xe};")],
                    "(FunctionObject){ .func_ptr = gox5_panic_raise, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            InstrKind::RunDefers => {
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameDeferExecute",
                    &[],
                    "(FunctionObject){ .func_ptr = gox5_defer_execute, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            InstrKind::Select { states, blocking } => {
                self.lower_select(cx, leaf, b, i, instr, states, *blocking)
            }
            InstrKind::Send { chan, x } => {
                let ct = self.operand_ty(cx, chan)?;
                let elem = match self.program.underlying(ct) {
                    Type::Chan { elem } => *elem,
                    _ => {
                        return Err(CodeGenError::Invariant(format!(
                            "Send on non-channel: {instr}"
                        )));
                    }
                };
                let info = self.type_info_ref(elem);
                let ce = self.operand(cx, chan)?;
                let xe = self.operand(cx, x)?;
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameChannelSend",
                    &[
                        format!("next_frame->channel = {ce}.raw;"),
                        format!("next_frame->data = (void*)&{xe};"),
                        format!("next_frame->type_id = {info};"),
                    ],
                    "(FunctionObject){ .func_ptr = gox5_channel_send, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            InstrKind::Return { results } => {
                leaf.line("FunctionObject resume_func = frame->common.resume_func;");
                leaf.line("ctx->stack_pointer = frame->common.prev_stack_pointer;");
                match results.len() {
                    0 => {}
                    1 => {
                        let re = self.operand(cx, &results[0])?;
                        leaf.line(&format!("*frame->signature.result_ptr = {re};"));
                    }
                    _ => {
                        for (k, r) in results.iter().enumerate() {
                            let re = self.operand(cx, r)?;
                            leaf.line(&format!(
                                "frame->signature.result_ptr->raw.e{k} = {re};"
                            ));
                        }
                    }
                }
                leaf.line("return resume_func;");
                Ok(Lowered::Pure)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_binop(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        op: BinOpKind,
        x: &Operand,
        y: &Operand,
    ) -> Result<Lowered, CodeGenError> {
        let xt = self.operand_ty(cx, x)?;
        let operand_kind = self.program.underlying(xt).as_basic();

        // String concatenation goes through the runtime.
        if op == BinOpKind::Add && operand_kind == Some(BasicKind::String) {
            let slot = self.result_slot(cx, instr).ok_or_else(|| {
                CodeGenError::Invariant("string concat without result slot".into())
            })?;
            let field = slot.field.clone();
            let xe = self.operand(cx, x)?;
            let ye = self.operand(cx, y)?;
            self.emit_suspend(
                leaf,
                &self.mint.instr_label(cx.id, b, i),
                "struct StackFrameStringAppend",
                &[
                    format!("next_frame->result_ptr = &frame->{field}.raw;"),
                    format!("next_frame->lhs = {xe}.raw;"),
                    format!("next_frame->rhs = {ye}.raw;"),
                ],
                "(FunctionObject){ .func_ptr = gox5_string_append, .free_vars = NULL }",
            );
            return Ok(Lowered::Suspended { post: String::new() });
        }

        let Some(slot) = self.result_slot(cx, instr) else {
            return Ok(Lowered::Pure);
        };
        let field = slot.field.clone();
        let xe = self.operand(cx, x)?;
        let ye = self.operand(cx, y)?;
        match op {
            BinOpKind::Add | BinOpKind::Sub | BinOpKind::Mul | BinOpKind::Div => {
                let c = match op {
                    BinOpKind::Add => "+",
                    BinOpKind::Sub => "-",
                    BinOpKind::Mul => "*",
                    _ => "/",
                };
                leaf.line(&format!("frame->{field}.raw = {xe}.raw {c} {ye}.raw;"));
            }
            BinOpKind::Rem => leaf.line(&format!("frame->{field}.raw = {xe}.raw % {ye}.raw;")),
            BinOpKind::And => leaf.line(&format!("frame->{field}.raw = {xe}.raw & {ye}.raw;")),
            BinOpKind::Or => leaf.line(&format!("frame->{field}.raw = {xe}.raw | {ye}.raw;")),
            BinOpKind::Xor => leaf.line(&format!("frame->{field}.raw = {xe}.raw ^ {ye}.raw;")),
            BinOpKind::AndNot => {
                leaf.line(&format!("frame->{field}.raw = {xe}.raw & ~{ye}.raw;"))
            }
            BinOpKind::Shl | BinOpKind::Shr => {
                let kind = operand_kind.ok_or_else(|| {
                    CodeGenError::Unsupported(format!("shift on non-integer: {instr}"))
                })?;
                let raw = basic_c_raw(kind);
                let unsigned = unsigned_c_raw(kind);
                let width = width_expr(kind);
                leaf.line("{");
                leaf.line(&format!("uintptr_t shift = (uintptr_t){ye}.raw;"));
                match (op, kind.is_unsigned()) {
                    (BinOpKind::Shl, _) => {
                        leaf.line(&format!(
                            "frame->{field}.raw = ({raw})((shift >= (uintptr_t){width}) ? 0 : (({unsigned}){xe}.raw << shift));"
                        ));
                    }
                    (BinOpKind::Shr, true) => {
                        leaf.line(&format!(
                            "frame->{field}.raw = ({raw})((shift >= (uintptr_t){width}) ? 0 : ({xe}.raw >> shift));"
                        ));
                    }
                    (BinOpKind::Shr, false) => {
                        // Arithmetic right shift: logical shift plus a
                        // sign-fill mask, guarded against over-width
                        // counts.
                        leaf.line(&format!("{unsigned} bits = ({unsigned}){xe}.raw;"));
                        leaf.line(&format!(
                            "{unsigned} fill = ({xe}.raw < 0) ? ({unsigned})~({unsigned})0 : ({unsigned})0;"
                        ));
                        leaf.line(&format!(
                            "frame->{field}.raw = ({raw})((shift >= (uintptr_t){width}) ? fill : ({unsigned})((bits >> shift) | ({unsigned})(({unsigned})(fill << 1) << ((uintptr_t){width} - 1 - shift))));"
                        ));
                    }
                    _ => unreachable!(),
                }
                leaf.line("}");
            }
            BinOpKind::Eql | BinOpKind::Neq => {
                let tname = self.ctype(xt);
                let cmp = if op == BinOpKind::Eql { "==" } else { "!=" };
                leaf.line(&format!(
                    "frame->{field}.raw = (equal_{tname}(&{xe}, &{ye}) {cmp} true);"
                ));
            }
            BinOpKind::Lss | BinOpKind::Leq | BinOpKind::Gtr | BinOpKind::Geq => {
                let c = match op {
                    BinOpKind::Lss => "<",
                    BinOpKind::Leq => "<=",
                    BinOpKind::Gtr => ">",
                    _ => ">=",
                };
                leaf.line(&format!("frame->{field}.raw = ({xe}.raw {c} {ye}.raw);"));
            }
        }
        Ok(Lowered::Pure)
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_unop(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        op: UnOpKind,
        x: &Operand,
        comma_ok: bool,
    ) -> Result<Lowered, CodeGenError> {
        if op == UnOpKind::Recv {
            let slot = self.result_slot(cx, instr).ok_or_else(|| {
                CodeGenError::Invariant("channel receive without result slot".into())
            })?;
            let field = slot.field.clone();
            let xt = self.operand_ty(cx, x)?;
            let elem = match self.program.underlying(xt) {
                Type::Chan { elem } => *elem,
                _ => {
                    return Err(CodeGenError::Invariant(format!(
                        "receive on non-channel: {instr}"
                    )));
                }
            };
            let info = self.type_info_ref(elem);
            let xe = self.operand(cx, x)?;
            let (data, available) = if comma_ok {
                (
                    format!("next_frame->data = (void*)&frame->{field}.raw.e0;"),
                    format!("next_frame->available = &frame->{field}.raw.e1;"),
                )
            } else {
                (
                    format!("next_frame->data = (void*)&frame->{field};"),
                    "next_frame->available = NULL;".to_string(),
                )
            };
            self.emit_suspend(
                leaf,
                &self.mint.instr_label(cx.id, b, i),
                "struct StackFrameChannelReceive",
                &[
                    format!("next_frame->channel = {xe}.raw;"),
                    format!("next_frame->type_id = {info};"),
                    data,
                    available,
                ],
                "(FunctionObject){ .func_ptr = gox5_channel_receive, .free_vars = NULL }",
            );
            return Ok(Lowered::Suspended { post: String::new() });
        }

        let Some(slot) = self.result_slot(cx, instr) else {
            return Ok(Lowered::Pure);
        };
        let field = slot.field.clone();
        let xe = self.operand(cx, x)?;
        match op {
            UnOpKind::Neg => leaf.line(&format!("frame->{field}.raw = -{xe}.raw;")),
            UnOpKind::Not => leaf.line(&format!("frame->{field}.raw = !{xe}.raw;")),
            UnOpKind::BitNot => leaf.line(&format!("frame->{field}.raw = ~{xe}.raw;")),
            UnOpKind::Deref => leaf.line(&format!("frame->{field} = *{xe}.raw;")),
            UnOpKind::Recv => unreachable!(),
        }
        Ok(Lowered::Pure)
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_convert(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        x: &Operand,
    ) -> Result<Lowered, CodeGenError> {
        let Some(result) = &instr.result else {
            return Ok(Lowered::Pure);
        };
        let to = result.ty;
        let from = self.operand_ty(cx, x)?;
        let to_string = is_string(self.program, Some(to));
        let from_string = is_string(self.program, Some(from));

        if to_string != from_string {
            return self.lower_string_convert(cx, leaf, b, i, instr, x, from, to);
        }

        let Some(slot) = self.result_slot(cx, instr) else {
            return Ok(Lowered::Pure);
        };
        let field = slot.field.clone();
        let xe = self.operand(cx, x)?;
        match self.program.underlying(to) {
            Type::Basic(kind) => {
                let raw = basic_c_raw(*kind);
                leaf.line(&format!("frame->{field}.raw = ({raw}){xe}.raw;"));
            }
            Type::Pointer { elem } => {
                let elem_name = self.ctype(*elem);
                leaf.line(&format!("frame->{field}.raw = ({elem_name}*){xe}.raw;"));
            }
            _ => {
                return Err(CodeGenError::Unsupported(format!("Convert: {instr}")));
            }
        }
        Ok(Lowered::Pure)
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_string_convert(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        x: &Operand,
        from: TypeId,
        to: TypeId,
    ) -> Result<Lowered, CodeGenError> {
        let slot = self.result_slot(cx, instr).ok_or_else(|| {
            CodeGenError::Invariant("string conversion without result slot".into())
        })?;
        let field = slot.field.clone();
        let xe = self.operand(cx, x)?;
        let label = self.mint.instr_label(cx.id, b, i);
        let to_string = is_string(self.program, Some(to));

        if to_string {
            match self.program.underlying(from) {
                Type::Basic(kind) if kind.is_integer() => {
                    self.emit_suspend(
                        leaf,
                        &label,
                        "struct StackFrameStringNewFromRune",
                        &[
                            format!("next_frame->result_ptr = &frame->{field}.raw;"),
                            format!("next_frame->rune = (int32_t){xe}.raw;"),
                        ],
                        "(FunctionObject){ .func_ptr = gox5_string_new_from_rune, .free_vars = NULL }",
                    );
                }
                Type::Slice { elem } => {
                    let target = match self.program.underlying(*elem) {
                        Type::Basic(BasicKind::Uint8) => "gox5_string_new_from_byte_slice",
                        Type::Basic(BasicKind::Int32) => "gox5_string_new_from_rune_slice",
                        _ => {
                            return Err(CodeGenError::Unsupported(format!(
                                "conversion to string: {instr}"
                            )));
                        }
                    };
                    let frame_ty = if target.ends_with("byte_slice") {
                        "struct StackFrameStringNewFromByteSlice"
                    } else {
                        "struct StackFrameStringNewFromRuneSlice"
                    };
                    self.emit_suspend(
                        leaf,
                        &label,
                        frame_ty,
                        &[
                            format!("next_frame->result_ptr = &frame->{field}.raw;"),
                            format!("next_frame->slice = {xe}.raw;"),
                        ],
                        &format!(
                            "(FunctionObject){{ .func_ptr = {target}, .free_vars = NULL }}"
                        ),
                    );
                }
                _ => {
                    return Err(CodeGenError::Unsupported(format!(
                        "conversion to string: {instr}"
                    )));
                }
            }
        } else {
            // String to byte or rune slice.
            let elem = match self.program.underlying(to) {
                Type::Slice { elem } => *elem,
                _ => {
                    return Err(CodeGenError::Unsupported(format!(
                        "conversion from string: {instr}"
                    )));
                }
            };
            let info = self.type_info_ref(elem);
            self.emit_suspend(
                leaf,
                &label,
                "struct StackFrameSliceFromString",
                &[
                    format!("next_frame->result_ptr = &frame->{field}.raw;"),
                    format!("next_frame->type_id = {info};"),
                    format!("next_frame->src = {xe}.raw;"),
                ],
                "(FunctionObject){ .func_ptr = gox5_slice_from_string, .free_vars = NULL }",
            );
        }
        Ok(Lowered::Suspended { post: String::new() })
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_lookup(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        x: &Operand,
        index: &Operand,
        comma_ok: bool,
    ) -> Result<Lowered, CodeGenError> {
        let xt = self.operand_ty(cx, x)?;
        match self.program.underlying(xt) {
            Type::Basic(BasicKind::String) => {
                // Byte read: pure.
                let Some(slot) = self.result_slot(cx, instr) else {
                    return Ok(Lowered::Pure);
                };
                let field = slot.field.clone();
                let xe = self.operand(cx, x)?;
                let ie = self.operand(cx, index)?;
                leaf.line(&format!(
                    "frame->{field}.raw = (uint8_t){xe}.raw[{ie}.raw];"
                ));
                Ok(Lowered::Pure)
            }
            Type::Map { .. } => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("map lookup without result slot".into())
                })?;
                let field = slot.field.clone();
                let xe = self.operand(cx, x)?;
                let ke = self.operand(cx, index)?;
                let (value, found) = if comma_ok {
                    (
                        format!("next_frame->value = (void*)&frame->{field}.raw.e0;"),
                        format!("next_frame->found = &frame->{field}.raw.e1;"),
                    )
                } else {
                    (
                        format!("next_frame->value = (void*)&frame->{field};"),
                        "next_frame->found = NULL;".to_string(),
                    )
                };
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    "struct StackFrameMapGet",
                    &[
                        format!("next_frame->map = {xe}.raw;"),
                        format!("next_frame->key = (void*)&{ke};"),
                        value,
                        found,
                    ],
                    "(FunctionObject){ .func_ptr = gox5_map_get, .free_vars = NULL }",
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            _ => Err(CodeGenError::Unsupported(format!("Lookup base: {instr}"))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_next(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        iter: &Operand,
        string_iter: bool,
    ) -> Result<Lowered, CodeGenError> {
        let slot = self.result_slot(cx, instr).ok_or_else(|| {
            CodeGenError::Invariant("Next without result slot".into())
        })?;
        let field = slot.field.clone();
        let ie = self.operand(cx, iter)?;
        let label = self.mint.instr_label(cx.id, b, i);
        if string_iter {
            self.emit_suspend(
                leaf,
                &label,
                "struct StackFrameStringNext",
                &[
                    format!("next_frame->string = (const char*){ie}.collection;"),
                    format!("next_frame->index = &frame->{field}.raw.e1;"),
                    format!("next_frame->rune = &frame->{field}.raw.e2;"),
                    format!("next_frame->found = &frame->{field}.raw.e0;"),
                    format!("next_frame->count = &{ie}.count;"),
                ],
                "(FunctionObject){ .func_ptr = gox5_string_next, .free_vars = NULL }",
            );
        } else {
            self.emit_suspend(
                leaf,
                &label,
                "struct StackFrameMapNext",
                &[
                    format!("next_frame->map = (MapObject*){ie}.collection;"),
                    format!("next_frame->key = (void*)&frame->{field}.raw.e1;"),
                    format!("next_frame->value = (void*)&frame->{field}.raw.e2;"),
                    format!("next_frame->found = &frame->{field}.raw.e0;"),
                    format!("next_frame->count = &{ie}.count;"),
                ],
                "(FunctionObject){ .func_ptr = gox5_map_next, .free_vars = NULL }",
            );
        }
        Ok(Lowered::Suspended { post: String::new() })
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_slice(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        x: &Operand,
        low: &Option<Operand>,
        high: &Option<Operand>,
    ) -> Result<Lowered, CodeGenError> {
        let xt = self.operand_ty(cx, x)?;
        let xe = self.operand(cx, x)?;

        // Substring goes through the runtime; absent high means "to
        // the end", which the runtime reads as -1.
        if is_string(self.program, Some(xt)) {
            let slot = self.result_slot(cx, instr).ok_or_else(|| {
                CodeGenError::Invariant("substring without result slot".into())
            })?;
            let field = slot.field.clone();
            let low_e = match low {
                Some(l) => format!("{}.raw", self.operand(cx, l)?),
                None => "0".to_string(),
            };
            let high_e = match high {
                Some(h) => format!("{}.raw", self.operand(cx, h)?),
                None => "(intptr_t)-1".to_string(),
            };
            self.emit_suspend(
                leaf,
                &self.mint.instr_label(cx.id, b, i),
                "struct StackFrameStringSubstr",
                &[
                    format!("next_frame->result_ptr = &frame->{field}.raw;"),
                    format!("next_frame->base = {xe}.raw;"),
                    format!("next_frame->low = {low_e};"),
                    format!("next_frame->high = {high_e};"),
                ],
                "(FunctionObject){ .func_ptr = gox5_string_substr, .free_vars = NULL }",
            );
            return Ok(Lowered::Suspended { post: String::new() });
        }

        let Some(slot) = self.result_slot(cx, instr) else {
            return Ok(Lowered::Pure);
        };
        let field = slot.field.clone();
        let (base, len, cap) = match self.program.underlying(xt) {
            Type::Slice { .. } => (
                format!("{xe}.typed.ptr"),
                format!("(intptr_t){xe}.typed.size"),
                format!("(intptr_t){xe}.typed.capacity"),
            ),
            Type::Pointer { elem } => match self.program.underlying(*elem) {
                Type::Array { len, .. } => (
                    format!("{xe}.raw->raw"),
                    format!("{len}"),
                    format!("{len}"),
                ),
                _ => {
                    return Err(CodeGenError::Unsupported(format!("Slice base: {instr}")));
                }
            },
            _ => {
                return Err(CodeGenError::Unsupported(format!("Slice base: {instr}")));
            }
        };
        let low_e = match low {
            Some(l) => format!("{}.raw", self.operand(cx, l)?),
            None => "0".to_string(),
        };
        let high_e = match high {
            Some(h) => format!("{}.raw", self.operand(cx, h)?),
            None => len.clone(),
        };
        leaf.line("{");
        leaf.line(&format!("intptr_t low = {low_e};"));
        leaf.line(&format!("intptr_t high = {high_e};"));
        leaf.line(&format!("frame->{field}.typed.ptr = {base} + low;"));
        leaf.line(&format!("frame->{field}.typed.size = (size_t)(high - low);"));
        leaf.line(&format!(
            "frame->{field}.typed.capacity = (size_t)({cap} - low);"
        ));
        leaf.line("}");
        Ok(Lowered::Pure)
    }

    fn lower_type_assert(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        instr: &Instr,
        x: &Operand,
        asserted: TypeId,
        comma_ok: bool,
    ) -> Result<Lowered, CodeGenError> {
        let Some(slot) = self.result_slot(cx, instr) else {
            return Ok(Lowered::Pure);
        };
        let field = slot.field.clone();
        let xe = self.operand(cx, x)?;
        let asserted_is_iface = self.program.underlying(asserted).is_interface();

        if comma_ok {
            if asserted_is_iface {
                let methods = match self.program.underlying(asserted) {
                    Type::Interface { methods } => methods.clone(),
                    _ => unreachable!(),
                };
                let mut cond = String::from("true");
                for m in &methods {
                    write!(
                        cond,
                        " && gox5_interface_has_method({xe}.type_id.info, \"{}\")",
                        m.name
                    )?;
                }
                leaf.line(&format!("frame->{field}.raw.e1.raw = ({cond});"));
                leaf.line(&format!(
                    "if (frame->{field}.raw.e1.raw) {{ frame->{field}.raw.e0 = {xe}; }} else {{ memset(&frame->{field}.raw.e0, 0, sizeof(frame->{field}.raw.e0)); }}"
                ));
            } else {
                let info = self.type_info_ref(asserted);
                let tname = self.ctype(asserted);
                leaf.line(&format!(
                    "frame->{field}.raw.e1.raw = ({xe}.type_id.info == {info});"
                ));
                leaf.line(&format!(
                    "if (frame->{field}.raw.e1.raw) {{ frame->{field}.raw.e0 = *({tname}*){xe}.receiver; }} else {{ memset(&frame->{field}.raw.e0, 0, sizeof(frame->{field}.raw.e0)); }}"
                ));
            }
        } else if asserted_is_iface {
            leaf.line(&format!("frame->{field} = {xe};"));
        } else {
            // The checked variant traps in the runtime; here the
            // value is copied unconditionally.
            let tname = self.ctype(asserted);
            leaf.line(&format!("frame->{field} = *({tname}*){xe}.receiver;"));
        }
        Ok(Lowered::Pure)
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_select(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        states: &[SelectState],
        blocking: bool,
    ) -> Result<Lowered, CodeGenError> {
        let slot = self.result_slot(cx, instr).ok_or_else(|| {
            CodeGenError::Invariant("Select without result slot".into())
        })?;
        let field = slot.field.clone();
        let mut fields = vec![
            format!("next_frame->selected_index = &frame->{field}.raw.e0;"),
            format!("next_frame->receive_available = &frame->{field}.raw.e1;"),
            format!("next_frame->need_block = {blocking};"),
            format!("next_frame->entry_count = {};", states.len()),
        ];
        let mut recv_index = 0usize;
        for (k, state) in states.iter().enumerate() {
            let ct = self.operand_ty(cx, &state.chan)?;
            let elem = match self.program.underlying(ct) {
                Type::Chan { elem } => *elem,
                _ => {
                    return Err(CodeGenError::Invariant(format!(
                        "Select on non-channel: {instr}"
                    )));
                }
            };
            let info = self.type_info_ref(elem);
            let ce = self.operand(cx, &state.chan)?;
            fields.push(format!("next_frame->entry_buffer[{k}].channel = {ce}.raw;"));
            match &state.send {
                Some(v) => {
                    let ve = self.operand(cx, v)?;
                    fields.push(format!(
                        "next_frame->entry_buffer[{k}].data = (void*)&{ve};"
                    ));
                    fields.push(format!("next_frame->entry_buffer[{k}].is_send = true;"));
                }
                None => {
                    fields.push(format!(
                        "next_frame->entry_buffer[{k}].data = (void*)&frame->{field}.raw.e{};",
                        2 + recv_index
                    ));
                    fields.push(format!("next_frame->entry_buffer[{k}].is_send = false;"));
                    recv_index += 1;
                }
            }
            fields.push(format!("next_frame->entry_buffer[{k}].type_id = {info};"));
        }
        self.emit_suspend(
            leaf,
            &self.mint.instr_label(cx.id, b, i),
            "struct StackFrameChannelSelect",
            &fields,
            "(FunctionObject){ .func_ptr = gox5_channel_select, .free_vars = NULL }",
        );
        Ok(Lowered::Suspended { post: String::new() })
    }

    /// Direct, indirect, interface, and builtin calls.
    #[allow(clippy::too_many_arguments)]
    fn lower_call(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        call: &CallCommon,
    ) -> Result<Lowered, CodeGenError> {
        match &call.callee {
            Callee::Builtin(builtin) => self.lower_builtin(cx, leaf, b, i, instr, call, *builtin),
            Callee::Function(f) => {
                let fname = self.mint.function_name(*f);
                let frame_ty = format!("struct StackFrame_{fname}");
                let mut fields = self.call_result_fields(cx, instr)?;
                for (k, arg) in call.args.iter().enumerate() {
                    let ae = self.operand(cx, arg)?;
                    fields.push(format!("next_frame->signature.param{k} = {ae};"));
                }
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    &frame_ty,
                    &fields,
                    &format!("(FunctionObject){{ .func_ptr = {fname}, .free_vars = NULL }}"),
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            Callee::Value(v) => {
                let frame_ty = format!("struct {}", self.call_frame(call.signature, false)?);
                let ve = self.operand(cx, v)?;
                let mut fields = self.call_result_fields(cx, instr)?;
                fields.push(format!("next_frame->common.free_vars = {ve}.free_vars;"));
                for (k, arg) in call.args.iter().enumerate() {
                    let ae = self.operand(cx, arg)?;
                    fields.push(format!("next_frame->signature.param{k} = {ae};"));
                }
                self.emit_suspend(
                    leaf,
                    &self.mint.instr_label(cx.id, b, i),
                    &frame_ty,
                    &fields,
                    &ve,
                );
                Ok(Lowered::Suspended { post: String::new() })
            }
            Callee::Method { iface, name } => {
                let aux = cx
                    .layout
                    .aux_callee
                    .get(&(b, i))
                    .ok_or_else(|| {
                        CodeGenError::Invariant("interface call without callee slot".into())
                    })?
                    .clone();
                let ie = self.operand(cx, iface)?;
                let label = self.mint.instr_label(cx.id, b, i);
                let dispatch_label = format!("{label}_dispatch");

                // First suspension: resolve the method by name.
                self.emit_suspend(
                    leaf,
                    &dispatch_label,
                    "struct StackFrameSearchMethod",
                    &[
                        format!("next_frame->result_ptr = &frame->{aux};"),
                        format!("next_frame->interface = {ie};"),
                        format!("next_frame->method_name = \"{name}\";"),
                    ],
                    "(FunctionObject){ .func_ptr = gox5_search_method, .free_vars = NULL }",
                );
                leaf.end_and_begin(&dispatch_label);

                // Second suspension: invoke through the abstract
                // signature, receiver typed as an opaque pointer.
                let frame_ty = format!("struct {}", self.call_frame(call.signature, true)?);
                let mut fields = self.call_result_fields(cx, instr)?;
                fields.push(format!(
                    "next_frame->common.free_vars = frame->{aux}.free_vars;"
                ));
                fields.push(format!("next_frame->signature.param0 = {ie}.receiver;"));
                for (k, arg) in call.args.iter().enumerate() {
                    let ae = self.operand(cx, arg)?;
                    fields.push(format!("next_frame->signature.param{} = {ae};", k + 1));
                }
                self.emit_suspend(leaf, &label, &frame_ty, &fields, &format!("frame->{aux}"));
                Ok(Lowered::Suspended { post: String::new() })
            }
        }
    }

    /// `result_ptr` assignment for a call-shaped suspension.
    fn call_result_fields(
        &mut self,
        cx: &FuncCx<'_>,
        instr: &Instr,
    ) -> Result<Vec<String>, CodeGenError> {
        match self.result_slot(cx, instr) {
            Some(slot) => Ok(vec![format!(
                "next_frame->signature.result_ptr = &frame->{};",
                slot.field
            )]),
            None => Ok(vec![]),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_defer_go(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        call: &CallCommon,
        spawn: bool,
    ) -> Result<Lowered, CodeGenError> {
        // Resolve the function object to register or spawn.
        let fo = match &call.callee {
            Callee::Function(f) => {
                format!("funcobj_{}", self.mint.function_name(*f))
            }
            Callee::Value(v) => self.operand(cx, v)?,
            Callee::Method { iface, name } => {
                let aux = cx
                    .layout
                    .aux_callee
                    .get(&(b, i))
                    .ok_or_else(|| {
                        CodeGenError::Invariant("deferred interface call without callee slot".into())
                    })?
                    .clone();
                let ie = self.operand(cx, iface)?;
                let dispatch_label =
                    format!("{}_dispatch", self.mint.instr_label(cx.id, b, i));
                self.emit_suspend(
                    leaf,
                    &dispatch_label,
                    "struct StackFrameSearchMethod",
                    &[
                        format!("next_frame->result_ptr = &frame->{aux};"),
                        format!("next_frame->interface = {ie};"),
                        format!("next_frame->method_name = \"{name}\";"),
                    ],
                    "(FunctionObject){ .func_ptr = gox5_search_method, .free_vars = NULL }",
                );
                leaf.end_and_begin(&dispatch_label);
                format!("frame->{aux}")
            }
            Callee::Builtin(_) => {
                return Err(CodeGenError::Unsupported(format!(
                    "deferred builtin: {instr}"
                )));
            }
        };

        // Receiver of an interface target rides in front of the
        // serialized arguments.
        let mut serialized: Vec<(String, String)> = Vec::new();
        if let Callee::Method { iface, .. } = &call.callee {
            let ie = self.operand(cx, iface)?;
            serialized.push((format!("{ie}.receiver"), "void*".to_string()));
        }
        for arg in &call.args {
            let at = self.operand_ty(cx, arg)?;
            let ae = self.operand(cx, arg)?;
            serialized.push((ae, self.ctype(at)));
        }

        let mut fields = vec![format!("next_frame->function_object = {fo};")];
        if spawn {
            let results = match self.program.ty(self.program.underlying_id(call.signature)) {
                Type::Signature { results, .. } => results.clone(),
                _ => vec![],
            };
            match self.mint.result_type_name(&results) {
                Some(r) => fields.push(format!("next_frame->result_size = sizeof({r});")),
                None => fields.push("next_frame->result_size = 0;".to_string()),
            }
        }
        fields.push("{".to_string());
        fields.push("void** arg_cursor = next_frame->arg_buffer;".to_string());
        for (expr, c_type) in &serialized {
            fields.push(format!("memcpy(arg_cursor, &{expr}, sizeof({c_type}));"));
            fields.push(format!(
                "arg_cursor += (sizeof({c_type}) + sizeof(void*) - 1) / sizeof(void*);"
            ));
        }
        fields.push(
            "next_frame->num_arg_buffer_words = (uintptr_t)(arg_cursor - next_frame->arg_buffer);"
                .to_string(),
        );
        fields.push("}".to_string());

        let (frame_ty, target) = if spawn {
            (
                "struct StackFrameSpawn",
                "(FunctionObject){ .func_ptr = gox5_spawn, .free_vars = NULL }",
            )
        } else {
            (
                "struct StackFrameDeferRegister",
                "(FunctionObject){ .func_ptr = gox5_defer_register, .free_vars = NULL }",
            )
        };
        self.emit_suspend(
            leaf,
            &self.mint.instr_label(cx.id, b, i),
            frame_ty,
            &fields,
            target,
        );
        Ok(Lowered::Suspended { post: String::new() })
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_builtin(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        b: u32,
        i: usize,
        instr: &Instr,
        call: &CallCommon,
        builtin: Builtin,
    ) -> Result<Lowered, CodeGenError> {
        let label = self.mint.instr_label(cx.id, b, i);
        let arg_ty = |cg: &Self, k: usize| -> Result<TypeId, CodeGenError> {
            call.args
                .get(k)
                .ok_or_else(|| {
                    CodeGenError::Invariant(format!("builtin arity: {instr}"))
                })
                .and_then(|a| cg.operand_ty(cx, a))
        };
        match builtin {
            Builtin::Print | Builtin::Println => {
                return self.lower_print(cx, leaf, call, builtin == Builtin::Println);
            }
            Builtin::Len => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("len without result slot".into())
                })?;
                let field = slot.field.clone();
                let t = arg_ty(self, 0)?;
                let ae = self.operand(cx, &call.args[0])?;
                match self.program.underlying(t) {
                    Type::Basic(BasicKind::String) => self.emit_suspend(
                        leaf,
                        &label,
                        "struct StackFrameStringLength",
                        &[
                            format!("next_frame->result_ptr = &frame->{field};"),
                            format!("next_frame->string = {ae}.raw;"),
                        ],
                        "(FunctionObject){ .func_ptr = gox5_string_length, .free_vars = NULL }",
                    ),
                    Type::Slice { .. } => self.emit_suspend(
                        leaf,
                        &label,
                        "struct StackFrameSliceSize",
                        &[
                            format!("next_frame->result_ptr = &frame->{field};"),
                            format!("next_frame->slice = {ae}.raw;"),
                        ],
                        "(FunctionObject){ .func_ptr = gox5_slice_size, .free_vars = NULL }",
                    ),
                    Type::Map { .. } => self.emit_suspend(
                        leaf,
                        &label,
                        "struct StackFrameMapLen",
                        &[
                            format!("next_frame->result_ptr = &frame->{field};"),
                            format!("next_frame->map = {ae}.raw;"),
                        ],
                        "(FunctionObject){ .func_ptr = gox5_map_len, .free_vars = NULL }",
                    ),
                    _ => {
                        return Err(CodeGenError::Unsupported(format!("len: {instr}")));
                    }
                }
            }
            Builtin::Cap => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("cap without result slot".into())
                })?;
                let field = slot.field.clone();
                let t = arg_ty(self, 0)?;
                let ae = self.operand(cx, &call.args[0])?;
                match self.program.underlying(t) {
                    Type::Slice { .. } => self.emit_suspend(
                        leaf,
                        &label,
                        "struct StackFrameSliceCapacity",
                        &[
                            format!("next_frame->result_ptr = &frame->{field};"),
                            format!("next_frame->slice = {ae}.raw;"),
                        ],
                        "(FunctionObject){ .func_ptr = gox5_slice_capacity, .free_vars = NULL }",
                    ),
                    _ => {
                        return Err(CodeGenError::Unsupported(format!("cap: {instr}")));
                    }
                }
            }
            Builtin::Append => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("append without result slot".into())
                })?;
                let field = slot.field.clone();
                let lhs_ty = arg_ty(self, 0)?;
                let rhs_ty = arg_ty(self, 1)?;
                let le = self.operand(cx, &call.args[0])?;
                let re = self.operand(cx, &call.args[1])?;
                if is_string(self.program, Some(rhs_ty)) {
                    self.emit_suspend(
                        leaf,
                        &label,
                        "struct StackFrameSliceAppendString",
                        &[
                            format!("next_frame->result_ptr = &frame->{field}.raw;"),
                            format!("next_frame->slice = {le}.raw;"),
                            format!("next_frame->string = {re}.raw;"),
                        ],
                        "(FunctionObject){ .func_ptr = gox5_slice_append_string, .free_vars = NULL }",
                    );
                } else {
                    let elem = match self.program.underlying(lhs_ty) {
                        Type::Slice { elem } => *elem,
                        _ => {
                            return Err(CodeGenError::Unsupported(format!("append: {instr}")));
                        }
                    };
                    let info = self.type_info_ref(elem);
                    self.emit_suspend(
                        leaf,
                        &label,
                        "struct StackFrameSliceAppend",
                        &[
                            format!("next_frame->result_ptr = &frame->{field}.raw;"),
                            format!("next_frame->type_id = {info};"),
                            format!("next_frame->lhs = {le}.raw;"),
                            format!("next_frame->rhs = {re}.raw;"),
                        ],
                        "(FunctionObject){ .func_ptr = gox5_slice_append, .free_vars = NULL }",
                    );
                }
            }
            Builtin::Copy => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("copy without result slot".into())
                })?;
                let field = slot.field.clone();
                let rhs_ty = arg_ty(self, 1)?;
                let de = self.operand(cx, &call.args[0])?;
                let se = self.operand(cx, &call.args[1])?;
                if is_string(self.program, Some(rhs_ty)) {
                    self.emit_suspend(
                        leaf,
                        &label,
                        "struct StackFrameSliceCopyString",
                        &[
                            format!("next_frame->result_ptr = &frame->{field};"),
                            format!("next_frame->dst = {de}.raw;"),
                            format!("next_frame->src = {se}.raw;"),
                        ],
                        "(FunctionObject){ .func_ptr = gox5_slice_copy_string, .free_vars = NULL }",
                    );
                } else {
                    self.emit_suspend(
                        leaf,
                        &label,
                        "struct StackFrameSliceCopy",
                        &[
                            format!("next_frame->result_ptr = &frame->{field};"),
                            format!("next_frame->dst = {de}.raw;"),
                            format!("next_frame->src = {se}.raw;"),
                        ],
                        "(FunctionObject){ .func_ptr = gox5_slice_copy, .free_vars = NULL }",
                    );
                }
            }
            Builtin::Close => {
                let ae = self.operand(cx, &call.args[0])?;
                self.emit_suspend(
                    leaf,
                    &label,
                    "struct StackFrameChannelClose",
                    &[format!("next_frame->channel = {ae}.raw;")],
                    "(FunctionObject){ .func_ptr = gox5_channel_close, .free_vars = NULL }",
                );
            }
            Builtin::Complex => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("complex without result slot".into())
                })?;
                let field = slot.field.clone();
                let wide = matches!(
                    self.program.underlying(slot.ty).as_basic(),
                    Some(BasicKind::Complex128)
                );
                let (frame_ty, target) = if wide {
                    ("struct StackFrameComplex128New", "gox5_complex128_new")
                } else {
                    ("struct StackFrameComplex64New", "gox5_complex64_new")
                };
                let re = self.operand(cx, &call.args[0])?;
                let im = self.operand(cx, &call.args[1])?;
                self.emit_suspend(
                    leaf,
                    &label,
                    frame_ty,
                    &[
                        format!("next_frame->result_ptr = &frame->{field};"),
                        format!("next_frame->real = {re}.raw;"),
                        format!("next_frame->imaginary = {im}.raw;"),
                    ],
                    &format!("(FunctionObject){{ .func_ptr = {target}, .free_vars = NULL }}"),
                );
            }
            Builtin::Real | Builtin::Imag => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("real/imag without result slot".into())
                })?;
                let field = slot.field.clone();
                let t = arg_ty(self, 0)?;
                let wide = matches!(
                    self.program.underlying(t).as_basic(),
                    Some(BasicKind::Complex128)
                );
                let ae = self.operand(cx, &call.args[0])?;
                let (frame_ty, target) = match (wide, builtin) {
                    (true, Builtin::Real) => {
                        ("struct StackFrameComplex128Real", "gox5_complex128_real")
                    }
                    (true, _) => (
                        "struct StackFrameComplex128Imaginary",
                        "gox5_complex128_imaginary",
                    ),
                    (false, Builtin::Real) => {
                        ("struct StackFrameComplex64Real", "gox5_complex64_real")
                    }
                    (false, _) => (
                        "struct StackFrameComplex64Imaginary",
                        "gox5_complex64_imaginary",
                    ),
                };
                self.emit_suspend(
                    leaf,
                    &label,
                    frame_ty,
                    &[
                        format!("next_frame->result_ptr = &frame->{field};"),
                        format!("next_frame->x = {ae}.raw;"),
                    ],
                    &format!("(FunctionObject){{ .func_ptr = {target}, .free_vars = NULL }}"),
                );
            }
            Builtin::Recover => {
                let slot = self.result_slot(cx, instr).ok_or_else(|| {
                    CodeGenError::Invariant("recover without result slot".into())
                })?;
                let field = slot.field.clone();
                self.emit_suspend(
                    leaf,
                    &label,
                    "struct StackFramePanicRecover",
                    &[format!("next_frame->result_ptr = &frame->{field};")],
                    "(FunctionObject){ .func_ptr = gox5_panic_recover, .free_vars = NULL }",
                );
            }
        }
        Ok(Lowered::Suspended { post: String::new() })
    }

    /// `print`/`println`: inline formatted emission to stderr, no
    /// suspension.
    fn lower_print(
        &mut self,
        cx: &FuncCx<'_>,
        leaf: &mut LeafEmitter,
        call: &CallCommon,
        newline: bool,
    ) -> Result<Lowered, CodeGenError> {
        for (k, arg) in call.args.iter().enumerate() {
            if newline && k > 0 {
                leaf.line("fputc(' ', stderr);");
            }
            let at = self.operand_ty(cx, arg)?;
            let ae = self.operand(cx, arg)?;
            match self.program.underlying(at) {
                Type::Basic(kind) => match kind {
                    BasicKind::Bool => {
                        leaf.line(&format!(
                            "fputs({ae}.raw ? \"true\" : \"false\", stderr);"
                        ));
                    }
                    k if k.is_integer() && k.is_unsigned() => {
                        leaf.line(&format!(
                            "fprintf(stderr, \"%llu\", (unsigned long long){ae}.raw);"
                        ));
                    }
                    k if k.is_integer() => {
                        leaf.line(&format!(
                            "fprintf(stderr, \"%lld\", (long long){ae}.raw);"
                        ));
                    }
                    k if k.is_float() => {
                        leaf.line(&format!("gox5_print_float64((double){ae}.raw);"));
                    }
                    k if k.is_complex() => {
                        leaf.line(&format!(
                            "gox5_print_complex128((double _Complex){ae}.raw);"
                        ));
                    }
                    BasicKind::String => {
                        leaf.line(&format!("fprintf(stderr, \"%s\", {ae}.raw);"));
                    }
                    BasicKind::UnsafePointer => {
                        leaf.line(&format!("fprintf(stderr, \"%p\", {ae}.raw);"));
                    }
                    _ => {
                        return Err(CodeGenError::Unsupported(format!(
                            "print of {}",
                            self.ctype(at)
                        )));
                    }
                },
                Type::Pointer { .. } => {
                    leaf.line(&format!("fprintf(stderr, \"%p\", (void*){ae}.raw);"));
                }
                _ => {
                    return Err(CodeGenError::Unsupported(format!(
                        "print of {}",
                        self.ctype(at)
                    )));
                }
            }
        }
        if newline {
            leaf.line("fputc('\\n', stderr);");
        }
        Ok(Lowered::Pure)
    }

    /// The shared suspension tail: carve, zero, link, fill, advance,
    /// return.
    pub(crate) fn emit_suspend(
        &self,
        leaf: &mut LeafEmitter,
        resume_label: &str,
        frame_ty: &str,
        fields: &[String],
        target: &str,
    ) {
        leaf.line("{");
        leaf.line(&format!(
            "{frame_ty}* next_frame = ({frame_ty}*)(frame + 1);"
        ));
        if self.config.assertions {
            leaf.line("assert(((uintptr_t)next_frame % sizeof(void*)) == 0);");
        }
        leaf.line("memset(next_frame, 0, sizeof(*next_frame));");
        leaf.line(&format!(
            "next_frame->common.resume_func = (FunctionObject){{ .func_ptr = {resume_label}, .free_vars = frame->common.free_vars }};"
        ));
        leaf.line("next_frame->common.prev_stack_pointer = ctx->stack_pointer;");
        for f in fields {
            leaf.line(f);
        }
        leaf.line("ctx->stack_pointer = next_frame;");
        leaf.line(&format!("return {target};"));
        leaf.line("}");
    }

    /// The C field name of field `index` of a struct type, resolved
    /// against the visited universe's representative entry so that
    /// structurally identical arena duplicates agree.
    pub(crate) fn struct_field_cname(
        &self,
        struct_ty: TypeId,
        index: usize,
    ) -> Result<String, CodeGenError> {
        let under = self.program.underlying_id(struct_ty);
        let name = self.ctype(under);
        let rep = match self.universe.get(&name).map(|v| &v.shape) {
            Some(crate::typegraph::Shape::Arena(id)) => *id,
            _ => under,
        };
        let Type::Struct { fields } = self.program.ty(rep) else {
            return Err(CodeGenError::Invariant(format!(
                "field access on non-struct {name}"
            )));
        };
        let f = fields.get(index).ok_or_else(|| {
            CodeGenError::Invariant(format!("field {index} out of range on {name}"))
        })?;
        Ok(crate::mangle::field_name(&f.name, rep.index()))
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::emit_program;
    use crate::config::EmitterConfig;
    use gox_ssa::build::{FunctionBuilder, ProgramBuilder, int_const, konst, reg};
    use gox_ssa::{
        BasicKind, BinOpKind, Builtin, CallCommon, Callee, ConstValue, InstrKind, Operand,
        SelectState,
    };

    fn emit(program: &gox_ssa::Program) -> String {
        emit_program(program, &EmitterConfig::default()).unwrap()
    }

    #[test]
    fn test_signed_right_shift_has_guard_and_sign_fill() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig = b.signature(None, vec![int, int], vec![int]);
        let mut f = FunctionBuilder::new("sar", sig).param("x", int).param("n", int);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            int,
            InstrKind::BinOp {
                op: BinOpKind::Shr,
                x: Operand::Param(0),
                y: Operand::Param(1),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t0")] });
        b.function(f);
        let out = emit(&b.finish());
        assert!(out.contains("uintptr_t shift = (uintptr_t)frame->signature.param1.raw;"));
        assert!(out.contains("uintptr_t fill = (frame->signature.param0.raw < 0)"));
        assert!(out.contains("shift >= (uintptr_t)(sizeof(intptr_t) * 8)"));
        assert!(out.contains("(bits >> shift) |"));
    }

    #[test]
    fn test_left_shift_promotes_to_unsigned() {
        let mut b = ProgramBuilder::new("main");
        let i8t = b.basic(BasicKind::Int8);
        let sig = b.signature(None, vec![i8t, i8t], vec![i8t]);
        let mut f = FunctionBuilder::new("shl8", sig).param("x", i8t).param("n", i8t);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            i8t,
            InstrKind::BinOp {
                op: BinOpKind::Shl,
                x: Operand::Param(0),
                y: Operand::Param(1),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t0")] });
        b.function(f);
        let out = emit(&b.finish());
        assert!(out.contains("(int8_t)((shift >= (uintptr_t)8) ? 0 : ((uint8_t)frame->signature.param0.raw << shift));"));
    }

    #[test]
    fn test_println_formats_by_type() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let bool_t = b.basic(BasicKind::Bool);
        let str_t = b.basic(BasicKind::String);
        let f64t = b.basic(BasicKind::Float64);
        let sig = b.signature(None, vec![], vec![]);
        let print_sig = b.signature(None, vec![int, bool_t, str_t, f64t], vec![]);
        let mut f = FunctionBuilder::new("report", sig);
        let b0 = f.block();
        f.effect(
            b0,
            InstrKind::Call {
                call: CallCommon {
                    callee: Callee::Builtin(Builtin::Println),
                    args: vec![
                        int_const(int, 7),
                        konst(bool_t, ConstValue::Bool(true)),
                        konst(str_t, ConstValue::Str("hi".to_string())),
                        konst(f64t, ConstValue::Float(1.5)),
                    ],
                    signature: print_sig,
                },
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![] });
        b.function(f);
        let out = emit(&b.finish());
        assert!(out.contains("fprintf(stderr, \"%lld\", (long long)"));
        assert!(out.contains(".raw ? \"true\" : \"false\", stderr);"));
        assert!(out.contains("fprintf(stderr, \"%s\","));
        assert!(out.contains("gox5_print_float64((double)"));
        assert!(out.contains("fputc(' ', stderr);"));
        assert!(out.contains("fputc('\\n', stderr);"));
        // print builtins never suspend.
        assert!(!out.contains("gox5_print_float64, .free_vars"));
    }

    #[test]
    fn test_go_serializes_argument_snapshot() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let worker_sig = b.signature(None, vec![int], vec![]);
        let mut worker = FunctionBuilder::new("worker", worker_sig).param("n", int);
        let w0 = worker.block();
        worker.effect(w0, InstrKind::Return { results: vec![] });
        let worker_id = b.function(worker);

        let sig = b.signature(None, vec![], vec![]);
        let mut f = FunctionBuilder::new("spawner", sig);
        let b0 = f.block();
        f.effect(
            b0,
            InstrKind::Go {
                call: CallCommon {
                    callee: Callee::Function(worker_id),
                    args: vec![int_const(int, 9)],
                    signature: worker_sig,
                },
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![] });
        b.function(f);
        let out = emit(&b.finish());
        assert!(out.contains("next_frame->function_object = funcobj_f_24_worker;"));
        assert!(out.contains("next_frame->result_size = 0;"));
        assert!(out.contains("void** arg_cursor = next_frame->arg_buffer;"));
        assert!(out.contains("memcpy(arg_cursor, &c_24_9_24_IntObject, sizeof(IntObject));"));
        assert!(out.contains(
            "arg_cursor += (sizeof(IntObject) + sizeof(void*) - 1) / sizeof(void*);"
        ));
        assert!(out.contains("num_arg_buffer_words = (uintptr_t)(arg_cursor - next_frame->arg_buffer);"));
        assert!(out.contains("gox5_spawn"));
    }

    #[test]
    fn test_defer_registers_with_snapshot() {
        let mut b = ProgramBuilder::new("main");
        let cleanup_sig = b.signature(None, vec![], vec![]);
        let mut cleanup = FunctionBuilder::new("cleanup", cleanup_sig);
        let c0 = cleanup.block();
        cleanup.effect(c0, InstrKind::Return { results: vec![] });
        let cleanup_id = b.function(cleanup);

        let sig = b.signature(None, vec![], vec![]);
        let mut f = FunctionBuilder::new("guarded", sig);
        let b0 = f.block();
        f.effect(
            b0,
            InstrKind::Defer {
                call: CallCommon {
                    callee: Callee::Function(cleanup_id),
                    args: vec![],
                    signature: cleanup_sig,
                },
            },
        );
        f.effect(b0, InstrKind::RunDefers);
        f.effect(b0, InstrKind::Return { results: vec![] });
        b.function(f);
        let out = emit(&b.finish());
        assert!(out.contains("gox5_defer_register"));
        assert!(out.contains("next_frame->function_object = funcobj_f_24_cleanup;"));
        // Defer frames carry no result size; only spawn does.
        assert!(!out.contains("next_frame->result_size"));
        assert!(out.contains("gox5_defer_execute"));
    }

    #[test]
    fn test_select_serializes_entries() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let bool_t = b.basic(BasicKind::Bool);
        let chan = b.chan(int);
        let result = b.tuple(vec![int, bool_t, int]);
        let sig = b.signature(None, vec![chan, chan], vec![]);
        let mut f = FunctionBuilder::new("mux", sig).param("a", chan).param("b", chan);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            result,
            InstrKind::Select {
                states: vec![
                    SelectState {
                        chan: Operand::Param(0),
                        send: Some(int_const(int, 5)),
                    },
                    SelectState {
                        chan: Operand::Param(1),
                        send: None,
                    },
                ],
                blocking: true,
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![] });
        b.function(f);
        let out = emit(&b.finish());
        assert!(out.contains("next_frame->need_block = true;"));
        assert!(out.contains("next_frame->entry_count = 2;"));
        assert!(out.contains("next_frame->entry_buffer[0].is_send = true;"));
        assert!(out.contains("next_frame->entry_buffer[0].data = (void*)&c_24_5_24_IntObject;"));
        // The receive arm targets the tuple's first receive slot.
        assert!(out.contains("next_frame->entry_buffer[1].data = (void*)&frame->"));
        assert!(out.contains(".raw.e2;"));
        assert!(out.contains("next_frame->selected_index = &frame->"));
        assert!(out.contains("gox5_channel_select"));
    }

    #[test]
    fn test_map_lookup_comma_ok_targets_tuple_slots() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let bool_t = b.basic(BasicKind::Bool);
        let map = b.map(int, int);
        let pair = b.tuple(vec![int, bool_t]);
        let sig = b.signature(None, vec![map, int], vec![int]);
        let mut f = FunctionBuilder::new("probe", sig).param("m", map).param("k", int);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            pair,
            InstrKind::Lookup {
                x: Operand::Param(0),
                index: Operand::Param(1),
                comma_ok: true,
            },
        );
        f.instr(
            b0,
            "t1",
            int,
            InstrKind::Extract {
                tuple: reg("t0"),
                index: 0,
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t1")] });
        b.function(f);
        let out = emit(&b.finish());
        assert!(out.contains("next_frame->map = frame->signature.param0.raw;"));
        assert!(out.contains("next_frame->key = (void*)&frame->signature.param1;"));
        assert!(out.contains(".raw.e0;"));
        assert!(out.contains("next_frame->found = &frame->"));
        assert!(out.contains(".raw.e1;"));
        assert!(out.contains("gox5_map_get"));
    }

    #[test]
    fn test_type_assert_concrete_comma_ok() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let bool_t = b.basic(BasicKind::Bool);
        let named = b.named("S", int);
        let sptr = b.pointer(named);
        let iface = b.interface(vec![]);
        let pair = b.tuple(vec![sptr, bool_t]);
        let sig = b.signature(None, vec![iface], vec![bool_t]);
        let mut f = FunctionBuilder::new("assertit", sig).param("i", iface);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            pair,
            InstrKind::TypeAssert {
                x: Operand::Param(0),
                asserted: sptr,
                comma_ok: true,
            },
        );
        f.instr(
            b0,
            "t1",
            bool_t,
            InstrKind::Extract {
                tuple: reg("t0"),
                index: 1,
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t1")] });
        b.function(f);
        let program = b.finish();
        let ptr_name = crate::mangle::Mint::new(&program).type_name(sptr);
        let out = emit(&program);
        assert!(out.contains(&format!(
            ".raw.e1.raw = (frame->signature.param0.type_id.info == &runtime_info_type_{ptr_name});"
        )));
        assert!(out.contains(&format!("*({ptr_name}*)frame->signature.param0.receiver;")));
        assert!(out.contains("memset(&frame->"));
    }

    #[test]
    fn test_interface_call_searches_then_invokes() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let msig = b.signature(None, vec![], vec![int]);
        let iface = b.interface(vec![("Value", msig)]);
        let call_sig = b.signature(Some(iface), vec![], vec![int]);
        let sig = b.signature(None, vec![iface], vec![int]);
        let mut f = FunctionBuilder::new("dispatch", sig).param("i", iface);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            int,
            InstrKind::Call {
                call: CallCommon {
                    callee: Callee::Method {
                        iface: Operand::Param(0),
                        name: "Value".to_string(),
                    },
                    args: vec![],
                    signature: call_sig,
                },
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t0")] });
        b.function(f);
        let out = emit(&b.finish());
        // One search by source name, then the invoke through the
        // abstract signature with the boxed receiver.
        assert_eq!(out.matches("next_frame->method_name = \"Value\";").count(), 1);
        assert!(out.contains("gox5_search_method"));
        assert!(out.contains("next_frame->interface = frame->signature.param0;"));
        assert!(out.contains("_dispatch(LightWeightThreadContext* ctx)"));
        assert!(out.contains("next_frame->signature.param0 = frame->signature.param0.receiver;"));
        assert!(out.contains("Signature_24_Params_24_abstract"));
    }

    #[test]
    fn test_string_to_byte_slice_conversion_suspends() {
        let mut b = ProgramBuilder::new("main");
        let byte = b.basic(BasicKind::Uint8);
        let str_t = b.basic(BasicKind::String);
        let bytes = b.slice(byte);
        let sig = b.signature(None, vec![str_t], vec![bytes]);
        let mut f = FunctionBuilder::new("explode", sig).param("s", str_t);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            bytes,
            InstrKind::Convert {
                x: Operand::Param(0),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t0")] });
        b.function(f);
        let out = emit(&b.finish());
        assert!(out.contains("gox5_slice_from_string"));
        assert!(out.contains("next_frame->type_id = &runtime_info_type_Uint8Object;"));
        assert!(out.contains("next_frame->src = frame->signature.param0.raw;"));
    }

    #[test]
    fn test_make_slice_fills_typed_view_in_continuation() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sl = b.slice(int);
        let sig = b.signature(None, vec![int], vec![sl]);
        let mut f = FunctionBuilder::new("mk", sig).param("n", int);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            sl,
            InstrKind::MakeSlice {
                len: Operand::Param(0),
                cap: Operand::Param(0),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t0")] });
        b.function(f);
        let out = emit(&b.finish());
        assert!(out.contains(".typed.ptr;"));
        assert!(out.contains("sizeof(IntObject) * (uintptr_t)frame->signature.param0.raw;"));
        // The size/capacity fill happens after the allocator returns.
        let cont = out.find(".typed.size = (size_t)frame->signature.param0.raw;").unwrap();
        let alloc = out.find("gox5_new, .free_vars = NULL };").unwrap();
        assert!(alloc < cont);
    }
}
