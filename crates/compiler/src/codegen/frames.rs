//! Per-function frame layout and emission.
//!
//! A frame is the only mutable state a leaf function touches beyond
//! the thread context: `StackFrameCommon common`, the signature
//! sub-struct, one `_buf` storage slot per stack local, and one slot
//! per SSA value whose result is consumed. Suspending instructions
//! always get a slot for their result (the callee writes it through
//! `result_ptr` while the frame sleeps); a pure value nobody reads
//! gets none and is simply not computed.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Write as _;

use gox_ssa::{Callee, FuncId, InstrKind, Operand, Program, Type, TypeId};

use super::CodeGen;
use super::error::CodeGenError;
use super::instructions::is_suspending;
use crate::mangle::field_name;

/// Storage backing one stack-local `Alloc`.
#[derive(Debug, Clone)]
pub struct BufSlot {
    pub field: String,
    pub c_type: String,
}

/// One value slot in a frame.
#[derive(Debug, Clone)]
pub struct Slot {
    pub field: String,
    pub c_type: String,
    pub ty: TypeId,
    /// Present for stack allocs: the pointee storage the slot's
    /// pointer wraps.
    pub buf: Option<BufSlot>,
}

/// Everything the body emitter needs to know about one function's
/// frame.
#[derive(Debug, Clone)]
pub struct FrameLayout {
    pub func: FuncId,
    /// `f$...` entry name.
    pub func_name: String,
    /// `StackFrame_<func_name>`.
    pub frame_struct: String,
    /// `FreeVars_<func_name>` when the function captures.
    pub freevars_struct: Option<String>,
    /// Concrete signature struct name.
    pub sig_name: String,
    pub results: Vec<TypeId>,
    /// Register name → slot.
    pub slots: HashMap<String, Slot>,
    /// `(block, instr index)` → auxiliary slot holding the function
    /// object found by interface-method search.
    pub aux_callee: HashMap<(u32, usize), String>,
    /// Per block: the name of its last-emitted leaf function, which
    /// is what `ctx->prev_func` holds when control leaves the block.
    pub block_last: Vec<String>,
    /// Mangled free-variable field names, in binding order.
    pub freevar_fields: Vec<String>,
}

/// Walk every operand an instruction reads.
pub(crate) fn for_each_operand(kind: &InstrKind, f: &mut impl FnMut(&Operand)) {
    let mut call = |c: &gox_ssa::CallCommon| {
        match &c.callee {
            Callee::Value(v) => f(v),
            Callee::Method { iface, .. } => f(iface),
            Callee::Function(_) | Callee::Builtin(_) => {}
        }
        for a in &c.args {
            f(a);
        }
    };
    match kind {
        InstrKind::Alloc { .. } | InstrKind::Jump | InstrKind::RunDefers => {}
        InstrKind::BinOp { x, y, .. } => {
            f(x);
            f(y);
        }
        InstrKind::Call { call: c } | InstrKind::Defer { call: c } | InstrKind::Go { call: c } => {
            call(c)
        }
        InstrKind::ChangeInterface { x }
        | InstrKind::ChangeType { x }
        | InstrKind::Convert { x }
        | InstrKind::Field { x, .. }
        | InstrKind::FieldAddr { x, .. }
        | InstrKind::If { cond: x }
        | InstrKind::MakeInterface { x }
        | InstrKind::Panic { x }
        | InstrKind::Range { x }
        | InstrKind::UnOp { x, .. } => f(x),
        InstrKind::Extract { tuple, .. } => f(tuple),
        InstrKind::Index { x, index } | InstrKind::IndexAddr { x, index } => {
            f(x);
            f(index);
        }
        InstrKind::Lookup { x, index, .. } => {
            f(x);
            f(index);
        }
        InstrKind::MakeChan { size } => f(size),
        InstrKind::MakeClosure { bindings, .. } => {
            for b in bindings {
                f(b);
            }
        }
        InstrKind::MakeMap { reserve } => {
            if let Some(r) = reserve {
                f(r);
            }
        }
        InstrKind::MakeSlice { len, cap } => {
            f(len);
            f(cap);
        }
        InstrKind::MapUpdate { map, key, value } => {
            f(map);
            f(key);
            f(value);
        }
        InstrKind::Next { iter, .. } => f(iter),
        InstrKind::Phi { edges } => {
            for e in edges {
                f(e);
            }
        }
        InstrKind::Return { results } => {
            for r in results {
                f(r);
            }
        }
        InstrKind::Select { states, .. } => {
            for s in states {
                f(&s.chan);
                if let Some(v) = &s.send {
                    f(v);
                }
            }
        }
        InstrKind::Send { chan, x } => {
            f(chan);
            f(x);
        }
        InstrKind::Slice { x, low, high } => {
            f(x);
            if let Some(l) = low {
                f(l);
            }
            if let Some(h) = high {
                f(h);
            }
        }
        InstrKind::Store { addr, val } => {
            f(addr);
            f(val);
        }
        InstrKind::TypeAssert { x, .. } => f(x),
    }
}

impl<'p> CodeGen<'p> {
    /// Compute every function's layout. Must run before any frame or
    /// body emission.
    pub(crate) fn compute_layouts(&mut self) -> Result<(), CodeGenError> {
        for id in 0..self.program.functions.len() as FuncId {
            let layout = compute_layout(self.program, &self.mint, id)?;
            self.layouts.insert(id, layout);
        }
        Ok(())
    }

    /// Emit `FreeVars_F`, `StackFrame_F`, and all leaf declarations
    /// for one function.
    pub(crate) fn emit_function_frame(&mut self, id: FuncId) -> Result<(), CodeGenError> {
        let func = self.program.func(id);
        let layout = self.layouts[&id].clone();
        let sig_name = self.sig_frame(func.signature, false)?;

        let mut s = String::new();
        if let Some(fv_struct) = &layout.freevars_struct {
            writeln!(s, "struct {fv_struct} {{")?;
            for (p, fname) in func.free_vars.iter().zip(&layout.freevar_fields) {
                writeln!(s, "    {} {fname};", self.ctype(p.ty))?;
            }
            writeln!(s, "}};")?;
        }

        writeln!(s, "struct {} {{", layout.frame_struct)?;
        writeln!(s, "    StackFrameCommon common;")?;
        writeln!(s, "    {sig_name} signature;")?;
        // Slot walk order is block/instruction order; recover it by
        // walking the blocks again rather than iterating the map.
        for block in &func.blocks {
            for instr in &block.instrs {
                let Some(r) = &instr.result else { continue };
                let Some(slot) = layout.slots.get(&r.name) else {
                    continue;
                };
                if let Some(buf) = &slot.buf {
                    writeln!(s, "    {} {};", buf.c_type, buf.field)?;
                }
                writeln!(s, "    {} {};", slot.c_type, slot.field)?;
            }
        }
        let mut aux: Vec<_> = layout.aux_callee.iter().collect();
        aux.sort();
        for (&(b, i), field) in aux {
            writeln!(s, "    FunctionObject {field}; // callee for dispatch at {b}:{i}")?;
        }
        writeln!(s, "}};")?;

        writeln!(
            s,
            "FunctionObject {}(LightWeightThreadContext* ctx);",
            layout.func_name
        )?;
        // Static function object: operands and defer/spawn snapshots
        // need an address that survives suspension.
        writeln!(
            s,
            "static FunctionObject funcobj_{} = {{ .func_ptr = {}, .free_vars = NULL }};",
            layout.func_name, layout.func_name
        )?;
        if !func.is_extern() {
            for b in 0..func.blocks.len() as u32 {
                writeln!(
                    s,
                    "FunctionObject {}(LightWeightThreadContext* ctx);",
                    self.mint.block_name(id, b)
                )?;
                for (i, instr) in func.blocks[b as usize].instrs.iter().enumerate() {
                    if is_suspending(self.program, func, instr) {
                        let label = self.mint.instr_label(id, b, i);
                        // Interface dispatch takes two suspensions:
                        // the search step owns an extra leaf.
                        if layout.aux_callee.contains_key(&(b, i)) {
                            writeln!(
                                s,
                                "FunctionObject {label}_dispatch(LightWeightThreadContext* ctx);"
                            )?;
                        }
                        writeln!(s, "FunctionObject {label}(LightWeightThreadContext* ctx);")?;
                    }
                }
            }
        }
        writeln!(s)?;
        self.frames.push_str(&s);
        Ok(())
    }
}

fn compute_layout(
    program: &Program,
    mint: &crate::mangle::Mint<'_>,
    id: FuncId,
) -> Result<FrameLayout, CodeGenError> {
    let func = program.func(id);
    let func_name = mint.function_name(id);

    // Which registers does anything read?
    let mut consumed: HashSet<String> = HashSet::new();
    for block in &func.blocks {
        for instr in &block.instrs {
            for_each_operand(&instr.kind, &mut |op| {
                if let Operand::Reg(name) = op {
                    consumed.insert(name.clone());
                }
            });
        }
    }

    let mut slots = HashMap::new();
    let mut aux_callee = HashMap::new();
    let mut block_last = Vec::with_capacity(func.blocks.len());
    let mut ordinal = 0usize;

    for (b, block) in func.blocks.iter().enumerate() {
        let mut last = mint.block_name(id, b as u32);
        for (i, instr) in block.instrs.iter().enumerate() {
            let suspending = is_suspending(program, func, instr);
            if suspending {
                last = mint.instr_label(id, b as u32, i);
            }
            if matches!(
                &instr.kind,
                InstrKind::Call { call } | InstrKind::Defer { call } | InstrKind::Go { call }
                    if matches!(call.callee, Callee::Method { .. })
            ) {
                let field = mint.value_name(id, &format!("callee${b}${i}"), ordinal);
                ordinal += 1;
                aux_callee.insert((b as u32, i), field);
            }
            let Some(r) = &instr.result else { continue };
            // Zero-tuple results occupy nothing.
            if let Type::Tuple { elems } = program.underlying(r.ty) {
                if elems.is_empty() {
                    continue;
                }
            }
            if !suspending && !consumed.contains(&r.name) {
                continue;
            }
            let field = mint.value_name(id, &r.name, ordinal);
            ordinal += 1;
            let c_type = match &instr.kind {
                InstrKind::Range { .. } => "IterObject".to_string(),
                _ => mint.type_name(r.ty),
            };
            let buf = if let InstrKind::Alloc { heap: false } = &instr.kind {
                let Type::Pointer { elem } = program.underlying(r.ty) else {
                    return Err(CodeGenError::Invariant(format!(
                        "stack alloc {} has non-pointer type",
                        r.name
                    )));
                };
                Some(BufSlot {
                    field: format!("{field}_buf"),
                    c_type: mint.type_name(*elem),
                })
            } else {
                None
            };
            slots.insert(
                r.name.clone(),
                Slot {
                    field,
                    c_type,
                    ty: r.ty,
                    buf,
                },
            );
        }
        block_last.push(last);
    }

    let results = match program.ty(program.underlying_id(func.signature)) {
        Type::Signature { results, .. } => results.clone(),
        _ => {
            return Err(CodeGenError::Invariant(format!(
                "function {} has no signature",
                func.rel_name
            )));
        }
    };

    let freevar_fields = func
        .free_vars
        .iter()
        .map(|p| field_name(&p.name, id as usize))
        .collect();

    Ok(FrameLayout {
        func: id,
        frame_struct: format!("StackFrame_{func_name}"),
        freevars_struct: if func.free_vars.is_empty() {
            None
        } else {
            Some(format!("FreeVars_{func_name}"))
        },
        func_name,
        sig_name: mint.sig_frame_name(func.signature, false),
        results,
        slots,
        aux_callee,
        block_last,
        freevar_fields,
    })
}

#[cfg(test)]
mod tests {
    use crate::codegen::CodeGen;
    use crate::config::EmitterConfig;
    use gox_ssa::build::{FunctionBuilder, ProgramBuilder, int_const, reg};
    use gox_ssa::{BasicKind, InstrKind};

    #[test]
    fn test_consumed_pure_value_gets_exactly_one_slot() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig = b.signature(None, vec![int], vec![int]);
        let mut f = FunctionBuilder::new("double", sig).param("x", int);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            int,
            InstrKind::BinOp {
                op: gox_ssa::BinOpKind::Add,
                x: gox_ssa::Operand::Param(0),
                y: gox_ssa::Operand::Param(0),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t0")] });
        b.function(f);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.compute_layouts().unwrap();
        cg.emit_function_frame(0).unwrap();
        let layout = &cg.layouts[&0];
        assert!(layout.slots.contains_key("t0"));
        let field = &layout.slots["t0"].field;
        assert_eq!(cg.frames.matches(&format!("IntObject {field};")).count(), 1);
        assert!(cg.frames.contains("StackFrameCommon common;"));
    }

    #[test]
    fn test_unconsumed_pure_value_gets_no_slot() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig = b.signature(None, vec![int], vec![]);
        let mut f = FunctionBuilder::new("drop", sig).param("x", int);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            int,
            InstrKind::BinOp {
                op: gox_ssa::BinOpKind::Add,
                x: gox_ssa::Operand::Param(0),
                y: int_const(int, 1),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![] });
        b.function(f);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.compute_layouts().unwrap();
        assert!(!cg.layouts[&0].slots.contains_key("t0"));
    }

    #[test]
    fn test_stack_alloc_gets_buf_storage() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let ptr = b.pointer(int);
        let sig = b.signature(None, vec![], vec![]);
        let mut f = FunctionBuilder::new("locals", sig);
        let b0 = f.block();
        f.instr(b0, "t0", ptr, InstrKind::Alloc { heap: false });
        f.effect(
            b0,
            InstrKind::Store {
                addr: reg("t0"),
                val: int_const(int, 7),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![] });
        b.function(f);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.compute_layouts().unwrap();
        cg.emit_function_frame(0).unwrap();
        let slot = &cg.layouts[&0].slots["t0"];
        let buf = slot.buf.as_ref().unwrap();
        assert_eq!(buf.c_type, "IntObject");
        assert!(buf.field.ends_with("_buf"));
        assert!(cg.frames.contains(&format!("IntObject {};", buf.field)));
    }

    #[test]
    fn test_block_last_tracks_suspension_labels() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let chan = b.chan(int);
        let sig = b.signature(None, vec![chan], vec![]);
        let mut f = FunctionBuilder::new("sender", sig).param("ch", chan);
        let b0 = f.block();
        f.effect(
            b0,
            InstrKind::Send {
                chan: gox_ssa::Operand::Param(0),
                x: int_const(int, 1),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![] });
        b.function(f);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.compute_layouts().unwrap();
        let layout = &cg.layouts[&0];
        // The block's last leaf is the Send continuation, not b$0.
        assert!(layout.block_last[0].starts_with("i_24_0"));
    }

    #[test]
    fn test_frame_struct_reparses_to_slot_set() {
        // Printing the frame struct and reparsing its field lines
        // recovers exactly the (name, declared type) pairs of the
        // layout's slots.
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig = b.signature(None, vec![int], vec![int]);
        let mut f = FunctionBuilder::new("mix", sig).param("x", int);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            int,
            InstrKind::BinOp {
                op: gox_ssa::BinOpKind::Add,
                x: gox_ssa::Operand::Param(0),
                y: int_const(int, 1),
            },
        );
        f.instr(
            b0,
            "t1",
            int,
            InstrKind::BinOp {
                op: gox_ssa::BinOpKind::Mul,
                x: reg("t0"),
                y: reg("t0"),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t1")] });
        b.function(f);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.compute_layouts().unwrap();
        cg.emit_function_frame(0).unwrap();

        let start = cg.frames.find("struct StackFrame_f_24_mix {").unwrap();
        let end = cg.frames[start..].find("};").unwrap() + start;
        let mut parsed: Vec<(String, String)> = Vec::new();
        for line in cg.frames[start..end].lines().skip(1) {
            let line = line.trim().trim_end_matches(';');
            if let Some((ty, name)) = line.split_once(' ') {
                if name.starts_with("v_24_") {
                    parsed.push((name.to_string(), ty.to_string()));
                }
            }
        }
        let layout = &cg.layouts[&0];
        assert_eq!(parsed.len(), layout.slots.len());
        for slot in layout.slots.values() {
            assert!(parsed.contains(&(slot.field.clone(), slot.c_type.clone())));
        }
    }

    #[test]
    fn test_free_vars_struct_emitted() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let ptr = b.pointer(int);
        let sig = b.signature(None, vec![], vec![int]);
        let mut f = FunctionBuilder::new("adder", sig).free_var("base", ptr);
        let b0 = f.block();
        f.effect(b0, InstrKind::Return { results: vec![int_const(int, 0)] });
        b.anonymous(f);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.compute_layouts().unwrap();
        cg.emit_function_frame(0).unwrap();
        assert!(cg.frames.contains("struct FreeVars_f_24_adder {"));
        assert!(cg.frames.contains("base;"));
    }
}
