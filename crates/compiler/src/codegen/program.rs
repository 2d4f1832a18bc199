//! Driver: whole-program emission.
//!
//! Orders the passes so that every identifier is declared before
//! first use, then closes the unit with the runtime metadata the
//! scheduler consumes: the function registry, its accessors, and the
//! entry/init points.

use std::fmt::Write as _;

use gox_ssa::{FuncId, Program};

use super::error::CodeGenError;
use super::runtime::emit_prologue;
use super::CodeGen;
use crate::config::EmitterConfig;

/// Emit one SSA program as a single C99 translation unit.
pub fn emit_program(program: &Program, config: &EmitterConfig) -> Result<String, CodeGenError> {
    CodeGen::new(program, config.clone()).emit()
}

impl<'p> CodeGen<'p> {
    /// Run every pass in declaration order and assemble the unit.
    pub fn emit(mut self) -> Result<String, CodeGenError> {
        emit_prologue(&mut self.prologue)?;
        self.emit_type_tags()?;
        self.emit_equality_decls()?;
        self.emit_type_bodies()?;
        self.compute_layouts()?;
        self.emit_globals()?;
        for id in 0..self.program.functions.len() as FuncId {
            self.emit_function_frame(id)?;
        }
        self.emit_interface_tables()?;
        self.emit_equality_defs()?;
        for id in 0..self.program.functions.len() as FuncId {
            self.emit_function_definition(id)?;
            let func = self.program.func(id);
            self.emitted_funcs
                .push((func.rel_name.clone(), self.layouts[&id].func_name.clone()));
        }
        self.emit_metadata()?;
        Ok(self.assemble())
    }

    /// Package-level variables: zeroed static storage plus a static
    /// address object, so a global operand has a stable address like
    /// every other operand.
    fn emit_globals(&mut self) -> Result<(), CodeGenError> {
        if self.program.globals.is_empty() {
            return Ok(());
        }
        writeln!(self.globals, "// Globals")?;
        for id in 0..self.program.globals.len() as u32 {
            let global = self.program.global(id);
            let name = self.mint.global_name(id);
            let ptr_type = self.ctype(global.ty);
            let elem = match self.program.underlying(global.ty) {
                gox_ssa::Type::Pointer { elem } => *elem,
                _ => {
                    return Err(CodeGenError::Invariant(format!(
                        "global {} is not pointer-typed",
                        global.name
                    )));
                }
            };
            let elem_type = self.ctype(elem);
            writeln!(self.globals, "static {elem_type} {name};")?;
            writeln!(
                self.globals,
                "static {ptr_type} {name}_ptr = {{ .raw = &{name} }};"
            )?;
        }
        writeln!(self.globals)?;
        Ok(())
    }

    /// File-end metadata (function registry, entry/init points).
    fn emit_metadata(&mut self) -> Result<(), CodeGenError> {
        writeln!(self.epilogue, "// Runtime metadata")?;
        writeln!(
            self.epilogue,
            "struct {{ const char* name; FunctionObject func_object; }} runtime_info_funcs[] = {{"
        )?;
        for (name, cname) in &self.emitted_funcs {
            writeln!(
                self.epilogue,
                "    {{ \"{name}\", {{ .func_ptr = {cname}, .free_vars = NULL }} }},"
            )?;
        }
        if self.emitted_funcs.is_empty() {
            writeln!(
                self.epilogue,
                "    {{ NULL, {{ .func_ptr = NULL, .free_vars = NULL }} }},"
            )?;
        }
        writeln!(self.epilogue, "}};")?;
        writeln!(
            self.epilogue,
            "size_t runtime_info_get_funcs_count(void) {{\n    return {};\n}}",
            self.emitted_funcs.len()
        )?;
        writeln!(
            self.epilogue,
            "FunctionObject runtime_info_refer_func(size_t i) {{\n    return runtime_info_funcs[i].func_object;\n}}"
        )?;
        let entry = self.entry_object(&self.config.entry_point.clone());
        writeln!(
            self.epilogue,
            "FunctionObject runtime_info_get_entry_point(void) {{\n    return {entry};\n}}"
        )?;
        let init = self.entry_object(&self.config.init_point.clone());
        writeln!(
            self.epilogue,
            "FunctionObject runtime_info_get_init_point(void) {{\n    return {init};\n}}"
        )?;
        Ok(())
    }

    fn entry_object(&self, member: &str) -> String {
        match self.program.find_function(member) {
            Some(id) => format!(
                "(FunctionObject){{ .func_ptr = {}, .free_vars = NULL }}",
                self.mint.function_name(id)
            ),
            None => "(FunctionObject){ .func_ptr = NULL, .free_vars = NULL }".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gox_ssa::build::{FunctionBuilder, ProgramBuilder, int_const, konst, reg};
    use gox_ssa::{BasicKind, Callee, CallCommon, ConstValue, InstrKind, Operand};

    fn emit(program: &Program) -> String {
        emit_program(program, &EmitterConfig::default()).unwrap()
    }

    /// `func F() int { return 1 }`: the S1 shape.
    fn single_return_program() -> Program {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig = b.signature(None, vec![], vec![int]);
        let mut f = FunctionBuilder::new("F", sig);
        let b0 = f.block();
        f.effect(
            b0,
            InstrKind::Return {
                results: vec![int_const(int, 1)],
            },
        );
        b.function(f);
        b.finish()
    }

    #[test]
    fn test_s1_single_function_shape() {
        let out = emit(&single_return_program());
        // Frame with common header and a result-pointer signature.
        assert!(out.contains("struct StackFrame_f_24_F {"));
        assert!(out.contains("StackFrameCommon common;"));
        assert!(out.contains("IntObject* result_ptr;"));
        // The block body writes through result_ptr, pops, resumes.
        assert!(out.contains("*frame->signature.result_ptr = c_24_1_24_IntObject;"));
        assert!(out.contains("static const IntObject c_24_1_24_IntObject = { .raw = 1LL };"));
        assert!(out.contains("ctx->stack_pointer = frame->common.prev_stack_pointer;"));
        assert!(out.contains("return resume_func;"));
    }

    #[test]
    fn test_declaration_order() {
        let out = emit(&single_return_program());
        let prologue = out.find("struct LightWeightThreadContext {").unwrap();
        let tags = out.find("// Type forward declarations").unwrap();
        let eq_decls = out.find("// Equality and hash declarations").unwrap();
        let bodies = out.find("// Type bodies").unwrap();
        let tables = out.find("// Interface tables").unwrap();
        let eq_defs = out.find("// Equality and hash definitions").unwrap();
        let meta = out.find("// Runtime metadata").unwrap();
        assert!(prologue < tags);
        assert!(tags < eq_decls);
        assert!(eq_decls < bodies);
        assert!(bodies < tables);
        assert!(tables < eq_defs);
        assert!(eq_defs < meta);
    }

    #[test]
    fn test_idempotent_output() {
        let program = single_return_program();
        let a = emit(&program);
        let b = emit(&program);
        assert_eq!(a, b);
    }

    #[test]
    fn test_metadata_registry_and_entry_points() {
        let mut b = ProgramBuilder::new("main");
        let sig = b.signature(None, vec![], vec![]);
        let mut f = FunctionBuilder::new("main", sig);
        let b0 = f.block();
        f.effect(b0, InstrKind::Return { results: vec![] });
        b.function(f);
        let program = b.finish();
        let out = emit(&program);
        assert!(out.contains("runtime_info_funcs[] = {"));
        assert!(out.contains("{ \"main\", { .func_ptr = f_24_main, .free_vars = NULL } },"));
        assert!(out.contains("size_t runtime_info_get_funcs_count(void) {\n    return 1;\n}"));
        assert!(out.contains(
            "FunctionObject runtime_info_get_entry_point(void) {\n    return (FunctionObject){ .func_ptr = f_24_main, .free_vars = NULL };\n}"
        ));
        // No init function: a null object.
        assert!(out.contains(
            "FunctionObject runtime_info_get_init_point(void) {\n    return (FunctionObject){ .func_ptr = NULL, .free_vars = NULL };\n}"
        ));
    }

    /// S2: make a channel, send, receive.
    #[test]
    fn test_s2_channel_segments() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let chan = b.chan(int);
        let sig = b.signature(None, vec![], vec![int]);
        let mut f = FunctionBuilder::new("pipe", sig);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            chan,
            InstrKind::MakeChan {
                size: int_const(int, 1),
            },
        );
        f.effect(
            b0,
            InstrKind::Send {
                chan: reg("t0"),
                x: int_const(int, 42),
            },
        );
        f.instr(
            b0,
            "t1",
            int,
            InstrKind::UnOp {
                op: gox_ssa::UnOpKind::Recv,
                x: reg("t0"),
                comma_ok: false,
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t1")] });
        b.function(f);
        let program = b.finish();
        let out = emit(&program);
        // Three suspending segments with distinct continuations.
        assert!(out.contains("gox5_channel_new"));
        assert!(out.contains("next_frame->capacity = c_24_1_24_IntObject.raw;"));
        assert!(out.contains("gox5_channel_send"));
        assert!(out.contains("gox5_channel_receive"));
        let receives = out.matches("next_frame->data = (void*)&frame->").count();
        assert!(receives >= 1);
        // Each suspension names a distinct continuation label.
        assert_eq!(out.matches("next_frame->common.resume_func").count(), 3);
        assert!(out.contains("next_frame->type_id = &runtime_info_type_IntObject;"));
    }

    /// S4: closure creation and call through the closure.
    #[test]
    fn test_s4_closure_shape() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig_fn = b.signature(None, vec![int], vec![int]);
        let mut anon = FunctionBuilder::new("doubler", sig_fn)
            .rel_name("main$1")
            .param("x", int);
        let a0 = anon.block();
        anon.instr(
            a0,
            "t0",
            int,
            InstrKind::BinOp {
                op: gox_ssa::BinOpKind::Mul,
                x: Operand::Param(0),
                y: int_const(int, 2),
            },
        );
        anon.effect(a0, InstrKind::Return { results: vec![reg("t0")] });
        let anon_id = b.anonymous(anon);

        let sig_main = b.signature(None, vec![], vec![int]);
        let mut f = FunctionBuilder::new("run", sig_main);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            sig_fn,
            InstrKind::MakeClosure {
                func: anon_id,
                bindings: vec![],
            },
        );
        f.instr(
            b0,
            "t1",
            int,
            InstrKind::Call {
                call: CallCommon {
                    callee: Callee::Value(reg("t0")),
                    args: vec![int_const(int, 3)],
                    signature: sig_fn,
                },
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t1")] });
        b.function(f);
        let program = b.finish();
        let out = emit(&program);
        assert!(out.contains("next_frame->user_function = f_24_main_24_1;"));
        assert!(out.contains("next_frame->num_object_ptrs = 0;"));
        // The call through the closure flows its environment into the
        // callee frame and passes the literal argument positionally.
        assert!(out.contains(".free_vars;"));
        assert!(out.contains("next_frame->signature.param0 = c_24_3_24_IntObject;"));
    }

    /// S5: append of a slice writes its raw result back.
    #[test]
    fn test_s5_append_shape() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sl = b.slice(int);
        let sig = b.signature(None, vec![sl, sl], vec![sl]);
        let mut f = FunctionBuilder::new("grow", sig).param("a", sl).param("b", sl);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            sl,
            InstrKind::Call {
                call: CallCommon {
                    callee: Callee::Builtin(gox_ssa::Builtin::Append),
                    args: vec![Operand::Param(0), Operand::Param(1)],
                    signature: sig,
                },
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t0")] });
        b.function(f);
        let program = b.finish();
        let out = emit(&program);
        assert!(out.contains("gox5_slice_append"));
        assert!(out.contains("next_frame->type_id = &runtime_info_type_IntObject;"));
        assert!(out.contains("next_frame->lhs = frame->signature.param0.raw;"));
        assert!(out.contains(".raw;\nctx->stack_pointer") || out.contains("next_frame->result_ptr = &frame->"));
    }

    /// S6: interface boxing and nil comparison.
    #[test]
    fn test_s6_make_interface_and_nil_compare() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let bool_t = b.basic(BasicKind::Bool);
        let named = b.named("S", int);
        let sptr = b.pointer(named);
        let iface = b.interface(vec![]);
        let sig = b.signature(None, vec![sptr], vec![bool_t]);
        let mut f = FunctionBuilder::new("box", sig).param("s", sptr);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            iface,
            InstrKind::MakeInterface {
                x: Operand::Param(0),
            },
        );
        f.instr(
            b0,
            "t1",
            bool_t,
            InstrKind::BinOp {
                op: gox_ssa::BinOpKind::Eql,
                x: reg("t0"),
                y: konst(iface, ConstValue::Nil),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t1")] });
        b.function(f);
        let program = b.finish();
        let out = emit(&program);
        let ptr_name = {
            let mint = crate::mangle::Mint::new(&program);
            mint.type_name(sptr)
        };
        assert!(out.contains("gox5_make_interface"));
        assert!(out.contains("next_frame->receiver = (void*)&frame->signature.param0;"));
        assert!(out.contains(&format!("next_frame->type_id = &runtime_info_type_{ptr_name};")));
        // The equality site dispatches to the interface comparator
        // against the static nil interface.
        assert!(out.contains("equal_InterfaceObject(&frame->"));
        assert!(out.contains("&c_24_nil_24_InterfaceObject)"));
    }

    /// S3: `for k, v := range m` over a map.
    #[test]
    fn test_s3_map_range_loop() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let bool_t = b.basic(BasicKind::Bool);
        let map = b.map(int, int);
        let next_tuple = b.tuple(vec![bool_t, int, int]);
        let sig = b.signature(None, vec![map], vec![int]);
        let mut f = FunctionBuilder::new("sum", sig).param("m", map);
        let b0 = f.block();
        let b1 = f.block();
        let b2 = f.block();
        let b3 = f.block();
        f.edge(b0, b1);
        f.edge(b1, b2);
        f.edge(b1, b3);
        f.edge(b2, b1);
        f.instr(b0, "t0", map, InstrKind::Range { x: Operand::Param(0) });
        f.effect(b0, InstrKind::Jump);
        f.instr(
            b1,
            "t1",
            next_tuple,
            InstrKind::Next {
                iter: reg("t0"),
                is_string: false,
            },
        );
        f.instr(
            b1,
            "t2",
            bool_t,
            InstrKind::Extract {
                tuple: reg("t1"),
                index: 0,
            },
        );
        f.effect(b1, InstrKind::If { cond: reg("t2") });
        f.instr(
            b2,
            "t3",
            int,
            InstrKind::Extract {
                tuple: reg("t1"),
                index: 2,
            },
        );
        f.effect(b2, InstrKind::Jump);
        f.effect(
            b3,
            InstrKind::Return {
                results: vec![int_const(int, 0)],
            },
        );
        b.function(f);
        let program = b.finish();
        let out = emit(&program);
        // Range wraps the map into an iterator slot.
        assert!(out.contains("(IterObject){ .collection = (void*)frame->signature.param0.raw, .count = 0 }"));
        // The loop head suspends into the runtime iterator, feeding
        // key/value/found pointers from the result tuple.
        assert!(out.contains("gox5_map_next"));
        assert!(out.contains(".raw.e1;"));
        assert!(out.contains(".raw.e2;"));
        assert!(out.contains("next_frame->found = &frame->"));
        assert!(out.contains(".count;"));
        // The found flag drives the branch out of the loop.
        assert!(out.contains(".raw) ? (FunctionObject){ .func_ptr = b_24_2_24_sum"));
    }

    #[test]
    fn test_line_comments_follow_config() {
        let program = single_return_program();
        let with = emit_program(&program, &EmitterConfig::default()).unwrap();
        assert!(with.contains("// Return"));
        let mut quiet = EmitterConfig::default();
        quiet.line_comments = false;
        quiet.assertions = false;
        let without = emit_program(&program, &quiet).unwrap();
        assert!(!without.contains("// Return"));
        assert!(!without.contains("assert(ctx->marker == 0xdeadbeef);"));
    }
}
