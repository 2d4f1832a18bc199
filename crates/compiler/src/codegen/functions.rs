//! Function splitter: blocks into chains of leaf functions.
//!
//! Every function gets an entry thunk `f$...` that checks the context
//! marker and tail-returns block 0. Each block opens a leaf `b$...`;
//! every suspending instruction ends the current leaf and begins the
//! continuation leaf `i$...` named after it, which reads the
//! suspended-on value from the frame (the callee wrote it through
//! `result_ptr` before popping itself).
//!
//! Each block's last-emitted leaf name is what `ctx->prev_func` holds
//! when control reaches a successor; PHI nodes select on it.

use std::fmt::Write as _;

use gox_ssa::FuncId;

use super::CodeGen;
use super::error::CodeGenError;
use super::instructions::{FuncCx, Lowered};

/// Writes one function's chain of leaf functions.
pub(crate) struct LeafEmitter {
    out: String,
    frame_struct: String,
    assertions: bool,
}

impl LeafEmitter {
    pub(crate) fn new(frame_struct: String, assertions: bool) -> Self {
        LeafEmitter {
            out: String::new(),
            frame_struct,
            assertions,
        }
    }

    /// Open a leaf function: header, frame recovery, marker check.
    pub(crate) fn begin(&mut self, name: &str) {
        let _ = writeln!(
            self.out,
            "FunctionObject {name}(LightWeightThreadContext* ctx) {{"
        );
        let _ = writeln!(
            self.out,
            "    struct {}* frame = ctx->stack_pointer;",
            self.frame_struct
        );
        let _ = writeln!(self.out, "    (void)frame;");
        if self.assertions {
            let _ = writeln!(self.out, "    assert(ctx->marker == 0xdeadbeef);");
        }
    }

    pub(crate) fn line(&mut self, s: &str) {
        let _ = writeln!(self.out, "    {s}");
    }

    pub(crate) fn end(&mut self) {
        let _ = writeln!(self.out, "}}");
    }

    /// Close the current leaf and open the next one.
    pub(crate) fn end_and_begin(&mut self, label: &str) {
        self.end();
        self.begin(label);
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

impl<'p> CodeGen<'p> {
    /// Emit every leaf function of one (non-extern) function.
    pub(crate) fn emit_function_definition(&mut self, id: FuncId) -> Result<(), CodeGenError> {
        let func = self.program.func(id);
        if func.is_extern() {
            return Ok(());
        }
        let layout = self.layouts[&id].clone();
        let cx = FuncCx {
            id,
            func,
            layout: &layout,
        };
        let mut leaf = LeafEmitter::new(layout.frame_struct.clone(), self.config.assertions);

        // Entry thunk.
        leaf.begin(&layout.func_name);
        let entry = self.mint.block_name(id, 0);
        leaf.line(&format!(
            "return (FunctionObject){{ .func_ptr = {entry}, .free_vars = frame->common.free_vars }};"
        ));
        leaf.end();

        for (b, block) in func.blocks.iter().enumerate() {
            leaf.begin(&self.mint.block_name(id, b as u32));
            for (i, instr) in block.instrs.iter().enumerate() {
                match self.lower_instr(&cx, &mut leaf, b as u32, i, instr)? {
                    Lowered::Pure => {}
                    Lowered::Suspended { post } => {
                        leaf.end_and_begin(&self.mint.instr_label(id, b as u32, i));
                        for line in post.lines() {
                            leaf.line(line);
                        }
                    }
                }
            }
            leaf.end();
        }

        self.bodies.push_str(&leaf.finish());
        self.bodies.push('\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::CodeGen;
    use crate::config::EmitterConfig;
    use gox_ssa::build::{FunctionBuilder, ProgramBuilder, int_const, reg};
    use gox_ssa::{BasicKind, BinOpKind, InstrKind, Operand};

    fn emit_one(program: &gox_ssa::Program) -> (String, String) {
        let mut cg = CodeGen::new(program, EmitterConfig::default());
        cg.compute_layouts().unwrap();
        for id in 0..program.functions.len() as u32 {
            cg.emit_function_frame(id).unwrap();
        }
        for id in 0..program.functions.len() as u32 {
            cg.emit_function_definition(id).unwrap();
        }
        (cg.frames, cg.bodies)
    }

    #[test]
    fn test_entry_thunk_checks_marker_and_jumps_to_block_zero() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig = b.signature(None, vec![], vec![int]);
        let mut f = FunctionBuilder::new("one", sig);
        let b0 = f.block();
        f.effect(
            b0,
            InstrKind::Return {
                results: vec![int_const(int, 1)],
            },
        );
        b.function(f);
        let program = b.finish();
        let (_, bodies) = emit_one(&program);
        assert!(bodies.contains("FunctionObject f_24_one(LightWeightThreadContext* ctx) {"));
        assert!(bodies.contains("assert(ctx->marker == 0xdeadbeef);"));
        let entry_pos = bodies.find("f_24_one(LightWeightThreadContext").unwrap();
        let jump = bodies[entry_pos..].find(".func_ptr = b_24_0_24_one").unwrap();
        assert!(jump > 0);
    }

    #[test]
    fn test_return_pops_frame_and_resumes() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig = b.signature(None, vec![], vec![int]);
        let mut f = FunctionBuilder::new("one", sig);
        let b0 = f.block();
        f.effect(
            b0,
            InstrKind::Return {
                results: vec![int_const(int, 1)],
            },
        );
        b.function(f);
        let program = b.finish();
        let (_, bodies) = emit_one(&program);
        assert!(bodies.contains("ctx->stack_pointer = frame->common.prev_stack_pointer;"));
        assert!(bodies.contains("*frame->signature.result_ptr ="));
        assert!(bodies.contains("return resume_func;"));
    }

    #[test]
    fn test_suspension_splits_leaf_at_instruction_label() {
        // ch <- 1 then return: the send must end its leaf, and the
        // continuation must be a distinct function.
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let chan = b.chan(int);
        let sig = b.signature(None, vec![chan], vec![]);
        let mut f = FunctionBuilder::new("sender", sig).param("ch", chan);
        let b0 = f.block();
        f.effect(
            b0,
            InstrKind::Send {
                chan: Operand::Param(0),
                x: int_const(int, 1),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![] });
        b.function(f);
        let program = b.finish();
        let (frames, bodies) = emit_one(&program);
        // Declaration for the continuation label exists.
        assert!(frames.contains("FunctionObject i_24_0_24_sender"));
        // The send leaf tail-returns the runtime entry...
        let send_pos = bodies.find("gox5_channel_send").unwrap();
        let brace = bodies[send_pos..].find("}").unwrap();
        assert!(bodies[send_pos..send_pos + brace].contains("free_vars = NULL"));
        // ...and the continuation is opened as its own function.
        assert!(bodies.contains("FunctionObject i_24_0_24_sender"));
    }

    #[test]
    fn test_phi_selects_on_prev_func_with_trapping_else() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let bool_t = b.basic(BasicKind::Bool);
        let sig = b.signature(None, vec![bool_t], vec![int]);
        let mut f = FunctionBuilder::new("pick", sig).param("c", bool_t);
        let b0 = f.block();
        let b1 = f.block();
        let b2 = f.block();
        let b3 = f.block();
        f.edge(b0, b1);
        f.edge(b0, b2);
        f.edge(b1, b3);
        f.edge(b2, b3);
        f.effect(b0, InstrKind::If { cond: Operand::Param(0) });
        f.effect(b1, InstrKind::Jump);
        f.effect(b2, InstrKind::Jump);
        f.instr(
            b3,
            "t0",
            int,
            InstrKind::Phi {
                edges: vec![int_const(int, 10), int_const(int, 20)],
            },
        );
        f.effect(b3, InstrKind::Return { results: vec![reg("t0")] });
        b.function(f);
        let program = b.finish();
        let (_, bodies) = emit_one(&program);
        // Two guarded arms plus the trapping else.
        let phi_line = bodies
            .lines()
            .find(|l| l.contains("ctx->prev_func.func_ptr =="))
            .unwrap();
        assert_eq!(phi_line.matches("ctx->prev_func.func_ptr ==").count(), 2);
        assert!(phi_line.ends_with("{ assert(false); }"));
    }

    #[test]
    fn test_if_branches_between_successor_blocks() {
        let mut b = ProgramBuilder::new("main");
        let bool_t = b.basic(BasicKind::Bool);
        let sig = b.signature(None, vec![bool_t], vec![]);
        let mut f = FunctionBuilder::new("branch", sig).param("c", bool_t);
        let b0 = f.block();
        let b1 = f.block();
        let b2 = f.block();
        f.edge(b0, b1);
        f.edge(b0, b2);
        f.effect(b0, InstrKind::If { cond: Operand::Param(0) });
        f.effect(b1, InstrKind::Return { results: vec![] });
        f.effect(b2, InstrKind::Return { results: vec![] });
        b.function(f);
        let program = b.finish();
        let (_, bodies) = emit_one(&program);
        assert!(bodies.contains("return (frame->signature.param0.raw) ?"));
    }

    #[test]
    fn test_pure_binop_is_straight_line() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig = b.signature(None, vec![int], vec![int]);
        let mut f = FunctionBuilder::new("addone", sig).param("x", int);
        let b0 = f.block();
        f.instr(
            b0,
            "t0",
            int,
            InstrKind::BinOp {
                op: BinOpKind::Add,
                x: Operand::Param(0),
                y: int_const(int, 1),
            },
        );
        f.effect(b0, InstrKind::Return { results: vec![reg("t0")] });
        b.function(f);
        let program = b.finish();
        let (_, bodies) = emit_one(&program);
        assert!(bodies.contains(".raw = frame->signature.param0.raw +"));
        // No suspension: only the entry thunk and one block leaf.
        assert_eq!(
            bodies.matches("(LightWeightThreadContext* ctx) {").count(),
            2
        );
    }
}
