//! Frame-signature structs: the call-ABI slice of a stack frame.
//!
//! One struct per distinct signature key, emitted at most once and
//! shared by every definition and call site with that shape: a
//! `result_ptr` into caller-owned result storage, then positional
//! `param0..paramN` fields (the receiver, when present, is `param0`).
//!
//! Method signatures come in two variants: the concrete one types the
//! receiver as declared; the abstract one types it `void*` and is
//! used when the call originates from interface dispatch, where the
//! receiver is whatever pointer the interface box carries.
//!
//! Alongside each signature struct goes a `CallFrame_*` carve struct
//! (`common` + `signature`), the prefix every callee frame shares;
//! indirect and interface call sites fill frames through it.

use std::fmt::Write as _;

use gox_ssa::{Type, TypeId};

use super::CodeGen;
use super::error::CodeGenError;

impl<'p> CodeGen<'p> {
    /// Name of the signature struct for `sig`, emitting it (plus its
    /// carve struct) on first use.
    pub(crate) fn sig_frame(
        &mut self,
        sig: TypeId,
        abstract_recv: bool,
    ) -> Result<String, CodeGenError> {
        let name = self.mint.sig_frame_name(sig, abstract_recv);
        if !self.sig_frames.insert(name.clone()) {
            return Ok(name);
        }
        let sig_id = self.program.underlying_id(sig);
        let Type::Signature {
            recv,
            params,
            results,
        } = self.program.ty(sig_id).clone()
        else {
            return Err(CodeGenError::Invariant(format!(
                "signature frame requested for non-signature type #{}",
                sig.0
            )));
        };

        let mut s = String::new();
        writeln!(s, "typedef struct {name} {{")?;
        match self.mint.result_type_name(&results) {
            Some(r) => writeln!(s, "    {r}* result_ptr;")?,
            None => writeln!(s, "    void* result_ptr;")?,
        }
        let mut index = 0usize;
        if let Some(r) = recv {
            if abstract_recv {
                writeln!(s, "    void* param0;")?;
            } else {
                writeln!(s, "    {} param0;", self.ctype(r))?;
            }
            index = 1;
        }
        for p in &params {
            writeln!(s, "    {} param{index};", self.ctype(*p))?;
            index += 1;
        }
        writeln!(s, "}} {name};")?;
        writeln!(
            s,
            "struct CallFrame_{name} {{\n    StackFrameCommon common;\n    {name} signature;\n}};"
        )?;
        self.signatures.push_str(&s);
        Ok(name)
    }

    /// The carve struct used at indirect and interface call sites.
    pub(crate) fn call_frame(
        &mut self,
        sig: TypeId,
        abstract_recv: bool,
    ) -> Result<String, CodeGenError> {
        let name = self.sig_frame(sig, abstract_recv)?;
        Ok(format!("CallFrame_{name}"))
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::CodeGen;
    use crate::config::EmitterConfig;
    use gox_ssa::build::ProgramBuilder;
    use gox_ssa::BasicKind;

    #[test]
    fn test_signature_struct_emitted_once() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sig = b.signature(None, vec![int], vec![int]);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        let n1 = cg.sig_frame(sig, false).unwrap();
        let n2 = cg.sig_frame(sig, false).unwrap();
        assert_eq!(n1, n2);
        assert_eq!(cg.signatures.matches("typedef struct").count(), 1);
        assert!(cg.signatures.contains("IntObject* result_ptr;"));
        assert!(cg.signatures.contains("IntObject param0;"));
        assert!(cg.signatures.contains(&format!("struct CallFrame_{n1} {{")));
    }

    #[test]
    fn test_abstract_receiver_is_void_pointer() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let named = b.named("T", int);
        let recv = b.pointer(named);
        let sig = b.signature(Some(recv), vec![int], vec![]);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        let concrete = cg.sig_frame(sig, false).unwrap();
        let abstracted = cg.sig_frame(sig, true).unwrap();
        assert_ne!(concrete, abstracted);
        assert!(cg.signatures.contains("void* param0;"));
        assert!(cg.signatures.contains("IntObject param1;"));
        // Zero results still carry a result_ptr field.
        assert!(cg.signatures.contains("void* result_ptr;"));
    }

    #[test]
    fn test_multi_return_points_at_tuple() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let bl = b.basic(BasicKind::Bool);
        let sig = b.signature(None, vec![], vec![int, bl]);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.sig_frame(sig, false).unwrap();
        assert!(
            cg.signatures
                .contains("Tuple_3C_IntObject_24_BoolObject_3E_* result_ptr;")
        );
    }
}
