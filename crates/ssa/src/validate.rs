//! Structural validation of loaded programs.
//!
//! The emitter trusts its input; this pass is where that trust is
//! earned. Every arena index must be in range, every register read
//! must have a writer, `Phi` arity must match predecessor count, and
//! closure bindings must line up with the target's free variables.
//! A program that passes validation cannot make the emitter index
//! out of bounds.

use std::collections::HashSet;
use std::fmt;

use crate::program::{
    Callee, Function, Instr, InstrKind, Member, Operand, Program,
};
use crate::types::{BasicKind, Type, TypeId};

/// A violated SSA invariant, with enough context to find it.
#[derive(Debug)]
pub struct ValidateError {
    pub context: String,
    pub message: String,
}

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid SSA ({}): {}", self.context, self.message)
    }
}

impl std::error::Error for ValidateError {}

fn err<T>(context: impl Into<String>, message: impl Into<String>) -> Result<T, ValidateError> {
    Err(ValidateError {
        context: context.into(),
        message: message.into(),
    })
}

/// Validate a whole program. Returns the first violation found.
pub fn validate(program: &Program) -> Result<(), ValidateError> {
    for (i, ty) in program.types.iter().enumerate() {
        check_type(program, i, ty)?;
    }
    for pkg in &program.packages {
        for member in &pkg.members {
            check_member(program, &pkg.name, member)?;
        }
    }
    for (i, global) in program.globals.iter().enumerate() {
        let ctx = format!("global {}", global.name);
        check_type_ref(program, &ctx, global.ty)?;
        if !matches!(program.ty(global.ty), Type::Pointer { .. }) {
            return err(ctx, "global type must be a pointer to its storage");
        }
        if global.package as usize >= program.packages.len() {
            return err(format!("global #{i}"), "package index out of range");
        }
    }
    for func in &program.functions {
        check_function(program, func)?;
    }
    check_entry_points(program)?;
    Ok(())
}

fn check_type_ref(program: &Program, ctx: &str, id: TypeId) -> Result<(), ValidateError> {
    if id.index() >= program.types.len() {
        return err(ctx, format!("type reference #{} out of range", id.0));
    }
    Ok(())
}

fn check_type(program: &Program, index: usize, ty: &Type) -> Result<(), ValidateError> {
    let ctx = format!("type #{index}");
    match ty {
        Type::Basic(_) => Ok(()),
        Type::Array { elem, .. }
        | Type::Pointer { elem }
        | Type::Slice { elem }
        | Type::Chan { elem } => check_type_ref(program, &ctx, *elem),
        Type::Struct { fields } => {
            for f in fields {
                check_type_ref(program, &ctx, f.ty)?;
            }
            Ok(())
        }
        Type::Map { key, value } => {
            check_type_ref(program, &ctx, *key)?;
            check_type_ref(program, &ctx, *value)
        }
        Type::Interface { methods } => {
            for m in methods {
                check_type_ref(program, &ctx, m.sig)?;
                if !program.ty(m.sig).is_signature() {
                    return err(ctx, format!("interface method {} has non-signature type", m.name));
                }
            }
            Ok(())
        }
        Type::Signature { recv, params, results } => {
            if let Some(r) = recv {
                check_type_ref(program, &ctx, *r)?;
            }
            for p in params.iter().chain(results.iter()) {
                check_type_ref(program, &ctx, *p)?;
            }
            Ok(())
        }
        Type::Named { underlying, name, .. } => {
            check_type_ref(program, &ctx, *underlying)?;
            if name.is_empty() {
                return err(ctx, "named type with empty name");
            }
            Ok(())
        }
        Type::Tuple { elems } => {
            for e in elems {
                check_type_ref(program, &ctx, *e)?;
            }
            Ok(())
        }
    }
}

fn check_member(program: &Program, pkg: &str, member: &Member) -> Result<(), ValidateError> {
    let ctx = format!("package {pkg}");
    match member {
        Member::Function(f) => {
            if *f as usize >= program.functions.len() {
                return err(ctx, "function member out of range");
            }
        }
        Member::Global(g) => {
            if *g as usize >= program.globals.len() {
                return err(ctx, "global member out of range");
            }
        }
        Member::Type(t) => check_type_ref(program, &ctx, *t)?,
    }
    Ok(())
}

fn check_function(program: &Program, func: &Function) -> Result<(), ValidateError> {
    let ctx = format!("function {}", func.rel_name);
    check_type_ref(program, &ctx, func.signature)?;
    if !program.ty(func.signature).is_signature() {
        return err(&ctx, "signature field is not a Signature type");
    }
    if func.package as usize >= program.packages.len() {
        return err(&ctx, "package index out of range");
    }
    if func.recv && func.params.is_empty() {
        return err(&ctx, "receiver flagged but parameter list is empty");
    }
    for p in func.params.iter().chain(func.free_vars.iter()) {
        check_type_ref(program, &ctx, p.ty)?;
    }
    if func.is_extern() {
        return Ok(());
    }

    // Register names must be written before the function is read.
    let mut registers = HashSet::new();
    for block in &func.blocks {
        for instr in &block.instrs {
            if let Some(r) = &instr.result {
                check_type_ref(program, &ctx, r.ty)?;
                if !registers.insert(r.name.as_str()) {
                    return err(&ctx, format!("register {} written twice", r.name));
                }
            }
        }
    }

    for (b, block) in func.blocks.iter().enumerate() {
        let bctx = format!("{ctx} block {b}");
        for s in block.succs.iter().chain(block.preds.iter()) {
            if *s as usize >= func.blocks.len() {
                return err(&bctx, "control-flow edge out of range");
            }
        }
        for instr in &block.instrs {
            check_instr(program, func, &registers, &bctx, block.preds.len(), instr)?;
        }
    }
    Ok(())
}

fn check_instr(
    program: &Program,
    func: &Function,
    registers: &HashSet<&str>,
    ctx: &str,
    pred_count: usize,
    instr: &Instr,
) -> Result<(), ValidateError> {
    let ictx = format!("{ctx}: {instr}");
    let check_operand = |op: &Operand| -> Result<(), ValidateError> {
        match op {
            Operand::Const(c) => {
                check_type_ref(program, &ictx, c.ty)?;
                if matches!(program.underlying(c.ty), Type::Basic(BasicKind::Invalid)) {
                    return err(&ictx, "constant of invalid (untyped?) type");
                }
                Ok(())
            }
            Operand::Func(f) => {
                if *f as usize >= program.functions.len() {
                    return err(&ictx, "function operand out of range");
                }
                Ok(())
            }
            Operand::Global(g) => {
                if *g as usize >= program.globals.len() {
                    return err(&ictx, "global operand out of range");
                }
                Ok(())
            }
            Operand::Param(i) => {
                if *i as usize >= func.params.len() {
                    return err(&ictx, "parameter operand out of range");
                }
                Ok(())
            }
            Operand::FreeVar(i) => {
                if *i as usize >= func.free_vars.len() {
                    return err(&ictx, "free-variable operand out of range");
                }
                Ok(())
            }
            Operand::Reg(name) => {
                if !registers.contains(name.as_str()) {
                    return err(&ictx, format!("read of unwritten register {name}"));
                }
                Ok(())
            }
        }
    };

    let check_call = |call: &crate::program::CallCommon| -> Result<(), ValidateError> {
        check_type_ref(program, &ictx, call.signature)?;
        match &call.callee {
            Callee::Function(f) => {
                if *f as usize >= program.functions.len() {
                    return err(&ictx, "callee out of range");
                }
            }
            Callee::Value(v) => check_operand(v)?,
            Callee::Method { iface, .. } => check_operand(iface)?,
            Callee::Builtin(_) => {}
        }
        for a in &call.args {
            check_operand(a)?;
        }
        Ok(())
    };

    match &instr.kind {
        InstrKind::Alloc { .. } => {
            let Some(r) = &instr.result else {
                return err(&ictx, "alloc without result");
            };
            if !matches!(program.underlying(r.ty), Type::Pointer { .. }) {
                return err(&ictx, "alloc result is not a pointer");
            }
            Ok(())
        }
        InstrKind::BinOp { x, y, .. } => {
            check_operand(x)?;
            check_operand(y)
        }
        InstrKind::Call { call } | InstrKind::Defer { call } | InstrKind::Go { call } => {
            check_call(call)
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
        | InstrKind::UnOp { x, .. } => check_operand(x),
        InstrKind::Extract { tuple, .. } => check_operand(tuple),
        InstrKind::Index { x, index } | InstrKind::IndexAddr { x, index } => {
            check_operand(x)?;
            check_operand(index)
        }
        InstrKind::Jump | InstrKind::RunDefers => Ok(()),
        InstrKind::Lookup { x, index, .. } => {
            check_operand(x)?;
            check_operand(index)
        }
        InstrKind::MakeChan { size } => check_operand(size),
        InstrKind::MakeClosure { func: target, bindings } => {
            if *target as usize >= program.functions.len() {
                return err(&ictx, "closure target out of range");
            }
            let free = &program.func(*target).free_vars;
            if free.len() != bindings.len() {
                return err(
                    &ictx,
                    format!(
                        "closure binds {} values but target captures {}",
                        bindings.len(),
                        free.len()
                    ),
                );
            }
            for b in bindings {
                check_operand(b)?;
            }
            Ok(())
        }
        InstrKind::MakeMap { reserve } => reserve.as_ref().map_or(Ok(()), |r| check_operand(r)),
        InstrKind::MakeSlice { len, cap } => {
            check_operand(len)?;
            check_operand(cap)
        }
        InstrKind::MapUpdate { map, key, value } => {
            check_operand(map)?;
            check_operand(key)?;
            check_operand(value)
        }
        InstrKind::Next { iter, .. } => check_operand(iter),
        InstrKind::Phi { edges } => {
            if edges.len() != pred_count {
                return err(
                    &ictx,
                    format!("phi has {} edges for {} predecessors", edges.len(), pred_count),
                );
            }
            for e in edges {
                check_operand(e)?;
            }
            Ok(())
        }
        InstrKind::Return { results } => {
            for r in results {
                check_operand(r)?;
            }
            Ok(())
        }
        InstrKind::Select { states, .. } => {
            for s in states {
                check_operand(&s.chan)?;
                if let Some(v) = &s.send {
                    check_operand(v)?;
                }
            }
            Ok(())
        }
        InstrKind::Send { chan, x } => {
            check_operand(chan)?;
            check_operand(x)
        }
        InstrKind::Slice { x, low, high } => {
            check_operand(x)?;
            if let Some(l) = low {
                check_operand(l)?;
            }
            if let Some(h) = high {
                check_operand(h)?;
            }
            Ok(())
        }
        InstrKind::Store { addr, val } => {
            check_operand(addr)?;
            check_operand(val)
        }
        InstrKind::TypeAssert { x, asserted, .. } => {
            check_operand(x)?;
            check_type_ref(program, &ictx, *asserted)
        }
    }
}

fn check_entry_points(program: &Program) -> Result<(), ValidateError> {
    for name in ["main", "init"] {
        if let Some(f) = program.find_function(name) {
            let func = program.func(f);
            if !func.params.is_empty() {
                return err(
                    format!("function {name}"),
                    "entry-point function must take no parameters",
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Block, Constant, ConstValue, Package, Register};

    fn int_type() -> Type {
        Type::Basic(BasicKind::Int)
    }

    fn empty_sig(types: &mut Vec<Type>) -> TypeId {
        types.push(Type::Signature {
            recv: None,
            params: vec![],
            results: vec![],
        });
        TypeId((types.len() - 1) as u32)
    }

    fn one_block_function(types: &mut Vec<Type>, instrs: Vec<Instr>) -> Function {
        let sig = empty_sig(types);
        Function {
            name: "f".to_string(),
            rel_name: "f".to_string(),
            package: 0,
            signature: sig,
            recv: false,
            params: vec![],
            free_vars: vec![],
            blocks: vec![Block {
                instrs,
                preds: vec![],
                succs: vec![],
            }],
            is_bound: false,
        }
    }

    fn program_with(types: Vec<Type>, functions: Vec<Function>) -> Program {
        Program {
            types,
            packages: vec![Package {
                name: "main".to_string(),
                members: vec![],
            }],
            functions,
            globals: vec![],
        }
    }

    #[test]
    fn test_valid_empty_program() {
        let p = program_with(vec![], vec![]);
        validate(&p).unwrap();
    }

    #[test]
    fn test_rejects_unwritten_register() {
        let mut types = vec![int_type()];
        let f = one_block_function(
            &mut types,
            vec![Instr {
                result: None,
                kind: InstrKind::If {
                    cond: Operand::Reg("t7".to_string()),
                },
            }],
        );
        let p = program_with(types, vec![f]);
        let e = validate(&p).unwrap_err();
        assert!(e.to_string().contains("unwritten register t7"));
    }

    #[test]
    fn test_rejects_phi_arity_mismatch() {
        let mut types = vec![int_type()];
        let f = one_block_function(
            &mut types,
            vec![Instr {
                result: Some(Register {
                    name: "t0".to_string(),
                    ty: TypeId(0),
                }),
                kind: InstrKind::Phi {
                    edges: vec![Operand::Const(Constant {
                        ty: TypeId(0),
                        value: ConstValue::Int(1),
                    })],
                },
            }],
        );
        let p = program_with(types, vec![f]);
        let e = validate(&p).unwrap_err();
        assert!(e.to_string().contains("phi has 1 edges for 0 predecessors"));
    }

    #[test]
    fn test_rejects_closure_binding_mismatch() {
        let mut types = vec![int_type()];
        let target = one_block_function(&mut types, vec![]);
        let mut caller = one_block_function(
            &mut types,
            vec![Instr {
                result: Some(Register {
                    name: "t0".to_string(),
                    ty: TypeId(1),
                }),
                kind: InstrKind::MakeClosure {
                    func: 0,
                    bindings: vec![Operand::Param(0)],
                },
            }],
        );
        caller.params.push(crate::program::Param {
            name: "x".to_string(),
            ty: TypeId(0),
        });
        let p = program_with(types, vec![target, caller]);
        let e = validate(&p).unwrap_err();
        assert!(e.to_string().contains("closure binds 1 values but target captures 0"));
    }

    #[test]
    fn test_rejects_parameterized_main() {
        let mut types = vec![int_type()];
        let mut f = one_block_function(&mut types, vec![]);
        f.name = "main".to_string();
        f.rel_name = "main".to_string();
        f.params.push(crate::program::Param {
            name: "x".to_string(),
            ty: TypeId(0),
        });
        let mut p = program_with(types, vec![f]);
        p.packages[0].members.push(Member::Function(0));
        let e = validate(&p).unwrap_err();
        assert!(e.to_string().contains("must take no parameters"));
    }
}
