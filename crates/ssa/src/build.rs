//! Programmatic program construction.
//!
//! Frontends that link this crate directly (and the emitter's own
//! tests) assemble programs through these builders instead of writing
//! JSON by hand. The builders only do index bookkeeping (interning
//! basic types, keeping `preds`/`succs` in sync) and never invent
//! semantics.

use std::collections::HashMap;

use crate::program::{
    Block, BlockId, Constant, ConstValue, FuncId, Function, Global, GlobalId, Instr, InstrKind,
    Member, Operand, Package, Param, Program, Register,
};
use crate::types::{BasicKind, MethodSig, StructField, Type, TypeId};

/// Builds a single-package program.
pub struct ProgramBuilder {
    program: Program,
    basics: HashMap<BasicKind, TypeId>,
}

impl ProgramBuilder {
    pub fn new(package: &str) -> Self {
        ProgramBuilder {
            program: Program {
                types: Vec::new(),
                packages: vec![Package {
                    name: package.to_string(),
                    members: Vec::new(),
                }],
                functions: Vec::new(),
                globals: Vec::new(),
            },
            basics: HashMap::new(),
        }
    }

    pub fn ty(&mut self, ty: Type) -> TypeId {
        self.program.types.push(ty);
        TypeId((self.program.types.len() - 1) as u32)
    }

    /// Basic types are interned: repeated requests return one id.
    pub fn basic(&mut self, kind: BasicKind) -> TypeId {
        if let Some(id) = self.basics.get(&kind) {
            return *id;
        }
        let id = self.ty(Type::Basic(kind));
        self.basics.insert(kind, id);
        id
    }

    pub fn pointer(&mut self, elem: TypeId) -> TypeId {
        self.ty(Type::Pointer { elem })
    }

    pub fn slice(&mut self, elem: TypeId) -> TypeId {
        self.ty(Type::Slice { elem })
    }

    pub fn array(&mut self, elem: TypeId, len: u64) -> TypeId {
        self.ty(Type::Array { elem, len })
    }

    pub fn chan(&mut self, elem: TypeId) -> TypeId {
        self.ty(Type::Chan { elem })
    }

    pub fn map(&mut self, key: TypeId, value: TypeId) -> TypeId {
        self.ty(Type::Map { key, value })
    }

    pub fn tuple(&mut self, elems: Vec<TypeId>) -> TypeId {
        self.ty(Type::Tuple { elems })
    }

    pub fn strukt(&mut self, fields: Vec<(&str, TypeId)>) -> TypeId {
        self.ty(Type::Struct {
            fields: fields
                .into_iter()
                .map(|(name, ty)| StructField {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
        })
    }

    pub fn named(&mut self, name: &str, underlying: TypeId) -> TypeId {
        let package = self.program.packages[0].name.clone();
        let id = self.ty(Type::Named {
            package,
            name: name.to_string(),
            underlying,
        });
        self.program.packages[0].members.push(Member::Type(id));
        id
    }

    pub fn interface(&mut self, methods: Vec<(&str, TypeId)>) -> TypeId {
        self.ty(Type::Interface {
            methods: methods
                .into_iter()
                .map(|(name, sig)| MethodSig {
                    name: name.to_string(),
                    sig,
                })
                .collect(),
        })
    }

    pub fn signature(
        &mut self,
        recv: Option<TypeId>,
        params: Vec<TypeId>,
        results: Vec<TypeId>,
    ) -> TypeId {
        self.ty(Type::Signature {
            recv,
            params,
            results,
        })
    }

    /// Declare a package-level variable of storage type `elem`.
    pub fn global(&mut self, name: &str, elem: TypeId) -> GlobalId {
        let ty = self.pointer(elem);
        self.program.globals.push(Global {
            name: name.to_string(),
            package: 0,
            ty,
        });
        let id = (self.program.globals.len() - 1) as GlobalId;
        self.program.packages[0].members.push(Member::Global(id));
        id
    }

    /// Install a finished function as a package member.
    pub fn function(&mut self, func: FunctionBuilder) -> FuncId {
        let id = self.anonymous(func);
        self.program.packages[0].members.push(Member::Function(id));
        id
    }

    /// Install a finished function without a member entry (anonymous
    /// functions, bound-method thunks).
    pub fn anonymous(&mut self, func: FunctionBuilder) -> FuncId {
        self.program.functions.push(func.func);
        (self.program.functions.len() - 1) as FuncId
    }

    pub fn finish(self) -> Program {
        self.program
    }
}

/// Builds one function's parameter list and block graph.
pub struct FunctionBuilder {
    func: Function,
}

impl FunctionBuilder {
    pub fn new(name: &str, signature: TypeId) -> Self {
        FunctionBuilder {
            func: Function {
                name: name.to_string(),
                rel_name: name.to_string(),
                package: 0,
                signature,
                recv: false,
                params: Vec::new(),
                free_vars: Vec::new(),
                blocks: Vec::new(),
                is_bound: false,
            },
        }
    }

    pub fn rel_name(mut self, rel: &str) -> Self {
        self.func.rel_name = rel.to_string();
        self
    }

    pub fn bound(mut self) -> Self {
        self.func.is_bound = true;
        self
    }

    pub fn recv(mut self, name: &str, ty: TypeId) -> Self {
        assert!(self.func.params.is_empty(), "receiver must come first");
        self.func.recv = true;
        self.func.params.push(Param {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn param(mut self, name: &str, ty: TypeId) -> Self {
        self.func.params.push(Param {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn free_var(mut self, name: &str, ty: TypeId) -> Self {
        self.func.free_vars.push(Param {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn block(&mut self) -> BlockId {
        self.func.blocks.push(Block {
            instrs: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
        });
        (self.func.blocks.len() - 1) as BlockId
    }

    /// Record a control-flow edge, updating both endpoint lists.
    pub fn edge(&mut self, from: BlockId, to: BlockId) {
        self.func.blocks[from as usize].succs.push(to);
        self.func.blocks[to as usize].preds.push(from);
    }

    /// Append a value-producing instruction.
    pub fn instr(&mut self, block: BlockId, name: &str, ty: TypeId, kind: InstrKind) -> Operand {
        self.func.blocks[block as usize].instrs.push(Instr {
            result: Some(Register {
                name: name.to_string(),
                ty,
            }),
            kind,
        });
        Operand::Reg(name.to_string())
    }

    /// Append an effect-only instruction.
    pub fn effect(&mut self, block: BlockId, kind: InstrKind) {
        self.func.blocks[block as usize].instrs.push(Instr {
            result: None,
            kind,
        });
    }
}

/// Shorthand for a typed constant operand.
pub fn konst(ty: TypeId, value: ConstValue) -> Operand {
    Operand::Const(Constant { ty, value })
}

/// Shorthand for an integer constant operand.
pub fn int_const(ty: TypeId, v: i64) -> Operand {
    konst(ty, ConstValue::Int(v))
}

/// Shorthand for a register operand.
pub fn reg(name: &str) -> Operand {
    Operand::Reg(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate;

    #[test]
    fn test_builder_produces_valid_program() {
        let mut p = ProgramBuilder::new("main");
        let int = p.basic(BasicKind::Int);
        let sig = p.signature(None, vec![], vec![int]);
        let mut f = FunctionBuilder::new("answer", sig);
        let b0 = f.block();
        f.effect(
            b0,
            InstrKind::Return {
                results: vec![int_const(int, 42)],
            },
        );
        p.function(f);
        let program = p.finish();
        validate(&program).unwrap();
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.packages[0].members.len(), 1);
    }

    #[test]
    fn test_basic_types_are_interned() {
        let mut p = ProgramBuilder::new("main");
        let a = p.basic(BasicKind::Int);
        let b = p.basic(BasicKind::Int);
        assert_eq!(a, b);
        assert_ne!(a, p.basic(BasicKind::Bool));
    }

    #[test]
    fn test_edge_updates_both_sides() {
        let mut p = ProgramBuilder::new("main");
        let sig = p.signature(None, vec![], vec![]);
        let mut f = FunctionBuilder::new("f", sig);
        let b0 = f.block();
        let b1 = f.block();
        f.edge(b0, b1);
        f.effect(b0, InstrKind::Jump);
        f.effect(b1, InstrKind::Return { results: vec![] });
        p.function(f);
        let program = p.finish();
        assert_eq!(program.functions[0].blocks[0].succs, vec![1]);
        assert_eq!(program.functions[0].blocks[1].preds, vec![0]);
    }
}
