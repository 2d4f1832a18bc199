//! Type graph visitor: the transitive closure of referenced types.
//!
//! Walks every type reachable from the basic-type universe, package
//! members, function signatures, and every value inside every block,
//! in a stable order. Downstream emitters (tags, bodies, equality,
//! type-info) iterate the result; the visitor itself emits nothing.
//!
//! Deduplication is by *minted name*, not by arena index: two
//! structurally identical arena entries collapse into one visited
//! type, and all interfaces (resp. signatures) collapse into the
//! single runtime-supplied `InterfaceObject` (resp. `FunctionObject`)
//! shape.

use std::collections::HashMap;

use gox_ssa::{
    BasicKind, Callee, InstrKind, Member, Operand, Program, Type, TypeId,
};

use crate::mangle::Mint;

/// Structural description of one visited type, independent of how
/// many arena entries mint its name.
#[derive(Debug, Clone)]
pub enum Shape {
    Basic(BasicKind),
    /// Representative arena entry (first one visited).
    Arena(TypeId),
    /// Result tuple synthesized for a multi-return signature that
    /// the arena never materialized.
    Tuple(Vec<TypeId>),
}

#[derive(Debug, Clone)]
pub struct VisitedType {
    /// Minted C identifier.
    pub name: String,
    pub shape: Shape,
}

/// Visited types in visit order, addressable by minted name.
pub struct TypeUniverse {
    entries: Vec<VisitedType>,
    by_name: HashMap<String, usize>,
}

impl TypeUniverse {
    pub fn iter(&self) -> impl Iterator<Item = &VisitedType> {
        self.entries.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&VisitedType> {
        self.by_name.get(name).map(|i| &self.entries[*i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walk the program and return every materialized type.
pub fn visit(program: &Program) -> TypeUniverse {
    let mut v = Visitor {
        program,
        mint: Mint::new(program),
        universe: TypeUniverse {
            entries: Vec::new(),
            by_name: HashMap::new(),
        },
    };

    for kind in BasicKind::universe() {
        v.record(kind.object_name().to_string(), Shape::Basic(*kind));
    }

    for pkg in &program.packages {
        for member in &pkg.members {
            match member {
                Member::Type(t) => v.visit_type(*t),
                Member::Global(g) => v.visit_type(program.global(*g).ty),
                Member::Function(_) => {}
            }
        }
    }

    for func in &program.functions {
        v.visit_signature(func.signature);
        for p in func.params.iter().chain(func.free_vars.iter()) {
            v.visit_type(p.ty);
        }
        for block in &func.blocks {
            for instr in &block.instrs {
                if let Some(r) = &instr.result {
                    v.visit_type(r.ty);
                }
                v.visit_instr_types(&instr.kind);
            }
        }
    }

    v.universe
}

struct Visitor<'p> {
    program: &'p Program,
    mint: Mint<'p>,
    universe: TypeUniverse,
}

impl<'p> Visitor<'p> {
    /// Insert once per name. Returns false when already present.
    fn record(&mut self, name: String, shape: Shape) -> bool {
        if self.universe.by_name.contains_key(&name) {
            return false;
        }
        self.universe
            .by_name
            .insert(name.clone(), self.universe.entries.len());
        self.universe.entries.push(VisitedType { name, shape });
        true
    }

    fn visit_type(&mut self, id: TypeId) {
        let name = self.mint.type_name(id);
        let shape = match self.program.ty(id) {
            Type::Basic(kind) => Shape::Basic(*kind),
            _ => Shape::Arena(id),
        };
        if !self.record(name, shape) {
            return;
        }
        // Recurse into components. Interface and Signature are
        // collapsed shapes: no descent.
        match self.program.ty(id) {
            Type::Basic(_) | Type::Interface { .. } | Type::Signature { .. } => {}
            Type::Array { elem, .. }
            | Type::Pointer { elem }
            | Type::Slice { elem }
            | Type::Chan { elem } => self.visit_type(*elem),
            Type::Struct { fields } => {
                for f in fields.clone() {
                    self.visit_type(f.ty);
                }
            }
            Type::Map { key, value } => {
                let (key, value) = (*key, *value);
                self.visit_type(key);
                self.visit_type(value);
            }
            Type::Named { underlying, .. } => self.visit_type(*underlying),
            Type::Tuple { elems } => {
                for e in elems.clone() {
                    self.visit_type(e);
                }
            }
        }
    }

    /// A signature used at a definition or call site: the collapsed
    /// `FunctionObject` shape plus its component types, plus the
    /// synthesized result tuple for multi-return.
    fn visit_signature(&mut self, sig: TypeId) {
        self.visit_type(sig);
        let sig = self.program.underlying_id(sig);
        let Type::Signature {
            recv,
            params,
            results,
        } = self.program.ty(sig)
        else {
            return;
        };
        let (recv, params, results) = (*recv, params.clone(), results.clone());
        if let Some(r) = recv {
            self.visit_type(r);
        }
        for p in &params {
            self.visit_type(*p);
        }
        for r in &results {
            self.visit_type(*r);
        }
        if results.len() >= 2 {
            let name = self.mint.tuple_name(&results);
            self.record(name, Shape::Tuple(results));
        }
    }

    fn visit_operand(&mut self, op: &Operand) {
        if let Operand::Const(c) = op {
            self.visit_type(c.ty);
        }
    }

    fn visit_instr_types(&mut self, kind: &InstrKind) {
        match kind {
            InstrKind::Call { call } | InstrKind::Defer { call } | InstrKind::Go { call } => {
                self.visit_signature(call.signature);
                if let Callee::Value(v) = &call.callee {
                    self.visit_operand(v);
                }
                if let Callee::Method { iface, .. } = &call.callee {
                    self.visit_operand(iface);
                }
                for a in &call.args {
                    self.visit_operand(a);
                }
            }
            InstrKind::TypeAssert { x, asserted, .. } => {
                self.visit_operand(x);
                self.visit_type(*asserted);
            }
            InstrKind::MakeClosure { func, bindings } => {
                for p in self.program.func(*func).free_vars.clone() {
                    self.visit_type(p.ty);
                }
                for b in bindings {
                    self.visit_operand(b);
                }
            }
            InstrKind::BinOp { x, y, .. } => {
                self.visit_operand(x);
                self.visit_operand(y);
            }
            InstrKind::Select { states, .. } => {
                for s in states {
                    self.visit_operand(&s.chan);
                    if let Some(v) = &s.send {
                        self.visit_operand(v);
                    }
                }
            }
            InstrKind::Store { addr, val } => {
                self.visit_operand(addr);
                self.visit_operand(val);
            }
            InstrKind::Return { results } => {
                for r in results {
                    self.visit_operand(r);
                }
            }
            InstrKind::Phi { edges } => {
                for e in edges {
                    self.visit_operand(e);
                }
            }
            InstrKind::MapUpdate { map, key, value } => {
                self.visit_operand(map);
                self.visit_operand(key);
                self.visit_operand(value);
            }
            InstrKind::Index { x, index } | InstrKind::IndexAddr { x, index } => {
                self.visit_operand(x);
                self.visit_operand(index);
            }
            InstrKind::Lookup { x, index, .. } => {
                self.visit_operand(x);
                self.visit_operand(index);
            }
            InstrKind::Slice { x, low, high } => {
                self.visit_operand(x);
                if let Some(l) = low {
                    self.visit_operand(l);
                }
                if let Some(h) = high {
                    self.visit_operand(h);
                }
            }
            InstrKind::MakeSlice { len, cap } => {
                self.visit_operand(len);
                self.visit_operand(cap);
            }
            InstrKind::Send { chan, x } => {
                self.visit_operand(chan);
                self.visit_operand(x);
            }
            InstrKind::MakeChan { size } => self.visit_operand(size),
            InstrKind::MakeMap { reserve } => {
                if let Some(r) = reserve {
                    self.visit_operand(r);
                }
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
            | InstrKind::UnOp { x, .. } => self.visit_operand(x),
            InstrKind::Extract { tuple, .. } => self.visit_operand(tuple),
            InstrKind::Next { iter, .. } => self.visit_operand(iter),
            InstrKind::Alloc { .. } | InstrKind::Jump | InstrKind::RunDefers => {}
        }
    }
}
