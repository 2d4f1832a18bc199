//! SSA program graph
//!
//! The whole-program input the emitter lowers: packages with named
//! members, functions made of basic blocks, blocks made of
//! instructions, and operands referring to constants, globals,
//! parameters, free variables, or earlier instruction results.
//!
//! The shape mirrors the frontend's SSA form: three-address
//! instructions, explicit `Phi` nodes at block heads, block 0 as the
//! function entry, and a static successor/predecessor list per block.
//! Everything is plain data with arena-index cross references so that
//! one JSON document can carry an entire program.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Type, TypeId};

/// Index of a function in `Program::functions`.
pub type FuncId = u32;
/// Index of a global in `Program::globals`.
pub type GlobalId = u32;
/// Index of a package in `Program::packages`.
pub type PackageId = u32;
/// Index of a block within its parent function.
pub type BlockId = u32;

/// A whole SSA program: the unit of emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub types: Vec<Type>,
    pub packages: Vec<Package>,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
}

impl Program {
    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    /// Resolve `Named` chains down to the first structural type.
    pub fn underlying(&self, mut id: TypeId) -> &Type {
        loop {
            match self.ty(id) {
                Type::Named { underlying, .. } => id = *underlying,
                other => return other,
            }
        }
    }

    /// Like [`Program::underlying`], but returns the id.
    pub fn underlying_id(&self, mut id: TypeId) -> TypeId {
        while let Type::Named { underlying, .. } = self.ty(id) {
            id = *underlying;
        }
        id
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.functions[id as usize]
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id as usize]
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id as usize]
    }

    /// Find a package member function by name, searching packages in
    /// declaration order.
    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        for pkg in &self.packages {
            for member in &pkg.members {
                if let Member::Function(f) = member {
                    if self.func(*f).name == name {
                        return Some(*f);
                    }
                }
            }
        }
        None
    }

    /// Methods the program defines with receiver type `recv`
    /// exactly `recv`, not its pointer version. Order follows the
    /// function arena.
    pub fn methods_with_receiver(&self, recv: TypeId) -> Vec<FuncId> {
        let mut out = Vec::new();
        for (i, f) in self.functions.iter().enumerate() {
            if f.recv && f.params.first().is_some_and(|p| p.ty == recv) {
                out.push(i as FuncId);
            }
        }
        out
    }
}

/// A package: a named collection of members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub members: Vec<Member>,
}

/// A named package member. Order is declaration order, which the
/// emitter preserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Member {
    Function(FuncId),
    Global(GlobalId),
    Type(TypeId),
}

/// A package-level variable. `ty` is the *pointer* type: referring to
/// a global yields the address of its storage, never the storage
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub package: PackageId,
    pub ty: TypeId,
}

/// A function: signature plus zero blocks (extern) or a non-empty
/// block list whose block 0 is the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    /// Short member name (`fib`, `String`).
    pub name: String,
    /// Qualified relative identifier used for minted names
    /// (`fib`, `(main.T).String`, `main$1` for anonymous functions).
    pub rel_name: String,
    pub package: PackageId,
    /// Must point at a `Type::Signature`.
    pub signature: TypeId,
    /// When true, `params[0]` is the receiver.
    #[serde(default)]
    pub recv: bool,
    pub params: Vec<Param>,
    /// Captured free variables, in binding order.
    #[serde(default)]
    pub free_vars: Vec<Param>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Bound-method thunk: a synthetic wrapper closing over a single
    /// `receiver` free variable.
    #[serde(default)]
    pub is_bound: bool,
}

impl Function {
    pub fn is_extern(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A named, typed parameter or free variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeId,
}

/// A basic block: ordered instructions plus the static control-flow
/// edges. `Phi` instructions, when present, lead the instruction
/// list and have one edge per predecessor, in `preds` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub instrs: Vec<Instr>,
    #[serde(default)]
    pub preds: Vec<BlockId>,
    #[serde(default)]
    pub succs: Vec<BlockId>,
}

/// The register an instruction writes, when it produces a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Register {
    /// Function-unique value name (`t0`, `t1`, ...).
    pub name: String,
    pub ty: TypeId,
}

/// One SSA instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instr {
    #[serde(default)]
    pub result: Option<Register>,
    pub kind: InstrKind,
}

/// An operand: where an instruction reads a value from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operand {
    Const(Constant),
    /// A function reference (function object value).
    Func(FuncId),
    /// A global's address.
    Global(GlobalId),
    /// Parameter of the enclosing function, by position.
    Param(u32),
    /// Free variable of the enclosing function, by position.
    FreeVar(u32),
    /// Result of an instruction in the enclosing function, by
    /// register name.
    Reg(String),
}

/// A typed constant. The frontend has already widened untyped
/// constants; `validate` enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constant {
    pub ty: TypeId,
    pub value: ConstValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Complex { re: f64, im: f64 },
    Str(String),
    /// Zero value of a pointer-shaped type (pointer, chan, map,
    /// signature, slice, interface, unsafe pointer).
    Nil,
}

/// Arithmetic / comparison / logical operators for `BinOp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    Eql,
    Neq,
    Lss,
    Leq,
    Gtr,
    Geq,
}

impl BinOpKind {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOpKind::Eql
                | BinOpKind::Neq
                | BinOpKind::Lss
                | BinOpKind::Leq
                | BinOpKind::Gtr
                | BinOpKind::Geq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOpKind {
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
    /// Bitwise complement.
    BitNot,
    /// Pointer dereference.
    Deref,
    /// Channel receive.
    Recv,
}

/// Built-in functions that reach the lowerer as callees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Builtin {
    Append,
    Cap,
    Close,
    Complex,
    Copy,
    Imag,
    Len,
    Print,
    Println,
    Real,
    Recover,
}

/// Who a call goes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Callee {
    /// Direct call of a known function.
    Function(FuncId),
    /// Indirect call through a function value (closure or function
    /// variable).
    Value(Operand),
    /// Dynamic dispatch: look `name` up in the interface value's
    /// method table.
    Method { iface: Operand, name: String },
    Builtin(Builtin),
}

/// Shared shape of `Call`, `Defer`, and `Go`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallCommon {
    pub callee: Callee,
    pub args: Vec<Operand>,
    /// The callee's `Type::Signature`.
    pub signature: TypeId,
}

/// One arm of a `Select`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectState {
    pub chan: Operand,
    /// `Some(v)` sends `v`; `None` receives.
    #[serde(default)]
    pub send: Option<Operand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InstrKind {
    /// Reserve storage; result type is `Pointer<T>`. Non-heap allocs
    /// live in the parent frame, heap allocs suspend into the
    /// allocator.
    Alloc { heap: bool },
    BinOp { op: BinOpKind, x: Operand, y: Operand },
    Call { call: CallCommon },
    ChangeInterface { x: Operand },
    ChangeType { x: Operand },
    Convert { x: Operand },
    Defer { call: CallCommon },
    Extract { tuple: Operand, index: u32 },
    Field { x: Operand, field: u32 },
    FieldAddr { x: Operand, field: u32 },
    Go { call: CallCommon },
    /// Two-way branch: `succs[0]` when true, `succs[1]` when false.
    If { cond: Operand },
    Index { x: Operand, index: Operand },
    IndexAddr { x: Operand, index: Operand },
    Jump,
    /// Map or string element read.
    Lookup { x: Operand, index: Operand, comma_ok: bool },
    MakeChan { size: Operand },
    MakeClosure { func: FuncId, bindings: Vec<Operand> },
    MakeInterface { x: Operand },
    MakeMap { reserve: Option<Operand> },
    MakeSlice { len: Operand, cap: Operand },
    MapUpdate { map: Operand, key: Operand, value: Operand },
    /// Advance a `Range` iterator; result is `(ok, key, value)`.
    Next { iter: Operand, is_string: bool },
    Panic { x: Operand },
    Phi { edges: Vec<Operand> },
    /// Begin iteration over a map or string.
    Range { x: Operand },
    Return { results: Vec<Operand> },
    RunDefers,
    Select { states: Vec<SelectState>, blocking: bool },
    Send { chan: Operand, x: Operand },
    Slice { x: Operand, low: Option<Operand>, high: Option<Operand> },
    Store { addr: Operand, val: Operand },
    TypeAssert { x: Operand, asserted: TypeId, comma_ok: bool },
    UnOp { op: UnOpKind, x: Operand, comma_ok: bool },
}

impl InstrKind {
    /// Compact opcode name, used in diagnostics and emitted echo
    /// comments.
    pub fn opcode(&self) -> &'static str {
        match self {
            InstrKind::Alloc { .. } => "Alloc",
            InstrKind::BinOp { .. } => "BinOp",
            InstrKind::Call { .. } => "Call",
            InstrKind::ChangeInterface { .. } => "ChangeInterface",
            InstrKind::ChangeType { .. } => "ChangeType",
            InstrKind::Convert { .. } => "Convert",
            InstrKind::Defer { .. } => "Defer",
            InstrKind::Extract { .. } => "Extract",
            InstrKind::Field { .. } => "Field",
            InstrKind::FieldAddr { .. } => "FieldAddr",
            InstrKind::Go { .. } => "Go",
            InstrKind::If { .. } => "If",
            InstrKind::Index { .. } => "Index",
            InstrKind::IndexAddr { .. } => "IndexAddr",
            InstrKind::Jump => "Jump",
            InstrKind::Lookup { .. } => "Lookup",
            InstrKind::MakeChan { .. } => "MakeChan",
            InstrKind::MakeClosure { .. } => "MakeClosure",
            InstrKind::MakeInterface { .. } => "MakeInterface",
            InstrKind::MakeMap { .. } => "MakeMap",
            InstrKind::MakeSlice { .. } => "MakeSlice",
            InstrKind::MapUpdate { .. } => "MapUpdate",
            InstrKind::Next { .. } => "Next",
            InstrKind::Panic { .. } => "Panic",
            InstrKind::Phi { .. } => "Phi",
            InstrKind::Range { .. } => "Range",
            InstrKind::Return { .. } => "Return",
            InstrKind::RunDefers => "RunDefers",
            InstrKind::Select { .. } => "Select",
            InstrKind::Send { .. } => "Send",
            InstrKind::Slice { .. } => "Slice",
            InstrKind::Store { .. } => "Store",
            InstrKind::TypeAssert { .. } => "TypeAssert",
            InstrKind::UnOp { .. } => "UnOp",
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(c) => write!(f, "{}", c.value),
            Operand::Func(id) => write!(f, "func#{id}"),
            Operand::Global(id) => write!(f, "global#{id}"),
            Operand::Param(i) => write!(f, "param{i}"),
            Operand::FreeVar(i) => write!(f, "freevar{i}"),
            Operand::Reg(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Bool(b) => write!(f, "{b}"),
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Uint(v) => write!(f, "{v}"),
            ConstValue::Float(v) => write!(f, "{v:?}"),
            ConstValue::Complex { re, im } => write!(f, "({re:?}+{im:?}i)"),
            ConstValue::Str(s) => write!(f, "{s:?}"),
            ConstValue::Nil => write!(f, "nil"),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(r) = &self.result {
            write!(f, "{} = ", r.name)?;
        }
        write!(f, "{}", self.kind.opcode())?;
        match &self.kind {
            InstrKind::BinOp { op, x, y } => write!(f, " {op:?} {x} {y}"),
            InstrKind::UnOp { op, x, .. } => write!(f, " {op:?} {x}"),
            InstrKind::Store { addr, val } => write!(f, " {addr} {val}"),
            InstrKind::If { cond } => write!(f, " {cond}"),
            InstrKind::Phi { edges } => {
                write!(f, " [")?;
                for (i, e) in edges.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            _ => Ok(()),
        }
    }
}
