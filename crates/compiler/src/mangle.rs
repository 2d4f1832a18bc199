//! Name mint: deterministic C identifiers for every emitted entity.
//!
//! Every semantic key (a type tree, a function reference, a block, a
//! value, a constant) is first serialized to a stable string and
//! then encoded into the C identifier alphabet. Within one run (and,
//! because keys never involve addresses, across runs) syntactically
//! identical entities mint identical names.
//!
//! Encoding: `A–Z a–z 0–9` pass through, every other byte becomes
//! `_HH_` (two uppercase hex digits). `f$fib` therefore emits as
//! `f_24_fib`.

use gox_ssa::{ConstValue, Constant, FuncId, GlobalId, Program, Type, TypeId};

/// Encode an arbitrary key string into `[A-Za-z0-9_]`.
///
/// The underscore itself is escaped (`_5F_`): decoding stays
/// unambiguous and two distinct keys can never collide after
/// encoding.
pub fn mangle(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(b as char),
            _ => {
                out.push('_');
                out.push_str(&format!("{b:02X}"));
                out.push('_');
            }
        }
    }
    out
}

/// Mints names against one program. Borrows the SSA read-only, like
/// every other emitter component.
pub struct Mint<'p> {
    program: &'p Program,
}

impl<'p> Mint<'p> {
    pub fn new(program: &'p Program) -> Self {
        Mint { program }
    }

    /// Stable serialization of a type tree. This is the *key*; the C
    /// identifier is its [`mangle`] encoding.
    ///
    /// Interface and Signature collapse to the runtime-supplied
    /// shapes. A `Named` type re-entered through its own underlying
    /// chain (a struct holding a pointer to itself) falls back to its
    /// qualified name, which closes the cycle.
    pub fn type_key(&self, id: TypeId) -> String {
        let mut stack = Vec::new();
        self.type_key_rec(id, &mut stack)
    }

    fn type_key_rec(&self, id: TypeId, stack: &mut Vec<TypeId>) -> String {
        match self.program.ty(id) {
            Type::Basic(kind) => kind.object_name().to_string(),
            Type::Array { elem, len } => {
                format!("Array<{}${}>", self.type_key_rec(*elem, stack), len)
            }
            Type::Pointer { elem } => {
                format!("Pointer<{}>", self.type_key_rec(*elem, stack))
            }
            Type::Slice { elem } => {
                format!("Slice<{}>", self.type_key_rec(*elem, stack))
            }
            Type::Chan { elem } => {
                format!("Chan<{}>", self.type_key_rec(*elem, stack))
            }
            Type::Map { key, value } => format!(
                "Map<{}${}>",
                self.type_key_rec(*key, stack),
                self.type_key_rec(*value, stack)
            ),
            Type::Struct { fields } => {
                let mut sig = String::from("Struct<");
                for (i, f) in fields.iter().enumerate() {
                    if i > 0 {
                        sig.push('$');
                    }
                    sig.push_str(&f.name);
                    sig.push('$');
                    sig.push_str(&self.type_key_rec(f.ty, stack));
                }
                sig.push('>');
                sig
            }
            Type::Interface { .. } => "InterfaceObject".to_string(),
            Type::Signature { .. } => "FunctionObject".to_string(),
            Type::Named {
                package,
                name,
                underlying,
            } => {
                if stack.contains(&id) {
                    return format!("{package}.{name}");
                }
                stack.push(id);
                let key = format!(
                    "Named<{package}.{name}${}>",
                    self.type_key_rec(*underlying, stack)
                );
                stack.pop();
                key
            }
            Type::Tuple { elems } => self.tuple_key_rec(elems, stack),
        }
    }

    fn tuple_key_rec(&self, elems: &[TypeId], stack: &mut Vec<TypeId>) -> String {
        let mut key = String::from("Tuple<");
        for (i, e) in elems.iter().enumerate() {
            if i > 0 {
                key.push('$');
            }
            key.push_str(&self.type_key_rec(*e, stack));
        }
        key.push('>');
        key
    }

    /// Key of the tuple carrying `elems`, whether or not the arena
    /// holds such a type (multi-return results are tuples even when
    /// no call site materialized one).
    pub fn tuple_key(&self, elems: &[TypeId]) -> String {
        let mut stack = Vec::new();
        self.tuple_key_rec(elems, &mut stack)
    }

    /// C type name for a type id.
    pub fn type_name(&self, id: TypeId) -> String {
        mangle(&self.type_key(id))
    }

    pub fn tuple_name(&self, elems: &[TypeId]) -> String {
        mangle(&self.tuple_key(elems))
    }

    /// `f$<RelString>`, with `$bound` appended for bound-method
    /// thunks.
    pub fn function_name(&self, id: FuncId) -> String {
        let func = self.program.func(id);
        if func.is_bound {
            mangle(&format!("f${}$bound", func.rel_name))
        } else {
            mangle(&format!("f${}", func.rel_name))
        }
    }

    /// `b$<BlockId>$<FuncName>$<PkgName>$<AddressHex>`. The address
    /// component is minted from arena indices, not heap addresses, so
    /// re-runs produce identical output.
    pub fn block_name(&self, func: FuncId, block: u32) -> String {
        let f = self.program.func(func);
        let pkg = &self.program.package(f.package).name;
        let addr = ((func as u64) << 20) | block as u64;
        mangle(&format!("b${block}${}${pkg}${addr:x}", f.rel_name))
    }

    /// `i$<BlockId>$<FuncName>$<PkgName>$<AddressHex>`: continuation
    /// label of the suspending instruction at `(block, index)`.
    pub fn instr_label(&self, func: FuncId, block: u32, index: usize) -> String {
        let f = self.program.func(func);
        let pkg = &self.program.package(f.package).name;
        let addr = ((func as u64) << 40) | ((block as u64) << 20) | index as u64;
        mangle(&format!("i${block}${}${pkg}${addr:x}", f.rel_name))
    }

    /// `v$<ValueName>$<FuncName>$<AddressHex>`: frame slot of one
    /// instruction value. `ordinal` is the value's position in the
    /// function-wide slot walk.
    pub fn value_name(&self, func: FuncId, value: &str, ordinal: usize) -> String {
        let f = self.program.func(func);
        let addr = ((func as u64) << 20) | ordinal as u64;
        mangle(&format!("v${value}${}${addr:x}", f.rel_name))
    }

    /// `gv$<Name>$<Pkg>$<AddressHex>`: a global's storage.
    pub fn global_name(&self, id: GlobalId) -> String {
        let g = self.program.global(id);
        let pkg = &self.program.package(g.package).name;
        mangle(&format!("gv${}${pkg}${id:x}", g.name))
    }

    /// `c$<QuotedLiteral>$<TypeName>`: a constant initializer. The
    /// type participates in the key: `0` as Int and `0` as Float64
    /// are different objects.
    pub fn const_name(&self, c: &Constant) -> String {
        mangle(&format!(
            "c${}${}",
            const_literal(&c.value),
            self.type_key(c.ty)
        ))
    }

    /// Key of the uniqued frame-signature struct for `sig`
    /// (§ signature emitter). `abstract_recv` selects the interface
    /// variant whose receiver is an opaque pointer.
    pub fn sig_frame_key(&self, sig: TypeId, abstract_recv: bool) -> String {
        let sig = self.program.underlying_id(sig);
        let Type::Signature {
            recv,
            params,
            results,
        } = self.program.ty(sig)
        else {
            unreachable!("sig_frame_key on non-signature");
        };
        let mut key = String::from("Signature$Params");
        match (recv, abstract_recv) {
            (Some(_), true) => key.push_str("$abstract"),
            (Some(r), false) => {
                key.push('$');
                key.push_str(&self.type_key(*r));
            }
            (None, _) => {}
        }
        for p in params {
            key.push('$');
            key.push_str(&self.type_key(*p));
        }
        key.push_str("$Results");
        if let Some(r) = self.result_key(results) {
            key.push('$');
            key.push_str(&r);
        }
        key
    }

    pub fn sig_frame_name(&self, sig: TypeId, abstract_recv: bool) -> String {
        mangle(&self.sig_frame_key(sig, abstract_recv))
    }

    /// Result storage key: nothing for zero results, the single
    /// result's key, or the positional tuple for multi-return.
    pub fn result_key(&self, results: &[TypeId]) -> Option<String> {
        match results {
            [] => None,
            [one] => Some(self.type_key(*one)),
            many => Some(self.tuple_key(many)),
        }
    }

    /// C type of the storage `result_ptr` points at, if any.
    pub fn result_type_name(&self, results: &[TypeId]) -> Option<String> {
        self.result_key(results).map(|k| mangle(&k))
    }
}

/// Quoted literal used inside constant keys.
pub fn const_literal(value: &ConstValue) -> String {
    match value {
        ConstValue::Bool(b) => b.to_string(),
        ConstValue::Int(v) => v.to_string(),
        ConstValue::Uint(v) => v.to_string(),
        ConstValue::Float(v) => format!("{v:?}"),
        ConstValue::Complex { re, im } => format!("({re:?}+{im:?}i)"),
        ConstValue::Str(s) => format!("{s:?}"),
        ConstValue::Nil => "nil".to_string(),
    }
}

/// C keywords and prologue member names a struct field must not
/// shadow. Fields named `_` or matching one of these are rewritten to
/// `<name>_<address>`.
pub fn is_reserved_field(name: &str) -> bool {
    matches!(
        name,
        "_" | "auto"
            | "break"
            | "case"
            | "char"
            | "const"
            | "continue"
            | "default"
            | "do"
            | "double"
            | "else"
            | "enum"
            | "extern"
            | "float"
            | "for"
            | "goto"
            | "if"
            | "inline"
            | "int"
            | "long"
            | "register"
            | "restrict"
            | "return"
            | "short"
            | "signed"
            | "sizeof"
            | "static"
            | "struct"
            | "switch"
            | "typedef"
            | "union"
            | "unsigned"
            | "void"
            | "volatile"
            | "while"
    )
}

/// Rewrite a reserved or blank field name into a unique one. `addr`
/// is the owning type's stable address (its arena index).
pub fn field_name(name: &str, addr: usize) -> String {
    if is_reserved_field(name) {
        format!("{name}_{addr:x}")
    } else {
        mangle(name)
    }
}
