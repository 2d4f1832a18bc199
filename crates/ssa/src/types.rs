//! SL type universe
//!
//! The source language's types, already resolved by the frontend. The
//! emitter never mutates these; it walks them to materialize C
//! records.
//!
//! Types live in a flat arena (`Program::types`) and refer to each
//! other by [`TypeId`] index. Index references (instead of boxed
//! trees) are what make cyclic graphs: a struct containing a pointer
//! to itself, mutually recursive structs: both representable and
//! serializable.

use serde::{Deserialize, Serialize};

/// Index of a type in the program's type arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kinds of basic (predeclared) types.
///
/// Untyped kinds are deliberately absent: the serializer contract
/// requires the frontend to widen untyped constants before handing
/// the program over (see `validate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicKind {
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintptr,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String,
    UnsafePointer,
    Invalid,
}

impl BasicKind {
    /// Stable name used in minted identifiers (`IntObject`, ...).
    pub fn object_name(self) -> &'static str {
        match self {
            BasicKind::Bool => "BoolObject",
            BasicKind::Int => "IntObject",
            BasicKind::Int8 => "Int8Object",
            BasicKind::Int16 => "Int16Object",
            BasicKind::Int32 => "Int32Object",
            BasicKind::Int64 => "Int64Object",
            BasicKind::Uint => "UintObject",
            BasicKind::Uint8 => "Uint8Object",
            BasicKind::Uint16 => "Uint16Object",
            BasicKind::Uint32 => "Uint32Object",
            BasicKind::Uint64 => "Uint64Object",
            BasicKind::Uintptr => "UintptrObject",
            BasicKind::Float32 => "Float32Object",
            BasicKind::Float64 => "Float64Object",
            BasicKind::Complex64 => "Complex64Object",
            BasicKind::Complex128 => "Complex128Object",
            BasicKind::String => "StringObject",
            BasicKind::UnsafePointer => "UnsafePointerObject",
            BasicKind::Invalid => "InvalidObject",
        }
    }

    /// All kinds a program may reference, in emission order.
    /// `Invalid` is excluded: it never materializes.
    pub fn universe() -> &'static [BasicKind] {
        &[
            BasicKind::Bool,
            BasicKind::Int,
            BasicKind::Int8,
            BasicKind::Int16,
            BasicKind::Int32,
            BasicKind::Int64,
            BasicKind::Uint,
            BasicKind::Uint8,
            BasicKind::Uint16,
            BasicKind::Uint32,
            BasicKind::Uint64,
            BasicKind::Uintptr,
            BasicKind::Float32,
            BasicKind::Float64,
            BasicKind::Complex64,
            BasicKind::Complex128,
            BasicKind::String,
            BasicKind::UnsafePointer,
        ]
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BasicKind::Int
                | BasicKind::Int8
                | BasicKind::Int16
                | BasicKind::Int32
                | BasicKind::Int64
                | BasicKind::Uint
                | BasicKind::Uint8
                | BasicKind::Uint16
                | BasicKind::Uint32
                | BasicKind::Uint64
                | BasicKind::Uintptr
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            BasicKind::Uint
                | BasicKind::Uint8
                | BasicKind::Uint16
                | BasicKind::Uint32
                | BasicKind::Uint64
                | BasicKind::Uintptr
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, BasicKind::Float32 | BasicKind::Float64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, BasicKind::Complex64 | BasicKind::Complex128)
    }
}

/// One named struct field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: TypeId,
}

/// One method in an interface's method set. `sig` must point at a
/// `Type::Signature` without receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    pub sig: TypeId,
}

/// An SL type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Basic(BasicKind),
    Array {
        elem: TypeId,
        len: u64,
    },
    Struct {
        fields: Vec<StructField>,
    },
    Pointer {
        elem: TypeId,
    },
    Slice {
        elem: TypeId,
    },
    Chan {
        elem: TypeId,
    },
    Map {
        key: TypeId,
        value: TypeId,
    },
    Interface {
        methods: Vec<MethodSig>,
    },
    Signature {
        recv: Option<TypeId>,
        params: Vec<TypeId>,
        results: Vec<TypeId>,
    },
    Named {
        package: String,
        name: String,
        underlying: TypeId,
    },
    Tuple {
        elems: Vec<TypeId>,
    },
}

impl Type {
    pub fn as_basic(&self) -> Option<BasicKind> {
        match self {
            Type::Basic(k) => Some(*k),
            _ => None,
        }
    }

    pub fn is_interface(&self) -> bool {
        matches!(self, Type::Interface { .. })
    }

    pub fn is_signature(&self) -> bool {
        matches!(self, Type::Signature { .. })
    }
}
