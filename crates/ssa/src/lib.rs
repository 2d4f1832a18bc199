//! Gox SSA: the input data model of the Gox C emitter
//!
//! A Gox program reaches the emitter already lowered to three-address
//! SSA form by the frontend. This crate defines that form: the SL
//! type universe and the program graph: together with JSON loading,
//! structural validation, and programmatic builders.
//!
//! The emitter treats everything here as immutable: it borrows the
//! program for the duration of emission and performs read-only
//! analysis over it.
//!
//! # Modules
//!
//! - `types`: the SL type universe (basic, array, struct, pointer,
//!   slice, chan, map, interface, signature, named, tuple)
//! - `program`: packages, functions, blocks, instructions, operands
//! - `load`: JSON deserialization of serialized programs
//! - `validate`: structural invariant checks
//! - `build`: builders for constructing programs in Rust

pub mod build;
pub mod load;
pub mod program;
pub mod types;
pub mod validate;

pub use load::{LoadError, from_json, from_path, from_reader};
pub use program::{
    Block, BlockId, BinOpKind, Builtin, CallCommon, Callee, ConstValue, Constant, FuncId, Function,
    Global, GlobalId, Instr, InstrKind, Member, Operand, Package, PackageId, Param, Program,
    Register, SelectState, UnOpKind,
};
pub use types::{BasicKind, MethodSig, StructField, Type, TypeId};
pub use validate::{ValidateError, validate};
