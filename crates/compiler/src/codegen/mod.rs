//! C99 Code Generation
//!
//! Lowers one SSA program onto a single C translation unit that
//! cooperates with the hand-written runtime: a trampolined
//! continuation-passing ABI in which every SL activation record is a
//! frame struct on an emulated stack and every straight-line segment
//! of a block is one C leaf function returning the next function
//! object to run.
//!
//! # Module Structure
//!
//! - `runtime.rs`: emitted C prologue and the runtime ABI table
//! - `types.rs`: three-pass type emitter (tags, pointer bodies, bodies)
//! - `signatures.rs`: uniqued frame-signature structs
//! - `equality.rs`: structural `equal_T` / `hash_T` families
//! - `constants.rs`: uniqued static constant initializers
//! - `frames.rs`: per-function frame layout and struct emission
//! - `instructions.rs`: per-opcode lowering, pure/suspending split
//! - `functions.rs`: block splitting, continuation labels, PHI
//! - `interfaces.rs`: interface tables and `TypeInfo` records
//! - `program.rs`: the driver assembling all sections
//! - `error.rs`: error types
//!
//! # Output ordering
//!
//! The unit is assembled from append-only section buffers so that
//! every identifier is declared textually before first use: prologue,
//! type tags, equality declarations, pointer bodies, remaining type
//! bodies, signature frames, constants, globals, function frames and
//! leaf declarations, interface tables and type-info records,
//! equality definitions, leaf definitions, runtime metadata.

mod constants;
mod equality;
mod error;
mod frames;
mod functions;
mod instructions;
mod interfaces;
mod program;
mod runtime;
mod signatures;
mod types;

pub use error::CodeGenError;
pub use frames::FrameLayout;
pub use program::emit_program;
pub use runtime::{PROLOGUE, RUNTIME_DECLARATIONS, RuntimeDecl, emit_prologue};

use std::collections::{HashMap, HashSet};

use gox_ssa::{FuncId, Program, TypeId};

use crate::config::EmitterConfig;
use crate::mangle::Mint;
use crate::typegraph::{self, TypeUniverse};

/// Whole-program emitter state: the borrowed SSA, the minted type
/// universe, the append-only output sections, and the name-keyed
/// uniqueness registries.
pub struct CodeGen<'p> {
    pub(crate) program: &'p Program,
    pub(crate) mint: Mint<'p>,
    pub(crate) config: EmitterConfig,
    pub(crate) universe: TypeUniverse,

    // Output sections, concatenated by `assemble` in declaration
    // order.
    pub(crate) prologue: String,
    pub(crate) tags: String,
    pub(crate) equal_decls: String,
    pub(crate) pointer_bodies: String,
    pub(crate) type_bodies: String,
    pub(crate) signatures: String,
    pub(crate) constants: String,
    pub(crate) globals: String,
    pub(crate) frames: String,
    pub(crate) tables: String,
    pub(crate) equal_defs: String,
    pub(crate) bodies: String,
    pub(crate) epilogue: String,

    // At-most-once registries, keyed by mangled name.
    pub(crate) sig_frames: HashSet<String>,
    pub(crate) const_names: HashSet<String>,
    /// Frame layouts of all functions, computed before any body is
    /// emitted.
    pub(crate) layouts: HashMap<FuncId, FrameLayout>,
    /// `(source name, C name)` of every emitted function, in emission
    /// order, for the runtime metadata registry.
    pub(crate) emitted_funcs: Vec<(String, String)>,
}

impl<'p> CodeGen<'p> {
    pub fn new(program: &'p Program, config: EmitterConfig) -> Self {
        CodeGen {
            program,
            mint: Mint::new(program),
            config,
            universe: typegraph::visit(program),
            prologue: String::new(),
            tags: String::new(),
            equal_decls: String::new(),
            pointer_bodies: String::new(),
            type_bodies: String::new(),
            signatures: String::new(),
            constants: String::new(),
            globals: String::new(),
            frames: String::new(),
            tables: String::new(),
            equal_defs: String::new(),
            bodies: String::new(),
            epilogue: String::new(),
            sig_frames: HashSet::new(),
            const_names: HashSet::new(),
            layouts: HashMap::new(),
            emitted_funcs: Vec::new(),
        }
    }

    /// C type name of an SL type.
    pub(crate) fn ctype(&self, id: TypeId) -> String {
        self.mint.type_name(id)
    }

    /// Concatenate all sections into the final translation unit.
    pub(crate) fn assemble(self) -> String {
        let mut out = String::with_capacity(
            self.prologue.len()
                + self.tags.len()
                + self.equal_decls.len()
                + self.pointer_bodies.len()
                + self.type_bodies.len()
                + self.signatures.len()
                + self.constants.len()
                + self.globals.len()
                + self.frames.len()
                + self.tables.len()
                + self.equal_defs.len()
                + self.bodies.len()
                + self.epilogue.len(),
        );
        out.push_str(&self.prologue);
        out.push_str(&self.tags);
        out.push_str(&self.equal_decls);
        out.push_str(&self.pointer_bodies);
        out.push_str(&self.type_bodies);
        out.push_str(&self.signatures);
        out.push_str(&self.constants);
        out.push_str(&self.globals);
        out.push_str(&self.frames);
        out.push_str(&self.tables);
        out.push_str(&self.equal_defs);
        out.push_str(&self.bodies);
        out.push_str(&self.epilogue);
        out
    }
}
