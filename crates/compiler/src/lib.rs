//! Gox Compiler Library
//!
//! Lowers a whole Gox program, already built to SSA form by the
//! frontend and modeled by the `gox-ssa` crate, onto one
//! self-contained C99 translation unit that cooperates with the
//! hand-written `gox5_*` runtime: goroutine-style concurrency over a
//! trampolined continuation-passing stack machine, channels with
//! select, maps with live iteration, interface dispatch, deferred
//! execution with panic/recover, closures, and slices.
//!
//! The emitter is single-threaded, deterministic, and side-effect
//! free apart from its output string: the same program emits
//! byte-identical C on every run.
//!
//! ```rust
//! use gox_ssa::build::{FunctionBuilder, ProgramBuilder, int_const};
//! use gox_ssa::{BasicKind, InstrKind};
//!
//! let mut b = ProgramBuilder::new("main");
//! let int = b.basic(BasicKind::Int);
//! let sig = b.signature(None, vec![], vec![int]);
//! let mut f = FunctionBuilder::new("main", sig);
//! let b0 = f.block();
//! f.effect(b0, InstrKind::Return { results: vec![int_const(int, 0)] });
//! b.function(f);
//! let program = b.finish();
//!
//! let c = goxc::emit_program(&program, &goxc::EmitterConfig::default()).unwrap();
//! assert!(c.contains("runtime_info_get_entry_point"));
//! ```

pub mod codegen;
pub mod config;
pub mod mangle;
pub mod typegraph;

pub use codegen::CodeGenError;
pub use config::{ConfigError, EmitterConfig};

use gox_ssa::Program;

/// Validate and emit one program.
///
/// Errors are the three kinds the emitter distinguishes: an SSA
/// invariant violation (surfaced by validation or mid-emission), an
/// unsupported construct, or a formatting failure. Callers must
/// discard any partial output on error.
pub fn emit_program(program: &Program, config: &EmitterConfig) -> Result<String, CodeGenError> {
    gox_ssa::validate(program)
        .map_err(|e| CodeGenError::Invariant(e.to_string()))?;
    codegen::emit_program(program, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gox_ssa::build::ProgramBuilder;

    #[test]
    fn test_emit_program_validates_first() {
        let mut program = ProgramBuilder::new("main").finish();
        // Corrupt a global to point out of range.
        program.globals.push(gox_ssa::Global {
            name: "bad".to_string(),
            package: 0,
            ty: gox_ssa::TypeId(99),
        });
        let err = emit_program(&program, &EmitterConfig::default()).unwrap_err();
        assert!(matches!(err, CodeGenError::Invariant(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_empty_program_still_carries_the_ambient_unit() {
        let program = ProgramBuilder::new("main").finish();
        let out = emit_program(&program, &EmitterConfig::default()).unwrap();
        // Prologue, the basic universe, metadata accessors.
        assert!(out.contains("#include <stdint.h>"));
        assert!(out.contains("typedef struct IntObject"));
        assert!(out.contains("bool equal_IntObject"));
        assert!(out.contains("runtime_info_get_funcs_count"));
    }
}
