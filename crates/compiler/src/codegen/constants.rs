//! Constant emitter: one static C initializer per distinct constant.
//!
//! Constants are registered on first use from the instruction lowerer
//! and land in their own section ahead of all function bodies. The
//! registry is keyed by the minted name, which includes both the
//! quoted literal and the type: `0` as `IntObject` and `0` as
//! `Float64Object` are distinct objects. Statics also give every
//! constant a stable address, which runtime entries taking key/data
//! pointers rely on across suspensions.

use std::fmt::Write as _;

use gox_ssa::{ConstValue, Constant};

use super::CodeGen;
use super::error::CodeGenError;

/// Escape a Rust string into a C string literal body. Octal escapes
/// are fixed-width, so a following digit can never extend them.
fn c_string_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out
}

/// Render a finite or non-finite double as a C expression.
fn c_float(v: f64) -> String {
    if v.is_nan() {
        "NAN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "INFINITY".to_string() } else { "-INFINITY".to_string() }
    } else if v == v.trunc() && v.abs() < 1e15 {
        // Keep a decimal point so the literal stays a double.
        format!("{v:.1}")
    } else {
        format!("{v:?}")
    }
}

impl<'p> CodeGen<'p> {
    /// Identifier of the static holding `c`, emitting the initializer
    /// on first use.
    pub(crate) fn const_ref(&mut self, c: &Constant) -> Result<String, CodeGenError> {
        let name = self.mint.const_name(c);
        if self.const_names.contains(&name) {
            return Ok(name);
        }
        self.const_names.insert(name.clone());
        let c_type = self.ctype(c.ty);
        let init = match &c.value {
            ConstValue::Bool(b) => format!("{{ .raw = {b} }}"),
            ConstValue::Int(v) => {
                if *v == i64::MIN {
                    "{ .raw = (-9223372036854775807LL - 1) }".to_string()
                } else {
                    format!("{{ .raw = {v}LL }}")
                }
            }
            ConstValue::Uint(v) => format!("{{ .raw = {v}ULL }}"),
            ConstValue::Float(v) => format!("{{ .raw = {} }}", c_float(*v)),
            ConstValue::Complex { re, im } => {
                format!("{{ .raw = {} + {} * I }}", c_float(*re), c_float(*im))
            }
            ConstValue::Str(s) => format!("{{ .raw = \"{}\" }}", c_string_escape(s)),
            // Zero value of a pointer-shaped type.
            ConstValue::Nil => "{0}".to_string(),
        };
        writeln!(self.constants, "static const {c_type} {name} = {init};")?;
        Ok(name)
    }
}
