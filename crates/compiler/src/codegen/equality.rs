//! Structural equality and hashing: `equal_T` / `hash_T` per
//! materialized type.
//!
//! Declarations for the whole universe go out before any type body
//! uses them; definitions follow all type bodies, so mutually
//! recursive structs compile. The same functions back the `is_equal`
//! and `hash` slots of every `TypeInfo` record, which is how the
//! runtime compares map keys and interface payloads.

use std::fmt::Write as _;

use gox_ssa::{BasicKind, Type};

use super::CodeGen;
use super::error::CodeGenError;
use crate::mangle::field_name;
use crate::typegraph::Shape;

impl<'p> CodeGen<'p> {
    /// Prototypes for every visited type.
    pub(crate) fn emit_equality_decls(&mut self) -> Result<(), CodeGenError> {
        writeln!(self.equal_decls, "// Equality and hash declarations")?;
        let names: Vec<String> = self.universe.iter().map(|t| t.name.clone()).collect();
        for name in names {
            writeln!(
                self.equal_decls,
                "bool equal_{name}(const {name}* lhs, const {name}* rhs);"
            )?;
            writeln!(self.equal_decls, "uintptr_t hash_{name}(const {name}* obj);")?;
        }
        writeln!(self.equal_decls)?;
        Ok(())
    }

    /// Definitions, emitted after all type bodies exist.
    pub(crate) fn emit_equality_defs(&mut self) -> Result<(), CodeGenError> {
        writeln!(self.equal_defs, "// Equality and hash definitions")?;
        let entries: Vec<_> = self
            .universe
            .iter()
            .map(|t| (t.name.clone(), t.shape.clone()))
            .collect();
        for (name, shape) in &entries {
            self.emit_equality_for(name, shape)?;
        }
        Ok(())
    }

    fn emit_equality_for(&mut self, name: &str, shape: &Shape) -> Result<(), CodeGenError> {
        let (equal_body, hash_body) = match shape {
            Shape::Basic(kind) => self.basic_equality(*kind),
            Shape::Tuple(elems) => {
                let mut eq = String::new();
                let mut hash = String::from("    uintptr_t h = 0;\n");
                write!(eq, "    return true")?;
                for (i, e) in elems.iter().enumerate() {
                    let ename = self.ctype(*e);
                    write!(eq, "\n        && equal_{ename}(&lhs->raw.e{i}, &rhs->raw.e{i})")?;
                    writeln!(hash, "    h += hash_{ename}(&obj->raw.e{i});")?;
                }
                writeln!(eq, ";")?;
                writeln!(hash, "    return h;")?;
                (eq, hash)
            }
            Shape::Arena(id) => match self.program.ty(*id).clone() {
                Type::Basic(kind) => self.basic_equality(kind),
                Type::Named { underlying, .. } => {
                    let under = self.ctype(underlying);
                    (
                        format!("    return equal_{under}(lhs, rhs);\n"),
                        format!("    return hash_{under}(obj);\n"),
                    )
                }
                Type::Pointer { .. } => (
                    "    return lhs->raw == rhs->raw;\n".to_string(),
                    "    return (uintptr_t)obj->raw;\n".to_string(),
                ),
                Type::Chan { .. } => (
                    "    return lhs->raw == rhs->raw;\n".to_string(),
                    "    return (uintptr_t)obj->raw;\n".to_string(),
                ),
                Type::Map { .. } => (
                    // Identity only; deep map equality stays a runtime
                    // stub.
                    "    return lhs->raw == rhs->raw;\n".to_string(),
                    "    return (uintptr_t)obj->raw;\n".to_string(),
                ),
                Type::Slice { .. } => (
                    "    return lhs->raw.ptr == rhs->raw.ptr;\n".to_string(),
                    "    return (uintptr_t)obj->raw.ptr;\n".to_string(),
                ),
                Type::Signature { .. } => (
                    "    return lhs->func_ptr == rhs->func_ptr && lhs->free_vars == rhs->free_vars;\n"
                        .to_string(),
                    "    return (uintptr_t)obj->func_ptr;\n".to_string(),
                ),
                Type::Interface { .. } => (
                    "    if (lhs->type_id.info != rhs->type_id.info) {\n        return false;\n    }\n    if (lhs->type_id.info == NULL) {\n        return true;\n    }\n    return lhs->type_id.info->is_equal(lhs->receiver, rhs->receiver);\n"
                        .to_string(),
                    "    if (obj->type_id.info == NULL) {\n        return 0;\n    }\n    return obj->type_id.info->hash(obj->receiver);\n"
                        .to_string(),
                ),
                Type::Array { .. } => (
                    "    return memcmp(lhs, rhs, sizeof(*lhs)) == 0;\n".to_string(),
                    "    uintptr_t h = 0;\n    const unsigned char* p = (const unsigned char*)obj;\n    for (size_t i = 0; i < sizeof(*obj); i++) {\n        h = h * 31 + p[i];\n    }\n    return h;\n"
                        .to_string(),
                ),
                Type::Struct { fields } => {
                    let mut eq = String::new();
                    let mut hash = String::from("    uintptr_t h = 0;\n");
                    write!(eq, "    return true")?;
                    for f in &fields {
                        // Blank fields take no part in comparison.
                        if f.name == "_" {
                            continue;
                        }
                        let fname = field_name(&f.name, id.index());
                        let fty = self.ctype(f.ty);
                        write!(eq, "\n        && equal_{fty}(&lhs->{fname}, &rhs->{fname})")?;
                        writeln!(hash, "    h += hash_{fty}(&obj->{fname});")?;
                    }
                    writeln!(eq, ";")?;
                    writeln!(hash, "    return h;")?;
                    (eq, hash)
                }
                Type::Tuple { elems } => {
                    let mut eq = String::new();
                    let mut hash = String::from("    uintptr_t h = 0;\n");
                    write!(eq, "    return true")?;
                    for (i, e) in elems.iter().enumerate() {
                        let ename = self.ctype(*e);
                        write!(eq, "\n        && equal_{ename}(&lhs->raw.e{i}, &rhs->raw.e{i})")?;
                        writeln!(hash, "    h += hash_{ename}(&obj->raw.e{i});")?;
                    }
                    writeln!(eq, ";")?;
                    writeln!(hash, "    return h;")?;
                    (eq, hash)
                }
            },
        };
        writeln!(
            self.equal_defs,
            "bool equal_{name}(const {name}* lhs, const {name}* rhs) {{"
        )?;
        self.equal_defs.push_str(&equal_body);
        writeln!(self.equal_defs, "}}")?;
        writeln!(self.equal_defs, "uintptr_t hash_{name}(const {name}* obj) {{")?;
        self.equal_defs.push_str(&hash_body);
        writeln!(self.equal_defs, "}}")?;
        Ok(())
    }

    fn basic_equality(&self, kind: BasicKind) -> (String, String) {
        match kind {
            BasicKind::String => (
                "    if (lhs->raw == rhs->raw) {\n        return true;\n    }\n    if (lhs->raw == NULL || rhs->raw == NULL) {\n        return false;\n    }\n    return strcmp(lhs->raw, rhs->raw) == 0;\n"
                    .to_string(),
                "    return obj->raw == NULL ? 0 : gox5_string_hash(obj->raw);\n".to_string(),
            ),
            BasicKind::Complex64 | BasicKind::Complex128 => (
                "    return creal(lhs->raw) == creal(rhs->raw) && cimag(lhs->raw) == cimag(rhs->raw);\n"
                    .to_string(),
                "    return (uintptr_t)creal(obj->raw) + (uintptr_t)cimag(obj->raw);\n".to_string(),
            ),
            BasicKind::UnsafePointer => (
                "    return lhs->raw == rhs->raw;\n".to_string(),
                "    return (uintptr_t)obj->raw;\n".to_string(),
            ),
            _ => (
                "    return lhs->raw == rhs->raw;\n".to_string(),
                "    return (uintptr_t)obj->raw;\n".to_string(),
            ),
        }
    }
}
