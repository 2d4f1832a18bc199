//! Type emitter: C records for every materialized SL type.
//!
//! Three passes over the visited universe:
//!
//! 1. **Tags**: `typedef` forward declarations, so that any record
//!    may mention any other by name.
//! 2. **Pointer bodies**: `struct Pointer<T> { T* raw; };` before
//!    every other body, which is what lets self- and mutually
//!    referential structs close their cycles: a struct body only ever
//!    needs a *completed pointer*, never a completed target.
//! 3. **Bodies**: everything else, emitted in containment order
//!    (an array body needs its element complete, a struct body needs
//!    its fields complete).
//!
//! Every generated type is a wrapper around its storage so that
//! `x.raw` is the universal access idiom; slices wrap a union giving
//! both the runtime's untyped view and a typed `ptr/size/capacity`
//! view.

use std::collections::HashSet;
use std::fmt::Write as _;

use gox_ssa::{Type, TypeId};

use super::CodeGen;
use super::error::CodeGenError;
use crate::mangle::field_name;
use crate::typegraph::Shape;

impl<'p> CodeGen<'p> {
    /// Pass 1: forward declarations.
    pub(crate) fn emit_type_tags(&mut self) -> Result<(), CodeGenError> {
        writeln!(self.tags, "// Type forward declarations")?;
        let mut emitted: HashSet<String> = HashSet::new();
        let entries: Vec<_> = self
            .universe
            .iter()
            .map(|t| (t.name.clone(), t.shape.clone()))
            .collect();
        for (name, shape) in &entries {
            self.emit_tag(name, shape, &mut emitted)?;
        }
        writeln!(self.tags)?;
        Ok(())
    }

    fn emit_tag(
        &mut self,
        name: &str,
        shape: &Shape,
        emitted: &mut HashSet<String>,
    ) -> Result<(), CodeGenError> {
        if !emitted.insert(name.to_string()) {
            return Ok(());
        }
        match shape {
            // Built-in shapes come from the prologue.
            Shape::Basic(_) => {}
            Shape::Tuple(_) => writeln!(self.tags, "typedef struct {name} {name};")?,
            Shape::Arena(id) => match self.program.ty(*id) {
                Type::Basic(_) | Type::Interface { .. } | Type::Signature { .. } => {}
                Type::Slice { .. } => writeln!(self.tags, "typedef union {name} {name};")?,
                Type::Named { underlying, .. } => {
                    // The alias target's tag must exist first.
                    let under_name = self.ctype(*underlying);
                    let under_shape = match self.program.ty(*underlying) {
                        Type::Basic(k) => Shape::Basic(*k),
                        _ => Shape::Arena(*underlying),
                    };
                    self.emit_tag(&under_name, &under_shape, emitted)?;
                    writeln!(self.tags, "typedef {under_name} {name};")?;
                }
                Type::Array { .. }
                | Type::Struct { .. }
                | Type::Pointer { .. }
                | Type::Chan { .. }
                | Type::Map { .. }
                | Type::Tuple { .. } => {
                    writeln!(self.tags, "typedef struct {name} {name};")?
                }
            },
        }
        Ok(())
    }

    /// Passes 2 and 3: pointer bodies first, then everything else in
    /// containment order.
    pub(crate) fn emit_type_bodies(&mut self) -> Result<(), CodeGenError> {
        let entries: Vec<_> = self
            .universe
            .iter()
            .map(|t| (t.name.clone(), t.shape.clone()))
            .collect();

        writeln!(self.pointer_bodies, "// Pointer bodies")?;
        let mut complete: HashSet<String> = HashSet::new();
        for (name, shape) in &entries {
            if let Shape::Arena(id) = shape {
                if let Type::Pointer { elem } = self.program.ty(*id) {
                    let elem_name = self.ctype(*elem);
                    writeln!(self.pointer_bodies, "struct {name} {{ {elem_name}* raw; }};")?;
                    complete.insert(name.clone());
                }
            }
        }
        writeln!(self.pointer_bodies)?;

        writeln!(self.type_bodies, "// Type bodies")?;
        for (name, shape) in &entries {
            self.emit_body(name, shape, &mut complete)?;
        }
        writeln!(self.type_bodies)?;
        Ok(())
    }

    fn emit_body(
        &mut self,
        name: &str,
        shape: &Shape,
        complete: &mut HashSet<String>,
    ) -> Result<(), CodeGenError> {
        if complete.contains(name) {
            return Ok(());
        }
        complete.insert(name.to_string());
        match shape {
            Shape::Basic(_) => {}
            Shape::Tuple(elems) => {
                let elems = elems.clone();
                self.emit_tuple_body(name, &elems, complete)?;
            }
            Shape::Arena(id) => {
                let id = *id;
                match self.program.ty(id).clone() {
                    Type::Basic(_)
                    | Type::Interface { .. }
                    | Type::Signature { .. }
                    | Type::Pointer { .. } => {}
                    Type::Named { underlying, .. } => {
                        // An alias is complete exactly when its target is.
                        self.ensure_complete(underlying, complete)?;
                    }
                    Type::Chan { .. } => {
                        writeln!(self.type_bodies, "struct {name} {{ ChannelObject* raw; }};")?;
                    }
                    Type::Map { .. } => {
                        writeln!(self.type_bodies, "struct {name} {{ MapObject* raw; }};")?;
                    }
                    Type::Slice { elem } => {
                        let elem_name = self.ctype(elem);
                        writeln!(
                            self.type_bodies,
                            "union {name} {{\n    SliceObject raw;\n    struct {{ {elem_name}* ptr; size_t size; size_t capacity; }} typed;\n}};"
                        )?;
                    }
                    Type::Array { elem, len } => {
                        self.ensure_complete(elem, complete)?;
                        let elem_name = self.ctype(elem);
                        writeln!(self.type_bodies, "struct {name} {{ {elem_name} raw[{len}]; }};")?;
                    }
                    Type::Struct { fields } => {
                        for f in &fields {
                            self.ensure_complete(f.ty, complete)?;
                        }
                        if fields.is_empty() {
                            writeln!(self.type_bodies, "struct {name} {{ char raw; }};")?;
                        } else {
                            writeln!(self.type_bodies, "struct {name} {{")?;
                            for f in &fields {
                                let fname = field_name(&f.name, id.index());
                                let fty = self.ctype(f.ty);
                                writeln!(self.type_bodies, "    {fty} {fname};")?;
                            }
                            writeln!(self.type_bodies, "}};")?;
                        }
                    }
                    Type::Tuple { elems } => {
                        self.emit_tuple_body(name, &elems, complete)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_tuple_body(
        &mut self,
        name: &str,
        elems: &[TypeId],
        complete: &mut HashSet<String>,
    ) -> Result<(), CodeGenError> {
        for e in elems {
            self.ensure_complete(*e, complete)?;
        }
        writeln!(self.type_bodies, "struct {name} {{")?;
        writeln!(self.type_bodies, "    struct {{")?;
        for (i, e) in elems.iter().enumerate() {
            let ety = self.ctype(*e);
            writeln!(self.type_bodies, "        {ety} e{i};")?;
        }
        writeln!(self.type_bodies, "    }} raw;")?;
        writeln!(self.type_bodies, "}};")?;
        Ok(())
    }

    /// Emit the body of `id` (and anything it contains by value)
    /// before the caller's own body.
    fn ensure_complete(
        &mut self,
        id: TypeId,
        complete: &mut HashSet<String>,
    ) -> Result<(), CodeGenError> {
        let name = self.ctype(id);
        if complete.contains(&name) {
            return Ok(());
        }
        let shape = match self.program.ty(id) {
            Type::Basic(k) => Shape::Basic(*k),
            _ => Shape::Arena(id),
        };
        self.emit_body(&name, &shape, complete)
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::CodeGen;
    use crate::config::EmitterConfig;
    use gox_ssa::build::ProgramBuilder;
    use gox_ssa::{BasicKind, Type};

    fn emit_types(program: &gox_ssa::Program) -> (String, String, String) {
        let mut cg = CodeGen::new(program, EmitterConfig::default());
        cg.emit_type_tags().unwrap();
        cg.emit_type_bodies().unwrap();
        (cg.tags, cg.pointer_bodies, cg.type_bodies)
    }

    #[test]
    fn test_slice_is_a_union_with_both_views() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let sl = b.slice(int);
        b.global("xs", sl);
        let program = b.finish();
        let (tags, _, bodies) = emit_types(&program);
        assert!(tags.contains("typedef union Slice_3C_IntObject_3E_ Slice_3C_IntObject_3E_;"));
        assert!(bodies.contains("union Slice_3C_IntObject_3E_ {"));
        assert!(bodies.contains("SliceObject raw;"));
        assert!(bodies.contains("struct { IntObject* ptr; size_t size; size_t capacity; } typed;"));
    }

    #[test]
    fn test_pointer_bodies_precede_struct_bodies() {
        // type Node struct { next *Node }
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let strukt = b.strukt(vec![("next", int)]);
        let named = b.named("Node", strukt);
        let ptr = b.pointer(named);
        let mut program = b.finish();
        if let Type::Struct { fields } = &mut program.types[strukt.index()] {
            fields[0].ty = ptr;
        }
        let (tags, pointers, bodies) = emit_types(&program);
        assert!(tags.contains("typedef struct"));
        // The pointer body exists and the struct body refers to it by
        // typedef name.
        assert!(pointers.contains("* raw; };"));
        assert!(bodies.contains("struct Struct_3C_next_24_Pointer_3C_Named_3C_main_2E_Node"));
    }

    #[test]
    fn test_named_typedef_follows_its_target_tag() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let arr = b.array(int, 4);
        let named = b.named("Window", arr);
        b.global("w", named);
        let program = b.finish();
        let (tags, _, bodies) = emit_types(&program);
        let arr_tag = tags
            .find("typedef struct Array_3C_IntObject_24_4_3E_ Array_3C_IntObject_24_4_3E_;")
            .unwrap();
        let named_tag = tags.find("typedef Array_3C_IntObject_24_4_3E_ Named_3C_").unwrap();
        assert!(arr_tag < named_tag);
        assert!(bodies.contains("struct Array_3C_IntObject_24_4_3E_ { IntObject raw[4]; };"));
    }

    #[test]
    fn test_array_element_body_precedes_array_body() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let inner = b.strukt(vec![("x", int)]);
        let arr = b.array(inner, 2);
        b.global("grid", arr);
        let program = b.finish();
        let (_, _, bodies) = emit_types(&program);
        let inner_pos = bodies.find("struct Struct_3C_x_24_IntObject_3E_ {").unwrap();
        let arr_pos = bodies.find("struct Array_3C_").unwrap();
        assert!(inner_pos < arr_pos);
    }

    #[test]
    fn test_reserved_field_is_renamed() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let strukt = b.strukt(vec![("_", int), ("default", int)]);
        b.global("g", strukt);
        let program = b.finish();
        let (_, _, bodies) = emit_types(&program);
        assert!(!bodies.contains("IntObject default;"));
        assert!(bodies.contains("IntObject _"));
        assert!(bodies.contains("IntObject default_"));
    }
}
