//! Interface tables and type-info records.
//!
//! Every materialized type gets a `TypeInfo` (name, method table,
//! equality, hash, size), and `MakeInterface` lowerings pass its
//! address as the boxed value's type id. Dispatch is a linear search
//! of `(method name, function object)` entries; the table holds the
//! methods the program actually defines whose receiver is exactly
//! this type (interface-satisfying value receivers reach the table
//! through bound-method thunks, which carry their own receiver).

use std::fmt::Write as _;

use super::CodeGen;
use super::error::CodeGenError;

impl<'p> CodeGen<'p> {
    pub(crate) fn emit_interface_tables(&mut self) -> Result<(), CodeGenError> {
        writeln!(self.tables, "// Interface tables and type-info records")?;
        let entries: Vec<String> = self.universe.iter().map(|t| t.name.clone()).collect();
        for name in &entries {
            // Methods whose receiver mints this type's name.
            let mut methods: Vec<(String, String)> = Vec::new();
            for (id, func) in self.program.functions.iter().enumerate() {
                if !func.recv {
                    continue;
                }
                let Some(recv) = func.params.first() else {
                    continue;
                };
                if &self.mint.type_name(recv.ty) == name {
                    methods.push((func.name.clone(), self.mint.function_name(id as u32)));
                }
            }

            let table = if methods.is_empty() {
                "NULL".to_string()
            } else {
                writeln!(
                    self.tables,
                    "static const InterfaceTableEntry interfaceTable_{name}[] = {{"
                )?;
                for (method_name, fname) in &methods {
                    writeln!(
                        self.tables,
                        "    {{ \"{method_name}\", {{ .func_ptr = {fname}, .free_vars = NULL }} }},"
                    )?;
                }
                writeln!(self.tables, "}};")?;
                format!("interfaceTable_{name}")
            };

            writeln!(
                self.tables,
                "static const TypeInfo runtime_info_type_{name} = {{"
            )?;
            writeln!(self.tables, "    .name = \"{name}\",")?;
            writeln!(self.tables, "    .num_methods = {},", methods.len())?;
            writeln!(self.tables, "    .interface_table = {table},")?;
            writeln!(self.tables, "    .is_equal = (GoxEqualFunc)equal_{name},")?;
            writeln!(self.tables, "    .hash = (GoxHashFunc)hash_{name},")?;
            writeln!(self.tables, "    .size = sizeof({name}),")?;
            writeln!(self.tables, "}};")?;
        }
        writeln!(self.tables)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::CodeGen;
    use crate::config::EmitterConfig;
    use gox_ssa::build::{FunctionBuilder, ProgramBuilder};
    use gox_ssa::{BasicKind, InstrKind};

    #[test]
    fn test_every_visited_type_gets_one_type_info() {
        let program = ProgramBuilder::new("main").finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.emit_interface_tables().unwrap();
        assert_eq!(
            cg.tables.matches("static const TypeInfo").count(),
            gox_ssa::BasicKind::universe().len()
        );
        assert!(cg.tables.contains("runtime_info_type_IntObject"));
        assert!(cg.tables.contains(".is_equal = (GoxEqualFunc)equal_IntObject,"));
        assert!(cg.tables.contains(".size = sizeof(IntObject),"));
    }

    #[test]
    fn test_method_table_holds_defined_methods() {
        let mut b = ProgramBuilder::new("main");
        let int = b.basic(BasicKind::Int);
        let named = b.named("Counter", int);
        let recv_ptr = b.pointer(named);
        b.global("c", recv_ptr);
        let sig = b.signature(Some(recv_ptr), vec![], vec![int]);
        let mut m = FunctionBuilder::new("Value", sig)
            .rel_name("(*main.Counter).Value")
            .recv("c", recv_ptr);
        let b0 = m.block();
        m.effect(
            b0,
            InstrKind::Return {
                results: vec![gox_ssa::build::int_const(int, 0)],
            },
        );
        b.function(m);
        let program = b.finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.emit_interface_tables().unwrap();
        let ptr_name = cg.mint.type_name(recv_ptr);
        assert!(cg.tables.contains(&format!("interfaceTable_{ptr_name}[]")));
        assert!(cg.tables.contains("{ \"Value\", {"));
        assert!(cg.tables.contains(".num_methods = 1,"));
    }

    #[test]
    fn test_methodless_type_has_null_table() {
        let program = ProgramBuilder::new("main").finish();
        let mut cg = CodeGen::new(&program, EmitterConfig::default());
        cg.emit_interface_tables().unwrap();
        assert!(cg.tables.contains(".interface_table = NULL,"));
        assert!(!cg.tables.contains("interfaceTable_IntObject"));
    }
}
