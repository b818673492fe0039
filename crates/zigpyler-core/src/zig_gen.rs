//! Zig source emission: the backend that walks the typed module and
//! streams one target source file.
//!
//! Components D (signatures) and E (statements/expressions) live in the
//! submodules; this root drives module-level emission order, the
//! file-scope binding split for module globals, and the program entry
//! point that dispatches to `__user_main` or the generated test runner.

pub mod assign_gen;
pub mod callable;
pub mod class_gen;
pub mod context;
pub mod expr_gen;
pub mod func_gen;
pub mod keywords;
pub mod stmt_gen;
pub mod type_gen;
pub mod unittest_gen;

use anyhow::Result;
use tracing::debug;
use zigpyler_analysis::{ModuleTypes, TraitsTable, UsageTable};
use zigpyler_hir::{AssignTarget, HirExpr, HirModule, HirStmt, Literal};

use crate::class_registry::ClassRegistry;
use crate::import_registry::ImportRegistry;

pub use context::ZigBackend;
pub use type_gen::zig_type_plain;

/// Emit one module as Zig source text.
pub fn emit_module(
    module: &HirModule,
    types: &ModuleTypes,
    usage: &UsageTable,
    traits: &TraitsTable,
    classes: &ClassRegistry,
    imports: &ImportRegistry,
) -> Result<String> {
    let mut backend = ZigBackend::new(module, types, usage, traits, classes, imports);
    backend.run()
}

impl ZigBackend<'_> {
    fn run(&mut self) -> Result<String> {
        // Annotation conflicts surface in the comment stream; the
        // annotation already won during inference.
        for conflict in &self.types.annotation_conflicts.clone() {
            self.warn(format!(
                "annotation for `{}` in `{}` overrides inferred {} with {}",
                conflict.name,
                if conflict.scope.is_empty() {
                    "<module>"
                } else {
                    conflict.scope.as_str()
                },
                conflict.inferred,
                conflict.annotated,
            ));
        }

        self.collect_file_scope_names();
        let consumed = self.emit_file_scope_bindings()?;
        self.emit_closure_decls()?;

        // Function-local classes hoist to file scope so signatures can
        // name them; their capture fields carry the enclosing state.
        let hoisted: Vec<String> = self
            .classes
            .iter()
            .filter(|(_, info)| info.is_nested && info.parent_class.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        for name in hoisted {
            self.emit_class(&name)?;
        }

        let mut user_main: Vec<&HirStmt> = Vec::new();
        let body: Vec<HirStmt> = self.module.body.clone();
        for (index, stmt) in body.iter().enumerate() {
            match stmt {
                HirStmt::FunctionDef(func) => self.emit_function(func)?,
                HirStmt::ClassDef(class) => self.emit_class(&class.name)?,
                other => {
                    if consumed.contains(&index) || is_unittest_main_call(other) {
                        continue;
                    }
                    user_main.push(other);
                }
            }
        }

        let has_tests = self.classes.has_test_cases();
        let has_user_main = !user_main.is_empty();
        if has_user_main {
            self.emit_user_main(&user_main)?;
        }
        if has_tests {
            self.emit_test_harness()?;
        }
        self.emit_main(has_tests, has_user_main);

        debug!(
            warnings = self.warnings.len(),
            tests = has_tests,
            "module emission complete"
        );
        Ok(self.assemble())
    }

    /// Module-level symbol bindings become file-scope declarations so
    /// functions can read (and, through `global`, write) them.
    fn collect_file_scope_names(&mut self) {
        for stmt in &self.module.body {
            match stmt {
                HirStmt::Assign { targets, .. } => {
                    for target in targets {
                        collect_symbols(target, &mut self.file_scope_names);
                    }
                }
                HirStmt::AnnAssign { target, .. } | HirStmt::AugAssign { target, .. } => {
                    collect_symbols(target, &mut self.file_scope_names);
                }
                _ => {}
            }
        }
    }

    /// Returns the indices of module statements consumed as direct
    /// file-scope bindings.
    fn emit_file_scope_bindings(&mut self) -> Result<indexmap::IndexSet<usize>> {
        let body: Vec<HirStmt> = self.module.body.clone();
        let mut pending_blank = false;
        let mut consumed = indexmap::IndexSet::new();
        let mut declared = indexmap::IndexSet::new();
        for (index, stmt) in body.iter().enumerate() {
            match stmt {
                // Literal initializers bind directly at file scope with
                // the one-shot initializer; later writes stay in
                // `__user_main`.
                HirStmt::Assign { targets, value }
                    if is_file_scope_literal_binding(stmt)
                        && targets[0]
                            .as_symbol()
                            .is_some_and(|n| !declared.contains(n)) =>
                {
                    let Some(name) = targets[0].as_symbol() else {
                        continue;
                    };
                    declared.insert(name.to_string());
                    consumed.insert(index);
                    let usage = self.usage.usage("", name);
                    let keyword = if usage.is_mutated { "var" } else { "const" };
                    let ty = self.expr_type(value);
                    let annotation = match &ty {
                        t if matches!(
                            t,
                            zigpyler_hir::NativeType::Int(zigpyler_hir::IntKind::Unbounded)
                                | zigpyler_hir::NativeType::BigInt
                        ) =>
                        {
                            format!(": {}", self.zig_type(t))
                        }
                        _ => String::new(),
                    };
                    let text = self.emit_expr(value)?;
                    self.out
                        .line(&format!("{keyword} {name}{annotation} = {text};"));
                    pending_blank = true;
                }
                // Everything else declares the slot; the value arrives
                // in `__user_main`.
                HirStmt::Assign { targets, .. } => {
                    for target in targets {
                        self.emit_undefined_slot(target, &mut declared);
                    }
                    pending_blank = true;
                }
                HirStmt::AnnAssign { target, .. } => {
                    self.emit_undefined_slot(target, &mut declared);
                    pending_blank = true;
                }
                _ => {}
            }
        }
        if pending_blank {
            self.out.blank();
        }
        Ok(consumed)
    }

    fn emit_undefined_slot(
        &mut self,
        target: &AssignTarget,
        declared: &mut indexmap::IndexSet<String>,
    ) {
        match target {
            AssignTarget::Symbol(name) => {
                if !declared.insert(name.clone()) {
                    return;
                }
                let ty = self.types.var_type("", name).refined();
                let zig_ty = self.zig_type(&ty);
                self.out.line(&format!("var {name}: {zig_ty} = undefined;"));
            }
            AssignTarget::Tuple(parts) => {
                for part in parts {
                    self.emit_undefined_slot(part, declared);
                }
            }
            _ => {}
        }
    }

    fn emit_user_main(&mut self, statements: &[&HirStmt]) -> Result<()> {
        self.out
            .open("fn __user_main(__alloc: std.mem.Allocator) !void");
        self.scope = String::new();
        self.current_fn_has_error_union = true;
        self.current_fn_has_alloc = true;
        self.declared.enter();
        self.out.line("_ = &__alloc;");
        for stmt in statements {
            self.emit_stmt(stmt)?;
        }
        self.declared.exit();
        self.out.close();
        self.out.blank();
        Ok(())
    }

    fn emit_main(&mut self, has_tests: bool, has_user_main: bool) {
        self.out.open("pub fn main() !void");
        self.out
            .line("var __gpa = std.heap.GeneralPurposeAllocator(.{}){};");
        self.out.line("defer _ = __gpa.deinit();");
        self.out.line("const __alloc = __gpa.allocator();");
        if has_tests {
            // Unittest entry: the runner owns the process outcome.
            self.out.line("try __run_tests(__alloc);");
        } else if has_user_main {
            self.out.line("try __user_main(__alloc);");
        } else {
            self.out.line("_ = __alloc;");
        }
        self.out.close();
    }

    fn assemble(&mut self) -> String {
        let mut file = String::new();
        file.push_str("// Generated by zigpyler. Do not edit.\n");
        for warning in &self.warnings {
            file.push_str(&format!("// warning: {warning}\n"));
        }
        file.push('\n');
        file.push_str("const std = @import(\"std\");\n");
        file.push_str("const py = @import(\"runtime.zig\");\n");
        file.push('\n');
        file.push_str(std::mem::take(&mut self.out).finish().as_str());
        file
    }
}

fn collect_symbols(target: &AssignTarget, out: &mut indexmap::IndexSet<String>) {
    match target {
        AssignTarget::Symbol(name) => {
            out.insert(name.clone());
        }
        AssignTarget::Tuple(parts) => parts.iter().for_each(|p| collect_symbols(p, out)),
        _ => {}
    }
}

/// `x = <literal>` at module level gets a direct file-scope binding.
fn is_file_scope_literal_binding(stmt: &HirStmt) -> bool {
    let HirStmt::Assign { targets, value } = stmt else {
        return false;
    };
    targets.len() == 1
        && targets[0].as_symbol().is_some()
        && matches!(
            value,
            HirExpr::Literal(
                Literal::Int(_) | Literal::Float(_) | Literal::Str(_) | Literal::Bool(_)
            )
        )
}

/// `unittest.main()` has no meaning under AOT compilation; the entry
/// point dispatches to the generated runner instead.
fn is_unittest_main_call(stmt: &HirStmt) -> bool {
    let HirStmt::Expr(HirExpr::Call { func, .. }) = stmt else {
        return false;
    };
    func.dotted_name().as_deref() == Some("unittest.main")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_binding_detection() {
        let literal = HirStmt::Assign {
            targets: vec![AssignTarget::Symbol("x".to_string())],
            value: HirExpr::Literal(Literal::Int(1)),
        };
        assert!(is_file_scope_literal_binding(&literal));

        let call = HirStmt::Assign {
            targets: vec![AssignTarget::Symbol("x".to_string())],
            value: HirExpr::Call {
                func: Box::new(HirExpr::Var("f".to_string())),
                args: vec![],
                kwargs: vec![],
            },
        };
        assert!(!is_file_scope_literal_binding(&call));
    }

    #[test]
    fn unittest_main_detection() {
        let stmt = HirStmt::Expr(HirExpr::Call {
            func: Box::new(HirExpr::Attribute {
                value: Box::new(HirExpr::Var("unittest".to_string())),
                attr: "main".to_string(),
            }),
            args: vec![],
            kwargs: vec![],
        });
        assert!(is_unittest_main_call(&stmt));
    }
}
