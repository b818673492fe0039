//! Bridge between the Python AST and the zigpyler HIR.
//!
//! The backend proper never touches `rustpython_ast` shapes; everything
//! it consumes goes through this module. Conversion is total: constructs
//! the backend cannot lower become `Unsupported` markers rather than
//! aborting the module.

use anyhow::Result;
use rustpython_ast::{self as ast};
use tracing::debug;
use zigpyler_hir::{HirClass, HirField, HirFunction, HirModule, HirStmt, Import, ImportItem};

mod converters;
mod type_extraction;

pub use converters::{ExprConverter, StmtConverter};
pub use type_extraction::TypeExtractor;

use converters::{convert_body, convert_decorator, convert_parameters};
use type_extraction::TypeExtractor as Types;

/// Converts a parsed Python module into the HIR the backend consumes.
pub struct AstBridge {
    source_name: String,
}

impl Default for AstBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl AstBridge {
    pub fn new() -> Self {
        Self {
            source_name: "<module>".to_string(),
        }
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Parse Python source and convert it in one step.
    pub fn parse_module(&self, source: &str) -> Result<HirModule> {
        let parsed = rustpython_parser::parse(source, rustpython_parser::Mode::Module, &self.source_name)
            .map_err(|e| anyhow::anyhow!("parse error: {e}"))?;
        self.python_to_hir(parsed)
    }

    pub fn python_to_hir(&self, module: ast::Mod) -> Result<HirModule> {
        let ast::Mod::Module(module) = module else {
            anyhow::bail!("expected a module");
        };

        let mut imports = Vec::new();
        let mut body = Vec::new();
        let mut first = true;

        for stmt in module.body {
            match stmt {
                ast::Stmt::Import(i) => imports.extend(convert_import(i)),
                ast::Stmt::ImportFrom(i) => imports.extend(convert_import_from(i)),
                // The module docstring is not an executable statement.
                ast::Stmt::Expr(e) if first && is_string_constant(&e.value) => {}
                // `if __name__ == "__main__":` blocks run unconditionally
                // under AOT compilation; inline their bodies.
                ast::Stmt::If(if_stmt) if is_name_main_guard(&if_stmt) => {
                    body.extend(convert_body(if_stmt.body)?);
                }
                other => body.push(StmtConverter::convert(other)?),
            }
            first = false;
        }

        debug!(
            source = %self.source_name,
            imports = imports.len(),
            statements = body.len(),
            "bridged module"
        );
        Ok(HirModule { imports, body })
    }
}

pub(crate) fn convert_function(func: ast::StmtFunctionDef, is_async: bool) -> Result<HirFunction> {
    let name = func.name.to_string();
    let params = convert_parameters(&func.args)?;
    let ret_annotation = Types::extract_return_type(&func.returns)?;
    let decorators = func
        .decorator_list
        .iter()
        .map(convert_decorator)
        .collect::<Result<Vec<_>>>()?;
    let (docstring, body) = extract_docstring_and_body(func.body)?;

    Ok(HirFunction {
        name,
        params: params.into(),
        body,
        ret_annotation,
        decorators,
        is_async,
        docstring,
    })
}

pub(crate) fn convert_async_function(func: ast::StmtAsyncFunctionDef) -> Result<HirFunction> {
    let name = func.name.to_string();
    let params = convert_parameters(&func.args)?;
    let ret_annotation = Types::extract_return_type(&func.returns)?;
    let decorators = func
        .decorator_list
        .iter()
        .map(convert_decorator)
        .collect::<Result<Vec<_>>>()?;
    let (docstring, body) = extract_docstring_and_body(func.body)?;

    Ok(HirFunction {
        name,
        params: params.into(),
        body,
        ret_annotation,
        decorators,
        is_async: true,
        docstring,
    })
}

pub(crate) fn convert_class(class: ast::StmtClassDef) -> Result<HirClass> {
    let name = class.name.to_string();
    let bases = class
        .bases
        .iter()
        .filter_map(|b| match b {
            ast::Expr::Name(n) => Some(n.id.to_string()),
            ast::Expr::Attribute(a) => ExprConverter::convert(b.clone())
                .ok()
                .and_then(|e| e.dotted_name())
                .or_else(|| Some(a.attr.to_string())),
            _ => None,
        })
        .collect();
    let decorators = class
        .decorator_list
        .iter()
        .map(convert_decorator)
        .collect::<Result<Vec<_>>>()?;

    let mut fields = Vec::new();
    let mut methods = Vec::new();
    let mut nested = Vec::new();
    let mut docstring = None;
    let mut first = true;

    for stmt in class.body {
        match stmt {
            ast::Stmt::Expr(e) if first && is_string_constant(&e.value) => {
                if let ast::Expr::Constant(c) = e.value.as_ref() {
                    if let ast::Constant::Str(s) = &c.value {
                        docstring = Some(s.to_string());
                    }
                }
            }
            ast::Stmt::FunctionDef(f) => methods.push(convert_function(f, false)?),
            ast::Stmt::AsyncFunctionDef(f) => methods.push(convert_async_function(f)?),
            ast::Stmt::ClassDef(c) => nested.push(convert_class(c)?),
            ast::Stmt::Assign(a) => {
                if let Some(ast::Expr::Name(n)) = a.targets.first() {
                    fields.push(HirField {
                        name: n.id.to_string(),
                        annotation: None,
                        default: Some(ExprConverter::convert(a.value.as_ref().clone())?),
                    });
                }
            }
            ast::Stmt::AnnAssign(a) => {
                if let ast::Expr::Name(n) = a.target.as_ref() {
                    fields.push(HirField {
                        name: n.id.to_string(),
                        annotation: Types::extract_type(&a.annotation).ok(),
                        default: a
                            .value
                            .as_ref()
                            .map(|v| ExprConverter::convert(v.as_ref().clone()))
                            .transpose()?,
                    });
                }
            }
            ast::Stmt::Pass(_) => {}
            _ => {}
        }
        first = false;
    }

    Ok(HirClass {
        name,
        bases,
        decorators,
        fields,
        methods,
        nested,
        docstring,
    })
}

fn convert_import(import: ast::StmtImport) -> Vec<Import> {
    import
        .names
        .into_iter()
        .map(|alias| Import {
            module: alias.name.to_string(),
            alias: alias.asname.map(|a| a.to_string()),
            items: vec![],
        })
        .collect()
}

fn convert_import_from(import: ast::StmtImportFrom) -> Vec<Import> {
    let module = import.module.map(|m| m.to_string()).unwrap_or_default();
    let items = import
        .names
        .into_iter()
        .map(|alias| {
            let name = alias.name.to_string();
            match alias.asname {
                Some(asname) => ImportItem::Aliased {
                    name,
                    alias: asname.to_string(),
                },
                None => ImportItem::Named(name),
            }
        })
        .collect();
    vec![Import {
        module,
        alias: None,
        items,
    }]
}

fn is_string_constant(expr: &ast::Expr) -> bool {
    matches!(
        expr,
        ast::Expr::Constant(c) if matches!(c.value, ast::Constant::Str(_))
    )
}

fn is_name_main_guard(if_stmt: &ast::StmtIf) -> bool {
    let ast::Expr::Compare(cmp) = if_stmt.test.as_ref() else {
        return false;
    };
    let left_is_name = matches!(
        cmp.left.as_ref(),
        ast::Expr::Name(n) if n.id.as_str() == "__name__"
    );
    let right_is_main = cmp.comparators.first().is_some_and(|c| {
        matches!(
            c,
            ast::Expr::Constant(k) if matches!(&k.value, ast::Constant::Str(s) if s.as_str() == "__main__")
        )
    });
    left_is_name && right_is_main
}

fn extract_docstring_and_body(
    body: Vec<ast::Stmt>,
) -> Result<(Option<String>, Vec<HirStmt>)> {
    if body.is_empty() {
        return Ok((None, vec![]));
    }
    let docstring = if let ast::Stmt::Expr(expr) = &body[0] {
        if let ast::Expr::Constant(constant) = expr.value.as_ref() {
            if let ast::Constant::Str(s) = &constant.value {
                Some(s.to_string())
            } else {
                None
            }
        } else {
            None
        }
    } else {
        None
    };
    let start = usize::from(docstring.is_some());
    let converted = body
        .into_iter()
        .skip(start)
        .map(StmtConverter::convert)
        .collect::<Result<Vec<_>>>()?;
    Ok((docstring, converted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zigpyler_hir::{AssignTarget, BinOp, CmpOp, HirExpr, Literal, NativeType, ParamKind};

    fn bridge(source: &str) -> HirModule {
        AstBridge::new().parse_module(source).unwrap()
    }

    #[test]
    fn simple_function_conversion() {
        let hir = bridge("def add(a: int, b: int) -> int:\n    return a + b");
        let func = hir.functions().next().unwrap();
        assert_eq!(func.name, "add");
        assert_eq!(func.params.len(), 2);
        assert_eq!(func.params[0].annotation, Some(NativeType::int()));
        assert_eq!(func.ret_annotation, Some(NativeType::int()));
        assert!(matches!(
            func.body[0],
            HirStmt::Return(Some(HirExpr::Binary { op: BinOp::Add, .. }))
        ));
    }

    #[test]
    fn defaults_align_to_trailing_parameters() {
        let hir = bridge("def f(a, b=2, c=3):\n    pass");
        let func = hir.functions().next().unwrap();
        assert!(func.params[0].default.is_none());
        assert!(func.params[1].default.is_some());
        assert!(func.params[2].default.is_some());
    }

    #[test]
    fn varargs_and_kwargs() {
        let hir = bridge("def f(a, *rest, **options):\n    pass");
        let func = hir.functions().next().unwrap();
        assert_eq!(func.params[1].kind, ParamKind::Vararg);
        assert_eq!(func.params[2].kind, ParamKind::Kwarg);
    }

    #[test]
    fn class_with_methods_and_fields() {
        let hir = bridge(
            r#"
class Point:
    """A 2D point."""
    origin = 0

    def __init__(self, x: int):
        self.x = x

    def norm(self) -> int:
        return self.x
"#,
        );
        let class = hir.classes().next().unwrap();
        assert_eq!(class.name, "Point");
        assert_eq!(class.docstring.as_deref(), Some("A 2D point."));
        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.methods.len(), 2);
    }

    #[test]
    fn imports_and_aliases() {
        let hir = bridge("import json\nfrom collections import Counter as C");
        assert_eq!(hir.imports.len(), 2);
        assert_eq!(hir.imports[0].module, "json");
        assert!(matches!(
            &hir.imports[1].items[0],
            ImportItem::Aliased { name, alias } if name == "Counter" && alias == "C"
        ));
    }

    #[test]
    fn name_main_guard_is_inlined() {
        let hir = bridge(
            "def main():\n    pass\n\nif __name__ == \"__main__\":\n    main()",
        );
        // Guard body becomes a plain module-level call.
        assert!(hir.body.iter().any(|s| matches!(
            s,
            HirStmt::Expr(HirExpr::Call { func, .. })
                if matches!(&**func, HirExpr::Var(n) if n == "main")
        )));
    }

    #[test]
    fn augmented_assignment_is_preserved() {
        let hir = bridge("x = 1\nx += 2");
        assert!(matches!(
            &hir.body[1],
            HirStmt::AugAssign {
                target: AssignTarget::Symbol(name),
                op: BinOp::Add,
                ..
            } if name == "x"
        ));
    }

    #[test]
    fn chained_comparison_keeps_all_ops() {
        let hir = bridge("ok = 1 < 2 < 3");
        let HirStmt::Assign { value, .. } = &hir.body[0] else {
            panic!("expected assignment");
        };
        let HirExpr::Compare { ops, comparators, .. } = value else {
            panic!("expected comparison");
        };
        assert_eq!(ops, &vec![CmpOp::Lt, CmpOp::Lt]);
        assert_eq!(comparators.len(), 2);
    }

    #[test]
    fn try_except_structure() {
        let hir = bridge(
            r#"
try:
    x = 1
except ValueError as e:
    x = 2
finally:
    x = 3
"#,
        );
        let HirStmt::Try {
            handlers,
            finalbody,
            ..
        } = &hir.body[0]
        else {
            panic!("expected try");
        };
        assert_eq!(handlers[0].exc_types, vec!["ValueError".to_string()]);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert_eq!(finalbody.len(), 1);
    }

    #[test]
    fn fstring_parts() {
        let hir = bridge("s = f\"count={n}!\"");
        let HirStmt::Assign { value, .. } = &hir.body[0] else {
            panic!("expected assignment");
        };
        let HirExpr::FString(parts) = value else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn oversized_int_literal_becomes_bigint() {
        let hir = bridge("x = 123456789012345678901234567890");
        let HirStmt::Assign { value, .. } = &hir.body[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value,
            HirExpr::Literal(Literal::BigInt(digits)) if digits == "123456789012345678901234567890"
        ));
    }

    #[test]
    fn match_statement_becomes_unsupported_marker() {
        let hir = bridge("match x:\n    case 1:\n        pass");
        assert!(matches!(&hir.body[0], HirStmt::Unsupported(_)));
    }

    #[test]
    fn lambda_and_comprehension() {
        let hir = bridge("f = lambda x: x + 1\nxs = [i * 2 for i in range(3)]");
        assert!(matches!(
            &hir.body[0],
            HirStmt::Assign { value: HirExpr::Lambda { params, .. }, .. } if params.len() == 1
        ));
        assert!(matches!(
            &hir.body[1],
            HirStmt::Assign { value: HirExpr::ListComp { generators, .. }, .. }
                if generators.len() == 1
        ));
    }

    #[test]
    fn decorators_with_arguments() {
        let hir = bridge(
            "import unittest\n\nclass T(unittest.TestCase):\n    @unittest.skipIf(True, \"why\")\n    def test_a(self):\n        pass",
        );
        let class = hir.classes().next().unwrap();
        assert_eq!(class.bases, vec!["unittest.TestCase".to_string()]);
        let deco = &class.methods[0].decorators[0];
        assert_eq!(deco.name, "unittest.skipIf");
        assert_eq!(deco.args.len(), 2);
    }
}
