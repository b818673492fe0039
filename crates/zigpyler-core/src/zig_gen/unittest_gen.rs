//! Unittest scaffolding (component E).
//!
//! Test classes are collected and run sequentially on one thread: the
//! generated runtime keeps exception messages in thread-local storage,
//! so interleaving tests would cross their failure text. Each test
//! method gets a context struct, a runner that brackets it with
//! `setUp`/`tearDown` and stores PASS/FAIL into a shared result slot,
//! and one report line in source-declaration order.

use anyhow::Result;
use zigpyler_hir::scope::child_scope;
use zigpyler_hir::{HirDecorator, HirExpr, Literal};

use super::context::ZigBackend;
use crate::class_registry::ClassInfo;

/// Assertions that delegate one-to-one to runtime helpers.
const SIMPLE_ASSERTIONS: &[&str] = &[
    "assertEqual",
    "assertNotEqual",
    "assertTrue",
    "assertFalse",
    "assertIsNone",
    "assertIsNotNone",
    "assertGreater",
    "assertGreaterEqual",
    "assertLess",
    "assertLessEqual",
    "assertIn",
    "assertNotIn",
    "assertAlmostEqual",
    "assertCountEqual",
];

impl ZigBackend<'_> {
    /// Whether this statement-position call is a test assertion that the
    /// dispatcher owns.
    pub(crate) fn is_assertion_call(&self, func: &HirExpr) -> bool {
        let HirExpr::Attribute { value, attr } = func else {
            return false;
        };
        if !matches!(&**value, HirExpr::Var(n) if n == "self") {
            return false;
        }
        let in_test_class = self
            .current_class
            .as_ref()
            .and_then(|c| self.classes.get(c))
            .is_some_and(|c| c.is_test_case);
        in_test_class
            && (attr.starts_with("assert") || attr == "fail" || attr == "skipTest")
    }

    /// Statement-level assertion dispatch: simple forms delegate to a
    /// runtime helper of the same name; the specialized cases expand
    /// inline.
    pub(crate) fn emit_assertion_stmt(&mut self, attr: &str, args: &[HirExpr]) -> Result<()> {
        if SIMPLE_ASSERTIONS.contains(&attr) {
            // `assertIs(type(x), T)`-style shapes route through the
            // comptime expansion below; everything else is a helper
            // call.
            if attr == "assertEqual" || attr == "assertIn" {
                if let Some(HirExpr::Call { func, args: inner, .. }) = args.first() {
                    if matches!(&**func, HirExpr::Var(n) if n == "type") {
                        return self.emit_type_assertion(&inner[0], &args[1]);
                    }
                }
            }
            let parts = self.emit_all(args)?;
            let call = self.propagate(format!(
                "py.unittest.{attr}({})",
                parts.join(", ")
            ));
            self.out.line(&format!("{call};"));
            return Ok(());
        }
        match attr {
            "assertIs" | "assertIsNot" => {
                if let Some(HirExpr::Call { func, args: inner, .. }) = args.first() {
                    if matches!(&**func, HirExpr::Var(n) if n == "type") {
                        return self.emit_type_assertion(&inner[0], &args[1]);
                    }
                }
                let parts = self.emit_all(args)?;
                let helper = if attr == "assertIs" {
                    "assertEqual"
                } else {
                    "assertNotEqual"
                };
                let call = self.propagate(format!(
                    "py.unittest.{helper}({})",
                    parts.join(", ")
                ));
                self.out.line(&format!("{call};"));
                Ok(())
            }
            "assertIsInstance" => {
                let value = self.emit_expr(&args[0])?;
                let ty = self.type_operand_text(&args[1]);
                let call = self.propagate(format!(
                    "py.unittest.assertTrue(@TypeOf({value}) == {ty})"
                ));
                self.out.line(&format!("{call};"));
                Ok(())
            }
            "assertRaises" | "assertRaisesRegex" => self.emit_assert_raises(attr, args),
            "fail" => {
                if let Some(msg) = args.first() {
                    let text = self.emit_expr(msg)?;
                    self.out.line(&format!("py.setExcMessage(.{{ {text} }});"));
                }
                self.emit_test_failure();
                Ok(())
            }
            "skipTest" => {
                let reason = match args.first() {
                    Some(m) => self.emit_expr(m)?,
                    None => "\"\"".to_string(),
                };
                self.out.line(&format!("py.setExcMessage(.{{ {reason} }});"));
                match self.catch_ctx.clone() {
                    Some(ctx) => {
                        self.out.line(&format!("{} = error.SkipTest;", ctx.exc_var));
                        self.out.line(&format!("break :{};", ctx.label));
                    }
                    None => self.out.line("return error.SkipTest;"),
                }
                Ok(())
            }
            other => {
                self.warn(format!("unknown assertion {other} delegated to runtime"));
                let parts = self.emit_all(args)?;
                let call = self.propagate(format!(
                    "py.unittest.{other}({})",
                    parts.join(", ")
                ));
                self.out.line(&format!("{call};"));
                Ok(())
            }
        }
    }

    fn emit_type_assertion(&mut self, value: &HirExpr, expected: &HirExpr) -> Result<()> {
        let v = self.emit_expr(value)?;
        let ty = self.type_operand_text(expected);
        let call = self.propagate(format!("py.unittest.assertTrue(@TypeOf({v}) == {ty})"));
        self.out.line(&format!("{call};"));
        Ok(())
    }

    fn type_operand_text(&self, expected: &HirExpr) -> String {
        match expected {
            HirExpr::Var(name) => match name.as_str() {
                "int" => "i64".to_string(),
                "float" => "f64".to_string(),
                "bool" => "bool".to_string(),
                "str" => "[]const u8".to_string(),
                other => other.to_string(),
            },
            _ => "py.PyValue".to_string(),
        }
    }

    /// `assertRaises(Exc, callable, args…)` builds the invocation with
    /// the shared callable dispatch and asserts it errors.
    fn emit_assert_raises(&mut self, attr: &str, args: &[HirExpr]) -> Result<()> {
        if args.len() < 2 {
            // Context-manager form is out of reach of this lowering.
            self.warn(format!("{attr} without a callable argument"));
            self.out.line("_ = py.unsupported(\"assertRaises\");");
            return Ok(());
        }
        let exc_name = match &args[0] {
            HirExpr::Var(n) => n.clone(),
            other => other.dotted_name().unwrap_or_else(|| "Exception".to_string()),
        };
        // assertRaisesRegex carries the pattern between the exception
        // and the callable.
        let (callee, call_args) = if attr == "assertRaisesRegex" {
            (&args[2], &args[3..])
        } else {
            (&args[1], &args[2..])
        };
        let invocation = self.emit_callable(callee, call_args, &[])?;

        // A non-error invocation cannot raise: the assertion fails.
        if !invocation.starts_with("try ") && !invocation.contains("catch |__e|") {
            self.warn(format!(
                "{attr}: callee cannot fail; the assertion is reported as failing"
            ));
            self.emit_test_failure();
            return Ok(());
        }
        let bare = invocation
            .strip_prefix("try ")
            .map(str::to_string)
            .unwrap_or(invocation);
        let err = self.fresh_temp("raised");
        self.out.open(&format!("if ({bare}) |_|"));
        self.emit_test_failure();
        self.out.chain(&format!("else |{err}|"));
        let match_test = if exc_name == "Exception" {
            "true".to_string()
        } else {
            format!("{err} == error.{exc_name}")
        };
        self.out.open(&format!("if (!({match_test}))"));
        self.emit_test_failure();
        self.out.close();
        self.out.close();
        Ok(())
    }

    fn emit_test_failure(&mut self) {
        match self.catch_ctx.clone() {
            Some(ctx) => {
                self.out
                    .line(&format!("{} = error.AssertionError;", ctx.exc_var));
                self.out.line(&format!("break :{};", ctx.label));
            }
            None => self.out.line("return error.AssertionError;"),
        }
    }

    // ------------------------------------------------------------------
    // Runner generation
    // ------------------------------------------------------------------

    /// Per-test context struct, per-test runner functions, and the
    /// sequential `__run_tests` entry.
    pub(crate) fn emit_test_harness(&mut self) -> Result<()> {
        self.out.open("const __TestCtx = struct");
        self.out.line("alloc: std.mem.Allocator,");
        self.out.line("result: *py.unittest.Result,");
        self.out.close_with(";");
        self.out.blank();

        let test_classes: Vec<ClassInfo> = self.classes.test_cases().cloned().collect();
        for class in &test_classes {
            for method in self.test_methods(&class.name) {
                self.emit_test_runner_fn(class, &method)?;
            }
        }

        self.out
            .open("fn __run_tests(__alloc: std.mem.Allocator) !void");
        self.out
            .line("var __results = py.unittest.Results.init(__alloc);");
        for class in &test_classes {
            self.emit_class_test_block(class)?;
        }
        self.out.line("__results.printReport();");
        // Summary plus conventional non-zero exit when anything failed.
        self.out.line("py.unittest.finalize(&__results);");
        self.out.close();
        self.out.blank();
        Ok(())
    }

    fn test_methods(&self, class: &str) -> Vec<String> {
        self.classes
            .hir(class)
            .map(|hir| {
                hir.methods
                    .iter()
                    .filter(|m| m.name.starts_with("test"))
                    .map(|m| m.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn class_has_method(&self, class: &str, method: &str) -> bool {
        self.classes
            .hir(class)
            .is_some_and(|hir| hir.method(method).is_some())
    }

    fn method_call_text(&self, class: &str, inst: &str, method: &str) -> String {
        let path = child_scope(&child_scope("", class), method);
        let traits = self.traits.traits(&path);
        if traits.needs_allocator {
            format!("{inst}.{method}(__ctx.alloc)")
        } else {
            format!("{inst}.{method}()")
        }
    }

    fn method_is_fallible(&self, class: &str, method: &str) -> bool {
        let path = child_scope(&child_scope("", class), method);
        let traits = self.traits.traits(&path);
        traits.needs_error_union || traits.needs_allocator
    }

    fn emit_test_runner_fn(&mut self, class: &ClassInfo, method: &str) -> Result<()> {
        let class_name = &class.name;
        self.out.open(&format!(
            "fn __test_{class_name}_{method}(__ctx: __TestCtx, __inst: *{class_name}) void"
        ));

        if self.class_has_method(class_name, "setUp") {
            let call = self.method_call_text(class_name, "__inst", "setUp");
            if self.method_is_fallible(class_name, "setUp") {
                self.out.line(&format!(
                    "{call} catch {{ __ctx.result.store(.fail); return; }};"
                ));
            } else {
                self.out.line(&format!("{call};"));
            }
        }

        let call = self.method_call_text(class_name, "__inst", method);
        if self.method_is_fallible(class_name, method) {
            let r = self.fresh_temp("r");
            self.out.line(&format!("const {r} = {call};"));
            self.out.open(&format!("if ({r}) |_|"));
            self.out.line("__ctx.result.store(.pass);");
            let err = self.fresh_temp("err");
            self.out.chain(&format!("else |{err}|"));
            self.out
                .line(&format!("if ({err} == error.SkipTest) __ctx.result.store(.skip) else {{"));
            self.out.line(&format!("    py.unittest.recordError({err});"));
            self.out.line("    __ctx.result.store(.fail);");
            self.out.line("}");
            self.out.close();
        } else {
            self.out.line(&format!("{call};"));
            self.out.line("__ctx.result.store(.pass);");
        }

        if self.class_has_method(class_name, "tearDown") {
            let call = self.method_call_text(class_name, "__inst", "tearDown");
            if self.method_is_fallible(class_name, "tearDown") {
                self.out
                    .line(&format!("{call} catch {{ __ctx.result.store(.fail); }};"));
            } else {
                self.out.line(&format!("{call};"));
            }
        }
        self.out.close();
        self.out.blank();
        Ok(())
    }

    fn emit_class_test_block(&mut self, class: &ClassInfo) -> Result<()> {
        let class_name = class.name.clone();
        self.out.open_block();

        if self.class_has_method(&class_name, "setUpClass") {
            let path = child_scope(&child_scope("", &class_name), "setUpClass");
            let traits = self.traits.traits(&path);
            let call = if traits.needs_allocator {
                format!("{class_name}.setUpClass(__alloc)")
            } else {
                format!("{class_name}.setUpClass()")
            };
            if traits.needs_error_union || traits.needs_allocator {
                self.out.line(&format!("try {call};"));
            } else {
                self.out.line(&format!("{call};"));
            }
        }

        // One shared instance per class, rebuilt per test via setUp.
        let inst = self.fresh_temp("inst");
        let init_path = child_scope(&child_scope("", &class_name), "__init__");
        let init_traits = self.traits.traits(&init_path);
        let init_needs_alloc = init_traits.needs_allocator
            || self
                .classes
                .get(&class_name)
                .is_some_and(|c| !c.dynamic_fields.is_empty());
        let init_call = if init_needs_alloc {
            format!("{class_name}.init(__alloc)")
        } else {
            format!("{class_name}.init()")
        };
        if init_traits.needs_error_union || init_needs_alloc {
            self.out.line(&format!("var {inst} = try {init_call};"));
        } else {
            self.out.line(&format!("var {inst} = {init_call};"));
        }

        for method in self.test_methods(&class_name) {
            let method_hir = self
                .classes
                .hir(&class_name)
                .and_then(|c| c.method(&method))
                .cloned();
            let report_name = format!("test_{class_name}_{method}");
            // Statically honored skip decorators short-circuit the run.
            if let Some(hir) = &method_hir {
                if let Some(reason) = self.static_skip_reason(&hir.decorators) {
                    self.out.line(&format!(
                        "try __results.recordSkip(\"{report_name}\", \"{}\");",
                        super::expr_gen::escape_string(&reason)
                    ));
                    continue;
                }
            }
            let slot = self.fresh_temp("slot");
            self.out
                .line(&format!("var {slot} = py.unittest.Result{{}};"));
            self.out.line(&format!(
                "__test_{class_name}_{method}(.{{ .alloc = __alloc, .result = &{slot} }}, &{inst});"
            ));
            self.out.line(&format!(
                "try __results.record(\"{report_name}\", &{slot});"
            ));
        }

        if self.class_has_method(&class_name, "tearDownClass") {
            let path = child_scope(&child_scope("", &class_name), "tearDownClass");
            let traits = self.traits.traits(&path);
            let call = if traits.needs_allocator {
                format!("{class_name}.tearDownClass(__alloc)")
            } else {
                format!("{class_name}.tearDownClass()")
            };
            if traits.needs_error_union || traits.needs_allocator {
                self.out.line(&format!("try {call};"));
            } else {
                self.out.line(&format!("{call};"));
            }
        }
        self.out.close();
        Ok(())
    }

    /// A skip decorator whose condition is statically known: literal
    /// booleans and `module is None` checks against the known-skipped
    /// set.
    fn static_skip_reason(&self, decorators: &[HirDecorator]) -> Option<String> {
        for decorator in decorators {
            let name = decorator.name.as_str();
            if name == "unittest.skip" || name == "skip" {
                return Some(decorator_reason(decorator, 0));
            }
            if name == "unittest.skipIf" || name == "skipIf" {
                let cond = decorator.args.first()?;
                if self.decorator_condition_true(cond) {
                    return Some(decorator_reason(decorator, 1));
                }
            }
        }
        None
    }

    fn decorator_condition_true(&self, cond: &HirExpr) -> bool {
        match cond {
            HirExpr::Literal(Literal::Bool(b)) => *b,
            // `module is None` resolves against the known-skipped set.
            HirExpr::Compare {
                left,
                ops,
                comparators,
            } => {
                if let (HirExpr::Var(module), Some(zigpyler_hir::CmpOp::Is)) =
                    (&**left, ops.first().copied())
                {
                    if matches!(
                        comparators.first(),
                        Some(HirExpr::Literal(Literal::None))
                    ) {
                        return self.imports.is_skipped(module);
                    }
                }
                false
            }
            _ => false,
        }
    }
}

fn decorator_reason(decorator: &HirDecorator, index: usize) -> String {
    match decorator.args.get(index) {
        Some(HirExpr::Literal(Literal::Str(s))) => s.clone(),
        _ => "skipped".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_assertion_table_covers_the_common_forms() {
        for name in ["assertEqual", "assertTrue", "assertIn", "assertAlmostEqual"] {
            assert!(SIMPLE_ASSERTIONS.contains(&name));
        }
        assert!(!SIMPLE_ASSERTIONS.contains(&"assertRaises"));
    }

    #[test]
    fn decorator_reason_extraction() {
        let deco = HirDecorator {
            name: "unittest.skipIf".to_string(),
            args: vec![
                HirExpr::Literal(Literal::Bool(true)),
                HirExpr::Literal(Literal::Str("not ported".to_string())),
            ],
            kwargs: vec![],
        };
        assert_eq!(decorator_reason(&deco, 1), "not ported");
    }
}
