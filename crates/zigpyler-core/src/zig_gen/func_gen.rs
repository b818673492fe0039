//! Signature generation and function emission (component D).
//!
//! Every function and method gets exactly one signature line; the
//! decisions run in a fixed order: decorator kind, self parameter,
//! allocator parameter, positional parameter types through the priority
//! chain, vararg/kwarg forms, then the return type with its error-union
//! prefix.

use anyhow::Result;
use indexmap::IndexSet;
use zigpyler_hir::scope::child_scope;
use zigpyler_hir::{HirExpr, HirFunction, HirStmt, NativeType, ParamKind};

use super::context::ZigBackend;
use crate::class_registry::{collect_free_names_in_body, function_bindings, ClassInfo};

/// How the receiver parameter is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelfMode {
    None,
    Const,
    Mutable,
}

/// Fixed return types for magic methods; `(type text, forces error
/// union)`.
fn magic_return(name: &str) -> Option<(&'static str, bool)> {
    Some(match name {
        "__bool__" => ("bool", true),
        "__len__" => ("i64", true),
        "__hash__" => ("i64", false),
        "__repr__" | "__str__" => ("[]const u8", false),
        "__int__" => ("i64", true),
        "__float__" => ("f64", true),
        "__eq__" | "__ne__" | "__lt__" | "__le__" | "__gt__" | "__ge__" | "__contains__" => {
            ("bool", false)
        }
        "__init__" | "__enter__" | "__exit__" => return None,
        _ => return None,
    })
}

/// Whether a magic method's fixed return shape carries an error union.
pub(crate) fn magic_forces_error(name: &str) -> bool {
    magic_return(name).is_some_and(|(_, forced)| forced)
}

pub(crate) struct Signature {
    pub head: String,
    pub has_alloc: bool,
    pub optional_params: Vec<(String, String)>,
    pub self_unused: bool,
}

impl ZigBackend<'_> {
    /// Emit one top-level function definition.
    pub(crate) fn emit_function(&mut self, func: &HirFunction) -> Result<()> {
        let path = child_scope("", &func.name);
        if func.is_async {
            return self.emit_async_function(func, &path);
        }
        let decl = format!("fn {}", func.name);
        self.emit_function_at(func, &path, SelfMode::None, None, &decl)
    }

    /// Emit a function body under an explicit path/receiver; shared by
    /// methods, inherited re-emission and async impls.
    pub(crate) fn emit_function_at(
        &mut self,
        func: &HirFunction,
        path: &str,
        self_mode: SelfMode,
        class: Option<&ClassInfo>,
        decl: &str,
    ) -> Result<()> {
        for decorator in &func.decorators {
            match decorator.name.as_str() {
                "staticmethod" | "classmethod" | "property" => {}
                name if name.starts_with("unittest.") => {}
                name => {
                    self.warn(format!(
                        "decorator @{name} on {} is not applied",
                        func.name
                    ));
                }
            }
        }
        if let Some(doc) = &func.docstring {
            for line in doc.lines().take(3) {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    self.out.line(&format!("/// {trimmed}"));
                }
            }
        }

        let signature = self.build_signature(func, path, self_mode, class, decl)?;
        self.out.open(&signature.head);

        let saved_scope = std::mem::replace(&mut self.scope, path.to_string());
        let saved_fn_err = self.current_fn_has_error_union;
        let saved_fn_alloc = self.current_fn_has_alloc;
        let saved_globals = std::mem::take(&mut self.global_decls);
        let traits = self.traits.traits(path);
        self.current_fn_has_error_union = traits.needs_error_union;
        self.current_fn_has_alloc = signature.has_alloc;
        self.declared.enter();

        if signature.self_unused && self_mode != SelfMode::None {
            self.out.line("_ = &self;");
        }
        // Optional parameters resolve their defaults up front.
        for (name, default) in &signature.optional_params {
            self.out
                .line(&format!("const {name} = {name}__opt orelse {default};"));
            self.declared.declare(name);
        }
        for param in &func.params {
            let ident = self.ident(&param.name);
            self.declared.declare(&ident);
        }
        self.predeclare_walrus_targets(&func.body)?;

        let is_generator = traits.is_generator;
        if is_generator {
            let elem = match self.types.return_type(path) {
                Some(NativeType::List(elem)) => elem.refined(),
                _ => NativeType::int(),
            };
            let elem_ty = self.zig_type(&elem);
            self.out
                .line(&format!("var __yield_acc = std.ArrayList({elem_ty}).init(__alloc);"));
            self.in_generator = true;
            self.yield_acc = "__yield_acc".to_string();
        }

        self.emit_body(&func.body)?;

        if is_generator {
            if !matches!(func.body.last(), Some(HirStmt::Return(_))) {
                self.out.line("return __yield_acc;");
            }
            self.in_generator = false;
            self.yield_acc.clear();
        }

        self.declared.exit();
        self.scope = saved_scope;
        self.current_fn_has_error_union = saved_fn_err;
        self.current_fn_has_alloc = saved_fn_alloc;
        self.global_decls = saved_globals;
        self.out.close();
        self.out.blank();
        Ok(())
    }

    pub(crate) fn build_signature(
        &mut self,
        func: &HirFunction,
        path: &str,
        mut self_mode: SelfMode,
        class: Option<&ClassInfo>,
        decl: &str,
    ) -> Result<Signature> {
        let traits = self.traits.traits(path);

        // 1. Decorator kind.
        if func.has_decorator("staticmethod") || func.has_decorator("classmethod") {
            self_mode = SelfMode::None;
        }

        let mut params = Vec::new();
        let mut self_unused = false;

        // 2. Self parameter.
        if self_mode != SelfMode::None {
            let mutates = class
                .and_then(|c| c.method_mutates_self.get(&func.name))
                .copied()
                .unwrap_or(false)
                || traits.mutates_self;
            let self_ty = if mutates { "*@This()" } else { "*const @This()" };
            params.push(format!("self: {self_ty}"));
            self_unused = !body_reads_self(&func.body);
        }

        // 3. Allocator parameter.
        let has_alloc = traits.needs_allocator;
        if has_alloc {
            params.push("__alloc: std.mem.Allocator".to_string());
        }

        // 4. Positional parameters through the priority chain, then
        // 5. vararg/kwarg forms.
        let mut optional_params = Vec::new();
        let mut position = 0usize;
        for param in &func.params {
            if param.name == "self" || param.name == "cls" {
                continue;
            }
            let (decl, optional) = self.positional_param_decl(path, param, position)?;
            if param.kind == ParamKind::Positional {
                position += 1;
            }
            params.push(decl);
            if let Some(opt) = optional {
                optional_params.push(opt);
            }
        }

        // 6. Return type: the magic-method table wins and may force the
        // error union on its own.
        let (ret, forced_error) = match magic_return(&func.name) {
            Some((text, forced)) => (text.to_string(), forced),
            None => (self.return_type_text(func, path, class, &traits), false),
        };
        let prefix = if traits.needs_error_union || forced_error {
            "!"
        } else {
            ""
        };
        let head = format!("{decl}({}) {prefix}{ret}", params.join(", "));
        Ok(Signature {
            head,
            has_alloc,
            optional_params,
            self_unused,
        })
    }

    /// One parameter declaration: the first of explicit annotation,
    /// call-site union, inferred scoped type, default-value type, or the
    /// literal-string-comparison flag decides the type; defaults become
    /// optional.
    pub(crate) fn positional_param_decl(
        &mut self,
        path: &str,
        param: &zigpyler_hir::HirParam,
        position: usize,
    ) -> Result<(String, Option<(String, String)>)> {
        match param.kind {
            ParamKind::Vararg => {
                return Ok((format!("{}: []const i64", param.name), None));
            }
            ParamKind::Kwarg => {
                return Ok((format!("{}: py.KwArgs", param.name), None));
            }
            ParamKind::Positional => {}
        }
        let usage = self.usage.usage(path, &param.name);
        let ty = if usage.is_used_as_callable
            || usage.is_used_as_iterator
            || usage.is_used_in_type_check
        {
            // Callable/iterator/type-check positions escalate to the
            // target's generic parameter form.
            "anytype".to_string()
        } else if let Some(annotation) = &param.annotation {
            self.zig_type(&annotation.refined())
        } else if let Some(from_calls) = self
            .types
            .call_args
            .get(path)
            .and_then(|u| u.get(position))
            .cloned()
        {
            if from_calls.is_unknown() {
                self.param_fallback_type(path, param)
            } else {
                self.zig_type(&from_calls.refined())
            }
        } else {
            self.param_fallback_type(path, param)
        };
        match &param.default {
            Some(default) if ty != "anytype" => {
                let default_text = self.emit_expr(default)?;
                Ok((
                    format!("{}__opt: ?{ty}", param.name),
                    Some((param.name.clone(), default_text)),
                ))
            }
            _ => Ok((format!("{}: {ty}", param.name), None)),
        }
    }

    fn param_fallback_type(&self, path: &str, param: &zigpyler_hir::HirParam) -> String {
        let usage = self.usage.usage(path, &param.name);
        // A parameter compared against string constants is a string.
        if usage.is_compared_to_string_literal {
            return "[]const u8".to_string();
        }
        let scoped = self.types.var_type(path, &param.name);
        if !scoped.is_unknown() {
            return self.zig_type(&scoped.refined());
        }
        if let Some(default) = &param.default {
            let ty = self.expr_type(default);
            if !ty.is_unknown() {
                return self.zig_type(&ty.refined());
            }
        }
        "i64".to_string()
    }

    fn return_type_text(
        &mut self,
        func: &HirFunction,
        path: &str,
        class: Option<&ClassInfo>,
        traits: &zigpyler_analysis::FunctionTraits,
    ) -> String {
        if let Some(annotation) = &func.ret_annotation {
            if matches!(annotation, NativeType::None) {
                return "void".to_string();
            }
            return self.zig_type(&annotation.refined());
        }
        if traits.returns_self {
            return match class {
                Some(info) if info.is_nested => "*@This()".to_string(),
                _ => "@This()".to_string(),
            };
        }
        if let Some(inner) = &traits.returned_nested_function {
            return closure_struct_name(&child_scope(path, inner));
        }
        if let Some(ctor) = &traits.returns_constructor {
            let nested = self.classes.get(ctor).is_some_and(|c| c.is_nested);
            return if nested {
                format!("*{ctor}")
            } else {
                ctor.clone()
            };
        }
        if let Some(ret) = self.types.return_type(path) {
            return self.zig_type(&ret.refined());
        }
        if traits.has_value_return {
            return "i64".to_string();
        }
        "void".to_string()
    }

    /// Walrus targets are assignments embedded in expressions; the
    /// target must exist as a mutable binding before the expression
    /// runs.
    fn predeclare_walrus_targets(&mut self, body: &[HirStmt]) -> Result<()> {
        let mut targets = IndexSet::new();
        collect_walrus_targets_body(body, &mut targets);
        for name in targets {
            let ident = self.ident(&name);
            if self.declared.is_declared(&ident) {
                continue;
            }
            let ty = self.types.var_type(&self.scope, &name).refined();
            let zig_ty = self.zig_type(&ty);
            self.declared.declare(&ident);
            self.out.line(&format!("var {ident}: {zig_ty} = undefined;"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Nested functions
    // ------------------------------------------------------------------

    /// A nested `def` binds a closure instance of its pre-declared
    /// file-scope struct.
    pub(crate) fn emit_nested_function(&mut self, func: &HirFunction) -> Result<()> {
        let path = child_scope(&self.scope, &func.name);
        let struct_name = closure_struct_name(&path);
        let captures = self.nested_captures(func);
        let mut inits = Vec::new();
        for name in &captures {
            let value = self.read_ident(name);
            inits.push(format!(".__captured_{name} = {value}"));
        }
        let ident = self.ident(&func.name);
        self.declared.declare(&ident);
        if inits.is_empty() {
            self.out
                .line(&format!("const {ident} = {struct_name}{{}};"));
        } else {
            self.out.line(&format!(
                "const {ident} = {struct_name}{{ {} }};",
                inits.join(", ")
            ));
        }
        Ok(())
    }

    /// Free names of a nested function that resolve to the enclosing
    /// function scope, in discovery order.
    pub(crate) fn nested_captures(&self, func: &HirFunction) -> Vec<String> {
        let bound = function_bindings(func);
        let mut free = Vec::new();
        collect_free_names_in_body(&func.body, &mut free);
        let mut captures = Vec::new();
        for name in free {
            if bound.contains(&name) || captures.contains(&name) {
                continue;
            }
            if self.types.scoped.get_local(&self.scope, &name).is_some() {
                captures.push(name);
            }
        }
        captures
    }

    /// Pre-declare the file-scope closure structs for every nested
    /// function in the module.
    pub(crate) fn emit_closure_decls(&mut self) -> Result<()> {
        let module = self.module;
        let mut work: Vec<(String, HirFunction)> = Vec::new();
        for stmt in &module.body {
            if let HirStmt::FunctionDef(func) = stmt {
                collect_nested_functions(&child_scope("", &func.name), &func.body, &mut work);
            }
            if let HirStmt::ClassDef(class) = stmt {
                for method in &class.methods {
                    collect_nested_functions(
                        &child_scope(&child_scope("", &class.name), &method.name),
                        &method.body,
                        &mut work,
                    );
                }
            }
        }
        for (outer_scope, func) in work {
            self.emit_closure_struct(&outer_scope, &func)?;
        }
        Ok(())
    }

    fn emit_closure_struct(&mut self, outer_scope: &str, func: &HirFunction) -> Result<()> {
        let path = child_scope(outer_scope, &func.name);
        let struct_name = closure_struct_name(&path);

        // Captures relative to the enclosing function.
        let bound = function_bindings(func);
        let mut free = Vec::new();
        collect_free_names_in_body(&func.body, &mut free);
        let mut captures = Vec::new();
        for name in free {
            if bound.contains(&name) || captures.contains(&name) {
                continue;
            }
            if self.types.scoped.get_local(outer_scope, &name).is_some() {
                captures.push(name);
            }
        }

        self.out.open(&format!("const {struct_name} = struct"));
        let mut substs = Vec::new();
        for name in &captures {
            let ty = self.types.var_type(outer_scope, name).refined();
            let zig_ty = self.zig_type(&ty);
            self.out.line(&format!("__captured_{name}: {zig_ty},"));
            substs.push((name.clone(), format!("__c.__captured_{name}")));
        }
        if !captures.is_empty() {
            self.out.blank();
        }

        // The call method carries the nested function's real signature,
        // with the receiver renamed to dodge any outer `self`.
        let signature = self.build_signature(func, &path, SelfMode::None, None, "pub fn call")?;
        let head = signature
            .head
            .replacen("pub fn call(", "pub fn call(__c: *const @This(), ", 1)
            .replace("(__c: *const @This(), )", "(__c: *const @This())");

        let depth = self.name_subst.len();
        self.name_subst.extend(substs);

        self.out.open(&head);
        let saved_scope = std::mem::replace(&mut self.scope, path.clone());
        let saved_err = self.current_fn_has_error_union;
        let traits = self.traits.traits(&path);
        self.current_fn_has_error_union = traits.needs_error_union;
        self.declared.enter();
        for (name, default) in &signature.optional_params {
            self.out
                .line(&format!("const {name} = {name}__opt orelse {default};"));
            self.declared.declare(name);
        }
        self.emit_body(&func.body)?;
        self.declared.exit();
        self.scope = saved_scope;
        self.current_fn_has_error_union = saved_err;
        self.out.close();
        self.name_subst.truncate(depth);
        self.out.close_with(";");
        self.out.blank();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Async variants
    // ------------------------------------------------------------------

    /// Async functions emit an eager implementation plus a spawn
    /// wrapper. The wrapper's shape is chosen once per module: a
    /// cooperative-scheduler task when any async function does real I/O,
    /// a thread spawn otherwise.
    fn emit_async_function(&mut self, func: &HirFunction, path: &str) -> Result<()> {
        let decl = format!("fn {}", func.name);
        self.emit_function_at(func, path, SelfMode::None, None, &decl)?;

        let params: Vec<String> = func
            .params
            .iter()
            .map(|p| format!("{}: i64", p.name))
            .collect();
        let forwarded: Vec<String> = func.params.iter().map(|p| p.name.clone()).collect();
        let traits = self.traits.traits(path);
        let mut call_args = Vec::new();
        if traits.needs_allocator {
            call_args.push("__alloc".to_string());
        }
        call_args.extend(forwarded);

        let mut wrapper_params = vec!["__alloc: std.mem.Allocator".to_string()];
        wrapper_params.extend(params);

        if self.async_state_machine {
            self.out.open(&format!(
                "fn {}__task({}) !*py.sched.Task",
                func.name,
                wrapper_params.join(", ")
            ));
            self.out.line(&format!(
                "return py.sched.spawn(__alloc, {}, .{{ {} }});",
                func.name,
                call_args.join(", ")
            ));
        } else {
            self.out.open(&format!(
                "fn {}__spawn({}) !std.Thread",
                func.name,
                wrapper_params.join(", ")
            ));
            self.out.line(&format!(
                "return std.Thread.spawn(.{{}}, {}, .{{ {} }});",
                func.name,
                call_args.join(", ")
            ));
        }
        self.out.close();
        self.out.blank();
        Ok(())
    }
}

pub(crate) fn closure_struct_name(path: &str) -> String {
    format!("__Closure_{}", path.replace('/', "_"))
}

fn collect_nested_functions(scope: &str, body: &[HirStmt], out: &mut Vec<(String, HirFunction)>) {
    for stmt in body {
        match stmt {
            HirStmt::FunctionDef(func) => {
                out.push((scope.to_string(), func.clone()));
                collect_nested_functions(&child_scope(scope, &func.name), &func.body, out);
            }
            HirStmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_nested_functions(scope, then_body, out);
                if let Some(b) = else_body {
                    collect_nested_functions(scope, b, out);
                }
            }
            HirStmt::For { body, orelse, .. } | HirStmt::While { body, orelse, .. } => {
                collect_nested_functions(scope, body, out);
                collect_nested_functions(scope, orelse, out);
            }
            _ => {}
        }
    }
}

fn body_reads_self(body: &[HirStmt]) -> bool {
    let mut free = Vec::new();
    collect_free_names_in_body(body, &mut free);
    free.iter().any(|n| n == "self")
}

fn collect_walrus_targets_body(body: &[HirStmt], out: &mut IndexSet<String>) {
    fn visit_expr(expr: &HirExpr, out: &mut IndexSet<String>) {
        match expr {
            HirExpr::NamedExpr { target, value } => {
                out.insert(target.clone());
                visit_expr(value, out);
            }
            HirExpr::Binary { left, right, .. } => {
                visit_expr(left, out);
                visit_expr(right, out);
            }
            HirExpr::Unary { operand, .. } => visit_expr(operand, out),
            HirExpr::Bool { values, .. } => values.iter().for_each(|v| visit_expr(v, out)),
            HirExpr::Compare {
                left, comparators, ..
            } => {
                visit_expr(left, out);
                comparators.iter().for_each(|c| visit_expr(c, out));
            }
            HirExpr::Call { func, args, .. } => {
                visit_expr(func, out);
                args.iter().for_each(|a| visit_expr(a, out));
            }
            _ => {}
        }
    }
    for stmt in body {
        match stmt {
            HirStmt::Assign { value, .. } | HirStmt::AugAssign { value, .. } => {
                visit_expr(value, out);
            }
            HirStmt::Expr(e) | HirStmt::Return(Some(e)) => visit_expr(e, out),
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                visit_expr(condition, out);
                collect_walrus_targets_body(then_body, out);
                if let Some(b) = else_body {
                    collect_walrus_targets_body(b, out);
                }
            }
            HirStmt::While {
                condition,
                body,
                orelse,
            } => {
                visit_expr(condition, out);
                collect_walrus_targets_body(body, out);
                collect_walrus_targets_body(orelse, out);
            }
            HirStmt::For { body, orelse, .. } => {
                collect_walrus_targets_body(body, out);
                collect_walrus_targets_body(orelse, out);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_method_table() {
        assert_eq!(magic_return("__len__"), Some(("i64", true)));
        assert_eq!(magic_return("__repr__"), Some(("[]const u8", false)));
        assert_eq!(magic_return("__eq__"), Some(("bool", false)));
        assert_eq!(magic_return("__init__"), None);
        assert_eq!(magic_return("regular"), None);
    }

    #[test]
    fn closure_names_flatten_scope_paths() {
        assert_eq!(closure_struct_name("outer/inner"), "__Closure_outer_inner");
        assert_eq!(
            closure_struct_name("C/m/helper"),
            "__Closure_C_m_helper"
        );
    }
}
