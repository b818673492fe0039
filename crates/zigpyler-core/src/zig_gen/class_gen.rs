//! Class emission (component C's output side).
//!
//! Every class walks the deterministic state machine
//! `start → fields → init → methods → inherited_methods → done`. Fields
//! come first (captures, then static fields, then the dynamic-attribute
//! dict), then the constructor, then the class's own methods, then
//! re-emitted base methods: the target has no runtime virtual dispatch,
//! so methods a child does not override are copied onto it with the
//! child's receiver type.

use anyhow::Result;
use indexmap::IndexSet;
use zigpyler_hir::scope::child_scope;
use zigpyler_hir::{HirClass, HirExpr, HirFunction, HirStmt, Literal};

use super::context::ZigBackend;
use super::func_gen::SelfMode;
use crate::class_registry::{ClassEmitState, ClassInfo};

impl ZigBackend<'_> {
    /// Emit a module-level class declaration.
    pub(crate) fn emit_class(&mut self, name: &str) -> Result<()> {
        let Some(info) = self.classes.get(name).cloned() else {
            anyhow::bail!("internal invariant breach: class {name} missing from registry");
        };
        let Some(hir) = self.classes.hir(name).cloned() else {
            anyhow::bail!("internal invariant breach: class {name} missing HIR");
        };
        self.out.open(&format!("const {name} = struct"));
        self.emit_class_body(&info, &hir)?;
        self.out.close_with(";");
        self.out.blank();
        Ok(())
    }

    /// A class declared inside a class body: emitted inline (the target
    /// allows struct-in-struct declarations).
    pub(crate) fn emit_local_class(&mut self, class: &HirClass) -> Result<()> {
        let Some(info) = self.classes.get(&class.name).cloned() else {
            anyhow::bail!(
                "internal invariant breach: nested class {} missing from registry",
                class.name
            );
        };
        self.declared.declare(&class.name);
        self.out.open(&format!("const {} = struct", class.name));
        self.emit_class_body(&info, class)?;
        self.out.close_with(";");
        Ok(())
    }

    fn emit_class_body(&mut self, info: &ClassInfo, hir: &HirClass) -> Result<()> {
        let mut state = ClassEmitState::Start;
        let class_scope = child_scope(&info.defined_in_scope, &info.name);
        let saved_class = self.current_class.replace(info.name.clone());

        // References to captured outer variables read the hidden fields.
        let subst_depth = self.name_subst.len();
        for name in info.captures.keys() {
            self.name_subst
                .push((name.clone(), format!("self.__captured_{name}")));
        }

        if let Some(doc) = &hir.docstring {
            if let Some(first) = doc.lines().find(|l| !l.trim().is_empty()) {
                self.out.line(&format!("/// {}", first.trim()));
            }
        }

        state = state.advance()?;
        debug_assert_eq!(state, ClassEmitState::Fields);
        self.emit_field_decls(info, hir)?;

        state = state.advance()?;
        debug_assert_eq!(state, ClassEmitState::Init);
        match hir.method("__init__") {
            Some(init) => {
                let init = init.clone();
                self.emit_init(info, &init, &class_scope)?;
            }
            None => {
                // An inherited constructor re-emits as this class's
                // `init`; otherwise a default constructor keeps every
                // instantiation site uniform.
                let inherited_init = info
                    .inherited_methods
                    .iter()
                    .find(|(m, _)| m == "__init__")
                    .map(|(_, from)| from.clone())
                    .and_then(|from| {
                        self.classes.hir(&from).and_then(|c| {
                            c.method("__init__").cloned().map(|m| (from, m))
                        })
                    });
                match inherited_init {
                    Some((from, init)) => {
                        let base_scope = child_scope(
                            &self
                                .classes
                                .get(&from)
                                .map(|c| c.defined_in_scope.clone())
                                .unwrap_or_default(),
                            &from,
                        );
                        self.emit_init(info, &init, &base_scope)?;
                    }
                    None => self.emit_default_init(info)?,
                }
            }
        }

        state = state.advance()?;
        debug_assert_eq!(state, ClassEmitState::Methods);
        for method in &hir.methods {
            if method.name == "__init__" {
                continue;
            }
            self.emit_method(info, method, &class_scope)?;
        }
        for nested in &hir.nested {
            let nested = nested.clone();
            self.emit_local_class(&nested)?;
        }

        state = state.advance()?;
        debug_assert_eq!(state, ClassEmitState::InheritedMethods);
        self.emit_inherited_methods(info)?;
        self.emit_super_copies(info, hir)?;

        state = state.advance()?;
        debug_assert_eq!(state, ClassEmitState::Done);

        self.name_subst.truncate(subst_depth);
        self.current_class = saved_class;
        Ok(())
    }

    fn emit_field_decls(&mut self, info: &ClassInfo, hir: &HirClass) -> Result<()> {
        // Captured outer variables first, in discovery order; they carry
        // no defaults so every instantiation site must supply them.
        for (name, ty) in &info.captures {
            let zig_ty = self.zig_type(&ty.refined());
            self.out.line(&format!("__captured_{name}: {zig_ty},"));
        }
        for (name, ty) in info.fields.clone() {
            if info.dynamic_fields.contains(&name) {
                continue;
            }
            let zig_ty = self.zig_type(&ty.refined());
            let default = hir
                .fields
                .iter()
                .find(|f| f.name == name)
                .and_then(|f| f.default.as_ref())
                .and_then(literal_default_text);
            match default {
                Some(text) => self.out.line(&format!("{name}: {zig_ty} = {text},")),
                None => self.out.line(&format!("{name}: {zig_ty} = undefined,")),
            }
        }
        if !info.dynamic_fields.is_empty() {
            // Unified-type failures fall back to the per-instance
            // dynamic mapping.
            self.out.line("__dict: py.AttrDict = undefined,");
        }
        self.out.blank();
        Ok(())
    }

    /// Constructor from `__init__`: allocate (for nested classes),
    /// default-initialize, run the user body against `self`, return.
    fn emit_init(
        &mut self,
        info: &ClassInfo,
        init: &HirFunction,
        class_scope: &str,
    ) -> Result<()> {
        let path = child_scope(class_scope, "__init__");
        let traits = self.traits.traits(&path);
        let needs_alloc =
            traits.needs_allocator || info.is_nested || !info.dynamic_fields.is_empty();

        let mut params = Vec::new();
        if needs_alloc {
            params.push("__alloc: std.mem.Allocator".to_string());
        }
        for (name, ty) in &info.captures {
            let zig_ty = self.zig_type(&ty.refined());
            params.push(format!("__captured_{name}: {zig_ty}"));
        }
        let mut optional_params = Vec::new();
        let mut position = 0usize;
        for param in &init.params {
            if param.name == "self" {
                continue;
            }
            let (decl, optional) = self.positional_param_decl(&path, param, position)?;
            position += 1;
            params.push(decl);
            if let Some(opt) = optional {
                optional_params.push(opt);
            }
        }

        let ret = if info.is_nested {
            format!("*{}", info.name)
        } else {
            info.name.clone()
        };
        let fallible = traits.needs_error_union || needs_alloc;
        let prefix = if fallible { "!" } else { "" };
        self.out.open(&format!(
            "pub fn init({}) {prefix}{ret}",
            params.join(", ")
        ));

        let saved_scope = std::mem::replace(&mut self.scope, path.clone());
        let saved_err = self.current_fn_has_error_union;
        self.current_fn_has_error_union = fallible;
        self.declared.enter();
        self.declared.declare("self");

        let capture_inits: Vec<String> = info
            .captures
            .keys()
            .map(|name| format!(".__captured_{name} = __captured_{name}"))
            .collect();
        let init_literal = if capture_inits.is_empty() {
            format!("{}{{}}", info.name)
        } else {
            format!("{}{{ {} }}", info.name, capture_inits.join(", "))
        };
        if info.is_nested {
            let create = self.propagate(format!("__alloc.create({})", info.name));
            self.out.line(&format!("const self = {create};"));
            self.out.line(&format!("self.* = {init_literal};"));
        } else {
            self.out.line(&format!("var self = {init_literal};"));
            self.out.line("_ = &self;");
        }
        if !info.dynamic_fields.is_empty() {
            self.out.line("self.__dict = py.AttrDict.init(__alloc);");
        }
        for (name, default) in &optional_params {
            self.out
                .line(&format!("const {name} = {name}__opt orelse {default};"));
            self.declared.declare(name);
        }
        for param in &init.params {
            self.declared.declare(&param.name);
        }

        self.emit_body(&init.body)?;
        self.out.line("return self;");

        self.declared.exit();
        self.scope = saved_scope;
        self.current_fn_has_error_union = saved_err;
        self.out.close();
        self.out.blank();
        Ok(())
    }

    /// Classes without `__init__` still get a constructor so every
    /// instantiation site has one shape to call.
    fn emit_default_init(&mut self, info: &ClassInfo) -> Result<()> {
        let needs_alloc = info.is_nested || !info.dynamic_fields.is_empty();
        let mut params = Vec::new();
        if needs_alloc {
            params.push("__alloc: std.mem.Allocator".to_string());
        }
        for (name, ty) in &info.captures {
            let zig_ty = self.zig_type(&ty.refined());
            params.push(format!("__captured_{name}: {zig_ty}"));
        }
        let capture_inits: Vec<String> = info
            .captures
            .keys()
            .map(|name| format!(".__captured_{name} = __captured_{name}"))
            .collect();
        let init_literal = if capture_inits.is_empty() {
            format!("{}{{}}", info.name)
        } else {
            format!("{}{{ {} }}", info.name, capture_inits.join(", "))
        };

        if info.is_nested {
            self.out.open(&format!(
                "pub fn init({}) !*{}",
                params.join(", "),
                info.name
            ));
            self.out
                .line(&format!("const self = try __alloc.create({});", info.name));
            self.out.line(&format!("self.* = {init_literal};"));
            if !info.dynamic_fields.is_empty() {
                self.out.line("self.__dict = py.AttrDict.init(__alloc);");
            }
            self.out.line("return self;");
        } else if needs_alloc {
            self.out.open(&format!(
                "pub fn init({}) !{}",
                params.join(", "),
                info.name
            ));
            self.out.line(&format!("var self = {init_literal};"));
            self.out.line("self.__dict = py.AttrDict.init(__alloc);");
            self.out.line("return self;");
        } else {
            self.out
                .open(&format!("pub fn init({}) {}", params.join(", "), info.name));
            self.out.line(&format!("return {init_literal};"));
        }
        self.out.close();
        self.out.blank();
        Ok(())
    }

    pub(crate) fn emit_method(
        &mut self,
        info: &ClassInfo,
        method: &HirFunction,
        class_scope: &str,
    ) -> Result<()> {
        let path = child_scope(class_scope, &method.name);
        let self_mode = if method.has_decorator("staticmethod")
            || method.has_decorator("classmethod")
        {
            SelfMode::None
        } else if info
            .method_mutates_self
            .get(&method.name)
            .copied()
            .unwrap_or(false)
        {
            SelfMode::Mutable
        } else {
            SelfMode::Const
        };

        // `cls` references inside classmethods resolve to the type name.
        let depth = self.name_subst.len();
        if method.has_decorator("classmethod") {
            self.name_subst
                .push(("cls".to_string(), info.name.clone()));
        }
        let decl = format!("pub fn {}", method.name);
        let result = self.emit_function_at(method, &path, self_mode, Some(info), &decl);
        self.name_subst.truncate(depth);
        result
    }

    fn emit_inherited_methods(&mut self, info: &ClassInfo) -> Result<()> {
        for (method_name, from_class) in info.inherited_methods.clone() {
            // The constructor case was already folded into the init
            // stage.
            if method_name == "__init__" {
                continue;
            }
            let Some(base_hir) = self.classes.hir(&from_class) else {
                continue;
            };
            let Some(method) = base_hir.method(&method_name).cloned() else {
                continue;
            };
            let base_scope = child_scope(
                &self
                    .classes
                    .get(&from_class)
                    .map(|c| c.defined_in_scope.clone())
                    .unwrap_or_default(),
                &from_class,
            );
            let info_clone = info.clone();
            self.emit_method(&info_clone, &method, &base_scope)?;
        }
        Ok(())
    }

    /// Methods the child overrides but still reaches through `super()`
    /// re-emit under a `__super_` prefix.
    fn emit_super_copies(&mut self, info: &ClassInfo, hir: &HirClass) -> Result<()> {
        let Some(base) = info.base.clone() else {
            return Ok(());
        };
        let mut super_called: IndexSet<String> = IndexSet::new();
        for method in &hir.methods {
            collect_super_calls(&method.body, &mut super_called);
        }
        for method_name in super_called {
            let Some((owner, base_method)) = self
                .classes
                .resolve_method(&base, &method_name)
                .map(|(o, m)| (o.to_string(), m.clone()))
            else {
                continue;
            };
            let base_scope = child_scope(
                &self
                    .classes
                    .get(&owner)
                    .map(|c| c.defined_in_scope.clone())
                    .unwrap_or_default(),
                &owner,
            );
            let path = child_scope(&base_scope, &method_name);
            let self_mode = if self
                .classes
                .get(&owner)
                .and_then(|c| c.method_mutates_self.get(&method_name))
                .copied()
                .unwrap_or(false)
            {
                SelfMode::Mutable
            } else {
                SelfMode::Const
            };
            let info_clone = info.clone();
            let decl = format!("pub fn __super_{method_name}");
            self.emit_function_at(&base_method, &path, self_mode, Some(&info_clone), &decl)?;
        }
        Ok(())
    }
}

fn literal_default_text(expr: &HirExpr) -> Option<String> {
    match expr {
        HirExpr::Literal(Literal::Int(v)) => Some(v.to_string()),
        HirExpr::Literal(Literal::Float(f)) => Some(super::expr_gen::format_float(*f)),
        HirExpr::Literal(Literal::Bool(b)) => Some(b.to_string()),
        HirExpr::Literal(Literal::Str(s)) => {
            Some(format!("\"{}\"", super::expr_gen::escape_string(s)))
        }
        HirExpr::Literal(Literal::None) => Some("null".to_string()),
        _ => None,
    }
}

fn collect_super_calls(body: &[HirStmt], out: &mut IndexSet<String>) {
    fn visit_expr(expr: &HirExpr, out: &mut IndexSet<String>) {
        if let HirExpr::Call { func, args, .. } = expr {
            if let HirExpr::Attribute { value, attr } = &**func {
                if super::callable::is_super_receiver(value) {
                    out.insert(attr.clone());
                }
            }
            visit_expr(func, out);
            args.iter().for_each(|a| visit_expr(a, out));
        }
        match expr {
            HirExpr::Binary { left, right, .. } => {
                visit_expr(left, out);
                visit_expr(right, out);
            }
            HirExpr::Attribute { value, .. } => visit_expr(value, out),
            _ => {}
        }
    }
    for stmt in body {
        match stmt {
            HirStmt::Expr(e) | HirStmt::Return(Some(e)) => visit_expr(e, out),
            HirStmt::Assign { value, .. } | HirStmt::AugAssign { value, .. } => {
                visit_expr(value, out);
            }
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                visit_expr(condition, out);
                collect_super_calls(then_body, out);
                if let Some(b) = else_body {
                    collect_super_calls(b, out);
                }
            }
            HirStmt::While { body, orelse, .. } | HirStmt::For { body, orelse, .. } => {
                collect_super_calls(body, out);
                collect_super_calls(orelse, out);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_defaults() {
        assert_eq!(
            literal_default_text(&HirExpr::Literal(Literal::Int(3))),
            Some("3".to_string())
        );
        assert_eq!(
            literal_default_text(&HirExpr::Literal(Literal::Str("a".to_string()))),
            Some("\"a\"".to_string())
        );
        assert_eq!(
            literal_default_text(&HirExpr::List(vec![])),
            None
        );
    }
}
