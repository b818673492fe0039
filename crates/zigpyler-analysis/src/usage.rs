//! Usage and mutation analysis (component B).
//!
//! One recursive traversal classifying every name in every scope. The
//! target language forbids unused locals, shadowing of enclosing
//! declarations and implicit discards, so every emit decision downstream
//! reads one of these bits.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use zigpyler_hir::scope::child_scope;
use zigpyler_hir::{
    AssignTarget, CmpOp, Comprehension, HirClass, HirExpr, HirFunction, HirModule, HirStmt,
    ImportItem, Literal,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameUsage {
    pub declared: bool,
    pub is_param: bool,
    pub assign_count: u32,
    /// Appears as an rvalue outside stripped-super call paths.
    pub is_used_directly: bool,
    /// Referenced from a nested class or closure body.
    pub is_captured: bool,
    /// Written after first binding, or target of an augmented assignment,
    /// or receiver of a mutating method call.
    pub is_mutated: bool,
    pub is_used_as_callable: bool,
    pub is_used_as_iterator: bool,
    pub is_used_in_type_check: bool,
    pub is_compared_to_string_literal: bool,
    pub shadows_module_func: bool,
    pub shadows_import: bool,
    pub shadows_class_method: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTable {
    scopes: IndexMap<String, IndexMap<String, NameUsage>>,
}

impl UsageTable {
    pub fn get(&self, scope: &str, name: &str) -> Option<&NameUsage> {
        self.scopes.get(scope).and_then(|s| s.get(name))
    }

    /// Usage bits for a binding, defaulting to all-false when the name
    /// was never seen.
    pub fn usage(&self, scope: &str, name: &str) -> NameUsage {
        self.get(scope, name).cloned().unwrap_or_default()
    }

    pub fn is_mutated(&self, scope: &str, name: &str) -> bool {
        self.get(scope, name).is_some_and(|u| u.is_mutated)
    }

    pub fn is_used(&self, scope: &str, name: &str) -> bool {
        self.get(scope, name).is_some_and(|u| u.is_used_directly)
    }

    pub fn is_captured(&self, scope: &str, name: &str) -> bool {
        self.get(scope, name).is_some_and(|u| u.is_captured)
    }

    fn mark(&mut self, scope: &str, name: &str, f: impl FnOnce(&mut NameUsage)) {
        let entry = self
            .scopes
            .entry(scope.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default();
        f(entry);
    }
}

/// Methods whose invocation mutates the receiver container.
const MUTATING_METHODS: &[&str] = &[
    "append",
    "extend",
    "insert",
    "remove",
    "pop",
    "popleft",
    "appendleft",
    "clear",
    "sort",
    "reverse",
    "add",
    "discard",
    "update",
    "setdefault",
    "popitem",
];

/// Builtins taking a key function, whose function-valued argument is a
/// callable use even without direct call syntax.
const HIGHER_ORDER_BUILTINS: &[&str] = &["map", "filter", "sorted", "min", "max"];

pub struct UsageAnalyzer {
    table: UsageTable,
    /// scope path → names bound there (params, assignments, defs).
    bindings: IndexMap<String, IndexSet<String>>,
    /// scope path → names declared `global` there; those bind at module
    /// scope instead.
    global_decls: IndexMap<String, IndexSet<String>>,
    module_funcs: IndexSet<String>,
    module_classes: IndexMap<String, Option<String>>,
    imports: IndexSet<String>,
    class_methods: IndexMap<String, IndexSet<String>>,
    /// Function-scope paths (as opposed to class bodies), used to decide
    /// whether a reference from a nested class captures.
    function_scopes: IndexSet<String>,
}

impl UsageAnalyzer {
    pub fn analyze(module: &HirModule) -> UsageTable {
        let mut analyzer = Self {
            table: UsageTable::default(),
            bindings: IndexMap::new(),
            global_decls: IndexMap::new(),
            module_funcs: IndexSet::new(),
            module_classes: IndexMap::new(),
            imports: IndexSet::new(),
            class_methods: IndexMap::new(),
            function_scopes: IndexSet::new(),
        };
        analyzer.collect_module_symbols(module);
        analyzer.collect_bindings("", &module.body);
        analyzer.walk_body("", &module.body, &WalkCtx::default());
        analyzer.table
    }

    fn collect_module_symbols(&mut self, module: &HirModule) {
        for import in &module.imports {
            if import.items.is_empty() {
                let name = import.alias.as_deref().unwrap_or(&import.module);
                self.imports.insert(name.split('.').next().unwrap_or(name).to_string());
            }
            for item in &import.items {
                match item {
                    ImportItem::Named(n) => self.imports.insert(n.clone()),
                    ImportItem::Aliased { alias, .. } => self.imports.insert(alias.clone()),
                };
            }
        }
        for stmt in &module.body {
            match stmt {
                HirStmt::FunctionDef(f) => {
                    self.module_funcs.insert(f.name.clone());
                }
                HirStmt::ClassDef(c) => self.register_class(c),
                _ => {}
            }
        }
    }

    fn register_class(&mut self, class: &HirClass) {
        self.module_classes
            .insert(class.name.clone(), class.bases.first().cloned());
        let methods = self
            .class_methods
            .entry(class.name.clone())
            .or_default();
        for m in &class.methods {
            methods.insert(m.name.clone());
        }
        for nested in &class.nested {
            self.register_class(nested);
        }
    }

    // ------------------------------------------------------------------
    // Binding pre-pass
    // ------------------------------------------------------------------

    fn is_global_in(&self, scope: &str, name: &str) -> bool {
        self.global_decls
            .get(scope)
            .is_some_and(|g| g.contains(name))
    }

    fn bind(&mut self, scope: &str, name: &str) {
        // `global` names bind at module scope, never locally.
        if self.is_global_in(scope, name) {
            self.bindings
                .entry(String::new())
                .or_default()
                .insert(name.to_string());
            return;
        }
        self.bindings
            .entry(scope.to_string())
            .or_default()
            .insert(name.to_string());
    }

    fn collect_target_bindings(&mut self, scope: &str, target: &AssignTarget) {
        match target {
            AssignTarget::Symbol(name) => self.bind(scope, name),
            AssignTarget::Tuple(targets) => {
                for t in targets {
                    self.collect_target_bindings(scope, t);
                }
            }
            _ => {}
        }
    }

    fn collect_bindings(&mut self, scope: &str, body: &[HirStmt]) {
        // `global` declarations are hoisted: they affect every binding
        // in the scope regardless of statement order.
        collect_global_decls(body, |name| {
            self.global_decls
                .entry(scope.to_string())
                .or_default()
                .insert(name.to_string());
        });
        for stmt in body {
            match stmt {
                HirStmt::Assign { targets, .. } => {
                    for t in targets {
                        self.collect_target_bindings(scope, t);
                    }
                }
                HirStmt::AnnAssign { target, .. } | HirStmt::AugAssign { target, .. } => {
                    self.collect_target_bindings(scope, target);
                }
                HirStmt::For {
                    target,
                    body,
                    orelse,
                    ..
                } => {
                    self.collect_target_bindings(scope, target);
                    self.collect_bindings(scope, body);
                    self.collect_bindings(scope, orelse);
                }
                HirStmt::While { body, orelse, .. } => {
                    self.collect_bindings(scope, body);
                    self.collect_bindings(scope, orelse);
                }
                HirStmt::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    self.collect_bindings(scope, then_body);
                    if let Some(b) = else_body {
                        self.collect_bindings(scope, b);
                    }
                }
                HirStmt::Try {
                    body,
                    handlers,
                    orelse,
                    finalbody,
                } => {
                    self.collect_bindings(scope, body);
                    for h in handlers {
                        if let Some(n) = &h.name {
                            self.bind(scope, n);
                        }
                        self.collect_bindings(scope, &h.body);
                    }
                    self.collect_bindings(scope, orelse);
                    self.collect_bindings(scope, finalbody);
                }
                HirStmt::With { items, body } => {
                    for item in items {
                        if let Some(t) = &item.target {
                            self.bind(scope, t);
                        }
                    }
                    self.collect_bindings(scope, body);
                }
                HirStmt::FunctionDef(func) => {
                    self.bind(scope, &func.name);
                    let inner = child_scope(scope, &func.name);
                    self.function_scopes.insert(inner.clone());
                    for p in &func.params {
                        self.bind(&inner, &p.name);
                    }
                    self.collect_bindings(&inner, &func.body);
                }
                HirStmt::ClassDef(class) => {
                    self.bind(scope, &class.name);
                    let inner = child_scope(scope, &class.name);
                    for f in &class.fields {
                        self.bind(&inner, &f.name);
                    }
                    for m in &class.methods {
                        let method_scope = child_scope(&inner, &m.name);
                        self.function_scopes.insert(method_scope.clone());
                        for p in &m.params {
                            self.bind(&method_scope, &p.name);
                        }
                        self.collect_bindings(&method_scope, &m.body);
                    }
                    for nested in &class.nested {
                        self.collect_bindings(&inner, &[HirStmt::ClassDef(nested.clone())]);
                    }
                }
                _ => {}
            }
        }
    }

    /// Scope where `name` is bound, walking outward from `scope`.
    fn declaring_scope(&self, scope: &str, name: &str) -> Option<String> {
        let mut current = scope.to_string();
        loop {
            if self
                .bindings
                .get(&current)
                .is_some_and(|b| b.contains(name))
            {
                return Some(current);
            }
            if current.is_empty() {
                return None;
            }
            current = match current.rfind('/') {
                Some(idx) => current[..idx].to_string(),
                None => String::new(),
            };
        }
    }

    // ------------------------------------------------------------------
    // Main traversal
    // ------------------------------------------------------------------

    fn walk_body(&mut self, scope: &str, body: &[HirStmt], ctx: &WalkCtx) {
        for stmt in body {
            self.walk_stmt(scope, stmt, ctx);
        }
    }

    fn walk_stmt(&mut self, scope: &str, stmt: &HirStmt, ctx: &WalkCtx) {
        match stmt {
            HirStmt::Assign { targets, value } => {
                self.visit_expr(scope, value, ctx);
                for target in targets {
                    self.record_store(scope, target, ctx);
                }
            }
            HirStmt::AnnAssign { target, value, .. } => {
                if let Some(v) = value {
                    self.visit_expr(scope, v, ctx);
                }
                self.record_store(scope, target, ctx);
            }
            HirStmt::AugAssign { target, value, .. } => {
                self.visit_expr(scope, value, ctx);
                match target {
                    AssignTarget::Symbol(name) => {
                        let declaring =
                            self.declaring_scope(scope, name).unwrap_or_else(|| scope.to_string());
                        self.table.mark(&declaring, name, |u| {
                            u.is_mutated = true;
                            u.is_used_directly = true;
                            u.assign_count += 1;
                        });
                    }
                    // `x[i] += v` mutates the container, never the index
                    // expression.
                    AssignTarget::Index { base, index } => {
                        self.visit_expr(scope, index, ctx);
                        self.mark_container_mutated(scope, base, ctx);
                    }
                    AssignTarget::Slice { base, lower, upper } => {
                        if let Some(l) = lower {
                            self.visit_expr(scope, l, ctx);
                        }
                        if let Some(u) = upper {
                            self.visit_expr(scope, u, ctx);
                        }
                        self.mark_container_mutated(scope, base, ctx);
                    }
                    AssignTarget::Attribute { value, .. } => {
                        self.mark_container_mutated(scope, value, ctx);
                    }
                    AssignTarget::Tuple(_) => {}
                }
            }
            HirStmt::Return(Some(v)) => self.visit_expr(scope, v, ctx),
            HirStmt::Return(None) => {}
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                self.visit_expr(scope, condition, ctx);
                self.walk_body(scope, then_body, ctx);
                if let Some(body) = else_body {
                    self.walk_body(scope, body, ctx);
                }
            }
            HirStmt::While {
                condition,
                body,
                orelse,
            } => {
                self.visit_expr(scope, condition, ctx);
                self.walk_body(scope, body, ctx);
                self.walk_body(scope, orelse, ctx);
            }
            HirStmt::For {
                target,
                iter,
                body,
                orelse,
            } => {
                if let HirExpr::Var(name) = iter {
                    self.mark_ref(scope, name, ctx, |u| {
                        u.is_used_directly = true;
                        u.is_used_as_iterator = true;
                    });
                } else {
                    self.visit_expr(scope, iter, ctx);
                }
                self.record_store(scope, target, ctx);
                self.walk_body(scope, body, ctx);
                self.walk_body(scope, orelse, ctx);
            }
            HirStmt::Expr(expr) => self.visit_expr(scope, expr, ctx),
            HirStmt::Raise { exc, cause } => {
                if let Some(e) = exc {
                    self.visit_expr(scope, e, ctx);
                }
                if let Some(c) = cause {
                    self.visit_expr(scope, c, ctx);
                }
            }
            HirStmt::Assert { test, msg } => {
                self.visit_expr(scope, test, ctx);
                if let Some(m) = msg {
                    self.visit_expr(scope, m, ctx);
                }
            }
            HirStmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.walk_body(scope, body, ctx);
                for h in handlers {
                    if let Some(n) = &h.name {
                        self.table.mark(scope, n, |u| {
                            u.declared = true;
                            u.assign_count += 1;
                        });
                    }
                    self.walk_body(scope, &h.body, ctx);
                }
                self.walk_body(scope, orelse, ctx);
                self.walk_body(scope, finalbody, ctx);
            }
            HirStmt::With { items, body } => {
                for item in items {
                    self.visit_expr(scope, &item.context, ctx);
                    if let Some(t) = &item.target {
                        self.table.mark(scope, t, |u| {
                            u.declared = true;
                            u.assign_count += 1;
                        });
                    }
                }
                self.walk_body(scope, body, ctx);
            }
            HirStmt::Delete(targets) => {
                for target in targets {
                    match target {
                        AssignTarget::Index { base, index } => {
                            self.visit_expr(scope, index, ctx);
                            self.mark_container_mutated(scope, base, ctx);
                        }
                        AssignTarget::Symbol(_) => {}
                        _ => {}
                    }
                }
            }
            HirStmt::Global(_)
            | HirStmt::Nonlocal(_)
            | HirStmt::Break
            | HirStmt::Continue
            | HirStmt::Pass => {}
            HirStmt::FunctionDef(func) => self.walk_function(scope, func, ctx),
            HirStmt::ClassDef(class) => self.walk_class(scope, class, ctx),
            HirStmt::Unsupported(_) => {}
        }
    }

    fn walk_function(&mut self, scope: &str, func: &HirFunction, ctx: &WalkCtx) {
        let inner = child_scope(scope, &func.name);
        for param in &func.params {
            let shadows_module_func = self.module_funcs.contains(&param.name);
            let shadows_import = self.imports.contains(&param.name);
            let shadows_class_method = ctx
                .current_class
                .as_ref()
                .and_then(|c| self.class_methods.get(c))
                .is_some_and(|m| m.contains(&param.name));
            self.table.mark(&inner, &param.name, |u| {
                u.declared = true;
                u.is_param = true;
                u.assign_count += 1;
                u.shadows_module_func = shadows_module_func;
                u.shadows_import = shadows_import;
                u.shadows_class_method = shadows_class_method;
            });
            if let Some(default) = &param.default {
                self.visit_expr(scope, default, ctx);
            }
        }
        let inner_ctx = WalkCtx {
            current_class: ctx.current_class.clone(),
            enclosing_fn_scopes: {
                let mut v = ctx.enclosing_fn_scopes.clone();
                v.push(inner.clone());
                v
            },
            in_nested_unit: ctx.in_nested_unit,
        };
        self.walk_body(&inner, &func.body, &inner_ctx);
    }

    fn walk_class(&mut self, scope: &str, class: &HirClass, ctx: &WalkCtx) {
        let inner = child_scope(scope, &class.name);
        // A class defined inside a function body is a nested unit:
        // references to enclosing function locals are captures.
        let nested_in_fn = !ctx.enclosing_fn_scopes.is_empty();
        let class_ctx = WalkCtx {
            current_class: Some(class.name.clone()),
            enclosing_fn_scopes: ctx.enclosing_fn_scopes.clone(),
            in_nested_unit: ctx.in_nested_unit || nested_in_fn,
        };
        for field in &class.fields {
            if let Some(default) = &field.default {
                self.visit_expr(&inner, default, &class_ctx);
            }
            self.table.mark(&inner, &field.name, |u| {
                u.declared = true;
                u.assign_count += 1;
            });
        }
        for method in &class.methods {
            self.walk_function(&inner, method, &class_ctx);
        }
        for nested in &class.nested {
            self.walk_class(&inner, nested, &class_ctx);
        }
    }

    /// Record a store through an assignment target.
    fn record_store(&mut self, scope: &str, target: &AssignTarget, ctx: &WalkCtx) {
        match target {
            AssignTarget::Symbol(name) if self.is_global_in(scope, name) => {
                self.table.mark("", name, |u| {
                    if u.declared {
                        u.is_mutated = true;
                    }
                    u.declared = true;
                    u.assign_count += 1;
                });
            }
            AssignTarget::Symbol(name) => {
                let shadows_module_func =
                    !scope.is_empty() && self.module_funcs.contains(name);
                let shadows_import = !scope.is_empty() && self.imports.contains(name);
                let shadows_class_method = ctx
                    .current_class
                    .as_ref()
                    .and_then(|c| self.class_methods.get(c))
                    .is_some_and(|m| m.contains(name));
                self.table.mark(scope, name, |u| {
                    if u.declared {
                        u.is_mutated = true;
                    }
                    u.declared = true;
                    u.assign_count += 1;
                    u.shadows_module_func |= shadows_module_func;
                    u.shadows_import |= shadows_import;
                    u.shadows_class_method |= shadows_class_method;
                });
            }
            AssignTarget::Tuple(targets) => {
                for t in targets {
                    self.record_store(scope, t, ctx);
                }
            }
            AssignTarget::Index { base, index } => {
                self.visit_expr(scope, index, ctx);
                self.mark_container_mutated(scope, base, ctx);
            }
            AssignTarget::Slice { base, lower, upper } => {
                if let Some(l) = lower {
                    self.visit_expr(scope, l, ctx);
                }
                if let Some(u) = upper {
                    self.visit_expr(scope, u, ctx);
                }
                self.mark_container_mutated(scope, base, ctx);
            }
            AssignTarget::Attribute { value, .. } => {
                self.mark_container_mutated(scope, value, ctx);
            }
        }
    }

    /// A store through `base[...]` or `base.attr` mutates the base
    /// binding.
    fn mark_container_mutated(&mut self, scope: &str, base: &HirExpr, ctx: &WalkCtx) {
        match base {
            HirExpr::Var(name) => {
                self.mark_ref(scope, name, ctx, |u| {
                    u.is_used_directly = true;
                    u.is_mutated = true;
                });
            }
            other => self.visit_expr(scope, other, ctx),
        }
    }

    /// Mark a name reference at its declaring scope, flagging captures
    /// when the reference crosses a nested-unit boundary.
    fn mark_ref(
        &mut self,
        scope: &str,
        name: &str,
        ctx: &WalkCtx,
        f: impl FnOnce(&mut NameUsage),
    ) {
        let declaring = match self.declaring_scope(scope, name) {
            Some(s) => s,
            None => scope.to_string(),
        };
        let captured = ctx.in_nested_unit
            && declaring != scope
            && ctx.enclosing_fn_scopes.iter().any(|s| *s == declaring);
        self.table.mark(&declaring, name, |u| {
            if captured {
                u.is_captured = true;
            }
            f(u);
        });
    }

    fn visit_expr(&mut self, scope: &str, expr: &HirExpr, ctx: &WalkCtx) {
        match expr {
            HirExpr::Var(name) => {
                self.mark_ref(scope, name, ctx, |u| u.is_used_directly = true);
            }
            HirExpr::Literal(_) => {}
            HirExpr::Binary { left, right, .. } => {
                self.visit_expr(scope, left, ctx);
                self.visit_expr(scope, right, ctx);
            }
            HirExpr::Unary { operand, .. } => self.visit_expr(scope, operand, ctx),
            HirExpr::Bool { values, .. } => {
                for v in values {
                    self.visit_expr(scope, v, ctx);
                }
            }
            HirExpr::Compare {
                left,
                ops,
                comparators,
            } => {
                let involves_string_literal = comparators
                    .iter()
                    .any(|c| matches!(c, HirExpr::Literal(Literal::Str(_))));
                if let HirExpr::Var(name) = &**left {
                    let eq_like = ops
                        .iter()
                        .any(|op| matches!(op, CmpOp::Eq | CmpOp::NotEq | CmpOp::In | CmpOp::NotIn));
                    self.mark_ref(scope, name, ctx, |u| {
                        u.is_used_directly = true;
                        if involves_string_literal && eq_like {
                            u.is_compared_to_string_literal = true;
                        }
                    });
                } else {
                    self.visit_expr(scope, left, ctx);
                }
                for c in comparators {
                    self.visit_expr(scope, c, ctx);
                }
            }
            HirExpr::Call { func, args, kwargs } => {
                self.visit_call(scope, func, args, kwargs, ctx);
            }
            HirExpr::Index { base, index } => {
                self.visit_expr(scope, base, ctx);
                self.visit_expr(scope, index, ctx);
            }
            HirExpr::Slice {
                base,
                lower,
                upper,
                step,
            } => {
                self.visit_expr(scope, base, ctx);
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(scope, part, ctx);
                }
            }
            HirExpr::Attribute { value, .. } => self.visit_expr(scope, value, ctx),
            HirExpr::List(items) | HirExpr::Tuple(items) | HirExpr::Set(items) => {
                for item in items {
                    self.visit_expr(scope, item, ctx);
                }
            }
            HirExpr::Dict(items) => {
                for (k, v) in items {
                    self.visit_expr(scope, k, ctx);
                    self.visit_expr(scope, v, ctx);
                }
            }
            HirExpr::ListComp {
                element,
                generators,
            }
            | HirExpr::SetComp {
                element,
                generators,
            }
            | HirExpr::GeneratorExp {
                element,
                generators,
            } => {
                self.visit_generators(scope, generators, ctx);
                self.visit_expr(scope, element, ctx);
            }
            HirExpr::DictComp {
                key,
                value,
                generators,
            } => {
                self.visit_generators(scope, generators, ctx);
                self.visit_expr(scope, key, ctx);
                self.visit_expr(scope, value, ctx);
            }
            HirExpr::Lambda { params, body } => {
                // Lambda bodies are nested units: free names that resolve
                // to an enclosing function scope are captures.
                let lambda_scope = child_scope(scope, "<lambda>");
                let lambda_ctx = WalkCtx {
                    current_class: ctx.current_class.clone(),
                    enclosing_fn_scopes: {
                        let mut v = ctx.enclosing_fn_scopes.clone();
                        if !scope.is_empty() && !v.iter().any(|s| s == scope) {
                            v.push(scope.to_string());
                        }
                        v
                    },
                    in_nested_unit: true,
                };
                for p in params {
                    self.bind(&lambda_scope, p);
                    self.table.mark(&lambda_scope, p, |u| {
                        u.declared = true;
                        u.is_param = true;
                        u.assign_count += 1;
                    });
                }
                self.visit_expr(&lambda_scope, body, &lambda_ctx);
            }
            HirExpr::IfExp {
                test,
                body,
                orelse,
            } => {
                self.visit_expr(scope, test, ctx);
                self.visit_expr(scope, body, ctx);
                self.visit_expr(scope, orelse, ctx);
            }
            HirExpr::Yield(Some(v)) => self.visit_expr(scope, v, ctx),
            HirExpr::Yield(None) => {}
            HirExpr::YieldFrom(v) | HirExpr::Await(v) | HirExpr::Starred(v) => {
                self.visit_expr(scope, v, ctx);
            }
            HirExpr::FString(parts) => {
                for part in parts {
                    if let zigpyler_hir::FStringPart::Expr { value, .. } = part {
                        self.visit_expr(scope, value, ctx);
                    }
                }
            }
            HirExpr::NamedExpr { target, value } => {
                self.visit_expr(scope, value, ctx);
                self.table.mark(scope, target, |u| {
                    if u.declared {
                        u.is_mutated = true;
                    }
                    u.declared = true;
                    u.assign_count += 1;
                });
            }
            HirExpr::Unsupported(_) => {}
        }
    }

    fn visit_generators(&mut self, scope: &str, generators: &[Comprehension], ctx: &WalkCtx) {
        for generator in generators {
            if let HirExpr::Var(name) = &generator.iter {
                self.mark_ref(scope, name, ctx, |u| {
                    u.is_used_directly = true;
                    u.is_used_as_iterator = true;
                });
            } else {
                self.visit_expr(scope, &generator.iter, ctx);
            }
            self.record_store(scope, &generator.target, ctx);
            for cond in &generator.ifs {
                self.visit_expr(scope, cond, ctx);
            }
        }
    }

    fn visit_call(
        &mut self,
        scope: &str,
        func: &HirExpr,
        args: &[HirExpr],
        kwargs: &[zigpyler_hir::CallKeyword],
        ctx: &WalkCtx,
    ) {
        // `super().m(...)` for a class whose base is unknown strips to
        // nothing; its arguments do not count as used.
        if let HirExpr::Attribute { value, .. } = func {
            if let HirExpr::Call { func: inner, .. } = &**value {
                if matches!(&**inner, HirExpr::Var(n) if n == "super") {
                    let base_known = ctx
                        .current_class
                        .as_ref()
                        .and_then(|c| self.module_classes.get(c))
                        .and_then(|b| b.as_ref())
                        .is_some_and(|b| self.module_classes.contains_key(b));
                    if !base_known {
                        return;
                    }
                }
            }
        }

        match func {
            HirExpr::Var(name) => {
                match name.as_str() {
                    "isinstance" | "issubclass" | "type" => {
                        if let Some(HirExpr::Var(target)) = args.first() {
                            self.mark_ref(scope, target, ctx, |u| {
                                u.is_used_directly = true;
                                u.is_used_in_type_check = true;
                            });
                            for arg in &args[1..] {
                                self.visit_expr(scope, arg, ctx);
                            }
                            return;
                        }
                    }
                    hof if HIGHER_ORDER_BUILTINS.contains(&hof) => {
                        if let Some(HirExpr::Var(callable)) = args.first() {
                            self.mark_ref(scope, callable, ctx, |u| {
                                u.is_used_directly = true;
                                u.is_used_as_callable = true;
                            });
                            for arg in &args[1..] {
                                self.visit_expr(scope, arg, ctx);
                            }
                            for kw in kwargs {
                                self.visit_expr(scope, &kw.value, ctx);
                            }
                            return;
                        }
                    }
                    _ => {}
                }
                self.mark_ref(scope, name, ctx, |u| {
                    u.is_used_directly = true;
                    u.is_used_as_callable = true;
                });
            }
            HirExpr::Attribute { value, attr } => {
                if let HirExpr::Var(receiver) = &**value {
                    let mutating = MUTATING_METHODS.contains(&attr.as_str());
                    self.mark_ref(scope, receiver, ctx, |u| {
                        u.is_used_directly = true;
                        if mutating {
                            u.is_mutated = true;
                        }
                    });
                } else {
                    self.visit_expr(scope, value, ctx);
                }
            }
            other => self.visit_expr(scope, other, ctx),
        }
        for arg in args {
            self.visit_expr(scope, arg, ctx);
        }
        for kw in kwargs {
            self.visit_expr(scope, &kw.value, ctx);
        }
    }
}

fn collect_global_decls(body: &[HirStmt], mut record: impl FnMut(&str)) {
    fn walk(body: &[HirStmt], record: &mut impl FnMut(&str)) {
        for stmt in body {
            match stmt {
                HirStmt::Global(names) => names.iter().for_each(|n| record(n)),
                HirStmt::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    walk(then_body, record);
                    if let Some(b) = else_body {
                        walk(b, record);
                    }
                }
                HirStmt::While { body, orelse, .. } | HirStmt::For { body, orelse, .. } => {
                    walk(body, record);
                    walk(orelse, record);
                }
                HirStmt::Try {
                    body,
                    handlers,
                    orelse,
                    finalbody,
                } => {
                    walk(body, record);
                    for h in handlers {
                        walk(&h.body, record);
                    }
                    walk(orelse, record);
                    walk(finalbody, record);
                }
                HirStmt::With { body, .. } => walk(body, record),
                _ => {}
            }
        }
    }
    walk(body, &mut record);
}

#[derive(Debug, Clone, Default)]
struct WalkCtx {
    current_class: Option<String>,
    /// Function scopes enclosing the current position, innermost last.
    enclosing_fn_scopes: Vec<String>,
    /// True inside a nested class or lambda relative to some enclosing
    /// function.
    in_nested_unit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use zigpyler_hir::HirParam;

    fn assign(name: &str, value: HirExpr) -> HirStmt {
        HirStmt::Assign {
            targets: vec![AssignTarget::Symbol(name.to_string())],
            value,
        }
    }

    fn var(name: &str) -> HirExpr {
        HirExpr::Var(name.to_string())
    }

    fn int_lit(v: i64) -> HirExpr {
        HirExpr::Literal(Literal::Int(v))
    }

    fn module(body: Vec<HirStmt>) -> HirModule {
        HirModule {
            imports: vec![],
            body,
        }
    }

    fn func(name: &str, params: Vec<&str>, body: Vec<HirStmt>) -> HirFunction {
        HirFunction {
            name: name.to_string(),
            params: params.into_iter().map(HirParam::positional).collect(),
            body,
            ret_annotation: None,
            decorators: vec![],
            is_async: false,
            docstring: None,
        }
    }

    #[test]
    fn single_write_is_not_mutated() {
        let table = UsageAnalyzer::analyze(&module(vec![assign("x", int_lit(1))]));
        let usage = table.usage("", "x");
        assert!(usage.declared);
        assert!(!usage.is_mutated);
        assert_eq!(usage.assign_count, 1);
    }

    #[test]
    fn second_write_marks_mutated() {
        let table = UsageAnalyzer::analyze(&module(vec![
            assign("x", int_lit(1)),
            assign("x", int_lit(2)),
        ]));
        assert!(table.is_mutated("", "x"));
    }

    #[test]
    fn augmented_assignment_marks_mutated() {
        let table = UsageAnalyzer::analyze(&module(vec![
            assign("x", int_lit(1)),
            HirStmt::AugAssign {
                target: AssignTarget::Symbol("x".to_string()),
                op: zigpyler_hir::BinOp::Add,
                value: int_lit(1),
            },
        ]));
        assert!(table.is_mutated("", "x"));
    }

    #[test]
    fn element_augassign_marks_container_not_index() {
        let table = UsageAnalyzer::analyze(&module(vec![
            assign("xs", HirExpr::List(vec![int_lit(1)])),
            assign("i", int_lit(0)),
            HirStmt::AugAssign {
                target: AssignTarget::Index {
                    base: var("xs"),
                    index: var("i"),
                },
                op: zigpyler_hir::BinOp::Add,
                value: int_lit(5),
            },
        ]));
        assert!(table.is_mutated("", "xs"));
        assert!(!table.is_mutated("", "i"));
        assert!(table.is_used("", "i"));
    }

    #[test]
    fn mutating_method_marks_receiver() {
        let table = UsageAnalyzer::analyze(&module(vec![
            assign("xs", HirExpr::List(vec![])),
            HirStmt::Expr(HirExpr::Call {
                func: Box::new(HirExpr::Attribute {
                    value: Box::new(var("xs")),
                    attr: "append".to_string(),
                }),
                args: vec![int_lit(1)],
                kwargs: vec![],
            }),
        ]));
        assert!(table.is_mutated("", "xs"));
    }

    #[test]
    fn callable_and_iterator_bits() {
        let table = UsageAnalyzer::analyze(&module(vec![
            HirStmt::FunctionDef(func(
                "f",
                vec!["g", "items"],
                vec![
                    HirStmt::Expr(HirExpr::Call {
                        func: Box::new(var("g")),
                        args: vec![],
                        kwargs: vec![],
                    }),
                    HirStmt::For {
                        target: AssignTarget::Symbol("item".to_string()),
                        iter: var("items"),
                        body: vec![HirStmt::Pass],
                        orelse: vec![],
                    },
                ],
            )),
        ]));
        assert!(table.usage("f", "g").is_used_as_callable);
        assert!(table.usage("f", "items").is_used_as_iterator);
    }

    #[test]
    fn isinstance_marks_type_check() {
        let table = UsageAnalyzer::analyze(&module(vec![HirStmt::FunctionDef(func(
            "f",
            vec!["x"],
            vec![HirStmt::Expr(HirExpr::Call {
                func: Box::new(var("isinstance")),
                args: vec![var("x"), var("int")],
                kwargs: vec![],
            })],
        ))]));
        assert!(table.usage("f", "x").is_used_in_type_check);
    }

    #[test]
    fn string_literal_comparison_bit() {
        let table = UsageAnalyzer::analyze(&module(vec![HirStmt::FunctionDef(func(
            "f",
            vec!["mode"],
            vec![HirStmt::If {
                condition: HirExpr::Compare {
                    left: Box::new(var("mode")),
                    ops: vec![CmpOp::Eq],
                    comparators: vec![HirExpr::Literal(Literal::Str("fast".to_string()))],
                },
                then_body: vec![HirStmt::Pass],
                else_body: None,
            }],
        ))]));
        assert!(table.usage("f", "mode").is_compared_to_string_literal);
    }

    #[test]
    fn nested_class_reference_captures_outer_local() {
        let nested_class = HirClass {
            name: "C".to_string(),
            bases: vec![],
            decorators: vec![],
            fields: vec![],
            methods: vec![func(
                "inc",
                vec!["self"],
                vec![HirStmt::Return(Some(HirExpr::Binary {
                    op: zigpyler_hir::BinOp::Add,
                    left: Box::new(var("count")),
                    right: Box::new(int_lit(1)),
                }))],
            )],
            nested: vec![],
            docstring: None,
        };
        let table = UsageAnalyzer::analyze(&module(vec![HirStmt::FunctionDef(HirFunction {
            name: "make".to_string(),
            params: smallvec::smallvec![],
            body: vec![
                assign("count", int_lit(0)),
                HirStmt::ClassDef(nested_class),
            ],
            ret_annotation: None,
            decorators: vec![],
            is_async: false,
            docstring: None,
        })]));
        assert!(table.is_captured("make", "count"));
    }

    #[test]
    fn lambda_body_captures() {
        let table = UsageAnalyzer::analyze(&module(vec![HirStmt::FunctionDef(func(
            "f",
            vec![],
            vec![
                assign("n", int_lit(2)),
                assign(
                    "double",
                    HirExpr::Lambda {
                        params: vec!["x".to_string()],
                        body: Box::new(HirExpr::Binary {
                            op: zigpyler_hir::BinOp::Mul,
                            left: Box::new(var("x")),
                            right: Box::new(var("n")),
                        }),
                    },
                ),
            ],
        ))]));
        assert!(table.is_captured("f", "n"));
    }

    #[test]
    fn local_shadowing_module_function_is_flagged() {
        let table = UsageAnalyzer::analyze(&module(vec![
            HirStmt::FunctionDef(func("helper", vec![], vec![HirStmt::Pass])),
            HirStmt::FunctionDef(func(
                "f",
                vec![],
                vec![assign("helper", int_lit(1))],
            )),
        ]));
        assert!(table.usage("f", "helper").shadows_module_func);
    }

    #[test]
    fn stripped_super_call_does_not_mark_args() {
        let class = HirClass {
            name: "Child".to_string(),
            bases: vec!["External".to_string()],
            decorators: vec![],
            fields: vec![],
            methods: vec![HirFunction {
                name: "__init__".to_string(),
                params: ["self", "value"].iter().map(|p| HirParam::positional(*p)).collect(),
                body: vec![HirStmt::Expr(HirExpr::Call {
                    func: Box::new(HirExpr::Attribute {
                        value: Box::new(HirExpr::Call {
                            func: Box::new(var("super")),
                            args: vec![],
                            kwargs: vec![],
                        }),
                        attr: "__init__".to_string(),
                    }),
                    args: vec![var("value")],
                    kwargs: vec![],
                })],
                ret_annotation: None,
                decorators: vec![],
                is_async: false,
                docstring: None,
            }],
            nested: vec![],
            docstring: None,
        };
        let table = UsageAnalyzer::analyze(&module(vec![HirStmt::ClassDef(class)]));
        let usage = table.usage("Child/__init__", "value");
        assert!(!usage.is_used_directly);
    }

    #[test]
    fn usage_default_for_unknown_names() {
        let table = UsageAnalyzer::analyze(&module(vec![]));
        let usage: NameUsage = table.usage("", "ghost");
        assert!(!usage.declared);
        assert!(!usage.is_used_directly);
    }
}
