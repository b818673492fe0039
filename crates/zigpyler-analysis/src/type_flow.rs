//! Whole-module type inference (component A).
//!
//! Two cooperating passes over the module body: a structural pass that
//! collects literal and expression types bottom-up, then fixpoint
//! re-scans that widen stored types until no table entry changes.
//! Inference never fails on user input; the only error is the internal
//! invariant breach of a non-converging widening loop.

use anyhow::{bail, Result};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use zigpyler_hir::scope::child_scope;
use zigpyler_hir::{
    widen, AssignTarget, BinOp, CallKeyword, Comprehension, HirClass, HirExpr, HirFunction,
    HirModule, HirParam, HirStmt, IntKind, Literal, NativeType, ParamKind, ScopeTable, UnaryOp,
};

/// Widening must converge quickly; the lattice has finite height per
/// binding, so a loop that keeps changing entries indicates a cycle in
/// the widening rules themselves.
const MAX_WIDEN_PASSES: usize = 32;

/// Left shifts by at least this amount overflow 64-bit storage.
const SHIFT_PROMOTION_THRESHOLD: i64 = 63;
/// Integer powers with exponents at least this large get big-integer
/// storage.
const POW_PROMOTION_THRESHOLD: i64 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassFieldTypes {
    pub fields: IndexMap<String, NativeType>,
    pub methods: IndexMap<String, NativeType>,
}

impl ClassFieldTypes {
    fn new() -> Self {
        Self {
            fields: IndexMap::new(),
            methods: IndexMap::new(),
        }
    }
}

/// An explicit annotation that contradicted the inferred type. The
/// annotation wins; the emitter surfaces these in the generated file's
/// comment stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationConflict {
    pub scope: String,
    pub name: String,
    pub annotated: NativeType,
    pub inferred: NativeType,
}

/// Everything component A computes for one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleTypes {
    /// `(scope_path, name) → NativeType`; module scope is `""`.
    pub scoped: ScopeTable,
    /// Function scope path → inferred return type. Absent entry means
    /// the function never returns a value.
    pub func_return_types: IndexMap<String, NativeType>,
    /// Function scope path → per-position union of argument types seen
    /// across all call sites.
    pub call_args: IndexMap<String, Vec<NativeType>>,
    /// Class name → field and method tables.
    pub class_fields: IndexMap<String, ClassFieldTypes>,
    pub annotation_conflicts: Vec<AnnotationConflict>,
}

impl ModuleTypes {
    /// Scoped lookup with outward walk; `Unknown` when nothing is known.
    pub fn var_type(&self, scope: &str, name: &str) -> NativeType {
        self.scoped
            .lookup(scope, name)
            .cloned()
            .unwrap_or(NativeType::Unknown)
    }

    pub fn return_type(&self, func_path: &str) -> Option<&NativeType> {
        self.func_return_types.get(func_path)
    }

    pub fn class(&self, name: &str) -> Option<&ClassFieldTypes> {
        self.class_fields.get(name)
    }
}

/// Summary of a function definition used to resolve calls by name.
#[derive(Debug, Clone)]
struct FuncDef {
    path: String,
    params: Vec<HirParam>,
    ret_annotation: Option<NativeType>,
    is_generator: bool,
}

pub struct TypeInferencer {
    types: ModuleTypes,
    /// Definition site lookup: scope path → definition.
    functions: IndexMap<String, FuncDef>,
    classes: IndexSet<String>,
    /// First base per class, for `super()` dispatch resolution.
    class_bases: IndexMap<String, String>,
    /// Return-type hints for imported symbols, keyed by dotted name
    /// (e.g. `json.dumps`). Fed from the import registry.
    external_returns: IndexMap<String, NativeType>,
    /// Names declared `global` in the scope currently being walked.
    global_names: IndexMap<String, IndexSet<String>>,
    closure_counter: u32,
    changed: bool,
}

impl TypeInferencer {
    pub fn new() -> Self {
        Self {
            types: ModuleTypes::default(),
            functions: IndexMap::new(),
            classes: IndexSet::new(),
            class_bases: IndexMap::new(),
            external_returns: IndexMap::new(),
            global_names: IndexMap::new(),
            closure_counter: 0,
            changed: false,
        }
    }

    /// Seed return-type hints for imported symbols.
    pub fn with_external_returns(mut self, hints: IndexMap<String, NativeType>) -> Self {
        self.external_returns = hints;
        self
    }

    /// Run inference to fixpoint over one module.
    pub fn infer_module(mut self, module: &HirModule) -> Result<ModuleTypes> {
        self.collect_definitions(module);

        for pass in 0..MAX_WIDEN_PASSES {
            self.changed = false;
            self.closure_counter = 0;
            self.walk_body("", &module.body, None);
            trace!(pass, changed = self.changed, "type inference pass");
            if !self.changed {
                debug!(passes = pass + 1, "type inference converged");
                // Conflicts accumulate across passes; keep each one once.
                self.types.annotation_conflicts.dedup();
                return Ok(self.types);
            }
        }
        bail!("internal invariant breach: type widening did not converge")
    }

    /// Pre-pass: register every function and class definition so call
    /// resolution works before the defining statement is reached.
    fn collect_definitions(&mut self, module: &HirModule) {
        for stmt in &module.body {
            self.collect_stmt_definitions("", stmt);
        }
    }

    fn collect_stmt_definitions(&mut self, scope: &str, stmt: &HirStmt) {
        match stmt {
            HirStmt::FunctionDef(func) => {
                let path = child_scope(scope, &func.name);
                self.functions.insert(
                    path.clone(),
                    FuncDef {
                        path: path.clone(),
                        params: func.params.to_vec(),
                        ret_annotation: func.ret_annotation.clone(),
                        is_generator: body_has_yield(&func.body),
                    },
                );
                for inner in &func.body {
                    self.collect_stmt_definitions(&path, inner);
                }
            }
            HirStmt::ClassDef(class) => self.collect_class_definitions(scope, class),
            HirStmt::If {
                then_body,
                else_body,
                ..
            } => {
                for s in then_body {
                    self.collect_stmt_definitions(scope, s);
                }
                if let Some(body) = else_body {
                    for s in body {
                        self.collect_stmt_definitions(scope, s);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_class_definitions(&mut self, scope: &str, class: &HirClass) {
        self.classes.insert(class.name.clone());
        if let Some(base) = class.bases.first() {
            self.class_bases.insert(class.name.clone(), base.clone());
        }
        let class_scope = child_scope(scope, &class.name);
        self.types
            .class_fields
            .entry(class.name.clone())
            .or_insert_with(ClassFieldTypes::new);
        for method in &class.methods {
            let path = child_scope(&class_scope, &method.name);
            self.functions.insert(
                path.clone(),
                FuncDef {
                    path,
                    params: method.params.to_vec(),
                    ret_annotation: method.ret_annotation.clone(),
                    is_generator: body_has_yield(&method.body),
                },
            );
        }
        for nested in &class.nested {
            self.collect_class_definitions(&class_scope, nested);
        }
    }

    /// Resolve a called name to a known function definition, walking
    /// outward from the current scope.
    fn resolve_function(&self, scope: &str, name: &str) -> Option<&FuncDef> {
        let mut current = scope.to_string();
        loop {
            let candidate = child_scope(&current, name);
            if let Some(def) = self.functions.get(&candidate) {
                return Some(def);
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

    fn record(&mut self, scope: &str, name: &str, ty: NativeType) {
        if self.types.scoped.record(scope, name, ty) {
            self.changed = true;
        }
    }

    fn record_return(&mut self, func_path: &str, ty: NativeType) {
        let entry = self
            .types
            .func_return_types
            .entry(func_path.to_string())
            .or_insert(NativeType::Unknown);
        let widened = widen(entry, &ty);
        if *entry != widened {
            *entry = widened;
            self.changed = true;
        }
    }

    fn record_call_args(&mut self, func_path: &str, arg_types: &[NativeType]) {
        let slots = self
            .types
            .call_args
            .entry(func_path.to_string())
            .or_default();
        if slots.len() < arg_types.len() {
            slots.resize(arg_types.len(), NativeType::Unknown);
            self.changed = true;
        }
        for (slot, ty) in slots.iter_mut().zip(arg_types) {
            let widened = widen(slot, ty);
            if *slot != widened {
                *slot = widened;
                self.changed = true;
            }
        }
    }

    fn record_class_field(&mut self, class: &str, field: &str, ty: NativeType) {
        let table = self
            .types
            .class_fields
            .entry(class.to_string())
            .or_insert_with(ClassFieldTypes::new);
        let entry = table
            .fields
            .entry(field.to_string())
            .or_insert(NativeType::Unknown);
        let widened = widen(entry, &ty);
        if *entry != widened {
            *entry = widened;
            self.changed = true;
        }
    }

    fn record_method_return(&mut self, class: &str, method: &str, ty: NativeType) {
        let table = self
            .types
            .class_fields
            .entry(class.to_string())
            .or_insert_with(ClassFieldTypes::new);
        let entry = table
            .methods
            .entry(method.to_string())
            .or_insert(NativeType::Unknown);
        let widened = widen(entry, &ty);
        if *entry != widened {
            *entry = widened;
            self.changed = true;
        }
    }

    // ------------------------------------------------------------------
    // Statement walking
    // ------------------------------------------------------------------

    fn walk_body(&mut self, scope: &str, body: &[HirStmt], class: Option<&str>) {
        for stmt in body {
            self.walk_stmt(scope, stmt, class);
        }
    }

    fn walk_stmt(&mut self, scope: &str, stmt: &HirStmt, class: Option<&str>) {
        match stmt {
            HirStmt::Assign { targets, value } => {
                let value_ty = self.infer_expr(scope, value, class);
                for target in targets {
                    self.bind_target(scope, target, &value_ty, class);
                }
            }
            HirStmt::AnnAssign {
                target,
                annotation,
                value,
            } => {
                if let Some(v) = value {
                    let inferred = self.infer_expr(scope, v, class);
                    if !inferred.is_unknown()
                        && widen(annotation, &inferred) != *annotation
                        && *annotation != inferred
                    {
                        if let Some(name) = target.as_symbol() {
                            let conflict = AnnotationConflict {
                                scope: scope.to_string(),
                                name: name.to_string(),
                                annotated: annotation.clone(),
                                inferred,
                            };
                            if !self.types.annotation_conflicts.contains(&conflict) {
                                self.types.annotation_conflicts.push(conflict);
                            }
                        }
                    }
                }
                // The annotation wins over anything observed.
                match target {
                    AssignTarget::Symbol(name) => {
                        let scope_key = self.binding_scope(scope, name);
                        if self.types.scoped.get_local(&scope_key, name) != Some(annotation) {
                            self.types.scoped.set(&scope_key, name, annotation.clone());
                            self.changed = true;
                        }
                    }
                    AssignTarget::Attribute { value, attr } => {
                        if is_self_expr(value) {
                            if let Some(cls) = class {
                                self.record_class_field(cls, attr, annotation.clone());
                            }
                        }
                    }
                    _ => {}
                }
            }
            HirStmt::AugAssign { target, op, value } => {
                let rhs = self.infer_expr(scope, value, class);
                match target {
                    AssignTarget::Symbol(name) => {
                        let current = self.types.var_type(scope, name);
                        let result = self.binary_result(*op, &current, &rhs, value);
                        self.bind_target(scope, target, &result, class);
                    }
                    AssignTarget::Attribute { value: base, attr } => {
                        if is_self_expr(base) {
                            if let Some(cls) = class {
                                let current = self
                                    .types
                                    .class(cls)
                                    .and_then(|c| c.fields.get(attr))
                                    .cloned()
                                    .unwrap_or(NativeType::Unknown);
                                let result = self.binary_result(*op, &current, &rhs, value);
                                self.record_class_field(cls, attr, result);
                            }
                        }
                    }
                    _ => {}
                }
            }
            HirStmt::Return(value) => {
                // A bare `return` is not a value-returning statement.
                if let Some(v) = value {
                    let ty = self.infer_expr(scope, v, class);
                    self.record_return(scope, ty.clone());
                    let class_name = class_of_method_scope(scope).unwrap_or_default().to_string();
                    if self.classes.contains(&class_name) {
                        if let Some(method) = scope.rsplit('/').next() {
                            let method = method.to_string();
                            self.record_method_return(&class_name, &method, ty);
                        }
                    }
                }
            }
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                self.infer_expr(scope, condition, class);
                self.walk_body(scope, then_body, class);
                if let Some(body) = else_body {
                    self.walk_body(scope, body, class);
                }
            }
            HirStmt::While {
                condition,
                body,
                orelse,
            } => {
                self.infer_expr(scope, condition, class);
                self.walk_body(scope, body, class);
                self.walk_body(scope, orelse, class);
            }
            HirStmt::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iter_ty = self.infer_expr(scope, iter, class);
                let elem = iteration_element(&iter_ty, iter);
                self.bind_target(scope, target, &elem, class);
                self.walk_body(scope, body, class);
                self.walk_body(scope, orelse, class);
            }
            HirStmt::Expr(expr) => {
                self.infer_expr(scope, expr, class);
            }
            HirStmt::Raise { exc, cause } => {
                if let Some(e) = exc {
                    self.infer_expr(scope, e, class);
                }
                if let Some(c) = cause {
                    self.infer_expr(scope, c, class);
                }
            }
            HirStmt::Assert { test, msg } => {
                self.infer_expr(scope, test, class);
                if let Some(m) = msg {
                    self.infer_expr(scope, m, class);
                }
            }
            HirStmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.walk_body(scope, body, class);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        let exc_ty = handler
                            .exc_types
                            .first()
                            .map(|t| NativeType::ClassInstance(t.clone()))
                            .unwrap_or(NativeType::PyValue);
                        self.record(scope, name, exc_ty);
                    }
                    self.walk_body(scope, &handler.body, class);
                }
                self.walk_body(scope, orelse, class);
                self.walk_body(scope, finalbody, class);
            }
            HirStmt::With { items, body } => {
                for item in items {
                    let ctx_ty = self.infer_expr(scope, &item.context, class);
                    if let Some(target) = &item.target {
                        // The target binds the `__enter__` result, not
                        // the context object.
                        let bound = match &ctx_ty {
                            NativeType::ClassInstance(cls) => self
                                .types
                                .class(cls)
                                .and_then(|c| c.methods.get("__enter__"))
                                .cloned()
                                .unwrap_or(ctx_ty.clone()),
                            other => other.clone(),
                        };
                        self.record(scope, target, bound);
                    }
                }
                self.walk_body(scope, body, class);
            }
            HirStmt::Global(names) => {
                let set = self.global_names.entry(scope.to_string()).or_default();
                for name in names {
                    set.insert(name.clone());
                }
            }
            HirStmt::Nonlocal(_) | HirStmt::Break | HirStmt::Continue | HirStmt::Pass => {}
            HirStmt::Delete(targets) => {
                for target in targets {
                    if let AssignTarget::Index { base, index } = target {
                        self.infer_expr(scope, base, class);
                        self.infer_expr(scope, index, class);
                    }
                }
            }
            HirStmt::FunctionDef(func) => self.walk_function(scope, func, class),
            HirStmt::ClassDef(cls) => self.walk_class(scope, cls),
            HirStmt::Unsupported(_) => {}
        }
    }

    fn walk_function(&mut self, scope: &str, func: &HirFunction, class: Option<&str>) {
        let path = child_scope(scope, &func.name);

        // Seed parameter types: annotation first, then call-site union,
        // then default-value type.
        let call_union = self.types.call_args.get(&path).cloned().unwrap_or_default();
        let mut positional_idx = 0usize;
        for param in &func.params {
            if param.name == "self" || param.name == "cls" {
                if let Some(cls) = class {
                    self.record(&path, &param.name, NativeType::ClassInstance(cls.to_string()));
                }
                continue;
            }
            let ty = match param.kind {
                ParamKind::Vararg => NativeType::list_of(NativeType::int()),
                ParamKind::Kwarg => {
                    NativeType::dict_of(NativeType::str_runtime(), NativeType::PyValue)
                }
                ParamKind::Positional => {
                    if let Some(annotation) = &param.annotation {
                        annotation.clone()
                    } else {
                        let from_calls = call_union
                            .get(positional_idx)
                            .cloned()
                            .unwrap_or(NativeType::Unknown);
                        let from_default = param
                            .default
                            .as_ref()
                            .map(|d| self.infer_expr(&path, d, class))
                            .unwrap_or(NativeType::Unknown);
                        widen(&from_calls, &from_default)
                    }
                }
            };
            if param.kind == ParamKind::Positional {
                positional_idx += 1;
            }
            self.record(&path, &param.name, ty);
        }

        self.walk_body(&path, &func.body, class);

        // Generators produce an eager sequence of their yield type.
        if body_has_yield(&func.body) {
            let yield_ty = self.yield_type(&path, &func.body, class);
            self.record_return(&path, NativeType::list_of(yield_ty));
        }
        if let Some(annotation) = &func.ret_annotation {
            if !matches!(annotation, NativeType::None) {
                self.record_return(&path, annotation.clone());
            }
        }
    }

    fn walk_class(&mut self, scope: &str, class: &HirClass) {
        let class_scope = child_scope(scope, &class.name);

        for field in &class.fields {
            let ty = if let Some(annotation) = &field.annotation {
                annotation.clone()
            } else if let Some(default) = &field.default {
                self.infer_expr(&class_scope, default, Some(&class.name))
            } else {
                NativeType::Unknown
            };
            self.record_class_field(&class.name, &field.name, ty);
        }

        for method in &class.methods {
            self.walk_function(&class_scope, method, Some(&class.name));
            let method_path = child_scope(&class_scope, &method.name);
            if let Some(ret) = self.types.func_return_types.get(&method_path).cloned() {
                self.record_method_return(&class.name, &method.name, ret);
            }
        }
        for nested in &class.nested {
            self.walk_class(&class_scope, nested);
        }
    }

    /// The scope a symbol binding should land in, honoring `global`.
    fn binding_scope(&self, scope: &str, name: &str) -> String {
        if let Some(globals) = self.global_names.get(scope) {
            if globals.contains(name) {
                return String::new();
            }
        }
        scope.to_string()
    }

    fn bind_target(
        &mut self,
        scope: &str,
        target: &AssignTarget,
        value_ty: &NativeType,
        class: Option<&str>,
    ) {
        match target {
            AssignTarget::Symbol(name) => {
                let scope_key = self.binding_scope(scope, name);
                self.record(&scope_key, name, value_ty.clone());
            }
            AssignTarget::Attribute { value, attr } => {
                if is_self_expr(value) {
                    if let Some(cls) = class {
                        self.record_class_field(cls, attr, value_ty.clone());
                    }
                } else if let HirExpr::Var(obj) = value {
                    // Attribute store on a known instance refines that
                    // class's field table.
                    if let NativeType::ClassInstance(cls) = self.types.var_type(scope, obj) {
                        self.record_class_field(&cls, attr, value_ty.clone());
                    }
                }
            }
            AssignTarget::Index { base, index } => {
                self.infer_expr(scope, index, class);
                // `xs[i] = v` refines the container's element type.
                if let HirExpr::Var(name) = base {
                    let container = self.types.var_type(scope, name);
                    let refined = match container {
                        NativeType::List(elem) => {
                            NativeType::List(Box::new(widen(&elem, value_ty)))
                        }
                        NativeType::Dict(k, v) => {
                            NativeType::Dict(k, Box::new(widen(&v, value_ty)))
                        }
                        other => other,
                    };
                    self.record(scope, name, refined);
                }
            }
            AssignTarget::Slice { base, lower, upper } => {
                self.infer_expr(scope, base, class);
                if let Some(l) = lower {
                    self.infer_expr(scope, l, class);
                }
                if let Some(u) = upper {
                    self.infer_expr(scope, u, class);
                }
            }
            AssignTarget::Tuple(targets) => match value_ty {
                NativeType::Tuple(elems) if elems.len() == targets.len() => {
                    for (t, ty) in targets.iter().zip(elems) {
                        self.bind_target(scope, t, ty, class);
                    }
                }
                other => {
                    let elem = other.element_type();
                    for t in targets {
                        self.bind_target(scope, t, &elem, class);
                    }
                }
            },
        }
    }

    fn yield_type(&mut self, scope: &str, body: &[HirStmt], class: Option<&str>) -> NativeType {
        let mut acc = NativeType::Unknown;
        collect_yield_exprs(body, &mut |expr, from| {
            let ty = self.infer_expr(scope, expr, class);
            let elem = if from { ty.element_type() } else { ty };
            acc = widen(&acc, &elem);
        });
        acc
    }

    // ------------------------------------------------------------------
    // Expression inference
    // ------------------------------------------------------------------

    pub(crate) fn infer_expr(
        &mut self,
        scope: &str,
        expr: &HirExpr,
        class: Option<&str>,
    ) -> NativeType {
        match expr {
            HirExpr::Literal(lit) => infer_literal(lit),
            HirExpr::Var(name) => self.infer_var(scope, name, class),
            HirExpr::Binary { op, left, right } => {
                let lt = self.infer_expr(scope, left, class);
                let rt = self.infer_expr(scope, right, class);
                self.binary_result(*op, &lt, &rt, right)
            }
            HirExpr::Unary { op, operand } => {
                let ty = self.infer_expr(scope, operand, class);
                match op {
                    UnaryOp::Not => NativeType::Bool,
                    UnaryOp::Neg | UnaryOp::Pos => ty,
                    UnaryOp::BitNot => NativeType::int(),
                }
            }
            HirExpr::Bool { values, .. } => {
                let mut types = Vec::new();
                for v in values {
                    types.push(self.infer_expr(scope, v, class));
                }
                // `and`/`or` return one of their operands, not a bool.
                if types.iter().all(|t| matches!(t, NativeType::Bool)) {
                    NativeType::Bool
                } else {
                    types
                        .iter()
                        .fold(NativeType::Unknown, |acc, t| widen(&acc, t))
                }
            }
            HirExpr::Compare {
                left, comparators, ..
            } => {
                self.infer_expr(scope, left, class);
                for c in comparators {
                    self.infer_expr(scope, c, class);
                }
                NativeType::Bool
            }
            HirExpr::Call { func, args, kwargs } => self.infer_call(scope, func, args, kwargs, class),
            HirExpr::Index { base, index } => {
                let base_ty = self.infer_expr(scope, base, class);
                let index_ty = self.infer_expr(scope, index, class);
                match (&base_ty, &**index) {
                    (NativeType::Tuple(elems), HirExpr::Literal(Literal::Int(i))) => {
                        let idx = usize::try_from(*i).unwrap_or(0);
                        elems.get(idx).cloned().unwrap_or(NativeType::Unknown)
                    }
                    (NativeType::Dict(_, v) | NativeType::DefaultDict(_, v), _) => (**v).clone(),
                    (NativeType::Counter, _) => NativeType::int(),
                    (NativeType::Str(_), _) => NativeType::str_runtime(),
                    _ => {
                        let _ = index_ty;
                        base_ty.element_type()
                    }
                }
            }
            HirExpr::Slice { base, .. } => self.infer_expr(scope, base, class),
            HirExpr::Attribute { value, attr } => self.infer_attribute(scope, value, attr, class),
            HirExpr::List(elems) => {
                let elem = self.widen_all(scope, elems, class);
                NativeType::List(Box::new(elem))
            }
            HirExpr::Set(elems) => {
                let elem = self.widen_all(scope, elems, class);
                NativeType::Set(Box::new(elem))
            }
            HirExpr::Tuple(elems) => NativeType::Tuple(
                elems
                    .iter()
                    .map(|e| self.infer_expr(scope, e, class))
                    .collect(),
            ),
            HirExpr::Dict(items) => {
                let mut key = NativeType::Unknown;
                let mut value = NativeType::Unknown;
                for (k, v) in items {
                    key = widen(&key, &self.infer_expr(scope, k, class));
                    value = widen(&value, &self.infer_expr(scope, v, class));
                }
                NativeType::dict_of(key, value)
            }
            HirExpr::ListComp {
                element,
                generators,
            }
            | HirExpr::GeneratorExp {
                element,
                generators,
            } => {
                let elem = self.infer_comprehension_element(scope, element, generators, class);
                NativeType::List(Box::new(elem))
            }
            HirExpr::SetComp {
                element,
                generators,
            } => {
                let elem = self.infer_comprehension_element(scope, element, generators, class);
                NativeType::Set(Box::new(elem))
            }
            HirExpr::DictComp {
                key,
                value,
                generators,
            } => {
                self.bind_comprehension_targets(scope, generators, class);
                let k = self.infer_expr(scope, key, class);
                let v = self.infer_expr(scope, value, class);
                NativeType::dict_of(k, v)
            }
            HirExpr::Lambda { params, body } => {
                for p in params {
                    self.record(scope, p, NativeType::Unknown);
                }
                self.infer_expr(scope, body, class);
                let id = self.closure_counter;
                self.closure_counter += 1;
                NativeType::Closure(id)
            }
            HirExpr::IfExp {
                test,
                body,
                orelse,
            } => {
                self.infer_expr(scope, test, class);
                let a = self.infer_expr(scope, body, class);
                let b = self.infer_expr(scope, orelse, class);
                widen(&a, &b)
            }
            HirExpr::Yield(value) => {
                if let Some(v) = value {
                    self.infer_expr(scope, v, class);
                }
                NativeType::None
            }
            HirExpr::YieldFrom(value) => {
                self.infer_expr(scope, value, class);
                NativeType::None
            }
            HirExpr::Await(value) => self.infer_expr(scope, value, class),
            HirExpr::FString(parts) => {
                for part in parts {
                    if let zigpyler_hir::FStringPart::Expr { value, .. } = part {
                        self.infer_expr(scope, value, class);
                    }
                }
                NativeType::str_runtime()
            }
            HirExpr::Starred(value) => self.infer_expr(scope, value, class),
            HirExpr::NamedExpr { target, value } => {
                let ty = self.infer_expr(scope, value, class);
                self.record(scope, target, ty.clone());
                ty
            }
            HirExpr::Unsupported(_) => NativeType::PyValue,
        }
    }

    fn widen_all(&mut self, scope: &str, exprs: &[HirExpr], class: Option<&str>) -> NativeType {
        let mut acc = NativeType::Unknown;
        for e in exprs {
            acc = widen(&acc, &self.infer_expr(scope, e, class));
        }
        acc
    }

    fn bind_comprehension_targets(
        &mut self,
        scope: &str,
        generators: &[Comprehension],
        class: Option<&str>,
    ) {
        for generator in generators {
            let iter_ty = self.infer_expr(scope, &generator.iter, class);
            let elem = iteration_element(&iter_ty, &generator.iter);
            self.bind_target(scope, &generator.target, &elem, class);
            for cond in &generator.ifs {
                self.infer_expr(scope, cond, class);
            }
        }
    }

    fn infer_comprehension_element(
        &mut self,
        scope: &str,
        element: &HirExpr,
        generators: &[Comprehension],
        class: Option<&str>,
    ) -> NativeType {
        self.bind_comprehension_targets(scope, generators, class);
        self.infer_expr(scope, element, class)
    }

    fn infer_var(&mut self, scope: &str, name: &str, class: Option<&str>) -> NativeType {
        if name == "self" {
            if let Some(cls) = class {
                return NativeType::ClassInstance(cls.to_string());
            }
        }
        if let Some(ty) = self.types.scoped.lookup(scope, name) {
            return ty.clone();
        }
        if self.classes.contains(name) {
            return NativeType::Callable;
        }
        if self.resolve_function(scope, name).is_some() {
            return NativeType::Callable;
        }
        NativeType::Unknown
    }

    fn infer_attribute(
        &mut self,
        scope: &str,
        value: &HirExpr,
        attr: &str,
        class: Option<&str>,
    ) -> NativeType {
        let base_ty = self.infer_expr(scope, value, class);
        if let NativeType::ClassInstance(cls) = &base_ty {
            if let Some(fields) = self.types.class(cls) {
                if let Some(ty) = fields.fields.get(attr) {
                    return ty.clone();
                }
            }
        }
        if let Some(dotted) = (HirExpr::Attribute {
            value: Box::new(value.clone()),
            attr: attr.to_string(),
        })
        .dotted_name()
        {
            if let Some(hint) = self.external_returns.get(&dotted) {
                return hint.clone();
            }
        }
        NativeType::Unknown
    }

    fn binary_result(
        &self,
        op: BinOp,
        left: &NativeType,
        right: &NativeType,
        rhs_expr: &HirExpr,
    ) -> NativeType {
        use NativeType::{BigInt, Bool, Float, Int, List, Str};
        let promote_big = |t: &NativeType| matches!(t, Int(IntKind::Unbounded) | BigInt);

        match op {
            BinOp::Add => match (left, right) {
                (Int(_), Int(_)) if promote_big(left) || promote_big(right) => {
                    Int(IntKind::Unbounded)
                }
                (Int(_), Int(_)) | (Bool, Int(_)) | (Int(_), Bool) => NativeType::int(),
                (Int(_) | Bool, Float) | (Float, Int(_) | Bool) | (Float, Float) => Float,
                (Int(_), BigInt) | (BigInt, Int(_)) | (BigInt, BigInt) => BigInt,
                (Str(_), Str(_)) => NativeType::str_runtime(),
                (List(a), List(b)) => List(Box::new(widen(a, b))),
                (NativeType::Tuple(a), NativeType::Tuple(b)) => {
                    NativeType::Tuple(a.iter().chain(b).cloned().collect())
                }
                _ => left.clone(),
            },
            BinOp::Sub | BinOp::Mod => match (left, right) {
                (Str(_), _) if op == BinOp::Mod => NativeType::str_runtime(),
                (Int(_), Int(_)) if promote_big(left) || promote_big(right) => {
                    Int(IntKind::Unbounded)
                }
                (Int(_), Int(_)) | (Bool, Int(_)) | (Int(_), Bool) => NativeType::int(),
                (Int(_) | Bool, Float) | (Float, Int(_) | Bool) | (Float, Float) => Float,
                (Int(_), BigInt) | (BigInt, Int(_)) | (BigInt, BigInt) => BigInt,
                _ => left.clone(),
            },
            BinOp::Mul => match (left, right) {
                (Str(_), Int(_)) | (Int(_), Str(_)) => NativeType::str_runtime(),
                (List(e), Int(_)) | (Int(_), List(e)) => List(e.clone()),
                (Int(_), Int(_)) if promote_big(left) || promote_big(right) => {
                    Int(IntKind::Unbounded)
                }
                (Int(_), Int(_)) | (Bool, Int(_)) | (Int(_), Bool) => NativeType::int(),
                (Int(_) | Bool, Float) | (Float, Int(_) | Bool) | (Float, Float) => Float,
                (Int(_), BigInt) | (BigInt, Int(_)) | (BigInt, BigInt) => BigInt,
                _ => left.clone(),
            },
            // True division always lands in float space.
            BinOp::Div => match (left, right) {
                (Int(_) | Bool | Float, Int(_) | Bool | Float) => Float,
                _ => left.clone(),
            },
            BinOp::FloorDiv => match (left, right) {
                (Int(_), Int(_)) if promote_big(left) || promote_big(right) => {
                    Int(IntKind::Unbounded)
                }
                (Int(_), Int(_)) | (Bool, Int(_)) | (Int(_), Bool) => NativeType::int(),
                (Float, _) | (_, Float) => Float,
                _ => left.clone(),
            },
            BinOp::Pow => {
                // Large literal exponents promote to big-integer storage.
                if let HirExpr::Literal(Literal::Int(exp)) = rhs_expr {
                    if *exp >= POW_PROMOTION_THRESHOLD && matches!(left, Int(_)) {
                        return Int(IntKind::Unbounded);
                    }
                }
                match (left, right) {
                    (Int(_), Int(_)) if promote_big(left) || promote_big(right) => {
                        Int(IntKind::Unbounded)
                    }
                    (Int(_), Int(_)) => NativeType::int(),
                    (Float, _) | (_, Float) => Float,
                    (BigInt, _) | (_, BigInt) => BigInt,
                    _ => left.clone(),
                }
            }
            BinOp::LShift => {
                if let HirExpr::Literal(Literal::Int(amount)) = rhs_expr {
                    if *amount >= SHIFT_PROMOTION_THRESHOLD {
                        return Int(IntKind::Unbounded);
                    }
                }
                if promote_big(left) || promote_big(right) {
                    Int(IntKind::Unbounded)
                } else {
                    NativeType::int()
                }
            }
            BinOp::RShift | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                if promote_big(left) || promote_big(right) {
                    Int(IntKind::Unbounded)
                } else if matches!((left, right), (NativeType::Set(_), NativeType::Set(_))) {
                    left.clone()
                } else {
                    NativeType::int()
                }
            }
            BinOp::MatMul => left.clone(),
        }
    }

    fn infer_call(
        &mut self,
        scope: &str,
        func: &HirExpr,
        args: &[HirExpr],
        kwargs: &[CallKeyword],
        class: Option<&str>,
    ) -> NativeType {
        let arg_types: Vec<NativeType> = args
            .iter()
            .map(|a| self.infer_expr(scope, a, class))
            .collect();
        for kw in kwargs {
            self.infer_expr(scope, &kw.value, class);
        }

        match func {
            HirExpr::Var(name) => {
                if self.classes.contains(name.as_str()) {
                    if let Some(def_path) = self.constructor_path(scope, name) {
                        self.record_call_args(&def_path, &arg_types);
                    }
                    return NativeType::ClassInstance(name.clone());
                }
                if let Some(def) = self.resolve_function(scope, name) {
                    let path = def.path.clone();
                    let annotation = def.ret_annotation.clone();
                    let is_generator = def.is_generator;
                    self.record_call_args(&path, &arg_types);
                    if let Some(ret) = annotation {
                        if !matches!(ret, NativeType::None) {
                            return ret;
                        }
                        return NativeType::None;
                    }
                    if is_generator {
                        return self
                            .types
                            .return_type(&path)
                            .cloned()
                            .unwrap_or(NativeType::list_of(NativeType::Unknown));
                    }
                    return self
                        .types
                        .return_type(&path)
                        .cloned()
                        .unwrap_or(NativeType::Unknown);
                }
                builtin_call_type(name, &arg_types)
            }
            HirExpr::Attribute { value, attr } => {
                // `super().m(...)` resolves through the base chain.
                if is_super_call(value) {
                    if let Some(cls) = class {
                        if let Some(ret) = self.super_method_return(cls, attr) {
                            return ret;
                        }
                    }
                    return NativeType::Unknown;
                }
                let recv = self.infer_expr(scope, value, class);
                if let NativeType::ClassInstance(cls) = &recv {
                    // Record call-site argument types against the method.
                    let method_path = child_scope(&child_scope("", cls), attr);
                    if self.functions.contains_key(&method_path) {
                        self.record_call_args(&method_path, &arg_types);
                    }
                    if let Some(fields) = self.types.class(cls) {
                        if let Some(ret) = fields.methods.get(attr) {
                            return ret.clone();
                        }
                    }
                }
                if let Some(dotted) = func.dotted_name() {
                    if let Some(hint) = self.external_returns.get(&dotted).cloned() {
                        return hint;
                    }
                }
                method_call_type(&recv, attr, &arg_types)
            }
            HirExpr::Lambda { .. } => {
                self.infer_expr(scope, func, class);
                NativeType::Unknown
            }
            other => {
                self.infer_expr(scope, other, class);
                NativeType::Unknown
            }
        }
    }

    fn super_method_return(&self, class: &str, method: &str) -> Option<NativeType> {
        let mut current = self.class_bases.get(class)?.clone();
        let mut guard = 0;
        loop {
            guard += 1;
            if guard > self.classes.len() + 1 {
                return None;
            }
            if let Some(fields) = self.types.class(&current) {
                if let Some(ret) = fields.methods.get(method) {
                    return Some(ret.clone());
                }
            }
            current = self.class_bases.get(&current)?.clone();
        }
    }

    fn constructor_path(&self, scope: &str, class_name: &str) -> Option<String> {
        let _ = scope;
        let path = child_scope(&child_scope("", class_name), "__init__");
        self.functions.contains_key(&path).then_some(path)
    }
}

impl Default for TypeInferencer {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------
// Free helpers
// ----------------------------------------------------------------------

fn infer_literal(lit: &Literal) -> NativeType {
    match lit {
        Literal::Int(_) => NativeType::int(),
        Literal::BigInt(_) => NativeType::BigInt,
        Literal::Float(_) => NativeType::Float,
        Literal::Str(_) => NativeType::str_literal(),
        Literal::Bytes(_) => NativeType::Bytes,
        Literal::Bool(_) => NativeType::Bool,
        Literal::None => NativeType::None,
        Literal::Ellipsis => NativeType::PyValue,
    }
}

fn is_self_expr(expr: &HirExpr) -> bool {
    matches!(expr, HirExpr::Var(name) if name == "self")
}

fn is_super_call(expr: &HirExpr) -> bool {
    matches!(
        expr,
        HirExpr::Call { func, .. } if matches!(&**func, HirExpr::Var(n) if n == "super")
    )
}

fn class_of_method_scope(scope: &str) -> Option<&str> {
    let mut parts = scope.rsplit('/');
    let _method = parts.next()?;
    parts.next()
}

/// What a `for` loop binds per iteration, given the iterable's type and
/// expression (so `range(...)` and `enumerate(...)` stay precise even
/// when the type alone is vague).
pub fn iteration_element(iter_ty: &NativeType, iter_expr: &HirExpr) -> NativeType {
    if let HirExpr::Call { func, .. } = iter_expr {
        if let HirExpr::Var(name) = &**func {
            if name == "range" {
                return NativeType::int();
            }
        }
    }
    match iter_ty {
        NativeType::Dict(k, _) | NativeType::DefaultDict(k, _) => (**k).clone(),
        other => other.element_type(),
    }
}

fn body_has_yield(body: &[HirStmt]) -> bool {
    let mut found = false;
    collect_yield_exprs(body, &mut |_, _| found = true);
    found
}

/// Visit every yield in a body, skipping nested function and class
/// definitions (their yields belong to them).
fn collect_yield_exprs(body: &[HirStmt], f: &mut impl FnMut(&HirExpr, bool)) {
    fn visit_expr(expr: &HirExpr, f: &mut impl FnMut(&HirExpr, bool)) {
        match expr {
            HirExpr::Yield(Some(v)) => {
                f(v, false);
                visit_expr(v, f);
            }
            HirExpr::Yield(None) => {}
            HirExpr::YieldFrom(v) => {
                f(v, true);
                visit_expr(v, f);
            }
            HirExpr::Binary { left, right, .. } => {
                visit_expr(left, f);
                visit_expr(right, f);
            }
            HirExpr::Unary { operand, .. } => visit_expr(operand, f),
            HirExpr::Bool { values, .. } => values.iter().for_each(|v| visit_expr(v, f)),
            HirExpr::Compare {
                left, comparators, ..
            } => {
                visit_expr(left, f);
                comparators.iter().for_each(|c| visit_expr(c, f));
            }
            HirExpr::Call { func, args, kwargs } => {
                visit_expr(func, f);
                args.iter().for_each(|a| visit_expr(a, f));
                kwargs.iter().for_each(|k| visit_expr(&k.value, f));
            }
            HirExpr::Index { base, index } => {
                visit_expr(base, f);
                visit_expr(index, f);
            }
            HirExpr::Attribute { value, .. } | HirExpr::Starred(value) => visit_expr(value, f),
            HirExpr::IfExp {
                test,
                body,
                orelse,
            } => {
                visit_expr(test, f);
                visit_expr(body, f);
                visit_expr(orelse, f);
            }
            HirExpr::List(items) | HirExpr::Tuple(items) | HirExpr::Set(items) => {
                items.iter().for_each(|e| visit_expr(e, f));
            }
            HirExpr::Dict(items) => items.iter().for_each(|(k, v)| {
                visit_expr(k, f);
                visit_expr(v, f);
            }),
            HirExpr::Await(v) => visit_expr(v, f),
            HirExpr::NamedExpr { value, .. } => visit_expr(value, f),
            _ => {}
        }
    }

    for stmt in body {
        match stmt {
            HirStmt::FunctionDef(_) | HirStmt::ClassDef(_) => {}
            HirStmt::Assign { value, .. } => visit_expr(value, f),
            HirStmt::AnnAssign { value: Some(v), .. } => visit_expr(v, f),
            HirStmt::AugAssign { value, .. } => visit_expr(value, f),
            HirStmt::Return(Some(v)) => visit_expr(v, f),
            HirStmt::Expr(e) => visit_expr(e, f),
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                visit_expr(condition, f);
                collect_yield_exprs(then_body, f);
                if let Some(body) = else_body {
                    collect_yield_exprs(body, f);
                }
            }
            HirStmt::While {
                condition,
                body,
                orelse,
            } => {
                visit_expr(condition, f);
                collect_yield_exprs(body, f);
                collect_yield_exprs(orelse, f);
            }
            HirStmt::For {
                iter, body, orelse, ..
            } => {
                visit_expr(iter, f);
                collect_yield_exprs(body, f);
                collect_yield_exprs(orelse, f);
            }
            HirStmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_yield_exprs(body, f);
                for h in handlers {
                    collect_yield_exprs(&h.body, f);
                }
                collect_yield_exprs(orelse, f);
                collect_yield_exprs(finalbody, f);
            }
            HirStmt::With { items, body } => {
                for item in items {
                    visit_expr(&item.context, f);
                }
                collect_yield_exprs(body, f);
            }
            _ => {}
        }
    }
}

/// Return types for named builtins; anything unknown stays `Unknown`.
pub fn builtin_call_type(name: &str, args: &[NativeType]) -> NativeType {
    let first = args.first();
    match name {
        "len" | "ord" | "hash" | "id" => NativeType::int(),
        "abs" => first.cloned().unwrap_or(NativeType::int()),
        "int" => NativeType::int(),
        "float" => NativeType::Float,
        "bool" | "isinstance" | "issubclass" | "hasattr" | "callable" | "any" | "all" => {
            NativeType::Bool
        }
        "str" | "repr" | "format" | "chr" | "input" | "hex" | "oct" | "bin" => {
            NativeType::str_runtime()
        }
        "bytes" | "bytearray" => NativeType::Bytes,
        "range" => NativeType::list_of(NativeType::int()),
        "list" | "sorted" | "reversed" => NativeType::List(Box::new(
            first.map(NativeType::element_type).unwrap_or(NativeType::Unknown),
        )),
        "set" | "frozenset" => NativeType::Set(Box::new(
            first.map(NativeType::element_type).unwrap_or(NativeType::Unknown),
        )),
        "dict" => match first {
            Some(NativeType::Dict(k, v)) => NativeType::Dict(k.clone(), v.clone()),
            _ => NativeType::dict_of(NativeType::Unknown, NativeType::Unknown),
        },
        "tuple" => NativeType::PyValue,
        "sum" => first
            .map(NativeType::element_type)
            .unwrap_or(NativeType::int()),
        "min" | "max" | "next" => first
            .map(NativeType::element_type)
            .unwrap_or(NativeType::Unknown),
        "enumerate" => NativeType::list_of(NativeType::Tuple(vec![
            NativeType::int(),
            first
                .map(NativeType::element_type)
                .unwrap_or(NativeType::Unknown),
        ])),
        "zip" => NativeType::list_of(NativeType::Tuple(
            args.iter().map(NativeType::element_type).collect(),
        )),
        "map" => NativeType::list_of(NativeType::Unknown),
        "filter" => NativeType::list_of(
            args.get(1)
                .map(NativeType::element_type)
                .unwrap_or(NativeType::Unknown),
        ),
        "round" => {
            if args.len() >= 2 {
                NativeType::Float
            } else {
                NativeType::int()
            }
        }
        "pow" => first.cloned().unwrap_or(NativeType::int()),
        "divmod" => NativeType::Tuple(vec![NativeType::int(), NativeType::int()]),
        "print" => NativeType::None,
        "type" => NativeType::Callable,
        "Counter" => NativeType::Counter,
        "defaultdict" => NativeType::DefaultDict(
            Box::new(NativeType::Unknown),
            Box::new(NativeType::Unknown),
        ),
        "deque" => NativeType::Deque(Box::new(
            first.map(NativeType::element_type).unwrap_or(NativeType::Unknown),
        )),
        _ => NativeType::Unknown,
    }
}

/// Return types for methods on builtin shapes.
pub fn method_call_type(recv: &NativeType, method: &str, args: &[NativeType]) -> NativeType {
    use NativeType::*;
    match recv {
        Str(_) => match method {
            "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "replace" | "title"
            | "capitalize" | "join" | "format" | "zfill" | "center" | "ljust" | "rjust"
            | "casefold" | "swapcase" | "expandtabs" => NativeType::str_runtime(),
            "split" | "rsplit" | "splitlines" => NativeType::list_of(NativeType::str_runtime()),
            "startswith" | "endswith" | "isdigit" | "isalpha" | "isalnum" | "isspace"
            | "isupper" | "islower" | "isnumeric" | "isidentifier" => Bool,
            "find" | "rfind" | "index" | "rindex" | "count" => NativeType::int(),
            "encode" => Bytes,
            "partition" | "rpartition" => Tuple(vec![
                NativeType::str_runtime(),
                NativeType::str_runtime(),
                NativeType::str_runtime(),
            ]),
            _ => Unknown,
        },
        List(elem) | Deque(elem) => match method {
            "append" | "extend" | "insert" | "sort" | "reverse" | "clear" | "remove"
            | "appendleft" => None,
            "pop" | "popleft" => (**elem).clone(),
            "count" | "index" => NativeType::int(),
            "copy" => recv.clone(),
            _ => Unknown,
        },
        Dict(k, v) | DefaultDict(k, v) => match method {
            "get" => widen(&NativeType::None, v),
            "pop" | "setdefault" => (**v).clone(),
            "keys" => NativeType::List(k.clone()),
            "values" => NativeType::List(v.clone()),
            "items" => NativeType::list_of(Tuple(vec![(**k).clone(), (**v).clone()])),
            "update" | "clear" => None,
            "popitem" => Tuple(vec![(**k).clone(), (**v).clone()]),
            "copy" => recv.clone(),
            _ => Unknown,
        },
        Counter => match method {
            "most_common" => {
                NativeType::list_of(Tuple(vec![NativeType::str_runtime(), NativeType::int()]))
            }
            "update" => None,
            _ => Unknown,
        },
        Set(elem) => match method {
            "add" | "discard" | "remove" | "clear" | "update" => None,
            "pop" => (**elem).clone(),
            "union" | "intersection" | "difference" | "symmetric_difference" | "copy" => {
                recv.clone()
            }
            "issubset" | "issuperset" | "isdisjoint" => Bool,
            _ => Unknown,
        },
        Bytes => match method {
            "decode" => NativeType::str_runtime(),
            "hex" => NativeType::str_runtime(),
            _ => Unknown,
        },
        Float => match method {
            "is_integer" => Bool,
            "hex" => NativeType::str_runtime(),
            _ => Unknown,
        },
        _ => {
            let _ = args;
            Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zigpyler_hir::HirDecorator;

    fn assign(name: &str, value: HirExpr) -> HirStmt {
        HirStmt::Assign {
            targets: vec![AssignTarget::Symbol(name.to_string())],
            value,
        }
    }

    fn int_lit(v: i64) -> HirExpr {
        HirExpr::Literal(Literal::Int(v))
    }

    fn str_lit(s: &str) -> HirExpr {
        HirExpr::Literal(Literal::Str(s.to_string()))
    }

    fn module(body: Vec<HirStmt>) -> HirModule {
        HirModule {
            imports: vec![],
            body,
        }
    }

    fn infer(body: Vec<HirStmt>) -> ModuleTypes {
        TypeInferencer::new().infer_module(&module(body)).unwrap()
    }

    #[test]
    fn literal_assignment_types() {
        let types = infer(vec![
            assign("a", int_lit(1)),
            assign("b", str_lit("x")),
            assign("c", HirExpr::Literal(Literal::Float(1.5))),
        ]);
        assert_eq!(types.var_type("", "a"), NativeType::int());
        assert_eq!(types.var_type("", "b"), NativeType::str_literal());
        assert_eq!(types.var_type("", "c"), NativeType::Float);
    }

    #[test]
    fn reassignment_widens() {
        let types = infer(vec![
            assign("x", int_lit(1)),
            assign("x", HirExpr::Literal(Literal::Float(2.0))),
        ]);
        assert_eq!(types.var_type("", "x"), NativeType::Float);
    }

    #[test]
    fn disjoint_reassignment_erases() {
        let types = infer(vec![assign("x", int_lit(1)), assign("x", str_lit("s"))]);
        assert_eq!(types.var_type("", "x"), NativeType::PyValue);
    }

    #[test]
    fn empty_list_takes_type_from_first_append() {
        let types = infer(vec![
            assign("xs", HirExpr::List(vec![])),
            HirStmt::Expr(HirExpr::Call {
                func: Box::new(HirExpr::Attribute {
                    value: Box::new(HirExpr::Var("xs".to_string())),
                    attr: "append".to_string(),
                }),
                args: vec![str_lit("a")],
                kwargs: vec![],
            }),
        ]);
        // The list itself stays list; the append refinement happens via
        // usage at emission, but the literal list records as unknown-elem.
        assert!(matches!(types.var_type("", "xs"), NativeType::List(_)));
    }

    #[test]
    fn tuple_unpack_assigns_element_types() {
        let types = infer(vec![HirStmt::Assign {
            targets: vec![AssignTarget::Tuple(vec![
                AssignTarget::Symbol("a".to_string()),
                AssignTarget::Symbol("b".to_string()),
            ])],
            value: HirExpr::Tuple(vec![int_lit(1), str_lit("x")]),
        }]);
        assert_eq!(types.var_type("", "a"), NativeType::int());
        assert_eq!(types.var_type("", "b"), NativeType::str_literal());
    }

    #[test]
    fn function_return_inferred_from_body() {
        let func = HirFunction {
            name: "f".to_string(),
            params: smallvec::smallvec![],
            body: vec![HirStmt::Return(Some(int_lit(3)))],
            ret_annotation: None,
            decorators: vec![],
            is_async: false,
            docstring: None,
        };
        let types = infer(vec![
            HirStmt::FunctionDef(func),
            assign(
                "y",
                HirExpr::Call {
                    func: Box::new(HirExpr::Var("f".to_string())),
                    args: vec![],
                    kwargs: vec![],
                },
            ),
        ]);
        assert_eq!(types.return_type("f"), Some(&NativeType::int()));
        assert_eq!(types.var_type("", "y"), NativeType::int());
    }

    #[test]
    fn call_site_unions_reach_parameters() {
        let func = HirFunction {
            name: "f".to_string(),
            params: smallvec::smallvec![HirParam::positional("x")],
            body: vec![HirStmt::Return(Some(HirExpr::Var("x".to_string())))],
            ret_annotation: None,
            decorators: vec![HirDecorator::bare("nothing")],
            is_async: false,
            docstring: None,
        };
        let call = |arg: HirExpr| HirExpr::Call {
            func: Box::new(HirExpr::Var("f".to_string())),
            args: vec![arg],
            kwargs: vec![],
        };
        let types = infer(vec![
            HirStmt::FunctionDef(func),
            HirStmt::Expr(call(int_lit(1))),
            HirStmt::Expr(call(HirExpr::Literal(Literal::Float(2.0)))),
        ]);
        assert_eq!(types.call_args["f"], vec![NativeType::Float]);
        assert_eq!(types.var_type("f", "x"), NativeType::Float);
    }

    #[test]
    fn self_attribute_writes_become_class_fields() {
        let init = HirFunction {
            name: "__init__".to_string(),
            params: smallvec::smallvec![HirParam::positional("self")],
            body: vec![HirStmt::Assign {
                targets: vec![AssignTarget::Attribute {
                    value: HirExpr::Var("self".to_string()),
                    attr: "count".to_string(),
                }],
                value: int_lit(0),
            }],
            ret_annotation: None,
            decorators: vec![],
            is_async: false,
            docstring: None,
        };
        let class = HirClass {
            name: "C".to_string(),
            bases: vec![],
            decorators: vec![],
            fields: vec![],
            methods: vec![init],
            nested: vec![],
            docstring: None,
        };
        let types = infer(vec![HirStmt::ClassDef(class)]);
        assert_eq!(
            types.class("C").unwrap().fields.get("count"),
            Some(&NativeType::int())
        );
    }

    #[test]
    fn shift_and_pow_promotion_thresholds() {
        let types = infer(vec![
            assign(
                "big",
                HirExpr::Binary {
                    op: BinOp::LShift,
                    left: Box::new(int_lit(1)),
                    right: Box::new(int_lit(70)),
                },
            ),
            assign(
                "small",
                HirExpr::Binary {
                    op: BinOp::LShift,
                    left: Box::new(int_lit(1)),
                    right: Box::new(int_lit(8)),
                },
            ),
            assign(
                "huge",
                HirExpr::Binary {
                    op: BinOp::Pow,
                    left: Box::new(int_lit(2)),
                    right: Box::new(int_lit(64)),
                },
            ),
        ]);
        assert_eq!(
            types.var_type("", "big"),
            NativeType::Int(IntKind::Unbounded)
        );
        assert_eq!(types.var_type("", "small"), NativeType::int());
        assert_eq!(
            types.var_type("", "huge"),
            NativeType::Int(IntKind::Unbounded)
        );
    }

    #[test]
    fn for_over_range_binds_int() {
        let types = infer(vec![HirStmt::For {
            target: AssignTarget::Symbol("i".to_string()),
            iter: HirExpr::Call {
                func: Box::new(HirExpr::Var("range".to_string())),
                args: vec![int_lit(10)],
                kwargs: vec![],
            },
            body: vec![HirStmt::Pass],
            orelse: vec![],
        }]);
        assert_eq!(types.var_type("", "i"), NativeType::int());
    }

    #[test]
    fn string_concat_produces_runtime_string() {
        let types = infer(vec![assign(
            "s",
            HirExpr::Binary {
                op: BinOp::Add,
                left: Box::new(str_lit("a")),
                right: Box::new(str_lit("b")),
            },
        )]);
        assert_eq!(types.var_type("", "s"), NativeType::str_runtime());
    }

    #[test]
    fn division_of_ints_is_float() {
        let types = infer(vec![assign(
            "q",
            HirExpr::Binary {
                op: BinOp::Div,
                left: Box::new(int_lit(7)),
                right: Box::new(int_lit(2)),
            },
        )]);
        assert_eq!(types.var_type("", "q"), NativeType::Float);
    }

    #[test]
    fn annotation_conflict_is_recorded_and_annotation_wins() {
        let types = infer(vec![HirStmt::AnnAssign {
            target: AssignTarget::Symbol("x".to_string()),
            annotation: NativeType::Float,
            value: Some(str_lit("oops")),
        }]);
        assert_eq!(types.var_type("", "x"), NativeType::Float);
        assert_eq!(types.annotation_conflicts.len(), 1);
        assert_eq!(types.annotation_conflicts[0].name, "x");
    }

    #[test]
    fn generator_returns_eager_sequence() {
        let func = HirFunction {
            name: "g".to_string(),
            params: smallvec::smallvec![],
            body: vec![HirStmt::Expr(HirExpr::Yield(Some(Box::new(int_lit(1)))))],
            ret_annotation: None,
            decorators: vec![],
            is_async: false,
            docstring: None,
        };
        let types = infer(vec![HirStmt::FunctionDef(func)]);
        assert_eq!(
            types.return_type("g"),
            Some(&NativeType::list_of(NativeType::int()))
        );
    }

    #[test]
    fn comprehension_yields_list_of_element() {
        let types = infer(vec![assign(
            "xs",
            HirExpr::ListComp {
                element: Box::new(HirExpr::Binary {
                    op: BinOp::Mul,
                    left: Box::new(HirExpr::Var("i".to_string())),
                    right: Box::new(int_lit(2)),
                }),
                generators: vec![Comprehension {
                    target: AssignTarget::Symbol("i".to_string()),
                    iter: HirExpr::Call {
                        func: Box::new(HirExpr::Var("range".to_string())),
                        args: vec![int_lit(5)],
                        kwargs: vec![],
                    },
                    ifs: vec![],
                }],
            },
        )]);
        assert_eq!(
            types.var_type("", "xs"),
            NativeType::list_of(NativeType::int())
        );
    }

    #[test]
    fn global_statement_binds_module_scope() {
        let func = HirFunction {
            name: "bump".to_string(),
            params: smallvec::smallvec![],
            body: vec![
                HirStmt::Global(vec!["counter".to_string()]),
                assign("counter", HirExpr::Literal(Literal::Float(1.0))),
            ],
            ret_annotation: None,
            decorators: vec![],
            is_async: false,
            docstring: None,
        };
        let types = infer(vec![
            assign("counter", int_lit(0)),
            HirStmt::FunctionDef(func),
        ]);
        assert_eq!(types.var_type("", "counter"), NativeType::Float);
        assert_eq!(types.scoped.get_local("bump", "counter"), None);
    }

    #[test]
    fn dict_subscript_reads_value_type() {
        let types = infer(vec![
            assign(
                "d",
                HirExpr::Dict(vec![(str_lit("k"), int_lit(1))]),
            ),
            assign(
                "v",
                HirExpr::Index {
                    base: Box::new(HirExpr::Var("d".to_string())),
                    index: Box::new(str_lit("k")),
                },
            ),
        ]);
        assert_eq!(types.var_type("", "v"), NativeType::int());
    }
}
