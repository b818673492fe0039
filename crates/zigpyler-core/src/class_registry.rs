//! Class registry and capture planner (component C).
//!
//! Records every class (top-level and nested) with its method tables,
//! base chain, static-vs-dynamic field split and, for classes defined
//! inside functions, the ordered set of outer variables the class must
//! capture. Also plans inherited-method re-emission: the target has no
//! runtime virtual dispatch in the shape this backend emits, so methods
//! a child does not override are re-emitted on the child.

use anyhow::{bail, Result};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zigpyler_analysis::{ModuleTypes, TraitsTable};
use zigpyler_hir::scope::child_scope;
use zigpyler_hir::{
    AssignTarget, Comprehension, FStringPart, HirClass, HirExpr, HirFunction, HirModule, HirStmt,
    NativeType,
};

/// Names never treated as captures.
const BUILTIN_NAMES: &[&str] = &[
    "print", "len", "range", "int", "float", "str", "bool", "list", "dict", "set", "tuple",
    "abs", "min", "max", "sum", "sorted", "reversed", "enumerate", "zip", "map", "filter",
    "isinstance", "issubclass", "super", "type", "repr", "format", "input", "open", "next",
    "round", "pow", "divmod", "hash", "id", "ord", "chr", "hex", "oct", "bin", "any", "all",
    "hasattr", "getattr", "setattr", "callable", "bytes", "bytearray", "frozenset", "object",
    "Exception", "ValueError", "TypeError", "KeyError", "IndexError", "RuntimeError",
    "StopIteration", "ZeroDivisionError", "AttributeError", "NotImplementedError",
    "AssertionError", "OSError", "IOError", "FileNotFoundError", "None", "True", "False",
    "self", "cls", "__name__",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    /// Nearest user-defined base, if registered.
    pub base: Option<String>,
    pub bases: Vec<String>,
    /// Linearized base chain for `super()` dispatch, nearest first
    /// (excludes the class itself).
    pub mro: Vec<String>,
    /// Fields promoted to static struct members.
    pub fields: IndexMap<String, NativeType>,
    /// Fields whose writes could not be unified; they go through the
    /// per-instance dynamic mapping.
    pub dynamic_fields: IndexSet<String>,
    pub methods: IndexMap<String, NativeType>,
    pub method_mutates_self: IndexMap<String, bool>,
    /// Class attributes whose value is a type.
    pub type_attributes: IndexSet<String>,
    pub is_nested: bool,
    pub parent_class: Option<String>,
    /// Captured outer variables in discovery order, with their types.
    pub captures: IndexMap<String, NativeType>,
    pub is_test_case: bool,
    pub has_init: bool,
    /// `(method, defining class)` pairs to re-emit on this class.
    pub inherited_methods: Vec<(String, String)>,
    /// Scope path where the class is defined; empty for module level.
    pub defined_in_scope: String,
}

impl ClassInfo {
    pub fn is_dynamic_field(&self, name: &str) -> bool {
        self.dynamic_fields.contains(name)
    }

    pub fn is_static_field(&self, name: &str) -> bool {
        self.fields.contains_key(name) && !self.dynamic_fields.contains(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: IndexMap<String, ClassInfo>,
    /// Retained HIR per class for inherited-method re-emission.
    hir: IndexMap<String, HirClass>,
}

impl ClassRegistry {
    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn hir(&self, name: &str) -> Option<&HirClass> {
        self.hir.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ClassInfo)> {
        self.classes.iter()
    }

    pub fn test_cases(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values().filter(|c| c.is_test_case)
    }

    pub fn has_test_cases(&self) -> bool {
        self.classes.values().any(|c| c.is_test_case)
    }

    /// Method lookup walking the MRO.
    pub fn resolve_method<'a>(&'a self, class: &str, method: &str) -> Option<(&'a str, &'a HirFunction)> {
        let info = self.classes.get(class)?;
        let mut chain = vec![class.to_string()];
        chain.extend(info.mro.iter().cloned());
        for owner in &chain {
            if let Some(hir) = self.hir.get(owner) {
                if let Some(m) = hir.method(method) {
                    let (owner_key, _) = self.classes.get_key_value(owner.as_str())?;
                    return Some((owner_key.as_str(), m));
                }
            }
        }
        None
    }
}

/// Build the registry for one module. Must run after type inference and
/// trait analysis.
pub fn build_registry(
    module: &HirModule,
    types: &ModuleTypes,
    traits: &TraitsTable,
) -> Result<ClassRegistry> {
    let mut registry = ClassRegistry::default();
    collect(&mut registry, types, traits, "", &module.body, None, &[])?;
    link_bases(&mut registry)?;
    debug!(classes = registry.classes.len(), "class registry built");
    Ok(registry)
}

fn collect(
    registry: &mut ClassRegistry,
    types: &ModuleTypes,
    traits: &TraitsTable,
    scope: &str,
    body: &[HirStmt],
    parent_class: Option<&str>,
    enclosing_bindings: &[(String, IndexSet<String>)],
) -> Result<()> {
    for stmt in body {
        match stmt {
            HirStmt::ClassDef(class) => {
                register_class(
                    registry,
                    types,
                    traits,
                    scope,
                    class,
                    parent_class,
                    enclosing_bindings,
                )?;
            }
            HirStmt::FunctionDef(func) => {
                let fn_scope = child_scope(scope, &func.name);
                let mut bindings = enclosing_bindings.to_vec();
                bindings.push((fn_scope.clone(), function_bindings(func)));
                collect(registry, types, traits, &fn_scope, &func.body, None, &bindings)?;
            }
            HirStmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect(
                    registry,
                    types,
                    traits,
                    scope,
                    then_body,
                    parent_class,
                    enclosing_bindings,
                )?;
                if let Some(b) = else_body {
                    collect(registry, types, traits, scope, b, parent_class, enclosing_bindings)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn register_class(
    registry: &mut ClassRegistry,
    types: &ModuleTypes,
    traits: &TraitsTable,
    scope: &str,
    class: &HirClass,
    parent_class: Option<&str>,
    enclosing_bindings: &[(String, IndexSet<String>)],
) -> Result<()> {
    let field_types = types.class(&class.name).cloned().unwrap_or_else(|| {
        zigpyler_analysis::ClassFieldTypes {
            fields: IndexMap::new(),
            methods: IndexMap::new(),
        }
    });

    let mut fields = IndexMap::new();
    let mut dynamic_fields = IndexSet::new();
    for (name, ty) in &field_types.fields {
        if matches!(ty, NativeType::PyValue) {
            dynamic_fields.insert(name.clone());
        }
        fields.insert(name.clone(), ty.clone());
    }

    let mut type_attributes = IndexSet::new();
    for field in &class.fields {
        if let Some(HirExpr::Var(value)) = &field.default {
            if value.chars().next().is_some_and(char::is_uppercase) || is_builtin_type(value) {
                type_attributes.insert(field.name.clone());
            }
        }
    }

    let mut method_mutates_self = IndexMap::new();
    for method in &class.methods {
        let path = child_scope(&child_scope(scope, &class.name), &method.name);
        let propagated = traits.get(&path).is_some_and(|t| t.mutates_self);
        method_mutates_self.insert(
            method.name.clone(),
            propagated || method_writes_self(&method.body),
        );
    }

    let is_nested = !scope.is_empty();
    let captures = if is_nested {
        discover_captures(class, types, enclosing_bindings)
    } else {
        IndexMap::new()
    };

    let is_test_case = class
        .bases
        .iter()
        .any(|b| b == "unittest.TestCase" || b == "TestCase");

    let info = ClassInfo {
        name: class.name.clone(),
        base: None,
        bases: class.bases.clone(),
        mro: Vec::new(),
        fields,
        dynamic_fields,
        methods: field_types.methods.clone(),
        method_mutates_self,
        type_attributes,
        is_nested,
        parent_class: parent_class.map(str::to_string),
        captures,
        is_test_case,
        has_init: class.method("__init__").is_some(),
        inherited_methods: Vec::new(),
        defined_in_scope: scope.to_string(),
    };

    registry.classes.insert(class.name.clone(), info);
    registry.hir.insert(class.name.clone(), class.clone());

    let class_scope = child_scope(scope, &class.name);
    for nested in &class.nested {
        register_class(
            registry,
            types,
            traits,
            &class_scope,
            nested,
            Some(&class.name),
            enclosing_bindings,
        )?;
    }
    // Classes defined inside method bodies.
    for method in &class.methods {
        let method_scope = child_scope(&class_scope, &method.name);
        let mut bindings = enclosing_bindings.to_vec();
        bindings.push((method_scope.clone(), function_bindings(method)));
        collect(registry, types, traits, &method_scope, &method.body, None, &bindings)?;
    }
    Ok(())
}

/// Resolve user bases, build MRO chains and the inherited-method plan.
fn link_bases(registry: &mut ClassRegistry) -> Result<()> {
    let names: Vec<String> = registry.classes.keys().cloned().collect();
    for name in &names {
        let bases = registry.classes[name.as_str()].bases.clone();
        let base = bases.iter().find(|b| registry.classes.contains_key(b.as_str())).cloned();
        registry.classes[name.as_str()].base = base.clone();

        // Linear chain; the source language's class-based subset here is
        // single inheritance, so C3 degenerates to the base walk.
        let mut mro = Vec::new();
        let mut current = base;
        let mut guard = 0;
        while let Some(b) = current {
            guard += 1;
            if guard > names.len() + 1 {
                bail!("internal invariant breach: inheritance cycle through {name}");
            }
            mro.push(b.clone());
            current = registry
                .classes
                .get(b.as_str())
                .and_then(|c| c.base.clone());
        }
        registry.classes[name.as_str()].mro = mro;
    }

    // Inherited static fields become part of the child's struct; the
    // re-emitted base methods read and write them directly.
    for name in &names {
        let mro = registry.classes[name.as_str()].mro.clone();
        for base in &mro {
            let base_fields: Vec<(String, NativeType)> = registry
                .classes
                .get(base.as_str())
                .map(|c| {
                    c.fields
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                })
                .unwrap_or_default();
            let base_dynamic: Vec<String> = registry
                .classes
                .get(base.as_str())
                .map(|c| c.dynamic_fields.iter().cloned().collect())
                .unwrap_or_default();
            let child = &mut registry.classes[name.as_str()];
            for (field, ty) in base_fields {
                child.fields.entry(field).or_insert(ty);
            }
            for field in base_dynamic {
                child.dynamic_fields.insert(field);
            }
        }
    }

    // Inherited-method plan: nearest definition wins; methods defined on
    // the child are never re-emitted.
    for name in &names {
        let mro = registry.classes[name.as_str()].mro.clone();
        let own: IndexSet<String> = registry
            .hir
            .get(name.as_str())
            .map(|c| c.methods.iter().map(|m| m.name.clone()).collect())
            .unwrap_or_default();
        let mut plan = Vec::new();
        let mut seen = own.clone();
        for base in &mro {
            if let Some(base_hir) = registry.hir.get(base.as_str()) {
                for method in &base_hir.methods {
                    if seen.insert(method.name.clone()) {
                        plan.push((method.name.clone(), base.clone()));
                    }
                }
            }
        }
        registry.classes[name.as_str()].inherited_methods = plan;
    }
    Ok(())
}

pub(crate) fn function_bindings(func: &HirFunction) -> IndexSet<String> {
    let mut names = IndexSet::new();
    for p in &func.params {
        names.insert(p.name.clone());
    }
    collect_bound_names(&func.body, &mut names);
    names
}

fn collect_bound_names(body: &[HirStmt], names: &mut IndexSet<String>) {
    fn target_names(target: &AssignTarget, names: &mut IndexSet<String>) {
        match target {
            AssignTarget::Symbol(s) => {
                names.insert(s.clone());
            }
            AssignTarget::Tuple(ts) => ts.iter().for_each(|t| target_names(t, names)),
            _ => {}
        }
    }
    for stmt in body {
        match stmt {
            HirStmt::Assign { targets, .. } => {
                targets.iter().for_each(|t| target_names(t, names));
            }
            HirStmt::AnnAssign { target, .. } | HirStmt::AugAssign { target, .. } => {
                target_names(target, names);
            }
            HirStmt::For {
                target,
                body,
                orelse,
                ..
            } => {
                target_names(target, names);
                collect_bound_names(body, names);
                collect_bound_names(orelse, names);
            }
            HirStmt::While { body, orelse, .. } => {
                collect_bound_names(body, names);
                collect_bound_names(orelse, names);
            }
            HirStmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_bound_names(then_body, names);
                if let Some(b) = else_body {
                    collect_bound_names(b, names);
                }
            }
            HirStmt::With { items, body } => {
                for item in items {
                    if let Some(t) = &item.target {
                        names.insert(t.clone());
                    }
                }
                collect_bound_names(body, names);
            }
            HirStmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_bound_names(body, names);
                for h in handlers {
                    collect_bound_names(&h.body, names);
                }
                collect_bound_names(orelse, names);
                collect_bound_names(finalbody, names);
            }
            HirStmt::FunctionDef(f) => {
                names.insert(f.name.clone());
            }
            HirStmt::ClassDef(c) => {
                names.insert(c.name.clone());
            }
            _ => {}
        }
    }
}

/// Free names of the class body, intersected with enclosing function
/// bindings, in first-occurrence order.
fn discover_captures(
    class: &HirClass,
    types: &ModuleTypes,
    enclosing_bindings: &[(String, IndexSet<String>)],
) -> IndexMap<String, NativeType> {
    let mut local: IndexSet<String> = IndexSet::new();
    for f in &class.fields {
        local.insert(f.name.clone());
    }
    for m in &class.methods {
        local.insert(m.name.clone());
    }

    let mut free = Vec::new();
    for field in &class.fields {
        if let Some(default) = &field.default {
            collect_free_names(default, &mut free);
        }
    }
    for method in &class.methods {
        let mut method_local = local.clone();
        method_local.extend(function_bindings(method));
        let mut method_free = Vec::new();
        collect_free_names_in_body(&method.body, &mut method_free);
        for name in method_free {
            if !method_local.contains(&name) {
                free.push(name);
            }
        }
    }

    let mut captures = IndexMap::new();
    for name in free {
        if captures.contains_key(&name) || BUILTIN_NAMES.contains(&name.as_str()) {
            continue;
        }
        // Innermost enclosing function binding wins.
        for (fn_scope, bindings) in enclosing_bindings.iter().rev() {
            if bindings.contains(&name) {
                let ty = types.var_type(fn_scope, &name).refined();
                captures.insert(name.clone(), ty);
                break;
            }
        }
    }
    captures
}

pub(crate) fn collect_free_names_in_body(body: &[HirStmt], out: &mut Vec<String>) {
    for stmt in body {
        match stmt {
            HirStmt::Assign { targets, value } => {
                collect_free_names(value, out);
                for t in targets {
                    collect_target_free_names(t, out);
                }
            }
            HirStmt::AnnAssign { value, target, .. } => {
                if let Some(v) = value {
                    collect_free_names(v, out);
                }
                collect_target_free_names(target, out);
            }
            HirStmt::AugAssign { target, value, .. } => {
                collect_free_names(value, out);
                collect_target_free_names(target, out);
            }
            HirStmt::Return(Some(v)) | HirStmt::Expr(v) => collect_free_names(v, out),
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                collect_free_names(condition, out);
                collect_free_names_in_body(then_body, out);
                if let Some(b) = else_body {
                    collect_free_names_in_body(b, out);
                }
            }
            HirStmt::While {
                condition,
                body,
                orelse,
            } => {
                collect_free_names(condition, out);
                collect_free_names_in_body(body, out);
                collect_free_names_in_body(orelse, out);
            }
            HirStmt::For {
                iter, body, orelse, ..
            } => {
                collect_free_names(iter, out);
                collect_free_names_in_body(body, out);
                collect_free_names_in_body(orelse, out);
            }
            HirStmt::Raise { exc, cause } => {
                if let Some(e) = exc {
                    collect_free_names(e, out);
                }
                if let Some(c) = cause {
                    collect_free_names(c, out);
                }
            }
            HirStmt::Assert { test, msg } => {
                collect_free_names(test, out);
                if let Some(m) = msg {
                    collect_free_names(m, out);
                }
            }
            HirStmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_free_names_in_body(body, out);
                for h in handlers {
                    collect_free_names_in_body(&h.body, out);
                }
                collect_free_names_in_body(orelse, out);
                collect_free_names_in_body(finalbody, out);
            }
            HirStmt::With { items, body } => {
                for item in items {
                    collect_free_names(&item.context, out);
                }
                collect_free_names_in_body(body, out);
            }
            _ => {}
        }
    }
}

fn collect_target_free_names(target: &AssignTarget, out: &mut Vec<String>) {
    match target {
        AssignTarget::Index { base, index } => {
            collect_free_names(base, out);
            collect_free_names(index, out);
        }
        AssignTarget::Slice { base, lower, upper } => {
            collect_free_names(base, out);
            if let Some(l) = lower {
                collect_free_names(l, out);
            }
            if let Some(u) = upper {
                collect_free_names(u, out);
            }
        }
        AssignTarget::Attribute { value, .. } => collect_free_names(value, out),
        AssignTarget::Tuple(ts) => ts.iter().for_each(|t| collect_target_free_names(t, out)),
        AssignTarget::Symbol(_) => {}
    }
}

fn collect_free_names(expr: &HirExpr, out: &mut Vec<String>) {
    match expr {
        HirExpr::Var(name) => out.push(name.clone()),
        HirExpr::Binary { left, right, .. } => {
            collect_free_names(left, out);
            collect_free_names(right, out);
        }
        HirExpr::Unary { operand, .. } => collect_free_names(operand, out),
        HirExpr::Bool { values, .. } => values.iter().for_each(|v| collect_free_names(v, out)),
        HirExpr::Compare {
            left, comparators, ..
        } => {
            collect_free_names(left, out);
            comparators.iter().for_each(|c| collect_free_names(c, out));
        }
        HirExpr::Call { func, args, kwargs } => {
            collect_free_names(func, out);
            args.iter().for_each(|a| collect_free_names(a, out));
            kwargs.iter().for_each(|k| collect_free_names(&k.value, out));
        }
        HirExpr::Index { base, index } => {
            collect_free_names(base, out);
            collect_free_names(index, out);
        }
        HirExpr::Slice {
            base,
            lower,
            upper,
            step,
        } => {
            collect_free_names(base, out);
            for part in [lower, upper, step].into_iter().flatten() {
                collect_free_names(part, out);
            }
        }
        HirExpr::Attribute { value, .. } | HirExpr::Starred(value) | HirExpr::Await(value) => {
            collect_free_names(value, out);
        }
        HirExpr::List(items) | HirExpr::Tuple(items) | HirExpr::Set(items) => {
            items.iter().for_each(|i| collect_free_names(i, out));
        }
        HirExpr::Dict(items) => items.iter().for_each(|(k, v)| {
            collect_free_names(k, out);
            collect_free_names(v, out);
        }),
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
            collect_generator_free_names(generators, out);
            collect_free_names(element, out);
        }
        HirExpr::DictComp {
            key,
            value,
            generators,
        } => {
            collect_generator_free_names(generators, out);
            collect_free_names(key, out);
            collect_free_names(value, out);
        }
        HirExpr::Lambda { body, .. } => collect_free_names(body, out),
        HirExpr::IfExp {
            test,
            body,
            orelse,
        } => {
            collect_free_names(test, out);
            collect_free_names(body, out);
            collect_free_names(orelse, out);
        }
        HirExpr::Yield(Some(v)) | HirExpr::YieldFrom(v) => collect_free_names(v, out),
        HirExpr::FString(parts) => {
            for part in parts {
                if let FStringPart::Expr { value, .. } = part {
                    collect_free_names(value, out);
                }
            }
        }
        HirExpr::NamedExpr { value, .. } => collect_free_names(value, out),
        _ => {}
    }
}

fn collect_generator_free_names(generators: &[Comprehension], out: &mut Vec<String>) {
    for g in generators {
        collect_free_names(&g.iter, out);
        g.ifs.iter().for_each(|c| collect_free_names(c, out));
    }
}

fn method_writes_self(body: &[HirStmt]) -> bool {
    fn target_writes_self(target: &AssignTarget) -> bool {
        match target {
            AssignTarget::Attribute { value, .. } => {
                matches!(value, HirExpr::Var(n) if n == "self")
            }
            AssignTarget::Index { base, .. } | AssignTarget::Slice { base, .. } => {
                matches!(
                    base,
                    HirExpr::Attribute { value, .. }
                        if matches!(&**value, HirExpr::Var(n) if n == "self")
                )
            }
            AssignTarget::Tuple(ts) => ts.iter().any(target_writes_self),
            AssignTarget::Symbol(_) => false,
        }
    }
    body.iter().any(|stmt| match stmt {
        HirStmt::Assign { targets, .. } => targets.iter().any(target_writes_self),
        HirStmt::AnnAssign { target, .. } | HirStmt::AugAssign { target, .. } => {
            target_writes_self(target)
        }
        HirStmt::If {
            then_body,
            else_body,
            ..
        } => {
            method_writes_self(then_body)
                || else_body.as_ref().is_some_and(|b| method_writes_self(b))
        }
        HirStmt::While { body, orelse, .. } | HirStmt::For { body, orelse, .. } => {
            method_writes_self(body) || method_writes_self(orelse)
        }
        HirStmt::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            method_writes_self(body)
                || handlers.iter().any(|h| method_writes_self(&h.body))
                || method_writes_self(orelse)
                || method_writes_self(finalbody)
        }
        HirStmt::With { body, .. } => method_writes_self(body),
        _ => false,
    })
}

fn is_builtin_type(name: &str) -> bool {
    matches!(
        name,
        "int" | "float" | "str" | "bool" | "list" | "dict" | "set" | "tuple" | "bytes"
    )
}

/// The deterministic class-emission state machine:
/// `start → fields → default_init_or_user_init → methods →
/// inherited_methods → done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassEmitState {
    Start,
    Fields,
    Init,
    Methods,
    InheritedMethods,
    Done,
}

impl ClassEmitState {
    pub fn advance(self) -> Result<Self> {
        Ok(match self {
            ClassEmitState::Start => ClassEmitState::Fields,
            ClassEmitState::Fields => ClassEmitState::Init,
            ClassEmitState::Init => ClassEmitState::Methods,
            ClassEmitState::Methods => ClassEmitState::InheritedMethods,
            ClassEmitState::InheritedMethods => ClassEmitState::Done,
            ClassEmitState::Done => {
                bail!("internal invariant breach: class emission advanced past done")
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_bridge::AstBridge;
    use zigpyler_analysis::{analyze_traits, TypeInferencer};

    fn registry_for(source: &str) -> ClassRegistry {
        let module = AstBridge::new().parse_module(source).unwrap();
        let types = TypeInferencer::new().infer_module(&module).unwrap();
        let traits = analyze_traits(&module, &types);
        build_registry(&module, &types, &traits).unwrap()
    }

    #[test]
    fn static_fields_from_init() {
        let registry = registry_for(
            r#"
class Point:
    def __init__(self, x: int, y: int):
        self.x = x
        self.y = y
"#,
        );
        let info = registry.get("Point").unwrap();
        assert!(info.is_static_field("x"));
        assert!(info.is_static_field("y"));
        assert!(info.has_init);
        assert!(!info.is_nested);
    }

    #[test]
    fn conflicting_field_writes_go_dynamic() {
        let registry = registry_for(
            r#"
class Box:
    def __init__(self):
        self.v = 1

    def flip(self):
        self.v = "text"
"#,
        );
        let info = registry.get("Box").unwrap();
        assert!(info.is_dynamic_field("v"));
    }

    #[test]
    fn mutates_self_bit_per_method() {
        let registry = registry_for(
            r#"
class Counter:
    def __init__(self):
        self.n = 0

    def bump(self):
        self.n += 1

    def read(self):
        return self.n
"#,
        );
        let info = registry.get("Counter").unwrap();
        assert_eq!(info.method_mutates_self.get("bump"), Some(&true));
        assert_eq!(info.method_mutates_self.get("read"), Some(&false));
    }

    #[test]
    fn base_chain_and_inherited_plan() {
        let registry = registry_for(
            r#"
class Animal:
    def __init__(self):
        self.alive = True

    def speak(self):
        return "..."

    def kind(self):
        return "animal"

class Dog(Animal):
    def speak(self):
        return "woof"
"#,
        );
        let dog = registry.get("Dog").unwrap();
        assert_eq!(dog.base.as_deref(), Some("Animal"));
        assert_eq!(dog.mro, vec!["Animal".to_string()]);
        // speak is overridden; __init__ and kind are re-emitted.
        let inherited: Vec<&str> = dog
            .inherited_methods
            .iter()
            .map(|(m, _)| m.as_str())
            .collect();
        assert!(inherited.contains(&"__init__"));
        assert!(inherited.contains(&"kind"));
        assert!(!inherited.contains(&"speak"));
    }

    #[test]
    fn nested_class_captures_outer_in_source_order() {
        let registry = registry_for(
            r#"
def make():
    count = 0
    label = "x"

    class C:
        def describe(self):
            return label

        def inc(self):
            return count + 1

    return C()
"#,
        );
        let info = registry.get("C").unwrap();
        assert!(info.is_nested);
        assert_eq!(info.defined_in_scope, "make");
        let names: Vec<&str> = info.captures.keys().map(String::as_str).collect();
        // Discovery order: label is referenced first.
        assert_eq!(names, vec!["label", "count"]);
        assert_eq!(
            info.captures.get("count"),
            Some(&NativeType::int())
        );
    }

    #[test]
    fn test_case_detection() {
        let registry = registry_for(
            r#"
import unittest

class MyTest(unittest.TestCase):
    def test_ok(self):
        pass
"#,
        );
        assert!(registry.has_test_cases());
        assert!(registry.get("MyTest").unwrap().is_test_case);
    }

    #[test]
    fn emit_state_machine_is_total() {
        let mut state = ClassEmitState::Start;
        let expected = [
            ClassEmitState::Fields,
            ClassEmitState::Init,
            ClassEmitState::Methods,
            ClassEmitState::InheritedMethods,
            ClassEmitState::Done,
        ];
        for next in expected {
            state = state.advance().unwrap();
            assert_eq!(state, next);
        }
        assert!(state.advance().is_err());
    }

    #[test]
    fn type_attributes_detected() {
        let registry = registry_for(
            r#"
class Holder:
    kind = int
    name = "h"
"#,
        );
        let info = registry.get("Holder").unwrap();
        assert!(info.type_attributes.contains("kind"));
        assert!(!info.type_attributes.contains("name"));
    }
}
