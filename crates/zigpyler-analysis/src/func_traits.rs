//! Per-function traits (needs-allocator, needs-error-union, generator,
//! async, self-mutation) with transitive propagation over the call graph.
//!
//! A function that calls an error-returning function is itself
//! error-returning; a function that calls an allocating function itself
//! needs the allocator. Recursion makes the graph cyclic, so propagation
//! runs as a worklist fixpoint over a petgraph digraph rather than a
//! topological sweep.

use indexmap::{IndexMap, IndexSet};
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zigpyler_hir::scope::child_scope;
use zigpyler_hir::{
    AssignTarget, BinOp, HirClass, HirExpr, HirFunction, HirModule, HirStmt, NativeType,
};

use crate::type_flow::ModuleTypes;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionTraits {
    pub needs_allocator: bool,
    pub needs_error_union: bool,
    pub returns_lambda: bool,
    /// Name of a nested function returned by this function, if any.
    pub returned_nested_function: Option<String>,
    pub is_generator: bool,
    pub is_async: bool,
    /// Performs real I/O (console, files, sleeps); drives the async
    /// emission mode choice.
    pub does_io: bool,
    pub mutates_self: bool,
    pub returns_self: bool,
    /// Class name when every value-returning path is `return C(...)`.
    pub returns_constructor: Option<String>,
    pub has_value_return: bool,
    /// Resolved callee scope paths (for the propagation graph).
    pub calls: IndexSet<String>,
    /// Callee paths invoked through `self.`, for self-mutation
    /// propagation within a class.
    pub self_calls: IndexSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraitsTable {
    map: IndexMap<String, FunctionTraits>,
}

impl TraitsTable {
    pub fn get(&self, path: &str) -> Option<&FunctionTraits> {
        self.map.get(path)
    }

    pub fn traits(&self, path: &str) -> FunctionTraits {
        self.map.get(path).cloned().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FunctionTraits)> {
        self.map.iter()
    }

    /// True when any async function in the module performs real I/O;
    /// the async lowering mode is chosen once per compilation unit.
    pub fn any_async_does_io(&self) -> bool {
        self.map.values().any(|t| t.is_async && t.does_io)
    }
}

/// Builtins that perform I/O when called.
const IO_BUILTINS: &[&str] = &["print", "input", "open"];

/// Builtin calls whose results live on the heap.
const ALLOCATING_BUILTINS: &[&str] = &[
    "str", "repr", "format", "input", "chr", "hex", "oct", "bin", "list", "dict", "set",
    "sorted", "reversed", "enumerate", "zip", "map", "filter", "bytes", "bytearray", "Counter",
    "defaultdict", "deque", "divmod",
];

/// Conversions that can fail at runtime.
const FALLIBLE_CONVERSIONS: &[&str] = &["int", "float", "next"];

pub fn analyze_traits(module: &HirModule, types: &ModuleTypes) -> TraitsTable {
    let mut table = TraitsTable::default();
    collect_body("", &module.body, None, types, &mut table);
    propagate(&mut table);
    debug!(functions = table.map.len(), "function traits computed");
    table
}

fn collect_body(
    scope: &str,
    body: &[HirStmt],
    class: Option<&str>,
    types: &ModuleTypes,
    table: &mut TraitsTable,
) {
    for stmt in body {
        match stmt {
            HirStmt::FunctionDef(func) => {
                collect_function(scope, func, class, types, table);
            }
            HirStmt::ClassDef(cls) => collect_class(scope, cls, types, table),
            HirStmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_body(scope, then_body, class, types, table);
                if let Some(b) = else_body {
                    collect_body(scope, b, class, types, table);
                }
            }
            _ => {}
        }
    }
}

fn collect_class(scope: &str, class: &HirClass, types: &ModuleTypes, table: &mut TraitsTable) {
    let class_scope = child_scope(scope, &class.name);
    for method in &class.methods {
        collect_function(&class_scope, method, Some(&class.name), types, table);
    }
    for nested in &class.nested {
        collect_class(&class_scope, nested, types, table);
    }
}

fn collect_function(
    scope: &str,
    func: &HirFunction,
    class: Option<&str>,
    types: &ModuleTypes,
    table: &mut TraitsTable,
) {
    let path = child_scope(scope, &func.name);
    let mut walker = TraitWalker {
        path: path.clone(),
        class: class.map(str::to_string),
        types,
        traits: FunctionTraits {
            is_async: func.is_async,
            ..FunctionTraits::default()
        },
        nested_function_names: func
            .body
            .iter()
            .filter_map(|s| match s {
                HirStmt::FunctionDef(f) => Some(f.name.clone()),
                _ => None,
            })
            .collect(),
    };
    walker.walk_body(&func.body, 0);

    // Returning any allocated shape requires the allocator.
    if let Some(ret) = types.return_type(&path) {
        if ret.needs_allocation() {
            walker.traits.needs_allocator = true;
        }
    }
    if walker.traits.is_generator {
        walker.traits.needs_allocator = true;
    }

    table.map.insert(path.clone(), walker.traits);

    // Nested defs get their own entries.
    for stmt in &func.body {
        if let HirStmt::FunctionDef(inner) = stmt {
            collect_function(&path, inner, None, types, table);
        }
        if let HirStmt::ClassDef(inner) = stmt {
            collect_class(&path, inner, types, table);
        }
    }
}

struct TraitWalker<'a> {
    path: String,
    class: Option<String>,
    types: &'a ModuleTypes,
    traits: FunctionTraits,
    nested_function_names: IndexSet<String>,
}

impl TraitWalker<'_> {
    fn walk_body(&mut self, body: &[HirStmt], depth: usize) {
        for stmt in body {
            self.walk_stmt(stmt, depth);
        }
    }

    fn walk_stmt(&mut self, stmt: &HirStmt, depth: usize) {
        match stmt {
            HirStmt::Assign { targets, value } => {
                self.visit_expr(value);
                for t in targets {
                    self.visit_store(t);
                }
            }
            HirStmt::AnnAssign { target, value, .. } => {
                if let Some(v) = value {
                    self.visit_expr(v);
                }
                self.visit_store(target);
            }
            HirStmt::AugAssign { target, op, value } => {
                self.visit_expr(value);
                self.visit_store(target);
                if matches!(op, BinOp::Add | BinOp::Mul | BinOp::Mod) {
                    // String building through += needs the allocator.
                    if let AssignTarget::Symbol(name) = target {
                        if self.types.var_type(&self.path, name).is_string() {
                            self.traits.needs_allocator = true;
                        }
                    }
                }
            }
            HirStmt::Return(value) => {
                if let Some(v) = value {
                    self.traits.has_value_return = true;
                    match v {
                        HirExpr::Lambda { .. } => self.traits.returns_lambda = true,
                        HirExpr::Var(name) if name == "self" => self.traits.returns_self = true,
                        HirExpr::Var(name) if self.nested_function_names.contains(name) => {
                            self.traits.returned_nested_function = Some(name.clone());
                        }
                        HirExpr::Call { func, .. } => {
                            if let HirExpr::Var(name) = &**func {
                                if self.types.class(name).is_some() {
                                    self.traits.returns_constructor = Some(name.clone());
                                }
                            }
                        }
                        _ => {}
                    }
                    self.visit_expr(v);
                }
            }
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                self.visit_expr(condition);
                self.walk_body(then_body, depth + 1);
                if let Some(b) = else_body {
                    self.walk_body(b, depth + 1);
                }
            }
            HirStmt::While {
                condition,
                body,
                orelse,
            } => {
                self.visit_expr(condition);
                self.walk_body(body, depth + 1);
                self.walk_body(orelse, depth + 1);
            }
            HirStmt::For {
                iter, body, orelse, ..
            } => {
                self.visit_expr(iter);
                self.walk_body(body, depth + 1);
                self.walk_body(orelse, depth + 1);
            }
            HirStmt::Expr(e) => self.visit_expr(e),
            HirStmt::Raise { exc, cause } => {
                self.traits.needs_error_union = true;
                if let Some(e) = exc {
                    self.visit_expr(e);
                }
                if let Some(c) = cause {
                    self.visit_expr(c);
                }
            }
            HirStmt::Assert { test, msg } => {
                self.traits.needs_error_union = true;
                self.visit_expr(test);
                if let Some(m) = msg {
                    self.visit_expr(m);
                }
            }
            HirStmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.traits.needs_error_union = true;
                self.walk_body(body, depth + 1);
                for h in handlers {
                    self.walk_body(&h.body, depth + 1);
                }
                self.walk_body(orelse, depth + 1);
                self.walk_body(finalbody, depth + 1);
            }
            HirStmt::With { items, body } => {
                for item in items {
                    self.visit_expr(&item.context);
                }
                self.walk_body(body, depth + 1);
            }
            HirStmt::Delete(targets) => {
                for t in targets {
                    if let AssignTarget::Attribute { value, .. } = t {
                        if is_self(value) {
                            self.traits.mutates_self = true;
                        }
                    }
                }
            }
            HirStmt::FunctionDef(_) | HirStmt::ClassDef(_) => {
                // Nested units get their own trait entries; a nested
                // class instantiation in this body allocates.
                if matches!(stmt, HirStmt::ClassDef(_)) {
                    self.traits.needs_allocator = true;
                }
            }
            HirStmt::Global(_)
            | HirStmt::Nonlocal(_)
            | HirStmt::Break
            | HirStmt::Continue
            | HirStmt::Pass
            | HirStmt::Return(None)
            | HirStmt::Unsupported(_) => {}
        }
    }

    fn visit_store(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Attribute { value, attr } if is_self(value) => {
                self.traits.mutates_self = true;
                // Writes to a field with no unified type go through the
                // per-instance dynamic mapping, which allocates.
                if let Some(class) = &self.class {
                    let dynamic = self
                        .types
                        .class(class)
                        .and_then(|c| c.fields.get(attr))
                        .is_some_and(|ty| matches!(ty, NativeType::PyValue));
                    if dynamic {
                        self.traits.needs_allocator = true;
                    }
                }
            }
            AssignTarget::Index { base, .. } | AssignTarget::Slice { base, .. } => {
                if let HirExpr::Attribute { value, .. } = base {
                    if is_self(value) {
                        self.traits.mutates_self = true;
                    }
                }
            }
            AssignTarget::Tuple(targets) => {
                for t in targets {
                    self.visit_store(t);
                }
            }
            _ => {}
        }
    }

    fn visit_expr(&mut self, expr: &HirExpr) {
        match expr {
            HirExpr::Binary { op, left, right } => {
                self.visit_expr(left);
                self.visit_expr(right);
                if matches!(op, BinOp::Add | BinOp::Mul | BinOp::Mod) {
                    let lt = self.expr_type(left);
                    let rt = self.expr_type(right);
                    if lt.is_string() || rt.is_string() {
                        self.traits.needs_allocator = true;
                    }
                }
                if matches!(op, BinOp::Pow | BinOp::LShift) {
                    let lt = self.expr_type(left);
                    if matches!(
                        lt,
                        NativeType::Int(zigpyler_hir::IntKind::Unbounded) | NativeType::BigInt
                    ) {
                        self.traits.needs_allocator = true;
                    }
                    // Literal thresholds promote into big-integer
                    // arithmetic, which allocates.
                    if let HirExpr::Literal(zigpyler_hir::Literal::Int(v)) = &**right {
                        if (*op == BinOp::LShift && *v >= 63) || (*op == BinOp::Pow && *v >= 20)
                        {
                            self.traits.needs_allocator = true;
                        }
                    }
                }
            }
            HirExpr::List(items) | HirExpr::Set(items) => {
                self.traits.needs_allocator = true;
                for i in items {
                    self.visit_expr(i);
                }
            }
            HirExpr::Tuple(items) => {
                for i in items {
                    self.visit_expr(i);
                }
            }
            HirExpr::Dict(items) => {
                self.traits.needs_allocator = true;
                for (k, v) in items {
                    self.visit_expr(k);
                    self.visit_expr(v);
                }
            }
            HirExpr::ListComp { .. }
            | HirExpr::SetComp { .. }
            | HirExpr::DictComp { .. }
            | HirExpr::GeneratorExp { .. } => {
                self.traits.needs_allocator = true;
                self.visit_comprehension(expr);
            }
            HirExpr::FString(parts) => {
                self.traits.needs_allocator = true;
                for part in parts {
                    if let zigpyler_hir::FStringPart::Expr { value, .. } = part {
                        self.visit_expr(value);
                    }
                }
            }
            HirExpr::Call { func, args, kwargs } => {
                self.visit_call(func, args);
                for a in args {
                    self.visit_expr(a);
                }
                for kw in kwargs {
                    self.visit_expr(&kw.value);
                }
            }
            HirExpr::Yield(v) => {
                self.traits.is_generator = true;
                if let Some(inner) = v {
                    self.visit_expr(inner);
                }
            }
            HirExpr::YieldFrom(v) => {
                self.traits.is_generator = true;
                self.visit_expr(v);
            }
            HirExpr::Await(v) => self.visit_expr(v),
            HirExpr::Unary { operand, .. } => self.visit_expr(operand),
            HirExpr::Bool { values, .. } => values.iter().for_each(|v| self.visit_expr(v)),
            HirExpr::Compare {
                left, comparators, ..
            } => {
                self.visit_expr(left);
                comparators.iter().for_each(|c| self.visit_expr(c));
            }
            HirExpr::Index { base, index } => {
                self.visit_expr(base);
                self.visit_expr(index);
            }
            HirExpr::Slice { base, .. } => {
                // Slicing copies into a fresh container.
                self.traits.needs_allocator = true;
                self.visit_expr(base);
            }
            HirExpr::Attribute { value, .. } | HirExpr::Starred(value) => self.visit_expr(value),
            HirExpr::IfExp {
                test,
                body,
                orelse,
            } => {
                self.visit_expr(test);
                self.visit_expr(body);
                self.visit_expr(orelse);
            }
            HirExpr::Lambda { body, .. } => self.visit_expr(body),
            HirExpr::NamedExpr { value, .. } => self.visit_expr(value),
            HirExpr::Literal(lit) => {
                if matches!(lit, zigpyler_hir::Literal::BigInt(_)) {
                    self.traits.needs_allocator = true;
                }
            }
            HirExpr::Var(_) | HirExpr::Unsupported(_) => {}
        }
    }

    fn visit_comprehension(&mut self, expr: &HirExpr) {
        let generators = match expr {
            HirExpr::ListComp { generators, .. }
            | HirExpr::SetComp { generators, .. }
            | HirExpr::GeneratorExp { generators, .. }
            | HirExpr::DictComp { generators, .. } => generators,
            _ => return,
        };
        for g in generators {
            self.visit_expr(&g.iter);
            for cond in &g.ifs {
                self.visit_expr(cond);
            }
        }
        match expr {
            HirExpr::ListComp { element, .. }
            | HirExpr::SetComp { element, .. }
            | HirExpr::GeneratorExp { element, .. } => self.visit_expr(element),
            HirExpr::DictComp { key, value, .. } => {
                self.visit_expr(key);
                self.visit_expr(value);
            }
            _ => {}
        }
    }

    fn visit_call(&mut self, func: &HirExpr, args: &[HirExpr]) {
        match func {
            HirExpr::Var(name) => {
                if IO_BUILTINS.contains(&name.as_str()) {
                    self.traits.does_io = true;
                }
                if ALLOCATING_BUILTINS.contains(&name.as_str()) {
                    self.traits.needs_allocator = true;
                }
                if FALLIBLE_CONVERSIONS.contains(&name.as_str()) {
                    let arg_is_literal = matches!(
                        args.first(),
                        Some(HirExpr::Literal(_)) | Option::None
                    );
                    if !arg_is_literal {
                        self.traits.needs_error_union = true;
                    }
                }
                if let Some(path) = self.resolve_call_path(name) {
                    self.traits.calls.insert(path);
                }
            }
            HirExpr::Attribute { value, attr } => {
                if is_self(value) {
                    // Test assertions can fail the enclosing method.
                    if attr.starts_with("assert") || attr == "fail" || attr == "skipTest" {
                        self.traits.needs_error_union = true;
                    }
                    if let Some(class) = &self.class {
                        let path = child_scope(&child_scope("", class), attr);
                        self.traits.calls.insert(path.clone());
                        self.traits.self_calls.insert(path);
                    }
                } else if let Some(dotted) = func.dotted_name() {
                    let module = dotted.split('.').next().unwrap_or_default();
                    if matches!(module, "sys" | "os" | "asyncio" | "io" | "pathlib" | "shutil") {
                        self.traits.does_io = true;
                    }
                }
            }
            _ => {}
        }
    }

    /// Resolve a simple callee name against known function paths by
    /// walking outward from the current scope.
    fn resolve_call_path(&mut self, name: &str) -> Option<String> {
        let mut current = self.path.clone();
        loop {
            let parent = match current.rfind('/') {
                Some(idx) => current[..idx].to_string(),
                None => String::new(),
            };
            let candidate = child_scope(&parent, name);
            if self.types.return_type(&candidate).is_some()
                || self.types.call_args.contains_key(&candidate)
                || candidate == self.path
            {
                return Some(candidate);
            }
            if parent.is_empty() {
                // Module-level function call; record even without a
                // known return type so propagation can pick it up later.
                let module_path = name.to_string();
                return Some(module_path);
            }
            current = parent;
        }
    }

    fn expr_type(&self, expr: &HirExpr) -> NativeType {
        match expr {
            HirExpr::Literal(zigpyler_hir::Literal::Str(_)) => NativeType::str_literal(),
            HirExpr::Var(name) => self.types.var_type(&self.path, name),
            HirExpr::FString(_) => NativeType::str_runtime(),
            HirExpr::Binary { left, .. } => self.expr_type(left),
            _ => NativeType::Unknown,
        }
    }
}

fn is_self(expr: &HirExpr) -> bool {
    matches!(expr, HirExpr::Var(name) if name == "self")
}

/// Worklist fixpoint over the call graph: error unions and allocator
/// needs flow from callee to caller; self-mutation flows through
/// `self.`-dispatched calls.
fn propagate(table: &mut TraitsTable) {
    let paths: Vec<String> = table.map.keys().cloned().collect();
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    let index_of: IndexMap<&str, usize> = paths
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i))
        .collect();

    for (caller, traits) in &table.map {
        let from = index_of[caller.as_str()];
        for callee in &traits.calls {
            if let Some(&to) = index_of.get(callee.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    loop {
        let mut changed = false;
        for (from, to, _) in graph.all_edges() {
            let callee = table.map[paths[to].as_str()].clone();
            let caller_path = paths[from].clone();
            let caller = table.map.get_mut(&caller_path).unwrap();

            if callee.needs_allocator && !caller.needs_allocator {
                caller.needs_allocator = true;
                changed = true;
            }
            let callee_err = callee.needs_error_union || callee.needs_allocator;
            if callee_err && !caller.needs_error_union {
                caller.needs_error_union = true;
                changed = true;
            }
            if callee.does_io && !caller.does_io {
                caller.does_io = true;
                changed = true;
            }
            if callee.mutates_self
                && caller.self_calls.contains(paths[to].as_str())
                && !caller.mutates_self
            {
                caller.mutates_self = true;
                changed = true;
            }
        }
        // Allocation implies fallibility within each function too.
        for traits in table.map.values_mut() {
            if traits.needs_allocator && !traits.needs_error_union {
                traits.needs_error_union = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_flow::TypeInferencer;
    use zigpyler_hir::{HirParam, Literal};

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

    fn analyze(body: Vec<HirStmt>) -> TraitsTable {
        let module = HirModule {
            imports: vec![],
            body,
        };
        let types = TypeInferencer::new().infer_module(&module).unwrap();
        analyze_traits(&module, &types)
    }

    fn call(name: &str, args: Vec<HirExpr>) -> HirExpr {
        HirExpr::Call {
            func: Box::new(HirExpr::Var(name.to_string())),
            args,
            kwargs: vec![],
        }
    }

    #[test]
    fn raise_forces_error_union() {
        let table = analyze(vec![HirStmt::FunctionDef(func(
            "f",
            vec![],
            vec![HirStmt::Raise {
                exc: Some(call("ValueError", vec![])),
                cause: None,
            }],
        ))]);
        assert!(table.traits("f").needs_error_union);
    }

    #[test]
    fn pure_arithmetic_needs_nothing() {
        let table = analyze(vec![HirStmt::FunctionDef(func(
            "fib",
            vec!["n"],
            vec![HirStmt::Return(Some(HirExpr::Binary {
                op: BinOp::Add,
                left: Box::new(call("fib", vec![HirExpr::Var("n".to_string())])),
                right: Box::new(call("fib", vec![HirExpr::Var("n".to_string())])),
            }))],
        ))]);
        let traits = table.traits("fib");
        assert!(!traits.needs_error_union);
        assert!(!traits.needs_allocator);
        assert!(traits.has_value_return);
    }

    #[test]
    fn list_literal_needs_allocator_and_error_union() {
        let table = analyze(vec![HirStmt::FunctionDef(func(
            "make",
            vec![],
            vec![HirStmt::Return(Some(HirExpr::List(vec![HirExpr::Literal(
                Literal::Int(1),
            )])))],
        ))]);
        let traits = table.traits("make");
        assert!(traits.needs_allocator);
        // Allocation can fail, so the error union follows.
        assert!(traits.needs_error_union);
    }

    #[test]
    fn error_union_is_transitive() {
        let table = analyze(vec![
            HirStmt::FunctionDef(func(
                "inner",
                vec![],
                vec![HirStmt::Raise {
                    exc: Some(call("ValueError", vec![])),
                    cause: None,
                }],
            )),
            HirStmt::FunctionDef(func(
                "outer",
                vec![],
                vec![HirStmt::Expr(call("inner", vec![]))],
            )),
            HirStmt::FunctionDef(func(
                "outermost",
                vec![],
                vec![HirStmt::Expr(call("outer", vec![]))],
            )),
        ]);
        assert!(table.traits("inner").needs_error_union);
        assert!(table.traits("outer").needs_error_union);
        assert!(table.traits("outermost").needs_error_union);
    }

    #[test]
    fn recursion_does_not_hang_propagation() {
        let table = analyze(vec![HirStmt::FunctionDef(func(
            "loop_fn",
            vec!["n"],
            vec![HirStmt::Expr(call(
                "loop_fn",
                vec![HirExpr::Var("n".to_string())],
            ))],
        ))]);
        assert!(!table.traits("loop_fn").needs_error_union);
    }

    #[test]
    fn generator_flag_and_allocator() {
        let table = analyze(vec![HirStmt::FunctionDef(func(
            "gen",
            vec![],
            vec![HirStmt::Expr(HirExpr::Yield(Some(Box::new(
                HirExpr::Literal(Literal::Int(1)),
            ))))],
        ))]);
        let traits = table.traits("gen");
        assert!(traits.is_generator);
        assert!(traits.needs_allocator);
    }

    #[test]
    fn self_mutation_detected_and_propagated() {
        let bump = func(
            "bump",
            vec!["self"],
            vec![HirStmt::AugAssign {
                target: AssignTarget::Attribute {
                    value: HirExpr::Var("self".to_string()),
                    attr: "count".to_string(),
                },
                op: BinOp::Add,
                value: HirExpr::Literal(Literal::Int(1)),
            }],
        );
        let touch = func(
            "touch",
            vec!["self"],
            vec![HirStmt::Expr(HirExpr::Call {
                func: Box::new(HirExpr::Attribute {
                    value: Box::new(HirExpr::Var("self".to_string())),
                    attr: "bump".to_string(),
                }),
                args: vec![],
                kwargs: vec![],
            })],
        );
        let read = func(
            "read",
            vec!["self"],
            vec![HirStmt::Return(Some(HirExpr::Attribute {
                value: Box::new(HirExpr::Var("self".to_string())),
                attr: "count".to_string(),
            }))],
        );
        let class = HirClass {
            name: "Counter".to_string(),
            bases: vec![],
            decorators: vec![],
            fields: vec![],
            methods: vec![bump, touch, read],
            nested: vec![],
            docstring: None,
        };
        let table = analyze(vec![HirStmt::ClassDef(class)]);
        assert!(table.traits("Counter/bump").mutates_self);
        assert!(table.traits("Counter/touch").mutates_self);
        assert!(!table.traits("Counter/read").mutates_self);
    }

    #[test]
    fn returned_nested_function_is_recorded() {
        let outer = func(
            "outer",
            vec![],
            vec![
                HirStmt::FunctionDef(func("inner", vec![], vec![HirStmt::Pass])),
                HirStmt::Return(Some(HirExpr::Var("inner".to_string()))),
            ],
        );
        let table = analyze(vec![HirStmt::FunctionDef(outer)]);
        assert_eq!(
            table.traits("outer").returned_nested_function.as_deref(),
            Some("inner")
        );
    }

    #[test]
    fn async_io_mode_detection() {
        let mut io_fn = func(
            "fetch",
            vec![],
            vec![HirStmt::Expr(call(
                "print",
                vec![HirExpr::Literal(Literal::Str("x".to_string()))],
            ))],
        );
        io_fn.is_async = true;
        let table = analyze(vec![HirStmt::FunctionDef(io_fn)]);
        assert!(table.any_async_does_io());
    }

    #[test]
    fn string_concat_needs_allocator() {
        let table = analyze(vec![HirStmt::FunctionDef(func(
            "greet",
            vec![],
            vec![HirStmt::Return(Some(HirExpr::Binary {
                op: BinOp::Add,
                left: Box::new(HirExpr::Literal(Literal::Str("a".to_string()))),
                right: Box::new(HirExpr::Literal(Literal::Str("b".to_string()))),
            }))],
        ))]);
        assert!(table.traits("greet").needs_allocator);
    }
}
